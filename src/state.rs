//! Logical clock and attribute timeline for one part of one line.
//!
//! Time is measured in quarter notes from the start of the line and is never
//! reset at barlines. Attribute deltas are stored by the time they were
//! declared; the attributes in force at any instant are recomputed from that
//! log, so rewinding with `<backup>` sees exactly what was in force then.

use std::collections::BTreeMap;

use num_rational::Ratio;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Attributes;

/// Position on the logical clock, in quarter notes.
pub type Time = Ratio<i64>;

/// Default divisions per quarter note until the part declares its own.
const DEFAULT_DIVISIONS: i64 = 1;

/// Clock and attribute state of a part while its measures are walked.
#[derive(Debug, Clone)]
pub struct ScoreState {
    staff_count: u32,
    divisions: i64,
    current_time: Time,
    buffered_time: Time,
    measure_start: Time,
    initial_attributes: Attributes,
    current_attributes: Attributes,
    timeline: BTreeMap<Time, Attributes>,
    measure_timeline: Vec<(Time, Attributes)>,
}

impl Default for ScoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreState {
    pub fn new() -> Self {
        Self {
            staff_count: 1,
            divisions: DEFAULT_DIVISIONS,
            current_time: Time::from_integer(0),
            buffered_time: Time::from_integer(0),
            measure_start: Time::from_integer(0),
            initial_attributes: Attributes::default(),
            current_attributes: Attributes::default(),
            timeline: BTreeMap::new(),
            measure_timeline: Vec::new(),
        }
    }

    pub fn staff_count(&self) -> u32 {
        self.staff_count
    }

    pub fn divisions(&self) -> i64 {
        self.divisions
    }

    pub fn current_time(&self) -> Time {
        self.current_time
    }

    pub fn buffered_time(&self) -> Time {
        self.buffered_time
    }

    /// Attributes in force at the current time.
    pub fn current_attributes(&self) -> &Attributes {
        &self.current_attributes
    }

    /// Attribute deltas recorded since the current measure started.
    pub fn measure_timeline(&self) -> &[(Time, Attributes)] {
        &self.measure_timeline
    }

    /// The delta log, ordered by time.
    pub fn timeline(&self) -> &BTreeMap<Time, Attributes> {
        &self.timeline
    }

    pub fn set_divisions(&mut self, divisions: i64) -> Result<()> {
        if divisions <= 0 {
            return Err(Error::malformed("divisions", format!("{divisions} is not positive")));
        }
        self.divisions = divisions;
        Ok(())
    }

    /// Convert a duration in divisions to quarter notes.
    pub fn to_time(&self, duration: i64) -> Time {
        Time::new(duration, self.divisions)
    }

    // ─── Clock ───────────────────────────────────────────────────────

    /// Record a pending advance without moving the clock.
    pub fn set_buffer(&mut self, duration: Time) {
        self.buffered_time = duration;
    }

    /// Apply the pending advance, then clear it.
    pub fn move_buffer(&mut self) -> Result<()> {
        if self.buffered_time != Time::from_integer(0) {
            let target = self.current_time + self.buffered_time;
            self.buffered_time = Time::from_integer(0);
            self.change_time(target)?;
        }
        Ok(())
    }

    /// Flush the buffer, then move the clock by `delta` (negative for backup).
    pub fn increment_time(&mut self, delta: Time) -> Result<()> {
        self.move_buffer()?;
        self.change_time(self.current_time + delta)
    }

    /// Move the clock to `time` and recompute the attributes in force there.
    ///
    /// The result is the initial attributes composed, in time order, with
    /// every delta declared at or before `time`.
    pub fn change_time(&mut self, time: Time) -> Result<()> {
        if time < Time::from_integer(0) {
            return Err(Error::NegativeTime);
        }
        self.current_time = time;
        self.current_attributes = self
            .timeline
            .range(..=time)
            .fold(self.initial_attributes.clone(), |acc, (_, delta)| acc.merge(delta));
        Ok(())
    }

    /// Start a new measure. The clock keeps running; only the measure log
    /// is cleared.
    pub fn new_measure(&mut self) -> Result<()> {
        self.move_buffer()?;
        self.measure_start = self.current_time;
        self.measure_timeline.clear();
        Ok(())
    }

    /// Change the number of staves. Only legal at the very start of a
    /// measure, before any delta of that measure was recorded.
    pub fn change_staves(&mut self, staves: u32) -> Result<()> {
        let at_start = self.buffered_time == Time::from_integer(0)
            && self.current_time == self.measure_start
            && self.measure_timeline.is_empty();
        if !at_start {
            return Err(Error::StaffChangeMidMeasure(staves));
        }
        self.staff_count = staves;
        Ok(())
    }

    // ─── Timeline ────────────────────────────────────────────────────

    /// Record an attribute delta at the current time.
    ///
    /// A delta landing on a time that already has one is merged into it, so
    /// several blocks at the same instant accumulate.
    pub fn record(&mut self, delta: Attributes) -> Result<()> {
        let time = self.current_time;
        debug!(
            time = %time,
            clefs = delta.clefs.len(),
            keys = delta.keys.len(),
            times = delta.times.len(),
            "recording attribute delta"
        );
        self.measure_timeline.push((time, delta.clone()));
        let merged = match self.timeline.remove(&time) {
            Some(existing) => existing.merge(&delta),
            None => delta,
        };
        self.timeline.insert(time, merged);
        self.change_time(time)
    }

    /// Attributes in force at the start of the line.
    pub fn initial_attributes(&self) -> Attributes {
        match self.timeline.get(&Time::from_integer(0)) {
            Some(at_zero) => self.initial_attributes.merge(at_zero),
            None => self.initial_attributes.clone(),
        }
    }

    /// Attributes in force once every recorded delta applies.
    pub fn final_attributes(&self) -> Attributes {
        self.timeline
            .values()
            .fold(self.initial_attributes.clone(), |acc, delta| acc.merge(delta))
    }
}
