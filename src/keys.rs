//! Key signature algebra.
//!
//! A key can be written as a signed count on the circle of fifths or as an
//! explicit list of step alterations. Comparisons and compositions always
//! work on alteration lists; naturals in those lists are cancellation
//! bookkeeping and never part of the signature itself.

use crate::error::{Error, Result};
use crate::model::{Alteration, Key, KeySignature, Step};

/// Order in which sharps are added; flats use the reverse.
const SHARP_ORDER: [Step; 7] = [Step::F, Step::C, Step::G, Step::D, Step::A, Step::E, Step::B];

/// Traditional signatures the engine can restate as a fifths count.
const FIFTHS_RANGE: std::ops::RangeInclusive<i32> = -7..=7;

/// Alterations of a traditional key, in engraving order.
///
/// With `cancel`, naturals are appended for every step of the cancelled key
/// that the new key does not keep with the same alteration.
pub fn convert_fifths_to_key_alter(fifths: i32, cancel: Option<i32>) -> Vec<Alteration> {
    let mut alterations = signature_alterations(fifths);
    if let Some(cancel) = cancel {
        let retained = alterations.clone();
        for old in signature_alterations(cancel) {
            if !retained.contains(&old) {
                alterations.push(Alteration::new(old.step, 0));
            }
        }
    }
    alterations
}

fn signature_alterations(fifths: i32) -> Vec<Alteration> {
    let order: Vec<Step> = if fifths >= 0 {
        SHARP_ORDER.to_vec()
    } else {
        SHARP_ORDER.iter().rev().copied().collect()
    };
    let sign = fifths.signum();
    let count = fifths.unsigned_abs();
    let (rounds, extra) = (count / 7, (count % 7) as usize);

    // Past seven accidentals the cycle restarts with doubles.
    let per_step: [i32; 7] = std::array::from_fn(|i| sign * (rounds + u32::from(i < extra)) as i32);
    order
        .iter()
        .zip(per_step)
        .filter(|(_, alter)| *alter != 0)
        .map(|(step, alter)| Alteration::new(*step, alter))
        .collect()
}

/// Resulting sharps and flats once `new` applies on top of `previous`.
///
/// Steps naturalized by `new` are dropped from `previous`, then the new
/// sharps and flats are added. Turning a flat into a sharp (or the reverse)
/// without naturalizing the step first cannot be encoded and is an error.
/// The result is sorted by step and contains no naturals.
pub fn get_absolute_keys(new: &[Alteration], previous: &[Alteration]) -> Result<Vec<Alteration>> {
    let naturalized: Vec<Step> = new.iter().filter(|a| a.is_natural()).map(|a| a.step).collect();

    let mut result: Vec<Alteration> = previous
        .iter()
        .filter(|a| !a.is_natural() && !naturalized.contains(&a.step))
        .copied()
        .collect();

    for alteration in new.iter().filter(|a| !a.is_natural()) {
        match result.iter_mut().find(|a| a.step == alteration.step) {
            Some(existing) if existing.alter.signum() != alteration.alter.signum() => {
                return Err(Error::InconsistentKey {
                    step: alteration.step,
                    previous: existing.alter,
                    new: alteration.alter,
                });
            }
            Some(existing) => existing.alter = alteration.alter,
            None => result.push(*alteration),
        }
    }

    result.sort_by_key(|a| a.step);
    Ok(result)
}

/// Equal once naturals are stripped and both sides are ordered by step.
pub fn same_alterations(a: &[Alteration], b: &[Alteration]) -> bool {
    stripped(a) == stripped(b)
}

fn stripped(alterations: &[Alteration]) -> Vec<Alteration> {
    let mut out: Vec<Alteration> = alterations.iter().filter(|a| !a.is_natural()).copied().collect();
    out.sort_by_key(|a| a.step);
    out
}

/// Fifths count of a traditional key with exactly these sharps or flats.
pub fn fifths_for(alterations: &[Alteration]) -> Option<i32> {
    FIFTHS_RANGE.into_iter().find(|&fifths| {
        same_alterations(&signature_alterations(fifths), alterations)
    })
}

impl KeySignature {
    /// The alteration list this signature declares, naturals included.
    pub fn to_alterations(&self) -> Vec<Alteration> {
        match self {
            KeySignature::Fifths { fifths, cancel } => convert_fifths_to_key_alter(*fifths, *cancel),
            KeySignature::Alterations(list) => list.clone(),
        }
    }

    /// Canonical form: an alteration list sorted by step.
    pub fn canonical(&self) -> KeySignature {
        let mut list = self.to_alterations();
        list.sort_by_key(|a| a.step);
        KeySignature::Alterations(list)
    }

    /// Whether the declaration naturalizes steps of an earlier key.
    pub fn has_cancellation(&self) -> bool {
        match self {
            KeySignature::Fifths { cancel, .. } => cancel.is_some(),
            KeySignature::Alterations(list) => list.iter().any(Alteration::is_natural),
        }
    }

    /// Sharps and flats in force after this declaration.
    ///
    /// A declaration without cancellation restates the whole key; one that
    /// cancels is a change relative to `previous`.
    pub fn resolve(&self, previous: Option<&Key>) -> Result<Vec<Alteration>> {
        let declared = self.to_alterations();
        match previous {
            Some(prev) if self.has_cancellation() => get_absolute_keys(&declared, &prev.absolute),
            _ => get_absolute_keys(&declared, &[]),
        }
    }
}

impl Key {
    /// Keys agree when their sharps and flats agree.
    pub fn compare(&self, other: &Key) -> bool {
        same_alterations(&self.absolute, &other.absolute)
    }

    /// A self-contained signature equal to this key's absolute alterations.
    pub fn restated(&self) -> KeySignature {
        match fifths_for(&self.absolute) {
            Some(fifths) => KeySignature::Fifths { fifths, cancel: None },
            None => KeySignature::Alterations(self.absolute.clone()),
        }
    }
}
