//! Prefill work-group planning
//!
//! Decomposes a prefill of `input_length` tokens into an ordered list of
//! (signature name, chunk length) pairs drawn from the model's supported
//! prefill lengths.

use std::collections::BTreeMap;

use crate::{Error, Result};

/// Supported prefill length → signature name, ordered by length.
pub type SortedPrefillSignatureMap = BTreeMap<usize, String>;

/// Plan prefill calls covering exactly `input_length` tokens.
///
/// Strategy: run the largest supported length until the remainder is
/// smaller than it, then finish with one call on the smallest runner that
/// still covers the remainder, filling only `remaining` of its input slots.
///
/// # Errors
/// Returns `Internal` if no prefill signatures are available for a
/// non-empty input.
pub fn optimized_prefill_work_groups(
    prefill_signatures: &SortedPrefillSignatureMap,
    input_length: usize,
) -> Result<Vec<(String, usize)>> {
    if input_length == 0 {
        return Ok(Vec::new());
    }
    let Some((&max_length, max_signature)) = prefill_signatures.iter().next_back() else {
        return Err(Error::Internal(
            "no prefill signatures available to plan work groups".into(),
        ));
    };

    let mut work_groups = Vec::new();
    let mut remaining = input_length;
    while remaining >= max_length {
        work_groups.push((max_signature.clone(), max_length));
        remaining -= max_length;
    }
    if remaining > 0 {
        // Smallest runner that still covers the remainder; the largest one
        // always qualifies, so this is guaranteed to find a group.
        for (&length, signature) in prefill_signatures {
            if length >= remaining {
                work_groups.push((signature.clone(), remaining));
                break;
            }
        }
    }
    Ok(work_groups)
}
