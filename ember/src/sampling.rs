//! Token sampling over quantized logits

/// Greedy argmax over int16 logits.
///
/// Returns the smallest index holding the maximum value, or `None` for an
/// empty slice. This is the executor's built-in sampling path; anything
/// beyond greedy belongs to the session layer.
#[must_use]
pub fn argmax_i16(logits: &[i16]) -> Option<usize> {
    let mut best = *logits.first()?;
    let mut best_index = 0;
    for (index, &value) in logits.iter().enumerate().skip(1) {
        if value > best {
            best = value;
            best_index = index;
        }
    }
    Some(best_index)
}
