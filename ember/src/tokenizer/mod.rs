//! Tokenizer integration
//!
//! The executor consumes tokenizers through the [`Tokenizer`] trait: text
//! in, token ids out, and back. Decoding a set of ids that ends in the
//! middle of a byte-pair sequence is a recoverable [`Error::DataLoss`]
//! condition; callers accumulate more tokens and retry.

mod hf_tokenizer;

pub use hf_tokenizer::HuggingFaceTokenizer;

use crate::buffer::TensorBuffer;
use crate::dtype::DType;
use crate::{Error, Result, TokenId};

/// Maps text to token-id sequences and back.
pub trait Tokenizer {
    /// Encode text into a sequence of token ids.
    ///
    /// # Errors
    /// Returns an error if encoding fails.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>>;

    /// Decode a sequence of token ids into text.
    ///
    /// # Errors
    /// Returns `DataLoss` if the ids are part of an incomplete BPE
    /// sequence, or another error if decoding fails outright.
    fn decode(&self, ids: &[TokenId]) -> Result<String>;

    /// The beginning-of-sequence token id, if the tokenizer defines one.
    ///
    /// # Errors
    /// Returns `Unimplemented` by default.
    fn bos_id(&self) -> Result<TokenId> {
        Err(Error::Unimplemented("BOS id is not available".into()))
    }

    /// The end-of-sequence token id, if the tokenizer defines one.
    ///
    /// # Errors
    /// Returns `Unimplemented` by default.
    fn eos_id(&self) -> Result<TokenId> {
        Err(Error::Unimplemented("EOS id is not available".into()))
    }
}

/// Whether `result` carries the recoverable incomplete-BPE signal.
#[must_use]
pub fn is_incomplete_bpe<T>(result: &Result<T>) -> bool {
    matches!(result, Err(Error::DataLoss(_)))
}

/// Pack token ids into a `[1, num_tokens]` int32 tensor buffer.
///
/// # Errors
/// Returns an error if the write fails.
pub fn token_ids_to_buffer(ids: &[TokenId]) -> Result<TensorBuffer> {
    let buffer = TensorBuffer::new(DType::I32, &[1, ids.len()]);
    buffer.write_i32(ids)?;
    Ok(buffer)
}

/// Unpack a `[batch, num_tokens]` int32 tensor buffer into token-id rows.
///
/// # Errors
/// Returns `InvalidArgument` if the buffer is not two-dimensional.
pub fn buffer_to_token_ids(buffer: &TensorBuffer) -> Result<Vec<Vec<TokenId>>> {
    let dims = buffer.dims();
    if dims.len() != 2 {
        return Err(Error::InvalidArgument(
            "token id tensor must have 2 dimensions".into(),
        ));
    }
    let flat = buffer.copy_i32()?;
    Ok(flat.chunks(dims[1].max(1)).map(<[i32]>::to_vec).collect())
}
