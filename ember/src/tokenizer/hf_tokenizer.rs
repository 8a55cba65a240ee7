//! HuggingFace JSON tokenizer adapter
//!
//! Wraps a byte-pair tokenizer defined by a `tokenizer.json` blob, provided
//! in memory or memory-mapped from disk.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::tokenizer::Tokenizer;
use crate::{Error, Result, TokenId};

/// Unicode replacement character (U+FFFD).
///
/// Byte-fallback decoders emit it when the id set ends in the middle of a
/// multi-byte character; a complete decode never produces it as a suffix.
const REPLACEMENT_CHARACTER: &str = "\u{fffd}";

/// A tokenizer built from a HuggingFace `tokenizer.json` definition.
#[derive(Debug)]
pub struct HuggingFaceTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HuggingFaceTokenizer {
    /// Build a tokenizer from the bytes of a `tokenizer.json` blob.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if the blob is not a valid tokenizer
    /// definition.
    pub fn from_json(json: &[u8]) -> Result<Self> {
        let inner = tokenizers::Tokenizer::from_bytes(json).map_err(|e| {
            Error::InvalidArgument(format!("failed to create tokenizer from JSON: {e}"))
        })?;
        Ok(Self { inner })
    }

    /// Memory-map `tokenizer.json` at `path` and build from the mapped
    /// bytes.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or mapped, or if its
    /// contents are not a valid tokenizer definition.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and dropped before the file is
        // closed; the contents are fully consumed within this call.
        let mmap = unsafe { Mmap::map(&file)? };
        Self::from_json(&mmap)
    }

    /// Number of entries in the vocabulary, including added tokens.
    #[must_use]
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl Tokenizer for HuggingFaceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        Ok(encoding.get_ids().iter().map(|&id| id as TokenId).collect())
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String> {
        let unsigned: Vec<u32> = ids.iter().map(|&id| id as u32).collect();
        let decoded = self
            .inner
            .decode(&unsigned, false)
            .map_err(|e| Error::Tokenizer(e.to_string()))?;
        if decoded.ends_with(REPLACEMENT_CHARACTER) {
            return Err(Error::DataLoss(
                "token ids end in the middle of a BPE sequence; more tokens are needed".into(),
            ));
        }
        Ok(decoded)
    }
}
