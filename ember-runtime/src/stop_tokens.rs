//! Stop-token sequence detection

use ember::TokenId;

/// Detects configured stop sequences at the tail of a decoded token
/// stream.
///
/// Sequences may span several tokens; the detector keeps just enough
/// history to match the longest one. Matching the executor's contract,
/// this tracks a single candidate stream.
#[derive(Debug, Clone, Default)]
pub struct StopTokenDetector {
    stop_sequences: Vec<Vec<TokenId>>,
    history: Vec<TokenId>,
    max_sequence_len: usize,
    done: bool,
}

impl StopTokenDetector {
    #[must_use]
    pub fn new(stop_sequences: Vec<Vec<TokenId>>) -> Self {
        let stop_sequences: Vec<Vec<TokenId>> = stop_sequences
            .into_iter()
            .filter(|sequence| !sequence.is_empty())
            .collect();
        let max_sequence_len = stop_sequences.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            stop_sequences,
            history: Vec::new(),
            max_sequence_len,
            done: false,
        }
    }

    /// Add a stop sequence after construction.
    pub fn add_stop_sequence(&mut self, sequence: Vec<TokenId>) {
        if sequence.is_empty() {
            return;
        }
        self.max_sequence_len = self.max_sequence_len.max(sequence.len());
        self.stop_sequences.push(sequence);
    }

    /// Feed one decoded token; returns whether a stop sequence has
    /// completed.
    pub fn process_token(&mut self, id: TokenId) -> bool {
        if self.done {
            return true;
        }
        self.history.push(id);
        if self.history.len() > self.max_sequence_len {
            let excess = self.history.len() - self.max_sequence_len;
            self.history.drain(..excess);
        }
        self.done = self
            .stop_sequences
            .iter()
            .any(|sequence| self.history.ends_with(sequence));
        self.done
    }

    /// Whether a stop sequence has been seen.
    #[must_use]
    pub fn done(&self) -> bool {
        self.done
    }

    /// Clear the match state for a new turn.
    pub fn reset(&mut self) {
        self.history.clear();
        self.done = false;
    }
}
