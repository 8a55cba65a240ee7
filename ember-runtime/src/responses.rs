//! Model response container

use std::fmt;

use ember::{Error, Result};

/// Candidate responses produced by one decode turn.
///
/// Holds one text buffer per output candidate and, optionally, one score
/// per candidate. Scores are initialized lazily to negative infinity; their
/// semantics belong to the sampling layer.
#[derive(Debug, Clone)]
pub struct Responses {
    num_output_candidates: usize,
    response_texts: Vec<String>,
    scores: Vec<f32>,
}

impl Responses {
    #[must_use]
    pub fn new(num_output_candidates: usize) -> Self {
        Self {
            num_output_candidates,
            response_texts: vec![String::new(); num_output_candidates],
            scores: Vec::new(),
        }
    }

    #[must_use]
    pub fn num_output_candidates(&self) -> usize {
        self.num_output_candidates
    }

    /// The candidate text at `index`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if `index` is out of range.
    pub fn response_text_at(&self, index: usize) -> Result<&str> {
        if index >= self.num_output_candidates {
            return Err(Error::InvalidArgument(format!(
                "index {index} is out of range [0, {})",
                self.num_output_candidates
            )));
        }
        Ok(&self.response_texts[index])
    }

    /// The candidate score at `index`.
    ///
    /// # Errors
    /// Returns `InvalidArgument` if scores were never set or `index` is out
    /// of range.
    pub fn score_at(&self, index: usize) -> Result<f32> {
        if self.scores.is_empty() {
            return Err(Error::InvalidArgument("scores are not set".into()));
        }
        if index >= self.scores.len() {
            return Err(Error::InvalidArgument(format!(
                "index {index} is out of range [0, {})",
                self.scores.len()
            )));
        }
        Ok(self.scores[index])
    }

    /// Mutable access to the candidate texts.
    pub fn response_texts_mut(&mut self) -> &mut Vec<String> {
        &mut self.response_texts
    }

    /// Mutable access to the scores, initializing them to negative infinity
    /// on first use.
    pub fn scores_mut(&mut self) -> &mut Vec<f32> {
        if self.scores.is_empty() {
            self.scores = vec![f32::NEG_INFINITY; self.num_output_candidates];
        }
        &mut self.scores
    }
}

impl fmt::Display for Responses {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.num_output_candidates == 0 {
            return writeln!(f, "No responses.");
        }
        writeln!(f, "Total candidates: {}:", self.num_output_candidates)?;
        for index in 0..self.num_output_candidates {
            match self.score_at(index) {
                Ok(score) => writeln!(f, "  Candidate {index} (score: {score}):")?,
                Err(_) => writeln!(f, "  Candidate {index} (score: N/A):")?,
            }
            writeln!(f, "    Text: \"{}\"", self.response_texts[index])?;
        }
        Ok(())
    }
}
