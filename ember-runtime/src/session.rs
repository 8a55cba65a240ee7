//! Text-level session over one executor
//!
//! A [`Session`] owns an executor and a tokenizer and drives the
//! prompt-prefill / token-decode loop for a single candidate stream.
//! Incomplete byte-pair sequences are accumulated across decode steps and
//! retried, so observers only ever see complete text.

use ember::executor::{ExecutorInputs, NpuExecutor};
use ember::tokenizer::token_ids_to_buffer;
use ember::{DType, Error, Result, TensorBuffer, TokenId, Tokenizer};

use crate::benchmark::BenchmarkInfo;
use crate::observer::InferenceObservable;
use crate::responses::Responses;
use crate::stop_tokens::StopTokenDetector;

/// One text-in, text-out conversation.
///
/// Combines an executor with a tokenizer. Each session serves one model
/// with batch size 1 and a single output candidate.
pub struct Session<T: Tokenizer> {
    executor: NpuExecutor,
    tokenizer: T,
    stop_detector: StopTokenDetector,
    benchmark: Option<BenchmarkInfo>,
}

impl<T: Tokenizer> Session<T> {
    /// Create a session.
    ///
    /// The tokenizer's EOS token, when it defines one, is added to the
    /// configured stop sequences automatically.
    #[must_use]
    pub fn new(executor: NpuExecutor, tokenizer: T, stop_sequences: Vec<Vec<TokenId>>) -> Self {
        let mut stop_detector = StopTokenDetector::new(stop_sequences);
        if let Ok(eos) = tokenizer.eos_id() {
            stop_detector.add_stop_sequence(vec![eos]);
        }
        Self {
            executor,
            tokenizer,
            stop_detector,
            benchmark: None,
        }
    }

    /// Enable benchmark recording for this session.
    #[must_use]
    pub fn with_benchmark(mut self) -> Self {
        self.benchmark = Some(BenchmarkInfo::new());
        self
    }

    #[must_use]
    pub fn benchmark(&self) -> Option<&BenchmarkInfo> {
        self.benchmark.as_ref()
    }

    #[must_use]
    pub fn executor(&self) -> &NpuExecutor {
        &self.executor
    }

    #[must_use]
    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    /// Tokenize `prompt` and load it into the KV cache.
    ///
    /// A BOS token is prepended when the tokenizer provides one.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty prompt or one that exceeds
    /// the token budget, or any executor error.
    pub fn prefill(&mut self, prompt: &str) -> Result<()> {
        if let Some(benchmark) = &mut self.benchmark {
            benchmark.time_prefill_turn_start()?;
        }
        let mut ids = self.tokenizer.encode(prompt)?;
        if let Ok(bos) = self.tokenizer.bos_id() {
            ids.insert(0, bos);
        }
        if ids.is_empty() {
            return Err(Error::InvalidArgument("prompt produced no tokens".into()));
        }
        if ids.len() >= self.executor.max_num_tokens() {
            return Err(Error::InvalidArgument(format!(
                "input token ids are too long: {} >= {}",
                ids.len(),
                self.executor.max_num_tokens()
            )));
        }
        let num_tokens = ids.len() as u64;
        let buffer = token_ids_to_buffer(&ids)?;
        self.executor.prefill(&ExecutorInputs::new(buffer))?;
        if let Some(benchmark) = &mut self.benchmark {
            benchmark.time_prefill_turn_end(num_tokens)?;
        }
        Ok(())
    }

    /// Decode until a stop sequence, the token budget, or `max_new_tokens`.
    ///
    /// # Errors
    /// Returns the first executor or tokenizer failure.
    pub fn decode(&mut self, max_new_tokens: usize) -> Result<Responses> {
        self.decode_loop(max_new_tokens, None)
    }

    /// Decode as [`Session::decode`], reporting progress to `observer`.
    ///
    /// The observer sees the accumulated candidate after each step, then
    /// `on_done` on clean termination or `on_error` on failure.
    ///
    /// # Errors
    /// Returns the first executor or tokenizer failure, after reporting it
    /// to the observer.
    pub fn decode_streaming(
        &mut self,
        max_new_tokens: usize,
        observer: &mut dyn InferenceObservable,
    ) -> Result<()> {
        match self.decode_loop(max_new_tokens, Some(&mut *observer)) {
            Ok(_) => {
                observer.on_done();
                Ok(())
            }
            Err(error) => {
                observer.on_error(&error);
                Err(error)
            }
        }
    }

    /// Prefill `prompt` and decode the response in one call.
    ///
    /// # Errors
    /// Returns the first executor or tokenizer failure.
    pub fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> Result<Responses> {
        self.prefill(prompt)?;
        self.decode(max_new_tokens)
    }

    fn decode_loop(
        &mut self,
        max_new_tokens: usize,
        mut observer: Option<&mut dyn InferenceObservable>,
    ) -> Result<Responses> {
        if let Some(benchmark) = &mut self.benchmark {
            benchmark.time_decode_turn_start()?;
        }
        self.stop_detector.reset();
        let mut responses = Responses::new(1);
        let output_tokens = TensorBuffer::new(DType::I32, &[1, 1]);
        // Ids whose decode is still an incomplete BPE sequence.
        let mut pending_ids: Vec<TokenId> = Vec::new();
        let mut steps = 0usize;

        loop {
            if let Some(benchmark) = &mut self.benchmark {
                benchmark.time_mark_delta("executor_decode_and_sample");
            }
            self.executor.decode(&output_tokens)?;
            if let Some(benchmark) = &mut self.benchmark {
                benchmark.time_mark_delta("executor_decode_and_sample");
            }

            let id = output_tokens
                .copy_i32()?
                .first()
                .copied()
                .ok_or_else(|| Error::Internal("decode produced no output token".into()))?;
            steps += 1;
            pending_ids.push(id);
            let hit_stop = self.stop_detector.process_token(id);

            match self.tokenizer.decode(&pending_ids) {
                Ok(text) => {
                    responses.response_texts_mut()[0].push_str(&text);
                    pending_ids.clear();
                }
                Err(error) if error.is_data_loss() => {
                    // More tokens are needed before this fragment decodes.
                }
                Err(error) => return Err(error),
            }
            if let Some(observer) = observer.as_deref_mut() {
                observer.on_next(&responses);
            }

            if hit_stop
                || steps >= max_new_tokens
                || self.executor.current_step() >= self.executor.max_num_tokens()
            {
                break;
            }
        }

        if let Some(benchmark) = &mut self.benchmark {
            benchmark.time_decode_turn_end(steps as u64)?;
        }
        Ok(responses)
    }
}
