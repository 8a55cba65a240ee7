//! Benchmark timing ledger
//!
//! Records named init-phase durations, per-turn prefill/decode timings, and
//! named mark deltas. Phase starts and ends must be balanced; violations
//! are `Internal` errors so they surface in tests rather than skewing
//! reported numbers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

use ember::{Error, Result};

/// One timed prefill or decode turn.
#[derive(Debug, Clone, Copy)]
pub struct BenchmarkTurnData {
    pub num_tokens: u64,
    pub duration: Duration,
}

/// Init-phase, per-turn, and mark-delta timing records.
#[derive(Debug, Default)]
pub struct BenchmarkInfo {
    start_times: HashMap<String, Instant>,
    init_phases: BTreeMap<String, Duration>,
    mark_times: HashMap<String, Instant>,
    mark_durations: BTreeMap<String, Duration>,
    prefill_turns: Vec<BenchmarkTurnData>,
    decode_turns: Vec<BenchmarkTurnData>,
}

impl BenchmarkInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin timing a named init phase.
    ///
    /// # Errors
    /// Returns `Internal` if the phase was already started.
    pub fn time_init_phase_start(&mut self, phase_name: &str) -> Result<()> {
        if self.start_times.contains_key(phase_name) {
            return Err(Error::Internal(format!(
                "phase {phase_name} already started"
            )));
        }
        self.start_times.insert(phase_name.to_string(), Instant::now());
        Ok(())
    }

    /// Finish timing a named init phase.
    ///
    /// # Errors
    /// Returns `Internal` if the phase was never started.
    pub fn time_init_phase_end(&mut self, phase_name: &str) -> Result<()> {
        let Some(start) = self.start_times.get(phase_name) else {
            return Err(Error::Internal(format!("phase {phase_name} not started")));
        };
        self.init_phases
            .insert(phase_name.to_string(), start.elapsed());
        Ok(())
    }

    /// Record a named mark. The first call arms the timer; each following
    /// call stores the interval since the previous one and re-arms.
    pub fn time_mark_delta(&mut self, mark_name: &str) {
        let now = Instant::now();
        if let Some(previous) = self.mark_times.get(mark_name) {
            self.mark_durations
                .insert(mark_name.to_string(), now.duration_since(*previous));
        }
        self.mark_times.insert(mark_name.to_string(), now);
    }

    /// Begin timing the next prefill turn.
    ///
    /// # Errors
    /// Returns `Internal` if the turn was already started.
    pub fn time_prefill_turn_start(&mut self) -> Result<()> {
        let phase_name = format!("prefill:{}", self.prefill_turns.len());
        if self.start_times.contains_key(&phase_name) {
            return Err(Error::Internal(format!(
                "prefill turn {phase_name} already started"
            )));
        }
        self.start_times.insert(phase_name, Instant::now());
        Ok(())
    }

    /// Finish the current prefill turn; the turn index auto-increments.
    ///
    /// # Errors
    /// Returns `Internal` if the turn was never started.
    pub fn time_prefill_turn_end(&mut self, num_prefill_tokens: u64) -> Result<()> {
        let phase_name = format!("prefill:{}", self.prefill_turns.len());
        let Some(start) = self.start_times.get(&phase_name) else {
            return Err(Error::Internal(format!(
                "prefill turn {phase_name} not started"
            )));
        };
        self.prefill_turns.push(BenchmarkTurnData {
            num_tokens: num_prefill_tokens,
            duration: start.elapsed(),
        });
        Ok(())
    }

    /// Begin timing the next decode turn.
    ///
    /// # Errors
    /// Returns `Internal` if the turn was already started.
    pub fn time_decode_turn_start(&mut self) -> Result<()> {
        let phase_name = format!("decode:{}", self.decode_turns.len());
        if self.start_times.contains_key(&phase_name) {
            return Err(Error::Internal(format!(
                "decode turn {phase_name} already started"
            )));
        }
        self.start_times.insert(phase_name, Instant::now());
        Ok(())
    }

    /// Finish the current decode turn; the turn index auto-increments.
    ///
    /// # Errors
    /// Returns `Internal` if the turn was never started.
    pub fn time_decode_turn_end(&mut self, num_decode_tokens: u64) -> Result<()> {
        let phase_name = format!("decode:{}", self.decode_turns.len());
        let Some(start) = self.start_times.get(&phase_name) else {
            return Err(Error::Internal(format!(
                "decode turn {phase_name} not started"
            )));
        };
        self.decode_turns.push(BenchmarkTurnData {
            num_tokens: num_decode_tokens,
            duration: start.elapsed(),
        });
        Ok(())
    }

    #[must_use]
    pub fn init_phases(&self) -> &BTreeMap<String, Duration> {
        &self.init_phases
    }

    #[must_use]
    pub fn mark_durations(&self) -> &BTreeMap<String, Duration> {
        &self.mark_durations
    }

    #[must_use]
    pub fn total_prefill_turns(&self) -> usize {
        self.prefill_turns.len()
    }

    #[must_use]
    pub fn total_decode_turns(&self) -> usize {
        self.decode_turns.len()
    }

    #[must_use]
    pub fn prefill_turn(&self, turn_index: usize) -> Option<&BenchmarkTurnData> {
        self.prefill_turns.get(turn_index)
    }

    #[must_use]
    pub fn decode_turn(&self, turn_index: usize) -> Option<&BenchmarkTurnData> {
        self.decode_turns.get(turn_index)
    }

    /// Tokens per second for a prefill turn; 0.0 for out-of-range turns or
    /// non-positive durations.
    #[must_use]
    pub fn prefill_tokens_per_sec(&self, turn_index: usize) -> f64 {
        Self::tokens_per_sec(self.prefill_turns.get(turn_index))
    }

    /// Tokens per second for a decode turn; 0.0 for out-of-range turns or
    /// non-positive durations.
    #[must_use]
    pub fn decode_tokens_per_sec(&self, turn_index: usize) -> f64 {
        Self::tokens_per_sec(self.decode_turns.get(turn_index))
    }

    fn tokens_per_sec(turn: Option<&BenchmarkTurnData>) -> f64 {
        let Some(turn) = turn else {
            return 0.0;
        };
        let seconds = turn.duration.as_secs_f64();
        if seconds <= 0.0 {
            return 0.0;
        }
        turn.num_tokens as f64 / seconds
    }
}

impl fmt::Display for BenchmarkTurnData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {} tokens in {:?}",
            self.num_tokens, self.duration
        )
    }
}

impl fmt::Display for BenchmarkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BenchmarkInfo:")?;
        writeln!(f, "  Init phases ({}):", self.init_phases.len())?;
        for (phase_name, duration) in &self.init_phases {
            writeln!(f, "    - {phase_name}: {:.2} ms", duration.as_secs_f64() * 1e3)?;
        }
        writeln!(f, "  Prefill turns ({}):", self.prefill_turns.len())?;
        for (index, turn) in self.prefill_turns.iter().enumerate() {
            writeln!(
                f,
                "    Turn {index}: {turn} ({:.2} tokens/sec)",
                self.prefill_tokens_per_sec(index)
            )?;
        }
        writeln!(f, "  Decode turns ({}):", self.decode_turns.len())?;
        for (index, turn) in self.decode_turns.iter().enumerate() {
            writeln!(
                f,
                "    Turn {index}: {turn} ({:.2} tokens/sec)",
                self.decode_tokens_per_sec(index)
            )?;
        }
        for (mark_name, duration) in &self.mark_durations {
            writeln!(f, "  Mark {mark_name}: {duration:?}")?;
        }
        Ok(())
    }
}
