//! Ember Runtime: text-in, text-out sessions
//!
//! This crate layers session orchestration over the execution core:
//!
//! ```text
//! Session<T>             ← text in, Responses out (owns NpuExecutor + Tokenizer)
//!   ├── StopTokenDetector  ← termination on configured stop sequences
//!   ├── BenchmarkInfo      ← init/turn/mark timing ledger
//!   └── InferenceObservable ← streaming observer callbacks
//! ```

pub mod benchmark;
pub mod observer;
pub mod responses;
pub mod session;
pub mod stop_tokens;

pub use benchmark::{BenchmarkInfo, BenchmarkTurnData};
pub use observer::InferenceObservable;
pub use responses::Responses;
pub use session::Session;
pub use stop_tokens::StopTokenDetector;
