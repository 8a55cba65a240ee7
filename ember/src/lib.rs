//! Ember: on-device LLM execution core
//!
//! This crate drives a compiled LLM package on an NPU: five compiled
//! subgraphs (token embedder, rotary position encoding, attention-mask
//! builder, the main LLM, and a KV-cache update graph) are stitched
//! together through shared device buffers and executed in fixed order for
//! each prefill chunk and each decode step.
//!
//! # Architecture
//!
//! ```text
//! NpuExecutor            ← prefill/decode state machine + buffer wiring
//!   ├── CompiledGraph    ← one per bundled model (llm, auxiliary, embedder)
//!   ├── TensorBuffer     ← shared device buffers with scoped CPU locks
//!   └── Tokenizer        ← text ↔ token ids (session layer concern)
//! ```

pub mod buffer;
pub mod dtype;
pub mod error;
pub mod executor;
pub mod graph;
pub mod sampling;
pub mod settings;
pub mod signatures;
pub mod tokenizer;
pub mod work_groups;

pub use buffer::{ScopedLock, TensorBuffer};
pub use dtype::DType;
pub use error::{Error, Result};
pub use executor::{ExecutorInputs, LatencyStats, NpuExecutor};
pub use graph::{BufferMap, CompiledGraph, ModelKind, ModelResources, SignatureInfo, TensorSpec};
pub use settings::{Backend, BackendConfig, ExecutorSettings, ModelAssets};
pub use tokenizer::Tokenizer;
pub use work_groups::SortedPrefillSignatureMap;

/// Token identifier flowing through the tokenizer and executor.
pub type TokenId = i32;
