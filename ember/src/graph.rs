//! Compiled subgraph and model-resource seams
//!
//! A model package is presented to the executor as compiled graphs, each
//! exposing named signatures with fixed input and output tensor lists.
//! Backends (NPU dispatch, CPU interpreter, test fakes) implement
//! [`CompiledGraph`]; packages implement [`ModelResources`] to hand out the
//! graphs by logical role.

use std::collections::HashMap;
use std::sync::Arc;

use crate::buffer::TensorBuffer;
use crate::dtype::DType;
use crate::{Error, Result};

/// Declared element type and shape of one signature tensor.
#[derive(Debug, Clone)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: DType,
    pub dims: Vec<usize>,
}

impl TensorSpec {
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: DType, dims: &[usize]) -> Self {
        Self {
            name: name.into(),
            dtype,
            dims: dims.to_vec(),
        }
    }
}

/// A named entry point of a compiled graph: its declared inputs and outputs.
#[derive(Debug, Clone)]
pub struct SignatureInfo {
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
}

impl SignatureInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, inputs: Vec<TensorSpec>, outputs: Vec<TensorSpec>) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
        }
    }

    /// Find a declared input tensor by name.
    #[must_use]
    pub fn input(&self, tensor: &str) -> Option<&TensorSpec> {
        self.inputs.iter().find(|t| t.name == tensor)
    }

    /// Find a declared output tensor by name.
    #[must_use]
    pub fn output(&self, tensor: &str) -> Option<&TensorSpec> {
        self.outputs.iter().find(|t| t.name == tensor)
    }
}

/// Tensor name → buffer bindings passed to [`CompiledGraph::run`].
pub type BufferMap = HashMap<String, TensorBuffer>;

/// A compiled computation unit addressable by signature name.
pub trait CompiledGraph: Send + Sync {
    /// All signatures this graph exposes.
    fn signatures(&self) -> &[SignatureInfo];

    /// Execute one signature against the given buffer bindings.
    ///
    /// Blocks until the accelerator completes the subgraph. Every declared
    /// tensor name must be bound; CPU locks on the bound buffers must have
    /// been released before the call.
    ///
    /// # Errors
    /// Returns an error if the invocation fails.
    fn run(&self, signature: &str, inputs: &BufferMap, outputs: &BufferMap) -> Result<()>;

    /// Look up a signature by name.
    ///
    /// # Errors
    /// Returns `NotFound` if the graph does not expose the signature.
    fn signature(&self, name: &str) -> Result<&SignatureInfo> {
        self.signatures()
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::NotFound(format!("signature {name}")))
    }

    /// Allocate a fresh zero-filled buffer matching a declared input tensor.
    ///
    /// # Errors
    /// Returns `NotFound` if the signature or tensor is not declared.
    fn create_input_buffer(&self, signature: &str, tensor: &str) -> Result<TensorBuffer> {
        let spec = self.signature(signature)?.input(tensor).ok_or_else(|| {
            Error::NotFound(format!("input tensor {tensor} in signature {signature}"))
        })?;
        Ok(TensorBuffer::new(spec.dtype, &spec.dims))
    }

    /// Allocate a fresh zero-filled buffer matching a declared output tensor.
    ///
    /// # Errors
    /// Returns `NotFound` if the signature or tensor is not declared.
    fn create_output_buffer(&self, signature: &str, tensor: &str) -> Result<TensorBuffer> {
        let spec = self.signature(signature)?.output(tensor).ok_or_else(|| {
            Error::NotFound(format!("output tensor {tensor} in signature {signature}"))
        })?;
        Ok(TensorBuffer::new(spec.dtype, &spec.dims))
    }
}

/// Logical roles of the compiled graphs inside one model package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// The main LLM graph with the prefill and decode signatures.
    PrefillDecode,
    /// Auxiliary graph bundling rope, mask, and cache-update signatures.
    Auxiliary,
    /// The token embedder graph.
    Embedder,
}

/// Provider of compiled graphs by logical role.
pub trait ModelResources {
    /// Fetch the compiled graph filling the given role.
    ///
    /// # Errors
    /// Returns `NotFound` when the package does not bundle the graph.
    fn model(&self, kind: ModelKind) -> Result<Arc<dyn CompiledGraph>>;
}
