//! Signature and tensor naming contract
//!
//! The model package addresses its subgraphs by signature name: `prefill_<N>`
//! and `decode` on the LLM graph, `{prefill,decode}_{rope,mask,cache_update}`
//! on the auxiliary graph, and `{prefill,decode}_embedder` on the embedder
//! graph, where `<N>` is the supported prefill length. Tensor names are
//! shared between producers and consumers so that the executor can alias
//! their buffers.

use crate::graph::CompiledGraph;
use crate::work_groups::SortedPrefillSignatureMap;

pub const DECODE_LLM: &str = "decode";
pub const DECODE_EMBEDDER: &str = "decode_embedder";
pub const DECODE_ROPE: &str = "decode_rope";
pub const DECODE_MASK: &str = "decode_mask";
pub const DECODE_CACHE_UPDATE: &str = "decode_cache_update";

/// Embedder tensors (identical names for prefill and decode).
pub const EMBEDDER_INPUT_TOKENS: &str = "tokens";
pub const EMBEDDER_OUTPUT_EMBEDS: &str = "embeds";

/// Mask tensors (identical names for prefill and decode).
pub const MASK_INPUT_TIME_STEP: &str = "time_step";
pub const MASK_INPUT_TOKENS: &str = "input_tokens";
pub const MASK_OUTPUT_LOCAL: &str = "mask_local";
pub const MASK_OUTPUT_GLOBAL: &str = "mask_global";

/// Rope tensors (identical names for prefill and decode).
pub const ROPE_INPUT_POS: &str = "input_pos";
pub const ROPE_OUTPUTS: [&str; 4] = [
    "pos_emb_cos",
    "pos_emb_sin",
    "pos_emb_local_cos",
    "pos_emb_local_sin",
];

/// LLM tensors.
pub const LLM_INPUT_EMBEDS: &str = "input_embeds";
pub const LLM_OUTPUT_LOGITS: &str = "logits";

/// Cache-update tensors.
pub const CACHE_UPDATE_INPUT_POS: &str = "input_pos";

pub const KV_CACHE_K_PREFIX: &str = "kv_cache_k_";
pub const KV_CACHE_V_PREFIX: &str = "kv_cache_v_";
pub const KV_SLICE_K_PREFIX: &str = "kv_slice_k_";
pub const KV_SLICE_V_PREFIX: &str = "kv_slice_v_";

/// Whether a tensor name is part of the in-place KV cache.
#[must_use]
pub fn is_kv_cache_tensor(name: &str) -> bool {
    name.starts_with(KV_CACHE_K_PREFIX) || name.starts_with(KV_CACHE_V_PREFIX)
}

/// Whether a tensor name is a per-call KV slice.
#[must_use]
pub fn is_kv_slice_tensor(name: &str) -> bool {
    name.starts_with(KV_SLICE_K_PREFIX) || name.starts_with(KV_SLICE_V_PREFIX)
}

#[must_use]
pub fn prefill_llm(length: usize) -> String {
    format!("prefill_{length}")
}

#[must_use]
pub fn prefill_embedder(length: usize) -> String {
    format!("prefill_embedder_{length}")
}

#[must_use]
pub fn prefill_rope(length: usize) -> String {
    format!("prefill_rope_{length}")
}

#[must_use]
pub fn prefill_mask(length: usize) -> String {
    format!("prefill_mask_{length}")
}

#[must_use]
pub fn prefill_cache_update(length: usize) -> String {
    format!("prefill_cache_update_{length}")
}

/// Discover the prefill lengths an LLM graph supports.
///
/// Scans the graph's signature names for `prefill_<N>` and returns the
/// sorted length → signature-name map. Auxiliary names such as
/// `prefill_rope_<N>` do not parse as a length and are skipped.
#[must_use]
pub fn supported_prefill_lengths(graph: &dyn CompiledGraph) -> SortedPrefillSignatureMap {
    let mut lengths = SortedPrefillSignatureMap::new();
    for signature in graph.signatures() {
        if let Some(suffix) = signature.name.strip_prefix("prefill_") {
            if let Ok(length) = suffix.parse::<usize>() {
                lengths.insert(length, signature.name.clone());
            }
        }
    }
    lengths
}
