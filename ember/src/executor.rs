//! Multi-signature NPU execution orchestrator
//!
//! Coordinates five compiled subgraphs (token embedder, rotary position
//! encoding, attention-mask builder, the main LLM, and the KV-cache update
//! graph) by threading shared device buffers between them so that producer
//! outputs alias consumer inputs with no copies. Prefill ingests a prompt
//! in fixed-length chunks; decode emits one token per call.
//!
//! The executor is single-threaded cooperative: `prefill` and `decode` are
//! synchronous and must not be invoked concurrently on the same instance.

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::sync::Arc;
use std::time::Instant;

use crate::buffer::TensorBuffer;
use crate::graph::{BufferMap, CompiledGraph, ModelKind, ModelResources};
use crate::sampling::argmax_i16;
use crate::settings::ExecutorSettings;
use crate::signatures as sig;
use crate::work_groups::{optimized_prefill_work_groups, SortedPrefillSignatureMap};
use crate::{Error, Result, TokenId};

/// Inputs to one executor call: an optional `[1, N]` int32 tensor of token
/// ids. Prefill requires it; decode uses it to override the carried-over
/// token.
#[derive(Debug, Default)]
pub struct ExecutorInputs {
    text_token_ids: Option<TensorBuffer>,
}

impl ExecutorInputs {
    #[must_use]
    pub fn new(text_token_ids: TensorBuffer) -> Self {
        Self {
            text_token_ids: Some(text_token_ids),
        }
    }

    #[must_use]
    pub fn text_token_ids(&self) -> Option<&TensorBuffer> {
        self.text_token_ids.as_ref()
    }
}

/// Accumulated per-phase latencies in microseconds, plus token counts.
#[derive(Debug, Default, Clone, Copy)]
pub struct LatencyStats {
    pub prefill_e2e_latency_us: u64,
    pub prefill_prepare_input_latency_us: u64,
    pub prefill_embedder_inference_latency_us: u64,
    pub prefill_rope_inference_latency_us: u64,
    pub prefill_mask_inference_latency_us: u64,
    pub prefill_llm_inference_latency_us: u64,
    pub prefill_cache_update_inference_latency_us: u64,
    pub prefill_num_tokens: u64,
    pub decode_e2e_latency_us: u64,
    pub decode_prepare_input_latency_us: u64,
    pub decode_embedder_inference_latency_us: u64,
    pub decode_rope_inference_latency_us: u64,
    pub decode_mask_inference_latency_us: u64,
    pub decode_llm_inference_latency_us: u64,
    pub decode_cache_update_inference_latency_us: u64,
    pub decode_sampling_latency_us: u64,
    pub decode_num_tokens: u64,
}

/// Prefill and decode buffer bindings for one subgraph.
#[derive(Debug, Default)]
struct InferenceContext {
    prefill_inputs: BufferMap,
    prefill_outputs: BufferMap,
    decode_inputs: BufferMap,
    decode_outputs: BufferMap,
}

/// The NPU compiled-model executor.
///
/// Owns the shared buffer graph, the positional state (`current_step`), and
/// the one-token carry between phases. Buffers are allocated at
/// construction, aliased into the five signature contexts, and pinned for
/// the executor's lifetime.
pub struct NpuExecutor {
    settings: ExecutorSettings,
    llm_graph: Arc<dyn CompiledGraph>,
    aux_graph: Arc<dyn CompiledGraph>,
    embedder_graph: Arc<dyn CompiledGraph>,
    llm_context: InferenceContext,
    embedder_context: InferenceContext,
    mask_context: InferenceContext,
    rope_context: InferenceContext,
    cache_update_context: InferenceContext,
    prefill_signatures: SortedPrefillSignatureMap,
    prefill_llm_signature: String,
    prefill_embedder_signature: String,
    prefill_rope_signature: String,
    prefill_mask_signature: String,
    prefill_cache_update_signature: String,
    max_num_tokens: usize,
    current_step: usize,
    next_input_token_id: Option<TokenId>,
    latency_stats: LatencyStats,
}

impl std::fmt::Debug for NpuExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpuExecutor")
            .field("settings", &self.settings)
            .field("max_num_tokens", &self.max_num_tokens)
            .field("current_step", &self.current_step)
            .field("next_input_token_id", &self.next_input_token_id)
            .finish_non_exhaustive()
    }
}

impl NpuExecutor {
    /// Build an executor over a model package.
    ///
    /// Allocates the shared buffer graph, wires the five signature
    /// contexts, and runs a warmup pass over every subgraph in both
    /// phases.
    ///
    /// # Errors
    /// Returns `NotFound` if the package is missing a graph,
    /// `InvalidArgument` for models without a prefill signature or when
    /// `max_num_tokens` is 0 and cannot be inferred, `Unimplemented` for
    /// models declaring several prefill lengths, and `Internal` if any
    /// warmup run fails.
    pub fn create(settings: ExecutorSettings, resources: &dyn ModelResources) -> Result<Self> {
        let llm_graph = resources.model(ModelKind::PrefillDecode)?;
        let aux_graph = resources.model(ModelKind::Auxiliary)?;
        let embedder_graph = resources.model(ModelKind::Embedder)?;

        let prefill_signatures = sig::supported_prefill_lengths(llm_graph.as_ref());
        if prefill_signatures.is_empty() {
            return Err(Error::InvalidArgument(
                "model declares no prefill signatures".into(),
            ));
        }
        if prefill_signatures.len() > 1 {
            return Err(Error::Unimplemented(
                "models with multiple prefill lengths are not supported".into(),
            ));
        }
        let (&prefill_length, prefill_llm_signature) = prefill_signatures
            .iter()
            .next()
            .ok_or_else(|| Error::Internal("prefill signature map is empty".into()))?;
        let prefill_llm_signature = prefill_llm_signature.clone();

        // Allocate every LLM buffer that the accelerator touches first, so
        // the embedder, mask, and rope contexts can duplicate them into
        // their output maps. KV cache tensors are split out because they
        // are shared with the cache-update graph as well.
        let prefill_info = llm_graph.signature(&prefill_llm_signature)?;
        let mut llm_prefill_inputs = BufferMap::new();
        let mut kv_cache_buffers = BufferMap::new();
        for spec in &prefill_info.inputs {
            let buffer = llm_graph.create_input_buffer(&prefill_llm_signature, &spec.name)?;
            if sig::is_kv_cache_tensor(&spec.name) {
                kv_cache_buffers.insert(spec.name.clone(), buffer);
            } else {
                llm_prefill_inputs.insert(spec.name.clone(), buffer);
            }
        }
        let max_num_tokens = match settings.max_num_tokens() {
            0 => infer_max_num_tokens(&kv_cache_buffers)?,
            n => n as usize,
        };

        let decode_info = llm_graph.signature(sig::DECODE_LLM)?;
        let mut llm_decode_inputs = BufferMap::new();
        for spec in &decode_info.inputs {
            // KV cache tensors are wired into the decode context separately.
            if sig::is_kv_cache_tensor(&spec.name) {
                continue;
            }
            llm_decode_inputs.insert(
                spec.name.clone(),
                llm_graph.create_input_buffer(sig::DECODE_LLM, &spec.name)?,
            );
        }

        let mut prefill_slice_buffers = BufferMap::new();
        for spec in &prefill_info.outputs {
            if sig::is_kv_slice_tensor(&spec.name) {
                prefill_slice_buffers.insert(
                    spec.name.clone(),
                    llm_graph.create_output_buffer(&prefill_llm_signature, &spec.name)?,
                );
            }
        }
        let mut decode_slice_buffers = BufferMap::new();
        for spec in &decode_info.outputs {
            if sig::is_kv_slice_tensor(&spec.name) {
                decode_slice_buffers.insert(
                    spec.name.clone(),
                    llm_graph.create_output_buffer(sig::DECODE_LLM, &spec.name)?,
                );
            }
        }

        let llm_context = create_llm_context(
            llm_graph.as_ref(),
            &kv_cache_buffers,
            &prefill_slice_buffers,
            &decode_slice_buffers,
            &llm_prefill_inputs,
            &llm_decode_inputs,
        )?;

        let mask_context = create_mask_context(
            aux_graph.as_ref(),
            prefill_length,
            &llm_prefill_inputs,
            &llm_decode_inputs,
        )?;

        // The mask's token buffers double as the embedder's inputs: both
        // subgraphs consume the same staged ids.
        let prefill_input_tokens =
            require(&mask_context.prefill_inputs, sig::MASK_INPUT_TOKENS)?.duplicate();
        let decode_input_tokens =
            require(&mask_context.decode_inputs, sig::MASK_INPUT_TOKENS)?.duplicate();
        let embedder_context = create_embedder_context(
            prefill_input_tokens,
            decode_input_tokens,
            &llm_prefill_inputs,
            &llm_decode_inputs,
        )?;

        let rope_context = create_rope_context(
            aux_graph.as_ref(),
            prefill_length,
            &llm_prefill_inputs,
            &llm_decode_inputs,
        )?;

        // The rope's position buffers feed the cache-update graph as well.
        let prefill_input_pos =
            require(&rope_context.prefill_inputs, sig::ROPE_INPUT_POS)?.duplicate();
        let decode_input_pos =
            require(&rope_context.decode_inputs, sig::ROPE_INPUT_POS)?.duplicate();
        let cache_update_context = create_cache_update_context(
            &kv_cache_buffers,
            &prefill_slice_buffers,
            &decode_slice_buffers,
            prefill_input_pos,
            decode_input_pos,
        );

        let executor = Self {
            settings,
            llm_graph,
            aux_graph,
            embedder_graph,
            llm_context,
            embedder_context,
            mask_context,
            rope_context,
            cache_update_context,
            prefill_signatures,
            prefill_llm_signature,
            prefill_embedder_signature: sig::prefill_embedder(prefill_length),
            prefill_rope_signature: sig::prefill_rope(prefill_length),
            prefill_mask_signature: sig::prefill_mask(prefill_length),
            prefill_cache_update_signature: sig::prefill_cache_update(prefill_length),
            max_num_tokens,
            current_step: 0,
            next_input_token_id: None,
            latency_stats: LatencyStats::default(),
        };
        executor.warmup()?;
        Ok(executor)
    }

    /// Ingest a prompt into the KV cache.
    ///
    /// Processes all but the last token of `inputs`; the last one is held
    /// back in the carry slot for the next prefill or decode call. A carry
    /// pending from an earlier call is consumed first.
    ///
    /// A subgraph failure is fatal to this call and leaves `current_step`
    /// advanced by whatever was staged before the failure.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for missing, empty, or non-batch-1 token
    /// ids and `Internal` for planning or subgraph failures.
    pub fn prefill(&mut self, inputs: &ExecutorInputs) -> Result<()> {
        let start = Instant::now();
        let ids_buffer = inputs
            .text_token_ids()
            .ok_or_else(|| Error::InvalidArgument("prefill requires input token ids".into()))?;
        let dims = ids_buffer.dims();
        if dims.len() != 2 || dims[0] != 1 {
            return Err(Error::InvalidArgument(
                "prefill token ids must have shape [1, num_tokens]".into(),
            ));
        }
        let ids = ids_buffer.copy_i32()?;
        if ids.is_empty() {
            return Err(Error::InvalidArgument(
                "prefill token ids must be non-empty".into(),
            ));
        }

        // The last token is reserved for the carry slot; a pending carry
        // adds one slot to materialize.
        let pending = (ids.len() - 1) + usize::from(self.next_input_token_id.is_some());
        let work_groups = optimized_prefill_work_groups(&self.prefill_signatures, pending)?;

        let mut cursor = 0usize;
        for (llm_signature, chunk_length) in &work_groups {
            self.prefill_chunk(llm_signature, *chunk_length, &ids, &mut cursor)?;
            self.latency_stats.prefill_num_tokens += *chunk_length as u64;
        }
        if cursor != ids.len() - 1 {
            return Err(Error::Internal(
                "work groups not covering the entire prefill input".into(),
            ));
        }
        self.next_input_token_id = Some(ids[ids.len() - 1]);

        self.latency_stats.prefill_e2e_latency_us += micros_since(start);
        Ok(())
    }

    /// Run one decode step and write the greedily sampled token id into
    /// `output_tokens`.
    ///
    /// The sampled id becomes the carry for the next step.
    ///
    /// # Errors
    /// Returns `InvalidArgument` when no token id is available to decode
    /// and `Internal` for subgraph failures.
    pub fn decode(&mut self, output_tokens: &TensorBuffer) -> Result<()> {
        let start = Instant::now();
        self.decode_internal(&ExecutorInputs::default())?;

        let start_sample = Instant::now();
        let sampled = {
            let logits_buffer = require(&self.llm_context.decode_outputs, sig::LLM_OUTPUT_LOGITS)?;
            let lock = logits_buffer.lock();
            let logits = lock.as_i16()?;
            argmax_i16(logits)
                .ok_or_else(|| Error::Internal("decode produced an empty logits buffer".into()))?
        };
        self.latency_stats.decode_sampling_latency_us += micros_since(start_sample);

        let sampled = sampled as TokenId;
        self.next_input_token_id = Some(sampled);
        output_tokens.write_i32(&[sampled])?;

        self.latency_stats.decode_e2e_latency_us += micros_since(start);
        self.latency_stats.decode_num_tokens += 1;
        Ok(())
    }

    /// Run one decode step and hand back the raw logits for external
    /// sampling.
    ///
    /// The returned buffer aliases the decode context's logits output; the
    /// caller must feed the token it samples into the next `decode` /
    /// `decode_logits` call via [`ExecutorInputs`].
    ///
    /// # Errors
    /// Returns `InvalidArgument` when no token id is available to decode
    /// and `Internal` for subgraph failures.
    pub fn decode_logits(&mut self, inputs: &ExecutorInputs) -> Result<TensorBuffer> {
        self.decode_internal(inputs)?;
        Ok(require(&self.llm_context.decode_outputs, sig::LLM_OUTPUT_LOGITS)?.duplicate())
    }

    /// Number of tokens materialized into the KV cache so far.
    #[must_use]
    pub fn current_step(&self) -> usize {
        self.current_step
    }

    /// Token id carried over from the previous call, if any.
    #[must_use]
    pub fn next_input_token_id(&self) -> Option<TokenId> {
        self.next_input_token_id
    }

    /// KV cache capacity in tokens.
    #[must_use]
    pub fn max_num_tokens(&self) -> usize {
        self.max_num_tokens
    }

    /// Vocabulary size, read from the last dimension of the decode logits.
    ///
    /// # Errors
    /// Returns `Internal` if the logits buffer is missing or unshaped.
    pub fn vocab_size(&self) -> Result<usize> {
        let logits = require(&self.llm_context.decode_outputs, sig::LLM_OUTPUT_LOGITS)?;
        logits
            .dims()
            .last()
            .copied()
            .ok_or_else(|| Error::Internal("logits buffer has no dimensions".into()))
    }

    #[must_use]
    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Latencies accumulated so far.
    #[must_use]
    pub fn latency_stats(&self) -> LatencyStats {
        self.latency_stats
    }

    /// Invoke every subgraph once per phase so that construction fails
    /// eagerly on a broken package.
    fn warmup(&self) -> Result<()> {
        let runs: [(&dyn CompiledGraph, &str, &BufferMap, &BufferMap, &str); 10] = [
            (
                self.embedder_graph.as_ref(),
                &self.prefill_embedder_signature,
                &self.embedder_context.prefill_inputs,
                &self.embedder_context.prefill_outputs,
                "embedder (prefill)",
            ),
            (
                self.embedder_graph.as_ref(),
                sig::DECODE_EMBEDDER,
                &self.embedder_context.decode_inputs,
                &self.embedder_context.decode_outputs,
                "embedder (decode)",
            ),
            (
                self.aux_graph.as_ref(),
                &self.prefill_rope_signature,
                &self.rope_context.prefill_inputs,
                &self.rope_context.prefill_outputs,
                "rope (prefill)",
            ),
            (
                self.aux_graph.as_ref(),
                sig::DECODE_ROPE,
                &self.rope_context.decode_inputs,
                &self.rope_context.decode_outputs,
                "rope (decode)",
            ),
            (
                self.aux_graph.as_ref(),
                &self.prefill_mask_signature,
                &self.mask_context.prefill_inputs,
                &self.mask_context.prefill_outputs,
                "mask (prefill)",
            ),
            (
                self.aux_graph.as_ref(),
                sig::DECODE_MASK,
                &self.mask_context.decode_inputs,
                &self.mask_context.decode_outputs,
                "mask (decode)",
            ),
            (
                self.llm_graph.as_ref(),
                &self.prefill_llm_signature,
                &self.llm_context.prefill_inputs,
                &self.llm_context.prefill_outputs,
                "llm (prefill)",
            ),
            (
                self.llm_graph.as_ref(),
                sig::DECODE_LLM,
                &self.llm_context.decode_inputs,
                &self.llm_context.decode_outputs,
                "llm (decode)",
            ),
            (
                self.aux_graph.as_ref(),
                &self.prefill_cache_update_signature,
                &self.cache_update_context.prefill_inputs,
                &self.cache_update_context.prefill_outputs,
                "cache update (prefill)",
            ),
            (
                self.aux_graph.as_ref(),
                sig::DECODE_CACHE_UPDATE,
                &self.cache_update_context.decode_inputs,
                &self.cache_update_context.decode_outputs,
                "cache update (decode)",
            ),
        ];
        for (graph, signature, inputs, outputs, what) in runs {
            graph.run(signature, inputs, outputs).map_err(|e| {
                Error::Internal(format!("inference warmup run for {what} failed: {e}"))
            })?;
        }
        Ok(())
    }

    /// Stage and run one prefill work group.
    ///
    /// Fills `chunk_length` input slots: a pending carry token first (which
    /// does not advance the read cursor), then ids from the cursor onward.
    fn prefill_chunk(
        &mut self,
        llm_signature: &str,
        chunk_length: usize,
        ids: &[TokenId],
        cursor: &mut usize,
    ) -> Result<()> {
        let start_prepare = Instant::now();
        {
            let tokens_buffer =
                require(&self.embedder_context.prefill_inputs, sig::EMBEDDER_INPUT_TOKENS)?;
            let pos_buffer = require(&self.rope_context.prefill_inputs, sig::ROPE_INPUT_POS)?;
            let step_buffer =
                require(&self.mask_context.prefill_inputs, sig::MASK_INPUT_TIME_STEP)?;

            let mut tokens_lock = tokens_buffer.lock();
            let mut pos_lock = pos_buffer.lock();
            let mut step_lock = step_buffer.lock();
            tokens_lock.fill_zero();
            pos_lock.fill_zero();
            step_lock.fill_zero();

            let tokens = tokens_lock.as_i32_mut()?;
            let pos = pos_lock.as_i32_mut()?;
            let time_step = step_lock.as_i32_mut()?;
            if tokens.len() < chunk_length || pos.len() < chunk_length {
                return Err(Error::Internal(format!(
                    "prefill staging buffers are smaller than work group length {chunk_length}"
                )));
            }
            write_first(time_step, self.current_step as i32, "time_step")?;

            for input_idx in 0..chunk_length {
                if let Some(id) = self.next_input_token_id.take() {
                    // Carried token; the read cursor does not advance.
                    tokens[input_idx] = id;
                } else {
                    let &id = ids.get(*cursor).ok_or_else(|| {
                        Error::Internal("work groups overran the prefill input".into())
                    })?;
                    tokens[input_idx] = id;
                    *cursor += 1;
                }
                pos[input_idx] = self.current_step as i32;
                self.current_step += 1;
            }
        }
        self.latency_stats.prefill_prepare_input_latency_us += micros_since(start_prepare);

        run_graph(
            self.embedder_graph.as_ref(),
            &self.prefill_embedder_signature,
            &self.embedder_context.prefill_inputs,
            &self.embedder_context.prefill_outputs,
            "embedder",
            &mut self.latency_stats.prefill_embedder_inference_latency_us,
        )?;
        run_graph(
            self.aux_graph.as_ref(),
            &self.prefill_rope_signature,
            &self.rope_context.prefill_inputs,
            &self.rope_context.prefill_outputs,
            "rope",
            &mut self.latency_stats.prefill_rope_inference_latency_us,
        )?;
        run_graph(
            self.aux_graph.as_ref(),
            &self.prefill_mask_signature,
            &self.mask_context.prefill_inputs,
            &self.mask_context.prefill_outputs,
            "mask",
            &mut self.latency_stats.prefill_mask_inference_latency_us,
        )?;
        run_graph(
            self.llm_graph.as_ref(),
            llm_signature,
            &self.llm_context.prefill_inputs,
            &self.llm_context.prefill_outputs,
            "llm",
            &mut self.latency_stats.prefill_llm_inference_latency_us,
        )?;
        run_graph(
            self.aux_graph.as_ref(),
            &self.prefill_cache_update_signature,
            &self.cache_update_context.prefill_inputs,
            &self.cache_update_context.prefill_outputs,
            "cache update",
            &mut self.latency_stats.prefill_cache_update_inference_latency_us,
        )?;
        Ok(())
    }

    /// Stage the decode input token and run the five decode subgraphs.
    fn decode_internal(&mut self, inputs: &ExecutorInputs) -> Result<()> {
        let start_prepare = Instant::now();
        let mut id = self.next_input_token_id;
        if let Some(ids_buffer) = inputs.text_token_ids() {
            if ids_buffer.num_elements() != 0 {
                // An explicit input overrides the carry. Batch size 1, one
                // token only.
                if ids_buffer.num_elements() != 1 {
                    return Err(Error::InvalidArgument(
                        "decode accepts exactly one input token".into(),
                    ));
                }
                id = ids_buffer.copy_i32()?.first().copied();
            }
        }
        let Some(id) = id else {
            return Err(Error::InvalidArgument(
                "no id available to be decoded".into(),
            ));
        };
        // The carry is consumed regardless of which source supplied the id.
        self.next_input_token_id = None;

        {
            let tokens_buffer =
                require(&self.embedder_context.decode_inputs, sig::EMBEDDER_INPUT_TOKENS)?;
            let pos_buffer = require(&self.rope_context.decode_inputs, sig::ROPE_INPUT_POS)?;
            let step_buffer =
                require(&self.mask_context.decode_inputs, sig::MASK_INPUT_TIME_STEP)?;

            let mut tokens_lock = tokens_buffer.lock();
            let mut pos_lock = pos_buffer.lock();
            let mut step_lock = step_buffer.lock();
            write_first(tokens_lock.as_i32_mut()?, id, "decode tokens")?;
            write_first(pos_lock.as_i32_mut()?, self.current_step as i32, "input_pos")?;
            write_first(
                step_lock.as_i32_mut()?,
                self.current_step as i32,
                "time_step",
            )?;
        }
        self.latency_stats.decode_prepare_input_latency_us += micros_since(start_prepare);

        run_graph(
            self.embedder_graph.as_ref(),
            sig::DECODE_EMBEDDER,
            &self.embedder_context.decode_inputs,
            &self.embedder_context.decode_outputs,
            "embedder",
            &mut self.latency_stats.decode_embedder_inference_latency_us,
        )?;
        run_graph(
            self.aux_graph.as_ref(),
            sig::DECODE_ROPE,
            &self.rope_context.decode_inputs,
            &self.rope_context.decode_outputs,
            "rope",
            &mut self.latency_stats.decode_rope_inference_latency_us,
        )?;
        run_graph(
            self.aux_graph.as_ref(),
            sig::DECODE_MASK,
            &self.mask_context.decode_inputs,
            &self.mask_context.decode_outputs,
            "mask",
            &mut self.latency_stats.decode_mask_inference_latency_us,
        )?;
        run_graph(
            self.llm_graph.as_ref(),
            sig::DECODE_LLM,
            &self.llm_context.decode_inputs,
            &self.llm_context.decode_outputs,
            "llm",
            &mut self.latency_stats.decode_llm_inference_latency_us,
        )?;
        run_graph(
            self.aux_graph.as_ref(),
            sig::DECODE_CACHE_UPDATE,
            &self.cache_update_context.decode_inputs,
            &self.cache_update_context.decode_outputs,
            "cache update",
            &mut self.latency_stats.decode_cache_update_inference_latency_us,
        )?;

        self.current_step += 1;
        Ok(())
    }
}

/// Wire the LLM context from the pre-allocated shared buffers.
///
/// Decode-side KV cache tensors alias the shared prefill buffers unless the
/// decode signature declares a different element type; those get a
/// decode-local placeholder that the cache-update graph reconciles.
fn create_llm_context(
    llm_graph: &dyn CompiledGraph,
    kv_cache_buffers: &BufferMap,
    prefill_slice_buffers: &BufferMap,
    decode_slice_buffers: &BufferMap,
    llm_prefill_inputs: &BufferMap,
    llm_decode_inputs: &BufferMap,
) -> Result<InferenceContext> {
    let mut prefill_inputs = duplicate_all(llm_prefill_inputs);
    prefill_inputs.extend(duplicate_all(kv_cache_buffers));
    let prefill_outputs = duplicate_all(prefill_slice_buffers);

    let mut decode_inputs = duplicate_all(llm_decode_inputs);
    let decode_info = llm_graph.signature(sig::DECODE_LLM)?;
    for (name, buffer) in kv_cache_buffers {
        let declared = decode_info.input(name).ok_or_else(|| {
            Error::Internal(format!("decode signature is missing KV cache tensor {name}"))
        })?;
        if declared.dtype == buffer.dtype() {
            decode_inputs.insert(name.clone(), buffer.duplicate());
        } else {
            decode_inputs.insert(name.clone(), llm_graph.create_input_buffer(sig::DECODE_LLM, name)?);
        }
    }

    let mut decode_outputs = duplicate_all(decode_slice_buffers);
    decode_outputs.insert(
        sig::LLM_OUTPUT_LOGITS.to_string(),
        llm_graph.create_output_buffer(sig::DECODE_LLM, sig::LLM_OUTPUT_LOGITS)?,
    );

    Ok(InferenceContext {
        prefill_inputs,
        prefill_outputs,
        decode_inputs,
        decode_outputs,
    })
}

/// Wire the mask context: fresh staging inputs, outputs aliasing the LLM's
/// mask inputs.
fn create_mask_context(
    aux_graph: &dyn CompiledGraph,
    prefill_length: usize,
    llm_prefill_inputs: &BufferMap,
    llm_decode_inputs: &BufferMap,
) -> Result<InferenceContext> {
    let prefill_mask = sig::prefill_mask(prefill_length);
    let mut prefill_inputs = BufferMap::new();
    for tensor in [sig::MASK_INPUT_TIME_STEP, sig::MASK_INPUT_TOKENS] {
        prefill_inputs.insert(
            tensor.to_string(),
            aux_graph.create_input_buffer(&prefill_mask, tensor)?,
        );
    }
    let mut prefill_outputs = BufferMap::new();
    for tensor in [sig::MASK_OUTPUT_LOCAL, sig::MASK_OUTPUT_GLOBAL] {
        prefill_outputs.insert(
            tensor.to_string(),
            require(llm_prefill_inputs, tensor)?.duplicate(),
        );
    }

    let mut decode_inputs = BufferMap::new();
    for tensor in [sig::MASK_INPUT_TIME_STEP, sig::MASK_INPUT_TOKENS] {
        decode_inputs.insert(
            tensor.to_string(),
            aux_graph.create_input_buffer(sig::DECODE_MASK, tensor)?,
        );
    }
    let mut decode_outputs = BufferMap::new();
    for tensor in [sig::MASK_OUTPUT_LOCAL, sig::MASK_OUTPUT_GLOBAL] {
        decode_outputs.insert(
            tensor.to_string(),
            require(llm_decode_inputs, tensor)?.duplicate(),
        );
    }

    Ok(InferenceContext {
        prefill_inputs,
        prefill_outputs,
        decode_inputs,
        decode_outputs,
    })
}

/// Wire the rope context: fresh position inputs, outputs aliasing the LLM's
/// positional-embedding inputs.
fn create_rope_context(
    aux_graph: &dyn CompiledGraph,
    prefill_length: usize,
    llm_prefill_inputs: &BufferMap,
    llm_decode_inputs: &BufferMap,
) -> Result<InferenceContext> {
    let mut prefill_inputs = BufferMap::new();
    prefill_inputs.insert(
        sig::ROPE_INPUT_POS.to_string(),
        aux_graph.create_input_buffer(&sig::prefill_rope(prefill_length), sig::ROPE_INPUT_POS)?,
    );
    let mut prefill_outputs = BufferMap::new();
    for tensor in sig::ROPE_OUTPUTS {
        prefill_outputs.insert(
            tensor.to_string(),
            require(llm_prefill_inputs, tensor)?.duplicate(),
        );
    }

    let mut decode_inputs = BufferMap::new();
    decode_inputs.insert(
        sig::ROPE_INPUT_POS.to_string(),
        aux_graph.create_input_buffer(sig::DECODE_ROPE, sig::ROPE_INPUT_POS)?,
    );
    let mut decode_outputs = BufferMap::new();
    for tensor in sig::ROPE_OUTPUTS {
        decode_outputs.insert(
            tensor.to_string(),
            require(llm_decode_inputs, tensor)?.duplicate(),
        );
    }

    Ok(InferenceContext {
        prefill_inputs,
        prefill_outputs,
        decode_inputs,
        decode_outputs,
    })
}

/// Wire the embedder context: token inputs shared with the mask, embedding
/// outputs aliasing the LLM's `input_embeds`.
fn create_embedder_context(
    prefill_input_tokens: TensorBuffer,
    decode_input_tokens: TensorBuffer,
    llm_prefill_inputs: &BufferMap,
    llm_decode_inputs: &BufferMap,
) -> Result<InferenceContext> {
    let mut prefill_inputs = BufferMap::new();
    prefill_inputs.insert(sig::EMBEDDER_INPUT_TOKENS.to_string(), prefill_input_tokens);
    let mut prefill_outputs = BufferMap::new();
    prefill_outputs.insert(
        sig::EMBEDDER_OUTPUT_EMBEDS.to_string(),
        require(llm_prefill_inputs, sig::LLM_INPUT_EMBEDS)?.duplicate(),
    );

    let mut decode_inputs = BufferMap::new();
    decode_inputs.insert(sig::EMBEDDER_INPUT_TOKENS.to_string(), decode_input_tokens);
    let mut decode_outputs = BufferMap::new();
    decode_outputs.insert(
        sig::EMBEDDER_OUTPUT_EMBEDS.to_string(),
        require(llm_decode_inputs, sig::LLM_INPUT_EMBEDS)?.duplicate(),
    );

    Ok(InferenceContext {
        prefill_inputs,
        prefill_outputs,
        decode_inputs,
        decode_outputs,
    })
}

/// Wire the cache-update context: KV caches and slices in, the same KV
/// cache tensors out (updated in place).
fn create_cache_update_context(
    kv_cache_buffers: &BufferMap,
    prefill_slice_buffers: &BufferMap,
    decode_slice_buffers: &BufferMap,
    prefill_input_pos: TensorBuffer,
    decode_input_pos: TensorBuffer,
) -> InferenceContext {
    let mut prefill_inputs = duplicate_all(kv_cache_buffers);
    prefill_inputs.extend(duplicate_all(prefill_slice_buffers));
    prefill_inputs.insert(sig::CACHE_UPDATE_INPUT_POS.to_string(), prefill_input_pos);
    let prefill_outputs = duplicate_all(kv_cache_buffers);

    let mut decode_inputs = duplicate_all(kv_cache_buffers);
    decode_inputs.extend(duplicate_all(decode_slice_buffers));
    decode_inputs.insert(sig::CACHE_UPDATE_INPUT_POS.to_string(), decode_input_pos);
    let decode_outputs = duplicate_all(kv_cache_buffers);

    InferenceContext {
        prefill_inputs,
        prefill_outputs,
        decode_inputs,
        decode_outputs,
    }
}

/// Infer the KV cache capacity from the cache tensor shapes.
fn infer_max_num_tokens(kv_cache_buffers: &BufferMap) -> Result<usize> {
    let mut names: Vec<&String> = kv_cache_buffers.keys().collect();
    names.sort();
    for name in names {
        if name.starts_with(sig::KV_CACHE_K_PREFIX) {
            if let Some(&capacity) = kv_cache_buffers[name].dims().get(1) {
                return Ok(capacity);
            }
        }
    }
    Err(Error::InvalidArgument(
        "max_num_tokens is 0 and cannot be inferred from the model assets".into(),
    ))
}

fn duplicate_all(buffers: &BufferMap) -> BufferMap {
    buffers
        .iter()
        .map(|(name, buffer)| (name.clone(), buffer.duplicate()))
        .collect()
}

fn require<'a>(buffers: &'a BufferMap, name: &str) -> Result<&'a TensorBuffer> {
    buffers
        .get(name)
        .ok_or_else(|| Error::Internal(format!("missing buffer {name}")))
}

fn write_first(slice: &mut [i32], value: i32, what: &str) -> Result<()> {
    let slot = slice
        .first_mut()
        .ok_or_else(|| Error::Internal(format!("{what} buffer is empty")))?;
    *slot = value;
    Ok(())
}

fn run_graph(
    graph: &dyn CompiledGraph,
    signature: &str,
    inputs: &BufferMap,
    outputs: &BufferMap,
    what: &str,
    latency_us: &mut u64,
) -> Result<()> {
    let start = Instant::now();
    let result = graph.run(signature, inputs, outputs);
    *latency_us += micros_since(start);
    result.map_err(|e| Error::Internal(format!("failed to run {what} model: {e}")))
}

fn micros_since(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}
