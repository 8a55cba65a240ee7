//! Deterministic fake NPU package for executor tests.
//!
//! Five tiny "compiled" subgraphs mimic the real package's dataflow: the
//! embedder copies token ids into the embedding buffer, the LLM turns them
//! into per-layer KV slice markers and next-token logits, and the cache
//! update scatters the slices into the KV cache at the staged positions.
//! Every run is appended to a shared log so tests can assert ordering, and
//! the cache-update graph records duplicates of the KV cache buffers so
//! tests can inspect what was materialized.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use ember::graph::{BufferMap, CompiledGraph, ModelKind, ModelResources, SignatureInfo, TensorSpec};
use ember::{DType, Error, Result, TensorBuffer};

pub const PREFILL_LEN: usize = 4;
pub const MAX_TOKENS: usize = 16;
pub const VOCAB: usize = 8;
pub const EMBED: usize = 2;
pub const LAYERS: usize = 2;

/// Marker value the fake LLM emits for `token` at layer `layer`; zero slots
/// (padding) stay zero so the cache update skips them.
pub fn k_marker(token: i32, layer: usize) -> f32 {
    if token == 0 {
        0.0
    } else {
        (token + 1000 * (layer as i32 + 1)) as f32
    }
}

pub fn v_marker(token: i32, layer: usize) -> f32 {
    -k_marker(token, layer)
}

#[derive(Default)]
pub struct Probe {
    pub run_log: Vec<String>,
    pub mask_time_steps: Vec<i32>,
    /// Duplicates of the shared KV cache buffers, captured at the first
    /// cache-update run.
    pub kv_cache: BufferMap,
    /// Duplicates of the KV cache inputs the LLM decode signature sees.
    pub decode_llm_kv_inputs: BufferMap,
}

type SharedProbe = Arc<Mutex<Probe>>;

fn get<'a>(buffers: &'a BufferMap, name: &str) -> &'a TensorBuffer {
    buffers
        .get(name)
        .unwrap_or_else(|| panic!("buffer {name} not bound"))
}

// ─── LLM graph ───────────────────────────────────────────────────────────────

struct FakeLlmGraph {
    signatures: Vec<SignatureInfo>,
    probe: SharedProbe,
    fail_decode: AtomicBool,
}

impl FakeLlmGraph {
    fn new(probe: SharedProbe) -> Self {
        let pos_emb = |seq: usize| {
            [
                "pos_emb_cos",
                "pos_emb_sin",
                "pos_emb_local_cos",
                "pos_emb_local_sin",
            ]
            .map(|name| TensorSpec::new(name, DType::F32, &[1, seq, EMBED]))
        };

        let mut prefill_inputs = vec![TensorSpec::new(
            "input_embeds",
            DType::F32,
            &[1, PREFILL_LEN, EMBED],
        )];
        prefill_inputs.extend(pos_emb(PREFILL_LEN));
        prefill_inputs.push(TensorSpec::new(
            "mask_local",
            DType::F32,
            &[1, 1, PREFILL_LEN, MAX_TOKENS],
        ));
        prefill_inputs.push(TensorSpec::new(
            "mask_global",
            DType::F32,
            &[1, 1, PREFILL_LEN, MAX_TOKENS],
        ));
        let mut prefill_outputs = Vec::new();
        for layer in 0..LAYERS {
            prefill_inputs.push(TensorSpec::new(
                format!("kv_cache_k_{layer}"),
                DType::F32,
                &[1, MAX_TOKENS],
            ));
            prefill_inputs.push(TensorSpec::new(
                format!("kv_cache_v_{layer}"),
                DType::F32,
                &[1, MAX_TOKENS],
            ));
            prefill_outputs.push(TensorSpec::new(
                format!("kv_slice_k_{layer}"),
                DType::F32,
                &[1, PREFILL_LEN],
            ));
            prefill_outputs.push(TensorSpec::new(
                format!("kv_slice_v_{layer}"),
                DType::F32,
                &[1, PREFILL_LEN],
            ));
        }

        let mut decode_inputs = vec![TensorSpec::new("input_embeds", DType::F32, &[1, 1, EMBED])];
        decode_inputs.extend(pos_emb(1));
        decode_inputs.push(TensorSpec::new(
            "mask_local",
            DType::F32,
            &[1, 1, 1, MAX_TOKENS],
        ));
        decode_inputs.push(TensorSpec::new(
            "mask_global",
            DType::F32,
            &[1, 1, 1, MAX_TOKENS],
        ));
        let mut decode_outputs = Vec::new();
        for layer in 0..LAYERS {
            // The last layer's cache tensors are int16 in the decode
            // signature, so no aliasing with the float32 prefill buffers is
            // possible there.
            let cache_dtype = if layer == LAYERS - 1 {
                DType::I16
            } else {
                DType::F32
            };
            decode_inputs.push(TensorSpec::new(
                format!("kv_cache_k_{layer}"),
                cache_dtype,
                &[1, MAX_TOKENS],
            ));
            decode_inputs.push(TensorSpec::new(
                format!("kv_cache_v_{layer}"),
                cache_dtype,
                &[1, MAX_TOKENS],
            ));
            decode_outputs.push(TensorSpec::new(
                format!("kv_slice_k_{layer}"),
                DType::F32,
                &[1, 1],
            ));
            decode_outputs.push(TensorSpec::new(
                format!("kv_slice_v_{layer}"),
                DType::F32,
                &[1, 1],
            ));
        }
        decode_outputs.push(TensorSpec::new("logits", DType::I16, &[1, 1, VOCAB]));

        Self {
            signatures: vec![
                SignatureInfo::new(
                    format!("prefill_{PREFILL_LEN}"),
                    prefill_inputs,
                    prefill_outputs,
                ),
                SignatureInfo::new("decode", decode_inputs, decode_outputs),
            ],
            probe,
            fail_decode: AtomicBool::new(false),
        }
    }

    fn write_slices(&self, inputs: &BufferMap, outputs: &BufferMap, seq_len: usize) -> Result<()> {
        let embeds = get(inputs, "input_embeds").copy_f32()?;
        for layer in 0..LAYERS {
            let mut k = vec![0.0; seq_len];
            let mut v = vec![0.0; seq_len];
            for slot in 0..seq_len {
                let token = embeds[slot * EMBED] as i32;
                k[slot] = k_marker(token, layer);
                v[slot] = v_marker(token, layer);
            }
            get(outputs, &format!("kv_slice_k_{layer}")).write_f32(&k)?;
            get(outputs, &format!("kv_slice_v_{layer}")).write_f32(&v)?;
        }
        Ok(())
    }
}

impl CompiledGraph for FakeLlmGraph {
    fn signatures(&self) -> &[SignatureInfo] {
        &self.signatures
    }

    fn run(&self, signature: &str, inputs: &BufferMap, outputs: &BufferMap) -> Result<()> {
        self.probe.lock().unwrap().run_log.push(signature.to_string());
        match signature {
            name if name == format!("prefill_{PREFILL_LEN}") => {
                self.write_slices(inputs, outputs, PREFILL_LEN)
            }
            "decode" => {
                if self.fail_decode.load(Ordering::SeqCst) {
                    return Err(Error::Internal("synthetic llm decode failure".into()));
                }
                {
                    let mut probe = self.probe.lock().unwrap();
                    probe.decode_llm_kv_inputs = inputs
                        .iter()
                        .filter(|(name, _)| name.starts_with("kv_cache_"))
                        .map(|(name, buffer)| (name.clone(), buffer.duplicate()))
                        .collect();
                }
                self.write_slices(inputs, outputs, 1)?;
                let embeds = get(inputs, "input_embeds").copy_f32()?;
                let token = embeds[0] as i32;
                let target = (token + 1) % VOCAB as i32;
                let logits: Vec<i16> = (0..VOCAB)
                    .map(|v| if v as i32 == target { 100 } else { v as i16 })
                    .collect();
                get(outputs, "logits").write_i16(&logits)
            }
            other => Err(Error::NotFound(format!("signature {other}"))),
        }
    }
}

// ─── Auxiliary graph (rope + mask + cache update) ────────────────────────────

struct FakeAuxGraph {
    signatures: Vec<SignatureInfo>,
    probe: SharedProbe,
}

impl FakeAuxGraph {
    fn new(probe: SharedProbe) -> Self {
        let rope = |name: &str, seq: usize| {
            SignatureInfo::new(
                name,
                vec![TensorSpec::new("input_pos", DType::I32, &[1, seq])],
                [
                    "pos_emb_cos",
                    "pos_emb_sin",
                    "pos_emb_local_cos",
                    "pos_emb_local_sin",
                ]
                .map(|n| TensorSpec::new(n, DType::F32, &[1, seq, EMBED]))
                .to_vec(),
            )
        };
        let mask = |name: &str, seq: usize| {
            SignatureInfo::new(
                name,
                vec![
                    TensorSpec::new("time_step", DType::I32, &[1]),
                    TensorSpec::new("input_tokens", DType::I32, &[1, seq]),
                ],
                vec![
                    TensorSpec::new("mask_local", DType::F32, &[1, 1, seq, MAX_TOKENS]),
                    TensorSpec::new("mask_global", DType::F32, &[1, 1, seq, MAX_TOKENS]),
                ],
            )
        };
        let cache_update = |name: &str, seq: usize| {
            let mut inputs = vec![TensorSpec::new("input_pos", DType::I32, &[1, seq])];
            let mut outputs = Vec::new();
            for layer in 0..LAYERS {
                for side in ["k", "v"] {
                    inputs.push(TensorSpec::new(
                        format!("kv_cache_{side}_{layer}"),
                        DType::F32,
                        &[1, MAX_TOKENS],
                    ));
                    inputs.push(TensorSpec::new(
                        format!("kv_slice_{side}_{layer}"),
                        DType::F32,
                        &[1, seq],
                    ));
                    outputs.push(TensorSpec::new(
                        format!("kv_cache_{side}_{layer}"),
                        DType::F32,
                        &[1, MAX_TOKENS],
                    ));
                }
            }
            SignatureInfo::new(name, inputs, outputs)
        };

        Self {
            signatures: vec![
                rope(&format!("prefill_rope_{PREFILL_LEN}"), PREFILL_LEN),
                rope("decode_rope", 1),
                mask(&format!("prefill_mask_{PREFILL_LEN}"), PREFILL_LEN),
                mask("decode_mask", 1),
                cache_update(&format!("prefill_cache_update_{PREFILL_LEN}"), PREFILL_LEN),
                cache_update("decode_cache_update", 1),
            ],
            probe,
        }
    }

    fn run_rope(&self, inputs: &BufferMap, outputs: &BufferMap, seq_len: usize) -> Result<()> {
        let pos = get(inputs, "input_pos").copy_i32()?;
        let mut emb = vec![0.0; seq_len * EMBED];
        for slot in 0..seq_len {
            emb[slot * EMBED] = pos[slot] as f32;
        }
        for name in [
            "pos_emb_cos",
            "pos_emb_sin",
            "pos_emb_local_cos",
            "pos_emb_local_sin",
        ] {
            get(outputs, name).write_f32(&emb)?;
        }
        Ok(())
    }

    fn run_mask(&self, inputs: &BufferMap, outputs: &BufferMap, seq_len: usize) -> Result<()> {
        let time_step = get(inputs, "time_step").copy_i32()?;
        self.probe.lock().unwrap().mask_time_steps.push(time_step[0]);
        let ones = vec![1.0; seq_len * MAX_TOKENS];
        get(outputs, "mask_local").write_f32(&ones)?;
        get(outputs, "mask_global").write_f32(&ones)?;
        Ok(())
    }

    fn run_cache_update(&self, inputs: &BufferMap, outputs: &BufferMap) -> Result<()> {
        {
            let mut probe = self.probe.lock().unwrap();
            if probe.kv_cache.is_empty() {
                probe.kv_cache = inputs
                    .iter()
                    .filter(|(name, _)| name.starts_with("kv_cache_"))
                    .map(|(name, buffer)| (name.clone(), buffer.duplicate()))
                    .collect();
            }
        }
        let pos = get(inputs, "input_pos").copy_i32()?;
        for layer in 0..LAYERS {
            for side in ["k", "v"] {
                let slice = get(inputs, &format!("kv_slice_{side}_{layer}")).copy_f32()?;
                let cache = get(outputs, &format!("kv_cache_{side}_{layer}"));
                let mut lock = cache.lock();
                let cells = lock.as_f32_mut()?;
                for (slot, &value) in slice.iter().enumerate() {
                    if value != 0.0 {
                        cells[pos[slot] as usize] = value;
                    }
                }
            }
        }
        Ok(())
    }
}

impl CompiledGraph for FakeAuxGraph {
    fn signatures(&self) -> &[SignatureInfo] {
        &self.signatures
    }

    fn run(&self, signature: &str, inputs: &BufferMap, outputs: &BufferMap) -> Result<()> {
        self.probe.lock().unwrap().run_log.push(signature.to_string());
        match signature {
            name if name == format!("prefill_rope_{PREFILL_LEN}") => {
                self.run_rope(inputs, outputs, PREFILL_LEN)
            }
            "decode_rope" => self.run_rope(inputs, outputs, 1),
            name if name == format!("prefill_mask_{PREFILL_LEN}") => {
                self.run_mask(inputs, outputs, PREFILL_LEN)
            }
            "decode_mask" => self.run_mask(inputs, outputs, 1),
            name if name == format!("prefill_cache_update_{PREFILL_LEN}") => {
                self.run_cache_update(inputs, outputs)
            }
            "decode_cache_update" => self.run_cache_update(inputs, outputs),
            other => Err(Error::NotFound(format!("signature {other}"))),
        }
    }
}

// ─── Embedder graph ──────────────────────────────────────────────────────────

struct FakeEmbedderGraph {
    signatures: Vec<SignatureInfo>,
    probe: SharedProbe,
}

impl FakeEmbedderGraph {
    fn new(probe: SharedProbe) -> Self {
        let embedder = |name: &str, seq: usize| {
            SignatureInfo::new(
                name,
                vec![TensorSpec::new("tokens", DType::I32, &[1, seq])],
                vec![TensorSpec::new("embeds", DType::F32, &[1, seq, EMBED])],
            )
        };
        Self {
            signatures: vec![
                embedder(&format!("prefill_embedder_{PREFILL_LEN}"), PREFILL_LEN),
                embedder("decode_embedder", 1),
            ],
            probe,
        }
    }
}

impl CompiledGraph for FakeEmbedderGraph {
    fn signatures(&self) -> &[SignatureInfo] {
        &self.signatures
    }

    fn run(&self, signature: &str, inputs: &BufferMap, outputs: &BufferMap) -> Result<()> {
        self.probe.lock().unwrap().run_log.push(signature.to_string());
        let tokens = get(inputs, "tokens").copy_i32()?;
        let mut embeds = vec![0.0; tokens.len() * EMBED];
        for (slot, &token) in tokens.iter().enumerate() {
            embeds[slot * EMBED] = token as f32;
        }
        get(outputs, "embeds").write_f32(&embeds)
    }
}

// ─── Package ─────────────────────────────────────────────────────────────────

pub struct FakePackage {
    llm: Arc<FakeLlmGraph>,
    aux: Arc<FakeAuxGraph>,
    embedder: Option<Arc<FakeEmbedderGraph>>,
    probe: SharedProbe,
}

impl FakePackage {
    pub fn new() -> Self {
        let probe = SharedProbe::default();
        Self {
            llm: Arc::new(FakeLlmGraph::new(Arc::clone(&probe))),
            aux: Arc::new(FakeAuxGraph::new(Arc::clone(&probe))),
            embedder: Some(Arc::new(FakeEmbedderGraph::new(Arc::clone(&probe)))),
            probe,
        }
    }

    /// A package whose embedder asset is missing from the bundle.
    pub fn without_embedder() -> Self {
        let mut package = Self::new();
        package.embedder = None;
        package
    }

    /// Drop the warmup entries recorded during executor construction.
    pub fn clear_recordings(&self) {
        let mut probe = self.probe.lock().unwrap();
        probe.run_log.clear();
        probe.mask_time_steps.clear();
    }

    pub fn run_log(&self) -> Vec<String> {
        self.probe.lock().unwrap().run_log.clone()
    }

    pub fn mask_time_steps(&self) -> Vec<i32> {
        self.probe.lock().unwrap().mask_time_steps.clone()
    }

    /// Contents of a shared KV cache buffer, as seen by the cache-update
    /// graph.
    pub fn kv_cache_f32(&self, name: &str) -> Vec<f32> {
        self.probe.lock().unwrap().kv_cache[name].copy_f32().unwrap()
    }

    /// Duplicate of a KV cache input handle seen by the LLM decode
    /// signature.
    pub fn decode_llm_kv_input(&self, name: &str) -> TensorBuffer {
        self.probe.lock().unwrap().decode_llm_kv_inputs[name].duplicate()
    }

    /// Duplicate of a shared KV cache buffer handle.
    pub fn kv_cache_buffer(&self, name: &str) -> TensorBuffer {
        self.probe.lock().unwrap().kv_cache[name].duplicate()
    }

    pub fn fail_llm_decode(&self, fail: bool) {
        self.llm.fail_decode.store(fail, Ordering::SeqCst);
    }
}

impl ModelResources for FakePackage {
    fn model(&self, kind: ModelKind) -> Result<Arc<dyn CompiledGraph>> {
        match kind {
            ModelKind::PrefillDecode => Ok(Arc::clone(&self.llm) as Arc<dyn CompiledGraph>),
            ModelKind::Auxiliary => Ok(Arc::clone(&self.aux) as Arc<dyn CompiledGraph>),
            ModelKind::Embedder => self
                .embedder
                .as_ref()
                .map(|graph| Arc::clone(graph) as Arc<dyn CompiledGraph>)
                .ok_or_else(|| Error::NotFound("embedder model".into())),
        }
    }
}
