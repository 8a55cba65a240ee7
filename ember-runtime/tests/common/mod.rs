//! Minimal fake NPU package and tokenizer for session tests.
//!
//! The model is deterministic: decoding after token `t` greedily produces
//! `(t + 1) % VOCAB`. The tokenizer maps `t<N>` words to id `N`; id 6 only
//! decodes once a follow-up token arrives, standing in for a token that
//! ends mid-way through a multi-byte character.

#![allow(dead_code)]

use std::sync::Arc;

use ember::graph::{BufferMap, CompiledGraph, ModelKind, ModelResources, SignatureInfo, TensorSpec};
use ember::{DType, Error, Result, TensorBuffer, TokenId, Tokenizer};

pub const PREFILL_LEN: usize = 4;
pub const MAX_TOKENS: usize = 16;
pub const VOCAB: usize = 8;
pub const EMBED: usize = 2;
pub const EOS_ID: TokenId = 5;
/// Decodes to an incomplete fragment until another id follows it.
pub const INCOMPLETE_ID: TokenId = 6;

fn get<'a>(buffers: &'a BufferMap, name: &str) -> &'a TensorBuffer {
    buffers
        .get(name)
        .unwrap_or_else(|| panic!("buffer {name} not bound"))
}

struct FakeLlmGraph {
    signatures: Vec<SignatureInfo>,
}

impl FakeLlmGraph {
    fn new() -> Self {
        let shared = |seq: usize| {
            let mut inputs = vec![TensorSpec::new("input_embeds", DType::F32, &[1, seq, EMBED])];
            for name in [
                "pos_emb_cos",
                "pos_emb_sin",
                "pos_emb_local_cos",
                "pos_emb_local_sin",
            ] {
                inputs.push(TensorSpec::new(name, DType::F32, &[1, seq, EMBED]));
            }
            inputs.push(TensorSpec::new("mask_local", DType::F32, &[1, 1, seq, MAX_TOKENS]));
            inputs.push(TensorSpec::new("mask_global", DType::F32, &[1, 1, seq, MAX_TOKENS]));
            inputs.push(TensorSpec::new("kv_cache_k_0", DType::F32, &[1, MAX_TOKENS]));
            inputs.push(TensorSpec::new("kv_cache_v_0", DType::F32, &[1, MAX_TOKENS]));
            let outputs = vec![
                TensorSpec::new("kv_slice_k_0", DType::F32, &[1, seq]),
                TensorSpec::new("kv_slice_v_0", DType::F32, &[1, seq]),
            ];
            (inputs, outputs)
        };
        let (prefill_inputs, prefill_outputs) = shared(PREFILL_LEN);
        let (decode_inputs, mut decode_outputs) = shared(1);
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
        }
    }
}

impl CompiledGraph for FakeLlmGraph {
    fn signatures(&self) -> &[SignatureInfo] {
        &self.signatures
    }

    fn run(&self, signature: &str, inputs: &BufferMap, outputs: &BufferMap) -> Result<()> {
        let embeds = get(inputs, "input_embeds").copy_f32()?;
        let seq_len = embeds.len() / EMBED;
        let slices: Vec<f32> = (0..seq_len).map(|slot| embeds[slot * EMBED]).collect();
        get(outputs, "kv_slice_k_0").write_f32(&slices)?;
        get(outputs, "kv_slice_v_0").write_f32(&slices)?;
        if signature == "decode" {
            let token = embeds[0] as i32;
            let target = (token + 1) % VOCAB as i32;
            let logits: Vec<i16> = (0..VOCAB)
                .map(|v| if v as i32 == target { 100 } else { 0 })
                .collect();
            get(outputs, "logits").write_i16(&logits)?;
        }
        Ok(())
    }
}

struct FakeAuxGraph {
    signatures: Vec<SignatureInfo>,
}

impl FakeAuxGraph {
    fn new() -> Self {
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
            SignatureInfo::new(
                name,
                vec![
                    TensorSpec::new("input_pos", DType::I32, &[1, seq]),
                    TensorSpec::new("kv_cache_k_0", DType::F32, &[1, MAX_TOKENS]),
                    TensorSpec::new("kv_cache_v_0", DType::F32, &[1, MAX_TOKENS]),
                    TensorSpec::new("kv_slice_k_0", DType::F32, &[1, seq]),
                    TensorSpec::new("kv_slice_v_0", DType::F32, &[1, seq]),
                ],
                vec![
                    TensorSpec::new("kv_cache_k_0", DType::F32, &[1, MAX_TOKENS]),
                    TensorSpec::new("kv_cache_v_0", DType::F32, &[1, MAX_TOKENS]),
                ],
            )
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
        }
    }
}

impl CompiledGraph for FakeAuxGraph {
    fn signatures(&self) -> &[SignatureInfo] {
        &self.signatures
    }

    fn run(&self, signature: &str, inputs: &BufferMap, outputs: &BufferMap) -> Result<()> {
        if signature.contains("rope") {
            let pos = get(inputs, "input_pos").copy_i32()?;
            let mut emb = vec![0.0; pos.len() * EMBED];
            for (slot, &p) in pos.iter().enumerate() {
                emb[slot * EMBED] = p as f32;
            }
            for name in [
                "pos_emb_cos",
                "pos_emb_sin",
                "pos_emb_local_cos",
                "pos_emb_local_sin",
            ] {
                get(outputs, name).write_f32(&emb)?;
            }
        } else if signature.contains("mask") {
            let seq = get(inputs, "input_tokens").num_elements();
            let ones = vec![1.0; seq * MAX_TOKENS];
            get(outputs, "mask_local").write_f32(&ones)?;
            get(outputs, "mask_global").write_f32(&ones)?;
        } else if signature.contains("cache_update") {
            let pos = get(inputs, "input_pos").copy_i32()?;
            for side in ["k", "v"] {
                let slice = get(inputs, &format!("kv_slice_{side}_0")).copy_f32()?;
                let cache = get(outputs, &format!("kv_cache_{side}_0"));
                let mut lock = cache.lock();
                let cells = lock.as_f32_mut()?;
                for (slot, &value) in slice.iter().enumerate() {
                    if value != 0.0 {
                        cells[pos[slot] as usize] = value;
                    }
                }
            }
        } else {
            return Err(Error::NotFound(format!("signature {signature}")));
        }
        Ok(())
    }
}

struct FakeEmbedderGraph {
    signatures: Vec<SignatureInfo>,
}

impl FakeEmbedderGraph {
    fn new() -> Self {
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
        }
    }
}

impl CompiledGraph for FakeEmbedderGraph {
    fn signatures(&self) -> &[SignatureInfo] {
        &self.signatures
    }

    fn run(&self, _signature: &str, inputs: &BufferMap, outputs: &BufferMap) -> Result<()> {
        let tokens = get(inputs, "tokens").copy_i32()?;
        let mut embeds = vec![0.0; tokens.len() * EMBED];
        for (slot, &token) in tokens.iter().enumerate() {
            embeds[slot * EMBED] = token as f32;
        }
        get(outputs, "embeds").write_f32(&embeds)
    }
}

pub struct FakePackage {
    llm: Arc<FakeLlmGraph>,
    aux: Arc<FakeAuxGraph>,
    embedder: Arc<FakeEmbedderGraph>,
}

impl FakePackage {
    pub fn new() -> Self {
        Self {
            llm: Arc::new(FakeLlmGraph::new()),
            aux: Arc::new(FakeAuxGraph::new()),
            embedder: Arc::new(FakeEmbedderGraph::new()),
        }
    }
}

impl ModelResources for FakePackage {
    fn model(&self, kind: ModelKind) -> Result<Arc<dyn CompiledGraph>> {
        match kind {
            ModelKind::PrefillDecode => Ok(Arc::clone(&self.llm) as Arc<dyn CompiledGraph>),
            ModelKind::Auxiliary => Ok(Arc::clone(&self.aux) as Arc<dyn CompiledGraph>),
            ModelKind::Embedder => Ok(Arc::clone(&self.embedder) as Arc<dyn CompiledGraph>),
        }
    }
}

/// Word-per-token tokenizer: `t<N>` ↔ id `N`.
pub struct FakeTokenizer;

impl Tokenizer for FakeTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<TokenId>> {
        text.split_whitespace()
            .map(|word| {
                word.strip_prefix('t')
                    .and_then(|n| n.parse::<TokenId>().ok())
                    .ok_or_else(|| Error::Tokenizer(format!("unknown word {word}")))
            })
            .collect()
    }

    fn decode(&self, ids: &[TokenId]) -> Result<String> {
        if ids.last() == Some(&INCOMPLETE_ID) {
            return Err(Error::DataLoss(
                "token ids end in the middle of a BPE sequence".into(),
            ));
        }
        Ok(ids.iter().map(|id| format!(" t{id}")).collect())
    }

    fn eos_id(&self) -> Result<TokenId> {
        Ok(EOS_ID)
    }
}
