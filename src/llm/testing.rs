//! Tiny randomly initialised Llama checkpoints written to a temp directory.

use std::collections::HashMap;
use std::path::Path;

use candle_core::safetensors::MmapedSafetensors;
use candle_core::{DType, Device, Tensor};
use tempfile::TempDir;

use crate::llm::model_config::ModelConfig;
use crate::llm::models::LlamaModel;

pub const WORDS: [&str; 16] = [
    "<unk>", "<s>", "</s>", "tell", "me", "a", "joke", "why", "did", "the", "chicken", "cross",
    "road", "to", "get", "other",
];

pub struct TinyLlama {
    pub dir: TempDir,
    pub config: ModelConfig,
}

impl TinyLlama {
    pub fn build(tied: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config_json = serde_json::json!({
            "architectures": ["LlamaForCausalLM"],
            "bos_token_id": 1,
            "eos_token_id": 2,
            "hidden_act": "silu",
            "hidden_size": 8,
            "intermediate_size": 16,
            "max_position_embeddings": 64,
            "model_type": "llama",
            "num_attention_heads": 2,
            "num_hidden_layers": 2,
            "num_key_value_heads": 1,
            "rms_norm_eps": 1e-5,
            "rope_theta": 10000.0,
            "tie_word_embeddings": tied,
            "vocab_size": WORDS.len(),
        });
        std::fs::write(dir.path().join("config.json"), config_json.to_string()).unwrap();
        let config: ModelConfig = serde_json::from_value(config_json).unwrap();

        write_weights(&config, tied, &dir.path().join("model.safetensors"));
        write_tokenizer(&dir.path().join("tokenizer.json"));

        Self { dir, config }
    }

    pub fn load(&self) -> LlamaModel {
        let weights =
            unsafe { MmapedSafetensors::new(self.dir.path().join("model.safetensors")).unwrap() };
        LlamaModel::new(&weights, &self.config, &Device::Cpu, DType::F32).unwrap()
    }
}

fn write_weights(config: &ModelConfig, tied: bool, path: &Path) {
    let device = Device::Cpu;
    let hidden = config.hidden_size;
    let kv_dim = hidden / config.num_attention_heads * config.num_key_value_heads();
    let inter = config.intermediate_size;
    let vocab = config.vocab_size;

    let randn = |shape: (usize, usize)| Tensor::randn(0f32, 0.5, shape, &device).unwrap();
    let ones = || Tensor::ones(hidden, DType::F32, &device).unwrap();

    let mut tensors: HashMap<String, Tensor> = HashMap::new();
    tensors.insert("model.embed_tokens.weight".into(), randn((vocab, hidden)));
    for idx in 0..config.num_hidden_layers {
        let p = format!("model.layers.{idx}");
        tensors.insert(format!("{p}.self_attn.q_proj.weight"), randn((hidden, hidden)));
        tensors.insert(format!("{p}.self_attn.k_proj.weight"), randn((kv_dim, hidden)));
        tensors.insert(format!("{p}.self_attn.v_proj.weight"), randn((kv_dim, hidden)));
        tensors.insert(format!("{p}.self_attn.o_proj.weight"), randn((hidden, hidden)));
        tensors.insert(format!("{p}.mlp.gate_proj.weight"), randn((inter, hidden)));
        tensors.insert(format!("{p}.mlp.up_proj.weight"), randn((inter, hidden)));
        tensors.insert(format!("{p}.mlp.down_proj.weight"), randn((hidden, inter)));
        tensors.insert(format!("{p}.input_layernorm.weight"), ones());
        tensors.insert(format!("{p}.post_attention_layernorm.weight"), ones());
    }
    tensors.insert("model.norm.weight".into(), ones());
    if !tied {
        tensors.insert("lm_head.weight".into(), randn((vocab, hidden)));
    }

    candle_core::safetensors::save(&tensors, path).unwrap();
}

fn write_tokenizer(path: &Path) {
    let vocab: serde_json::Map<String, serde_json::Value> = WORDS
        .iter()
        .enumerate()
        .map(|(id, word)| (word.to_string(), serde_json::json!(id)))
        .collect();

    let tokenizer = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": { "type": "Whitespace" },
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": vocab,
            "unk_token": "<unk>"
        }
    });
    std::fs::write(path, tokenizer.to_string()).unwrap();
}
