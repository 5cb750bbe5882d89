use candle_core::safetensors::MmapedSafetensors;
use candle_core::Result as CandleResult;
use candle_core::{DType, Device, Tensor, D};

use crate::llm::layer::Layer;
use crate::llm::linear::LinearLayer;
use crate::llm::model_config::ModelConfig;

/// KV cache for storing key and value tensors across generation steps
#[derive(Clone, Default)]
pub struct KVCache {
    pub k_cache: Option<Tensor>,
    pub v_cache: Option<Tensor>,
}

impl KVCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of positions already cached.
    pub fn len(&self) -> CandleResult<usize> {
        match &self.k_cache {
            Some(k) => k.dim(2),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.k_cache.is_none()
    }
}

pub struct CausalSelfAttentionLayer {
    q_proj: LinearLayer,
    k_proj: LinearLayer,
    v_proj: LinearLayer,
    o_proj: LinearLayer,
    n_heads: usize,
    n_kv_heads: usize,
    hidden_size: usize,
    rope_theta: f32,
    device: Device,
}

impl CausalSelfAttentionLayer {
    pub fn new(
        weights: &MmapedSafetensors,
        prefix: &str,
        config: &ModelConfig,
        device: &Device,
        dtype: DType,
    ) -> CandleResult<Self> {
        let q_proj = LinearLayer::new(weights, &format!("{prefix}.q_proj"), device, dtype)?;
        let k_proj = LinearLayer::new(weights, &format!("{prefix}.k_proj"), device, dtype)?;
        let v_proj = LinearLayer::new(weights, &format!("{prefix}.v_proj"), device, dtype)?;
        let o_proj = LinearLayer::new(weights, &format!("{prefix}.o_proj"), device, dtype)?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            n_heads: config.num_attention_heads,
            n_kv_heads: config.num_key_value_heads(),
            hidden_size: config.hidden_size,
            rope_theta: config.rope_theta,
            device: device.clone(),
        })
    }

    fn rotate_half(x: &Tensor) -> CandleResult<Tensor> {
        let last_dim = x.dim(D::Minus1)?;

        let xs1 = x.narrow(D::Minus1, 0, last_dim / 2)?;
        let xs2 = x.narrow(D::Minus1, last_dim / 2, last_dim - last_dim / 2)?;

        Tensor::cat(&[&xs2.neg()?, &xs1], D::Minus1)
    }

    /// Rotary embedding for absolute positions `position..position + seq_len`.
    fn apply_rotary_emb(
        q: &Tensor,
        k: &Tensor,
        position: usize,
        head_dim: usize,
        rope_theta: f32,
        device: &Device,
    ) -> CandleResult<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        let half_head_dim = head_dim / 2;

        let inv_freq: Vec<f32> = (0..half_head_dim)
            .map(|i| 1.0f32 / rope_theta.powf(2.0 * i as f32 / head_dim as f32))
            .collect();
        let inv_freq_tensor = Tensor::new(inv_freq.as_slice(), device)?;

        let t = Tensor::arange(position as u32, (position + seq_len) as u32, device)?
            .to_dtype(DType::F32)?;

        let freqs = t
            .unsqueeze(1)? // (seq_len, 1)
            .broadcast_mul(&inv_freq_tensor.unsqueeze(0)?)?; // (seq_len, half_head_dim)

        let emb = Tensor::cat(&[&freqs, &freqs], 1)?; // (seq_len, head_dim)

        let cos = emb.cos()?.to_dtype(q.dtype())?;
        let sin = emb.sin()?.to_dtype(q.dtype())?;

        // x' = x * cos + rotate_half(x) * sin
        let q_rotated = (q.broadcast_mul(&cos)? + Self::rotate_half(q)?.broadcast_mul(&sin)?)?;
        let k_rotated = (k.broadcast_mul(&cos)? + Self::rotate_half(k)?.broadcast_mul(&sin)?)?;

        Ok((q_rotated, k_rotated))
    }

    fn repeat_kv(x: Tensor, n_rep: usize) -> CandleResult<Tensor> {
        if n_rep == 1 {
            return Ok(x);
        }

        let (b_sz, n_kv_heads, seq_len, head_dim) = x.dims4()?;
        x.unsqueeze(2)? // (b_sz, n_kv_heads, 1, seq_len, head_dim)
            .expand((b_sz, n_kv_heads, n_rep, seq_len, head_dim))?
            .reshape((b_sz, n_kv_heads * n_rep, seq_len, head_dim))
    }

    /// Mask of shape `(1, 1, seq_len, total_len)` where query row `i` sits at
    /// absolute position `total_len - seq_len + i`.
    fn create_causal_mask(
        seq_len: usize,
        total_len: usize,
        dtype: DType,
        device: &Device,
    ) -> CandleResult<Tensor> {
        let offset = total_len - seq_len;
        let mask = (0..seq_len)
            .flat_map(|i| {
                (0..total_len).map(move |j| if j > i + offset { f32::NEG_INFINITY } else { 0.0 })
            })
            .collect::<Vec<f32>>();

        Tensor::from_vec(mask, (seq_len, total_len), device)?
            .to_dtype(dtype)?
            .unsqueeze(0)?
            .unsqueeze(0)
    }

    /// Forward pass with KV cache support. `position` is the absolute index
    /// of the first token in `input`.
    pub fn forward_with_cache(
        &self,
        input: &Tensor,
        kv_cache: &mut KVCache,
        position: usize,
    ) -> CandleResult<Tensor> {
        let input = input.to_device(&self.device)?;
        let q = self.q_proj.forward(&input)?;
        let k = self.k_proj.forward(&input)?;
        let v = self.v_proj.forward(&input)?;

        let head_dim = self.hidden_size / self.n_heads;
        let n_rep = self.n_heads / self.n_kv_heads;

        let (b_sz, seq_len, _) = input.dims3()?;

        let q = q
            .reshape((b_sz, seq_len, self.n_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?; // (b_sz, n_heads, seq_len, head_dim)
        let k = k
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?; // (b_sz, n_kv_heads, seq_len, head_dim)
        let mut v = v
            .reshape((b_sz, seq_len, self.n_kv_heads, head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let (q, mut k) =
            Self::apply_rotary_emb(&q, &k, position, head_dim, self.rope_theta, &self.device)?;

        if let Some(k_cached) = &kv_cache.k_cache {
            k = Tensor::cat(&[k_cached, &k], 2)?;
        }
        if let Some(v_cached) = &kv_cache.v_cache {
            v = Tensor::cat(&[v_cached, &v], 2)?;
        }
        kv_cache.k_cache = Some(k.clone());
        kv_cache.v_cache = Some(v.clone());

        let total_seq_len = k.dim(2)?;

        let k = Self::repeat_kv(k, n_rep)?.contiguous()?;
        let v = Self::repeat_kv(v, n_rep)?.contiguous()?;

        let scaling = 1.0 / (head_dim as f64).sqrt();
        let attn_scores = q
            .matmul(&k.t()?.contiguous()?)?
            .affine(scaling, 0.0)?;

        // A single new token may attend to everything before it.
        let attn_scores = if seq_len > 1 {
            let mask = Self::create_causal_mask(
                seq_len,
                total_seq_len,
                attn_scores.dtype(),
                &self.device,
            )?;
            attn_scores.broadcast_add(&mask)?
        } else {
            attn_scores
        };

        let attn_probs = candle_nn::ops::softmax(&attn_scores.to_dtype(DType::F32)?, D::Minus1)?
            .to_dtype(v.dtype())?;

        let context = attn_probs
            .matmul(&v)?
            .transpose(1, 2)? // (b_sz, seq_len, n_heads, head_dim)
            .reshape((b_sz, seq_len, self.hidden_size))?;

        self.o_proj.forward(&context)
    }
}
