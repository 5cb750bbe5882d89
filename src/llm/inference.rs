use candle_core::Result as CandleResult;
use candle_core::{DType, IndexOp, Tensor};
use candle_nn::ops::softmax;
use rand::distr::{weighted::WeightedIndex, Distribution};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::llm::models::Model;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    /// Upper bound on the whole sequence, prompt included. At least one token
    /// is generated even when the prompt already reaches it.
    pub max_length: usize,
    /// `None` or a non-positive value selects greedy decoding.
    pub temperature: Option<f64>,
    /// Nucleus filter applied after temperature scaling; ignored unless in `(0, 1)`.
    pub top_p: Option<f64>,
    pub seed: u64,
}

enum Sampler {
    Greedy,
    Temperature {
        temperature: f64,
        top_p: Option<f64>,
        rng: StdRng,
    },
}

impl Sampler {
    fn new(params: &SamplingParams) -> Self {
        match params.temperature {
            Some(t) if t > 0.0 => Sampler::Temperature {
                temperature: t.clamp(0.01, 100.0),
                top_p: params.top_p.filter(|p| *p > 0.0 && *p < 1.0),
                rng: StdRng::seed_from_u64(params.seed),
            },
            _ => Sampler::Greedy,
        }
    }

    fn sample(&mut self, logits: &Tensor) -> CandleResult<u32> {
        let logits = logits.to_dtype(DType::F32)?;
        match self {
            Sampler::Greedy => logits.argmax(0)?.to_scalar::<u32>(),
            Sampler::Temperature {
                temperature,
                top_p,
                rng,
            } => {
                let scaled = logits.affine(1.0 / *temperature, 0.0)?;
                let mut probs = softmax(&scaled, 0)?.to_vec1::<f32>()?;
                if let Some(top_p) = top_p {
                    retain_nucleus(&mut probs, *top_p);
                }
                let dist = WeightedIndex::new(&probs).map_err(candle_core::Error::wrap)?;
                Ok(dist.sample(rng) as u32)
            }
        }
    }
}

/// Zeroes every probability outside the smallest set of most likely tokens
/// whose mass reaches `top_p`. The most likely token always survives.
fn retain_nucleus(probs: &mut [f32], top_p: f64) {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut mass = 0.0;
    for idx in order {
        if mass >= top_p {
            probs[idx] = 0.0;
        } else {
            mass += f64::from(probs[idx]);
        }
    }
}

/// Autoregressive decoding with a per-call KV cache. Returns the prompt ids
/// followed by the generated ids; an EOS token, when produced, is kept as
/// the last element.
pub fn generate(
    prompt_ids: &[u32],
    model: &dyn Model,
    params: &SamplingParams,
    eos_token_ids: &[u32],
) -> CandleResult<Vec<u32>> {
    let mut ids = prompt_ids.to_vec();
    if ids.is_empty() {
        return Ok(ids);
    }

    let mut sampler = Sampler::new(params);
    let mut kv_caches = model.new_cache();

    // The first pass feeds the whole prompt, later passes only the newest token.
    let mut pending = ids.clone();
    let mut position = 0;

    loop {
        let input = Tensor::new(pending.as_slice(), model.device())?.unsqueeze(0)?;
        let logits = model.forward_with_cache(&input, &mut kv_caches, position)?;
        let next_token_logits = logits.i((0, logits.dim(1)? - 1))?;

        let next_token = sampler.sample(&next_token_logits)?;
        ids.push(next_token);

        if eos_token_ids.contains(&next_token) || ids.len() >= params.max_length {
            break;
        }

        position += pending.len();
        pending = vec![next_token];
    }

    Ok(ids)
}
