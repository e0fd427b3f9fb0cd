//! Reference causal transformer.
//!
//! A small GPT-style decoder: learned token and position embeddings, pre-norm
//! blocks of causal multi-head self attention and a SiLU MLP, a final RMS norm
//! and a linear head onto the vocabulary. Every forward pass recomputes all
//! positions; nothing is carried between calls.

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::config::Precision;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::TokenId;

/// Configuration for the transformer model.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ModelArgs {
    /// Maximum sequence length supported.
    pub max_seq_len: usize,
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Embedding/hidden dimension.
    pub dim: usize,
    /// Number of layers.
    pub n_layers: usize,
    /// Number of attention heads.
    pub n_heads: usize,
    /// Hidden dimension of the feed-forward network.
    pub hidden_dim: usize,
}

impl Default for ModelArgs {
    fn default() -> Self {
        Self {
            max_seq_len: 128,
            vocab_size: crate::tokenizer::BUILTIN_VOCAB.len(),
            dim: 64,
            n_layers: 2,
            n_heads: 4,
            hidden_dim: 256,
        }
    }
}

impl ModelArgs {
    pub fn validate(&self) -> ProvisioningResult<()> {
        let fields = [
            ("max_seq_len", self.max_seq_len),
            ("vocab_size", self.vocab_size),
            ("dim", self.dim),
            ("n_layers", self.n_layers),
            ("n_heads", self.n_heads),
            ("hidden_dim", self.hidden_dim),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, v)| *v == 0) {
            return Err(ProvisioningError::InvalidArgs(format!("{name} must be positive")));
        }
        if self.dim % self.n_heads != 0 {
            return Err(ProvisioningError::InvalidArgs(format!(
                "dim ({}) must be divisible by n_heads ({})",
                self.dim, self.n_heads
            )));
        }
        Ok(())
    }
}

/// How a freshly initialised parameter is filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Init {
    Uniform,
    Ones,
}

/// Description of one parameter tensor, in build order.
#[derive(Clone, Debug)]
pub struct ParamSpec {
    pub name: String,
    pub shape: (usize, usize),
    pub init: Init,
}

/// Supplies parameter tensors to [`Transformer::build`], one at a time.
pub trait ParamSource {
    fn next_param(&mut self, spec: &ParamSpec) -> ProvisioningResult<Array2<f32>>;
}

/// Deterministic random initialisation.
pub struct SeededInit {
    rng: StdRng,
    range: f32,
}

impl SeededInit {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            range: 0.1,
        }
    }
}

impl ParamSource for SeededInit {
    fn next_param(&mut self, spec: &ParamSpec) -> ProvisioningResult<Array2<f32>> {
        let a = match spec.init {
            Init::Ones => Array2::ones(spec.shape),
            Init::Uniform => {
                let r = self.range;
                Array2::from_shape_fn(spec.shape, |_| self.rng.gen_range(-r..r))
            }
        };
        Ok(a)
    }
}

fn take(
    source: &mut dyn ParamSource,
    precision: Precision,
    name: String,
    shape: (usize, usize),
    init: Init,
) -> ProvisioningResult<Array2<f32>> {
    let spec = ParamSpec { name, shape, init };
    let mut a = source.next_param(&spec)?;
    if a.dim() != spec.shape {
        return Err(ProvisioningError::Corrupt(format!(
            "parameter '{}' has shape {:?}, expected {:?}",
            spec.name,
            a.dim(),
            spec.shape
        )));
    }
    precision.round_in_place(&mut a);
    Ok(a)
}

/// Embedding layer mapping token ids to vectors.
pub struct Embedding {
    weight: Array2<f32>, // vocab_size x dim
}

impl Embedding {
    pub fn forward(&self, tokens: &[TokenId]) -> Array2<f32> {
        let mut out = Array2::<f32>::zeros((tokens.len(), self.weight.ncols()));
        for (i, &tok) in tokens.iter().enumerate() {
            out.row_mut(i).assign(&self.weight.row(tok));
        }
        out
    }
}

/// Fully connected layer without bias.
pub struct Linear {
    weight: Array2<f32>, // out x in
}

impl Linear {
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t())
    }

    pub fn weight(&self) -> &Array2<f32> {
        &self.weight
    }
}

/// Root mean square layer normalization.
pub struct RMSNorm {
    weight: Array1<f32>,
    eps: f32,
}

impl RMSNorm {
    fn from_param(p: Array2<f32>) -> Self {
        Self {
            weight: p.row(0).to_owned(),
            eps: 1e-6,
        }
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let mean = x
            .mapv(|v| v * v)
            .mean_axis(Axis(1))
            .unwrap_or_else(|| Array1::zeros(x.nrows()));
        let denom = mean.mapv(|m| (m + self.eps).sqrt()).insert_axis(Axis(1));
        let norm = x / &denom;
        norm * &self.weight.view().insert_axis(Axis(0))
    }
}

/// Multi-head causal self attention.
pub struct Attention {
    wq: Linear,
    wk: Linear,
    wv: Linear,
    wo: Linear,
    n_heads: usize,
    head_dim: usize,
}

impl Attention {
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let q = self.wq.forward(x);
        let k = self.wk.forward(x);
        let v = self.wv.forward(x);
        let seq = x.nrows();
        let scale = (self.head_dim as f32).sqrt();

        let mut out = Array2::<f32>::zeros((seq, self.n_heads * self.head_dim));
        for h in 0..self.n_heads {
            let (lo, hi) = (h * self.head_dim, (h + 1) * self.head_dim);
            let qh = q.slice(s![.., lo..hi]);
            let kh = k.slice(s![.., lo..hi]);
            let vh = v.slice(s![.., lo..hi]);

            // seq x seq: the quadratic part of every call
            let mut scores = qh.dot(&kh.t()) / scale;
            for (i, mut row) in scores.axis_iter_mut(Axis(0)).enumerate() {
                row.slice_mut(s![i + 1..]).fill(f32::NEG_INFINITY);
                let max = row.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                let mut sum = 0.0;
                for e in row.iter_mut() {
                    *e = (*e - max).exp();
                    sum += *e;
                }
                row /= sum;
            }
            out.slice_mut(s![.., lo..hi]).assign(&scores.dot(&vh));
        }
        self.wo.forward(&out)
    }
}

/// Feed-forward network using SiLU activation.
pub struct MLP {
    w1: Linear,
    w2: Linear,
}

impl MLP {
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let hidden = self.w1.forward(x).mapv(|v| v * (1.0 / (1.0 + (-v).exp())));
        self.w2.forward(&hidden)
    }
}

/// Transformer block consisting of attention and feed-forward layers.
pub struct Block {
    attn_norm: RMSNorm,
    attn: Attention,
    ffn_norm: RMSNorm,
    ffn: MLP,
}

impl Block {
    fn build(
        args: &ModelArgs,
        index: usize,
        source: &mut dyn ParamSource,
        precision: Precision,
    ) -> ProvisioningResult<Self> {
        let (dim, hidden) = (args.dim, args.hidden_dim);
        let mut param = |field: &str, shape: (usize, usize), init: Init| {
            take(source, precision, format!("layers.{index}.{field}"), shape, init)
        };
        let attn_norm = RMSNorm::from_param(param("attn_norm", (1, dim), Init::Ones)?);
        let wq = Linear { weight: param("wq", (dim, dim), Init::Uniform)? };
        let wk = Linear { weight: param("wk", (dim, dim), Init::Uniform)? };
        let wv = Linear { weight: param("wv", (dim, dim), Init::Uniform)? };
        let wo = Linear { weight: param("wo", (dim, dim), Init::Uniform)? };
        let ffn_norm = RMSNorm::from_param(param("ffn_norm", (1, dim), Init::Ones)?);
        let w1 = Linear { weight: param("w1", (hidden, dim), Init::Uniform)? };
        let w2 = Linear { weight: param("w2", (dim, hidden), Init::Uniform)? };
        Ok(Self {
            attn_norm,
            attn: Attention {
                wq,
                wk,
                wv,
                wo,
                n_heads: args.n_heads,
                head_dim: dim / args.n_heads,
            },
            ffn_norm,
            ffn: MLP { w1, w2 },
        })
    }

    fn visit<'a>(&'a self, index: usize, f: &mut dyn FnMut(String, ArrayView2<'a, f32>)) {
        f(format!("layers.{index}.attn_norm"), self.attn_norm.weight.view().insert_axis(Axis(0)));
        f(format!("layers.{index}.wq"), self.attn.wq.weight.view());
        f(format!("layers.{index}.wk"), self.attn.wk.weight.view());
        f(format!("layers.{index}.wv"), self.attn.wv.weight.view());
        f(format!("layers.{index}.wo"), self.attn.wo.weight.view());
        f(format!("layers.{index}.ffn_norm"), self.ffn_norm.weight.view().insert_axis(Axis(0)));
        f(format!("layers.{index}.w1"), self.ffn.w1.weight.view());
        f(format!("layers.{index}.w2"), self.ffn.w2.weight.view());
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let h = self.attn_norm.forward(x);
        let h = self.attn.forward(&h);
        let x = x + &h;
        let h = self.ffn_norm.forward(&x);
        let h = self.ffn.forward(&h);
        x + &h
    }
}

/// Full Transformer model used for generation.
pub struct Transformer {
    args: ModelArgs,
    precision: Precision,
    embed: Embedding,
    pos_embed: Array2<f32>, // max_seq_len x dim
    layers: Vec<Block>,
    norm: RMSNorm,
    head: Linear,
}

impl Transformer {
    /// Build a model, pulling parameters from `source` in a fixed order and
    /// rounding them to `precision`.
    pub fn build(
        args: ModelArgs,
        precision: Precision,
        source: &mut dyn ParamSource,
    ) -> ProvisioningResult<Self> {
        args.validate()?;
        let (vocab, dim) = (args.vocab_size, args.dim);
        let embed = Embedding {
            weight: take(source, precision, "tok_embed".into(), (vocab, dim), Init::Uniform)?,
        };
        let pos_embed = take(
            source,
            precision,
            "pos_embed".into(),
            (args.max_seq_len, dim),
            Init::Uniform,
        )?;
        let layers = (0..args.n_layers)
            .map(|i| Block::build(&args, i, source, precision))
            .collect::<ProvisioningResult<Vec<_>>>()?;
        let norm = RMSNorm::from_param(take(source, precision, "norm".into(), (1, dim), Init::Ones)?);
        let head = Linear {
            weight: take(source, precision, "head".into(), (vocab, dim), Init::Uniform)?,
        };
        Ok(Self {
            args,
            precision,
            embed,
            pos_embed,
            layers,
            norm,
            head,
        })
    }

    /// Randomly initialised model, reproducible for a given seed.
    pub fn seeded(args: ModelArgs, precision: Precision, seed: u64) -> ProvisioningResult<Self> {
        Self::build(args, precision, &mut SeededInit::new(seed))
    }

    pub fn args(&self) -> &ModelArgs {
        &self.args
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn head(&self) -> &Linear {
        &self.head
    }

    /// Visit every parameter in build order.
    pub fn for_each_param<'a>(&'a self, mut f: impl FnMut(String, ArrayView2<'a, f32>)) {
        f("tok_embed".into(), self.embed.weight.view());
        f("pos_embed".into(), self.pos_embed.view());
        for (i, layer) in self.layers.iter().enumerate() {
            layer.visit(i, &mut f);
        }
        f("norm".into(), self.norm.weight.view().insert_axis(Axis(0)));
        f("head".into(), self.head.weight.view());
    }

    pub fn param_count(&self) -> usize {
        let mut n = 0;
        self.for_each_param(|_, p| n += p.len());
        n
    }

    /// Logits for every position of `tokens`.
    ///
    /// # Panics
    /// If `tokens` is longer than `max_seq_len` or holds an id outside the
    /// vocabulary. `ModelExecutor` checks both before calling.
    pub fn forward(&self, tokens: &[TokenId]) -> Array2<f32> {
        let mut h = self.embed.forward(tokens);
        h += &self.pos_embed.slice(s![..tokens.len(), ..]);
        self.precision.round_in_place(&mut h);
        for layer in &self.layers {
            h = layer.forward(&h);
            self.precision.round_in_place(&mut h);
        }
        let h = self.norm.forward(&h);
        let mut logits = self.head.forward(&h);
        self.precision.round_in_place(&mut logits);
        logits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny() -> ModelArgs {
        ModelArgs {
            max_seq_len: 16,
            vocab_size: 20,
            dim: 8,
            n_layers: 1,
            n_heads: 2,
            hidden_dim: 16,
        }
    }

    #[test]
    fn validate_rejects_bad_heads() {
        let args = ModelArgs { n_heads: 3, ..tiny() };
        assert!(matches!(args.validate(), Err(ProvisioningError::InvalidArgs(_))));
        let args = ModelArgs { n_layers: 0, ..tiny() };
        assert!(args.validate().is_err());
        assert!(tiny().validate().is_ok());
    }

    #[test]
    fn same_seed_same_weights() {
        let a = Transformer::seeded(tiny(), Precision::F32, 7).unwrap();
        let b = Transformer::seeded(tiny(), Precision::F32, 7).unwrap();
        let c = Transformer::seeded(tiny(), Precision::F32, 8).unwrap();
        assert_eq!(a.head().weight(), b.head().weight());
        assert_ne!(a.head().weight(), c.head().weight());
    }

    #[test]
    fn params_are_rounded_to_precision() {
        let m = Transformer::seeded(tiny(), Precision::F16, 1).unwrap();
        m.for_each_param(|_, p| {
            for &v in p.iter() {
                assert_eq!(Precision::F16.round(v), v);
            }
        });
    }

    #[test]
    fn param_count_matches_shapes() {
        let args = tiny();
        let m = Transformer::seeded(args.clone(), Precision::F32, 0).unwrap();
        let per_layer = 2 * args.dim + 4 * args.dim * args.dim + 2 * args.dim * args.hidden_dim;
        let expected = 2 * args.vocab_size * args.dim
            + args.max_seq_len * args.dim
            + args.n_layers * per_layer
            + args.dim;
        assert_eq!(m.param_count(), expected);
    }

    #[test]
    fn attention_is_causal() {
        let m = Transformer::seeded(tiny(), Precision::F32, 3).unwrap();
        let short = m.forward(&[1, 2, 3]);
        let long = m.forward(&[1, 2, 3, 9, 4]);
        for i in 0..3 {
            for (a, b) in short.row(i).iter().zip(long.row(i).iter()) {
                assert!((a - b).abs() < 1e-5, "position {i} saw future tokens");
            }
        }
    }
}
