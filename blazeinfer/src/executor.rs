//! Sequence scoring.
//!
//! `SequenceModel` is the contract the decoder relies on: hand over the whole
//! token history, get back one row of scores per position. `ModelExecutor`
//! implements it on top of the reference [`Transformer`], running a full
//! forward pass on every call with no state kept in between.

use std::time::Instant;

use log::{debug, trace};
use ndarray::Array2;

use crate::config::{ExecutionConfig, Precision};
use crate::error::ModelExecutionError;
use crate::model::Transformer;
use crate::TokenId;

/// Maps a token sequence to next-token scores for every position.
pub trait SequenceModel {
    fn vocab_size(&self) -> usize;

    fn max_context_len(&self) -> usize;

    /// Scores of shape `(sequence.len(), vocab_size)`. Row `i` predicts the
    /// token following `sequence[i]`.
    fn score(&self, sequence: &[TokenId]) -> Result<Array2<f32>, ModelExecutionError>;
}

impl<M: SequenceModel + ?Sized> SequenceModel for &M {
    fn vocab_size(&self) -> usize {
        (**self).vocab_size()
    }

    fn max_context_len(&self) -> usize {
        (**self).max_context_len()
    }

    fn score(&self, sequence: &[TokenId]) -> Result<Array2<f32>, ModelExecutionError> {
        (**self).score(sequence)
    }
}

/// Check the input constraints shared by every model.
pub fn validate_sequence(
    sequence: &[TokenId],
    vocab_size: usize,
    max_context_len: usize,
) -> Result<(), ModelExecutionError> {
    if sequence.is_empty() {
        return Err(ModelExecutionError::EmptySequence);
    }
    if sequence.len() > max_context_len {
        return Err(ModelExecutionError::ContextOverflow {
            len: sequence.len(),
            max: max_context_len,
        });
    }
    if let Some(&token) = sequence.iter().find(|&&t| t >= vocab_size) {
        return Err(ModelExecutionError::TokenOutOfRange { token, vocab_size });
    }
    Ok(())
}

/// Runs the transformer on the configured device, one full pass per call.
pub struct ModelExecutor {
    model: Transformer,
    config: ExecutionConfig,
}

impl ModelExecutor {
    /// Place an already loaded model. The model's parameters must have been
    /// built at `config.precision`.
    pub fn new(model: Transformer, config: ExecutionConfig) -> Self {
        if model.precision() != config.precision {
            log::warn!(
                "model parameters are {} but execution precision is {}",
                model.precision(),
                config.precision
            );
        }
        debug!(
            "Executor ready on {} ({}), {} parameters",
            config.device.resolve(),
            config.precision,
            model.param_count()
        );
        Self { model, config }
    }

    pub fn precision(&self) -> Precision {
        self.config.precision
    }

    pub fn model(&self) -> &Transformer {
        &self.model
    }
}

impl SequenceModel for ModelExecutor {
    fn vocab_size(&self) -> usize {
        self.model.args().vocab_size
    }

    fn max_context_len(&self) -> usize {
        self.model.args().max_seq_len
    }

    fn score(&self, sequence: &[TokenId]) -> Result<Array2<f32>, ModelExecutionError> {
        let device = self.config.device;
        if !device.is_available() {
            return Err(ModelExecutionError::DeviceUnavailable(device));
        }
        validate_sequence(sequence, self.vocab_size(), self.max_context_len())?;

        let started = Instant::now();
        let logits = self.model.forward(sequence);
        trace!(
            "Scored {} positions in {:.2}ms",
            sequence.len(),
            started.elapsed().as_secs_f64() * 1000.0
        );
        Ok(logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Device;
    use crate::model::ModelArgs;

    fn executor(device: Device, precision: Precision) -> ModelExecutor {
        let args = ModelArgs {
            max_seq_len: 8,
            vocab_size: 12,
            dim: 8,
            n_layers: 1,
            n_heads: 2,
            hidden_dim: 16,
        };
        let model = Transformer::seeded(args, precision, 11).unwrap();
        ModelExecutor::new(model, ExecutionConfig::new(device, precision))
    }

    #[test]
    fn score_shape() {
        let exec = executor(Device::Cpu, Precision::F16);
        let scores = exec.score(&[1, 2, 3]).unwrap();
        assert_eq!(scores.dim(), (3, 12));
    }

    #[test]
    fn score_is_deterministic() {
        let exec = executor(Device::Auto, Precision::F16);
        let a = exec.score(&[4, 5, 6, 7]).unwrap();
        let b = exec.score(&[4, 5, 6, 7]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn half_precision_outputs_are_representable() {
        let exec = executor(Device::Cpu, Precision::F16);
        let scores = exec.score(&[0, 1]).unwrap();
        assert!(scores.iter().all(|&v| Precision::F16.round(v) == v));
    }

    #[test]
    fn rejects_invalid_sequences() {
        let exec = executor(Device::Cpu, Precision::F32);
        assert_eq!(exec.score(&[]), Err(ModelExecutionError::EmptySequence));
        assert_eq!(
            exec.score(&[0; 9]),
            Err(ModelExecutionError::ContextOverflow { len: 9, max: 8 })
        );
        assert_eq!(
            exec.score(&[0, 12]),
            Err(ModelExecutionError::TokenOutOfRange {
                token: 12,
                vocab_size: 12
            })
        );
        assert!(exec.score(&[0; 8]).is_ok());
    }

    #[test]
    fn accelerator_is_unavailable() {
        let exec = executor(Device::Accelerator(0), Precision::F16);
        assert_eq!(
            exec.score(&[1]),
            Err(ModelExecutionError::DeviceUnavailable(Device::Accelerator(0)))
        );
    }
}
