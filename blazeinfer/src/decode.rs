//! Naive autoregressive decoding.
//!
//! Every step re-submits the full token history (prompt plus everything
//! generated so far) to the model, takes the scores of the last position and
//! greedily appends the best token. There is no cache: a run of N steps does
//! N full forward passes over sequences of growing length.

use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error::{GenerateError, InputValidationError, ModelExecutionError};
use crate::executor::SequenceModel;
use crate::sampling::greedy_argmax;
use crate::TokenId;

/// Turns a free-form prompt into the initial token sequence.
pub trait PromptFormatter {
    fn format(&self, prompt: &str) -> Vec<TokenId>;
}

/// Turns token ids back into text. An empty slice gives an empty string.
pub trait Detokenizer {
    fn detokenize(&self, ids: &[TokenId]) -> String;
}

/// A token accepted by the decoder, as seen by a [`TokenObserver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamedToken {
    pub step: usize,
    pub id: TokenId,
    pub text: String,
}

/// Side channel notified once per accepted token.
pub trait TokenObserver {
    fn on_token(&mut self, token: &StreamedToken);
}

impl<F: FnMut(&StreamedToken)> TokenObserver for F {
    fn on_token(&mut self, token: &StreamedToken) {
        self(token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The model selected the end-of-sequence token.
    EndOfSequence,
    /// `max_new_tokens` tokens were generated.
    MaxNewTokens,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EndOfSequence => "eos",
            Self::MaxNewTokens => "max_new_tokens",
        }
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Generated ids only, without the prompt and never containing eos.
    pub tokens: Vec<TokenId>,
    pub stop_reason: StopReason,
    pub prompt_len: usize,
    pub model_calls: usize,
    pub elapsed: Duration,
}

/// Greedy, cache-free decoder over a borrowed [`SequenceModel`].
pub struct NaiveDecoder<'a, M: ?Sized> {
    model: &'a M,
    formatter: &'a dyn PromptFormatter,
    detokenizer: &'a dyn Detokenizer,
    eos_token_id: TokenId,
}

impl<'a, M: SequenceModel + ?Sized> NaiveDecoder<'a, M> {
    pub fn new(
        model: &'a M,
        formatter: &'a dyn PromptFormatter,
        detokenizer: &'a dyn Detokenizer,
        eos_token_id: TokenId,
    ) -> Self {
        Self {
            model,
            formatter,
            detokenizer,
            eos_token_id,
        }
    }

    /// Generated text for `prompt`.
    pub fn generate(&self, prompt: &str, max_new_tokens: usize) -> Result<String, GenerateError> {
        self.run(prompt, max_new_tokens).map(|g| g.text)
    }

    pub fn run(&self, prompt: &str, max_new_tokens: usize) -> Result<Generation, GenerateError> {
        self.run_streaming(prompt, max_new_tokens, &mut |_: &StreamedToken| {})
    }

    /// Like [`run`](Self::run), notifying `observer` of each accepted token.
    pub fn run_streaming(
        &self,
        prompt: &str,
        max_new_tokens: usize,
        observer: &mut dyn TokenObserver,
    ) -> Result<Generation, GenerateError> {
        let sequence = self.formatter.format(prompt);
        self.decode(sequence, max_new_tokens, observer)
    }

    /// Decode from an already formatted token sequence.
    pub fn decode(
        &self,
        mut sequence: Vec<TokenId>,
        max_new_tokens: usize,
        observer: &mut dyn TokenObserver,
    ) -> Result<Generation, GenerateError> {
        if sequence.is_empty() {
            return Err(InputValidationError::EmptyPrompt.into());
        }
        let started = Instant::now();
        let prompt_len = sequence.len();
        info!(
            "Decoding: {} prompt tokens, up to {} new tokens",
            prompt_len, max_new_tokens
        );

        let mut generated = Vec::new();
        let mut stop_reason = StopReason::MaxNewTokens;
        let mut model_calls = 0;

        for step in 0..max_new_tokens {
            model_calls += 1;
            let next = match self.next_token(&sequence) {
                Ok(next) => next,
                Err(source) => {
                    warn!("Step {step} failed after {} accepted tokens: {source}", generated.len());
                    return Err(GenerateError::Execution {
                        step,
                        accepted: generated,
                        source,
                    });
                }
            };

            if next == self.eos_token_id {
                debug!("Step {step}: end of sequence");
                stop_reason = StopReason::EndOfSequence;
                break;
            }

            sequence.push(next);
            generated.push(next);
            observer.on_token(&StreamedToken {
                step,
                id: next,
                text: self.detokenizer.detokenize(&[next]),
            });
        }

        let elapsed = started.elapsed();
        info!(
            "Generated {} tokens in {:.2}ms ({})",
            generated.len(),
            elapsed.as_secs_f64() * 1000.0,
            stop_reason.as_str()
        );
        Ok(Generation {
            text: self.detokenizer.detokenize(&generated),
            tokens: generated,
            stop_reason,
            prompt_len,
            model_calls,
            elapsed,
        })
    }

    /// Score the whole sequence and pick the best continuation of its last position.
    fn next_token(&self, sequence: &[TokenId]) -> Result<TokenId, ModelExecutionError> {
        let scores = self.model.score(sequence)?;
        let expected = (sequence.len(), self.model.vocab_size());
        if scores.dim() != expected {
            return Err(ModelExecutionError::ShapeMismatch {
                expected,
                actual: scores.dim(),
            });
        }
        let position = sequence.len() - 1;
        let last = scores.row(position);
        let next = greedy_argmax(last).ok_or(ModelExecutionError::DegenerateScores { position })?;
        debug!(
            "len={} next_token_id={} score={}",
            sequence.len(),
            next,
            last[next]
        );
        Ok(next)
    }
}
