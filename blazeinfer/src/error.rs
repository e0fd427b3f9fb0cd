//! Error types for provisioning, model execution and decoding.

use std::path::PathBuf;

use thiserror::Error;

use crate::config::Device;
use crate::TokenId;

/// The model or tokenizer could not be obtained.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("checkpoint is corrupt: {0}")]
    Corrupt(String),

    #[error("unsupported checkpoint version {0}")]
    UnsupportedVersion(u32),

    #[error("vocabulary file '{0}' contains no tokens")]
    EmptyVocabulary(PathBuf),

    #[error("special token '{0}' is not in the vocabulary")]
    MissingSpecialToken(String),

    #[error("model vocabulary ({model}) does not match tokenizer vocabulary ({tokenizer})")]
    VocabMismatch { model: usize, tokenizer: usize },

    #[error("invalid model arguments: {0}")]
    InvalidArgs(String),

    #[error("failed to parse config '{path}': {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ProvisioningError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// A single `score` call failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelExecutionError {
    #[error("cannot score an empty sequence")]
    EmptySequence,

    #[error("sequence length {len} exceeds the maximum context length {max}")]
    ContextOverflow { len: usize, max: usize },

    #[error("token id {token} is outside the vocabulary (size {vocab_size})")]
    TokenOutOfRange { token: TokenId, vocab_size: usize },

    #[error("compute device {0} is unavailable")]
    DeviceUnavailable(Device),

    #[error("score matrix has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("scores at position {position} contain no comparable value")]
    DegenerateScores { position: usize },
}

/// Input rejected before the decode loop starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputValidationError {
    #[error("prompt formatting produced an empty token sequence")]
    EmptyPrompt,
}

/// Failure of a generation run.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Validation(#[from] InputValidationError),

    /// The model failed at `step`; `accepted` holds the tokens generated before it.
    #[error("model execution failed at step {step}: {source}")]
    Execution {
        step: usize,
        accepted: Vec<TokenId>,
        #[source]
        source: ModelExecutionError,
    },
}

impl GenerateError {
    /// Tokens accepted before the failure. Empty for validation errors.
    pub fn partial_tokens(&self) -> &[TokenId] {
        match self {
            Self::Validation(_) => &[],
            Self::Execution { accepted, .. } => accepted,
        }
    }

    /// The underlying execution error, if the model failed.
    pub fn execution_error(&self) -> Option<&ModelExecutionError> {
        match self {
            Self::Validation(_) => None,
            Self::Execution { source, .. } => Some(source),
        }
    }
}

pub type ProvisioningResult<T> = Result<T, ProvisioningError>;
