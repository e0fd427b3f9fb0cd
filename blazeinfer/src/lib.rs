//! Naive greedy text generation.
//!
//! The decoder re-runs the model over the whole token history at every step,
//! with no cache of intermediate results. It is the baseline that cached and
//! batched engines are measured against.
//!
//! ```no_run
//! use blazeinfer::config::Settings;
//! use blazeinfer::decode::NaiveDecoder;
//! use blazeinfer::provision::provision;
//!
//! let settings = Settings::default();
//! let p = provision(&settings)?;
//! let template = p.template(settings.generation.template);
//! let decoder = NaiveDecoder::new(&p.executor, &template, &p.tokenizer, p.eos_token_id);
//! let text = decoder.generate("hello how are you", 20)?;
//! println!("{text}");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod checkpoint;
pub mod config;
pub mod decode;
pub mod error;
pub mod executor;
pub mod model;
pub mod provision;
pub mod sampling;
pub mod template;
pub mod tokenizer;

/// Index into the model vocabulary.
pub type TokenId = usize;

pub use config::{Device, ExecutionConfig, Precision};
pub use decode::{Generation, NaiveDecoder, StopReason, StreamedToken};
pub use error::{GenerateError, InputValidationError, ModelExecutionError, ProvisioningError};
pub use executor::{ModelExecutor, SequenceModel};
