//! Model and tokenizer provisioning.

use log::info;

use crate::checkpoint;
use crate::config::Settings;
use crate::error::{ProvisioningError, ProvisioningResult};
use crate::executor::ModelExecutor;
use crate::model::Transformer;
use crate::template::{ChatTemplate, TemplateKind};
use crate::tokenizer::Tokenizer;
use crate::TokenId;

/// A ready-to-run model with the tokenizer it was provisioned with.
pub struct Provisioned {
    pub executor: ModelExecutor,
    pub tokenizer: Tokenizer,
    pub eos_token_id: TokenId,
}

impl Provisioned {
    pub fn template(&self, kind: TemplateKind) -> ChatTemplate<'_> {
        ChatTemplate::new(&self.tokenizer, kind)
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.vocab_size()
    }
}

/// Load the tokenizer and model described by `settings` and check that they agree.
pub fn provision(settings: &Settings) -> ProvisioningResult<Provisioned> {
    let tokenizer = match &settings.provision.vocab {
        Some(path) => {
            info!("Loading vocabulary from {}", path.display());
            Tokenizer::from_file(path)?
        }
        None => Tokenizer::builtin(),
    };
    let eos_token_id = tokenizer.special_id(&settings.generation.eos_token)?;

    let precision = settings.execution.precision;
    let model = match &settings.provision.checkpoint {
        Some(path) => {
            info!("Loading checkpoint {} at {}", path.display(), precision);
            checkpoint::load(path, precision)?
        }
        None => {
            info!(
                "No checkpoint configured, initialising weights with seed {}",
                settings.provision.seed
            );
            Transformer::seeded(settings.model.clone(), precision, settings.provision.seed)?
        }
    };

    let model_vocab = model.args().vocab_size;
    if model_vocab != tokenizer.vocab_size() {
        return Err(ProvisioningError::VocabMismatch {
            model: model_vocab,
            tokenizer: tokenizer.vocab_size(),
        });
    }

    info!(
        "Model ready: {} layers, dim {}, vocab {}, context {}",
        model.args().n_layers,
        model.args().dim,
        model_vocab,
        model.args().max_seq_len
    );
    Ok(Provisioned {
        executor: ModelExecutor::new(model, settings.execution),
        tokenizer,
        eos_token_id,
    })
}
