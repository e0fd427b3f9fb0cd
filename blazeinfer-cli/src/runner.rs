//! Glue between the binaries and the decoder.

use std::io::Write;

use anyhow::{Context, Result};
use blazeinfer::config::Settings;
use blazeinfer::decode::{NaiveDecoder, StreamedToken};
use blazeinfer::provision::{provision, Provisioned};
use blazeinfer::template::TemplateKind;
use blazeinfer::{GenerateError, Generation};
use log::warn;

use crate::journal::Journal;

/// A provisioned model plus the per-prompt settings of one session.
pub struct Runner {
    provisioned: Provisioned,
    template: TemplateKind,
    system: Option<String>,
    max_new_tokens: usize,
    journal: Option<Journal>,
}

impl Runner {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provisioned = provision(settings).context("failed to provision model")?;
        let journal = match &settings.journal.path {
            Some(path) => Some(
                Journal::open(path)
                    .with_context(|| format!("failed to open journal {}", path.display()))?,
            ),
            None => None,
        };
        Ok(Self {
            provisioned,
            template: settings.generation.template,
            system: None,
            max_new_tokens: settings.generation.max_new_tokens,
            journal,
        })
    }

    pub fn with_system(mut self, system: Option<String>) -> Self {
        self.system = system;
        self
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    pub fn provisioned(&self) -> &Provisioned {
        &self.provisioned
    }

    pub fn max_new_tokens(&self) -> usize {
        self.max_new_tokens
    }

    /// Generate a completion for `prompt`. When `stream` is given each token is
    /// written to it as soon as it is accepted.
    pub fn respond(&self, prompt: &str, stream: Option<&mut dyn Write>) -> Result<Generation> {
        let p = &self.provisioned;
        let mut template = p.template(self.template);
        if let Some(system) = &self.system {
            template = template.with_system(system.clone());
        }
        let decoder = NaiveDecoder::new(&p.executor, &template, &p.tokenizer, p.eos_token_id);

        let result = match stream {
            Some(out) => {
                let mut write_failed = false;
                let mut observer = |t: &StreamedToken| {
                    if write_failed {
                        return;
                    }
                    let sep = if t.step == 0 { "" } else { " " };
                    // display only; a broken pipe must not change the result
                    if write!(out, "{sep}{}", t.text).and_then(|_| out.flush()).is_err() {
                        write_failed = true;
                    }
                };
                decoder.run_streaming(prompt, self.max_new_tokens, &mut observer)
            }
            None => decoder.run(prompt, self.max_new_tokens),
        };

        match result {
            Ok(generation) => {
                if let Some(journal) = &self.journal {
                    if let Err(e) = journal.record(prompt, &generation) {
                        warn!("Failed to record generation in journal: {e}");
                    }
                }
                Ok(generation)
            }
            Err(err) => Err(self.describe_failure(err)),
        }
    }

    fn describe_failure(&self, err: GenerateError) -> anyhow::Error {
        let partial = self.provisioned.tokenizer.decode(err.partial_tokens());
        let accepted = err.partial_tokens().len();
        let err = anyhow::Error::new(err);
        if accepted == 0 {
            err.context("generation failed")
        } else {
            err.context(format!(
                "generation failed after {accepted} tokens; partial output: {partial}"
            ))
        }
    }
}
