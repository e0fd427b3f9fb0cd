//! Command-line options shared by every binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use blazeinfer::config::{Device, Precision, Settings};
use blazeinfer::template::TemplateKind;
use clap::Args;

/// Flags layered over the settings file.
#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// TOML settings file (defaults to ./blazeinfer.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Checkpoint written by `convert`
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Vocabulary file, one token per line
    #[arg(long)]
    pub vocab: Option<PathBuf>,

    /// cpu, auto or accelerator:<id>
    #[arg(long)]
    pub device: Option<Device>,

    /// f16, bf16 or f32
    #[arg(long)]
    pub precision: Option<Precision>,

    /// chatml or plain
    #[arg(long)]
    pub template: Option<TemplateKind>,

    /// Maximum new tokens per prompt
    #[arg(long)]
    pub max_new_tokens: Option<usize>,

    /// Seed for random weights when no checkpoint is given
    #[arg(long)]
    pub seed: Option<u64>,

    /// SQLite file recording each generation
    #[arg(long)]
    pub journal: Option<PathBuf>,
}

impl CommonArgs {
    /// Settings from file (or defaults) with flags applied on top.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings =
            Settings::discover(self.config.as_deref()).context("failed to load settings")?;
        self.apply(&mut settings);
        Ok(settings)
    }

    pub fn apply(&self, settings: &mut Settings) {
        if let Some(path) = &self.checkpoint {
            settings.provision.checkpoint = Some(path.clone());
        }
        if let Some(path) = &self.vocab {
            settings.provision.vocab = Some(path.clone());
        }
        if let Some(device) = self.device {
            settings.execution.device = device;
        }
        if let Some(precision) = self.precision {
            settings.execution.precision = precision;
        }
        if let Some(template) = self.template {
            settings.generation.template = template;
        }
        if let Some(n) = self.max_new_tokens {
            settings.generation.max_new_tokens = n;
        }
        if let Some(seed) = self.seed {
            settings.provision.seed = seed;
        }
        if let Some(path) = &self.journal {
            settings.journal.path = Some(path.clone());
        }
    }
}

/// Install the logger. Binaries own its lifecycle; `RUST_LOG` overrides.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
