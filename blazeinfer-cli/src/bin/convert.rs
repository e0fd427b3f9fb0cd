//! Write a freshly initialised checkpoint.
//!
//! Model dimensions come from the settings file with flags on top; weights
//! are drawn from a seeded generator and stored at the chosen precision.

use std::path::PathBuf;

use anyhow::{Context, Result};
use blazeinfer::checkpoint;
use blazeinfer::config::{Precision, Settings};
use blazeinfer::model::Transformer;
use blazeinfer::tokenizer::Tokenizer;
use blazeinfer_cli::init_logging;
use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Output file for the checkpoint
    #[arg(long, default_value = "model.blz")]
    out: PathBuf,

    /// TOML settings file providing the [model] section
    #[arg(long)]
    config: Option<PathBuf>,

    /// Size the vocabulary to match this vocabulary file
    #[arg(long)]
    vocab: Option<PathBuf>,

    #[arg(long)]
    max_seq_len: Option<usize>,

    #[arg(long)]
    dim: Option<usize>,

    #[arg(long)]
    n_layers: Option<usize>,

    #[arg(long)]
    n_heads: Option<usize>,

    #[arg(long)]
    hidden_dim: Option<usize>,

    /// f16, bf16 or f32
    #[arg(long)]
    precision: Option<Precision>,

    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let settings = Settings::discover(args.config.as_deref()).context("failed to load settings")?;

    let mut model_args = settings.model.clone();
    if let Some(path) = &args.vocab {
        model_args.vocab_size = Tokenizer::from_file(path)?.vocab_size();
    }
    for (field, value) in [
        (&mut model_args.max_seq_len, args.max_seq_len),
        (&mut model_args.dim, args.dim),
        (&mut model_args.n_layers, args.n_layers),
        (&mut model_args.n_heads, args.n_heads),
        (&mut model_args.hidden_dim, args.hidden_dim),
    ] {
        if let Some(v) = value {
            *field = v;
        }
    }
    let precision = args.precision.unwrap_or(settings.execution.precision);
    let seed = args.seed.unwrap_or(settings.provision.seed);

    let model = Transformer::seeded(model_args, precision, seed)?;
    checkpoint::save(&model, &args.out)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    info!(
        "Wrote {} parameters ({}) to {}",
        model.param_count(),
        precision,
        args.out.display()
    );
    println!("Saved checkpoint to {:?}", args.out);
    Ok(())
}
