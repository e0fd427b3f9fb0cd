//! Generate completions for one prompt or a file of prompts.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use blazeinfer_cli::{init_logging, CommonArgs, Runner};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// Prompt to complete
    #[arg(long, conflicts_with = "input_file")]
    prompt: Option<String>,

    /// Input file with prompts (one per line)
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// System message placed before the user turn
    #[arg(long)]
    system: Option<String>,

    /// Print only the final completion instead of streaming tokens
    #[arg(long)]
    quiet: bool,
}

fn load_prompts(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read prompts from {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let prompts = match (&args.prompt, &args.input_file) {
        (Some(prompt), _) => vec![prompt.clone()],
        (None, Some(path)) => load_prompts(path)?,
        (None, None) => bail!("either --prompt or --input-file is required"),
    };

    let settings = args.common.settings()?;
    let runner = Runner::from_settings(&settings)?.with_system(args.system.clone());

    let stdout = io::stdout();
    for prompt in &prompts {
        if prompts.len() > 1 {
            println!("Prompt: {prompt}");
        }
        if args.quiet {
            let generation = runner.respond(prompt, None)?;
            println!("{}", generation.text);
        } else {
            let mut out = stdout.lock();
            runner.respond(prompt, Some(&mut out))?;
            writeln!(out)?;
        }
        if prompts.len() > 1 {
            println!();
        }
    }
    Ok(())
}
