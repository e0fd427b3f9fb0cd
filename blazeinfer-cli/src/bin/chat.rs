//! Interactive prompt loop.
//!
//! Each line is an independent generation run. Lines starting with `!` are
//! commands; `quit` or `/exit` leaves.

use std::io::{self, BufRead, Write};

use anyhow::Result;
use blazeinfer_cli::{init_logging, CommonArgs, Journal, Runner};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// System message placed before every user turn
    #[arg(long)]
    system: Option<String>,
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn show_history(journal: &Journal) {
    match journal.recent(5) {
        Ok(entries) if entries.is_empty() => println!("No generations recorded yet."),
        Ok(entries) => {
            for (i, e) in entries.iter().enumerate() {
                println!("  {}. [{}] {}", i + 1, e.timestamp, truncate(&e.prompt, 50));
                println!(
                    "     -> \"{}\" ({} tokens, {}, {} ms)",
                    truncate(&e.completion, 50),
                    e.generated_tokens,
                    e.stop_reason,
                    e.elapsed_ms
                );
            }
        }
        Err(e) => println!("Error reading journal: {e}"),
    }
}

fn show_stats(runner: &Runner) {
    let executor = &runner.provisioned().executor;
    let args = executor.model().args();
    println!(
        "Model: {} vocab, {} layers, {} dim, context {}, {}, {} new tokens per prompt",
        args.vocab_size,
        args.n_layers,
        args.dim,
        args.max_seq_len,
        executor.precision(),
        runner.max_new_tokens()
    );
    if let Some(journal) = runner.journal() {
        match journal.stats() {
            Ok(stats) => println!(
                "Journal: {} runs, {} tokens, {:.1} KB",
                stats.total_runs,
                stats.total_tokens,
                stats.db_size_bytes as f64 / 1024.0
            ),
            Err(e) => println!("Error reading journal: {e}"),
        }
    }
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();
    let settings = args.common.settings()?;
    let runner = Runner::from_settings(&settings)?.with_system(args.system.clone());

    println!("BlazeInfer naive decoder");
    println!("Commands: 'quit' or '/exit' to leave, '!stats', '!history', '!clear'");
    println!();

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!(">>> ");
        io::stdout().flush()?;

        let input = match lines.next() {
            Some(line) => line?,
            None => break,
        };
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "quit" | "/exit" => break,
            "!stats" => {
                show_stats(&runner);
                continue;
            }
            "!history" | "!clear" if runner.journal().is_none() => {
                println!("No journal configured (use --journal <path>).");
                continue;
            }
            "!history" => {
                if let Some(journal) = runner.journal() {
                    show_history(journal);
                }
                continue;
            }
            "!clear" => {
                if let Some(journal) = runner.journal() {
                    match journal.clear() {
                        Ok(()) => println!("Journal cleared."),
                        Err(e) => println!("Error clearing journal: {e}"),
                    }
                }
                continue;
            }
            _ => {}
        }

        let mut out = io::stdout().lock();
        let result = runner.respond(input, Some(&mut out));
        writeln!(out)?;
        drop(out);
        if let Err(e) = result {
            eprintln!("Error: {e:#}");
        }
        println!();
    }
    Ok(())
}
