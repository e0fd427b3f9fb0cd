//! Command-line front end for the naive decoder.
//!
//! The binaries share their flags (`args`), the provisioning and decoding
//! glue (`runner`) and the SQLite generation journal (`journal`).

pub mod args;
pub mod journal;
pub mod runner;

pub use args::{init_logging, CommonArgs};
pub use journal::{Journal, JournalEntry, JournalStats};
pub use runner::Runner;
