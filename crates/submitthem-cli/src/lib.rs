//! CLI argument parsing for submitthem.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "submitthem")]
#[command(about = "Inspect PBS submission folders and query job states")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check the submission scripts written to a job folder
    Verify {
        /// Job folder
        #[arg(default_value = ".")]
        folder: Utf8PathBuf,
    },
    /// Print the state of one or more jobs
    Status {
        /// Job ids, as printed by qsub
        #[arg(required = true)]
        ids: Vec<String>,

        /// Number of tasks, to expand `<id>[]` array ids
        #[arg(long)]
        map_count: Option<u32>,

        /// Attempts per status query
        #[arg(long, default_value = "3")]
        attempts: u32,
    },
}
