//! submitthem - inspect PBS submission folders and query job states.

mod status;
mod verify;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use submitthem_cli::{Args, Command};
use submitthem_parsers::TokioRunner;
use submitthem_pbs::Pbs;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> Result<()> {
    // Respects RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    match args.command {
        Command::Verify { folder } => {
            let reports = verify::verify_folder(&folder).into_diagnostic()?;
            if reports.is_empty() {
                println!("No submission scripts in {}", folder);
            }
            let mut bad = 0;
            for report in &reports {
                let kind = match report.array_ranges.first() {
                    Some(range) => format!("array {}", range),
                    None => "single".to_string(),
                };
                println!(
                    "{}  {}  select={}  walltime={}",
                    report.path.file_name().unwrap_or(report.path.as_str()),
                    kind,
                    report.select.as_deref().unwrap_or("-"),
                    report.walltime.as_deref().unwrap_or("-"),
                );
                for problem in report.problems() {
                    bad += 1;
                    println!("    problem: {}", problem);
                }
            }
            if bad > 0 {
                miette::bail!("{} problem(s) found", bad);
            }
        }
        Command::Status {
            ids,
            map_count,
            attempts,
        } => {
            let runner = Arc::new(TokioRunner);
            if !submitthem_pbs::detect(runner.as_ref()).await {
                miette::bail!("qstat is not available; is this a PBS host?");
            }
            let scheduler = Arc::new(Pbs::new());
            let ids = status::resolve_ids(scheduler.as_ref(), &ids, map_count).into_diagnostic()?;
            let lines = status::query(scheduler, runner, &ids, attempts)
                .await
                .into_diagnostic()?;
            for line in lines {
                let mut text = format!("{:<24} {}", line.id.to_string(), line.state);
                if let Some(queue) = &line.queue {
                    text.push_str(&format!("  queue={}", queue));
                }
                if line.preemptions > 0 {
                    text.push_str(&format!("  requeued={}", line.preemptions));
                }
                println!("{}", text);
            }
        }
    }

    Ok(())
}
