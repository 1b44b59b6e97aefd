mod app;

use anyhow::{Context, Result, bail};
use clap::Parser;

use app::{Cli, Command, run_batch, run_check, run_eval, run_filter};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("CLI: Failed to initialize thread pool")?;
    }

    match &cli.command {
        Command::Eval {
            expression,
            rules,
            timestamp,
            macros,
            functionids,
            postfix,
            json,
        } => run_eval(expression, *rules, *timestamp, macros, functionids, *postfix, *json),
        Command::Check { expression, rules } => run_check(expression, *rules),
        Command::Filter {
            filter,
            groups,
            tags,
            macros,
        } => run_filter(filter, groups, tags, macros).map(|_| ()),
        Command::Batch { file } => {
            let start = std::time::Instant::now();
            let outcomes = run_batch(file)?;
            let failed = outcomes.iter().filter(|o| !o.passed).count();
            tracing::info!(
                "Evaluated {} expressions in {:.2?}",
                outcomes.len(),
                start.elapsed()
            );
            if failed > 0 {
                bail!(
                    "CLI: {} of {} expressions did not meet their expectation",
                    failed,
                    outcomes.len()
                );
            }
            Ok(())
        }
    }
}
