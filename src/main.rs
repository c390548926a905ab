//! Binary entrypoint: parses the CLI, initializes logging, builds the
//! cluster client, dispatches to the matching phase, and maps the
//! returned error to a process exit code.

use clap::Parser;
use kubevirt_executor::cli::{Cli, Commands};
use kubevirt_executor::env::JobContext;
use kubevirt_executor::error::ExecutorError;
use kubevirt_executor::{k8s, phases};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("kubevirt_executor=info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Config = cli.command {
        phases::config::run();
        std::process::exit(0);
    }

    match dispatch(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "phase failed");
            let code = e
                .downcast_ref::<ExecutorError>()
                .map(ExecutorError::exit_code)
                .unwrap_or(2);
            eprintln!("error: {e:#}");
            std::process::exit(code);
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Fixed at zero: the per-job id must be reproducible by every phase
    // without any local state, so it is derived only from the stable
    // runner/project/concurrent/job identifiers, never from wall-clock
    // time (see DESIGN.md).
    let ctx = JobContext::from_env(0);
    let namespace = cli.namespace.clone();
    let client = k8s::client().await?;

    match cli.command {
        Commands::Config => unreachable!("handled before dispatch"),
        Commands::Prepare(args) => {
            phases::prepare::run(client, ctx, &args, &namespace).await
        }
        Commands::Run(args) => {
            phases::run::run(client, &namespace, &ctx.id, &args).await
        }
        Commands::Cleanup(args) => {
            phases::cleanup::run(client, &namespace, &ctx.id, &args).await
        }
        Commands::Gc(args) => {
            let report = phases::gc::run(client, &namespace, &args).await?;
            tracing::info!(
                deleted = report.deleted,
                skipped = report.skipped,
                errored = report.errored,
                "gc sweep complete"
            );
            Ok(())
        }
    }
}
