//! EML - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use eml_common::logging::{init_logging, LogConfig, LogLevel};
use eml_worker::{
    run_workers, Cli, Commands, DefinitionRepository, JobDescriptor, StopPolicy, WorkerConfig,
    WorkerContext,
};
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("eml")
        .filter_directives("sqlx=warn,hyper=info,reqwest=info")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        }
    };

    if let Err(e) = execute(cli).await {
        error!(error = %format!("{e:#}"), "Command failed");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config =
        WorkerConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Init => {
            let ctx = WorkerContext::connect(&config).await?;
            ctx.init().await?;
            info!(table = ctx.queue.table(), "Tables ready");
            Ok(())
        }

        Commands::Push {
            job,
            delay,
            triggered_by,
        } => {
            let ctx = WorkerContext::connect(&config).await?;
            // Fail on typos now rather than when a worker claims the job
            ctx.definitions.resolve(&job).await?;

            let mut descriptor = JobDescriptor::new(&job);
            if let Some(who) = triggered_by {
                descriptor = descriptor.with_triggered_by(who);
            }
            let eta = descriptor.requested_at.timestamp() + delay.max(0);

            let id = ctx
                .queue
                .push(&descriptor.encode()?, eta)
                .await
                .context("Failed to enqueue job")?;
            info!(id, %job, eta, "Job enqueued");
            println!("{id}");
            Ok(())
        }

        Commands::Work { workers, once } => {
            if let Some(workers) = workers {
                config.worker.workers = workers;
                config.validate()?;
            }
            let ctx = Arc::new(WorkerContext::connect(&config).await?);
            ctx.init().await?;

            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let stop = if once { StopPolicy::WhenIdle } else { StopPolicy::Never };
            let stats = run_workers(ctx, &config.worker, stop, cancel).await?;
            info!(
                claimed = stats.jobs_claimed(),
                succeeded = stats.jobs_succeeded,
                failed = stats.jobs_failed,
                cancelled = stats.jobs_cancelled,
                "All workers stopped"
            );
            Ok(())
        }

        Commands::Run { job } => {
            let ctx = WorkerContext::connect(&config).await?;
            ctx.graphs.init().await.context("Failed to create the graph version table")?;

            let cancel = CancellationToken::new();
            spawn_ctrl_c(cancel.clone());

            let summary = ctx.run_job(&job, &cancel).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }

        Commands::Status => {
            let ctx = WorkerContext::connect(&config).await?;
            let queued = ctx.queue.len().await.context("Failed to count queued jobs")?;

            println!("queue:    {} ({})", ctx.queue.table(), ctx.queue.strategy());
            println!("queued:   {queued}");
            println!("jobs:");
            for id in ctx.definitions.identifiers().await? {
                println!("  {id}");
            }
            Ok(())
        }
    }
}

/// Cancel `token` on Ctrl-C; running pipelines stop at the next chunk
fn spawn_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping after the current chunk");
                token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });
}
