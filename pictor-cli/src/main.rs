use anyhow::{bail, Result};
use clap::Parser;
use pictor_cli::app::{build_config, build_loader, run};
use pictor_cli::args::Args;
use tracing::info;

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("pictor={log_level},pictor_cli={log_level},pictor_engine={log_level}").into()
            }),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    info!("Starting pictor {}", env!("CARGO_PKG_VERSION"));

    let config = build_config(&args)?;
    let loader = build_loader(config)?;
    let reports = run(&args, &loader.handle()).await;
    loader.shutdown();

    for report in &reports {
        if args.json {
            println!("{}", serde_json::to_string(report)?);
        } else {
            println!("{}", report.to_line());
        }
    }

    let failed = reports.iter().filter(|r| !r.is_ok()).count();
    if failed > 0 {
        bail!("{failed} of {} loads failed", reports.len());
    }
    Ok(())
}
