use anyhow::Result;
use clap::Parser;
use provision_wizard::cli;
use tracing_subscriber::EnvFilter;

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(format!("provision_wizard={level}")),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("provision_wizard=info")),
    };
    // Logs go to stderr; stdout carries the summary or the JSON report.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_tracing(args.log_level.as_deref());

    // Exit explicitly: a confirmation prompt may still be blocked on stdin,
    // and the runtime would otherwise wait for it on shutdown.
    match cli::run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:?}");
            std::process::exit(1);
        }
    }
}
