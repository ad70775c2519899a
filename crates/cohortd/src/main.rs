use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use cohort_executor::{CardinalityMap, ValueStoreExecutor};
use cohortd::{default_service_id, serve, ExecutorService, ServerConfig};

#[derive(Parser)]
#[command(name = "cohortd")]
#[command(about = "Executor registry and dispatch daemon.", long_about = None)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8740")]
    listen: SocketAddr,

    /// Service instance id embedded in executor identifiers. Defaults to
    /// pid plus startup time.
    #[arg(long)]
    service_id: Option<String>,

    /// Upper bound on one request line, in bytes.
    #[arg(long, default_value_t = 4 * 1024 * 1024)]
    max_request_bytes: usize,
}

fn main() -> std::process::ExitCode {
    match try_main() {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cohortd: {err:#}");
            std::process::ExitCode::from(1)
        }
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let service_id = cli.service_id.unwrap_or_else(default_service_id);

    let factory = Box::new(|cardinalities: &CardinalityMap| {
        ValueStoreExecutor::new(cardinalities)
            .map(|ex| Arc::new(ex) as Arc<dyn cohort_executor::Executor>)
    });
    let service = Arc::new(ExecutorService::new(service_id, factory));

    serve(
        service,
        ServerConfig {
            listen: cli.listen,
            max_request_bytes: cli.max_request_bytes,
        },
    )
    .context("serve")
}
