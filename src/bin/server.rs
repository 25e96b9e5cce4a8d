//! The remora key/value server binary.

use std::net::IpAddr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use remora::runtime::{RuntimeConfig, ValidationMode};
use remora::server::{Server, ServerConfig, ServerError};

#[derive(Debug, Parser)]
#[command(
    name = "remora-server",
    about = "In-memory key/value server with redundant-execution validation"
)]
struct Args {
    /// Bind address.
    #[arg(long, default_value = "0.0.0.0")]
    host: IpAddr,

    /// Base listen port; group i listens on port + i.
    #[arg(long, default_value_t = 9200)]
    port: u16,

    /// Number of (application thread, listen port) groups.
    #[arg(long, default_value_t = 3)]
    ngroups: usize,

    /// Bucket count of the key/value table. Power of two.
    #[arg(long, default_value_t = 1 << 24)]
    capacity: usize,

    /// Withhold each response until its frame has been validated.
    #[arg(long)]
    sync: bool,

    /// Percentage of asynchronously produced frames to validate.
    #[arg(long, default_value_t = 100, conflicts_with = "sync")]
    sampling: u8,

    /// Cap on frames being validated concurrently across the process.
    #[arg(long)]
    max_validators: Option<usize>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(Args::parse()) {
        tracing::error!(%err, "server failed to start");
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), ServerError> {
    let mode = if args.sync {
        ValidationMode::Synchronous
    } else {
        ValidationMode::Asynchronous {
            sampling_percent: args.sampling,
        }
    };

    let server = Server::spawn(ServerConfig {
        host: args.host,
        port: args.port,
        ngroups: args.ngroups,
        capacity: args.capacity,
        runtime: RuntimeConfig {
            mode,
            max_concurrent_validations: args.max_validators,
        },
    })?;

    server.wait();
    Ok(())
}
