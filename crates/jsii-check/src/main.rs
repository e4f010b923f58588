#![forbid(unsafe_code)]
//! Health-check CLI for the jsii runtime kernel: spawns the kernel,
//! performs the version handshake, optionally queries it, and maps
//! failures to distinct exit codes for scripting.

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use jsii_client::{JsiiError, KernelClient};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jsii-check")]
#[command(about = "Spawn the jsii kernel, handshake, and report its runtime version")]
struct Cli {
    /// Kernel executable to use instead of JSII_RUNTIME/PATH discovery.
    #[arg(long)]
    binary: Option<PathBuf>,

    /// Also print kernel statistics after the handshake.
    #[arg(long)]
    stats: bool,

    /// Also print the naming tables for an assembly.
    #[arg(long, value_name = "ASSEMBLY")]
    naming: Option<String>,
}

const EXIT_SPAWN_FAILURE: u8 = 2;
const EXIT_PROTOCOL_ERROR: u8 = 3;
const EXIT_INCOMPATIBLE: u8 = 4;

fn exit_code_for(error: &JsiiError) -> u8 {
    match error {
        JsiiError::EnvMisconfigured { .. } => EXIT_SPAWN_FAILURE,
        JsiiError::IncompatibleRuntime { .. } => EXIT_INCOMPATIBLE,
        _ => EXIT_PROTOCOL_ERROR,
    }
}

async fn run(cli: Cli) -> Result<(), JsiiError> {
    let mut builder = KernelClient::builder();
    if let Some(binary) = cli.binary {
        builder = builder.binary(binary);
    }
    let client = builder.build();

    let version = client.runtime_version().await?;
    println!("jsii runtime {version}");

    if cli.stats {
        let stats = client.stats().await?;
        println!("{stats:#}");
    }

    if let Some(assembly) = cli.naming {
        let naming = client.naming(assembly).await?;
        println!("{naming:#}");
    }

    client.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("jsii-check: {error}");
            ExitCode::from(exit_code_for(&error))
        }
    }
}
