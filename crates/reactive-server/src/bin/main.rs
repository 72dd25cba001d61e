//! `reactive-server` entry point: binds the gateway and spawns the kernel
//! subprocess for one notebook.

use std::path::PathBuf;

use clap::Parser;

use reactive_server::{serve, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "reactive-server")]
struct Args {
    /// Host address to bind to.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8765)]
    port: u16,

    /// Path to the `reactive-kernel` binary.
    #[arg(long, default_value = "reactive-kernel")]
    kernel_binary: PathBuf,

    /// Directory holding one `<id>.json` file per notebook.
    #[arg(long, default_value = "./notebooks")]
    storage_dir: PathBuf,

    /// Identifier of the notebook to serve.
    #[arg(long, default_value = "default")]
    notebook_id: String,

    /// Initial database connection string for SQL cells, if any.
    #[arg(long)]
    connection_string: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = ServerConfig {
        host: args.host,
        port: args.port,
        kernel_binary: args.kernel_binary,
        storage_dir: args.storage_dir,
        notebook_id: args.notebook_id,
        connection_string: args.connection_string,
    };

    serve(config).await?;
    Ok(())
}
