//! Kernel process entry point. Spawned by the coordinator, not invoked
//! directly by a human: stdin carries length-prefixed `KernelCommand`s,
//! stdout carries length-prefixed `CellNotification`s, stderr is reserved
//! for this process's own structured log output.

mod kernel;
mod python_exec;
mod sql_exec;

use std::io::{self, Write};

use clap::Parser;
use reactive_core::{CellNotification, KernelCommand};

use kernel::Kernel;

/// The reactive notebook's isolated executor process.
#[derive(Debug, Parser)]
#[command(name = "reactive-kernel")]
struct Args {
    /// Initial database connection string, if the session already has one configured.
    #[arg(long)]
    connection_string: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let mut kernel = Kernel::new()?;
    if let Some(connection_string) = args.connection_string {
        runtime.block_on(kernel.handle(KernelCommand::SetDatabaseConfig { connection_string }));
    }

    tracing::info!("kernel process ready");

    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();

    loop {
        let command: KernelCommand = match reactive_core::read_message(&mut stdin) {
            Ok(command) => command,
            Err(reactive_core::Error::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::info!("stdin closed, exiting");
                break;
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed command, continuing");
                continue;
            }
        };

        let (notifications, shutdown) = runtime.block_on(kernel.handle(command));
        for notification in &notifications {
            if let Err(e) = write_notification(&mut stdout, notification) {
                tracing::error!(error = %e, "failed to write notification, exiting");
                return Ok(());
            }
        }

        if shutdown {
            tracing::info!("shutdown command received, exiting");
            break;
        }
    }

    Ok(())
}

fn write_notification<W: Write>(writer: &mut W, notification: &CellNotification) -> reactive_core::Result<()> {
    reactive_core::write_message(writer, notification)
}
