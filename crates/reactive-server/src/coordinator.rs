//! The coordinator: owns one kernel subprocess per notebook session, mirrors
//! each cell's code and last-known status, and runs the single task that
//! drains the kernel's notification stream and rebroadcasts it to every
//! connected client.
//!
//! Commands flow one way, coordinator to kernel, fire-and-forget: there are
//! no correlation IDs and no per-request futures. The only thing ever
//! `await`ed on a command is the write to the kernel's stdin pipe succeeding;
//! the resulting notifications arrive later, asynchronously, on the drain
//! loop, exactly as the kernel decides to emit them.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command};
use tokio::sync::{broadcast, Mutex};

use reactive_core::{CellNotification, CellStatus, Channel, KernelCommand, Language};

use crate::error::{ServerError, ServerResult};
use crate::protocol::{CellStatusWire, CellSummary, CellUpdatedPayload, ServerMessage};
use crate::storage::{NotebookStore, StoredCell, StoredNotebook};

const BROADCAST_CAPACITY: usize = 256;

/// The coordinator's mirror of one cell. Execution results themselves are
/// never buffered here; they are only ever streamed through as they arrive.
#[derive(Debug, Clone)]
struct CellMirror {
    code: String,
    cell_type: Language,
    status: CellStatus,
    reads: Vec<String>,
    writes: Vec<String>,
}

pub struct Coordinator {
    notebook_id: String,
    cells: Mutex<BTreeMap<String, CellMirror>>,
    order: Mutex<Vec<String>>,
    db_connection: Mutex<Option<String>>,
    stdin: Mutex<ChildStdin>,
    tx: broadcast::Sender<ServerMessage>,
    store: Arc<dyn NotebookStore>,
}

impl Coordinator {
    /// Spawns the kernel subprocess, replays the notebook's stored cells
    /// into it in order, and starts the background notification drain.
    pub async fn spawn(
        kernel_binary: &Path,
        store: Arc<dyn NotebookStore>,
        notebook_id: String,
    ) -> ServerResult<Arc<Self>> {
        let mut child = Command::new(kernel_binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().expect("kernel spawned with piped stdin");
        let stdout = child.stdout.take().expect("kernel spawned with piped stdout");

        // The child handle itself is intentionally dropped here: `kill_on_drop`
        // only matters while the handle is live, and the drain loop below
        // observes process exit through a closed stdout pipe instead of
        // through `Child::wait`, so nothing needs to hold onto it.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        let (tx, _rx) = broadcast::channel(BROADCAST_CAPACITY);

        let notebook = store.load(&notebook_id)?;

        let coordinator = Arc::new(Self {
            notebook_id,
            cells: Mutex::new(BTreeMap::new()),
            order: Mutex::new(Vec::new()),
            db_connection: Mutex::new(None),
            stdin: Mutex::new(stdin),
            tx,
            store,
        });

        tokio::spawn(Coordinator::drain_loop(coordinator.clone(), stdout));

        if let Some(notebook) = notebook {
            if let Some(connection_string) = notebook.db_connection {
                coordinator.update_db_connection_quiet(connection_string).await?;
            }
            for cell in notebook.cells {
                coordinator.order.lock().await.push(cell.id.clone());
                coordinator.register_cell(cell.id, cell.code, cell.cell_type).await?;
            }
        }

        Ok(coordinator)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.tx.subscribe()
    }

    /// Acks a client's `authenticate` message. A no-op beyond the ack itself:
    /// this coordinator is already scoped to one session, so there is no
    /// credential to check.
    pub fn authenticate(&self) {
        let _ = self.tx.send(ServerMessage::Authenticated);
    }

    /// Tears down this coordinator's kernel. A session is one WebSocket bound
    /// to one coordinator and one kernel process; when the socket closes,
    /// the kernel goes with it rather than lingering for a reconnect to find.
    pub async fn shutdown(&self) {
        if let Err(e) = self.send_command(KernelCommand::Shutdown).await {
            tracing::warn!(error = %e, "failed to signal kernel shutdown");
        }
    }

    /// Replays the current notebook as a sequence of `cell_created` events,
    /// for a client that connects after the notebook already has cells.
    pub async fn initial_snapshot(&self) -> Vec<ServerMessage> {
        let order = self.order.lock().await;
        let cells = self.cells.lock().await;
        order
            .iter()
            .filter_map(|id| {
                cells.get(id).map(|mirror| ServerMessage::CellCreated {
                    cell_id: id.clone(),
                    cell: CellSummary {
                        code: mirror.code.clone(),
                        cell_type: mirror.cell_type,
                        status: mirror.status.into(),
                    },
                    index: None,
                })
            })
            .collect()
    }

    pub async fn register_cell(&self, cell_id: String, code: String, cell_type: Language) -> ServerResult<()> {
        {
            let mut cells = self.cells.lock().await;
            cells.insert(
                cell_id.clone(),
                CellMirror {
                    code: code.clone(),
                    cell_type,
                    status: CellStatus::Idle,
                    reads: Vec::new(),
                    writes: Vec::new(),
                },
            );
        }
        self.send_command(KernelCommand::RegisterCell { cell_id, code, cell_type }).await
    }

    pub async fn update_cell(&self, cell_id: String, code: String) -> ServerResult<()> {
        let cell_type = {
            let cells = self.cells.lock().await;
            cells
                .get(&cell_id)
                .map(|mirror| mirror.cell_type)
                .ok_or_else(|| ServerError::CellNotFound(cell_id.clone()))?
        };
        self.register_cell(cell_id, code, cell_type).await?;
        self.persist().await
    }

    pub async fn create_cell(&self, cell_type: Language, after_cell_id: Option<String>) -> ServerResult<()> {
        let cell_id = uuid::Uuid::new_v4().to_string();
        let index = {
            let mut order = self.order.lock().await;
            let index = match &after_cell_id {
                Some(after) => order.iter().position(|id| id == after).map(|i| i + 1).unwrap_or(order.len()),
                None => order.len(),
            };
            order.insert(index, cell_id.clone());
            index
        };
        self.register_cell(cell_id.clone(), String::new(), cell_type).await?;
        self.persist().await?;

        let _ = self.tx.send(ServerMessage::CellCreated {
            cell_id,
            cell: CellSummary {
                code: String::new(),
                cell_type,
                status: CellStatusWire::Idle,
            },
            index: Some(index),
        });
        Ok(())
    }

    pub async fn delete_cell(&self, cell_id: String) -> ServerResult<()> {
        self.cells.lock().await.remove(&cell_id);
        self.order.lock().await.retain(|id| id != &cell_id);
        self.send_command(KernelCommand::RemoveCell { cell_id: cell_id.clone() }).await?;
        self.persist().await?;
        let _ = self.tx.send(ServerMessage::CellDeleted { cell_id });
        Ok(())
    }

    pub async fn run_cell(&self, cell_id: String) -> ServerResult<()> {
        let (code, cell_type) = {
            let cells = self.cells.lock().await;
            let mirror = cells.get(&cell_id).ok_or_else(|| ServerError::CellNotFound(cell_id.clone()))?;
            (mirror.code.clone(), mirror.cell_type)
        };
        self.send_command(KernelCommand::Execute { cell_id, code, cell_type }).await
    }

    pub async fn update_db_connection(&self, connection_string: String) -> ServerResult<()> {
        self.update_db_connection_quiet(connection_string).await?;
        self.persist().await
    }

    async fn update_db_connection_quiet(&self, connection_string: String) -> ServerResult<()> {
        *self.db_connection.lock().await = Some(connection_string.clone());
        self.send_command(KernelCommand::SetDatabaseConfig { connection_string }).await
    }

    async fn send_command(&self, command: KernelCommand) -> ServerResult<()> {
        let mut stdin = self.stdin.lock().await;
        write_command(&mut *stdin, &command).await
    }

    async fn persist(&self) -> ServerResult<()> {
        let order = self.order.lock().await.clone();
        let cells = self.cells.lock().await;
        let stored_cells = order
            .iter()
            .filter_map(|id| {
                cells.get(id).map(|mirror| StoredCell {
                    id: id.clone(),
                    cell_type: mirror.cell_type,
                    code: mirror.code.clone(),
                })
            })
            .collect();
        drop(cells);

        let notebook = StoredNotebook {
            id: self.notebook_id.clone(),
            name: None,
            db_connection: self.db_connection.lock().await.clone(),
            cells: stored_cells,
        };

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.save(&notebook))
            .await
            .map_err(|e| ServerError::Storage(e.to_string()))??;
        Ok(())
    }

    async fn drain_loop(self_: Arc<Self>, stdout: ChildStdout) {
        let mut reader = BufReader::new(stdout);
        loop {
            match read_notification(&mut reader).await {
                Ok(notification) => self_.apply_notification(notification).await,
                Err(e) => {
                    tracing::warn!(error = %e, "kernel notification stream ended");
                    let _ = self_.tx.send(ServerMessage::KernelError { error: e.to_string() });
                    break;
                }
            }
        }
    }

    async fn apply_notification(&self, notification: CellNotification) {
        let cell_id = notification.cell_id;
        let payload = notification.output;

        let message = match payload.channel {
            Channel::Status => {
                let status = payload.data.as_str().and_then(parse_status);
                let Some(status) = status else { return };
                if let Some(mirror) = self.cells.lock().await.get_mut(&cell_id) {
                    mirror.status = status;
                }
                Some(ServerMessage::CellStatus { cell_id, status: status.into() })
            }
            Channel::Stdout => payload
                .data
                .as_str()
                .map(|text| ServerMessage::CellStdout { cell_id, data: text.to_string() }),
            Channel::Output => serde_json::from_value(payload.data).ok().map(|output| ServerMessage::CellOutput { cell_id, output }),
            Channel::Error => payload
                .data
                .as_str()
                .map(|text| ServerMessage::CellError { cell_id, error: text.to_string(), traceback: None }),
            Channel::Metadata => {
                let reads = string_array(&payload.data, "reads");
                let writes = string_array(&payload.data, "writes");
                if let Some(mirror) = self.cells.lock().await.get_mut(&cell_id) {
                    mirror.reads = reads.clone();
                    mirror.writes = writes.clone();
                }
                Some(ServerMessage::CellUpdated {
                    cell_id,
                    cell: CellUpdatedPayload { code: None, reads, writes },
                })
            }
        };

        if let Some(message) = message {
            let _ = self.tx.send(message);
        }
    }
}

fn parse_status(s: &str) -> Option<CellStatus> {
    Some(match s {
        "idle" => CellStatus::Idle,
        "running" => CellStatus::Running,
        "success" => CellStatus::Success,
        "error" => CellStatus::Error,
        "blocked" => CellStatus::Blocked,
        _ => return None,
    })
}

fn string_array(value: &serde_json::Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// Async counterpart to [`reactive_core::write_message`]: same 4-byte
/// length-prefixed JSON framing, written over a Tokio pipe instead of a
/// blocking `std::io::Write`.
async fn write_command<W: tokio::io::AsyncWrite + Unpin>(writer: &mut W, command: &KernelCommand) -> ServerResult<()> {
    let bytes = serde_json::to_vec(command)?;
    writer.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Async counterpart to [`reactive_core::read_message`].
async fn read_notification<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> ServerResult<CellNotification> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
