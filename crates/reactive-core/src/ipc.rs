//! Kernel IPC: two unidirectional, typed, FIFO queues of JSON-serializable
//! messages carried over the kernel subprocess's stdin/stdout pipes.
//!
//! Framing is a 4-byte little-endian length prefix followed by the UTF-8 JSON
//! body, the same shape as a plain length-prefixed binary protocol. The
//! kernel's stderr is a separate stream reserved for its own log output and
//! is never read as protocol data.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cell::Language;
use crate::error::{Error, Result};

/// A command sent from the coordinator to the kernel process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelCommand {
    RegisterCell {
        cell_id: String,
        code: String,
        cell_type: Language,
    },
    RemoveCell {
        cell_id: String,
    },
    Execute {
        cell_id: String,
        code: String,
        cell_type: Language,
    },
    SetDatabaseConfig {
        connection_string: String,
    },
    Shutdown,
}

/// The channel a notification's payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Status,
    Stdout,
    Output,
    Error,
    Metadata,
}

/// The single outbound message shape emitted by the kernel. All kernel state
/// changes are observed by the coordinator exclusively through this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NotificationPayload {
    pub channel: Channel,
    pub mime_type: String,
    pub data: Value,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellNotification {
    #[serde(rename = "type", default = "notification_type")]
    pub kind: String,
    pub cell_id: String,
    pub output: NotificationPayload,
}

fn notification_type() -> String {
    "cell_notification".to_string()
}

impl CellNotification {
    pub fn new(cell_id: impl Into<String>, channel: Channel, mime_type: impl Into<String>, data: Value, timestamp: f64) -> Self {
        Self {
            kind: notification_type(),
            cell_id: cell_id.into(),
            output: NotificationPayload {
                channel,
                mime_type: mime_type.into(),
                data,
                timestamp,
            },
        }
    }

    pub fn status(cell_id: impl Into<String>, status: &str, timestamp: f64) -> Self {
        Self::new(cell_id, Channel::Status, "text/plain", Value::String(status.to_string()), timestamp)
    }

    pub fn error(cell_id: impl Into<String>, message: impl Into<String>, timestamp: f64) -> Self {
        Self::new(cell_id, Channel::Error, "text/plain", Value::String(message.into()), timestamp)
    }
}

/// Writes one length-prefixed JSON message.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let bytes = serde_json::to_vec(message)
        .map_err(|e| Error::Serialization(format!("failed to encode IPC message: {e}")))?;

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("failed to write IPC message length: {e}")))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("failed to write IPC message body: {e}")))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("failed to flush IPC stream: {e}")))?;

    Ok(())
}

/// Maximum accepted message body, guarding against a corrupt length prefix.
const MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// Reads one length-prefixed JSON message. Returns `Io` with `UnexpectedEof`
/// when the stream is closed cleanly before a length prefix is read, which
/// callers use to detect kernel process exit.
pub fn read_message<R: Read, T: for<'de> Deserialize<'de>>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_MESSAGE_BYTES {
        return Err(Error::Ipc(format!("IPC message too large: {len} bytes")));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("failed to read IPC message body: {e}")))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Serialization(format!("failed to decode IPC message: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn register_cell_command_round_trips() {
        let cmd = KernelCommand::RegisterCell {
            cell_id: "c1".to_string(),
            code: "x = 10".to_string(),
            cell_type: Language::Python,
        };
        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: KernelCommand = read_message(&mut cursor).unwrap();
        match decoded {
            KernelCommand::RegisterCell { cell_id, code, cell_type } => {
                assert_eq!(cell_id, "c1");
                assert_eq!(code, "x = 10");
                assert_eq!(cell_type, Language::Python);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn command_wire_shape_matches_protocol() {
        let cmd = KernelCommand::SetDatabaseConfig {
            connection_string: "postgres://localhost/db".to_string(),
        };
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["type"], "set_database_config");
        assert_eq!(json["connection_string"], "postgres://localhost/db");
    }

    #[test]
    fn notification_round_trips_and_matches_wire_shape() {
        let note = CellNotification::status("c1", "running", 123.0);
        let mut buf = Vec::new();
        write_message(&mut buf, &note).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded: CellNotification = read_message(&mut cursor).unwrap();
        assert_eq!(decoded.cell_id, "c1");
        assert_eq!(decoded.output.channel, Channel::Status);

        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["type"], "cell_notification");
        assert_eq!(json["output"]["channel"], "status");
    }

    #[test]
    fn truncated_stream_reports_io_error() {
        let mut cursor = Cursor::new(vec![1u8, 2, 3]);
        let err = read_message::<_, KernelCommand>(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
