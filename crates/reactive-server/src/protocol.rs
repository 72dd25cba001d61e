//! Client WebSocket protocol: the gateway's JSON message shapes. The
//! envelope fields (`cellId`, `afterCellId`, `connectionString`, `cellType`)
//! are camelCase to match the browser client; the nested `Output`/cell
//! bundle fields stay snake_case, matching the kernel wire format they are
//! forwarded from unchanged. A container-level `rename_all` can express one
//! casing convention, not two, so each camelCase field carries an explicit
//! `#[serde(rename = "...")]` instead.

use serde::{Deserialize, Serialize};

use reactive_core::{Language, Output};

/// Inbound message from a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate,
    CellUpdate {
        #[serde(rename = "cellId")]
        cell_id: String,
        code: String,
    },
    CreateCell {
        #[serde(rename = "cellType")]
        cell_type: Language,
        #[serde(rename = "afterCellId", default)]
        after_cell_id: Option<String>,
    },
    DeleteCell {
        #[serde(rename = "cellId")]
        cell_id: String,
    },
    RunCell {
        #[serde(rename = "cellId")]
        cell_id: String,
    },
    UpdateDbConnection {
        #[serde(rename = "connectionString")]
        connection_string: String,
    },
}

/// Outbound event to a connected client. Every variant carries at least
/// `{type, cellId}` except the two connection-wide events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    CellStatus {
        #[serde(rename = "cellId")]
        cell_id: String,
        status: CellStatusWire,
    },
    CellStdout {
        #[serde(rename = "cellId")]
        cell_id: String,
        data: String,
    },
    CellOutput {
        #[serde(rename = "cellId")]
        cell_id: String,
        output: Output,
    },
    CellError {
        #[serde(rename = "cellId")]
        cell_id: String,
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },
    CellUpdated {
        #[serde(rename = "cellId")]
        cell_id: String,
        cell: CellUpdatedPayload,
    },
    CellCreated {
        #[serde(rename = "cellId")]
        cell_id: String,
        cell: CellSummary,
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
    },
    CellDeleted {
        #[serde(rename = "cellId")]
        cell_id: String,
    },
    Authenticated,
    /// Terminal: the kernel process died or the transport is unrecoverable.
    KernelError {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatusWire {
    Idle,
    Running,
    Success,
    Error,
    Blocked,
}

impl From<reactive_core::CellStatus> for CellStatusWire {
    fn from(status: reactive_core::CellStatus) -> Self {
        match status {
            reactive_core::CellStatus::Idle => CellStatusWire::Idle,
            reactive_core::CellStatus::Running => CellStatusWire::Running,
            reactive_core::CellStatus::Success => CellStatusWire::Success,
            reactive_core::CellStatus::Error => CellStatusWire::Error,
            reactive_core::CellStatus::Blocked => CellStatusWire::Blocked,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CellUpdatedPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CellSummary {
    pub code: String,
    #[serde(rename = "cellType")]
    pub cell_type: Language,
    pub status: CellStatusWire,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_uses_camel_case_envelope_fields() {
        let json = r#"{"type":"cell_update","cellId":"c1","code":"x = 1"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::CellUpdate { cell_id, code } => {
                assert_eq!(cell_id, "c1");
                assert_eq!(code, "x = 1");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn create_cell_after_cell_id_is_optional() {
        let json = r#"{"type":"create_cell","cellType":"python"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::CreateCell { cell_type, after_cell_id } => {
                assert_eq!(cell_type, Language::Python);
                assert!(after_cell_id.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_message_serializes_with_camel_case_cell_id() {
        let msg = ServerMessage::CellStatus {
            cell_id: "c1".to_string(),
            status: CellStatusWire::Running,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "cell_status");
        assert_eq!(json["cellId"], "c1");
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn cell_output_keeps_snake_case_mime_type() {
        let msg = ServerMessage::CellOutput {
            cell_id: "c1".to_string(),
            output: Output::text("text/plain", "hello"),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["output"]["mime_type"], "text/plain");
    }
}
