//! Durable notebook storage. The coordinator reads a notebook once at
//! session start and writes back on create/update/delete, treating
//! persistence as best-effort: client operations are acknowledged
//! optimistically regardless of whether the write-back has landed.
//!
//! Modeled as a trait so a swap to an HTTP-backed or database-backed store
//! does not change the coordinator. Storage I/O is plain synchronous file
//! access; at this scale (a JSON document per notebook) there is nothing to
//! gain from an async trait, and a synchronous trait stays trivially
//! object-safe for `Box<dyn NotebookStore>`.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use reactive_core::Language;

use crate::error::{ServerError, ServerResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredCell {
    pub id: String,
    #[serde(rename = "type")]
    pub cell_type: Language,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNotebook {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub db_connection: Option<String>,
    #[serde(default)]
    pub cells: Vec<StoredCell>,
}

pub trait NotebookStore: Send + Sync {
    fn load(&self, id: &str) -> ServerResult<Option<StoredNotebook>>;
    fn save(&self, notebook: &StoredNotebook) -> ServerResult<()>;
}

/// JSON-file-backed store suitable for a local, single-node deployment: one
/// `<id>.json` file per notebook in a directory.
pub struct FileNotebookStore {
    dir: PathBuf,
}

impl FileNotebookStore {
    pub fn new(dir: impl Into<PathBuf>) -> ServerResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }
}

impl NotebookStore for FileNotebookStore {
    fn load(&self, id: &str) -> ServerResult<Option<StoredNotebook>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let notebook = serde_json::from_str(&contents)?;
        Ok(Some(notebook))
    }

    fn save(&self, notebook: &StoredNotebook) -> ServerResult<()> {
        let path = self.path_for(&notebook.id);
        let json = serde_json::to_string_pretty(notebook)
            .map_err(|e| ServerError::Storage(e.to_string()))?;
        fs::write(&path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_notebook_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileNotebookStore::new(dir.path()).unwrap();

        let notebook = StoredNotebook {
            id: "nb1".to_string(),
            name: Some("My Notebook".to_string()),
            db_connection: None,
            cells: vec![StoredCell {
                id: "c1".to_string(),
                cell_type: Language::Python,
                code: "x = 1".to_string(),
            }],
        };
        store.save(&notebook).unwrap();

        let loaded = store.load("nb1").unwrap().unwrap();
        assert_eq!(loaded.name.as_deref(), Some("My Notebook"));
        assert_eq!(loaded.cells.len(), 1);
    }

    #[test]
    fn missing_notebook_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileNotebookStore::new(dir.path()).unwrap();
        assert!(store.load("does-not-exist").unwrap().is_none());
    }
}
