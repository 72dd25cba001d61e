//! The kernel: one process per active session, owning the namespace, the
//! dependency graph, the cell registry, and the has-run map. Commands are
//! drained one at a time; nothing here runs concurrently with itself.

use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use serde_json::Value;

use reactive_core::{
    CellId, CellNotification, CellStatus, Channel, DependencyGraph, KernelCommand, Language, Output,
};

use crate::python_exec::PythonExecutor;
use crate::sql_exec::SqlExecutor;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

pub struct Kernel {
    graph: DependencyGraph,
    registry: FxHashMap<CellId, (String, Language)>,
    has_run: FxHashMap<CellId, bool>,
    status: FxHashMap<CellId, CellStatus>,
    python: PythonExecutor,
    sql: SqlExecutor,
}

impl Kernel {
    pub fn new() -> reactive_core::Result<Self> {
        Ok(Self {
            graph: DependencyGraph::new(),
            registry: FxHashMap::default(),
            has_run: FxHashMap::default(),
            status: FxHashMap::default(),
            python: PythonExecutor::new()?,
            sql: SqlExecutor::new(),
        })
    }

    /// Handles one command, returning the notifications it produced and
    /// whether the kernel should exit afterwards.
    pub async fn handle(&mut self, command: KernelCommand) -> (Vec<CellNotification>, bool) {
        match command {
            KernelCommand::RegisterCell { cell_id, code, cell_type } => {
                (self.register_cell(CellId::new(cell_id), code, cell_type), false)
            }
            KernelCommand::RemoveCell { cell_id } => (self.remove_cell(CellId::new(cell_id)), false),
            KernelCommand::Execute { cell_id, .. } => (self.execute(CellId::new(cell_id)).await, false),
            KernelCommand::SetDatabaseConfig { connection_string } => {
                self.sql.set_connection_string(connection_string);
                (Vec::new(), false)
            }
            KernelCommand::Shutdown => (Vec::new(), true),
        }
    }

    fn register_cell(&mut self, cell: CellId, code: String, language: Language) -> Vec<CellNotification> {
        let (reads, writes) = match reactive_core::extract(&code, language) {
            Ok(rw) => rw,
            Err(e) => {
                self.status.insert(cell.clone(), CellStatus::Blocked);
                return vec![CellNotification::error(cell.to_string(), e.to_string(), now())];
            }
        };

        if self.graph.would_create_cycle(&cell, &reads, &writes) {
            self.status.insert(cell.clone(), CellStatus::Blocked);
            return vec![CellNotification::error(
                cell.to_string(),
                format!("registering cell {cell} would create a cycle"),
                now(),
            )];
        }

        self.graph
            .update_cell(&cell, reads.clone(), writes.clone())
            .expect("would_create_cycle already ruled out a conflicting update");

        self.registry.insert(cell.clone(), (code, language));
        self.has_run.insert(cell.clone(), false);
        for descendant in self.graph.descendants(&cell) {
            self.has_run.insert(descendant, false);
        }
        self.status.insert(cell.clone(), CellStatus::Idle);

        let metadata = serde_json::json!({
            "reads": reads.into_iter().collect::<Vec<_>>(),
            "writes": writes.into_iter().collect::<Vec<_>>(),
        });

        vec![
            CellNotification::new(cell.to_string(), Channel::Metadata, "application/json", metadata, now()),
            CellNotification::status(cell.to_string(), "idle", now()),
        ]
    }

    fn remove_cell(&mut self, cell: CellId) -> Vec<CellNotification> {
        let descendants = self.graph.descendants(&cell);
        self.graph.remove_cell(&cell);
        self.registry.remove(&cell);
        self.has_run.remove(&cell);
        self.status.remove(&cell);
        for descendant in descendants {
            self.has_run.insert(descendant, false);
        }

        vec![CellNotification::new(
            cell.to_string(),
            Channel::Metadata,
            "application/json",
            serde_json::json!({"reads": Vec::<String>::new(), "writes": Vec::<String>::new()}),
            now(),
        )]
    }

    async fn execute(&mut self, cell: CellId) -> Vec<CellNotification> {
        if !self.registry.contains_key(&cell) {
            return vec![CellNotification::error(
                cell.to_string(),
                format!("cell not found: {cell}"),
                now(),
            )];
        }

        let order = {
            let has_run = &self.has_run;
            self.graph
                .execution_order(&cell, |c| !has_run.get(c).copied().unwrap_or(false))
        };
        let order = match order {
            Ok(order) => order,
            Err(e) => return vec![CellNotification::error(cell.to_string(), e.to_string(), now())],
        };

        let mut notifications = Vec::new();
        for current in order {
            if self.is_blocked_by_ancestor(&current) {
                self.status.insert(current.clone(), CellStatus::Blocked);
                notifications.push(CellNotification::status(current.to_string(), "blocked", now()));
                continue;
            }

            notifications.push(CellNotification::status(current.to_string(), "running", now()));
            self.status.insert(current.clone(), CellStatus::Running);

            let Some((code, language)) = self.registry.get(&current).cloned() else {
                notifications.push(CellNotification::error(
                    current.to_string(),
                    "cell not found".to_string(),
                    now(),
                ));
                continue;
            };

            match self.run_one(&current, &code, language).await {
                Ok((stdout, outputs)) => {
                    if !stdout.is_empty() {
                        notifications.push(CellNotification::new(
                            current.to_string(),
                            Channel::Stdout,
                            "text/plain",
                            Value::String(stdout),
                            now(),
                        ));
                    }
                    for output in outputs {
                        let data = serde_json::to_value(&output.data).unwrap_or(Value::Null);
                        notifications.push(CellNotification::new(
                            current.to_string(),
                            Channel::Output,
                            output.mime_type.clone(),
                            data,
                            now(),
                        ));
                    }
                    self.has_run.insert(current.clone(), true);
                    self.status.insert(current.clone(), CellStatus::Success);
                    notifications.push(CellNotification::status(current.to_string(), "success", now()));
                }
                Err(error_text) => {
                    self.status.insert(current.clone(), CellStatus::Error);
                    notifications.push(CellNotification::error(current.to_string(), error_text, now()));
                    notifications.push(CellNotification::status(current.to_string(), "error", now()));
                }
            }
        }

        notifications
    }

    fn is_blocked_by_ancestor(&self, cell: &CellId) -> bool {
        self.graph.ancestors(cell).iter().any(|ancestor| {
            matches!(
                self.status.get(ancestor),
                Some(CellStatus::Error) | Some(CellStatus::Blocked)
            )
        })
    }

    async fn run_one(
        &mut self,
        cell: &CellId,
        code: &str,
        language: Language,
    ) -> std::result::Result<(String, Vec<Output>), String> {
        tracing::debug!(cell = %cell, ?language, "executing cell");
        match language {
            Language::Python => {
                let outcome = self.python.execute(code);
                match outcome.error {
                    Some(error) => Err(error),
                    None => Ok((outcome.stdout, outcome.outputs)),
                }
            }
            Language::Sql => {
                let sql_text = self.python.substitute_sql(code).map_err(|e| e.to_string())?;
                let output = self.sql.execute(&sql_text).await.map_err(|e| e.to_string())?;
                Ok((String::new(), vec![output]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of<'a>(notifications: &'a [CellNotification], cell_id: &str) -> Option<&'a str> {
        notifications
            .iter()
            .rev()
            .find(|n| n.cell_id == cell_id && n.output.channel == Channel::Status)
            .and_then(|n| n.output.data.as_str())
    }

    async fn register(kernel: &mut Kernel, cell_id: &str, code: &str, language: Language) -> Vec<CellNotification> {
        kernel
            .handle(KernelCommand::RegisterCell {
                cell_id: cell_id.to_string(),
                code: code.to_string(),
                cell_type: language,
            })
            .await
            .0
    }

    async fn run(kernel: &mut Kernel, cell_id: &str) -> Vec<CellNotification> {
        kernel
            .handle(KernelCommand::Execute {
                cell_id: cell_id.to_string(),
                code: String::new(),
                cell_type: Language::Python,
            })
            .await
            .0
    }

    #[tokio::test]
    async fn linear_chain_runs_every_cell_in_order() {
        let mut kernel = Kernel::new().unwrap();
        register(&mut kernel, "c1", "x = 10", Language::Python).await;
        register(&mut kernel, "c2", "y = x * 2", Language::Python).await;

        let notifications = run(&mut kernel, "c1").await;

        assert_eq!(status_of(&notifications, "c1"), Some("success"));
        assert_eq!(status_of(&notifications, "c2"), Some("success"));
        assert_eq!(kernel.has_run.get(&CellId::new("c1")), Some(&true));
        assert_eq!(kernel.has_run.get(&CellId::new("c2")), Some(&true));
    }

    #[tokio::test]
    async fn registering_a_cycle_is_rejected_as_blocked() {
        let mut kernel = Kernel::new().unwrap();
        register(&mut kernel, "c1", "x = y + 1", Language::Python).await;
        let notifications = register(&mut kernel, "c2", "y = x + 1", Language::Python).await;

        assert_eq!(status_of(&notifications, "c2"), None);
        assert!(notifications
            .iter()
            .any(|n| n.cell_id == "c2" && n.output.channel == Channel::Error));
        assert_eq!(kernel.status.get(&CellId::new("c2")), Some(&CellStatus::Blocked));
        // c1's own registration is unaffected by c2's rejected one.
        assert_eq!(kernel.status.get(&CellId::new("c1")), Some(&CellStatus::Idle));
    }

    #[tokio::test]
    async fn stale_ancestor_is_included_once_in_execution() {
        let mut kernel = Kernel::new().unwrap();
        register(&mut kernel, "c1", "x = 1", Language::Python).await;
        register(&mut kernel, "c2", "y = x + 1", Language::Python).await;

        run(&mut kernel, "c2").await;
        assert_eq!(kernel.has_run.get(&CellId::new("c1")), Some(&true));

        // c1 has already run; executing c2 again should not re-run c1.
        let notifications = run(&mut kernel, "c2").await;
        let c1_ran_again = notifications
            .iter()
            .any(|n| n.cell_id == "c1" && n.output.channel == Channel::Status);
        assert!(!c1_ran_again);
    }

    #[tokio::test]
    async fn editing_an_ancestor_invalidates_descendants() {
        let mut kernel = Kernel::new().unwrap();
        register(&mut kernel, "c1", "x = 1", Language::Python).await;
        register(&mut kernel, "c2", "y = x + 1", Language::Python).await;
        run(&mut kernel, "c2").await;
        assert_eq!(kernel.has_run.get(&CellId::new("c2")), Some(&true));

        register(&mut kernel, "c1", "x = 2", Language::Python).await;
        assert_eq!(kernel.has_run.get(&CellId::new("c2")), Some(&false));
    }

    #[tokio::test]
    async fn failing_ancestor_blocks_descendant_in_same_cascade() {
        let mut kernel = Kernel::new().unwrap();
        register(&mut kernel, "c1", "x = 1 / 0", Language::Python).await;
        register(&mut kernel, "c2", "y = x + 1", Language::Python).await;

        let notifications = run(&mut kernel, "c2").await;

        assert_eq!(status_of(&notifications, "c1"), Some("error"));
        assert_eq!(status_of(&notifications, "c2"), Some("blocked"));
    }

    #[tokio::test]
    async fn tail_expression_output_is_emitted_on_execute() {
        let mut kernel = Kernel::new().unwrap();
        register(&mut kernel, "c1", "2 + 2", Language::Python).await;

        let notifications = run(&mut kernel, "c1").await;

        let has_output = notifications
            .iter()
            .any(|n| n.cell_id == "c1" && n.output.channel == Channel::Output);
        assert!(has_output);
    }
}
