//! SQL cell execution: a connection pool per connection string, kept for the
//! kernel's lifetime, and result shaping into the table output bundle.

use rustc_hash::FxHashMap;
use serde_json::Value;
use sqlx::any::{AnyPool, AnyPoolOptions, AnyRow};
use sqlx::{Column, Row};

use reactive_core::{Error, Output, Result};

pub struct SqlExecutor {
    pools: FxHashMap<String, AnyPool>,
    connection_string: Option<String>,
}

impl SqlExecutor {
    pub fn new() -> Self {
        sqlx::any::install_default_drivers();
        Self {
            pools: FxHashMap::default(),
            connection_string: None,
        }
    }

    pub fn set_connection_string(&mut self, connection_string: String) {
        self.connection_string = Some(connection_string);
    }

    async fn pool(&mut self) -> Result<&AnyPool> {
        let connection_string = self
            .connection_string
            .clone()
            .ok_or_else(|| Error::Execution("no database connection configured".to_string()))?;

        if !self.pools.contains_key(&connection_string) {
            let pool = AnyPoolOptions::new()
                .max_connections(5)
                .connect(&connection_string)
                .await
                .map_err(|e| Error::Execution(format!("failed to connect: {e}")))?;
            self.pools.insert(connection_string.clone(), pool);
        }
        Ok(self
            .pools
            .get(&connection_string)
            .expect("pool was just inserted for this connection string"))
    }

    pub async fn execute(&mut self, sql: &str) -> Result<Output> {
        let pool = self.pool().await?;
        let rows = sqlx::query(sql)
            .fetch_all(pool)
            .await
            .map_err(|e| Error::Execution(format!("query failed: {e}")))?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let shaped_rows: Vec<Vec<Value>> = rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| any_value_to_json(row, i)).collect())
            .collect();

        Ok(Output::table(columns, shaped_rows))
    }
}

/// Tries a cascade of scalar types since `sqlx::any` does not expose a
/// single dynamic-decode entry point; the first type that decodes wins.
fn any_value_to_json(row: &AnyRow, idx: usize) -> Value {
    if let Ok(v) = row.try_get::<i64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<f64, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<bool, _>(idx) {
        return Value::from(v);
    }
    if let Ok(v) = row.try_get::<String, _>(idx) {
        return Value::from(v);
    }
    Value::Null
}
