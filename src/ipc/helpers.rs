use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::calc::CalcError;
use crate::ipc::error::err;
use crate::ipc::types::AppState;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        if self.code.starts_with("db_") {
            tracing::warn!(code = self.code, message = %self.message, "storage error");
        }
        err(id, self.code, self.message, self.details)
    }
}

impl From<CalcError> for HandlerErr {
    fn from(e: CalcError) -> Self {
        let code = match e.code.as_str() {
            "not_found" => "not_found",
            "bad_params" => "bad_params",
            _ => "db_query_failed",
        };
        Self {
            code,
            message: e.message,
            details: e.details,
        }
    }
}

pub fn db_conn(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

/// Present, string, and non-blank after trimming.
pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
}

pub fn ensure_exists(
    conn: &Connection,
    table: &'static str,
    id: &str,
    what: &str,
) -> Result<(), HandlerErr> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    let found: Option<i64> = conn
        .query_row(&sql, [id], |r| r.get(0))
        .optional()
        .map_err(HandlerErr::query)?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", format!("{} not found", what))
            .with_details(json!({ "id": id })));
    }
    Ok(())
}

pub fn next_sort_order(conn: &Connection, table: &'static str, class_id: &str) -> Result<i64, HandlerErr> {
    let sql = format!(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM {} WHERE class_id = ?",
        table
    );
    conn.query_row(&sql, [class_id], |r| r.get(0))
        .map_err(HandlerErr::query)
}

/// Runs a handler body and wraps its outcome in the response envelope.
pub fn respond(
    id: &str,
    result: Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    match result {
        Ok(v) => crate::ipc::error::ok(id, v),
        Err(e) => e.response(id),
    }
}
