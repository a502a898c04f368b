use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One request line on the wire. `params` defaults to null so callers
/// may omit it entirely.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Per-process state: nothing is scoped until a workspace is selected.
#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
