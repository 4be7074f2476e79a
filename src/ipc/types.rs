use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Offset used to read stored timestamps and to pick "today".
    pub utc_offset_minutes: i32,
}

impl AppState {
    pub fn new(utc_offset_minutes: i32) -> Self {
        Self {
            workspace: None,
            db: None,
            utc_offset_minutes,
        }
    }
}
