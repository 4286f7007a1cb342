use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub client: Option<String>,
    pub drive_folder: Option<String>,
    pub created_at: i64,
}

/// Audit row written once per routed file. Never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FileRouting {
    pub id: i64,
    pub project_id: i64,
    pub file_name: String,
    pub file_type: Option<String>,
    pub suggested_path: String,
    pub actual_path: String,
    pub confidence: f64,
    pub method: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFileRouting {
    pub project_id: i64,
    pub file_name: String,
    pub file_type: Option<String>,
    pub suggested_path: String,
    pub actual_path: String,
    pub confidence: f64,
    pub method: String,
}
