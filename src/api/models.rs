//! Response bodies of the retrieval surface

use serde::Serialize;
use std::collections::HashMap;

use crate::observability::MetricsSnapshot;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthDetails {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
    pub staged_files: usize,
    pub staged_bytes: u64,
    pub metrics: MetricsSnapshot,
}
