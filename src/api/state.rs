use std::sync::Arc;

use crate::observability::Metrics;
use crate::staging::StagingArea;

#[derive(Clone)]
pub struct AppState {
    pub staging: Arc<StagingArea>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(staging: Arc<StagingArea>, metrics: Arc<Metrics>) -> Self {
        Self { staging, metrics }
    }
}
