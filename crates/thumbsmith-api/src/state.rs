//! Application state shared by all handlers.

use std::sync::Arc;
use thumbsmith_worker::WorkflowRunner;

#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<WorkflowRunner>,
}

impl AppState {
    pub fn new(runner: Arc<WorkflowRunner>) -> Self {
        Self { runner }
    }
}
