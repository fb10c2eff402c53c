use std::sync::Arc;

use crate::config::Config;
use crate::service::{ExplorerService, TraceRegistry};

pub struct AppState {
    pub config: Config,
    pub service: Arc<ExplorerService>,
    pub traces: TraceRegistry,
}

impl AppState {
    pub fn new(config: Config, service: Arc<ExplorerService>) -> Self {
        Self {
            config,
            traces: TraceRegistry::new(service.clone()),
            service,
        }
    }
}
