//! Shared handler state.

use std::sync::{Arc, Mutex};

use lumen_core::{LifecycleController, SessionRegistry};

pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub lifecycle: Arc<LifecycleController>,
    /// Process-wide UI theme preference for the web frontend.
    pub theme: Mutex<String>,
}

impl AppState {
    pub fn new(registry: Arc<SessionRegistry>, lifecycle: Arc<LifecycleController>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            lifecycle,
            theme: Mutex::new("system".to_string()),
        })
    }
}

pub type SharedState = Arc<AppState>;
