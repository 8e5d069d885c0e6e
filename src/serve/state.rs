use std::sync::Arc;

use crate::storage::Backend;

/// Shared handler state. The blob store is the only shared resource; no
/// request-scoped data survives the request that created it.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn Backend>,
}

impl AppState {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        AppState { backend }
    }
}
