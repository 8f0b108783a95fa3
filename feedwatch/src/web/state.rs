//! Web server shared state.

use std::sync::Arc;

use crate::database::DatabaseHandle;
use crate::preview::PreviewLockManager;
use crate::scheduler::CheckScheduler;

/// State shared by all API handlers.
pub struct WebState {
    /// Database handle.
    pub database: DatabaseHandle,
    /// Check scheduler (manual checks work even when the periodic loop is off).
    pub scheduler: Arc<CheckScheduler>,
    /// Preview lock manager.
    pub preview: Arc<PreviewLockManager>,
}

impl WebState {
    pub fn new(
        database: DatabaseHandle,
        scheduler: Arc<CheckScheduler>,
        preview: Arc<PreviewLockManager>,
    ) -> Self {
        Self {
            database,
            scheduler,
            preview,
        }
    }
}
