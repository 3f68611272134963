//! HTTP handlers: thin pass-throughs from the routing layer to the
//! storage core. Content-editing collaborators consume these endpoints.

pub mod admin_handlers;
pub mod health_handlers;
pub mod object_handlers;
pub mod reference_handlers;

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::services::cleanup::CleanupScheduler;
use crate::services::storage::StorageDriver;
use crate::services::storage::factory::StorageFactory;
use crate::services::tracker::ResourceTracker;

/// Shared state carried by the router to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub factory: Arc<StorageFactory>,
    pub tracker: ResourceTracker,
    pub scheduler: Arc<CleanupScheduler>,
    pub db: Arc<SqlitePool>,
}

impl AppState {
    /// The active driver per current configuration.
    pub async fn driver(&self) -> Result<Arc<dyn StorageDriver>, AppError> {
        Ok(self.factory.get_driver(&self.config.storage).await?)
    }
}
