pub mod rest;

use crate::auth::{AccessController, Authorizer};
use crate::config::Config;
use crate::storage::{Storage, UploadIngester};
use chrono::Duration;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub access: AccessController,
    /// Capability checks for uploads (downloads go through `access`)
    pub authorizer: Arc<dyn Authorizer>,
    pub ingester: UploadIngester,
    pub config: Config,
}

impl AppState {
    pub fn new(config: Config, storage: Storage, authorizer: Arc<dyn Authorizer>) -> Self {
        let access = AccessController::new(
            config.jwt_secret.clone(),
            config.public_origin.clone(),
            config.base_url.clone(),
            authorizer.clone(),
        )
        .with_ttl(Duration::seconds(config.token_ttl_secs))
        .with_origin_binding(config.bind_client_origin)
        .with_path_binding(config.bind_token_path);
        let ingester = UploadIngester::new(storage.clone(), config.upload_chunk_bytes);

        Self {
            storage,
            access,
            authorizer,
            ingester,
            config,
        }
    }
}
