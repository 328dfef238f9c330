//! Shared runtime state for recon-api. Cloneable (via `Arc`/`PgPool`'s own
//! internal pooling) so every handler gets an owned, cheap copy.

use std::sync::Arc;

use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub pan_hash_secret: Arc<String>,
}

impl AppState {
    pub fn new(pool: PgPool, pan_hash_secret: String) -> Self {
        Self {
            pool,
            pan_hash_secret: Arc::new(pan_hash_secret),
        }
    }
}
