use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::system_settings::SystemSettings},
};

/// Stale reads within the TTL are acceptable; writers call `invalidate`.
pub const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(90);

struct CachedSettings {
    fetched_at: Instant,
    settings: SystemSettings,
}

/// Process-wide TTL cache over the settings row, so hot paths do not pay a
/// database round-trip per operation. One instance per process; no other
/// module-level mutable state.
pub struct SettingsCache {
    ttl: Duration,
    inner: RwLock<Option<CachedSettings>>,
}

impl Default for SettingsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SETTINGS_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(None),
        }
    }

    pub async fn get(&self, db: &SurrealDbClient) -> Result<SystemSettings, AppError> {
        {
            let guard = self.inner.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.settings.clone());
                }
            }
        }

        let settings = SystemSettings::get_current(db).await?;
        *self.inner.write().await = Some(CachedSettings {
            fetched_at: Instant::now(),
            settings: settings.clone(),
        });

        Ok(settings)
    }

    /// Drop the cached value so the next read hits the database.
    pub async fn invalidate(&self) {
        *self.inner.write().await = None;
    }
}
