use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::debug;

/// Identifies the quota bucket a remote call is charged to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LimiterKey {
    pub region: String,
    pub role_arn: Option<String>,
}

/// Bounds outstanding remote calls per (region, role) pair.
///
/// Scrapes against different pairs never wait on each other; the mutex only
/// guards the map lookup and is never held across a remote call.
#[derive(Default)]
pub struct RemoteCallLimiter {
    semaphores: Mutex<HashMap<LimiterKey, (usize, Arc<Semaphore>)>>,
}

impl RemoteCallLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Semaphore for `key` sized to `permits`. A changed permit count (after a
    /// reload) installs a fresh semaphore; calls holding the old one finish
    /// against it.
    pub fn semaphore(&self, key: &LimiterKey, permits: usize) -> Arc<Semaphore> {
        let mut semaphores = self
            .semaphores
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match semaphores.get(key) {
            Some((size, semaphore)) if *size == permits => semaphore.clone(),
            _ => {
                debug!(
                    "RemoteCallLimiter: Creating limiter for region={} role={:?} ({} permits)",
                    key.region, key.role_arn, permits
                );
                let semaphore = Arc::new(Semaphore::new(permits));
                semaphores.insert(key.clone(), (permits, semaphore.clone()));
                semaphore
            }
        }
    }
}
