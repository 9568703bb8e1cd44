// In-memory JWT revocation set
//
// jti → natural-expiry timestamp (epoch seconds). Entries are purged by a
// periodic sweep once past expiry; the set never needs to survive restarts
// because the tokens it names expire on their own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

/// Sweep cadence for expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Default)]
pub struct RevocationSet {
    entries: Mutex<HashMap<Uuid, i64>>,
}

impl RevocationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a token id revoked until its natural expiry.
    pub fn insert(&self, jti: Uuid, expires_at: i64) {
        let mut entries = self.entries.lock().expect("revocation lock poisoned");
        entries.insert(jti, expires_at);
    }

    pub fn is_revoked(&self, jti: Uuid) -> bool {
        let entries = self.entries.lock().expect("revocation lock poisoned");
        entries.contains_key(&jti)
    }

    /// Remove entries whose tokens have expired anyway. Returns the number
    /// of entries removed.
    pub fn sweep(&self, now: i64) -> usize {
        let mut entries = self.entries.lock().expect("revocation lock poisoned");
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("revocation lock poisoned").len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic sweep task.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let set = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                let removed = set.sweep(chrono::Utc::now().timestamp());
                if removed > 0 {
                    tracing::debug!("revocation sweep removed {} expired entries", removed);
                }
            }
        })
    }
}
