use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use parking_lot::Mutex;

use crate::{AlertChannel, Error, Result};

/// An in-process alert channel. Clones share the same signal.
///
/// The channel can be marked unavailable, in which case every operation fails with
/// [`Error::Unavailable`], mimicking an outage of the backing store.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    detail: Arc<Mutex<Option<String>>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self { detail: Arc::default(), available: Arc::new(AtomicBool::new(true)) }
    }
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an outage of the backing store (or its recovery) for every clone.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// The detail of the raised alert, if any. Bypasses availability.
    pub fn detail(&self) -> Option<String> {
        self.detail.lock().clone()
    }

    /// Whether the alert is raised. Bypasses availability.
    pub fn is_raised(&self) -> bool {
        self.detail.lock().is_some()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::Unavailable)
        }
    }
}

#[async_trait::async_trait]
impl AlertChannel for MemoryChannel {
    async fn assert_alert(&self, detail: &str) -> Result<()> {
        self.check()?;
        self.detail.lock().get_or_insert_with(|| detail.to_string());
        Ok(())
    }

    async fn clear_alert(&self) -> Result<()> {
        self.check()?;
        self.detail.lock().take();
        Ok(())
    }

    async fn is_alert_active(&self) -> Result<bool> {
        self.check()?;
        Ok(self.is_raised())
    }
}
