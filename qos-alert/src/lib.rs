//! The alert channel: a single boolean signal shared by one writer (the latency probe) and one
//! reader (the QoS controller).
//!
//! There is no locking. Every operation is idempotent, so a writer and a reader polling the
//! same channel converge without coordination:
//!
//! - [`AlertChannel::assert_alert`] creates the signal if it is absent.
//! - [`AlertChannel::clear_alert`] removes the signal if it is present.
//! - [`AlertChannel::is_alert_active`] reports whether it is present.
//!
//! A write becomes visible to the reader on its next poll, so the reader's view may lag the
//! writer's by at most one poll interval.

use std::io;

mod marker;
mod memory;

pub use marker::MarkerFile;
pub use memory::MemoryChannel;

/// Errors from an [`AlertChannel`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The marker file could not be read, created or removed.
    #[error("io error on alert marker: {0}")]
    Io(#[from] io::Error),
    /// The backing store cannot be reached.
    #[error("alert channel unavailable")]
    Unavailable,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A shared, idempotent alert flag. See the [module docs](self) for the consistency contract.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    /// Raises the alert. `detail` is diagnostic only (e.g. the triggering latency) and is not
    /// read back by [`is_alert_active`](Self::is_alert_active). A no-op if already raised.
    async fn assert_alert(&self, detail: &str) -> Result<()>;

    /// Clears the alert. A no-op if not raised.
    async fn clear_alert(&self) -> Result<()>;

    /// Whether the alert is currently raised.
    async fn is_alert_active(&self) -> Result<bool>;
}

#[async_trait::async_trait]
impl<T: AlertChannel + ?Sized> AlertChannel for std::sync::Arc<T> {
    async fn assert_alert(&self, detail: &str) -> Result<()> {
        (**self).assert_alert(detail).await
    }

    async fn clear_alert(&self) -> Result<()> {
        (**self).clear_alert().await
    }

    async fn is_alert_active(&self) -> Result<bool> {
        (**self).is_alert_active().await
    }
}
