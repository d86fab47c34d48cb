//! FIFO pool over encoder instances.
//!
//! The underlying compute is not reentrant: a worker must acquire an
//! instance, use it synchronously and release it. Tokio's semaphore queues
//! waiters in FIFO order, which gives the required fairness.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::debug;

use vmatch_models::VideoEncoding;

use crate::error::{EncoderError, EncoderResult};
use crate::gateway::{EncoderHealth, VideoEncoder};

/// Pool of encoder instances with a per-call deadline.
pub struct EncoderPool {
    instances: Vec<Arc<dyn VideoEncoder>>,
    semaphore: Arc<Semaphore>,
    next: AtomicUsize,
    deadline: Duration,
}

impl EncoderPool {
    /// Create a pool over the given instances.
    ///
    /// Panics if `instances` is empty.
    pub fn new(instances: Vec<Arc<dyn VideoEncoder>>, deadline: Duration) -> Self {
        assert!(!instances.is_empty(), "encoder pool needs at least one instance");
        let permits = instances.len();
        Self {
            instances,
            semaphore: Arc::new(Semaphore::new(permits)),
            next: AtomicUsize::new(0),
            deadline,
        }
    }

    /// Pool over a single shared instance.
    pub fn single(instance: Arc<dyn VideoEncoder>, deadline: Duration) -> Self {
        Self::new(vec![instance], deadline)
    }

    pub fn size(&self) -> usize {
        self.instances.len()
    }
}

#[async_trait]
impl VideoEncoder for EncoderPool {
    async fn encode(&self, path: &Path) -> EncoderResult<VideoEncoding> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| EncoderError::Model("encoder pool closed".to_string()))?;

        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.instances.len();
        debug!("Encoding {} on instance {}", path.display(), idx);

        tokio::time::timeout(self.deadline, self.instances[idx].encode(path))
            .await
            .map_err(|_| EncoderError::Timeout(self.deadline.as_secs()))?
    }

    fn dimension(&self) -> usize {
        self.instances[0].dimension()
    }

    async fn health(&self) -> EncoderResult<EncoderHealth> {
        self.instances[0].health().await
    }
}
