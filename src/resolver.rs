//! Magnet resolution: submit once, then poll at a fixed interval until the
//! remote service has turned the torrent into downloadable links.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::DebridClient;
use crate::error::{DebridError, DebridResult};
use crate::models::{LinkEntry, MagnetRecord, MagnetStatus};

/// The two remote calls resolution needs.
#[async_trait]
pub trait MagnetService: Send + Sync {
    async fn submit(&self, magnet: &str) -> DebridResult<u64>;
    async fn status(&self, id: u64) -> DebridResult<MagnetRecord>;
}

#[async_trait]
impl MagnetService for DebridClient {
    async fn submit(&self, magnet: &str) -> DebridResult<u64> {
        self.upload_magnet(magnet).await
    }

    async fn status(&self, id: u64) -> DebridResult<MagnetRecord> {
        self.magnet_status(id).await
    }
}

/// Fixed-interval polling, no back-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollStrategy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollStrategy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }
}

/// Reported once per status request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollProgress {
    pub status: Option<MagnetStatus>,
    pub attempt: u32,
    pub max_attempts: u32,
}

pub struct MagnetResolver<S> {
    service: S,
    strategy: PollStrategy,
}

impl<S: MagnetService> MagnetResolver<S> {
    pub fn new(service: S, strategy: PollStrategy) -> Self {
        Self { service, strategy }
    }

    pub async fn resolve<F>(
        &self,
        magnet: &str,
        mut on_progress: F,
        cancel: &CancellationToken,
    ) -> DebridResult<Vec<LinkEntry>>
    where
        F: FnMut(PollProgress) + Send,
    {
        if cancel.is_cancelled() {
            return Err(DebridError::Cancelled);
        }

        let id = self
            .service
            .submit(magnet)
            .await
            .map_err(|e| DebridError::Submission(Box::new(e)))?;
        info!("magnet submitted as id {}", id);

        let max_attempts = self.strategy.max_attempts;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DebridError::Cancelled),
                    _ = tokio::time::sleep(self.strategy.interval) => {}
                }
            }
            if cancel.is_cancelled() {
                return Err(DebridError::Cancelled);
            }

            let record = match self.service.status(id).await {
                Ok(record) => record,
                Err(DebridError::Remote { code, message }) => {
                    warn!(
                        "status check {}/{} for magnet {} rejected: {:?} {:?}",
                        attempt, max_attempts, id, code, message
                    );
                    on_progress(PollProgress {
                        status: None,
                        attempt,
                        max_attempts,
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!(
                "magnet {} status {} ({}/{})",
                id, record.status, attempt, max_attempts
            );
            on_progress(PollProgress {
                status: Some(record.status.clone()),
                attempt,
                max_attempts,
            });

            match record.status {
                MagnetStatus::Ready if !record.links.is_empty() => {
                    info!("magnet {} ready with {} link(s)", id, record.links.len());
                    return Ok(record.links);
                }
                MagnetStatus::Ready => {
                    return Err(DebridError::Incomplete {
                        status: "Ready without links".to_string(),
                    });
                }
                MagnetStatus::Error => return Err(DebridError::Processing),
                ref status if status.is_pending() => {}
                status => {
                    return Err(DebridError::Incomplete {
                        status: status.to_string(),
                    });
                }
            }
        }

        Err(DebridError::PollTimeout {
            attempts: max_attempts,
        })
    }
}
