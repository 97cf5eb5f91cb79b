//! Long-running background services and their shutdown.
//!
//! Every loop (cleanup sweep, stale monitor, transport, consumers) is a
//! [`HostedService`] spawned on a [`ServiceHost`]. Shutdown cancels the shared
//! token and then waits for each task until a single deadline passes; tasks
//! still running at the deadline are aborted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait HostedService: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Run until `cancel` fires. Must return promptly after cancellation.
    async fn run(self: Arc<Self>, cancel: CancellationToken);
}

/// Result of [`ServiceHost::shutdown`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub stopped: Vec<&'static str>,
    pub timed_out: Vec<&'static str>,
}

pub struct ServiceHost {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Default for ServiceHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceHost {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// Host whose services stop when `parent` is cancelled.
    pub fn with_token(parent: CancellationToken) -> Self {
        Self {
            cancel: parent.child_token(),
            tasks: Vec::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<S: HostedService>(&mut self, service: Arc<S>) {
        let name = service.name();
        let cancel = self.cancel.child_token();
        tracing::info!(service = name, "Starting hosted service");
        let handle = tokio::spawn(async move {
            service.run(cancel).await;
            tracing::info!(service = name, "Hosted service stopped");
        });
        self.tasks.push((name, handle));
    }

    /// Cancel every service and wait up to `grace` in total for them to exit.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + grace;
        let mut report = ShutdownReport::default();

        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.stopped.push(name),
                Ok(Err(e)) => {
                    tracing::error!(service = name, error = %e, "Hosted service task failed");
                    report.stopped.push(name);
                }
                Err(_) => {
                    tracing::warn!(
                        service = name,
                        grace_ms = grace.as_millis() as u64,
                        "Hosted service did not stop within grace period, aborting"
                    );
                    handle.abort();
                    report.timed_out.push(name);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Cooperative {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl HostedService for Cooperative {
        fn name(&self) -> &'static str {
            "cooperative"
        }

        async fn run(self: Arc<Self>, cancel: CancellationToken) {
            cancel.cancelled().await;
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct Stubborn;

    #[async_trait]
    impl HostedService for Stubborn {
        fn name(&self) -> &'static str {
            "stubborn"
        }

        async fn run(self: Arc<Self>, _cancel: CancellationToken) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }

    #[tokio::test]
    async fn shutdown_stops_cooperative_services() {
        let service = Arc::new(Cooperative {
            stopped: AtomicBool::new(false),
        });
        let mut host = ServiceHost::new();
        host.spawn(service.clone());

        let report = host.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.stopped, vec!["cooperative"]);
        assert!(report.timed_out.is_empty());
        assert!(service.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn shutdown_is_bounded_by_the_grace_period() {
        let mut host = ServiceHost::new();
        host.spawn(Arc::new(Stubborn));
        host.spawn(Arc::new(Cooperative {
            stopped: AtomicBool::new(false),
        }));

        let report = host.shutdown(Duration::from_millis(200)).await;
        assert_eq!(report.timed_out, vec!["stubborn"]);
        // The deadline is shared, so the second service gets no extra time
        // but had already observed cancellation.
        assert_eq!(report.stopped, vec!["cooperative"]);
    }

    #[tokio::test]
    async fn parent_token_cancels_hosted_services() {
        let parent = CancellationToken::new();
        let service = Arc::new(Cooperative {
            stopped: AtomicBool::new(false),
        });
        let mut host = ServiceHost::with_token(parent.clone());
        host.spawn(service.clone());

        parent.cancel();
        let report = host.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.stopped.len(), 1);
        assert!(service.stopped.load(Ordering::SeqCst));
    }
}
