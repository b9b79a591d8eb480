//! Builder for [`ControlPlane`]

use crate::control_plane::ControlPlane;
use crate::events::EventAggregator;
use rudder_dispatch::{ExecutionBackend, JobDispatcher};
use rudder_release::{
    AesGcmCipher, ReleaseConfig, ReleaseManager, ReleaseTargetResolver, SecretCipher,
    WorkspaceCache,
};
use rudder_store::{DistributedMutex, InMemoryMutex, InMemoryStore, InMemoryTaskQueue, Store, TaskQueue};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tunables shared by the control plane subsystems
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub release: ReleaseConfig,

    /// How long a workspace snapshot is served before it is reloaded
    pub cache_ttl: Duration,

    /// Delay before a recompute that lost the system lock runs again
    pub requeue_delay: Duration,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            release: ReleaseConfig::default(),
            cache_ttl: Duration::from_secs(300),
            requeue_delay: ReleaseTargetResolver::DEFAULT_REQUEUE_DELAY,
        }
    }
}

/// Assembles a [`ControlPlane`]; anything left unset falls back to the
/// in-memory implementation
#[derive(Default)]
pub struct ControlPlaneBuilder {
    store: Option<Arc<dyn Store>>,
    queue: Option<Arc<dyn TaskQueue>>,
    mutex: Option<Arc<dyn DistributedMutex>>,
    cipher: Option<Arc<dyn SecretCipher>>,
    backends: Vec<Arc<dyn ExecutionBackend>>,
    events: Option<EventAggregator>,
    config: ControlPlaneConfig,
}

impl ControlPlaneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn TaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_mutex(mut self, mutex: Arc<dyn DistributedMutex>) -> Self {
        self.mutex = Some(mutex);
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Register an execution backend; a later backend of the same kind wins
    pub fn with_backend(mut self, backend: Arc<dyn ExecutionBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_events(mut self, events: EventAggregator) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_config(mut self, config: ControlPlaneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> ControlPlane {
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStore::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryTaskQueue::default()));
        let mutex = self
            .mutex
            .unwrap_or_else(|| Arc::new(InMemoryMutex::new()));
        let cipher = self
            .cipher
            .unwrap_or_else(|| Arc::new(AesGcmCipher::ephemeral()));
        let events = self.events.unwrap_or_default();

        let cache = Arc::new(WorkspaceCache::new(store.clone(), self.config.cache_ttl));
        let resolver = ReleaseTargetResolver::new(
            store.clone(),
            cache.clone(),
            mutex.clone(),
            queue.clone(),
            events.sender(),
        )
        .with_requeue_delay(self.config.requeue_delay);
        let manager = ReleaseManager::new(
            store.clone(),
            mutex,
            cipher,
            self.config.release,
            events.sender(),
        );
        let dispatcher = self
            .backends
            .into_iter()
            .fold(JobDispatcher::new(store.clone(), events.sender()), |d, backend| {
                d.with_backend(backend)
            });

        info!("Control plane assembled");
        ControlPlane {
            store,
            queue,
            cache,
            resolver,
            manager,
            dispatcher,
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rudder_dispatch::{BackendError, DispatchReceipt, JobAgentConfig};
    use rudder_types::{Job, JobAgentKind};

    struct Noop;

    #[async_trait]
    impl ExecutionBackend for Noop {
        fn kind(&self) -> JobAgentKind {
            JobAgentKind::Webhook
        }

        async fn dispatch(
            &self,
            _job: &Job,
            _config: &JobAgentConfig,
        ) -> Result<DispatchReceipt, BackendError> {
            Ok(DispatchReceipt::in_progress("ok"))
        }
    }

    #[test]
    fn test_defaults() {
        let config = ControlPlaneConfig::default();
        assert_eq!(config.release.candidate_limit, 100);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_build_registers_backends() {
        let control = ControlPlaneBuilder::new().with_backend(Arc::new(Noop)).build();
        assert!(control.dispatcher.supports(&JobAgentKind::Webhook));
        assert!(!control.dispatcher.supports(&JobAgentKind::GithubApp));
        assert_eq!(control.queue().pending().await.unwrap(), 0);
    }
}
