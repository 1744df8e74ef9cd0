//! Memory manager: owns one provider per domain and drives their lifecycle.

use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::provider::{EpisodicMemory, KnowledgeMemory, ObjectStorage, ProfileMemory, WorkingMemory};
use crate::registry::{DomainProvider, ProviderRegistry};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use log::{debug, error, info, warn};
use mnemo_rs_config::{MemoryDomain, MemoryManagerConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Manager lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerStatus {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Degraded,
    Shutdown,
}

impl fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ManagerStatus::Uninitialized => "uninitialized",
            ManagerStatus::Initializing => "initializing",
            ManagerStatus::Ready => "ready",
            ManagerStatus::Degraded => "degraded",
            ManagerStatus::Shutdown => "shutdown",
        };
        f.write_str(label)
    }
}

/// Aggregated result of polling every constructed provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: ManagerStatus,
    pub providers: BTreeMap<MemoryDomain, HealthStatus>,
    pub checked_at: DateTime<Utc>,
}

/// Receives each report produced by the periodic monitor.
pub type HealthCallback = Arc<dyn Fn(&HealthReport) + Send + Sync>;

struct HealthMonitor {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct ManagerInner {
    config: MemoryManagerConfig,
    registry: Arc<ProviderRegistry>,
    status: RwLock<ManagerStatus>,
    providers: RwLock<BTreeMap<MemoryDomain, DomainProvider>>,
    callback: RwLock<Option<HealthCallback>>,
    monitor: Mutex<Option<HealthMonitor>>,
    /// Held for the whole provider phase of `initialize`.
    startup: tokio::sync::Mutex<()>,
}

impl ManagerInner {
    fn status(&self) -> ManagerStatus {
        *self.status.read()
    }

    /// Move to `next` unless the manager was shut down meanwhile.
    fn settle(&self, next: ManagerStatus) {
        let mut status = self.status.write();
        if *status != ManagerStatus::Shutdown {
            *status = next;
        }
    }

    fn snapshot(&self) -> Vec<(MemoryDomain, DomainProvider)> {
        self.providers
            .read()
            .iter()
            .map(|(domain, provider)| (*domain, provider.clone()))
            .collect()
    }

    /// Construct missing providers; ones built by an earlier attempt are reused.
    fn construct_providers(&self) -> Result<Vec<(MemoryDomain, DomainProvider)>, MemoryError> {
        let mut providers = self.providers.write();
        for domain in MemoryDomain::ALL {
            if providers.contains_key(&domain) {
                continue;
            }
            let provider = self.registry.create(domain, self.config.provider(domain))?;
            providers.insert(domain, provider);
        }
        Ok(providers
            .iter()
            .map(|(domain, provider)| (*domain, provider.clone()))
            .collect())
    }

    async fn health_check(&self) -> HealthReport {
        let checks = self.snapshot().into_iter().map(|(domain, provider)| async move {
            let started = Instant::now();
            let status = match tokio::spawn(async move { provider.health_check().await }).await {
                Ok(status) => status,
                Err(err) => {
                    warn!("provider health check aborted (domain={}): {}", domain, err);
                    HealthStatus::from_error(started, format!("health check aborted: {err}"))
                }
            };
            (domain, status)
        });
        let providers: BTreeMap<MemoryDomain, HealthStatus> = join_all(checks).await.into_iter().collect();

        let current = self.status();
        let aggregate = if current == ManagerStatus::Shutdown {
            ManagerStatus::Shutdown
        } else if providers.is_empty() {
            current
        } else if providers.values().all(HealthStatus::is_healthy) {
            ManagerStatus::Ready
        } else {
            ManagerStatus::Degraded
        };

        if !providers.is_empty() {
            let mut status = self.status.write();
            if matches!(*status, ManagerStatus::Ready | ManagerStatus::Degraded) && *status != aggregate {
                info!("memory manager status changed (from={}, to={})", *status, aggregate);
                *status = aggregate;
            }
        }
        debug!(
            "memory health checked (status={}, providers={})",
            aggregate,
            providers.len()
        );
        HealthReport {
            status: aggregate,
            providers,
            checked_at: Utc::now(),
        }
    }
}

/// Orchestrates the five memory domains.
///
/// ```text
/// uninitialized -> initializing -> ready | degraded -> shutdown
/// ```
#[derive(Clone)]
pub struct MemoryManager {
    inner: Arc<ManagerInner>,
}

impl fmt::Debug for MemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryManager")
            .field("status", &self.status())
            .field("providers", &self.inner.providers.read().len())
            .finish()
    }
}

impl MemoryManager {
    pub fn new(config: MemoryManagerConfig, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                registry,
                status: RwLock::new(ManagerStatus::Uninitialized),
                providers: RwLock::new(BTreeMap::new()),
                callback: RwLock::new(None),
                monitor: Mutex::new(None),
                startup: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Callback used by the monitor started from `initialize`.
    pub fn with_health_callback(self, callback: HealthCallback) -> Self {
        *self.inner.callback.write() = Some(callback);
        self
    }

    pub fn status(&self) -> ManagerStatus {
        self.inner.status()
    }

    pub fn config(&self) -> &MemoryManagerConfig {
        &self.inner.config
    }

    /// Construct and initialize every provider concurrently.
    ///
    /// A no-op when already ready or initializing. On failure the manager is
    /// left degraded with its providers as they are; calling again retries.
    pub async fn initialize(&self) -> Result<(), MemoryError> {
        let Ok(_startup) = self.inner.startup.try_lock() else {
            if self.status() == ManagerStatus::Shutdown {
                return Err(MemoryError::not_ready("memory manager", ManagerStatus::Shutdown));
            }
            debug!("memory manager initialization already in progress");
            return Ok(());
        };
        {
            let mut status = self.inner.status.write();
            match *status {
                ManagerStatus::Ready | ManagerStatus::Initializing => return Ok(()),
                ManagerStatus::Shutdown => {
                    return Err(MemoryError::not_ready("memory manager", ManagerStatus::Shutdown));
                }
                ManagerStatus::Uninitialized | ManagerStatus::Degraded => {
                    *status = ManagerStatus::Initializing;
                }
            }
        }
        info!("initializing memory manager");

        let result = self.initialize_providers().await;
        match &result {
            Ok(()) => {
                self.inner.settle(ManagerStatus::Ready);
                info!("memory manager ready");
            }
            Err(err) => {
                self.inner.settle(ManagerStatus::Degraded);
                error!("memory manager initialization failed: {}", err);
            }
        }
        if let Some(interval) = self.inner.config.health.interval() {
            if self.inner.monitor.lock().is_none() && self.status() != ManagerStatus::Shutdown {
                let callback = self.inner.callback.read().clone();
                self.start_health_monitor(interval, callback);
            }
        }
        result
    }

    async fn initialize_providers(&self) -> Result<(), MemoryError> {
        let providers = self.inner.construct_providers()?;
        let results = join_all(providers.iter().map(|(domain, provider)| async move {
            (*domain, provider.initialize().await)
        }))
        .await;
        let mut first_failure = None;
        for (domain, result) in results {
            if let Err(err) = result {
                warn!(
                    "provider initialization failed (domain={}, backend={}): {}",
                    domain,
                    self.inner.config.provider(domain).provider,
                    err
                );
                if first_failure.is_none() {
                    first_failure = Some((domain, err));
                }
            }
        }
        match first_failure {
            Some((domain, err)) => Err(MemoryError::InitializationFailure {
                domain,
                source: Box::new(err),
            }),
            None => Ok(()),
        }
    }

    /// Stop monitoring and shut every provider down concurrently.
    ///
    /// Waits for an in-flight `initialize` so that every provider it builds is
    /// shut down. Provider failures are logged and do not stop sibling shutdowns.
    pub async fn shutdown(&self) {
        {
            let mut status = self.inner.status.write();
            if *status == ManagerStatus::Shutdown {
                return;
            }
            *status = ManagerStatus::Shutdown;
        }
        let _startup = self.inner.startup.lock().await;
        self.stop_health_monitor().await;
        let providers = self.inner.snapshot();
        join_all(providers.iter().map(|(domain, provider)| async move {
            if let Err(err) = provider.shutdown().await {
                warn!("provider shutdown failed (domain={}): {}", domain, err);
            }
        }))
        .await;
        info!("memory manager shutdown (providers={})", providers.len());
    }

    /// Poll every constructed provider and update the manager status.
    ///
    /// Never fails; a provider whose check panics is reported unhealthy.
    pub async fn health_check(&self) -> HealthReport {
        self.inner.health_check().await
    }

    /// Spawn the periodic health monitor, replacing any running one.
    ///
    /// Ticks never overlap: a check that outlasts the interval delays the next
    /// one and missed ticks are skipped. Must be called within a tokio runtime.
    pub fn start_health_monitor(&self, interval: Duration, callback: Option<HealthCallback>) {
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        let (cancel, mut cancelled) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancelled.changed() => break,
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let report = inner.health_check().await;
                drop(inner);
                if let Some(callback) = &callback {
                    callback(&report);
                }
            }
            debug!("health monitor stopped");
        });
        let previous = self
            .inner
            .monitor
            .lock()
            .replace(HealthMonitor { cancel, handle });
        if let Some(previous) = previous {
            let _ = previous.cancel.send(true);
            previous.handle.abort();
        }
        info!("health monitor started (interval_ms={})", interval.as_millis());
    }

    /// Cancel the monitor and wait for it to exit.
    pub async fn stop_health_monitor(&self) {
        let monitor = self.inner.monitor.lock().take();
        if let Some(monitor) = monitor {
            let _ = monitor.cancel.send(true);
            if let Err(err) = monitor.handle.await {
                warn!("health monitor ended abnormally: {}", err);
            }
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner.monitor.lock().is_some()
    }

    fn ensure_accessible(&self, domain: MemoryDomain) -> Result<(), MemoryError> {
        match self.status() {
            ManagerStatus::Ready | ManagerStatus::Degraded => Ok(()),
            other => Err(MemoryError::not_ready(format!("{domain} memory"), other)),
        }
    }

    fn provider(&self, domain: MemoryDomain) -> Result<DomainProvider, MemoryError> {
        self.ensure_accessible(domain)?;
        self.inner
            .providers
            .read()
            .get(&domain)
            .cloned()
            .ok_or_else(|| MemoryError::not_ready(format!("{domain} memory"), "not constructed"))
    }

    pub fn working(&self) -> Result<Arc<dyn WorkingMemory>, MemoryError> {
        match self.provider(MemoryDomain::Working)? {
            DomainProvider::Working(provider) => Ok(provider),
            other => Err(mismatch(MemoryDomain::Working, &other)),
        }
    }

    pub fn episodic(&self) -> Result<Arc<dyn EpisodicMemory>, MemoryError> {
        match self.provider(MemoryDomain::Episodic)? {
            DomainProvider::Episodic(provider) => Ok(provider),
            other => Err(mismatch(MemoryDomain::Episodic, &other)),
        }
    }

    pub fn profile(&self) -> Result<Arc<dyn ProfileMemory>, MemoryError> {
        match self.provider(MemoryDomain::Profile)? {
            DomainProvider::Profile(provider) => Ok(provider),
            other => Err(mismatch(MemoryDomain::Profile, &other)),
        }
    }

    pub fn knowledge(&self) -> Result<Arc<dyn KnowledgeMemory>, MemoryError> {
        match self.provider(MemoryDomain::Knowledge)? {
            DomainProvider::Knowledge(provider) => Ok(provider),
            other => Err(mismatch(MemoryDomain::Knowledge, &other)),
        }
    }

    pub fn storage(&self) -> Result<Arc<dyn ObjectStorage>, MemoryError> {
        match self.provider(MemoryDomain::Storage)? {
            DomainProvider::Storage(provider) => Ok(provider),
            other => Err(mismatch(MemoryDomain::Storage, &other)),
        }
    }
}

fn mismatch(expected: MemoryDomain, provider: &DomainProvider) -> MemoryError {
    MemoryError::DomainMismatch {
        expected,
        actual: provider.domain(),
    }
}
