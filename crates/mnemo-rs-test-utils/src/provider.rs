use async_trait::async_trait;
use mnemo_rs_config::MemoryDomain;
use mnemo_rs_memory::{
    DomainProvider, HealthStatus, MemoryError, Message, Provider, ProviderRegistry, WorkingMemory,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// How a [`StubWorkingMemory`] responds to lifecycle calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Initializes and reports healthy.
    Healthy,
    /// Rejects every initialize call.
    FailInitialize,
    /// Initializes, then panics inside health checks.
    PanicOnHealth,
    /// Initializes, then reports unhealthy.
    Unhealthy,
}

/// Working memory stub that records lifecycle calls.
#[derive(Debug)]
pub struct StubWorkingMemory {
    behavior: Mutex<StubBehavior>,
    gate: Mutex<Option<Arc<Notify>>>,
    constructions: AtomicUsize,
    initialize_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
    health_calls: AtomicUsize,
}

impl StubWorkingMemory {
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            gate: Mutex::new(None),
            constructions: AtomicUsize::new(0),
            initialize_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
            health_calls: AtomicUsize::new(0),
        }
    }

    /// Register under `backend` so every construction yields this instance.
    pub fn register(
        registry: &ProviderRegistry,
        backend: &str,
        behavior: StubBehavior,
    ) -> Arc<StubWorkingMemory> {
        let stub = Arc::new(Self::new(behavior));
        let shared = stub.clone();
        registry.register(MemoryDomain::Working, backend, move |_| {
            shared.constructions.fetch_add(1, Ordering::SeqCst);
            Ok(DomainProvider::Working(shared.clone()))
        });
        stub
    }

    pub fn set_behavior(&self, behavior: StubBehavior) {
        *self.behavior.lock() = behavior;
    }

    /// Make the next initialize calls wait until the returned gate is notified.
    pub fn hold_initialize(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Times the registry constructor handed out this stub.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    fn behavior(&self) -> StubBehavior {
        *self.behavior.lock()
    }
}

#[async_trait]
impl Provider for StubWorkingMemory {
    fn name(&self) -> &str {
        "stub"
    }

    async fn initialize(&self) -> Result<(), MemoryError> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.behavior() {
            StubBehavior::FailInitialize => {
                Err(MemoryError::Store("stub rejected initialize".to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<(), MemoryError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior() {
            StubBehavior::PanicOnHealth => panic!("stub health check panicked"),
            StubBehavior::Healthy => HealthStatus::healthy(Duration::ZERO, json!({})),
            StubBehavior::FailInitialize | StubBehavior::Unhealthy => {
                HealthStatus::unhealthy(Duration::ZERO, json!({ "error": "stub unhealthy" }))
            }
        }
    }
}

#[async_trait]
impl WorkingMemory for StubWorkingMemory {
    async fn append_message(
        &self,
        _user_id: &str,
        _session_id: &str,
        _message: Message,
    ) -> Result<bool, MemoryError> {
        Ok(true)
    }

    async fn recent_messages(
        &self,
        _user_id: &str,
        _session_id: &str,
        _limit: usize,
    ) -> Result<Vec<Message>, MemoryError> {
        Ok(Vec::new())
    }

    async fn set_variable(
        &self,
        _user_id: &str,
        _session_id: &str,
        _key: &str,
        _value: serde_json::Value,
    ) -> Result<(), MemoryError> {
        Ok(())
    }

    async fn get_variable(
        &self,
        _user_id: &str,
        _session_id: &str,
        _key: &str,
    ) -> Result<Option<serde_json::Value>, MemoryError> {
        Ok(None)
    }

    async fn remove_variable(
        &self,
        _user_id: &str,
        _session_id: &str,
        _key: &str,
    ) -> Result<bool, MemoryError> {
        Ok(false)
    }

    async fn clear_session(&self, _user_id: &str, _session_id: &str) -> Result<bool, MemoryError> {
        Ok(false)
    }

    async fn sessions(&self, _user_id: &str) -> Result<Vec<String>, MemoryError> {
        Ok(Vec::new())
    }
}
