//! Registry mapping `(domain, backend)` pairs to provider constructors.

use crate::error::MemoryError;
use crate::health::HealthStatus;
use crate::provider::episodic::InMemoryEpisodicMemory;
use crate::provider::knowledge::VectorKnowledgeMemory;
use crate::provider::profile::{InMemoryProfileMemory, SqliteProfileMemory};
use crate::provider::storage::{FileObjectStorage, InMemoryObjectStorage};
use crate::provider::working::InMemoryWorkingMemory;
use crate::provider::{EpisodicMemory, KnowledgeMemory, ObjectStorage, ProfileMemory, WorkingMemory};
use crate::vector::{Embedder, InMemoryVectorStore, SqliteVectorStore, VectorStore};
use log::{debug, info};
use mnemo_rs_config::{MemoryDomain, ProviderConfig};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A constructed provider tagged with its domain.
#[derive(Clone)]
pub enum DomainProvider {
    Working(Arc<dyn WorkingMemory>),
    Episodic(Arc<dyn EpisodicMemory>),
    Profile(Arc<dyn ProfileMemory>),
    Knowledge(Arc<dyn KnowledgeMemory>),
    Storage(Arc<dyn ObjectStorage>),
}

impl fmt::Debug for DomainProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DomainProvider({}:{})", self.domain(), self.name())
    }
}

impl DomainProvider {
    pub fn domain(&self) -> MemoryDomain {
        match self {
            DomainProvider::Working(_) => MemoryDomain::Working,
            DomainProvider::Episodic(_) => MemoryDomain::Episodic,
            DomainProvider::Profile(_) => MemoryDomain::Profile,
            DomainProvider::Knowledge(_) => MemoryDomain::Knowledge,
            DomainProvider::Storage(_) => MemoryDomain::Storage,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            DomainProvider::Working(provider) => provider.name(),
            DomainProvider::Episodic(provider) => provider.name(),
            DomainProvider::Profile(provider) => provider.name(),
            DomainProvider::Knowledge(provider) => provider.name(),
            DomainProvider::Storage(provider) => provider.name(),
        }
    }

    pub async fn initialize(&self) -> Result<(), MemoryError> {
        match self {
            DomainProvider::Working(provider) => provider.initialize().await,
            DomainProvider::Episodic(provider) => provider.initialize().await,
            DomainProvider::Profile(provider) => provider.initialize().await,
            DomainProvider::Knowledge(provider) => provider.initialize().await,
            DomainProvider::Storage(provider) => provider.initialize().await,
        }
    }

    pub async fn shutdown(&self) -> Result<(), MemoryError> {
        match self {
            DomainProvider::Working(provider) => provider.shutdown().await,
            DomainProvider::Episodic(provider) => provider.shutdown().await,
            DomainProvider::Profile(provider) => provider.shutdown().await,
            DomainProvider::Knowledge(provider) => provider.shutdown().await,
            DomainProvider::Storage(provider) => provider.shutdown().await,
        }
    }

    pub async fn health_check(&self) -> HealthStatus {
        match self {
            DomainProvider::Working(provider) => provider.health_check().await,
            DomainProvider::Episodic(provider) => provider.health_check().await,
            DomainProvider::Profile(provider) => provider.health_check().await,
            DomainProvider::Knowledge(provider) => provider.health_check().await,
            DomainProvider::Storage(provider) => provider.health_check().await,
        }
    }
}

/// Constructor for an uninitialized provider.
pub type ProviderConstructor =
    Arc<dyn Fn(&ProviderConfig) -> Result<DomainProvider, MemoryError> + Send + Sync>;

/// Explicit registry of provider backends, populated during bootstrap.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    constructors: Arc<RwLock<HashMap<(MemoryDomain, String), ProviderConstructor>>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<String> = self
            .constructors
            .read()
            .keys()
            .map(|(domain, backend)| format!("{domain}/{backend}"))
            .collect();
        keys.sort();
        f.debug_struct("ProviderRegistry").field("backends", &keys).finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in backend and the placeholder embedder.
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register_builtin(None);
        registry
    }

    /// Registry with every built-in backend, embedding through `embedder`.
    pub fn with_builtin_and_embedder(embedder: Arc<dyn Embedder>) -> Self {
        let registry = Self::new();
        registry.register_builtin(Some(embedder));
        registry
    }

    /// Register a constructor, replacing any previous one for the same key.
    pub fn register<F>(&self, domain: MemoryDomain, backend: impl Into<String>, constructor: F)
    where
        F: Fn(&ProviderConfig) -> Result<DomainProvider, MemoryError> + Send + Sync + 'static,
    {
        let backend = backend.into();
        let replaced = self
            .constructors
            .write()
            .insert((domain, backend.clone()), Arc::new(constructor))
            .is_some();
        if replaced {
            info!("replaced provider backend (domain={}, backend={})", domain, backend);
        } else {
            debug!("registered provider backend (domain={}, backend={})", domain, backend);
        }
    }

    pub fn contains(&self, domain: MemoryDomain, backend: &str) -> bool {
        self.constructors
            .read()
            .contains_key(&(domain, backend.to_string()))
    }

    /// Registered backend identifiers for a domain, sorted.
    pub fn backends(&self, domain: MemoryDomain) -> Vec<String> {
        let mut backends: Vec<String> = self
            .constructors
            .read()
            .keys()
            .filter(|(registered, _)| *registered == domain)
            .map(|(_, backend)| backend.clone())
            .collect();
        backends.sort();
        backends
    }

    /// Construct a fresh, uninitialized provider for `domain`.
    pub fn create(
        &self,
        domain: MemoryDomain,
        config: &ProviderConfig,
    ) -> Result<DomainProvider, MemoryError> {
        let constructor = self
            .constructors
            .read()
            .get(&(domain, config.provider.clone()))
            .cloned()
            .ok_or_else(|| MemoryError::ProviderNotFound {
                domain,
                backend: config.provider.clone(),
            })?;
        let provider = constructor(config)?;
        if provider.domain() != domain {
            return Err(MemoryError::DomainMismatch {
                expected: domain,
                actual: provider.domain(),
            });
        }
        debug!(
            "constructed provider (domain={}, backend={})",
            domain, config.provider
        );
        Ok(provider)
    }

    fn register_builtin(&self, embedder: Option<Arc<dyn Embedder>>) {
        self.register(MemoryDomain::Working, "memory", |config| {
            Ok(DomainProvider::Working(Arc::new(
                InMemoryWorkingMemory::from_config(config)?,
            )))
        });
        self.register(MemoryDomain::Episodic, "memory", |_| {
            Ok(DomainProvider::Episodic(Arc::new(InMemoryEpisodicMemory::new())))
        });
        self.register(MemoryDomain::Profile, "memory", |_| {
            Ok(DomainProvider::Profile(Arc::new(InMemoryProfileMemory::new())))
        });
        self.register(MemoryDomain::Profile, "sqlite", |config| {
            Ok(DomainProvider::Profile(Arc::new(
                SqliteProfileMemory::from_config(config)?,
            )))
        });
        let memory_embedder = embedder.clone();
        self.register(MemoryDomain::Knowledge, "memory", move |config| {
            let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
            Ok(DomainProvider::Knowledge(Arc::new(
                VectorKnowledgeMemory::from_config(config, store, memory_embedder.clone())?,
            )))
        });
        self.register(MemoryDomain::Knowledge, "sqlite", move |config| {
            let store: Arc<dyn VectorStore> = match config.param_path("path")? {
                Some(path) => Arc::new(SqliteVectorStore::new(path)),
                None => Arc::new(SqliteVectorStore::in_memory()),
            };
            Ok(DomainProvider::Knowledge(Arc::new(
                VectorKnowledgeMemory::from_config(config, store, embedder.clone())?,
            )))
        });
        self.register(MemoryDomain::Storage, "memory", |_| {
            Ok(DomainProvider::Storage(Arc::new(InMemoryObjectStorage::new())))
        });
        self.register(MemoryDomain::Storage, "file", |config| {
            Ok(DomainProvider::Storage(Arc::new(
                FileObjectStorage::from_config(config)?,
            )))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainProvider, ProviderRegistry};
    use crate::error::MemoryError;
    use crate::provider::profile::InMemoryProfileMemory;
    use mnemo_rs_config::{MemoryDomain, ProviderConfig};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn builtin_backends_are_listed() {
        let registry = ProviderRegistry::with_builtin();
        assert_eq!(registry.backends(MemoryDomain::Working), vec!["memory"]);
        assert_eq!(
            registry.backends(MemoryDomain::Knowledge),
            vec!["memory", "sqlite"]
        );
        assert_eq!(
            registry.backends(MemoryDomain::Storage),
            vec!["file", "memory"]
        );
        assert!(registry.contains(MemoryDomain::Profile, "sqlite"));
    }

    #[test]
    fn unknown_backend_is_provider_not_found() {
        let registry = ProviderRegistry::with_builtin();
        let err = registry
            .create(MemoryDomain::Episodic, &ProviderConfig::new("postgres"))
            .expect_err("missing backend");
        assert!(matches!(
            err,
            MemoryError::ProviderNotFound { domain: MemoryDomain::Episodic, ref backend } if backend == "postgres"
        ));
    }

    #[test]
    fn constructor_for_wrong_domain_is_rejected() {
        let registry = ProviderRegistry::new();
        registry.register(MemoryDomain::Working, "odd", |_| {
            Ok(DomainProvider::Profile(Arc::new(InMemoryProfileMemory::new())))
        });
        let err = registry
            .create(MemoryDomain::Working, &ProviderConfig::new("odd"))
            .expect_err("mismatch");
        assert!(matches!(err, MemoryError::DomainMismatch { .. }));
    }

    #[test]
    fn created_provider_carries_its_tag() {
        let registry = ProviderRegistry::with_builtin();
        let provider = registry
            .create(MemoryDomain::Profile, &ProviderConfig::new("memory"))
            .expect("create");
        assert_eq!(provider.domain(), MemoryDomain::Profile);
        assert_eq!(provider.name(), "memory");
    }
}
