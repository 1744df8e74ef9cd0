//! Public SDK surface for mnemo.
//!
//! This crate re-exports the config and memory crates and provides small
//! helpers to keep consumer setup consistent.

use log::info;
use mnemo_rs_config::MemoryManagerConfig;
use mnemo_rs_memory::{Embedder, MemoryError, MemoryManager, ProviderRegistry};
use std::path::Path;
use std::sync::Arc;

/// Re-export for convenience.
pub use mnemo_rs_config as config;
/// Re-export for convenience.
pub use mnemo_rs_memory as memory;

#[inline]
/// Initialize logging using env_logger if the "logging" feature is enabled.
///
/// This is a no-op if the feature is not enabled. Binaries are still expected
/// to call this early in startup to ensure log output is wired up.
pub fn init_logging() {
    #[cfg(feature = "logging")]
    {
        let _ = env_logger::try_init();
    }
}

/// Build an uninitialized manager over the built-in backends.
pub fn bootstrap(config: MemoryManagerConfig) -> Result<MemoryManager, MemoryError> {
    bootstrap_with_registry(config, ProviderRegistry::with_builtin())
}

/// Like [`bootstrap`], embedding knowledge memories through `embedder`.
pub fn bootstrap_with_embedder(
    config: MemoryManagerConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<MemoryManager, MemoryError> {
    bootstrap_with_registry(config, ProviderRegistry::with_builtin_and_embedder(embedder))
}

/// Load the layered config rooted at `cwd` and bootstrap from it.
pub fn bootstrap_layered(cwd: impl AsRef<Path>) -> Result<MemoryManager, MemoryError> {
    let layered = MemoryManagerConfig::load_layered(cwd)?;
    for layer in &layered.layers {
        info!(
            "using config layer (source={:?}, path={})",
            layer.source,
            layer.path.display()
        );
    }
    bootstrap(layered.config)
}

fn bootstrap_with_registry(
    config: MemoryManagerConfig,
    registry: ProviderRegistry,
) -> Result<MemoryManager, MemoryError> {
    config.validate()?;
    for domain in mnemo_rs_config::MemoryDomain::ALL {
        let backend = &config.provider(domain).provider;
        if !registry.contains(domain, backend) {
            return Err(MemoryError::ProviderNotFound {
                domain,
                backend: backend.clone(),
            });
        }
    }
    Ok(MemoryManager::new(config, Arc::new(registry)))
}
