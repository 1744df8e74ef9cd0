use mnemo_rs_config::{MemoryDomain, MemoryManagerConfig, ProviderConfig};

/// Config selecting the in-process backend for every domain.
pub fn memory_config() -> MemoryManagerConfig {
    MemoryManagerConfig::default()
}

/// Config selecting `backend` for every domain.
pub fn all_backends(backend: &str) -> MemoryManagerConfig {
    MemoryDomain::ALL
        .into_iter()
        .fold(MemoryManagerConfig::builder(), |builder, domain| {
            builder.provider(domain, ProviderConfig::new(backend))
        })
        .build()
}
