//! Shared stores handed to the router at startup.

use std::sync::Arc;

use crossbar_commands::{
    MemoryPreferenceStore, MemoryWelcomeStore, PreferenceStore, WelcomeStore,
};
use crossbar_database::CorrelationRepository;
use crossbar_gateway::{
    CorrelationStore, DurableCorrelationStore, MemoryCorrelationStore, Translator,
};

/// Where each gateway keeps its correlation window.
#[derive(Clone)]
pub enum CorrelationBackend {
    Memory { capacity: usize },
    Durable {
        repository: CorrelationRepository,
        max_rows: u64,
    },
}

impl CorrelationBackend {
    /// A fresh store scoped to one gateway.
    pub fn store_for(&self, gateway: &str) -> Arc<dyn CorrelationStore> {
        match self {
            Self::Memory { capacity } => Arc::new(MemoryCorrelationStore::new(*capacity)),
            Self::Durable {
                repository,
                max_rows,
            } => Arc::new(DurableCorrelationStore::new(
                gateway,
                repository.clone(),
                *max_rows,
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Memory { .. } => "memory",
            Self::Durable { .. } => "sqlite",
        }
    }
}

#[derive(Clone)]
pub struct RouterServices {
    pub correlation: CorrelationBackend,
    pub preferences: Arc<dyn PreferenceStore>,
    pub welcomes: Arc<dyn WelcomeStore>,
    pub translator: Option<Arc<dyn Translator>>,
}

impl RouterServices {
    /// Everything in memory; nothing survives a restart.
    pub fn in_memory(cache_size: usize) -> Self {
        Self {
            correlation: CorrelationBackend::Memory {
                capacity: cache_size,
            },
            preferences: Arc::new(MemoryPreferenceStore::new()),
            welcomes: Arc::new(MemoryWelcomeStore::new()),
            translator: None,
        }
    }
}
