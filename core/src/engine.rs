//! Analysis engine seam and the provider registry that resolves a
//! configured engine name into a live instance.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use tracing::error;

use bintriage_protocol::AnalysisResult;
use bintriage_protocol::BinaryMetadata;

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::error::EngineError;

/// One analysis engine. Invoked strictly sequentially by the dispatcher
/// with already-validated metadata.
pub trait AnalysisEngine: Send + Sync {
    fn name(&self) -> &str;

    fn analyze(&self, metadata: &BinaryMetadata) -> Result<AnalysisResult, EngineError>;
}

/// Factory resolved from a configured provider name.
pub type EngineFactory =
    Arc<dyn Fn(&EngineConfig) -> Result<Arc<dyn AnalysisEngine>, ConfigError> + Send + Sync>;

/// Registry of engine providers keyed by name. Engines are linked into the
/// binary and registered at startup; there is no dynamic loading.
#[derive(Default)]
pub struct EngineRegistry {
    factories: RwLock<HashMap<String, EngineFactory>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, provider: impl Into<String>, factory: EngineFactory) {
        let mut guard = self.factories.write().expect("engine registry lock");
        guard.insert(provider.into(), factory);
    }

    pub fn create(&self, config: &EngineConfig) -> Result<Arc<dyn AnalysisEngine>, ConfigError> {
        let factory = {
            let guard = self.factories.read().expect("engine registry lock");
            guard.get(&config.provider).cloned()
        };
        let result = match factory {
            Some(factory) => factory(config),
            None => Err(ConfigError::UnknownEngineProvider(config.provider.clone())),
        };
        if let Err(err) = &result {
            error!(
                provider = %config.provider,
                %err,
                "Failed to create Local Engine Manager. Check your configuration"
            );
        }
        result
    }
}
