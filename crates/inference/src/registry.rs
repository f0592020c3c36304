use crate::backend::{ContextMetadata, ExecutionContext};
use crate::error::Result;
use crate::model::{Model, ModelInfo};
use crate::pipeline::ModelContext;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

pub const LATEST: &str = "latest";

/// Catalog of models by `(id, version)` and execution contexts by name.
///
/// Populated at startup, then read concurrently by request handlers.
#[derive(Default)]
pub struct Registry {
    models: RwLock<BTreeMap<(String, String), Arc<Model>>>,
    contexts: RwLock<BTreeMap<String, Arc<dyn ExecutionContext>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model, returning the one it replaced under the same key.
    pub fn register_model(&self, model: impl Into<Arc<Model>>) -> Option<Arc<Model>> {
        let model = model.into();
        let key = (model.id().to_string(), model.version().to_string());
        let replaced = self
            .models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, model.clone());
        if replaced.is_some() {
            tracing::warn!(model = %model.key(), "Replaced registered model");
        } else {
            tracing::info!(model = %model.key(), task = %model.task_type(), "Registered model");
        }
        replaced
    }

    pub fn register_context(
        &self,
        name: impl Into<String>,
        context: Arc<dyn ExecutionContext>,
    ) -> Option<Arc<dyn ExecutionContext>> {
        let name = name.into();
        let metadata = context.metadata();
        tracing::info!(
            context = %name,
            backend = %metadata.backend_type,
            device = %metadata.device,
            "Registered execution context"
        );
        self.contexts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, context)
    }

    /// Look up a model by exact version, or the highest version for [`LATEST`].
    pub fn get_model(&self, id: &str, version: &str) -> Option<Arc<Model>> {
        let models = self.models.read().unwrap_or_else(PoisonError::into_inner);
        if version == LATEST {
            let versions: Vec<&str> = models
                .keys()
                .filter(|(model_id, _)| model_id == id)
                .map(|(_, v)| v.as_str())
                .collect();
            let latest = latest_version(&versions)?;
            return models.get(&(id.to_string(), latest.to_string())).cloned();
        }
        models.get(&(id.to_string(), version.to_string())).cloned()
    }

    pub fn get_context(&self, name: &str) -> Option<Arc<dyn ExecutionContext>> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Bind a model to a context, loading it on first use.
    ///
    /// Returns `Ok(None)` when either the model or the context is unknown.
    #[tracing::instrument(skip(self))]
    pub fn create_pair(
        &self,
        model_id: &str,
        version: &str,
        context_name: &str,
    ) -> Result<Option<ModelContext>> {
        let Some(model) = self.get_model(model_id, version) else {
            tracing::debug!("Model not registered");
            return Ok(None);
        };
        let Some(context) = self.get_context(context_name) else {
            tracing::debug!("Context not registered");
            return Ok(None);
        };

        model.load(context_name, context.clone())?;
        Ok(Some(ModelContext::new(model, context_name, context)))
    }

    /// Info for every registered model, ordered by id then version.
    pub fn list_models(&self) -> Vec<ModelInfo> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|m| m.info())
            .collect()
    }

    pub fn list_contexts(&self) -> BTreeMap<String, ContextMetadata> {
        self.contexts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, context)| (name.clone(), context.metadata()))
            .collect()
    }

    /// `None` for an unknown id or version, like [`Registry::create_pair`].
    pub fn model_metadata(&self, id: &str, version: &str) -> Option<ModelInfo> {
        self.get_model(id, version).map(|m| m.info())
    }
}

/// Highest version under dot-separated numeric ordering.
///
/// If any version has a non-numeric segment, all versions compare as plain strings.
pub fn latest_version<'a>(versions: &[&'a str]) -> Option<&'a str> {
    let parsed: Option<Vec<Vec<u64>>> = versions.iter().map(|v| parse_version(v)).collect();
    match parsed {
        Some(numeric) => versions
            .iter()
            .zip(numeric.iter())
            .max_by(|(_, a), (_, b)| a.cmp(b))
            .map(|(v, _)| *v),
        None => versions.iter().copied().max(),
    }
}

fn parse_version(version: &str) -> Option<Vec<u64>> {
    version.split('.').map(|s| s.parse().ok()).collect()
}
