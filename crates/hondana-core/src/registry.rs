use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::models::SourceInfo;
use crate::traits::Source;

/// Immutable map of source id to adapter, built once at startup.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    sources: Arc<HashMap<String, Arc<dyn Source>>>,
}

impl SourceRegistry {
    pub fn builder() -> SourceRegistryBuilder {
        SourceRegistryBuilder::default()
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn Source>, AppError> {
        self.sources
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::UnknownSource(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Identity of every source, sorted by display name ignoring case.
    pub fn list(&self) -> Vec<SourceInfo> {
        let mut infos: Vec<SourceInfo> = self
            .sources
            .values()
            .map(|s| SourceInfo {
                id: s.id().to_string(),
                name: s.display_name().to_string(),
                nsfw: s.nsfw(),
            })
            .collect();
        infos.sort_by_cached_key(|info| (info.name.to_lowercase(), info.id.clone()));
        infos
    }
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.sources.keys().collect();
        ids.sort();
        f.debug_struct("SourceRegistry").field("sources", &ids).finish()
    }
}

#[derive(Default)]
pub struct SourceRegistryBuilder {
    sources: Vec<Arc<dyn Source>>,
}

impl SourceRegistryBuilder {
    pub fn register(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    /// Fails if two adapters claim the same id.
    pub fn build(self) -> Result<SourceRegistry, AppError> {
        let mut map = HashMap::with_capacity(self.sources.len());
        for source in self.sources {
            let id = source.id().to_string();
            if id.trim().is_empty() {
                return Err(AppError::ConfigError(format!(
                    "Source '{}' has an empty id",
                    source.display_name()
                )));
            }
            if map.insert(id.clone(), source).is_some() {
                return Err(AppError::ConfigError(format!(
                    "Duplicate source id: {id}"
                )));
            }
        }
        tracing::info!(sources = map.len(), "Source registry built");
        Ok(SourceRegistry {
            sources: Arc::new(map),
        })
    }
}
