use crate::cachet::{CachetError, ComponentMap, IncidentClient};
use crate::types::ComponentId;
use tracing::debug;

/// Maps component names to CachetHQ ids.
pub struct ComponentResolver<'a> {
    client: &'a dyn IncidentClient,
}

impl<'a> ComponentResolver<'a> {
    pub fn new(client: &'a dyn IncidentClient) -> Self {
        Self { client }
    }

    /// Name to id mapping of every known component.
    pub async fn component_map(&self) -> Result<ComponentMap, CachetError> {
        let components = self.client.list_components().await?;
        debug!("resolved {} CachetHQ components", components.len());
        Ok(components)
    }

    pub async fn resolve(&self, name: &str) -> Result<ComponentId, CachetError> {
        self.client.search_component(name).await
    }
}
