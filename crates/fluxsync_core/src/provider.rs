//! Provider registry.
//!
//! Built once at startup and shared by reference; nothing mutates it after
//! [`ProviderRegistryBuilder::build`].

use crate::error::{CoreError, CoreResult};
use crate::store::AttributeStore;
use crate::types::ConnectionId;
use std::collections::{BTreeMap, HashMap};

/// Static description of a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    /// Lowercase name used as the lookup key, e.g. `evernote`.
    pub name: String,
    /// Stable numeric id.
    pub id: u32,
    /// Name shown to users.
    pub display_name: String,
    /// Attribute keys copied from the deployment settings onto every new
    /// connection of this provider.
    pub attribute_keys: Vec<String>,
    /// Disabled providers cannot be connected.
    pub enabled: bool,
}

impl ProviderInfo {
    /// Creates an enabled provider with no required attributes.
    #[must_use]
    pub fn new(name: impl Into<String>, id: u32, display_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id,
            display_name: display_name.into(),
            attribute_keys: Vec::new(),
            enabled: true,
        }
    }

    /// Adds a required attribute key.
    #[must_use]
    pub fn with_attribute_key(mut self, key: impl Into<String>) -> Self {
        self.attribute_keys.push(key.into());
        self
    }

    /// Sets whether the provider can be connected.
    #[must_use]
    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Immutable name and id lookup of providers.
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    by_name: BTreeMap<String, ProviderInfo>,
}

impl Default for ProviderRegistry {
    /// The providers this build ships adapters for.
    fn default() -> Self {
        Self::builder()
            .register(
                ProviderInfo::new("evernote", 17, "Evernote")
                    .with_attribute_key("evernoteConsumerKey")
                    .with_attribute_key("evernoteConsumerSecret"),
            )
            .build()
    }
}

impl ProviderRegistry {
    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Looks a provider up by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ProviderInfo> {
        self.by_name.get(name)
    }

    /// Looks a provider up by numeric id.
    #[must_use]
    pub fn by_id(&self, id: u32) -> Option<&ProviderInfo> {
        self.by_name.values().find(|p| p.id == id)
    }

    /// Every provider, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderInfo> {
        self.by_name.values()
    }

    /// Copies the provider's required attributes from `settings` onto a new
    /// connection.
    ///
    /// Nothing is written unless every required key has a value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownProvider`] for unknown or disabled
    /// providers and [`CoreError::MissingAttribute`] if a key has no value.
    pub fn populate_attributes(
        &self,
        provider: &str,
        connection_id: ConnectionId,
        settings: &HashMap<String, String>,
        store: &dyn AttributeStore,
    ) -> CoreResult<usize> {
        let info = self
            .get(provider)
            .filter(|info| info.enabled)
            .ok_or_else(|| CoreError::UnknownProvider(provider.to_string()))?;

        let mut values = Vec::with_capacity(info.attribute_keys.len());
        for key in &info.attribute_keys {
            let value = settings.get(key).ok_or_else(|| CoreError::MissingAttribute {
                provider: provider.to_string(),
                key: key.clone(),
            })?;
            values.push((key, value));
        }

        for (key, value) in &values {
            store.set(connection_id, key, value)?;
        }
        Ok(values.len())
    }
}

/// Builder for [`ProviderRegistry`].
#[derive(Debug, Default)]
pub struct ProviderRegistryBuilder {
    by_name: BTreeMap<String, ProviderInfo>,
}

impl ProviderRegistryBuilder {
    /// Adds a provider, replacing any earlier one with the same name.
    #[must_use]
    pub fn register(mut self, info: ProviderInfo) -> Self {
        self.by_name.insert(info.name.clone(), info);
        self
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            by_name: self.by_name,
        }
    }
}
