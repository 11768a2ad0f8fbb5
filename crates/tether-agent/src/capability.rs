//! Capability trait and catalog

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{CapabilityError, OperationError};

/// Catalog entry describing a capability to the think step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl CapabilitySpec {
    /// Render as a `<tool>` block for a prompt
    pub fn render(&self) -> String {
        format!(
            "<tool>\n    <name>{}</name>\n    <description>{}</description>\n    <schema>{}</schema>\n</tool>",
            self.name, self.description, self.input_schema
        )
    }
}

/// Render a whole catalog, one block per capability
pub fn render_catalog(catalog: &[CapabilitySpec]) -> String {
    catalog
        .iter()
        .map(CapabilitySpec::render)
        .collect::<Vec<_>>()
        .join("\n")
}

/// An externally implemented operation the reasoning step may request.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Capability name (used in action requests)
    fn name(&self) -> &str;

    /// Description for the reasoning step
    fn description(&self) -> &str;

    /// JSON Schema for the input
    fn input_schema(&self) -> serde_json::Value;

    /// Run the capability
    async fn invoke(&self, input: serde_json::Value) -> Result<String, CapabilityError>;
}

/// Type alias for a shared capability
pub type BoxedCapability = Arc<dyn Capability>;

pub fn to_spec(capability: &dyn Capability) -> CapabilitySpec {
    CapabilitySpec {
        name: capability.name().to_string(),
        description: capability.description().to_string(),
        input_schema: capability.input_schema(),
    }
}

/// Where capabilities come from.
///
/// Queried fresh for every think and act call so pluggable providers can
/// change between steps. An empty list is valid.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn capabilities(&self) -> Result<Vec<BoxedCapability>, OperationError>;
}

/// A fixed set of capabilities
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<BoxedCapability>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability, replacing any existing one with the same name
    pub fn register(&mut self, capability: BoxedCapability) {
        self.capabilities.retain(|c| c.name() != capability.name());
        self.capabilities.push(capability);
    }

    pub fn with(mut self, capability: BoxedCapability) -> Self {
        self.register(capability);
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

#[async_trait]
impl CapabilitySource for CapabilityRegistry {
    async fn capabilities(&self) -> Result<Vec<BoxedCapability>, OperationError> {
        Ok(self.capabilities.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoCapability;

    #[async_trait]
    impl Capability for EchoCapability {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } }
            })
        }
        async fn invoke(&self, input: serde_json::Value) -> Result<String, CapabilityError> {
            Ok(input
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)")
                .to_string())
        }
    }

    #[test]
    fn test_to_spec() {
        let spec = to_spec(&EchoCapability);
        assert_eq!(spec.name, "echo");
        assert_eq!(spec.description, "Echoes input");
        assert_eq!(spec.input_schema["type"], "object");
    }

    #[test]
    fn test_render_catalog() {
        let spec = to_spec(&EchoCapability);
        let rendered = render_catalog(&[spec.clone(), spec]);
        assert_eq!(rendered.matches("<tool>").count(), 2);
        assert!(rendered.contains("<name>echo</name>"));
        assert!(rendered.contains("<schema>{"));
        assert!(rendered.contains("\"text\""));
    }

    #[test]
    fn test_render_empty_catalog() {
        assert_eq!(render_catalog(&[]), "");
    }

    #[tokio::test]
    async fn test_registry_replaces_same_name() {
        let registry = CapabilityRegistry::new()
            .with(Arc::new(EchoCapability))
            .with(Arc::new(EchoCapability));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.capabilities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_registry_is_valid() {
        let registry = CapabilityRegistry::new();
        assert!(registry.capabilities().await.unwrap().is_empty());
    }
}
