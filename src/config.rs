use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Load-order configuration for a graph submission.
///
/// `dependency_order` is a topological ordering of logical type names,
/// vertices with no dependencies first. Entries prefixed with `_` are
/// internal markers, and `Program`/`Project` are structural roots owned by
/// the bootstrapper; both are dropped from the processing order.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct LoadConfig {
    pub dependency_order: Vec<String>,
}

/// Logical types that are bootstrapped, never bulk-loaded.
pub const STRUCTURAL_TYPES: [&str; 2] = ["Program", "Project"];

impl LoadConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// The ordered list of types the vertex and edge loaders process.
    pub fn processing_order(&self) -> Vec<String> {
        self.dependency_order
            .iter()
            .filter(|name| !name.starts_with('_'))
            .filter(|name| !STRUCTURAL_TYPES.contains(&name.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialization() {
        let yaml_str = r#"
dependency_order:
  - _definitions
  - Program
  - Project
  - Patient
  - Observation
"#;

        let config: LoadConfig = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(config.dependency_order.len(), 5);
        assert_eq!(config.dependency_order[3], "Patient");
    }

    #[test]
    fn test_processing_order_drops_markers_and_structural_types() {
        let config = LoadConfig {
            dependency_order: vec![
                "_definitions".to_string(),
                "_terms".to_string(),
                "Program".to_string(),
                "Project".to_string(),
                "Patient".to_string(),
                "Observation".to_string(),
            ],
        };

        assert_eq!(
            config.processing_order(),
            vec!["Patient".to_string(), "Observation".to_string()]
        );
    }
}
