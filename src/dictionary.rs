use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Fatal dictionary failures. Nothing can be loaded without a mapping, so
/// these abort the whole operation.
#[derive(Debug, Error)]
pub enum SchemaLoadError {
    #[error("cannot read dictionary directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot read dictionary schema {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse dictionary schema {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("cannot fetch dictionary from {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },
    #[error("dictionary at {0} defines no entity schemas")]
    Empty(String),
}

/// Where a data dictionary lives: a directory of per-type YAML schemas, or a
/// URL serving the compiled JSON map of type id to schema.
#[derive(Debug, Clone)]
pub enum DictionarySource {
    Dir(PathBuf),
    Url(String),
}

impl DictionarySource {
    pub fn parse(location: &str) -> Self {
        if location.starts_with("http") {
            DictionarySource::Url(location.to_string())
        } else {
            DictionarySource::Dir(PathBuf::from(location))
        }
    }
}

impl fmt::Display for DictionarySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictionarySource::Dir(path) => write!(f, "{}", path.display()),
            DictionarySource::Url(url) => write!(f, "{}", url),
        }
    }
}

/// One association declared by a type schema. Either a direct link
/// (`target_type` set) or a one-level `subgroup` of direct links.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Link {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub backref: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub subgroup: Vec<Link>,
}

/// A single logical type definition.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TypeSchema {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

/// One logical association resolved to physical storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMapping {
    pub src_class: String,
    pub dst_class: String,
    pub src_table: String,
    pub dst_table: String,
    pub table_name: String,
    pub label: String,
    pub src_dst_assoc: String,
    pub dst_src_assoc: String,
}

/// A parsed data dictionary plus its lazily-derived table mappings. The
/// mapping list is computed at most once per dictionary and is read-only for
/// the duration of a load.
#[derive(Debug)]
pub struct Dictionary {
    schemas: BTreeMap<String, TypeSchema>,
    mappings: OnceCell<Vec<TableMapping>>,
}

impl Dictionary {
    pub async fn load(source: &DictionarySource) -> Result<Self, SchemaLoadError> {
        let schemas = match source {
            DictionarySource::Dir(path) => Self::schemas_from_dir(path)?,
            DictionarySource::Url(url) => Self::schemas_from_url(url).await?,
        };
        if schemas.is_empty() {
            return Err(SchemaLoadError::Empty(source.to_string()));
        }
        info!("Loaded dictionary with {} type schemas from {}", schemas.len(), source);
        Ok(Self::from_schemas(schemas.into_values()))
    }

    pub fn from_schemas(schemas: impl IntoIterator<Item = TypeSchema>) -> Self {
        Self {
            schemas: schemas.into_iter().map(|s| (s.id.clone(), s)).collect(),
            mappings: OnceCell::new(),
        }
    }

    fn schemas_from_dir(path: &Path) -> Result<BTreeMap<String, TypeSchema>, SchemaLoadError> {
        let read_dir_err = |source| SchemaLoadError::ReadDir {
            path: path.to_path_buf(),
            source,
        };

        let mut schemas = BTreeMap::new();
        for entry in std::fs::read_dir(path).map_err(read_dir_err)? {
            let file = entry.map_err(read_dir_err)?.path();
            let Some(name) = file.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // files prefixed `_` hold shared definitions, not entity types
            if name.starts_with('_') || !(name.ends_with(".yaml") || name.ends_with(".yml")) {
                continue;
            }
            let content = std::fs::read_to_string(&file).map_err(|source| {
                SchemaLoadError::ReadFile {
                    path: file.clone(),
                    source,
                }
            })?;
            let schema: TypeSchema =
                serde_yaml::from_str(&content).map_err(|source| SchemaLoadError::Parse {
                    path: file.clone(),
                    source,
                })?;
            schemas.insert(schema.id.clone(), schema);
        }
        Ok(schemas)
    }

    async fn schemas_from_url(url: &str) -> Result<BTreeMap<String, TypeSchema>, SchemaLoadError> {
        let fetch_err = |source| SchemaLoadError::Fetch {
            url: url.to_string(),
            source,
        };

        let response = reqwest::get(url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?;
        let by_id: BTreeMap<String, TypeSchema> = response.json().await.map_err(|source| {
            SchemaLoadError::Fetch {
                url: url.to_string(),
                source,
            }
        })?;
        Ok(by_id)
    }

    pub fn schemas(&self) -> &BTreeMap<String, TypeSchema> {
        &self.schemas
    }

    /// Vertex/edge table mappings, derived once and cached.
    pub fn table_mappings(&self) -> &[TableMapping] {
        self.mappings.get_or_init(|| {
            let mut mappings = Vec::new();
            for schema in self.schemas.values() {
                for link in flatten_links(&schema.links) {
                    let (Some(target), Some(label)) =
                        (link.target_type.as_deref(), link.label.as_deref())
                    else {
                        continue;
                    };
                    if !self.schemas.contains_key(target) {
                        debug!(
                            "Link {} -> {} targets an undefined type, ignoring",
                            schema.id, target
                        );
                        continue;
                    }
                    mappings.push(TableMapping {
                        src_class: camelize(&schema.id),
                        dst_class: camelize(target),
                        src_table: node_table(&schema.id),
                        dst_table: node_table(target),
                        table_name: edge_table(&schema.id, label, target),
                        label: label.to_string(),
                        src_dst_assoc: link.name.clone().unwrap_or_else(|| label.to_string()),
                        dst_src_assoc: link.backref.clone().unwrap_or_default(),
                    });
                }
            }
            mappings
        })
    }
}

fn flatten_links(links: &[Link]) -> Vec<&Link> {
    let mut flat = Vec::new();
    for link in links {
        if link.target_type.is_some() {
            flat.push(link);
        }
        flat.extend(link.subgroup.iter().filter(|sub| sub.target_type.is_some()));
    }
    flat
}

/// Physical vertex table for a logical type, matching either side of any
/// association entry (case-insensitive).
pub fn vertex_table<'a>(mappings: &'a [TableMapping], logical_type: &str) -> Option<&'a str> {
    let wanted = logical_type.to_lowercase();
    mappings.iter().find_map(|m| {
        if m.src_class.to_lowercase() == wanted {
            Some(m.src_table.as_str())
        } else if m.dst_class.to_lowercase() == wanted {
            Some(m.dst_table.as_str())
        } else {
            None
        }
    })
}

/// Edge mapping for a (source class, destination) pair. The source must match
/// exactly; the destination name is CamelCase-normalized first, matching the
/// dictionary convention for class names.
pub fn edge_mapping<'a>(
    mappings: &'a [TableMapping],
    src_class: &str,
    dst_name: &str,
) -> Option<&'a TableMapping> {
    let dst_class = camelize(dst_name);
    mappings
        .iter()
        .find(|m| m.src_class == src_class && m.dst_class == dst_class)
}

/// `research_study` -> `ResearchStudy`; names already CamelCase pass through.
pub fn camelize(name: &str) -> String {
    name.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Collapse a name for use in a physical table name.
fn collapse(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .collect::<String>()
        .to_lowercase()
}

pub fn node_table(type_id: &str) -> String {
    format!("node_{}", collapse(type_id))
}

pub fn edge_table(src_id: &str, label: &str, dst_id: &str) -> String {
    format!(
        "edge_{}{}{}",
        collapse(src_id),
        collapse(label),
        collapse(dst_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(yaml: &str) -> TypeSchema {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn fixture() -> Dictionary {
        Dictionary::from_schemas([
            schema("id: program\ntitle: Program"),
            schema(
                r#"
id: project
title: Project
links:
  - name: programs
    backref: projects
    label: member_of
    target_type: program
"#,
            ),
            schema(
                r#"
id: observation
title: Observation
links:
  - name: subject
    backref: observations
    label: subject
    target_type: patient
"#,
            ),
            schema("id: patient\ntitle: Patient"),
        ])
    }

    #[test]
    fn test_camelize() {
        assert_eq!(camelize("research_study"), "ResearchStudy");
        assert_eq!(camelize("patient"), "Patient");
        assert_eq!(camelize("Patient"), "Patient");
    }

    #[test]
    fn test_table_name_conventions() {
        assert_eq!(node_table("research_study"), "node_researchstudy");
        assert_eq!(
            edge_table("project", "member_of", "program"),
            "edge_projectmemberofprogram"
        );
    }

    #[test]
    fn test_table_mappings_derivation() {
        let dictionary = fixture();
        let mappings = dictionary.table_mappings();
        assert_eq!(mappings.len(), 2);

        let membership = mappings
            .iter()
            .find(|m| m.src_class == "Project")
            .unwrap();
        assert_eq!(membership.dst_class, "Program");
        assert_eq!(membership.src_table, "node_project");
        assert_eq!(membership.dst_table, "node_program");
        assert_eq!(membership.table_name, "edge_projectmemberofprogram");
        assert_eq!(membership.label, "member_of");
        assert_eq!(membership.src_dst_assoc, "programs");
        assert_eq!(membership.dst_src_assoc, "projects");
    }

    #[test]
    fn test_links_to_undefined_types_are_ignored() {
        let dictionary = Dictionary::from_schemas([schema(
            r#"
id: observation
links:
  - label: subject
    target_type: patient
"#,
        )]);
        assert!(dictionary.table_mappings().is_empty());
    }

    #[test]
    fn test_vertex_table_matches_either_side_case_insensitive() {
        let dictionary = fixture();
        let mappings = dictionary.table_mappings();
        assert_eq!(vertex_table(mappings, "Observation"), Some("node_observation"));
        assert_eq!(vertex_table(mappings, "patient"), Some("node_patient"));
        assert_eq!(vertex_table(mappings, "Specimen"), None);
    }

    #[test]
    fn test_edge_mapping_normalizes_destination() {
        let dictionary = fixture();
        let mappings = dictionary.table_mappings();
        let mapping = edge_mapping(mappings, "Observation", "patient").unwrap();
        assert_eq!(mapping.table_name, "edge_observationsubjectpatient");
        assert!(edge_mapping(mappings, "Patient", "Observation").is_none());
    }

    #[test]
    fn test_subgroup_links_are_flattened() {
        let dictionary = Dictionary::from_schemas([
            schema("id: patient"),
            schema("id: practitioner"),
            schema(
                r#"
id: encounter
links:
  - subgroup:
      - label: subject
        target_type: patient
      - label: participant
        target_type: practitioner
"#,
            ),
        ]);
        assert_eq!(dictionary.table_mappings().len(), 2);
    }

    #[test]
    fn test_schemas_from_dir_skips_definition_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("patient.yaml"), "id: patient\ntitle: Patient").unwrap();
        std::fs::write(dir.path().join("_definitions.yaml"), "not: a schema").unwrap();
        std::fs::write(dir.path().join("README.md"), "docs").unwrap();

        let schemas = Dictionary::schemas_from_dir(dir.path()).unwrap();
        assert_eq!(schemas.len(), 1);
        assert!(schemas.contains_key("patient"));
    }
}
