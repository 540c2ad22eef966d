use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One vertex line from an ndjson entity file: a stable content-derived id,
/// the entity's properties, its logical type name, and its outgoing
/// relations.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct VertexRecord {
    pub id: String,
    pub object: Map<String, Value>,
    pub name: String,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// A directed link from a vertex to another vertex.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Relation {
    pub dst_id: String,
    pub dst_name: String,
    pub label: String,
}
