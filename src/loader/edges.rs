use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use indexmap::IndexMap;
use sea_orm::{DatabaseConnection, TransactionTrait, Value as DbValue};
use tracing::{debug, info, warn};

use super::WarningDeduper;
use crate::dictionary::{self, TableMapping};
use crate::graph::{Relation, VertexRecord};

/// Lines per staged batch. Smaller than the vertex batch because every
/// record fans out into its relation list.
const EDGE_BATCH_SIZE: usize = 100;

const EDGE_COLUMNS: [&str; 6] = ["src_id", "dst_id", "acl", "_sysan", "_props", "created"];
const EDGE_KEY_COLUMNS: [&str; 2] = ["src_id", "dst_id"];
const EDGE_UPDATE_COLUMNS: [&str; 4] = ["acl", "_sysan", "_props", "created"];

/// The label wiring a study root vertex into its owning project.
const PROJECT_RELATION_LABEL: &str = "project";

/// Load the relation lists embedded in the entity files into edge tables.
/// Runs after all vertex batches are committed, so every endpoint a relation
/// names already exists physically.
pub async fn load_edges(
    files: &[PathBuf],
    conn: &DatabaseConnection,
    dependency_order: &[String],
    mappings: &[TableMapping],
    project_node_id: &str,
    warnings: &mut WarningDeduper,
) -> Result<()> {
    info!("Number of files available for load: {}", files.len());
    for entity_name in dependency_order {
        let Some(path) = super::find_entity_file(files, entity_name) else {
            warn!("No file found for {} skipping", entity_name);
            continue;
        };
        info!("loading edges from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = content.lines().collect();
        let mut record_count = 0usize;
        for (batch_index, batch) in lines.chunks(EDGE_BATCH_SIZE).enumerate() {
            // one staging buffer per target edge table; a single input batch
            // can fan out into several tables
            let mut buffers: IndexMap<String, Vec<Vec<DbValue>>> = IndexMap::new();
            for (offset, line) in batch.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: VertexRecord = match serde_json::from_str(line) {
                    Ok(record) => record,
                    Err(err) => {
                        let line_number = batch_index * EDGE_BATCH_SIZE + offset + 1;
                        warn!(
                            "Skipping malformed record {}:{}: {}",
                            path.display(),
                            line_number,
                            err
                        );
                        continue;
                    }
                };

                let mut relations = dedup_relations(&record, warnings);

                if is_research_study(&record.name) {
                    // the source data never carries this edge; wire the study
                    // root into its owning project here
                    relations.push(Relation {
                        dst_id: project_node_id.to_string(),
                        dst_name: "Project".to_string(),
                        label: PROJECT_RELATION_LABEL.to_string(),
                    });
                    info!(
                        "adding project relation from project({}) to {}",
                        project_node_id, record.id
                    );
                }

                if relations.is_empty() {
                    if warnings.first(format!("no-relations:{}", record.name)) {
                        warn!("No relations for {}", record.name);
                    }
                    continue;
                }

                record_count += 1;
                for relation in relations {
                    let Some(mapping) =
                        dictionary::edge_mapping(mappings, entity_name, &relation.dst_name)
                    else {
                        let key = format!("no-mapping:{}:{}", entity_name, relation.dst_name);
                        if dependency_order.contains(&relation.dst_name) {
                            if warnings.first(key) {
                                warn!(
                                    "No mapping for src {} dst {}",
                                    entity_name, relation.dst_name
                                );
                            }
                        } else if warnings.first(key) {
                            // not a tracked vertex type (e.g. an enumeration)
                            debug!(
                                "No mapping for src {} dst {}",
                                entity_name, relation.dst_name
                            );
                        }
                        continue;
                    };
                    buffers
                        .entry(mapping.table_name.clone())
                        .or_default()
                        .push(vec![
                            record.id.clone().into(),
                            relation.dst_id.into(),
                            "[]".into(),
                            "{}".into(),
                            "{}".into(),
                            Utc::now().to_rfc3339().into(),
                        ]);
                }
            }

            for (table, rows) in buffers {
                let txn = conn.begin().await?;
                super::stage_and_merge(
                    &txn,
                    &table,
                    &EDGE_COLUMNS,
                    &EDGE_KEY_COLUMNS,
                    &EDGE_UPDATE_COLUMNS,
                    rows,
                )
                .await?;
                txn.commit().await?;
                info!(
                    "wrote {} records to {} from {}",
                    record_count,
                    table,
                    path.display()
                );
            }
        }
    }
    Ok(())
}

/// Keep one relation per destination id, last occurrence winning, preserving
/// first-occurrence order. A discarded duplicate that carried a different
/// label is surfaced once, since it may be a real distinct relation collapsed
/// by the id-only key.
fn dedup_relations(record: &VertexRecord, warnings: &mut WarningDeduper) -> Vec<Relation> {
    let mut by_dst: IndexMap<&str, &Relation> = IndexMap::new();
    for relation in &record.relations {
        if let Some(previous) = by_dst.insert(relation.dst_id.as_str(), relation) {
            if previous.label != relation.label
                && warnings.first(format!(
                    "dedup:{}:{}:{}",
                    record.name, previous.label, relation.label
                ))
            {
                warn!(
                    "Duplicate relation {} -> {} dropped label {:?}, kept {:?}",
                    record.id, relation.dst_id, previous.label, relation.label
                );
            }
        }
    }
    by_dst.into_values().cloned().collect()
}

/// ResearchStudy, normalized for case and spacing.
fn is_research_study(name: &str) -> bool {
    let collapsed: String = name
        .chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .collect();
    collapsed.eq_ignore_ascii_case("researchstudy")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(relations: Vec<Relation>) -> VertexRecord {
        VertexRecord {
            id: "o1".to_string(),
            object: serde_json::Map::new(),
            name: "Observation".to_string(),
            relations,
        }
    }

    fn relation(dst_id: &str, label: &str) -> Relation {
        Relation {
            dst_id: dst_id.to_string(),
            dst_name: "Patient".to_string(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_dedup_keeps_last_relation_per_destination() {
        let mut warnings = WarningDeduper::default();
        let record = record(vec![
            relation("p1", "subject"),
            relation("p2", "subject"),
            relation("p1", "performer"),
        ]);

        let deduped = dedup_relations(&record, &mut warnings);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].dst_id, "p1");
        assert_eq!(deduped[0].label, "performer");
        assert_eq!(deduped[1].dst_id, "p2");
    }

    #[test]
    fn test_dedup_of_identical_relations_is_silent() {
        let mut warnings = WarningDeduper::default();
        let record = record(vec![relation("p1", "subject"), relation("p1", "subject")]);

        let deduped = dedup_relations(&record, &mut warnings);
        assert_eq!(deduped.len(), 1);
        // an identical duplicate should not burn the differing-label key
        assert!(warnings.first("dedup:Observation:subject:subject"));
    }

    #[test]
    fn test_is_research_study_normalization() {
        assert!(is_research_study("ResearchStudy"));
        assert!(is_research_study("research_study"));
        assert!(is_research_study("Research Study"));
        assert!(!is_research_study("ResearchSubject"));
    }
}
