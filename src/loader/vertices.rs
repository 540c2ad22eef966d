use std::path::PathBuf;

use anyhow::Result;
use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait, Value as DbValue};
use tracing::{info, warn};

use crate::dictionary::{self, TableMapping};
use crate::graph::VertexRecord;

/// Lines per staged batch.
const VERTEX_BATCH_SIZE: usize = 1000;

const VERTEX_COLUMNS: [&str; 5] = ["node_id", "_props", "acl", "_sysan", "created"];
const VERTEX_KEY_COLUMNS: [&str; 1] = ["node_id"];
const VERTEX_UPDATE_COLUMNS: [&str; 4] = ["_props", "acl", "_sysan", "created"];

/// Load entity files into vertex tables, one type at a time in dependency
/// order. Each batch is staged and upserted by node id inside its own
/// transaction; a failure mid-file leaves earlier batches committed.
pub async fn load_vertices(
    files: &[PathBuf],
    conn: &DatabaseConnection,
    dependency_order: &[String],
    project_id: &str,
    mappings: &[TableMapping],
) -> Result<()> {
    info!("Number of files available for load: {}", files.len());
    for entity_name in dependency_order {
        let Some(path) = super::find_entity_file(files, entity_name) else {
            warn!("No file found for {} skipping", entity_name);
            continue;
        };
        let Some(table) = dictionary::vertex_table(mappings, entity_name) else {
            warn!("No mapping found for {} skipping", entity_name);
            continue;
        };
        info!("loading {} into {}", path.display(), table);

        let content = std::fs::read_to_string(path)?;
        let lines: Vec<&str> = content.lines().collect();
        let mut record_count = 0usize;
        for (batch_index, batch) in lines.chunks(VERTEX_BATCH_SIZE).enumerate() {
            let mut rows: Vec<Vec<DbValue>> = Vec::with_capacity(batch.len());
            for (offset, line) in batch.iter().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let mut record: VertexRecord = match serde_json::from_str(line) {
                    Ok(record) => record,
                    Err(err) => {
                        let line_number = batch_index * VERTEX_BATCH_SIZE + offset + 1;
                        warn!(
                            "Skipping malformed record {}:{}: {}",
                            path.display(),
                            line_number,
                            err
                        );
                        continue;
                    }
                };
                record
                    .object
                    .insert("project_id".to_string(), project_id.into());
                record_count += 1;
                rows.push(vec![
                    record.id.into(),
                    serde_json::to_string(&record.object)?.into(),
                    "[]".into(),
                    "{}".into(),
                    Utc::now().to_rfc3339().into(),
                ]);
            }
            if rows.is_empty() {
                continue;
            }

            let txn = conn.begin().await?;
            super::stage_and_merge(
                &txn,
                table,
                &VERTEX_COLUMNS,
                &VERTEX_KEY_COLUMNS,
                &VERTEX_UPDATE_COLUMNS,
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
    Ok(())
}
