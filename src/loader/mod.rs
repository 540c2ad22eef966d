pub mod bootstrap;
pub mod edges;
pub mod vertices;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use sea_orm::sea_query::{Alias, Expr, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DatabaseTransaction, Statement, Value as DbValue};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::LoadConfig;
use crate::database;
use crate::dictionary::{self, Dictionary, DictionarySource};

/// Rows per staged INSERT statement.
const STAGE_CHUNK_SIZE: usize = 500;

/// Per-load dedup of repeated log conditions, so a million-record file logs
/// each distinct condition once.
#[derive(Debug, Default)]
pub struct WarningDeduper(HashSet<String>);

impl WarningDeduper {
    /// True the first time `key` is seen, false afterwards.
    pub fn first(&mut self, key: impl Into<String>) -> bool {
        self.0.insert(key.into())
    }
}

/// Copy simplified ndjson entity files into the graph store.
///
/// Validates inputs, bootstraps the program/project roots, then runs the
/// vertex loader and the edge loader over the same file set, ordering, and
/// connection. Any database error aborts the load; batches already committed
/// stay in the store and a rerun is the recovery path.
pub async fn meta_upload(
    source_path: &Path,
    program: &str,
    project: &str,
    dictionary_path: &str,
    config_path: &Path,
    database_url: &str,
) -> Result<()> {
    ensure!(
        source_path.is_dir(),
        "{} should be a directory",
        source_path.display()
    );
    ensure!(
        config_path.is_file(),
        "{} should be a file",
        config_path.display()
    );
    ensure!(!dictionary_path.is_empty(), "dictionary_path cannot be empty");

    let config = LoadConfig::from_file(config_path)?;
    let dependency_order = config.processing_order();

    let conn = database::establish_connection(database_url).await?;
    info!("Connected to database");

    bootstrap::ensure_project(&conn, program, project).await?;

    // Re-check what the bootstrapper just committed; a miss here means a race
    // or a transaction-visibility problem.
    ensure!(
        bootstrap::find_program(&conn, program).await?.is_some(),
        "{} not found in {} table",
        program,
        bootstrap::PROGRAM_TABLE
    );
    let project_node_id = bootstrap::find_project_by_code(&conn, project)
        .await?
        .with_context(|| format!("{} not found in {}", project, bootstrap::PROJECT_TABLE))?;
    let project_id = format!("{}-{}", program, project);
    info!("Program and project exist: {} {}", project_id, project_node_id);

    let files = ndjson_files(source_path);
    ensure!(
        !files.is_empty(),
        "No files found at {}/**/*.ndjson",
        source_path.display()
    );

    let source = DictionarySource::parse(dictionary_path);
    let dictionary = Dictionary::load(&source).await?;
    let mappings = dictionary.table_mappings();

    let mut warnings = WarningDeduper::default();

    info!("Loading vertices");
    vertices::load_vertices(&files, &conn, &dependency_order, &project_id, mappings).await?;

    info!("Loading edges");
    edges::load_edges(
        &files,
        &conn,
        &dependency_order,
        mappings,
        &project_node_id,
        &mut warnings,
    )
    .await?;

    info!("Done");
    Ok(())
}

/// Remove every vertex belonging to a program-project from the store.
/// Program and project roots are left in place.
pub async fn empty_project(
    program: &str,
    project: &str,
    dictionary_path: &str,
    config_path: &Path,
    database_url: &str,
) -> Result<()> {
    ensure!(
        config_path.is_file(),
        "{} should be a file",
        config_path.display()
    );

    let config = LoadConfig::from_file(config_path)?;
    let project_id = format!("{}-{}", program, project);
    info!("Emptying project {}", project_id);

    let source = DictionarySource::parse(dictionary_path);
    let dictionary = Dictionary::load(&source).await?;
    let mappings = dictionary.table_mappings();

    let conn = database::establish_connection(database_url).await?;
    let backend = conn.get_database_backend();
    for entity_name in config.processing_order() {
        let Some(table) = dictionary::vertex_table(mappings, &entity_name) else {
            warn!("No mapping found for {} skipping", entity_name);
            continue;
        };
        info!("Truncating {} for {}", table, project_id);
        let mut delete = Query::delete();
        delete.from_table(Alias::new(table)).and_where(Expr::cust_with_values(
            "_props ->> 'project_id' = ?",
            [project_id.as_str()],
        ));
        conn.execute(backend.build(&delete)).await?;
    }

    info!("Done emptying project {}", project_id);
    Ok(())
}

/// All `*.ndjson` files below `root`, recursively.
fn ndjson_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().and_then(|e| e.to_str()) == Some("ndjson"))
        .collect()
}

/// The input file for a logical type, named `<Type>.ndjson`.
fn find_entity_file<'a>(files: &'a [PathBuf], entity_name: &str) -> Option<&'a Path> {
    let wanted = format!("{}.ndjson", entity_name);
    files
        .iter()
        .find(|path| path.file_name().and_then(|n| n.to_str()) == Some(wanted.as_str()))
        .map(PathBuf::as_path)
}

/// Stage one batch of rows into a temporary table shaped like `table`, then
/// reconcile against the physical table by primary key in a single statement.
///
/// The whole sequence runs on the caller's transaction, which makes the batch
/// atomic and pins every statement to one pooled connection; the staging
/// table is connection-local.
async fn stage_and_merge(
    txn: &DatabaseTransaction,
    table: &str,
    columns: &[&str],
    key_columns: &[&str],
    update_columns: &[&str],
    rows: Vec<Vec<DbValue>>,
) -> Result<()> {
    let backend = txn.get_database_backend();
    let staging = format!("tmp_{}", table);

    txn.execute(Statement::from_string(
        backend,
        format!(
            r#"CREATE TEMPORARY TABLE "{staging}" AS SELECT * FROM "{table}" LIMIT 0"#
        ),
    ))
    .await?;

    for chunk in rows.chunks(STAGE_CHUNK_SIZE) {
        let mut insert = Query::insert();
        insert
            .into_table(Alias::new(staging.as_str()))
            .columns(columns.iter().map(|c| Alias::new(*c)));
        for row in chunk {
            insert.values(row.iter().cloned().map(SimpleExpr::from))?;
        }
        txn.execute(backend.build(&insert)).await?;
    }

    let column_list = quoted(columns);
    let key_list = quoted(key_columns);
    let update_list = update_columns
        .iter()
        .map(|c| format!(r#""{c}" = excluded."{c}""#))
        .collect::<Vec<_>>()
        .join(", ");
    // the WHERE keeps the upsert grammar unambiguous when the insert source
    // is a SELECT
    txn.execute(Statement::from_string(
        backend,
        format!(
            r#"INSERT INTO "{table}" ({column_list}) SELECT {column_list} FROM "{staging}" WHERE true ON CONFLICT ({key_list}) DO UPDATE SET {update_list}"#
        ),
    ))
    .await?;

    txn.execute(Statement::from_string(
        backend,
        format!(r#"DROP TABLE "{staging}""#),
    ))
    .await?;

    Ok(())
}

fn quoted(columns: &[&str]) -> String {
    columns
        .iter()
        .map(|c| format!(r#""{c}""#))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_deduper_reports_each_key_once() {
        let mut warnings = WarningDeduper::default();
        assert!(warnings.first("no-mapping:Observation:Specimen"));
        assert!(!warnings.first("no-mapping:Observation:Specimen"));
        assert!(warnings.first("no-mapping:Observation:Patient"));
    }

    #[test]
    fn test_find_entity_file_matches_exact_name() {
        let files = vec![
            PathBuf::from("/data/Patient.ndjson"),
            PathBuf::from("/data/nested/Observation.ndjson"),
        ];
        assert_eq!(
            find_entity_file(&files, "Observation"),
            Some(Path::new("/data/nested/Observation.ndjson"))
        );
        assert!(find_entity_file(&files, "Specimen").is_none());
    }
}
