use anyhow::Result;
use chrono::Utc;
use sea_orm::sea_query::{Alias, Expr, OnConflict, Query, SimpleExpr};
use sea_orm::{ConnectionTrait, DatabaseConnection, Statement};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

// Namespace seeds shared with the companion submission service, so program
// and project ids line up across loaders.
const PROGRAM_SEED: Uuid = Uuid::from_u128(0x85b08c6a_56a6_4474_9c30_b65abfd214a8);
const PROJECT_SEED: Uuid = Uuid::from_u128(0x249b4405_2c69_45d9_96bc_7410333d5d80);

pub const PROGRAM_TABLE: &str = "node_program";
pub const PROJECT_TABLE: &str = "node_project";
pub const PROJECT_MEMBERSHIP_TABLE: &str = "edge_projectmemberofprogram";

/// Ensure the program and project root vertices exist, creating them with
/// deterministic ids when absent. Existing rows are never overwritten, and
/// every insert commits immediately, so repeated or concurrent invocations
/// observe a consistent state. Returns the project node id.
pub async fn ensure_project(
    conn: &DatabaseConnection,
    program: &str,
    project: &str,
) -> Result<String> {
    let program_node_id = match find_program(conn, program).await? {
        Some(node_id) => {
            info!("Program {} exists: {}", program, node_id);
            node_id
        }
        None => {
            info!("Program {} does not exist", program);
            let node_id = Uuid::new_v5(&PROGRAM_SEED, program.as_bytes()).to_string();
            let props = json!({
                "name": program,
                "type": "program",
                "dbgap_accession_number": program,
            });
            insert_vertex_if_absent(conn, PROGRAM_TABLE, &node_id, &props).await?;
            info!("Created Program {}: {}", program, node_id);
            node_id
        }
    };

    let project_node_id = match find_project_in_program(conn, &program_node_id, project).await? {
        Some(node_id) => node_id,
        None => {
            info!("Project {} does not exist", project);
            let node_id = Uuid::new_v5(&PROJECT_SEED, project.as_bytes()).to_string();
            let props = json!({
                "code": project,
                "type": "project",
                "state": "open",
                "dbgap_accession_number": project,
            });
            insert_vertex_if_absent(conn, PROJECT_TABLE, &node_id, &props).await?;
            info!("Created Project {}: {}", project, node_id);
            insert_membership_if_absent(conn, &node_id, &program_node_id).await?;
            info!(
                "Created {} between {} -> {}",
                PROJECT_MEMBERSHIP_TABLE, node_id, program_node_id
            );
            node_id
        }
    };

    info!(
        "Program and project exist: {}-{} {}",
        program, project, project_node_id
    );
    Ok(project_node_id)
}

/// Node id of the program row with the given name, if any.
pub async fn find_program<C>(conn: &C, name: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    for row in query_vertices(conn, PROGRAM_TABLE).await? {
        if row.props.get("name").and_then(|v| v.as_str()) == Some(name) {
            return Ok(Some(row.node_id));
        }
    }
    Ok(None)
}

/// Node id of the project row with the given code, if any.
pub async fn find_project_by_code<C>(conn: &C, code: &str) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    for row in query_vertices(conn, PROJECT_TABLE).await? {
        if row.props.get("code").and_then(|v| v.as_str()) == Some(code) {
            return Ok(Some(row.node_id));
        }
    }
    Ok(None)
}

/// Project lookup scoped to one program via the membership edge, so two
/// programs may carry projects with the same code.
async fn find_project_in_program<C>(
    conn: &C,
    program_node_id: &str,
    code: &str,
) -> Result<Option<String>>
where
    C: ConnectionTrait,
{
    let mut select = Query::select();
    select
        .column(Alias::new("src_id"))
        .from(Alias::new(PROJECT_MEMBERSHIP_TABLE))
        .and_where(Expr::col(Alias::new("dst_id")).eq(program_node_id));
    let rows = conn
        .query_all(conn.get_database_backend().build(&select))
        .await?;
    let mut member_ids = Vec::with_capacity(rows.len());
    for row in rows {
        member_ids.push(row.try_get::<String>("", "src_id")?);
    }

    for row in query_vertices(conn, PROJECT_TABLE).await? {
        if member_ids.contains(&row.node_id)
            && row.props.get("code").and_then(|v| v.as_str()) == Some(code)
        {
            return Ok(Some(row.node_id));
        }
    }
    Ok(None)
}

struct VertexRow {
    node_id: String,
    props: serde_json::Value,
}

async fn query_vertices<C>(conn: &C, table: &str) -> Result<Vec<VertexRow>>
where
    C: ConnectionTrait,
{
    let stmt = Statement::from_string(
        conn.get_database_backend(),
        format!(r#"SELECT node_id, _props FROM "{table}""#),
    );
    let mut rows = Vec::new();
    for row in conn.query_all(stmt).await? {
        let node_id: String = row.try_get("", "node_id")?;
        let props: String = row.try_get("", "_props")?;
        rows.push(VertexRow {
            node_id,
            props: serde_json::from_str(&props)?,
        });
    }
    Ok(rows)
}

async fn insert_vertex_if_absent<C>(
    conn: &C,
    table: &str,
    node_id: &str,
    props: &serde_json::Value,
) -> Result<()>
where
    C: ConnectionTrait,
{
    let row: Vec<SimpleExpr> = vec![
        node_id.into(),
        props.to_string().into(),
        Utc::now().to_rfc3339().into(),
    ];
    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(table))
        .columns([
            Alias::new("node_id"),
            Alias::new("_props"),
            Alias::new("created"),
        ])
        .values(row)?
        .on_conflict(
            OnConflict::column(Alias::new("node_id"))
                .do_nothing()
                .to_owned(),
        );
    conn.execute(conn.get_database_backend().build(&insert))
        .await?;
    Ok(())
}

async fn insert_membership_if_absent<C>(conn: &C, src_id: &str, dst_id: &str) -> Result<()>
where
    C: ConnectionTrait,
{
    let row: Vec<SimpleExpr> = vec![src_id.into(), dst_id.into()];
    let mut insert = Query::insert();
    insert
        .into_table(Alias::new(PROJECT_MEMBERSHIP_TABLE))
        .columns([Alias::new("src_id"), Alias::new("dst_id")])
        .values(row)?
        .on_conflict(
            OnConflict::columns([Alias::new("src_id"), Alias::new("dst_id")])
                .do_nothing()
                .to_owned(),
        );
    conn.execute(conn.get_database_backend().build(&insert))
        .await?;
    Ok(())
}
