use std::collections::BTreeSet;

use anyhow::Result;
use sea_orm::sea_query::{Alias, ColumnDef, Expr, Index, Table};
use sea_orm::{ConnectionTrait, DatabaseConnection};
use tracing::info;

use crate::dictionary::TableMapping;

/// Create every physical table named by the mapping. Idempotent; run once per
/// dictionary (`metaload db init`) before any load touches the store.
pub async fn init_graph_tables(
    conn: &DatabaseConnection,
    mappings: &[TableMapping],
) -> Result<()> {
    let backend = conn.get_database_backend();

    let vertex_tables: BTreeSet<&str> = mappings
        .iter()
        .flat_map(|m| [m.src_table.as_str(), m.dst_table.as_str()])
        .collect();
    let edge_tables: BTreeSet<&str> = mappings.iter().map(|m| m.table_name.as_str()).collect();

    for table in &vertex_tables {
        let stmt = Table::create()
            .table(Alias::new(*table))
            .if_not_exists()
            .col(
                ColumnDef::new(Alias::new("node_id"))
                    .text()
                    .not_null()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(Alias::new("_props"))
                    .text()
                    .not_null()
                    .default("{}"),
            )
            .col(
                ColumnDef::new(Alias::new("acl"))
                    .text()
                    .not_null()
                    .default("[]"),
            )
            .col(
                ColumnDef::new(Alias::new("_sysan"))
                    .text()
                    .not_null()
                    .default("{}"),
            )
            .col(
                ColumnDef::new(Alias::new("created"))
                    .text()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .to_owned();
        conn.execute(backend.build(&stmt)).await?;
    }

    for table in &edge_tables {
        let stmt = Table::create()
            .table(Alias::new(*table))
            .if_not_exists()
            .col(ColumnDef::new(Alias::new("src_id")).text().not_null())
            .col(ColumnDef::new(Alias::new("dst_id")).text().not_null())
            .col(
                ColumnDef::new(Alias::new("acl"))
                    .text()
                    .not_null()
                    .default("[]"),
            )
            .col(
                ColumnDef::new(Alias::new("_sysan"))
                    .text()
                    .not_null()
                    .default("{}"),
            )
            .col(
                ColumnDef::new(Alias::new("_props"))
                    .text()
                    .not_null()
                    .default("{}"),
            )
            .col(
                ColumnDef::new(Alias::new("created"))
                    .text()
                    .not_null()
                    .default(Expr::current_timestamp()),
            )
            .primary_key(
                Index::create()
                    .col(Alias::new("src_id"))
                    .col(Alias::new("dst_id")),
            )
            .to_owned();
        conn.execute(backend.build(&stmt)).await?;
    }

    info!(
        "Initialized {} vertex and {} edge tables",
        vertex_tables.len(),
        edge_tables.len()
    );
    Ok(())
}
