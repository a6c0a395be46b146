// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Builds entity descriptions from a live server's catalog.

use tokio_postgres::Client;
use tracing::debug;

use crate::catalog::Catalog;
use crate::connection::{Config, CopyConnection};
use crate::desc::{ColumnDesc, EntityDesc, TableRef};
use crate::CopyError;

/// Describes `table` as the entity `name`, with one column per attribute in
/// attribute order.
///
/// Generated columns are described as not persisted, since `COPY FROM` cannot
/// write them. An unqualified `table` is looked up in the connection's
/// current schema.
///
/// # Errors
///
/// - The table does not exist or has no columns.
/// - The connection fails.
pub async fn fetch_entity_desc(
    client: &Client,
    name: &str,
    table: &TableRef,
) -> Result<EntityDesc, CopyError> {
    let columns = client
        .query(
            "SELECT
                a.attname AS name,
                a.attnotnull AS not_null,
                a.attgenerated <> '' AS generated
            FROM pg_catalog.pg_attribute a
                JOIN pg_catalog.pg_class c ON a.attrelid = c.oid
                JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
            WHERE n.nspname = COALESCE($1::text, current_schema())
                AND c.relname = $2
                AND a.attnum > 0::pg_catalog.int2
                AND NOT a.attisdropped
            ORDER BY a.attnum",
            &[&table.schema, &table.name],
        )
        .await?
        .into_iter()
        .map(|row| {
            let not_null: bool = row.get("not_null");
            let generated: bool = row.get("generated");
            ColumnDesc {
                name: row.get("name"),
                nullable: !not_null,
                persisted: !generated,
            }
        })
        .collect::<Vec<_>>();

    if columns.is_empty() {
        bail_generic!("table {} does not exist or has no columns", table);
    }
    debug!(%table, columns = columns.len(), "fetched entity {name}");

    Ok(EntityDesc::new(name, table.clone(), columns))
}

/// Connects to `config` and builds a catalog of the given `(name, table)`
/// entities.
pub async fn load_catalog<'a, I>(config: &Config, entities: I) -> Result<Catalog, CopyError>
where
    I: IntoIterator<Item = (&'a str, TableRef)>,
{
    let conn = config.connect("postgres_copy_catalog").await?;
    let mut catalog = Catalog::default();
    let mut result = Ok(());
    for (name, table) in entities {
        match fetch_entity_desc(conn.client(), name, &table).await {
            Ok(desc) => {
                catalog.register_desc(desc);
            }
            Err(e) => {
                result = Err(e);
                break;
            }
        }
    }
    Box::new(conn).close().await;
    result.map(|()| catalog)
}
