use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::sql::{self, ObjectName};
use super::{ToolContext, field, payload, rows_value, truthy};
use crate::backend::Row;
use crate::errors::{BackendError, ToolError};
use crate::gateway::envelope::Payload;
use crate::gateway::pool::PooledConnection;

const DEFAULT_PAGE_SIZE: i64 = 100;
const SCHEMA_DETAIL_TABLES: usize = 10;

// -----------------------------------------------------------------------------
// ----- Catalog queries -------------------------------------------------------

const LIST_TABLES_SQL: &str = "\
SELECT t.TABLE_SCHEMA AS schema_name, t.TABLE_NAME AS table_name, t.TABLE_TYPE AS table_type, \
p.row_count, o.create_date \
FROM INFORMATION_SCHEMA.TABLES t \
LEFT JOIN sys.objects o ON o.object_id = OBJECT_ID(QUOTENAME(t.TABLE_SCHEMA) + '.' + QUOTENAME(t.TABLE_NAME)) \
LEFT JOIN (SELECT object_id, SUM(row_count) AS row_count FROM sys.dm_db_partition_stats \
WHERE index_id <= 1 GROUP BY object_id) p ON p.object_id = o.object_id \
WHERE t.TABLE_TYPE IN ('BASE TABLE', 'VIEW')";

const DESCRIBE_TABLE_SQL: &str = "\
SELECT c.COLUMN_NAME AS column_name, c.DATA_TYPE AS data_type, \
c.CHARACTER_MAXIMUM_LENGTH AS max_length, c.NUMERIC_PRECISION AS numeric_precision, \
c.NUMERIC_SCALE AS numeric_scale, c.IS_NULLABLE AS is_nullable, c.COLUMN_DEFAULT AS column_default, \
CASE WHEN pk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS is_primary_key, \
CASE WHEN fk.COLUMN_NAME IS NOT NULL THEN 1 ELSE 0 END AS is_foreign_key \
FROM INFORMATION_SCHEMA.COLUMNS c \
LEFT JOIN (SELECT DISTINCT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME \
FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku ON tc.CONSTRAINT_TYPE = 'PRIMARY KEY' \
AND tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME AND tc.CONSTRAINT_SCHEMA = ku.CONSTRAINT_SCHEMA) pk \
ON c.TABLE_SCHEMA = pk.TABLE_SCHEMA AND c.TABLE_NAME = pk.TABLE_NAME AND c.COLUMN_NAME = pk.COLUMN_NAME \
LEFT JOIN (SELECT DISTINCT ku.TABLE_SCHEMA, ku.TABLE_NAME, ku.COLUMN_NAME \
FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE ku ON tc.CONSTRAINT_TYPE = 'FOREIGN KEY' \
AND tc.CONSTRAINT_NAME = ku.CONSTRAINT_NAME AND tc.CONSTRAINT_SCHEMA = ku.CONSTRAINT_SCHEMA) fk \
ON c.TABLE_SCHEMA = fk.TABLE_SCHEMA AND c.TABLE_NAME = fk.TABLE_NAME AND c.COLUMN_NAME = fk.COLUMN_NAME \
WHERE c.TABLE_NAME = @P1 AND c.TABLE_SCHEMA = @P2 \
ORDER BY c.ORDINAL_POSITION";

const LIST_INDEXES_SQL: &str = "\
SELECT i.name AS index_name, i.is_unique, i.is_primary_key, i.type_desc AS index_type, \
STRING_AGG(c.name, ', ') WITHIN GROUP (ORDER BY ic.key_ordinal) AS index_columns \
FROM sys.indexes i \
JOIN sys.tables t ON i.object_id = t.object_id \
JOIN sys.schemas s ON t.schema_id = s.schema_id \
JOIN sys.index_columns ic ON i.object_id = ic.object_id AND i.index_id = ic.index_id \
JOIN sys.columns c ON ic.object_id = c.object_id AND ic.column_id = c.column_id \
WHERE t.name = @P1 AND s.name = @P2 AND i.name IS NOT NULL \
GROUP BY i.name, i.is_unique, i.is_primary_key, i.type_desc \
ORDER BY i.name";

const LIST_VIEWS_SQL: &str = "\
SELECT TABLE_SCHEMA AS schema_name, TABLE_NAME AS view_name \
FROM INFORMATION_SCHEMA.VIEWS \
ORDER BY TABLE_SCHEMA, TABLE_NAME";

const LIST_PROCEDURES_SQL: &str = "\
SELECT ROUTINE_SCHEMA AS [schema], ROUTINE_NAME AS name, CREATED AS created, LAST_ALTERED AS lastAltered \
FROM INFORMATION_SCHEMA.ROUTINES \
WHERE ROUTINE_TYPE = 'PROCEDURE' \
ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME";

const LIST_FUNCTIONS_SQL: &str = "\
SELECT ROUTINE_SCHEMA AS [schema], ROUTINE_NAME AS name, DATA_TYPE AS returnType, \
CREATED AS created, LAST_ALTERED AS lastAltered \
FROM INFORMATION_SCHEMA.ROUTINES \
WHERE ROUTINE_TYPE = 'FUNCTION' \
ORDER BY ROUTINE_SCHEMA, ROUTINE_NAME";

const CHECK_CONSTRAINTS_SQL: &str = "\
SELECT tc.CONSTRAINT_NAME AS name, tc.CONSTRAINT_TYPE AS type, kcu.COLUMN_NAME AS columnName, \
CASE WHEN tc.CONSTRAINT_TYPE = 'FOREIGN KEY' \
THEN ccu.TABLE_SCHEMA + '.' + ccu.TABLE_NAME + '.' + ccu.COLUMN_NAME END AS [references] \
FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
LEFT JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME AND tc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA \
LEFT JOIN INFORMATION_SCHEMA.CONSTRAINT_COLUMN_USAGE ccu \
ON tc.CONSTRAINT_NAME = ccu.CONSTRAINT_NAME AND tc.CONSTRAINT_SCHEMA = ccu.CONSTRAINT_SCHEMA \
WHERE tc.TABLE_NAME = @P1 AND tc.TABLE_SCHEMA = @P2 \
ORDER BY tc.CONSTRAINT_TYPE, tc.CONSTRAINT_NAME";

// -----------------------------------------------------------------------------
// ----- Arguments -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct SchemaArgs {
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TableArgs {
    table_name: String,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SelectArgs {
    query: String,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TableDataArgs {
    table_name: String,
    schema: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl TableArgs {
    fn object(&self) -> Result<ObjectName, ToolError> {
        ObjectName::resolve(self.schema.as_deref(), &self.table_name, "table name")
    }
}

// -----------------------------------------------------------------------------
// ----- Handlers --------------------------------------------------------------

pub(super) async fn list_tables(ctx: &ToolContext, args: SchemaArgs) -> Result<Payload, ToolError> {
    let schema = match args.schema.as_deref() {
        Some(s) if !s.trim().is_empty() => Some(sql::sanitize_identifier(s, "schema name")?),
        _ => None,
    };

    let mut conn = ctx.checkout().await?;
    let tables = fetch_tables(&mut conn, schema.as_deref()).await?;

    info!("listed {} table(s)", tables.len());
    Ok(payload(json!({
        "totalCount": tables.len(),
        "tables": tables,
    })))
}

pub(super) async fn describe_table(ctx: &ToolContext, args: TableArgs) -> Result<Payload, ToolError> {
    let object = args.object()?;
    let mut conn = ctx.checkout().await?;
    let rows = fetch_columns(&mut conn, &object).await?;

    let columns: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "name": field(row, "column_name"),
                "dataType": field(row, "data_type"),
                "maxLength": field(row, "max_length"),
                "precision": field(row, "numeric_precision"),
                "scale": field(row, "numeric_scale"),
                "isNullable": truthy(&field(row, "is_nullable")),
                "isPrimaryKey": truthy(&field(row, "is_primary_key")),
                "isForeignKey": truthy(&field(row, "is_foreign_key")),
                "defaultValue": field(row, "column_default"),
            })
        })
        .collect();

    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "columnCount": columns.len(),
        "columns": columns,
    })))
}

pub(super) async fn list_columns(ctx: &ToolContext, args: TableArgs) -> Result<Payload, ToolError> {
    let object = args.object()?;
    let mut conn = ctx.checkout().await?;
    let rows = fetch_columns(&mut conn, &object).await?;

    let names: Vec<Value> = rows.iter().map(|row| field(row, "column_name")).collect();
    let details: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "name": field(row, "column_name"),
                "type": field(row, "data_type"),
                "nullable": truthy(&field(row, "is_nullable")),
            })
        })
        .collect();

    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "columns": names,
        "columnDetails": details,
    })))
}

pub(super) async fn list_indexes(ctx: &ToolContext, args: TableArgs) -> Result<Payload, ToolError> {
    let object = args.object()?;
    let mut conn = ctx.checkout().await?;
    let indexes = fetch_indexes(&mut conn, &object).await?;

    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "indexCount": indexes.len(),
        "indexes": indexes,
    })))
}

pub(super) async fn list_views(ctx: &ToolContext) -> Result<Payload, ToolError> {
    let mut conn = ctx.checkout().await?;
    let views = fetch_views(&mut conn).await?;

    Ok(payload(json!({
        "totalCount": views.len(),
        "views": views,
    })))
}

pub(super) async fn list_procedures(ctx: &ToolContext) -> Result<Payload, ToolError> {
    let mut conn = ctx.checkout().await?;
    let procedures = conn.query(LIST_PROCEDURES_SQL, &[]).await?;

    Ok(payload(json!({
        "totalCount": procedures.len(),
        "procedures": rows_value(procedures),
    })))
}

pub(super) async fn list_functions(ctx: &ToolContext) -> Result<Payload, ToolError> {
    let mut conn = ctx.checkout().await?;
    let functions = conn.query(LIST_FUNCTIONS_SQL, &[]).await?;

    Ok(payload(json!({
        "totalCount": functions.len(),
        "functions": rows_value(functions),
    })))
}

pub(super) async fn execute_select(ctx: &ToolContext, args: SelectArgs) -> Result<Payload, ToolError> {
    let cap = ctx.max_result_rows();
    let limit = match args.limit {
        Some(n) if n < 1 => return Err(ToolError::validation("limit must be at least 1")),
        Some(n) => usize::try_from(n).map_or(cap, |n| n.min(cap)),
        None => cap,
    };

    let query = if sql::has_row_limit(&args.query) {
        args.query.clone()
    } else {
        sql::inject_top(&args.query, limit)
    };

    let mut conn = ctx.checkout().await?;
    let mut rows = conn.query(&query, &[]).await?;
    drop(conn);

    let truncated = rows.len() > limit;
    rows.truncate(limit);

    info!("select returned {} row(s), truncated={truncated}", rows.len());
    Ok(payload(json!({
        "rowCount": rows.len(),
        "truncated": truncated,
        "limitApplied": limit,
        "data": rows_value(rows),
    })))
}

pub(super) async fn get_table_data(ctx: &ToolContext, args: TableDataArgs) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;

    let requested = args.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = args.offset.unwrap_or(0);
    if requested < 1 {
        return Err(ToolError::validation("limit must be at least 1"));
    }
    if offset < 0 {
        return Err(ToolError::validation("offset cannot be negative"));
    }
    let cap = ctx.max_result_rows();
    let limit = usize::try_from(requested).map_or(cap, |n| n.min(cap));

    let query = format!(
        "SELECT * FROM {} ORDER BY (SELECT NULL) OFFSET @P1 ROWS FETCH NEXT @P2 ROWS ONLY",
        object.sql()
    );

    let mut conn = ctx.checkout().await?;
    let rows = conn.query(&query, &[json!(offset), json!(limit)]).await?;
    drop(conn);

    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "rowCount": rows.len(),
        "limit": limit,
        "offset": offset,
        "hasMore": rows.len() == limit,
        "data": rows_value(rows),
    })))
}

/// Whole-database overview on one connection. Column and index details are
/// collected for the first tables only.
pub(super) async fn get_database_schema(ctx: &ToolContext) -> Result<Payload, ToolError> {
    let mut conn = ctx.checkout().await?;

    let tables = fetch_tables(&mut conn, None).await?;
    let views = fetch_views(&mut conn).await?;
    let procedures = conn.query(LIST_PROCEDURES_SQL, &[]).await?;
    let functions = conn.query(LIST_FUNCTIONS_SQL, &[]).await?;

    let mut details = Map::new();
    for table in tables.iter().take(SCHEMA_DETAIL_TABLES) {
        let (Some(schema), Some(name)) = (table["schema"].as_str(), table["name"].as_str()) else {
            continue;
        };
        let object = ObjectName {
            schema: schema.to_string(),
            name: name.to_string(),
        };

        match table_details(&mut conn, &object).await {
            Ok(detail) => {
                details.insert(format!("{schema}.{name}"), detail);
            }
            // A timed-out session is unusable; anything else only skips the table.
            Err(err @ BackendError::Timeout(_)) => return Err(err.into()),
            Err(err) => warn!("skipping details for {schema}.{name}: {err}"),
        }
    }

    let summary = json!({
        "tableCount": tables.len(),
        "viewCount": views.len(),
        "procedureCount": procedures.len(),
        "functionCount": functions.len(),
    });

    Ok(payload(json!({
        "schema": {
            "tables": tables,
            "views": views,
            "procedures": rows_value(procedures),
            "functions": rows_value(functions),
            "tableDetails": details,
        },
        "summary": summary,
    })))
}

pub(super) async fn check_constraints(ctx: &ToolContext, args: TableArgs) -> Result<Payload, ToolError> {
    let object = args.object()?;
    let mut conn = ctx.checkout().await?;
    let constraints = conn
        .query(CHECK_CONSTRAINTS_SQL, &[json!(object.name), json!(object.schema)])
        .await?;

    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "constraintCount": constraints.len(),
        "constraints": rows_value(constraints),
    })))
}

// -----------------------------------------------------------------------------
// ----- Internal: Fetchers ----------------------------------------------------

async fn fetch_tables(
    conn: &mut PooledConnection,
    schema: Option<&str>,
) -> Result<Vec<Value>, BackendError> {
    let mut query = LIST_TABLES_SQL.to_string();
    let mut params = Vec::new();
    if let Some(schema) = schema {
        query.push_str(" AND t.TABLE_SCHEMA = @P1");
        params.push(json!(schema));
    }
    query.push_str(" ORDER BY t.TABLE_SCHEMA, t.TABLE_NAME");

    let rows = conn.query(&query, &params).await?;
    Ok(rows
        .iter()
        .map(|row| {
            json!({
                "name": field(row, "table_name"),
                "schema": field(row, "schema_name"),
                "type": field(row, "table_type"),
                "rowCount": field(row, "row_count"),
                "createdDate": field(row, "create_date"),
            })
        })
        .collect())
}

async fn fetch_columns(
    conn: &mut PooledConnection,
    object: &ObjectName,
) -> Result<Vec<Row>, BackendError> {
    conn.query(DESCRIBE_TABLE_SQL, &[json!(object.name), json!(object.schema)])
        .await
}

async fn fetch_indexes(
    conn: &mut PooledConnection,
    object: &ObjectName,
) -> Result<Vec<Value>, BackendError> {
    let rows = conn
        .query(LIST_INDEXES_SQL, &[json!(object.name), json!(object.schema)])
        .await?;

    Ok(rows
        .iter()
        .map(|row| {
            json!({
                "name": field(row, "index_name"),
                "columns": split_columns(&field(row, "index_columns")),
                "isUnique": truthy(&field(row, "is_unique")),
                "isPrimary": truthy(&field(row, "is_primary_key")),
                "type": field(row, "index_type"),
            })
        })
        .collect())
}

async fn fetch_views(conn: &mut PooledConnection) -> Result<Vec<Value>, BackendError> {
    let rows = conn.query(LIST_VIEWS_SQL, &[]).await?;
    Ok(rows
        .iter()
        .map(|row| {
            json!({
                "name": field(row, "view_name"),
                "schema": field(row, "schema_name"),
            })
        })
        .collect())
}

async fn table_details(
    conn: &mut PooledConnection,
    object: &ObjectName,
) -> Result<Value, BackendError> {
    let columns = fetch_columns(conn, object).await?;
    let indexes = fetch_indexes(conn, object).await?;

    let columns: Vec<Value> = columns
        .iter()
        .map(|row| {
            json!({
                "name": field(row, "column_name"),
                "type": field(row, "data_type"),
                "nullable": truthy(&field(row, "is_nullable")),
                "primaryKey": truthy(&field(row, "is_primary_key")),
                "foreignKey": truthy(&field(row, "is_foreign_key")),
            })
        })
        .collect();

    let indexes: Vec<Value> = indexes
        .into_iter()
        .map(|index| {
            json!({
                "name": index["name"],
                "columns": index["columns"],
                "unique": index["isUnique"],
                "primary": index["isPrimary"],
            })
        })
        .collect();

    Ok(json!({ "columns": columns, "indexes": indexes }))
}

fn split_columns(value: &Value) -> Vec<String> {
    value
        .as_str()
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
