use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use super::sql::{self, ObjectName};
use super::{ToolContext, payload, rows_value};
use crate::classifier;
use crate::errors::ToolError;
use crate::gateway::envelope::Payload;

const MAX_INSERT_ROWS: usize = 1000;
const MAX_BOUND_VALUES: usize = 2100;

/// Statements whose leading keyword means rows come back.
const ROW_RETURNING: &[&str] = &["SELECT", "WITH", "EXEC", "EXECUTE"];

// -----------------------------------------------------------------------------
// ----- Arguments -------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(super) struct ExecuteQueryArgs {
    query: String,
    #[serde(default)]
    params: Option<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ColumnDef {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default = "nullable_by_default")]
    nullable: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    primary_key: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateTableArgs {
    table_name: String,
    columns: Vec<ColumnDef>,
    schema: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(super) enum AlterOperation {
    AddColumn,
    DropColumn,
    AlterColumn,
}

impl AlterOperation {
    fn as_str(self) -> &'static str {
        match self {
            AlterOperation::AddColumn => "ADD_COLUMN",
            AlterOperation::DropColumn => "DROP_COLUMN",
            AlterOperation::AlterColumn => "ALTER_COLUMN",
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AlterColumn {
    name: String,
    #[serde(rename = "type")]
    data_type: Option<String>,
    nullable: Option<bool>,
    #[serde(default)]
    default: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(super) struct AlterTableArgs {
    table_name: String,
    operation: AlterOperation,
    column_definition: Option<AlterColumn>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TableArgs {
    table_name: String,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct InsertArgs {
    table_name: String,
    data: Vec<Map<String, Value>>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct UpdateArgs {
    table_name: String,
    set_values: Map<String, Value>,
    where_clause: String,
    #[serde(default)]
    where_params: Option<Vec<Value>>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DeleteArgs {
    table_name: String,
    where_clause: String,
    #[serde(default)]
    where_params: Option<Vec<Value>>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateIndexArgs {
    index_name: String,
    table_name: String,
    columns: Vec<String>,
    unique: Option<bool>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct DropIndexArgs {
    index_name: String,
    table_name: String,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ProcedureArgs {
    procedure_name: String,
    #[serde(default)]
    params: Option<Vec<Value>>,
    schema: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct BackupArgs {
    table_name: String,
    backup_name: Option<String>,
    schema: Option<String>,
}

fn nullable_by_default() -> bool {
    true
}

// -----------------------------------------------------------------------------
// ----- Handlers --------------------------------------------------------------

pub(super) async fn execute_query(
    ctx: &ToolContext,
    args: ExecuteQueryArgs,
) -> Result<Payload, ToolError> {
    let params = args.params.unwrap_or_default();
    let (bound, placeholders) = sql::bind_placeholders(&args.query, 1);

    // Text without `?` passes through untouched so callers may use @P1 directly.
    let query = match placeholders {
        0 => args.query,
        n if n == params.len() => bound,
        n => {
            return Err(ToolError::validation(format!(
                "expected {n} parameter(s) for placeholders, got {}",
                params.len()
            )));
        }
    };

    let returns_rows = classifier::leading_keyword(&query)
        .is_some_and(|kw| ROW_RETURNING.contains(&kw.as_str()));

    let mut conn = ctx.checkout().await?;
    if returns_rows {
        let rows = conn.query(&query, &params).await?;
        Ok(payload(json!({
            "rowCount": rows.len(),
            "data": rows_value(rows),
        })))
    } else {
        let affected = conn.execute(&query, &params).await?;
        Ok(payload(json!({ "rowsAffected": affected })))
    }
}

pub(super) async fn create_table(
    ctx: &ToolContext,
    args: CreateTableArgs,
) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    if args.columns.is_empty() {
        return Err(ToolError::validation("at least one column is required"));
    }

    let mut seen = HashSet::new();
    let mut definitions = Vec::with_capacity(args.columns.len());
    for column in &args.columns {
        let name = sql::sanitize_identifier(&column.name, "column name")?;
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(ToolError::validation(format!("duplicate column '{name}'")));
        }

        let mut definition = format!(
            "{} {}",
            sql::quote(&name),
            sql::validate_type_name(&column.data_type)?
        );
        if !column.nullable {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = &column.default {
            definition.push_str(" DEFAULT ");
            definition.push_str(&sql::render_default(default)?);
        }
        if column.primary_key {
            definition.push_str(" PRIMARY KEY");
        }
        definitions.push(definition);
    }

    let statement = format!("CREATE TABLE {} ({})", object.sql(), definitions.join(", "));

    let mut conn = ctx.checkout().await?;
    conn.execute(&statement, &[]).await?;

    info!("created table {}", object.sql());
    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "columnCount": definitions.len(),
    })))
}

pub(super) async fn alter_table(
    ctx: &ToolContext,
    args: AlterTableArgs,
) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    let Some(column) = &args.column_definition else {
        return Err(ToolError::validation(format!(
            "column_definition is required for {}",
            args.operation.as_str()
        )));
    };
    let name = sql::quote(&sql::sanitize_identifier(&column.name, "column name")?);

    let statement = match args.operation {
        AlterOperation::AddColumn => {
            let mut s = format!(
                "ALTER TABLE {} ADD {name} {}",
                object.sql(),
                required_type(column, args.operation)?
            );
            if column.nullable == Some(false) {
                s.push_str(" NOT NULL");
            }
            if let Some(default) = &column.default {
                s.push_str(" DEFAULT ");
                s.push_str(&sql::render_default(default)?);
            }
            s
        }
        AlterOperation::DropColumn => format!("ALTER TABLE {} DROP COLUMN {name}", object.sql()),
        AlterOperation::AlterColumn => {
            let mut s = format!(
                "ALTER TABLE {} ALTER COLUMN {name} {}",
                object.sql(),
                required_type(column, args.operation)?
            );
            match column.nullable {
                Some(false) => s.push_str(" NOT NULL"),
                Some(true) => s.push_str(" NULL"),
                None => {}
            }
            s
        }
    };

    let mut conn = ctx.checkout().await?;
    conn.execute(&statement, &[]).await?;

    info!("altered table {} ({})", object.sql(), args.operation.as_str());
    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "operation": args.operation.as_str(),
    })))
}

pub(super) async fn drop_table(ctx: &ToolContext, args: TableArgs) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;

    let mut conn = ctx.checkout().await?;
    conn.execute(&format!("DROP TABLE {}", object.sql()), &[]).await?;

    info!("dropped table {}", object.sql());
    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
    })))
}

/// All rows go out as one multi-row `INSERT`, so either every row lands or
/// none does.
pub(super) async fn insert_data(ctx: &ToolContext, args: InsertArgs) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    let (statement, params) = build_insert(&object, &args.data)?;

    let mut conn = ctx.checkout().await?;
    let inserted = conn.execute(&statement, &params).await?;

    info!("inserted {inserted} row(s) into {}", object.sql());
    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "rowsInserted": inserted,
        "totalRows": args.data.len(),
    })))
}

pub(super) async fn update_data(ctx: &ToolContext, args: UpdateArgs) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    sql::validate_condition(&args.where_clause)?;
    if args.set_values.is_empty() {
        return Err(ToolError::validation("set_values cannot be empty"));
    }

    let mut assignments = Vec::with_capacity(args.set_values.len());
    let mut params = Vec::with_capacity(args.set_values.len());
    for (column, value) in &args.set_values {
        let column = sql::sanitize_identifier(column, "column name")?;
        params.push(value.clone());
        assignments.push(format!("{} = @P{}", sql::quote(&column), params.len()));
    }

    let where_params = args.where_params.unwrap_or_default();
    let condition = sql::bind_exact(&args.where_clause, params.len() + 1, &where_params)?;
    params.extend(where_params);

    let statement = format!(
        "UPDATE {} SET {} WHERE {condition}",
        object.sql(),
        assignments.join(", ")
    );

    let mut conn = ctx.checkout().await?;
    let affected = conn.execute(&statement, &params).await?;

    info!("updated {affected} row(s) in {}", object.sql());
    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "rowsAffected": affected,
    })))
}

pub(super) async fn delete_data(ctx: &ToolContext, args: DeleteArgs) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    sql::validate_condition(&args.where_clause)?;

    let params = args.where_params.unwrap_or_default();
    let condition = sql::bind_exact(&args.where_clause, 1, &params)?;
    let statement = format!("DELETE FROM {} WHERE {condition}", object.sql());

    let mut conn = ctx.checkout().await?;
    let affected = conn.execute(&statement, &params).await?;

    info!("deleted {affected} row(s) from {}", object.sql());
    Ok(payload(json!({
        "tableName": object.name,
        "schema": object.schema,
        "rowsAffected": affected,
    })))
}

pub(super) async fn create_index(
    ctx: &ToolContext,
    args: CreateIndexArgs,
) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    let index = sql::sanitize_identifier(&args.index_name, "index name")?;
    if args.columns.is_empty() {
        return Err(ToolError::validation("at least one index column is required"));
    }
    let columns = args
        .columns
        .iter()
        .map(|c| sql::sanitize_identifier(c, "column name"))
        .collect::<Result<Vec<_>, _>>()?;

    let unique = args.unique.unwrap_or(false);
    let statement = format!(
        "CREATE {}INDEX {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        sql::quote(&index),
        object.sql(),
        sql::column_list(&columns)
    );

    let mut conn = ctx.checkout().await?;
    conn.execute(&statement, &[]).await?;

    info!("created index {index} on {}", object.sql());
    Ok(payload(json!({
        "indexName": index,
        "tableName": object.name,
        "schema": object.schema,
        "unique": unique,
        "columns": columns,
    })))
}

pub(super) async fn drop_index(ctx: &ToolContext, args: DropIndexArgs) -> Result<Payload, ToolError> {
    let object = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    let index = sql::sanitize_identifier(&args.index_name, "index name")?;
    let statement = format!("DROP INDEX {} ON {}", sql::quote(&index), object.sql());

    let mut conn = ctx.checkout().await?;
    conn.execute(&statement, &[]).await?;

    info!("dropped index {index} on {}", object.sql());
    Ok(payload(json!({
        "indexName": index,
        "tableName": object.name,
        "schema": object.schema,
    })))
}

pub(super) async fn execute_procedure(
    ctx: &ToolContext,
    args: ProcedureArgs,
) -> Result<Payload, ToolError> {
    let procedure =
        ObjectName::resolve(args.schema.as_deref(), &args.procedure_name, "procedure name")?;
    let params = args.params.unwrap_or_default();

    let mut statement = format!("EXEC {}", procedure.sql());
    if !params.is_empty() {
        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("@P{i}")).collect();
        statement.push(' ');
        statement.push_str(&placeholders.join(", "));
    }

    let mut conn = ctx.checkout().await?;
    let rows = conn.query(&statement, &params).await?;

    info!("executed procedure {}", procedure.sql());
    Ok(payload(json!({
        "procedureName": procedure.name,
        "schema": procedure.schema,
        "rowCount": rows.len(),
        "data": rows_value(rows),
    })))
}

pub(super) async fn backup_table(ctx: &ToolContext, args: BackupArgs) -> Result<Payload, ToolError> {
    let source = ObjectName::resolve(args.schema.as_deref(), &args.table_name, "table name")?;
    let backup_name = match args.backup_name.as_deref() {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => sql::default_backup_name(&source.name),
    };
    let target = ObjectName::resolve(Some(&source.schema), &backup_name, "backup name")?;

    let statement = format!("SELECT * INTO {} FROM {}", target.sql(), source.sql());

    let mut conn = ctx.checkout().await?;
    let copied = conn.execute(&statement, &[]).await?;

    info!("backed up {} into {} ({copied} rows)", source.sql(), target.sql());
    Ok(payload(json!({
        "originalTable": source.name,
        "backupTable": target.name,
        "schema": source.schema,
        "rowsCopied": copied,
    })))
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn required_type(column: &AlterColumn, operation: AlterOperation) -> Result<String, ToolError> {
    match column.data_type.as_deref() {
        Some(t) => sql::validate_type_name(t),
        None => Err(ToolError::validation(format!(
            "column type is required for {}",
            operation.as_str()
        ))),
    }
}

/// Builds `INSERT INTO t ([a], [b]) VALUES (@P1, @P2), (@P3, @P4)`. Column
/// order follows the first row; every row must carry the same columns.
fn build_insert(
    object: &ObjectName,
    rows: &[Map<String, Value>],
) -> Result<(String, Vec<Value>), ToolError> {
    let Some(first) = rows.first() else {
        return Err(ToolError::validation("no rows to insert"));
    };
    if rows.len() > MAX_INSERT_ROWS {
        return Err(ToolError::validation(format!(
            "too many rows: {} (max {MAX_INSERT_ROWS})",
            rows.len()
        )));
    }
    if first.is_empty() {
        return Err(ToolError::validation("rows must contain at least one column"));
    }

    let keys: Vec<&String> = first.keys().collect();
    let total = keys.len() * rows.len();
    if total > MAX_BOUND_VALUES {
        return Err(ToolError::validation(format!(
            "too many values: {total} (max {MAX_BOUND_VALUES})"
        )));
    }

    let mut columns = Vec::with_capacity(keys.len());
    let mut seen = HashSet::new();
    for key in &keys {
        let column = sql::sanitize_identifier(key, "column name")?;
        if !seen.insert(column.to_ascii_lowercase()) {
            return Err(ToolError::validation(format!(
                "column '{key}' collides with another column after sanitization"
            )));
        }
        columns.push(column);
    }

    let mut params = Vec::with_capacity(total);
    let mut tuples = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        if row.len() != keys.len() || !keys.iter().all(|k| row.contains_key(k.as_str())) {
            return Err(ToolError::validation(format!(
                "row {i} does not have the same columns as row 0"
            )));
        }
        let mut slots = Vec::with_capacity(keys.len());
        for key in &keys {
            params.push(row[key.as_str()].clone());
            slots.push(format!("@P{}", params.len()));
        }
        tuples.push(format!("({})", slots.join(", ")));
    }

    let statement = format!(
        "INSERT INTO {} ({}) VALUES {}",
        object.sql(),
        sql::column_list(&columns),
        tuples.join(", ")
    );
    Ok((statement, params))
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(value: Value) -> Vec<Map<String, Value>> {
        serde_json::from_value(value).unwrap()
    }

    fn users() -> ObjectName {
        ObjectName::resolve(None, "users", "table name").unwrap()
    }

    #[test]
    fn insert_binds_every_value() {
        let data = rows(json!([
            {"id": 1, "name": "ana"},
            {"id": 2, "name": "bo"},
        ]));
        let (statement, params) = build_insert(&users(), &data).unwrap();

        assert_eq!(
            statement,
            "INSERT INTO [dbo].[users] ([id], [name]) VALUES (@P1, @P2), (@P3, @P4)"
        );
        assert_eq!(params, vec![json!(1), json!("ana"), json!(2), json!("bo")]);
    }

    #[test]
    fn insert_rejects_mismatched_rows() {
        let data = rows(json!([{"id": 1, "name": "ana"}, {"id": 2, "email": "x"}]));
        let err = build_insert(&users(), &data).unwrap_err();
        assert!(matches!(err, ToolError::Validation(msg) if msg.contains("row 1")));
    }

    #[test]
    fn insert_enforces_limits() {
        assert!(build_insert(&users(), &[]).is_err());

        let many: Vec<_> = (0..1001).map(|i| rows(json!([{"id": i}])).remove(0)).collect();
        assert!(build_insert(&users(), &many).is_err());

        let wide: Map<String, Value> = (0..30).map(|i| (format!("c{i}"), json!(i))).collect();
        let data = vec![wide; 71];
        let err = build_insert(&users(), &data).unwrap_err();
        assert!(matches!(err, ToolError::Validation(msg) if msg.contains("2100")));
    }

    #[test]
    fn insert_rejects_colliding_column_names() {
        let data = rows(json!([{"a;b": 1, "ab": 2}]));
        assert!(build_insert(&users(), &data).is_err());
    }

    #[test]
    fn alter_operations_use_wire_names() {
        let op: AlterOperation = serde_json::from_value(json!("DROP_COLUMN")).unwrap();
        assert_eq!(op, AlterOperation::DropColumn);
        assert!(serde_json::from_value::<AlterOperation>(json!("RENAME")).is_err());
    }

    #[test]
    fn column_defaults_to_nullable() {
        let column: ColumnDef = serde_json::from_value(json!({"name": "id", "type": "INT"})).unwrap();
        assert!(column.nullable);
        assert!(!column.primary_key);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
