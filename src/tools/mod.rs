mod catalog;
mod read;
pub mod sql;
mod write;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::backend::Row;
use crate::errors::ToolError;
use crate::gateway::envelope::Payload;
use crate::gateway::pool::{ConnectionPool, PooledConnection};

pub use catalog::{read_set, write_set};

pub type Arguments = Map<String, Value>;

// -----------------------------------------------------------------------------
// ----- Tool ------------------------------------------------------------------

/// Every operation the gateway can run, mapped to its handler at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ListTables,
    DescribeTable,
    ListColumns,
    ListIndexes,
    ListViews,
    ListProcedures,
    ListFunctions,
    ExecuteSelect,
    GetTableData,
    GetDatabaseSchema,
    CheckConstraints,

    ExecuteQuery,
    CreateTable,
    AlterTable,
    DropTable,
    InsertData,
    UpdateData,
    DeleteData,
    CreateIndex,
    DropIndex,
    ExecuteProcedure,
    BackupTable,
}

impl Tool {
    pub async fn run(self, ctx: &ToolContext, args: &Arguments) -> Result<Payload, ToolError> {
        match self {
            Tool::ListTables => read::list_tables(ctx, parse(args)?).await,
            Tool::DescribeTable => read::describe_table(ctx, parse(args)?).await,
            Tool::ListColumns => read::list_columns(ctx, parse(args)?).await,
            Tool::ListIndexes => read::list_indexes(ctx, parse(args)?).await,
            Tool::ListViews => read::list_views(ctx).await,
            Tool::ListProcedures => read::list_procedures(ctx).await,
            Tool::ListFunctions => read::list_functions(ctx).await,
            Tool::ExecuteSelect => read::execute_select(ctx, parse(args)?).await,
            Tool::GetTableData => read::get_table_data(ctx, parse(args)?).await,
            Tool::GetDatabaseSchema => read::get_database_schema(ctx).await,
            Tool::CheckConstraints => read::check_constraints(ctx, parse(args)?).await,

            Tool::ExecuteQuery => write::execute_query(ctx, parse(args)?).await,
            Tool::CreateTable => write::create_table(ctx, parse(args)?).await,
            Tool::AlterTable => write::alter_table(ctx, parse(args)?).await,
            Tool::DropTable => write::drop_table(ctx, parse(args)?).await,
            Tool::InsertData => write::insert_data(ctx, parse(args)?).await,
            Tool::UpdateData => write::update_data(ctx, parse(args)?).await,
            Tool::DeleteData => write::delete_data(ctx, parse(args)?).await,
            Tool::CreateIndex => write::create_index(ctx, parse(args)?).await,
            Tool::DropIndex => write::drop_index(ctx, parse(args)?).await,
            Tool::ExecuteProcedure => write::execute_procedure(ctx, parse(args)?).await,
            Tool::BackupTable => write::backup_table(ctx, parse(args)?).await,
        }
    }
}

// -----------------------------------------------------------------------------
// ----- ToolContext -----------------------------------------------------------

/// What a handler may touch: the shared pool and the result-size cap.
#[derive(Clone)]
pub struct ToolContext {
    pool: Arc<ConnectionPool>,
    max_result_rows: usize,
}

impl ToolContext {
    pub fn new(pool: Arc<ConnectionPool>, max_result_rows: usize) -> Self {
        Self {
            pool,
            max_result_rows,
        }
    }

    pub fn max_result_rows(&self) -> usize {
        self.max_result_rows
    }

    async fn checkout(&self) -> Result<PooledConnection, ToolError> {
        Ok(self.pool.acquire().await?)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn parse<T: DeserializeOwned>(args: &Arguments) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| ToolError::validation(format!("invalid arguments: {e}")))
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("data".into(), other);
            map
        }
    }
}

fn field(row: &Row, key: &str) -> Value {
    row.get(key).cloned().unwrap_or(Value::Null)
}

/// SQL Server reports flags as BIT, INT, or 'YES'/'NO' depending on the view.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|v| v != 0),
        Value::String(s) => matches!(s.to_ascii_uppercase().as_str(), "YES" | "Y" | "TRUE" | "1"),
        _ => false,
    }
}

fn rows_value(rows: Vec<Row>) -> Value {
    Value::Array(rows.into_iter().map(Value::Object).collect())
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------


// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
