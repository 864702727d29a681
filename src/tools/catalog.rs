use super::Tool;
use crate::registry::{Capability, ParamKind, ParamSpec, ToolDescriptor};

use ParamKind::{Array, Boolean, Integer, Object, String as Text};

// -----------------------------------------------------------------------------
// ----- Parameter lists -------------------------------------------------------

const SCHEMA: ParamSpec = ParamSpec::optional("schema", Text, "Schema name (defaults to dbo)");
const TABLE: ParamSpec = ParamSpec::required("table_name", Text, "Table name");
const INDEX: ParamSpec = ParamSpec::required("index_name", Text, "Index name");
const WHERE: ParamSpec = ParamSpec::required("where_clause", Text, "Condition with ? placeholders");
const WHERE_PARAMS: ParamSpec =
    ParamSpec::optional("where_params", Array, "Values for the WHERE placeholders");

const NO_PARAMS: &[ParamSpec] = &[];
const SCHEMA_ONLY: &[ParamSpec] = &[SCHEMA];
const TABLE_IN_SCHEMA: &[ParamSpec] = &[TABLE, SCHEMA];

const EXECUTE_SELECT: &[ParamSpec] = &[
    ParamSpec::required("query", Text, "SELECT statement"),
    ParamSpec::optional("limit", Integer, "Maximum rows to return"),
];

const GET_TABLE_DATA: &[ParamSpec] = &[
    TABLE,
    SCHEMA,
    ParamSpec::optional("limit", Integer, "Rows per page (default 100)"),
    ParamSpec::optional("offset", Integer, "Rows to skip (default 0)"),
];

const EXECUTE_QUERY: &[ParamSpec] = &[
    ParamSpec::required("query", Text, "SQL statement"),
    ParamSpec::optional("params", Array, "Values bound to ? placeholders"),
];

const CREATE_TABLE: &[ParamSpec] = &[
    TABLE,
    ParamSpec::required(
        "columns",
        Array,
        "Columns: {name, type, nullable, default, primary_key}",
    ),
    SCHEMA,
];

const ALTER_TABLE: &[ParamSpec] = &[
    TABLE,
    ParamSpec::required("operation", Text, "ADD_COLUMN, DROP_COLUMN or ALTER_COLUMN"),
    ParamSpec::optional(
        "column_definition",
        Object,
        "Column: {name, type, nullable, default}",
    ),
    SCHEMA,
];

const INSERT_DATA: &[ParamSpec] = &[
    TABLE,
    ParamSpec::required("data", Array, "Rows as objects sharing the same columns"),
    SCHEMA,
];

const UPDATE_DATA: &[ParamSpec] = &[
    TABLE,
    ParamSpec::required("set_values", Object, "Column to new value"),
    WHERE,
    WHERE_PARAMS,
    SCHEMA,
];

const DELETE_DATA: &[ParamSpec] = &[TABLE, WHERE, WHERE_PARAMS, SCHEMA];

const CREATE_INDEX: &[ParamSpec] = &[
    INDEX,
    TABLE,
    ParamSpec::required("columns", Array, "Indexed column names"),
    ParamSpec::optional("unique", Boolean, "Create a UNIQUE index"),
    SCHEMA,
];

const DROP_INDEX: &[ParamSpec] = &[INDEX, TABLE, SCHEMA];

const EXECUTE_PROCEDURE: &[ParamSpec] = &[
    ParamSpec::required("procedure_name", Text, "Procedure name"),
    ParamSpec::optional("params", Array, "Positional procedure arguments"),
    SCHEMA,
];

const BACKUP_TABLE: &[ParamSpec] = &[
    TABLE,
    ParamSpec::optional(
        "backup_name",
        Text,
        "Target table (default <table>_backup_<timestamp>)",
    ),
    SCHEMA,
];

// -----------------------------------------------------------------------------
// ----- Read operations -------------------------------------------------------

pub fn read_set() -> Vec<ToolDescriptor> {
    vec![
        read(
            "list_tables",
            "List tables and views with row counts",
            Tool::ListTables,
            SCHEMA_ONLY,
        ),
        read(
            "describe_table",
            "Describe the columns of a table",
            Tool::DescribeTable,
            TABLE_IN_SCHEMA,
        ),
        read(
            "list_columns",
            "List the column names of a table",
            Tool::ListColumns,
            TABLE_IN_SCHEMA,
        ),
        read(
            "list_indexes",
            "List the indexes defined on a table",
            Tool::ListIndexes,
            TABLE_IN_SCHEMA,
        ),
        read("list_views", "List all views", Tool::ListViews, NO_PARAMS),
        read(
            "list_procedures",
            "List stored procedures",
            Tool::ListProcedures,
            NO_PARAMS,
        ),
        read(
            "list_functions",
            "List user-defined functions",
            Tool::ListFunctions,
            NO_PARAMS,
        ),
        ToolDescriptor {
            takes_query_text: true,
            ..read(
                "execute_select",
                "Run a read-only SELECT query with a row limit",
                Tool::ExecuteSelect,
                EXECUTE_SELECT,
            )
        },
        read(
            "get_table_data",
            "Page through the rows of a table",
            Tool::GetTableData,
            GET_TABLE_DATA,
        ),
        read(
            "get_database_schema",
            "Summarize tables, views, procedures and functions",
            Tool::GetDatabaseSchema,
            NO_PARAMS,
        ),
        read(
            "check_constraints",
            "List the constraints defined on a table",
            Tool::CheckConstraints,
            TABLE_IN_SCHEMA,
        ),
    ]
}

// -----------------------------------------------------------------------------
// ----- Write operations ------------------------------------------------------

pub fn write_set() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            takes_query_text: true,
            ..write(
                "execute_query",
                "Run any SQL statement with positional ? parameters",
                Tool::ExecuteQuery,
                EXECUTE_QUERY,
            )
        },
        write(
            "create_table",
            "Create a table from column definitions",
            Tool::CreateTable,
            CREATE_TABLE,
        ),
        write(
            "alter_table",
            "Add, drop or alter a column",
            Tool::AlterTable,
            ALTER_TABLE,
        ),
        write("drop_table", "Drop a table", Tool::DropTable, TABLE_IN_SCHEMA),
        write(
            "insert_data",
            "Insert rows in a single statement",
            Tool::InsertData,
            INSERT_DATA,
        ),
        write(
            "update_data",
            "Update rows matching a WHERE clause",
            Tool::UpdateData,
            UPDATE_DATA,
        ),
        write(
            "delete_data",
            "Delete rows matching a WHERE clause",
            Tool::DeleteData,
            DELETE_DATA,
        ),
        write(
            "create_index",
            "Create an index on a table",
            Tool::CreateIndex,
            CREATE_INDEX,
        ),
        write(
            "drop_index",
            "Drop an index from a table",
            Tool::DropIndex,
            DROP_INDEX,
        ),
        write(
            "execute_procedure",
            "Execute a stored procedure",
            Tool::ExecuteProcedure,
            EXECUTE_PROCEDURE,
        ),
        write(
            "backup_table",
            "Copy a table with SELECT INTO",
            Tool::BackupTable,
            BACKUP_TABLE,
        ),
    ]
}

// -----------------------------------------------------------------------------
// ----- Internal: Helpers -----------------------------------------------------

fn read(
    name: &'static str,
    description: &'static str,
    tool: Tool,
    params: &'static [ParamSpec],
) -> ToolDescriptor {
    ToolDescriptor {
        name,
        description,
        capability: Capability::Read,
        params,
        takes_query_text: false,
        tool,
    }
}

fn write(
    name: &'static str,
    description: &'static str,
    tool: Tool,
    params: &'static [ParamSpec],
) -> ToolDescriptor {
    ToolDescriptor {
        capability: Capability::Write,
        ..read(name, description, tool, params)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn sets_are_disjoint_and_typed() {
        let reads = read_set();
        let writes = write_set();

        assert_eq!(reads.len(), 11);
        assert_eq!(writes.len(), 11);
        assert!(reads.iter().all(|d| d.capability == Capability::Read));
        assert!(writes.iter().all(|d| d.capability == Capability::Write));

        let names: HashSet<_> = reads.iter().chain(&writes).map(|d| d.name).collect();
        assert_eq!(names.len(), 22);
    }

    #[test]
    fn only_query_operations_take_query_text() {
        let with_text: Vec<_> = read_set()
            .into_iter()
            .chain(write_set())
            .filter(|d| d.takes_query_text)
            .map(|d| d.name)
            .collect();
        assert_eq!(with_text, vec!["execute_select", "execute_query"]);
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
