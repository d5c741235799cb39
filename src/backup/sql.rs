//! Every statement the backup subsystem sends to PostgreSQL.
//!
//! Rows leave the database through `row_to_json` and come back through
//! `jsonb_populate_record`, so column types are resolved by the server
//! against the live table definition rather than guessed on this side.

use serde_json::Value;

use super::serializer::SnapshotRow;
use super::tables::TableSpec;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Json(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn text(mut self, value: impl Into<String>) -> Self {
        self.params.push(SqlParam::Text(value.into()));
        self
    }

    pub fn json(mut self, value: Value) -> Self {
        self.params.push(SqlParam::Json(value));
        self
    }
}

/// Double-quote an identifier, doubling any embedded quotes.
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Builds statements against one schema.
#[derive(Debug, Clone)]
pub struct SqlBuilder {
    schema: String,
}

impl SqlBuilder {
    pub fn new(schema: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
        }
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self, table: &str) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(table))
    }

    pub fn list_base_tables(&self) -> Statement {
        Statement::new(
            r#"SELECT table_name::text
               FROM information_schema.tables
               WHERE table_schema = $1 AND table_type = 'BASE TABLE'
               ORDER BY table_name ASC"#,
        )
        .text(&self.schema)
    }

    /// Foreign keys whose both endpoints are base tables of the schema.
    pub fn list_foreign_keys(&self) -> Statement {
        Statement::new(
            r#"SELECT DISTINCT
                 tc.table_name::text AS table_name,
                 ccu.table_name::text AS referenced_table_name
               FROM information_schema.table_constraints tc
               JOIN information_schema.key_column_usage kcu
                 ON tc.constraint_name = kcu.constraint_name
                AND tc.table_schema = kcu.table_schema
               JOIN information_schema.constraint_column_usage ccu
                 ON ccu.constraint_name = tc.constraint_name
                AND ccu.table_schema = tc.table_schema
               JOIN information_schema.tables child
                 ON child.table_schema = tc.table_schema
                AND child.table_name = tc.table_name
                AND child.table_type = 'BASE TABLE'
               JOIN information_schema.tables parent
                 ON parent.table_schema = ccu.table_schema
                AND parent.table_name = ccu.table_name
                AND parent.table_type = 'BASE TABLE'
               WHERE tc.constraint_type = 'FOREIGN KEY'
                 AND tc.table_schema = $1
               ORDER BY 1, 2"#,
        )
        .text(&self.schema)
    }

    pub fn select_all_rows(&self, table: &str) -> Statement {
        Statement::new(format!(
            "SELECT row_to_json(t) FROM {} AS t",
            self.table(table)
        ))
    }

    /// Rows of a tenant-scoped table: every column, or the fixed column
    /// list renamed to its export keys.
    pub fn select_tenant_rows(&self, spec: &TableSpec, tenant_id: &str) -> Statement {
        let projection = if spec.dump_all_columns {
            "*".to_string()
        } else {
            spec.columns
                .iter()
                .map(|column| {
                    if column.column == column.key {
                        quote_ident(column.column)
                    } else {
                        format!("{} AS {}", quote_ident(column.column), quote_ident(column.key))
                    }
                })
                .collect::<Vec<_>>()
                .join(", ")
        };

        Statement::new(format!(
            "SELECT row_to_json(t) FROM (SELECT {projection} FROM {} WHERE {}::text = $1) AS t",
            self.table(spec.name),
            quote_ident(super::tables::TENANT_COLUMN),
        ))
        .text(tenant_id)
    }

    pub fn select_by_id(&self, table: &str, id: &str) -> Statement {
        Statement::new(format!(
            "SELECT row_to_json(t) FROM {} AS t WHERE t.\"id\"::text = $1",
            self.table(table)
        ))
        .text(id)
    }

    pub fn truncate<S: AsRef<str>>(&self, tables: &[S]) -> Statement {
        let list = tables
            .iter()
            .map(|t| self.table(t.as_ref()))
            .collect::<Vec<_>>()
            .join(", ");
        Statement::new(format!("TRUNCATE TABLE {list} RESTART IDENTITY CASCADE"))
    }

    pub fn delete_tenant_rows(&self, table: &str, tenant_id: &str) -> Statement {
        Statement::new(format!(
            "DELETE FROM {} WHERE {}::text = $1",
            self.table(table),
            quote_ident(super::tables::TENANT_COLUMN),
        ))
        .text(tenant_id)
    }

    /// Insert one row using only the columns the row itself carries.
    pub fn insert_row(&self, table: &str, row: &SnapshotRow) -> Statement {
        let columns: Vec<&str> = row.keys().map(String::as_str).collect();
        self.insert_columns(table, &columns, Value::Object(row.clone()))
    }

    /// `INSERT ... SELECT` from `jsonb_populate_record`, which casts every
    /// JSON value to the target column's type.
    pub fn insert_columns(&self, table: &str, columns: &[&str], record: Value) -> Statement {
        let target = self.table(table);
        let column_list = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let select_list = columns
            .iter()
            .map(|c| format!("r.{}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");

        Statement::new(format!(
            "INSERT INTO {target} ({column_list}) SELECT {select_list} FROM jsonb_populate_record(NULL::{target}, $1) AS r"
        ))
        .json(record)
    }

    /// Overwrite the tenant's scalar fields from a snapshot. A null slug in
    /// the snapshot keeps the live slug.
    pub fn update_tenant(&self, tenant: Value) -> Statement {
        let target = self.table(super::tables::TENANTS_TABLE);
        let assignments = super::tables::TENANT_UPDATE_COLUMNS
            .iter()
            .map(|c| format!("{0} = r.{0}", quote_ident(c)))
            .chain(std::iter::once(format!(
                "\"slug\" = COALESCE(r.\"slug\", {target}.\"slug\")"
            )))
            .collect::<Vec<_>>()
            .join(", ");

        Statement::new(format!(
            "UPDATE {target} SET {assignments} FROM jsonb_populate_record(NULL::{target}, $1) AS r WHERE {target}.\"id\" = r.\"id\""
        ))
        .json(tenant)
    }
}
