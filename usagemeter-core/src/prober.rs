//! Discovery of user specialization tables and their email columns.
//!
//! Applications extend the base user entity with specialization entities,
//! each stored in its own table keyed by the user id. Which of their
//! columns holds an email address is guessed from the column name.

use crate::executor::QueryExecutor;
use crate::models::ColumnMap;
use crate::query::{
    BASE_USER_ENTITY, Identifier, email_columns_query, specialization_tables_query,
};
use crate::tabular::{FIELD_DELIMITER, data_lines};

/// Tables of the entities specializing the base user entity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecializationTables(Vec<Identifier>);

impl SpecializationTables {
    /// Creates the list from validated identifiers.
    pub fn new(tables: Vec<Identifier>) -> Self {
        Self(tables)
    }

    /// Comma-joined, single-quoted names for an `IN (...)` clause.
    ///
    /// Empty when nothing was discovered.
    pub fn to_sql_list(&self) -> String {
        self.0
            .iter()
            .map(|table| format!("'{}'", table))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether no table was discovered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The table identifiers in discovery order.
    pub fn as_slice(&self) -> &[Identifier] {
        &self.0
    }
}

/// Converts an entity name such as `MyModule.Account` to its table name.
fn entity_table_name(entity: &str) -> String {
    entity.to_lowercase().replace('.', "$")
}

/// Extracts specialization tables from `submetaobjectname` output.
///
/// The base entity itself, the footer and blank lines are skipped.
/// Names that do not form a safe identifier are dropped with a warning.
pub fn parse_specialization_tables(output: &str) -> SpecializationTables {
    let tables = data_lines(output)
        .filter(|entity| *entity != BASE_USER_ENTITY)
        .filter_map(|entity| {
            let table = entity_table_name(entity);
            Identifier::parse(&table)
                .map_err(|e| tracing::warn!("Skipping specialization: {}", e))
                .ok()
        })
        .collect();
    SpecializationTables(tables)
}

/// Extracts a `table -> column` map from `information_schema.columns`
/// output. For repeated tables the last row wins.
pub fn parse_email_columns(output: &str) -> ColumnMap {
    let mut columns = ColumnMap::new();
    for line in data_lines(output) {
        let line = line.to_lowercase();
        let mut parts = line.split(FIELD_DELIMITER).map(str::trim);
        let (Some(table), Some(column)) = (parts.next(), parts.next()) else {
            continue;
        };
        if let Err(e) = Identifier::parse(table).and_then(|_| Identifier::parse(column)) {
            tracing::warn!("Skipping email column candidate: {}", e);
            continue;
        }
        if let Some(previous) = columns.insert(table.to_string(), column.to_string()) {
            tracing::debug!(
                "Table {} has several mail-like columns; using {} over {}",
                table,
                column,
                previous
            );
        }
    }
    columns
}

/// Runs the discovery queries through an executor.
pub struct SchemaProber<'a> {
    executor: &'a dyn QueryExecutor,
}

impl<'a> SchemaProber<'a> {
    /// Creates a prober on top of an executor.
    pub fn new(executor: &'a dyn QueryExecutor) -> Self {
        Self { executor }
    }

    /// Lists the specialization tables of the base user entity.
    ///
    /// # Errors
    /// Propagates executor failures.
    pub async fn discover_specialization_tables(&self) -> crate::Result<SpecializationTables> {
        let output = self
            .executor
            .run(&specialization_tables_query().to_string())
            .await?;
        let tables = parse_specialization_tables(&output);
        tracing::debug!(
            "User specialization tables are: <{}>",
            tables.to_sql_list()
        );
        Ok(tables)
    }

    /// Guesses one email column per specialization table.
    ///
    /// Returns an empty map without querying when `tables` is empty.
    ///
    /// # Errors
    /// Propagates executor failures.
    pub async fn guess_email_columns(
        &self,
        tables: &SpecializationTables,
    ) -> crate::Result<ColumnMap> {
        if tables.is_empty() {
            return Ok(ColumnMap::new());
        }
        let output = self
            .executor
            .run(&email_columns_query(tables.as_slice()).to_string())
            .await?;
        let columns = parse_email_columns(&output);
        tracing::debug!(
            "Probable tables and columns that may have an email address: {:?}",
            columns
        );
        Ok(columns)
    }

    /// Runs both discovery steps.
    ///
    /// # Errors
    /// Propagates executor failures.
    pub async fn discover_email_columns(&self) -> crate::Result<ColumnMap> {
        let tables = self.discover_specialization_tables().await?;
        self.guess_email_columns(&tables).await
    }
}
