//! SQL construction for schema discovery and the usage query.
//!
//! Queries are assembled from clause lists and rendered once, so there is no
//! trailing-separator trimming. Every identifier that came out of schema
//! discovery passes through [`Identifier`] before it can reach the SQL text;
//! everything else is a fixed string in this module.

use std::fmt;
use std::sync::OnceLock;

use crate::error::MeteringError;
use crate::models::ColumnMap;

/// Physical table of the base user entity.
pub const BASE_USER_TABLE: &str = "system$user";

/// Entity name the base user table reports for itself in `submetaobjectname`.
pub const BASE_USER_ENTITY: &str = "System.User";

/// Number of columns the usage query returns when email discovery succeeded.
pub const USAGE_FIELD_COUNT: usize = 8;

/// Fixed projection of the usage query, in output order.
const USAGE_PROJECTION: [&str; 7] = [
    "u.name",
    "u.lastlogin",
    "u.webserviceuser",
    "u.blocked",
    "u.active",
    "u.isanonymous AS is_anonymous",
    "ur.usertype",
];

#[allow(clippy::expect_used)]
fn identifier_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"^[a-z_][a-z0-9_$]*$").expect("Invalid identifier pattern")
    })
}

/// A lower-case table or column name that is safe to splice into SQL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(String);

impl Identifier {
    /// Validates a discovered name.
    ///
    /// # Errors
    /// Returns `InvalidIdentifier` unless the name is lower-case ASCII
    /// letters, digits, `_` and `$`, not starting with a digit or `$`.
    pub fn parse(name: &str) -> crate::Result<Self> {
        if identifier_pattern().is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(MeteringError::invalid_identifier(name))
        }
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A `LEFT JOIN` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    table: String,
    alias: String,
    on: String,
}

/// `LIMIT`/`OFFSET` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Maximum rows returned
    pub limit: u64,
    /// Rows skipped before the first returned row
    pub offset: u64,
}

/// A `SELECT` statement built from clause lists.
///
/// # Example
/// ```rust
/// use usagemeter_core::query::SelectQuery;
///
/// let query = SelectQuery::from("system$user u")
///     .column("u.name")
///     .filter("u.name IS NOT NULL")
///     .order_by("u.id")
///     .paginate(100, 200);
/// assert_eq!(
///     query.to_string(),
///     "SELECT u.name FROM system$user u WHERE u.name IS NOT NULL ORDER BY u.id LIMIT 100 OFFSET 200"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectQuery {
    distinct: bool,
    projections: Vec<String>,
    from: String,
    joins: Vec<Join>,
    predicates: Vec<String>,
    order_by: Vec<String>,
    page: Option<Page>,
}

impl SelectQuery {
    /// Starts a query over a table expression (table plus optional alias).
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            distinct: false,
            projections: Vec::new(),
            from: table.into(),
            joins: Vec::new(),
            predicates: Vec::new(),
            order_by: Vec::new(),
            page: None,
        }
    }

    /// Switches to `SELECT DISTINCT`.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Appends a projected expression.
    pub fn column(mut self, expression: impl Into<String>) -> Self {
        self.projections.push(expression.into());
        self
    }

    /// Appends a `LEFT JOIN <table> <alias> ON <on>`.
    pub fn left_join(
        mut self,
        table: impl Into<String>,
        alias: impl Into<String>,
        on: impl Into<String>,
    ) -> Self {
        self.joins.push(Join {
            table: table.into(),
            alias: alias.into(),
            on: on.into(),
        });
        self
    }

    /// Appends a predicate; predicates are combined with `AND`.
    pub fn filter(mut self, predicate: impl Into<String>) -> Self {
        self.predicates.push(predicate.into());
        self
    }

    /// Appends an ordering expression.
    pub fn order_by(mut self, expression: impl Into<String>) -> Self {
        self.order_by.push(expression.into());
        self
    }

    /// Sets `LIMIT`/`OFFSET`.
    pub fn paginate(mut self, limit: u64, offset: u64) -> Self {
        self.page = Some(Page { limit, offset });
        self
    }

    /// Number of projected columns.
    pub fn column_count(&self) -> usize {
        self.projections.len()
    }

    /// Number of joins.
    pub fn join_count(&self) -> usize {
        self.joins.len()
    }
}

impl fmt::Display for SelectQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        if self.distinct {
            f.write_str("DISTINCT ")?;
        }
        write!(f, "{} FROM {}", self.projections.join(", "), self.from)?;
        for join in &self.joins {
            write!(f, " LEFT JOIN {} {} ON {}", join.table, join.alias, join.on)?;
        }
        if !self.predicates.is_empty() {
            write!(f, " WHERE {}", self.predicates.join(" AND "))?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY {}", self.order_by.join(", "))?;
        }
        if let Some(page) = self.page {
            write!(f, " LIMIT {} OFFSET {}", page.limit, page.offset)?;
        }
        Ok(())
    }
}

/// Lists every entity name stored in the base user table.
pub fn specialization_tables_query() -> SelectQuery {
    SelectQuery::from(BASE_USER_TABLE)
        .distinct()
        .column("submetaobjectname")
}

/// Finds mail-like columns in the given tables.
///
/// Ordered so that "last row per table wins" picks the lexicographically
/// greatest column name.
pub fn email_columns_query(tables: &[Identifier]) -> SelectQuery {
    let table_list = tables
        .iter()
        .map(|table| format!("'{}'", table))
        .collect::<Vec<_>>()
        .join(",");

    SelectQuery::from("information_schema.columns")
        .column("table_name")
        .column("column_name")
        .filter(format!("table_name IN ({})", table_list))
        .filter("column_name ILIKE '%mail%'")
        .order_by("table_name")
        .order_by("column_name")
}

/// Counts all users.
pub fn user_count_query() -> SelectQuery {
    SelectQuery::from(BASE_USER_TABLE).column("count(id)")
}

/// Builds the usage query for one page.
///
/// With a non-empty column map an `email` column is appended, built from
/// one `LEFT JOIN` per table aliased `mailfield_<n>` in map order. A
/// `page_size` of 0 leaves the query unbounded.
///
/// # Errors
/// Returns `InvalidIdentifier` if any table or column name in the map is
/// not a safe identifier.
pub fn build_usage_query(
    columns: &ColumnMap,
    page_size: u64,
    offset: u64,
) -> crate::Result<SelectQuery> {
    let mut query = USAGE_PROJECTION
        .iter()
        .fold(SelectQuery::from(format!("{} u", BASE_USER_TABLE)), |q, c| {
            q.column(*c)
        })
        .left_join(
            "system$userreportinfo_user",
            "ur_u",
            "u.id = ur_u.system$userid",
        )
        .left_join(
            "system$userreportinfo",
            "ur",
            "ur.id = ur_u.system$userreportinfoid",
        );

    if !columns.is_empty() {
        let mut references = Vec::with_capacity(columns.len());
        let mut mail_joins = Vec::with_capacity(columns.len());
        for (position, (table, column)) in columns.iter().enumerate() {
            let table = Identifier::parse(table)?;
            let column = Identifier::parse(column)?;
            let alias = format!("mailfield_{}", position);
            references.push(format!("{}.{}", alias, column));
            mail_joins.push((table, format!("{}.id = u.id", alias), alias));
        }

        query = query.column(format!("CONCAT({}) AS email", references.join(", ")));
        for (table, on, alias) in mail_joins {
            query = query.left_join(table.to_string(), alias, on);
        }
    }

    query = query.filter("u.name IS NOT NULL").order_by("u.id");
    if page_size > 0 {
        query = query.paginate(page_size, offset);
    }
    Ok(query)
}
