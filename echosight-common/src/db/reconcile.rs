//! Schema Reconciliation
//!
//! Declarative, additive-only alignment of a table's row shape with the
//! record shape the current code writes.
//!
//! **Design:** the expected columns of a table are declared once as data
//! ([`TableSchema::expected_columns`]). The same declaration drives both
//! `CREATE TABLE IF NOT EXISTS` for fresh stores and `ALTER TABLE ADD COLUMN`
//! for stores created by older versions.
//!
//! # What reconciliation does
//! - Adds missing columns, with their declared type and default
//! - Treats a column that already exists as success
//! - Records the reconciled shape version in `schema_version`
//!
//! # What it never does
//! - Drop, rename or retype columns
//! - Rewrite constraints on existing columns (reported as drift only)
//!
//! # Usage
//!
//! ```rust,ignore
//! pub struct EventsTableSchema;
//!
//! impl TableSchema for EventsTableSchema {
//!     fn table_name() -> &'static str { "events" }
//!     fn shape_version() -> i64 { 2 }
//!
//!     fn expected_columns() -> Vec<ColumnDefinition> {
//!         vec![
//!             ColumnDefinition::new("id", "INTEGER").primary_key(),
//!             ColumnDefinition::new("kind", "TEXT").not_null(),
//!             ColumnDefinition::new("weight", "REAL").default("0.0").since(2),
//!         ]
//!     }
//! }
//!
//! let report = SchemaReconciler::reconcile::<EventsTableSchema>(&pool).await?;
//! ```

use crate::{Error, Result};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL", "TIMESTAMP")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY constraint
    pub primary_key: bool,
    /// AUTOINCREMENT (only meaningful with an INTEGER PRIMARY KEY)
    pub autoincrement: bool,
    /// UNIQUE constraint
    pub unique: bool,
    /// DEFAULT value, as an SQL literal
    pub default_value: Option<String>,
    /// CHECK expression
    pub check: Option<String>,
    /// Record shape version that introduced this column
    pub since_version: i64,
}

impl ColumnDefinition {
    /// Create new column definition (part of the base shape, version 1)
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            default_value: None,
            check: None,
            since_version: 1,
        }
    }

    /// Mark column as PRIMARY KEY
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark PRIMARY KEY column as AUTOINCREMENT
    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Mark column as UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set DEFAULT value
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set CHECK expression
    pub fn check(mut self, expr: impl Into<String>) -> Self {
        self.check = Some(expr.into());
        self
    }

    /// Record the shape version that introduced the column
    pub fn since(mut self, version: i64) -> Self {
        self.since_version = version;
        self
    }

    /// Column clause for CREATE TABLE
    fn create_clause(&self) -> String {
        let mut clause = format!("{} {}", self.name, self.sql_type);
        if self.primary_key {
            clause.push_str(" PRIMARY KEY");
            if self.autoincrement {
                clause.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            clause.push_str(" NOT NULL");
        }
        if self.unique {
            clause.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            clause.push_str(&format!(" DEFAULT {}", default));
        }
        if let Some(check) = &self.check {
            clause.push_str(&format!(" CHECK ({})", check));
        }
        clause
    }
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone, PartialEq)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i32,
    /// Column name
    pub name: String,
    /// SQL type from PRAGMA table_info
    pub type_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// DEFAULT value
    pub default_value: Option<String>,
    /// PRIMARY KEY flag
    pub pk: bool,
}

/// Difference between declared and actual shape
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    /// Column missing from database (fixable)
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Column type mismatch (reported only)
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Constraint mismatch (reported only)
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: String,
    },
}

/// Outcome of reconciling one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Table that was reconciled
    pub table: String,
    /// Columns added by this run
    pub added_columns: Vec<String>,
    /// Drift that was reported but left untouched
    pub drift_warnings: Vec<String>,
    /// Shape version recorded for the table
    pub version: i64,
}

impl ReconcileReport {
    /// True when this run changed nothing
    pub fn is_noop(&self) -> bool {
        self.added_columns.is_empty()
    }
}

/// Declared shape of one table
pub trait TableSchema {
    /// Table name in database
    fn table_name() -> &'static str;

    /// Version of the record shape this declaration describes
    fn shape_version() -> i64;

    /// Expected column definitions (order matters for new table creation)
    fn expected_columns() -> Vec<ColumnDefinition>;

    /// Statements run after the table exists (indexes and the like).
    /// Each must be idempotent.
    fn post_create_statements() -> Vec<String> {
        Vec::new()
    }
}

/// Read the actual shape of a table
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns from database table using PRAGMA table_info
    ///
    /// Returns columns in database order (by cid)
    pub async fn introspect_table(
        pool: &SqlitePool,
        table_name: &str,
    ) -> Result<Vec<ActualColumn>> {
        ensure_identifier(table_name)?;
        let query = format!("PRAGMA table_info({})", table_name);
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push(ActualColumn {
                cid: row.try_get("cid")?,
                name: row.try_get("name")?,
                type_name: row.try_get("type")?,
                not_null: row.try_get::<i32, _>("notnull")? != 0,
                default_value: row.try_get("dflt_value")?,
                pk: row.try_get::<i32, _>("pk")? != 0,
            });
        }

        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    /// Check if table exists
    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Highest shape version recorded for a table, 0 when none
    pub async fn recorded_version(pool: &SqlitePool, table_name: &str) -> Result<i64> {
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM schema_version WHERE table_name = ?",
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(version.unwrap_or(0))
    }
}

/// Compare declared and actual shapes
pub struct SchemaDiff;

impl SchemaDiff {
    /// Compare expected schema to actual database schema
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            let Some(actual_col) = actual.iter().find(|c| c.name == expected_col.name) else {
                drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.clone(),
                });
                continue;
            };

            if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                drift.push(SchemaDrift::TypeMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    expected: expected_col.sql_type.clone(),
                    actual: actual_col.type_name.clone(),
                });
            }

            // SQLite reports INTEGER PRIMARY KEY columns as nullable
            if expected_col.not_null && !expected_col.primary_key && !actual_col.not_null {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    constraint: "NOT NULL".to_string(),
                });
            }

            if expected_col.primary_key && !actual_col.pk {
                drift.push(SchemaDrift::ConstraintMismatch {
                    table: table_name.to_string(),
                    column: expected_col.name.clone(),
                    constraint: "PRIMARY KEY".to_string(),
                });
            }
        }

        drift
    }

    /// Check if SQL types are compatible (SQLite type affinity rules)
    fn types_compatible(expected: &str, actual: &str) -> bool {
        let exp = expected.to_uppercase();
        let act = actual.to_uppercase();

        if exp == act {
            return true;
        }

        if exp.contains("INT") && act.contains("INT") {
            return true;
        }

        let is_text = |t: &str| t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB");
        if is_text(&exp) && is_text(&act) {
            return true;
        }

        let is_real = |t: &str| t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB");
        if is_real(&exp) && is_real(&act) {
            return true;
        }

        false
    }
}

/// Apply the declared shape to the database
pub struct SchemaReconciler;

impl SchemaReconciler {
    /// Bring a table up to its declared shape
    ///
    /// Creates the table if it does not exist, adds any missing columns, runs
    /// the post-create statements, verifies that every declared column is
    /// present and records the shape version. Safe to run on every start.
    pub async fn reconcile<T: TableSchema>(pool: &SqlitePool) -> Result<ReconcileReport> {
        let table_name = T::table_name();
        let expected = T::expected_columns();
        let version = T::shape_version();

        ensure_identifier(table_name)?;
        for column in &expected {
            ensure_identifier(&column.name)?;
        }

        info!("Schema reconcile: checking table '{}' (shape v{})", table_name, version);

        create_schema_version_table(pool).await?;
        sqlx::query(&Self::create_table_sql(table_name, &expected))
            .execute(pool)
            .await?;

        let mut report = ReconcileReport {
            table: table_name.to_string(),
            version,
            ..Default::default()
        };

        let actual = SchemaIntrospector::introspect_table(pool, table_name).await?;
        for change in SchemaDiff::compare(table_name, &expected, &actual) {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    if Self::add_column(pool, &table, &column).await? {
                        report.added_columns.push(column.name.clone());
                    }
                }
                SchemaDrift::TypeMismatch { table, column, expected, actual } => {
                    warn!(
                        "  Type mismatch in {}.{}: expected '{}', found '{}'. Left as is.",
                        table, column, expected, actual
                    );
                    report.drift_warnings.push(format!(
                        "{}.{}: type {} (expected {})",
                        table, column, actual, expected
                    ));
                }
                SchemaDrift::ConstraintMismatch { table, column, constraint } => {
                    warn!(
                        "  Constraint mismatch in {}.{}: missing '{}'. Left as is.",
                        table, column, constraint
                    );
                    report.drift_warnings.push(format!(
                        "{}.{}: missing {}",
                        table, column, constraint
                    ));
                }
            }
        }

        for statement in T::post_create_statements() {
            sqlx::query(&statement).execute(pool).await?;
        }

        Self::verify_superset(pool, table_name, &expected).await?;

        let previous = SchemaIntrospector::recorded_version(pool, table_name).await?;
        if previous > version {
            warn!(
                "  Table '{}' was last reconciled by a newer shape (v{} > v{})",
                table_name, previous, version
            );
        }
        sqlx::query("INSERT OR IGNORE INTO schema_version (table_name, version) VALUES (?, ?)")
            .bind(table_name)
            .bind(version)
            .execute(pool)
            .await?;

        if report.is_noop() {
            info!("  Schema up to date for '{}'", table_name);
        } else {
            info!(
                "  Reconciled '{}': added {}",
                table_name,
                report.added_columns.join(", ")
            );
        }

        Ok(report)
    }

    /// CREATE TABLE IF NOT EXISTS statement for a declared shape
    pub fn create_table_sql(table_name: &str, columns: &[ColumnDefinition]) -> String {
        let clauses: Vec<String> = columns.iter().map(ColumnDefinition::create_clause).collect();
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            table_name,
            clauses.join(",\n    ")
        )
    }

    /// Add missing column via ALTER TABLE ADD COLUMN
    ///
    /// Returns `false` when the column turned out to exist already.
    async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<bool> {
        let mut sql = format!("ALTER TABLE {} ADD COLUMN {} {}", table, column.name, column.sql_type);

        // SQLite cannot add PRIMARY KEY or UNIQUE columns, and NOT NULL only with a default
        if column.primary_key || column.unique {
            warn!(
                "  Cannot add PRIMARY KEY/UNIQUE column {}.{} via ALTER TABLE. \
                 Column will be created without the constraint.",
                table, column.name
            );
        }

        match (&column.default_value, column.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "  Cannot add NOT NULL column {}.{} without DEFAULT value. \
                 Column will be nullable.",
                table, column.name
            ),
            (None, false) => {}
        }

        if let Some(check) = &column.check {
            sql.push_str(&format!(" CHECK ({})", check));
        }

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => {
                info!(
                    "  Added column: {}.{} ({}, since v{})",
                    table, column.name, column.sql_type, column.since_version
                );
                Ok(true)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                debug!("  Column {}.{} already present", table, column.name);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fail unless every declared column exists
    async fn verify_superset(
        pool: &SqlitePool,
        table: &str,
        expected: &[ColumnDefinition],
    ) -> Result<()> {
        let actual = SchemaIntrospector::introspect_table(pool, table).await?;
        let missing: Vec<&str> = expected
            .iter()
            .filter(|e| !actual.iter().any(|a| a.name == e.name))
            .map(|e| e.name.as_str())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::Schema(format!(
                "table '{}' is still missing columns after reconcile: {}",
                table,
                missing.join(", ")
            )))
        }
    }
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            table_name TEXT NOT NULL,
            version INTEGER NOT NULL,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (table_name, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Table and column names are spliced into SQL, so only plain identifiers pass
fn ensure_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(Error::Schema(format!("invalid SQL identifier '{}'", name)))
    }
}
