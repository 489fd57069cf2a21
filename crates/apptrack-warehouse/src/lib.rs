//! Warehouse persistence for applications: staging load + MERGE upsert, delete, reads,
//! and parquet snapshot export.
//!
//! The engine talks to storage through [`WarehouseBackend`]. [`PgWarehouse`] runs the
//! statements against Postgres (15+, for `MERGE`); [`MemoryWarehouse`] applies the same
//! plan in process and backs the tests and database-less local runs.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use apptrack_core::{
    check_schema_consistency, next_application_id, Application, ApplicationRecord, ColumnDef,
    ColumnMode, ColumnType, SchemaDriftError, KEY_COLUMN, WAREHOUSE_COLUMNS,
};
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::{ArrayRef, BooleanArray, Date32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "apptrack-warehouse";

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Chicago;

/// Columns a MERGE never overwrites on an existing row.
pub const PRESERVED_ON_UPDATE: [&str; 2] = [KEY_COLUMN, "created_at"];

#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    pub database_url: Option<String>,
    pub schema: String,
    pub table: String,
    pub timezone: Tz,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            schema: "public".to_string(),
            table: "applications".to_string(),
            timezone: DEFAULT_TIMEZONE,
        }
    }
}

impl WarehouseConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timezone = match std::env::var("APPTRACK_TIMEZONE") {
            Ok(name) => name.parse::<Tz>().ok().unwrap_or_else(|| {
                warn!(timezone = %name, "unknown timezone; falling back to {}", DEFAULT_TIMEZONE);
                DEFAULT_TIMEZONE
            }),
            Err(_) => defaults.timezone,
        };
        Self {
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            schema: std::env::var("APPTRACK_SCHEMA").unwrap_or(defaults.schema),
            table: std::env::var("APPTRACK_TABLE").unwrap_or(defaults.table),
            timezone,
        }
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.schema, &self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Quoted `"schema"."name"` for SQL text.
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Fresh staging table for one upsert call. Names never repeat, so concurrent
    /// callers never share a staging table.
    pub fn staging_for_call(&self) -> TableRef {
        TableRef::new(
            self.schema.clone(),
            format!("{}_staging_{}", self.name, Uuid::new_v4().simple()),
        )
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BackendOp {
    CheckTable,
    CreateTable,
    DropTable,
    Load,
    Merge,
    Delete,
    Select,
}

impl BackendOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckTable => "check_table",
            Self::CreateTable => "create_table",
            Self::DropTable => "drop_table",
            Self::Load => "load",
            Self::Merge => "merge",
            Self::Delete => "delete",
            Self::Select => "select",
        }
    }
}

impl fmt::Display for BackendOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error(transparent)]
    SchemaDrift(#[from] SchemaDriftError),
    #[error("creating table {table} failed: {message}")]
    CreateTable { table: String, message: String },
    #[error("{operation} on {table} failed: {message}")]
    Backend {
        operation: BackendOp,
        table: String,
        message: String,
    },
    #[error("record could not be encoded: {0}")]
    Encode(String),
    #[error("row could not be decoded: {0}")]
    Decode(String),
    #[error("snapshot export failed: {0}")]
    Export(String),
}

impl WarehouseError {
    fn backend(operation: BackendOp, table: &TableRef, err: anyhow::Error) -> Self {
        Self::Backend {
            operation,
            table: table.to_string(),
            message: format!("{err:#}"),
        }
    }
}

/// One warehouse row as a column-name → JSON-value map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatRow(pub Map<String, Value>);

impl FlatRow {
    /// Serializes an application for loading: ISO dates, nested `core_skills`, and both
    /// audit columns stamped with `stamped_at`.
    pub fn from_application(
        app: &Application,
        stamped_at: DateTime<FixedOffset>,
    ) -> Result<Self, WarehouseError> {
        let Value::Object(mut map) =
            serde_json::to_value(app).map_err(|err| WarehouseError::Encode(err.to_string()))?
        else {
            return Err(WarehouseError::Encode("application is not a JSON object".into()));
        };
        map.insert("core_skills".to_string(), nest_skills(&app.core_skills));
        let stamp = Value::String(stamped_at.to_rfc3339());
        map.insert("created_at".to_string(), stamp.clone());
        map.insert("updated_at".to_string(), stamp);
        Ok(Self(map))
    }

    pub fn key(&self) -> Option<&str> {
        self.0.get(KEY_COLUMN).and_then(Value::as_str)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.0.get(column)
    }

    /// Keeps exactly `columns`, filling absent ones with null.
    fn project(&self, columns: &[String]) -> FlatRow {
        FlatRow(
            columns
                .iter()
                .map(|c| (c.clone(), self.0.get(c).cloned().unwrap_or(Value::Null)))
                .collect(),
        )
    }

    pub fn into_record(mut self) -> Result<ApplicationRecord, WarehouseError> {
        let skills = self
            .0
            .get("core_skills")
            .map(unnest_skills)
            .unwrap_or_default();
        self.0.insert(
            "core_skills".to_string(),
            Value::Array(skills.into_iter().map(Value::String).collect()),
        );
        let id = self.key().unwrap_or("<missing>").to_string();
        serde_json::from_value(Value::Object(self.0))
            .map_err(|err| WarehouseError::Decode(format!("application {id}: {err}")))
    }
}

/// `["python","sql"]` → `{"list":[{"element":"python"},{"element":"sql"}]}`.
pub fn nest_skills(skills: &[String]) -> Value {
    let list = skills
        .iter()
        .map(|s| {
            let mut element = Map::new();
            element.insert("element".to_string(), Value::String(s.clone()));
            Value::Object(element)
        })
        .collect();
    let mut nested = Map::new();
    nested.insert("list".to_string(), Value::Array(list));
    Value::Object(nested)
}

/// Inverse of [`nest_skills`], order preserved. A plain string array is accepted too;
/// null or any other shape reads as no skills.
pub fn unnest_skills(value: &Value) -> Vec<String> {
    let items = match value {
        Value::Object(obj) => match obj.get("list") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        Value::Array(items) => items,
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("element").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
    pub target: TableRef,
    pub staging: TableRef,
    pub key: &'static str,
    pub insert_columns: Vec<&'static str>,
    pub update_columns: Vec<&'static str>,
}

impl MergePlan {
    pub fn new(target: TableRef, staging: TableRef, columns: &[ColumnDef]) -> Self {
        Self {
            target,
            staging,
            key: KEY_COLUMN,
            insert_columns: columns.iter().map(|c| c.name).collect(),
            update_columns: columns
                .iter()
                .map(|c| c.name)
                .filter(|name| !PRESERVED_ON_UPDATE.contains(name))
                .collect(),
        }
    }

    pub fn to_sql(&self) -> String {
        let set_list = self
            .update_columns
            .iter()
            .map(|c| format!("{col} = s.{col}", col = quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        let insert_list = self
            .insert_columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Vec<_>>()
            .join(", ");
        let values_list = self
            .insert_columns
            .iter()
            .map(|c| format!("s.{}", quote_ident(c)))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "MERGE INTO {target} AS t USING {staging} AS s ON t.{key} = s.{key} \
             WHEN MATCHED THEN UPDATE SET {set_list} \
             WHEN NOT MATCHED THEN INSERT ({insert_list}) VALUES ({values_list})",
            target = self.target.qualified(),
            staging = self.staging.qualified(),
            key = quote_ident(self.key),
        )
    }
}

#[async_trait]
pub trait WarehouseBackend: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn table_exists(&self, table: &TableRef) -> anyhow::Result<bool>;

    /// Creates the table if it is absent.
    async fn create_table(&self, table: &TableRef, columns: &[ColumnDef]) -> anyhow::Result<()>;

    async fn drop_table(&self, table: &TableRef) -> anyhow::Result<()>;

    /// Write-truncate load: the table ends up holding exactly `rows`.
    async fn load_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        rows: &[FlatRow],
    ) -> anyhow::Result<u64>;

    async fn merge(&self, plan: &MergePlan) -> anyhow::Result<u64>;

    async fn delete_by_key(&self, table: &TableRef, key: &str, value: &str) -> anyhow::Result<u64>;

    async fn select_all(&self, table: &TableRef) -> anyhow::Result<Vec<FlatRow>>;
}

fn pg_type(column_type: ColumnType) -> &'static str {
    match column_type {
        ColumnType::String => "TEXT",
        ColumnType::Date => "DATE",
        ColumnType::Int64 => "BIGINT",
        ColumnType::Bool => "BOOLEAN",
        ColumnType::SkillList => "JSONB",
        ColumnType::Timestamp => "TIMESTAMPTZ",
    }
}

pub fn create_table_sql(table: &TableRef, columns: &[ColumnDef]) -> String {
    let column_list = columns
        .iter()
        .map(|c| {
            let not_null = if c.mode == ColumnMode::Required { " NOT NULL" } else { "" };
            format!("{} {}{}", quote_ident(c.name), pg_type(c.column_type), not_null)
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({column_list})", table.qualified())
}

#[derive(Debug, Clone)]
pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("connecting to warehouse database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl WarehouseBackend for PgWarehouse {
    fn kind(&self) -> &'static str {
        "postgres"
    }

    async fn table_exists(&self, table: &TableRef) -> anyhow::Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1
                  FROM information_schema.tables
                 WHERE table_schema = $1
                   AND table_name = $2
            ) AS present
            "#,
        )
        .bind(&table.schema)
        .bind(&table.name)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("checking for table {table}"))?;
        Ok(row.try_get::<bool, _>("present")?)
    }

    async fn create_table(&self, table: &TableRef, columns: &[ColumnDef]) -> anyhow::Result<()> {
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.schema)))
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating schema {}", table.schema))?;
        sqlx::query(&create_table_sql(table, columns))
            .execute(&self.pool)
            .await
            .with_context(|| format!("creating table {table}"))?;
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> anyhow::Result<()> {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table.qualified()))
            .execute(&self.pool)
            .await
            .with_context(|| format!("dropping table {table}"))?;
        Ok(())
    }

    async fn load_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        rows: &[FlatRow],
    ) -> anyhow::Result<u64> {
        let qualified = table.qualified();
        let mut tx = self.pool.begin().await.context("beginning load transaction")?;
        sqlx::query(&create_table_sql(table, columns))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("creating load target {table}"))?;
        sqlx::query(&format!("TRUNCATE TABLE {qualified}"))
            .execute(&mut *tx)
            .await
            .with_context(|| format!("truncating {table}"))?;

        let insert = format!(
            "INSERT INTO {qualified} SELECT * FROM jsonb_populate_record(NULL::{qualified}, $1)"
        );
        let mut loaded = 0u64;
        for row in rows {
            loaded += sqlx::query(&insert)
                .bind(Value::Object(row.0.clone()))
                .execute(&mut *tx)
                .await
                .with_context(|| format!("loading row {} into {table}", row.key().unwrap_or("?")))?
                .rows_affected();
        }
        tx.commit().await.context("committing load transaction")?;
        Ok(loaded)
    }

    async fn merge(&self, plan: &MergePlan) -> anyhow::Result<u64> {
        let result = sqlx::query(&plan.to_sql())
            .execute(&self.pool)
            .await
            .with_context(|| format!("merging {} into {}", plan.staging, plan.target))?;
        Ok(result.rows_affected())
    }

    async fn delete_by_key(&self, table: &TableRef, key: &str, value: &str) -> anyhow::Result<u64> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE {} = $1",
            table.qualified(),
            quote_ident(key)
        ))
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("deleting {key}={value} from {table}"))?;
        Ok(result.rows_affected())
    }

    async fn select_all(&self, table: &TableRef) -> anyhow::Result<Vec<FlatRow>> {
        let rows = sqlx::query(&format!(
            "SELECT row_to_json(t)::jsonb AS row FROM {} AS t",
            table.qualified()
        ))
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("selecting from {table}"))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<Value, _>("row")? {
                Value::Object(map) => out.push(FlatRow(map)),
                other => bail!("unexpected row shape from {table}: {other}"),
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Default)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<FlatRow>,
}

/// In-process backend with the same write-truncate and MERGE semantics as Postgres.
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    tables: Mutex<BTreeMap<String, MemoryTable>>,
    failures: Mutex<HashSet<BackendOp>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `op` fail until [`MemoryWarehouse::clear_failures`].
    pub async fn fail_on(&self, op: BackendOp) {
        self.failures.lock().await.insert(op);
    }

    pub async fn clear_failures(&self) {
        self.failures.lock().await.clear();
    }

    pub async fn table_names(&self) -> Vec<String> {
        self.tables.lock().await.keys().cloned().collect()
    }

    /// Stored rows exactly as loaded, without decoding.
    pub async fn raw_rows(&self, table: &TableRef) -> Vec<FlatRow> {
        self.tables
            .lock()
            .await
            .get(&table.to_string())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    async fn check(&self, op: BackendOp, table: &TableRef) -> anyhow::Result<()> {
        if self.failures.lock().await.contains(&op) {
            bail!("injected {op} failure on {table}");
        }
        Ok(())
    }
}

fn column_names(columns: &[ColumnDef]) -> Vec<String> {
    columns.iter().map(|c| c.name.to_string()).collect()
}

#[async_trait]
impl WarehouseBackend for MemoryWarehouse {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn table_exists(&self, table: &TableRef) -> anyhow::Result<bool> {
        self.check(BackendOp::CheckTable, table).await?;
        Ok(self.tables.lock().await.contains_key(&table.to_string()))
    }

    async fn create_table(&self, table: &TableRef, columns: &[ColumnDef]) -> anyhow::Result<()> {
        self.check(BackendOp::CreateTable, table).await?;
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_insert_with(|| MemoryTable {
                columns: column_names(columns),
                rows: Vec::new(),
            });
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> anyhow::Result<()> {
        self.check(BackendOp::DropTable, table).await?;
        self.tables.lock().await.remove(&table.to_string());
        Ok(())
    }

    async fn load_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnDef],
        rows: &[FlatRow],
    ) -> anyhow::Result<u64> {
        self.check(BackendOp::Load, table).await?;
        let mut tables = self.tables.lock().await;
        let target = tables.entry(table.to_string()).or_insert_with(|| MemoryTable {
            columns: column_names(columns),
            rows: Vec::new(),
        });
        target.rows = rows.iter().map(|r| r.project(&target.columns)).collect();
        Ok(target.rows.len() as u64)
    }

    async fn merge(&self, plan: &MergePlan) -> anyhow::Result<u64> {
        self.check(BackendOp::Merge, &plan.target).await?;
        let mut tables = self.tables.lock().await;
        let incoming = tables
            .get(&plan.staging.to_string())
            .map(|t| t.rows.clone())
            .ok_or_else(|| anyhow!("staging table {} does not exist", plan.staging))?;
        let target = tables
            .get_mut(&plan.target.to_string())
            .ok_or_else(|| anyhow!("target table {} does not exist", plan.target))?;

        let mut affected = 0u64;
        for row in incoming {
            let key = row.get(plan.key).cloned().unwrap_or(Value::Null);
            match target.rows.iter_mut().find(|r| r.get(plan.key) == Some(&key)) {
                Some(existing) => {
                    for column in &plan.update_columns {
                        let value = row.get(column).cloned().unwrap_or(Value::Null);
                        existing.0.insert(column.to_string(), value);
                    }
                }
                None => {
                    let inserted = plan
                        .insert_columns
                        .iter()
                        .map(|c| (c.to_string(), row.get(c).cloned().unwrap_or(Value::Null)))
                        .collect::<Map<_, _>>();
                    target.rows.push(FlatRow(inserted).project(&target.columns));
                }
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete_by_key(&self, table: &TableRef, key: &str, value: &str) -> anyhow::Result<u64> {
        self.check(BackendOp::Delete, table).await?;
        let mut tables = self.tables.lock().await;
        let target = tables
            .get_mut(&table.to_string())
            .ok_or_else(|| anyhow!("table {table} does not exist"))?;
        let before = target.rows.len();
        target
            .rows
            .retain(|r| r.get(key).and_then(Value::as_str) != Some(value));
        Ok((before - target.rows.len()) as u64)
    }

    async fn select_all(&self, table: &TableRef) -> anyhow::Result<Vec<FlatRow>> {
        self.check(BackendOp::Select, table).await?;
        self.tables
            .lock()
            .await
            .get(&table.to_string())
            .map(|t| t.rows.clone())
            .ok_or_else(|| anyhow!("table {table} does not exist"))
    }
}

/// Postgres when `DATABASE_URL` is configured, otherwise a fresh in-memory warehouse.
pub async fn connect_backend(config: &WarehouseConfig) -> anyhow::Result<Arc<dyn WarehouseBackend>> {
    match &config.database_url {
        Some(url) => Ok(Arc::new(PgWarehouse::connect(url).await?)),
        None => {
            warn!("DATABASE_URL not set; using a non-persistent in-memory warehouse");
            Ok(Arc::new(MemoryWarehouse::new()))
        }
    }
}

/// Result of one upsert. Load and merge failures land in `errors` instead of being
/// returned as `Err`; check [`UpsertOutcome::is_ok`].
#[derive(Debug, Clone, Serialize)]
pub struct UpsertOutcome {
    pub application_id: String,
    pub table: String,
    pub staging_table: String,
    pub rows_merged: u64,
    pub stamped_at: DateTime<FixedOffset>,
    pub errors: Vec<String>,
}

impl UpsertOutcome {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeleteOutcome {
    pub application_id: String,
    pub rows_deleted: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationChoice {
    pub application_id: String,
    pub label: String,
}

pub struct UpsertEngine {
    backend: Arc<dyn WarehouseBackend>,
    table: TableRef,
    timezone: Tz,
}

impl UpsertEngine {
    pub fn new(backend: Arc<dyn WarehouseBackend>, config: &WarehouseConfig) -> Self {
        Self {
            backend,
            table: config.table_ref(),
            timezone: config.timezone,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn backend(&self) -> &Arc<dyn WarehouseBackend> {
        &self.backend
    }

    /// Creates the main table from the static column list if needed. Returns whether it
    /// was created. Drift between the field table and the column list is fatal.
    pub async fn ensure_table(&self) -> Result<bool, WarehouseError> {
        check_schema_consistency()?;
        let create_err = |err: anyhow::Error| WarehouseError::CreateTable {
            table: self.table.to_string(),
            message: format!("{err:#}"),
        };
        if self.backend.table_exists(&self.table).await.map_err(create_err)? {
            return Ok(false);
        }
        self.backend
            .create_table(&self.table, WAREHOUSE_COLUMNS)
            .await
            .map_err(|err| {
                error!(table = %self.table, error = %format!("{err:#}"), "table creation failed");
                create_err(err)
            })?;
        info!(table = %self.table, backend = self.backend.kind(), "created table");
        Ok(true)
    }

    pub async fn upsert(&self, app: &Application) -> Result<UpsertOutcome, WarehouseError> {
        self.upsert_at(app, Utc::now()).await
    }

    /// Upsert with an explicit clock reading, stamped in the configured timezone.
    pub async fn upsert_at(
        &self,
        app: &Application,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, WarehouseError> {
        let span = info_span!(
            "upsert",
            table = %self.table,
            application_id = %app.application_id
        );
        self.stage_and_merge(app, now).instrument(span).await
    }

    async fn stage_and_merge(
        &self,
        app: &Application,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, WarehouseError> {
        self.ensure_table().await?;

        let stamped_at = now.with_timezone(&self.timezone).fixed_offset();
        let staging = self.table.staging_for_call();
        let mut outcome = UpsertOutcome {
            application_id: app.application_id.clone(),
            table: self.table.to_string(),
            staging_table: staging.to_string(),
            rows_merged: 0,
            stamped_at,
            errors: Vec::new(),
        };

        let row = match FlatRow::from_application(app, stamped_at) {
            Ok(row) => row,
            Err(err) => {
                error!(error = %err, "serializing record failed");
                outcome.errors.push(err.to_string());
                return Ok(outcome);
            }
        };

        match self.backend.load_rows(&staging, WAREHOUSE_COLUMNS, &[row]).await {
            Ok(_) => {
                let plan = MergePlan::new(self.table.clone(), staging.clone(), WAREHOUSE_COLUMNS);
                match self.backend.merge(&plan).await {
                    Ok(rows) => outcome.rows_merged = rows,
                    Err(err) => {
                        let err = WarehouseError::backend(BackendOp::Merge, &self.table, err);
                        error!(error = %err, staging = %staging, "merge failed");
                        outcome.errors.push(err.to_string());
                    }
                }
            }
            Err(err) => {
                let err = WarehouseError::backend(BackendOp::Load, &staging, err);
                error!(error = %err, "staging load failed");
                outcome.errors.push(err.to_string());
            }
        }

        if let Err(err) = self.backend.drop_table(&staging).await {
            let err = WarehouseError::backend(BackendOp::DropTable, &staging, err);
            warn!(error = %err, "staging cleanup failed");
            outcome.errors.push(err.to_string());
        }

        if outcome.is_ok() {
            info!(rows_merged = outcome.rows_merged, "upsert complete");
        }
        Ok(outcome)
    }

    pub async fn delete_by_id(&self, application_id: &str) -> Result<DeleteOutcome, WarehouseError> {
        let span = info_span!("delete", table = %self.table, application_id);
        let rows_deleted = self
            .backend
            .delete_by_key(&self.table, KEY_COLUMN, application_id)
            .instrument(span.clone())
            .await
            .map_err(|err| WarehouseError::backend(BackendOp::Delete, &self.table, err))?;
        span.in_scope(|| info!(rows_deleted, "delete complete"));
        Ok(DeleteOutcome {
            application_id: application_id.to_string(),
            rows_deleted,
        })
    }

    /// Full table, newest application first. A missing table reads as empty.
    pub async fn fetch_all(&self) -> Result<Vec<ApplicationRecord>, WarehouseError> {
        let exists = self
            .backend
            .table_exists(&self.table)
            .await
            .map_err(|err| WarehouseError::backend(BackendOp::CheckTable, &self.table, err))?;
        if !exists {
            return Ok(Vec::new());
        }
        let rows = self
            .backend
            .select_all(&self.table)
            .await
            .map_err(|err| WarehouseError::backend(BackendOp::Select, &self.table, err))?;

        let mut records = rows
            .into_iter()
            .map(FlatRow::into_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|a, b| {
            b.application
                .application_date
                .cmp(&a.application.application_date)
                .then_with(|| a.application.application_id.cmp(&b.application.application_id))
        });
        Ok(records)
    }

    pub async fn fetch_applications(&self) -> Result<Vec<Application>, WarehouseError> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .map(|r| r.application)
            .collect())
    }

    pub async fn fetch_one(&self, application_id: &str) -> Result<Option<ApplicationRecord>, WarehouseError> {
        Ok(self
            .fetch_all()
            .await?
            .into_iter()
            .find(|r| r.application.application_id == application_id))
    }

    /// Edit-picker entries sorted by company name.
    pub async fn list_choices(&self) -> Result<Vec<ApplicationChoice>, WarehouseError> {
        let mut records = self.fetch_all().await?;
        records.sort_by(|a, b| {
            a.application
                .company_name
                .cmp(&b.application.company_name)
                .then_with(|| a.application.application_id.cmp(&b.application.application_id))
        });
        Ok(records
            .into_iter()
            .map(|r| ApplicationChoice {
                label: r.application.choice_label(),
                application_id: r.application.application_id,
            })
            .collect())
    }

    pub async fn next_application_id(&self) -> Result<String, WarehouseError> {
        let records = self.fetch_all().await?;
        Ok(next_application_id(
            records.iter().map(|r| r.application.application_id.as_str()),
        ))
    }

    /// Writes `applications.parquet` and `manifest.json` under `dir`.
    pub async fn export_parquet(&self, dir: &Path) -> Result<ExportManifest, WarehouseError> {
        let records = self.fetch_all().await?;
        let span = info_span!("export_parquet", table = %self.table, rows = records.len());
        let _guard = span.enter();
        let manifest = write_snapshot(dir, &records).map_err(|err| WarehouseError::Export(format!("{err:#}")))?;
        info!(dir = %dir.display(), "snapshot exported");
        Ok(manifest)
    }
}

pub const SNAPSHOT_FILE: &str = "applications.parquet";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub schema_version: u32,
    pub files: Vec<ManifestFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
}

const DAYS_FROM_CE_TO_UNIX_EPOCH: i32 = 719_163;

fn arrow_type(column_type: ColumnType) -> DataType {
    match column_type {
        ColumnType::String | ColumnType::Timestamp => DataType::Utf8,
        ColumnType::Date => DataType::Date32,
        ColumnType::Int64 => DataType::Int64,
        ColumnType::Bool => DataType::Boolean,
        ColumnType::SkillList => DataType::List(Arc::new(ArrowField::new("item", DataType::Utf8, true))),
    }
}

pub fn snapshot_schema() -> Schema {
    Schema::new(
        WAREHOUSE_COLUMNS
            .iter()
            .map(|c| ArrowField::new(c.name, arrow_type(c.column_type), c.mode == ColumnMode::Nullable))
            .collect::<Vec<_>>(),
    )
}

fn column_array(column: &ColumnDef, rows: &[Map<String, Value>]) -> anyhow::Result<ArrayRef> {
    let values = rows.iter().map(|r| r.get(column.name).unwrap_or(&Value::Null));
    let array: ArrayRef = match column.column_type {
        ColumnType::String | ColumnType::Timestamp => Arc::new(StringArray::from(
            values.map(|v| v.as_str().map(str::to_string)).collect::<Vec<_>>(),
        )),
        ColumnType::Date => {
            let mut days = Vec::with_capacity(rows.len());
            for v in values {
                days.push(match v.as_str() {
                    Some(s) => {
                        let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
                            .with_context(|| format!("{}: bad date {s}", column.name))?;
                        Some(date.num_days_from_ce() - DAYS_FROM_CE_TO_UNIX_EPOCH)
                    }
                    None => None,
                });
            }
            Arc::new(Date32Array::from(days))
        }
        ColumnType::Int64 => Arc::new(Int64Array::from(values.map(Value::as_i64).collect::<Vec<_>>())),
        ColumnType::Bool => Arc::new(BooleanArray::from(values.map(Value::as_bool).collect::<Vec<_>>())),
        ColumnType::SkillList => {
            let mut builder = ListBuilder::new(StringBuilder::new());
            for v in values {
                for skill in unnest_skills(v) {
                    builder.values().append_value(skill);
                }
                builder.append(true);
            }
            Arc::new(builder.finish())
        }
    };
    Ok(array)
}

pub fn write_applications_parquet(path: &Path, records: &[ApplicationRecord]) -> anyhow::Result<usize> {
    let rows = records
        .iter()
        .map(|r| match serde_json::to_value(r) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(anyhow!("record {} is not an object", r.application.application_id)),
            Err(err) => Err(err.into()),
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let columns = WAREHOUSE_COLUMNS
        .iter()
        .map(|c| column_array(c, &rows))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let batch = RecordBatch::try_new(Arc::new(snapshot_schema()), columns)
        .context("building applications record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(rows.len())
}

fn manifest_entry(name: &str, dir: &Path, path: &Path, rows: usize) -> anyhow::Result<ManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    let rel = path.strip_prefix(dir).unwrap_or(path).display().to_string();
    Ok(ManifestFile {
        name: name.to_string(),
        path: rel,
        sha256: hex::encode(hasher.finalize()),
        bytes: bytes.len() as u64,
        rows,
    })
}

pub fn write_snapshot(dir: &Path, records: &[ApplicationRecord]) -> anyhow::Result<ExportManifest> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let snapshot_path: PathBuf = dir.join(SNAPSHOT_FILE);
    let rows = write_applications_parquet(&snapshot_path, records)?;

    let manifest = ExportManifest {
        schema_version: 1,
        files: vec![manifest_entry("applications", dir, &snapshot_path, rows)?],
    };
    let manifest_path = dir.join(MANIFEST_FILE);
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    std::fs::write(&manifest_path, bytes).with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest)
}
