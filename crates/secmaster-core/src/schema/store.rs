use chrono::{DateTime, Utc};
use rusqlite::types::{FromSqlError, Type, Value};
use rusqlite::{Connection, OptionalExtension, ToSql, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::model::{IdentifierBundle, Paging, PagingRequest, Security, VersionedRecord};
use crate::time::from_micros;

use super::dialect::{fold_case, wildcard_to_like, Dialect, SqliteDialect};
use super::migrations::MIGRATIONS;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Key of one stored row: object, version, correction.
pub type RecordId = (i64, u32, u32);

/// Window over both time axes for a history query. Each bound is optional;
/// equal `from` and `to` select the rows valid at that single instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntervalQuery {
    pub versions_from: Option<DateTime<Utc>>,
    pub versions_to: Option<DateTime<Utc>>,
    pub corrections_from: Option<DateTime<Utc>>,
    pub corrections_to: Option<DateTime<Utc>>,
}

/// Point-in-time search criteria with the version-correction already fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub object_ids: Option<Vec<i64>>,
    pub name: Option<String>,
    pub security_type: Option<String>,
    pub identifier_bundles: Vec<IdentifierBundle>,
    pub external_id_value: Option<String>,
    pub version_as_of: DateTime<Utc>,
    pub corrected_to: DateTime<Utc>,
}

impl SearchQuery {
    /// Every security current at the given instants.
    #[must_use]
    pub fn at(version_as_of: DateTime<Utc>, corrected_to: DateTime<Utc>) -> Self {
        Self {
            object_ids: None,
            name: None,
            security_type: None,
            identifier_bundles: Vec::new(),
            external_id_value: None,
            version_as_of,
            corrected_to,
        }
    }
}

/// Transactional storage of the bitemporal security history.
///
/// Reads take `&self`; every write runs inside one `BEGIN IMMEDIATE`
/// transaction and therefore needs `&mut self`. Separate connections on the
/// same file coordinate through SQLite locking alone.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
    dialect: Arc<dyn Dialect>,
}

impl Store {
    /// Open (or create) a database at the given path and apply migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_dialect(path, Arc::new(SqliteDialect))
    }

    pub fn open_with_dialect(path: impl AsRef<Path>, dialect: Arc<dyn Dialect>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn, dialect)
    }

    /// Open an in-memory database (for tests).
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with_dialect(Arc::new(SqliteDialect))
    }

    pub fn open_in_memory_with_dialect(dialect: Arc<dyn Dialect>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, dialect)
    }

    fn init(conn: Connection, dialect: Arc<dyn Dialect>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
        let store = Self { conn, dialect };
        store.apply_migrations()?;
        log::debug!("opened {} store", store.dialect.name());
        Ok(store)
    }

    /// Get a reference to the underlying connection (for advanced queries).
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    #[must_use]
    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// How long a writer waits on another connection's lock before failing
    /// with a transient error.
    pub fn set_busy_timeout(&self, timeout: Duration) -> Result<()> {
        self.conn.busy_timeout(timeout)?;
        Ok(())
    }

    fn apply_migrations(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut stmt = self
            .conn
            .prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "Applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                let tx = self.conn.unchecked_transaction()?;
                tx.execute_batch(migration.sql)?;
                tx.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, migration.name],
                )?;
                tx.commit()?;
            }
        }

        Ok(())
    }

    /// Run `body` in a single immediate transaction. Commits when `body`
    /// returns `Ok`; any error rolls every statement back.
    pub fn write<T>(&mut self, body: impl FnOnce(&StoreTxn<'_>) -> Result<T>) -> Result<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let txn = StoreTxn {
            tx,
            dialect: self.dialect.as_ref(),
        };
        let value = body(&txn)?;
        txn.tx.commit()?;
        Ok(value)
    }
}

// Single-statement primitives, each in its own transaction
impl Store {
    pub fn insert(&mut self, record: &VersionedRecord) -> Result<RecordId> {
        self.write(|txn| txn.insert(record))
    }

    pub fn close_version(&mut self, object_id: i64, as_of: DateTime<Utc>) -> Result<()> {
        self.write(|txn| txn.close_version(object_id, as_of))
    }

    pub fn close_correction(
        &mut self,
        object_id: i64,
        version_number: u32,
        as_of: DateTime<Utc>,
    ) -> Result<()> {
        self.write(|txn| txn.close_correction(object_id, version_number, as_of))
    }

    pub fn allocate_object_id(&mut self, now: DateTime<Utc>) -> Result<i64> {
        self.write(|txn| txn.allocate_object_id(now))
    }
}

// Reads
impl Store {
    pub fn find_latest_version(&self, object_id: i64) -> Result<VersionedRecord> {
        find_latest_version(&self.conn, self.dialect(), object_id)
    }

    pub fn find_version(&self, object_id: i64, version_number: u32) -> Result<VersionedRecord> {
        find_version(&self.conn, self.dialect(), object_id, version_number)
    }

    pub fn find_by_unique_id(
        &self,
        object_id: i64,
        version_number: u32,
        correction_number: u32,
    ) -> Result<VersionedRecord> {
        find_by_unique_id(
            &self.conn,
            self.dialect(),
            object_id,
            version_number,
            correction_number,
        )
    }

    /// The row of `object_id` valid at `version_as_of` as known at
    /// `corrected_to`.
    pub fn find_at(
        &self,
        object_id: i64,
        version_as_of: DateTime<Utc>,
        corrected_to: DateTime<Utc>,
    ) -> Result<VersionedRecord> {
        find_at(
            &self.conn,
            self.dialect(),
            object_id,
            version_as_of,
            corrected_to,
        )
    }

    /// Every row of `object_id` overlapping the window, newest version first.
    pub fn query_interval(
        &self,
        object_id: i64,
        window: &IntervalQuery,
    ) -> Result<Vec<VersionedRecord>> {
        Ok(self.query_interval_page(object_id, window, PagingRequest::ALL)?.0)
    }

    pub fn query_interval_page(
        &self,
        object_id: i64,
        window: &IntervalQuery,
        paging: PagingRequest,
    ) -> Result<(Vec<VersionedRecord>, Paging)> {
        let mut args = SqlArgs::default();
        args.clause("d.doc_oid = :doc_oid");
        args.bind(":doc_oid", object_id);
        window_clause(
            &mut args,
            "ver",
            window.versions_from,
            window.versions_to,
        );
        window_clause(
            &mut args,
            "corr",
            window.corrections_from,
            window.corrections_to,
        );
        self.select_page(&args, "d.ver_num DESC, d.corr_num DESC", paging)
    }

    pub fn count_interval(&self, object_id: i64, window: &IntervalQuery) -> Result<usize> {
        Ok(self
            .query_interval_page(object_id, window, PagingRequest::NONE)?
            .1
            .total_items)
    }

    pub fn count_search(&self, query: &SearchQuery) -> Result<usize> {
        Ok(self.search(query, PagingRequest::NONE)?.1.total_items)
    }

    /// One row per object matching the criteria, ordered by object id.
    pub fn search(
        &self,
        query: &SearchQuery,
        paging: PagingRequest,
    ) -> Result<(Vec<VersionedRecord>, Paging)> {
        if query.object_ids.as_ref().is_some_and(Vec::is_empty) {
            return Ok((Vec::new(), Paging::of(paging, 0)));
        }
        let args = self.search_args(query);
        self.select_page(&args, "d.doc_oid ASC", paging)
    }

    fn search_args(&self, query: &SearchQuery) -> SqlArgs {
        let dialect = self.dialect();
        let mut args = SqlArgs::default();
        point_clause(&mut args, "ver", ":version_as_of", query.version_as_of);
        point_clause(&mut args, "corr", ":corrected_to", query.corrected_to);

        if let Some(object_ids) = &query.object_ids {
            let params: Vec<String> = object_ids
                .iter()
                .enumerate()
                .map(|(i, oid)| args.bind(&format!(":oid{i}"), *oid))
                .collect();
            args.clause(format!("d.doc_oid IN ({})", params.join(", ")));
        }
        if let Some(name) = &query.name {
            let param = args.bind(":name", wildcard_to_like(&fold_case(name)));
            args.clause(dialect.like("d.name_key", &param));
        }
        if let Some(security_type) = &query.security_type {
            let param = args.bind(":sec_type", security_type.clone());
            args.clause(format!("d.sec_type = {param}"));
        }
        if !query.identifier_bundles.is_empty() {
            let mut any_of = Vec::with_capacity(query.identifier_bundles.len());
            for (b, bundle) in query.identifier_bundles.iter().enumerate() {
                let all_of: Vec<String> = bundle
                    .iter()
                    .enumerate()
                    .map(|(i, id)| {
                        let scheme = args.bind(&format!(":b{b}_s{i}"), id.scheme.clone());
                        let value = args.bind(&format!(":b{b}_v{i}"), id.value.clone());
                        dialect.has_idkey(&scheme, &value)
                    })
                    .collect();
                if all_of.is_empty() {
                    any_of.push("1 = 1".to_string());
                } else {
                    any_of.push(format!("({})", all_of.join(" AND ")));
                }
            }
            args.clause(format!("({})", any_of.join(" OR ")));
        }
        if let Some(value) = &query.external_id_value {
            let param = args.bind(":idkey_value", wildcard_to_like(&fold_case(value)));
            args.clause(dialect.has_idkey_value_like(&param));
        }
        args
    }

    /// Count plus one page, from a single read snapshot. `ALL` skips the
    /// count; `NONE` skips the rows.
    fn select_page(
        &self,
        args: &SqlArgs,
        order_by: &str,
        paging: PagingRequest,
    ) -> Result<(Vec<VersionedRecord>, Paging)> {
        let dialect = self.dialect();
        let select = format!(
            "{}{} ORDER BY {order_by}",
            dialect.select_documents(),
            args.where_sql()
        );

        let snapshot = self.conn.unchecked_transaction()?;
        if paging.is_all() {
            let records = select_records(&snapshot, &select, args)?;
            let total = records.len();
            return Ok((records, Paging::of(paging, total)));
        }

        let count_sql = format!("{}{}", dialect.count_documents(), args.where_sql());
        log::debug!("executing sql {count_sql}");
        let count: i64 = snapshot.query_row(&count_sql, args.params().as_slice(), |row| {
            row.get(0)
        })?;
        let total = usize::try_from(count).unwrap_or(0);

        let mut records = Vec::new();
        if total > 0 && !paging.is_none() {
            let mut paged = args.clone();
            paged.bind(":paging_fetch", paging.sql_limit());
            paged.bind(":paging_offset", paging.sql_offset());
            let sql = format!("{select} {}", dialect.paging());
            records = select_records(&snapshot, &sql, &paged)?;
        }
        snapshot.commit()?;
        Ok((records, Paging::of(paging, total)))
    }
}

/// The write side of one [`Store::write`] transaction.
#[derive(Debug)]
pub struct StoreTxn<'a> {
    tx: Transaction<'a>,
    dialect: &'a dyn Dialect,
}

impl StoreTxn<'_> {
    /// Reserve a fresh, never reused object id.
    pub fn allocate_object_id(&self, now: DateTime<Utc>) -> Result<i64> {
        self.tx
            .execute(self.dialect.insert_object(), [now.timestamp_micros()])
            .map_err(Error::from_write)?;
        Ok(self.tx.last_insert_rowid())
    }

    /// Append one row and its identifier keys.
    pub fn insert(&self, record: &VersionedRecord) -> Result<RecordId> {
        let payload = serde_json::to_string(&record.payload)?;
        self.tx
            .execute(
                self.dialect.insert_document(),
                rusqlite::params![
                    record.object_id,
                    record.version_number,
                    record.correction_number,
                    record.version_from_instant.timestamp_micros(),
                    record.version_to_instant.map(|t| t.timestamp_micros()),
                    record.correction_from_instant.timestamp_micros(),
                    record.correction_to_instant.map(|t| t.timestamp_micros()),
                    record.payload.name,
                    fold_case(&record.payload.name),
                    record.payload.security_type,
                    payload,
                ],
            )
            .map_err(Error::from_write)?;

        for id in record.payload.identifiers.iter() {
            self.tx
                .execute(
                    self.dialect.insert_idkey(),
                    rusqlite::params![
                        record.object_id,
                        record.version_number,
                        record.correction_number,
                        id.scheme,
                        id.value,
                        fold_case(&id.value),
                    ],
                )
                .map_err(Error::from_write)?;
        }

        Ok((
            record.object_id,
            record.version_number,
            record.correction_number,
        ))
    }

    /// End the current version of `object_id` at `as_of`.
    pub fn close_version(&self, object_id: i64, as_of: DateTime<Utc>) -> Result<()> {
        let rows = self
            .tx
            .execute(
                self.dialect.close_version(),
                rusqlite::params![object_id, as_of.timestamp_micros()],
            )
            .map_err(Error::from_write)?;
        if rows == 0 {
            return Err(Error::not_found("open version of security", object_id));
        }
        Ok(())
    }

    /// End the open correction of one version at `as_of`.
    pub fn close_correction(
        &self,
        object_id: i64,
        version_number: u32,
        as_of: DateTime<Utc>,
    ) -> Result<()> {
        let rows = self
            .tx
            .execute(
                self.dialect.close_correction(),
                rusqlite::params![object_id, version_number, as_of.timestamp_micros()],
            )
            .map_err(Error::from_write)?;
        if rows == 0 {
            return Err(Error::not_found(
                "open correction of security",
                format!("{object_id} version {version_number}"),
            ));
        }
        Ok(())
    }

    pub fn find_latest_version(&self, object_id: i64) -> Result<VersionedRecord> {
        find_latest_version(&self.tx, self.dialect, object_id)
    }

    pub fn find_at(
        &self,
        object_id: i64,
        version_as_of: DateTime<Utc>,
        corrected_to: DateTime<Utc>,
    ) -> Result<VersionedRecord> {
        find_at(&self.tx, self.dialect, object_id, version_as_of, corrected_to)
    }

    /// One above the highest version number ever stored for `object_id`.
    pub fn next_version_number(&self, object_id: i64) -> Result<u32> {
        let highest: Option<u32> = self.tx.query_row(
            self.dialect.max_version_number(),
            [object_id],
            |row| row.get(0),
        )?;
        highest
            .map_or(Some(0), |v| v.checked_add(1))
            .ok_or_else(|| Error::Conflict(format!("version numbers exhausted for {object_id}")))
    }

    pub fn find_version(&self, object_id: i64, version_number: u32) -> Result<VersionedRecord> {
        find_version(&self.tx, self.dialect, object_id, version_number)
    }

    pub fn find_by_unique_id(
        &self,
        object_id: i64,
        version_number: u32,
        correction_number: u32,
    ) -> Result<VersionedRecord> {
        find_by_unique_id(
            &self.tx,
            self.dialect,
            object_id,
            version_number,
            correction_number,
        )
    }
}

fn find_latest_version(
    conn: &Connection,
    dialect: &dyn Dialect,
    object_id: i64,
) -> Result<VersionedRecord> {
    let sql = format!(
        "{} WHERE d.doc_oid = ?1 AND d.ver_to_instant IS NULL AND d.corr_to_instant IS NULL",
        dialect.select_documents()
    );
    select_one(conn, &sql, rusqlite::params![object_id])?
        .ok_or_else(|| Error::not_found("security", object_id))
}

fn find_version(
    conn: &Connection,
    dialect: &dyn Dialect,
    object_id: i64,
    version_number: u32,
) -> Result<VersionedRecord> {
    let sql = format!(
        "{} WHERE d.doc_oid = ?1 AND d.ver_num = ?2 AND d.corr_to_instant IS NULL",
        dialect.select_documents()
    );
    select_one(conn, &sql, rusqlite::params![object_id, version_number])?.ok_or_else(|| {
        Error::not_found("security version", format!("{object_id} version {version_number}"))
    })
}

fn find_by_unique_id(
    conn: &Connection,
    dialect: &dyn Dialect,
    object_id: i64,
    version_number: u32,
    correction_number: u32,
) -> Result<VersionedRecord> {
    let sql = format!(
        "{} WHERE d.doc_oid = ?1 AND d.ver_num = ?2 AND d.corr_num = ?3",
        dialect.select_documents()
    );
    select_one(
        conn,
        &sql,
        rusqlite::params![object_id, version_number, correction_number],
    )?
    .ok_or_else(|| {
        Error::not_found(
            "security",
            format!("{object_id} version {version_number} correction {correction_number}"),
        )
    })
}

fn find_at(
    conn: &Connection,
    dialect: &dyn Dialect,
    object_id: i64,
    version_as_of: DateTime<Utc>,
    corrected_to: DateTime<Utc>,
) -> Result<VersionedRecord> {
    let mut args = SqlArgs::default();
    args.clause("d.doc_oid = :doc_oid");
    args.bind(":doc_oid", object_id);
    point_clause(&mut args, "ver", ":version_as_of", version_as_of);
    point_clause(&mut args, "corr", ":corrected_to", corrected_to);
    let sql = format!(
        "{}{} ORDER BY d.ver_num DESC, d.corr_num DESC LIMIT 1",
        dialect.select_documents(),
        args.where_sql()
    );
    let mut records = select_records(conn, &sql, &args)?;
    records.pop().ok_or_else(|| {
        Error::not_found(
            "security",
            format!("{object_id} at {version_as_of} corrected to {corrected_to}"),
        )
    })
}

fn select_one(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> Result<Option<VersionedRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    Ok(stmt.query_row(params, row_to_record).optional()?)
}

fn select_records(conn: &Connection, sql: &str, args: &SqlArgs) -> Result<Vec<VersionedRecord>> {
    log::debug!("executing sql {sql}");
    let mut stmt = conn.prepare(sql)?;
    let records = stmt
        .query_map(args.params().as_slice(), row_to_record)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(records)
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<VersionedRecord> {
    let payload_str: String = row.get(7)?;
    let payload: Security = serde_json::from_str(&payload_str)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(VersionedRecord {
        object_id: row.get(0)?,
        version_number: row.get(1)?,
        correction_number: row.get(2)?,
        payload,
        version_from_instant: instant_at(row, 3)?,
        version_to_instant: open_instant_at(row, 4)?,
        correction_from_instant: instant_at(row, 5)?,
        correction_to_instant: open_instant_at(row, 6)?,
    })
}

fn instant_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let micros: i64 = row.get(idx)?;
    from_micros(micros).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            Box::new(FromSqlError::OutOfRange(micros)),
        )
    })
}

fn open_instant_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => instant_at(row, idx).map(Some),
        None => Ok(None),
    }
}

/// `[from, to)` containment of a single instant on one axis.
fn point_clause(args: &mut SqlArgs, axis: &str, param: &str, instant: DateTime<Utc>) {
    args.bind(param, instant.timestamp_micros());
    args.clause(format!(
        "d.{axis}_from_instant <= {param} AND (d.{axis}_to_instant IS NULL OR d.{axis}_to_instant > {param})"
    ));
}

/// Overlap of a row's interval with the window on one axis.
fn window_clause(
    args: &mut SqlArgs,
    axis: &str,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) {
    match (from, to) {
        (Some(from), Some(to)) if from == to => {
            point_clause(args, axis, &format!(":{axis}_point"), from);
        }
        _ => {
            if let Some(to) = to {
                let param = args.bind(&format!(":{axis}_to"), to.timestamp_micros());
                args.clause(format!("d.{axis}_from_instant < {param}"));
            }
            if let Some(from) = from {
                let param = args.bind(&format!(":{axis}_from"), from.timestamp_micros());
                args.clause(format!(
                    "(d.{axis}_to_instant IS NULL OR d.{axis}_to_instant > {param})"
                ));
            }
        }
    }
}

/// Accumulates `WHERE` clauses and their named parameters.
#[derive(Debug, Clone, Default)]
struct SqlArgs {
    clauses: Vec<String>,
    values: Vec<(String, Value)>,
}

impl SqlArgs {
    fn clause(&mut self, sql: impl Into<String>) {
        self.clauses.push(sql.into());
    }

    /// Binds `value` to `name` and returns the placeholder.
    fn bind(&mut self, name: &str, value: impl Into<Value>) -> String {
        self.values.push((name.to_string(), value.into()));
        name.to_string()
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }

    fn params(&self) -> Vec<(&str, &dyn ToSql)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
            .collect()
    }
}
