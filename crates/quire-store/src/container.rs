//! Containers: named document collections stored in one SQLite file.
//!
//! A [`Container`] owns a private connection whose `main` database is in
//! memory. The container file is attached under the container alias, so
//! query templates address its table as `<alias>.documents`.
//!
//! Writes are buffered: the first write after a sync opens a transaction
//! and [`Container::sync`] commits it. [`Container::close`] syncs before
//! releasing the connection, and dropping a container closes it.
//!
//! [`Container::with_sync`] runs a unit of work: while one thread is inside
//! it, every other caller's reads, writes and syncs wait, so a batch is
//! never seen or committed half-written.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{Connection, ErrorCode, OpenFlags, Statement, params};
use tracing::{debug, info, warn};

use crate::config::ContainerConfig;
use crate::context::{QueryContext, namespace_prefix};
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::prepared::{CacheStats, PreparedCache, PreparedHandle, PreparedQuery, validate_bindings};
use crate::registry::{QueryRegistry, placeholders};
use crate::results::{self, ResultSequence, Shape};
use crate::timing::{expected_empty, timed};
use crate::unit::UnitLock;
use crate::value::Bindings;

const SOURCE: &str = "quire_store::container";
const AD_HOC: &str = "<ad hoc>";

pub(crate) type OpenSet = Arc<Mutex<HashSet<PathBuf>>>;

// ═══════════════════════════════════════════════════════════════════════
//  Inner state
// ═══════════════════════════════════════════════════════════════════════

/// State shared between a container and the weak back-references held
/// by its prepared handles.
pub(crate) struct ContainerInner {
    alias: String,
    path: PathBuf,
    config: ContainerConfig,
    conn: Mutex<Option<Connection>>,
    unit: UnitLock,
    registry: QueryRegistry,
    cache: PreparedCache,
    open_set: OpenSet,
}

impl ContainerInner {
    fn lock_conn(&self) -> StoreResult<MutexGuard<'_, Option<Connection>>> {
        Ok(self.conn.lock()?)
    }

    /// Run `f` against the live connection, outside any other thread's unit.
    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StoreResult<T>) -> StoreResult<T> {
        let _unit = self.unit.acquire()?;
        let guard = self.lock_conn()?;
        let conn = guard.as_ref().ok_or_else(|| StoreError::Closed {
            alias: self.alias.clone(),
        })?;
        f(conn)
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.config.read_only {
            return Err(StoreError::AccessDenied {
                path: self.path.clone(),
                reason: "container is open read-only".into(),
            });
        }
        Ok(())
    }

    /// Open the write transaction if none is pending.
    fn begin_write(&self, conn: &Connection) -> StoreResult<()> {
        self.ensure_writable()?;
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            debug!(alias = %self.alias, "write transaction opened");
        }
        Ok(())
    }

    fn commit(&self, conn: &Connection) -> StoreResult<()> {
        if conn.is_autocommit() {
            return Ok(());
        }
        if self.config.statistics {
            conn.execute_batch(&format!("ANALYZE \"{}\"", self.alias))?;
        }
        conn.execute_batch("COMMIT")?;
        debug!(alias = %self.alias, "write transaction committed");
        Ok(())
    }

    fn table(&self) -> String {
        format!("\"{}\".documents", self.alias)
    }

    /// Compile `op` into a new handle.
    fn compile(self: &Arc<Self>, name: &str) -> StoreResult<PreparedHandle> {
        let op = self.registry.lookup(name)?;
        // No unit lock here: a unit in progress may be waiting on this compile.
        let guard = self.lock_conn()?;
        let conn = guard.as_ref().ok_or_else(|| StoreError::Closed {
            alias: self.alias.clone(),
        })?;
        let stmt = conn
            .prepare_cached(op.template())
            .map_err(|e| StoreError::Compile {
                operation: op.name().to_string(),
                reason: e.to_string(),
            })?;
        check_parameters(&stmt, op.name(), |var| {
            op.variable_type(var).is_some()
                || namespace_prefix(var).is_some_and(|p| op.namespaces().contains_key(p))
        })?;
        let read_only = stmt.readonly();
        drop(stmt);
        drop(guard);
        Ok(Arc::new(PreparedQuery::new(
            op,
            read_only,
            Arc::downgrade(self),
        )))
    }

    /// Bind `ctx` to the handle's statement and run it.
    fn run(&self, handle: &PreparedQuery, ctx: &QueryContext) -> StoreResult<ResultSequence> {
        let _unit = self.unit.acquire()?;
        let guard = self.lock_conn()?;
        let conn = guard.as_ref().ok_or_else(|| StoreError::Closed {
            alias: self.alias.clone(),
        })?;
        if !handle.is_read_only() {
            self.begin_write(conn)?;
        }
        let mut stmt = conn.prepare_cached(handle.sql())?;
        let seq = run_statement(conn, &mut stmt, ctx, handle.name(), handle.is_read_only())?;
        handle.record_execution();
        Ok(seq)
    }

    fn close(&self) -> StoreResult<()> {
        let _unit = self.unit.acquire()?;
        let mut guard = self.lock_conn()?;
        let Some(conn) = guard.take() else {
            return Ok(());
        };

        let result = self.commit(&conn).and_then(|()| {
            if self.config.statistics && !self.config.read_only {
                conn.execute_batch(&format!("PRAGMA \"{}\".optimize", self.alias))?;
            }
            Ok(())
        });
        self.cache.clear();
        if let Err((_, e)) = conn.close() {
            warn!(alias = %self.alias, error = %e, "container connection did not close cleanly");
        }
        if let Ok(mut open) = self.open_set.lock() {
            open.remove(&self.path);
        }
        info!(alias = %self.alias, path = %self.path.display(), "container closed");
        result
    }
}

/// Every statement parameter must be a named `$variable` accepted by `known`.
fn check_parameters(
    stmt: &Statement<'_>,
    operation: &str,
    known: impl Fn(&str) -> bool,
) -> StoreResult<()> {
    for i in 1..=stmt.parameter_count() {
        let reason = match stmt.parameter_name(i) {
            None => format!("parameter {i} is positional; use $name"),
            Some(raw) => match raw.strip_prefix('$') {
                Some(var) if known(var) => continue,
                _ => format!("parameter {raw} is not declared"),
            },
        };
        return Err(StoreError::Compile {
            operation: operation.to_string(),
            reason,
        });
    }
    Ok(())
}

/// Bind every parameter of `stmt` from `ctx` and collect its rows.
fn run_statement(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    ctx: &QueryContext,
    operation: &str,
    read_only: bool,
) -> StoreResult<ResultSequence> {
    for i in 1..=stmt.parameter_count() {
        let var = stmt
            .parameter_name(i)
            .and_then(|raw| raw.strip_prefix('$'))
            .map(str::to_owned)
            .unwrap_or_default();
        let value = ctx.resolve(&var).ok_or_else(|| StoreError::MissingBinding {
            operation: operation.to_string(),
            variable: var.clone(),
        })?;
        stmt.raw_bind_parameter(i, &value)?;
    }

    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let shape = Shape::of(&columns);
    let items = results::collect(stmt.raw_query(), &shape)?;
    let affected = if read_only { 0 } else { conn.changes() as u64 };
    Ok(ResultSequence::new(items, affected))
}

// ═══════════════════════════════════════════════════════════════════════
//  Container
// ═══════════════════════════════════════════════════════════════════════

/// An open container. Closes (after syncing) when dropped.
pub struct Container {
    inner: Arc<ContainerInner>,
}

impl Container {
    /// Open or create the container file at `path` under `alias`.
    ///
    /// Nothing is created on disk when the parent directory is missing.
    pub(crate) fn open(
        path: &Path,
        alias: &str,
        config: ContainerConfig,
        registry: QueryRegistry,
        open_set: OpenSet,
    ) -> StoreResult<Self> {
        config.validate()?;
        if !is_alias(alias) {
            return Err(StoreError::InvalidArgument(format!(
                "`{alias}` is not a valid container alias"
            )));
        }

        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(StoreError::PathNotFound { path: parent });
        }
        let file_name = path.file_name().ok_or_else(|| {
            StoreError::InvalidArgument(format!("`{}` has no file name", path.display()))
        })?;

        let exists = path.exists();
        if exists && config.exclusive_create {
            return Err(StoreError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        if !exists && (!config.allow_create || config.read_only) {
            return Err(StoreError::PathNotFound {
                path: path.to_path_buf(),
            });
        }
        if exists && !config.read_only && std::fs::metadata(path)?.permissions().readonly() {
            return Err(StoreError::AccessDenied {
                path: path.to_path_buf(),
                reason: "file is not writable".into(),
            });
        }

        let key = access(path, parent.canonicalize())?.join(file_name);
        {
            let mut open = open_set.lock()?;
            if !open.insert(key.clone()) {
                return Err(StoreError::AlreadyOpen { path: key });
            }
        }

        match Self::connect(&key, alias, &config, exists) {
            Ok(conn) => {
                if config.compressed {
                    warn!(alias, "compressed containers are not supported; storing uncompressed");
                }
                info!(alias, path = %key.display(), created = !exists, "container opened");
                Ok(Self {
                    inner: Arc::new(ContainerInner {
                        alias: alias.to_string(),
                        cache: PreparedCache::new(alias),
                        path: key,
                        config,
                        conn: Mutex::new(Some(conn)),
                        unit: UnitLock::default(),
                        registry,
                        open_set,
                    }),
                })
            }
            Err(e) => {
                if let Ok(mut open) = open_set.lock() {
                    open.remove(&key);
                }
                Err(e)
            }
        }
    }

    fn connect(path: &Path, alias: &str, config: &ContainerConfig, exists: bool) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(
            ":memory:",
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache_capacity);

        let mode = match (config.read_only, exists) {
            (true, _) => "ro",
            (false, true) => "rw",
            (false, false) => "rwc",
        };
        let uri = format!("file:{}?mode={mode}", uri_path(path));
        access(path, conn.execute("ATTACH DATABASE ?1 AS ?2", params![uri, alias]))?;

        if !config.read_only {
            let mut ddl = String::new();
            if !exists {
                ddl.push_str(&format!("PRAGMA \"{alias}\".page_size = {};\n", config.page_size));
            }
            ddl.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS \"{alias}\".documents (
                    name       TEXT PRIMARY KEY,
                    namespace  TEXT NOT NULL DEFAULT '',
                    content    TEXT NOT NULL,
                    metadata   TEXT NOT NULL DEFAULT '{{}}',
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );\n"
            ));
            if config.index_nodes {
                ddl.push_str(&format!(
                    "CREATE INDEX IF NOT EXISTS \"{alias}\".idx_documents_namespace ON documents(namespace);\n"
                ));
                for json_path in &config.indexes {
                    ddl.push_str(&format!(
                        "CREATE INDEX IF NOT EXISTS \"{alias}\".\"idx_documents_{}\" ON documents(json_extract(content, '{json_path}'));\n",
                        index_suffix(json_path)
                    ));
                }
            }
            access(path, conn.execute_batch(&ddl))?;
        }
        Ok(conn)
    }

    pub fn alias(&self) -> &str {
        &self.inner.alias
    }

    /// Canonical path of the container file.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.inner.registry
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock_conn().map(|c| c.is_some()).unwrap_or(false)
    }

    /// `true` while writes are buffered and not yet synced.
    pub fn has_pending_writes(&self) -> bool {
        self.inner
            .with_conn(|conn| Ok(!conn.is_autocommit()))
            .unwrap_or(false)
    }

    // ── documents ────────────────────────────────────────────────────

    pub fn get_document(&self, name: &str) -> StoreResult<Option<Document>> {
        timed(SOURCE, "get_document", || {
            self.inner.with_conn(|conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT name, namespace, content, metadata, created_at, updated_at FROM {} WHERE name = ?1",
                    self.inner.table()
                ))?;
                let shape = Shape::of(&stmt.column_names().into_iter().map(String::from).collect::<Vec<_>>());
                let mut rows = stmt.query([name])?;
                match rows.next()? {
                    Some(row) => Ok(shape.decode(row)?.into_document()),
                    None => Ok(None),
                }
            })
        })
    }

    /// Insert a new document. Fails with `DuplicateDocument` if the name is taken.
    pub fn put_document(&self, doc: &Document) -> StoreResult<()> {
        timed(SOURCE, "put_document", || {
            self.inner.with_conn(|conn| {
                self.inner.begin_write(conn)?;
                let now = Utc::now().timestamp_millis();
                let inserted = conn
                    .prepare_cached(&format!(
                        "INSERT INTO {} (name, namespace, content, metadata, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        self.inner.table()
                    ))?
                    .execute(params![
                        doc.name,
                        doc.namespace,
                        serde_json::to_string(&doc.content)?,
                        doc.metadata_json()?,
                        now
                    ]);
                match inserted {
                    Ok(_) => {
                        debug!(alias = %self.inner.alias, name = %doc.name, "document stored");
                        Ok(())
                    }
                    Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                        Err(StoreError::DuplicateDocument {
                            alias: self.inner.alias.clone(),
                            name: doc.name.clone(),
                        })
                    }
                    Err(e) => Err(e.into()),
                }
            })
        })
    }

    /// Replace an existing document's namespace, content and metadata.
    pub fn update_document(&self, doc: &Document) -> StoreResult<()> {
        timed(SOURCE, "update_document", || {
            self.inner.with_conn(|conn| {
                self.inner.begin_write(conn)?;
                let changed = conn
                    .prepare_cached(&format!(
                        "UPDATE {} SET namespace = ?2, content = ?3, metadata = ?4, updated_at = ?5
                         WHERE name = ?1",
                        self.inner.table()
                    ))?
                    .execute(params![
                        doc.name,
                        doc.namespace,
                        serde_json::to_string(&doc.content)?,
                        doc.metadata_json()?,
                        Utc::now().timestamp_millis()
                    ])?;
                if changed == 0 {
                    return Err(StoreError::DocumentNotFound {
                        alias: self.inner.alias.clone(),
                        name: doc.name.clone(),
                    });
                }
                Ok(())
            })
        })
    }

    /// Delete a document. Returns `false` if it did not exist.
    pub fn delete_document(&self, name: &str) -> StoreResult<bool> {
        timed(SOURCE, "delete_document", || {
            self.inner.with_conn(|conn| {
                self.inner.begin_write(conn)?;
                let deleted = conn
                    .prepare_cached(&format!("DELETE FROM {} WHERE name = ?1", self.inner.table()))?
                    .execute([name])?;
                Ok(deleted > 0)
            })
        })
    }

    pub fn get_metadata(&self, name: &str, key: &str) -> StoreResult<Option<serde_json::Value>> {
        let doc = self.get_document(name)?.ok_or_else(|| StoreError::DocumentNotFound {
            alias: self.inner.alias.clone(),
            name: name.to_string(),
        })?;
        Ok(doc.metadata.get(key).cloned())
    }

    pub fn set_metadata(&self, name: &str, key: &str, value: serde_json::Value) -> StoreResult<()> {
        let _unit = self.inner.unit.acquire()?;
        let mut doc = self.get_document(name)?.ok_or_else(|| StoreError::DocumentNotFound {
            alias: self.inner.alias.clone(),
            name: name.to_string(),
        })?;
        doc.metadata.insert(key.to_string(), value);
        self.update_document(&doc)
    }

    /// Every document, ordered by name.
    pub fn all_documents(&self) -> StoreResult<Vec<Document>> {
        let seq = self.query_ad_hoc(
            &format!(
                "SELECT name, namespace, content, metadata, created_at, updated_at FROM {} ORDER BY name",
                self.inner.table()
            ),
            &Bindings::new(),
        )?;
        Ok(seq.documents().collect())
    }

    pub fn count_documents(&self) -> StoreResult<u64> {
        timed(SOURCE, "count_documents", || {
            self.inner.with_conn(|conn| {
                let count: i64 = conn
                    .prepare_cached(&format!("SELECT count(*) FROM {}", self.inner.table()))?
                    .query_row([], |row| row.get(0))?;
                Ok(count.max(0) as u64)
            })
        })
    }

    // ── queries ──────────────────────────────────────────────────────

    /// Run a one-off template without caching it.
    pub fn query_ad_hoc(&self, template: &str, bindings: &Bindings) -> StoreResult<ResultSequence> {
        self.query_ad_hoc_in(template, &QueryContext::new().with_variables(bindings))
    }

    /// Run a one-off template against an explicit context (namespaces and
    /// variables). Every context variable must appear in the template.
    pub fn query_ad_hoc_in(&self, template: &str, ctx: &QueryContext) -> StoreResult<ResultSequence> {
        let used = placeholders(template);
        if let Some((extra, _)) = ctx.variables().iter().find(|(v, _)| !used.iter().any(|u| u == v)) {
            return Err(StoreError::UnexpectedBinding {
                operation: AD_HOC.to_string(),
                variable: extra.to_string(),
            });
        }
        timed(SOURCE, "query_ad_hoc", || {
            self.inner.with_conn(|conn| {
                let mut stmt = conn.prepare(template).map_err(|e| StoreError::Compile {
                    operation: AD_HOC.to_string(),
                    reason: e.to_string(),
                })?;
                let read_only = stmt.readonly();
                if !read_only {
                    self.inner.begin_write(conn)?;
                }
                run_statement(conn, &mut stmt, ctx, AD_HOC, read_only)
            })
        })
    }

    /// Return the handle for operation `name`, compiling it on first use.
    pub fn prepare(&self, name: &str) -> StoreResult<PreparedHandle> {
        timed(SOURCE, "prepare", || {
            self.inner
                .cache
                .get_or_create(name, || self.inner.compile(name))
        })
    }

    /// Run registered operation `name` with `bindings`.
    ///
    /// Bindings are validated before anything reaches the store. Count-gated
    /// operations return an empty sequence without compiling when the
    /// container holds no documents. The handle's context stays locked from
    /// rebinding until the rows are collected, and the rows of a write are
    /// collected inside the caller's unit of work.
    pub fn execute(&self, name: &str, bindings: &Bindings) -> StoreResult<ResultSequence> {
        timed(SOURCE, name, || {
            let op = self.inner.registry.lookup(name)?;
            validate_bindings(&op, bindings)?;

            if op.is_count_gated() && self.count_documents()? == 0 {
                expected_empty(SOURCE, name, "container holds no documents");
                return Ok(ResultSequence::empty());
            }

            let handle = self.prepare(name)?;
            let _unit = self.inner.unit.acquire()?;
            let mut ctx = handle.lock_context()?;
            ctx.rebind(bindings);
            self.inner.run(&handle, &ctx)
        })
    }

    /// Rebind `handle`'s variables without running it.
    ///
    /// Another caller may rebind the same handle before [`Self::run_prepared`];
    /// use [`Self::execute`] unless access is serialized externally.
    pub fn bind(&self, handle: &PreparedHandle, bindings: &Bindings) -> StoreResult<()> {
        self.check_owner(handle)?;
        validate_bindings(handle.operation(), bindings)?;
        handle.lock_context()?.rebind(bindings);
        Ok(())
    }

    /// Run `handle` with whatever bindings it currently holds.
    pub fn run_prepared(&self, handle: &PreparedHandle) -> StoreResult<ResultSequence> {
        self.check_owner(handle)?;
        timed(SOURCE, handle.name(), || {
            let ctx = handle.context()?;
            self.inner.run(handle, &ctx)
        })
    }

    fn check_owner(&self, handle: &PreparedHandle) -> StoreResult<()> {
        if handle.belongs_to(&self.inner) {
            Ok(())
        } else {
            Err(StoreError::InvalidArgument(format!(
                "handle `{}` was prepared on another container",
                handle.name()
            )))
        }
    }

    pub fn cache_stats(&self) -> &CacheStats {
        self.inner.cache.stats()
    }

    /// Number of compiled handles currently cached.
    pub fn prepared_count(&self) -> u64 {
        self.inner.cache.len()
    }

    // ── lifecycle ────────────────────────────────────────────────────

    /// Commit buffered writes.
    pub fn sync(&self) -> StoreResult<()> {
        timed(SOURCE, "sync", || self.inner.with_conn(|conn| self.inner.commit(conn)))
    }

    /// Run `f` as one unit of work, then sync whether `f` succeeded or not.
    ///
    /// Other threads wait until the sync has finished, so they never read,
    /// extend or commit the batch `f` is writing. Calls made by `f` itself
    /// (including a nested `with_sync`) go straight through; only the
    /// outermost unit syncs. An error from `f` takes precedence over a sync
    /// error.
    pub fn with_sync<T, E>(&self, f: impl FnOnce(&Self) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let unit = self.inner.unit.acquire()?;
        let result = f(self);
        if !unit.is_outermost() {
            return result;
        }
        let synced = self.sync();
        let value = result?;
        synced?;
        Ok(value)
    }

    /// Sync and release the connection. Later calls do nothing.
    pub fn close(&self) -> StoreResult<()> {
        timed(SOURCE, "close", || self.inner.close())
    }

    /// Run `f` on the blocking thread pool.
    pub async fn call<F, T>(self: &Arc<Self>, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Container) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&this)).await?
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if let Err(e) = self.inner.close() {
            warn!(alias = %self.inner.alias, error = %e, "sync on drop failed");
        }
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("alias", &self.inner.alias)
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish()
    }
}

// ── helpers ──────────────────────────────────────────────────────────

fn is_alias(alias: &str) -> bool {
    let mut chars = alias.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !alias.eq_ignore_ascii_case("main")
        && !alias.eq_ignore_ascii_case("temp")
}

/// Map permission failures to `AccessDenied`.
fn access<T, E>(path: &Path, result: Result<T, E>) -> StoreResult<T>
where
    E: Into<StoreError>,
{
    result.map_err(|e| match Into::<StoreError>::into(e) {
        StoreError::Io(io) if io.kind() == std::io::ErrorKind::PermissionDenied => {
            StoreError::AccessDenied {
                path: path.to_path_buf(),
                reason: io.to_string(),
            }
        }
        StoreError::Execution(sql)
            if matches!(
                sql.sqlite_error_code(),
                Some(ErrorCode::CannotOpen | ErrorCode::PermissionDenied | ErrorCode::ReadOnly)
            ) =>
        {
            StoreError::AccessDenied {
                path: path.to_path_buf(),
                reason: sql.to_string(),
            }
        }
        other => other,
    })
}

/// Percent-encode the characters that end the path part of a URI.
fn uri_path(path: &Path) -> String {
    let mut out = String::new();
    for c in path.to_string_lossy().chars() {
        match c {
            '%' => out.push_str("%25"),
            '?' => out.push_str("%3f"),
            '#' => out.push_str("%23"),
            c => out.push(c),
        }
    }
    out
}

fn index_suffix(json_path: &str) -> String {
    json_path
        .trim_start_matches('$')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
