//! Prepared query cache.
//!
//! Each [`Container`](crate::Container) owns one [`PreparedCache`] that maps
//! operation names to compiled [`PreparedHandle`]s. A handle is compiled
//! the first time its operation runs on that container and is reused until
//! the container closes.
//!
//! # Binding discipline
//!
//! A handle carries one mutable [`QueryContext`]. Running an operation
//! rebinds that context and then executes against it, so the two steps
//! must not interleave with another caller's. [`Container::execute`]
//! holds the context lock across both; the lower-level
//! [`Container::bind`] + [`Container::run_prepared`] pair does not.
//!
//! Lock order is handle context first, then the container connection.
//!
//! [`Container::execute`]: crate::Container::execute
//! [`Container::bind`]: crate::Container::bind
//! [`Container::run_prepared`]: crate::Container::run_prepared

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use moka::sync::Cache;
use tracing::debug;

use crate::container::ContainerInner;
use crate::context::QueryContext;
use crate::error::{StoreError, StoreResult};
use crate::registry::QueryOperation;
use crate::value::Bindings;

/// Shared handle to a compiled operation.
pub type PreparedHandle = Arc<PreparedQuery>;

// ── prepared query ───────────────────────────────────────────────────

/// The compiled form of a [`QueryOperation`] on one container.
pub struct PreparedQuery {
    operation: Arc<QueryOperation>,
    read_only: bool,
    context: Mutex<QueryContext>,
    container: Weak<ContainerInner>,
    executions: AtomicU64,
}

impl PreparedQuery {
    pub(crate) fn new(
        operation: Arc<QueryOperation>,
        read_only: bool,
        container: Weak<ContainerInner>,
    ) -> Self {
        let mut context = QueryContext::new();
        for (prefix, uri) in operation.namespaces() {
            context.set_namespace(prefix.clone(), uri.clone());
        }
        Self {
            operation,
            read_only,
            context: Mutex::new(context),
            container,
            executions: AtomicU64::new(0),
        }
    }

    pub fn operation(&self) -> &QueryOperation {
        &self.operation
    }

    pub fn name(&self) -> &str {
        self.operation.name()
    }

    pub(crate) fn sql(&self) -> &str {
        self.operation.template()
    }

    /// `true` if the compiled statement does not write.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Times this handle has been run.
    pub fn executions(&self) -> u64 {
        self.executions.load(Ordering::Relaxed)
    }

    /// A copy of the handle's current bindings.
    pub fn context(&self) -> StoreResult<QueryContext> {
        Ok(self.lock_context()?.clone())
    }

    pub(crate) fn lock_context(&self) -> StoreResult<MutexGuard<'_, QueryContext>> {
        Ok(self.context.lock()?)
    }

    pub(crate) fn record_execution(&self) {
        self.executions.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether this handle was compiled on `container`.
    pub(crate) fn belongs_to(&self, container: &Arc<ContainerInner>) -> bool {
        Weak::as_ptr(&self.container) == Arc::as_ptr(container)
    }
}

impl fmt::Debug for PreparedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedQuery")
            .field("operation", &self.operation.name())
            .field("read_only", &self.read_only)
            .field("executions", &self.executions())
            .finish()
    }
}

// ── binding validation ───────────────────────────────────────────────

/// Check that `bindings` covers exactly the declared variables of `op`,
/// with values of the declared types.
pub fn validate_bindings(op: &QueryOperation, bindings: &Bindings) -> StoreResult<()> {
    for (variable, ty) in op.variables() {
        match bindings.get(variable) {
            None => {
                return Err(StoreError::MissingBinding {
                    operation: op.name().to_string(),
                    variable: variable.clone(),
                });
            }
            Some(value) if !ty.accepts(value) => {
                return Err(StoreError::BindingType {
                    operation: op.name().to_string(),
                    variable: variable.clone(),
                    expected: *ty,
                    actual: value.type_name(),
                });
            }
            Some(_) => {}
        }
    }
    if let Some((extra, _)) = bindings
        .iter()
        .find(|(name, _)| op.variable_type(name).is_none())
    {
        return Err(StoreError::UnexpectedBinding {
            operation: op.name().to_string(),
            variable: extra.to_string(),
        });
    }
    Ok(())
}

// ── cache stats ──────────────────────────────────────────────────────

/// Counters tracking how often handles are reused.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    compiles: AtomicU64,
}

impl CacheStats {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_compile(&self) {
        self.compiles.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups answered by an existing handle.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Successful compilations. Never more than one per operation.
    pub fn compiles(&self) -> u64 {
        self.compiles.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate between 0.0 and 1.0 (0.0 before the first lookup).
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.hits() as f64 / total as f64
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} compiles={} rate={:.2}%",
            self.hits(),
            self.misses(),
            self.compiles(),
            self.hit_rate() * 100.0,
        )
    }
}

// ── cache ────────────────────────────────────────────────────────────

/// Operation name to handle map for one container, backed by
/// [`moka::sync::Cache`].
///
/// The cache is unbounded and never expires entries: handles live until
/// [`PreparedCache::clear`] runs at container close. Concurrent first uses
/// of one operation compile it once; a failed compilation is not cached.
pub struct PreparedCache {
    handles: Cache<String, PreparedHandle>,
    stats: CacheStats,
}

impl PreparedCache {
    pub(crate) fn new(alias: &str) -> Self {
        Self {
            handles: Cache::builder().name(&format!("prepared:{alias}")).build(),
            stats: CacheStats::default(),
        }
    }

    /// Return the cached handle for `name`, compiling it with `compile` on
    /// first use.
    pub(crate) fn get_or_create<F>(&self, name: &str, compile: F) -> StoreResult<PreparedHandle>
    where
        F: FnOnce() -> StoreResult<PreparedHandle>,
    {
        if let Some(handle) = self.handles.get(name) {
            self.stats.record_hit();
            return Ok(handle);
        }
        self.stats.record_miss();

        self.handles
            .try_get_with(name.to_string(), || {
                let handle = compile()?;
                self.stats.record_compile();
                debug!(operation = name, "prepared handle compiled");
                Ok::<_, StoreError>(handle)
            })
            .map_err(|shared| {
                Arc::try_unwrap(shared).unwrap_or_else(|shared| StoreError::Compile {
                    operation: name.to_string(),
                    reason: shared.to_string(),
                })
            })
    }

    pub fn get(&self, name: &str) -> Option<PreparedHandle> {
        self.handles.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Number of live handles.
    pub fn len(&self) -> u64 {
        self.handles.run_pending_tasks();
        self.handles.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop every handle.
    pub(crate) fn clear(&self) {
        self.handles.invalidate_all();
        self.handles.run_pending_tasks();
    }
}

impl fmt::Debug for PreparedCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedCache")
            .field("stats", &self.stats)
            .finish()
    }
}
