//! Query template registry.
//!
//! The registry maps operation names to [`QueryOperation`]s: the template
//! text, the typed variables a caller must bind, and the namespace bindings
//! fixed at registration. Templates are validated when they are registered
//! so a mismatch between template and declaration is a startup failure
//! rather than a runtime surprise.
//!
//! Internally the registry is backed by [`DashMap`], giving lock-free
//! concurrent lookups. It is cheaply cloneable and shared between every
//! container opened through one manager.
//!
//! # Example
//!
//! ```rust
//! # use quire_store::{QueryOperation, QueryRegistry, ValueType};
//! let registry = QueryRegistry::new();
//! registry
//!     .register(
//!         QueryOperation::builder(
//!             "GetUserByName",
//!             "SELECT name, content FROM membership.documents \
//!              WHERE namespace = $ns AND json_extract(content, '$.username') = $user",
//!         )
//!         .variable("user", ValueType::String)
//!         .namespace("", "urn:quire:membership")
//!         .build(),
//!     )
//!     .unwrap();
//!
//! assert!(registry.lookup("GetUserByName").is_ok());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::context::namespace_prefix;
use crate::error::{StoreError, StoreResult};
use crate::value::ValueType;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// A named, reusable, parameterized query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOperation {
    name: String,
    template: String,
    variables: Vec<(String, ValueType)>,
    namespaces: BTreeMap<String, String>,
    count_gated: bool,
}

impl QueryOperation {
    /// Start describing an operation.
    pub fn builder(name: impl Into<String>, template: impl Into<String>) -> QueryOperationBuilder {
        QueryOperationBuilder {
            op: QueryOperation {
                name: name.into(),
                template: template.into(),
                variables: Vec::new(),
                namespaces: BTreeMap::new(),
                count_gated: false,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Required variables in declaration order.
    pub fn variables(&self) -> &[(String, ValueType)] {
        &self.variables
    }

    pub fn variable_type(&self, name: &str) -> Option<ValueType> {
        self.variables
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, ty)| *ty)
    }

    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    /// Whether execution short-circuits to an empty result on an empty container.
    pub fn is_count_gated(&self) -> bool {
        self.count_gated
    }

    /// Check the template against the declared variables and namespaces.
    pub fn validate(&self) -> StoreResult<()> {
        let invalid = |reason: String| StoreError::InvalidTemplate {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("operation name must not be empty".into()));
        }

        let mut declared = BTreeSet::new();
        for (var, _) in &self.variables {
            if !is_identifier(var) {
                return Err(invalid(format!("`{var}` is not a valid variable name")));
            }
            if namespace_prefix(var).is_some() {
                return Err(invalid(format!(
                    "${var} is reserved for namespace bindings"
                )));
            }
            if !declared.insert(var.as_str()) {
                return Err(invalid(format!("${var} is declared twice")));
            }
        }

        let mut referenced = BTreeSet::new();
        for placeholder in placeholders(&self.template) {
            match namespace_prefix(&placeholder) {
                Some(prefix) => {
                    if !self.namespaces.contains_key(prefix) {
                        return Err(invalid(format!(
                            "${placeholder} has no namespace binding for prefix `{prefix}`"
                        )));
                    }
                }
                None => {
                    referenced.insert(placeholder);
                }
            }
        }

        if let Some(missing) = declared.iter().find(|v| !referenced.contains(**v)) {
            return Err(invalid(format!("${missing} is declared but never used")));
        }
        if let Some(extra) = referenced.iter().find(|v| !declared.contains(v.as_str())) {
            return Err(invalid(format!("${extra} is used but not declared")));
        }
        Ok(())
    }
}

/// Builder for [`QueryOperation`].
pub struct QueryOperationBuilder {
    op: QueryOperation,
}

impl QueryOperationBuilder {
    /// Declare a required variable.
    pub fn variable(mut self, name: impl Into<String>, ty: ValueType) -> Self {
        self.op.variables.push((name.into(), ty));
        self
    }

    /// Bind a namespace prefix (empty for the default namespace).
    pub fn namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.op.namespaces.insert(prefix.into(), uri.into());
        self
    }

    /// Return an empty result without compiling when the container is empty.
    pub fn count_gated(mut self) -> Self {
        self.op.count_gated = true;
        self
    }

    pub fn build(self) -> QueryOperation {
        self.op
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Concurrent operation registry backed by [`DashMap`].
#[derive(Clone, Default)]
pub struct QueryRegistry {
    inner: Arc<DashMap<String, Arc<QueryOperation>>>,
}

impl QueryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new operation.
    ///
    /// Fails with [`StoreError::DuplicateOperation`] if the name is taken and
    /// with [`StoreError::InvalidTemplate`] if the template does not match
    /// its declaration.
    pub fn register(&self, op: QueryOperation) -> StoreResult<Arc<QueryOperation>> {
        op.validate()?;
        match self.inner.entry(op.name.clone()) {
            Entry::Occupied(_) => Err(StoreError::DuplicateOperation { name: op.name }),
            Entry::Vacant(slot) => {
                info!(operation = %op.name, variables = op.variables.len(), "query operation registered");
                let op = Arc::new(op);
                slot.insert(Arc::clone(&op));
                Ok(op)
            }
        }
    }

    /// Register `op` unless an identical operation is already present.
    ///
    /// A different operation under the same name is still a
    /// [`StoreError::DuplicateOperation`].
    pub fn ensure(&self, op: QueryOperation) -> StoreResult<Arc<QueryOperation>> {
        if let Some(existing) = self.inner.get(&op.name) {
            if **existing == op {
                debug!(operation = %op.name, "query operation already registered");
                return Ok(Arc::clone(existing.value()));
            }
            return Err(StoreError::DuplicateOperation { name: op.name });
        }
        self.register(op)
    }

    /// Register every operation in `ops` with [`Self::ensure`].
    pub fn ensure_all(&self, ops: impl IntoIterator<Item = QueryOperation>) -> StoreResult<()> {
        for op in ops {
            self.ensure(op)?;
        }
        Ok(())
    }

    /// Look up an operation by name.
    pub fn lookup(&self, name: &str) -> StoreResult<Arc<QueryOperation>> {
        self.inner
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| StoreError::UnknownOperation {
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.contains_key(name)
    }

    /// Names of every registered operation, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl std::fmt::Debug for QueryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryRegistry")
            .field("operations", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Template scanning
// ---------------------------------------------------------------------------

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Every `$identifier` placeholder in `template`, in order of first use.
///
/// Quoted literals (`'...'`, `"..."`) and comments (`-- ...`, `/* ... */`)
/// are skipped, so JSON paths such as `'$.username'` are not mistaken for
/// variables.
pub fn placeholders(template: &str) -> Vec<String> {
    let bytes = template.as_bytes();
    let mut found: Vec<String> = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // A doubled quote is an escaped quote inside the literal.
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i += 2;
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                if end > start && !bytes[start].is_ascii_digit() {
                    let name = &template[start..end];
                    if !found.iter().any(|f| f == name) {
                        found.push(name.to_string());
                    }
                }
                i = end.max(i + 1);
            }
            _ => i += 1,
        }
    }
    found
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn get_user() -> QueryOperation {
        QueryOperation::builder(
            "GetUserByName",
            "SELECT name, content FROM membership.documents \
             WHERE namespace = $ns AND json_extract(content, '$.username') = $user",
        )
        .variable("user", ValueType::String)
        .namespace("", "urn:quire:membership")
        .build()
    }

    #[test]
    fn placeholders_skip_literals_and_comments() {
        let found = placeholders(
            "SELECT '$notvar', \"$alsonot\" -- $comment\n\
             FROM t /* $block */ WHERE a = $a AND b = $b AND c = $a AND d = '$.x'",
        );
        assert_eq!(found, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn placeholders_handle_escaped_quotes() {
        let found = placeholders("SELECT 'it''s $fake' WHERE x = $real");
        assert_eq!(found, vec!["real".to_string()]);
    }

    #[test]
    fn register_then_lookup() {
        let registry = QueryRegistry::new();
        registry.register(get_user()).unwrap();

        let op = registry.lookup("GetUserByName").unwrap();
        assert_eq!(op.variables().len(), 1);
        assert_eq!(op.variable_type("user"), Some(ValueType::String));
        assert!(registry.contains("GetUserByName"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = QueryRegistry::new();
        registry.register(get_user()).unwrap();

        match registry.register(get_user()) {
            Err(StoreError::DuplicateOperation { name }) => assert_eq!(name, "GetUserByName"),
            other => panic!("expected DuplicateOperation, got {other:?}"),
        }
    }

    #[test]
    fn ensure_accepts_identical_but_rejects_conflicting() {
        let registry = QueryRegistry::new();
        registry.ensure(get_user()).unwrap();
        registry.ensure(get_user()).unwrap();

        let conflicting = QueryOperation::builder(
            "GetUserByName",
            "SELECT name, content FROM membership.documents WHERE name = $user",
        )
        .variable("user", ValueType::String)
        .build();
        assert!(matches!(
            registry.ensure(conflicting),
            Err(StoreError::DuplicateOperation { .. })
        ));
    }

    #[test]
    fn unknown_lookup_fails() {
        let registry = QueryRegistry::new();
        assert!(matches!(
            registry.lookup("Nope"),
            Err(StoreError::UnknownOperation { .. })
        ));
    }

    #[test]
    fn undeclared_variable_is_rejected() {
        let op = QueryOperation::builder("Bad", "SELECT 1 WHERE a = $a AND b = $b")
            .variable("a", ValueType::Integer)
            .build();
        let err = QueryRegistry::new().register(op).unwrap_err();
        assert!(matches!(err, StoreError::InvalidTemplate { .. }), "{err}");
    }

    #[test]
    fn unused_declaration_is_rejected() {
        let op = QueryOperation::builder("Bad", "SELECT 1 WHERE a = $a")
            .variable("a", ValueType::Integer)
            .variable("b", ValueType::Integer)
            .build();
        assert!(QueryRegistry::new().register(op).is_err());
    }

    #[test]
    fn reserved_namespace_names_cannot_be_declared() {
        let op = QueryOperation::builder("Bad", "SELECT 1 WHERE a = $ns")
            .variable("ns", ValueType::String)
            .namespace("", "urn:x")
            .build();
        assert!(QueryRegistry::new().register(op).is_err());
    }

    #[test]
    fn unbound_namespace_reference_is_rejected() {
        let op = QueryOperation::builder("Bad", "SELECT 1 WHERE ns = $ns_db").build();
        assert!(QueryRegistry::new().register(op).is_err());

        let ok = QueryOperation::builder("Good", "SELECT 1 WHERE ns = $ns_db")
            .namespace("db", "urn:quire:metadata")
            .build();
        assert!(QueryRegistry::new().register(ok).is_ok());
    }

    #[test]
    fn names_are_sorted() {
        let registry = QueryRegistry::new();
        registry
            .register(QueryOperation::builder("b", "SELECT 1").build())
            .unwrap();
        registry
            .register(QueryOperation::builder("a", "SELECT 2").build())
            .unwrap();
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }
}
