//! Query contexts: the namespace and variable bindings of one execution.
//!
//! Namespaces reach a template through reserved variables: `$ns` carries
//! the default (empty-prefix) namespace and `$ns_<prefix>` the namespace
//! bound to `<prefix>`. Callers never bind these directly.

use std::collections::BTreeMap;

use crate::value::{Bindings, Value};

/// Reserved variable name for the default namespace.
pub const DEFAULT_NAMESPACE_VARIABLE: &str = "ns";

/// Variable name that carries the namespace bound to `prefix`.
pub fn namespace_variable(prefix: &str) -> String {
    if prefix.is_empty() {
        DEFAULT_NAMESPACE_VARIABLE.to_string()
    } else {
        format!("{DEFAULT_NAMESPACE_VARIABLE}_{prefix}")
    }
}

/// The namespace prefix a reserved variable refers to, if it is one.
pub fn namespace_prefix(variable: &str) -> Option<&str> {
    if variable == DEFAULT_NAMESPACE_VARIABLE {
        return Some("");
    }
    variable
        .strip_prefix(DEFAULT_NAMESPACE_VARIABLE)
        .and_then(|rest| rest.strip_prefix('_'))
}

/// Mutable namespace and variable bindings.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    namespaces: BTreeMap<String, String>,
    variables: Bindings,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `prefix` to namespace `uri`. The empty prefix is the default namespace.
    pub fn set_namespace(&mut self, prefix: impl Into<String>, uri: impl Into<String>) {
        self.namespaces.insert(prefix.into(), uri.into());
    }

    #[must_use]
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.set_namespace(prefix, uri);
        self
    }

    pub fn namespace(&self, prefix: &str) -> Option<&str> {
        self.namespaces.get(prefix).map(String::as_str)
    }

    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.variables.set(name, value);
    }

    #[must_use]
    pub fn with_variables(mut self, bindings: &Bindings) -> Self {
        self.variables.extend(bindings);
        self
    }

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &Bindings {
        &self.variables
    }

    /// Replace every variable binding, keeping the namespaces.
    pub fn rebind(&mut self, bindings: &Bindings) {
        self.variables = bindings.clone();
    }

    /// Resolve a template placeholder to the value it should receive.
    pub(crate) fn resolve(&self, placeholder: &str) -> Option<Value> {
        if let Some(value) = self.variables.get(placeholder) {
            return Some(value.clone());
        }
        namespace_prefix(placeholder)
            .and_then(|prefix| self.namespaces.get(prefix))
            .map(|uri| Value::String(uri.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_variables_round_trip() {
        assert_eq!(namespace_variable(""), "ns");
        assert_eq!(namespace_variable("db"), "ns_db");
        assert_eq!(namespace_prefix("ns"), Some(""));
        assert_eq!(namespace_prefix("ns_db"), Some("db"));
        assert_eq!(namespace_prefix("nsx"), None);
        assert_eq!(namespace_prefix("user"), None);
    }

    #[test]
    fn resolve_prefers_variables_then_namespaces() {
        let mut ctx = QueryContext::new().with_namespace("", "urn:quire:membership");
        ctx.set_variable("user", "alice");

        assert_eq!(ctx.resolve("user"), Some(Value::from("alice")));
        assert_eq!(ctx.resolve("ns"), Some(Value::from("urn:quire:membership")));
        assert_eq!(ctx.resolve("ns_db"), None);
        assert_eq!(ctx.resolve("missing"), None);
    }

    #[test]
    fn rebind_keeps_namespaces() {
        let mut ctx = QueryContext::new().with_namespace("", "urn:a");
        ctx.set_variable("user", "bob");
        ctx.rebind(&Bindings::new().bind("email", "x@y"));

        assert!(ctx.variable("user").is_none());
        assert!(ctx.variable("email").is_some());
        assert_eq!(ctx.namespace(""), Some("urn:a"));
    }
}
