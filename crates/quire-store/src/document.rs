//! Documents held by a container.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreResult;

/// A named JSON document with per-document metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub name: String,
    /// Namespace URI the document was written under (empty for none).
    pub namespace: String,
    pub content: serde_json::Value,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(name: impl Into<String>, content: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            namespace: String::new(),
            content,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Serialize `value` into a new document.
    pub fn from_serializable<T: Serialize>(name: impl Into<String>, value: &T) -> StoreResult<Self> {
        Ok(Self::new(name, serde_json::to_value(value)?))
    }

    #[must_use]
    pub fn in_namespace(mut self, uri: impl Into<String>) -> Self {
        self.namespace = uri.into();
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deserialize the content into `T`.
    pub fn deserialize<T: DeserializeOwned>(&self) -> StoreResult<T> {
        Ok(serde_json::from_value(self.content.clone())?)
    }

    pub(crate) fn metadata_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(&self.metadata)?)
    }

    /// Build a document from a stored row's raw columns.
    pub(crate) fn from_columns(
        name: String,
        namespace: Option<String>,
        content: serde_json::Value,
        metadata: Option<&str>,
        created_at: Option<i64>,
        updated_at: Option<i64>,
    ) -> StoreResult<Self> {
        let metadata = match metadata {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw)?,
            _ => BTreeMap::new(),
        };
        Ok(Self {
            name,
            namespace: namespace.unwrap_or_default(),
            content,
            metadata,
            created_at: from_millis(created_at),
            updated_at: from_millis(updated_at),
        })
    }
}

fn from_millis(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_default()
}
