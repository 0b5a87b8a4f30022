//! Web event log.
//!
//! Events are stored as documents named by their id, with the event type
//! recorded in a `type_name` metadata entry so it can be filtered on
//! without parsing the content.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use quire_store::{Bindings, Container, Document, Manager, QueryOperation, ValueType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::{blocking, unit};
use crate::error::{ProviderError, ProviderResult};

pub const ALIAS: &str = "events";
pub const NAMESPACE: &str = "urn:quire:events";

/// Metadata key holding the event type.
pub const TYPE_NAME_KEY: &str = "type_name";

/// A raised web event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebEvent {
    pub id: Uuid,
    pub type_name: String,
    pub code: i32,
    #[serde(default)]
    pub detail_code: i32,
    pub message: String,
    #[serde(default)]
    pub source: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Event-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

impl WebEvent {
    /// A new event stamped now with a fresh id.
    pub fn new(type_name: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            type_name: type_name.into(),
            code,
            detail_code: 0,
            message: message.into(),
            source: None,
            occurred_at: Utc::now(),
            data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    fn to_document(&self) -> ProviderResult<Document> {
        Ok(Document::from_serializable(self.id.to_string(), self)?
            .in_namespace(NAMESPACE)
            .with_metadata(TYPE_NAME_KEY, self.type_name.clone()))
    }
}

const SELECT: &str = "SELECT name, content FROM events.documents WHERE namespace = $ns";
const ORDER: &str = "ORDER BY julianday(json_extract(content, '$.occurred_at')), name";

fn operations() -> Vec<QueryOperation> {
    vec![
        QueryOperation::builder(
            "EventsSince",
            format!(
                "{SELECT} AND julianday(json_extract(content, '$.occurred_at')) >= julianday($since) {ORDER}"
            ),
        )
        .namespace("", NAMESPACE)
        .variable("since", ValueType::DateTime)
        .count_gated()
        .build(),
        QueryOperation::builder(
            "EventsOfType",
            format!("{SELECT} AND json_extract(metadata, '$.{TYPE_NAME_KEY}') = $type {ORDER}"),
        )
        .namespace("", NAMESPACE)
        .variable("type", ValueType::String)
        .count_gated()
        .build(),
    ]
}

/// Append-only store of web events.
#[derive(Clone)]
pub struct EventStore {
    container: Arc<Container>,
}

impl EventStore {
    pub fn open(manager: &Manager, path: impl AsRef<Path>) -> ProviderResult<Self> {
        let container = manager.open_container(path, ALIAS)?;
        Self::from_container(container)
    }

    /// Wrap an already open container. Its alias must be [`ALIAS`].
    pub fn from_container(container: Container) -> ProviderResult<Self> {
        if container.alias() != ALIAS {
            return Err(ProviderError::InvalidArgument(format!(
                "event container must use alias `{ALIAS}`, not `{}`",
                container.alias()
            )));
        }
        container.registry().ensure_all(operations())?;
        Ok(Self {
            container: Arc::new(container),
        })
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Whether the store can still accept events.
    pub fn is_initialized(&self) -> bool {
        self.container.is_open()
    }

    #[instrument(skip(self, event), fields(id = %event.id, type_name = %event.type_name))]
    pub async fn process_event(&self, event: WebEvent) -> ProviderResult<()> {
        let doc = event.to_document()?;
        unit(&self.container, move |c| Ok(c.put_document(&doc)?)).await?;
        debug!("event stored");
        Ok(())
    }

    /// Store a batch of events with a single sync.
    #[instrument(skip(self, events), fields(count = events.len()))]
    pub async fn process_events(&self, events: Vec<WebEvent>) -> ProviderResult<()> {
        let docs = events
            .iter()
            .map(WebEvent::to_document)
            .collect::<ProviderResult<Vec<_>>>()?;
        unit(&self.container, move |c| {
            docs.iter().try_for_each(|d| c.put_document(d))?;
            Ok(())
        })
        .await
    }

    /// Events raised at or after `since`, oldest first.
    pub async fn events_since(&self, since: DateTime<Utc>) -> ProviderResult<Vec<WebEvent>> {
        self.query("EventsSince", Bindings::new().bind("since", since)).await
    }

    /// Events of one type, oldest first.
    pub async fn events_of_type(&self, type_name: &str) -> ProviderResult<Vec<WebEvent>> {
        self.query("EventsOfType", Bindings::new().bind("type", type_name)).await
    }

    pub async fn count(&self) -> ProviderResult<u64> {
        blocking(&self.container, |c| Ok(c.count_documents()?)).await
    }

    /// Commit anything still buffered.
    pub async fn flush(&self) -> ProviderResult<()> {
        blocking(&self.container, |c| Ok(c.sync()?)).await
    }

    /// Flush and close. Later calls do nothing.
    pub async fn shutdown(&self) -> ProviderResult<()> {
        if !self.is_initialized() {
            return Ok(());
        }
        blocking(&self.container, |c| Ok(c.close()?)).await?;
        info!("event store shut down");
        Ok(())
    }

    async fn query(&self, operation: &'static str, bindings: Bindings) -> ProviderResult<Vec<WebEvent>> {
        blocking(&self.container, move |c| {
            Ok(c.execute(operation, &bindings)?
                .documents()
                .map(|d| d.deserialize::<WebEvent>())
                .collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}
