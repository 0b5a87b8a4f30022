//! Result sequences returned by prepared and ad-hoc queries.

use rusqlite::types::ValueRef;

use crate::document::Document;
use crate::error::StoreResult;
use crate::value::Value;

/// One row that is neither a single value nor a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A single result item.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Value(Value),
    Document(Document),
    Row(Row),
}

impl Item {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_document(self) -> Option<Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }
}

/// Single-pass sequence of query results.
///
/// Once consumed it cannot be restarted; run the operation again for a
/// fresh sequence. Writing statements also report how many documents they
/// changed through [`ResultSequence::affected`].
#[derive(Debug)]
pub struct ResultSequence {
    items: std::vec::IntoIter<Item>,
    affected: u64,
}

impl ResultSequence {
    pub(crate) fn new(items: Vec<Item>, affected: u64) -> Self {
        Self {
            items: items.into_iter(),
            affected,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0)
    }

    /// Rows changed by the statement (0 for reads).
    pub fn affected(&self) -> u64 {
        self.affected
    }

    /// Items not yet consumed.
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    /// The remaining documents, skipping any other items.
    pub fn documents(self) -> impl Iterator<Item = Document> {
        self.filter_map(Item::into_document)
    }

    /// The remaining single values, skipping any other items.
    pub fn values(self) -> impl Iterator<Item = Value> {
        self.filter_map(Item::into_value)
    }

    /// The first single value, if any.
    pub fn first_value(mut self) -> Option<Value> {
        self.find_map(Item::into_value)
    }

    /// The first document, if any.
    pub fn first_document(mut self) -> Option<Document> {
        self.find_map(Item::into_document)
    }
}

impl Iterator for ResultSequence {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        self.items.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.items.size_hint()
    }
}

impl ExactSizeIterator for ResultSequence {}

// ── row decoding ─────────────────────────────────────────────────────

/// How each row of a statement is turned into an [`Item`].
pub(crate) enum Shape {
    Value,
    Document {
        name: usize,
        content: usize,
        namespace: Option<usize>,
        metadata: Option<usize>,
        created_at: Option<usize>,
        updated_at: Option<usize>,
    },
    Row(Vec<String>),
}

impl Shape {
    /// Rows with `name` and `content` columns are documents, single-column
    /// rows are values and anything else is a plain row.
    pub(crate) fn of(columns: &[String]) -> Self {
        let find = |name: &str| columns.iter().position(|c| c.eq_ignore_ascii_case(name));
        match (find("name"), find("content")) {
            (Some(name), Some(content)) => Self::Document {
                name,
                content,
                namespace: find("namespace"),
                metadata: find("metadata"),
                created_at: find("created_at"),
                updated_at: find("updated_at"),
            },
            _ if columns.len() == 1 => Self::Value,
            _ => Self::Row(columns.to_vec()),
        }
    }

    pub(crate) fn decode(&self, row: &rusqlite::Row<'_>) -> StoreResult<Item> {
        match self {
            Self::Value => Ok(Item::Value(Value::from_sql(row.get_ref(0)?))),
            Self::Document {
                name,
                content,
                namespace,
                metadata,
                created_at,
                updated_at,
            } => {
                let text = |idx: Option<usize>| -> StoreResult<Option<String>> {
                    match idx {
                        Some(i) => Ok(row.get::<_, Option<String>>(i)?),
                        None => Ok(None),
                    }
                };
                let millis = |idx: Option<usize>| -> StoreResult<Option<i64>> {
                    match idx {
                        Some(i) => Ok(row.get::<_, Option<i64>>(i)?),
                        None => Ok(None),
                    }
                };
                let doc = Document::from_columns(
                    row.get::<_, String>(*name)?,
                    text(*namespace)?,
                    json_from_sql(row.get_ref(*content)?)?,
                    text(*metadata)?.as_deref(),
                    millis(*created_at)?,
                    millis(*updated_at)?,
                )?;
                Ok(Item::Document(doc))
            }
            Self::Row(columns) => {
                let values = (0..columns.len())
                    .map(|i| row.get_ref(i).map(Value::from_sql))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Item::Row(Row {
                    columns: columns.clone(),
                    values,
                }))
            }
        }
    }
}

/// Drain `rows` into decoded items.
pub(crate) fn collect(mut rows: rusqlite::Rows<'_>, shape: &Shape) -> StoreResult<Vec<Item>> {
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(shape.decode(row)?);
    }
    Ok(items)
}

fn json_from_sql(value: ValueRef<'_>) -> StoreResult<serde_json::Value> {
    Ok(match value {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::from(i),
        ValueRef::Real(f) => serde_json::Value::from(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => serde_json::from_slice(t)?,
    })
}
