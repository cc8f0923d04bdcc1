//! Record model: eTag-carrying documents and the batches they travel in

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::hash_map::{self, HashMap};

/// Field name under which a document's eTag is serialized
pub const ETAG_FIELD: &str = "eTag";

/// A record that carries a version token
pub trait StoreItem {
    /// The current eTag (empty for a record that was never written)
    fn e_tag(&self) -> &str;

    /// Replace the eTag
    fn set_e_tag(&mut self, e_tag: String);
}

/// Type-erased record stored by every backend.
///
/// Serializes as one flat JSON object: the payload fields plus the eTag
/// under [`ETAG_FIELD`]. The payload never contains [`ETAG_FIELD`] itself.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "eTag", default)]
    e_tag: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document with no eTag
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a document from payload fields. A reserved `eTag` field is dropped.
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        fields.remove(ETAG_FIELD);
        Self {
            e_tag: String::new(),
            fields,
        }
    }

    /// Serialize a value into a document's payload.
    ///
    /// The value must serialize to a JSON object.
    pub fn from_value<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Self> {
        match serde_json::to_value(value)? {
            Value::Object(fields) => Ok(Self::from_fields(fields)),
            other => Err(serde::ser::Error::custom(format!(
                "record payload must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Deserialize the payload into a typed value. Undeclared fields are ignored
    /// unless `T` denies them.
    pub fn to_value<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }

    /// Set the eTag
    pub fn with_e_tag(mut self, e_tag: impl Into<String>) -> Self {
        self.e_tag = e_tag.into();
        self
    }

    /// Add a payload field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Insert or replace a payload field, returning the previous value.
    /// Setting [`ETAG_FIELD`] is ignored; use [`StoreItem::set_e_tag`].
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = name.into();
        if name == ETAG_FIELD {
            return None;
        }
        self.fields.insert(name, value.into())
    }

    /// Get a payload field
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a mutable payload field
    pub fn field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Remove a payload field
    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Check whether a payload field is present
    pub fn contains_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// All payload fields
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume the document, returning its payload
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }
}

impl StoreItem for Document {
    fn e_tag(&self) -> &str {
        &self.e_tag
    }

    fn set_e_tag(&mut self, e_tag: String) {
        self.e_tag = e_tag;
    }
}

/// Typed view over a [`Document`]: a closed schema `T` plus an open side-map
/// of extra fields merged into the stored payload.
///
/// When a name appears both in `T` and in `extra`, the declared field wins.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record<T> {
    pub e_tag: String,
    pub value: T,
    pub extra: Map<String, Value>,
}

impl<T> Record<T> {
    /// Wrap a value with no eTag and no extra fields
    pub fn new(value: T) -> Self {
        Self {
            e_tag: String::new(),
            value,
            extra: Map::new(),
        }
    }

    /// Set the eTag
    pub fn with_e_tag(mut self, e_tag: impl Into<String>) -> Self {
        self.e_tag = e_tag.into();
        self
    }

    /// Attach an extra field
    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(name.into(), value.into());
        self
    }
}

impl<T: Serialize> Record<T> {
    /// Merge the typed value and extra fields into a document
    pub fn to_document(&self) -> serde_json::Result<Document> {
        let mut document = Document::from_value(&self.value)?;
        for (name, value) in &self.extra {
            if !document.contains_field(name) {
                document.set_field(name.clone(), value.clone());
            }
        }
        document.e_tag = self.e_tag.clone();
        Ok(document)
    }
}

impl<T: Serialize + DeserializeOwned> Record<T> {
    /// Split a document into the typed value and the fields `T` does not declare
    pub fn from_document(document: &Document) -> serde_json::Result<Self> {
        let value: T = document.to_value()?;
        let declared = Document::from_value(&value)?;
        let extra = document
            .fields
            .iter()
            .filter(|(name, _)| !declared.contains_field(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        Ok(Self {
            e_tag: document.e_tag.clone(),
            value,
            extra,
        })
    }
}

impl<T> StoreItem for Record<T> {
    fn e_tag(&self) -> &str {
        &self.e_tag
    }

    fn set_e_tag(&mut self, e_tag: String) {
        self.e_tag = e_tag;
    }
}

/// A batch of documents keyed by storage key
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreItems {
    items: HashMap<String, Document>,
}

impl StoreItems {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, returning the one it replaced
    pub fn insert(&mut self, key: impl Into<String>, document: Document) -> Option<Document> {
        self.items.insert(key.into(), document)
    }

    /// Insert a typed record
    pub fn insert_record<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        record: &Record<T>,
    ) -> serde_json::Result<()> {
        self.items.insert(key.into(), record.to_document()?);
        Ok(())
    }

    /// Get a document; `None` means the key is absent
    pub fn get(&self, key: &str) -> Option<&Document> {
        self.items.get(key)
    }

    /// Get a mutable document
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Document> {
        self.items.get_mut(key)
    }

    /// Get a document as a typed record
    pub fn get_record<T: Serialize + DeserializeOwned>(
        &self,
        key: &str,
    ) -> serde_json::Result<Option<Record<T>>> {
        self.items.get(key).map(Record::<T>::from_document).transpose()
    }

    /// Remove a document
    pub fn remove(&mut self, key: &str) -> Option<Document> {
        self.items.remove(key)
    }

    /// Check whether a key is present
    pub fn contains_key(&self, key: &str) -> bool {
        self.items.contains_key(key)
    }

    /// Number of documents
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the batch is empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over keys
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(String::as_str)
    }

    /// Iterate over entries
    pub fn iter(&self) -> hash_map::Iter<'_, String, Document> {
        self.items.iter()
    }

    /// Iterate mutably over entries
    pub fn iter_mut(&mut self) -> hash_map::IterMut<'_, String, Document> {
        self.items.iter_mut()
    }
}

impl<K: Into<String>> FromIterator<(K, Document)> for StoreItems {
    fn from_iter<I: IntoIterator<Item = (K, Document)>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(|(k, d)| (k.into(), d)).collect(),
        }
    }
}

impl<K: Into<String>> Extend<(K, Document)> for StoreItems {
    fn extend<I: IntoIterator<Item = (K, Document)>>(&mut self, iter: I) {
        self.items
            .extend(iter.into_iter().map(|(k, d)| (k.into(), d)));
    }
}

impl IntoIterator for StoreItems {
    type Item = (String, Document);
    type IntoIter = hash_map::IntoIter<String, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a StoreItems {
    type Item = (&'a String, &'a Document);
    type IntoIter = hash_map::Iter<'a, String, Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
