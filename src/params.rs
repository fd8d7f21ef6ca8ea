//! Request parameter values and their wire serializations.
//!
//! Every API call carries an ordered map of named parameters. A value is one
//! of three shapes — a scalar, a list, or a file part — made explicit as a
//! tagged variant instead of runtime type inspection. The same parameter set
//! serializes three ways depending on the negotiated content type:
//!
//! - query string (GET): scalars as `key=value`, lists as repeated
//!   `key[]=item` entries in list order;
//! - JSON object body (non-GET, `application/json`);
//! - multipart form (non-GET, `multipart/form-data`): the file part becomes a
//!   file field carrying its bytes and filename.
//!
//! Null scalars are dropped before serialization in all three shapes.

use bytes::Bytes;
use serde_json::Value;
use url::Url;

use crate::errors::{RequestError, Result};

/// Raw bytes destined for a multipart file field, plus the metadata the
/// `content-disposition` and `content-type` part headers need.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Filename reported to the server.
    pub filename: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// The file content.
    pub data: Bytes,
}

impl FilePart {
    /// Create a file part from raw bytes.
    pub fn new(
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// A single parameter value: scalar, list, or file part.
#[derive(Debug, Clone)]
pub enum ParamValue {
    /// A single JSON scalar (or arbitrary JSON value). `null` scalars are
    /// dropped before serialization.
    Scalar(Value),
    /// A list, serialized as repeated `key[]` entries (query/multipart) or a
    /// JSON array (body).
    List(Vec<Value>),
    /// A file part for multipart bodies.
    File(FilePart),
}

impl From<Value> for ParamValue {
    fn from(v: Value) -> Self {
        Self::Scalar(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<u64> for ParamValue {
    fn from(v: u64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        Self::Scalar(Value::from(v))
    }
}

impl From<Vec<Value>> for ParamValue {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(v: Vec<String>) -> Self {
        Self::List(v.into_iter().map(Value::from).collect())
    }
}

impl From<FilePart> for ParamValue {
    fn from(v: FilePart) -> Self {
        Self::File(v)
    }
}

/// An ordered set of named request parameters.
///
/// Order is preserved so repeated `key[]=` query entries appear in list and
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct Params(Vec<(String, ParamValue)>);

impl Params {
    /// Create an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.push((key.into(), value.into()));
    }

    /// Append a parameter, builder-style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.push(key, value);
        self
    }

    /// Returns true when no parameters survive null filtering.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter_filtered().next().is_none()
    }

    /// Look up the first value for `key`, ignoring dropped nulls.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.iter_filtered().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Iterate entries with null scalars filtered out.
    fn iter_filtered(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0
            .iter()
            .filter(|(_, v)| !matches!(v, ParamValue::Scalar(Value::Null)))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Serialize into the query string of `url` (GET requests).
    pub(crate) fn append_query_pairs(&self, url: &mut Url) {
        let mut query = url.query_pairs_mut();
        for (key, value) in self.iter_filtered() {
            match value {
                ParamValue::Scalar(v) => {
                    query.append_pair(key, &render_scalar(v));
                }
                ParamValue::List(items) => {
                    let bracketed = format!("{key}[]");
                    for item in items {
                        query.append_pair(&bracketed, &render_scalar(item));
                    }
                }
                // A file part cannot travel in a query string; GET endpoints
                // never carry one, so treat it as absent.
                ParamValue::File(_) => {}
            }
        }
    }

    /// Serialize into a JSON object body (non-GET, `application/json`).
    pub(crate) fn to_json_object(&self) -> Result<serde_json::Map<String, Value>> {
        let mut object = serde_json::Map::new();
        for (key, value) in self.iter_filtered() {
            match value {
                ParamValue::Scalar(v) => {
                    object.insert(key.to_owned(), v.clone());
                }
                ParamValue::List(items) => {
                    object.insert(key.to_owned(), Value::Array(items.clone()));
                }
                ParamValue::File(_) => {
                    return Err(RequestError::Validation {
                        message: format!(
                            "parameter `{key}` is a file part; file parts require a multipart/form-data content type"
                        ),
                    }
                    .into());
                }
            }
        }
        Ok(object)
    }

    /// Serialize into a multipart form (non-GET, `multipart/form-data`).
    pub(crate) fn into_multipart(self) -> Result<reqwest::multipart::Form> {
        let mut form = reqwest::multipart::Form::new();
        for (key, value) in self.0 {
            match value {
                ParamValue::Scalar(Value::Null) => {}
                ParamValue::Scalar(v) => {
                    form = form.text(key, render_scalar(&v));
                }
                ParamValue::List(items) => {
                    let bracketed = format!("{key}[]");
                    for item in items {
                        form = form.text(bracketed.clone(), render_scalar(&item));
                    }
                }
                ParamValue::File(part) => {
                    let file_part = reqwest::multipart::Part::bytes(part.data.to_vec())
                        .file_name(part.filename)
                        .mime_str(&part.mime_type)
                        .map_err(RequestError::Transport)?;
                    form = form.part(key, file_part);
                }
            }
        }
        Ok(form)
    }
}

/// Render a JSON scalar the way it appears in a query string or form field:
/// strings bare, everything else in JSON notation.
fn render_scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
