//! The `call` primitive: one logical API call in, one decoded result or one
//! typed error out.
//!
//! Content negotiation follows the per-call `content-type` header:
//! `multipart/form-data` builds a multipart body, anything else serializes
//! the parameters as a JSON object body for non-GET methods. GET requests
//! always serialize parameters into the query string. Response cookies are
//! persisted into the shared jar by the cookie provider as a side effect.

use std::collections::HashMap;

use bytes::Bytes;
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use url::Url;

use super::Client;
use crate::errors::{RequestError, Result};
use crate::params::Params;

const CONTENT_TYPE_JSON: &str = "application/json";
const CONTENT_TYPE_MULTIPART: &str = "multipart/form-data";

impl Client {
    /// Execute one API call and decode the JSON response into `T`.
    ///
    /// - `params` values equal to JSON `null` are dropped before the request
    ///   is built; list values expand to repeated `key[]` entries in query
    ///   strings and multipart forms.
    /// - Default headers (project id, auth tokens, SDK identification) are
    ///   merged under the per-call `headers` map; a per-call `content-type`
    ///   replaces the default.
    /// - An empty success body decodes as JSON `null`, so `T` should be
    ///   `serde_json::Value` or an `Option` for endpoints that return
    ///   nothing.
    ///
    /// # Errors
    /// - [`RequestError::Server`] for non-2xx statuses, carrying the status
    ///   and raw body;
    /// - [`RequestError::Decode`] when a 2xx body does not parse as `T`,
    ///   preserving the original status and body;
    /// - [`RequestError::Transport`] for network-level failures.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        headers: &HashMap<String, String>,
        params: Params,
    ) -> Result<T> {
        let response = self.send(method, path, headers, params).await?;
        let status = response.status();
        let body = response.bytes().await.map_err(RequestError::Transport)?;
        decode_body(status, &body)
    }

    /// Execute one API call and return the raw response bytes unchanged.
    ///
    /// This is the "binary" response shape: file downloads, previews, and
    /// similar endpoints whose bodies are not JSON.
    pub async fn call_bytes(
        &self,
        method: Method,
        path: &str,
        headers: &HashMap<String, String>,
        params: Params,
    ) -> Result<Bytes> {
        let response = self.send(method, path, headers, params).await?;
        Ok(response.bytes().await.map_err(RequestError::Transport)?)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        headers: &HashMap<String, String>,
        params: Params,
    ) -> Result<Response> {
        let mut url = Url::parse(&format!("{}{}", self.endpoint(), path))?;

        // Per-call headers override defaults key-by-key; keys are
        // case-insensitive and stored lowercased.
        let mut merged = self.default_headers();
        for (key, value) in headers {
            merged.insert(key.to_lowercase(), value.clone());
        }
        let content_type = merged
            .get("content-type")
            .cloned()
            .unwrap_or_else(|| CONTENT_TYPE_JSON.to_string());

        let is_get = method == Method::GET;
        let is_multipart = content_type.starts_with(CONTENT_TYPE_MULTIPART);

        if is_get {
            params.append_query_pairs(&mut url);
        }

        tracing::debug!(%method, %url, "issuing API call");
        let mut request = self.http.request(method, url);

        if is_get {
            merged.remove("content-type");
        } else if is_multipart {
            // reqwest supplies the multipart content-type with its boundary.
            merged.remove("content-type");
            request = request.multipart(params.into_multipart()?);
        } else {
            let object = params.to_json_object()?;
            request = request.body(serde_json::to_vec(&object).map_err(|e| {
                RequestError::Validation {
                    message: format!("failed to serialize request body: {e}"),
                }
            })?);
        }

        for (key, value) in &merged {
            request = request.header(key, value);
        }

        let response = request.send().await.map_err(RequestError::Transport)?;
        check_status(response).await
    }
}

/// Convert non-2xx responses into a structured error that includes the
/// server body.
///
/// If the status is successful (2xx), the original response is returned.
/// Otherwise the body is consumed; when it parses as a machine-readable
/// error object its `message` and `type` fields are extracted, and the raw
/// body text is kept either way.
async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status();
    let raw = response.text().await.unwrap_or_else(|_| {
        status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string()
    });

    let (error_type, message) = match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(body) => (
            body.get("type")
                .and_then(|v| v.as_str())
                .map(str::to_owned),
            body.get("message")
                .and_then(|v| v.as_str())
                .map(str::to_owned)
                .unwrap_or_else(|| raw.clone()),
        ),
        Err(_) => (None, raw.clone()),
    };

    Err(RequestError::Server {
        status,
        error_type,
        message,
        response: raw,
    }
    .into())
}

/// Decode a success-status body into `T`, treating an empty body as JSON
/// `null`. Decode failures keep the original status and raw body.
fn decode_body<T: DeserializeOwned>(status: reqwest::StatusCode, body: &[u8]) -> Result<T> {
    let effective: &[u8] = if body.is_empty() { b"null" } else { body };
    serde_json::from_slice(effective).map_err(|e| {
        RequestError::Decode {
            status,
            message: e.to_string(),
            response: String::from_utf8_lossy(body).into_owned(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn empty_body_decodes_to_json_null() {
        let value: serde_json::Value = decode_body(reqwest::StatusCode::NO_CONTENT, b"").unwrap();
        assert!(value.is_null());
    }

    #[test]
    fn decode_failure_preserves_status_and_body() {
        #[derive(Debug, Deserialize)]
        struct Session {
            #[expect(dead_code, reason = "shape only")]
            user_id: String,
        }

        let err = decode_body::<Session>(reqwest::StatusCode::OK, b"<html>oops</html>")
            .unwrap_err();

        match err {
            crate::Error::Request(RequestError::Decode {
                status, response, ..
            }) => {
                assert_eq!(status, reqwest::StatusCode::OK);
                assert_eq!(response, "<html>oops</html>");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
