//! Resumable chunked file uploads.
//!
//! Files at or under [`CHUNK_SIZE`] go up as a single multipart POST. Larger
//! files are split into fixed-size chunks sent strictly sequentially, each
//! with a `Content-Range` header describing its byte range; the server
//! assigns a file id on the first chunk and every later chunk targets it via
//! the `x-appwrite-id` header. An interrupted upload resumes from
//! `chunksUploaded * CHUNK_SIZE` when the caller supplies a concrete file id
//! rather than the `unique()` sentinel.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;

use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::client::Client;
use crate::errors::{RequestError, Result, UploadError};
use crate::params::{FilePart, ParamValue, Params};

/// Fixed chunk size for resumable uploads: 5 MiB.
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// Sentinel id meaning "let the server generate a unique id"; uploads
/// addressed by it cannot be resumed.
const UNIQUE_ID: &str = "unique()";

/// Progress callback invoked after every uploaded chunk.
pub type OnProgress = Box<dyn FnMut(UploadProgress) + Send>;

/// A snapshot of chunked upload progress, emitted after each chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    /// Server-assigned file id.
    pub id: String,
    /// Percentage complete, 0–100.
    pub progress: f64,
    /// Bytes uploaded so far, capped at the total size.
    pub size_uploaded: u64,
    /// Total chunk count as reported by the server.
    pub chunks_total: u64,
    /// Chunks uploaded so far as reported by the server.
    pub chunks_uploaded: u64,
}

/// What to read the upload content from.
#[derive(Debug)]
enum Source {
    Path(PathBuf),
    Bytes(Bytes),
    File(tokio::fs::File),
}

/// An upload input: a local path, an in-memory buffer, or an already-open
/// file, plus the filename and MIME type reported to the server.
#[derive(Debug)]
pub struct InputFile {
    filename: String,
    mime_type: String,
    source: Source,
}

impl InputFile {
    /// Upload the file at `path`. The filename defaults to the path's final
    /// component.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            mime_type: "application/octet-stream".to_string(),
            source: Source::Path(path),
        }
    }

    /// Upload an in-memory buffer.
    pub fn from_bytes(
        data: impl Into<Bytes>,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            source: Source::Bytes(data.into()),
        }
    }

    /// Upload from an already-open file handle.
    pub fn from_file(
        file: tokio::fs::File,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            filename: filename.into(),
            mime_type: mime_type.into(),
            source: Source::File(file),
        }
    }

    /// Override the MIME type reported to the server.
    #[must_use]
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    async fn open(self) -> std::io::Result<(String, String, ChunkSource)> {
        let source = match self.source {
            Source::Path(path) => ChunkSource::File(tokio::fs::File::open(path).await?),
            Source::Bytes(data) => ChunkSource::Bytes(data),
            Source::File(file) => ChunkSource::File(file),
        };
        Ok((self.filename, self.mime_type, source))
    }
}

/// A positioned reader over the upload content.
enum ChunkSource {
    File(tokio::fs::File),
    Bytes(Bytes),
}

impl ChunkSource {
    async fn size(&self) -> std::io::Result<u64> {
        match self {
            Self::File(file) => Ok(file.metadata().await?.len()),
            Self::Bytes(data) => Ok(data.len() as u64),
        }
    }

    async fn read_chunk(&mut self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        match self {
            Self::File(file) => {
                file.seek(SeekFrom::Start(offset)).await?;
                let mut buffer = vec![0u8; len];
                file.read_exact(&mut buffer).await?;
                Ok(buffer.into())
            }
            Self::Bytes(data) => {
                let start = offset as usize;
                Ok(data.slice(start..start + len))
            }
        }
    }
}

impl Client {
    /// Upload a file, chunking and resuming as needed.
    ///
    /// `file_param` names the multipart field the content travels in.
    /// `id_param`, when given, names the parameter holding the caller-chosen
    /// file id; if its value is not the `unique()` sentinel, the server is
    /// asked how many chunks it already has and the upload resumes from
    /// there. `on_progress` is invoked after every chunk.
    ///
    /// The final chunk's response is decoded into `T`. Any transport error
    /// aborts the loop and propagates unchanged; the partial upload remains
    /// resumable server-side because it is addressed by file id.
    pub async fn chunked_upload<T: DeserializeOwned>(
        &self,
        path: &str,
        headers: &HashMap<String, String>,
        params: Params,
        file_param: &str,
        input: InputFile,
        id_param: Option<&str>,
        mut on_progress: Option<OnProgress>,
    ) -> Result<T> {
        let (filename, mime_type, mut source) = input.open().await.map_err(UploadError::Io)?;
        let size = source.size().await.map_err(UploadError::Io)?;

        let mut headers = headers.clone();
        headers
            .entry("content-type".to_string())
            .or_insert_with(|| "multipart/form-data".to_string());

        if size <= CHUNK_SIZE {
            let data = source
                .read_chunk(0, size as usize)
                .await
                .map_err(UploadError::Io)?;
            let params =
                params.with(file_param, FilePart::new(filename, mime_type, data));
            return self.call(Method::POST, path, &headers, params).await;
        }

        let mut offset = 0u64;

        // Resume: ask the server how many chunks it already holds for this id.
        if let Some(id_param) = id_param {
            if let Some(file_id) = concrete_file_id(&params, id_param) {
                let current: Value = self
                    .call(
                        Method::GET,
                        &format!("{path}/{file_id}"),
                        &headers,
                        Params::new(),
                    )
                    .await?;
                let chunks_uploaded = current
                    .get("chunksUploaded")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| UploadError::Resume {
                        message: format!(
                            "`{path}/{file_id}` did not report chunksUploaded"
                        ),
                    })?;
                offset = chunks_uploaded * CHUNK_SIZE;
                if offset >= size {
                    // The server already holds every chunk; the lookup is
                    // the final file object.
                    tracing::debug!(file_id, "upload already complete server-side");
                    return decode_response(current);
                }
                tracing::debug!(file_id, offset, "resuming chunked upload");
            }
        }

        let mut last_response: Option<Value> = None;

        while offset < size {
            let chunk_len = CHUNK_SIZE.min(size - offset) as usize;
            let chunk = source
                .read_chunk(offset, chunk_len)
                .await
                .map_err(UploadError::Io)?;

            let chunk_params = params.clone().with(
                file_param,
                FilePart::new(filename.clone(), mime_type.clone(), chunk),
            );
            headers.insert(
                "content-range".to_string(),
                format!(
                    "bytes {}-{}/{}",
                    offset,
                    (offset + CHUNK_SIZE - 1).min(size - 1),
                    size
                ),
            );

            let response: Value = self
                .call(Method::POST, path, &headers, chunk_params)
                .await?;
            offset += CHUNK_SIZE;

            let id = response
                .get("$id")
                .and_then(Value::as_str)
                .ok_or(UploadError::MissingFileId)?
                .to_string();
            // Subsequent chunks must target the same in-progress upload.
            headers.insert("x-appwrite-id".to_string(), id.clone());

            if let Some(callback) = on_progress.as_mut() {
                callback(UploadProgress {
                    id,
                    progress: offset.min(size) as f64 / size as f64 * 100.0,
                    size_uploaded: offset.min(size),
                    chunks_total: response
                        .get("chunksTotal")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                    chunks_uploaded: response
                        .get("chunksUploaded")
                        .and_then(Value::as_u64)
                        .unwrap_or(0),
                });
            }

            last_response = Some(response);
        }

        let last = last_response.ok_or(UploadError::MissingFileId)?;
        decode_response(last)
    }
}

/// Decode a chunk or lookup response into the caller's model type.
fn decode_response<T: DeserializeOwned>(value: Value) -> Result<T> {
    let raw = value.to_string();
    serde_json::from_value(value).map_err(|e| {
        RequestError::Decode {
            status: reqwest::StatusCode::OK,
            message: e.to_string(),
            response: raw,
        }
        .into()
    })
}

/// The file id from `params`, unless it is absent or the generate-a-new-id
/// sentinel.
fn concrete_file_id(params: &Params, id_param: &str) -> Option<String> {
    match params.get(id_param)? {
        ParamValue::Scalar(Value::String(id)) if id != UNIQUE_ID => Some(id.clone()),
        _ => None,
    }
}
