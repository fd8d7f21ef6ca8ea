#![doc = include_str!("../README.md")]
//!
#![deny(missing_docs)]

mod client;
mod cookies;
mod errors;
mod params;
mod realtime;
mod upload;

pub use client::{Client, ClientBuilder};
pub use cookies::PersistentCookieJar;
pub use errors::{BuildError, Error, RealtimeError, RequestError, Result, UploadError};
pub use params::{FilePart, ParamValue, Params};
pub use realtime::{EventCallback, Realtime, RealtimeEvent, RealtimeSubscription};
pub use upload::{CHUNK_SIZE, InputFile, OnProgress, UploadProgress};

// Request surface types callers need alongside `Client::call`.
pub use bytes::Bytes;
pub use reqwest::{Method, StatusCode};
