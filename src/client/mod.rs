//! The transport client: endpoint/session configuration and the HTTP engine
//! the rest of the crate (and the per-endpoint service wrappers outside it)
//! are built on.

mod call;

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cookies::PersistentCookieJar;
use crate::errors::BuildError;

const DEFAULT_ENDPOINT: &str = "https://cloud.appwrite.io/v1";
const DEFAULT_USER_AGENT: &str = concat!("appwrite-client", "@", env!("CARGO_PKG_VERSION"));
const RESPONSE_FORMAT: &str = "1.4.0";

/// Configures a [`Client`] before construction.
///
/// Customize the endpoint, project, credentials, TLS behavior, request
/// timeout, and cookie persistence. Most code obtains this via
/// [`Client::builder()`], which simply returns `ClientBuilder::default()`.
///
/// # Defaults
/// - Endpoint: `https://cloud.appwrite.io/v1`
/// - Realtime endpoint: derived from the endpoint by `http` → `ws` scheme
///   substitution unless set explicitly
/// - Cookie jar: in-memory, unless [`Self::cookie_store_path`] is set
/// - User-agent: `appwrite-client@<crate-version>` plus any
///   [`Self::user_agent_extra`]
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// # use appwrite_client::Client;
/// let client = Client::builder()
///     .endpoint("https://appwrite.example.com/v1")
///     .project("my-project")
///     .request_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok::<_, appwrite_client::BuildError>(())
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct ClientBuilder {
    endpoint: Option<String>,
    endpoint_realtime: Option<String>,
    project: Option<String>,
    jwt: Option<String>,
    locale: Option<String>,
    self_signed: bool,
    cookie_store_path: Option<PathBuf>,
    request_timeout: Option<Duration>,
    user_agent_extra: Option<String>,
}

impl ClientBuilder {
    /// Set the HTTP API endpoint, e.g. `https://appwrite.example.com/v1`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the realtime (WebSocket) endpoint explicitly, overriding the
    /// scheme-substituted default.
    pub fn endpoint_realtime(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_realtime = Some(endpoint.into());
        self
    }

    /// Set the project id sent as `x-appwrite-project` on every request.
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Set the JWT sent as `x-appwrite-jwt` on every request.
    pub fn jwt(mut self, jwt: impl Into<String>) -> Self {
        self.jwt = Some(jwt.into());
        self
    }

    /// Set the locale sent as `x-appwrite-locale` on every request.
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Accept self-signed TLS certificates (development servers only).
    pub fn self_signed(mut self, allow: bool) -> Self {
        self.self_signed = allow;
        self
    }

    /// Persist session cookies to a JSON file at `path`, reloading them on
    /// the next construction.
    pub fn cookie_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cookie_store_path = Some(path.into());
        self
    }

    /// Set an HTTP request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Append an extra user-agent segment after the default
    /// `appwrite-client@<version>`.
    pub fn user_agent_extra(mut self, extra: impl Into<String>) -> Self {
        self.user_agent_extra = Some(extra.into());
        self
    }

    /// Build a [`Client`].
    pub fn build(self) -> Result<Client, BuildError> {
        let endpoint = self
            .endpoint
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(BuildError::Endpoint(format!(
                "endpoint must be an http(s) URL, got `{endpoint}`"
            )));
        }
        let realtime_explicit = self.endpoint_realtime.is_some();
        let endpoint_realtime = self
            .endpoint_realtime
            .or_else(|| Some(endpoint.replacen("http", "ws", 1)));

        let cookies = Arc::new(match self.cookie_store_path {
            Some(path) => PersistentCookieJar::with_file(path),
            None => PersistentCookieJar::new(),
        });

        let mut http_builder = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&cookies))
            .danger_accept_invalid_certs(self.self_signed);
        if let Some(timeout) = self.request_timeout {
            http_builder = http_builder.timeout(timeout);
        }

        let user_agent = match &self.user_agent_extra {
            Some(extra) if !extra.trim().is_empty() => {
                format!("{DEFAULT_USER_AGENT} {}", extra.trim())
            }
            _ => DEFAULT_USER_AGENT.to_string(),
        };

        let mut headers = HashMap::from([
            ("content-type".to_string(), "application/json".to_string()),
            ("user-agent".to_string(), user_agent),
            ("x-sdk-name".to_string(), "Rust".to_string()),
            ("x-sdk-platform".to_string(), "client".to_string()),
            ("x-sdk-language".to_string(), "rust".to_string()),
            (
                "x-sdk-version".to_string(),
                env!("CARGO_PKG_VERSION").to_string(),
            ),
            (
                "x-appwrite-response-format".to_string(),
                RESPONSE_FORMAT.to_string(),
            ),
        ]);
        let mut config = HashMap::new();
        if let Some(project) = self.project {
            headers.insert("x-appwrite-project".to_string(), project.clone());
            config.insert("project".to_string(), project);
        }
        if let Some(jwt) = self.jwt {
            headers.insert("x-appwrite-jwt".to_string(), jwt.clone());
            config.insert("jWT".to_string(), jwt);
        }
        if let Some(locale) = self.locale {
            headers.insert("x-appwrite-locale".to_string(), locale.clone());
            config.insert("locale".to_string(), locale);
        }

        Ok(Client {
            http: http_builder.build()?,
            cookies,
            state: Arc::new(RwLock::new(SessionState {
                endpoint,
                endpoint_realtime,
                realtime_explicit,
                config,
                headers,
            })),
        })
    }
}

/// Mutable per-session configuration shared by every clone of a [`Client`].
#[derive(Debug)]
struct SessionState {
    endpoint: String,
    endpoint_realtime: Option<String>,
    /// True when the realtime endpoint was set by the caller rather than
    /// derived from the HTTP endpoint; derived values track endpoint changes.
    realtime_explicit: bool,
    config: HashMap<String, String>,
    headers: HashMap<String, String>,
}

/// Transport client for Appwrite-compatible backends.
///
/// `Client` owns the HTTP engine (connection pool, TLS state, cookie jar)
/// and the mutable session configuration (endpoints, config keys, default
/// headers). It exposes one logical operation, [`Client::call`], plus the
/// [`Client::chunked_upload`] engine built on top of it; the realtime
/// multiplexer ([`crate::Realtime`]) shares the same configuration.
///
/// Clones are cheap and share session state: `set_jwt` on one clone is
/// visible to all of them, which is what a signed-in session needs.
///
/// # Example
/// ```no_run
/// # use appwrite_client::{Client, Method, Params};
/// # async fn run() -> appwrite_client::Result<()> {
/// let client = Client::builder().project("my-project").build()?;
/// let account: serde_json::Value = client
///     .call(Method::GET, "/account", &Default::default(), Params::new())
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    pub(crate) http: reqwest::Client,
    pub(crate) cookies: Arc<PersistentCookieJar>,
    state: Arc<RwLock<SessionState>>,
}

impl Client {
    /// Create a client with default configuration.
    pub fn new() -> Result<Client, BuildError> {
        Self::builder().build()
    }

    /// Returns a builder to edit settings before creating a [`Client`].
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Set the HTTP endpoint. Derives the realtime endpoint by `http` → `ws`
    /// scheme substitution when none was set explicitly.
    pub fn set_endpoint(&self, endpoint: impl Into<String>) -> &Self {
        let endpoint = endpoint.into();
        let mut state = self.write_state();
        if !state.realtime_explicit && endpoint.starts_with("http") {
            state.endpoint_realtime = Some(endpoint.replacen("http", "ws", 1));
        }
        state.endpoint = endpoint;
        drop(state);
        self
    }

    /// Set the realtime (WebSocket) endpoint explicitly.
    pub fn set_endpoint_realtime(&self, endpoint: impl Into<String>) -> &Self {
        let mut state = self.write_state();
        state.endpoint_realtime = Some(endpoint.into());
        state.realtime_explicit = true;
        drop(state);
        self
    }

    /// Set the project id (`x-appwrite-project`).
    pub fn set_project(&self, value: impl Into<String>) -> &Self {
        self.set_config("project", "x-appwrite-project", value.into());
        self
    }

    /// Set a JWT (`x-appwrite-jwt`).
    pub fn set_jwt(&self, value: impl Into<String>) -> &Self {
        self.set_config("jWT", "x-appwrite-jwt", value.into());
        self
    }

    /// Set the locale (`x-appwrite-locale`).
    pub fn set_locale(&self, value: impl Into<String>) -> &Self {
        self.set_config("locale", "x-appwrite-locale", value.into());
        self
    }

    /// Add or replace a default header sent on every request.
    pub fn add_header(&self, key: impl Into<String>, value: impl Into<String>) -> &Self {
        self.write_state()
            .headers
            .insert(key.into().to_lowercase(), value.into());
        self
    }

    /// Look up a session config value (`project`, `jWT`, `locale`, ...).
    #[must_use]
    pub fn config(&self, key: &str) -> Option<String> {
        self.read_state().config.get(key).cloned()
    }

    /// The current HTTP endpoint.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.read_state().endpoint.clone()
    }

    /// The current realtime endpoint, if one is configured or derivable.
    #[must_use]
    pub fn endpoint_realtime(&self) -> Option<String> {
        self.read_state().endpoint_realtime.clone()
    }

    fn set_config(&self, config_key: &str, header: &str, value: String) {
        let mut state = self.write_state();
        state.config.insert(config_key.to_string(), value.clone());
        state.headers.insert(header.to_string(), value);
    }

    pub(crate) fn default_headers(&self) -> HashMap<String, String> {
        self.read_state().headers.clone()
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().expect("client state lock poisoned")
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().expect("client state lock poisoned")
    }
}
