//! Realtime subscription multiplexer.
//!
//! Any number of logical subscriptions share at most one WebSocket
//! connection. The connection's query string lists every channel any live
//! subscription cares about, so the channel set — and with it the connection
//! — is rebuilt whenever a subscription is added or removed. Bursts of
//! subscribe calls are debounced into a single (re)connect.
//!
//! One background task owns the socket's receive loop. Incoming event frames
//! are filtered against the active channel set and dispatched to every
//! subscription whose channels intersect the event's. Server error frames
//! are non-fatal: they are logged, handed to the optional error handler, and
//! the loop keeps receiving. A closed connection is re-established with
//! bucketed backoff (1s, then 5s, 10s, 60s as failures accumulate) until the
//! last subscription is closed.

mod message;

pub use message::RealtimeEvent;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::client::Client;
use crate::errors::RealtimeError;
use message::{RealtimeMessage, TYPE_ERROR, TYPE_EVENT, decode_server_error};

/// Coalesces bursts of subscribe/unsubscribe calls into one reconnect.
const DEBOUNCE: Duration = Duration::from_millis(3);

/// Callback invoked for every event matching a subscription's channels.
pub type EventCallback = Arc<dyn Fn(RealtimeEvent) + Send + Sync>;

type ErrorCallback = Arc<dyn Fn(RealtimeError) + Send + Sync>;

/// Reconnect delay for the given consecutive-failure count.
const fn retry_delay(attempts: u32) -> Duration {
    match attempts {
        0..=4 => Duration::from_secs(1),
        5..=14 => Duration::from_secs(5),
        15..=99 => Duration::from_secs(10),
        _ => Duration::from_secs(60),
    }
}

struct Subscriber {
    channels: HashSet<String>,
    callback: EventCallback,
}

struct Inner {
    subscriptions: HashMap<u64, Subscriber>,
    active_channels: BTreeSet<String>,
    next_id: u64,
    attempts: u32,
    /// Bumped on every (re)connect request; a debounced connect only fires
    /// if its generation is still current, so bursts coalesce.
    generation: u64,
    conn: Option<JoinHandle<()>>,
    on_error: Option<ErrorCallback>,
}

impl Inner {
    fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            active_channels: BTreeSet::new(),
            next_id: 0,
            attempts: 0,
            generation: 0,
            conn: None,
            on_error: None,
        }
    }

    /// Register a subscription. Returns its id and whether the connection
    /// must be (re)established.
    fn register(&mut self, channels: &[&str], callback: EventCallback) -> (u64, bool) {
        let first = self.subscriptions.is_empty();
        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.insert(
            id,
            Subscriber {
                channels: channels.iter().map(|c| (*c).to_string()).collect(),
                callback,
            },
        );
        let changed = self.recompute_channels();
        (id, first || changed)
    }

    /// Recompute the active channel set as the union over all live
    /// subscriptions. Returns whether it changed.
    fn recompute_channels(&mut self) -> bool {
        let union: BTreeSet<String> = self
            .subscriptions
            .values()
            .flat_map(|s| s.channels.iter().cloned())
            .collect();
        if union == self.active_channels {
            return false;
        }
        self.active_channels = union;
        true
    }
}

/// Multiplexes logical subscriptions over a single WebSocket connection.
///
/// Cheap to clone; clones share the subscription registry and connection.
///
/// # Example
/// ```no_run
/// # use appwrite_client::{Client, Realtime};
/// # fn run(client: Client) {
/// let realtime = Realtime::new(client);
/// let subscription = realtime.subscribe(&["documents"], |event| {
///     println!("{:?} on {:?}", event.events, event.channels);
/// });
/// // ...
/// subscription.close();
/// # }
/// ```
#[derive(Clone)]
pub struct Realtime {
    client: Client,
    inner: Arc<Mutex<Inner>>,
}

impl fmt::Debug for Realtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Realtime")
            .field("subscriptions", &inner.subscriptions.len())
            .field("active_channels", &inner.active_channels)
            .finish_non_exhaustive()
    }
}

impl Realtime {
    /// Create a multiplexer sharing the client's endpoints and project.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    /// Subscribe to one or more channels.
    ///
    /// The callback runs on the receive-loop task for every event whose
    /// channels intersect `channels`, in frame arrival order. The connection
    /// is (re)established — debounced by a few milliseconds so bursts
    /// coalesce — when this is the first subscription or the active channel
    /// set grew.
    ///
    /// The returned handle keeps the subscription alive until
    /// [`RealtimeSubscription::close`] is called; dropping it without
    /// closing leaks the subscription for the lifetime of the multiplexer.
    pub fn subscribe<F>(&self, channels: &[&str], callback: F) -> RealtimeSubscription
    where
        F: Fn(RealtimeEvent) + Send + Sync + 'static,
    {
        let (id, needs_connect) = self.lock().register(channels, Arc::new(callback));
        if needs_connect {
            self.schedule_connect();
        }
        RealtimeSubscription {
            realtime: self.clone(),
            id,
        }
    }

    /// Register a handler for non-fatal realtime failures: server error
    /// frames and failed connection attempts. Without one they are only
    /// logged.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(RealtimeError) + Send + Sync + 'static,
    {
        self.lock().on_error = Some(Arc::new(handler));
    }

    /// The channels currently referenced by at least one live subscription.
    #[must_use]
    pub fn active_channels(&self) -> Vec<String> {
        self.lock().active_channels.iter().cloned().collect()
    }

    fn unsubscribe(&self, id: u64) {
        let reconnect = {
            let mut inner = self.lock();
            if inner.subscriptions.remove(&id).is_none() {
                return;
            }
            let changed = inner.recompute_channels();
            if inner.active_channels.is_empty() {
                // Last subscriber gone: tear down and cancel anything pending.
                inner.generation += 1;
                if let Some(conn) = inner.conn.take() {
                    conn.abort();
                }
                tracing::debug!("last realtime subscription closed; disconnected");
                false
            } else {
                changed
            }
        };
        if reconnect {
            self.schedule_connect();
        }
    }

    fn schedule_connect(&self) {
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.generation
        };
        let realtime = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            realtime.connect_if_current(generation);
        });
    }

    /// Replace the connection task, unless a newer (re)connect request or a
    /// full teardown superseded this one while it was debouncing.
    fn connect_if_current(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation != generation || inner.active_channels.is_empty() {
            return;
        }
        if let Some(conn) = inner.conn.take() {
            conn.abort();
        }
        inner.attempts = 0;
        let realtime = self.clone();
        inner.conn = Some(tokio::spawn(async move {
            realtime.run_connection().await;
        }));
    }

    /// The connection loop: connect, drain frames, back off, repeat.
    ///
    /// Runs until aborted (channel set changed or last subscription closed)
    /// or until the channel set empties between attempts.
    async fn run_connection(self) {
        loop {
            let channels = { self.lock().active_channels.clone() };
            if channels.is_empty() {
                return;
            }
            let url = match self.connection_url(&channels) {
                Ok(url) => url,
                Err(e) => {
                    tracing::error!("{e}");
                    self.report(e);
                    return;
                }
            };

            match connect_async(url.as_str()).await {
                Ok((socket, _response)) => {
                    tracing::debug!(channels = channels.len(), "realtime connected");
                    self.lock().attempts = 0;
                    let (_write, mut read) = socket.split();
                    while let Some(frame) = read.next().await {
                        match frame {
                            Ok(Message::Text(text)) => self.handle_frame(text.as_str()),
                            Ok(Message::Close(_)) => break,
                            // Ping/pong are answered by tungstenite itself.
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!("realtime receive failed: {e}");
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("realtime connect failed: {e}");
                    self.report(RealtimeError::Connect(e));
                }
            }

            let delay = {
                let mut inner = self.lock();
                let delay = retry_delay(inner.attempts);
                inner.attempts += 1;
                delay
            };
            tracing::info!(
                "realtime disconnected; reconnecting in {} seconds",
                delay.as_secs()
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn connection_url(
        &self,
        channels: &BTreeSet<String>,
    ) -> std::result::Result<Url, RealtimeError> {
        let endpoint = self.client.endpoint_realtime().ok_or_else(|| {
            RealtimeError::Url {
                message: "no realtime endpoint is configured".into(),
            }
        })?;
        let project = self.client.config("project").ok_or_else(|| {
            RealtimeError::Url {
                message: "a project id is required for realtime".into(),
            }
        })?;

        let mut url = Url::parse(&format!("{endpoint}/realtime")).map_err(|e| {
            RealtimeError::Url {
                message: e.to_string(),
            }
        })?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("project", &project);
            for channel in channels {
                query.append_pair("channels[]", channel);
            }
        }
        Ok(url)
    }

    fn handle_frame(&self, text: &str) {
        let message: RealtimeMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("ignoring malformed realtime frame: {e}");
                return;
            }
        };
        match message.message_type.as_str() {
            TYPE_ERROR => {
                let error = decode_server_error(&message.data);
                tracing::error!("realtime server error: {error}");
                self.report(error);
            }
            TYPE_EVENT => match serde_json::from_value::<RealtimeEvent>(message.data) {
                Ok(event) => self.dispatch(&event),
                Err(e) => tracing::warn!("ignoring malformed event frame: {e}"),
            },
            other => tracing::debug!("ignoring frame of unknown type `{other}`"),
        }
    }

    /// Deliver an event to every subscription whose channels intersect the
    /// event's. Events for channels nobody references are dropped.
    fn dispatch(&self, event: &RealtimeEvent) {
        if event.channels.is_empty() {
            return;
        }
        let callbacks: Vec<EventCallback> = {
            let inner = self.lock();
            if !event
                .channels
                .iter()
                .any(|c| inner.active_channels.contains(c))
            {
                return;
            }
            inner
                .subscriptions
                .values()
                .filter(|s| event.channels.iter().any(|c| s.channels.contains(c)))
                .map(|s| Arc::clone(&s.callback))
                .collect()
        };
        // Callbacks run outside the registry lock so they may freely
        // subscribe or close.
        for callback in callbacks {
            callback(event.clone());
        }
    }

    fn report(&self, error: RealtimeError) {
        let handler = self.lock().on_error.clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("realtime registry lock poisoned")
    }
}

/// Handle for one logical subscription. Call [`Self::close`] to release it.
pub struct RealtimeSubscription {
    realtime: Realtime,
    id: u64,
}

impl fmt::Debug for RealtimeSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeSubscription")
            .field("id", &self.id)
            .finish()
    }
}

impl RealtimeSubscription {
    /// Release this subscription: remove it from the registry, drop channels
    /// no other subscription references, and reconnect (or disconnect
    /// entirely when it was the last one).
    pub fn close(self) {
        self.realtime.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> EventCallback {
        Arc::new(|_| {})
    }

    #[test]
    fn retry_delay_buckets_match_attempt_boundaries() {
        assert_eq!(retry_delay(0), Duration::from_secs(1));
        assert_eq!(retry_delay(4), Duration::from_secs(1));
        assert_eq!(retry_delay(5), Duration::from_secs(5));
        assert_eq!(retry_delay(14), Duration::from_secs(5));
        assert_eq!(retry_delay(15), Duration::from_secs(10));
        assert_eq!(retry_delay(99), Duration::from_secs(10));
        assert_eq!(retry_delay(100), Duration::from_secs(60));
        assert_eq!(retry_delay(5000), Duration::from_secs(60));
    }

    #[test]
    fn registry_ids_are_monotonic() {
        let mut inner = Inner::new();
        let (a, _) = inner.register(&["a"], noop());
        let (b, _) = inner.register(&["b"], noop());
        let (c, _) = inner.register(&["a"], noop());
        assert!(a < b && b < c);
    }

    #[test]
    fn active_channels_are_the_union_of_subscriptions() {
        let mut inner = Inner::new();
        inner.register(&["a", "b"], noop());
        inner.register(&["b", "c"], noop());

        let channels: Vec<&str> = inner.active_channels.iter().map(String::as_str).collect();
        assert_eq!(channels, vec!["a", "b", "c"]);
    }

    #[test]
    fn releasing_a_subscription_drops_only_its_exclusive_channels() {
        let mut inner = Inner::new();
        let (sub1, _) = inner.register(&["a"], noop());
        inner.register(&["b"], noop());

        inner.subscriptions.remove(&sub1);
        let changed = inner.recompute_channels();

        assert!(changed);
        let channels: Vec<&str> = inner.active_channels.iter().map(String::as_str).collect();
        assert_eq!(channels, vec!["b"]);
    }

    #[test]
    fn shared_channels_survive_one_subscriber_leaving() {
        let mut inner = Inner::new();
        let (sub1, _) = inner.register(&["a", "b"], noop());
        inner.register(&["b"], noop());

        inner.subscriptions.remove(&sub1);
        let changed = inner.recompute_channels();

        assert!(changed);
        let channels: Vec<&str> = inner.active_channels.iter().map(String::as_str).collect();
        assert_eq!(channels, vec!["b"]);
    }

    #[test]
    fn first_subscription_requests_a_connect() {
        let mut inner = Inner::new();
        let (_, needs_connect) = inner.register(&["a"], noop());
        assert!(needs_connect);
    }

    #[test]
    fn duplicate_channel_subscription_does_not_request_a_reconnect() {
        let mut inner = Inner::new();
        inner.register(&["a"], noop());
        let (_, needs_connect) = inner.register(&["a"], noop());
        assert!(!needs_connect);
    }

    #[test]
    fn new_channel_requests_a_reconnect() {
        let mut inner = Inner::new();
        inner.register(&["a"], noop());
        let (_, needs_connect) = inner.register(&["b"], noop());
        assert!(needs_connect);
    }

    #[tokio::test]
    async fn connection_url_lists_every_active_channel() {
        let client = Client::builder()
            .endpoint("https://appwrite.example.com/v1")
            .project("p1")
            .build()
            .unwrap();
        let realtime = Realtime::new(client);

        let channels: BTreeSet<String> =
            ["documents", "files"].iter().map(|s| s.to_string()).collect();
        let url = realtime.connection_url(&channels).unwrap();

        assert_eq!(
            url.as_str(),
            "wss://appwrite.example.com/v1/realtime?project=p1&channels%5B%5D=documents&channels%5B%5D=files"
        );
    }

    #[tokio::test]
    async fn url_build_failures_reach_the_error_handler() {
        let client = Client::builder()
            .endpoint("https://appwrite.example.com/v1")
            .build()
            .unwrap();
        let realtime = Realtime::new(client);

        let (tx, rx) = std::sync::mpsc::channel();
        realtime.on_error(move |error| {
            let _ = tx.send(error);
        });
        realtime.lock().register(&["a"], noop());

        // No project is configured, so the connection task must hand the
        // failure to the handler before giving up.
        realtime.clone().run_connection().await;

        match rx.try_recv().unwrap() {
            RealtimeError::Url { message } => assert!(message.contains("project")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_url_requires_a_project() {
        let client = Client::builder()
            .endpoint("https://appwrite.example.com/v1")
            .build()
            .unwrap();
        let realtime = Realtime::new(client);

        let channels: BTreeSet<String> = std::iter::once("a".to_string()).collect();
        assert!(realtime.connection_url(&channels).is_err());
    }

    #[test]
    fn events_for_unreferenced_channels_reach_no_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let client = Client::builder().project("p1").build().unwrap();
        let realtime = Realtime::new(client);
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&hits);
            let mut inner = realtime.lock();
            inner.register(
                &["a"],
                Arc::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        realtime.dispatch(&RealtimeEvent {
            events: vec![],
            channels: vec!["c".to_string()],
            timestamp: String::new(),
            payload: serde_json::Value::Null,
        });

        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn events_dispatch_to_every_intersecting_subscription() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let client = Client::builder().project("p1").build().unwrap();
        let realtime = Realtime::new(client);
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let mut inner = realtime.lock();
            for channels in [&["a"][..], &["a", "b"][..], &["c"][..]] {
                let hits = Arc::clone(&hits);
                inner.register(
                    channels,
                    Arc::new(move |_| {
                        hits.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }
        }

        realtime.dispatch(&RealtimeEvent {
            events: vec![],
            channels: vec!["a".to_string()],
            timestamp: String::new(),
            payload: serde_json::Value::Null,
        });

        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
