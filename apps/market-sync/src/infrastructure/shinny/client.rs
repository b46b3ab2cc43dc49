//! Market Data Client
//!
//! [`MarketClient`] owns one connection, the request correlator and the
//! chart and quote books. A single dispatch task applies connection events
//! in arrival order; readers take the same lock.
//!
//! # Frame Routing
//!
//! - `packetType: "response"` with a pending id completes the call
//! - `rtn_data` is merged into the books
//! - everything else (including responses nobody waits for) is published on
//!   the notice channel
//! - malformed frames are logged and dropped; the connection stays up
//!
//! Every frame other than a matched response is followed by a
//! `peek_message`, since the server only pushes the next diff after one.
//!
//! # Reconnection
//!
//! When the socket closes, chart windows revert to `Subscribing`, quotes are
//! cleared and pending calls fail with [`CallError::ConnectionLost`]. On the
//! next open the active chart and quote subscriptions are sent again.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, InboundFrame, JsonCodec};
use super::connection::{
    ConnectionError, ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState,
};
use super::correlator::{CallError, Correlator};
use super::heartbeat::HeartbeatConfig;
use super::messages::{ClientMessage, Notification};
use super::reconnect::ReconnectConfig;
use crate::ClientConfig;
use crate::application::ports::{ChartFeed, Connector, FeedError, FeedLiveness};
use crate::domain::chart::{ChartBook, ChartError, ChartRequest, ChartSubscription};
use crate::domain::quote::{Quote, QuoteBook};
use crate::domain::streaming::{DataFragment, Symbol};
use crate::infrastructure::metrics::{self, DropReason};

const NOTICE_CAPACITY: usize = 64;

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The chart request is invalid.
    #[error(transparent)]
    Chart(#[from] ChartError),

    /// The message could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The connection cannot take the message.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

#[derive(Debug, Default)]
struct Books {
    charts: ChartBook,
    quotes: QuoteBook,
    requests: BTreeMap<String, ChartRequest>,
    resubscribe: bool,
}

#[derive(Debug)]
struct Shared {
    books: Mutex<Books>,
    correlator: Correlator,
    codec: JsonCodec,
    connection: ConnectionHandle,
    updates: watch::Sender<u64>,
    status: watch::Sender<ConnectionState>,
    notices: broadcast::Sender<Value>,
    stopped: AtomicBool,
}

/// Client for a DIFF market data front.
#[derive(Debug, Clone)]
pub struct MarketClient {
    shared: Arc<Shared>,
}

impl MarketClient {
    /// Spawn the connection and dispatch tasks and return the client.
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn start(
        config: &ClientConfig,
        connector: Arc<dyn Connector>,
        cancel: CancellationToken,
    ) -> Self {
        let (manager, connection, events) = ConnectionManager::new(
            config.url.clone(),
            connector,
            ReconnectConfig::from_client_config(config),
            HeartbeatConfig::from_client_config(config),
            cancel,
        );
        let (updates, _) = watch::channel(0);
        let (status, _) = watch::channel(ConnectionState::Connecting);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let shared = Arc::new(Shared {
            books: Mutex::new(Books::default()),
            correlator: Correlator::new(),
            codec: JsonCodec::new(),
            connection,
            updates,
            status,
            notices,
            stopped: AtomicBool::new(false),
        });

        tokio::spawn(manager.run());
        tokio::spawn(dispatch(Arc::clone(&shared), events));

        Self { shared }
    }

    // =========================================================================
    // Charts and Quotes
    // =========================================================================

    /// Subscribe or reposition a chart.
    ///
    /// # Errors
    ///
    /// Fails before anything is sent if the request is invalid (for example
    /// a tick chart over several symbols), or if the connection is closed.
    pub fn set_chart(&self, request: ChartRequest) -> Result<ChartSubscription, ClientError> {
        let subscription = request.subscription()?;
        let text = self
            .shared
            .codec
            .encode(&ClientMessage::SetChart(request.clone()))?;

        let mut books = self.shared.books.lock();
        self.shared.connection.send(text)?;
        books.charts.subscribe(subscription.clone());
        books.requests.insert(request.chart_id.clone(), request);
        tracing::debug!(chart_id = %subscription.chart_id, "Chart subscribed");
        Ok(subscription)
    }

    /// Release a chart. Returns `false` if the chart was not active.
    ///
    /// # Errors
    ///
    /// Returns an error if the release message cannot be sent.
    pub fn release_chart(&self, chart_id: &str) -> Result<bool, ClientError> {
        let mut books = self.shared.books.lock();
        books.charts.release(chart_id);
        let Some(request) = books.requests.remove(chart_id) else {
            return Ok(false);
        };
        let text = self
            .shared
            .codec
            .encode(&ClientMessage::SetChart(request.release()))?;
        self.shared.connection.send(text)?;
        tracing::debug!(chart_id, "Chart released");
        Ok(true)
    }

    /// Mark a chart's window as consumed.
    pub fn mark_exhausted(&self, chart_id: &str) {
        if let Some(window) = self.shared.books.lock().charts.window_mut(chart_id) {
            window.mark_exhausted();
        }
    }

    /// Add symbols to the quote subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription message cannot be sent.
    pub fn subscribe_quotes<I, S>(&self, symbols: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Symbol>,
    {
        let mut books = self.shared.books.lock();
        if !books.quotes.subscribe(symbols) {
            return Ok(());
        }
        let text = self.shared.codec.encode(&ClientMessage::SubscribeQuote {
            ins_list: books.quotes.ins_list(),
        })?;
        self.shared.connection.send(text)?;
        Ok(())
    }

    /// Read the chart book under the dispatch lock.
    pub fn with_charts<R>(&self, f: impl FnOnce(&ChartBook) -> R) -> R {
        f(&self.shared.books.lock().charts)
    }

    /// Latest quote of a symbol.
    #[must_use]
    pub fn quote(&self, symbol: &str) -> Option<Quote> {
        self.shared.books.lock().quotes.get(symbol).cloned()
    }

    // =========================================================================
    // Calls
    // =========================================================================

    /// Send a request and wait for its response.
    ///
    /// There is no timeout; the call fails only when the connection closes.
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ConnectionLost`] if the socket closes first, or
    /// [`CallError::Closed`] if the client cannot send.
    pub async fn call(&self, service_name: &str, data: Value) -> Result<Value, CallError> {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let (envelope, rx) = self.shared.correlator.issue(service_name, data, timestamp_ms);
        let id = envelope.id;

        let text = match self.shared.codec.encode_request(&envelope) {
            Ok(text) => text,
            Err(e) => {
                self.shared.correlator.cancel(id);
                return Err(CallError::Encode(e.to_string()));
            }
        };
        if self.shared.connection.send(text).is_err() {
            self.shared.correlator.cancel(id);
            return Err(CallError::Closed);
        }

        rx.await.map_err(|_| CallError::Closed)?
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Receiver ticked after every applied frame and lifecycle change.
    #[must_use]
    pub fn updates(&self) -> watch::Receiver<u64> {
        self.shared.updates.subscribe()
    }

    /// Receiver of pushes the client does not interpret.
    #[must_use]
    pub fn notices(&self) -> broadcast::Receiver<Value> {
        self.shared.notices.subscribe()
    }

    /// Connection state as last seen by the dispatch loop.
    #[must_use]
    pub fn status(&self) -> ConnectionState {
        *self.shared.status.borrow()
    }

    /// Check if the dispatch loop has finished (closed or exhausted).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// Close the connection without reconnecting.
    pub fn close(&self) {
        self.shared.connection.close();
    }
}

impl From<ClientError> for FeedError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Chart(e) => Self::Chart(e),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

impl ChartFeed for MarketClient {
    fn set_chart(&self, request: ChartRequest) -> Result<ChartSubscription, FeedError> {
        Ok(Self::set_chart(self, request)?)
    }

    fn release_chart(&self, chart_id: &str) -> Result<bool, FeedError> {
        Ok(Self::release_chart(self, chart_id)?)
    }

    fn mark_exhausted(&self, chart_id: &str) {
        Self::mark_exhausted(self, chart_id);
    }

    fn with_charts<R>(&self, f: impl FnOnce(&ChartBook) -> R) -> R {
        Self::with_charts(self, f)
    }

    fn updates(&self) -> watch::Receiver<u64> {
        Self::updates(self)
    }

    fn liveness(&self) -> FeedLiveness {
        if self.status() == ConnectionState::Dead {
            FeedLiveness::Exhausted
        } else if self.is_stopped() {
            FeedLiveness::Closed
        } else {
            FeedLiveness::Live
        }
    }
}

async fn dispatch(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        shared.handle(event);
    }
    shared.stopped.store(true, Ordering::Release);
    shared.bump();
    tracing::debug!("Dispatch loop finished");
}

impl Shared {
    fn handle(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Opened => self.on_opened(),
            ConnectionEvent::Closed => self.on_closed(),
            ConnectionEvent::Error(message) => {
                tracing::warn!(error = %message, "Connection error");
            }
            ConnectionEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Waiting to reconnect");
            }
            ConnectionEvent::Exhausted { attempts } => {
                tracing::error!(attempts, "Market data connection is dead");
                self.correlator.reject_all();
                self.status.send_replace(ConnectionState::Dead);
                self.bump();
            }
            ConnectionEvent::Message(text) => self.on_message(&text),
        }
    }

    fn on_opened(&self) {
        let mut books = self.books.lock();
        if std::mem::take(&mut books.resubscribe) {
            for request in books.requests.values() {
                self.send(&ClientMessage::SetChart(request.clone()));
            }
            if books.quotes.has_subscriptions() {
                self.send(&ClientMessage::SubscribeQuote {
                    ins_list: books.quotes.ins_list(),
                });
            }
            tracing::info!(charts = books.requests.len(), "Resubscribed after reconnect");
        }
        self.send(&ClientMessage::PeekMessage);
        drop(books);

        self.status.send_replace(ConnectionState::Open);
        self.bump();
    }

    fn on_closed(&self) {
        let mut books = self.books.lock();
        books.charts.reset();
        books.quotes.reset();
        books.resubscribe = true;
        drop(books);

        self.correlator.reject_all();
        self.status.send_replace(ConnectionState::Closed);
        self.bump();
    }

    /// Route one inbound text frame.
    ///
    /// Every frame except a correlated response is answered with a
    /// `peek_message`, malformed ones included, so the server keeps pushing.
    fn on_message(&self, text: &str) {
        match self.codec.decode(text) {
            Ok(InboundFrame::Response(response)) => {
                let Some(unmatched) = self.correlator.complete(response) else {
                    return;
                };
                tracing::debug!(id = unmatched.id, "Response without pending request");
                self.publish(json!({
                    "id": unmatched.id,
                    "packetType": "response",
                    "data": unmatched.data,
                }));
            }
            Ok(InboundFrame::Push(value)) => match self.codec.notification(value) {
                Ok(Notification::RtnData(fragments)) => self.apply(&fragments),
                Ok(Notification::Other(value)) => self.publish(value),
                Err(e) => drop_frame(&e),
            },
            Err(e) => drop_frame(&e),
        }
        self.send(&ClientMessage::PeekMessage);
    }

    fn apply(&self, fragments: &[DataFragment]) {
        let mut merged = 0usize;
        let mut books = self.books.lock();
        for fragment in fragments {
            for update in books.charts.apply(fragment) {
                merged += update.in_window.len() + update.overflow.len();
                tracing::trace!(
                    chart_id = %update.chart_id,
                    phase = %update.phase,
                    in_window = update.in_window.len(),
                    overflow = update.overflow.len(),
                    "Chart updated"
                );
            }
            books.quotes.apply(&fragment.quotes);
        }
        drop(books);

        if merged > 0 {
            metrics::record_records_merged(u64::try_from(merged).unwrap_or(u64::MAX));
        }
        self.bump();
    }

    fn send(&self, message: &ClientMessage) {
        let result = self
            .codec
            .encode(message)
            .map_err(ClientError::from)
            .and_then(|text| self.connection.send(text).map_err(ClientError::from));
        if let Err(e) = result {
            tracing::warn!(aid = message.aid(), error = %e, "Failed to send message");
        }
    }

    fn publish(&self, value: Value) {
        // No receivers is fine.
        let _ = self.notices.send(value);
    }

    fn bump(&self) {
        self.updates.send_modify(|tick| *tick = tick.wrapping_add(1));
    }
}

fn drop_frame(error: &CodecError) {
    let reason = match error {
        CodecError::Json(e) if e.is_syntax() || e.is_eof() => DropReason::InvalidJson,
        _ => DropReason::UnexpectedShape,
    };
    metrics::record_frame_dropped(reason);
    tracing::warn!(error = %error, "Dropping malformed frame");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::chart::ChartPhase;
    use crate::domain::duration::MINUTE_NANOS;
    use crate::infrastructure::transport::{MockConnector, MockSession};

    fn config() -> ClientConfig {
        ClientConfig {
            reconnect_interval: Duration::from_millis(10),
            ..ClientConfig::default()
        }
    }

    async fn started() -> (MarketClient, MockSession, CancellationToken) {
        let (connector, mut sessions) = MockConnector::new();
        let cancel = CancellationToken::new();
        let client = MarketClient::start(&config(), connector, cancel.clone());
        let session = sessions.recv().await.unwrap();
        (client, session, cancel)
    }

    async fn next_json(session: &mut MockSession) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), session.next_text())
            .await
            .expect("timed out waiting for frame")
            .expect("session closed");
        serde_json::from_str(&text).unwrap()
    }

    async fn wait_until(client: &MarketClient, mut check: impl FnMut(&MarketClient) -> bool) {
        let mut updates = client.updates();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check(client) {
                updates.changed().await.unwrap();
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn multi_symbol_tick_chart_fails_before_sending() {
        let (client, mut session, cancel) = started().await;
        assert_eq!(next_json(&mut session).await["aid"], "peek_message");

        let request = ChartRequest::new("t", vec!["A".into(), "B".into()], 0);
        assert!(matches!(
            client.set_chart(request),
            Err(ClientError::Chart(ChartError::UnsupportedMultiSymbol(2)))
        ));
        assert!(client.with_charts(|book| book.window("t").is_none()));
        cancel.cancel();
    }

    #[tokio::test]
    async fn rtn_data_makes_window_ready_and_peeks() {
        let (client, mut session, cancel) = started().await;
        assert_eq!(next_json(&mut session).await["aid"], "peek_message");

        let request = ChartRequest::new("c1", vec!["A".into()], MINUTE_NANOS).with_bar_count(3);
        let subscription = client.set_chart(request).unwrap();
        assert_eq!(next_json(&mut session).await["aid"], "set_chart");

        session.push_text(
            json!({"aid": "rtn_data", "data": [
                {"charts": {"c1": {"left_id": 10, "right_id": 12,
                    "state": subscription.requested_fields}}},
                {"klines": {"A": {"60000000000": {"last_id": 13, "data": {
                    "10": {"datetime": 1, "close": 1.0},
                    "11": {"datetime": 2, "close": 2.0},
                    "12": {"datetime": 3, "close": 3.0},
                    "13": {"datetime": 4, "close": 4.0}}}}}},
                {"mdhis_more_data": false}
            ]})
            .to_string(),
        );

        assert_eq!(next_json(&mut session).await["aid"], "peek_message");
        wait_until(&client, |c| {
            c.with_charts(|book| book.window("c1").map(|w| w.phase()) == Some(ChartPhase::Ready))
        })
        .await;

        let ids: Vec<i64> = client.with_charts(|book| {
            book.in_window("c1", "A")
                .unwrap()
                .iter()
                .map(|record| record.id)
                .collect()
        });
        assert_eq!(ids, vec![10, 11, 12]);
        cancel.cancel();
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped() {
        let (client, mut session, cancel) = started().await;
        assert_eq!(next_json(&mut session).await["aid"], "peek_message");
        let mut notices = client.notices();

        session.push_text("{not json");
        session.push_text(r#"{"aid":"rtn_data","data":{"bad":1}}"#);
        session.push_text(r#"{"aid":"rsp_login","ok":true}"#);

        let notice = tokio::time::timeout(Duration::from_secs(2), notices.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notice["aid"], "rsp_login");
        assert_eq!(client.status(), ConnectionState::Open);
        cancel.cancel();
    }

    #[tokio::test]
    async fn malformed_rtn_data_still_peeks() {
        let (client, mut session, cancel) = started().await;
        assert_eq!(next_json(&mut session).await["aid"], "peek_message");

        session.push_text(r#"{"aid":"rtn_data","data":[{"charts":{"c1":{"left_id":"oops"}}}]}"#);
        assert_eq!(next_json(&mut session).await["aid"], "peek_message");

        session.push_text("{not json");
        assert_eq!(next_json(&mut session).await["aid"], "peek_message");
        assert_eq!(client.status(), ConnectionState::Open);
        cancel.cancel();
    }

    #[tokio::test]
    async fn call_resolves_on_matching_response() {
        let (client, mut session, cancel) = started().await;
        assert_eq!(next_json(&mut session).await["aid"], "peek_message");

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.call("trade", json!({"op": "x"})).await });

        let request = next_json(&mut session).await;
        assert_eq!(request["packetType"], "request");
        assert_eq!(request["serviceName"], "trade");
        let id = request["id"].as_u64().unwrap();

        session.push_text(json!({"id": id, "packetType": "response", "data": {"ok": 1}}).to_string());
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": 1}));
        cancel.cancel();
    }
}
