use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{ChannelConfig, ReconnectPolicy, ReconnectStrategy};
use crate::delivery::push::frame::{self, Command, Frame, FrameBuffer, Inbound};
use crate::domain::notification::Notification;
use crate::domain::session::UserIdentity;
use crate::usecase::contracts::AccessTokenSource;
use crate::usecase::error::ChannelError;
use crate::usecase::store::SessionStore;

// Silence tolerated on an incoming heartbeat before the link is declared dead.
const HEARTBEAT_TOLERANCE: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything a channel needs from the session that owns it.
#[derive(Clone)]
pub struct ChannelContext {
    pub user: UserIdentity,
    pub generation: u64,
    pub store: SessionStore,
    pub credentials: Arc<dyn AccessTokenSource>,
    pub alerts: broadcast::Sender<Notification>,
}

/// Owns the single push connection of a session.
///
/// The connection runs on a spawned task that reconnects on every failure
/// until [`ChannelManager::teardown`] is called or the manager is dropped.
pub struct ChannelManager {
    state: Arc<watch::Sender<ChannelState>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelManager {
    /// Starts connecting immediately. Must be called inside a Tokio runtime.
    pub fn start(config: ChannelConfig, ctx: ChannelContext) -> Self {
        let state = Arc::new(watch::Sender::new(ChannelState::Disconnected));
        let shutdown = CancellationToken::new();

        tracing::info!(
            user_id = %ctx.user.user_id,
            generation = ctx.generation,
            push_url = %config.push_url,
            "starting notification channel"
        );

        let worker = Worker {
            config,
            ctx,
            state: state.clone(),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self {
            state,
            shutdown,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the connection for good. Timers, the subscription and the
    /// socket are released before this returns; no reconnect follows.
    pub fn teardown(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };

        self.shutdown.cancel();
        task.abort();
        self.state.send_replace(ChannelState::Disconnected);
        metrics::gauge!("notification_channel_connected").set(0.0);

        tracing::info!("notification channel torn down");
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

struct Worker {
    config: ChannelConfig,
    ctx: ChannelContext,
    state: Arc<watch::Sender<ChannelState>>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        let mut backoff = ReconnectBackoff::new(self.config.reconnect.clone());
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            self.set_state(ChannelState::Connecting);

            let error = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                error = self.connect_and_pump(&mut backoff) => error,
            };

            self.set_state(ChannelState::Disconnected);
            metrics::counter!("notification_channel_disconnects_total", "reason" => error.kind())
                .increment(1);
            tracing::warn!(
                user_id = %self.ctx.user.user_id,
                attempt,
                error = %error,
                "notification channel disconnected"
            );

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    user_id = %self.ctx.user.user_id,
                    attempts = attempt,
                    "reconnect attempts exhausted, notification channel stays down"
                );
                break;
            };

            tracing::debug!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ChannelState::Disconnected);
        tracing::debug!(user_id = %self.ctx.user.user_id, "notification channel worker stopped");
    }

    // A cancelled worker must not overwrite the state teardown published.
    fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|current| {
            if self.shutdown.is_cancelled() || *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            let connected = if next == ChannelState::Connected { 1.0 } else { 0.0 };
            metrics::gauge!("notification_channel_connected").set(connected);
        }
    }

    async fn connect_and_pump(&self, backoff: &mut ReconnectBackoff) -> ChannelError {
        match self.session(backoff).await {
            Ok(()) => ChannelError::Closed,
            Err(e) => e,
        }
    }

    async fn session(&self, backoff: &mut ReconnectBackoff) -> Result<(), ChannelError> {
        let timeout = self.config.connect_timeout;
        let url = self.config.push_url.as_str();

        let (ws, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
            .await
            .map_err(|_| ChannelError::ConnectTimeout(timeout))?
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        metrics::counter!("notification_channel_connects_total").increment(1);

        let (mut write, mut read) = ws.split();

        let token = self.ctx.credentials.access_token();
        let connect = Frame::connect(
            &host_of(url),
            token.as_deref(),
            (
                self.config.heartbeat_outgoing.as_millis() as u64,
                self.config.heartbeat_incoming.as_millis() as u64,
            ),
        );
        write
            .send(Message::text(connect.encode()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;

        let connected = tokio::time::timeout(timeout, await_connected(&mut read))
            .await
            .map_err(|_| ChannelError::HandshakeTimeout(timeout))??;
        let plan = HeartbeatPlan::negotiate(
            self.config.heartbeat_outgoing,
            self.config.heartbeat_incoming,
            connected.heart_beat(),
        );

        let subscription_id = format!("sub-{}", Uuid::new_v4());
        let destination = self.config.destination_for(&self.ctx.user.user_id);
        write
            .send(Message::text(Frame::subscribe(&subscription_id, &destination).encode()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))?;

        self.set_state(ChannelState::Connected);
        backoff.reset();
        tracing::info!(
            user_id = %self.ctx.user.user_id,
            %destination,
            send_every_ms = plan.send_every.map(|d| d.as_millis() as u64),
            expect_within_ms = plan.expect_within.map(|d| d.as_millis() as u64),
            "notification channel connected"
        );

        let mut frames = FrameBuffer::new();
        let mut last_seen = Instant::now();
        let mut send_ticker = plan.send_every.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            let deadline = plan.expect_within.map(|window| last_seen + window);

            tokio::select! {
                inbound = read.next() => match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        self.handle_text(&mut frames, text.as_str())?;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        last_seen = Instant::now();
                        match std::str::from_utf8(&bytes) {
                            Ok(text) => self.handle_text(&mut frames, text)?,
                            Err(e) => tracing::warn!(error = %e, "dropping non-utf8 binary message"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_seen = Instant::now();
                        write
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|e| ChannelError::Send(e.to_string()))?;
                    }
                    Some(Ok(Message::Pong(_))) => last_seen = Instant::now(),
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "notification channel closed by server");
                        return Ok(());
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => return Ok(()),
                },
                _ = tick(&mut send_ticker) => {
                    write
                        .send(Message::text("\n".to_string()))
                        .await
                        .map_err(|e| ChannelError::Send(e.to_string()))?;
                }
                _ = wait_until(deadline) => {
                    return Err(ChannelError::HeartbeatTimeout(
                        plan.expect_within.unwrap_or_default(),
                    ));
                }
            }
        }
    }

    fn handle_text(&self, frames: &mut FrameBuffer, text: &str) -> Result<(), ChannelError> {
        for item in frames.push(text) {
            match item {
                Ok(Inbound::Heartbeat) => {}
                Ok(Inbound::Frame(frame)) => match frame.command {
                    Command::Message => self.deliver(&frame),
                    Command::Error => {
                        let message = frame.get("message").unwrap_or(frame.body.as_str());
                        return Err(ChannelError::Server(message.to_string()));
                    }
                    Command::Receipt | Command::Connected => {}
                    other => {
                        tracing::debug!(command = other.as_str(), "ignoring unexpected frame");
                    }
                },
                Err(e) => {
                    metrics::counter!("notifications_malformed_total", "source" => "frame").increment(1);
                    tracing::warn!(error = %e, "dropping malformed frame");
                }
            }
        }
        Ok(())
    }

    // Teardown may land while this poll is still running on another thread.
    fn deliver(&self, frame: &Frame) {
        if self.shutdown.is_cancelled() {
            tracing::debug!("dropping delivery for a torn down channel");
            return;
        }

        let notification: Notification = match serde_json::from_str(&frame.body) {
            Ok(notification) => notification,
            Err(e) => {
                metrics::counter!("notifications_malformed_total", "source" => "push").increment(1);
                tracing::warn!(
                    error = %e,
                    message_id = frame.get("message-id").unwrap_or_default(),
                    "dropping malformed notification payload"
                );
                return;
            }
        };

        let id = notification.id.clone();
        if let Some(outcome) = self.ctx.store.insert(self.ctx.generation, notification.clone()) {
            metrics::counter!("notifications_received_total").increment(1);
            tracing::debug!(notification_id = %id, ?outcome, "live notification stored");
            // Nobody listening for alerts is fine.
            let _ = self.ctx.alerts.send(notification);
        }
    }
}

async fn await_connected<S>(read: &mut S) -> Result<Frame, ChannelError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(message) = read.next().await {
        match message? {
            Message::Text(text) => {
                for item in frame::decode(text.as_str()) {
                    match item {
                        Ok(Inbound::Frame(frame)) if frame.command == Command::Connected => {
                            return Ok(frame);
                        }
                        Ok(Inbound::Frame(frame)) if frame.command == Command::Error => {
                            let message = frame.get("message").unwrap_or(frame.body.as_str());
                            return Err(ChannelError::Handshake(message.to_string()));
                        }
                        Ok(_) => {}
                        Err(e) => return Err(ChannelError::Handshake(e.to_string())),
                    }
                }
            }
            Message::Close(_) => return Err(ChannelError::Closed),
            _ => {}
        }
    }
    Err(ChannelError::Closed)
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => pending().await,
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_string))
        .unwrap_or_default()
}

/// Heartbeat periods agreed between client and server settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HeartbeatPlan {
    pub send_every: Option<Duration>,
    pub expect_within: Option<Duration>,
}

impl HeartbeatPlan {
    pub(crate) fn negotiate(
        client_outgoing: Duration,
        client_incoming: Duration,
        (server_outgoing, server_incoming): (u64, u64),
    ) -> Self {
        let send_every = (!client_outgoing.is_zero() && server_incoming != 0)
            .then(|| client_outgoing.max(Duration::from_millis(server_incoming)));
        let expect_within = (!client_incoming.is_zero() && server_outgoing != 0).then(|| {
            client_incoming.max(Duration::from_millis(server_outgoing)) * HEARTBEAT_TOLERANCE
        });
        Self {
            send_every,
            expect_within,
        }
    }
}

pub(crate) struct ReconnectBackoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl ReconnectBackoff {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the attempt budget is
    /// spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempt >= max {
                return None;
            }
        }

        let delay = match self.policy.strategy {
            ReconnectStrategy::Fixed => self.policy.base_delay,
            ReconnectStrategy::Exponential => self
                .policy
                .base_delay
                .saturating_mul(2u32.saturating_pow(self.attempt))
                .min(self.policy.max_delay),
        };
        self.attempt += 1;
        Some(delay)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}
