use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::ChannelConfig;
use crate::delivery::push::channel::{ChannelContext, ChannelManager, ChannelState};
use crate::domain::notification::Notification;
use crate::domain::session::UserIdentity;
use crate::usecase::contracts::{AccessTokenSource, NotificationApi};
use crate::usecase::history::{HistoryLoader, HistoryOutcome};
use crate::usecase::query::NotificationQuery;
use crate::usecase::read_state::ReadStateSynchronizer;
use crate::usecase::store::SessionStore;

const ALERT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionTransition {
    Unchanged,
    Started,
    Ended,
    Switched,
}

struct ActiveSession {
    user: UserIdentity,
    generation: u64,
    channel: ChannelManager,
    history: JoinHandle<HistoryOutcome>,
}

/// The notification subsystem for one running application.
///
/// Follows the authenticated user: a login seeds the store from history and
/// opens the push channel, a logout tears both down and empties the store,
/// and an account switch does both in that order.
pub struct NotificationService<A>
where
    A: NotificationApi + 'static,
{
    api: Arc<A>,
    store: SessionStore,
    credentials: Arc<dyn AccessTokenSource>,
    channel_config: ChannelConfig,
    alerts: broadcast::Sender<Notification>,
    active: Mutex<Option<ActiveSession>>,
}

impl<A> NotificationService<A>
where
    A: NotificationApi + 'static,
{
    pub fn new(api: Arc<A>, credentials: Arc<dyn AccessTokenSource>, channel_config: ChannelConfig) -> Self {
        let (alerts, _) = broadcast::channel(ALERT_BUFFER);
        Self {
            api,
            store: SessionStore::new(),
            credentials,
            channel_config,
            alerts,
            active: Mutex::new(None),
        }
    }

    /// Applies one auth-state value. Repeating the current value is a no-op.
    /// Must be called inside a Tokio runtime.
    pub fn observe(&self, user: Option<UserIdentity>) -> SessionTransition {
        let mut active = self.active.lock();

        let transition = match (active.as_ref(), &user) {
            (None, None) => SessionTransition::Unchanged,
            (Some(current), Some(next)) if current.user == *next => SessionTransition::Unchanged,
            (None, Some(_)) => SessionTransition::Started,
            (Some(_), None) => SessionTransition::Ended,
            (Some(_), Some(_)) => SessionTransition::Switched,
        };
        if transition == SessionTransition::Unchanged {
            return transition;
        }

        if let Some(previous) = active.take() {
            self.stop(previous);
        }
        if let Some(user) = user {
            *active = Some(self.start(user));
        }

        tracing::debug!(?transition, "session transition applied");
        transition
    }

    /// Follows the auth-state signal until its sender goes away, which is
    /// treated as a logout.
    pub async fn run(&self, mut auth_rx: watch::Receiver<Option<UserIdentity>>) {
        loop {
            let user = auth_rx.borrow_and_update().clone();
            self.observe(user);

            if auth_rx.changed().await.is_err() {
                tracing::debug!("auth state signal closed");
                self.observe(None);
                return;
            }
        }
    }

    pub fn shutdown(&self) {
        self.observe(None);
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<Notification> {
        self.alerts.subscribe()
    }

    pub fn query(&self) -> NotificationQuery {
        NotificationQuery::new(self.store.clone())
    }

    pub fn read_state(&self) -> ReadStateSynchronizer<A> {
        ReadStateSynchronizer::new(self.api.clone(), self.store.clone())
    }

    pub fn current_user(&self) -> Option<UserIdentity> {
        self.active.lock().as_ref().map(|session| session.user.clone())
    }

    pub fn channel_state(&self) -> ChannelState {
        self.active
            .lock()
            .as_ref()
            .map(|session| session.channel.state())
            .unwrap_or(ChannelState::Disconnected)
    }

    fn start(&self, user: UserIdentity) -> ActiveSession {
        let generation = self.store.begin_session(&user.user_id);
        tracing::info!(user_id = %user.user_id, generation, "notification session started");

        let loader = HistoryLoader::new(self.api.clone(), self.store.clone());
        let history = tokio::spawn(async move { loader.load(generation).await });

        let channel = ChannelManager::start(
            self.channel_config.clone(),
            ChannelContext {
                user: user.clone(),
                generation,
                store: self.store.clone(),
                credentials: self.credentials.clone(),
                alerts: self.alerts.clone(),
            },
        );

        ActiveSession {
            user,
            generation,
            channel,
            history,
        }
    }

    fn stop(&self, session: ActiveSession) {
        let ActiveSession {
            user,
            generation,
            mut channel,
            history,
        } = session;

        channel.teardown();
        history.abort();
        self.store.end_session();

        tracing::info!(user_id = %user.user_id, generation, "notification session ended");
    }
}

impl<A> Drop for NotificationService<A>
where
    A: NotificationApi + 'static,
{
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            self.stop(session);
        }
    }
}
