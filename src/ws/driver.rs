//! The channel's single event loop.
//!
//! Every state transition (caller commands, connect outcomes, inbound
//! frames, heartbeat ticks, backoff expiry) is serialized through one
//! `select!` loop, so the subscription table and the connection state need
//! no locking. Exiting the loop cancels every pending timer; nothing fires
//! after disposal.

use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::auth::TokenProvider;
use crate::constants::{MIN_TIMER_PERIOD, close};
use crate::error::{LiveError, Result};
use crate::types::{Envelope, ErrorNotice, MessageType};
use crate::ws::backoff::Backoff;
use crate::ws::channel::{ChannelConfig, ChannelNotice, ConnectionState};
use crate::ws::subscriptions::{Handler, SubscriptionTable};
use crate::ws::transport::{Transport, TransportEvent, TransportLink};

type Attempt = Pin<Box<dyn Future<Output = Result<TransportLink>> + Send>>;

/// Requests from [`RealtimeChannel`](crate::ws::channel::RealtimeChannel) handles.
pub(crate) enum Command {
    Connect(oneshot::Sender<Result<ConnectionState>>),
    Disconnect(oneshot::Sender<()>),
    Send(Envelope, oneshot::Sender<bool>),
    Subscribe(MessageType, Handler),
    Unsubscribe(MessageType, Handler),
    Dispose(oneshot::Sender<()>),
}

pub(crate) struct ChannelDriver<T, P> {
    transport: Arc<T>,
    tokens: P,
    config: ChannelConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    notices: broadcast::Sender<ChannelNotice>,
    subscriptions: SubscriptionTable,
    backoff: Backoff,
    link: Option<TransportLink>,
    attempt: Option<Attempt>,
    retry_at: Option<Instant>,
    heartbeat: Option<Interval>,
    waiters: Vec<oneshot::Sender<Result<ConnectionState>>>,
}

impl<T, P> ChannelDriver<T, P>
where
    T: Transport,
    P: TokenProvider,
{
    pub(crate) fn new(
        transport: Arc<T>,
        tokens: P,
        config: ChannelConfig,
        commands: mpsc::UnboundedReceiver<Command>,
        state: watch::Sender<ConnectionState>,
        notices: broadcast::Sender<ChannelNotice>,
    ) -> Self {
        let backoff = Backoff::new(config.reconnect_base_delay, config.max_reconnect_attempts);
        Self {
            transport,
            tokens,
            config,
            commands,
            state,
            notices,
            subscriptions: SubscriptionTable::new(),
            backoff,
            link: None,
            attempt: None,
            retry_at: None,
            heartbeat: None,
            waiters: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                cmd = self.commands.recv() => match cmd {
                    Some(Command::Dispose(done)) => {
                        self.shutdown();
                        let _ = done.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    // Every handle dropped.
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                result = finish_attempt(&mut self.attempt), if self.attempt.is_some() => {
                    self.attempt = None;
                    self.on_attempt_finished(result);
                }
                event = next_event(&mut self.link), if self.link.is_some() => {
                    self.on_transport_event(event);
                }
                () = tick(&mut self.heartbeat), if self.heartbeat.is_some() => {
                    self.send_heartbeat();
                }
                () = sleep_until(self.retry_at), if self.retry_at.is_some() => {
                    self.retry_at = None;
                    self.start_attempt();
                }
            }
        }
        tracing::debug!("Channel driver stopped");
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => self.connect(reply),
            Command::Disconnect(done) => {
                self.close_link();
                self.set_state(ConnectionState::Idle);
                self.resolve_waiters();
                let _ = done.send(());
                tracing::info!("Channel disconnected by caller");
            }
            Command::Send(envelope, reply) => {
                let _ = reply.send(self.send(&envelope));
            }
            Command::Subscribe(kind, handler) => {
                if !self.subscriptions.subscribe(kind.clone(), handler) {
                    tracing::trace!(%kind, "Handler already subscribed");
                }
            }
            Command::Unsubscribe(kind, handler) => {
                self.subscriptions.unsubscribe(&kind, &handler);
            }
            // Handled in the loop so it can break.
            Command::Dispose(done) => {
                let _ = done.send(());
            }
        }
    }

    fn connect(&mut self, reply: oneshot::Sender<Result<ConnectionState>>) {
        if self.current_state() == ConnectionState::Open {
            let _ = reply.send(Ok(ConnectionState::Open));
            return;
        }
        if self.tokens.session_token().is_none() {
            tracing::error!("Cannot connect: no session token available");
            let _ = reply.send(Err(LiveError::MissingToken));
            return;
        }

        // A manual connect starts a fresh retry budget.
        self.backoff.reset();
        self.retry_at = None;
        self.waiters.push(reply);
        if self.attempt.is_none() {
            self.start_attempt();
        }
    }

    fn send(&mut self, envelope: &Envelope) -> bool {
        let Some(link) = self.link.as_ref().filter(|_| self.current_state() == ConnectionState::Open)
        else {
            tracing::warn!(kind = %envelope.kind, "Attempted to send while disconnected");
            return false;
        };
        match envelope.encode() {
            Ok(text) => link.send_text(text),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode outbound envelope");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    fn start_attempt(&mut self) {
        let Some(token) = self.tokens.session_token() else {
            tracing::error!("Session token disappeared; giving up on reconnect");
            self.set_state(ConnectionState::Failed);
            self.notify(ChannelNotice::CredentialsUnavailable);
            self.resolve_waiters();
            return;
        };

        self.set_state(ConnectionState::Connecting);
        let transport = Arc::clone(&self.transport);
        let limit = self.config.connect_timeout;
        self.attempt = Some(Box::pin(async move {
            match time::timeout(limit, transport.connect(&token)).await {
                Ok(result) => result,
                Err(_) => Err(LiveError::ConnectTimeout(limit)),
            }
        }));
        tracing::debug!(attempt = self.backoff.attempt(), "Connecting");
    }

    fn on_attempt_finished(&mut self, result: Result<TransportLink>) {
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.heartbeat = Some(heartbeat_interval(self.config.heartbeat_interval));
                self.set_state(ConnectionState::Open);
                self.notify(ChannelNotice::Connected);
                tracing::info!("Real-time channel connected");
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, attempt = self.backoff.attempt(), "Connection attempt failed");
                self.schedule_reconnect();
            }
            Err(e) => {
                tracing::error!(error = %e, "Connection attempt failed permanently");
                self.set_state(ConnectionState::Failed);
                self.notify(ChannelNotice::ConnectionLost {
                    attempts: self.backoff.attempt(),
                });
            }
        }
        self.resolve_waiters();
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(text)) => self.dispatch(&text),
            Some(TransportEvent::Closed {
                code: Some(code @ (close::MISSING_CREDENTIAL | close::INVALID_CREDENTIAL)),
                reason,
            }) => {
                tracing::warn!(code, %reason, "Server rejected the session token");
                self.notify(ChannelNotice::CredentialsRejected { code });
                // The retry budget keeps counting down.
                self.on_link_lost(false);
            }
            Some(TransportEvent::Closed { code, reason }) => {
                tracing::warn!(?code, %reason, "Connection closed unexpectedly");
                self.on_link_lost(true);
            }
            Some(TransportEvent::Error(e)) => {
                tracing::error!(error = %e, "Transport error");
                self.on_link_lost(true);
            }
            None => {
                tracing::warn!("Transport ended without a close event");
                self.on_link_lost(true);
            }
        }
    }

    /// A link that was open is gone. `fresh_budget` restarts the retry
    /// count; an authentication rejection does not.
    fn on_link_lost(&mut self, fresh_budget: bool) {
        self.link = None;
        self.heartbeat = None;
        if fresh_budget {
            self.backoff.reset();
        }
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        match self.backoff.next_delay() {
            Some(delay) => {
                let attempt = self.backoff.attempt();
                tracing::info!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                self.retry_at = Some(Instant::now() + delay);
                self.set_state(ConnectionState::Reconnecting);
                self.notify(ChannelNotice::Reconnecting { attempt, delay });
            }
            None => {
                let attempts = self.backoff.attempt();
                tracing::error!(attempts, "Max reconnection attempts reached");
                self.retry_at = None;
                self.set_state(ConnectionState::Failed);
                self.notify(ChannelNotice::ConnectionLost { attempts });
            }
        }
    }

    /// Drop the link and every pending timer.
    fn close_link(&mut self) {
        self.set_state(ConnectionState::Closing);
        self.attempt = None;
        self.retry_at = None;
        self.heartbeat = None;
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    fn shutdown(&mut self) {
        self.close_link();
        self.subscriptions.clear();
        self.set_state(ConnectionState::Disposed);
        self.resolve_waiters();
        tracing::info!("Real-time channel disposed");
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, text: &str) {
        let envelope = match Envelope::decode(text) {
            Ok(env) => env,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match envelope.kind {
            MessageType::Pong => {
                tracing::trace!("Pong received");
            }
            MessageType::Error => {
                let message = envelope
                    .payload::<ErrorNotice>()
                    .map(|n| n.message)
                    .unwrap_or_default();
                tracing::error!(%message, "Server reported an error");
                self.notify(ChannelNotice::ServerError { message });
                self.subscriptions.dispatch(&MessageType::Error, &envelope.data);
            }
            ref kind => {
                self.subscriptions.dispatch(kind, &envelope.data);
            }
        }
    }

    fn send_heartbeat(&mut self) {
        if !self.send(&Envelope::ping()) {
            tracing::debug!("Heartbeat skipped");
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::debug!(from = ?*current, to = ?next, "Channel state");
                *current = next;
                true
            }
        });
    }

    fn notify(&self, notice: ChannelNotice) {
        // No receivers is fine.
        let _ = self.notices.send(notice);
    }

    /// Answer pending `connect()` callers with the current state.
    fn resolve_waiters(&mut self) {
        let state = self.current_state();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Ok(state));
        }
    }
}

fn heartbeat_interval(period: Duration) -> Interval {
    let period = period.max(MIN_TIMER_PERIOD);
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn finish_attempt(attempt: &mut Option<Attempt>) -> Result<TransportLink> {
    match attempt {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn next_event(link: &mut Option<TransportLink>) -> Option<TransportEvent> {
    match link {
        Some(link) => link.recv().await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(at).await,
        None => pending().await,
    }
}
