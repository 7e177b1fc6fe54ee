//! Connection lifecycle supervision.
//!
//! The supervisor owns the only mutable lifecycle state in the process: the
//! current connection, the counted-retry tally, and at most one pending
//! reconnect timer. Lifecycle events arrive over a channel (fed by the
//! router's `connection.update` binding) and are handled one at a time, so
//! no state transition ever races another.
//!
//! Recovery decisions are a pure function of the disconnect code and the
//! tally ([`ReconnectPolicy::decide`]); the run loop only executes them.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Sleep;
use warble_transport::{
    classify, ChatCache, ConnectConfig, Connection, ConnectionUpdate, LinkState, ReasonClass,
    Transport,
};

use crate::facade;
use crate::router::{EventRouter, HandlerModule};
use crate::session::SessionStore;
use crate::util;

/// Tunable reconnect behavior.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Unit delay for counted retries; attempt n waits n times this.
    pub base_delay: Duration,
    /// Fixed delay after a server-requested restart.
    pub restart_delay: Duration,
    /// Fixed delay after a keepalive timeout.
    pub timeout_delay: Duration,
    /// Counted retries allowed before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            restart_delay: Duration::from_secs(3),
            timeout_delay: Duration::from_secs(2),
            max_attempts: 5,
        }
    }
}

/// What to do about one connection close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Unclassified code: log it, change nothing.
    Ignore,
    /// Stop retrying; the operator has to intervene.
    Abort(&'static str),
    /// Reconnect after `delay`. Counted retries consume the attempt cap,
    /// uncounted ones (restart, timeout) do not.
    Retry { delay: Duration, counted: bool },
}

impl ReconnectPolicy {
    /// Decide the recovery for a close with status `code`, given how many
    /// counted retries have already happened.
    pub fn decide(&self, code: Option<u16>, attempts: u32) -> RecoveryAction {
        match classify(code) {
            ReasonClass::LoggedOut => {
                RecoveryAction::Abort("device logged out, a fresh session is required")
            }
            ReasonClass::BadSession => {
                RecoveryAction::Abort("session data is unusable, a fresh session is required")
            }
            ReasonClass::Replaced => {
                RecoveryAction::Abort("another client took over this session")
            }
            ReasonClass::AuthFailure => {
                RecoveryAction::Abort("authentication failed, a fresh session is required")
            }
            ReasonClass::RestartRequired => {
                RecoveryAction::Retry { delay: self.restart_delay, counted: false }
            }
            ReasonClass::TimedOut => {
                RecoveryAction::Retry { delay: self.timeout_delay, counted: false }
            }
            ReasonClass::Transient => {
                let attempt = attempts + 1;
                if attempt > self.max_attempts {
                    RecoveryAction::Abort("reconnect attempt cap reached")
                } else {
                    RecoveryAction::Retry { delay: self.base_delay * attempt, counted: true }
                }
            }
            ReasonClass::Unknown => RecoveryAction::Ignore,
        }
    }
}

/// Coarse connection phase, published for the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Open,
    Closed,
}

impl Phase {
    pub fn name(self) -> &'static str {
        match self {
            Phase::Connecting => "connecting",
            Phase::Open => "open",
            Phase::Closed => "closed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub phase: Phase,
    pub attempts: u32,
    pub last_disconnect_code: Option<u16>,
    pub uptime_secs: i64,
}

struct StatusInner {
    phase: Phase,
    attempts: u32,
    last_disconnect_code: Option<u16>,
}

/// Read-mostly view of the supervisor's state, shared with the HTTP
/// status server and the housekeeping task.
pub struct StatusBoard {
    inner: RwLock<StatusInner>,
    started: DateTime<Utc>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StatusInner {
                phase: Phase::Connecting,
                attempts: 0,
                last_disconnect_code: None,
            }),
            started: Utc::now(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let inner = self.inner.read();
        StatusSnapshot {
            phase: inner.phase,
            attempts: inner.attempts,
            last_disconnect_code: inner.last_disconnect_code,
            uptime_secs: (Utc::now() - self.started).num_seconds(),
        }
    }

    fn set_phase(&self, phase: Phase) {
        self.inner.write().phase = phase;
    }

    fn on_open(&self) {
        let mut inner = self.inner.write();
        inner.phase = Phase::Open;
        inner.attempts = 0;
    }

    fn on_close(&self, code: Option<u16>) {
        let mut inner = self.inner.write();
        inner.phase = Phase::Closed;
        inner.last_disconnect_code = code;
    }

    fn set_attempts(&self, attempts: u32) {
        self.inner.write().attempts = attempts;
    }
}

pub struct SupervisorConfig {
    pub connect: ConnectConfig,
    pub policy: ReconnectPolicy,
    /// Sent to our own chat on every open; failures are swallowed.
    pub greeting: Option<String>,
    /// Request a pairing code for this phone when connecting unregistered.
    pub pairing_phone: Option<String>,
    /// Log QR payloads when the transport offers them.
    pub show_qr: bool,
}

type ReconnectTimer = Option<Pin<Box<Sleep>>>;

pub struct Supervisor {
    transport: Arc<dyn Transport>,
    config: SupervisorConfig,
    handler: Arc<dyn HandlerModule>,
    status: Arc<StatusBoard>,
    router: EventRouter,
    lifecycle: Option<mpsc::Receiver<ConnectionUpdate>>,
    conn: Option<Arc<dyn Connection>>,
    carry: ChatCache,
    attempts: u32,
    pairing_requested: bool,
}

impl Supervisor {
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionStore>,
        handler: Arc<dyn HandlerModule>,
        status: Arc<StatusBoard>,
        config: SupervisorConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        Self {
            transport,
            config,
            handler,
            status,
            router: EventRouter::new(session, tx),
            lifecycle: Some(rx),
            conn: None,
            carry: ChatCache::new(),
            attempts: 0,
            pairing_requested: false,
        }
    }

    /// Connect and supervise until the caller drops the future (the main
    /// select does, on shutdown). The initial connect failing is a startup
    /// error; after that the loop never returns on its own — even a
    /// terminal disconnect only parks the supervisor, keeping the rest of
    /// the process (plugin reloads, status server) alive.
    pub async fn run(mut self) -> Result<()> {
        let mut lifecycle = self
            .lifecycle
            .take()
            .context("supervisor can only be run once")?;
        self.connect().await.context("initial connect failed")?;

        let mut timer: ReconnectTimer = None;
        loop {
            tokio::select! {
                update = lifecycle.recv() => {
                    // the router keeps a sender alive for the whole run
                    if let Some(update) = update {
                        self.on_update(update, &mut timer).await;
                    }
                }
                () = async { if let Some(sleep) = timer.as_mut() { sleep.as_mut().await } },
                        if timer.is_some() => {
                    timer = None;
                    self.reconnect(&mut timer).await;
                }
            }
        }
    }

    async fn on_update(&mut self, update: ConnectionUpdate, timer: &mut ReconnectTimer) {
        if update.is_new_login {
            tracing::info!("new device login");
        }
        if let Some(qr) = &update.qr {
            if self.config.show_qr {
                tracing::info!(qr = %qr, "scan this QR payload to pair");
            }
        }
        match update.state {
            Some(LinkState::Open) => self.on_open().await,
            Some(LinkState::Close) => {
                let reason = update.disconnect_reason.as_deref().unwrap_or("unknown");
                self.on_close(update.disconnect_code, reason, timer);
            }
            Some(LinkState::Connecting) => self.status.set_phase(Phase::Connecting),
            None => {}
        }
    }

    async fn on_open(&mut self) {
        self.attempts = 0;
        self.status.on_open();
        tracing::info!("connection open");
        let Some(text) = self.config.greeting.clone() else { return };
        let Some(conn) = self.conn.clone() else { return };
        let Some(me) = conn.identity() else { return };
        // best-effort; a failed greeting must not disturb the session
        if let Err(e) = facade::reply(conn.as_ref(), &me.jid, &text, None).await {
            tracing::warn!(error = %e, "greeting send failed");
        }
    }

    fn on_close(&mut self, code: Option<u16>, reason: &str, timer: &mut ReconnectTimer) {
        self.status.on_close(code);
        tracing::warn!(code = ?code, reason, "connection closed");
        match self.config.policy.decide(code, self.attempts) {
            RecoveryAction::Ignore => {
                tracing::warn!(code = ?code, "unclassified disconnect, taking no action");
            }
            RecoveryAction::Abort(why) => {
                tracing::error!(code = ?code, "{why}");
                *timer = None;
                self.router.unbind();
                self.conn = None;
            }
            RecoveryAction::Retry { delay, counted } => {
                if counted {
                    self.attempts += 1;
                    self.status.set_attempts(self.attempts);
                    tracing::warn!(
                        attempt = self.attempts,
                        max = self.config.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "reconnecting with backoff"
                    );
                } else {
                    tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting");
                }
                // replacing the slot drops any earlier pending timer
                *timer = Some(Box::pin(tokio::time::sleep(delay)));
            }
        }
    }

    async fn reconnect(&mut self, timer: &mut ReconnectTimer) {
        self.status.set_phase(Phase::Connecting);
        if let Some(old) = self.conn.take() {
            self.carry = old.chats();
            if let Err(e) = old.close().await {
                tracing::debug!(error = %e, "closing discarded connection");
            }
        }
        if let Err(e) = self.connect().await {
            // a failed dial counts like a transient close
            self.attempts += 1;
            self.status.set_attempts(self.attempts);
            if self.attempts > self.config.policy.max_attempts {
                tracing::error!(error = %e, "reconnect failed and attempt cap reached");
                self.router.unbind();
            } else {
                tracing::warn!(error = %e, attempt = self.attempts, "reconnect failed, retrying");
                *timer = Some(Box::pin(tokio::time::sleep(
                    self.config.policy.base_delay * self.attempts,
                )));
            }
        }
    }

    async fn connect(&mut self) -> Result<()> {
        let carry = std::mem::take(&mut self.carry);
        let conn = self.transport.connect(&self.config.connect, carry).await?;
        self.router.bind(conn.clone(), self.handler.clone());

        if let Some(phone) = self.config.pairing_phone.clone() {
            if conn.identity().is_none() && !self.pairing_requested {
                self.pairing_requested = true;
                match conn.request_pairing_code(&phone).await {
                    Ok(code) => {
                        tracing::info!(code = %util::format_pairing_code(&code), "pairing code");
                    }
                    Err(e) => tracing::warn!(error = %e, "pairing code request failed"),
                }
            }
        }

        self.conn = Some(conn);
        self.status.set_phase(Phase::Connecting);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warble_transport::reason::code;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::default()
    }

    #[test]
    fn terminal_codes_abort() {
        for code in [code::LOGGED_OUT, code::BAD_SESSION, code::REPLACED, code::FORBIDDEN] {
            assert!(
                matches!(policy().decide(Some(code), 0), RecoveryAction::Abort(_)),
                "code {code}"
            );
        }
        assert!(matches!(policy().decide(None, 0), RecoveryAction::Abort(_)));
    }

    #[test]
    fn restart_and_timeout_are_uncounted_fixed_delays() {
        assert_eq!(
            policy().decide(Some(code::RESTART_REQUIRED), 4),
            RecoveryAction::Retry { delay: Duration::from_secs(3), counted: false }
        );
        assert_eq!(
            policy().decide(Some(code::TIMED_OUT), 4),
            RecoveryAction::Retry { delay: Duration::from_secs(2), counted: false }
        );
    }

    #[test]
    fn transient_backoff_is_linear_and_capped() {
        let policy = policy();
        for attempts in 0..5 {
            assert_eq!(
                policy.decide(Some(code::CONNECTION_LOST), attempts),
                RecoveryAction::Retry {
                    delay: Duration::from_secs(3) * (attempts + 1),
                    counted: true,
                }
            );
        }
        assert!(matches!(
            policy.decide(Some(code::CONNECTION_LOST), 5),
            RecoveryAction::Abort(_)
        ));
        assert_eq!(
            policy.decide(Some(code::CONNECTION_CLOSED), 2),
            RecoveryAction::Retry { delay: Duration::from_secs(9), counted: true }
        );
    }

    #[test]
    fn unknown_codes_are_ignored() {
        assert_eq!(policy().decide(Some(999), 0), RecoveryAction::Ignore);
        assert_eq!(policy().decide(Some(0), 3), RecoveryAction::Ignore);
    }

    #[test]
    fn status_board_transitions() {
        let board = StatusBoard::new();
        assert_eq!(board.snapshot().phase, Phase::Connecting);

        board.set_attempts(3);
        board.on_close(Some(code::CONNECTION_LOST));
        let snap = board.snapshot();
        assert_eq!(snap.phase, Phase::Closed);
        assert_eq!(snap.attempts, 3);
        assert_eq!(snap.last_disconnect_code, Some(code::CONNECTION_LOST));

        board.on_open();
        let snap = board.snapshot();
        assert_eq!(snap.phase, Phase::Open);
        assert_eq!(snap.attempts, 0);
    }
}
