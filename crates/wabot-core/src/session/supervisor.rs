//! Connection lifecycle supervisor.
//!
//! The supervisor owns at most one live transport at a time and reacts to the
//! lifecycle events it emits: it rotates pairing tokens that expire unscanned,
//! distinguishes recoverable disconnects from terminal ones, and replaces the
//! transport without ever letting two instances overlap.
//!
//! All mutable session state lives inside a single actor task. Transport
//! events, timer firings and external commands arrive on one input queue, so
//! handlers run strictly sequentially. Timers are spawned sleeps that post
//! back into the queue; a stale pairing timer is cancelled by a generation
//! counter and a stale restart by the `restart_pending` guard. Status reads
//! go through a watch channel and never touch the transport.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use super::state::{ConnectionState, SessionStatus};
use crate::creds::CredentialStore;
use crate::message::{auto_reply, MessageEnvelope};
use crate::transport::{
    CloseStatus, DisconnectReason, LifecycleUpdate, TransportEvent, TransportFactory,
    TransportHandle,
};

/// Buffer for the actor's input queue and per-transport event channels.
const INPUT_BUFFER: usize = 64;

/// Timing knobs for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a pairing token stays scannable before the transport is
    /// recycled to obtain a fresh one.
    pub pairing_expiry: Duration,
    /// Delay before restarting after a recoverable disconnect.
    pub reconnect_delay: Duration,
    /// Settle delay between a credential wipe and the restart that follows.
    pub reset_settle_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            pairing_expiry: Duration::from_secs(40),
            reconnect_delay: Duration::from_secs(8),
            reset_settle_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("no active session")]
    NoActiveSession,

    #[error("supervisor is shut down")]
    ShutDown,
}

/// Input to the supervisor actor.
enum Input {
    /// Event from the transport tagged `instance`.
    Transport { instance: u64, event: TransportEvent },
    /// The pairing-expiry timer armed for (`instance`, `generation`) fired.
    PairingExpired { instance: u64, generation: u64 },
    /// A scheduled restart came due.
    RestartDue,
    /// External logout request.
    Logout(oneshot::Sender<Result<(), SupervisorError>>),
    /// Stop the actor, tearing down any live transport.
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running [`Supervisor`].
#[derive(Clone)]
pub struct SupervisorHandle {
    input: mpsc::Sender<Input>,
    status: watch::Receiver<SessionStatus>,
}

impl SupervisorHandle {
    /// Snapshot of `{state, pairing_token}`. Never blocks.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Watch receiver for status changes.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Request a protocol-level logout of the live session.
    ///
    /// The logout completes asynchronously: the service closes the connection
    /// with an auth-terminal status, which wipes the persisted credentials
    /// and restarts into pairing.
    pub async fn logout(&self) -> Result<(), SupervisorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.input
            .send(Input::Logout(reply_tx))
            .await
            .map_err(|_| SupervisorError::ShutDown)?;
        reply_rx.await.map_err(|_| SupervisorError::ShutDown)?
    }

    /// Stop the supervisor, terminating any live transport.
    pub async fn shutdown(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.input.send(Input::Shutdown(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }
}

/// The session supervisor actor.
///
/// Constructed only through [`Supervisor::spawn`], which starts the event
/// loop on the current tokio runtime and hands back a [`SupervisorHandle`].
pub struct Supervisor {
    factory: Arc<dyn TransportFactory>,
    store: Arc<dyn CredentialStore>,
    config: SupervisorConfig,

    /// Sender side of our own input queue, cloned into timer tasks.
    input: mpsc::Sender<Input>,
    status: watch::Sender<SessionStatus>,

    state: ConnectionState,
    pairing_token: Option<String>,
    /// The single live transport. `None` between a closed event and the next
    /// start, and permanently in `LoggedOut`.
    transport: Option<TransportHandle>,
    /// Id of the current transport; events tagged with an older id are from
    /// a superseded instance and are dropped.
    instance: u64,
    /// Bumped to cancel an armed pairing-expiry timer.
    pairing_generation: u64,
    /// Guard against overlapping scheduled restarts.
    restart_pending: bool,
    /// Set by `logout()`; turns the next auth-terminal close into a
    /// credential wipe + restart instead of a dead end.
    force_credential_reset: bool,
}

impl Supervisor {
    /// Spawn a supervisor and immediately start its first transport.
    pub fn spawn(
        factory: Arc<dyn TransportFactory>,
        store: Arc<dyn CredentialStore>,
        config: SupervisorConfig,
    ) -> SupervisorHandle {
        let (input_tx, input_rx) = mpsc::channel(INPUT_BUFFER);
        let (status_tx, status_rx) = watch::channel(SessionStatus::default());

        let supervisor = Supervisor {
            factory,
            store,
            config,
            input: input_tx.clone(),
            status: status_tx,
            state: ConnectionState::Starting,
            pairing_token: None,
            transport: None,
            instance: 0,
            pairing_generation: 0,
            restart_pending: false,
            force_credential_reset: false,
        };
        tokio::spawn(supervisor.run(input_rx));

        SupervisorHandle {
            input: input_tx,
            status: status_rx,
        }
    }

    async fn run(mut self, mut input: mpsc::Receiver<Input>) {
        self.start();
        while let Some(event) = input.recv().await {
            match event {
                Input::Transport { instance, event } => self.on_transport_event(instance, event),
                Input::PairingExpired {
                    instance,
                    generation,
                } => self.on_pairing_expired(instance, generation),
                Input::RestartDue => self.on_restart_due(),
                Input::Logout(reply) => {
                    let _ = reply.send(self.logout());
                }
                Input::Shutdown(reply) => {
                    if let Some(transport) = self.transport.take() {
                        let _ = transport.terminate();
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    /// Create a new transport bound to the persisted credential bundle.
    ///
    /// Refuses while a previous transport is still live: a replacement may
    /// only be created after the old instance's closed event was observed.
    fn start(&mut self) {
        self.restart_pending = false;
        if self.transport.is_some() {
            log::warn!("start requested while a transport is still live; ignoring");
            return;
        }

        self.instance += 1;
        self.pairing_token = None;
        self.set_state(ConnectionState::Starting);

        let creds = match self.store.load() {
            Ok(creds) => creds,
            Err(err) => {
                log::error!("failed to load credential bundle, starting unauthenticated: {err}");
                None
            }
        };

        let (event_tx, mut event_rx) = mpsc::channel(INPUT_BUFFER);
        let instance = self.instance;
        let input = self.input.clone();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if input.send(Input::Transport { instance, event }).await.is_err() {
                    break;
                }
            }
        });

        match self.factory.create(creds, event_tx) {
            Ok(handle) => {
                log::info!("transport #{instance} created");
                self.transport = Some(handle);
            }
            Err(err) => {
                // Same backoff path as a recoverable disconnect.
                log::error!("failed to create transport: {err}");
                self.set_state(ConnectionState::Reconnecting);
                self.schedule_restart(self.config.reconnect_delay);
            }
        }
    }

    fn on_transport_event(&mut self, instance: u64, event: TransportEvent) {
        if instance != self.instance {
            log::debug!("dropping event from superseded transport #{instance}");
            return;
        }
        match event {
            TransportEvent::Credentials(bundle) => {
                // The in-memory bundle stays authoritative for this process
                // lifetime even if the write fails; the failure only risks a
                // re-pairing after a restart.
                if let Err(err) = self.store.save(&bundle) {
                    log::error!("failed to persist credential bundle: {err}");
                }
            }
            TransportEvent::Message(envelope) => self.on_inbound_message(envelope),
            TransportEvent::Lifecycle(update) => self.on_lifecycle(update),
        }
    }

    /// Core transition function for lifecycle updates.
    fn on_lifecycle(&mut self, update: LifecycleUpdate) {
        if let Some(token) = update.pairing_token {
            // A token while Connected shouldn't happen, but the token wins:
            // re-arm pairing state rather than treat it as an error.
            log::info!("pairing token issued; waiting for scan");
            self.pairing_token = Some(token);
            self.arm_pairing_timer();
            self.set_state(ConnectionState::Pairing);
        }

        if update.connected {
            if self.state == ConnectionState::Connected {
                log::debug!("duplicate connected signal");
            } else {
                log::info!("session connected");
                self.pairing_token = None;
                self.pairing_generation += 1; // cancel the expiry timer
                self.set_state(ConnectionState::Connected);
            }
        }

        if let Some(status) = update.closed {
            self.on_closed(status);
        }
    }

    fn on_closed(&mut self, status: CloseStatus) {
        if self.transport.is_none() {
            log::debug!("duplicate closed signal");
            return;
        }
        self.transport = None;
        self.pairing_token = None;
        self.pairing_generation += 1;

        match status.reason() {
            DisconnectReason::AuthTerminal if self.force_credential_reset => {
                // The only path that destroys durable credentials.
                log::info!("logged out; wiping persisted credentials for re-pairing");
                if let Err(err) = self.store.wipe() {
                    log::error!("failed to wipe credential bundle: {err}");
                }
                self.force_credential_reset = false;
                self.set_state(ConnectionState::Starting);
                self.schedule_restart(self.config.reset_settle_delay);
            }
            DisconnectReason::AuthTerminal => {
                log::warn!(
                    "connection closed with status {:?}: credentials rejected, not reconnecting",
                    status.code
                );
                self.set_state(ConnectionState::LoggedOut);
            }
            DisconnectReason::Recoverable => {
                log::info!("connection closed with status {:?}; reconnecting", status.code);
                self.set_state(ConnectionState::Reconnecting);
                self.schedule_restart(self.config.reconnect_delay);
            }
        }
    }

    fn on_pairing_expired(&mut self, instance: u64, generation: u64) {
        if instance != self.instance || generation != self.pairing_generation {
            return; // cancelled: token was replaced or the session connected
        }
        if self.state != ConnectionState::Pairing {
            return;
        }
        log::info!("pairing token expired unscanned; recycling transport for a fresh one");
        if let Some(transport) = &self.transport {
            if let Err(err) = transport.terminate() {
                log::warn!("failed to terminate transport after pairing expiry: {err}");
            }
        }
    }

    fn on_restart_due(&mut self) {
        if !self.restart_pending {
            return;
        }
        log::info!("restarting transport");
        self.start();
    }

    fn on_inbound_message(&self, envelope: MessageEnvelope) {
        let Some(text) = envelope.extract_text() else {
            return;
        };
        let Some(reply) = auto_reply(text) else {
            return;
        };
        let Some(transport) = &self.transport else {
            return;
        };
        // Best-effort: a failed reply is logged, never escalated.
        if let Err(err) = transport.send_text(&envelope.chat_id, reply) {
            log::warn!("failed to send auto-reply to {}: {err}", envelope.chat_id);
        }
    }

    fn logout(&mut self) -> Result<(), SupervisorError> {
        let transport = self
            .transport
            .as_ref()
            .ok_or(SupervisorError::NoActiveSession)?;
        if transport.logout().is_err() {
            return Err(SupervisorError::NoActiveSession);
        }
        self.force_credential_reset = true;
        log::info!("logout requested; waiting for the service to confirm");
        Ok(())
    }

    fn arm_pairing_timer(&mut self) {
        self.pairing_generation += 1;
        let instance = self.instance;
        let generation = self.pairing_generation;
        let expiry = self.config.pairing_expiry;
        let input = self.input.clone();
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            let _ = input
                .send(Input::PairingExpired {
                    instance,
                    generation,
                })
                .await;
        });
    }

    fn schedule_restart(&mut self, delay: Duration) {
        if self.restart_pending {
            log::debug!("restart already scheduled");
            return;
        }
        self.restart_pending = true;
        let input = self.input.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = input.send(Input::RestartDue).await;
        });
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.status.send_replace(SessionStatus {
            state: self.state,
            pairing_token: self.pairing_token.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::creds::{CredentialBundle, CredentialError};
    use crate::transport::{CloseStatus, TransportCommand, TransportError};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// Records the relative order of transport creations and credential
    /// wipes, so tests can assert a wipe lands before the restart it gates.
    type Journal = Arc<Mutex<Vec<&'static str>>>;

    struct TestTransport {
        events: mpsc::Sender<TransportEvent>,
        commands: Mutex<mpsc::UnboundedReceiver<TransportCommand>>,
    }

    struct TestFactory {
        created: Mutex<Vec<TestTransport>>,
        fail_next: AtomicBool,
        journal: Journal,
    }

    impl TestFactory {
        fn new(journal: Journal) -> Arc<Self> {
            Arc::new(Self {
                created: Mutex::new(Vec::new()),
                fail_next: AtomicBool::new(false),
                journal,
            })
        }

        fn count(&self) -> usize {
            self.created.lock().unwrap().len()
        }

        async fn emit(&self, index: usize, event: TransportEvent) {
            let events = self.created.lock().unwrap()[index].events.clone();
            events.send(event).await.unwrap();
        }

        fn drain_commands(&self, index: usize) -> Vec<TransportCommand> {
            let created = self.created.lock().unwrap();
            let mut rx = created[index].commands.lock().unwrap();
            let mut commands = Vec::new();
            while let Ok(command) = rx.try_recv() {
                commands.push(command);
            }
            commands
        }
    }

    impl TransportFactory for TestFactory {
        fn create(
            &self,
            _creds: Option<CredentialBundle>,
            events: mpsc::Sender<TransportEvent>,
        ) -> Result<TransportHandle, TransportError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            self.journal.lock().unwrap().push("create");
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            self.created.lock().unwrap().push(TestTransport {
                events,
                commands: Mutex::new(command_rx),
            });
            Ok(TransportHandle::new(command_tx))
        }
    }

    struct TestStore {
        saves: Mutex<Vec<CredentialBundle>>,
        wipes: Mutex<usize>,
        journal: Journal,
    }

    impl TestStore {
        fn new(journal: Journal) -> Arc<Self> {
            Arc::new(Self {
                saves: Mutex::new(Vec::new()),
                wipes: Mutex::new(0),
                journal,
            })
        }

        fn wipe_count(&self) -> usize {
            *self.wipes.lock().unwrap()
        }
    }

    impl CredentialStore for TestStore {
        fn load(&self) -> Result<Option<CredentialBundle>, CredentialError> {
            Ok(None)
        }

        fn save(&self, bundle: &CredentialBundle) -> Result<(), CredentialError> {
            self.saves.lock().unwrap().push(bundle.clone());
            Ok(())
        }

        fn wipe(&self) -> Result<(), CredentialError> {
            self.journal.lock().unwrap().push("wipe");
            *self.wipes.lock().unwrap() += 1;
            Ok(())
        }
    }

    struct Fixture {
        factory: Arc<TestFactory>,
        store: Arc<TestStore>,
        journal: Journal,
        handle: SupervisorHandle,
    }

    /// Spawn a supervisor with the default (production) timings and wait for
    /// its first transport. Tests run under a paused clock, so real-length
    /// sleeps auto-advance instantly and in order.
    async fn fixture() -> Fixture {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let factory = TestFactory::new(journal.clone());
        let store = TestStore::new(journal.clone());
        let handle = Supervisor::spawn(
            factory.clone(),
            store.clone(),
            SupervisorConfig::default(),
        );
        settle().await;
        assert_eq!(factory.count(), 1);
        Fixture {
            factory,
            store,
            journal,
            handle,
        }
    }

    /// Let the actor drain its queues without advancing the clock.
    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn closed(code: Option<u16>) -> TransportEvent {
        TransportEvent::Lifecycle(LifecycleUpdate::closed(CloseStatus { code }))
    }

    fn message(chat_id: &str, text: &str) -> TransportEvent {
        TransportEvent::Message(MessageEnvelope {
            chat_id: chat_id.to_string(),
            text: Some(text.to_string()),
            extended_text: None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_start_pairs_then_connects() {
        let fx = fixture().await;
        assert_eq!(fx.handle.status().state, ConnectionState::Starting);

        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::pairing("abc")))
            .await;
        settle().await;
        let status = fx.handle.status();
        assert_eq!(status.state, ConnectionState::Pairing);
        assert!(!status.connected());
        assert_eq!(status.pairing_token.as_deref(), Some("abc"));

        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        settle().await;
        let status = fx.handle.status();
        assert_eq!(status.state, ConnectionState::Connected);
        assert!(status.connected());
        assert!(status.pairing_token.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn auth_terminal_close_parks_without_restart() {
        let fx = fixture().await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        fx.factory.emit(0, closed(Some(401))).await;
        settle().await;
        assert_eq!(fx.handle.status().state, ConnectionState::LoggedOut);

        // Well past any backoff: still exactly one transport, nothing wiped.
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 1);
        assert_eq!(fx.store.wipe_count(), 0);
        assert_eq!(fx.handle.status().state, ConnectionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn recoverable_close_restarts_after_backoff() {
        let fx = fixture().await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        fx.factory.emit(0, closed(Some(1006))).await;
        settle().await;
        assert_eq!(fx.handle.status().state, ConnectionState::Reconnecting);
        assert_eq!(fx.factory.count(), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 2);
        assert_eq!(fx.handle.status().state, ConnectionState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn close_without_code_is_recoverable() {
        let fx = fixture().await;
        fx.factory.emit(0, closed(None)).await;
        settle().await;
        assert_eq!(fx.handle.status().state, ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_closed_schedules_single_restart() {
        let fx = fixture().await;
        fx.factory.emit(0, closed(Some(1006))).await;
        fx.factory.emit(0, closed(Some(1006))).await;
        settle().await;

        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 2);

        // No second restart hiding behind the first.
        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pairing_expiry_forces_single_termination() {
        let fx = fixture().await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::pairing("abc")))
            .await;
        settle().await;

        tokio::time::sleep(Duration::from_secs(41)).await;
        settle().await;
        assert_eq!(fx.factory.drain_commands(0), vec![TransportCommand::Terminate]);
        assert_eq!(fx.store.wipe_count(), 0);

        // The transport obeys and closes; a fresh one brings a fresh token.
        fx.factory.emit(0, closed(None)).await;
        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connected_cancels_pairing_expiry() {
        let fx = fixture().await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::pairing("abc")))
            .await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        settle().await;
        assert!(fx.handle.status().pairing_token.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert!(fx.factory.drain_commands(0).is_empty());
        assert_eq!(fx.handle.status().state, ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn token_while_connected_rearms_pairing() {
        let fx = fixture().await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::pairing("late")))
            .await;
        settle().await;
        let status = fx.handle.status();
        assert_eq!(status.state, ConnectionState::Pairing);
        assert_eq!(status.pairing_token.as_deref(), Some("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_without_transport_is_no_active_session() {
        let fx = fixture().await;
        fx.factory.emit(0, closed(Some(401))).await;
        settle().await;

        assert_eq!(
            fx.handle.logout().await,
            Err(SupervisorError::NoActiveSession)
        );
        assert_eq!(fx.handle.status().state, ConnectionState::LoggedOut);
        assert_eq!(fx.store.wipe_count(), 0);
        tokio::time::sleep(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logout_wipes_credentials_before_restart() {
        let fx = fixture().await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        settle().await;

        fx.handle.logout().await.unwrap();
        assert_eq!(fx.factory.drain_commands(0), vec![TransportCommand::Logout]);

        // The service confirms the logout by closing with 401.
        fx.factory.emit(0, closed(Some(401))).await;
        settle().await;
        assert_eq!(fx.store.wipe_count(), 1);
        assert_eq!(fx.handle.status().state, ConnectionState::Starting);

        tokio::time::sleep(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 2);
        assert_eq!(*fx.journal.lock().unwrap(), vec!["create", "wipe", "create"]);
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_auth_close_never_wipes() {
        let fx = fixture().await;
        fx.factory.emit(0, closed(Some(401))).await;
        settle().await;
        assert_eq!(fx.store.wipe_count(), 0);
        assert_eq!(fx.handle.status().state, ConnectionState::LoggedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn credential_updates_are_forwarded_in_order() {
        let fx = fixture().await;
        let first = CredentialBundle::new(serde_json::json!({ "epoch": 1 }));
        let second = CredentialBundle::new(serde_json::json!({ "epoch": 2 }));
        fx.factory
            .emit(0, TransportEvent::Credentials(first.clone()))
            .await;
        fx.factory
            .emit(0, TransportEvent::Credentials(second.clone()))
            .await;
        settle().await;
        assert_eq!(*fx.store.saves.lock().unwrap(), vec![first, second]);
    }

    #[tokio::test(start_paused = true)]
    async fn ping_gets_exactly_one_reply() {
        let fx = fixture().await;
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        fx.factory.emit(0, message("123@chat", "ping")).await;
        settle().await;
        assert_eq!(
            fx.factory.drain_commands(0),
            vec![TransportCommand::SendText {
                chat_id: "123@chat".to_string(),
                text: crate::message::REPLY_TEXT.to_string(),
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keyword_match_ignores_case() {
        let fx = fixture().await;
        fx.factory.emit(0, message("123@chat", "PING")).await;
        settle().await;
        assert_eq!(fx.factory.drain_commands(0).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn other_text_gets_no_reply() {
        let fx = fixture().await;
        fx.factory.emit(0, message("123@chat", "hello")).await;
        fx.factory.emit(0, message("123@chat", "ping!")).await;
        settle().await;
        assert!(fx.factory.drain_commands(0).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_events_from_replaced_transport_are_dropped() {
        let fx = fixture().await;
        fx.factory.emit(0, closed(Some(1006))).await;
        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(fx.factory.count(), 2);

        fx.factory
            .emit(1, TransportEvent::Lifecycle(LifecycleUpdate::pairing("xyz")))
            .await;
        settle().await;
        assert_eq!(fx.handle.status().state, ConnectionState::Pairing);

        // The dead transport speaks up late; nothing may change.
        fx.factory
            .emit(0, TransportEvent::Lifecycle(LifecycleUpdate::connected()))
            .await;
        settle().await;
        let status = fx.handle.status();
        assert_eq!(status.state, ConnectionState::Pairing);
        assert_eq!(status.pairing_token.as_deref(), Some("xyz"));
    }

    #[tokio::test(start_paused = true)]
    async fn create_failure_retries_via_backoff() {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let factory = TestFactory::new(journal.clone());
        let store = TestStore::new(journal);
        factory.fail_next.store(true, Ordering::SeqCst);

        let handle = Supervisor::spawn(factory.clone(), store, SupervisorConfig::default());
        settle().await;
        assert_eq!(factory.count(), 0);
        assert_eq!(handle.status().state, ConnectionState::Reconnecting);

        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;
        assert_eq!(factory.count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_terminates_transport() {
        let fx = fixture().await;
        fx.handle.shutdown().await;
        assert_eq!(fx.factory.drain_commands(0), vec![TransportCommand::Terminate]);
        assert_eq!(fx.handle.logout().await, Err(SupervisorError::ShutDown));
    }
}
