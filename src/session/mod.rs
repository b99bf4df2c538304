//! Device session: bootstrap, background poll thread, and the caller-facing
//! handle.
//!
//! `Session::open` runs the handshake on the calling thread, then hands the
//! transport to a dedicated poll thread. Callers interact only through the
//! action queue, the event outbox and read-only snapshots.

mod bootstrap;
mod executor;
mod poll;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span};
use uuid::Uuid;

use crate::actions::{ActionQueue, QueuedAction};
use crate::config::SessionConfig;
use crate::device::codes::UnitType;
use crate::device::transport::SspTransport;
use crate::error::{ConnectError, InvalidAction, ProtocolError};
use crate::ledger::{InventoryLedger, LedgerSnapshot, Note};
use crate::outbox::{DomainEvent, EventOutbox};

use poll::Controller;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// What the device reported about itself during bootstrap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub unit_type: UnitType,
    pub firmware: String,
    pub protocol_version: u8,
    pub channel_count: usize,
}

/// Result of the most recent stored-count query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteAmount {
    pub note: Note,
    /// `None` when the device did not answer.
    pub count: Option<u16>,
    pub queried_at: DateTime<Utc>,
}

/// Lifecycle of the poll thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Running,
    /// Closed by the owner.
    Stopped,
    /// The poll loop hit a fatal protocol error.
    Failed(ProtocolError),
}

/// State shared between the poll thread and the session handle.
pub(crate) struct Shared {
    pub(crate) actions: ActionQueue,
    pub(crate) outbox: EventOutbox,
    /// Written only by the poll thread.
    pub(crate) ledger: RwLock<InventoryLedger>,
    pub(crate) note_amount: Mutex<Option<NoteAmount>>,
    /// Set while the device reports activity; gates the action queue.
    pub(crate) busy: AtomicBool,
    pub(crate) state: Mutex<SessionState>,
}

impl Shared {
    pub(crate) fn new(default_currency: &str) -> Self {
        Self {
            actions: ActionQueue::new(),
            outbox: EventOutbox::new(),
            ledger: RwLock::new(InventoryLedger::new(default_currency)),
            note_amount: Mutex::new(None),
            // Unknown until the first poll.
            busy: AtomicBool::new(true),
            state: Mutex::new(SessionState::Running),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub(crate) fn last_note_amount(&self) -> Option<NoteAmount> {
        self.note_amount
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn snapshot(&self) -> LedgerSnapshot {
        self.ledger
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }
}

type PollOutcome = Result<(), ProtocolError>;
type PollBody = Box<dyn FnOnce() -> PollOutcome + Send>;

/// Hand `controller` to a new thread running `work`. If the thread cannot
/// be started the controller is taken back and its transport closed.
fn spawn_poll_thread<S, W>(
    controller: Controller,
    spawn: S,
    work: W,
) -> Result<JoinHandle<PollOutcome>, ConnectError>
where
    S: FnOnce(PollBody) -> std::io::Result<JoinHandle<PollOutcome>>,
    W: FnOnce(Controller) -> PollOutcome + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(controller)));
    let handed = Arc::clone(&slot);
    let body: PollBody = Box::new(move || {
        let controller = handed.lock().unwrap_or_else(|e| e.into_inner()).take();
        match controller {
            Some(controller) => work(controller),
            None => Ok(()),
        }
    });

    spawn(body).map_err(|e| {
        tracing::error!(error = %e, "Poll thread failed to start");
        if let Some(mut controller) = slot.lock().unwrap_or_else(|e| e.into_inner()).take() {
            controller.port.close();
        }
        ConnectError::Spawn(e)
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A live connection to one eSSP device.
///
/// Dropping the handle stops the poll thread and closes the transport.
pub struct Session {
    id: Uuid,
    shared: Arc<Shared>,
    device: DeviceInfo,
    stop: CancellationToken,
    done: CancellationToken,
    handle: Option<JoinHandle<Result<(), ProtocolError>>>,
}

impl Session {
    /// Validate `config`, run the handshake over `transport`, and start the
    /// poll thread. On handshake failure the transport is closed before the
    /// error is returned.
    pub fn open<T>(config: SessionConfig, transport: T) -> Result<Self, ConnectError>
    where
        T: SspTransport + 'static,
    {
        config.validate()?;

        let id = Uuid::new_v4();
        let span = info_span!("essp_session", session = %id, port = %config.port);
        let _entered = span.enter();

        let shared = Arc::new(Shared::new(&config.default_currency));
        let mut controller = Controller::new(
            Box::new(transport),
            Arc::clone(&shared),
            config.encryption_key.clone(),
        );

        if let Err(e) = controller.bootstrap(&config) {
            tracing::error!(error = %e, "Session bootstrap failed");
            controller.port.close();
            return Err(e);
        }
        let device = controller.device.clone();

        let stop = CancellationToken::new();
        let done = CancellationToken::new();
        let interval = config.poll_interval();
        let thread_span = span.clone();
        let handle = {
            let stop = stop.clone();
            let done = done.clone();
            let name = format!("essp-poll-{}", config.port);
            spawn_poll_thread(
                controller,
                |body| std::thread::Builder::new().name(name).spawn(body),
                move |controller| {
                    let _entered = thread_span.enter();
                    poll::run(controller, interval, stop, done)
                },
            )?
        };

        info!(
            unit = %device.unit_type,
            version = env!("CARGO_PKG_VERSION"),
            build = crate::BUILD_GIT_SHA,
            "Session opened"
        );
        Ok(Self {
            id,
            shared,
            device,
            stop,
            done,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        !self.done.is_cancelled()
    }

    /// Whether the last poll reported device activity.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    // -- actions -----------------------------------------------------------

    /// Queue an action for the poll thread.
    pub fn enqueue(&self, action: QueuedAction) {
        if self.done.is_cancelled() {
            debug!(action = %action, "Session not running, action will not execute");
        }
        self.shared.actions.enqueue(action);
    }

    pub fn pending_actions(&self) -> usize {
        self.shared.actions.len()
    }

    pub fn enqueue_enable(&self) {
        self.enqueue(QueuedAction::EnableValidator);
    }

    pub fn enqueue_disable(&self) {
        self.enqueue(QueuedAction::DisableValidator);
    }

    pub fn enqueue_update_payout(&self) {
        self.enqueue(QueuedAction::UpdatePayout);
    }

    pub fn enqueue_route_to_cashbox(&self, amount: u64, currency: &str) -> Result<(), InvalidAction> {
        self.enqueue(QueuedAction::route_to_cashbox(amount, currency)?);
        Ok(())
    }

    pub fn enqueue_route_to_storage(&self, amount: u64, currency: &str) -> Result<(), InvalidAction> {
        self.enqueue(QueuedAction::route_to_storage(amount, currency)?);
        Ok(())
    }

    pub fn enqueue_payout(&self, amount: u64, currency: &str) -> Result<(), InvalidAction> {
        self.enqueue(QueuedAction::payout(amount, currency)?);
        Ok(())
    }

    pub fn enqueue_test_payout(&self, amount: u64, currency: &str) -> Result<(), InvalidAction> {
        self.enqueue(QueuedAction::test_payout(amount, currency)?);
        Ok(())
    }

    pub fn enqueue_disable_payout(&self) {
        self.enqueue(QueuedAction::DisablePayout);
    }

    pub fn enqueue_get_note_amount(&self, amount: u64, currency: &str) -> Result<(), InvalidAction> {
        self.enqueue(QueuedAction::get_note_amount(amount, currency)?);
        Ok(())
    }

    pub fn enqueue_empty_storage(&self) {
        self.enqueue(QueuedAction::EmptyStorage);
    }

    pub fn enqueue_configure_bezel(&self, red: u8, green: u8, blue: u8, persist: bool) {
        self.enqueue(QueuedAction::configure_bezel(red, green, blue, persist));
    }

    pub fn enqueue_reset(&self) {
        self.enqueue(QueuedAction::Reset);
    }

    // -- events and reads --------------------------------------------------

    /// Oldest undelivered event, or `None` when the outbox is empty.
    pub fn pull_event(&self) -> Option<DomainEvent> {
        self.shared.outbox.pull()
    }

    /// Wait for the next event. Returns `None` once the poll loop has ended
    /// and the outbox is drained.
    pub async fn next_event(&self) -> Option<DomainEvent> {
        if let Some(event) = self.shared.outbox.pull() {
            return Some(event);
        }
        tokio::select! {
            event = self.shared.outbox.recv() => Some(event),
            _ = self.done.cancelled() => self.shared.outbox.pull(),
        }
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.shared.snapshot()
    }

    pub fn last_note_amount(&self) -> Option<NoteAmount> {
        self.shared.last_note_amount()
    }

    /// Resolves once the poll loop has exited and the transport is closed.
    pub async fn terminated(&self) {
        self.done.cancelled().await;
    }

    /// Stop polling, reject anything in escrow and close the transport.
    /// Returns the error that ended the loop, if it ended on its own.
    pub fn close(mut self) -> Result<(), ProtocolError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), ProtocolError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        self.stop.cancel();
        handle.thread().unpark();
        handle.join().unwrap_or(Err(ProtocolError::LoopPanicked))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.handle.is_some() {
            debug!(session = %self.id, "Session dropped without close");
            let _ = self.shutdown();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
