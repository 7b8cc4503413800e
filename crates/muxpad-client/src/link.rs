//! Connection lifecycle manager.
//!
//! `SessionLink` owns the socket for one (container, session) target and
//! runs a single driver task: UI events, inbound frames, the reconnect
//! timer, layout-settling ticks, momentum ticks, and upload completions
//! all interleave on one `select!` loop, so every piece of protocol state
//! is mutated from exactly one place. Handlers never block; the only
//! spawned futures are socket pumps and uploads, and both re-enter the
//! loop through channels.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use muxpad_wire::{BellWarning, Command, ControlFrame, WarningState};

use crate::compose::ShadowComposer;
use crate::config::LinkConfig;
use crate::error::{LinkError, UploadError};
use crate::gesture::{Action, GestureTranslator, KeyPress, VirtualKey};
use crate::surface::EmulationSurface;
use crate::transport::{Connection, Connector, Frame, FrameSender};
use crate::upload::{classify_paste, PastePayload, UploadBridge};

/// UI and host events fed into the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A normalized key press from a hardware keyboard.
    Key(KeyPress),
    /// A virtual toolbar key.
    VirtualKey(VirtualKey),
    /// The shadow input field's full value after a change.
    InputValue(String),
    /// An IME composition started.
    CompositionStart,
    /// An IME composition committed with this final field value.
    CompositionEnd(String),
    /// Wheel movement; positive `delta_y` is toward the live tail.
    Wheel { delta_y: f32 },
    TouchStart { x: f32, y: f32 },
    TouchMove { x: f32, y: f32 },
    TouchEnd,
    /// A paste or drop event.
    Paste(PastePayload),
    /// The surface was laid out again and may have new dimensions.
    LayoutChanged,
    /// The host went to the background.
    Hidden,
    /// The host came back to the foreground.
    Visible,
    /// Switch the remote window without reconnecting.
    SwitchWindow(u32),
    /// Explicit user request to reconnect (tap on the dead pane).
    ReconnectTap,
    /// The user accepted the mouse-mode banner's remedy.
    DisableMouse,
    /// The user accepted the bell banner's remedy.
    FixBell,
    /// Tear the link down.
    Dispose,
}

/// Status notifications for the host UI.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected {
        reconnected: bool,
    },
    /// A retry was scheduled after a transport failure.
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
    /// Automatic retries are spent; waiting for a reconnect tap.
    Exhausted,
    MouseWarning {
        active: bool,
    },
    BellWarning {
        warning: Option<BellWarning>,
    },
    UploadFailed {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Connecting,
    Open,
    ReconnectScheduled { at: Instant },
    Exhausted,
    Disposed,
}

/// Two ticks for the surface to settle before the first announcement,
/// then a bounded number of extra ticks while it still reports no size.
struct Settle {
    next_at: Instant,
    mandatory: u8,
    grace: u8,
}

const SETTLE_MANDATORY_TICKS: u8 = 2;
const SETTLE_GRACE_TICKS: u8 = 8;

/// Handle to a running session link. Dropping it (or calling `dispose`)
/// shuts the driver down; the driver releases timers, the momentum loop,
/// and the socket before exiting.
pub struct SessionLink {
    tx: mpsc::UnboundedSender<UiEvent>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SessionLink {
    /// Validate the configuration, start the driver task, and connect.
    /// Returns the handle and the status event stream.
    pub fn spawn<S, C>(
        cfg: LinkConfig,
        surface: S,
        connector: C,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkEvent>), LinkError>
    where
        S: EmulationSurface,
        C: Connector,
    {
        // Surface URL mistakes now, not on the first reconnect.
        cfg.ws_url(cfg.target.window_index)?;
        let upload = UploadBridge::new(cfg.upload_url()?);

        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (upload_tx, upload_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            window_index: cfg.target.window_index,
            gesture: GestureTranslator::new(cfg.gesture.clone(), cfg.touch_capable),
            cfg,
            connector,
            surface,
            events: ui_rx,
            link_tx,
            upload,
            upload_tx,
            upload_rx,
            composer: ShadowComposer::new(),
            warnings: WarningState::default(),
            phase: Phase::Connecting,
            attempt: 0,
            ever_connected: false,
            hidden_since: None,
            last_sent_size: None,
            socket: None,
            inbound: None,
            dial: None,
            settle: None,
        };

        let task = tokio::spawn(driver.run());
        Ok((
            Self {
                tx: ui_tx,
                task: Some(task),
            },
            link_rx,
        ))
    }

    /// Feed one UI event to the driver.
    pub fn send(&self, event: UiEvent) {
        let _ = self.tx.send(event);
    }

    /// A clonable sender for event producers.
    pub fn sender(&self) -> mpsc::UnboundedSender<UiEvent> {
        self.tx.clone()
    }

    /// Tear the link down. Idempotent; safe to call from any state.
    pub fn dispose(&self) {
        let _ = self.tx.send(UiEvent::Dispose);
    }

    /// Wait for the driver task to finish after `dispose`.
    pub async fn join(mut self) {
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionLink {
    fn drop(&mut self) {
        let _ = self.tx.send(UiEvent::Dispose);
    }
}

type DialFuture = futures::future::BoxFuture<'static, Result<Connection, LinkError>>;

struct Driver<S, C> {
    cfg: LinkConfig,
    connector: C,
    surface: S,
    events: mpsc::UnboundedReceiver<UiEvent>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,

    upload: UploadBridge,
    upload_tx: mpsc::UnboundedSender<Result<String, UploadError>>,
    upload_rx: mpsc::UnboundedReceiver<Result<String, UploadError>>,

    gesture: GestureTranslator,
    composer: ShadowComposer,
    warnings: WarningState,

    phase: Phase,
    /// Automatic retries burned since the last success or reconnect tap.
    attempt: u32,
    ever_connected: bool,
    hidden_since: Option<Instant>,
    /// The (cols, rows) pair last actually written to the socket.
    last_sent_size: Option<(u16, u16)>,
    /// Mutable window index; switches rebuild the dial URL but never the
    /// live socket.
    window_index: u32,

    socket: Option<FrameSender>,
    inbound: Option<mpsc::UnboundedReceiver<Frame>>,
    dial: Option<DialFuture>,
    settle: Option<Settle>,
}

enum Step {
    Ui(Option<UiEvent>),
    Frame(Option<Frame>),
    Dialed(Result<Connection, LinkError>),
    Retry,
    Settle,
    Momentum,
    Upload(Result<String, UploadError>),
}

async fn next_inbound(rx: &mut Option<mpsc::UnboundedReceiver<Frame>>) -> Option<Frame> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn poll_dial(dial: &mut Option<DialFuture>) -> Result<Connection, LinkError> {
    match dial {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl<S, C> Driver<S, C>
where
    S: EmulationSurface,
    C: Connector,
{
    async fn run(mut self) {
        self.dial_now("initial connect");

        while self.phase != Phase::Disposed {
            let retry_at = match self.phase {
                Phase::ReconnectScheduled { at } => Some(at),
                _ => None,
            };
            let settle_at = self.settle.as_ref().map(|s| s.next_at);
            let momentum_at = self
                .gesture
                .momentum_deadline()
                .map(Instant::from_std);

            let step = tokio::select! {
                event = self.events.recv() => Step::Ui(event),
                frame = next_inbound(&mut self.inbound) => Step::Frame(frame),
                dialed = poll_dial(&mut self.dial) => Step::Dialed(dialed),
                _ = sleep_until_opt(retry_at) => Step::Retry,
                _ = sleep_until_opt(settle_at) => Step::Settle,
                _ = sleep_until_opt(momentum_at) => Step::Momentum,
                outcome = self.upload_rx.recv() => match outcome {
                    Some(outcome) => Step::Upload(outcome),
                    // We hold a sender clone, so this cannot close.
                    None => continue,
                },
            };

            match step {
                Step::Ui(Some(event)) => self.on_ui_event(event),
                // Every handle is gone; nothing can reach us anymore.
                Step::Ui(None) => self.shutdown(),
                Step::Frame(frame) => self.on_frame(frame),
                Step::Dialed(result) => {
                    self.dial = None;
                    match result {
                        Ok(connection) => self.on_open(connection),
                        Err(e) => {
                            debug!("[link] dial failed: {}", e);
                            self.schedule_retry();
                        }
                    }
                }
                Step::Retry => self.dial_now("backoff timer"),
                Step::Settle => self.on_settle_tick(),
                Step::Momentum => {
                    let actions = self.gesture.momentum_tick(std::time::Instant::now());
                    self.apply(actions);
                }
                Step::Upload(outcome) => self.on_upload_done(outcome),
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open a fresh transport immediately. Any pending retry timer and any
    /// stale in-flight dial are abandoned first, so this is idempotent.
    fn dial_now(&mut self, reason: &str) {
        if self.phase == Phase::Disposed {
            return;
        }
        self.dial = None;
        self.drop_socket();
        self.settle = None;
        self.phase = Phase::Connecting;

        let url = match self.cfg.ws_url(self.window_index) {
            Ok(url) => url,
            // Validated at spawn; only reachable if the config was mutated
            // into something unusable.
            Err(e) => {
                warn!("[link] cannot build socket url: {}", e);
                self.phase = Phase::Exhausted;
                return;
            }
        };
        debug!("[link] connecting to {} ({})", url, reason);
        self.dial = Some(self.connector.connect(url));
    }

    fn on_open(&mut self, connection: Connection) {
        let reconnected = self.ever_connected;
        self.ever_connected = true;
        self.attempt = 0;
        self.phase = Phase::Open;
        self.socket = Some(connection.tx);
        self.inbound = Some(connection.rx);
        self.last_sent_size = None;
        // Scroll mode did not survive the socket; the shadow input field
        // is host state and did, so the composer keeps its value.
        self.gesture.reset();

        if reconnected {
            // The backend replays the pane on attach; start from a clean
            // display so the replay is not appended to stale output.
            self.surface.clear();
            self.surface.annotate("reconnected");
        }

        self.settle = Some(Settle {
            next_at: Instant::now() + self.cfg.settle_tick,
            mandatory: SETTLE_MANDATORY_TICKS,
            grace: SETTLE_GRACE_TICKS,
        });

        self.emit(LinkEvent::Connected { reconnected });
    }

    /// The socket died (close and error are the same thing to us: this
    /// transport always follows an error with a close).
    fn on_closed(&mut self) {
        self.drop_socket();
        self.settle = None;
        if self.phase == Phase::Disposed {
            return;
        }
        self.schedule_retry();
    }

    fn schedule_retry(&mut self) {
        if self.phase == Phase::Disposed {
            return;
        }
        if self.cfg.reconnect.exhausted(self.attempt) {
            self.phase = Phase::Exhausted;
            self.surface
                .annotate("connection lost; tap to reconnect");
            self.emit(LinkEvent::Exhausted);
            return;
        }
        let delay = self.cfg.reconnect.delay_for(self.attempt);
        debug!(
            "[link] retry {} in {:?}",
            self.attempt, delay
        );
        self.emit(LinkEvent::RetryScheduled {
            attempt: self.attempt,
            delay,
        });
        self.attempt += 1;
        self.phase = Phase::ReconnectScheduled {
            at: Instant::now() + delay,
        };
    }

    /// Synchronous, idempotent teardown: timers and the momentum loop die
    /// with their state, the reconnect path is disabled by the phase
    /// change before the socket handle is released, and the loop exits on
    /// the next iteration.
    fn shutdown(&mut self) {
        self.phase = Phase::Disposed;
        self.dial = None;
        self.settle = None;
        self.gesture.reset();
        self.drop_socket();
    }

    fn drop_socket(&mut self) {
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        self.inbound = None;
    }

    fn socket_open(&self) -> bool {
        self.socket.as_ref().is_some_and(|s| s.is_open())
    }

    // ------------------------------------------------------------------
    // UI events
    // ------------------------------------------------------------------

    fn on_ui_event(&mut self, event: UiEvent) {
        let now = std::time::Instant::now();
        match event {
            UiEvent::Key(key) => {
                let actions = self.gesture.key(key);
                self.apply(actions);
            }
            UiEvent::VirtualKey(key) => {
                let actions = self.gesture.virtual_key(key);
                self.apply(actions);
            }
            UiEvent::InputValue(value) => {
                if let Some(delta) = self.composer.input(&value) {
                    self.forward_typed(delta.into_bytes());
                }
            }
            UiEvent::CompositionStart => self.composer.begin_composition(),
            UiEvent::CompositionEnd(value) => {
                if let Some(delta) = self.composer.end_composition(&value) {
                    self.forward_typed(delta.into_bytes());
                }
            }
            UiEvent::Wheel { delta_y } => {
                let actions = self.gesture.wheel(delta_y, now);
                self.apply(actions);
            }
            UiEvent::TouchStart { x, y } => self.gesture.touch_start(x, y, now),
            UiEvent::TouchMove { x, y } => {
                let actions = self.gesture.touch_move(x, y, now);
                self.apply(actions);
            }
            UiEvent::TouchEnd => self.gesture.touch_end(now),
            UiEvent::Paste(payload) => self.on_paste(payload),
            UiEvent::LayoutChanged => {
                if let Some((_, rows)) = self.surface.propose_dimensions() {
                    if rows > 0 {
                        self.gesture.set_page_lines(rows);
                    }
                }
                self.send_resize(false);
            }
            UiEvent::Hidden => self.hidden_since = Some(Instant::now()),
            UiEvent::Visible => self.on_visible(),
            UiEvent::SwitchWindow(index) => self.on_switch_window(index),
            UiEvent::ReconnectTap => {
                if !self.socket_open() {
                    self.attempt = 0;
                    self.dial_now("reconnect tap");
                }
            }
            UiEvent::DisableMouse => {
                self.send_command(Command::DisableMouse);
            }
            UiEvent::FixBell => {
                self.send_command(Command::FixBell);
            }
            UiEvent::Dispose => self.shutdown(),
        }
    }

    /// Foregrounded. A long background gap means the socket is almost
    /// certainly dead even if it still looks open, so dial fresh and skip
    /// the backoff; a short gap with a live socket just re-announces
    /// dimensions in case layout changed while hidden.
    fn on_visible(&mut self) {
        let was_hidden_long = self
            .hidden_since
            .take()
            .is_some_and(|t| t.elapsed() >= self.cfg.visibility_threshold);
        if was_hidden_long || !self.socket_open() {
            self.dial_now("visibility restore");
        } else {
            self.send_resize(true);
        }
    }

    fn on_switch_window(&mut self, index: u32) {
        self.window_index = index;
        if self.socket_open() {
            // Order matters on the shared socket: select first, then the
            // forced announce for the new window's pane.
            self.send_command(Command::SelectWindow(index));
            self.send_resize(true);
        }
        // When the socket is down, the new index seeds the next dial URL.
    }

    fn on_paste(&mut self, payload: PastePayload) {
        match classify_paste(payload) {
            crate::upload::PasteAction::Forward(text) => self.forward_typed(text.into_bytes()),
            crate::upload::PasteAction::Upload(blob) => {
                let bridge = self.upload.clone();
                let done = self.upload_tx.clone();
                tokio::spawn(async move {
                    let _ = done.send(bridge.send(blob).await);
                });
            }
            crate::upload::PasteAction::Ignore => {}
        }
    }

    fn on_upload_done(&mut self, outcome: Result<String, UploadError>) {
        match outcome {
            Ok(path) => {
                if self.socket_open() {
                    self.send_input(path.into_bytes());
                } else {
                    // Stale result; injecting it after a reconnect would
                    // type into the wrong context.
                    debug!("[upload] socket closed; discarding {}", path);
                }
            }
            Err(e) => {
                let message = format!("upload failed: {e}");
                self.surface.annotate(&message);
                self.emit(LinkEvent::UploadFailed { message });
            }
        }
    }

    // ------------------------------------------------------------------
    // Inbound frames
    // ------------------------------------------------------------------

    fn on_frame(&mut self, frame: Option<Frame>) {
        match frame {
            Some(Frame::Binary(bytes)) => self.surface.write(&bytes),
            Some(Frame::Text(text)) => self.on_control_text(&text),
            None => self.on_closed(),
        }
    }

    fn on_control_text(&mut self, text: &str) {
        let frame = match ControlFrame::parse(text) {
            Ok(frame) => frame,
            // Malformed payload on a recognized prefix: drop it, keep the
            // previous banner state.
            Err(e) => {
                debug!("[link] unparseable control frame: {}", e);
                return;
            }
        };
        match &frame {
            ControlFrame::Literal(literal) => self.surface.write(literal.as_bytes()),
            ControlFrame::WindowState => {
                trace!("[link] ignoring window state frame");
            }
            _ => {
                if self.warnings.apply(&frame) {
                    match frame {
                        ControlFrame::MouseWarning(active) => {
                            self.emit(LinkEvent::MouseWarning { active })
                        }
                        ControlFrame::BellCleared => {
                            self.emit(LinkEvent::BellWarning { warning: None })
                        }
                        ControlFrame::BellWarning(warning) => self.emit(LinkEvent::BellWarning {
                            warning: Some(warning),
                        }),
                        _ => {}
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Geometry
    // ------------------------------------------------------------------

    fn on_settle_tick(&mut self) {
        let Some(mut settle) = self.settle.take() else {
            return;
        };
        if settle.mandatory > 0 {
            settle.mandatory -= 1;
            if settle.mandatory > 0 {
                settle.next_at += self.cfg.settle_tick;
                self.settle = Some(settle);
                return;
            }
        }
        match self.surface.propose_dimensions() {
            Some((cols, rows)) if cols > 0 && rows > 0 => {
                self.gesture.set_page_lines(rows);
                self.send_resize(true);
            }
            _ if settle.grace > 0 => {
                settle.grace -= 1;
                settle.next_at += self.cfg.settle_tick;
                self.settle = Some(settle);
            }
            _ => {
                // Geometry sync stays off until the next layout event;
                // input and output keep working regardless.
                debug!("[link] surface never settled; skipping initial resize");
            }
        }
    }

    /// Announce dimensions, deduplicated against the last pair actually
    /// written. Forced sends bypass the dedup at connection boundaries:
    /// first connect, window switch, reconnect, visibility restore.
    fn send_resize(&mut self, forced: bool) {
        let Some((cols, rows)) = self.surface.propose_dimensions() else {
            return;
        };
        if cols == 0 || rows == 0 {
            return;
        }
        if !forced && self.last_sent_size == Some((cols, rows)) {
            return;
        }
        if self.try_send(Frame::Text(Command::Resize { cols, rows }.encode())) {
            self.last_sent_size = Some((cols, rows));
        }
    }

    // ------------------------------------------------------------------
    // Outbound plumbing
    // ------------------------------------------------------------------

    fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(command) => {
                    self.send_command(command);
                }
                Action::Input(bytes) => {
                    self.send_input(bytes);
                }
            }
        }
    }

    /// Typed text (pastes, composition diffs) is real input: it leaves
    /// scroll mode first so the bytes reach the program, not scrollback
    /// navigation.
    fn forward_typed(&mut self, bytes: Vec<u8>) {
        if self.gesture.cancel_scroll_mode() {
            self.send_command(Command::ScrollExit);
        }
        self.send_input(bytes);
    }

    fn send_command(&mut self, command: Command) -> bool {
        self.try_send(Frame::Text(command.encode()))
    }

    fn send_input(&mut self, bytes: Vec<u8>) -> bool {
        if bytes.is_empty() {
            return false;
        }
        self.try_send(Frame::Binary(bytes))
    }

    fn try_send(&mut self, frame: Frame) -> bool {
        match &self.socket {
            Some(socket) if socket.is_open() => socket.send(frame),
            _ => false,
        }
    }

    fn emit(&self, event: LinkEvent) {
        let _ = self.link_tx.send(event);
    }
}
