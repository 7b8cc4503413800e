//! Terminal attach client for muxpad sessions.
//!
//! Connects the local terminal to a shell pane running inside a managed
//! container: stdout is the emulation surface, crossterm events feed the
//! gesture translator. Detach with Ctrl-Q.

use std::io::Write as IoWrite;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{
    DisableBracketedPaste, DisableMouseCapture, EnableBracketedPaste, EnableMouseCapture, Event,
    EventStream, KeyCode, KeyEventKind, KeyModifiers, MouseEventKind,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::StreamExt;
use tokio::sync::mpsc;
use url::Url;

use muxpad_client::link::{LinkEvent, SessionLink, UiEvent};
use muxpad_client::{
    EmulationSurface, KeyPress, LinkConfig, PastePayload, SessionTarget, WsConnector,
};

#[derive(Parser)]
#[command(name = "muxpad")]
#[command(about = "Terminal session client for container-hosted shells")]
#[command(version)]
struct Cli {
    /// Backend base URL
    #[arg(
        short = 'S',
        long,
        env = "MUXPAD_URL",
        default_value = "http://localhost:8000"
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attach to a session pane
    Attach {
        /// Container ID
        container: String,

        /// Session name
        #[arg(short, long, default_value = "main")]
        session: String,

        /// Initial window index (later switches reuse the socket)
        #[arg(short, long, default_value_t = 0)]
        window: u32,
    },
}

/// The local terminal as an emulation surface: remote bytes go straight
/// to stdout, annotations are set off on their own lines.
struct StdoutSurface;

impl EmulationSurface for StdoutSurface {
    fn write(&mut self, bytes: &[u8]) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(bytes);
        let _ = stdout.flush();
    }

    fn clear(&mut self) {
        self.write(b"\x1b[2J\x1b[H");
    }

    fn annotate(&mut self, message: &str) {
        let mut stdout = std::io::stdout();
        let _ = write!(stdout, "\r\n[muxpad] {message}\r\n");
        let _ = stdout.flush();
    }

    fn propose_dimensions(&self) -> Option<(u16, u16)> {
        crossterm::terminal::size().ok()
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let server = Url::parse(&cli.server)
        .with_context(|| format!("invalid server url: {}", cli.server))?;

    match cli.command {
        Commands::Attach {
            container,
            session,
            window,
        } => attach(server, container, session, window).await,
    }
}

async fn attach(server: Url, container: String, session: String, window: u32) -> Result<()> {
    let cfg = LinkConfig::new(
        server,
        SessionTarget {
            container_id: container,
            session_name: session,
            window_index: window,
        },
    );
    let (link, link_rx) = SessionLink::spawn(cfg, StdoutSurface, WsConnector)
        .context("failed to start session link")?;

    enable_raw_mode().context("failed to enter raw mode")?;
    execute!(
        std::io::stdout(),
        EnableMouseCapture,
        EnableBracketedPaste
    )?;

    let result = pump_events(&link, link_rx).await;

    execute!(
        std::io::stdout(),
        DisableMouseCapture,
        DisableBracketedPaste
    )?;
    disable_raw_mode()?;

    link.dispose();
    link.join().await;

    result
}

/// Forward terminal events to the link until the user detaches.
async fn pump_events(
    link: &SessionLink,
    mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
) -> Result<()> {
    let mut events = EventStream::new();
    let mut exhausted = false;

    loop {
        tokio::select! {
            event = events.next() => {
                let event = match event {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => return Err(e).context("terminal event stream failed"),
                    None => return Ok(()),
                };
                if !forward_event(link, event, exhausted) {
                    return Ok(());
                }
            }
            status = link_rx.recv() => {
                let Some(status) = status else { return Ok(()) };
                match status {
                    // The surface already shows the notice; the next key
                    // press acts as the reconnect tap.
                    LinkEvent::Exhausted => exhausted = true,
                    LinkEvent::Connected { .. } => exhausted = false,
                    LinkEvent::MouseWarning { active } if active => {
                        eprint!("\r\n[muxpad] program enabled mouse reporting; scrolling is captured\r\n");
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Returns false when the user asked to detach.
fn forward_event(link: &SessionLink, event: Event, exhausted: bool) -> bool {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => {
            // Detach chord.
            if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
                return false;
            }
            if exhausted {
                link.send(UiEvent::ReconnectTap);
                return true;
            }
            if let Some(press) = map_key(key.code, key.modifiers) {
                link.send(UiEvent::Key(press));
            }
        }
        Event::Mouse(mouse) => match mouse.kind {
            MouseEventKind::ScrollUp => link.send(UiEvent::Wheel { delta_y: -1.0 }),
            MouseEventKind::ScrollDown => link.send(UiEvent::Wheel { delta_y: 1.0 }),
            _ => {}
        },
        Event::Paste(text) => link.send(UiEvent::Paste(PastePayload {
            text: Some(text),
            image: None,
        })),
        Event::Resize(_, _) => link.send(UiEvent::LayoutChanged),
        Event::FocusGained => link.send(UiEvent::Visible),
        Event::FocusLost => link.send(UiEvent::Hidden),
        _ => {}
    }
    true
}

fn map_key(code: KeyCode, modifiers: KeyModifiers) -> Option<KeyPress> {
    let press = match code {
        KeyCode::Char(c) if modifiers.contains(KeyModifiers::CONTROL) => KeyPress::Ctrl(c),
        KeyCode::Char(c) => KeyPress::Char(c),
        KeyCode::Enter if modifiers.contains(KeyModifiers::SHIFT) => KeyPress::ShiftEnter,
        KeyCode::Enter => KeyPress::Enter,
        KeyCode::Backspace => KeyPress::Backspace,
        KeyCode::Tab => KeyPress::Tab,
        KeyCode::Esc => KeyPress::Esc,
        KeyCode::Up => KeyPress::Up,
        KeyCode::Down => KeyPress::Down,
        KeyCode::Left => KeyPress::Left,
        KeyCode::Right => KeyPress::Right,
        KeyCode::Home => KeyPress::Home,
        KeyCode::End => KeyPress::End,
        KeyCode::PageUp => KeyPress::PageUp,
        KeyCode::PageDown => KeyPress::PageDown,
        KeyCode::Delete => KeyPress::Delete,
        _ => return None,
    };
    Some(press)
}
