//! Outbound control commands.
//!
//! Each command is one text frame on the session socket, multiplexed with
//! raw input bytes. The backend dispatches on the prefix before the first
//! colon, so raw input is always sent as binary frames to keep typed text
//! that happens to start with a command prefix unambiguous.

/// A control command addressed to the remote session bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Announce terminal dimensions.
    Resize { cols: u16, rows: u16 },
    /// Switch the active remote window without reconnecting.
    SelectWindow(u32),
    /// Scroll the remote pane up by `n` lines.
    ScrollUp(u32),
    /// Scroll the remote pane down by `n` lines.
    ScrollDown(u32),
    /// Leave scrollback navigation.
    ScrollExit,
    /// Soft newline, distinct from Enter.
    ShiftEnter,
    /// Ask the bridge to turn off mouse reporting in the running program.
    DisableMouse,
    /// Ask the bridge to silence the configured bell.
    FixBell,
}

impl Command {
    /// Render the command as its wire text frame.
    pub fn encode(&self) -> String {
        match self {
            Command::Resize { cols, rows } => format!("RESIZE:{}:{}", cols, rows),
            Command::SelectWindow(index) => format!("SELECT_WINDOW:{}", index),
            Command::ScrollUp(n) => format!("SCROLL:up:{}", n),
            Command::ScrollDown(n) => format!("SCROLL:down:{}", n),
            Command::ScrollExit => "SCROLL:exit".to_string(),
            Command::ShiftEnter => "SHIFT_ENTER:".to_string(),
            Command::DisableMouse => "DISABLE_MOUSE:".to_string(),
            Command::FixBell => "FIX_BELL:".to_string(),
        }
    }
}
