//! Inbound text-frame demultiplexing.

use thiserror::Error;

use crate::warning::BellWarning;

/// Errors raised while decoding a recognized control frame.
///
/// Only frames with a known prefix can fail to decode; unknown text is
/// literal terminal output, not an error.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed bell warning payload: {0}")]
    BellPayload(#[from] serde_json::Error),
}

/// A decoded inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// `MOUSE_WARNING:on|off` — the running program grabbed (or released)
    /// mouse reporting.
    MouseWarning(bool),
    /// `BELL_WARNING:ok` — whatever was ringing has been dealt with.
    BellCleared,
    /// `BELL_WARNING:<json>` — the session's bell configuration is likely
    /// to be disruptive on this client.
    BellWarning(BellWarning),
    /// `WINDOW_STATE:<...>` — window layout chatter for other client
    /// types; recognized so it is never mistaken for terminal output.
    WindowState,
    /// Untagged text, treated as literal terminal output for compatibility
    /// with backends that emit plain text frames.
    Literal(String),
}

impl ControlFrame {
    /// Decode one inbound text frame.
    ///
    /// Returns `Err` only for a recognized prefix with an undecodable
    /// payload; callers are expected to drop such frames without touching
    /// any prior warning state.
    pub fn parse(text: &str) -> Result<ControlFrame, FrameError> {
        if let Some(payload) = text.strip_prefix("MOUSE_WARNING:") {
            return Ok(ControlFrame::MouseWarning(payload == "on"));
        }
        if let Some(payload) = text.strip_prefix("BELL_WARNING:") {
            if payload == "ok" {
                return Ok(ControlFrame::BellCleared);
            }
            let warning: BellWarning = serde_json::from_str(payload)?;
            return Ok(ControlFrame::BellWarning(warning));
        }
        if text.starts_with("WINDOW_STATE:") {
            return Ok(ControlFrame::WindowState);
        }
        Ok(ControlFrame::Literal(text.to_string()))
    }
}
