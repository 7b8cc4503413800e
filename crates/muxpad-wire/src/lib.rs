//! muxpad-wire: Control protocol codec for muxpad terminal sessions
//!
//! One WebSocket carries both raw terminal bytes and out-of-band control
//! messages. This crate provides:
//! - `Command`: outbound control commands and their wire encoding
//! - `ControlFrame`: inbound text-frame demultiplexing
//! - `WarningState`: banner state driven by inbound control frames
//!
//! Binary frames never reach this crate; they are raw terminal output and
//! are written straight to the rendering surface by the connection layer.
//!
//! # Usage
//!
//! ```rust
//! use muxpad_wire::{Command, ControlFrame, WarningState};
//!
//! assert_eq!(Command::Resize { cols: 120, rows: 40 }.encode(), "RESIZE:120:40");
//!
//! let mut warnings = WarningState::default();
//! let frame = ControlFrame::parse("MOUSE_WARNING:on").unwrap();
//! warnings.apply(&frame);
//! assert!(warnings.mouse_mode_active);
//! ```

mod command;
mod frame;
mod warning;

pub use command::Command;
pub use frame::{ControlFrame, FrameError};
pub use warning::{BellWarning, WarningState};
