//! muxpad-client: resilient WebSocket client for container-hosted
//! terminal sessions.
//!
//! One `SessionLink` owns one duplex socket to a remote shell pane and
//! survives flaky, mobile, backgroundable networks: exponential-backoff
//! reconnects capped by a tap-to-reconnect state, visibility-triggered
//! recovery, deduplicated dimension announcements, a scroll-mode state
//! machine for wheel/touch/arrow navigation, an IME composition bridge,
//! and out-of-band image uploads.
//!
//! The terminal emulator itself is a collaborator behind the
//! [`surface::EmulationSurface`] trait; this crate only moves bytes and
//! control frames. The `muxpad` binary wires a crossterm-backed surface
//! to a link for use from a real terminal.

pub mod compose;
pub mod config;
pub mod error;
pub mod gesture;
pub mod link;
pub mod surface;
pub mod transport;
pub mod upload;

pub use config::{GestureTuning, LinkConfig, ReconnectPolicy, SessionTarget};
pub use error::{LinkError, UploadError};
pub use gesture::{KeyPress, VirtualKey};
pub use link::{LinkEvent, SessionLink, UiEvent};
pub use surface::EmulationSurface;
pub use transport::{Connector, Frame, WsConnector};
pub use upload::{ImageBlob, PastePayload};
