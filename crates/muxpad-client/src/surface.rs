//! Seam to the terminal emulation surface.
//!
//! Rendering is a collaborator, not part of this crate: the link writes
//! raw bytes at it and asks it for its measured size. Anything that can
//! display a byte stream and report cell dimensions can sit behind this
//! trait; tests use an in-memory recorder.

/// The rendering surface a session link writes into.
pub trait EmulationSurface: Send + 'static {
    /// Append raw terminal output.
    fn write(&mut self, bytes: &[u8]);

    /// Wipe the display, used when a reconnected session replays state.
    fn clear(&mut self);

    /// Show an inline client-side notice (upload failures, reconnect
    /// status). Not part of the remote byte stream.
    fn annotate(&mut self, message: &str);

    /// Current cell dimensions as (cols, rows), or `None` while the
    /// surface has not been laid out yet. A (0, 0) answer counts as not
    /// ready.
    fn propose_dimensions(&self) -> Option<(u16, u16)>;
}
