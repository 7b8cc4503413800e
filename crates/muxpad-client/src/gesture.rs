//! Gesture translation: wheel, touch, and key events in; scroll commands
//! and raw input bytes out.
//!
//! The translator owns the scroll-mode flag. Scroll mode mirrors the
//! backend's scrollback navigation state: it is only entered by upward
//! gestures (wheel up, upward drag, keyboard paging), and any keystroke
//! that is not scrollback navigation leaves it with a `SCROLL:exit`,
//! consuming that keystroke.

use std::time::Instant;

use muxpad_wire::Command;

use crate::config::GestureTuning;

/// A key press, already normalized by the host from whatever input device
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPress {
    Char(char),
    Ctrl(char),
    Enter,
    ShiftEnter,
    Backspace,
    Tab,
    Esc,
    Up,
    Down,
    Left,
    Right,
    Home,
    End,
    PageUp,
    PageDown,
    Delete,
}

/// Toolbar keys on the virtual keyboard. Each maps to a fixed literal
/// sequence; the directional keys share the scroll-aware path with
/// hardware arrows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualKey {
    Esc,
    Tab,
    CtrlC,
    CtrlD,
    CtrlZ,
    CtrlL,
    CtrlR,
    Slash,
    Dash,
    Pipe,
    Home,
    End,
    Up,
    Down,
    Left,
    Right,
}

impl VirtualKey {
    fn key_press(self) -> KeyPress {
        match self {
            VirtualKey::Esc => KeyPress::Esc,
            VirtualKey::Tab => KeyPress::Tab,
            VirtualKey::CtrlC => KeyPress::Ctrl('c'),
            VirtualKey::CtrlD => KeyPress::Ctrl('d'),
            VirtualKey::CtrlZ => KeyPress::Ctrl('z'),
            VirtualKey::CtrlL => KeyPress::Ctrl('l'),
            VirtualKey::CtrlR => KeyPress::Ctrl('r'),
            VirtualKey::Slash => KeyPress::Char('/'),
            VirtualKey::Dash => KeyPress::Char('-'),
            VirtualKey::Pipe => KeyPress::Char('|'),
            VirtualKey::Home => KeyPress::Home,
            VirtualKey::End => KeyPress::End,
            VirtualKey::Up => KeyPress::Up,
            VirtualKey::Down => KeyPress::Down,
            VirtualKey::Left => KeyPress::Left,
            VirtualKey::Right => KeyPress::Right,
        }
    }
}

/// What a gesture translates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A control command frame.
    Send(Command),
    /// Raw input bytes forwarded verbatim.
    Input(Vec<u8>),
}

/// Convert a key press to the byte sequence the remote program expects.
fn encode_key(key: KeyPress) -> Vec<u8> {
    match key {
        KeyPress::Char(c) => {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf).as_bytes().to_vec()
        }
        KeyPress::Ctrl(c) => {
            // Ctrl+A = 0x01, Ctrl+B = 0x02, etc.
            let code = (c.to_ascii_lowercase() as u8).saturating_sub(b'a' - 1);
            if (1..=26).contains(&code) {
                vec![code]
            } else {
                Vec::new()
            }
        }
        KeyPress::Enter => vec![b'\r'],
        KeyPress::Backspace => vec![0x7f],
        KeyPress::Tab => vec![b'\t'],
        KeyPress::Esc => vec![0x1b],
        KeyPress::Up => vec![0x1b, b'[', b'A'],
        KeyPress::Down => vec![0x1b, b'[', b'B'],
        KeyPress::Right => vec![0x1b, b'[', b'C'],
        KeyPress::Left => vec![0x1b, b'[', b'D'],
        KeyPress::Home => vec![0x1b, b'[', b'H'],
        KeyPress::End => vec![0x1b, b'[', b'F'],
        KeyPress::PageUp => vec![0x1b, b'[', b'5', b'~'],
        KeyPress::PageDown => vec![0x1b, b'[', b'6', b'~'],
        KeyPress::Delete => vec![0x1b, b'[', b'3', b'~'],
        // Soft newline is a control command, never raw bytes.
        KeyPress::ShiftEnter => Vec::new(),
    }
}

struct TouchDrag {
    origin_y: f32,
    last_y: f32,
    last_at: Instant,
    engaged: bool,
    /// Accumulated drag distance not yet turned into whole lines.
    accum_px: f32,
    /// Smoothed velocity in px/ms, positive = upward drag.
    velocity: f32,
}

struct Momentum {
    /// Lines per tick, positive = up.
    velocity: f32,
    next_at: Instant,
}

/// Translates UI gestures into protocol actions. Owns the scroll-mode
/// flag; collaborators read it through `scroll_mode()`.
pub struct GestureTranslator {
    tuning: GestureTuning,
    touch_capable: bool,
    scroll_mode: bool,
    last_scroll_at: Option<Instant>,
    touch: Option<TouchDrag>,
    momentum: Option<Momentum>,
    page_lines: u32,
}

impl GestureTranslator {
    pub fn new(tuning: GestureTuning, touch_capable: bool) -> Self {
        Self {
            tuning,
            touch_capable,
            scroll_mode: false,
            last_scroll_at: None,
            touch: None,
            momentum: None,
            page_lines: 10,
        }
    }

    pub fn scroll_mode(&self) -> bool {
        self.scroll_mode
    }

    /// Track the surface height so keyboard paging scrolls by one screen.
    pub fn set_page_lines(&mut self, rows: u16) {
        self.page_lines = u32::from(rows.saturating_sub(1)).max(1);
    }

    /// Drop gesture state for a fresh connection; the backend's scrollback
    /// mode did not survive the socket.
    pub fn reset(&mut self) {
        self.scroll_mode = false;
        self.last_scroll_at = None;
        self.touch = None;
        self.momentum = None;
    }

    /// Leave scroll mode without a key event (typed text, composition).
    /// Returns true when the caller must emit `SCROLL:exit`.
    pub fn cancel_scroll_mode(&mut self) -> bool {
        self.momentum = None;
        std::mem::take(&mut self.scroll_mode)
    }

    /// Translate a key press.
    pub fn key(&mut self, key: KeyPress) -> Vec<Action> {
        if self.scroll_mode {
            return match key {
                // Arrows navigate scrollback line by line and never reach
                // the raw-byte path while the mode holds.
                KeyPress::Up => vec![Action::Send(Command::ScrollUp(1))],
                KeyPress::Down => vec![Action::Send(Command::ScrollDown(1))],
                // Paging keys stay scrollback navigation as well.
                KeyPress::PageUp => vec![Action::Send(Command::ScrollUp(self.page_lines))],
                KeyPress::PageDown => vec![Action::Send(Command::ScrollDown(self.page_lines))],
                // Anything else leaves the mode; the keystroke itself is a
                // mode gesture and is consumed.
                _ => {
                    self.scroll_mode = false;
                    self.momentum = None;
                    vec![Action::Send(Command::ScrollExit)]
                }
            };
        }

        match key {
            KeyPress::PageUp => {
                self.scroll_mode = true;
                vec![Action::Send(Command::ScrollUp(self.page_lines))]
            }
            KeyPress::ShiftEnter => vec![Action::Send(Command::ShiftEnter)],
            other => {
                let bytes = encode_key(other);
                if bytes.is_empty() {
                    Vec::new()
                } else {
                    vec![Action::Input(bytes)]
                }
            }
        }
    }

    /// Translate a virtual toolbar key.
    pub fn virtual_key(&mut self, key: VirtualKey) -> Vec<Action> {
        self.key(key.key_press())
    }

    /// Translate a wheel event. Positive `delta_y` scrolls down (toward
    /// the live tail); negative scrolls up into history. Only upward
    /// deltas may enter scroll mode.
    pub fn wheel(&mut self, delta_y: f32, now: Instant) -> Vec<Action> {
        if delta_y == 0.0 {
            return Vec::new();
        }
        let lines = (delta_y.abs() * self.tuning.wheel_lines_per_tick)
            .round()
            .max(1.0) as u32;
        match self.scroll_command(delta_y < 0.0, lines, now, true) {
            Some(cmd) => vec![Action::Send(cmd)],
            None => Vec::new(),
        }
    }

    pub fn touch_start(&mut self, _x: f32, y: f32, now: Instant) {
        if !self.touch_capable {
            return;
        }
        // A new finger interrupts any coasting.
        self.momentum = None;
        self.touch = Some(TouchDrag {
            origin_y: y,
            last_y: y,
            last_at: now,
            engaged: false,
            accum_px: 0.0,
            velocity: 0.0,
        });
    }

    pub fn touch_move(&mut self, _x: f32, y: f32, now: Instant) -> Vec<Action> {
        if !self.touch_capable {
            return Vec::new();
        }
        let Some(mut drag) = self.touch.take() else {
            return Vec::new();
        };

        if !drag.engaged {
            if (y - drag.origin_y).abs() < self.tuning.touch_dead_zone_px {
                self.touch = Some(drag);
                return Vec::new();
            }
            drag.engaged = true;
        }

        // Positive = finger moved up = scroll up into history.
        let delta_px = drag.last_y - y;
        let elapsed_ms = now.duration_since(drag.last_at).as_millis() as f32;
        if elapsed_ms > 0.0 {
            let instant_velocity = delta_px / elapsed_ms;
            drag.velocity = drag.velocity * 0.7 + instant_velocity * 0.3;
        }
        drag.accum_px += delta_px;
        drag.last_y = y;
        drag.last_at = now;

        let lines = (drag.accum_px.abs() / self.tuning.touch_px_per_line).floor();
        let mut actions = Vec::new();
        if lines >= 1.0 {
            let up = drag.accum_px > 0.0;
            drag.accum_px -= drag.accum_px.signum() * lines * self.tuning.touch_px_per_line;
            if let Some(cmd) = self.scroll_command(up, lines as u32, now, true) {
                actions.push(Action::Send(cmd));
            }
        }
        self.touch = Some(drag);
        actions
    }

    /// Finger lifted: hand any residual velocity to the momentum loop.
    pub fn touch_end(&mut self, now: Instant) {
        let Some(drag) = self.touch.take() else {
            return;
        };
        if !drag.engaged {
            return;
        }
        let tick_ms = self.tuning.momentum_tick.as_millis() as f32;
        let lines_per_tick = drag.velocity * tick_ms / self.tuning.touch_px_per_line;
        if lines_per_tick.abs() >= self.tuning.momentum_floor {
            self.momentum = Some(Momentum {
                velocity: lines_per_tick,
                next_at: now + self.tuning.momentum_tick,
            });
        }
    }

    /// When the driver should call `momentum_tick` next.
    pub fn momentum_deadline(&self) -> Option<Instant> {
        self.momentum.as_ref().map(|m| m.next_at)
    }

    /// One tick of the decay loop: emit the current velocity as a scroll,
    /// shrink it, and stop once it falls below the floor.
    pub fn momentum_tick(&mut self, now: Instant) -> Vec<Action> {
        let Some(mut momentum) = self.momentum.take() else {
            return Vec::new();
        };
        let lines = momentum.velocity.abs().round().max(1.0) as u32;
        let up = momentum.velocity > 0.0;
        let actions = match self.scroll_command(up, lines, now, false) {
            Some(cmd) => vec![Action::Send(cmd)],
            None => Vec::new(),
        };

        momentum.velocity *= self.tuning.momentum_decay;
        if momentum.velocity.abs() >= self.tuning.momentum_floor {
            momentum.next_at = now + self.tuning.momentum_tick;
            self.momentum = Some(momentum);
        }
        actions
    }

    /// Shared gate for wheel, touch, and momentum scrolls: throttling,
    /// the downward-never-enters rule, and the mode flag itself.
    fn scroll_command(
        &mut self,
        up: bool,
        lines: u32,
        now: Instant,
        throttled: bool,
    ) -> Option<Command> {
        if lines == 0 {
            return None;
        }
        if !up && !self.scroll_mode {
            return None;
        }
        if throttled {
            if let Some(last) = self.last_scroll_at {
                if now.duration_since(last) < self.tuning.scroll_throttle {
                    return None;
                }
            }
        }
        self.last_scroll_at = Some(now);
        if up {
            self.scroll_mode = true;
            Some(Command::ScrollUp(lines))
        } else {
            Some(Command::ScrollDown(lines))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn translator() -> GestureTranslator {
        GestureTranslator::new(GestureTuning::default(), true)
    }

    fn later(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn wheel_up_enters_scroll_mode() {
        let mut g = translator();
        let now = Instant::now();
        let actions = g.wheel(-1.0, now);
        assert_eq!(actions, vec![Action::Send(Command::ScrollUp(3))]);
        assert!(g.scroll_mode());
    }

    #[test]
    fn wheel_down_never_enters_scroll_mode() {
        let mut g = translator();
        let now = Instant::now();
        assert!(g.wheel(1.0, now).is_empty());
        assert!(!g.scroll_mode());

        // Once in scroll mode, downward deltas do scroll.
        g.wheel(-1.0, now);
        let actions = g.wheel(1.0, later(now, 200));
        assert_eq!(actions, vec![Action::Send(Command::ScrollDown(3))]);
        assert!(g.scroll_mode());
    }

    #[test]
    fn wheel_is_throttled() {
        let mut g = translator();
        let now = Instant::now();
        assert!(!g.wheel(-1.0, now).is_empty());
        assert!(g.wheel(-1.0, later(now, 10)).is_empty());
        assert!(!g.wheel(-1.0, later(now, 100)).is_empty());
    }

    #[test]
    fn wheel_magnitude_sets_line_count() {
        let mut g = translator();
        let actions = g.wheel(-2.0, Instant::now());
        assert_eq!(actions, vec![Action::Send(Command::ScrollUp(6))]);
    }

    #[test]
    fn arrows_redirect_while_in_scroll_mode() {
        let mut g = translator();
        g.wheel(-1.0, Instant::now());

        assert_eq!(
            g.key(KeyPress::Up),
            vec![Action::Send(Command::ScrollUp(1))]
        );
        assert_eq!(
            g.key(KeyPress::Down),
            vec![Action::Send(Command::ScrollDown(1))]
        );
        assert!(g.scroll_mode(), "arrows must not clear the mode");
    }

    #[test]
    fn non_arrow_key_exits_and_is_consumed() {
        let mut g = translator();
        g.wheel(-1.0, Instant::now());

        let actions = g.key(KeyPress::Char('q'));
        assert_eq!(actions, vec![Action::Send(Command::ScrollExit)]);
        assert!(!g.scroll_mode());

        // The next keystroke flows to the raw-byte path again.
        assert_eq!(
            g.key(KeyPress::Char('q')),
            vec![Action::Input(b"q".to_vec())]
        );
    }

    #[test]
    fn arrows_outside_scroll_mode_are_raw_bytes() {
        let mut g = translator();
        assert_eq!(
            g.key(KeyPress::Up),
            vec![Action::Input(vec![0x1b, b'[', b'A'])]
        );
        assert_eq!(
            g.key(KeyPress::Down),
            vec![Action::Input(vec![0x1b, b'[', b'B'])]
        );
    }

    #[test]
    fn page_up_enters_page_down_forwards() {
        let mut g = translator();
        g.set_page_lines(24);
        assert_eq!(
            g.key(KeyPress::PageDown),
            vec![Action::Input(vec![0x1b, b'[', b'6', b'~'])]
        );
        assert_eq!(
            g.key(KeyPress::PageUp),
            vec![Action::Send(Command::ScrollUp(23))]
        );
        assert!(g.scroll_mode());
        assert_eq!(
            g.key(KeyPress::PageDown),
            vec![Action::Send(Command::ScrollDown(23))]
        );
    }

    #[test]
    fn shift_enter_is_a_command() {
        let mut g = translator();
        assert_eq!(
            g.key(KeyPress::ShiftEnter),
            vec![Action::Send(Command::ShiftEnter)]
        );
    }

    #[test]
    fn virtual_keys_emit_fixed_sequences() {
        let mut g = translator();
        assert_eq!(
            g.virtual_key(VirtualKey::CtrlC),
            vec![Action::Input(vec![0x03])]
        );
        assert_eq!(
            g.virtual_key(VirtualKey::Esc),
            vec![Action::Input(vec![0x1b])]
        );
        assert_eq!(
            g.virtual_key(VirtualKey::Pipe),
            vec![Action::Input(b"|".to_vec())]
        );
    }

    #[test]
    fn virtual_arrows_share_the_scroll_path() {
        let mut g = translator();
        g.wheel(-1.0, Instant::now());
        assert_eq!(
            g.virtual_key(VirtualKey::Up),
            vec![Action::Send(Command::ScrollUp(1))]
        );
        assert_eq!(
            g.virtual_key(VirtualKey::CtrlC),
            vec![Action::Send(Command::ScrollExit)]
        );
    }

    #[test]
    fn touch_below_dead_zone_is_ignored() {
        let mut g = translator();
        let now = Instant::now();
        g.touch_start(0.0, 100.0, now);
        assert!(g.touch_move(0.0, 95.0, later(now, 10)).is_empty());
        assert!(!g.scroll_mode());
    }

    #[test]
    fn upward_drag_scrolls_up() {
        let mut g = translator();
        let now = Instant::now();
        g.touch_start(0.0, 200.0, now);
        let actions = g.touch_move(0.0, 140.0, later(now, 30));
        assert_eq!(actions, vec![Action::Send(Command::ScrollUp(5))]);
        assert!(g.scroll_mode());
    }

    #[test]
    fn touch_ignored_when_not_capable() {
        let mut g = GestureTranslator::new(GestureTuning::default(), false);
        let now = Instant::now();
        g.touch_start(0.0, 200.0, now);
        assert!(g.touch_move(0.0, 100.0, later(now, 30)).is_empty());
    }

    #[test]
    fn momentum_decays_to_a_stop() {
        let mut g = translator();
        let mut now = Instant::now();
        g.touch_start(0.0, 300.0, now);
        // Fast upward drag to build velocity.
        for step in 1..=5 {
            now = later(now, 100);
            g.touch_move(0.0, 300.0 - (step as f32) * 40.0, now);
        }
        g.touch_end(now);
        assert!(g.momentum_deadline().is_some());

        let mut emitted = 0usize;
        let mut guard = 0usize;
        while let Some(at) = g.momentum_deadline() {
            emitted += usize::from(!g.momentum_tick(at).is_empty());
            guard += 1;
            assert!(guard < 200, "momentum loop never terminated");
        }
        assert!(emitted > 0, "momentum emitted no scrolls");
    }

    #[test]
    fn key_exit_stops_momentum() {
        let mut g = translator();
        let mut now = Instant::now();
        g.touch_start(0.0, 300.0, now);
        for step in 1..=5 {
            now = later(now, 100);
            g.touch_move(0.0, 300.0 - (step as f32) * 40.0, now);
        }
        g.touch_end(now);
        assert!(g.momentum_deadline().is_some());

        g.key(KeyPress::Char('x'));
        assert!(g.momentum_deadline().is_none());
    }
}
