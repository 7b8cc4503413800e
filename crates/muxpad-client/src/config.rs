//! Link configuration: session addressing, reconnect policy, and gesture
//! tuning. Everything a host would want to override is a plain field with
//! a sensible default; nothing is read from ambient globals.

use std::time::Duration;

use url::Url;

use crate::error::LinkError;

/// The (container, session, window) triple a connection addresses.
///
/// Container and session are fixed for the lifetime of one link; the
/// window index only seeds the socket URL and is switched later with
/// `SELECT_WINDOW`, never by reconnecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub container_id: String,
    pub session_name: String,
    pub window_index: u32,
}

/// Exponential backoff schedule for automatic reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
    /// Automatic attempts before the link gives up and waits for an
    /// explicit reconnect tap.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based):
    /// `min(initial_delay * backoff_factor^attempt, max_delay)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        // Cap the exponent so the f64 math cannot overflow to infinity.
        let factor = self.backoff_factor.powi(attempt.min(64) as i32);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether `attempt` automatic retries means the schedule is spent.
    pub fn exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }
}

/// Tuning for the gesture translator.
#[derive(Debug, Clone)]
pub struct GestureTuning {
    /// Minimum interval between forwarded scroll commands.
    pub scroll_throttle: Duration,
    /// Lines per wheel tick of delta magnitude 1.
    pub wheel_lines_per_tick: f32,
    /// Touch movement below this absolute distance is not a scroll.
    pub touch_dead_zone_px: f32,
    /// Touch pixels per scrolled line.
    pub touch_px_per_line: f32,
    /// Momentum loop tick.
    pub momentum_tick: Duration,
    /// Velocity multiplier applied every momentum tick.
    pub momentum_decay: f32,
    /// Momentum stops once velocity (lines per tick) falls below this.
    pub momentum_floor: f32,
}

impl Default for GestureTuning {
    fn default() -> Self {
        Self {
            scroll_throttle: Duration::from_millis(80),
            wheel_lines_per_tick: 3.0,
            touch_dead_zone_px: 10.0,
            touch_px_per_line: 12.0,
            momentum_tick: Duration::from_millis(80),
            momentum_decay: 0.85,
            momentum_floor: 0.5,
        }
    }
}

/// Full configuration for one session link.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Backend base URL (`http://` / `https://`).
    pub server: Url,
    pub target: SessionTarget,
    pub reconnect: ReconnectPolicy,
    pub gesture: GestureTuning,
    /// Whether touch gestures are expected on this device. Injected so the
    /// translator is testable without a real device.
    pub touch_capable: bool,
    /// Hidden time after which foregrounding forces a fresh connection.
    pub visibility_threshold: Duration,
    /// Layout-settling tick; the first dimension announcement waits two of
    /// these so the surface has measured itself.
    pub settle_tick: Duration,
}

impl LinkConfig {
    pub fn new(server: Url, target: SessionTarget) -> Self {
        Self {
            server,
            target,
            reconnect: ReconnectPolicy::default(),
            gesture: GestureTuning::default(),
            touch_capable: false,
            visibility_threshold: Duration::from_secs(3),
            settle_tick: Duration::from_millis(50),
        }
    }

    /// Socket endpoint for the given window index:
    /// `ws(s)://<host>/ws/terminal/<container>/<session>/<window>`.
    pub fn ws_url(&self, window_index: u32) -> Result<Url, LinkError> {
        let mut url = self.server.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(LinkError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| LinkError::InvalidUrl(self.server.to_string()))?;
        let window = window_index.to_string();
        url.path_segments_mut()
            .map_err(|_| LinkError::InvalidUrl(self.server.to_string()))?
            .pop_if_empty()
            .extend([
                "ws",
                "terminal",
                self.target.container_id.as_str(),
                self.target.session_name.as_str(),
                window.as_str(),
            ]);
        Ok(url)
    }

    /// Upload endpoint scoped to the session's container:
    /// `POST /api/v1/containers/<container>/upload-image`.
    pub fn upload_url(&self) -> Result<Url, LinkError> {
        let mut url = self.server.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "http",
            "https" | "wss" => "https",
            other => return Err(LinkError::InvalidUrl(format!("unsupported scheme {other}"))),
        };
        url.set_scheme(scheme)
            .map_err(|_| LinkError::InvalidUrl(self.server.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| LinkError::InvalidUrl(self.server.to_string()))?
            .pop_if_empty()
            .extend([
                "api",
                "v1",
                "containers",
                self.target.container_id.as_str(),
                "upload-image",
            ]);
        Ok(url)
    }
}
