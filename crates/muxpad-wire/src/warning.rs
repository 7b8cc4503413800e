//! Banner state driven by inbound control frames.

use serde::{Deserialize, Serialize};

use crate::frame::ControlFrame;

/// Bell configuration reported by the backend when the session's bell
/// settings are likely to be disruptive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BellWarning {
    #[serde(default)]
    pub bell_action: Option<String>,
    #[serde(default)]
    pub visual_bell: Option<String>,
}

/// Current warning banners. The two banners toggle independently; a frame
/// that touches one never disturbs the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningState {
    /// The running program has mouse reporting enabled, which swallows
    /// scroll gestures.
    pub mouse_mode_active: bool,
    /// Bell configuration warning, if one is active.
    pub bell_warning: Option<BellWarning>,
}

impl WarningState {
    /// Fold one decoded frame into the state. Returns true when anything
    /// visible changed.
    pub fn apply(&mut self, frame: &ControlFrame) -> bool {
        match frame {
            ControlFrame::MouseWarning(active) => {
                let changed = self.mouse_mode_active != *active;
                self.mouse_mode_active = *active;
                changed
            }
            ControlFrame::BellCleared => self.bell_warning.take().is_some(),
            ControlFrame::BellWarning(warning) => {
                let changed = self.bell_warning.as_ref() != Some(warning);
                self.bell_warning = Some(warning.clone());
                changed
            }
            ControlFrame::WindowState | ControlFrame::Literal(_) => false,
        }
    }
}
