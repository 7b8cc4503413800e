//! Composition bridge for IME and autocomplete-driven typing.
//!
//! Software keyboards do not deliver clean per-key events; instead a
//! shadow text field's value changes and we diff it against what we saw
//! last. Growth forwards the appended substring, shrinkage forwards one
//! delete per removed character. While an IME composition is active the
//! field holds candidate text that must not be forwarded; the diff is
//! deferred until the composition commits.

/// The input to forward after a shadow-value change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDelta {
    /// Characters to erase from the end of what was previously sent.
    pub erase: usize,
    /// Text to append after erasing.
    pub append: String,
}

impl ComposedDelta {
    /// Render as terminal input: one DEL per erased character, then the
    /// appended text.
    pub fn into_bytes(self) -> Vec<u8> {
        let mut bytes = vec![0x7f; self.erase];
        bytes.extend_from_slice(self.append.as_bytes());
        bytes
    }
}

/// Tracks the shadow text field across input and composition events.
#[derive(Debug, Default)]
pub struct ShadowComposer {
    value: String,
    composing: bool,
}

impl ShadowComposer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_composing(&self) -> bool {
        self.composing
    }

    /// The shadow field changed. Returns what to forward, or `None` when
    /// nothing changed or a composition is in flight.
    pub fn input(&mut self, value: &str) -> Option<ComposedDelta> {
        if self.composing {
            // Candidate text; the commit arrives via end_composition.
            return None;
        }
        let delta = diff(&self.value, value);
        self.value = value.to_string();
        delta
    }

    pub fn begin_composition(&mut self) {
        self.composing = true;
    }

    /// Composition committed; diff the final value against the last text
    /// actually forwarded.
    pub fn end_composition(&mut self, value: &str) -> Option<ComposedDelta> {
        self.composing = false;
        let delta = diff(&self.value, value);
        self.value = value.to_string();
        delta
    }

    /// Forget the current value, e.g. after the host clears its field.
    pub fn reset(&mut self) {
        self.value.clear();
        self.composing = false;
    }
}

fn diff(previous: &str, current: &str) -> Option<ComposedDelta> {
    if previous == current {
        return None;
    }
    let common = previous
        .chars()
        .zip(current.chars())
        .take_while(|(a, b)| a == b)
        .count();
    let erase = previous.chars().count() - common;
    let append: String = current.chars().skip(common).collect();
    Some(ComposedDelta { erase, append })
}
