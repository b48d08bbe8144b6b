//! Warning sink for unexpected-but-recoverable values.
//!
//! The original file format is reverse engineered, so real game files
//! routinely contain values we cannot fully account for. Those are
//! collected here rather than aborting the run; the CLI decides whether
//! to replay them to stderr (`--hide_alerts` suppresses the replay).

/// Collects warning messages for one parse or decompilation run.
///
/// Every warning is also mirrored to `tracing::warn!` at the point of
/// detection, so a subscriber sees them in pipeline order.
#[derive(Debug, Default)]
pub struct Alerts {
    messages: Vec<String>,
}

impl Alerts {
    pub fn new() -> Self {
        Alerts::default()
    }

    /// Record a warning.
    pub fn warn(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::warn!("{}", msg);
        self.messages.push(msg);
    }

    /// All warnings recorded so far, in detection order.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }
}
