//! Companion runtime extension presence

use std::sync::atomic::{AtomicBool, Ordering};

/// Reports whether the companion runtime extension is installed
///
/// Read at call time; the registry never caches the answer itself.
#[cfg_attr(test, mockall::automock)]
pub trait ExtensionPresence: Send + Sync + 'static {
    /// Whether the companion extension is currently installed
    fn is_installed(&self) -> bool;
}

/// Presence flag that can be flipped at runtime
#[derive(Debug, Default)]
pub struct StaticPresence {
    installed: AtomicBool,
}

impl StaticPresence {
    /// Create with initial state
    #[inline]
    #[must_use]
    pub fn new(installed: bool) -> Self {
        Self {
            installed: AtomicBool::new(installed),
        }
    }

    /// Change installed state
    pub fn set_installed(&self, installed: bool) {
        self.installed.store(installed, Ordering::SeqCst);
    }
}

impl ExtensionPresence for StaticPresence {
    fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_presence_flips() {
        let presence = StaticPresence::new(false);
        assert!(!presence.is_installed());
        presence.set_installed(true);
        assert!(presence.is_installed());
    }
}
