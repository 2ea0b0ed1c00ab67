use greatpush_core::InstallMode;
use std::time::{Duration, Instant};

/// Decides when a deferred install reloads, driven by host lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeListener {
    mode: InstallMode,
    minimum_background_duration: Duration,
    paused_at: Option<Instant>,
    suspend_deadline: Option<Instant>,
}

impl ResumeListener {
    pub fn new(mode: InstallMode, minimum_background_duration: Duration) -> Self {
        Self {
            mode,
            minimum_background_duration,
            paused_at: None,
            suspend_deadline: None,
        }
    }

    pub fn mode(&self) -> InstallMode {
        self.mode
    }

    pub fn minimum_background_duration(&self) -> Duration {
        self.minimum_background_duration
    }

    /// Later installs override the duration; an armed suspend deadline moves with it.
    pub fn set_minimum_background_duration(&mut self, duration: Duration) {
        self.minimum_background_duration = duration;
        if let (Some(paused_at), Some(_)) = (self.paused_at, self.suspend_deadline) {
            self.suspend_deadline = Some(paused_at + duration);
        }
    }

    pub fn on_pause(&mut self, now: Instant, update_pending: bool) {
        self.paused_at = Some(now);
        if self.mode == InstallMode::OnNextSuspend && update_pending {
            self.suspend_deadline = Some(now + self.minimum_background_duration);
        }
    }

    /// Returns true when the bundle should be reloaded now.
    pub fn on_resume(&mut self, now: Instant) -> bool {
        self.suspend_deadline = None;
        let Some(paused_at) = self.paused_at.take() else {
            // Resume events also fire while already in the foreground.
            return false;
        };
        if self.mode == InstallMode::Immediate {
            return true;
        }
        now.saturating_duration_since(paused_at) >= self.minimum_background_duration
    }

    /// Fires a suspend-mode reload once the app stayed in background long enough.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.suspend_deadline {
            Some(deadline) if now >= deadline => {
                self.suspend_deadline = None;
                true
            }
            _ => false,
        }
    }
}
