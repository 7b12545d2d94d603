use std::env;
use std::time::Duration;

/// What the scope binder does when a node scheduled for destruction is
/// registered again by the same tree position before the destroy task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemountPolicy {
    /// Cancel the pending destroy and keep the node, including its state.
    #[default]
    Preserve,
    /// Destroy the old node right away and construct a fresh one.
    Recreate,
}

/// Runtime-wide defaults. Held by the [`crate::Runtime`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MvcConfig {
    /// Grace delay between an unmount and the node's destruction.
    pub destroy_delay: Duration,
    pub remount_policy: RemountPolicy,
    /// Log a debug line before every re-render triggered by a tracked change.
    pub trace_updates: bool,
}

impl Default for MvcConfig {
    fn default() -> Self {
        Self {
            destroy_delay: Duration::ZERO,
            remount_policy: RemountPolicy::Preserve,
            trace_updates: false,
        }
    }
}

impl MvcConfig {
    /// Reads `EASY_MVC_DESTROY_DELAY_MS`, `EASY_MVC_REMOUNT` and
    /// `EASY_MVC_TRACE_UPDATES`, falling back to the defaults for anything
    /// unset or unparsable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(millis) = env::var("EASY_MVC_DESTROY_DELAY_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
        {
            config.destroy_delay = Duration::from_millis(millis);
        }
        match env::var("EASY_MVC_REMOUNT").ok().as_deref().map(str::trim) {
            Some("recreate") => config.remount_policy = RemountPolicy::Recreate,
            Some("preserve") | None => {}
            Some(other) => log::warn!("ignoring unknown EASY_MVC_REMOUNT value `{other}`"),
        }
        config.trace_updates = env::var("EASY_MVC_TRACE_UPDATES")
            .map(|raw| matches!(raw.trim(), "1" | "true" | "yes"))
            .unwrap_or(false);
        config
    }
}
