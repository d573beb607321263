//! Completion detection and command-dialect heuristics.
//!
//! Device shells signal readiness with a trailing prompt character and
//! occasionally interject confirmation questions. Both sets are held in a
//! [`CompletionPredicate`] so device-specific dialects can be swapped in
//! without touching the session read loop. Likewise the knowledge of which
//! commands switch device modes or run slowly lives in [`CommandClass`], not
//! scattered through the loop.

use std::time::Duration;

use regex::bytes::Regex;

/// Prompt characters emitted by the shells this crate targets.
pub const DEFAULT_TERMINATORS: &[u8] = b">#]$";

/// Confirmation phrases answered automatically with `Y`.
pub const DEFAULT_CONFIRMATIONS: &[&str] = &["[Y/N]", "[YES/NO]", "CONTINUE?"];

/// Strategy for deciding when a read loop may stop.
#[derive(Debug, Clone)]
pub struct CompletionPredicate {
    terminators: Vec<u8>,
    confirmation: Regex,
}

impl CompletionPredicate {
    /// Build a predicate from a terminator set and confirmation phrases.
    /// Phrase matching is case-insensitive.
    pub fn new(terminators: &[u8], confirmations: &[&str]) -> Result<Self, regex::Error> {
        let alternation = confirmations
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        Ok(Self {
            terminators: terminators.to_vec(),
            confirmation: Regex::new(&format!("(?i){alternation}"))?,
        })
    }

    /// True if any prompt terminator appears in `data`.
    pub fn prompt_seen(&self, data: &[u8]) -> bool {
        self.terminators
            .iter()
            .any(|&t| memchr::memchr(t, data).is_some())
    }

    /// True if a confirmation question appears in `data`.
    pub fn needs_confirmation(&self, data: &[u8]) -> bool {
        self.confirmation.is_match(data)
    }
}

impl Default for CompletionPredicate {
    fn default() -> Self {
        // The default sets contain no regex metacharacters once escaped.
        Self::new(DEFAULT_TERMINATORS, DEFAULT_CONFIRMATIONS)
            .expect("default completion predicate must compile")
    }
}

/// Device-dialect classification of a command line.
///
/// Mode switches and destructive commands produce output asynchronously
/// relative to the prompt, so they get larger wait budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    /// Enters privileged/system-configuration mode. Exactly `sy` or
    /// `system-view`; only these get the prompt nudge and toggle the
    /// privileged-mode flag.
    ModeEnter,

    /// Leaves privileged mode (`quit`).
    ModeExit,

    /// Slow or destructive (`reset`, `reboot`, `save`).
    Destructive,

    /// Other `sys*` commands (`sysname`, ...). Slow to answer, but not mode
    /// switches: extended wait only.
    System,

    /// Everything else.
    Plain,
}

impl CommandClass {
    pub fn classify(command: &str) -> Self {
        let lower = command.trim().to_ascii_lowercase();
        if lower == "sy" || lower == "system-view" {
            CommandClass::ModeEnter
        } else if lower.starts_with("sys") {
            CommandClass::System
        } else if lower == "quit" {
            CommandClass::ModeExit
        } else if ["reset", "reboot", "save"].iter().any(|k| lower.contains(k)) {
            CommandClass::Destructive
        } else {
            CommandClass::Plain
        }
    }

    /// How long the read loop waits for this command to complete.
    pub fn wait_budget(self) -> Duration {
        match self {
            CommandClass::ModeEnter | CommandClass::System => Duration::from_secs(5),
            CommandClass::Destructive => Duration::from_secs(10),
            CommandClass::ModeExit | CommandClass::Plain => Duration::from_secs(3),
        }
    }
}

/// Pause applied after a command before the next one is sent.
///
/// Slow control planes drop input sent immediately after a mode switch or a
/// `save`; these delays model real device latency and are required for
/// correctness, not cosmetics.
pub fn settle_delay(command: &str, in_privileged_mode: bool) -> Duration {
    let lower = command.trim().to_ascii_lowercase();
    if lower == "sy" || lower == "system-view" {
        Duration::from_secs(2)
    } else if lower.contains("save") {
        Duration::from_secs(5)
    } else if in_privileged_mode {
        Duration::from_secs(1)
    } else {
        Duration::from_millis(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_seen() {
        let predicate = CompletionPredicate::default();
        assert!(predicate.prompt_seen(b"<Switch>"));
        assert!(predicate.prompt_seen(b"[SW-1]"));
        assert!(predicate.prompt_seen(b"router#"));
        assert!(predicate.prompt_seen(b"login$ "));
        assert!(!predicate.prompt_seen(b"loading configuration..."));
    }

    #[test]
    fn test_confirmation_case_insensitive() {
        let predicate = CompletionPredicate::default();
        assert!(predicate.needs_confirmation(b"Save configuration? [Y/N]:"));
        assert!(predicate.needs_confirmation(b"are you sure? [y/n]"));
        assert!(predicate.needs_confirmation(b"Reboot now? Continue?"));
        assert!(!predicate.needs_confirmation(b"Yes, done."));
    }

    #[test]
    fn test_custom_dialect() {
        let predicate = CompletionPredicate::new(b"%", &["(CONFIRM)"]).unwrap();
        assert!(predicate.prompt_seen(b"switch% "));
        assert!(!predicate.prompt_seen(b"switch# "));
        assert!(predicate.needs_confirmation(b"erase flash (confirm)"));
    }

    #[test]
    fn test_classify() {
        assert_eq!(CommandClass::classify("sy"), CommandClass::ModeEnter);
        assert_eq!(CommandClass::classify("system-view"), CommandClass::ModeEnter);
        // Other sys* commands wait longer but do not switch modes.
        assert_eq!(CommandClass::classify("sysname SW-1"), CommandClass::System);
        assert_eq!(CommandClass::classify("quit"), CommandClass::ModeExit);
        assert_eq!(CommandClass::classify("save"), CommandClass::Destructive);
        assert_eq!(
            CommandClass::classify("reset counters interface"),
            CommandClass::Destructive
        );
        assert_eq!(CommandClass::classify("display version"), CommandClass::Plain);
    }

    #[test]
    fn test_wait_budgets() {
        assert_eq!(
            CommandClass::classify("system-view").wait_budget(),
            Duration::from_secs(5)
        );
        assert_eq!(
            CommandClass::classify("sysname SW-1").wait_budget(),
            Duration::from_secs(5)
        );
        assert_eq!(
            CommandClass::classify("reboot").wait_budget(),
            Duration::from_secs(10)
        );
        assert_eq!(
            CommandClass::classify("display clock").wait_budget(),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_settle_delays() {
        assert_eq!(settle_delay("system-view", false), Duration::from_secs(2));
        assert_eq!(settle_delay("save", true), Duration::from_secs(5));
        assert_eq!(settle_delay("vlan 10", true), Duration::from_secs(1));
        assert_eq!(settle_delay("display vlan", false), Duration::from_millis(500));
    }
}
