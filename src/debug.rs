//! Debug flags and phase timers.
//!
//! Flags are carried in `EngineOptions` and handed to every machine at
//! construction; nothing reads ambient global state. Each flag enables a
//! family of `tracing` events.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Independently togglable tracing families.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    /// Rule additions, critical pairs and round summaries during completion.
    pub dump_completion: bool,
    /// Deleted rules and pass summaries during minimization.
    pub dump_minimization: bool,
    /// Full rule tables after completion and after minimization.
    pub dump_rules: bool,
    /// Elapsed time per phase.
    pub timers: bool,
}

impl DebugOptions {
    /// Every flag off.
    pub const NONE: DebugOptions = DebugOptions {
        dump_completion: false,
        dump_minimization: false,
        dump_rules: false,
        timers: false,
    };

    /// Parses a comma-separated flag list such as `"completion,timers"`.
    pub fn parse(flags: &str) -> Result<Self, ConfigError> {
        let mut out = DebugOptions::NONE;
        for flag in flags.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "completion" => out.dump_completion = true,
                "minimization" => out.dump_minimization = true,
                "rules" => out.dump_rules = true,
                "timers" => out.timers = true,
                "all" => {
                    out = DebugOptions {
                        dump_completion: true,
                        dump_minimization: true,
                        dump_rules: true,
                        timers: true,
                    }
                }
                other => return Err(ConfigError::UnknownDebugFlag(other.to_string())),
            }
        }
        Ok(out)
    }

    /// Starts a timer for `phase`; it reports on drop when timers are on.
    pub fn timer(&self, phase: &'static str) -> PhaseTimer {
        PhaseTimer {
            phase,
            start: self.timers.then(Instant::now),
        }
    }
}

/// Guard that logs the elapsed time of a phase when dropped.
#[derive(Debug)]
pub struct PhaseTimer {
    phase: &'static str,
    start: Option<Instant>,
}

impl Drop for PhaseTimer {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            let elapsed_us = start.elapsed().as_micros() as u64;
            tracing::info!(phase = self.phase, elapsed_us, "phase finished");
        }
    }
}
