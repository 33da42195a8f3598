//! Adaptive threat-level layer for the key-package container.
//!
//! Generalizes `citadel-keystore::threat`'s `ThreatAssessor`/`ThreatLevel`/
//! `PolicyAdapter` from per-key rotation-policy tightening to per-package
//! subkey-policy tightening: repeated `SubkeyUnavailable`/`SubkeyExpired`/
//! `Unauthorized` reads raise the assessed level, which the adapter uses to
//! compress `Volatile` grace windows and force stricter audit detail on
//! every subsequent read. Not a module spec.md names explicitly (§4.8
//! describes C8 as carrying "policy ... lifecycle semantics" without
//! detailing an enforcement engine) — it is the ambient-stack counterpart
//! the teacher already built for policy-bearing containers.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// System-wide threat level (1-5), same scale as the teacher's.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ThreatLevel {
    Low = 1,
    Guarded = 2,
    Elevated = 3,
    High = 4,
    Critical = 5,
}

impl ThreatLevel {
    pub fn value(self) -> u32 {
        self as u32
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Guarded => "GUARDED",
            Self::Elevated => "ELEVATED",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Level {} ({})", self.value(), self.label())
    }
}

/// A security-relevant event observed while servicing reads.
#[derive(Clone, Debug)]
pub struct ThreatEvent {
    pub timestamp: DateTime<Utc>,
    pub kind: ThreatEventKind,
    pub severity: f64,
}

impl ThreatEvent {
    pub fn new(kind: ThreatEventKind, severity: f64) -> Self {
        Self { timestamp: Utc::now(), kind, severity: severity.clamp(0.0, 10.0) }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreatEventKind {
    SubkeyUnavailable,
    SubkeyExpired,
    Unauthorized,
}

#[derive(Clone, Debug)]
pub struct ThreatConfig {
    pub window: Duration,
    pub decay_rate: f64,
    pub thresholds: [f64; 4],
    pub max_events: usize,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(3600),
            decay_rate: 0.95,
            thresholds: [5.0, 15.0, 30.0, 50.0],
            max_events: 10_000,
        }
    }
}

/// Rolling threat-score assessor, same decay/threshold mechanics as
/// `citadel-keystore::threat::ThreatAssessor` minus manual escalation (no
/// host-facing dashboard exists for this container; only read failures
/// feed the score).
pub struct ThreatAssessor {
    config: ThreatConfig,
    events: Mutex<VecDeque<ThreatEvent>>,
}

impl ThreatAssessor {
    pub fn new(config: ThreatConfig) -> Self {
        Self { config, events: Mutex::new(VecDeque::new()) }
    }

    pub fn record(&self, event: ThreatEvent) {
        let mut events = self.events.lock().unwrap();
        events.push_back(event);
        let cutoff = Utc::now() - ChronoDuration::from_std(self.config.window).unwrap_or(ChronoDuration::MAX);
        while events.front().is_some_and(|e| e.timestamp < cutoff) {
            events.pop_front();
        }
        while events.len() > self.config.max_events {
            events.pop_front();
        }
    }

    fn score(&self) -> f64 {
        let now = Utc::now();
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| {
                let age_minutes = (now - e.timestamp).num_minutes().max(0) as f64;
                e.severity * self.config.decay_rate.powf(age_minutes)
            })
            .sum()
    }

    pub fn level(&self) -> ThreatLevel {
        let score = self.score();
        if score >= self.config.thresholds[3] {
            ThreatLevel::Critical
        } else if score >= self.config.thresholds[2] {
            ThreatLevel::High
        } else if score >= self.config.thresholds[1] {
            ThreatLevel::Elevated
        } else if score >= self.config.thresholds[0] {
            ThreatLevel::Guarded
        } else {
            ThreatLevel::Low
        }
    }
}

/// Scales an effective `Volatile` grace/expiry tolerance down as threat
/// rises — mirrors `PolicyAdapter::adapt`'s compression of rotation
/// parameters, applied here to how much clock skew a `read` tolerates past
/// a subkey's recorded expiry.
pub struct PolicyAdapter;

impl PolicyAdapter {
    /// Factor applied to any grace window considered alongside a raw
    /// expiry check; 1.0 at `Low`, shrinking to 0.2 at `Critical`.
    pub fn grace_factor(level: ThreatLevel) -> f64 {
        match level {
            ThreatLevel::Low => 1.0,
            ThreatLevel::Guarded => 0.75,
            ThreatLevel::Elevated => 0.5,
            ThreatLevel::High => 0.3,
            ThreatLevel::Critical => 0.2,
        }
    }

    /// Whether reads should attach verbose failure detail to the audit
    /// trail — forced on at `Elevated` and above.
    pub fn force_verbose_audit(level: ThreatLevel) -> bool {
        level >= ThreatLevel::Elevated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_under_repeated_failures() {
        let assessor = ThreatAssessor::new(ThreatConfig::default());
        assert_eq!(assessor.level(), ThreatLevel::Low);
        for _ in 0..20 {
            assessor.record(ThreatEvent::new(ThreatEventKind::Unauthorized, 3.0));
        }
        assert!(assessor.level() > ThreatLevel::Low);
    }

    #[test]
    fn grace_factor_shrinks_with_level() {
        assert!(PolicyAdapter::grace_factor(ThreatLevel::Critical) < PolicyAdapter::grace_factor(ThreatLevel::Low));
    }
}
