//! Round State Machine
//!
//! `Idle -> Armed -> Active -> Idle`. One round at most is open at a time;
//! a second matched request while a round is open is simply not tracked.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::MonitorConfig;

/// How long after `arm()` a matching request still opens a round.
pub const ARM_WINDOW: Duration = Duration::from_secs(20);

/// Monotonic time source, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The alert switches that decide a round's classification.
///
/// Snapshotted when a round starts so settings edits apply from the next round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPolicy {
    pub enabled: bool,
    pub alert_on_error: bool,
    pub alert_on_empty: bool,
    pub alert_on_success: bool,
    pub success_background_only: bool,
}

impl From<&MonitorConfig> for AlertPolicy {
    fn from(cfg: &MonitorConfig) -> Self {
        Self {
            enabled: cfg.enabled,
            alert_on_error: cfg.alert_on_error,
            alert_on_empty: cfg.alert_on_empty,
            alert_on_success: cfg.alert_on_success,
            success_background_only: cfg.success_background_only,
        }
    }
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// Evidence captured when a round ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutcome {
    pub request_succeeded: bool,
    pub got_content: bool,
    pub aborted: bool,
    pub policy: AlertPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Transport failure or disguised error page
    Error,
    /// Transport succeeded but no real content arrived
    Empty,
    Success,
}

impl Classification {
    /// Human-readable reason shown on the failure path.
    pub fn reason_label(&self) -> &'static str {
        match self {
            Self::Error => "Request failed",
            Self::Empty => "Empty response",
            Self::Success => "Generation complete",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Error | Self::Empty)
    }
}

impl RoundOutcome {
    /// Pure classification of a finished round.
    ///
    /// Aborted rounds never alert. Errors take precedence over emptiness.
    pub fn classify(&self) -> Option<Classification> {
        let p = &self.policy;
        if self.aborted {
            None
        } else if !self.request_succeeded && p.alert_on_error {
            Some(Classification::Error)
        } else if self.request_succeeded && !self.got_content && p.alert_on_empty {
            Some(Classification::Empty)
        } else if self.request_succeeded && self.got_content && p.alert_on_success {
            Some(Classification::Success)
        } else {
            None
        }
    }
}

/// Identifies one started round. Evidence carrying a stale id is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RoundId(u64);

/// RoundState plus its five operations. Owned by the monitor, never shared raw.
#[derive(Debug)]
pub struct RoundTracker {
    arm_window: Duration,
    armed_until: Option<Instant>,
    /// Id of the open round, or of the last one once it has ended
    current: u64,
    active: bool,
    got_content: bool,
    aborted: bool,
    policy: AlertPolicy,
}

impl RoundTracker {
    pub fn new(arm_window: Duration) -> Self {
        Self {
            arm_window,
            armed_until: None,
            current: 0,
            active: false,
            got_content: false,
            aborted: false,
            policy: AlertPolicy::default(),
        }
    }

    /// Open (or extend) the arm window from `now`.
    pub fn arm(&mut self, now: Instant) {
        self.armed_until = Some(now + self.arm_window);
    }

    pub fn is_armed(&self, now: Instant) -> bool {
        self.armed_until.is_some_and(|until| now <= until)
    }

    /// Open a round. Returns `None`, changing nothing, if one is already open.
    pub fn start_round(&mut self, policy: AlertPolicy) -> Option<RoundId> {
        if self.active {
            return None;
        }
        self.current += 1;
        self.active = true;
        self.got_content = false;
        self.aborted = false;
        self.policy = policy;
        Some(RoundId(self.current))
    }

    /// The open round, if any.
    pub fn current(&self) -> Option<RoundId> {
        self.active.then_some(RoundId(self.current))
    }

    fn owns(&self, round: RoundId) -> bool {
        self.active && round.0 == self.current
    }

    pub fn mark_content(&mut self, round: RoundId) {
        if self.owns(round) {
            self.got_content = true;
        }
    }

    pub fn mark_abort(&mut self, round: RoundId) {
        if self.owns(round) {
            self.aborted = true;
        }
    }

    /// Close `round`. Only the first call for the open round yields an outcome.
    pub fn end_round(&mut self, round: RoundId, request_succeeded: bool) -> Option<RoundOutcome> {
        if !self.owns(round) {
            return None;
        }
        self.active = false;
        Some(RoundOutcome {
            request_succeeded,
            got_content: self.got_content,
            aborted: self.aborted,
            policy: self.policy,
        })
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn has_content(&self, round: RoundId) -> bool {
        self.owns(round) && self.got_content
    }
}

impl Default for RoundTracker {
    fn default() -> Self {
        Self::new(ARM_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_on() -> AlertPolicy {
        AlertPolicy {
            enabled: true,
            alert_on_error: true,
            alert_on_empty: true,
            alert_on_success: true,
            success_background_only: false,
        }
    }

    fn outcome(ok: bool, content: bool, aborted: bool, policy: AlertPolicy) -> RoundOutcome {
        RoundOutcome {
            request_succeeded: ok,
            got_content: content,
            aborted,
            policy,
        }
    }

    #[test]
    fn test_arm_window() {
        let t0 = Instant::now();
        let mut rt = RoundTracker::default();
        assert!(!rt.is_armed(t0));
        rt.arm(t0);
        assert!(rt.is_armed(t0 + Duration::from_secs(19)));
        assert!(rt.is_armed(t0 + ARM_WINDOW));
        assert!(!rt.is_armed(t0 + Duration::from_secs(21)));
        // re-arming extends
        rt.arm(t0 + Duration::from_secs(15));
        assert!(rt.is_armed(t0 + Duration::from_secs(30)));
    }

    #[test]
    fn test_single_active_round() {
        let mut rt = RoundTracker::default();
        let round = rt.start_round(all_on()).unwrap();
        rt.mark_content(round);
        assert!(rt.start_round(all_on()).is_none());
        // the ignored start did not reset evidence
        assert!(rt.has_content(round));
        assert_eq!(rt.current(), Some(round));
    }

    #[test]
    fn test_marks_ignored_when_idle() {
        let mut rt = RoundTracker::default();
        let old = rt.start_round(all_on()).unwrap();
        rt.end_round(old, true);
        rt.mark_content(old);
        rt.mark_abort(old);
        let round = rt.start_round(all_on()).unwrap();
        let out = rt.end_round(round, true).unwrap();
        assert!(!out.got_content);
        assert!(!out.aborted);
    }

    #[test]
    fn test_end_round_is_idempotent() {
        let mut rt = RoundTracker::default();
        let round = rt.start_round(all_on()).unwrap();
        assert!(rt.end_round(round, false).is_some());
        assert!(rt.end_round(round, false).is_none());
        assert!(rt.end_round(round, true).is_none());
        assert!(!rt.is_active());
        assert_eq!(rt.current(), None);
    }

    #[test]
    fn test_stale_round_cannot_touch_next_one() {
        let mut rt = RoundTracker::default();
        let first = rt.start_round(all_on()).unwrap();
        rt.end_round(first, false);
        let second = rt.start_round(all_on()).unwrap();
        assert_ne!(first, second);

        rt.mark_content(first);
        rt.mark_abort(first);
        assert!(rt.end_round(first, true).is_none());
        assert!(rt.is_active());

        let out = rt.end_round(second, false).unwrap();
        assert!(!out.got_content && !out.aborted);
    }

    #[test]
    fn test_start_resets_evidence() {
        let mut rt = RoundTracker::default();
        let round = rt.start_round(all_on()).unwrap();
        rt.mark_content(round);
        rt.mark_abort(round);
        rt.end_round(round, true);
        let round = rt.start_round(all_on()).unwrap();
        let out = rt.end_round(round, true).unwrap();
        assert!(!out.got_content && !out.aborted);
    }

    #[test]
    fn test_abort_never_alerts() {
        for ok in [true, false] {
            for content in [true, false] {
                assert_eq!(outcome(ok, content, true, all_on()).classify(), None);
            }
        }
    }

    #[test]
    fn test_classification_policy() {
        let p = all_on();
        assert_eq!(outcome(false, true, false, p).classify(), Some(Classification::Error));
        assert_eq!(outcome(false, false, false, p).classify(), Some(Classification::Error));
        assert_eq!(outcome(true, false, false, p).classify(), Some(Classification::Empty));
        assert_eq!(outcome(true, true, false, p).classify(), Some(Classification::Success));

        let quiet = AlertPolicy {
            alert_on_error: false,
            alert_on_empty: false,
            alert_on_success: false,
            ..p
        };
        assert_eq!(outcome(false, false, false, quiet).classify(), None);
        assert_eq!(outcome(true, false, false, quiet).classify(), None);
        assert_eq!(outcome(true, true, false, quiet).classify(), None);
    }

    #[test]
    fn test_classification_is_pure() {
        let o = outcome(true, false, false, all_on());
        assert_eq!(o.classify(), o.classify());
    }

    #[test]
    fn test_reason_labels_differ() {
        assert_ne!(
            Classification::Error.reason_label(),
            Classification::Empty.reason_label()
        );
        assert!(Classification::Empty.is_failure());
        assert!(!Classification::Success.is_failure());
    }
}
