//! The monitor: owns the round state and turns finished rounds into alerts.
//!
//! Transports never touch round fields. They call [`Monitor::begin_round`],
//! [`Monitor::mark_content`], [`Monitor::mark_abort`] and
//! [`Monitor::end_round`], all of which take the round lock briefly and never
//! across an await or an alert dispatch. Every call after `begin_round`
//! carries the [`RoundId`] it returned, so a late transport cannot touch a
//! newer round.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::alert::AlertDispatcher;
use crate::config::{snapshot, SharedConfig};
use crate::error::{MonitorError, MonitorResult};
use crate::heuristic::{ContentPatterns, ContentSniffer};
use crate::matcher::GenerationMatcher;
use crate::round::{
    AlertPolicy, Classification, Clock, RoundId, RoundOutcome, RoundTracker, SystemClock, ARM_WINDOW,
};
use crate::trigger::KeyChord;

/// Minimum spacing between two out-of-band rate-limit reports.
pub const UNHANDLED_SPACING: Duration = Duration::from_millis(400);

pub const RATE_LIMIT_REASON: &str = "Rate limited";
pub const TEST_REASON: &str = "Test";
pub const TEST_DETAIL: &str = "This is a test failure alert.";

/// What happened to the last finished round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub outcome: RoundOutcome,
    pub classification: Option<Classification>,
    /// An alert was actually handed to the dispatcher
    pub alerted: bool,
}

pub struct Monitor {
    round: Mutex<RoundTracker>,
    config: SharedConfig,
    matcher: GenerationMatcher,
    patterns: Arc<ContentPatterns>,
    dispatcher: Arc<dyn AlertDispatcher>,
    clock: Arc<dyn Clock>,
    test_chord: KeyChord,
    focused: AtomicBool,
    last_unhandled: Mutex<Option<Instant>>,
    last_verdict: Mutex<Option<Verdict>>,
}

pub struct MonitorBuilder {
    config: SharedConfig,
    dispatcher: Arc<dyn AlertDispatcher>,
    matcher: GenerationMatcher,
    patterns: ContentPatterns,
    clock: Arc<dyn Clock>,
    arm_window: Duration,
    test_chord: KeyChord,
}

impl MonitorBuilder {
    pub fn matcher(mut self, matcher: GenerationMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn patterns(mut self, patterns: ContentPatterns) -> Self {
        self.patterns = patterns;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn arm_window(mut self, window: Duration) -> Self {
        self.arm_window = window;
        self
    }

    pub fn test_chord(mut self, chord: KeyChord) -> Self {
        self.test_chord = chord;
        self
    }

    pub fn build(self) -> Arc<Monitor> {
        Arc::new(Monitor {
            round: Mutex::new(RoundTracker::new(self.arm_window)),
            config: self.config,
            matcher: self.matcher,
            patterns: Arc::new(self.patterns),
            dispatcher: self.dispatcher,
            clock: self.clock,
            test_chord: self.test_chord,
            // a host that never reports focus is treated as foreground
            focused: AtomicBool::new(true),
            last_unhandled: Mutex::new(None),
            last_verdict: Mutex::new(None),
        })
    }
}

impl Monitor {
    pub fn builder(config: SharedConfig, dispatcher: Arc<dyn AlertDispatcher>) -> MonitorBuilder {
        MonitorBuilder {
            config,
            dispatcher,
            matcher: GenerationMatcher::default(),
            patterns: ContentPatterns::default(),
            clock: Arc::new(SystemClock),
            arm_window: ARM_WINDOW,
            test_chord: KeyChord::default(),
        }
    }

    fn tracker(&self) -> MutexGuard<'_, RoundTracker> {
        self.round.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Open the arm window. Called right after the host dispatches a generation.
    pub fn arm(&self) {
        let now = self.clock.now();
        self.tracker().arm(now);
        tracing::debug!("armed");
    }

    /// Arming hook: arms and hands the payload back untouched.
    pub fn intercept<T>(&self, payload: T) -> T {
        self.arm();
        payload
    }

    pub fn is_armed(&self) -> bool {
        let now = self.clock.now();
        self.tracker().is_armed(now)
    }

    /// Decide whether an outgoing call opens a round, and open it.
    ///
    /// Returns the round id only to the call that actually opened the round;
    /// evidence and finalization must carry that id.
    pub fn begin_round(&self, method: &str, url: &str) -> Option<RoundId> {
        let now = self.clock.now();
        let mut tracker = self.tracker();
        if !tracker.is_armed(now) || !self.matcher.is_generation(method, url) {
            return None;
        }
        let policy = AlertPolicy::from(&snapshot(&self.config));
        let started = tracker.start_round(policy);
        drop(tracker);

        match started {
            Some(round) => tracing::debug!(method, url, ?round, "round started"),
            None => tracing::debug!(method, url, "round already open, request not tracked"),
        }
        started
    }

    pub fn mark_content(&self, round: RoundId) {
        self.tracker().mark_content(round);
    }

    pub fn mark_abort(&self, round: RoundId) {
        self.tracker().mark_abort(round);
    }

    /// Whether `round` is still open and already has confirmed content.
    pub fn round_has_content(&self, round: RoundId) -> bool {
        self.tracker().has_content(round)
    }

    pub fn is_round_active(&self) -> bool {
        self.tracker().is_active()
    }

    /// The open round, if any.
    pub fn current_round(&self) -> Option<RoundId> {
        self.tracker().current()
    }

    /// Finalize `round` and dispatch its classification.
    ///
    /// Only the first call for the open round has any effect; a round that
    /// already ended, or was superseded, is ignored.
    pub fn end_round(&self, round: RoundId, request_succeeded: bool) -> Option<Verdict> {
        let outcome = self.tracker().end_round(round, request_succeeded)?;
        let classification = outcome.classify();
        let alerted = self.dispatch(&outcome, classification);
        let verdict = Verdict {
            outcome,
            classification,
            alerted,
        };
        tracing::info!(
            request_succeeded,
            got_content = outcome.got_content,
            aborted = outcome.aborted,
            ?classification,
            alerted,
            "round finished"
        );
        *self.last_verdict.lock().unwrap_or_else(|e| e.into_inner()) = Some(verdict);
        Some(verdict)
    }

    fn dispatch(&self, outcome: &RoundOutcome, classification: Option<Classification>) -> bool {
        let policy = &outcome.policy;
        if !policy.enabled {
            return false;
        }
        match classification {
            Some(c) if c.is_failure() => {
                self.dispatcher.raise_failure(c.reason_label(), None);
                true
            }
            Some(_) if policy.success_background_only && self.is_focused() => {
                tracing::debug!("success alert suppressed while focused");
                false
            }
            Some(_) => {
                self.dispatcher.raise_success(false);
                true
            }
            None => false,
        }
    }

    pub fn last_verdict(&self) -> Option<Verdict> {
        *self.last_verdict.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The host reports whether its window/tab currently has focus.
    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::Relaxed);
    }

    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::Relaxed)
    }

    pub fn patterns(&self) -> &Arc<ContentPatterns> {
        &self.patterns
    }

    /// A fresh per-round sniffer.
    pub fn sniffer(&self) -> ContentSniffer {
        ContentSniffer::new(Arc::clone(&self.patterns))
    }

    /// Last-resort net for failures that never pass through a transport:
    /// unhandled rejections and uncaught errors whose text reads like a rate
    /// limit. Returns true when it acted.
    ///
    /// With a round open, that round is finalized as failed instead of raising
    /// a second alert.
    pub fn report_unhandled(&self, description: &str) -> bool {
        if !self.patterns.looks_like_rate_limit(description) || !self.is_armed() {
            return false;
        }
        let cfg = snapshot(&self.config);
        if !cfg.enabled || !cfg.alert_on_error {
            return false;
        }

        {
            let now = self.clock.now();
            let mut last = self.last_unhandled.lock().unwrap_or_else(|e| e.into_inner());
            if last.is_some_and(|at| now.duration_since(at) < UNHANDLED_SPACING) {
                return false;
            }
            *last = Some(now);
        }

        let finalized = self
            .current_round()
            .and_then(|round| self.end_round(round, false));
        if finalized.is_none() {
            tracing::info!(description, "rate limit reported outside any round");
            self.dispatcher.raise_failure(RATE_LIMIT_REASON, Some(description));
        }
        true
    }

    /// Manual test trigger. Returns true when the chord matched.
    pub fn handle_key(&self, chord: &KeyChord) -> bool {
        if *chord != self.test_chord {
            return false;
        }
        self.test_failure_alert();
        true
    }

    pub fn test_failure_alert(&self) {
        self.dispatcher.raise_failure(TEST_REASON, Some(TEST_DETAIL));
    }

    pub fn test_success_alert(&self) -> MonitorResult<()> {
        if !snapshot(&self.config).alert_on_success {
            return Err(MonitorError::not_allowed(
                "enable alertOnSuccess before testing the success alert",
            ));
        }
        self.dispatcher.raise_success(true);
        Ok(())
    }
}
