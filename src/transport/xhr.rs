//! Event-based (XHR-style) transport and its monitoring decorator.
//!
//! Same semantics as the fetch decorator, driven by terminal events instead
//! of a future. `Error`, `Timeout` and `Abort` may be followed by `LoadEnd`;
//! each watched request finalizes at most once.

use std::sync::Arc;

use bytes::Bytes;

use crate::monitor::Monitor;
use crate::round::RoundId;

/// What the request looked like when it finished loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XhrCompletion {
    pub status: u16,
    pub content_type: Option<String>,
    pub response_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XhrEvent {
    LoadEnd(XhrCompletion),
    Error,
    Timeout,
    Abort,
}

pub type XhrListener = Box<dyn FnMut(&XhrEvent) + Send>;

/// One request object: open, optionally listen, send.
pub trait XhrRequest: Send {
    fn open(&mut self, method: &str, url: &str);
    fn send(&mut self, body: Option<Bytes>);
    fn add_listener(&mut self, listener: XhrListener);
}

pub trait XhrFactory: Send + Sync {
    fn create(&self) -> Box<dyn XhrRequest>;

    fn is_monitored(&self) -> bool {
        false
    }
}

/// Wrap a factory so every request it creates is observed. Already-wrapped
/// factories are returned unchanged.
pub fn wrap_xhr(inner: Arc<dyn XhrFactory>, monitor: &Arc<Monitor>) -> Arc<dyn XhrFactory> {
    if inner.is_monitored() {
        return inner;
    }
    Arc::new(MonitoredXhrFactory {
        inner,
        monitor: Arc::clone(monitor),
    })
}

pub struct MonitoredXhrFactory {
    inner: Arc<dyn XhrFactory>,
    monitor: Arc<Monitor>,
}

impl XhrFactory for MonitoredXhrFactory {
    fn create(&self) -> Box<dyn XhrRequest> {
        Box::new(MonitoredXhr {
            inner: self.inner.create(),
            monitor: Arc::clone(&self.monitor),
            opened: None,
        })
    }

    fn is_monitored(&self) -> bool {
        true
    }
}

pub struct MonitoredXhr {
    inner: Box<dyn XhrRequest>,
    monitor: Arc<Monitor>,
    /// Method and URL recorded at `open`
    opened: Option<(String, String)>,
}

impl XhrRequest for MonitoredXhr {
    fn open(&mut self, method: &str, url: &str) {
        self.opened = Some((method.to_uppercase(), url.to_string()));
        self.inner.open(method, url);
    }

    fn send(&mut self, body: Option<Bytes>) {
        let round = self
            .opened
            .as_ref()
            .and_then(|(method, url)| self.monitor.begin_round(method, url));
        if let Some(round) = round {
            let monitor = Arc::clone(&self.monitor);
            let mut finished = false;
            self.inner.add_listener(Box::new(move |event| {
                if !finished {
                    finished = on_event(&monitor, round, event);
                }
            }));
        }
        self.inner.send(body);
    }

    fn add_listener(&mut self, listener: XhrListener) {
        self.inner.add_listener(listener);
    }
}

/// Apply one terminal event to the round. Returns true once the round is finalized.
fn on_event(monitor: &Monitor, round: RoundId, event: &XhrEvent) -> bool {
    match event {
        XhrEvent::LoadEnd(done) => {
            let patterns = monitor.patterns();
            let status_ok = (200..400).contains(&done.status);

            if !monitor.round_has_content(round) && patterns.has_actual_content(&done.response_text) {
                monitor.mark_content(round);
            }

            let bad_type = done
                .content_type
                .as_deref()
                .is_some_and(|ct| patterns.is_bad_content_type(ct));
            let disguised = patterns.looks_like_html(&done.response_text);
            monitor.end_round(round, status_ok && !bad_type && !disguised);
        }
        XhrEvent::Error | XhrEvent::Timeout => {
            monitor.end_round(round, false);
        }
        XhrEvent::Abort => {
            monitor.mark_abort(round);
            monitor.end_round(round, true);
        }
    }
    true
}
