//! Fetch-style transport and its monitoring decorator.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, Stream, StreamExt};

use crate::error::FetchError;
use crate::heuristic::ContentSniffer;
use crate::monitor::Monitor;
use crate::round::RoundId;

pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl FetchRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }
}

pub enum ResponseBody {
    /// Whole body already buffered
    Full(Bytes),
    /// Body arriving chunk by chunk
    Stream(BodyStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(b) => f.debug_tuple("Full").field(&b.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

#[derive(Debug)]
pub struct FetchResponse {
    pub status: u16,
    /// Transport-level success as the transport reports it (2xx for HTTP)
    pub ok: bool,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
}

impl FetchResponse {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Drain the body into a string.
    pub async fn text(self) -> Result<String, FetchError> {
        let bytes = match self.body {
            ResponseBody::Full(b) => b.to_vec(),
            ResponseBody::Stream(mut s) => {
                let mut all = Vec::new();
                while let Some(chunk) = s.next().await {
                    all.extend_from_slice(&chunk?);
                }
                all
            }
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// A fetch-style network entry point.
pub trait Fetch: Send + Sync {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse, FetchError>>;

    /// Already wrapped by a monitor; used to keep installation idempotent.
    fn is_monitored(&self) -> bool {
        false
    }
}

/// Wrap `inner` so generation calls are observed. A transport that is already
/// monitored is returned as is.
pub fn wrap_fetch(inner: Arc<dyn Fetch>, monitor: &Arc<Monitor>) -> Arc<dyn Fetch> {
    if inner.is_monitored() {
        return inner;
    }
    Arc::new(MonitoredFetch {
        inner,
        monitor: Arc::clone(monitor),
    })
}

/// Decorator that feeds round evidence to the monitor without altering the
/// request or delaying the response.
pub struct MonitoredFetch {
    inner: Arc<dyn Fetch>,
    monitor: Arc<Monitor>,
}

impl Fetch for MonitoredFetch {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse, FetchError>> {
        // decided before anything is awaited
        let guard = self
            .monitor
            .begin_round(&request.method, &request.url)
            .map(|round| RoundGuard::new(Arc::clone(&self.monitor), round));
        let inner = Arc::clone(&self.inner);

        Box::pin(async move {
            let result = inner.fetch(request).await;
            let Some(guard) = guard else {
                return result;
            };
            let (monitor, round) = guard.disarm();

            match result {
                Ok(response) => Ok(observe(monitor, round, response)),
                Err(e) => {
                    if e.is_abort() {
                        monitor.mark_abort(round);
                        monitor.end_round(round, true);
                    } else {
                        monitor.end_round(round, false);
                    }
                    Err(e)
                }
            }
        })
    }

    fn is_monitored(&self) -> bool {
        true
    }
}

/// Finalizes the round as a user abort if the caller drops the call mid-flight.
struct RoundGuard {
    monitor: Arc<Monitor>,
    round: RoundId,
    armed: bool,
}

impl RoundGuard {
    fn new(monitor: Arc<Monitor>, round: RoundId) -> Self {
        Self {
            monitor,
            round,
            armed: true,
        }
    }

    fn disarm(mut self) -> (Arc<Monitor>, RoundId) {
        self.armed = false;
        (Arc::clone(&self.monitor), self.round)
    }
}

impl Drop for RoundGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("watched fetch dropped before completion");
            self.monitor.mark_abort(self.round);
            self.monitor.end_round(self.round, true);
        }
    }
}

/// Attach the observer to a watched response and hand the response back.
fn observe(monitor: Arc<Monitor>, round: RoundId, response: FetchResponse) -> FetchResponse {
    let content_type = response.content_type().unwrap_or_default();
    let transport_ok = response.ok && !monitor.patterns().is_bad_content_type(content_type);
    let observer = BodyObserver {
        sniffer: monitor.sniffer(),
        monitor,
        round,
        transport_ok,
    };

    let FetchResponse {
        status,
        ok,
        headers,
        body,
    } = response;

    let body = match body {
        ResponseBody::Full(bytes) => {
            let mut observer = observer;
            observer.chunk(&bytes);
            observer.finish(None);
            ResponseBody::Full(bytes)
        }
        ResponseBody::Stream(upstream) => ResponseBody::Stream(tee(ObservedBody {
            inner: upstream,
            observer: Some(observer),
        })),
    };

    FetchResponse {
        status,
        ok,
        headers,
        body,
    }
}

/// Drain the observed body on its own task so observation completes even if
/// the caller stops reading. Without a tokio runtime the caller drives it.
fn tee(observed: ObservedBody) -> BodyStream {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return observed.boxed();
    };

    let (tx, rx) = futures::channel::mpsc::unbounded();
    handle.spawn(async move {
        let mut observed = observed;
        while let Some(item) = observed.next().await {
            // receiver gone: keep draining for the round
            let _ = tx.unbounded_send(item);
        }
    });
    rx.boxed()
}

struct BodyObserver {
    monitor: Arc<Monitor>,
    round: RoundId,
    sniffer: ContentSniffer,
    transport_ok: bool,
}

impl BodyObserver {
    /// Every chunk goes through the sniffer: the body head is still needed
    /// for the HTML check after content is confirmed.
    fn chunk(&mut self, bytes: &[u8]) {
        if self.sniffer.feed(bytes) {
            self.monitor.mark_content(self.round);
        }
    }

    fn finish(mut self, error: Option<&FetchError>) {
        let round = self.round;
        match error {
            Some(e) if e.is_abort() => {
                self.monitor.mark_abort(round);
                self.monitor.end_round(round, true);
            }
            Some(e) => {
                tracing::debug!(error = %e, "watched body failed mid-stream");
                self.monitor.end_round(round, false);
            }
            None => {
                if self.sniffer.finish() {
                    self.monitor.mark_content(round);
                }
                let disguised = self.monitor.patterns().looks_like_html(self.sniffer.head());
                self.monitor.end_round(round, self.transport_ok && !disguised);
            }
        }
    }
}

/// Body stream that reports every chunk to the round observer.
struct ObservedBody {
    inner: BodyStream,
    observer: Option<BodyObserver>,
}

impl Stream for ObservedBody {
    type Item = Result<Bytes, FetchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.inner.poll_next_unpin(cx);
        match &polled {
            Poll::Ready(Some(Ok(chunk))) => {
                if let Some(observer) = self.observer.as_mut() {
                    observer.chunk(chunk);
                }
            }
            Poll::Ready(Some(Err(e))) => {
                if let Some(observer) = self.observer.take() {
                    observer.finish(Some(e));
                }
            }
            Poll::Ready(None) => {
                if let Some(observer) = self.observer.take() {
                    observer.finish(None);
                }
            }
            Poll::Pending => {}
        }
        polled
    }
}

impl Drop for ObservedBody {
    fn drop(&mut self) {
        // only reachable when the caller itself drives the body and gives up
        if let Some(observer) = self.observer.take() {
            observer.finish(Some(&FetchError::Aborted));
        }
    }
}
