//! Transport interceptors.
//!
//! The host may reach a backend through either entry point, so both get the
//! same observing decorator. Installation is idempotent per entry point.

pub mod fetch;
pub mod http;
pub mod xhr;

use std::sync::Arc;

pub use fetch::{wrap_fetch, Fetch, FetchRequest, FetchResponse, MonitoredFetch, ResponseBody};
pub use http::ReqwestFetch;
pub use xhr::{wrap_xhr, XhrCompletion, XhrEvent, XhrFactory, XhrListener, XhrRequest};

use crate::monitor::Monitor;

/// The host's network entry points, as the rest of the host sees them.
#[derive(Clone)]
pub struct HostTransports {
    pub fetch: Arc<dyn Fetch>,
    pub xhr: Arc<dyn XhrFactory>,
}

/// Which entry points `install` actually wrapped this time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Installed {
    pub fetch: bool,
    pub xhr: bool,
}

/// Put the monitor in front of both entry points. Safe to call repeatedly.
pub fn install(host: &mut HostTransports, monitor: &Arc<Monitor>) -> Installed {
    let installed = Installed {
        fetch: !host.fetch.is_monitored(),
        xhr: !host.xhr.is_monitored(),
    };
    host.fetch = wrap_fetch(Arc::clone(&host.fetch), monitor);
    host.xhr = wrap_xhr(Arc::clone(&host.xhr), monitor);
    tracing::debug!(fetch = installed.fetch, xhr = installed.xhr, "interceptors installed");
    installed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorConfig;
    use crate::error::FetchError;
    use crate::monitor::tests::harness;
    use bytes::Bytes;
    use futures::future::{self, BoxFuture};

    struct NoFetch;
    impl Fetch for NoFetch {
        fn fetch(&self, _r: FetchRequest) -> BoxFuture<'_, Result<FetchResponse, FetchError>> {
            Box::pin(future::ready(Err(FetchError::Network("offline".into()))))
        }
    }

    struct NoXhr;
    impl XhrRequest for NoXhr {
        fn open(&mut self, _method: &str, _url: &str) {}
        fn send(&mut self, _body: Option<Bytes>) {}
        fn add_listener(&mut self, _listener: XhrListener) {}
    }
    impl XhrFactory for NoXhr {
        fn create(&self) -> Box<dyn XhrRequest> {
            Box::new(NoXhr)
        }
    }

    #[test]
    fn test_install_twice_wraps_once() {
        let h = harness(MonitorConfig::default());
        let mut host = HostTransports {
            fetch: Arc::new(NoFetch),
            xhr: Arc::new(NoXhr),
        };
        assert_eq!(install(&mut host, &h.monitor), Installed { fetch: true, xhr: true });
        let fetch = Arc::clone(&host.fetch);
        let xhr = Arc::clone(&host.xhr);

        assert_eq!(install(&mut host, &h.monitor), Installed { fetch: false, xhr: false });
        assert!(Arc::ptr_eq(&fetch, &host.fetch));
        assert!(Arc::ptr_eq(&xhr, &host.xhr));
        assert!(host.fetch.is_monitored() && host.xhr.is_monitored());
    }

    #[tokio::test]
    async fn test_installed_fetch_reports_network_failure() {
        let h = harness(MonitorConfig::default());
        let mut host = HostTransports {
            fetch: Arc::new(NoFetch),
            xhr: Arc::new(NoXhr),
        };
        install(&mut host, &h.monitor);
        h.monitor.arm();
        let err = host
            .fetch
            .fetch(FetchRequest::post("/api/openai/chat/completions"))
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Network("offline".into()));
        assert_eq!(h.alerts.raised().len(), 1);
    }
}
