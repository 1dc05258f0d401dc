//! reqwest-backed fetch transport.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{StreamExt, TryStreamExt};

use super::fetch::{Fetch, FetchRequest, FetchResponse, ResponseBody};
use crate::error::{FetchError, MonitorResult};

#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client with a connect timeout; generation streams themselves are unbounded.
    pub fn with_connect_timeout(timeout: Duration) -> MonitorResult<Self> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self::new(client))
    }
}

fn map_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_body() || e.is_decode() {
        FetchError::Body(e.to_string())
    } else {
        FetchError::Network(e.to_string())
    }
}

impl Fetch for ReqwestFetch {
    fn fetch(&self, request: FetchRequest) -> BoxFuture<'_, Result<FetchResponse, FetchError>> {
        Box::pin(async move {
            let method = reqwest::Method::from_bytes(request.method.as_bytes())
                .map_err(|e| FetchError::Network(format!("invalid method: {e}")))?;

            let mut builder = self.client.request(method, &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(map_error)?;
            let status = response.status();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect();

            let body = response
                .bytes_stream()
                .map_err(map_error)
                .boxed();

            Ok(FetchResponse {
                status: status.as_u16(),
                ok: status.is_success(),
                headers,
                body: ResponseBody::Stream(body),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_network_error() {
        let fetch = ReqwestFetch::new(reqwest::Client::new());
        let err = fetch
            .fetch(FetchRequest::post("not a url"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_invalid_method() {
        let fetch = ReqwestFetch::new(reqwest::Client::new());
        let err = fetch
            .fetch(FetchRequest::new("BAD METHOD", "http://localhost/"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }

    #[test]
    fn test_builder() {
        assert!(ReqwestFetch::with_connect_timeout(Duration::from_secs(5)).is_ok());
    }
}
