//! HTTP recommendation client.
//!
//! Issues `GET {base}/api/v1/recommender/{region}?zones=a,b&baseInstanceType=t`
//! over a fresh HTTP/1.1 connection per call and decodes the JSON body,
//! a map of zone to candidate list.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Empty};
use tracing::debug;

use spotgrid_core::Recommendations;

use crate::Recommender;
use crate::error::{RecommendError, RecommendResult};

/// Recommender backed by a remote recommendation service.
#[derive(Debug, Clone)]
pub struct HttpRecommender {
    /// `host:port` to connect to.
    address: String,
    /// Path prefix from the configured base URL, without trailing slash.
    base_path: String,
    timeout: Duration,
}

impl HttpRecommender {
    /// Build a client for `base_url` (e.g. `http://recommender:9090`).
    pub fn new(base_url: &str, timeout: Duration) -> RecommendResult<Self> {
        let uri: Uri = base_url
            .parse()
            .map_err(|_| RecommendError::InvalidUrl(base_url.to_string()))?;
        if uri.scheme_str().is_some_and(|s| s != "http") {
            return Err(RecommendError::InvalidUrl(base_url.to_string()));
        }
        let host = uri
            .host()
            .ok_or_else(|| RecommendError::InvalidUrl(base_url.to_string()))?;
        let port = uri.port_u16().unwrap_or(80);

        Ok(Self {
            address: format!("{host}:{port}"),
            base_path: uri.path().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn request_path(&self, region: &str, zones: &[String], base_instance_type: &str) -> String {
        format!(
            "{}/api/v1/recommender/{region}?zones={}&baseInstanceType={base_instance_type}",
            self.base_path,
            zones.join(","),
        )
    }

    async fn get(&self, path: &str) -> RecommendResult<Bytes> {
        let stream = tokio::net::TcpStream::connect(&self.address)
            .await
            .map_err(|e| RecommendError::Request(format!("connect {}: {e}", self.address)))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| RecommendError::Request(format!("handshake: {e}")))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(path)
            .header("host", &self.address)
            .header("accept", "application/json")
            .header("user-agent", "spotgrid-recommender/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| RecommendError::Request(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| RecommendError::Request(e.to_string()))?;
        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| RecommendError::Request(format!("reading body: {e}")))?
            .to_bytes();

        if !status.is_success() {
            return Err(RecommendError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl Recommender for HttpRecommender {
    async fn recommend(
        &self,
        region: &str,
        zones: &[String],
        base_instance_type: &str,
    ) -> RecommendResult<Recommendations> {
        let path = self.request_path(region, zones, base_instance_type);
        debug!(%path, address = %self.address, "requesting recommendations");

        let body = tokio::time::timeout(self.timeout, self.get(&path))
            .await
            .map_err(|_| RecommendError::Timeout(self.timeout))??;

        let recommendations: Recommendations = serde_json::from_slice(&body)?;
        Ok(recommendations)
    }
}
