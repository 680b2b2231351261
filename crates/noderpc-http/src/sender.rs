//! `reqwest`-backed request/response sender.

use std::time::Duration;

use async_trait::async_trait;

use noderpc_core::error::TransportError;
use noderpc_core::transport::{Headers, HttpResponse, HttpSender};

/// Default [`HttpSender`] built on a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestSender {
    http: reqwest::Client,
}

impl ReqwestSender {
    /// Build a sender whose TCP/TLS connect phase is bounded by `connect_timeout`.
    ///
    /// The overall request deadline is applied per call by the channel.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Http(e.to_string()))?;
        Ok(Self { http })
    }

    /// Wrap an existing client.
    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post(
        &self,
        url: &str,
        headers: &Headers,
        body: String,
    ) -> Result<HttpResponse, TransportError> {
        let mut req = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req
            .body(body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        Ok(HttpResponse { status, body })
    }
}
