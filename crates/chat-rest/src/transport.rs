//! HTTP transport
//!
//! The dispatcher talks to the network through `HttpTransport` so scheduling can be
//! tested against scripted responses.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::{RestError, RestResult};
use crate::request::{HttpRequest, RestResponse};

/// Executes one prepared HTTP call
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> RestResult<RestResponse>;
}

/// Transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> RestResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RestError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> RestResult<RestResponse> {
        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .timeout(request.timeout);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RestError::Timeout(request.timeout)
            } else {
                RestError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| RestError::Transport(e.to_string()))?
            .to_vec();

        Ok(RestResponse {
            status,
            headers,
            body,
        })
    }
}
