//! Outbound HTTP port.
//!
//! The dispatcher only needs "POST these bytes, tell me the status". Keeping
//! that behind [`WebhookTransport`] lets tests script endpoint behaviour
//! without a listening socket.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::WebhookConfig;
use crate::error::{TransportError, WebhookError, WebhookResult};

pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";
pub const DELIVERY_ID_HEADER: &str = "X-Webhook-Delivery-ID";
pub const EVENT_HEADER: &str = "X-Webhook-Event";
pub const USER_AGENT_HEADER: &str = "User-Agent";

/// A fully prepared POST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl OutboundRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Sends one webhook attempt and reports the response status.
#[async_trait]
pub trait WebhookTransport: Send + Sync + Debug {
    async fn send(&self, request: &OutboundRequest) -> Result<u16, TransportError>;
}

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &WebhookConfig) -> WebhookResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.attempt_timeout)
            .user_agent(config.user_agent.clone())
            // A followed 301/302/303 would turn the POST into a bodiless GET.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| WebhookError::Client(e.to_string()))?;
        Ok(Self {
            client,
            timeout: config.attempt_timeout,
        })
    }

    pub fn from_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<u16, TransportError> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        match builder.send().await {
            Ok(response) => Ok(response.status().as_u16()),
            Err(e) if e.is_timeout() => Err(TransportError::Timeout(self.timeout)),
            Err(e) => Err(TransportError::Network(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let request = OutboundRequest {
            url: "https://example.com".to_string(),
            headers: vec![(EVENT_HEADER, "data.updated".to_string())],
            body: Vec::new(),
        };
        assert_eq!(request.header("x-webhook-event"), Some("data.updated"));
        assert_eq!(request.header(SIGNATURE_HEADER), None);
    }

    #[test]
    fn test_client_builds_from_default_config() {
        assert!(ReqwestTransport::new(&WebhookConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_redirect_status_is_reported_not_followed() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let mut served = 0usize;
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                served += 1;
                let response = format!(
                    "HTTP/1.1 302 Found\r\nLocation: http://{addr}/moved\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(response.as_bytes()).await;
                if served == 1 {
                    break;
                }
            }
            served
        });

        let transport = ReqwestTransport::new(&WebhookConfig::default()).unwrap();
        let request = OutboundRequest {
            url: format!("http://{addr}/hook"),
            headers: vec![(EVENT_HEADER, "data.updated".to_string())],
            body: b"{}".to_vec(),
        };

        assert_eq!(transport.send(&request).await, Ok(302));
        assert_eq!(server.await.unwrap(), 1);
    }
}
