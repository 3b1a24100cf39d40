// Upstream client implementation
// HTTP backend speaking the relay JSON protocol

use async_trait::async_trait;
use base64::Engine;
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Duration;

use super::{Attachment, BackendError, ChatBackend, Conversation, Gem, GemPatch, NewGem, Reply};
use crate::proxy::config::RemoteBackendConfig;
use crate::proxy::resume_token::DecodedState;

pub struct RemoteBackend {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct WireFile<'a> {
    filename: &'a str,
    mime_type: &'a str,
    data: String,
}

#[derive(Deserialize)]
struct WireReply {
    text: String,
    #[serde(default)]
    metadata: Option<Vec<String>>,
}

impl RemoteBackend {
    pub fn new(config: &RemoteBackendConfig) -> Result<Self, String> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .user_agent(concat!("gem-gateway/", env!("CARGO_PKG_VERSION")));

        match config.proxy.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => {
                let proxy = reqwest::Proxy::all(url)
                    .map_err(|e| format!("Invalid upstream proxy {}: {}", url, e))?;
                builder = builder.proxy(proxy);
                tracing::info!("RemoteBackend enabled proxy: {}", url);
            }
            None => builder = builder.no_proxy(),
        }

        let http_client = builder
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
        })
    }

    fn build_url(base_url: &str, path: &str) -> String {
        format!("{}/{}", base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = Self::build_url(&self.base_url, path);
        let mut req = self
            .http_client
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// Turn non-2xx responses into errors; 404 becomes `NotFound`
    async fn check(response: Response) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));
        tracing::debug!("Backend returned {}: {}", status, body);

        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(body));
        }
        Err(BackendError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

struct RemoteConversation {
    http_client: Client,
    url: String,
    api_key: Option<String>,
    model: String,
    gem: Option<String>,
    state: Option<DecodedState>,
}

#[async_trait]
impl Conversation for RemoteConversation {
    async fn send(
        &mut self,
        message: &str,
        attachments: Vec<Attachment>,
    ) -> Result<Reply, BackendError> {
        let files: Vec<WireFile<'_>> = attachments
            .iter()
            .map(|a| WireFile {
                filename: &a.filename,
                mime_type: &a.mime_type,
                data: base64::engine::general_purpose::STANDARD.encode(&a.data),
            })
            .collect();

        let body = json!({
            "model": self.model,
            "gem": self.gem,
            "metadata": self.state.as_ref().map(|s| s.labeled()),
            "message": message,
            "files": files,
        });

        let mut req = self.http_client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = RemoteBackend::check(req.send().await?).await?;
        let reply: WireReply = response.json().await?;

        if let Some(labeled) = reply.metadata {
            self.state = Some(DecodedState::from_labeled(&labeled)?);
        }

        Ok(Reply { text: reply.text })
    }

    fn state(&self) -> Option<DecodedState> {
        self.state.clone()
    }
}

#[async_trait]
impl ChatBackend for RemoteBackend {
    async fn is_running(&self) -> bool {
        match self.request(reqwest::Method::GET, "/health").send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!("Backend health check failed: {}", e);
                false
            }
        }
    }

    async fn start_conversation(
        &self,
        model: &str,
        gem: Option<&str>,
        resume: Option<DecodedState>,
    ) -> Result<Box<dyn Conversation>, BackendError> {
        Ok(Box::new(RemoteConversation {
            http_client: self.http_client.clone(),
            url: Self::build_url(&self.base_url, "/conversations"),
            api_key: self.api_key.clone(),
            model: model.to_string(),
            gem: gem.map(str::to_string),
            state: resume,
        }))
    }

    async fn fetch_gems(&self, include_hidden: bool) -> Result<Vec<Gem>, BackendError> {
        let response = self
            .request(reqwest::Method::GET, "/gems")
            .query(&[("include_hidden", include_hidden)])
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn create_gem(&self, gem: NewGem) -> Result<Gem, BackendError> {
        let response = self
            .request(reqwest::Method::POST, "/gems")
            .json(&gem)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn update_gem(&self, id: &str, patch: GemPatch) -> Result<Gem, BackendError> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/gems/{}", id))
            .json(&patch)
            .send()
            .await?;
        Ok(Self::check(response).await?.json().await?)
    }

    async fn delete_gem(&self, id: &str) -> Result<(), BackendError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/gems/{}", id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        assert_eq!(
            RemoteBackend::build_url("http://relay.local:9000", "/gems"),
            "http://relay.local:9000/gems"
        );
        assert_eq!(
            RemoteBackend::build_url("http://relay.local:9000/api", "conversations"),
            "http://relay.local:9000/api/conversations"
        );
    }

    #[test]
    fn test_new_trims_base_url_and_empty_key() {
        let backend = RemoteBackend::new(&RemoteBackendConfig {
            base_url: "http://relay.local/".to_string(),
            api_key: Some(String::new()),
            proxy: None,
        })
        .unwrap();
        assert_eq!(backend.base_url, "http://relay.local");
        assert!(backend.api_key.is_none());
    }

    #[test]
    fn test_reply_without_metadata() {
        let reply: WireReply = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(reply.text, "hi");
        assert!(reply.metadata.is_none());
    }
}
