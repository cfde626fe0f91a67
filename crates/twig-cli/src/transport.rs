//! Smart HTTP transport.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Response};
use std::time::Duration;
use twig_git::{GitError, Transport};

const ADVERTISEMENT_TYPE: &str = "application/x-git-upload-pack-advertisement";
const REQUEST_TYPE: &str = "application/x-git-upload-pack-request";
const RESULT_TYPE: &str = "application/x-git-upload-pack-result";

/// Talks to git servers over the smart HTTP protocol.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    /// Creates a transport announcing `user_agent`.
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http })
    }
}

fn base(url: &str) -> &str {
    url.trim_end_matches('/')
}

fn transport_error(e: reqwest::Error) -> GitError {
    GitError::Transport(e.to_string())
}

async fn body(response: Response, what: &str) -> twig_git::Result<Bytes> {
    let status = response.status();
    if !status.is_success() {
        return Err(GitError::Transport(format!("{what} failed with HTTP {status}")));
    }
    response.bytes().await.map_err(transport_error)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn discover_refs(&self, url: &str) -> twig_git::Result<Bytes> {
        let endpoint = format!("{}/info/refs?service=git-upload-pack", base(url));
        tracing::debug!(endpoint = %endpoint, "discovering refs");

        let response = self
            .http
            .get(&endpoint)
            .send()
            .await
            .map_err(transport_error)?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let data = body(response, "ref discovery").await?;
        if !content_type.starts_with(ADVERTISEMENT_TYPE) {
            return Err(GitError::Protocol(format!(
                "{url} does not speak the smart HTTP protocol (content type {content_type:?})"
            )));
        }
        Ok(data)
    }

    async fn upload_pack(&self, url: &str, request: Vec<u8>) -> twig_git::Result<Bytes> {
        let endpoint = format!("{}/git-upload-pack", base(url));
        tracing::debug!(endpoint = %endpoint, bytes = request.len(), "requesting pack");

        let response = self
            .http
            .post(&endpoint)
            .header(header::CONTENT_TYPE, REQUEST_TYPE)
            .header(header::ACCEPT, RESULT_TYPE)
            .body(request)
            .send()
            .await
            .map_err(transport_error)?;
        body(response, "upload-pack").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_trims_trailing_slash() {
        assert_eq!(base("https://example.com/repo.git/"), "https://example.com/repo.git");
        assert_eq!(base("https://example.com/repo.git"), "https://example.com/repo.git");
    }

    #[test]
    fn test_new() {
        assert!(HttpTransport::new("twig/test").is_ok());
    }
}
