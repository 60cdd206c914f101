//! Directory service port: the authoritative channel listing for an account.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::Deserialize;

use crate::{
    domain::{ExternalAccountId, RemoteChannel},
    errors::{DirectoryError, Error},
    Result,
};

/// Upper bound on followed pages, guards against a server that never ends.
const MAX_PAGES: usize = 50;

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Channels visible to `account`, in server order.
    async fn fetch_channels(
        &self,
        account: &ExternalAccountId,
    ) -> std::result::Result<Vec<RemoteChannel>, DirectoryError>;
}

#[derive(Debug, Deserialize)]
struct ChannelPage {
    #[serde(default)]
    channels: Vec<RemoteChannel>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// HTTP directory client.
///
/// `GET {base}/channels?account=..[&cursor=..]`, following `next_cursor`.
#[derive(Clone, Debug)]
pub struct HttpDirectoryClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpDirectoryClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("channel-manager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::External(format!("directory client build: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
        })
    }

    fn channels_url(&self) -> String {
        format!("{}/channels", self.base_url)
    }

    async fn fetch_page(
        &self,
        account: &ExternalAccountId,
        cursor: Option<&str>,
    ) -> std::result::Result<ChannelPage, DirectoryError> {
        let mut query: Vec<(&str, &str)> = vec![("account", account.as_str())];
        if let Some(c) = cursor {
            query.push(("cursor", c));
        }

        let mut req = self.http.get(self.channels_url()).query(&query);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status, retry_after, &body));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| DirectoryError::Network(e.to_string()))?;
        parse_page(&body)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn fetch_channels(
        &self,
        account: &ExternalAccountId,
    ) -> std::result::Result<Vec<RemoteChannel>, DirectoryError> {
        let mut out = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(account, cursor.as_deref()).await?;
            out.extend(page.channels);
            cursor = page.next_cursor.filter(|c| !c.trim().is_empty());
            if cursor.is_none() {
                return Ok(out);
            }
        }

        tracing::warn!(pages = MAX_PAGES, "directory pagination cap reached");
        Ok(out)
    }
}

fn parse_page(body: &str) -> std::result::Result<ChannelPage, DirectoryError> {
    serde_json::from_str(body).map_err(|e| DirectoryError::Protocol(e.to_string()))
}

fn parse_retry_after(v: &str) -> Option<Duration> {
    v.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn status_error(status: StatusCode, retry_after: Option<Duration>, body: &str) -> DirectoryError {
    let snippet = body.chars().take(200).collect::<String>();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            DirectoryError::Auth(format!("{status} {snippet}"))
        }
        StatusCode::TOO_MANY_REQUESTS => DirectoryError::RateLimited { retry_after },
        _ => DirectoryError::Network(format!("{status} {snippet}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_page_with_cursor() {
        let page = parse_page(
            r#"{"channels":[{"id":"rc-1","name":"general"},{"id":"rc-2","name":"random"}],"next_cursor":"p2"}"#,
        )
        .unwrap();
        assert_eq!(page.channels.len(), 2);
        assert_eq!(page.channels[1].name, "random");
        assert_eq!(page.next_cursor.as_deref(), Some("p2"));
    }

    #[test]
    fn missing_fields_mean_empty_last_page() {
        let page = parse_page("{}").unwrap();
        assert!(page.channels.is_empty());
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn garbage_body_is_protocol_error() {
        let err = parse_page("<html>oops</html>").unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn status_codes_map_to_kinds() {
        assert_eq!(status_error(StatusCode::UNAUTHORIZED, None, "").kind(), "auth");
        assert_eq!(status_error(StatusCode::FORBIDDEN, None, "").kind(), "auth");
        assert_eq!(status_error(StatusCode::BAD_GATEWAY, None, "").kind(), "network");

        let rl = status_error(
            StatusCode::TOO_MANY_REQUESTS,
            parse_retry_after(" 7 "),
            "slow down",
        );
        match rl {
            DirectoryError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let c = HttpDirectoryClient::new("http://127.0.0.1:8080/access/", None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(c.channels_url(), "http://127.0.0.1:8080/access/channels");
    }
}
