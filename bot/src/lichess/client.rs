//! Lichess bot API client.

use super::ndjson::split_lines;
use super::wire::{decode_event, decode_game_event, Account};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response};
use rookery_env::{EnvError, EventStream, GameEventStream, GameId, Move, OfferId, Transport};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Production host.
pub const LICHESS_URL: &str = "https://lichess.org";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP transport for the lichess bot API.
///
/// One client is shared by the dispatcher and every worker; reqwest pools
/// connections internally.
pub struct LichessClient {
    http: Client,
    base_url: String,
    token: String,
}

impl LichessClient {
    pub fn new(base_url: &str, token: String) -> Result<Self, EnvError> {
        // No overall timeout: the event and game streams stay open for hours
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("rookery/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| EnvError::transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.base_url, path)
    }

    async fn check(resp: Response) -> Result<Response, EnvError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(EnvError::Rejected {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<D: DeserializeOwned>(&self, path: &str) -> Result<D, EnvError> {
        let resp = self
            .http
            .get(self.api_url(path))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| EnvError::transport(format!("GET {path} failed: {e}")))?;

        Self::check(resp)
            .await?
            .json()
            .await
            .map_err(EnvError::decode)
    }

    async fn post(&self, path: &str) -> Result<(), EnvError> {
        let resp = self
            .http
            .post(self.api_url(path))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| EnvError::transport(format!("POST {path} failed: {e}")))?;

        Self::check(resp).await.map(|_| ())
    }

    /// Opens an ndjson stream and frames it into lines.
    async fn open_lines(
        &self,
        path: &str,
    ) -> Result<impl Stream<Item = Result<String, EnvError>> + Send + 'static, EnvError> {
        let resp = self
            .http
            .get(self.api_url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| EnvError::transport(format!("GET {path} failed: {e}")))?;

        let resp = Self::check(resp).await?;
        debug!("Opened stream {}", path);
        Ok(split_lines(resp.bytes_stream()))
    }

    /// The account the token belongs to.
    pub async fn account(&self) -> Result<Account, EnvError> {
        self.get_json("/account").await
    }

    /// Turns the account into a bot account. Irreversible on lichess.
    pub async fn upgrade_to_bot(&self) -> Result<(), EnvError> {
        self.post("/bot/account/upgrade").await
    }
}

#[async_trait]
impl Transport for LichessClient {
    async fn stream_events(&self) -> Result<EventStream, EnvError> {
        let lines = self.open_lines("/stream/event").await?;
        Ok(lines
            .filter_map(|line| async move {
                match line.and_then(|l| decode_event(&l)) {
                    Err(EnvError::Decode(e)) => {
                        warn!("Skipping undecodable event: {}", e);
                        None
                    }
                    other => Some(other),
                }
            })
            .boxed())
    }

    async fn stream_game(&self, game_id: &GameId) -> Result<GameEventStream, EnvError> {
        let lines = self.open_lines(&format!("/bot/game/stream/{game_id}")).await?;
        let game_id = game_id.clone();
        Ok(lines
            .filter_map(move |line| {
                let game_id = game_id.clone();
                async move {
                    match line.and_then(|l| decode_game_event(&l)) {
                        Err(EnvError::Decode(e)) => {
                            warn!("Skipping undecodable event in game {}: {}", game_id, e);
                            None
                        }
                        other => Some(other),
                    }
                }
            })
            .boxed())
    }

    async fn respond_to_offer(&self, offer_id: &OfferId, accept: bool) -> Result<(), EnvError> {
        let verb = if accept { "accept" } else { "decline" };
        self.post(&format!("/challenge/{offer_id}/{verb}")).await
    }

    async fn submit_move(&self, game_id: &GameId, mv: &Move) -> Result<(), EnvError> {
        self.post(&format!("/bot/game/{game_id}/move/{mv}")).await
    }

    async fn resign(&self, game_id: &GameId) -> Result<(), EnvError> {
        self.post(&format!("/bot/game/{game_id}/resign")).await
    }

    async fn post_message(&self, game_id: &GameId, text: &str) -> Result<(), EnvError> {
        let path = format!("/bot/game/{game_id}/chat");
        let resp = self
            .http
            .post(self.api_url(&path))
            .bearer_auth(&self.token)
            .timeout(REQUEST_TIMEOUT)
            .form(&[("room", "player"), ("text", text)])
            .send()
            .await
            .map_err(|e| EnvError::transport(format!("POST {path} failed: {e}")))?;

        Self::check(resp).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_trims_slash() {
        let client = LichessClient::new("http://localhost:9663/", "lip_test".to_string()).unwrap();
        assert_eq!(client.api_url("/stream/event"), "http://localhost:9663/api/stream/event");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let client = LichessClient::new("http://127.0.0.1:9", "lip_test".to_string()).unwrap();
        let err = client.resign(&GameId::new("g1")).await.unwrap_err();
        assert!(matches!(err, EnvError::Transport(_)));
    }
}
