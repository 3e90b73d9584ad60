//! Discord user-session transport: REST calls plus the gateway event tap.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, ORIGIN, REFERER, USER_AGENT};
use reqwest::{multipart, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::gateway::{Gateway, SessionState};
use super::types::{
    ApplicationCommand, ChannelRef, EventHandler, InteractionRequest, Transport, TransportError,
};
use crate::config::DiscordConfig;

/// Attempts per REST call.
const REQUEST_ATTEMPTS: u32 = 3;
/// Attempts per asset download.
const DOWNLOAD_ATTEMPTS: u32 = 5;
/// Minimum pause between two downloads.
const DOWNLOAD_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound of the random extra pause added to every request.
const JITTER_MS: u64 = 1000;
/// A 502 usually means Discord is down; wait longer each time.
const BAD_GATEWAY_BACKOFF: [Duration; 3] = [
    Duration::from_secs(10 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(60 * 60),
];
/// Discord API error code for a deleted message.
const UNKNOWN_MESSAGE: u64 = 10008;
/// Partial queries a human would type while looking for `/imagine`.
const COMMAND_QUERIES: [&str; 5] = ["im", "ima", "imag", "imagi", "imagin"];

/// Discord transport acting as a regular user client.
pub struct DiscordTransport {
    http: Client,
    config: DiscordConfig,
    headers: HeaderMap,
    referer: RwLock<String>,
    last_request: Mutex<Option<Instant>>,
    last_download: Mutex<Option<Instant>>,
    handlers: Arc<RwLock<Vec<EventHandler>>>,
    session: Arc<RwLock<SessionState>>,
    started: Mutex<bool>,
    /// Fires when the token given to `start` does; bounds REST waits.
    stopped: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: u64,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct UserApplication {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    #[serde(default)]
    application: Option<UserApplication>,
}

#[derive(Debug, Default, Deserialize)]
struct CommandSearch {
    #[serde(default)]
    application_commands: Vec<ApplicationCommand>,
}

impl DiscordTransport {
    pub fn new(config: DiscordConfig) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .cookie_store(true)
            .build()
            .map_err(|e| TransportError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, header_value(&config.token)?);
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        headers.insert("x-discord-locale", header_value(&config.locale)?);
        headers.insert("x-debug-options", HeaderValue::from_static("bugReporterEnabled"));
        if let Some(props) = &config.super_properties {
            headers.insert("x-super-properties", header_value(props)?);
        }

        Ok(Self {
            http,
            config,
            headers,
            referer: RwLock::new("channels/@me".to_string()),
            last_request: Mutex::new(None),
            last_download: Mutex::new(None),
            handlers: Arc::new(RwLock::new(Vec::new())),
            session: Arc::new(RwLock::new(SessionState::default())),
            started: Mutex::new(false),
            stopped: CancellationToken::new(),
        })
    }

    fn referer(&self) -> String {
        let path = self.referer.read().unwrap_or_else(PoisonError::into_inner);
        format!("https://discord.com/{}", path.trim_start_matches('/'))
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
        let body = self.request(Method::GET, path, None).await?;
        serde_json::from_slice(&body)
            .map_err(|e| TransportError::Decode(format!("{}: {}", path, e)))
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, TransportError> {
        retry_transient(path, REQUEST_ATTEMPTS, &self.stopped, || {
            self.request_once(method.clone(), path, payload)
        })
        .await
    }

    async fn request_once(
        &self,
        method: Method,
        path: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Vec<u8>, TransportError> {
        let interval = Duration::from_millis(self.config.min_request_interval_ms);
        let mut last = self.last_request.lock().await;
        pace(*last, interval, &self.stopped).await?;

        let url = self.api_url(path);
        let mut builder = self
            .http
            .request(method, &url)
            .headers(self.headers.clone())
            .header(ACCEPT, "*/*")
            .header(REFERER, self.referer());

        if let Some(payload) = payload {
            debug!(url = %url, payload = %payload, "Discord request");
            if path == "interactions" {
                // The web client posts interactions as multipart with a payload_json field.
                let form = multipart::Form::new().text("payload_json", payload.to_string());
                builder = builder.header(ORIGIN, "https://discord.com").multipart(form);
            } else {
                builder = builder.json(payload);
            }
        } else {
            debug!(url = %url, "Discord request");
        }

        let result = builder.send().await;
        *last = Some(Instant::now());
        drop(last);

        let response = result?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        debug!(
            url = %url,
            status = status.as_u16(),
            body = %String::from_utf8_lossy(&body),
            "Discord response"
        );

        if status == StatusCode::BAD_GATEWAY {
            return Err(TransportError::BadGateway);
        }
        if !status.is_success() {
            return Err(parse_api_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        let mut last = self.last_download.lock().await;
        pace(*last, DOWNLOAD_INTERVAL, cancel).await?;

        let request = self
            .http
            .get(url)
            .header(USER_AGENT, self.config.user_agent.as_str())
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
            )
            .send();
        let result = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = request => result.map_err(TransportError::from),
        };
        *last = Some(Instant::now());
        drop(last);

        let response = result?;
        let status = response.status();
        if status == StatusCode::BAD_GATEWAY {
            return Err(TransportError::BadGateway);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }
        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            bytes = response.bytes() => bytes?,
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let partial = partial_path(dest);
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, dest).await?;
        Ok(())
    }
}

#[async_trait]
impl Transport for DiscordTransport {
    async fn start(&self, cancel: &CancellationToken) -> Result<(), TransportError> {
        let mut started = self.started.lock().await;
        if *started {
            return Ok(());
        }

        let gateway = Gateway::new(
            self.config.gateway_url.clone(),
            self.config.token.clone(),
            self.config.user_agent.clone(),
            Arc::clone(&self.handlers),
            Arc::clone(&self.session),
        );
        let connection = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            result = gateway.connect() => result?,
        };
        info!(session_id = %self.session_id(), "Discord gateway ready");

        tokio::spawn(gateway.run(connection, cancel.child_token()));
        let (session, stopped) = (cancel.clone(), self.stopped.clone());
        tokio::spawn(async move {
            session.cancelled().await;
            stopped.cancel();
        });
        *started = true;
        Ok(())
    }

    async fn send(&self, request: &InteractionRequest) -> Result<(), TransportError> {
        let payload = serde_json::to_value(request)
            .map_err(|e| TransportError::Decode(format!("Failed to encode interaction: {}", e)))?;
        self.request(Method::POST, "interactions", Some(&payload)).await?;
        Ok(())
    }

    async fn download(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        retry_transient(url, DOWNLOAD_ATTEMPTS, cancel, || {
            self.download_once(url, dest, cancel)
        })
        .await
    }

    fn subscribe(&self, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    fn session_id(&self) -> String {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .session_id
            .clone()
    }

    fn dm_channel(&self, user_id: &str) -> Option<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dm_channels
            .get(user_id)
            .cloned()
    }

    /// Requests pretend to originate from the channel's web client page.
    fn use_channel(&self, channel: &ChannelRef) {
        *self.referer.write().unwrap_or_else(PoisonError::into_inner) = channel.referer_path();
    }

    async fn find_command(
        &self,
        application_id: &str,
        channel: &ChannelRef,
        name: &str,
    ) -> Result<ApplicationCommand, TransportError> {
        let search: CommandSearch = match &channel.guild_id {
            None => {
                let profile: UserProfile = self
                    .get_json(&format!(
                        "users/{}/profile?with_mutual_guilds=false&with_mutual_friends_count=false",
                        application_id
                    ))
                    .await?;
                let has_application = profile
                    .application
                    .map(|app| !app.id.is_empty())
                    .unwrap_or(false);
                if !has_application {
                    return Err(TransportError::CommandNotFound(format!(
                        "user {} has no application",
                        application_id
                    )));
                }
                self.get_json(&format!(
                    "channels/{}/application-commands/search?type=1&include_applications=true",
                    channel.channel_id
                ))
                .await?
            }
            Some(_) => {
                let query = COMMAND_QUERIES[rand::rng().random_range(0..COMMAND_QUERIES.len())];
                self.get_json(&format!(
                    "channels/{}/application-commands/search?type=1&query={}&limit=7&include_applications=false",
                    channel.channel_id, query
                ))
                .await?
            }
        };

        search
            .application_commands
            .into_iter()
            .find(|c| c.application_id == application_id && c.name == name)
            .ok_or_else(|| TransportError::CommandNotFound(name.to_string()))
    }
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::Connection(format!("Invalid header value: {}", e)))
}

/// Sleep until `interval` plus a random jitter has passed since `last`.
async fn pace(
    last: Option<Instant>,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<(), TransportError> {
    let Some(last) = last else {
        return Ok(());
    };
    let jitter = Duration::from_millis(rand::rng().random_range(0..JITTER_MS));
    tokio::select! {
        _ = cancel.cancelled() => Err(TransportError::Cancelled),
        _ = tokio::time::sleep_until(last + interval + jitter) => Ok(()),
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{}.part", name))
}

/// Map a non-success response body to a transport error.
pub(crate) fn parse_api_error(status: u16, body: &[u8]) -> TransportError {
    match serde_json::from_slice::<ApiErrorBody>(body) {
        Ok(err) if err.code == UNKNOWN_MESSAGE => TransportError::MessageNotFound,
        Ok(err) => TransportError::Api {
            code: err.code,
            message: err.message,
        },
        Err(_) => TransportError::Http {
            status,
            message: String::from_utf8_lossy(body).chars().take(200).collect(),
        },
    }
}

/// Repeat `op` on temporary errors, up to `attempts` calls. Waits between
/// attempts end early with [`TransportError::Cancelled`].
async fn retry_transient<T, F, Fut>(
    operation: &str,
    attempts: u32,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt = 0;
    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        attempt += 1;
        if attempt >= attempts || !err.is_temporary() {
            return Err(err);
        }
        if matches!(err, TransportError::BadGateway) {
            let idx = (attempt as usize - 1).min(BAD_GATEWAY_BACKOFF.len() - 1);
            let wait = BAD_GATEWAY_BACKOFF[idx];
            warn!(operation, wait_secs = wait.as_secs(), "Discord seems to be down, waiting");
            tokio::select! {
                _ = cancel.cancelled() => return Err(TransportError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
        warn!(operation, attempt, error = %err, "Retrying Discord request");
    }
}
