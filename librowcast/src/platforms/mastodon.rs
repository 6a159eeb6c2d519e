//! Mastodon-API posting client
//!
//! Uses megalodon, so any Fediverse server speaking the Mastodon API works
//! (Mastodon, Pleroma, Akkoma, GoToSocial...).

use async_trait::async_trait;
use megalodon::{Megalodon, SNS};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{PlatformConfig, ACCESS_TOKEN_ENV};
use crate::error::{ConfigError, PlatformError, Result};
use crate::platforms::{missing, Platform};

/// Posting limit assumed until the instance reports its own
const DEFAULT_CHARACTER_LIMIT: usize = 500;

pub struct MastodonClient {
    client: Box<dyn Megalodon + Send + Sync>,
    instance_url: String,
    character_limit: usize,
}

impl MastodonClient {
    /// Build a client; no network traffic happens until `authenticate`
    pub fn new(instance_url: String, access_token: SecretString) -> Result<Self> {
        let client = megalodon::generator(
            SNS::Mastodon,
            instance_url.clone(),
            Some(access_token.expose_secret().to_string()),
            None,
        )
        .map_err(|e| {
            PlatformError::Authentication(format!("Failed to create Mastodon client: {:?}", e))
        })?;

        Ok(Self {
            client,
            instance_url,
            character_limit: DEFAULT_CHARACTER_LIMIT,
        })
    }

    /// Build a client from the `[platform]` section
    ///
    /// The token comes from `ROWCAST_ACCESS_TOKEN` if set, otherwise from
    /// `platform.token_file`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the instance or token is missing,
    /// or when the token file is unreadable or empty.
    pub fn from_config(config: &PlatformConfig) -> Result<Self> {
        let instance = config
            .instance
            .as_deref()
            .map(str::trim)
            .filter(|i| !i.is_empty())
            .ok_or_else(|| missing("platform.instance"))?;

        let token = resolve_token(config)?;
        Self::new(normalize_instance_url(instance), token)
    }

    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// Ask the instance for its per-status character limit
    pub async fn fetch_instance_info(&mut self) -> Result<()> {
        let response = self
            .client
            .get_instance()
            .await
            .map_err(|e| map_megalodon_error(e, "fetch instance info"))?;

        let limit = response.json.configuration.statuses.max_characters;
        if limit > 0 {
            self.character_limit = limit as usize;
        }
        Ok(())
    }
}

fn resolve_token(config: &PlatformConfig) -> Result<SecretString> {
    if let Ok(token) = std::env::var(ACCESS_TOKEN_ENV) {
        let token = token.trim();
        if !token.is_empty() {
            return Ok(SecretString::from(token.to_string()));
        }
    }

    let path = config
        .expand_token_file_path()
        .ok_or_else(|| missing("platform.token_file"))?;

    let token = std::fs::read_to_string(&path).map_err(|e| {
        ConfigError::invalid(
            "platform.token_file",
            format!("cannot read {}: {}", path.display(), e),
        )
    })?;

    let token = token.trim();
    if token.is_empty() {
        return Err(ConfigError::invalid(
            "platform.token_file",
            format!("token file {} is empty", path.display()),
        )
        .into());
    }

    Ok(SecretString::from(token.to_string()))
}

fn normalize_instance_url(instance: &str) -> String {
    let instance = instance.trim_end_matches('/');
    if instance.starts_with("http://") || instance.starts_with("https://") {
        instance.to_string()
    } else {
        format!("https://{}", instance)
    }
}

#[async_trait]
impl Platform for MastodonClient {
    async fn authenticate(&mut self) -> Result<()> {
        self.client
            .verify_account_credentials()
            .await
            .map_err(|e| map_megalodon_error(e, "authenticate"))?;

        if let Err(e) = self.fetch_instance_info().await {
            tracing::debug!(error = %e, "Could not fetch instance limits; keeping default");
        }

        tracing::debug!(
            instance = %self.instance_url,
            character_limit = self.character_limit,
            "Mastodon credentials verified"
        );
        Ok(())
    }

    async fn post(&self, content: &str) -> Result<String> {
        let response = self
            .client
            .post_status(content.to_string(), None)
            .await
            .map_err(|e| map_megalodon_error(e, "post status"))?;

        let post_id = match response.json {
            megalodon::megalodon::PostStatusOutput::Status(status) => status.id,
            megalodon::megalodon::PostStatusOutput::ScheduledStatus(scheduled) => scheduled.id,
        };

        Ok(post_id)
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(PlatformError::Validation("Content cannot be empty".to_string()).into());
        }

        let char_count = content.chars().count();
        if char_count > self.character_limit {
            return Err(PlatformError::Validation(format!(
                "Content exceeds Mastodon's {} character limit (current: {} characters)",
                self.character_limit, char_count
            ))
            .into());
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "mastodon"
    }

    fn character_limit(&self) -> Option<usize> {
        Some(self.character_limit)
    }
}

fn map_megalodon_error(error: megalodon::error::Error, context: &str) -> PlatformError {
    let message = error.to_string();
    classify_error(extract_http_status(&message), &message, context)
}

/// Sort a failed call into the error kinds the gateway distinguishes
///
/// Only `RateLimited` is retried, so 429s (or messages saying so) must land
/// there and nowhere else. megalodon's error carries no response headers, so
/// `Retry-After` is unknown here and `retry_after` stays `None`; the gateway
/// then uses the configured backoff.
fn classify_error(status: Option<u16>, message: &str, context: &str) -> PlatformError {
    let lower = message.to_lowercase();

    match status {
        Some(401) | Some(403) => PlatformError::Authentication(format!(
            "Mastodon rejected the access token ({}): {}",
            context, message
        )),
        Some(422) => PlatformError::Validation(format!(
            "Mastodon rejected the status ({}): {}",
            context, message
        )),
        Some(429) => PlatformError::rate_limited(format!(
            "Mastodon rate limit exceeded ({}): {}",
            context, message
        )),
        Some(500..=599) => {
            PlatformError::Network(format!("Mastodon server error ({}): {}", context, message))
        }
        Some(_) => {
            PlatformError::Posting(format!("Mastodon HTTP error ({}): {}", context, message))
        }
        None if lower.contains("rate limit") || lower.contains("too many requests") => {
            PlatformError::rate_limited(format!(
                "Mastodon rate limit exceeded ({}): {}",
                context, message
            ))
        }
        None if lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("token") =>
        {
            PlatformError::Authentication(format!(
                "Mastodon authentication failed ({}): {}",
                context, message
            ))
        }
        None if lower.contains("unprocessable") || lower.contains("validation") => {
            PlatformError::Validation(format!("Mastodon validation failed ({}): {}", context, message))
        }
        None if lower.contains("parse") || lower.contains("json") => PlatformError::Posting(
            format!("Unexpected Mastodon response ({}): {}", context, message),
        ),
        None => PlatformError::Network(format!("Mastodon error ({}): {}", context, message)),
    }
}

/// Find an HTTP status code in an error message ("HTTP 429", "status 401",
/// "403: Forbidden")
fn extract_http_status(message: &str) -> Option<u16> {
    let valid = |code: u16| (100..=599).contains(&code);

    for prefix in ["HTTP ", "status ", "code: ", "status_code: "] {
        if let Some(pos) = message.find(prefix) {
            let code = message[pos + prefix.len()..]
                .get(0..3)
                .and_then(|s| s.parse::<u16>().ok());
            if let Some(code) = code.filter(|c| valid(*c)) {
                return Some(code);
            }
        }
    }

    let bytes = message.as_bytes();
    for (i, window) in bytes.windows(4).enumerate() {
        let digits = window[..3].iter().all(u8::is_ascii_digit);
        let terminated = window[3] == b':' || window[3] == b' ';
        let standalone = i == 0 || !bytes[i - 1].is_ascii_digit();
        if digits && terminated && standalone {
            let code = std::str::from_utf8(&window[..3])
                .ok()
                .and_then(|s| s.parse::<u16>().ok());
            if let Some(code) = code.filter(|c| valid(*c)) {
                return Some(code);
            }
        }
    }

    None
}
