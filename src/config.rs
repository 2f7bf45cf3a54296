use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const APNS_SANDBOX_URL: &str = "https://api.sandbox.push.apple.com";
const APNS_PRODUCTION_URL: &str = "https://api.push.apple.com";

/// Process-wide configuration, loaded once at startup and immutable afterwards.
#[derive(Clone)]
pub struct AppConfig {
    pub apns_key_id: String,
    pub apns_team_id: String,
    pub apns_bundle_id: String,
    /// PEM-encoded EC private key for the push gateway.
    pub apns_signing_key: String,
    pub environment: String,
    pub jwt_secret: String,
    pub tick_secs: u64,
    pub feed_refresh_secs: u64,
    pub feed_base_url: Option<String>,
    pub host: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let apns_key_id = require("APNS_KEY_ID")?;
        let apns_team_id = require("APNS_TEAM_ID")?;
        let apns_bundle_id = require("APNS_BUNDLE_ID")?;
        let jwt_secret = require("JWT_SECRET")?;

        let apns_signing_key = load_signing_key()?;

        let environment =
            dotenvy::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let tick_secs = parse_secs("TICK_SECS", 20)?;
        let feed_refresh_secs = parse_secs("FEED_REFRESH_SECS", 300)?;
        let feed_base_url = dotenvy::var("FEED_BASE_URL").ok().filter(|s| !s.is_empty());

        let host = dotenvy::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = dotenvy::var("PORT")
            .or_else(|_| dotenvy::var("SERVER_PORT"))
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u16>()
            .context("PORT is not a valid port number")?;

        Ok(Self {
            apns_key_id,
            apns_team_id,
            apns_bundle_id,
            apns_signing_key,
            environment,
            jwt_secret,
            tick_secs,
            feed_refresh_secs,
            feed_base_url,
            host,
            port,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == "development"
    }

    /// Sandbox vs. production gateway, selected once per deployment.
    pub fn apns_url(&self) -> &'static str {
        if self.is_development() {
            APNS_SANDBOX_URL
        } else {
            APNS_PRODUCTION_URL
        }
    }
}

fn require(name: &str) -> Result<String> {
    let value = dotenvy::var(name).with_context(|| format!("missing env var {name}"))?;
    if value.trim().is_empty() {
        bail!("env var {name} is empty");
    }
    Ok(value)
}

/// APNS_KEY_BASE64 takes precedence (cloud deployments ship the key inline);
/// APNS_KEY_PATH reads the .p8 file from disk.
fn load_signing_key() -> Result<String> {
    if let Ok(encoded) = dotenvy::var("APNS_KEY_BASE64") {
        let raw = BASE64
            .decode(encoded.trim())
            .context("APNS_KEY_BASE64 is not valid base64")?;
        return String::from_utf8(raw).context("APNS_KEY_BASE64 does not decode to UTF-8");
    }

    let path = dotenvy::var("APNS_KEY_PATH")
        .context("set APNS_KEY_BASE64 or APNS_KEY_PATH for the gateway signing key")?;
    std::fs::read_to_string(&path).with_context(|| format!("cannot read signing key at {path}"))
}

fn parse_secs(name: &str, default: u64) -> Result<u64> {
    match dotenvy::var(name) {
        Ok(raw) => {
            let secs = raw
                .parse::<u64>()
                .with_context(|| format!("{name} is not a number of seconds"))?;
            if secs == 0 {
                bail!("{name} must be at least 1 second");
            }
            Ok(secs)
        }
        Err(_) => Ok(default),
    }
}
