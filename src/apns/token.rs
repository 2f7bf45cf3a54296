use anyhow::{Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tokio::sync::Mutex;

/// Gateway tokens are good for an hour; past that the gateway rejects them.
const TOKEN_LIFETIME_SECS: i64 = 60 * 60;

#[derive(Serialize)]
struct GatewayClaims<'a> {
    iss: &'a str,
    iat: i64,
}

struct CachedToken {
    token: String,
    expires_at: i64,
}

/// Signs and caches the ES256 bearer token used to authenticate to the push
/// gateway. The mutex serializes regeneration; re-signing under contention is
/// harmless, callers just get an equally valid token.
pub struct ApnsTokenProvider {
    key: EncodingKey,
    key_id: String,
    team_id: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ApnsTokenProvider {
    /// Fails if the PEM is not a parseable EC private key.
    pub fn new(signing_key_pem: &str, key_id: &str, team_id: &str) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(signing_key_pem.as_bytes())
            .context("APNs signing key is not a valid EC private key")?;
        Ok(Self {
            key,
            key_id: key_id.to_string(),
            team_id: team_id.to_string(),
            cached: Mutex::new(None),
        })
    }

    /// Returns the cached token while it is still inside its lifetime,
    /// otherwise signs a fresh one.
    pub async fn bearer(&self) -> Result<String> {
        self.bearer_at(chrono::Utc::now().timestamp()).await
    }

    async fn bearer_at(&self, now: i64) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(entry) = cached.as_ref() {
            if now < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        let token = self.sign(now)?;
        *cached = Some(CachedToken {
            token: token.clone(),
            expires_at: now + TOKEN_LIFETIME_SECS,
        });
        Ok(token)
    }

    fn sign(&self, now: i64) -> Result<String> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());

        let claims = GatewayClaims {
            iss: &self.team_id,
            iat: now,
        };
        encode(&header, &claims, &self.key).context("failed to sign gateway token")
    }
}
