use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Extension, FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::api::types::{TokenRequest, TokenResponse};
use crate::api::AppState;

const TOKEN_LIFETIME_HOURS: i64 = 24;

/// Client JWT claims, HS256-signed with the process secret.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Clone)]
pub struct AuthState {
    pub secret: String,
    pub limiter: RateLimiter,
}

pub struct AuthenticatedUser(pub Claims);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(auth): Extension<AuthState> = Extension::from_request_parts(parts, state)
            .await
            .map_err(|_| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "auth state missing".to_string(),
                )
            })?;

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    (
                        StatusCode::UNAUTHORIZED,
                        "Missing Authorization header".to_string(),
                    )
                })?;

        let claims = verify_token(bearer.token(), &auth.secret).map_err(|_| {
            (
                StatusCode::UNAUTHORIZED,
                "Invalid or expired token".to_string(),
            )
        })?;

        if !auth.limiter.allow(&claims.user_id) {
            return Err((
                StatusCode::TOO_MANY_REQUESTS,
                "Rate limit exceeded. Please try again later.".to_string(),
            ));
        }

        Ok(AuthenticatedUser(claims))
    }
}

pub fn create_access_token(user_id: &str, email: Option<&str>, secret: &str) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp();
    token_with_times(
        user_id,
        email,
        now,
        now + TOKEN_LIFETIME_HOURS * 3600,
        secret,
    )
}

fn token_with_times(
    user_id: &str,
    email: Option<&str>,
    iat: i64,
    exp: i64,
    secret: &str,
) -> anyhow::Result<String> {
    let claims = Claims {
        user_id: user_id.to_string(),
        email: email.map(|s| s.to_string()),
        exp: exp as usize,
        iat: iat as usize,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// Dev-only token mint so a client can be wired up without a separate
/// identity provider. Disabled outside the development environment.
pub async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    if !state.config.is_development() {
        return Err((StatusCode::NOT_FOUND, "Not found".to_string()));
    }

    let token = create_access_token(&req.user_id, req.email.as_deref(), &state.config.jwt_secret)
        .map_err(|err| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("token sign error: {err}"),
            )
        })?;
    Ok(Json(TokenResponse { token }))
}

/// Sliding-window limiter, 10 requests per user per minute.
#[derive(Clone, Default)]
pub struct RateLimiter {
    hits: Arc<Mutex<HashMap<String, Vec<i64>>>>,
}

impl RateLimiter {
    const MAX_REQUESTS: usize = 10;
    const WINDOW_SECS: i64 = 60;

    pub fn allow(&self, user_id: &str) -> bool {
        self.allow_at(user_id, chrono::Utc::now().timestamp())
    }

    fn allow_at(&self, user_id: &str, now: i64) -> bool {
        let mut hits = self.hits.lock().expect("rate limiter poisoned");

        // Expire old timestamps everywhere and drop users with none left, so
        // the map stays bounded by recently-active users.
        hits.retain(|_, requests| {
            requests.retain(|&t| t > now - Self::WINDOW_SECS);
            !requests.is_empty()
        });

        let requests = hits.entry(user_id.to_string()).or_default();
        if requests.len() >= Self::MAX_REQUESTS {
            return false;
        }
        requests.push(now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn token_round_trips() {
        let token = create_access_token("user-1", Some("u@example.com"), SECRET).unwrap();
        let claims = verify_token(&token, SECRET).unwrap();
        assert_eq!(claims.user_id, "user-1");
        assert_eq!(claims.email.as_deref(), Some("u@example.com"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = create_access_token("user-1", None, SECRET).unwrap();
        assert!(verify_token(&token, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = chrono::Utc::now().timestamp();
        // Well past the default decode leeway.
        let token = token_with_times("user-1", None, now - 7200, now - 3600, SECRET).unwrap();
        assert!(verify_token(&token, SECRET).is_err());
    }

    #[test]
    fn rate_limiter_enforces_window() {
        let limiter = RateLimiter::default();
        for _ in 0..10 {
            assert!(limiter.allow_at("user-1", 100));
        }
        assert!(!limiter.allow_at("user-1", 100));
        // Other users are unaffected.
        assert!(limiter.allow_at("user-2", 100));
        // The window slides.
        assert!(limiter.allow_at("user-1", 100 + 61));
    }

    #[test]
    fn rate_limiter_drops_idle_users() {
        let limiter = RateLimiter::default();
        assert!(limiter.allow_at("user-1", 100));
        assert!(limiter.allow_at("user-2", 100 + 61));

        let hits = limiter.hits.lock().unwrap();
        assert!(!hits.contains_key("user-1"));
        assert!(hits.contains_key("user-2"));
    }
}
