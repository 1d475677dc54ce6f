//! Verification of the edge-issued identity token.
//!
//! Every request reaching the gateway has already passed the SSO gateway at
//! the edge, which attaches a signed JWT naming the user. This crate
//! verifies that token against the team domain's JWKS (cached for an hour),
//! checks the audience, and extracts the lowercased email claim. Allowlist
//! membership is checked by the caller against the settings store; the
//! helpers here only answer "who is this".
//!
//! A development mode (off by default, refused in production) accepts an
//! email from a fixed header or query parameter in lieu of a token.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Request header carrying the edge-issued JWT.
pub const ACCESS_TOKEN_HEADER: &str = "cf-access-jwt-assertion";
/// Dev-mode identity header.
pub const DEV_EMAIL_HEADER: &str = "x-dev-email";
/// How long a fetched JWKS document is reused.
pub const JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

const JWKS_FETCH_ATTEMPTS: u32 = 3;

/// Errors from identity verification.
#[derive(thiserror::Error, Debug)]
pub enum IdentityError {
    /// No token on the request.
    #[error("missing identity token")]
    MissingToken,

    /// Signature, audience, or expiry check failed.
    #[error("invalid identity token: {0}")]
    InvalidToken(String),

    /// The verified email is not on the allowlist.
    #[error("email is not allowlisted: {0}")]
    NotAllowlisted(String),

    /// Required identity configuration is absent.
    #[error("identity configuration missing: {0}")]
    ConfigMissing(&'static str),

    /// The JWKS endpoint could not be fetched.
    #[error("failed to fetch signing keys: {0}")]
    JwksFetch(String),
}

/// Gate configuration derived from the boot-time config.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// SSO team domain, e.g. `team.cloudflareaccess.com`.
    pub team_domain: Option<String>,
    /// Expected `aud` value on every token.
    pub audience: Option<String>,
    /// Accept `x-dev-email` / `?email=` instead of a token.
    pub dev_mode: bool,
}

/// Claims extracted from the edge token.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    pub email: String,
    pub exp: usize,
}

struct CachedJwks {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Verifies edge tokens against the remote JWKS.
pub struct IdentityGate {
    config: IdentityConfig,
    http: reqwest::Client,
    jwks: RwLock<Option<CachedJwks>>,
}

impl IdentityGate {
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            jwks: RwLock::new(None),
        }
    }

    /// Verify a token and return the lowercased email claim.
    pub async fn verify_token(&self, token: &str) -> Result<String, IdentityError> {
        if token.is_empty() {
            return Err(IdentityError::MissingToken);
        }
        let audience = self
            .config
            .audience
            .as_deref()
            .ok_or(IdentityError::ConfigMissing("CF_ACCESS_AUD"))?;

        let header = decode_header(token)
            .map_err(|e| IdentityError::InvalidToken(format!("bad header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| IdentityError::InvalidToken("token has no key id".to_string()))?;

        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "aud"]);

        let data = decode::<AccessClaims>(token, &key, &validation)
            .map_err(|e| IdentityError::InvalidToken(e.to_string()))?;

        Ok(data.claims.email.to_lowercase())
    }

    /// Resolve the dev-mode identity, if permitted.
    pub fn dev_identity(&self, email: Option<&str>) -> Result<String, IdentityError> {
        if !self.config.dev_mode {
            return Err(IdentityError::MissingToken);
        }
        email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or(IdentityError::MissingToken)
    }

    async fn signing_key(&self, kid: &str) -> Result<DecodingKey, IdentityError> {
        {
            let cache = self.jwks.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.fetched_at.elapsed() < JWKS_CACHE_TTL {
                    if let Some(key) = cached.keys.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        // Cache miss, stale cache, or unknown kid (key rotation): refetch.
        let keys = self.fetch_jwks().await?;
        let key = keys.get(kid).cloned();

        let mut cache = self.jwks.write().await;
        *cache = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });

        key.ok_or_else(|| IdentityError::InvalidToken(format!("unknown signing key: {kid}")))
    }

    async fn fetch_jwks(&self) -> Result<HashMap<String, DecodingKey>, IdentityError> {
        let team_domain = self
            .config
            .team_domain
            .as_deref()
            .ok_or(IdentityError::ConfigMissing("CF_ACCESS_TEAM_DOMAIN"))?;
        let url = jwks_url(team_domain);

        let mut last_error = String::new();
        for attempt in 0..JWKS_FETCH_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250 * (1 << attempt))).await;
            }
            match self.fetch_jwks_once(&url).await {
                Ok(keys) => {
                    debug!(url = %url, keys = keys.len(), "JWKS fetched");
                    return Ok(keys);
                }
                Err(e) => {
                    warn!(url = %url, attempt, error = %e, "JWKS fetch failed");
                    last_error = e;
                }
            }
        }
        Err(IdentityError::JwksFetch(last_error))
    }

    async fn fetch_jwks_once(&self, url: &str) -> Result<HashMap<String, DecodingKey>, String> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.to_string())?
            .error_for_status()
            .map_err(|e| e.to_string())?;

        let jwks: JwkSet = response.json().await.map_err(|e| e.to_string())?;
        Ok(decoding_keys(&jwks))
    }
}

/// The JWKS document location for an SSO team domain.
pub fn jwks_url(team_domain: &str) -> String {
    let domain = team_domain
        .trim_start_matches("https://")
        .trim_end_matches('/');
    format!("https://{domain}/cdn-cgi/access/certs")
}

/// Materialize decoding keys from a JWKS document, keyed by kid.
pub fn decoding_keys(jwks: &JwkSet) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::new();
    for jwk in &jwks.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys.insert(kid, key);
            }
            Err(e) => warn!(kid = %kid, error = %e, "Skipping unusable JWK"),
        }
    }
    keys
}

/// Allowlist membership check shared by HTTP and WS entry points.
pub fn check_allowlisted<'a>(
    email: &'a str,
    allowlist: impl IntoIterator<Item = &'a String>,
) -> Result<(), IdentityError> {
    let email_lower = email.to_lowercase();
    if allowlist.into_iter().any(|e| e.as_str() == email_lower) {
        Ok(())
    } else {
        Err(IdentityError::NotAllowlisted(email_lower))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(dev_mode: bool) -> IdentityGate {
        IdentityGate::new(IdentityConfig {
            team_domain: Some("team.example.com".to_string()),
            audience: Some("expected-aud".to_string()),
            dev_mode,
        })
    }

    #[test]
    fn jwks_url_normalizes_domain() {
        assert_eq!(
            jwks_url("team.example.com"),
            "https://team.example.com/cdn-cgi/access/certs"
        );
        assert_eq!(
            jwks_url("https://team.example.com/"),
            "https://team.example.com/cdn-cgi/access/certs"
        );
    }

    #[test]
    fn dev_identity_requires_dev_mode() {
        let gate = gate(false);
        assert!(matches!(
            gate.dev_identity(Some("u@x.com")),
            Err(IdentityError::MissingToken)
        ));
    }

    #[test]
    fn dev_identity_lowercases_email() {
        let gate = gate(true);
        assert_eq!(gate.dev_identity(Some("User@X.Com")).unwrap(), "user@x.com");
    }

    #[test]
    fn dev_identity_rejects_blank_email() {
        let gate = gate(true);
        assert!(gate.dev_identity(Some("   ")).is_err());
        assert!(gate.dev_identity(None).is_err());
    }

    #[tokio::test]
    async fn empty_token_is_missing() {
        let gate = gate(false);
        assert!(matches!(
            gate.verify_token("").await,
            Err(IdentityError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn garbage_token_is_invalid() {
        let gate = gate(false);
        assert!(matches!(
            gate.verify_token("not-a-jwt").await,
            Err(IdentityError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn missing_audience_is_config_error() {
        let gate = IdentityGate::new(IdentityConfig {
            team_domain: Some("team.example.com".to_string()),
            audience: None,
            dev_mode: false,
        });
        assert!(matches!(
            gate.verify_token("x.y.z").await,
            Err(IdentityError::ConfigMissing("CF_ACCESS_AUD"))
        ));
    }

    #[test]
    fn decoding_keys_skips_entries_without_kid() {
        let jwks: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [
                {
                    "kty": "RSA",
                    "alg": "RS256",
                    "use": "sig",
                    // no kid
                    "n": "uNxIPrRQo1dcWUT8eXIqdVh21aJ1rvnBrYXq149nbTNPjzcCSXHhlNaT_GM8cYY8Wnyb_i_2z5xYYjdnUhBPrW6uCZ3GgWjmUIfRxvd-G7fx3dCBW0cVcyjWLioRmE7h2Hq-0SQaS8dAi4nPSL7kd4M1g3L0S8WVJ4Jz8u1E6b0n1YKRh6cYrLnhZQW7K5fPBC0xRMZ5PqxUJf8QY95gQF6dR3VnPmXvBXAO2VRnHfkFmqPPi62KOh_0HbBxIo7c0KTY0YQxhlVZ5Z8Y7PMZC8mCf6mkxSbW1JcGYkb3r5hHDYqmKvB6bsKz9o8HqeKcW7wDgdyRkIAd4jQpu6eWLw",
                    "e": "AQAB"
                }
            ]
        }))
        .expect("jwk set parses");

        let keys = decoding_keys(&jwks);
        assert!(keys.is_empty());
    }

    #[test]
    fn allowlist_is_case_insensitive_on_the_request_side() {
        let allowlist = vec!["alice@example.com".to_string()];
        assert!(check_allowlisted("Alice@Example.com", &allowlist).is_ok());
        assert!(matches!(
            check_allowlisted("mallory@example.com", &allowlist),
            Err(IdentityError::NotAllowlisted(_))
        ));
    }
}
