//! OIDC bearer-token verification
//!
//! Provider-agnostic: discovery (`/.well-known/openid-configuration`) gives
//! the JWKS endpoint, keys are cached by `kid` and refreshed lazily when a
//! token arrives with an unknown one (rate-limited so a flood of bad
//! tokens cannot hammer the provider). Claim `sub` becomes the caller's
//! user ID.

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::errors::{AppError, Result};

/// 两次 JWKS 刷新之间的最小间隔
const JWKS_REFRESH_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct VerifiedClaims {
    /// `sub`，即 creator_user_id
    pub subject: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: String,
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoveryDocument {
    jwks_uri: String,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kty: String,
    kid: Option<String>,
    n: Option<String>,
    e: Option<String>,
}

struct KeyCache {
    keys: HashMap<String, DecodingKey>,
    last_refresh: Option<Instant>,
}

pub struct OidcVerifier {
    http: reqwest::Client,
    issuer: String,
    audience: String,
    cache: RwLock<KeyCache>,
}

impl OidcVerifier {
    pub fn new(config: &AuthConfig) -> Result<Self> {
        if config.issuer.is_empty() {
            return Err(AppError::internal("OIDC issuer is required"));
        }
        if config.audience.is_empty() {
            return Err(AppError::internal("OIDC audience is required"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| AppError::internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            issuer: config.issuer.trim_end_matches('/').to_string(),
            audience: config.audience.clone(),
            cache: RwLock::new(KeyCache {
                keys: HashMap::new(),
                last_refresh: None,
            }),
        })
    }

    /// Verify a bearer token: signature against the JWKS, then `exp`,
    /// `iss` and `aud`. Every failure maps to a specific 401 reason.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims> {
        let header =
            decode_header(token).map_err(|_| AppError::unauthorized("Invalid token"))?;

        // RS256 家族之外的算法一律拒绝（防 alg 混淆）
        if !matches!(
            header.alg,
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512
        ) {
            return Err(AppError::unauthorized("Invalid token"));
        }

        let kid = header
            .kid
            .ok_or_else(|| AppError::unauthorized("Invalid token"))?;

        let key = match self.key_for(&kid).await {
            Some(key) => key,
            None => {
                self.refresh_keys().await?;
                self.key_for(&kid)
                    .await
                    .ok_or_else(|| AppError::unauthorized("Invalid signature"))?
            }
        };

        let mut validation = Validation::new(header.alg);
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        validation.validate_exp = true;

        let data = decode::<TokenClaims>(token, &key, &validation).map_err(map_jwt_error)?;

        Ok(VerifiedClaims {
            subject: data.claims.sub,
            email: data.claims.email,
        })
    }

    async fn key_for(&self, kid: &str) -> Option<DecodingKey> {
        self.cache.read().await.keys.get(kid).cloned()
    }

    /// 拉取 JWKS（带冷却），替换整套密钥
    async fn refresh_keys(&self) -> Result<()> {
        {
            let cache = self.cache.read().await;
            if let Some(last) = cache.last_refresh {
                if last.elapsed() < JWKS_REFRESH_COOLDOWN && !cache.keys.is_empty() {
                    return Ok(());
                }
            }
        }

        let mut cache = self.cache.write().await;
        // 双检：等待写锁期间别的任务可能已经刷新过
        if let Some(last) = cache.last_refresh {
            if last.elapsed() < JWKS_REFRESH_COOLDOWN && !cache.keys.is_empty() {
                return Ok(());
            }
        }

        let discovery_url = format!("{}/.well-known/openid-configuration", self.issuer);
        debug!("Fetching OIDC discovery document from {}", discovery_url);

        let discovery: DiscoveryDocument = self
            .http
            .get(&discovery_url)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::upstream_unavailable(format!("OIDC discovery failed: {e}")))?
            .json()
            .await?;

        let jwks: JwkSet = self
            .http
            .get(&discovery.jwks_uri)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| AppError::upstream_unavailable(format!("JWKS fetch failed: {e}")))?
            .json()
            .await?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if jwk.kty != "RSA" {
                continue;
            }
            let (Some(kid), Some(n), Some(e)) = (jwk.kid, jwk.n, jwk.e) else {
                continue;
            };
            match DecodingKey::from_rsa_components(&n, &e) {
                Ok(key) => {
                    keys.insert(kid, key);
                }
                Err(err) => {
                    warn!(kid = %kid, error = %err, "Skipping malformed JWK");
                }
            }
        }

        info!("JWKS refreshed: {} signing keys", keys.len());
        cache.keys = keys;
        cache.last_refresh = Some(Instant::now());
        Ok(())
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AppError {
    use jsonwebtoken::errors::ErrorKind;

    match err.kind() {
        ErrorKind::ExpiredSignature => AppError::unauthorized("Token expired"),
        ErrorKind::InvalidIssuer => AppError::unauthorized("Invalid issuer"),
        ErrorKind::InvalidAudience => AppError::unauthorized("Invalid audience"),
        ErrorKind::InvalidSignature => AppError::unauthorized("Invalid signature"),
        _ => AppError::unauthorized("Invalid token"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_issuer_and_audience() {
        let missing_issuer = AuthConfig {
            issuer: "".into(),
            audience: "app".into(),
        };
        assert!(OidcVerifier::new(&missing_issuer).is_err());

        let missing_audience = AuthConfig {
            issuer: "https://idp.example".into(),
            audience: "".into(),
        };
        assert!(OidcVerifier::new(&missing_audience).is_err());

        let ok = AuthConfig {
            issuer: "https://idp.example/".into(),
            audience: "app".into(),
        };
        let verifier = OidcVerifier::new(&ok).unwrap();
        // 尾部斜杠被归一
        assert_eq!(verifier.issuer, "https://idp.example");
    }

    #[tokio::test]
    async fn test_garbage_token_is_unauthorized() {
        let verifier = OidcVerifier::new(&AuthConfig {
            issuer: "https://idp.example".into(),
            audience: "app".into(),
        })
        .unwrap();

        let err = verifier.verify("not-a-jwt").await.unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[test]
    fn test_jwt_error_mapping() {
        use jsonwebtoken::errors::{Error, ErrorKind};

        assert_eq!(
            map_jwt_error(Error::from(ErrorKind::ExpiredSignature)).message(),
            "Token expired"
        );
        assert_eq!(
            map_jwt_error(Error::from(ErrorKind::InvalidAudience)).message(),
            "Invalid audience"
        );
        assert_eq!(
            map_jwt_error(Error::from(ErrorKind::InvalidIssuer)).message(),
            "Invalid issuer"
        );
        assert_eq!(
            map_jwt_error(Error::from(ErrorKind::InvalidSignature)).message(),
            "Invalid signature"
        );
    }
}
