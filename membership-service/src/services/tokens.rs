use axum::http::{header, HeaderMap};
use chrono::Utc;
use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use rand::Rng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::cache::TokenCache;
use super::error::AuthError;
use super::metrics;
use crate::config::JwtConfig;
use crate::models::permission::{self, PermissionSet};

/// Extra lifetime given to cache entries over the signed expiry.
pub const CACHE_GRACE_SECONDS: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub token_uuid: String,
    pub refresh_uuid: String,
    pub user_uuid: Uuid,
    pub permissions: PermissionSet,
    pub exp: i64,
}

/// Claims carried by a refresh token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub token_uuid: String,
    pub user_uuid: Uuid,
    pub exp: i64,
}

/// A claims shape that can be verified against the cache.
pub trait TokenClaims: DeserializeOwned {
    const KIND: TokenKind;

    fn token_uuid(&self) -> &str;
    fn member_uuid(&self) -> Uuid;
    fn exp(&self) -> i64;
}

impl TokenClaims for AccessClaims {
    const KIND: TokenKind = TokenKind::Access;

    fn token_uuid(&self) -> &str {
        &self.token_uuid
    }

    fn member_uuid(&self) -> Uuid {
        self.user_uuid
    }

    fn exp(&self) -> i64 {
        self.exp
    }
}

impl TokenClaims for RefreshClaims {
    const KIND: TokenKind = TokenKind::Refresh;

    fn token_uuid(&self) -> &str {
        &self.token_uuid
    }

    fn member_uuid(&self) -> Uuid {
        self.user_uuid
    }

    fn exp(&self) -> i64 {
        self.exp
    }
}

/// Tokens minted together by `create_token`.
///
/// Single-purpose tokens are minted without a refresh lifetime; they have no
/// refresh token and `refresh_uuid` is only a correlation id in the claims.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub member_uuid: Uuid,
    pub access_token: String,
    pub access_uuid: String,
    pub access_expires: i64,
    pub refresh_token: Option<String>,
    pub refresh_uuid: String,
    pub refresh_expires: Option<i64>,
}

/// Verified identity pulled from a request's bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessTokenDetails {
    pub access_uuid: String,
    pub refresh_uuid: String,
    pub member_uuid: Uuid,
    pub permissions: PermissionSet,
}

impl From<AccessClaims> for AccessTokenDetails {
    fn from(claims: AccessClaims) -> Self {
        Self {
            access_uuid: claims.token_uuid,
            refresh_uuid: claims.refresh_uuid,
            member_uuid: claims.user_uuid,
            permissions: claims.permissions,
        }
    }
}

/// Issues and verifies HMAC-signed tokens whose ids live in the token cache.
#[derive(Clone)]
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    config: JwtConfig,
    cache: Arc<dyn TokenCache>,
}

impl TokenService {
    pub fn new(config: &JwtConfig, cache: Arc<dyn TokenCache>) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(config.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(config.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(config.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(config.refresh_secret.as_bytes()),
            config: config.clone(),
            cache,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Mint a session pair with the configured lifetimes.
    pub async fn create_session(
        &self,
        member_uuid: Uuid,
        permissions: &PermissionSet,
    ) -> Result<TokenPair, AuthError> {
        self.create_token(
            member_uuid,
            permissions,
            self.config.access_ttl_minutes,
            self.config.refresh_ttl_days,
        )
        .await
    }

    /// Sign an access token and, when `refresh_ttl_days > 0`, a refresh token,
    /// then register both ids in the cache.
    #[tracing::instrument(skip_all, fields(member_uuid = %member_uuid))]
    pub async fn create_token(
        &self,
        member_uuid: Uuid,
        permissions: &PermissionSet,
        access_ttl_minutes: i64,
        refresh_ttl_days: i64,
    ) -> Result<TokenPair, AuthError> {
        let now = Utc::now().timestamp();
        let access_uuid = generate_token_id();
        let refresh_uuid = generate_token_id();

        let access_claims = AccessClaims {
            token_uuid: access_uuid.clone(),
            refresh_uuid: refresh_uuid.clone(),
            user_uuid: member_uuid,
            permissions: permissions.clone(),
            exp: now + access_ttl_minutes * 60,
        };
        let access_token = encode(
            &Header::new(Algorithm::HS256),
            &access_claims,
            &self.access_encoding,
        )
        .map_err(AuthError::Signing)?;

        let refresh = if refresh_ttl_days > 0 {
            let refresh_claims = RefreshClaims {
                token_uuid: refresh_uuid.clone(),
                user_uuid: member_uuid,
                exp: now + refresh_ttl_days * 86_400,
            };
            let token = encode(
                &Header::new(Algorithm::HS256),
                &refresh_claims,
                &self.refresh_encoding,
            )
            .map_err(AuthError::Signing)?;
            Some((token, refresh_claims.exp))
        } else {
            None
        };

        let member = member_uuid.to_string();
        self.cache
            .set(
                &access_uuid,
                &member,
                cache_ttl_seconds(access_claims.exp, now),
            )
            .await
            .map_err(AuthError::CacheWrite)?;

        if let Some((_, refresh_exp)) = &refresh {
            if let Err(e) = self
                .cache
                .set(&refresh_uuid, &member, cache_ttl_seconds(*refresh_exp, now))
                .await
            {
                // The access id is already live; drop it so neither token is usable.
                if let Err(del_err) = self.cache.del(&access_uuid).await {
                    tracing::warn!(error = %del_err, "Failed to discard access token id");
                }
                return Err(AuthError::CacheWrite(e));
            }
        }

        metrics::record_token_issued(TokenKind::Access.as_str());
        if refresh.is_some() {
            metrics::record_token_issued(TokenKind::Refresh.as_str());
        }

        let (refresh_token, refresh_expires) = match refresh {
            Some((token, exp)) => (Some(token), Some(exp)),
            None => (None, None),
        };

        Ok(TokenPair {
            member_uuid,
            access_token,
            access_uuid,
            access_expires: access_claims.exp,
            refresh_token,
            refresh_uuid,
            refresh_expires,
        })
    }

    /// Check algorithm, signature and expiry, then require the token id to
    /// still be present in the cache.
    pub async fn verify_token<C: TokenClaims>(&self, token: &str) -> Result<C, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::SignatureInvalid)?;
        if !matches!(
            header.alg,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            tracing::warn!(alg = ?header.alg, "Rejected token with non-HMAC algorithm");
            return Err(AuthError::SignatureInvalid);
        }

        let key = match C::KIND {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.algorithms = vec![Algorithm::HS256, Algorithm::HS384, Algorithm::HS512];
        validation.leeway = 0;
        validation.validate_exp = true;

        let claims = decode::<C>(token, key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                ErrorKind::Json(_) | ErrorKind::MissingRequiredClaim(_) => {
                    AuthError::MalformedClaims
                }
                _ => AuthError::SignatureInvalid,
            })?
            .claims;

        // The library tolerates exp == now; a zero lifetime must not.
        if claims.exp() <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        let cached = self
            .cache
            .get(claims.token_uuid())
            .await
            .map_err(AuthError::Cache)?;

        match cached {
            Some(member) if member == claims.member_uuid().to_string() => Ok(claims),
            Some(_) => {
                tracing::warn!(kind = C::KIND.as_str(), "Cached token owner mismatch");
                Err(AuthError::Revoked)
            }
            None => Err(AuthError::Revoked),
        }
    }

    pub async fn verify_access(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.verify_token::<AccessClaims>(token).await
    }

    pub async fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, AuthError> {
        self.verify_token::<RefreshClaims>(token).await
    }

    /// Verify the bearer token from the `Authorization` header.
    pub async fn extract_access_claims(
        &self,
        headers: &HeaderMap,
    ) -> Result<AccessTokenDetails, AuthError> {
        let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;
        let claims = self.verify_access(token).await?;
        Ok(claims.into())
    }

    /// Remove a token id from the cache, returning how many entries went away.
    pub async fn revoke(&self, token_uuid: &str) -> Result<u64, AuthError> {
        self.cache.del(token_uuid).await.map_err(AuthError::Cache)
    }

    /// Single-purpose token allowing its holder to set login credentials.
    pub async fn reset_credentials_token(
        &self,
        member_uuid: Uuid,
        ttl_minutes: i64,
    ) -> Result<String, AuthError> {
        let permissions = PermissionSet::single(permission::RESET_CREDENTIALS);
        let pair = self
            .create_token(member_uuid, &permissions, ttl_minutes, 0)
            .await?;
        Ok(pair.access_token)
    }

    /// Single-purpose token allowing its holder to answer event participation.
    pub async fn participate_event_token(
        &self,
        member_uuid: Uuid,
        ttl_minutes: i64,
    ) -> Result<String, AuthError> {
        let permissions = PermissionSet::single(permission::PARTICIPATE_EVENT);
        let pair = self
            .create_token(member_uuid, &permissions, ttl_minutes, 0)
            .await?;
        Ok(pair.access_token)
    }
}

/// The second whitespace-separated field of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let mut fields = value.split_whitespace();
    let scheme = fields.next()?;
    let token = fields.next()?;
    if fields.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token)
}

fn generate_token_id() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 16] = rng.gen();
    hex::encode(bytes)
}

fn cache_ttl_seconds(exp: i64, now: i64) -> u64 {
    (exp + CACHE_GRACE_SECONDS - now).max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache::MockTokenCache;
    use axum::http::HeaderValue;

    fn jwt_config() -> JwtConfig {
        JwtConfig {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            access_ttl_minutes: 15,
            refresh_ttl_days: 7,
            registration_ttl_minutes: 10080,
            reset_ttl_minutes: 60,
            participation_ttl_minutes: 4320,
        }
    }

    fn service() -> (TokenService, Arc<MockTokenCache>) {
        let cache = Arc::new(MockTokenCache::new());
        (TokenService::new(&jwt_config(), cache.clone()), cache)
    }

    fn member_and_admin() -> PermissionSet {
        PermissionSet::from_iter([permission::MEMBER, permission::ADMIN])
    }

    #[tokio::test]
    async fn created_access_token_verifies() {
        let (service, cache) = service();
        let member = Uuid::new_v4();
        let pair = service
            .create_token(member, &member_and_admin(), 15, 7)
            .await
            .unwrap();

        assert_ne!(pair.access_uuid, pair.refresh_uuid);
        assert_eq!(pair.access_uuid.len(), 32);
        assert_eq!(cache.len(), 2);

        let claims = service.verify_access(&pair.access_token).await.unwrap();
        assert_eq!(claims.user_uuid, member);
        assert_eq!(claims.token_uuid, pair.access_uuid);
        assert_eq!(claims.refresh_uuid, pair.refresh_uuid);
        assert_eq!(claims.permissions, member_and_admin());

        let refresh = service
            .verify_refresh(pair.refresh_token.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(refresh.token_uuid, pair.refresh_uuid);
    }

    #[tokio::test]
    async fn zero_access_ttl_is_expired() {
        let (service, _) = service();
        let pair = service
            .create_token(Uuid::new_v4(), &member_and_admin(), 0, 7)
            .await
            .unwrap();

        let err = service.verify_access(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Expired));
    }

    #[tokio::test]
    async fn evicted_token_is_revoked() {
        let (service, _) = service();
        let pair = service
            .create_token(Uuid::new_v4(), &member_and_admin(), 15, 7)
            .await
            .unwrap();

        assert_eq!(service.revoke(&pair.access_uuid).await.unwrap(), 1);
        let err = service.verify_access(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));
    }

    #[tokio::test]
    async fn tokens_are_not_interchangeable() {
        let (service, _) = service();
        let pair = service
            .create_token(Uuid::new_v4(), &member_and_admin(), 15, 7)
            .await
            .unwrap();

        let err = service
            .verify_access(pair.refresh_token.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid));

        let err = service.verify_refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid));
    }

    #[tokio::test]
    async fn non_hmac_algorithm_is_rejected() {
        let (service, _) = service();
        // {"alg":"none","typ":"JWT"}
        let forged = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.e30.";
        let err = service.verify_access(forged).await.unwrap_err();
        assert!(matches!(err, AuthError::SignatureInvalid));
    }

    #[tokio::test]
    async fn missing_claim_is_malformed() {
        let (service, _) = service();
        #[derive(Serialize)]
        struct Partial {
            token_uuid: String,
            exp: i64,
        }
        let token = encode(
            &Header::new(Algorithm::HS256),
            &Partial {
                token_uuid: "abc".to_string(),
                exp: Utc::now().timestamp() + 600,
            },
            &EncodingKey::from_secret(b"access-secret"),
        )
        .unwrap();

        let err = service.verify_access(&token).await.unwrap_err();
        assert!(matches!(err, AuthError::MalformedClaims));
    }

    #[tokio::test]
    async fn cache_write_failure_issues_nothing() {
        let (service, cache) = service();
        cache.fail_writes(true);
        let err = service
            .create_token(Uuid::new_v4(), &member_and_admin(), 15, 7)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CacheWrite(_)));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn single_purpose_token_has_no_refresh() {
        let (service, cache) = service();
        let member = Uuid::new_v4();
        let token = service.participate_event_token(member, 60).await.unwrap();

        assert_eq!(cache.len(), 1);
        let claims = service.verify_access(&token).await.unwrap();
        assert_eq!(
            claims.permissions,
            PermissionSet::single(permission::PARTICIPATE_EVENT)
        );
    }

    #[tokio::test]
    async fn extracts_claims_from_bearer_header() {
        let (service, _) = service();
        let member = Uuid::new_v4();
        let pair = service
            .create_token(member, &member_and_admin(), 15, 7)
            .await
            .unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", pair.access_token)).unwrap(),
        );
        let details = service.extract_access_claims(&headers).await.unwrap();
        assert_eq!(details.member_uuid, member);
        assert_eq!(details.permissions, member_and_admin());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer"));
        let err = service.extract_access_claims(&headers).await.unwrap_err();
        assert!(matches!(err, AuthError::MissingToken));
    }

    #[test]
    fn bearer_token_needs_exactly_two_fields() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc def"),
        );
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn cache_ttl_adds_grace() {
        assert_eq!(cache_ttl_seconds(100, 100), 1);
        assert_eq!(cache_ttl_seconds(160, 100), 61);
        assert_eq!(cache_ttl_seconds(10, 100), 0);
    }
}
