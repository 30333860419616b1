use service_core::error::AppError;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::AuthError;
use super::store::{MemberStore, Store};
use super::tokens::{AccessTokenDetails, TokenPair, TokenService};
use crate::models::PermissionSet;
use crate::utils::{hash_password, verify_password, Password, PasswordHashString};

/// Session lifecycle on top of the token service: login, refresh, logout.
#[derive(Clone)]
pub struct AuthService {
    store: Arc<dyn Store>,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>, tokens: TokenService) -> Self {
        Self { store, tokens }
    }

    /// Check a username/password pair and return the owning member.
    #[instrument(skip_all)]
    pub async fn verify_credentials(
        &self,
        username: &str,
        password: &Password,
    ) -> Result<Uuid, AuthError> {
        let credentials = self
            .store
            .find_credentials_by_username(username)
            .await
            .map_err(|e| AuthError::MemberLoad(anyhow::anyhow!(e)))?
            .ok_or(AuthError::InvalidCredentials)?;

        let hash = PasswordHashString::new(credentials.password_hash);
        verify_password(password, &hash).map_err(|_| AuthError::InvalidCredentials)?;

        Ok(credentials.member_uuid)
    }

    #[instrument(skip_all)]
    pub async fn login(&self, username: &str, password: &Password) -> Result<TokenPair, AuthError> {
        let member_uuid = self.verify_credentials(username, password).await?;
        let permissions = self.member_permissions(member_uuid).await?;
        let pair = self.tokens.create_session(member_uuid, &permissions).await?;

        info!(member_uuid = %member_uuid, "Member logged in");
        Ok(pair)
    }

    /// Permissions derived from the member's current role.
    pub async fn member_permissions(&self, member_uuid: Uuid) -> Result<PermissionSet, AuthError> {
        let member = self
            .store
            .find_member(member_uuid)
            .await
            .map_err(|e| AuthError::MemberLoad(anyhow::anyhow!(e)))?
            .ok_or_else(|| {
                AuthError::MemberLoad(anyhow::anyhow!("Member {} not found", member_uuid))
            })?;

        Ok(member.member_type().permissions())
    }

    /// Evict both ids of the caller's pair. A pair that is already gone is
    /// reported as an error so double logouts surface.
    #[instrument(skip_all, fields(member_uuid = %details.member_uuid))]
    pub async fn logout(&self, details: &AccessTokenDetails) -> Result<(), AuthError> {
        let access_removed = self.tokens.revoke(&details.access_uuid).await?;
        let refresh_removed = self.tokens.revoke(&details.refresh_uuid).await?;

        if access_removed == 0 || refresh_removed == 0 {
            warn!(access_removed, refresh_removed, "Logout of an invalid session");
            return Err(AuthError::CacheDelete);
        }

        info!("Member logged out");
        Ok(())
    }

    /// Consume a refresh token and mint a new pair with fresh permissions.
    #[instrument(skip_all)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.tokens.verify_refresh(refresh_token).await?;

        if self.tokens.revoke(&claims.token_uuid).await? == 0 {
            // Another request consumed it between verification and delete.
            return Err(AuthError::CacheDelete);
        }

        let permissions = self.member_permissions(claims.user_uuid).await?;
        let pair = self
            .tokens
            .create_session(claims.user_uuid, &permissions)
            .await?;

        info!(member_uuid = %claims.user_uuid, "Session refreshed");
        Ok(pair)
    }

    /// Set the login credentials of a member.
    #[instrument(skip(self, username, password), fields(member_uuid = %member_uuid))]
    pub async fn set_credentials(
        &self,
        member_uuid: Uuid,
        username: &str,
        password: &Password,
    ) -> Result<(), AppError> {
        let hash = hash_password(password)?;
        self.store
            .upsert_credentials(member_uuid, username, hash.as_str())
            .await?;
        info!("Credentials set");
        Ok(())
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }
}
