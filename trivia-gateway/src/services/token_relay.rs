//! Verify a CMS access token, falling back to a single refresh.

use std::sync::Arc;
use std::time::Duration;

use crate::models::{CmsUser, TokenPair};

use super::cms_client::CmsClient;
use super::error::GatewayError;

#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// The presented access token is still good.
    Verified(CmsUser),
    /// The access token was rejected or missing; a refresh produced new tokens
    /// which the caller must write back to the client.
    Refreshed { user: CmsUser, tokens: TokenPair },
    /// Neither token is usable. The caller must clear its cookies.
    RequiresAuth,
}

#[derive(Clone)]
pub struct TokenRelay {
    cms: Arc<CmsClient>,
    verify_timeout: Duration,
}

impl TokenRelay {
    pub fn new(cms: Arc<CmsClient>, verify_timeout: Duration) -> Self {
        Self {
            cms,
            verify_timeout,
        }
    }

    /// Transport failures and timeouts on the first verify are returned as
    /// errors and never trigger a refresh.
    pub async fn authenticate(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) -> Result<RelayOutcome, GatewayError> {
        if let Some(access) = access_token.filter(|t| !t.is_empty()) {
            match self.verify(access).await {
                Ok(user) => return Ok(RelayOutcome::Verified(user)),
                Err(GatewayError::TokenRejected) => {
                    tracing::debug!("Access token rejected by CMS, attempting refresh");
                }
                Err(e) => return Err(e),
            }
        }

        let Some(refresh) = refresh_token.filter(|t| !t.is_empty()) else {
            return Ok(RelayOutcome::RequiresAuth);
        };

        Ok(match self.refresh(refresh).await {
            Some((user, tokens)) => RelayOutcome::Refreshed { user, tokens },
            None => RelayOutcome::RequiresAuth,
        })
    }

    /// Exchange the refresh token once and verify the result. `None` means the
    /// caller has to authenticate again.
    pub async fn refresh(&self, refresh_token: &str) -> Option<(CmsUser, TokenPair)> {
        let tokens = match self.cms.refresh(refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::info!(error = %e, "Token refresh failed");
                return None;
            }
        };

        match self.verify(&tokens.access_token).await {
            Ok(user) => Some((user, tokens)),
            Err(e) => {
                tracing::warn!(error = %e, "Refreshed access token failed verification");
                None
            }
        }
    }

    async fn verify(&self, access_token: &str) -> Result<CmsUser, GatewayError> {
        tokio::time::timeout(self.verify_timeout, self.cms.verify(access_token))
            .await
            .map_err(|_| GatewayError::CmsUnavailable("Token verification timed out".to_string()))?
    }
}
