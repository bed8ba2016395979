use crate::config::XConfig;
use crate::error::{IsRetryable, RallyError, XApiError};
use crate::types::x_api::{UsersMeResponse, XUser};

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, TimeDelta, Utc};
use oauth2::{
    AuthUrl, AuthorizationCode, Client as OAuth2Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    Scope, StandardRevocableToken, TokenResponse, TokenUrl,
    basic::{
        BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
        BasicTokenResponse,
    },
};
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

pub fn default_retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
}

/// Tokens issued by the X token endpoint.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<Duration>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.expires_in
            .and_then(|d| TimeDelta::from_std(d).ok())
            .map(|d| now + d)
    }
}

impl From<&BasicTokenResponse> for TokenGrant {
    fn from(token: &BasicTokenResponse) -> Self {
        Self {
            access_token: token.access_token().secret().clone(),
            refresh_token: token.refresh_token().map(|t| t.secret().clone()),
            expires_in: token.expires_in(),
            token_type: Some(token.token_type().as_ref().to_string()),
            scope: token.scopes().map(|scopes| {
                scopes
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(" ")
            }),
        }
    }
}

/// Exchange of a refresh credential for a new access credential.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RallyError>;
}

/// X OAuth 2.0 endpoints (authorization code with PKCE, refresh, identity).
pub struct XOauthEndpoints {
    client: XOauth2Client,
    http: reqwest::Client,
    scopes: Vec<Scope>,
    users_me_url: String,
    retry_policy: ExponentialBuilder,
}

impl XOauthEndpoints {
    pub fn new(
        cfg: &XConfig,
        redirect_uri: &Url,
        http: reqwest::Client,
    ) -> Result<Self, RallyError> {
        let mut client = OAuth2Client::new(ClientId::new(cfg.client_id.clone()))
            .set_auth_uri(AuthUrl::new(cfg.auth_url.as_str().to_string())?)
            .set_token_uri(TokenUrl::new(cfg.token_url.as_str().to_string())?)
            .set_redirect_uri(RedirectUrl::new(redirect_uri.as_str().to_string())?);
        if let Some(secret) = cfg.client_secret.as_ref().filter(|s| !s.is_empty()) {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        let scopes = cfg
            .scopes
            .split_whitespace()
            .map(|s| Scope::new(s.to_string()))
            .collect();
        let users_me_url = format!(
            "{}/2/users/me",
            cfg.api_base.as_str().trim_end_matches('/')
        );

        Ok(Self {
            client,
            http,
            scopes,
            users_me_url,
            retry_policy: default_retry_policy(),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: ExponentialBuilder) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Authorization URL for the consent page, plus the CSRF `state` it carries.
    pub fn build_authorize_url(&self, challenge: PkceCodeChallenge) -> (Url, CsrfToken) {
        self.client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned())
            .set_pkce_challenge(challenge)
            .url()
    }

    pub async fn exchange_authorization_code(
        &self,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
    ) -> Result<TokenGrant, RallyError> {
        let token = self
            .client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(&self.http)
            .await?;
        info!("Authorization code exchanged successfully");
        Ok(TokenGrant::from(&token))
    }

    /// Identity of the token owner, retried on transport errors.
    pub async fn fetch_me(&self, access_token: &str) -> Result<XUser, RallyError> {
        let user = (|| async { self.fetch_me_once(access_token).await })
            .retry(self.retry_policy)
            .when(|e: &RallyError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("users/me retrying after error {}, sleeping {:?}", err, dur);
            })
            .await?;
        info!(x_user_id = %user.id, username = %user.username, "Fetched X identity");
        Ok(user)
    }

    async fn fetch_me_once(&self, access_token: &str) -> Result<XUser, RallyError> {
        let resp = self
            .http
            .get(&self.users_me_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RallyError::XApi(XApiError::from_body(status.as_u16(), &text)));
        }
        let body: UsersMeResponse = resp.json().await?;
        Ok(body.data)
    }
}

#[async_trait]
impl TokenExchange for XOauthEndpoints {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, RallyError> {
        let token = RefreshToken::new(refresh_token.to_string());
        let response = (|| async {
            self.client
                .exchange_refresh_token(&token)
                .request_async(&self.http)
                .await
                .map_err(RallyError::from)
        })
        .retry(self.retry_policy)
        .when(|e: &RallyError| e.is_retryable())
        .notify(|err, dur: Duration| {
            warn!(
                "X OAuth2 refresh retrying after error {}, sleeping {:?}",
                err, dur
            );
        })
        .await?;
        info!("Access token refreshed successfully");
        Ok(TokenGrant::from(&response))
    }
}

pub type XOauth2Client = OAuth2Client<
    BasicErrorResponse,
    BasicTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;
