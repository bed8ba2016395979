use crate::db::Account;
use crate::error::{RallyError, XApiError};
use crate::types::x_api::{ReplyBody, ReplyTarget, TargetPost};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

/// The three engagement calls made on behalf of one account.
///
/// Each call is attempted once; failures carry the remote error detail.
#[async_trait]
pub trait ActionClient: Send + Sync {
    async fn like(&self, account: &Account, post_id: &str) -> Result<Value, RallyError>;

    async fn repost(&self, account: &Account, post_id: &str) -> Result<Value, RallyError>;

    async fn reply(&self, account: &Account, post_id: &str, text: &str)
    -> Result<Value, RallyError>;
}

/// X API v2 client authenticated with each account's bearer token.
pub struct XApiClient {
    client: reqwest::Client,
    api_base: String,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl XApiClient {
    /// `actions_per_minute` caps outbound actions across all accounts; 0 disables the cap.
    pub fn new(client: reqwest::Client, api_base: &Url, actions_per_minute: u32) -> Self {
        let limiter = NonZeroU32::new(actions_per_minute)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));
        Self {
            client,
            api_base: api_base.as_str().trim_end_matches('/').to_string(),
            limiter,
        }
    }

    async fn post_json<T>(&self, token: &str, path: &str, body: &T) -> Result<Value, RallyError>
    where
        T: Serialize + ?Sized,
    {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let url = format!("{}{}", self.api_base, path);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let err = XApiError::from_body(status.as_u16(), &text);
            warn!(%url, status = status.as_u16(), error = %err, "X API call failed");
            return Err(RallyError::XApi(err));
        }
        debug!(%url, "X API call succeeded");
        Ok(resp.json::<Value>().await?)
    }
}

#[async_trait]
impl ActionClient for XApiClient {
    async fn like(&self, account: &Account, post_id: &str) -> Result<Value, RallyError> {
        let path = format!("/2/users/{}/likes", account.x_user_id);
        self.post_json(&account.access_token, &path, &TargetPost { tweet_id: post_id })
            .await
    }

    async fn repost(&self, account: &Account, post_id: &str) -> Result<Value, RallyError> {
        let path = format!("/2/users/{}/retweets", account.x_user_id);
        self.post_json(&account.access_token, &path, &TargetPost { tweet_id: post_id })
            .await
    }

    async fn reply(
        &self,
        account: &Account,
        post_id: &str,
        text: &str,
    ) -> Result<Value, RallyError> {
        let body = ReplyBody {
            text,
            reply: ReplyTarget {
                in_reply_to_tweet_id: post_id,
            },
        };
        self.post_json(&account.access_token, "/2/tweets", &body)
            .await
    }
}
