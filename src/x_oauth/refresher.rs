use crate::db::{Account, AccountsStorage, AuditAction, AuditLog, NewAuditEntry};
use crate::service::events::EventBroadcaster;
use crate::x_oauth::endpoints::{TokenExchange, TokenGrant};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Credentials expiring within this many seconds are refreshed before use.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// True when the account has no expiry on file or expires within the margin.
pub fn is_expired(account: &Account, now: DateTime<Utc>) -> bool {
    match account.expires_at {
        None => true,
        Some(expires_at) => expires_at < now + TimeDelta::seconds(EXPIRY_MARGIN_SECS),
    }
}

/// Renews access credentials; never fails, the caller always gets an account back.
#[derive(Clone)]
pub struct TokenRefresher {
    exchange: Arc<dyn TokenExchange>,
    accounts: AccountsStorage,
    audit: AuditLog,
    events: EventBroadcaster,
}

impl TokenRefresher {
    pub fn new(
        exchange: Arc<dyn TokenExchange>,
        accounts: AccountsStorage,
        audit: AuditLog,
        events: EventBroadcaster,
    ) -> Self {
        Self {
            exchange,
            accounts,
            audit,
            events,
        }
    }

    /// Returns the account with new credentials, or unchanged when there is no
    /// refresh token or the exchange fails.
    pub async fn refresh(&self, account: Account) -> Account {
        let Some(refresh_token) = account.refresh_token.clone() else {
            debug!(account = %account.username, "no refresh token; skipping refresh");
            return account;
        };

        match self.exchange.refresh(&refresh_token).await {
            Ok(grant) => self.apply(account, grant).await,
            Err(e) => {
                let note = e.audit_note();
                warn!(
                    account = %account.username,
                    error = %e,
                    "token refresh failed; keeping old credential"
                );
                let entry =
                    NewAuditEntry::fail(&account.username, AuditAction::Refresh, None, &note);
                if let Err(db_err) = self.audit.append(entry).await {
                    error!(account = %account.username, error = %db_err, "audit write failed");
                }
                self.events
                    .announce(format!("[{}] refresh ❌ ({note})", account.username));
                account
            }
        }
    }

    async fn apply(&self, mut account: Account, grant: TokenGrant) -> Account {
        account.expires_at = grant.expires_at(Utc::now());
        account.access_token = grant.access_token;
        if let Some(refresh_token) = grant.refresh_token {
            account.refresh_token = Some(refresh_token);
        }
        if grant.token_type.is_some() {
            account.token_type = grant.token_type;
        }

        if let Err(e) = self
            .accounts
            .update_tokens(
                account.id,
                &account.access_token,
                account.refresh_token.as_deref(),
                account.token_type.as_deref(),
                account.expires_at,
            )
            .await
        {
            error!(account = %account.username, error = %e, "failed to persist refreshed token");
        } else {
            info!(account = %account.username, expires_at = ?account.expires_at, "access token refreshed");
        }
        account
    }
}
