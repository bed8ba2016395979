use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Redirect, Response};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use time::Duration;
use tracing::debug;

use crate::db::{Account, AccountsStorage};
use crate::error::RallyError;
use crate::router::RallyState;

/// Private cookie holding the signed-in account's internal id.
pub const SESSION_COOKIE: &str = "rally_session";

const SESSION_DAYS: i64 = 7;

pub fn session_cookie(account_id: i64, secure: bool) -> Cookie<'static> {
    Cookie::build(Cookie::new(SESSION_COOKIE, account_id.to_string()))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(Duration::days(SESSION_DAYS))
        .build()
}

pub fn clear_session(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(Cookie::build(SESSION_COOKIE).path("/").build())
}

/// The account behind the session cookie, if any.
pub async fn session_account(
    jar: &PrivateCookieJar,
    accounts: &AccountsStorage,
) -> Result<Option<Account>, RallyError> {
    let Some(id) = jar
        .get(SESSION_COOKIE)
        .and_then(|c| c.value().parse::<i64>().ok())
    else {
        return Ok(None);
    };
    accounts.get_by_id(id).await
}

/// Extractor for routes reserved to administrators.
///
/// No valid session redirects to `/`; a non-admin session gets 403.
#[derive(Debug, Clone)]
pub struct AdminSession(pub Account);

impl FromRequestParts<RallyState> for AdminSession {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &RallyState,
    ) -> Result<Self, Self::Rejection> {
        let jar = PrivateCookieJar::from_headers(&parts.headers, state.cookie_key.clone());
        let account = session_account(&jar, &state.db.accounts)
            .await
            .map_err(IntoResponse::into_response)?;

        match account {
            None => {
                debug!(path = %parts.uri.path(), "no session; redirecting to /");
                Err(Redirect::to("/").into_response())
            }
            Some(account) if !account.is_admin() => {
                debug!(account = %account.username, "non-admin session rejected");
                Err(RallyError::Forbidden.into_response())
            }
            Some(account) => Ok(Self(account)),
        }
    }
}
