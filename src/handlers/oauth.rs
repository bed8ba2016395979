use crate::db::AccountGrant;
use crate::middleware::auth::{clear_session, session_account, session_cookie};
use crate::{RallyError, router::RallyState};
use axum::{
    Json,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, PrivateCookieJar, SameSite};
use chrono::Utc;
use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier};
use serde::Deserialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct AuthCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
}

const CSRF_COOKIE: &str = "oauth_csrf_token";
const PKCE_COOKIE: &str = "oauth_pkce_verifier";

/// GET / -> who is signed in, if anyone.
pub async fn index(
    State(state): State<RallyState>,
    jar: PrivateCookieJar,
) -> Result<Response, RallyError> {
    let body = match session_account(&jar, &state.db.accounts).await? {
        Some(account) => json!({
            "signed_in": true,
            "account": {
                "id": account.id,
                "username": account.username,
                "role": account.role,
            },
        }),
        None => json!({ "signed_in": false, "login": "/login" }),
    };
    Ok(Json(body).into_response())
}

/// GET /login -> redirects to X's consent page.
pub async fn login(State(state): State<RallyState>, jar: PrivateCookieJar) -> impl IntoResponse {
    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf_token) = state.oauth.build_authorize_url(challenge);

    let jar = store_oauth_cookies(jar, &csrf_token, verifier.secret());

    info!("Dispatching OAuth redirect");
    (jar, Redirect::temporary(auth_url.as_str()))
}

/// GET /callback -> exchanges the code, stores the account, starts a session.
pub async fn callback(
    State(state): State<RallyState>,
    Query(query): Query<AuthCallbackQuery>,
    jar: PrivateCookieJar,
) -> Response {
    let (pkce_verifier, csrf_cookie, jar) = match load_oauth_session(jar) {
        Ok(data) => data,
        Err((jar, err)) => return respond_with_error(jar, err),
    };

    let Some(state_param) = query.state.as_deref() else {
        return respond_with_error(
            jar,
            RallyError::OauthFlow("missing `state` in callback".to_string()),
        );
    };

    if !bool::from(state_param.as_bytes().ct_eq(csrf_cookie.as_bytes())) {
        return respond_with_error(jar, RallyError::OauthFlow("CSRF token mismatch".to_string()));
    }

    let Some(code) = query.code.as_deref() else {
        return respond_with_error(
            jar,
            RallyError::OauthFlow("missing `code` in callback".to_string()),
        );
    };

    let grant = match state
        .oauth
        .exchange_authorization_code(
            AuthorizationCode::new(code.to_owned()),
            PkceCodeVerifier::new(pkce_verifier),
        )
        .await
    {
        Ok(grant) => grant,
        Err(err) => return respond_with_error(jar, err),
    };

    let user = match state.oauth.fetch_me(&grant.access_token).await {
        Ok(user) => user,
        Err(err) => return respond_with_error(jar, err),
    };

    let account = match state
        .db
        .accounts
        .upsert_from_grant(AccountGrant {
            x_user_id: user.id,
            username: user.username,
            name: user.name,
            expires_at: grant.expires_at(Utc::now()),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            token_type: grant.token_type,
            scope: grant.scope,
        })
        .await
    {
        Ok(account) => account,
        Err(err) => return respond_with_error(jar, err),
    };

    info!(
        account = %account.username,
        role = account.role.as_str(),
        "OAuth callback stored account"
    );
    let jar = jar.add(session_cookie(account.id, state.secure_cookie));
    (jar, Redirect::to("/admin")).into_response()
}

/// GET /logout -> ends the session.
pub async fn logout(jar: PrivateCookieJar) -> impl IntoResponse {
    (clear_session(jar), Redirect::to("/"))
}

fn store_oauth_cookies(
    jar: PrivateCookieJar,
    csrf: &CsrfToken,
    pkce_verifier: &str,
) -> PrivateCookieJar {
    jar.add(build_cookie(CSRF_COOKIE, csrf.secret().to_string()))
        .add(build_cookie(PKCE_COOKIE, pkce_verifier.to_string()))
}

fn load_oauth_session(
    jar: PrivateCookieJar,
) -> Result<(String, String, PrivateCookieJar), (PrivateCookieJar, RallyError)> {
    let Some(csrf_cookie) = jar.get(CSRF_COOKIE).map(|c| c.value().to_owned()) else {
        let jar = clear_oauth_cookies(jar);
        return Err((
            jar,
            RallyError::OauthFlow("Missing CSRF token in cookie".to_string()),
        ));
    };

    let Some(pkce_cookie) = jar.get(PKCE_COOKIE).map(|c| c.value().to_owned()) else {
        let jar = clear_oauth_cookies(jar);
        return Err((
            jar,
            RallyError::OauthFlow("Missing PKCE verifier in cookie".to_string()),
        ));
    };

    let jar = clear_oauth_cookies(jar);

    Ok((pkce_cookie, csrf_cookie, jar))
}

fn clear_oauth_cookies(jar: PrivateCookieJar) -> PrivateCookieJar {
    jar.remove(clear_cookie(CSRF_COOKIE))
        .remove(clear_cookie(PKCE_COOKIE))
}

fn build_cookie(name: &str, value: String) -> Cookie<'static> {
    Cookie::build(Cookie::new(name.to_string(), value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(Duration::minutes(15))
        .build()
}

fn clear_cookie(name: &str) -> Cookie<'static> {
    Cookie::build(Cookie::new(name.to_string(), ""))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

fn respond_with_error(jar: PrivateCookieJar, err: RallyError) -> Response {
    (jar, err.into_response()).into_response()
}
