//! X OAuth 2.0: login endpoints and on-demand token refresh.

pub mod endpoints;
pub mod refresher;

pub use endpoints::{TokenExchange, TokenGrant, XOauthEndpoints};
pub use refresher::{TokenRefresher, is_expired};
