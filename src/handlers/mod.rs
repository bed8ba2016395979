pub mod admin;
pub mod oauth;
