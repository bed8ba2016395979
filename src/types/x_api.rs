use serde::{Deserialize, Serialize};

/// `GET /2/users/me` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct UsersMeResponse {
    pub data: XUser,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct XUser {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TargetPost<'a> {
    pub tweet_id: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReplyBody<'a> {
    pub text: &'a str,
    pub reply: ReplyTarget<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReplyTarget<'a> {
    pub in_reply_to_tweet_id: &'a str,
}
