pub mod broadcast;
pub mod post;
pub mod x_api;
