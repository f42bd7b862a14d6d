pub mod api;
pub mod auth;
pub mod messages;
pub mod session;
