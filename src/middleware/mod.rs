pub mod admission;
pub mod api_auth;
pub mod session;
