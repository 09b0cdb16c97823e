pub mod claims;
pub mod cookies;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod password;
pub mod services;
pub mod tokens;
