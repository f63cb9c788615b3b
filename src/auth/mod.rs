pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod repo;
pub mod reset;
pub mod services;

pub use extractors::CurrentUser;
pub use repo::{Role, User};
