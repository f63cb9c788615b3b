pub mod dto;
pub mod geo;
pub mod handlers;
pub mod repo;
pub mod reports;
