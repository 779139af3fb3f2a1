pub mod analytics_service;
pub mod api;
pub mod config;
pub mod http;
pub mod memory_repo;
mod orm;
pub mod redirect_service;
pub mod short_code;
pub mod shorten_service;
pub mod url_repo;
