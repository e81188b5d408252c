pub mod auth;
pub mod cli;
pub mod config;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod loader;
pub mod managers;
pub mod middleware;
pub mod routes;
pub mod routing;
