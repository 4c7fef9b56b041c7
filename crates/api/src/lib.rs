//! HTTP surface: streaming subscriptions, system routes, server config.

pub mod app;
pub mod config;
