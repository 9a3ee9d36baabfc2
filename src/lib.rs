pub mod api;
pub mod bot;
pub mod config;
pub mod download;
pub mod extraction;
pub mod formats;
pub mod humanize;
pub mod observability;
pub mod pipeline;
pub mod session;
pub mod staging;
