#![allow(clippy::uninlined_format_args)]

pub mod api;
pub mod app;
pub mod auth;
pub mod banner;
pub mod config;
pub mod controller;
pub mod data;
pub mod filter;
pub mod images;
pub mod markdown;
pub mod pagination;
pub mod state;
pub mod storage;
pub mod ui;
pub mod urlstate;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
