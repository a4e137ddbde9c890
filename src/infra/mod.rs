//! Infrastructure adapters and runtime bootstrap.

pub mod browser;
pub mod error;
mod fetch;
pub mod http;
pub mod sitemap;
pub mod stylesheets;
pub mod telemetry;
