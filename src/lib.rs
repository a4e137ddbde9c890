//! Server-side rendering proxy.
//!
//! Pages are loaded in headless Chromium, stripped of scripts, given inlined
//! stylesheets and a `<base>` tag, then cached by URL so crawlers receive
//! static HTML.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
