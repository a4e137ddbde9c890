use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::application::sources::{FetchError, StylesheetFetcher};

use super::{
    error::InfraError,
    fetch::{build_client, fetch_text},
};

/// Downloads stylesheets over plain HTTP, outside the browser.
#[derive(Clone)]
pub struct HttpStylesheetFetcher {
    client: Client,
}

impl HttpStylesheetFetcher {
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl StylesheetFetcher for HttpStylesheetFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, FetchError> {
        fetch_text(&self.client, url).await
    }
}
