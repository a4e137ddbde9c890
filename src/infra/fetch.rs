//! Shared HTTP client plumbing for out-of-band fetches.

use std::time::Duration;

use reqwest::Client;
use url::Url;

use crate::application::sources::FetchError;

use super::error::InfraError;

pub(crate) fn user_agent() -> &'static str {
    concat!("prerender/", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn build_client(timeout: Duration) -> Result<Client, InfraError> {
    Client::builder()
        .user_agent(user_agent())
        .timeout(timeout)
        .build()
        .map_err(|err| InfraError::configuration(format!("failed to build http client: {err}")))
}

/// GET `url` and return the body. Non-2xx answers are failures.
pub(crate) async fn fetch_text(client: &Client, url: &Url) -> Result<String, FetchError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|err| FetchError::transport(url, err))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response
        .text()
        .await
        .map_err(|err| FetchError::transport(url, err))
}
