//! Sitemap source backed by `reqwest` and `quick-xml`.
//!
//! Both `<urlset>` documents and `<sitemapindex>` documents are understood.
//! Nested sitemaps are fetched `limit` at a time with `delay` between batches
//! so a large index does not hammer the origin.

use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use quick_xml::{events::Event, reader::Reader};
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use crate::application::sources::{SitemapError, SitemapSource};

use super::{
    error::InfraError,
    fetch::{build_client, fetch_text},
};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
enum SitemapDocument {
    /// Page locations.
    UrlSet(Vec<Url>),
    /// Locations of further sitemaps.
    Index(Vec<Url>),
}

#[derive(Clone)]
pub struct HttpSitemapSource {
    client: Client,
    delay: Duration,
    limit: usize,
}

impl HttpSitemapSource {
    pub fn new(delay: Duration, limit: usize) -> Result<Self, InfraError> {
        Ok(Self {
            client: build_client(DEFAULT_FETCH_TIMEOUT)?,
            delay,
            limit: limit.max(1),
        })
    }

    async fn load(&self, url: &Url) -> Result<SitemapDocument, SitemapError> {
        let body = fetch_text(&self.client, url).await?;
        parse_sitemap(&body, url)
    }
}

#[async_trait]
impl SitemapSource for HttpSitemapSource {
    async fn locations(&self, sitemap: &Url) -> Result<Vec<Url>, SitemapError> {
        let mut visited = HashSet::from([sitemap.clone()]);
        let mut pending = match self.load(sitemap).await? {
            SitemapDocument::UrlSet(urls) => return Ok(urls),
            SitemapDocument::Index(children) => children,
        };

        let mut locations = Vec::new();
        let mut first_batch = true;
        while !pending.is_empty() {
            let batch: Vec<Url> = pending
                .drain(..pending.len().min(self.limit))
                .filter(|url| visited.insert(url.clone()))
                .collect();
            if batch.is_empty() {
                continue;
            }
            if !first_batch && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            first_batch = false;

            let documents = join_all(batch.iter().map(|url| self.load(url))).await;
            for (url, document) in batch.iter().zip(documents) {
                match document {
                    Ok(SitemapDocument::UrlSet(urls)) => {
                        debug!(target = "prerender::sitemap", sitemap = %url, count = urls.len(), "nested sitemap loaded");
                        locations.extend(urls);
                    }
                    Ok(SitemapDocument::Index(children)) => pending.extend(children),
                    Err(err) => warn!(
                        target = "prerender::sitemap",
                        sitemap = %url,
                        error = %err,
                        "skipping nested sitemap"
                    ),
                }
            }
        }

        Ok(locations)
    }
}

fn parse_sitemap(xml: &str, source: &Url) -> Result<SitemapDocument, SitemapError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut is_index = None;
    let mut in_loc = false;
    let mut current = String::new();
    let mut locations = Vec::new();

    loop {
        match reader
            .read_event()
            .map_err(|err| SitemapError::parse(source, err))?
        {
            Event::Start(e) => {
                let name = e.local_name();
                match name.as_ref() {
                    b"urlset" if is_index.is_none() => is_index = Some(false),
                    b"sitemapindex" if is_index.is_none() => is_index = Some(true),
                    b"loc" => {
                        in_loc = true;
                        current.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(e) if in_loc => {
                let text = e.decode().map_err(|err| SitemapError::parse(source, err))?;
                current.push_str(&text);
            }
            Event::CData(e) if in_loc => {
                let text = reader
                    .decoder()
                    .decode(&e)
                    .map_err(|err| SitemapError::parse(source, err))?;
                current.push_str(&text);
            }
            Event::GeneralRef(e) if in_loc => {
                let name = e.decode().map_err(|err| SitemapError::parse(source, err))?;
                let entity = format!("&{name};");
                let resolved = quick_xml::escape::unescape(&entity)
                    .map_err(|err| SitemapError::parse(source, err))?;
                current.push_str(&resolved);
            }
            Event::End(e) if e.local_name().as_ref() == b"loc" => {
                in_loc = false;
                let raw = current.trim();
                if raw.is_empty() {
                    continue;
                }
                match Url::parse(raw) {
                    Ok(url) => locations.push(url),
                    Err(err) => warn!(
                        target = "prerender::sitemap",
                        sitemap = %source,
                        loc = raw,
                        error = %err,
                        "skipping invalid sitemap location"
                    ),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    match is_index {
        Some(true) => Ok(SitemapDocument::Index(locations)),
        Some(false) => Ok(SitemapDocument::UrlSet(locations)),
        None => Err(SitemapError::parse(
            source,
            "document is neither a urlset nor a sitemapindex",
        )),
    }
}
