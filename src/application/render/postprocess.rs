//! Snapshot clean-up applied to the serialized document after load.
//!
//! The document is rewritten twice with `lol_html`. The first pass injects the
//! `<base>` tag, strips scripts, iframes and resource hints, and collects
//! stylesheet links. Stylesheets are then fetched out-of-band and the second
//! pass appends them to `<head>` as a single `<style>` element.

use std::{cell::RefCell, rc::Rc, sync::Arc};

use futures::future::join_all;
use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};
use quick_xml::escape::escape;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::application::sources::StylesheetFetcher;
use crate::cache::CacheKey;

const LD_JSON: &str = "application/ld+json";

#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("failed to rewrite document: {message}")]
    Rewrite { message: String },
}

pub struct DocumentPostProcessor {
    fetcher: Arc<dyn StylesheetFetcher>,
}

struct StrippedDocument {
    html: String,
    stylesheets: Vec<Url>,
}

impl DocumentPostProcessor {
    pub fn new(fetcher: Arc<dyn StylesheetFetcher>) -> Self {
        Self { fetcher }
    }

    pub async fn process(&self, html: &str, page_url: &Url) -> Result<String, PostProcessError> {
        let base = CacheKey::from_url(page_url);
        let stripped = strip_document(html, base.url())?;
        let css = self.fetch_stylesheets(&stripped.stylesheets).await;
        inline_styles(&stripped.html, &css)
    }

    /// Fetch every linked stylesheet concurrently and concatenate the
    /// successful bodies in document order. A sheet linked twice is inlined
    /// twice.
    async fn fetch_stylesheets(&self, hrefs: &[Url]) -> String {
        let bodies = join_all(hrefs.iter().map(|url| self.fetcher.fetch(url))).await;

        let mut css = Vec::with_capacity(bodies.len());
        for (url, body) in hrefs.iter().zip(bodies) {
            match body {
                Ok(body) => css.push(body),
                Err(err) => warn!(
                    target = "prerender::postprocess",
                    stylesheet = %url,
                    error = %err,
                    "skipping stylesheet that could not be fetched"
                ),
            }
        }

        debug!(
            target = "prerender::postprocess",
            requested = hrefs.len(),
            inlined = css.len(),
            "stylesheets fetched"
        );
        css.join("\n")
    }
}

fn strip_document(html: &str, base: &Url) -> Result<StrippedDocument, PostProcessError> {
    let stylesheets = Rc::new(RefCell::new(Vec::new()));
    let base_tag = format!(r#"<base href="{}">"#, escape(base.as_str()));
    let mut base_injected = false;

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head", move |el| {
                    if !base_injected {
                        el.prepend(&base_tag, ContentType::Html);
                        base_injected = true;
                    }
                    Ok(())
                }),
                element!("script", |el| {
                    let structured_data = el
                        .get_attribute("type")
                        .is_some_and(|kind| kind.trim().eq_ignore_ascii_case(LD_JSON));
                    if !structured_data {
                        el.remove();
                    }
                    Ok(())
                }),
                element!("iframe", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("link[rel]", {
                    let stylesheets = Rc::clone(&stylesheets);
                    move |el| {
                        let rel = el.get_attribute("rel").unwrap_or_default();
                        match LinkRel::classify(&rel) {
                            LinkRel::Stylesheet => {
                                if let Some(href) = el.get_attribute("href")
                                    && let Some(url) = resolve_stylesheet(base, &href)
                                {
                                    stylesheets.borrow_mut().push(url);
                                }
                                el.remove();
                            }
                            LinkRel::Hint => el.remove(),
                            LinkRel::Other => {}
                        }
                        Ok(())
                    }
                }),
            ],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| PostProcessError::Rewrite {
        message: err.to_string(),
    })?;

    let stylesheets = Rc::try_unwrap(stylesheets)
        .map(RefCell::into_inner)
        .unwrap_or_else(|rc| rc.borrow().clone());

    Ok(StrippedDocument {
        html: rewritten,
        stylesheets,
    })
}

fn inline_styles(html: &str, css: &str) -> Result<String, PostProcessError> {
    let style_tag = format!("<style>{}</style>", escape_style_text(css));
    let mut appended = false;

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("head", move |el| {
                if !appended {
                    el.append(&style_tag, ContentType::Html);
                    appended = true;
                }
                Ok(())
            })],
            ..RewriteStrSettings::default()
        },
    )
    .map_err(|err| PostProcessError::Rewrite {
        message: err.to_string(),
    })
}

enum LinkRel {
    Stylesheet,
    Hint,
    Other,
}

impl LinkRel {
    fn classify(rel: &str) -> Self {
        let rel = rel.to_ascii_lowercase();
        let mut tokens = rel.split_ascii_whitespace();
        if tokens.clone().any(|token| token == "stylesheet") {
            LinkRel::Stylesheet
        } else if tokens.any(|token| token == "import" || token == "preload") {
            LinkRel::Hint
        } else {
            LinkRel::Other
        }
    }
}

fn resolve_stylesheet(base: &Url, href: &str) -> Option<Url> {
    let url = base.join(href.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

/// Keep inlined CSS from closing the `<style>` element early.
fn escape_style_text(css: &str) -> String {
    let lower = css.to_ascii_lowercase();
    let mut out = String::with_capacity(css.len());
    let mut last = 0;
    for (idx, _) in lower.match_indices("</style") {
        out.push_str(&css[last..idx]);
        out.push_str("<\\/");
        last = idx + 2;
    }
    out.push_str(&css[last..]);
    out
}
