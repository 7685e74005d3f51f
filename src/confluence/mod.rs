
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;

const REQUEST_TIMEOUT_SECONDS: u64 = 60;

/// Client for the Confluence Cloud REST content API
#[derive(Debug, Clone)]
pub struct ConfluenceClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

/// A Confluence page with its rendered body
#[derive(Debug, Clone, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub body: PageBody,
    #[serde(rename = "_links", default)]
    pub links: PageLinks,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageBody {
    #[serde(default)]
    pub view: PageBodyView,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageBodyView {
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub webui: Option<String>,
    #[serde(rename = "self", default)]
    pub self_url: Option<String>,
}

/// One page of results when listing the content of a space
#[derive(Debug, Clone, Deserialize)]
pub struct PageListing {
    #[serde(default)]
    pub results: Vec<Page>,
    pub start: u32,
    pub limit: u32,
    pub size: u32,
}

impl Page {
    /// Rendered HTML of the page body
    #[inline]
    pub fn html(&self) -> &str {
        &self.body.view.value
    }

    /// Human-facing URL for the page, resolved against the site base URL
    #[inline]
    pub fn web_link(&self, base_url: &str) -> String {
        match (&self.links.webui, &self.links.self_url) {
            (Some(webui), _) => format!("{}/wiki{}", base_url.trim_end_matches('/'), webui),
            (None, Some(self_url)) => self_url.clone(),
            (None, None) => format!(
                "{}/wiki/rest/api/content/{}",
                base_url.trim_end_matches('/'),
                self.id
            ),
        }
    }
}

impl ConfluenceClient {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: config.confluence.base_url.trim_end_matches('/').to_string(),
            token: config.confluence.token.clone(),
        })
    }

    /// Fetch a single page by id with its rendered body
    #[inline]
    pub async fn get_page(&self, page_id: &str) -> Result<Page> {
        debug!(page_id, "Fetching Confluence page");

        let url = format!("{}/wiki/rest/api/content/{}", self.base_url, page_id);
        let response = self
            .http
            .get(&url)
            .query(&[("expand", "body.view,version")])
            .header("Authorization", format!("Basic {}", self.token))
            .send()
            .await
            .with_context(|| format!("Request for Confluence page {page_id} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Confluence returned status {} for page {}", status, page_id);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse Confluence page {page_id}"))
    }

    /// List pages in a space, returning one batch of results starting at
    /// the given offset
    #[inline]
    pub async fn get_pages_in_space(
        &self,
        space_key: &str,
        start: u32,
        limit: u32,
    ) -> Result<PageListing> {
        debug!(space_key, start, limit, "Listing Confluence space content");

        let url = format!("{}/wiki/rest/api/content", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("spaceKey", space_key),
                ("expand", "body.view,version"),
                ("start", &start.to_string()),
                ("limit", &limit.to_string()),
            ])
            .header("Authorization", format!("Basic {}", self.token))
            .send()
            .await
            .with_context(|| format!("Request for Confluence space {space_key} failed"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!(
                "Confluence returned status {} listing space {}",
                status,
                space_key
            );
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse content listing for space {space_key}"))
    }
}
