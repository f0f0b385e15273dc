//! HTTP backend for the upstream imagery API.

use crate::error::{UpstreamError, UpstreamResult};
use crate::traits::{Page, PhotoSource};
use crate::wire;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Url;
use std::num::NonZeroU32;
use viewfinder_core::BoundingBox;
use viewfinder_core::config::UpstreamConfig;

/// Upstream client that pages through the images endpoint over HTTP.
///
/// All requests made through one instance share a token bucket, so the
/// configured request rate holds across every caller in the process.
pub struct HttpSource {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
    fields: String,
    page_size: u32,
    limiter: DefaultDirectRateLimiter,
}

impl HttpSource {
    pub fn new(config: &UpstreamConfig) -> UpstreamResult<Self> {
        config.validate().map_err(UpstreamError::Config)?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| UpstreamError::Config(format!("invalid upstream base_url: {e}")))?;
        let access_token = load_access_token(config)?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        let quota = Quota::per_second(
            NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN),
        )
        .allow_burst(NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN));

        tracing::info!(
            base_url = %base_url,
            page_size = config.page_size,
            requests_per_second = config.requests_per_second,
            burst = config.burst,
            "Upstream HTTP source configured"
        );

        Ok(Self {
            http,
            base_url,
            access_token,
            fields: config.fields.clone(),
            page_size: config.page_size,
            limiter: RateLimiter::direct(quota),
        })
    }

    async fn try_fetch(&self, bbox: &BoundingBox, cursor: Option<&str>) -> UpstreamResult<Page> {
        let limit = self.page_size.to_string();
        let bbox_value = bbox_param(bbox);
        let mut query: Vec<(&str, &str)> = vec![
            ("access_token", self.access_token.as_str()),
            ("bbox", bbox_value.as_str()),
            ("fields", self.fields.as_str()),
            ("limit", limit.as_str()),
        ];
        if let Some(after) = cursor {
            query.push(("after", after));
        }

        // Strip the URL from reqwest errors, it carries the access token.
        let response = self
            .http
            .get(self.base_url.clone())
            .query(&query)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status));
        }

        let body = response
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)?;

        Ok(wire::decode_page(&body)?)
    }
}

#[async_trait]
impl PhotoSource for HttpSource {
    async fn fetch_page(&self, bbox: &BoundingBox, cursor: Option<&str>) -> Page {
        self.limiter.until_ready().await;

        match self.try_fetch(bbox, cursor).await {
            Ok(page) => {
                tracing::debug!(
                    bbox = %bbox,
                    cursor = cursor.unwrap_or("<start>"),
                    photos = page.data.len(),
                    received = page.received,
                    has_next = page.paging.has_next,
                    "Fetched upstream page"
                );
                page
            }
            Err(e) => {
                tracing::warn!(
                    bbox = %bbox,
                    cursor = cursor.unwrap_or("<start>"),
                    kind = e.kind(),
                    error = %e,
                    "Upstream fetch failed, treating as empty page"
                );
                Page::failed()
            }
        }
    }
}

/// Format a bbox as `min_lon,min_lat,max_lon,max_lat` with 7 decimals.
pub(crate) fn bbox_param(bbox: &BoundingBox) -> String {
    format!(
        "{:.7},{:.7},{:.7},{:.7}",
        bbox.min_lon(),
        bbox.min_lat(),
        bbox.max_lon(),
        bbox.max_lat()
    )
}

fn load_access_token(config: &UpstreamConfig) -> UpstreamResult<String> {
    if let Some(token) = config.access_token.as_deref() {
        let token = token.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    if let Some(path) = config.access_token_file.as_ref() {
        let token = std::fs::read_to_string(path)?;
        let token = token.trim();
        if token.is_empty() {
            return Err(UpstreamError::Config(format!(
                "access token file {} is empty",
                path.display()
            )));
        }
        return Ok(token.to_string());
    }

    Err(UpstreamError::Config(
        "upstream requires 'access_token' or 'access_token_file'".to_string(),
    ))
}
