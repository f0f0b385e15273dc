use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, de::DeserializeOwned};
use viewfinder_core::StreamEvent;

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).context("invalid server URL")?;
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("failed to build API URL")
    }

    async fn send_json<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T> {
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.url("/v1/health")?;
        self.send_json(self.http.get(url)).await
    }

    pub async fn stats(&self) -> Result<CacheStatsResponse> {
        let url = self.url("/v1/imagery/stats")?;
        self.send_json(self.http.get(url)).await
    }

    /// Stream a viewport, calling `on_event` for each event as it arrives.
    /// Returns the number of events received.
    pub async fn stream_viewport<F>(&self, query: &ViewportQuery, mut on_event: F) -> Result<usize>
    where
        F: FnMut(StreamEvent) -> Result<()>,
    {
        let mut url = self.url("/v1/imagery/stream")?;
        url.query_pairs_mut()
            .append_pair("top_left_lat", &query.top_left_lat.to_string())
            .append_pair("top_left_lon", &query.top_left_lon.to_string())
            .append_pair("bottom_right_lat", &query.bottom_right_lat.to_string())
            .append_pair("bottom_right_lon", &query.bottom_right_lon.to_string())
            .append_pair("client_id", &query.client_id);

        let mut response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        let mut lines = NdjsonLines::default();
        let mut count = 0;
        while let Some(chunk) = response.chunk().await? {
            for line in lines.push(&chunk) {
                on_event(parse_event(&line)?)?;
                count += 1;
            }
        }
        if let Some(line) = lines.finish() {
            on_event(parse_event(&line)?)?;
            count += 1;
        }

        Ok(count)
    }
}

fn parse_event(line: &str) -> Result<StreamEvent> {
    serde_json::from_str(line).with_context(|| format!("invalid stream line: {line}"))
}

/// Splits a byte stream into complete lines. Chunk boundaries may fall
/// anywhere, including inside a multi-byte character.
#[derive(Default)]
pub struct NdjsonLines {
    buffer: Vec<u8>,
}

impl NdjsonLines {
    /// Append a chunk and return every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Whatever is left after the stream ended without a final newline.
    pub fn finish(self) -> Option<String> {
        let rest = String::from_utf8_lossy(&self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct ViewportQuery {
    pub top_left_lat: f64,
    pub top_left_lon: f64,
    pub bottom_right_lat: f64,
    pub bottom_right_lon: f64,
    pub client_id: String,
}

#[derive(Deserialize, Debug)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Deserialize, Debug)]
pub struct CacheStatsResponse {
    pub total_cached_photos: u64,
    pub total_cached_regions: u64,
    pub complete_cached_regions: u64,
    pub cache_efficiency: f64,
}
