//! HTTP tile source over an injectable client.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::{SourceError, TileSource};
use crate::grid::{TileCoord, TileGrid};

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Trait for HTTP client operations.
///
/// This abstraction allows mock clients in tests.
pub trait HttpClient: Send + Sync {
    /// Performs an HTTP GET request and returns the response body.
    fn get(&self, url: &str) -> Result<Bytes, SourceError>;
}

/// HTTP client backed by `reqwest`.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with the default timeout.
    pub fn new() -> Result<Self, SourceError> {
        Self::with_timeout(DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| SourceError::HttpError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<Bytes, SourceError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| SourceError::HttpError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(SourceError::HttpError(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        response
            .bytes()
            .map_err(|e| SourceError::HttpError(format!("Failed to read response: {}", e)))
    }
}

/// Fetches tiles from a URL template.
///
/// Supported placeholders are `{x}`, `{y}`, `{z}` and `{-y}`. `{-y}` is the
/// row counted from the top of the grid, as used by XYZ tile servers.
pub struct HttpTileSource {
    template: String,
    grid: TileGrid,
    client: Arc<dyn HttpClient>,
}

impl HttpTileSource {
    /// Creates a source for `template` laid out in `grid`.
    pub fn new(
        template: impl Into<String>,
        grid: TileGrid,
        client: Arc<dyn HttpClient>,
    ) -> Result<Self, SourceError> {
        let template = template.into();
        if !template.contains("{x}") || !template.contains("{z}") {
            return Err(SourceError::InvalidTemplate(template));
        }
        if !template.contains("{y}") && !template.contains("{-y}") {
            return Err(SourceError::InvalidTemplate(template));
        }
        Ok(Self {
            template,
            grid,
            client,
        })
    }

    /// URL of the given tile.
    pub fn url(&self, coord: TileCoord) -> Result<String, SourceError> {
        let mut url = self
            .template
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
            .replace("{z}", &coord.z.to_string());

        if url.contains("{-y}") {
            let (_, rows) = self
                .grid
                .grid_size(coord.z)
                .map_err(|e| SourceError::InvalidTemplate(e.to_string()))?;
            let flipped = rows.saturating_sub(coord.y + 1);
            url = url.replace("{-y}", &flipped.to_string());
        }
        Ok(url)
    }
}

impl TileSource for HttpTileSource {
    fn fetch(&self, coord: TileCoord) -> Result<Bytes, SourceError> {
        let url = self.url(coord)?;
        tracing::trace!(tile = %coord, url = %url, "Fetching tile");
        self.client.get(&url)
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Mock HTTP client recording requested URLs.
    pub struct MockHttpClient {
        pub response: Result<Bytes, SourceError>,
        pub requests: Mutex<Vec<String>>,
    }

    impl MockHttpClient {
        pub fn new(response: Result<Bytes, SourceError>) -> Self {
            Self {
                response,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for MockHttpClient {
        fn get(&self, url: &str) -> Result<Bytes, SourceError> {
            self.requests.lock().push(url.to_string());
            self.response.clone()
        }
    }

    #[test]
    fn test_url_placeholders() {
        let client = Arc::new(MockHttpClient::new(Ok(Bytes::new())));
        let source = HttpTileSource::new(
            "http://tiles.example.com/{z}/{x}/{-y}.png",
            TileGrid::global_mercator(),
            client,
        )
        .unwrap();

        // level 2 has 4 rows: row 0 from the bottom is row 3 from the top
        assert_eq!(
            source.url(TileCoord::new(1, 0, 2)).unwrap(),
            "http://tiles.example.com/2/1/3.png"
        );
    }

    #[test]
    fn test_invalid_template() {
        let client = Arc::new(MockHttpClient::new(Ok(Bytes::new())));
        let result = HttpTileSource::new("http://example.com/tile", TileGrid::global_mercator(), client);
        assert!(matches!(result, Err(SourceError::InvalidTemplate(_))));
    }

    #[test]
    fn test_fetch_uses_client() {
        let client = Arc::new(MockHttpClient::new(Ok(Bytes::from_static(b"png"))));
        let source = HttpTileSource::new(
            "http://example.com/{z}/{x}/{y}",
            TileGrid::global_geodetic(),
            client.clone(),
        )
        .unwrap();

        let data = source.fetch(TileCoord::new(1, 0, 1)).unwrap();
        assert_eq!(data, Bytes::from_static(b"png"));
        assert_eq!(client.requests.lock().as_slice(), ["http://example.com/1/1/0"]);
    }

    #[test]
    fn test_fetch_propagates_errors() {
        let client = Arc::new(MockHttpClient::new(Err(SourceError::HttpError(
            "HTTP 503".to_string(),
        ))));
        let source =
            HttpTileSource::new("http://example.com/{z}/{x}/{y}", TileGrid::global_geodetic(), client)
                .unwrap();
        assert!(source.fetch(TileCoord::new(0, 0, 0)).is_err());
    }
}
