//! Fetching image bytes.

use async_trait::async_trait;
use url::Url;

use super::types::{DownloadConfig, FetchError};

/// A single fetch attempt. Retrying is the caller's job.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError>;
}

/// Fetches `http`/`https` links with reqwest and reads `file` links from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        match url.scheme() {
            "http" | "https" => {
                let response = self.client.get(url.clone()).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Ok(response.bytes().await?.to_vec())
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| FetchError::UnsupportedScheme(url.to_string()))?;
                Ok(tokio::fs::read(path).await?)
            }
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_links_read_from_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("label.png");
        std::fs::write(&path, b"image bytes").unwrap();

        let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
        let url = Url::from_file_path(&path).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap(), b"image bytes");
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
        let url = Url::from_file_path(dir.path().join("gone.png")).unwrap();

        assert!(matches!(fetcher.fetch(&url).await, Err(FetchError::Io(_))));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let fetcher = HttpFetcher::new(&DownloadConfig::default()).unwrap();
        let url = Url::parse("ftp://example.com/a.png").unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(FetchError::UnsupportedScheme(_))
        ));
    }
}
