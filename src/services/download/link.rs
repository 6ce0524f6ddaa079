//! Image link parsing.

use url::Url;

use super::types::DownloadError;

/// A link that has been validated and mapped to a local filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLink {
    url: Url,
    filename: String,
}

impl ImageLink {
    /// Parse a link from an input cell.
    ///
    /// Accepts `http`, `https` and `file` URLs whose final path segment is a
    /// usable file name. The file name is the segment as written in the
    /// link; query strings and fragments are ignored.
    pub fn parse(link: Option<&str>) -> Result<Self, DownloadError> {
        let raw = link.map(str::trim).unwrap_or_default();
        if raw.is_empty() {
            return Err(DownloadError::invalid(raw, "link is empty"));
        }

        let url = Url::parse(raw).map_err(|e| DownloadError::invalid(raw, e.to_string()))?;
        match url.scheme() {
            "http" | "https" | "file" => {}
            other => {
                return Err(DownloadError::invalid(
                    raw,
                    format!("unsupported scheme '{}'", other),
                ))
            }
        }

        let filename = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| is_usable_filename(name))
            .map(str::to_string)
            .ok_or_else(|| DownloadError::invalid(raw, "no file name in link path"))?;

        Ok(Self { url, filename })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl std::fmt::Display for ImageLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

fn is_usable_filename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['\\', '\0'])
}
