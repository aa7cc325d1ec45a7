use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageSourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Fetching {url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Photo has no image location")]
    MissingUrl,
}

/// Somewhere image bytes come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, image_url: &str) -> Result<Vec<u8>, ImageSourceError>;
}

/// Loads `http(s)://` URLs over the network and everything else from disk.
#[derive(Clone)]
pub struct ImageLoader {
    http: reqwest::Client,
}

impl ImageLoader {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Loader whose remote requests give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Result<Self, ImageSourceError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    async fn fetch_remote(&self, url: &str) -> Result<Vec<u8>, ImageSourceError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ImageSourceError::Status {
                url: url.to_string(),
                status: response.status(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn fetch_local(&self, path: PathBuf) -> Result<Vec<u8>, ImageSourceError> {
        tokio::fs::read(&path)
            .await
            .map_err(|source| ImageSourceError::Io {
                path: path.display().to_string(),
                source,
            })
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageSource for ImageLoader {
    async fn fetch(&self, image_url: &str) -> Result<Vec<u8>, ImageSourceError> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(ImageSourceError::MissingUrl);
        }

        if image_url.starts_with("http://") || image_url.starts_with("https://") {
            self.fetch_remote(image_url).await
        } else {
            let path = image_url.strip_prefix("file://").unwrap_or(image_url);
            self.fetch_local(PathBuf::from(path)).await
        }
    }
}

/// Encode image bytes as a `data:` URL, sniffing the MIME type from content.
pub fn to_data_url(bytes: &[u8]) -> String {
    let mime_type = image::guess_format(bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("image/jpeg");
    let b64 = general_purpose::STANDARD.encode(bytes);
    format!("data:{mime_type};base64,{b64}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_fetch_local_file_and_file_url() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("photo.bin");
        std::fs::write(&path, b"not really a photo").unwrap();

        let loader = ImageLoader::new();
        let plain = loader.fetch(path.to_str().unwrap()).await.unwrap();
        let as_url = loader
            .fetch(&format!("file://{}", path.display()))
            .await
            .unwrap();

        assert_eq!(plain, b"not really a photo");
        assert_eq!(as_url, plain);
    }

    #[tokio::test]
    async fn test_missing_file_and_blank_url_are_errors() {
        let loader = ImageLoader::new();

        assert!(matches!(
            loader.fetch("/non/existent/photo.jpg").await,
            Err(ImageSourceError::Io { .. })
        ));
        assert!(matches!(
            loader.fetch("   ").await,
            Err(ImageSourceError::MissingUrl)
        ));
    }

    #[tokio::test]
    async fn test_remote_fetch_gives_up_on_silent_host() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        // Accept connections and never answer.
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let loader = ImageLoader::with_timeout(Duration::from_millis(200)).unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(10),
            loader.fetch(&format!("http://{}/photo.jpg", address)),
        )
        .await
        .expect("loader timeout should fire first");

        assert!(matches!(result, Err(ImageSourceError::Http(_))));
        server.abort();
    }

    #[test]
    fn test_data_url_sniffs_png() {
        let mut bytes = Vec::new();
        let img = image::DynamicImage::new_rgb8(2, 2);
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        assert!(to_data_url(&bytes).starts_with("data:image/png;base64,"));
        assert!(to_data_url(b"??").starts_with("data:image/jpeg;base64,"));
    }
}
