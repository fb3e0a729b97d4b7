//! Downloading requested resources over HTTP.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use reqwest::Url;
use tokio::io::AsyncWriteExt;

use crate::formatting::{format_bytes, format_speed, sanitize_file_name};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid resource url: {0}")]
    InvalidUrl(String),
    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("source responded with status {0}")]
    UnexpectedStatus(reqwest::StatusCode),
    #[error("failed to store download: {0}")]
    IoError(#[from] std::io::Error),
}

/// Resolves resource identifiers against a base URL and streams them into
/// the books directory.
#[derive(Debug, Clone)]
pub struct ResourceSource {
    client: reqwest::Client,
    base_url: String,
    books_dir: PathBuf,
}

impl ResourceSource {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, books_dir: PathBuf) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            books_dir,
        }
    }

    /// Builds the download URL for `resource_identifier`.
    pub fn resource_url(&self, resource_identifier: &str) -> Result<Url, FetchError> {
        let mut base = self.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Url::parse(&base)
            .and_then(|base| base.join(resource_identifier))
            .map_err(|err| FetchError::InvalidUrl(err.to_string()))
    }

    /// Final location of the resource downloaded under `tracking_key`.
    ///
    /// Each tracked download gets its own directory, so requests for the
    /// same resource never share a file.
    pub fn target_path(&self, resource_identifier: &str, tracking_key: &str) -> PathBuf {
        self.books_dir
            .join(non_empty_file_name(tracking_key, "request"))
            .join(non_empty_file_name(resource_identifier, "download"))
    }

    /// Downloads `resource_identifier` and returns the path of the stored file.
    ///
    /// The body is written to a `.temp` file first and renamed once complete,
    /// so a partially downloaded file is never handed to the mailer.
    pub async fn fetch(
        &self,
        resource_identifier: &str,
        tracking_key: &str,
    ) -> Result<PathBuf, FetchError> {
        let url = self.resource_url(resource_identifier)?;
        let save_path = self.target_path(resource_identifier, tracking_key);
        let temp_path = temp_path_for(&save_path);
        log::info!("Downloading {resource_identifier:?} from {url}, saving to {save_path:?}");

        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::UnexpectedStatus(response.status()));
        }

        let start = tokio::time::Instant::now();
        let total_bytes = response.content_length().unwrap_or(0);
        let mut downloaded_bytes = 0u64;

        let result = async {
            let mut output_file = tokio::fs::File::options()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)
                .await?;

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                output_file.write_all(&chunk).await?;
                downloaded_bytes += chunk.len() as u64;

                let elapsed_secs = start.elapsed().as_secs_f64();
                if elapsed_secs > 0.0 {
                    log::debug!(
                        "Downloaded {} of {} ({})",
                        format_bytes(downloaded_bytes),
                        format_bytes(total_bytes),
                        format_speed(downloaded_bytes as f64 / elapsed_secs),
                    );
                }
            }
            output_file.flush().await?;
            output_file.sync_all().await?;
            Ok::<_, FetchError>(())
        }
        .await;

        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(err);
        }

        tokio::fs::rename(&temp_path, &save_path).await?;
        log::info!(
            "Downloaded {resource_identifier:?} ({})",
            format_bytes(downloaded_bytes)
        );
        Ok(save_path)
    }
}

/// Removes a delivered file together with its per-download directory.
pub async fn remove_download(path: &Path) -> std::io::Result<()> {
    tokio::fs::remove_file(path).await?;
    if let Some(parent) = path.parent() {
        // Only succeeds once the directory is empty.
        let _ = tokio::fs::remove_dir(parent).await;
    }
    Ok(())
}

fn non_empty_file_name(name: &str, fallback: &str) -> String {
    let name = sanitize_file_name(name);
    if name.is_empty() {
        fallback.to_string()
    } else {
        name
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".temp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn source(server: &mockito::Server, dir: &TempDir) -> ResourceSource {
        ResourceSource::new(
            reqwest::Client::new(),
            format!("{}/books", server.url()),
            dir.path().join("books"),
        )
    }

    #[test]
    fn joins_identifier_onto_base_url() {
        let source = ResourceSource::new(
            reqwest::Client::new(),
            "http://127.0.0.1:8080/books",
            PathBuf::from("/tmp/books"),
        );
        assert_eq!(
            source.resource_url("dune.epub").unwrap().as_str(),
            "http://127.0.0.1:8080/books/dune.epub"
        );
        assert_eq!(
            source.target_path("a/b:c.epub", "k1"),
            PathBuf::from("/tmp/books/k1/a_b_c.epub")
        );
    }

    #[tokio::test]
    async fn downloads_into_books_dir() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/books/dune.epub")
            .with_status(200)
            .with_body("spice")
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let path = source(&server, &dir).fetch("dune.epub", "k1").await.unwrap();

        mock.assert_async().await;
        let download_dir = dir.path().join("books").join("k1");
        assert_eq!(path, download_dir.join("dune.epub"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "spice");
        assert!(!download_dir.join("dune.epub.temp").exists());

        remove_download(&path).await.unwrap();
        assert!(!download_dir.exists());
    }

    #[tokio::test]
    async fn same_resource_is_stored_per_tracking_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/books/dune.epub")
            .with_body("spice")
            .expect(2)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();
        let source = source(&server, &dir);

        let (first, second) = tokio::join!(
            source.fetch("dune.epub", "k1"),
            source.fetch("dune.epub", "k2")
        );
        let (first, second) = (first.unwrap(), second.unwrap());
        assert_ne!(first, second);

        remove_download(&first).await.unwrap();
        assert_eq!(std::fs::read_to_string(&second).unwrap(), "spice");
    }

    #[tokio::test]
    async fn missing_resource_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/books/missing.epub")
            .with_status(404)
            .create_async()
            .await;
        let dir = TempDir::new().unwrap();

        let result = source(&server, &dir).fetch("missing.epub", "k1").await;
        assert!(matches!(
            result,
            Err(FetchError::UnexpectedStatus(status)) if status.as_u16() == 404
        ));
        assert!(!dir.path().join("books").join("k1").join("missing.epub").exists());
    }
}
