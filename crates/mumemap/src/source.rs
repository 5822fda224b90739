use std::future::Future;
use std::path::PathBuf;

use bytes::Bytes;

use crate::error::FetchError;

/// Where the `mapdata/v1` documents come from. `path` is relative, e.g.
/// `roomindex/3f.json`.
pub trait MapSource: Send + Sync + 'static {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

/// The hosted map next to the web client.
#[derive(Debug, Clone)]
pub struct HttpSource {
    http: reqwest::Client,
    base: reqwest::Url,
}

impl HttpSource {
    pub fn new(base: &str) -> Result<Self, FetchError> {
        // Url::join drops the last segment unless it ends with a slash.
        let base = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        let base = reqwest::Url::parse(&base).map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
        })
    }

    pub fn base(&self) -> &reqwest::Url {
        &self.base
    }
}

impl MapSource for HttpSource {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let resp = self.http.get(url).send().await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status().as_u16()));
        }
        Ok(resp.bytes().await?)
    }
}

/// A local copy of the map with the same layout.
#[derive(Debug, Clone)]
pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MapSource for DirSource {
    async fn fetch(&self, path: &str) -> Result<Bytes, FetchError> {
        let buf = tokio::fs::read(self.root.join(path)).await?;
        Ok(Bytes::from(buf))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_base_gets_trailing_slash() {
        let s = HttpSource::new("https://mume.org/mapdata/v1").unwrap();
        assert_eq!(s.base().as_str(), "https://mume.org/mapdata/v1/");
        assert_eq!(
            s.base().join("zone/20,-20.json").unwrap().as_str(),
            "https://mume.org/mapdata/v1/zone/20,-20.json"
        );
        assert!(HttpSource::new("not a url").is_err());
    }

    #[tokio::test]
    async fn dir_source_reads_files_and_maps_missing() {
        let root = std::env::temp_dir().join(format!("mumemap-dirsource-{}", std::process::id()));
        tokio::fs::create_dir_all(root.join("zone")).await.unwrap();
        tokio::fs::write(root.join("zone/0,0.json"), b"[]").await.unwrap();

        let src = DirSource::new(&root);
        assert_eq!(&src.fetch("zone/0,0.json").await.unwrap()[..], b"[]");
        assert!(src.fetch("zone/20,0.json").await.unwrap_err().is_not_found());

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
