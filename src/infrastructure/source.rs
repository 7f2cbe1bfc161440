//! 源文档获取与页面栅格化

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::FetchError;

/// 已下载到本地的源文档
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedSource {
    pub url: String,
    pub filename: String,
    pub local_path: PathBuf,
}

impl FetchedSource {
    /// 不带扩展名的文件名
    pub fn stem(&self) -> &str {
        self.filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&self.filename)
    }
}

/// 源文档获取
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedSource, FetchError>;
}

/// 页面栅格化
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    /// 把文档每一页转成图片，按页码顺序返回路径
    async fn rasterize(&self, document: &Path, out_dir: &Path) -> std::io::Result<Vec<PathBuf>>;
}

/// 从 URL 中取出文件名（去掉查询参数）
pub fn filename_from_url(url: &str) -> Result<String, FetchError> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .ok_or_else(|| FetchError::NoFilename(url.to_string()))
}

/// HTTP 下载
pub struct HttpFetcher {
    http: reqwest::Client,
    work_dir: PathBuf,
}

impl HttpFetcher {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            work_dir: work_dir.into(),
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedSource, FetchError> {
        let filename = filename_from_url(url)?;
        let download_error = |message: String| FetchError::Download {
            url: url.to_string(),
            message,
        };

        info!("📥 正在下载: {}", url);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("HTTP {}", status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        let stem = filename
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&filename);
        let dir = self.work_dir.join(stem);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| FetchError::Write {
                path: dir.display().to_string(),
                source,
            })?;

        let local_path = dir.join(&filename);
        tokio::fs::write(&local_path, &bytes)
            .await
            .map_err(|source| FetchError::Write {
                path: local_path.display().to_string(),
                source,
            })?;

        debug!("已保存 {} 字节到 {}", bytes.len(), local_path.display());

        Ok(FetchedSource {
            url: url.to_string(),
            filename,
            local_path,
        })
    }
}

/// 调用 poppler 的 `pdftoppm` 输出 JPEG
pub struct PdftoppmRasterizer {
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new() -> Self {
        Self { dpi: 150 }
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn rasterize(&self, document: &Path, out_dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        tokio::fs::create_dir_all(out_dir).await?;
        let prefix = out_dir.join("page");

        let output = tokio::process::Command::new("pdftoppm")
            .arg("-jpeg")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg(document)
            .arg(&prefix)
            .output()
            .await?;

        if !output.status.success() {
            return Err(std::io::Error::other(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        // pdftoppm 按总页数补零：page-1.jpg 或 page-01.jpg
        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if let Some(number) = page_number_of(&path) {
                pages.push((number, path));
            }
        }
        pages.sort_by_key(|(number, _)| *number);

        let mut renamed = Vec::with_capacity(pages.len());
        for (number, path) in pages {
            let target = out_dir.join(format!("page_{}.jpg", number));
            if path != target {
                tokio::fs::rename(&path, &target).await?;
            }
            renamed.push(target);
        }
        Ok(renamed)
    }
}

fn page_number_of(path: &Path) -> Option<usize> {
    if path.extension().and_then(|e| e.to_str()) != Some("jpg") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let digits = stem
        .strip_prefix("page-")
        .or_else(|| stem.strip_prefix("page_"))?;
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://cdn.example.org/ue3/ue3-correction-cb1-s40-21-22.pdf?dl=1")
                .unwrap(),
            "ue3-correction-cb1-s40-21-22.pdf"
        );
        assert!(filename_from_url("https://cdn.example.org/").is_err());
    }

    #[test]
    fn test_page_number_of() {
        assert_eq!(page_number_of(Path::new("/tmp/page-07.jpg")), Some(7));
        assert_eq!(page_number_of(Path::new("/tmp/page_12.jpg")), Some(12));
        assert_eq!(page_number_of(Path::new("/tmp/page-1.png")), None);
        assert_eq!(page_number_of(Path::new("/tmp/cover.jpg")), None);
    }
}
