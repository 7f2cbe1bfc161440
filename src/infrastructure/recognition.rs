//! 识别服务（OCR）
//!
//! 输入文档 URL，按页返回识别出的 markdown 文本。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::error::ServiceError;

const ENDPOINT: &str = "ocr";

/// 识别服务
#[async_trait]
pub trait RecognitionService: Send + Sync {
    /// 识别整份文档，返回按页排列的文本
    async fn recognize_document(&self, document_url: &str) -> Result<Vec<String>, ServiceError>;
}

#[derive(Debug, Serialize)]
struct OcrRequest<'a> {
    model: &'a str,
    document: OcrDocument<'a>,
    include_image_base64: bool,
}

#[derive(Debug, Serialize)]
struct OcrDocument<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    document_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    #[serde(default)]
    pages: Vec<OcrPage>,
}

#[derive(Debug, Deserialize)]
struct OcrPage {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    markdown: String,
}

/// Mistral OCR 接口客户端
pub struct MistralOcrClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl MistralOcrClient {
    pub fn new(config: &Config) -> Self {
        // OCR 单独配置的 key 为空时沿用补全服务的 key
        let api_key = if config.ocr_api_key.is_empty() {
            config.llm_api_key.clone()
        } else {
            config.ocr_api_key.clone()
        };
        Self {
            http: reqwest::Client::new(),
            base_url: config.ocr_api_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.ocr_model_name.clone(),
        }
    }
}

#[async_trait]
impl RecognitionService for MistralOcrClient {
    async fn recognize_document(&self, document_url: &str) -> Result<Vec<String>, ServiceError> {
        let body = OcrRequest {
            model: &self.model,
            document: OcrDocument {
                kind: "document_url",
                document_url,
            },
            include_image_base64: false,
        };

        debug!("调用 OCR 接口: {}", document_url);
        let response = self
            .http
            .post(format!("{}/ocr", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::classify(ENDPOINT, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ServiceError::classify(
                ENDPOINT,
                format!("{} {}", status.as_u16(), text),
            ));
        }

        let parsed: OcrResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::classify(ENDPOINT, e.to_string()))?;

        Ok(into_ordered_pages(parsed))
    }
}

fn into_ordered_pages(response: OcrResponse) -> Vec<String> {
    let mut pages = response.pages;
    if pages.iter().all(|p| p.index.is_some()) {
        pages.sort_by_key(|p| p.index);
    }
    pages.into_iter().map(|p| p.markdown).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_are_ordered_by_index() {
        let response: OcrResponse = serde_json::from_str(
            r#"{"pages": [
                {"index": 1, "markdown": "deux"},
                {"index": 0, "markdown": "un"}
            ], "model": "mistral-ocr-latest"}"#,
        )
        .unwrap();

        assert_eq!(into_ordered_pages(response), vec!["un", "deux"]);
    }

    #[test]
    fn test_request_shape() {
        let body = OcrRequest {
            model: "mistral-ocr-latest",
            document: OcrDocument {
                kind: "document_url",
                document_url: "https://example.org/a.pdf",
            },
            include_image_base64: false,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["document"]["type"], "document_url");
        assert_eq!(value["document"]["document_url"], "https://example.org/a.pdf");
    }
}
