//! 补全服务接口
//!
//! 流程和能力层只依赖这里的 trait，真实实现见
//! `services::llm_service::LlmService`，测试实现见 `testing::ScriptedCompletion`。

use std::path::Path;

use async_trait::async_trait;
use base64::Engine;

use crate::error::ServiceError;

/// 模型档位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelTier {
    /// 按批次抽取、逐题问答
    Standard,
    /// 整份文档一次性抽取
    Large,
    /// 读图
    Vision,
}

/// 随请求发送的页面图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    /// `data:image/jpeg;base64,...` 形式的 URL
    pub data_url: String,
}

impl ImageInput {
    /// 读取本地图片并编码为 data URL
    pub async fn from_path(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let mime = match path.extension().and_then(|e| e.to_str()) {
            Some("png") => "image/png",
            _ => "image/jpeg",
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(Self {
            data_url: format!("data:{};base64,{}", mime, encoded),
        })
    }
}

/// 一次补全请求
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub tier: ModelTier,
    pub system: Option<String>,
    pub user: String,
    pub image: Option<ImageInput>,
    /// 要求返回 JSON 对象
    pub json: bool,
}

impl CompletionRequest {
    pub fn text(tier: ModelTier, user: impl Into<String>) -> Self {
        Self {
            tier,
            system: None,
            user: user.into(),
            image: None,
            json: false,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.image = Some(image);
        self
    }

    pub fn expect_json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// 生成式补全服务
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// 发送一次请求，返回去掉首尾空白的文本
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError>;
}
