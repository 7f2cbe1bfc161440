//! LLM 服务 - 业务能力层
//!
//! 只负责"发送一次补全请求"能力，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Mistral、Azure 等）

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, ImageDetail, ImageUrl, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ServiceError;
use crate::infrastructure::completion::{CompletionRequest, CompletionService, ModelTier};

const ENDPOINT: &str = "chat";

/// LLM 服务
///
/// 职责：
/// - 调用 OpenAI 兼容接口
/// - 按档位选择模型
/// - 把 SDK 错误归类为 `ServiceError`
/// - 不解析返回内容
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    large_model_name: String,
    vision_model_name: String,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        let client = Client::with_config(openai_config);

        Self {
            client,
            model_name: config.llm_model_name.clone(),
            large_model_name: config.llm_large_model_name.clone(),
            vision_model_name: config.llm_vision_model_name.clone(),
        }
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Standard => &self.model_name,
            ModelTier::Large => &self.large_model_name,
            ModelTier::Vision => &self.vision_model_name,
        }
    }

    /// 构建消息列表（支持图片）
    fn build_messages(
        &self,
        request: &CompletionRequest,
    ) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
        let mut messages = Vec::new();

        if let Some(sys_msg) = &request.system {
            let system_msg = ChatCompletionRequestSystemMessageArgs::default()
                .content(sys_msg.as_str())
                .build()?;
            messages.push(ChatCompletionRequestMessage::System(system_msg));
        }

        let user_msg = match &request.image {
            Some(image) => {
                // 使用 Vision API：文本 + 图片
                let content_parts = vec![
                    ChatCompletionRequestUserMessageContentPart::Text(
                        ChatCompletionRequestMessageContentPartText {
                            text: request.user.clone(),
                        },
                    ),
                    ChatCompletionRequestUserMessageContentPart::ImageUrl(
                        ChatCompletionRequestMessageContentPartImage {
                            image_url: ImageUrl {
                                url: image.data_url.clone(),
                                detail: Some(ImageDetail::High),
                            },
                        },
                    ),
                ];

                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(
                        content_parts,
                    ))
                    .build()?
            }
            None => ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.as_str())
                .build()?,
        };

        messages.push(ChatCompletionRequestMessage::User(user_msg));
        Ok(messages)
    }

    /// 构建完整的补全请求；`json` 请求要求服务返回 JSON 对象
    fn build_request(
        &self,
        request: &CompletionRequest,
    ) -> Result<CreateChatCompletionRequest, OpenAIError> {
        // 结构化抽取和整页转写需要较长的输出
        let max_tokens: u32 = if request.json {
            8192
        } else if request.image.is_some() {
            4000
        } else {
            1024
        };

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(self.model_for(request.tier))
            .messages(self.build_messages(request)?)
            .temperature(0.0)
            .max_tokens(max_tokens);
        if request.json {
            args.response_format(ResponseFormat::JsonObject);
        }
        args.build()
    }
}

#[async_trait]
impl CompletionService for LlmService {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ServiceError> {
        let model = self.model_for(request.tier);
        debug!(
            "调用 LLM API，模型: {}，用户消息长度: {} 字符，图片: {}",
            model,
            request.user.len(),
            request.image.is_some()
        );

        let chat_request = self
            .build_request(&request)
            .map_err(|e| ServiceError::classify(ENDPOINT, e.to_string()))?;

        let response = self.client.chat().create(chat_request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            ServiceError::classify(ENDPOINT, e.to_string())
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ServiceError::EmptyResponse {
                endpoint: ENDPOINT.to_string(),
            })?;

        Ok(content.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_service() -> LlmService {
        let config = Config {
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or_default(),
            ..Config::default()
        };
        LlmService::new(&config)
    }

    #[test]
    fn test_model_for_tier() {
        let service = create_test_service();
        assert_eq!(service.model_for(ModelTier::Standard), "mistral-small-latest");
        assert_eq!(service.model_for(ModelTier::Large), "mistral-medium-latest");
        assert_eq!(service.model_for(ModelTier::Vision), "mistral-large-latest");
    }

    #[test]
    fn test_build_messages_with_system_and_image() {
        let service = create_test_service();
        let request = CompletionRequest::text(ModelTier::Vision, "Lis la question 3")
            .with_system("Tu es un correcteur")
            .with_image(crate::infrastructure::completion::ImageInput {
                data_url: "data:image/jpeg;base64,AAAA".to_string(),
            });

        let messages = service.build_messages(&request).unwrap();
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0], ChatCompletionRequestMessage::System(_)));
        assert!(matches!(messages[1], ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn test_json_request_sets_response_format() {
        let service = create_test_service();
        let json = service
            .build_request(&CompletionRequest::text(ModelTier::Standard, "{}").expect_json())
            .unwrap();
        assert!(matches!(json.response_format, Some(ResponseFormat::JsonObject)));
        assert_eq!(json.model, "mistral-small-latest");

        let plain = service
            .build_request(&CompletionRequest::text(ModelTier::Large, "texte"))
            .unwrap();
        assert!(plain.response_format.is_none());
    }

    /// 测试通用 LLM 调用
    ///
    /// 运行方式：
    /// ```bash
    /// LLM_API_KEY=... cargo test test_complete_simple -- --ignored --nocapture
    /// ```
    #[tokio::test]
    #[ignore]
    async fn test_complete_simple() {
        let _ = tracing_subscriber::fmt::try_init();

        let service = create_test_service();
        let result = service
            .complete(
                CompletionRequest::text(ModelTier::Standard, "Réponds seulement: OK")
                    .with_system("Tu es un assistant concis."),
            )
            .await;

        match result {
            Ok(response) => {
                println!("LLM 响应: {}", response);
                assert!(!response.is_empty());
            }
            Err(e) => panic!("测试失败: {}", e),
        }
    }
}
