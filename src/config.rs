use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::utils::retry::RetryPolicy;

/// 程序配置文件
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    // --- 补全服务（OpenAI 兼容接口） ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    /// 按批次抽取用的模型
    pub llm_model_name: String,
    /// 整份文档一次性抽取用的模型
    pub llm_large_model_name: String,
    /// 读图用的模型
    pub llm_vision_model_name: String,
    // --- 识别服务 ---
    pub ocr_api_base_url: String,
    pub ocr_api_key: String,
    pub ocr_model_name: String,
    // --- 存储与文件 ---
    /// SQLite 数据库路径
    pub database_path: String,
    /// 下载文件和页面图片的工作目录
    pub work_dir: String,
    /// 警告文件
    pub warn_file: String,
    /// 输出日志文件
    pub output_log_file: String,
    /// 文档所属院校
    pub institution: String,
    // --- 抽取参数 ---
    /// 每个批次的字符预算
    pub batch_char_budget: usize,
    /// 从上一页带过来的重叠字符数
    pub page_overlap_chars: usize,
    /// 整份文档一次性抽取的字符上限
    pub whole_document_char_limit: usize,
    /// 整份文档一次性抽取的页数上限
    pub whole_document_max_sections: usize,
    /// 每次写入的记录数
    pub write_chunk_size: usize,
    /// 两次服务调用之间的间隔（毫秒）
    pub inter_call_delay_ms: u64,
    /// 两个阶段之间的间隔（毫秒）
    pub phase_pause_ms: u64,
    // --- 重试 ---
    pub max_attempts: usize,
    pub retry_initial_delay_ms: u64,
    pub retry_backoff_factor: f64,
    // --- 识别质量 ---
    /// 低于该长度的页面视为识别不足
    pub min_page_chars: usize,
    /// 必须出现题号标记的页码
    pub expected_marker_pages: Vec<usize>,
    /// 是否启用读图兜底
    pub vision_fallback: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.mistral.ai/v1".to_string(),
            llm_model_name: "mistral-small-latest".to_string(),
            llm_large_model_name: "mistral-medium-latest".to_string(),
            llm_vision_model_name: "mistral-large-latest".to_string(),
            ocr_api_base_url: "https://api.mistral.ai/v1".to_string(),
            ocr_api_key: String::new(),
            ocr_model_name: "mistral-ocr-latest".to_string(),
            database_path: "qcm_bank.sqlite3".to_string(),
            work_dir: "qcm_work".to_string(),
            warn_file: "warn.txt".to_string(),
            output_log_file: "output.txt".to_string(),
            institution: "Université".to_string(),
            batch_char_budget: 10_000,
            page_overlap_chars: 200,
            whole_document_char_limit: 40_000,
            whole_document_max_sections: 3,
            write_chunk_size: 50,
            inter_call_delay_ms: 2_000,
            phase_pause_ms: 5_000,
            max_attempts: 3,
            retry_initial_delay_ms: 2_000,
            retry_backoff_factor: 2.0,
            min_page_chars: 500,
            expected_marker_pages: Vec::new(),
            vision_fallback: true,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 从环境变量加载（未设置的字段使用默认值）
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// 从 TOML 文件加载，再叠加环境变量
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
            path: path.display().to_string(),
            source,
        })?;
        Ok(config.with_env_overrides())
    }

    fn with_env_overrides(self) -> Self {
        let d = self;
        Self {
            llm_api_key: env_or("LLM_API_KEY", d.llm_api_key),
            llm_api_base_url: env_or("LLM_API_BASE_URL", d.llm_api_base_url),
            llm_model_name: env_or("LLM_MODEL_NAME", d.llm_model_name),
            llm_large_model_name: env_or("LLM_LARGE_MODEL_NAME", d.llm_large_model_name),
            llm_vision_model_name: env_or("LLM_VISION_MODEL_NAME", d.llm_vision_model_name),
            ocr_api_base_url: env_or("OCR_API_BASE_URL", d.ocr_api_base_url),
            ocr_api_key: env_or("OCR_API_KEY", d.ocr_api_key),
            ocr_model_name: env_or("OCR_MODEL_NAME", d.ocr_model_name),
            database_path: env_or("DATABASE_PATH", d.database_path),
            work_dir: env_or("WORK_DIR", d.work_dir),
            warn_file: env_or("WARN_FILE", d.warn_file),
            output_log_file: env_or("OUTPUT_LOG_FILE", d.output_log_file),
            institution: env_or("INSTITUTION", d.institution),
            batch_char_budget: env_parse_or("BATCH_CHAR_BUDGET", d.batch_char_budget),
            write_chunk_size: env_parse_or("WRITE_CHUNK_SIZE", d.write_chunk_size),
            inter_call_delay_ms: env_parse_or("INTER_CALL_DELAY_MS", d.inter_call_delay_ms),
            phase_pause_ms: env_parse_or("PHASE_PAUSE_MS", d.phase_pause_ms),
            max_attempts: env_parse_or("MAX_ATTEMPTS", d.max_attempts),
            vision_fallback: env_parse_or("VISION_FALLBACK", d.vision_fallback),
            verbose_logging: env_parse_or("VERBOSE_LOGGING", d.verbose_logging),
            ..d
        }
    }

    /// 服务调用的重试策略
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.retry_initial_delay_ms),
            self.retry_backoff_factor,
        )
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn phase_pause(&self) -> Duration {
        Duration::from_millis(self.phase_pause_ms)
    }
}

fn env_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            batch_char_budget = 6000
            expected_marker_pages = [7]
            vision_fallback = false
            "#,
        )
        .unwrap();

        assert_eq!(config.batch_char_budget, 6000);
        assert_eq!(config.expected_marker_pages, vec![7]);
        assert!(!config.vision_fallback);
        assert_eq!(config.page_overlap_chars, 200);
        assert_eq!(config.write_chunk_size, 50);
    }
}
