use thiserror::Error;

/// 应用程序错误类型
///
/// 只有这里的错误会中止一个文档的处理；其余错误在调用点被降级为
/// `None` / 空结果并记录警告。
#[derive(Debug, Error)]
pub enum AppError {
    /// 获取源文档失败
    #[error("获取源文档失败: {0}")]
    Fetch(#[from] FetchError),
    /// 识别服务不可用或没有返回任何文本
    #[error("识别失败: {0}")]
    Recognition(String),
    /// 外部服务错误
    #[error("服务错误: {0}")]
    Service(#[from] ServiceError),
    /// 存储错误
    #[error("存储错误: {0}")]
    Store(#[from] StoreError),
    /// 配置错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),
    /// 文档已写入，但后续阶段中断
    #[error("文档 #{document_id} 在{phase}阶段中断: {source}")]
    Interrupted {
        document_id: i64,
        label: String,
        phase: &'static str,
        #[source]
        source: Box<AppError>,
    },
    /// 其他错误（用于包装第三方库错误）
    #[error("错误: {0}")]
    Other(String),
}

/// 外部服务（补全 / 识别）调用错误
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// 请求频率限制
    #[error("请求频率限制 ({endpoint})")]
    RateLimited { endpoint: String },
    /// 超时、连接中断等可重试错误
    #[error("临时错误 ({endpoint}): {message}")]
    Transient { endpoint: String, message: String },
    /// 返回结果为空
    #[error("返回内容为空 ({endpoint})")]
    EmptyResponse { endpoint: String },
    /// 不可重试的请求错误
    #[error("请求失败 ({endpoint}): {message}")]
    Request { endpoint: String, message: String },
}

impl ServiceError {
    /// 是否值得重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServiceError::RateLimited { .. } | ServiceError::Transient { .. }
        )
    }

    /// 是否为限流信号
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ServiceError::RateLimited { .. })
    }

    /// 根据错误文本归类
    ///
    /// 服务端只在消息里给出限流信息，所以按文本识别。
    pub fn classify(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") || lower.contains("too many requests") {
            ServiceError::RateLimited { endpoint }
        } else if lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("connection")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
        {
            ServiceError::Transient { endpoint, message }
        } else {
            ServiceError::Request { endpoint, message }
        }
    }
}

/// 结构化响应格式错误
#[derive(Debug, Error)]
pub enum ParseError {
    /// 不是合法 JSON
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
    /// JSON 合法但结构不符合预期
    #[error("响应结构不符合预期: {0}")]
    Shape(String),
    /// 字母集合不合法
    #[error("字母集合不合法: {0}")]
    Letters(String),
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    /// 无法连接存储
    #[error("存储不可用: {0}")]
    Unavailable(String),
    /// 查询或写入失败
    #[error("查询失败: {0}")]
    Query(String),
    /// 唯一约束冲突
    #[error("唯一约束冲突: {0}")]
    Constraint(String),
    /// 记录不存在
    #[error("记录不存在: {table}#{id}")]
    NotFound { table: &'static str, id: i64 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Constraint(err.to_string())
            }
            rusqlite::Error::SqliteFailure(code, _)
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::CannotOpen
                        | rusqlite::ErrorCode::NotADatabase
                        | rusqlite::ErrorCode::PermissionDenied
                ) =>
            {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Query(err.to_string()),
        }
    }
}

/// 获取源文档错误
#[derive(Debug, Error)]
pub enum FetchError {
    /// 网络请求失败
    #[error("下载失败 ({url}): {message}")]
    Download { url: String, message: String },
    /// 写入本地文件失败
    #[error("写入文件失败 ({path}): {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// URL 中没有文件名
    #[error("无法从 URL 推断文件名: {0}")]
    NoFilename(String),
}

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败
    #[error("读取配置文件失败 ({path}): {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML解析失败 ({path}): {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建识别失败错误
    pub fn recognition(message: impl Into<String>) -> Self {
        AppError::Recognition(message.into())
    }

    /// 中断时已经写入的文档 (id, 标签)
    pub fn interrupted_document(&self) -> Option<(i64, &str)> {
        match self {
            AppError::Interrupted {
                document_id, label, ..
            } => Some((*document_id, label.as_str())),
            _ => None,
        }
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

/// 存储结果类型
pub type StoreResult<T> = Result<T, StoreError>;
