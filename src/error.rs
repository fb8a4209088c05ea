// error.rs — 错误类型模块
// 区分推理后端返回的不同失败原因，取代对错误消息的零散字符串匹配

use thiserror::Error;

/// 程序内所有可预期的错误
#[derive(Debug, Error)]
pub enum Error {
    /// 图片模型因内容安全策略拒绝生成（可以换个提示词重试）
    #[error("content policy rejection: {message}")]
    ContentPolicy { message: String },

    /// 预测以 failed / canceled 状态结束
    #[error("prediction {id} {status}: {message}")]
    PredictionFailed {
        id: String,
        status: String,
        message: String,
    },

    /// 接口返回非 2xx 状态码
    #[error("Replicate API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 预测成功但没有任何输出 URL
    #[error("prediction {id} returned no output")]
    MissingOutput { id: String },

    /// 提示词增强失败，不在本地恢复
    #[error("prompt enhancement failed: {0}")]
    PromptEnhancement(#[source] Box<Error>),

    #[error("REPLICATE_API_TOKEN is not set")]
    MissingToken,

    /// 既没有给出主题，也没有可用的转录文件
    #[error("no theme given")]
    MissingTheme,

    #[error("invalid model reference '{0}', expected owner/name or owner/name:version")]
    InvalidModel(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// 下载的文件不是可解析的 WebP 容器
    #[error("cannot embed provenance: {0}")]
    Metadata(#[from] img_parts::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// 根据后端给出的失败文本构造错误。
    ///
    /// Replicate 只以自由文本报告失败原因，没有可区分的错误码，
    /// 因此这里按约定的启发式规则归类：消息中包含 "nsfw"（不区分大小写）即视为内容安全拒绝。
    /// 这是全程序唯一做这种判断的地方。
    pub fn from_failure(id: &str, status: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_content_policy_message(&message) {
            Self::ContentPolicy { message }
        } else {
            Self::PredictionFailed {
                id: id.to_string(),
                status: status.to_string(),
                message,
            }
        }
    }

    /// 从 HTTP 错误响应构造错误，同样套用内容安全的启发式规则
    pub fn from_api(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_content_policy_message(&message) {
            Self::ContentPolicy { message }
        } else {
            Self::Api { status, message }
        }
    }

    pub fn is_content_policy(&self) -> bool {
        matches!(self, Self::ContentPolicy { .. })
    }
}

fn is_content_policy_message(message: &str) -> bool {
    message.to_lowercase().contains("nsfw")
}
