// prediction.rs — Replicate 预测记录
// 对应 /v1/predictions 返回的 JSON；未知字段原样保留，写入溯源记录时不丢信息

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// 预测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    #[default]
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
    /// 后端新增的状态值，按“仍在进行”处理
    #[serde(other)]
    Unknown,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
        }
    }
}

/// 一次预测的完整记录
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Prediction {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub input: Value,
    /// 单个 URL、URL 列表或文本片段列表，取决于模型
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub status: PredictionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
    /// get / cancel / stream / web 等接口地址
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
    /// created_at、metrics 等其余字段
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Prediction {
    /// 轮询地址
    pub fn poll_url(&self) -> Option<&str> {
        self.urls.get("get").map(String::as_str)
    }

    /// 所有输出 URL，保持后端给出的顺序
    pub fn output_urls(&self) -> Vec<String> {
        match &self.output {
            Some(Value::String(url)) => vec![url.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// 多个输出时只用第一个
    pub fn first_output_url(&self) -> Option<String> {
        self.output_urls().into_iter().next()
    }

    /// 把语言模型逐段输出的文本拼成一个字符串
    pub fn text_output(&self) -> String {
        match &self.output {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => String::new(),
        }
    }

    /// 失败原因的文本形式
    pub fn failure_message(&self) -> String {
        match &self.error {
            Some(Value::String(msg)) => msg.clone(),
            Some(Value::Null) | None => format!("prediction {}", self.status.as_str()),
            Some(other) => other.to_string(),
        }
    }
}
