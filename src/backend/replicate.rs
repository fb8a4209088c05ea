// replicate.rs — Replicate API 异步客户端模块
// 负责创建预测、轮询直到结束、下载输出文件
//
// 官方模型（owner/name）使用 POST /v1/models/{owner}/{name}/predictions，
// 带版本号的模型（owner/name:version）使用 POST /v1/predictions。

use super::{InferenceBackend, ModelRef};
use crate::error::{Error, Result};
use crate::prediction::{Prediction, PredictionStatus};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.replicate.com/v1";

/// 轮询间隔
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 单个 HTTP 请求的超时时间
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// 出错时 Replicate 返回的 JSON 结构
#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    #[serde(default)]
    detail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// Replicate API 异步客户端
///
/// Token 通过 `Authorization: Bearer <token>` header 传递。
pub struct ReplicateClient {
    /// HTTP 客户端（内部有连接池，应复用）
    client: reqwest::Client,

    /// API 基础 URL
    base_url: String,

    api_token: String,
}

impl ReplicateClient {
    /// 创建新的 Replicate 客户端
    pub fn new(api_token: String, base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// 创建预测请求的 URL 与请求体
    fn create_request(&self, model: &ModelRef, input: Value) -> (String, Value) {
        match &model.version {
            Some(version) => (
                format!("{}/predictions", self.base_url),
                json!({ "version": version, "input": input }),
            ),
            None => (
                format!("{}/models/{}/{}/predictions", self.base_url, model.owner, model.name),
                json!({ "input": input }),
            ),
        }
    }

    async fn create(&self, model: &ModelRef, input: Value) -> Result<Prediction> {
        let (url, body) = self.create_request(model, input);
        debug!("POST {url}: {body}");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        read_prediction(response).await
    }

    /// 轮询直到预测进入终态
    async fn wait(&self, mut prediction: Prediction) -> Result<Prediction> {
        let poll_url = prediction
            .poll_url()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/predictions/{}", self.base_url, prediction.id));

        let mut last_status = prediction.status;
        info!("prediction {} {}", prediction.id, last_status.as_str());

        while !prediction.status.is_terminal() {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .client
                .get(&poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .await?;
            prediction = read_prediction(response).await?;

            if prediction.status != last_status {
                last_status = prediction.status;
                info!("prediction {} {}", prediction.id, last_status.as_str());
            }
        }

        match prediction.status {
            PredictionStatus::Succeeded => Ok(prediction),
            status => Err(Error::from_failure(
                &prediction.id,
                status.as_str(),
                prediction.failure_message(),
            )),
        }
    }
}

/// 检查状态码并解析预测记录
async fn read_prediction(response: reqwest::Response) -> Result<Prediction> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(Error::from_api(status.as_u16(), api_error_message(&body)));
    }

    Ok(serde_json::from_str(&body)?)
}

/// 从错误响应体里提取可读的消息，解析不了就用原文
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            detail: Some(detail),
            ..
        }) => detail,
        Ok(ApiErrorBody {
            title: Some(title), ..
        }) => title,
        _ => body.trim().to_string(),
    }
}

#[async_trait]
impl InferenceBackend for ReplicateClient {
    async fn run(&self, model: &ModelRef, input: Value) -> Result<Prediction> {
        let prediction = self.create(model, input).await?;
        self.wait(prediction).await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;

        Ok(bytes.to_vec())
    }
}
