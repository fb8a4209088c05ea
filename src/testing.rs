// testing.rs — 测试用的假后端与假壁纸设置器

use crate::backend::{InferenceBackend, ModelRef};
use crate::error::{Error, Result};
use crate::prediction::{Prediction, PredictionStatus};
use crate::setter::WallpaperSetter;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// 按脚本依次返回预测结果，并记录每次调用
#[derive(Default)]
pub struct FakeBackend {
    responses: Mutex<VecDeque<Result<Prediction>>>,
    calls: Mutex<Vec<(String, Value)>>,
    fetches: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn push_text(&self, fragments: &[&str]) {
        let prediction = Prediction {
            id: "text".to_string(),
            status: PredictionStatus::Succeeded,
            output: Some(json!(fragments)),
            ..Default::default()
        };
        self.responses.lock().unwrap().push_back(Ok(prediction));
    }

    pub fn push_image(&self, id: &str, urls: &[&str]) {
        let prediction = Prediction {
            id: id.to_string(),
            model: Some("black-forest-labs/flux-schnell".to_string()),
            status: PredictionStatus::Succeeded,
            output: Some(json!(urls)),
            logs: Some("using seed 42\n".to_string()),
            ..Default::default()
        };
        self.responses.lock().unwrap().push_back(Ok(prediction));
    }

    pub fn push_error(&self, err: Error) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    /// (模型, 输入) 的调用记录
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn fetches(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

/// 1x1 的无损 WebP（VP8L），作为所有下载的内容
pub const TINY_WEBP: &[u8] = &[
    0x52, 0x49, 0x46, 0x46, 0x1a, 0x00, 0x00, 0x00, 0x57, 0x45, 0x42, 0x50, 0x56, 0x50, 0x38,
    0x4c, 0x0d, 0x00, 0x00, 0x00, 0x2f, 0x00, 0x00, 0x00, 0x10, 0x07, 0x10, 0x11, 0x11, 0x88,
    0x88, 0xfe, 0x07, 0x00,
];

#[async_trait]
impl InferenceBackend for FakeBackend {
    async fn run(&self, model: &ModelRef, mut input: Value) -> Result<Prediction> {
        self.calls
            .lock()
            .unwrap()
            .push((model.to_string(), input.clone()));

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Ok(mut prediction)) => {
                prediction.input = input.take();
                Ok(prediction)
            }
            Some(Err(err)) => Err(err),
            None => Err(Error::from_failure("none", "failed", "no scripted response")),
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.fetches.lock().unwrap().push(url.to_string());
        Ok(TINY_WEBP.to_vec())
    }
}

/// 只记录路径的壁纸设置器
#[derive(Default)]
pub struct RecordingSetter {
    applied: Mutex<Vec<PathBuf>>,
}

impl RecordingSetter {
    pub fn applied(&self) -> Vec<PathBuf> {
        self.applied.lock().unwrap().clone()
    }
}

impl WallpaperSetter for RecordingSetter {
    fn set(&self, path: &Path) -> std::result::Result<(), Box<dyn std::error::Error>> {
        self.applied.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }
}
