// producer.rs — 出图模块
// 调用图片模型、下载结果、写入溯源记录、复制为 _current.webp

use crate::backend::{InferenceBackend, ModelRef};
use crate::error::{Error, Result};
use crate::prediction::Prediction;
use crate::prompt::PromptBuilder;
use crate::provenance::ProvenanceRecord;
use log::{debug, error, info, warn};
use rand::Rng;
use rust_i18n::t;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// 默认的图片模型
pub const DEFAULT_IMAGE_MODEL: &str = "black-forest-labs/flux-schnell";

/// 始终指向最新一张图片的文件名，其它工具依赖这个约定
pub const CURRENT_FILE: &str = "_current.webp";

pub const ASPECT_RATIO: &str = "16:9";

/// 附加给图片模型的输出参数
#[derive(Debug, Clone, Default)]
pub struct ImageOptions {
    pub output_format: Option<String>,
    pub output_quality: Option<u8>,
}

/// 内容安全拒绝后的重试策略
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// 第一次重试前的等待时间，之后每次翻倍
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt` 次重试（从 1 开始）前的等待时间，带最多一半基数的随机抖动
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.backoff.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

pub struct ImageProducer {
    backend: Arc<dyn InferenceBackend>,
    image_model: ModelRef,
    options: ImageOptions,
    retry: RetryPolicy,
    output_dir: PathBuf,
}

impl ImageProducer {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        image_model: ModelRef,
        options: ImageOptions,
        retry: RetryPolicy,
        output_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            image_model,
            options,
            retry,
            output_dir,
        }
    }

    /// 生成一张图片并返回其路径。
    ///
    /// - 内容安全拒绝：用 `prompts` 从 `theme` 重新得到提示词后重试，最多 `max_retries` 次
    /// - 其它失败：记录日志，返回 `Ok(None)`，本轮跳过
    /// - 只有重新生成提示词失败时返回 `Err`
    pub async fn produce(
        &self,
        prompts: &PromptBuilder,
        theme: &str,
        prompt: String,
    ) -> Result<Option<PathBuf>> {
        let mut prompt = prompt;
        let mut attempt = 0;

        let prediction = loop {
            match self.generate(&prompt).await {
                Ok(prediction) => break prediction,
                Err(e) if e.is_content_policy() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    warn!(
                        "{}",
                        t!("nsfw_retry", attempt => attempt, max => self.retry.max_retries)
                    );
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    prompt = prompts.build(theme).await?;
                }
                Err(e) if e.is_content_policy() => {
                    error!("{}", t!("nsfw_exhausted", max => self.retry.max_retries));
                    return Ok(None);
                }
                Err(e) => {
                    error!("{}", t!("error_generate", reason => e));
                    return Ok(None);
                }
            }
        };

        match self.store(&prediction).await {
            Ok(path) => Ok(Some(path)),
            Err(e) => {
                error!("{}", t!("error_store", id => prediction.id, reason => e));
                Ok(None)
            }
        }
    }

    fn image_input(&self, prompt: &str) -> Value {
        let mut input = json!({
            "prompt": prompt,
            "aspect_ratio": ASPECT_RATIO,
        });
        if let Some(format) = &self.options.output_format {
            input["output_format"] = json!(format);
        }
        if let Some(quality) = self.options.output_quality {
            input["output_quality"] = json!(quality);
        }
        input
    }

    async fn generate(&self, prompt: &str) -> Result<Prediction> {
        let input = self.image_input(prompt);
        info!("{}", t!("generating_image", model => self.image_model));
        debug!("{input}");
        self.backend.run(&self.image_model, input).await
    }

    /// 下载第一张输出图片，嵌入溯源记录后落盘
    async fn store(&self, prediction: &Prediction) -> Result<PathBuf> {
        let url = prediction
            .first_output_url()
            .ok_or_else(|| Error::MissingOutput {
                id: prediction.id.clone(),
            })?;

        let save_path = artifact_path(&self.output_dir, &prediction.id);
        info!("{}", t!("downloading", url => url));

        let record = ProvenanceRecord::new(&self.image_model, prediction)?;
        let bytes = record.embed(self.backend.fetch(&url).await?)?;

        if let Err(e) = self.write_files(&save_path, &bytes, &record).await {
            // 不留下半成品：图片和溯源文件要么都在，要么都不在
            let _ = tokio::fs::remove_file(&save_path).await;
            let _ = tokio::fs::remove_file(ProvenanceRecord::sidecar_path(&save_path)).await;
            return Err(e);
        }
        info!("{}", t!("save_path", path => save_path.display()));

        Ok(save_path)
    }

    async fn write_files(
        &self,
        save_path: &Path,
        bytes: &[u8],
        record: &ProvenanceRecord,
    ) -> Result<()> {
        let mut file = File::create(save_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;

        record.write(save_path).await?;
        tokio::fs::copy(save_path, self.output_dir.join(CURRENT_FILE)).await?;
        Ok(())
    }
}

/// `<dir>/<id>.webp`；id 中的路径分隔符替换掉，避免写出目录
fn artifact_path(dir: &Path, id: &str) -> PathBuf {
    let name: String = id
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    dir.join(format!("{}.webp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::DEFAULT_TEXT_MODEL;
    use crate::testing::FakeBackend;

    struct Fixture {
        backend: Arc<FakeBackend>,
        producer: ImageProducer,
        prompts: PromptBuilder,
        dir: tempfile::TempDir,
    }

    fn fixture(enhance: bool, max_retries: u32) -> Fixture {
        let backend = Arc::new(FakeBackend::default());
        let dir = tempfile::tempdir().unwrap();
        let producer = ImageProducer::new(
            backend.clone(),
            ModelRef::parse(DEFAULT_IMAGE_MODEL).unwrap(),
            ImageOptions::default(),
            RetryPolicy {
                max_retries,
                backoff: Duration::ZERO,
            },
            dir.path().to_path_buf(),
        );
        let prompts = PromptBuilder::new(
            backend.clone(),
            ModelRef::parse(DEFAULT_TEXT_MODEL).unwrap(),
            enhance,
        );
        Fixture {
            backend,
            producer,
            prompts,
            dir,
        }
    }

    fn nsfw() -> Error {
        Error::from_failure(
            "p",
            "failed",
            "NSFW content detected. Try running it again, or try a different prompt.",
        )
    }

    #[tokio::test]
    async fn success_writes_artifact_sidecar_and_current_copy() {
        let f = fixture(false, 3);
        f.backend.push_image(
            "abc123",
            &["https://replicate.delivery/a/out-0.webp", "https://replicate.delivery/a/out-1.webp"],
        );

        let path = f
            .producer
            .produce(&f.prompts, "autumn forest", "autumn forest".to_string())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(path, f.dir.path().join("abc123.webp"));
        assert_eq!(f.backend.fetches(), vec!["https://replicate.delivery/a/out-0.webp"]);

        let artifact = std::fs::read(&path).unwrap();
        let current = std::fs::read(f.dir.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(current, artifact);

        let embedded = ProvenanceRecord::read_embedded(&artifact).unwrap().unwrap();
        assert_eq!(embedded.input["prompt"], "autumn forest");
        assert_eq!(embedded.input["aspect_ratio"], "16:9");
        assert_eq!(embedded.meta["id"], "abc123");
        assert!(!embedded.meta.contains_key("logs"));
        assert_eq!(
            ProvenanceRecord::read_embedded(&current).unwrap(),
            Some(embedded.clone())
        );

        let sidecar = std::fs::read(f.dir.path().join("abc123.json")).unwrap();
        let record: ProvenanceRecord = serde_json::from_slice(&sidecar).unwrap();
        assert_eq!(record, embedded);
    }

    #[tokio::test]
    async fn failed_current_copy_leaves_no_partial_files() {
        let f = fixture(false, 3);
        // 同名目录让复制 _current.webp 失败
        std::fs::create_dir(f.dir.path().join(CURRENT_FILE)).unwrap();
        f.backend.push_image("abc123", &["https://x/abc123.webp"]);

        let path = f
            .producer
            .produce(&f.prompts, "t", "t".to_string())
            .await
            .unwrap();
        assert_eq!(path, None);
        assert!(!f.dir.path().join("abc123.webp").exists());
        assert!(!f.dir.path().join("abc123.json").exists());
        assert!(f.dir.path().join(CURRENT_FILE).is_dir());
    }

    #[tokio::test]
    async fn current_copy_follows_the_latest_artifact() {
        let f = fixture(false, 3);
        f.backend.push_image("first", &["https://x/first.webp"]);
        f.backend.push_image("second", &["https://x/second.webp"]);

        for _ in 0..2 {
            f.producer
                .produce(&f.prompts, "t", "t".to_string())
                .await
                .unwrap()
                .unwrap();
        }

        let current = std::fs::read(f.dir.path().join(CURRENT_FILE)).unwrap();
        assert_eq!(current, std::fs::read(f.dir.path().join("second.webp")).unwrap());
        assert!(f.dir.path().join("first.webp").exists());
    }

    #[tokio::test]
    async fn nsfw_rejection_reenhances_once_per_failure() {
        let f = fixture(true, 3);
        // 两次拒绝，每次拒绝后各有一次改写，最后成功
        f.backend.push_error(nsfw());
        f.backend.push_text(&["\"a tamer forest\""]);
        f.backend.push_error(nsfw());
        f.backend.push_text(&["a calm forest"]);
        f.backend.push_image("ok1", &["https://x/ok1.webp"]);

        let path = f
            .producer
            .produce(&f.prompts, "autumn forest", "initial prompt".to_string())
            .await
            .unwrap();
        assert_eq!(path, Some(f.dir.path().join("ok1.webp")));

        let calls = f.backend.calls();
        let models: Vec<&str> = calls.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(
            models,
            vec![
                DEFAULT_IMAGE_MODEL,
                DEFAULT_TEXT_MODEL,
                DEFAULT_IMAGE_MODEL,
                DEFAULT_TEXT_MODEL,
                DEFAULT_IMAGE_MODEL,
            ]
        );
        assert_eq!(calls[0].1["prompt"], "initial prompt");
        assert_eq!(calls[1].1["prompt"], "autumn forest");
        assert_eq!(calls[2].1["prompt"], "a tamer forest");
        assert_eq!(calls[4].1["prompt"], "a calm forest");
    }

    #[tokio::test]
    async fn nsfw_retry_without_enhancement_reuses_theme() {
        let f = fixture(false, 3);
        f.backend.push_error(nsfw());
        f.backend.push_image("ok2", &["https://x/ok2.webp"]);

        let path = f
            .producer
            .produce(&f.prompts, "autumn forest", "autumn forest".to_string())
            .await
            .unwrap();
        assert!(path.is_some());
        assert_eq!(f.backend.calls().len(), 2);
    }

    #[tokio::test]
    async fn nsfw_retries_are_bounded() {
        let f = fixture(false, 2);
        for _ in 0..5 {
            f.backend.push_error(nsfw());
        }

        let path = f
            .producer
            .produce(&f.prompts, "t", "t".to_string())
            .await
            .unwrap();
        assert_eq!(path, None);
        // 首次 + 2 次重试
        assert_eq!(f.backend.calls().len(), 3);
    }

    #[tokio::test]
    async fn other_failure_skips_cycle_without_files() {
        let f = fixture(true, 3);
        f.backend
            .push_error(Error::from_failure("p", "failed", "CUDA out of memory"));

        let path = f
            .producer
            .produce(&f.prompts, "t", "t".to_string())
            .await
            .unwrap();
        assert_eq!(path, None);
        assert_eq!(f.backend.calls().len(), 1);
        assert_eq!(std::fs::read_dir(f.dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_output_skips_cycle() {
        let f = fixture(false, 3);
        f.backend.push_image("empty", &[]);

        let path = f
            .producer
            .produce(&f.prompts, "t", "t".to_string())
            .await
            .unwrap();
        assert_eq!(path, None);
        assert!(f.backend.fetches().is_empty());
        assert!(!f.dir.path().join(CURRENT_FILE).exists());
    }

    #[tokio::test]
    async fn reenhancement_failure_during_retry_propagates() {
        let f = fixture(true, 3);
        f.backend.push_error(nsfw());
        f.backend.push_error(Error::from_api(500, "internal error"));

        let err = f
            .producer
            .produce(&f.prompts, "t", "t".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PromptEnhancement(_)));
    }

    #[test]
    fn image_input_includes_optional_hints() {
        let f = fixture(false, 3);
        assert_eq!(
            f.producer.image_input("p"),
            json!({ "prompt": "p", "aspect_ratio": "16:9" })
        );

        let producer = ImageProducer::new(
            f.backend.clone(),
            ModelRef::parse(DEFAULT_IMAGE_MODEL).unwrap(),
            ImageOptions {
                output_format: Some("webp".to_string()),
                output_quality: Some(90),
            },
            RetryPolicy::default(),
            f.dir.path().to_path_buf(),
        );
        assert_eq!(
            producer.image_input("p"),
            json!({
                "prompt": "p",
                "aspect_ratio": "16:9",
                "output_format": "webp",
                "output_quality": 90
            })
        );
    }

    #[test]
    fn backoff_doubles_with_bounded_jitter() {
        let policy = RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(100),
        };
        for attempt in 1..=3u32 {
            let base = 100u64 << (attempt - 1);
            let delay = policy.delay(attempt).as_millis() as u64;
            assert!(delay >= base && delay <= base + 50, "attempt {attempt}: {delay}");
        }
        let zero = RetryPolicy {
            max_retries: 1,
            backoff: Duration::ZERO,
        };
        assert_eq!(zero.delay(1), Duration::ZERO);
    }

    #[test]
    fn artifact_path_keeps_id_inside_dir() {
        let dir = Path::new("outputs");
        assert_eq!(artifact_path(dir, "abc123"), Path::new("outputs/abc123.webp"));
        assert_eq!(artifact_path(dir, "../x"), Path::new("outputs/.._x.webp"));
    }
}
