// generation.rs — 生成循环
// 提示词 → 出图 → 设置壁纸 → 等待 → 重复，直到收到退出信号

use crate::error::Result;
use crate::producer::ImageProducer;
use crate::prompt::PromptBuilder;
use crate::setter::WallpaperApplier;
use log::{info, warn};
use rust_i18n::t;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

pub const DEFAULT_INTERVAL_MS: u64 = 1000;

pub struct GenerationLoop {
    theme: String,
    prompts: PromptBuilder,
    producer: ImageProducer,
    applier: WallpaperApplier,
    interval: Duration,
}

impl GenerationLoop {
    pub fn new(
        theme: String,
        prompts: PromptBuilder,
        producer: ImageProducer,
        applier: WallpaperApplier,
        interval: Duration,
    ) -> Self {
        Self {
            theme,
            prompts,
            producer,
            applier,
            interval,
        }
    }

    /// 跑一轮。没有产出图片时跳过设置壁纸，返回 `Ok(None)`
    pub async fn run_cycle(&self) -> Result<Option<PathBuf>> {
        let prompt = self.prompts.build(&self.theme).await?;
        let produced = self
            .producer
            .produce(&self.prompts, &self.theme, prompt)
            .await?;

        match &produced {
            Some(path) => self.applier.apply(path),
            None => warn!("{}", t!("cycle_skipped")),
        }
        Ok(produced)
    }

    /// 循环执行，每轮完整结束后再等待 `interval`，两轮之间不会重叠。
    ///
    /// `shutdown` 变为 true（或发送端被丢弃）时立即停止，包括正在进行的一轮。
    /// `once` 为 true 时只跑一轮。返回完成的轮数。
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>, once: bool) -> Result<u64> {
        let mut completed = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            info!("{}", t!("cycle_start", cycle => completed + 1));
            tokio::select! {
                biased;
                result = self.run_cycle() => {
                    result?;
                    completed += 1;
                }
                _ = shutdown.changed() => break,
            }

            if once {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("{}", t!("loop_stopped", cycles => completed));
        Ok(completed)
    }
}
