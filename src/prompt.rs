// prompt.rs — 提示词构建模块
// 直接使用主题，或交给语言模型改写成更适合出图的提示词

use crate::backend::{InferenceBackend, ModelRef};
use crate::error::{Error, Result};
use log::{debug, info};
use rust_i18n::t;
use serde_json::json;
use std::sync::Arc;

/// 默认的文本模型
pub const DEFAULT_TEXT_MODEL: &str = "meta/meta-llama-3.1-405b-instruct";

/// 改写提示词时给语言模型的系统指令
pub const SYSTEM_PROMPT: &str = "Take the given theme and turn it into a good image prompt.";

pub struct PromptBuilder {
    backend: Arc<dyn InferenceBackend>,
    text_model: ModelRef,
    enhance: bool,
}

impl PromptBuilder {
    pub fn new(backend: Arc<dyn InferenceBackend>, text_model: ModelRef, enhance: bool) -> Self {
        Self {
            backend,
            text_model,
            enhance,
        }
    }

    /// 得到本轮使用的提示词；未开启增强时原样返回主题
    pub async fn build(&self, theme: &str) -> Result<String> {
        if !self.enhance {
            return Ok(theme.to_string());
        }
        self.enhance(theme).await
    }

    /// 调用语言模型改写主题。失败不在这里处理，包装后交给调用方
    async fn enhance(&self, theme: &str) -> Result<String> {
        let input = json!({
            "prompt": theme,
            "system_prompt": SYSTEM_PROMPT,
        });

        info!("{}", t!("enhancing_prompt", model => self.text_model));
        debug!("{input}");

        let prediction = self
            .backend
            .run(&self.text_model, input)
            .await
            .map_err(|e| Error::PromptEnhancement(Box::new(e)))?;

        let prompt = strip_quotes(&prediction.text_output()).to_string();
        info!("{}", t!("enhanced_prompt", prompt => prompt));

        Ok(prompt)
    }
}

/// 去掉开头的一个 `"` 和结尾的一个 `"`，两端各自独立判断
pub fn strip_quotes(text: &str) -> &str {
    let text = text.strip_prefix('"').unwrap_or(text);
    text.strip_suffix('"').unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBackend;
    use serde_json::json;

    fn text_model() -> ModelRef {
        ModelRef::parse(DEFAULT_TEXT_MODEL).unwrap()
    }

    #[test]
    fn strip_quotes_handles_each_end_independently() {
        assert_eq!(strip_quotes("\"foo\""), "foo");
        assert_eq!(strip_quotes("foo"), "foo");
        assert_eq!(strip_quotes("\"foo"), "foo");
        assert_eq!(strip_quotes("foo\""), "foo");
        assert_eq!(strip_quotes("\"\"foo\"\""), "\"foo\"");
        assert_eq!(strip_quotes("\""), "");
        assert_eq!(strip_quotes(""), "");
    }

    #[tokio::test]
    async fn theme_is_used_verbatim_without_enhancement() {
        let backend = Arc::new(FakeBackend::default());
        let builder = PromptBuilder::new(backend.clone(), text_model(), false);

        for theme in ["autumn forest", "", "  \"quoted\"  ", "bananas dressed up like cowboys"] {
            assert_eq!(builder.build(theme).await.unwrap(), theme);
        }
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn enhancement_joins_fragments_and_strips_quotes() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_text(&["\"A misty", " autumn forest", " at dawn\""]);
        let builder = PromptBuilder::new(backend.clone(), text_model(), true);

        let prompt = builder.build("autumn forest").await.unwrap();
        assert_eq!(prompt, "A misty autumn forest at dawn");

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, DEFAULT_TEXT_MODEL);
        assert_eq!(
            calls[0].1,
            json!({ "prompt": "autumn forest", "system_prompt": SYSTEM_PROMPT })
        );
    }

    #[tokio::test]
    async fn enhancement_failure_propagates() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_error(Error::from_api(401, "Unauthenticated"));
        let builder = PromptBuilder::new(backend, text_model(), true);

        let err = builder.build("autumn forest").await.unwrap_err();
        assert!(matches!(err, Error::PromptEnhancement(_)));
    }
}
