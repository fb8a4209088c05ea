// backend/mod.rs — 推理后端模块入口
pub mod replicate;

// 定义所有推理后端（目前只有 Replicate）必须实现的通用 Trait
// 生成循环只依赖这个 Trait，测试里用假的实现替换网络调用

use crate::error::Result;
use crate::prediction::Prediction;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

/// 模型引用：`owner/name` 或 `owner/name:version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub owner: String,
    pub name: String,
    /// 指定版本时走 /v1/predictions，否则走官方模型接口
    pub version: Option<String>,
}

impl ModelRef {
    /// 解析模型字符串，格式不合法时返回 None
    pub fn parse(s: &str) -> Option<Self> {
        let (path, version) = match s.split_once(':') {
            Some((path, version)) if !version.is_empty() => (path, Some(version.to_string())),
            Some(_) => return None,
            None => (s, None),
        };
        let (owner, name) = path.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.to_string(),
            version,
        })
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)?;
        if let Some(version) = &self.version {
            write!(f, ":{}", version)?;
        }
        Ok(())
    }
}

/// 推理后端的抽象 Trait
///
/// `run` 创建一次预测并等待它结束：成功时返回最终的预测记录，
/// 失败时返回已分类的错误（内容安全拒绝为 `Error::ContentPolicy`）。
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// 运行模型直到预测结束
    async fn run(&self, model: &ModelRef, input: Value) -> Result<Prediction>;

    /// 下载输出文件的原始字节
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_official_model() {
        let m = ModelRef::parse("black-forest-labs/flux-schnell").unwrap();
        assert_eq!(m.owner, "black-forest-labs");
        assert_eq!(m.name, "flux-schnell");
        assert_eq!(m.version, None);
        assert_eq!(m.to_string(), "black-forest-labs/flux-schnell");
    }

    #[test]
    fn parses_versioned_model() {
        let s = "zeke/ziki-flux:dadc276a9062240e68f110ca06521752f334777a94f031feb0ae78ae3edca58e";
        let m = ModelRef::parse(s).unwrap();
        assert_eq!(m.owner, "zeke");
        assert_eq!(m.name, "ziki-flux");
        assert_eq!(
            m.version.as_deref(),
            Some("dadc276a9062240e68f110ca06521752f334777a94f031feb0ae78ae3edca58e")
        );
        assert_eq!(m.to_string(), s);
    }

    #[test]
    fn rejects_malformed_refs() {
        assert_eq!(ModelRef::parse("flux-schnell"), None);
        assert_eq!(ModelRef::parse("/flux"), None);
        assert_eq!(ModelRef::parse("a/b/c"), None);
        assert_eq!(ModelRef::parse("a/b:"), None);
    }
}
