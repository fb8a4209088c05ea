// config.rs — 配置管理模块
// 遵循 Unix 风格：从 ~/.config/fresh-wallpaper/config.toml 读取配置
// 生效顺序：命令行 > 环境变量 > 配置文件 > 默认值，启动时解析一次得到 Settings

use crate::backend::ModelRef;
use crate::backend::replicate::DEFAULT_BASE_URL;
use crate::cli::RunArgs;
use crate::error::{Error, Result};
use crate::generation::DEFAULT_INTERVAL_MS;
use crate::producer::{DEFAULT_IMAGE_MODEL, ImageOptions, RetryPolicy};
use crate::prompt::DEFAULT_TEXT_MODEL;
use crate::transcript;
use log::warn;
use schemars::JsonSchema; // 引入用于生成 JSON Schema 的 trait
use serde::{Deserialize, Serialize}; // 引入序列化与反序列化 trait
use shellexpand::tilde; // 用于展开 ~ 和环境变量
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 展开路径中的 ~ (支持格式: ~/path)
fn expand_path(path_str: &str) -> PathBuf {
    PathBuf::from(tilde(path_str).into_owned())
}

/// 配置文件里的路径：展开 ~，相对路径则相对于 $HOME
fn home_relative(path_str: &str, home: &Path) -> PathBuf {
    let p = expand_path(path_str);
    if p.is_absolute() { p } else { home.join(p) }
}

/// 映射 config.toml 文件内容的嵌套结构体
#[derive(Debug, Deserialize, Serialize, Default, JsonSchema)]
struct ConfigFile {
    #[serde(default)]
    common: CommonConfig,
    #[serde(default)]
    models: ModelsConfig,
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default)]
    replicate: ReplicateConfig,
}

#[derive(Debug, Deserialize, Serialize, Default, JsonSchema)]
struct CommonConfig {
    /// 图片输出目录 (支持 ~，相对路径则相对于 $HOME)，默认 ~/fresh-wallpaper
    output_dir: Option<String>,
    /// 两次生成之间的间隔毫秒数，默认 1000
    interval_ms: Option<u64>,
    /// 是否默认开启提示词增强
    #[serde(default)]
    enhance_prompt: bool,
    /// 转录文件路径，默认 ~/.fresh-wallpaper/transcript.txt
    transcript: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Default, JsonSchema)]
struct ModelsConfig {
    /// 图片模型，owner/name 或 owner/name:version
    image: Option<String>,
    /// 改写提示词用的语言模型
    text: Option<String>,
    /// 输出格式提示（如 webp）
    output_format: Option<String>,
    /// 输出质量提示 (0-100)
    output_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Serialize, JsonSchema)]
struct RetryConfig {
    /// 内容安全拒绝后的最大重试次数
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    /// 首次重试前等待的毫秒数，之后每次翻倍
    #[serde(default = "default_backoff_ms")]
    backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    RetryPolicy::default().max_retries
}
fn default_backoff_ms() -> u64 {
    RetryPolicy::default().backoff.as_millis() as u64
}

#[derive(Debug, Deserialize, Serialize, Default, JsonSchema)]
struct ReplicateConfig {
    /// API Token（环境变量 REPLICATE_API_TOKEN 优先）
    api_token: Option<String>,
    /// API 基础 URL，默认 https://api.replicate.com/v1
    base_url: Option<String>,
}

/// 应用全局配置项
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Replicate API Token (优先级：ENV > TOML)
    pub api_token: Option<String>,
    /// 配置文件里写的 Token，保存时原样写回
    file_api_token: Option<String>,
    pub base_url: String,
    pub output_dir: PathBuf,
    pub interval_ms: u64,
    pub enhance_prompt: bool,
    pub transcript_path: PathBuf,
    pub image_model: String,
    pub text_model: String,
    pub output_format: Option<String>,
    pub output_quality: Option<u8>,
    pub max_retries: u32,
    pub backoff_ms: u64,
    /// 配置文件所在路径
    pub config_path: PathBuf,
}

impl AppConfig {
    /// 读取 $HOME 下的配置文件和环境变量
    pub fn new() -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let home = env::var("HOME").map_err(|_| "$HOME is not set")?;
        let home_path = PathBuf::from(&home);
        let config_path = home_path
            .join(".config")
            .join("fresh-wallpaper")
            .join("config.toml");

        let config_file = Self::load_config_from_file(&config_path).unwrap_or_default();
        let env_token = env::var("REPLICATE_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self::from_file(config_file, &home_path, config_path, env_token))
    }

    fn from_file(
        config_file: ConfigFile,
        home: &Path,
        config_path: PathBuf,
        env_token: Option<String>,
    ) -> Self {
        let ConfigFile {
            common,
            models,
            retry,
            replicate,
        } = config_file;

        Self {
            api_token: env_token.or_else(|| replicate.api_token.clone()),
            file_api_token: replicate.api_token,
            base_url: replicate
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            output_dir: common
                .output_dir
                .map(|dir| home_relative(&dir, home))
                .unwrap_or_else(|| home.join("fresh-wallpaper")),
            interval_ms: common.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS),
            enhance_prompt: common.enhance_prompt,
            transcript_path: common
                .transcript
                .map(|p| home_relative(&p, home))
                .unwrap_or_else(|| home.join(".fresh-wallpaper").join("transcript.txt")),
            image_model: models
                .image
                .unwrap_or_else(|| DEFAULT_IMAGE_MODEL.to_string()),
            text_model: models
                .text
                .unwrap_or_else(|| DEFAULT_TEXT_MODEL.to_string()),
            output_format: models.output_format,
            output_quality: models.output_quality,
            max_retries: retry.max_retries,
            backoff_ms: retry.backoff_ms,
            config_path,
        }
    }

    /// 辅助函数：解析 TOML 配置文件；文件不存在时返回 None，格式错误时警告后返回 None
    fn load_config_from_file(path: &Path) -> Option<ConfigFile> {
        let content = fs::read_to_string(path).ok()?;
        match toml::from_str(&content) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("ignoring invalid config {}: {}", path.display(), e);
                None
            }
        }
    }

    fn to_file(&self) -> ConfigFile {
        ConfigFile {
            common: CommonConfig {
                output_dir: Some(self.output_dir.to_string_lossy().to_string()),
                interval_ms: Some(self.interval_ms),
                enhance_prompt: self.enhance_prompt,
                transcript: Some(self.transcript_path.to_string_lossy().to_string()),
            },
            models: ModelsConfig {
                image: Some(self.image_model.clone()),
                text: Some(self.text_model.clone()),
                output_format: self.output_format.clone(),
                output_quality: self.output_quality,
            },
            retry: RetryConfig {
                max_retries: self.max_retries,
                backoff_ms: self.backoff_ms,
            },
            replicate: ReplicateConfig {
                api_token: self.file_api_token.clone(),
                base_url: Some(self.base_url.clone()),
            },
        }
    }

    /// 修改一项配置，键名与命令行参数一致
    pub fn set(&mut self, key: &str, value: &str) -> std::result::Result<(), String> {
        match key {
            "output" | "output-dir" => self.output_dir = expand_path(value),
            "interval" => {
                self.interval_ms = value
                    .parse()
                    .map_err(|_| format!("invalid interval '{value}'"))?
            }
            "enhance-prompt" => {
                self.enhance_prompt = value
                    .parse()
                    .map_err(|_| format!("expected true or false, got '{value}'"))?
            }
            "image-model" => {
                ModelRef::parse(value)
                    .ok_or_else(|| Error::InvalidModel(value.to_string()).to_string())?;
                self.image_model = value.to_string();
            }
            "text-model" => {
                ModelRef::parse(value)
                    .ok_or_else(|| Error::InvalidModel(value.to_string()).to_string())?;
                self.text_model = value.to_string();
            }
            _ => return Err(format!("unknown key '{key}'")),
        }
        Ok(())
    }

    /// 将配置保存回文件；环境变量里的 Token 不会写进文件
    pub fn save(&self) -> std::io::Result<()> {
        let config_file = self.to_file();
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(&config_file).map_err(std::io::Error::other)?;
        fs::write(&self.config_path, toml_str)
    }

    /// 获取配置文件的 JSON Schema
    pub fn get_schema() -> String {
        let schema = schemars::schema_for!(ConfigFile);
        serde_json::to_string_pretty(&schema).unwrap_or_default()
    }

    /// 将当前配置转换为 TOML 字符串，Token 取生效值并打码
    pub fn to_toml(&self) -> String {
        let mut config_file = self.to_file();
        config_file.replicate.api_token = self.api_token.as_deref().map(mask);
        toml::to_string_pretty(&config_file)
            .unwrap_or_else(|_| "# Error serializing config".to_string())
    }
}

/// 只保留 Token 的前 4 位
pub fn mask(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…")
}

/// 启动时解析一次的运行参数，之后按值传入生成循环
#[derive(Debug, Clone)]
pub struct Settings {
    pub theme: String,
    pub image_model: ModelRef,
    pub text_model: ModelRef,
    pub output_dir: PathBuf,
    pub interval: Duration,
    pub enhance_prompt: bool,
    pub image_options: ImageOptions,
    pub retry: RetryPolicy,
    pub once: bool,
}

impl Settings {
    /// 合并命令行参数与配置。没有主题时返回 `Error::MissingTheme`
    pub fn resolve(config: &AppConfig, args: &RunArgs) -> Result<Self> {
        let theme = match (&args.theme, &args.transcript) {
            (Some(theme), _) => Some(theme.clone()),
            (None, Some(path)) => {
                let path = path
                    .as_deref()
                    .map(expand_path)
                    .unwrap_or_else(|| config.transcript_path.clone());
                transcript::theme_from_transcript(&path)?
            }
            (None, None) => None,
        };
        let theme = theme
            .filter(|t| !t.trim().is_empty())
            .ok_or(Error::MissingTheme)?;

        let image_model = args.image_model.as_deref().unwrap_or(&config.image_model);
        let text_model = args.text_model.as_deref().unwrap_or(&config.text_model);

        Ok(Self {
            theme,
            image_model: parse_model(image_model)?,
            text_model: parse_model(text_model)?,
            output_dir: args
                .output
                .as_deref()
                .map(expand_path)
                .unwrap_or_else(|| config.output_dir.clone()),
            interval: Duration::from_millis(args.interval.unwrap_or(config.interval_ms)),
            enhance_prompt: !args.no_enhance_prompt
                && (args.enhance_prompt || config.enhance_prompt),
            image_options: ImageOptions {
                output_format: args
                    .output_format
                    .clone()
                    .or_else(|| config.output_format.clone()),
                output_quality: args.output_quality.or(config.output_quality),
            },
            retry: RetryPolicy {
                max_retries: args.max_retries.unwrap_or(config.max_retries),
                backoff: Duration::from_millis(config.backoff_ms),
            },
            once: args.once,
        })
    }
}

fn parse_model(s: &str) -> Result<ModelRef> {
    ModelRef::parse(s).ok_or_else(|| Error::InvalidModel(s.to_string()))
}
