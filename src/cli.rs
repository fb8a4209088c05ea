// cli.rs — 命令行接口定义模块
// 使用 clap 的 derive 模式定义参数；不带子命令时直接进入生成循环

use clap::{Args, Parser, Subcommand}; // Args: 可复用的参数组; Subcommand: 定义子命令的 trait
use clap_complete::Shell; // Shell 枚举：Bash, Zsh, Fish, Elvish, PowerShell

const EXAMPLES: &str = "\
Examples:
  Basic usage:
    fresh-wallpaper \"bananas dressed up like cowboys\"

  Using prompt enhancement:
    fresh-wallpaper \"bananas dressed up like cowboys\" --enhance-prompt

  Using a different image model:
    fresh-wallpaper \"ZIKI the man dressed up like a cowboy\" --image-model \"zeke/ziki-flux:dadc276a9062240e68f110ca06521752f334777a94f031feb0ae78ae3edca58e\"

  Custom output directory:
    fresh-wallpaper \"bananas dressed up like cowboys\" --output \"cowboy-bananas\"

  Generate images every 5 seconds:
    fresh-wallpaper \"bananas dressed up like cowboys\" --interval 5000

  Take the theme from the end of a transcript:
    fresh-wallpaper --transcript ~/notes/meeting.txt --enhance-prompt";

/// 不停地用 AI 生成新壁纸
///
/// 根据主题调用 Replicate 上的图片模型出图，下载到本地、写入溯源记录，
/// 并设为桌面壁纸，然后等待一段时间再来一张。
#[derive(Parser, Debug)]
#[command(name = "fresh-wallpaper")]
#[command(version)] // 自动从 Cargo.toml 读取 version 字段
#[command(author)]
#[command(about = "Generate a fresh AI wallpaper from a theme, on a loop")]
#[command(after_help = EXAMPLES)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// 生成循环的参数，未给出的项回落到配置文件和默认值
#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// 图片主题（如 "bananas dressed up like cowboys"）
    pub theme: Option<String>,

    /// 图片模型 (default: black-forest-labs/flux-schnell)
    #[arg(long, value_name = "MODEL")]
    pub image_model: Option<String>,

    /// 改写提示词用的语言模型 (default: meta/meta-llama-3.1-405b-instruct)
    #[arg(long, value_name = "MODEL")]
    pub text_model: Option<String>,

    /// 图片输出目录 (default: ~/fresh-wallpaper)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<String>,

    /// 两次生成之间的间隔毫秒数 (default: 1000)
    #[arg(short, long, value_name = "MS")]
    pub interval: Option<u64>,

    /// 用语言模型改写主题后再出图
    #[arg(long, overrides_with = "no_enhance_prompt")]
    pub enhance_prompt: bool,

    /// 不改写主题，覆盖配置文件里的 enhance_prompt
    #[arg(long, overrides_with = "enhance_prompt")]
    pub no_enhance_prompt: bool,

    /// 输出格式提示（如 webp）
    #[arg(long, value_name = "FORMAT")]
    pub output_format: Option<String>,

    /// 输出质量提示 (0-100)
    #[arg(long, value_name = "Q", value_parser = clap::value_parser!(u8).range(0..=100))]
    pub output_quality: Option<u8>,

    /// 内容安全拒绝后的最大重试次数 (default: 3)
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// 未给出主题时，取转录文件最后三行作为主题
    /// (default path: ~/.fresh-wallpaper/transcript.txt)
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    pub transcript: Option<Option<String>>,

    /// 只生成一张就退出
    #[arg(long)]
    pub once: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 生成 shell 补全脚本（支持 bash, zsh, fish, elvish, powershell）
    ///
    /// 用法示例：
    ///   fresh-wallpaper completions zsh > ~/.zsh/completions/_fresh-wallpaper
    Completions {
        /// 目标 shell 类型
        shell: Shell,
    },

    /// 配置管理操作
    ///
    /// 用法示例:
    ///   fresh-wallpaper config show
    ///   fresh-wallpaper config set image-model black-forest-labs/flux-dev
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// 配置管理操作
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// 查看当前生效的配置
    Show,
    /// 生成配置文件对应的 JSON Schema
    Schema,
    /// 以 TOML 格式打印当前完整配置内容
    Dump,
    /// 设置配置项 (支持: output, interval, enhance-prompt, image-model, text-model)
    Set {
        key: String,
        value: String,
    },
}
