// main.rs — 程序入口
// 负责初始化日志与多语言、解析命令行参数、组装生成循环

mod backend; // Replicate 客户端与推理后端 Trait
mod cli;
mod config;
mod error;
mod generation;
mod prediction;
mod producer;
mod prompt;
mod provenance;
mod setter;
#[cfg(test)]
mod testing;
mod transcript;

// 初始化多语言支持，嵌入 locales 目录下的所有翻译
rust_i18n::i18n!("locales");

use backend::replicate::ReplicateClient;
use clap::{CommandFactory, Parser}; // CommandFactory 用于生成补全脚本和用法说明
use clap_complete::generate;
use cli::{Cli, Commands, ConfigAction, RunArgs};
use config::{AppConfig, Settings};
use error::Error;
use generation::GenerationLoop;
use log::{info, warn};
use producer::ImageProducer;
use prompt::PromptBuilder;
use rust_i18n::t;
use setter::{SystemSetter, WallpaperApplier};
use std::sync::Arc;
use tokio::sync::watch;

/// 缺少主题时的退出码
const USAGE_EXIT_CODE: i32 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 自动检测系统语言并设置
    let locale = std::env::var("LANG").unwrap_or_else(|_| "en".to_string());
    if locale.starts_with("zh") {
        rust_i18n::set_locale("zh-CN");
    } else {
        rust_i18n::set_locale("en");
    }

    // 当前目录下的 .env，不覆盖已有的环境变量；先于日志初始化，RUST_LOG 也可以写在里面
    dotenvy::dotenv().ok();

    // 未设置 RUST_LOG 时默认 info
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    pretty_env_logger::formatted_builder()
        .parse_filters(&filters)
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::new()?;

    match cli.command {
        Some(Commands::Completions { shell }) => {
            generate(
                shell,
                &mut Cli::command(),
                "fresh-wallpaper",
                &mut std::io::stdout(),
            );
        }
        Some(Commands::Config { action }) => {
            handle_config(&mut config, &action)?;
        }
        None => {
            handle_run(&config, &cli.run).await?;
        }
    }

    Ok(())
}

/// 打印用法后退出，不发起任何网络请求
fn usage() -> ! {
    eprintln!("{}", t!("error_missing_theme"));
    eprintln!("{}", Cli::command().render_help());
    std::process::exit(USAGE_EXIT_CODE);
}

/// 无子命令：解析一次设置，然后进入生成循环
async fn handle_run(config: &AppConfig, args: &RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = match Settings::resolve(config, args) {
        Ok(settings) => settings,
        Err(Error::MissingTheme) => usage(),
        Err(e) => return Err(e.into()),
    };

    // 确保输出目录存在
    std::fs::create_dir_all(&settings.output_dir)?;

    let token = config.api_token.clone().ok_or(Error::MissingToken)?;
    let backend = Arc::new(ReplicateClient::new(token, config.base_url.as_str())?);

    info!("{}", t!("theme", theme => settings.theme));
    info!("{}", t!("output_dir", path => settings.output_dir.display()));

    let Settings {
        theme,
        image_model,
        text_model,
        output_dir,
        interval,
        enhance_prompt,
        image_options,
        retry,
        once,
    } = settings;

    let prompts = PromptBuilder::new(backend.clone(), text_model, enhance_prompt);
    let producer = ImageProducer::new(backend, image_model, image_options, retry, output_dir);
    let applier = WallpaperApplier::new(Arc::new(SystemSetter));
    let generation = GenerationLoop::new(theme, prompts, producer, applier, interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("{}", t!("shutdown_requested"));
                shutdown_tx.send_replace(true);
            }
            Err(e) => {
                warn!("{}", t!("error_signal", reason => e));
                // 保留发送端，循环不会因通道关闭而退出
                std::future::pending::<()>().await;
            }
        }
    });

    generation.run(shutdown_rx, once).await?;
    Ok(())
}

/// 处理 config 子命令：查看或修改配置
fn handle_config(
    config: &mut AppConfig,
    action: &ConfigAction,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Show => {
            println!("{}", t!("config_title"));
            println!("{}", t!("config_path", path => config.config_path.display()));
            println!("{}", t!("config_output_dir", path => config.output_dir.display()));
            println!("{}", t!("config_interval", ms => config.interval_ms));
            println!("{}", t!("config_enhance", value => config.enhance_prompt));
            println!("{}", t!("config_image_model", model => config.image_model));
            println!("{}", t!("config_text_model", model => config.text_model));
            let token = config
                .api_token
                .as_deref()
                .map(config::mask)
                .unwrap_or_else(|| "None".to_string());
            println!("{}", t!("config_token", token => token));
        }
        ConfigAction::Schema => {
            println!("{}", AppConfig::get_schema());
        }
        ConfigAction::Dump => {
            println!("{}", config.to_toml());
        }
        ConfigAction::Set { key, value } => {
            config
                .set(key, value)
                .map_err(|reason| t!("config_error", reason => reason).to_string())?;
            config.save()?;
            println!("{}", t!("config_updated", key => key, value => value));
        }
    }
    Ok(())
}
