// setter.rs — 系统壁纸设置模块

use log::{error, info};
use rust_i18n::t;
use std::path::Path;
use std::sync::Arc;

/// 把图片设置为桌面壁纸的能力
pub trait WallpaperSetter: Send + Sync {
    fn set(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>>;
}

/// 当前操作系统的壁纸设置器
pub struct SystemSetter;

impl WallpaperSetter for SystemSetter {
    #[cfg(target_os = "macos")]
    fn set(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let path_str = path.to_str().ok_or(t!("error_utf8"))?;

        // wallpaper 库在 macOS 上通过 osascript 对 every desktop 设置图片，
        // 即所有已连接的显示器
        wallpaper::set_from_path(path_str)
            .map_err(|e| format!("{}: {}", t!("error_set_failed"), e).into())
    }

    #[cfg(not(target_os = "macos"))]
    fn set(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        log::warn!("{}", t!("wallpaper_unsupported", path => path.display()));
        Ok(())
    }
}

/// 设置壁纸；失败只记录日志，不向上传播
pub struct WallpaperApplier {
    setter: Arc<dyn WallpaperSetter>,
}

impl WallpaperApplier {
    pub fn new(setter: Arc<dyn WallpaperSetter>) -> Self {
        Self { setter }
    }

    pub fn apply(&self, path: &Path) {
        info!("{}", t!("setting_wallpaper", path => path.display()));
        match self.setter.set(path) {
            Ok(()) => info!("{}", t!("set_done")),
            Err(e) => error!("{}", t!("error_wallpaper", reason => e)),
        }
    }
}
