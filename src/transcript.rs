// transcript.rs — 从转录文件末尾读取主题

use std::fs;
use std::io;
use std::path::Path;

/// 取末尾几行作为主题
const TAIL_LINES: usize = 3;

/// 读取转录文件的最后三行非空内容，用空格拼成主题；文件为空时返回 None
pub fn theme_from_transcript(path: &Path) -> io::Result<Option<String>> {
    let content = fs::read_to_string(path)?;
    Ok(tail_theme(&content))
}

fn tail_theme(content: &str) -> Option<String> {
    let lines: Vec<&str> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if lines.is_empty() {
        return None;
    }

    let start = lines.len().saturating_sub(TAIL_LINES);
    Some(lines[start..].join(" "))
}
