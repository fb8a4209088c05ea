// provenance.rs — 溯源记录模块
// 记录图片由谁、用哪个模型、以什么输入生成
// 记录以 JSON 写进 WebP 的 EXIF 块（ImageDescription 标签），另在旁边留一份同名 .json

use crate::backend::ModelRef;
use crate::error::Result;
use crate::prediction::Prediction;
use img_parts::ImageEXIF;
use img_parts::webp::WebP;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const PROVIDER: &str = "Replicate (https://replicate.com/)";

/// 一张生成图片的溯源记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    pub provider: String,
    pub model: String,
    pub input: Value,
    pub output: Value,
    /// 预测的其余字段，去掉了 input、output 和体积大的 logs
    pub meta: Map<String, Value>,
}

impl ProvenanceRecord {
    pub fn new(model: &ModelRef, prediction: &Prediction) -> Result<Self> {
        let mut meta = match serde_json::to_value(prediction)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for key in ["input", "output", "logs"] {
            meta.remove(key);
        }

        Ok(Self {
            provider: PROVIDER.to_string(),
            model: model.to_string(),
            input: prediction.input.clone(),
            output: prediction.output.clone().unwrap_or(Value::Null),
            meta,
        })
    }

    /// 把记录嵌入 WebP 图片，返回新的文件内容；已有的 EXIF 块会被替换
    pub fn embed(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        let json = serde_json::to_string(self)?;
        let mut webp = WebP::from_bytes(image.into())?;
        webp.set_exif(Some(exif_with_description(&json).into()));

        let mut out = Vec::new();
        webp.encoder().write_to(&mut out)?;
        Ok(out)
    }

    /// 从 WebP 图片中读出嵌入的记录；没有记录时返回 None
    pub fn read_embedded(image: &[u8]) -> Result<Option<Self>> {
        let webp = WebP::from_bytes(image.to_vec().into())?;
        let Some(exif) = webp.exif() else {
            return Ok(None);
        };
        match description_from_exif(&exif) {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// `<dir>/<id>.webp` 对应 `<dir>/<id>.json`
    pub fn sidecar_path(artifact: &Path) -> PathBuf {
        artifact.with_extension("json")
    }

    /// 写入溯源文件，返回其路径
    pub async fn write(&self, artifact: &Path) -> Result<PathBuf> {
        let path = Self::sidecar_path(artifact);
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        Ok(path)
    }
}

/// TIFF 标签 ImageDescription
const IMAGE_DESCRIPTION: u16 = 0x010E;
/// TIFF 字段类型 ASCII
const TYPE_ASCII: u16 = 2;
/// 头部 8 字节 + 条目数 2 字节 + 一个条目 12 字节 + 下一个 IFD 偏移 4 字节
const DATA_OFFSET: u32 = 26;

/// 只含一个 ImageDescription 条目的小端 TIFF 数据（WebP EXIF 块的内容）
fn exif_with_description(text: &str) -> Vec<u8> {
    let mut value = text.as_bytes().to_vec();
    value.push(0);
    // ASCII 值不超过 4 字节时会内联在条目里，这里补齐长度，始终走偏移
    while value.len() <= 4 {
        value.push(0);
    }

    let mut out = Vec::with_capacity(DATA_OFFSET as usize + value.len());
    out.extend_from_slice(b"II*\0");
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&IMAGE_DESCRIPTION.to_le_bytes());
    out.extend_from_slice(&TYPE_ASCII.to_le_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(&DATA_OFFSET.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&value);
    out
}

/// 读取小端 TIFF 第一个 IFD 中的 ImageDescription
fn description_from_exif(exif: &[u8]) -> Option<String> {
    if exif.get(0..4)? != b"II*\0" {
        return None;
    }
    let u16_at = |i: usize| exif.get(i..i + 2).map(|b| u16::from_le_bytes([b[0], b[1]]));
    let u32_at = |i: usize| {
        exif.get(i..i + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };

    let ifd = u32_at(4)? as usize;
    let count = u16_at(ifd)? as usize;
    for n in 0..count {
        let entry = ifd + 2 + n * 12;
        if u16_at(entry)? != IMAGE_DESCRIPTION {
            continue;
        }
        let len = u32_at(entry + 4)? as usize;
        let raw = if len <= 4 {
            exif.get(entry + 8..entry + 8 + len)?
        } else {
            let offset = u32_at(entry + 8)? as usize;
            exif.get(offset..offset + len)?
        };
        let text = raw.split(|&b| b == 0).next().unwrap_or(raw);
        return String::from_utf8(text.to_vec()).ok();
    }
    None
}
