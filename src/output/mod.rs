// 该文件是 Quanjing （全景） 项目的一部分。
// src/output/mod.rs - 检测结果归一化与响应结构
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

mod visualizer;

pub use visualizer::Visualizer;

use std::path::Path;

use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::model::RawPrediction;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像保存错误: {0}")]
  Image(#[from] image::ImageError),
}

/// 角点式边界框。
///
/// 由中心式几何换算: x0 = cx - w/2（整型截断），x1 = x0 + w，
/// 保证 x1-x0 恒等于原始宽度；奇数宽度时中心和最多偏 1。
#[derive(Debug, Clone, Serialize)]
pub struct BoundingBox {
  pub x0: i32,
  pub y0: i32,
  pub x1: i32,
  pub y1: i32,
  pub width: i32,
  pub height: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Detection {
  pub id: usize,
  pub bbox: BoundingBox,
  pub confidence: Option<f32>,
  #[serde(rename = "class")]
  pub class_name: String,
}

/// 稳定的响应结构；失败时另走 error_response，不混合两种负载
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
  pub success: bool,
  pub count: usize,
  pub detections: Vec<Detection>,
  pub image_path: Option<String>,
}

/// 把原始预测按输入顺序归一化为检测记录
pub fn normalize(predictions: &[RawPrediction]) -> Vec<Detection> {
  predictions
    .iter()
    .enumerate()
    .map(|(id, prediction)| Detection {
      id,
      bbox: corner_box(prediction),
      confidence: prediction.confidence,
      class_name: prediction
        .class_name
        .clone()
        .unwrap_or_else(|| format!("Object {}", id + 1)),
    })
    .collect()
}

fn corner_box(prediction: &RawPrediction) -> BoundingBox {
  let cx = prediction.x as i32;
  let cy = prediction.y as i32;
  let width = prediction.width as i32;
  let height = prediction.height as i32;
  let x0 = cx - width / 2;
  let y0 = cy - height / 2;

  BoundingBox {
    x0,
    y0,
    x1: x0 + width,
    y1: y0 + height,
    width,
    height,
  }
}

/// 归一化预测并按需写出标注图。
///
/// 仅当调用方给出保存路径且预测非空时才绘制并落盘；空预测列表
/// 是正常结果，返回 count 0 且不触碰既有产物。
pub fn normalize_and_annotate(
  panorama: &RgbImage,
  predictions: &[RawPrediction],
  save_to: Option<&Path>,
) -> Result<DetectionResult, OutputError> {
  let detections = normalize(predictions);

  let mut image_path = None;
  if let Some(path) = save_to
    && !detections.is_empty()
  {
    let mut annotated = panorama.clone();
    Visualizer::new().draw_detections(&mut annotated, &detections);

    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    annotated.save(path)?;
    info!("标注图像已保存: {}", path.display());
    image_path = Some(path.display().to_string());
  }

  Ok(DetectionResult {
    success: true,
    count: detections.len(),
    detections,
    image_path,
  })
}

/// 失败响应：只带 success 标志与错误消息，不携带任何检测数据
pub fn error_response(message: &str) -> serde_json::Value {
  serde_json::json!({
    "success": false,
    "error": message,
  })
}
