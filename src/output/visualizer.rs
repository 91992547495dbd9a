// 该文件是 Quanjing （全景） 项目的一部分。
// src/output/visualizer.rs - 检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use tracing::warn;

use super::Detection;

// 固定调色板，按检测编号循环取色
const PALETTE: [[u8; 3]; 8] = [
  [255, 0, 0],
  [0, 255, 0],
  [0, 0, 255],
  [255, 255, 0],
  [255, 0, 255],
  [0, 255, 255],
  [128, 0, 0],
  [0, 128, 0],
];

const BORDER_THICKNESS: i32 = 3;
const LABEL_OFFSET: i32 = 20;
const FONT_SIZE: f32 = 16.0;

// 常见发行版的无衬线字体位置
const FONT_CANDIDATES: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
  "/usr/share/fonts/noto/NotoSans-Regular.ttf",
];

/// 可视化工具
pub struct Visualizer {
  font: Option<FontArc>,
  font_scale: PxScale,
  colors: Vec<Rgb<u8>>,
}

impl Default for Visualizer {
  fn default() -> Self {
    Self::new()
  }
}

impl Visualizer {
  /// 创建一个新的可视化工具。
  ///
  /// 字体从系统字体目录里找；找不到时框照画，只是省略文本标签。
  pub fn new() -> Self {
    let font = load_system_font();
    if font.is_none() {
      warn!("未找到可用字体，标注将省略文本标签");
    }

    Self {
      font,
      font_scale: PxScale::from(FONT_SIZE),
      colors: PALETTE.iter().map(|rgb| Rgb(*rgb)).collect(),
    }
  }

  /// 在图像上绘制检测框与标签
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      let color = self.colors[detection.id % self.colors.len()];

      // 响应里保留原始坐标，绘制时才截断到图像范围内
      let x0 = detection.bbox.x0.max(0);
      let y0 = detection.bbox.y0.max(0);
      let x1 = detection.bbox.x1.min(image.width() as i32 - 1);
      let y1 = detection.bbox.y1.min(image.height() as i32 - 1);
      if x1 <= x0 || y1 <= y0 {
        continue;
      }

      // 向内收缩叠画出加粗边框
      for inset in 0..BORDER_THICKNESS {
        let width = x1 - x0 - 2 * inset;
        let height = y1 - y0 - 2 * inset;
        if width <= 0 || height <= 0 {
          break;
        }
        let rect = Rect::at(x0 + inset, y0 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, color);
      }

      if let Some(font) = &self.font {
        let mut label = detection.class_name.clone();
        if let Some(confidence) = detection.confidence {
          label.push_str(&format!(" ({confidence:.2})"));
        }
        let text_y = (y0 - LABEL_OFFSET).max(0);
        draw_text_mut(image, color, x0, text_y, self.font_scale, font, &label);
      }
    }
  }
}

fn load_system_font() -> Option<FontArc> {
  for path in FONT_CANDIDATES {
    if let Ok(data) = std::fs::read(path)
      && let Ok(font) = FontArc::try_from_vec(data)
    {
      return Some(font);
    }
  }
  None
}
