// 该文件是 Quanjing （全景） 项目的一部分。
// src/stitcher/features.rs - 多尺度 FAST 角点与旋转 BRIEF 描述子
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

use image::GrayImage;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const DESCRIPTOR_BYTES: usize = 32;
const DESCRIPTOR_BITS: usize = DESCRIPTOR_BYTES * 8;

// 采样模板必须在整个进程内固定，否则两幅图像的描述子无法比较
const PATTERN_SEED: u64 = 0x5144_4a31;

// Bresenham 半径 3 圆周上的 12 个采样点
const FAST_CIRCLE: [(i32, i32); 12] = [
  (-3, 0),
  (-2, 1),
  (-1, 2),
  (0, 3),
  (1, 2),
  (2, 1),
  (3, 0),
  (2, -1),
  (1, -2),
  (0, -3),
  (-1, -2),
  (-2, -1),
];
const FAST_MIN_VOTES: u32 = 9;

#[derive(Debug, Clone, Copy)]
pub struct KeyPoint {
  pub x: f64,
  pub y: f64,
  pub response: f64,
  pub angle: f64,
}

#[derive(Debug, Clone)]
pub struct Descriptor {
  pub point: KeyPoint,
  bits: [u8; DESCRIPTOR_BYTES],
}

impl Descriptor {
  pub fn hamming_distance(&self, other: &Descriptor) -> u32 {
    self
      .bits
      .iter()
      .zip(other.bits.iter())
      .map(|(a, b)| (a ^ b).count_ones())
      .sum()
  }
}

/// 尺度/旋转不变的局部特征提取器。
///
/// 金字塔各层跑 FAST 检测，关键点映射回原始分辨率后用灰度质心
/// 求方向，再按方向旋转 BRIEF 采样模板计算 256 位描述子。
pub struct FeatureExtractor {
  max_features: usize,
  n_levels: usize,
  scale_factor: f32,
  fast_threshold: u8,
  patch_size: i32,
  pattern: Vec<(f32, f32, f32, f32)>,
}

impl Default for FeatureExtractor {
  fn default() -> Self {
    Self::new(1000)
  }
}

impl FeatureExtractor {
  pub fn new(max_features: usize) -> Self {
    Self {
      max_features,
      n_levels: 4,
      scale_factor: 1.2,
      fast_threshold: 20,
      patch_size: 31,
      pattern: generate_brief_pattern(31, PATTERN_SEED),
    }
  }

  pub fn with_fast_threshold(mut self, threshold: u8) -> Self {
    self.fast_threshold = threshold;
    self
  }

  /// 检测关键点并计算描述子；无纹理图像得到空结果而非错误
  pub fn detect_and_describe(&self, image: &GrayImage) -> Vec<Descriptor> {
    let keypoints = self.detect(image);
    let mut descriptors = Vec::with_capacity(keypoints.len());
    for mut point in keypoints {
      point.angle = intensity_centroid_angle(image, &point, self.patch_size);
      if let Some(bits) = self.describe(image, &point) {
        descriptors.push(Descriptor { point, bits });
      }
    }
    descriptors
  }

  fn detect(&self, image: &GrayImage) -> Vec<KeyPoint> {
    let mut all = Vec::new();
    let mut scale = 1.0f32;

    for level in 0..self.n_levels {
      let scaled;
      let current = if level == 0 {
        image
      } else {
        let new_w = (image.width() as f32 / scale) as u32;
        let new_h = (image.height() as f32 / scale) as u32;
        if new_w < 32 || new_h < 32 {
          break;
        }
        scaled = image::imageops::resize(
          image,
          new_w,
          new_h,
          image::imageops::FilterType::Triangle,
        );
        &scaled
      };

      for kp in fast_detect(current, self.fast_threshold) {
        // 缩小后的坐标放大回原始分辨率
        all.push(KeyPoint {
          x: kp.x * scale as f64,
          y: kp.y * scale as f64,
          response: kp.response,
          angle: 0.0,
        });
      }

      scale *= self.scale_factor;
    }

    all.sort_by(|a, b| {
      b.response
        .partial_cmp(&a.response)
        .unwrap_or(std::cmp::Ordering::Equal)
    });
    all.truncate(self.max_features);
    all
  }

  fn describe(&self, image: &GrayImage, point: &KeyPoint) -> Option<[u8; DESCRIPTOR_BYTES]> {
    let width = image.width() as i32;
    let height = image.height() as i32;
    let cx = point.x as i32;
    let cy = point.y as i32;

    // 旋转后的采样点仍需落在图像内，留出 patch 对角线的余量
    let margin = (self.patch_size as f32 * 0.75) as i32;
    if cx < margin || cx >= width - margin || cy < margin || cy >= height - margin {
      return None;
    }

    let (sin_a, cos_a) = (point.angle.sin() as f32, point.angle.cos() as f32);
    let mut bits = [0u8; DESCRIPTOR_BYTES];

    for (i, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
      let rx1 = cos_a * x1 - sin_a * y1;
      let ry1 = sin_a * x1 + cos_a * y1;
      let rx2 = cos_a * x2 - sin_a * y2;
      let ry2 = sin_a * x2 + cos_a * y2;

      let a = sample_clamped(image, cx + rx1 as i32, cy + ry1 as i32);
      let b = sample_clamped(image, cx + rx2 as i32, cy + ry2 as i32);

      if a < b {
        bits[i / 8] |= 1 << (7 - (i % 8));
      }
    }

    Some(bits)
  }
}

/// 12 点圆周测试：至少 9 个采样点一致地亮于或暗于中心。
/// 响应值取超过阈值部分的绝对差之和，便于后续按强度排序。
fn fast_detect(image: &GrayImage, threshold: u8) -> Vec<KeyPoint> {
  let width = image.width() as i32;
  let height = image.height() as i32;
  let mut keypoints = Vec::new();

  for y in 3..height - 3 {
    for x in 3..width - 3 {
      let center = image.get_pixel(x as u32, y as u32)[0];
      let upper = center.saturating_add(threshold);
      let lower = center.saturating_sub(threshold);

      let mut brighter = 0u32;
      let mut darker = 0u32;
      let mut strength = 0u32;

      for &(dx, dy) in &FAST_CIRCLE {
        let value = image.get_pixel((x + dx) as u32, (y + dy) as u32)[0];
        if value > upper {
          brighter += 1;
          strength += (value - center) as u32;
        } else if value < lower {
          darker += 1;
          strength += (center - value) as u32;
        }
      }

      if brighter >= FAST_MIN_VOTES || darker >= FAST_MIN_VOTES {
        keypoints.push(KeyPoint {
          x: x as f64,
          y: y as f64,
          response: strength as f64,
          angle: 0.0,
        });
      }
    }
  }

  keypoints
}

/// 灰度质心方向（ORB 的 intensity centroid）
fn intensity_centroid_angle(image: &GrayImage, point: &KeyPoint, patch_size: i32) -> f64 {
  let half = patch_size / 2;
  let cx = point.x as i32;
  let cy = point.y as i32;

  let mut m01 = 0.0f64;
  let mut m10 = 0.0f64;

  for dy in -half..=half {
    for dx in -half..=half {
      let px = cx + dx;
      let py = cy + dy;
      if px >= 0 && px < image.width() as i32 && py >= 0 && py < image.height() as i32 {
        let intensity = image.get_pixel(px as u32, py as u32)[0] as f64;
        m01 += intensity * dy as f64;
        m10 += intensity * dx as f64;
      }
    }
  }

  m01.atan2(m10)
}

fn sample_clamped(image: &GrayImage, x: i32, y: i32) -> u8 {
  let px = x.clamp(0, image.width() as i32 - 1) as u32;
  let py = y.clamp(0, image.height() as i32 - 1) as u32;
  image.get_pixel(px, py)[0]
}

fn generate_brief_pattern(patch_size: i32, seed: u64) -> Vec<(f32, f32, f32, f32)> {
  let mut rng = StdRng::seed_from_u64(seed);
  let half = patch_size as f32 / 2.0;

  (0..DESCRIPTOR_BITS)
    .map(|_| {
      (
        rng.gen_range(-half..half),
        rng.gen_range(-half..half),
        rng.gen_range(-half..half),
        rng.gen_range(-half..half),
      )
    })
    .collect()
}
