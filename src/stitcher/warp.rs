// 该文件是 Quanjing （全景） 项目的一部分。
// src/stitcher/warp.rs - 透视反向映射与羽化融合
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

use image::{Rgb, RgbImage};
use nalgebra::Matrix3;

use super::StitchError;
use super::homography::project;

// 画布边长上限，超出即视为单应退化
const MAX_CANVAS_DIM: i64 = 16_384;

/// 一层待合成图像及其到公共平面的单应变换
pub(crate) struct Layer {
  pub image: RgbImage,
  pub homography: Matrix3<f64>,
}

/// 把所有层合成到一张公共平面画布上。
///
/// 反向映射：对画布上每个像素求逆变换回源图坐标做双线性采样；
/// 多层重叠处按到源图边界的距离加权平均，避免出现生硬接缝。
pub(crate) fn composite(layers: &[Layer]) -> Result<RgbImage, StitchError> {
  let mut min_x = f64::INFINITY;
  let mut min_y = f64::INFINITY;
  let mut max_x = f64::NEG_INFINITY;
  let mut max_y = f64::NEG_INFINITY;

  for layer in layers {
    for (cx, cy) in corners(&layer.image) {
      let (px, py) = project(&layer.homography, cx, cy);
      if !px.is_finite() || !py.is_finite() {
        return Err(StitchError::NoCoherentComposite(
          "单应变换退化，角点投影发散".to_string(),
        ));
      }
      min_x = min_x.min(px);
      min_y = min_y.min(py);
      max_x = max_x.max(px);
      max_y = max_y.max(py);
    }
  }

  let width = (max_x - min_x).ceil() as i64 + 1;
  let height = (max_y - min_y).ceil() as i64 + 1;
  if width < 1 || height < 1 || width > MAX_CANVAS_DIM || height > MAX_CANVAS_DIM {
    return Err(StitchError::NoCoherentComposite(format!(
      "合成画布尺寸异常: {width}x{height}"
    )));
  }
  let (width, height) = (width as u32, height as u32);

  let offset = Matrix3::new(1.0, 0.0, -min_x, 0.0, 1.0, -min_y, 0.0, 0.0, 1.0);
  let mut acc = vec![0.0f32; (width * height * 3) as usize];
  let mut weight_sum = vec![0.0f32; (width * height) as usize];

  for layer in layers {
    let full = offset * layer.homography;
    let inverse = full.try_inverse().ok_or_else(|| {
      StitchError::NoCoherentComposite("单应变换不可逆".to_string())
    })?;

    // 只扫描该层在画布上的包围盒
    let (x0, y0, x1, y1) = canvas_bounds(&layer.image, &full, width, height);

    for y in y0..=y1 {
      for x in x0..=x1 {
        let (sx, sy) = project(&inverse, x as f64, y as f64);
        if !sx.is_finite() || !sy.is_finite() {
          continue;
        }
        let Some(rgb) = sample_bilinear(&layer.image, sx as f32, sy as f32) else {
          continue;
        };

        let w = border_weight(&layer.image, sx as f32, sy as f32);
        let pixel = (y * width + x) as usize;
        acc[pixel * 3] += w * rgb[0];
        acc[pixel * 3 + 1] += w * rgb[1];
        acc[pixel * 3 + 2] += w * rgb[2];
        weight_sum[pixel] += w;
      }
    }
  }

  let mut output = RgbImage::new(width, height);
  for (pixel, value) in weight_sum.iter().enumerate() {
    if *value <= 0.0 {
      continue;
    }
    let x = (pixel as u32) % width;
    let y = (pixel as u32) / width;
    let channel = |c: usize| (acc[pixel * 3 + c] / value).round().clamp(0.0, 255.0) as u8;
    output.put_pixel(x, y, Rgb([channel(0), channel(1), channel(2)]));
  }

  Ok(output)
}

fn corners(image: &RgbImage) -> [(f64, f64); 4] {
  let w = (image.width() - 1) as f64;
  let h = (image.height() - 1) as f64;
  [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
}

fn canvas_bounds(
  image: &RgbImage,
  homography: &Matrix3<f64>,
  width: u32,
  height: u32,
) -> (u32, u32, u32, u32) {
  let mut min_x = f64::INFINITY;
  let mut min_y = f64::INFINITY;
  let mut max_x = f64::NEG_INFINITY;
  let mut max_y = f64::NEG_INFINITY;

  for (cx, cy) in corners(image) {
    let (px, py) = project(homography, cx, cy);
    min_x = min_x.min(px);
    min_y = min_y.min(py);
    max_x = max_x.max(px);
    max_y = max_y.max(py);
  }

  let x0 = min_x.floor().max(0.0) as u32;
  let y0 = min_y.floor().max(0.0) as u32;
  let x1 = (max_x.ceil() as i64).clamp(0, width as i64 - 1) as u32;
  let y1 = (max_y.ceil() as i64).clamp(0, height as i64 - 1) as u32;
  (x0, y0, x1, y1)
}

fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> Option<[f32; 3]> {
  let max_x = (image.width() - 1) as f32;
  let max_y = (image.height() - 1) as f32;
  if x < 0.0 || y < 0.0 || x > max_x || y > max_y {
    return None;
  }

  let x0 = x.floor() as u32;
  let y0 = y.floor() as u32;
  let x1 = (x0 + 1).min(image.width() - 1);
  let y1 = (y0 + 1).min(image.height() - 1);
  let fx = x - x0 as f32;
  let fy = y - y0 as f32;

  let p00 = image.get_pixel(x0, y0);
  let p10 = image.get_pixel(x1, y0);
  let p01 = image.get_pixel(x0, y1);
  let p11 = image.get_pixel(x1, y1);

  let mut rgb = [0.0f32; 3];
  for (c, value) in rgb.iter_mut().enumerate() {
    let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
    let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
    *value = top * (1.0 - fy) + bottom * fy;
  }
  Some(rgb)
}

// 羽化权重：离源图边界越近权重越低，重叠区两侧平滑过渡
fn border_weight(image: &RgbImage, x: f32, y: f32) -> f32 {
  let dx = x.min(image.width() as f32 - 1.0 - x);
  let dy = y.min(image.height() as f32 - 1.0 - y);
  dx.min(dy).max(0.0) + 1.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
      Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    })
  }

  #[test]
  fn identity_layer_reproduces_image() {
    let image = gradient_image(40, 30);
    let layers = [Layer {
      image: image.clone(),
      homography: Matrix3::identity(),
    }];

    let output = composite(&layers).unwrap();

    assert_eq!(output.dimensions(), image.dimensions());
    for (x, y, pixel) in image.enumerate_pixels() {
      assert_eq!(output.get_pixel(x, y), pixel);
    }
  }

  #[test]
  fn translated_layers_extend_canvas() {
    let image = gradient_image(40, 30);
    let shift = Matrix3::new(1.0, 0.0, 20.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
    let layers = [
      Layer {
        image: image.clone(),
        homography: Matrix3::identity(),
      },
      Layer {
        image: image.clone(),
        homography: shift,
      },
    ];

    let output = composite(&layers).unwrap();

    assert_eq!(output.dimensions(), (60, 30));
  }

  #[test]
  fn degenerate_homography_is_rejected() {
    let image = gradient_image(16, 16);
    let layers = [Layer {
      image,
      homography: Matrix3::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0),
    }];

    assert!(matches!(
      composite(&layers),
      Err(StitchError::NoCoherentComposite(_))
    ));
  }
}
