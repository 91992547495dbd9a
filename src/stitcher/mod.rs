// 该文件是 Quanjing （全景） 项目的一部分。
// src/stitcher/mod.rs - 全景拼接
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

mod features;
mod homography;
mod matcher;
mod warp;

pub use features::FeatureExtractor;
pub use homography::RansacConfig;

use image::RgbImage;
use nalgebra::Matrix3;
use thiserror::Error;
use tracing::{debug, info, warn};

use self::features::Descriptor;
use self::matcher::match_descriptors;
use self::warp::Layer;

#[derive(Error, Debug)]
pub enum StitchError {
  #[error("没有可拼接的输入图像")]
  InsufficientInput,
  #[error("无法构建一致的全景图: {0}")]
  NoCoherentComposite(String),
}

// 两幅图之间的一条可信匹配边
struct MatchEdge {
  a: usize,
  b: usize,
  // 把 a 坐标系映射到 b 坐标系的单应
  homography: Matrix3<f64>,
  confidence: f32,
}

/// 全景拼接器。
///
/// 逐对估计单应并按匹配置信度筛边，再从置信度最高的图像出发
/// 贪心地把其余图像安放到公共平面上做羽化合成。置信度低于
/// 阈值的图像对视为不重叠，纹理贫乏的图像自然落选而不是报错。
pub struct Stitcher {
  confidence_threshold: f32,
  match_ratio: f32,
  min_matches: usize,
  extractor: FeatureExtractor,
  ransac: RansacConfig,
}

impl Default for Stitcher {
  fn default() -> Self {
    Self {
      confidence_threshold: 0.2,
      match_ratio: 0.75,
      min_matches: 8,
      extractor: FeatureExtractor::default(),
      ransac: RansacConfig::default(),
    }
  }
}

impl Stitcher {
  pub fn new() -> Self {
    Self::default()
  }

  /// 匹配置信度阈值，低于该值的图像对不参与合成
  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_extractor(mut self, extractor: FeatureExtractor) -> Self {
    self.extractor = extractor;
    self
  }

  /// 把一组图像拼接为一张全景图。
  ///
  /// 空集合报缺少输入；单幅图像原样返回，不经过任何特征处理；
  /// 多幅图像但没有任何一对达到置信度阈值时报无法合成，而不是
  /// 悄悄退回残缺结果。
  pub fn stitch(&self, images: &[RgbImage]) -> Result<RgbImage, StitchError> {
    match images.len() {
      0 => return Err(StitchError::InsufficientInput),
      1 => return Ok(images[0].clone()),
      _ => {}
    }

    let descriptors: Vec<Vec<Descriptor>> = images
      .iter()
      .map(|image| {
        let gray = image::imageops::grayscale(image);
        self.extractor.detect_and_describe(&gray)
      })
      .collect();
    for (index, set) in descriptors.iter().enumerate() {
      debug!("图像 {}: {} 个特征", index, set.len());
    }

    let edges = self.build_match_graph(&descriptors);
    if edges.is_empty() {
      return Err(StitchError::NoCoherentComposite(
        "没有任何图像对达到匹配置信度阈值".to_string(),
      ));
    }

    let placements = place_images(images.len(), &edges);
    let placed = placements.iter().filter(|p| p.is_some()).count();
    if placed < 2 {
      return Err(StitchError::NoCoherentComposite(
        "匹配图不连通，无法合成".to_string(),
      ));
    }
    for (index, placement) in placements.iter().enumerate() {
      if placement.is_none() {
        warn!("图像 {} 与其余图像缺乏可信重叠，不参与合成", index);
      }
    }

    let layers: Vec<Layer> = placements
      .iter()
      .enumerate()
      .filter_map(|(index, placement)| {
        placement.map(|homography| Layer {
          image: images[index].clone(),
          homography,
        })
      })
      .collect();

    let panorama = warp::composite(&layers)?;
    info!(
      "全景合成完成: {} / {} 幅图像, 画布 {}x{}",
      placed,
      images.len(),
      panorama.width(),
      panorama.height()
    );
    Ok(panorama)
  }

  // 逐对匹配并估计单应，保留置信度达标的边
  fn build_match_graph(&self, descriptors: &[Vec<Descriptor>]) -> Vec<MatchEdge> {
    let mut edges = Vec::new();

    for a in 0..descriptors.len() {
      for b in (a + 1)..descriptors.len() {
        if descriptors[a].len() < self.min_matches || descriptors[b].len() < self.min_matches {
          continue;
        }

        let matches = match_descriptors(&descriptors[a], &descriptors[b], self.match_ratio);
        if matches.len() < self.min_matches {
          debug!("图像对 ({a}, {b}): 匹配过少 ({})", matches.len());
          continue;
        }

        let src: Vec<(f64, f64)> = matches
          .iter()
          .map(|m| {
            let p = &descriptors[a][m.query_idx].point;
            (p.x, p.y)
          })
          .collect();
        let dst: Vec<(f64, f64)> = matches
          .iter()
          .map(|m| {
            let p = &descriptors[b][m.train_idx].point;
            (p.x, p.y)
          })
          .collect();

        let estimate = match homography::estimate_ransac(&src, &dst, &self.ransac) {
          Ok(estimate) => estimate,
          Err(err) => {
            debug!("图像对 ({a}, {b}): 单应估计失败: {err}");
            continue;
          }
        };

        let confidence = estimate.inliers as f32 / matches.len() as f32;
        debug!(
          "图像对 ({a}, {b}): {} 匹配, {} 内点, 置信度 {:.3}",
          matches.len(),
          estimate.inliers,
          confidence
        );
        if confidence < self.confidence_threshold {
          continue;
        }

        edges.push(MatchEdge {
          a,
          b,
          homography: estimate.homography,
          confidence,
        });
      }
    }

    edges
  }
}

// 以总置信度最高的图像为基准平面，按边置信度从高到低贪心安放其余图像
fn place_images(count: usize, edges: &[MatchEdge]) -> Vec<Option<Matrix3<f64>>> {
  let mut placements: Vec<Option<Matrix3<f64>>> = vec![None; count];

  let mut scores = vec![0.0f32; count];
  for edge in edges {
    scores[edge.a] += edge.confidence;
    scores[edge.b] += edge.confidence;
  }
  let seed = scores
    .iter()
    .enumerate()
    .max_by(|(_, x), (_, y)| x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal))
    .map(|(index, _)| index)
    .unwrap_or(0);
  placements[seed] = Some(Matrix3::identity());

  loop {
    let mut best: Option<(usize, Matrix3<f64>, f32)> = None;

    for edge in edges {
      let candidate = match (placements[edge.a], placements[edge.b]) {
        // 边的方向是 a→b；待安放侧的单应由已安放侧复合而来
        (Some(h_a), None) => edge
          .homography
          .try_inverse()
          .map(|inv_ab| (edge.b, h_a * inv_ab, edge.confidence)),
        (None, Some(h_b)) => Some((edge.a, h_b * edge.homography, edge.confidence)),
        _ => None,
      };

      if let Some((index, homography, confidence)) = candidate
        && best.map(|(_, _, c)| confidence > c).unwrap_or(true)
      {
        best = Some((index, homography, confidence));
      }
    }

    match best {
      Some((index, homography, _)) => placements[index] = Some(homography),
      None => break,
    }
  }

  placements
}
