// 该文件是 Quanjing （全景） 项目的一部分。
// src/stitcher/homography.rs - 归一化 DLT 与 RANSAC 单应估计
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

use nalgebra::{DMatrix, Matrix3, Vector3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HomographyError {
  #[error("对应点不足: 需要 {needed}, 实际 {got}")]
  TooFewPoints { needed: usize, got: usize },
  #[error("数值求解失败: {0}")]
  Numerical(String),
  #[error("内点不足: 需要 {needed}, 实际 {found}")]
  TooFewInliers { needed: usize, found: usize },
}

/// 用 3×3 单应变换投影一个二维点；齐次坐标退化时返回 NaN
pub fn project(h: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
  let p = h * Vector3::new(x, y, 1.0);
  if p[2].abs() < 1e-12 {
    return (f64::NAN, f64::NAN);
  }
  (p[0] / p[2], p[1] / p[2])
}

pub fn reprojection_error(h: &Matrix3<f64>, src: (f64, f64), dst: (f64, f64)) -> f64 {
  let (px, py) = project(h, src.0, src.1);
  let dx = px - dst.0;
  let dy = py - dst.1;
  (dx * dx + dy * dy).sqrt()
}

// Hartley 归一化：质心移到原点，平均距离缩放到 sqrt(2)
fn normalize_points(points: &[(f64, f64)]) -> (Matrix3<f64>, Vec<(f64, f64)>) {
  let n = points.len() as f64;
  let cx = points.iter().map(|p| p.0).sum::<f64>() / n;
  let cy = points.iter().map(|p| p.1).sum::<f64>() / n;

  let mean_dist = points
    .iter()
    .map(|p| ((p.0 - cx).powi(2) + (p.1 - cy).powi(2)).sqrt())
    .sum::<f64>()
    / n;

  let s = if mean_dist > 1e-12 {
    std::f64::consts::SQRT_2 / mean_dist
  } else {
    1.0
  };

  let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
  let normalized = points
    .iter()
    .map(|p| (s * (p.0 - cx), s * (p.1 - cy)))
    .collect();

  (t, normalized)
}

/// 归一化 DLT：由至少 4 组对应点估计 dst ≈ H · src 的单应矩阵。
///
/// 2n×9 方程组的解取 AᵀA 最小特征值对应的特征向量，避免
/// 瘦 SVD 在欠定情形下的维度问题。
pub fn estimate_dlt(
  src: &[(f64, f64)],
  dst: &[(f64, f64)],
) -> Result<Matrix3<f64>, HomographyError> {
  let n = src.len();
  if n < 4 || dst.len() < 4 {
    return Err(HomographyError::TooFewPoints {
      needed: 4,
      got: n.min(dst.len()),
    });
  }
  if src.len() != dst.len() {
    return Err(HomographyError::Numerical(
      "src 与 dst 数量不一致".to_string(),
    ));
  }

  let (t_src, src_n) = normalize_points(src);
  let (t_dst, dst_n) = normalize_points(dst);

  let mut a = DMatrix::zeros(2 * n, 9);
  for i in 0..n {
    let (sx, sy) = src_n[i];
    let (dx, dy) = dst_n[i];

    a[(2 * i, 0)] = sx;
    a[(2 * i, 1)] = sy;
    a[(2 * i, 2)] = 1.0;
    a[(2 * i, 6)] = -dx * sx;
    a[(2 * i, 7)] = -dx * sy;
    a[(2 * i, 8)] = -dx;

    a[(2 * i + 1, 3)] = sx;
    a[(2 * i + 1, 4)] = sy;
    a[(2 * i + 1, 5)] = 1.0;
    a[(2 * i + 1, 6)] = -dy * sx;
    a[(2 * i + 1, 7)] = -dy * sy;
    a[(2 * i + 1, 8)] = -dy;
  }

  let ata = a.transpose() * &a;
  let eigen = nalgebra::SymmetricEigen::new(ata);

  let mut min_idx = 0;
  let mut min_val = eigen.eigenvalues[0].abs();
  for i in 1..9 {
    let value = eigen.eigenvalues[i].abs();
    if value < min_val {
      min_val = value;
      min_idx = i;
    }
  }

  let h_norm = Matrix3::new(
    eigen.eigenvectors[(0, min_idx)],
    eigen.eigenvectors[(1, min_idx)],
    eigen.eigenvectors[(2, min_idx)],
    eigen.eigenvectors[(3, min_idx)],
    eigen.eigenvectors[(4, min_idx)],
    eigen.eigenvectors[(5, min_idx)],
    eigen.eigenvectors[(6, min_idx)],
    eigen.eigenvectors[(7, min_idx)],
    eigen.eigenvectors[(8, min_idx)],
  );

  // 去归一化: H = T_dst⁻¹ · H_norm · T_src
  let t_dst_inv = t_dst
    .try_inverse()
    .ok_or_else(|| HomographyError::Numerical("归一化矩阵不可逆".to_string()))?;
  let h = t_dst_inv * h_norm * t_src;

  let scale = h[(2, 2)];
  if scale.abs() < 1e-12 {
    Ok(h)
  } else {
    Ok(h / scale)
  }
}

#[derive(Debug, Clone)]
pub struct RansacConfig {
  pub max_iters: usize,
  /// 内点判定阈值（像素重投影误差）
  pub inlier_threshold: f64,
  pub min_inliers: usize,
  pub seed: u64,
}

impl Default for RansacConfig {
  fn default() -> Self {
    Self {
      max_iters: 2000,
      inlier_threshold: 3.0,
      min_inliers: 8,
      seed: 0,
    }
  }
}

#[derive(Debug, Clone)]
pub struct RansacEstimate {
  pub homography: Matrix3<f64>,
  pub inliers: usize,
  pub mask: Vec<bool>,
}

/// RANSAC 抗外点单应拟合：随机 4 点采样，取内点最多的模型，
/// 最后用全部内点重新拟合一次。
pub fn estimate_ransac(
  src: &[(f64, f64)],
  dst: &[(f64, f64)],
  config: &RansacConfig,
) -> Result<RansacEstimate, HomographyError> {
  let n = src.len();
  if n < 4 {
    return Err(HomographyError::TooFewPoints { needed: 4, got: n });
  }

  let mut rng = StdRng::seed_from_u64(config.seed);
  let mut best_inliers = 0usize;
  let mut best_mask = vec![false; n];
  let mut best_h = Matrix3::identity();

  for _ in 0..config.max_iters {
    let indices = rand::seq::index::sample(&mut rng, n, 4);
    let sample_src: Vec<(f64, f64)> = indices.iter().map(|i| src[i]).collect();
    let sample_dst: Vec<(f64, f64)> = indices.iter().map(|i| dst[i]).collect();

    let Ok(h) = estimate_dlt(&sample_src, &sample_dst) else {
      continue;
    };

    let mut count = 0usize;
    let mut mask = vec![false; n];
    for i in 0..n {
      if reprojection_error(&h, src[i], dst[i]) < config.inlier_threshold {
        mask[i] = true;
        count += 1;
      }
    }

    if count > best_inliers {
      best_inliers = count;
      best_mask = mask;
      best_h = h;

      // 九成以上内点时继续迭代已无收益
      if count * 10 > n * 9 {
        break;
      }
    }
  }

  if best_inliers < config.min_inliers {
    return Err(HomographyError::TooFewInliers {
      needed: config.min_inliers,
      found: best_inliers,
    });
  }

  let inlier_src: Vec<(f64, f64)> = (0..n).filter(|&i| best_mask[i]).map(|i| src[i]).collect();
  let inlier_dst: Vec<(f64, f64)> = (0..n).filter(|&i| best_mask[i]).map(|i| dst[i]).collect();
  let refined = estimate_dlt(&inlier_src, &inlier_dst).unwrap_or(best_h);

  let mut mask = vec![false; n];
  let mut inliers = 0usize;
  for i in 0..n {
    if reprojection_error(&refined, src[i], dst[i]) < config.inlier_threshold {
      mask[i] = true;
      inliers += 1;
    }
  }

  Ok(RansacEstimate {
    homography: refined,
    inliers,
    mask,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::Rng;

  fn reference_homography() -> Matrix3<f64> {
    // 平移加缩放加轻微透视
    Matrix3::new(
      1.4, 0.05, 120.0, //
      -0.03, 1.5, 80.0, //
      1e-4, -5e-5, 1.0,
    )
  }

  #[test]
  fn dlt_recovers_exact_homography() {
    let h_true = reference_homography();
    let src = [(0.0, 0.0), (200.0, 0.0), (200.0, 150.0), (0.0, 150.0)];
    let dst: Vec<(f64, f64)> = src.iter().map(|s| project(&h_true, s.0, s.1)).collect();

    let h_est = estimate_dlt(&src, &dst).unwrap();

    for (s, d) in src.iter().zip(&dst) {
      assert!(reprojection_error(&h_est, *s, *d) < 1e-6);
    }
  }

  #[test]
  fn dlt_rejects_too_few_points() {
    let pts = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)];
    assert!(matches!(
      estimate_dlt(&pts, &pts),
      Err(HomographyError::TooFewPoints { .. })
    ));
  }

  #[test]
  fn ransac_survives_outliers() {
    let h_true = reference_homography();
    let mut rng = StdRng::seed_from_u64(42);

    let mut src = Vec::new();
    let mut dst = Vec::new();
    for i in 0..10 {
      for j in 0..10 {
        let s = (i as f64 * 25.0, j as f64 * 20.0);
        src.push(s);
        dst.push(project(&h_true, s.0, s.1));
      }
    }
    // 三成乱点
    for _ in 0..40 {
      src.push((rng.gen_range(0.0..250.0), rng.gen_range(0.0..200.0)));
      dst.push((rng.gen_range(0.0..900.0), rng.gen_range(0.0..700.0)));
    }

    let estimate = estimate_ransac(&src, &dst, &RansacConfig::default()).unwrap();

    assert!(estimate.inliers >= 100, "内点过少: {}", estimate.inliers);
    for (s, d) in src.iter().take(100).zip(dst.iter()) {
      assert!(reprojection_error(&estimate.homography, *s, *d) < 1.0);
    }
  }

  #[test]
  fn ransac_fails_on_incoherent_correspondences() {
    let mut rng = StdRng::seed_from_u64(7);
    let src: Vec<(f64, f64)> = (0..30)
      .map(|_| (rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)))
      .collect();
    let dst: Vec<(f64, f64)> = (0..30)
      .map(|_| (rng.gen_range(0.0..100.0), rng.gen_range(0.0..100.0)))
      .collect();

    assert!(matches!(
      estimate_ransac(&src, &dst, &RansacConfig::default()),
      Err(HomographyError::TooFewInliers { .. })
    ));
  }
}
