// 该文件是 Quanjing （全景） 项目的一部分。
// src/stitcher/matcher.rs - 描述子暴力匹配与比值检验
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

use super::features::Descriptor;

#[derive(Debug, Clone, Copy)]
pub struct FeatureMatch {
  pub query_idx: usize,
  pub train_idx: usize,
  pub distance: u32,
}

/// 汉明距离暴力匹配加 Lowe 比值检验。
///
/// 每个 query 描述子取最近与次近邻：次近邻不够远说明该点
/// 落在重复纹理上，匹配歧义，整条丢弃。
pub fn match_descriptors(
  query: &[Descriptor],
  train: &[Descriptor],
  ratio: f32,
) -> Vec<FeatureMatch> {
  let mut matches = Vec::new();

  for (query_idx, q) in query.iter().enumerate() {
    let mut best: Option<(usize, u32)> = None;
    let mut second: Option<u32> = None;

    for (train_idx, t) in train.iter().enumerate() {
      let distance = q.hamming_distance(t);
      match best {
        None => best = Some((train_idx, distance)),
        Some((_, best_dist)) if distance < best_dist => {
          second = Some(best_dist);
          best = Some((train_idx, distance));
        }
        Some(_) => {
          if second.map(|s| distance < s).unwrap_or(true) {
            second = Some(distance);
          }
        }
      }
    }

    let Some((train_idx, distance)) = best else {
      continue;
    };

    if let Some(second) = second {
      // 次近邻距离为零意味着描述子完全重复，无法区分
      if second == 0 || distance as f32 > ratio * second as f32 {
        continue;
      }
    }

    matches.push(FeatureMatch {
      query_idx,
      train_idx,
      distance,
    });
  }

  matches
}
