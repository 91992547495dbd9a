// 该文件是 Quanjing （全景） 项目的一部分。
// src/task.rs - 全景检测流水线任务
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

use std::time::Instant;

use thiserror::Error;
use tracing::info;

use crate::input::{self, InputError};
use crate::model::{Model, ModelError};
use crate::output::{self, DetectionResult, OutputError};
use crate::stitcher::{StitchError, Stitcher};
use crate::workspace::Workspace;

/// 流水线错误：各阶段的类型化失败原样上抛，
/// 绝不把失败降级成"零检测"的成功响应
#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("拼接错误: {0}")]
  Stitch(#[from] StitchError),
  #[error("推理错误: {0}")]
  Model(#[from] ModelError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 单次请求的完整流水线: 集合 → 拼接 → 推理 → 归一化/标注。
///
/// 同步执行到底，要么完整成功要么带类型失败返回，中途不可取消。
pub struct DetectPanoramaTask {
  save_annotated: bool,
}

impl Default for DetectPanoramaTask {
  fn default() -> Self {
    Self::new()
  }
}

impl DetectPanoramaTask {
  pub fn new() -> Self {
    Self {
      save_annotated: true,
    }
  }

  /// 是否把标注图写入工作目录
  pub fn with_save_annotated(mut self, save: bool) -> Self {
    self.save_annotated = save;
    self
  }

  pub fn run<M: Model>(
    &self,
    workspace: &Workspace,
    stitcher: &Stitcher,
    model: &M,
  ) -> Result<DetectionResult, TaskError> {
    workspace.prepare()?;
    info!("开始全景检测任务: {}", workspace.root().display());

    let now = Instant::now();
    let collection = input::load_collection(&workspace.images_dir())?;
    info!(
      "集合加载完成: {} 张图像, 耗时 {:.2?}",
      collection.len(),
      now.elapsed()
    );

    let now = Instant::now();
    let panorama = stitcher.stitch(&collection)?;
    info!(
      "全景拼接完成: {}x{}, 耗时 {:.2?}",
      panorama.width(),
      panorama.height(),
      now.elapsed()
    );

    let panorama_path = workspace.panorama_path();
    panorama.save(&panorama_path).map_err(OutputError::from)?;
    info!("全景图像已保存: {}", panorama_path.display());

    let now = Instant::now();
    let predictions = model.infer(&panorama)?;
    info!(
      "推理完成: {} 条原始预测, 耗时 {:.2?}",
      predictions.len(),
      now.elapsed()
    );

    let save_to = self.save_annotated.then(|| workspace.detection_path());
    let result = output::normalize_and_annotate(&panorama, &predictions, save_to.as_deref())?;
    info!("任务完成: 共 {} 个目标", result.count);

    Ok(result)
  }
}
