// 该文件是 Quanjing （全景） 项目的一部分。
// src/workspace.rs - 请求级工作目录布局
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

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

const IMAGES_DIR: &str = "images";
const PANORAMA_DIR: &str = "panorama";
const DETECTIONS_DIR: &str = "detections";
const PANORAMA_FILE: &str = "panorama.jpg";
const DETECTION_FILE: &str = "detection.jpg";

/// 一次请求的工作目录。
///
/// 集合目录与产物路径都挂在同一个根目录下；并发请求各自持有
/// 不同的根目录即可互不干扰，核心内部不做任何加锁。
#[derive(Debug, Clone)]
pub struct Workspace {
  root: PathBuf,
}

impl Workspace {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// 待拼接图像集合目录
  pub fn images_dir(&self) -> PathBuf {
    self.root.join(IMAGES_DIR)
  }

  /// 全景图产物路径（每次请求覆盖写入）
  pub fn panorama_path(&self) -> PathBuf {
    self.root.join(PANORAMA_DIR).join(PANORAMA_FILE)
  }

  /// 标注图产物路径（每次请求覆盖写入）
  pub fn detection_path(&self) -> PathBuf {
    self.root.join(DETECTIONS_DIR).join(DETECTION_FILE)
  }

  /// 创建目录布局，可重复调用
  pub fn prepare(&self) -> io::Result<()> {
    std::fs::create_dir_all(self.images_dir())?;
    std::fs::create_dir_all(self.root.join(PANORAMA_DIR))?;
    std::fs::create_dir_all(self.root.join(DETECTIONS_DIR))?;
    Ok(())
  }

  /// 清空集合目录与全部产物。
  ///
  /// 幂等：目录不存在或已为空时同样成功。
  pub fn reset(&self) -> io::Result<()> {
    let images = self.images_dir();
    if images.is_dir() {
      for entry in std::fs::read_dir(&images)? {
        let path = entry?.path();
        if path.is_file() {
          std::fs::remove_file(&path)?;
        }
      }
    }
    remove_if_exists(&self.panorama_path())?;
    remove_if_exists(&self.detection_path())?;
    debug!("工作目录已清空: {}", self.root.display());
    Ok(())
  }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
  match std::fs::remove_file(path) {
    Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
    other => other,
  }
}
