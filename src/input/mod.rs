// 该文件是 Quanjing （全景） 项目的一部分。
// src/input/mod.rs - 图像摄取与集合加载
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Decode(#[from] image::ImageError),
}

const COLLECTION_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// 把一段上传的原始字节解码后写入集合目录。
///
/// 字节不是合法图像时返回解码错误，不会把无效数据落盘。
/// 文件名带毫秒级时间戳，同一秒内的多次上传不会互相覆盖。
pub fn save_upload(bytes: &[u8], dir: &Path) -> Result<PathBuf, InputError> {
  let image = image::load_from_memory(bytes)?.to_rgb8();
  debug!("接收图像: {}x{}", image.width(), image.height());

  std::fs::create_dir_all(dir)?;
  let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S%3f");
  let path = dir.join(format!("upload_{timestamp}.jpg"));
  image.save(&path)?;
  debug!("图像已写入集合目录: {}", path.display());

  Ok(path)
}

/// 加载集合目录中的全部图像。
///
/// 目录列举顺序不可靠，这里按文件名排序求一个确定顺序；
/// 拼接器本身不依赖任何输入顺序。单个损坏的文件跳过并告警，
/// 不中断整批加载。
pub fn load_collection(dir: &Path) -> Result<Vec<RgbImage>, InputError> {
  let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
    .filter_map(|entry| entry.ok())
    .map(|entry| entry.path())
    .filter(|path| has_collection_extension(path))
    .collect();
  paths.sort();

  let mut images = Vec::with_capacity(paths.len());
  for path in &paths {
    match load_image(path) {
      Ok(image) => images.push(image),
      Err(err) => warn!("跳过无法读取的图像 {}: {}", path.display(), err),
    }
  }
  debug!("集合加载完成: {} / {} 个文件", images.len(), paths.len());

  Ok(images)
}

fn load_image(path: &Path) -> Result<RgbImage, InputError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}

fn has_collection_extension(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let lower = ext.to_ascii_lowercase();
      COLLECTION_EXTENSIONS.contains(&lower.as_str())
    })
    .unwrap_or(false)
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{Rgb, RgbImage};

  fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    image
      .write_to(&mut buffer, image::ImageFormat::Png)
      .unwrap();
    buffer.into_inner()
  }

  #[test]
  fn save_upload_decodes_and_persists() {
    let dir = tempfile::tempdir().unwrap();
    let image = RgbImage::from_pixel(16, 8, Rgb([10, 20, 30]));

    let saved = save_upload(&encode_png(&image), dir.path()).unwrap();

    assert!(saved.is_file());
    let loaded = load_image(&saved).unwrap();
    assert_eq!(loaded.dimensions(), (16, 8));
  }

  #[test]
  fn save_upload_rejects_invalid_bytes() {
    let dir = tempfile::tempdir().unwrap();

    let err = save_upload(b"definitely not an image", dir.path()).unwrap_err();
    assert!(matches!(err, InputError::Decode(_)));
    // 无效上传不得产生文件
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn load_collection_skips_corrupt_and_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    let image = RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]));
    image.save(dir.path().join("ok.png")).unwrap();
    std::fs::write(dir.path().join("broken.jpg"), b"garbage").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

    let images = load_collection(dir.path()).unwrap();

    assert_eq!(images.len(), 1);
    assert_eq!(images[0].dimensions(), (8, 8));
  }

  #[test]
  fn load_collection_of_empty_dir_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_collection(dir.path()).unwrap().is_empty());
  }
}
