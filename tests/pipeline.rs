// 该文件是 Quanjing （全景） 项目的一部分。
// tests/pipeline.rs - 流水线端到端测试
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
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use quanjing::model::{Model, ModelError, RawPrediction};
use quanjing::stitcher::Stitcher;
use quanjing::task::{DetectPanoramaTask, TaskError};
use quanjing::workspace::Workspace;
use quanjing::StitchError;

// 返回固定预测列表的替身模型，让流水线测试不依赖网络
struct FixedModel {
  predictions: Vec<RawPrediction>,
}

impl Model for FixedModel {
  fn infer(&self, _image: &RgbImage) -> Result<Vec<RawPrediction>, ModelError> {
    Ok(self.predictions.clone())
  }
}

fn noise_scene(width: u32, height: u32, seed: u64) -> RgbImage {
  let mut rng = StdRng::seed_from_u64(seed);
  let pixels: Vec<[u8; 3]> = (0..width * height)
    .map(|_| [rng.r#gen(), rng.r#gen(), rng.r#gen()])
    .collect();
  RgbImage::from_fn(width, height, |x, y| Rgb(pixels[(y * width + x) as usize]))
}

fn crop(scene: &RgbImage, x: u32, width: u32) -> RgbImage {
  image::imageops::crop_imm(scene, x, 0, width, scene.height()).to_image()
}

fn reference_prediction() -> RawPrediction {
  RawPrediction {
    x: 100.0,
    y: 50.0,
    width: 40.0,
    height: 20.0,
    confidence: Some(0.87),
    class_name: Some("face".to_string()),
  }
}

#[test]
fn two_overlapping_uploads_stitch_and_detect() {
  let dir = tempfile::tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  workspace.prepare().unwrap();

  // 两张 800x600、横向重叠三成的图像
  let scene = noise_scene(1360, 600, 5);
  crop(&scene, 0, 800)
    .save(workspace.images_dir().join("left.png"))
    .unwrap();
  crop(&scene, 560, 800)
    .save(workspace.images_dir().join("right.png"))
    .unwrap();

  let model = FixedModel {
    predictions: vec![reference_prediction()],
  };
  let task = DetectPanoramaTask::new();

  let result = task
    .run(&workspace, &Stitcher::default(), &model)
    .unwrap();

  assert!(result.success);
  assert_eq!(result.count, 1);

  let detection = &result.detections[0];
  assert_eq!(detection.id, 0);
  assert_eq!(detection.bbox.x0, 80);
  assert_eq!(detection.bbox.y0, 40);
  assert_eq!(detection.bbox.x1, 120);
  assert_eq!(detection.bbox.y1, 60);
  assert_eq!(detection.bbox.width, 40);
  assert_eq!(detection.bbox.height, 20);
  assert_eq!(detection.confidence, Some(0.87));
  assert_eq!(detection.class_name, "face");

  // 全景产物: 比任一输入更宽，高度不超过输入高度加融合余量
  let panorama = image::open(workspace.panorama_path()).unwrap().to_rgb8();
  assert!(panorama.width() > 800, "全景宽度 {}", panorama.width());
  assert!(panorama.height() <= 640, "全景高度 {}", panorama.height());

  // 标注产物存在且响应引用它
  assert!(workspace.detection_path().is_file());
  assert_eq!(
    result.image_path.as_deref(),
    workspace.detection_path().to_str()
  );

  // 响应契约形状
  let value = serde_json::to_value(&result).unwrap();
  assert_eq!(value["success"], true);
  assert_eq!(value["count"], 1);
  assert_eq!(value["detections"][0]["bbox"]["x0"], 80);
  assert_eq!(value["detections"][0]["class"], "face");
  let confidence = value["detections"][0]["confidence"].as_f64().unwrap();
  assert!((confidence - 0.87).abs() < 1e-6);
  assert!(value["image_path"].is_string());
}

#[test]
fn single_upload_passes_through_and_empty_predictions_are_success() {
  let dir = tempfile::tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  workspace.prepare().unwrap();

  let image = noise_scene(320, 240, 8);
  image
    .save(workspace.images_dir().join("only.png"))
    .unwrap();

  let model = FixedModel {
    predictions: Vec::new(),
  };
  let task = DetectPanoramaTask::new();

  let result = task
    .run(&workspace, &Stitcher::default(), &model)
    .unwrap();

  assert!(result.success);
  assert_eq!(result.count, 0);
  assert!(result.detections.is_empty());
  assert!(result.image_path.is_none());
  // 空预测不写标注产物
  assert!(!workspace.detection_path().exists());

  // 单图直通，全景与输入逐像素一致
  let panorama = image::open(workspace.panorama_path()).unwrap().to_rgb8();
  assert_eq!(panorama.dimensions(), image.dimensions());
}

#[test]
fn empty_collection_fails_with_insufficient_input() {
  let dir = tempfile::tempdir().unwrap();
  let workspace = Workspace::new(dir.path());

  let model = FixedModel {
    predictions: Vec::new(),
  };
  let task = DetectPanoramaTask::new();

  let err = task
    .run(&workspace, &Stitcher::default(), &model)
    .unwrap_err();

  assert!(matches!(
    err,
    TaskError::Stitch(StitchError::InsufficientInput)
  ));
}

#[test]
fn no_annotate_skips_detection_artifact() {
  let dir = tempfile::tempdir().unwrap();
  let workspace = Workspace::new(dir.path());
  workspace.prepare().unwrap();

  noise_scene(320, 240, 13)
    .save(workspace.images_dir().join("only.png"))
    .unwrap();

  let model = FixedModel {
    predictions: vec![reference_prediction()],
  };
  let task = DetectPanoramaTask::new().with_save_annotated(false);

  let result = task
    .run(&workspace, &Stitcher::default(), &model)
    .unwrap();

  assert_eq!(result.count, 1);
  assert!(result.image_path.is_none());
  assert!(!workspace.detection_path().exists());
}
