// 该文件是 Quanjing （全景） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use quanjing::model::RemoteModelBuilder;
use quanjing::stitcher::Stitcher;
use quanjing::task::DetectPanoramaTask;
use quanjing::workspace::Workspace;
use quanjing::{input, output};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();
  info!("工作目录: {}", args.workdir.display());

  let workspace = Workspace::new(&args.workdir);
  if args.reset {
    workspace.reset()?;
    info!("工作目录已清空");
    return Ok(());
  }
  workspace.prepare()?;

  // 摄取本次给出的上传；单个坏文件跳过，不拖垮整批
  for path in &args.images {
    let bytes = std::fs::read(path)?;
    match input::save_upload(&bytes, &workspace.images_dir()) {
      Ok(saved) => info!("已加入集合: {} -> {}", path.display(), saved.display()),
      Err(err) => warn!("跳过无效上传 {}: {}", path.display(), err),
    }
  }

  let stitcher = Stitcher::new().with_confidence_threshold(args.match_confidence);

  let mut builder = RemoteModelBuilder::new()
    .endpoint(args.endpoint.clone())
    .model_id(&args.model)
    .confidence(args.confidence)
    .overlap(args.overlap)
    .timeout(Duration::from_secs(args.timeout));
  if let Some(key) = &args.api_key {
    builder = builder.api_key(key);
  }
  let model = match builder.build() {
    Ok(model) => model,
    Err(err) => {
      error!("模型配置失败: {err}");
      println!(
        "{}",
        serde_json::to_string_pretty(&output::error_response(&err.to_string()))?
      );
      std::process::exit(1);
    }
  };

  let task = DetectPanoramaTask::new().with_save_annotated(!args.no_annotate);
  match task.run(&workspace, &stitcher, &model) {
    Ok(result) => {
      println!("{}", serde_json::to_string_pretty(&result)?);
      Ok(())
    }
    Err(err) => {
      error!("任务失败: {err}");
      println!(
        "{}",
        serde_json::to_string_pretty(&output::error_response(&err.to_string()))?
      );
      std::process::exit(1);
    }
  }
}
