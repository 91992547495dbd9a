// 该文件是 Quanjing （全景） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::path::PathBuf;

use clap::Parser;
use url::Url;

/// Quanjing 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 工作目录（图像集合与产物的根目录）
  #[arg(long, default_value = "workdir", value_name = "DIR")]
  pub workdir: PathBuf,

  /// 待加入集合的图像文件，可给多个
  #[arg(value_name = "IMAGE")]
  pub images: Vec<PathBuf>,

  /// 清空工作目录后退出
  #[arg(long)]
  pub reset: bool,

  /// 推理服务端点
  #[arg(long, default_value = "https://detect.roboflow.com", value_name = "URL")]
  pub endpoint: Url,

  /// 推理服务模型标识
  #[arg(long, default_value = "artai3/2", value_name = "MODEL")]
  pub model: String,

  /// 推理服务 API 密钥，缺省时读取环境变量 ROBOFLOW_API_KEY
  #[arg(long, value_name = "KEY")]
  pub api_key: Option<String>,

  /// 推理置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.4", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 推理重叠抑制 IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub overlap: f32,

  /// 拼接匹配置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.2", value_name = "THRESHOLD")]
  pub match_confidence: f32,

  /// 推理请求超时（秒）
  #[arg(long, default_value = "30", value_name = "SECONDS")]
  pub timeout: u64,

  /// 不保存标注图像
  #[arg(long)]
  pub no_annotate: bool,
}
