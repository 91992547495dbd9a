// 该文件是 Quanjing （全景） 项目的一部分。
// src/model/mod.rs - 远程目标检测模型
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

use std::io::Cursor;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const DEFAULT_ENDPOINT: &str = "https://detect.roboflow.com";
pub const DEFAULT_MODEL_ID: &str = "artai3/2";
pub const DEFAULT_API_KEY_VAR: &str = "ROBOFLOW_API_KEY";

const DEFAULT_CONFIDENCE: f32 = 0.4;
const DEFAULT_OVERLAP: f32 = 0.5;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 检测服务返回的一条原始预测。
///
/// 几何为中心点式 (x, y 为框中心)；置信度与类别在服务端可能
/// 缺省，这里用显式 Option 表达而不是运行时探测字段。
#[derive(Debug, Clone, Deserialize)]
pub struct RawPrediction {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  #[serde(default)]
  pub confidence: Option<f32>,
  #[serde(default, rename = "class")]
  pub class_name: Option<String>,
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("缺少推理服务凭据: 环境变量 {0} 未设置")]
  MissingApiKey(String),
  #[error("推理服务不可达: {0}")]
  ServiceUnavailable(String),
  #[error("推理服务响应无效: {0}")]
  InvalidResponse(String),
  #[error("图像编码错误: {0}")]
  Encode(#[from] image::ImageError),
}

/// 检测模型接口；流水线只依赖这一层，便于替换后端与测试
pub trait Model {
  fn infer(&self, image: &RgbImage) -> Result<Vec<RawPrediction>, ModelError>;
}

#[derive(Debug, Deserialize)]
struct InferenceResponse {
  #[serde(default)]
  predictions: Vec<RawPrediction>,
}

pub struct RemoteModelBuilder {
  endpoint: Url,
  model_id: String,
  api_key: Option<String>,
  api_key_var: String,
  confidence: f32,
  overlap: f32,
  timeout: Duration,
}

impl Default for RemoteModelBuilder {
  fn default() -> Self {
    Self::new()
  }
}

impl RemoteModelBuilder {
  pub fn new() -> Self {
    Self {
      endpoint: Url::parse(DEFAULT_ENDPOINT).expect("内置端点地址无效"),
      model_id: DEFAULT_MODEL_ID.to_string(),
      api_key: None,
      api_key_var: DEFAULT_API_KEY_VAR.to_string(),
      confidence: DEFAULT_CONFIDENCE,
      overlap: DEFAULT_OVERLAP,
      timeout: DEFAULT_TIMEOUT,
    }
  }

  pub fn endpoint(mut self, endpoint: Url) -> Self {
    self.endpoint = endpoint;
    self
  }

  pub fn model_id(mut self, model_id: &str) -> Self {
    self.model_id = model_id.to_string();
    self
  }

  /// 直接给出 API 密钥，优先于环境变量
  pub fn api_key(mut self, api_key: &str) -> Self {
    self.api_key = Some(api_key.to_string());
    self
  }

  /// 改用其他环境变量读取密钥
  pub fn api_key_var(mut self, var: &str) -> Self {
    self.api_key_var = var.to_string();
    self
  }

  pub fn confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn overlap(mut self, overlap: f32) -> Self {
    self.overlap = overlap;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  /// 组装远程模型。
  ///
  /// 凭据在这里检查：缺失属于启动期配置错误，必须在发出任何
  /// 网络请求之前就报出来。
  pub fn build(self) -> Result<RemoteModel, ModelError> {
    let api_key = match self.api_key {
      Some(key) if !key.is_empty() => key,
      _ => std::env::var(&self.api_key_var)
        .ok()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ModelError::MissingApiKey(self.api_key_var.clone()))?,
    };

    info!("推理服务端点: {}, 模型: {}", self.endpoint, self.model_id);
    Ok(RemoteModel {
      endpoint: self.endpoint,
      model_id: self.model_id,
      api_key,
      confidence: self.confidence,
      overlap: self.overlap,
      agent: ureq::AgentBuilder::new()
        .timeout(self.timeout)
        .build(),
    })
  }
}

/// 通过 HTTP 访问的远程检测模型。
///
/// 同步阻塞调用，超时由 agent 统一控制；传输失败与超时都归入
/// 服务不可达，跟"没有检测到目标"的空结果严格区分。
pub struct RemoteModel {
  endpoint: Url,
  model_id: String,
  api_key: String,
  confidence: f32,
  overlap: f32,
  agent: ureq::Agent,
}

impl RemoteModel {
  pub fn builder() -> RemoteModelBuilder {
    RemoteModelBuilder::new()
  }

  fn encode_jpeg_base64(image: &RgbImage) -> Result<String, ModelError> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, image::ImageFormat::Jpeg)?;
    Ok(BASE64.encode(buffer.into_inner()))
  }

  fn infer_url(&self) -> String {
    format!(
      "{}/{}",
      self.endpoint.as_str().trim_end_matches('/'),
      self.model_id
    )
  }
}

impl Model for RemoteModel {
  fn infer(&self, image: &RgbImage) -> Result<Vec<RawPrediction>, ModelError> {
    let body = Self::encode_jpeg_base64(image)?;
    debug!("推理请求体: {} 字节", body.len());

    let response = self
      .agent
      .post(&self.infer_url())
      .query("api_key", &self.api_key)
      .query("confidence", &self.confidence.to_string())
      .query("overlap", &self.overlap.to_string())
      .set("Content-Type", "application/x-www-form-urlencoded")
      .send_string(&body)
      .map_err(|err| match err {
        ureq::Error::Status(code, _) => {
          ModelError::ServiceUnavailable(format!("服务返回状态码 {code}"))
        }
        ureq::Error::Transport(transport) => {
          ModelError::ServiceUnavailable(transport.to_string())
        }
      })?;

    let parsed: InferenceResponse = response
      .into_json()
      .map_err(|err| ModelError::InvalidResponse(err.to_string()))?;
    info!("收到 {} 条原始预测", parsed.predictions.len());

    // 保持服务端返回顺序，后续归一化按此顺序编号
    Ok(parsed.predictions)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_credential_fails_before_any_network_call() {
    let result = RemoteModelBuilder::new()
      .api_key_var("QUANJING_TEST_ABSENT_KEY")
      .build();

    match result {
      Err(ModelError::MissingApiKey(var)) => assert_eq!(var, "QUANJING_TEST_ABSENT_KEY"),
      Err(other) => panic!("错误类型不对: {other:?}"),
      Ok(_) => panic!("缺少凭据时不应构建成功"),
    }
  }

  #[test]
  fn explicit_api_key_wins() {
    let model = RemoteModelBuilder::new()
      .api_key_var("QUANJING_TEST_ABSENT_KEY")
      .api_key("secret")
      .build()
      .unwrap();

    assert_eq!(model.infer_url(), "https://detect.roboflow.com/artai3/2");
  }

  #[test]
  fn predictions_parse_with_optional_fields() {
    let payload = r#"{
      "predictions": [
        {"x": 100.0, "y": 50.0, "width": 40.0, "height": 20.0, "confidence": 0.87, "class": "face"},
        {"x": 10.0, "y": 20.0, "width": 4.0, "height": 6.0}
      ]
    }"#;

    let parsed: InferenceResponse = serde_json::from_str(payload).unwrap();

    assert_eq!(parsed.predictions.len(), 2);
    assert_eq!(parsed.predictions[0].class_name.as_deref(), Some("face"));
    assert_eq!(parsed.predictions[0].confidence, Some(0.87));
    assert!(parsed.predictions[1].class_name.is_none());
    assert!(parsed.predictions[1].confidence.is_none());
  }

  #[test]
  fn empty_payload_parses_to_no_predictions() {
    let parsed: InferenceResponse = serde_json::from_str("{}").unwrap();
    assert!(parsed.predictions.is_empty());
  }
}
