// 该文件是 Guanzhong （观众） 项目的一部分。
// src/config.rs - 模型配置与标签字典
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

use std::{
  collections::HashMap,
  path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
/// RetinaFace 训练时使用的方差，模型配置中不提供
pub const RETINAFACE_VARIANCE: [f32; 2] = [0.1, 0.2];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取文件 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("JSON 解析失败: {0}")]
  Json(#[from] serde_json::Error),
  #[error("缺少配置项: {0}")]
  MissingField(&'static str),
  #[error("配置无效: {0}")]
  Invalid(String),
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
  std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })
}

/// 模型 JSON 配置，只解析后处理需要的字段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelConfig {
  #[serde(rename = "PRE_PROCESS", default)]
  pub pre_process: Vec<PreProcessConfig>,
  #[serde(rename = "POST_PROCESS", default)]
  pub post_process: Vec<PostProcessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PreProcessConfig {
  pub input_h: Option<u32>,
  pub input_w: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostProcessConfig {
  pub anchor_config: Option<AnchorConfig>,
  pub output_conf_threshold: Option<f32>,
  #[serde(rename = "OutputNMSThreshold")]
  pub output_nms_threshold: Option<f32>,
  pub labels_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AnchorConfig {
  pub min_sizes: Vec<Vec<f32>>,
  pub steps: Vec<u32>,
}

impl ModelConfig {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取模型配置: {}", path.display());
    Self::from_json_str(&read_file(path)?)
  }

  pub fn pre_process(&self) -> Result<&PreProcessConfig, ConfigError> {
    self
      .pre_process
      .first()
      .ok_or(ConfigError::MissingField("PRE_PROCESS"))
  }

  pub fn post_process(&self) -> Result<&PostProcessConfig, ConfigError> {
    self
      .post_process
      .first()
      .ok_or(ConfigError::MissingField("POST_PROCESS"))
  }

  /// 标签字典路径为必填项
  pub fn labels_path(&self) -> Result<&Path, ConfigError> {
    self
      .post_process()?
      .labels_path
      .as_deref()
      .ok_or(ConfigError::MissingField("POST_PROCESS.LabelsPath"))
  }
}

/// 类别编号到标签名的映射，JSON 形如 `{"1": "face"}`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct LabelMap(HashMap<String, String>);

impl LabelMap {
  pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    debug!("读取标签字典: {}", path.display());
    Self::from_json_str(&read_file(path)?)
  }

  pub fn get(&self, id: u32) -> Option<&str> {
    self.0.get(&id.to_string()).map(String::as_str)
  }

  /// 缺失时回退为 `class_<id>`
  pub fn label_for(&self, id: u32) -> String {
    self
      .get(id)
      .map(str::to_string)
      .unwrap_or_else(|| format!("class_{}", id))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl<S: Into<String>> FromIterator<(u32, S)> for LabelMap {
  fn from_iter<I: IntoIterator<Item = (u32, S)>>(iter: I) -> Self {
    LabelMap(
      iter
        .into_iter()
        .map(|(id, label)| (id.to_string(), label.into()))
        .collect(),
    )
  }
}

/// 解码器使用的已解析配置
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
  pub input_height: u32,
  pub input_width: u32,
  pub steps: Vec<u32>,
  pub min_sizes: Vec<Vec<f32>>,
  pub variance: [f32; 2],
  pub confidence_threshold: f32,
  pub nms_threshold: f32,
  pub labels: LabelMap,
}

impl DecoderConfig {
  pub fn new(
    input_height: u32,
    input_width: u32,
    steps: Vec<u32>,
    min_sizes: Vec<Vec<f32>>,
    labels: LabelMap,
  ) -> Self {
    Self {
      input_height,
      input_width,
      steps,
      min_sizes,
      variance: RETINAFACE_VARIANCE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      labels,
    }
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn from_model_config(config: &ModelConfig, labels: LabelMap) -> Result<Self, ConfigError> {
    let pre = config.pre_process()?;
    let post = config.post_process()?;
    let anchor = post
      .anchor_config
      .as_ref()
      .ok_or(ConfigError::MissingField("POST_PROCESS.AnchorConfig"))?;

    let input_height = pre.input_h.ok_or(ConfigError::MissingField("PRE_PROCESS.InputH"))?;
    let input_width = pre.input_w.ok_or(ConfigError::MissingField("PRE_PROCESS.InputW"))?;

    let config = DecoderConfig::new(
      input_height,
      input_width,
      anchor.steps.clone(),
      anchor.min_sizes.clone(),
      labels,
    )
    .confidence_threshold(
      post
        .output_conf_threshold
        .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
    )
    .nms_threshold(post.output_nms_threshold.unwrap_or(DEFAULT_NMS_THRESHOLD));

    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_height == 0 || self.input_width == 0 {
      return Err(ConfigError::Invalid(format!(
        "输入尺寸必须为正: {}x{}",
        self.input_width, self.input_height
      )));
    }
    if self.steps.is_empty() {
      return Err(ConfigError::Invalid("Steps 不能为空".to_string()));
    }
    if self.steps.len() != self.min_sizes.len() {
      return Err(ConfigError::Invalid(format!(
        "Steps 数量 {} 与 MinSizes 数量 {} 不一致",
        self.steps.len(),
        self.min_sizes.len()
      )));
    }
    for (&step, sizes) in self.steps.iter().zip(&self.min_sizes) {
      if step == 0 || step > self.input_height || step > self.input_width {
        return Err(ConfigError::Invalid(format!(
          "步长 {} 超出输入尺寸 {}x{}",
          step, self.input_width, self.input_height
        )));
      }
      if sizes.is_empty() {
        return Err(ConfigError::Invalid(format!("步长 {} 没有锚框尺寸", step)));
      }
      if let Some(bad) = sizes.iter().find(|m| !m.is_finite() || **m <= 0.0) {
        return Err(ConfigError::Invalid(format!(
          "步长 {} 的锚框尺寸无效: {}",
          step, bad
        )));
      }
    }
    if !self.confidence_threshold.is_finite() || !self.nms_threshold.is_finite() {
      return Err(ConfigError::Invalid(format!(
        "阈值无效: conf={}, nms={}",
        self.confidence_threshold, self.nms_threshold
      )));
    }
    Ok(())
  }
}
