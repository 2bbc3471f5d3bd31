// 该文件是 Guanzhong （观众） 项目的一部分。
// src/model.rs - 后处理模型
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl,
  tensor::{RawTensor, TensorDetails, TensorFrame},
};

pub mod anchor;
pub mod decode;
pub mod nms;

#[cfg(feature = "model_retinaface")]
mod retinaface;
#[cfg(feature = "model_retinaface")]
pub use self::retinaface::{RetinafaceBuilder, RetinafaceDecoder, RetinafaceError};

#[cfg(feature = "model_dequantize")]
mod dequantize;
#[cfg(feature = "model_dequantize")]
pub use self::dequantize::{
  DequantizeError, DequantizePostProcessor, DequantizedTensor, FloatQuantization,
};

/// 后处理器：输入一次推理的原始输出张量及其元数据
pub trait PostProcessor {
  type Output;
  type Error;

  fn forward(
    &self,
    tensors: &[RawTensor],
    details: &[TensorDetails],
  ) -> Result<Self::Output, Self::Error>;

  fn process(&self, frame: &TensorFrame) -> Result<Self::Output, Self::Error> {
    self.forward(&frame.tensors, &frame.details)
  }
}

/// 可被输出端记录的后处理结果
pub trait Record: Serialize {
  fn item_count(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.item_count() == 0
  }
}

/// 人脸关键点，`index` 仅表示关键点顺序 (0-4)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
  #[serde(rename = "category_id")]
  pub index: u32,
  pub connect: Vec<u32>,
  #[serde(rename = "landmark")]
  pub point: [f32; 2],
  pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  pub category_id: u32,
  pub label: String,
  pub score: f32,
  pub landmarks: Vec<Landmark>,
}

impl Record for Vec<Detection> {
  fn item_count(&self) -> usize {
    self.len()
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "model_retinaface")]
  #[error("RetinaFace 后处理错误: {0}")]
  RetinafaceError(#[from] RetinafaceError),
  #[cfg(feature = "model_dequantize")]
  #[error("反量化后处理错误: {0}")]
  DequantizeError(#[from] DequantizeError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum PostProcessorWrapper {
  #[cfg(feature = "model_retinaface")]
  Retinaface(RetinafaceDecoder),
  #[cfg(feature = "model_dequantize")]
  Dequantize(DequantizePostProcessor),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PostProcessOutput {
  #[cfg(feature = "model_retinaface")]
  Detections(Vec<Detection>),
  #[cfg(feature = "model_dequantize")]
  Tensors(Vec<DequantizedTensor>),
}

impl Record for PostProcessOutput {
  fn item_count(&self) -> usize {
    match self {
      #[cfg(feature = "model_retinaface")]
      PostProcessOutput::Detections(items) => items.len(),
      #[cfg(feature = "model_dequantize")]
      PostProcessOutput::Tensors(items) => items.len(),
    }
  }
}

impl FromUrl for PostProcessorWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "model_retinaface")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RetinafaceBuilder::SCHEME {
        let model = RetinafaceBuilder::from_url(url)?.build()?;
        return Ok(PostProcessorWrapper::Retinaface(model));
      }
    }
    #[cfg(feature = "model_dequantize")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == DequantizePostProcessor::SCHEME {
        let model = DequantizePostProcessor::from_url(url)?;
        return Ok(PostProcessorWrapper::Dequantize(model));
      }
    }
    Err(ModelError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl PostProcessor for PostProcessorWrapper {
  type Output = PostProcessOutput;
  type Error = ModelError;

  fn forward(
    &self,
    tensors: &[RawTensor],
    details: &[TensorDetails],
  ) -> Result<Self::Output, Self::Error> {
    match self {
      #[cfg(feature = "model_retinaface")]
      PostProcessorWrapper::Retinaface(model) => model
        .forward(tensors, details)
        .map(PostProcessOutput::Detections)
        .map_err(ModelError::from),
      #[cfg(feature = "model_dequantize")]
      PostProcessorWrapper::Dequantize(model) => model
        .forward(tensors, details)
        .map(PostProcessOutput::Tensors)
        .map_err(ModelError::from),
    }
  }
}
