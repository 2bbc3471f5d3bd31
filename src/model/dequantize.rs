// 该文件是 Guanzhong （观众） 项目的一部分。
// src/model/dequantize.rs - 仅反量化的后处理
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

use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{PostProcessor, Record},
  tensor::{RawTensor, TensorDetails, TensorError},
};

#[derive(Error, Debug)]
pub enum DequantizeError {
  #[error("张量数量 {tensors} 与元数据数量 {details} 不一致")]
  CountMismatch { tensors: usize, details: usize },
  #[error("张量数据错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 反量化后的恒等量化参数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatQuantization {
  pub axis: i32,
  pub scale: Vec<f32>,
  pub zero: Vec<i32>,
}

impl Default for FloatQuantization {
  fn default() -> Self {
    Self {
      axis: -1,
      scale: vec![1.0],
      zero: vec![0],
    }
  }
}

/// 展平为 `(1, size)` 的浮点张量，供下游特征提取使用
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DequantizedTensor {
  pub id: u32,
  pub name: String,
  pub shape: [usize; 2],
  pub quantization: FloatQuantization,
  #[serde(rename = "type")]
  pub dtype: &'static str,
  pub size: usize,
  pub data: Vec<Vec<f32>>,
}

impl Record for Vec<DequantizedTensor> {
  fn item_count(&self) -> usize {
    self.len()
  }
}

/// 如 ArcFace 一类只需反量化的模型
#[derive(Debug, Clone, Copy, Default)]
pub struct DequantizePostProcessor;

impl FromUrlWithScheme for DequantizePostProcessor {
  const SCHEME: &'static str = "dequantize";
}

impl FromUrl for DequantizePostProcessor {
  type Error = DequantizeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DequantizeError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(DequantizePostProcessor)
  }
}

impl PostProcessor for DequantizePostProcessor {
  type Output = Vec<DequantizedTensor>;
  type Error = DequantizeError;

  fn forward(
    &self,
    tensors: &[RawTensor],
    details: &[TensorDetails],
  ) -> Result<Self::Output, Self::Error> {
    if tensors.len() != details.len() {
      return Err(DequantizeError::CountMismatch {
        tensors: tensors.len(),
        details: details.len(),
      });
    }

    tensors
      .iter()
      .zip(details)
      .map(|(tensor, detail)| -> Result<DequantizedTensor, DequantizeError> {
        tensor.check_shape(detail)?;
        let data = tensor.dequantize(detail.quantization);
        debug!("反量化张量 {} ({}): {} 个元素", detail.index, detail.name, data.len());
        Ok(DequantizedTensor {
          id: detail.index,
          name: detail.name.clone(),
          shape: [1, data.len()],
          quantization: FloatQuantization::default(),
          dtype: "DG_FLT",
          size: data.len(),
          data: vec![data],
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tensor::Quantization;

  #[test]
  fn flattens_and_dequantizes() {
    let details = vec![TensorDetails {
      index: 7,
      name: "fc1".to_string(),
      shape: vec![1, 2, 2],
      quantization: Quantization::new(0.5, 2),
    }];
    let tensors = vec![RawTensor::from(vec![2u8, 4, 6, 0])];

    let out = DequantizePostProcessor.forward(&tensors, &details).unwrap();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].shape, [1, 4]);
    assert_eq!(out[0].data, vec![vec![0.0, 1.0, 2.0, -1.0]]);

    let value = serde_json::to_value(&out[0]).unwrap();
    assert_eq!(value["type"], "DG_FLT");
    assert_eq!(value["id"], 7);
    assert_eq!(value["quantization"]["axis"], -1);
  }

  #[test]
  fn count_mismatch_is_rejected() {
    let result = DequantizePostProcessor.forward(&[RawTensor::from(vec![0u8])], &[]);
    assert!(matches!(
      result,
      Err(DequantizeError::CountMismatch { tensors: 1, details: 0 })
    ));
  }
}
