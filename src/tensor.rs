// 该文件是 Guanzhong （观众） 项目的一部分。
// src/tensor.rs - 量化张量与反量化
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

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TensorError {
  #[error("张量 {name} 数据长度不匹配: 形状 {shape:?} 期望 {expected} 个元素, 实际 {actual} 个")]
  LengthMismatch {
    name: String,
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 每个张量的仿射量化参数，序列化为 `[scale, zero_point]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f32, i32)", into = "(f32, i32)")]
pub struct Quantization {
  pub scale: f32,
  pub zero_point: i32,
}

impl Quantization {
  pub fn new(scale: f32, zero_point: i32) -> Self {
    Self { scale, zero_point }
  }
}

impl From<(f32, i32)> for Quantization {
  fn from((scale, zero_point): (f32, i32)) -> Self {
    Self { scale, zero_point }
  }
}

impl From<Quantization> for (f32, i32) {
  fn from(q: Quantization) -> Self {
    (q.scale, q.zero_point)
  }
}

/// 推理运行时随输出张量一同给出的元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDetails {
  pub index: u32,
  pub name: String,
  pub shape: Vec<usize>,
  pub quantization: Quantization,
}

impl TensorDetails {
  pub fn last_dim(&self) -> Option<usize> {
    self.shape.last().copied()
  }

  pub fn num_elements(&self) -> usize {
    self.shape.iter().product()
  }
}

pub trait QuantizedValue: Copy {
  fn widen(self) -> f32;
}

macro_rules! impl_quantized_value {
  ($($t:ty),*) => {
    $(
      impl QuantizedValue for $t {
        #[inline]
        fn widen(self) -> f32 {
          self as f32
        }
      }
    )*
  };
}

impl_quantized_value!(u8, i8, u16, i16, i32);

/// `(raw - zero_point) * scale`，先扩展为浮点再减零点
#[inline]
pub fn dequantize<T: QuantizedValue>(raw: T, quantization: Quantization) -> f32 {
  (raw.widen() - quantization.zero_point as f32) * quantization.scale
}

/// 原始整数张量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum RawTensor {
  UInt8(Box<[u8]>),
  Int8(Box<[i8]>),
  UInt16(Box<[u16]>),
  Int16(Box<[i16]>),
  Int32(Box<[i32]>),
}

macro_rules! impl_from_vec {
  ($($t:ty => $variant:ident),*) => {
    $(
      impl From<Vec<$t>> for RawTensor {
        fn from(data: Vec<$t>) -> Self {
          RawTensor::$variant(data.into_boxed_slice())
        }
      }
    )*
  };
}

impl_from_vec!(u8 => UInt8, i8 => Int8, u16 => UInt16, i16 => Int16, i32 => Int32);

fn extend_dequantized<T: QuantizedValue>(data: &[T], q: Quantization, out: &mut Vec<f32>) {
  out.extend(data.iter().map(|&v| dequantize(v, q)));
}

impl RawTensor {
  pub fn len(&self) -> usize {
    match self {
      RawTensor::UInt8(d) => d.len(),
      RawTensor::Int8(d) => d.len(),
      RawTensor::UInt16(d) => d.len(),
      RawTensor::Int16(d) => d.len(),
      RawTensor::Int32(d) => d.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn dtype(&self) -> &'static str {
    match self {
      RawTensor::UInt8(_) => "uint8",
      RawTensor::Int8(_) => "int8",
      RawTensor::UInt16(_) => "uint16",
      RawTensor::Int16(_) => "int16",
      RawTensor::Int32(_) => "int32",
    }
  }

  /// 检查数据长度与元数据中的形状是否一致
  pub fn check_shape(&self, details: &TensorDetails) -> Result<(), TensorError> {
    let expected = details.num_elements();
    if self.len() != expected {
      return Err(TensorError::LengthMismatch {
        name: details.name.clone(),
        shape: details.shape.clone(),
        expected,
        actual: self.len(),
      });
    }
    Ok(())
  }

  /// 反量化并追加到 `out` 末尾
  pub fn dequantize_into(&self, quantization: Quantization, out: &mut Vec<f32>) {
    out.reserve(self.len());
    match self {
      RawTensor::UInt8(d) => extend_dequantized(d, quantization, out),
      RawTensor::Int8(d) => extend_dequantized(d, quantization, out),
      RawTensor::UInt16(d) => extend_dequantized(d, quantization, out),
      RawTensor::Int16(d) => extend_dequantized(d, quantization, out),
      RawTensor::Int32(d) => extend_dequantized(d, quantization, out),
    }
  }

  pub fn dequantize(&self, quantization: Quantization) -> Vec<f32> {
    let mut out = Vec::with_capacity(self.len());
    self.dequantize_into(quantization, &mut out);
    out
  }
}

/// 一次推理的全部输出，张量与元数据按位置一一对应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TensorFrame {
  pub tensors: Vec<RawTensor>,
  pub details: Vec<TensorDetails>,
}

impl TensorFrame {
  pub fn push(&mut self, tensor: RawTensor, details: TensorDetails) {
    self.tensors.push(tensor);
    self.details.push(details);
  }

  pub fn len(&self) -> usize {
    self.tensors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.tensors.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn dequantize_is_affine() {
    let q = Quantization::new(0.125, 128);
    for raw in [0u8, 1, 127, 128, 129, 255] {
      assert_eq!(dequantize(raw, q), (raw as f32 - 128.0) * 0.125);
    }
    assert_eq!(dequantize(-128i8, Quantization::new(0.5, -3)), (-128.0 + 3.0) * 0.5);
  }

  #[test]
  fn dequantize_keeps_element_order() {
    let tensor = RawTensor::from(vec![10u8, 20, 30]);
    let values = tensor.dequantize(Quantization::new(2.0, 10));
    assert_eq!(values, vec![0.0, 20.0, 40.0]);
  }

  #[test]
  fn shape_check_rejects_wrong_length() {
    let details = TensorDetails {
      index: 0,
      name: "out".to_string(),
      shape: vec![1, 2, 3],
      quantization: Quantization::new(1.0, 0),
    };
    assert!(RawTensor::from(vec![0i16; 6]).check_shape(&details).is_ok());
    let err = RawTensor::from(vec![0i16; 5])
      .check_shape(&details)
      .unwrap_err();
    assert_eq!(
      err,
      TensorError::LengthMismatch {
        name: "out".to_string(),
        shape: vec![1, 2, 3],
        expected: 6,
        actual: 5,
      }
    );
  }

  #[test]
  fn details_parse_quantization_pair() {
    let details: TensorDetails = serde_json::from_str(
      r#"{"index": 3, "name": "conv41", "shape": [1, 92, 160, 8], "quantization": [0.05, 12]}"#,
    )
    .unwrap();
    assert_eq!(details.quantization, Quantization::new(0.05, 12));
    assert_eq!(details.last_dim(), Some(8));
    assert_eq!(details.num_elements(), 92 * 160 * 8);
  }

  #[test]
  fn raw_tensor_parses_tagged_dtype() {
    let tensor: RawTensor = serde_json::from_str(r#"{"dtype": "int8", "data": [-1, 0, 1]}"#).unwrap();
    assert_eq!(tensor, RawTensor::from(vec![-1i8, 0, 1]));
    assert_eq!(tensor.dtype(), "int8");
  }
}
