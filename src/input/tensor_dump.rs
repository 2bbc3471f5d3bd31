// 该文件是 Guanzhong （观众） 项目的一部分。
// src/input/tensor_dump.rs - 张量转储文件输入
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

use std::{collections::VecDeque, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{RawTensor, TensorDetails, TensorFrame},
};

#[derive(Error, Debug)]
pub enum TensorDumpInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(std::io::Error),
  #[error("Tensor dump parsing error: {0}")]
  JsonError(serde_json::Error),
}

impl From<std::io::Error> for TensorDumpInputError {
  fn from(err: std::io::Error) -> Self {
    TensorDumpInputError::IoError(err)
  }
}

impl From<serde_json::Error> for TensorDumpInputError {
  fn from(err: serde_json::Error) -> Self {
    TensorDumpInputError::JsonError(err)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDumpEntry {
  pub details: TensorDetails,
  pub tensor: RawTensor,
}

/// 一次推理保存下来的全部输出张量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorDump {
  pub tensors: Vec<TensorDumpEntry>,
}

impl From<TensorDump> for TensorFrame {
  fn from(dump: TensorDump) -> Self {
    let mut frame = TensorFrame::default();
    for entry in dump.tensors {
      frame.push(entry.tensor, entry.details);
    }
    frame
  }
}

impl From<TensorFrame> for TensorDump {
  fn from(frame: TensorFrame) -> Self {
    TensorDump {
      tensors: frame
        .tensors
        .into_iter()
        .zip(frame.details)
        .map(|(tensor, details)| TensorDumpEntry { details, tensor })
        .collect(),
    }
  }
}

/// 文件可以是单个转储，也可以是多个转储组成的数组
#[derive(Deserialize)]
#[serde(untagged)]
enum DumpFile {
  Many(Vec<TensorDump>),
  One(TensorDump),
}

pub struct TensorDumpInput {
  frames: VecDeque<TensorFrame>,
}

impl FromUrlWithScheme for TensorDumpInput {
  const SCHEME: &'static str = "dump";
}

impl FromUrl for TensorDumpInput {
  type Error = TensorDumpInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(TensorDumpInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

impl TensorDumpInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, TensorDumpInputError> {
    let path = path.as_ref();
    info!("读取张量转储: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_json_str(&content)
  }

  pub fn from_json_str(json: &str) -> Result<Self, TensorDumpInputError> {
    let frames: VecDeque<TensorFrame> = match serde_json::from_str(json)? {
      DumpFile::Many(dumps) => dumps.into_iter().map(TensorFrame::from).collect(),
      DumpFile::One(dump) => VecDeque::from([TensorFrame::from(dump)]),
    };
    info!("共 {} 帧张量", frames.len());
    Ok(TensorDumpInput { frames })
  }
}

impl Iterator for TensorDumpInput {
  type Item = TensorFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.pop_front()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const DUMP: &str = r#"{"tensors": [
    {"details": {"index": 0, "name": "bbox", "shape": [1, 1, 1, 4], "quantization": [0.1, 128]},
     "tensor": {"dtype": "uint8", "data": [128, 128, 128, 128]}},
    {"details": {"index": 1, "name": "conf", "shape": [1, 1, 1, 2], "quantization": [1.0, 0]},
     "tensor": {"dtype": "int8", "data": [-3, 3]}}
  ]}"#;

  #[test]
  fn single_dump_yields_one_frame() {
    let mut input = TensorDumpInput::from_json_str(DUMP).unwrap();
    let frame = input.next().unwrap();
    assert_eq!(frame.len(), 2);
    assert_eq!(frame.details[1].name, "conf");
    assert_eq!(frame.tensors[1], RawTensor::from(vec![-3i8, 3]));
    assert!(input.next().is_none());
  }

  #[test]
  fn array_of_dumps_yields_frames_in_order() {
    let json = format!("[{}, {{\"tensors\": []}}]", DUMP);
    let input = TensorDumpInput::from_json_str(&json).unwrap();
    let sizes: Vec<_> = input.map(|f| f.len()).collect();
    assert_eq!(sizes, vec![2, 0]);
  }

  #[test]
  fn frame_converts_back_to_dump() {
    let dump: TensorDump = serde_json::from_str(DUMP).unwrap();
    let frame = TensorFrame::from(dump.clone());
    assert_eq!(TensorDump::from(frame), dump);
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("image:///tmp/a.png").unwrap();
    assert!(matches!(
      TensorDumpInput::from_url(&url),
      Err(TensorDumpInputError::SchemaMismatch)
    ));
  }
}
