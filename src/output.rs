// 该文件是 Guanzhong （观众） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::FromUrl;
#[cfg(any(feature = "json_output", feature = "directory_record"))]
use crate::FromUrlWithScheme;
use crate::model::Record;
use crate::tensor::TensorFrame;
use thiserror::Error;
use url::Url;

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "json_output")]
mod json_output;
#[cfg(feature = "json_output")]
pub use self::json_output::{JsonFileOutput, JsonOutputError, StdoutOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "json_output")]
  #[error("JSON 输出错误: {0}")]
  JsonOutputError(#[from] JsonOutputError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  #[cfg(feature = "json_output")]
  StdoutOutput(StdoutOutput),
  #[cfg(feature = "json_output")]
  JsonFileOutput(JsonFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "json_output")]
      StdoutOutput::SCHEME => {
        let output = StdoutOutput::from_url(url)?;
        Ok(OutputWrapper::StdoutOutput(output))
      }
      #[cfg(feature = "json_output")]
      JsonFileOutput::SCHEME => {
        let output = JsonFileOutput::from_url(url)?;
        Ok(OutputWrapper::JsonFileOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<R: Record> Render<TensorFrame, R> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &TensorFrame, result: &R) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "json_output")]
      OutputWrapper::StdoutOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "json_output")]
      OutputWrapper::JsonFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
