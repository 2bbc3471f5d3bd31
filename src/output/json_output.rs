// 该文件是 Guanzhong （观众） 项目的一部分。
// src/output/json_output.rs - JSON 结果输出
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
  fs::File,
  io::{BufWriter, Write},
  path::PathBuf,
  sync::Mutex,
};

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::Record, output::Render, tensor::TensorFrame};

#[derive(Error, Debug)]
pub enum JsonOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

fn check_scheme(uri: &Url, scheme: &str) -> Result<(), JsonOutputError> {
  if uri.scheme() != scheme {
    return Err(JsonOutputError::SchemeMismatch(format!(
      "期望输出方式 '{}', 实际输出方式 '{}'",
      scheme,
      uri.scheme()
    )));
  }
  Ok(())
}

/// 每帧结果以格式化 JSON 打印到标准输出
pub struct StdoutOutput {
  pretty: bool,
}

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = JsonOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    check_scheme(uri, Self::SCHEME)?;
    let pretty = !uri.query_pairs().any(|(k, _)| k == "compact");
    Ok(StdoutOutput { pretty })
  }
}

impl<R: Record> Render<TensorFrame, R> for StdoutOutput {
  type Error = JsonOutputError;

  fn render_result(&self, _frame: &TensorFrame, result: &R) -> Result<(), Self::Error> {
    let text = if self.pretty {
      serde_json::to_string_pretty(result)?
    } else {
      serde_json::to_string(result)?
    };
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", text)?;
    Ok(())
  }
}

/// 每帧结果一行，写入 JSON Lines 文件
pub struct JsonFileOutput {
  path: PathBuf,
  writer: Mutex<BufWriter<File>>,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    check_scheme(uri, Self::SCHEME)?;
    let path = PathBuf::from(uri.path());
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)?;
    }
    info!("结果写入: {}", path.display());
    let file = File::create(&path)?;
    Ok(JsonFileOutput {
      path,
      writer: Mutex::new(BufWriter::new(file)),
    })
  }
}

impl<R: Record> Render<TensorFrame, R> for JsonFileOutput {
  type Error = JsonOutputError;

  fn render_result(&self, _frame: &TensorFrame, result: &R) -> Result<(), Self::Error> {
    let line = serde_json::to_string(result)?;
    let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
    writeln!(writer, "{}", line)?;
    writer.flush()?;
    debug!("写入 {} 条结果到 {}", result.item_count(), self.path.display());
    Ok(())
  }
}
