// 该文件是 Guanzhong （观众） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{DateTime, Datelike, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::TensorDump,
  model::Record,
  output::Render,
  tensor::TensorFrame,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按 `年/月/日/时-分-秒-序号.json` 记录每帧结果
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counters: Arc<Mutex<u16>>,
  always: bool,
  with_frame: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let with_frame = uri.query_pairs().any(|(k, _)| k == "frame");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      frame_counters: Arc::new(Mutex::new(0)),
      always,
      with_frame,
    })
  }
}

impl DirectoryRecordOutput {
  fn frame_id(&self) -> u16 {
    let mut counter = self.frame_counters.lock().unwrap_or_else(|e| e.into_inner());
    let id = counter.wrapping_add(1);
    *counter = id;
    id
  }

  fn frame_path(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.json",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn save_frame(&self, path: &Path, frame: &TensorFrame) -> Result<(), DirectoryRecordOutputError> {
    let dump = TensorDump::from(frame.clone());
    std::fs::write(path.with_extension("tensors.json"), serde_json::to_vec(&dump)?)?;
    Ok(())
  }
}

impl<R: Record> Render<TensorFrame, R> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &TensorFrame, result: &R) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }

    let path = self.frame_path(Utc::now())?;
    std::fs::write(&path, serde_json::to_vec_pretty(result)?)?;
    if self.with_frame {
      self.save_frame(&path, frame)?;
    }
    debug!("记录 {} 条结果到 {}", result.item_count(), path.display());
    Ok(())
  }
}
