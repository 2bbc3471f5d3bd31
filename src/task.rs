// 该文件是 Guanzhong （观众） 项目的一部分。
// src/task.rs - 后处理任务
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

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::{
  model::{PostProcessor, Record},
  output::Render,
  tensor::TensorFrame,
};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 对每一帧执行一次后处理并输出
#[derive(Default, Debug)]
pub struct OneShotTask {
  frame_number: Option<usize>,
}

impl OneShotTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  D: Record,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = TensorFrame>,
  M: PostProcessor<Output = D, Error = ME>,
  O: Render<TensorFrame, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let mut frame_index = 0;
    for frame in input {
      frame_index += 1;
      let now = Instant::now();
      let result = model.process(&frame)?;
      let elapsed = now.elapsed();
      info!(
        "第 {} 帧后处理完成，{} 条结果，耗时: {:.2?}",
        frame_index,
        result.item_count(),
        elapsed
      );
      output.render_result(&frame, &result)?;
      if self.frame_number.map(|n| frame_index >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
    }

    if frame_index == 0 {
      return Err(anyhow::anyhow!("没有输入帧"));
    }
    info!("任务完成，共 {} 帧", frame_index);
    Ok(())
  }
}

/// 对第一帧重复后处理，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat_times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { repeat_times: 1000 }
  }
}

impl RepeatShotTask {
  /// 前两次视为预热，不计入平均值
  const WARMUP: usize = 2;

  pub fn with_repeat_times(mut self, repeat_times: usize) -> Self {
    self.repeat_times = repeat_times;
    self
  }
}

impl<
  D: Record,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = TensorFrame>,
  M: PostProcessor<Output = D, Error = ME>,
  O: Render<TensorFrame, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始后处理...");
    let mut times = Vec::with_capacity(self.repeat_times);
    let mut last = None;
    for i in 0..self.repeat_times {
      let now = Instant::now();
      let result = model.process(&frame)?;
      let elapsed = now.elapsed();
      info!("({})后处理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      last = Some(result);
    }

    if let Some(result) = last {
      output.render_result(&frame, &result)?;
    }

    if times.len() > Self::WARMUP {
      warn!(
        "平均后处理时间: {:.2?}",
        times.iter().skip(Self::WARMUP).sum::<Duration>() / (times.len() - Self::WARMUP) as u32
      );
    } else {
      warn!("重复次数不足 {} 次，不统计平均时间", Self::WARMUP + 1);
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;

  use super::*;
  use crate::tensor::{RawTensor, TensorDetails};

  struct CountingModel;

  #[derive(Debug, thiserror::Error)]
  #[error("never")]
  struct Never;

  impl PostProcessor for CountingModel {
    type Output = Vec<usize>;
    type Error = Never;

    fn forward(
      &self,
      tensors: &[RawTensor],
      _details: &[TensorDetails],
    ) -> Result<Self::Output, Self::Error> {
      Ok(vec![tensors.len()])
    }
  }

  impl Record for Vec<usize> {
    fn item_count(&self) -> usize {
      self.len()
    }
  }

  #[derive(Default)]
  struct Collect(RefCell<Vec<Vec<usize>>>);

  impl Render<TensorFrame, Vec<usize>> for &Collect {
    type Error = Never;

    fn render_result(&self, _frame: &TensorFrame, result: &Vec<usize>) -> Result<(), Self::Error> {
      self.0.borrow_mut().push(result.clone());
      Ok(())
    }
  }

  fn frames(n: usize) -> Vec<TensorFrame> {
    (0..n)
      .map(|i| TensorFrame {
        tensors: vec![RawTensor::from(vec![0u8]); i],
        details: Vec::new(),
      })
      .collect()
  }

  #[test]
  fn one_shot_renders_every_frame() {
    let sink = Collect::default();
    OneShotTask::default()
      .run_task(frames(3).into_iter(), CountingModel, &sink)
      .unwrap();
    assert_eq!(sink.0.into_inner(), vec![vec![0], vec![1], vec![2]]);
  }

  #[test]
  fn one_shot_stops_at_frame_number() {
    let sink = Collect::default();
    OneShotTask::default()
      .with_frame_number(Some(2))
      .run_task(frames(5).into_iter(), CountingModel, &sink)
      .unwrap();
    assert_eq!(sink.0.into_inner().len(), 2);
  }

  #[test]
  fn empty_input_is_an_error() {
    let sink = Collect::default();
    assert!(
      OneShotTask::default()
        .run_task(frames(0).into_iter(), CountingModel, &sink)
        .is_err()
    );
  }

  #[test]
  fn repeat_shot_renders_last_result_once() {
    let sink = Collect::default();
    RepeatShotTask::default()
      .with_repeat_times(5)
      .run_task(frames(2).into_iter(), CountingModel, &sink)
      .unwrap();
    assert_eq!(sink.0.into_inner(), vec![vec![0]]);
  }
}
