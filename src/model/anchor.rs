// 该文件是 Guanzhong （观众） 项目的一部分。
// src/model/anchor.rs - 先验框生成
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

use tracing::debug;

use crate::config::DecoderConfig;

/// 归一化到 [0, 1] 的先验框 (cx, cy, w, h)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
  pub cx: f32,
  pub cy: f32,
  pub width: f32,
  pub height: f32,
}

/// 输出张量所属的数据流
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
  Box,
  Confidence,
  Landmark,
}

impl StreamKind {
  /// 每个先验框在该数据流中占用的数值个数
  pub const fn values_per_anchor(self) -> usize {
    match self {
      StreamKind::Box => 4,
      StreamKind::Confidence => 2,
      StreamKind::Landmark => 10,
    }
  }
}

/// 每个输出张量位置上期望的形状
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorInfo {
  pub step: u32,
  pub num_anchors: usize,
  pub last_dim: usize,
  pub kind: StreamKind,
}

impl AnchorInfo {
  pub fn expected_elements(&self) -> usize {
    self.num_anchors * self.kind.values_per_anchor()
  }
}

/// 先验框表及与之对应的张量布局，构造后只读
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorTable {
  anchors: Vec<Anchor>,
  info: Vec<AnchorInfo>,
}

impl AnchorTable {
  /// 按步长、行、列、尺寸的顺序生成，后续各阶段都依赖这一顺序
  pub fn generate(input_height: u32, input_width: u32, steps: &[u32], min_sizes: &[Vec<f32>]) -> Self {
    let (in_h, in_w) = (input_height as f64, input_width as f64);
    let mut anchors = Vec::new();
    let mut info = Vec::with_capacity(steps.len() * 3);

    for (&step, sizes) in steps.iter().zip(min_sizes) {
      let map_h = input_height / step;
      let map_w = input_width / step;
      let stride = step as f64;

      for i in 0..map_h {
        for j in 0..map_w {
          let cx = ((j as f64 + 0.5) * stride / in_w) as f32;
          let cy = ((i as f64 + 0.5) * stride / in_h) as f32;
          for &size in sizes {
            anchors.push(Anchor {
              cx,
              cy,
              width: (size as f64 / in_w) as f32,
              height: (size as f64 / in_h) as f32,
            });
          }
        }
      }

      let num_anchors = (map_h * map_w) as usize * sizes.len();
      debug!(
        "步长 {}: 特征图 {}x{}, 每格 {} 个先验框, 共 {} 个",
        step,
        map_w,
        map_h,
        sizes.len(),
        num_anchors
      );
      for kind in [StreamKind::Box, StreamKind::Confidence, StreamKind::Landmark] {
        info.push(AnchorInfo {
          step,
          num_anchors,
          last_dim: kind.values_per_anchor() * sizes.len(),
          kind,
        });
      }
    }

    Self { anchors, info }
  }

  pub fn from_config(config: &DecoderConfig) -> Self {
    Self::generate(
      config.input_height,
      config.input_width,
      &config.steps,
      &config.min_sizes,
    )
  }

  pub fn anchors(&self) -> &[Anchor] {
    &self.anchors
  }

  pub fn info(&self) -> &[AnchorInfo] {
    &self.info
  }

  pub fn len(&self) -> usize {
    self.anchors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.anchors.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn generation_is_deterministic() {
    let steps = [8, 16, 32];
    let sizes = vec![vec![16.0, 32.0], vec![64.0, 128.0], vec![256.0, 512.0]];
    let a = AnchorTable::generate(736, 1280, &steps, &sizes);
    let b = AnchorTable::generate(736, 1280, &steps, &sizes);
    assert_eq!(a, b);
    assert_eq!(a.len(), (92 * 160 + 46 * 80 + 23 * 40) * 2);
  }

  #[test]
  fn order_is_rows_then_columns_then_sizes() {
    let table = AnchorTable::generate(32, 64, &[16], &[vec![8.0, 16.0]]);
    let anchors = table.anchors();
    assert_eq!(anchors.len(), 2 * 4 * 2);

    assert_eq!(
      anchors[0],
      Anchor { cx: 0.125, cy: 0.25, width: 0.125, height: 0.25 }
    );
    assert_eq!(
      anchors[1],
      Anchor { cx: 0.125, cy: 0.25, width: 0.25, height: 0.5 }
    );
    // 第一行第二列
    assert_eq!(anchors[2].cx, 0.375);
    assert_eq!(anchors[2].cy, 0.25);
    // 第二行第一列
    assert_eq!(anchors[8].cx, 0.125);
    assert_eq!(anchors[8].cy, 0.75);
  }

  #[test]
  fn info_follows_box_conf_landmark_per_step() {
    let table = AnchorTable::generate(64, 64, &[8, 16], &[vec![8.0, 16.0], vec![32.0]]);
    let kinds: Vec<_> = table.info().iter().map(|i| (i.step, i.kind, i.last_dim)).collect();
    assert_eq!(
      kinds,
      vec![
        (8, StreamKind::Box, 8),
        (8, StreamKind::Confidence, 4),
        (8, StreamKind::Landmark, 20),
        (16, StreamKind::Box, 4),
        (16, StreamKind::Confidence, 2),
        (16, StreamKind::Landmark, 10),
      ]
    );
    assert_eq!(table.info()[0].num_anchors, 8 * 8 * 2);
    assert_eq!(table.info()[4].expected_elements(), 4 * 4 * 2);

    let box_total: usize = table
      .info()
      .iter()
      .filter(|i| i.kind == StreamKind::Box)
      .map(|i| i.num_anchors)
      .sum();
    assert_eq!(box_total, table.len());
  }
}
