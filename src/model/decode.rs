// 该文件是 Guanzhong （观众） 项目的一部分。
// src/model/decode.rs - 回归量解码与置信度
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

use crate::model::anchor::Anchor;

pub const NUM_LANDMARKS: usize = 5;
/// 置信度第 1 通道为人脸
pub const FACE_CHANNEL: usize = 1;

/// 相对先验框的回归量解码为归一化的 [x_min, y_min, x_max, y_max]
pub fn decode_box(loc: &[f32], anchor: &Anchor, variance: [f32; 2]) -> [f32; 4] {
  let cx = anchor.cx + loc[0] * variance[0] * anchor.width;
  let cy = anchor.cy + loc[1] * variance[0] * anchor.height;
  let w = anchor.width * (loc[2] * variance[1]).exp();
  let h = anchor.height * (loc[3] * variance[1]).exp();

  let x_min = cx - w / 2.0;
  let y_min = cy - h / 2.0;
  [x_min, y_min, x_min + w, y_min + h]
}

/// 5 个关键点，依次为 (x, y)
pub fn decode_landmarks(landmarks: &[f32], anchor: &Anchor, variance: [f32; 2]) -> [f32; 10] {
  let mut points = [0.0f32; 2 * NUM_LANDMARKS];
  for (point, offset) in points.chunks_exact_mut(2).zip(landmarks.chunks_exact(2)) {
    point[0] = anchor.cx + offset[0] * variance[0] * anchor.width;
    point[1] = anchor.cy + offset[1] * variance[0] * anchor.height;
  }
  points
}

/// 交替排列的 (x, y) 坐标从归一化空间缩放到像素
pub fn scale_to_pixels(coords: &mut [f32], width: f32, height: f32) {
  for pair in coords.chunks_exact_mut(2) {
    pair[0] *= width;
    pair[1] *= height;
  }
}

/// 背景/人脸两通道 softmax，减去最大值后再求指数，避免极端 logit 溢出
pub fn softmax(logits: &[f32; 2]) -> [f32; 2] {
  let max = logits[0].max(logits[1]);
  let exps = logits.map(|x| (x - max).exp());
  let sum = exps[0] + exps[1];
  exps.map(|e| e / sum)
}

pub fn face_score(conf: &[f32]) -> f32 {
  softmax(&[conf[0], conf[1]])[FACE_CHANNEL]
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  const VARIANCE: [f32; 2] = [0.1, 0.2];

  fn anchor() -> Anchor {
    Anchor { cx: 0.5, cy: 0.25, width: 0.25, height: 0.5 }
  }

  #[test]
  fn zero_offsets_give_anchor_box() {
    let b = decode_box(&[0.0; 4], &anchor(), VARIANCE);
    assert_eq!(b, [0.375, 0.0, 0.625, 0.5]);
  }

  #[test]
  fn decode_round_trip() {
    let a = anchor();
    let loc = [2.0f32, -1.0, 0.0, 1.5];
    let b = decode_box(&loc, &a, VARIANCE);

    let (w, h) = (b[2] - b[0], b[3] - b[1]);
    let (cx, cy) = (b[0] + w / 2.0, b[1] + h / 2.0);
    let recovered = [
      (cx - a.cx) / (VARIANCE[0] * a.width),
      (cy - a.cy) / (VARIANCE[0] * a.height),
      (w / a.width).ln() / VARIANCE[1],
      (h / a.height).ln() / VARIANCE[1],
    ];
    for (r, l) in recovered.iter().zip(loc) {
      assert_abs_diff_eq!(*r, l, epsilon = 1e-5);
    }
  }

  #[test]
  fn landmarks_are_anchor_relative() {
    let a = anchor();
    let offsets = [0.0f32, 0.0, 4.0, 0.0, 0.0, -2.0, 1.0, 1.0, -4.0, 2.0];
    let points = decode_landmarks(&offsets, &a, VARIANCE);
    assert_abs_diff_eq!(points[0], 0.5);
    assert_abs_diff_eq!(points[1], 0.25);
    assert_abs_diff_eq!(points[2], 0.6, epsilon = 1e-6);
    assert_abs_diff_eq!(points[5], 0.15, epsilon = 1e-6);
    assert_abs_diff_eq!(points[8], 0.4, epsilon = 1e-6);
    assert_abs_diff_eq!(points[9], 0.35, epsilon = 1e-6);
  }

  #[test]
  fn scaling_uses_width_for_x_and_height_for_y() {
    let mut coords = [0.5f32, 0.25, 1.0, 1.0];
    scale_to_pixels(&mut coords, 1280.0, 736.0);
    assert_eq!(coords, [640.0, 184.0, 1280.0, 736.0]);
  }

  #[test]
  fn softmax_is_a_distribution() {
    for logits in [[0.0f32, 0.0], [3.0, -2.0], [-50.0, 40.0], [1000.0, -1000.0], [-1e30, 1e30]] {
      let p = softmax(&logits);
      assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
      assert_abs_diff_eq!(p[0] + p[1], 1.0, epsilon = 1e-6);
    }
  }

  #[test]
  fn softmax_is_shift_invariant() {
    let base = softmax(&[0.3, 1.7]);
    for shift in [-100.0f32, -1.0, 5.0, 80.0] {
      let shifted = softmax(&[0.3 + shift, 1.7 + shift]);
      assert_abs_diff_eq!(base[1], shifted[1], epsilon = 1e-5);
    }
  }

  #[test]
  fn softmax_matches_logistic_of_difference() {
    for (bg, face) in [(0.0f32, 4.0f32), (2.5, -1.0), (-30.0, -29.0)] {
      let p = softmax(&[bg, face]);
      assert_abs_diff_eq!(p[1], 1.0 / (1.0 + (bg - face).exp()), epsilon = 1e-6);
    }
  }

  #[test]
  fn face_score_reads_channel_one() {
    assert_abs_diff_eq!(face_score(&[0.0, 0.0]), 0.5);
    assert!(face_score(&[-2.0, 2.0]) > 0.98);
  }
}
