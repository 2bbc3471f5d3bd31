// 该文件是 Guanzhong （观众） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

/// 计算两个 [x_min, y_min, x_max, y_max] 边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else if a == b {
    // 面积为零的重合框视为完全重叠
    1.0
  } else {
    0.0
  }
}

/// 贪心 NMS，返回保留的下标，按保留顺序排列
///
/// 分数相同时保持原有顺序；与已保留框 IoU 不超过 `threshold` 的框才会留下。
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], threshold: f32) -> Vec<usize> {
  debug_assert_eq!(boxes.len(), scores.len());

  // 按置信度降序稳定排序
  let mut remaining: Vec<usize> = (0..boxes.len()).collect();
  remaining.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut keep = Vec::new();
  while !remaining.is_empty() {
    let best = remaining.remove(0);
    keep.push(best);
    remaining.retain(|&other| iou(&boxes[best], &boxes[other]) <= threshold);
  }

  keep
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;

  #[test]
  fn iou_of_known_boxes() {
    let a = [0.0, 0.0, 2.0, 2.0];
    assert_abs_diff_eq!(iou(&a, &a), 1.0);
    assert_abs_diff_eq!(iou(&a, &[1.0, 0.0, 3.0, 2.0]), 2.0 / 6.0, epsilon = 1e-6);
    assert_eq!(iou(&a, &[5.0, 5.0, 6.0, 6.0]), 0.0);
  }

  #[test]
  fn disjoint_intersection_never_negative() {
    // x 方向相离且 y 方向相离时两个负数相乘不能变成正面积
    let a = [0.0, 0.0, 1.0, 1.0];
    let b = [2.0, 2.0, 3.0, 3.0];
    assert_eq!(iou(&a, &b), 0.0);
  }

  #[test]
  fn overlapping_pair_keeps_higher_score() {
    let boxes = [[0.0, 0.0, 10.0, 10.0], [1.0, 1.0, 11.0, 11.0]];
    assert_eq!(nms(&boxes, &[0.8, 0.9], 0.4), vec![1]);
  }

  #[test]
  fn separated_pair_keeps_both() {
    let boxes = [[0.0, 0.0, 10.0, 10.0], [8.0, 8.0, 18.0, 18.0]];
    assert_eq!(nms(&boxes, &[0.9, 0.8], 0.4), vec![0, 1]);
  }

  #[test]
  fn iou_equal_to_threshold_is_kept() {
    // IoU = 2/6
    let boxes = [[0.0, 0.0, 2.0, 2.0], [1.0, 0.0, 3.0, 2.0]];
    let threshold = iou(&boxes[0], &boxes[1]);
    assert_eq!(nms(&boxes, &[0.9, 0.8], threshold), vec![0, 1]);
    assert_eq!(nms(&boxes, &[0.9, 0.8], threshold - 1e-3), vec![0]);
  }

  #[test]
  fn equal_scores_keep_input_order() {
    let boxes = [
      [0.0, 0.0, 1.0, 1.0],
      [10.0, 10.0, 11.0, 11.0],
      [0.0, 0.0, 1.0, 1.0],
    ];
    assert_eq!(nms(&boxes, &[0.7, 0.7, 0.7], 0.4), vec![0, 1]);
  }

  #[test]
  fn suppression_is_idempotent() {
    let boxes = [
      [0.0, 0.0, 10.0, 10.0],
      [1.0, 1.0, 11.0, 11.0],
      [20.0, 20.0, 30.0, 30.0],
      [21.0, 20.0, 31.0, 30.0],
      [50.0, 0.0, 60.0, 10.0],
    ];
    let scores = [0.6, 0.95, 0.7, 0.9, 0.3];
    let keep = nms(&boxes, &scores, 0.4);
    assert_eq!(keep, vec![1, 3, 4]);

    let kept_boxes: Vec<_> = keep.iter().map(|&i| boxes[i]).collect();
    let kept_scores: Vec<_> = keep.iter().map(|&i| scores[i]).collect();
    let again = nms(&kept_boxes, &kept_scores, 0.4);
    assert_eq!(again, (0..keep.len()).collect::<Vec<_>>());
  }

  #[test]
  fn duplicate_degenerate_boxes_are_suppressed() {
    let point = [5.0, 5.0, 5.0, 5.0];
    assert_eq!(iou(&point, &point), 1.0);
    assert_eq!(iou(&point, &[6.0, 6.0, 6.0, 6.0]), 0.0);
    assert_eq!(nms(&[point, point], &[0.9, 0.8], 0.4), vec![0]);
  }

  #[test]
  fn empty_input() {
    assert!(nms(&[], &[], 0.4).is_empty());
  }
}
