// 该文件是 Guanzhong （观众） 项目的一部分。
// src/model/retinaface.rs - RetinaFace 输出解码
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, DecoderConfig, LabelMap, ModelConfig},
  model::{
    Detection, Landmark, PostProcessor,
    anchor::{AnchorInfo, AnchorTable, StreamKind},
    decode::{NUM_LANDMARKS, decode_box, decode_landmarks, face_score, scale_to_pixels},
    nms::nms,
  },
  tensor::{RawTensor, TensorDetails, TensorError},
};

/// 单类别模型，人脸固定为类别 1
const FACE_CATEGORY_ID: u32 = 1;

#[derive(Error, Debug)]
pub enum RetinafaceError {
  #[error("配置错误: {0}")]
  Config(#[from] ConfigError),
  #[error("输出张量数量不匹配: 期望 {expected}, 实际张量 {tensors} 个, 元数据 {details} 个")]
  TensorCount {
    expected: usize,
    tensors: usize,
    details: usize,
  },
  #[error("张量 {position} ({name}) 最后一维不匹配: 期望 {expected}, 实际 {actual:?}")]
  ShapeMismatch {
    position: usize,
    name: String,
    expected: usize,
    actual: Option<usize>,
  },
  #[error("张量 {position} ({name}) 元素数量不匹配: 期望 {expected}, 实际 {actual}")]
  ElementCount {
    position: usize,
    name: String,
    expected: usize,
    actual: usize,
  },
  #[error("张量数据错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 三路反量化后的数据，按先验框顺序拼接
#[derive(Debug, Default)]
struct Streams {
  loc: Vec<f32>,
  conf: Vec<f32>,
  landmarks: Vec<f32>,
}

pub struct RetinafaceDecoder {
  config: DecoderConfig,
  anchors: AnchorTable,
}

impl RetinafaceDecoder {
  pub fn new(config: DecoderConfig) -> Result<Self, ConfigError> {
    config.validate()?;
    let anchors = AnchorTable::from_config(&config);
    info!(
      "RetinaFace 解码器: 输入 {}x{}, 步长 {:?}, 先验框 {} 个, 置信度阈值 {}, NMS 阈值 {}",
      config.input_width,
      config.input_height,
      config.steps,
      anchors.len(),
      config.confidence_threshold,
      config.nms_threshold
    );
    Ok(Self { config, anchors })
  }

  /// 从模型 JSON 配置构造，`LabelsPath` 相对于当前目录解析
  pub fn from_json_config(json: &str) -> Result<Self, RetinafaceError> {
    let model = ModelConfig::from_json_str(json)?;
    Self::from_model_config(&model, None)
  }

  fn from_model_config(model: &ModelConfig, base_dir: Option<&Path>) -> Result<Self, RetinafaceError> {
    let labels_path = model.labels_path()?;
    let labels_path = match base_dir {
      Some(dir) if labels_path.is_relative() => dir.join(labels_path),
      _ => labels_path.to_path_buf(),
    };
    let labels = LabelMap::from_path(&labels_path)?;
    let config = DecoderConfig::from_model_config(model, labels)?;
    Ok(Self::new(config)?)
  }

  pub fn config(&self) -> &DecoderConfig {
    &self.config
  }

  pub fn anchors(&self) -> &AnchorTable {
    &self.anchors
  }

  /// 反量化并按张量位置分配到框、置信度、关键点三路
  fn dequantize(
    &self,
    tensors: &[RawTensor],
    details: &[TensorDetails],
  ) -> Result<Streams, RetinafaceError> {
    let info = self.anchors.info();
    if tensors.len() != info.len() || details.len() != info.len() {
      return Err(RetinafaceError::TensorCount {
        expected: info.len(),
        tensors: tensors.len(),
        details: details.len(),
      });
    }

    let n = self.anchors.len();
    let mut streams = Streams {
      loc: Vec::with_capacity(n * StreamKind::Box.values_per_anchor()),
      conf: Vec::with_capacity(n * StreamKind::Confidence.values_per_anchor()),
      landmarks: Vec::with_capacity(n * StreamKind::Landmark.values_per_anchor()),
    };

    for (position, ((tensor, detail), meta)) in tensors.iter().zip(details).zip(info).enumerate() {
      check_tensor(position, tensor, detail, meta)?;
      trace!(
        "张量 {} ({}, {}): {:?} -> {:?}",
        position,
        detail.name,
        tensor.dtype(),
        detail.shape,
        meta.kind
      );
      let out = match meta.kind {
        StreamKind::Box => &mut streams.loc,
        StreamKind::Confidence => &mut streams.conf,
        StreamKind::Landmark => &mut streams.landmarks,
      };
      tensor.dequantize_into(detail.quantization, out);
    }

    Ok(streams)
  }

  fn format(&self, bbox: [f32; 4], score: f32, points: [f32; 10]) -> Detection {
    let landmarks = points
      .chunks_exact(2)
      .enumerate()
      .map(|(index, point)| Landmark {
        index: index as u32,
        connect: Vec::new(),
        point: [point[0], point[1]],
        score,
      })
      .collect::<Vec<_>>();
    debug_assert_eq!(landmarks.len(), NUM_LANDMARKS);

    Detection {
      bbox,
      category_id: FACE_CATEGORY_ID,
      label: self.config.labels.label_for(FACE_CATEGORY_ID),
      score,
      landmarks,
    }
  }
}

fn check_tensor(
  position: usize,
  tensor: &RawTensor,
  detail: &TensorDetails,
  meta: &AnchorInfo,
) -> Result<(), RetinafaceError> {
  if detail.last_dim() != Some(meta.last_dim) {
    return Err(RetinafaceError::ShapeMismatch {
      position,
      name: detail.name.clone(),
      expected: meta.last_dim,
      actual: detail.last_dim(),
    });
  }
  tensor.check_shape(detail)?;
  if tensor.len() != meta.expected_elements() {
    return Err(RetinafaceError::ElementCount {
      position,
      name: detail.name.clone(),
      expected: meta.expected_elements(),
      actual: tensor.len(),
    });
  }
  Ok(())
}

impl PostProcessor for RetinafaceDecoder {
  type Output = Vec<Detection>;
  type Error = RetinafaceError;

  fn forward(
    &self,
    tensors: &[RawTensor],
    details: &[TensorDetails],
  ) -> Result<Self::Output, Self::Error> {
    let streams = self.dequantize(tensors, details)?;
    let variance = self.config.variance;
    let (width, height) = (
      self.config.input_width as f32,
      self.config.input_height as f32,
    );

    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    let mut points = Vec::new();

    let candidates = self
      .anchors
      .anchors()
      .iter()
      .zip(streams.loc.chunks_exact(4))
      .zip(streams.conf.chunks_exact(2))
      .zip(streams.landmarks.chunks_exact(10));

    for (((anchor, loc), conf), landmark) in candidates {
      let score = face_score(conf);
      if score <= self.config.confidence_threshold {
        continue;
      }

      let mut bbox = decode_box(loc, anchor, variance);
      scale_to_pixels(&mut bbox, width, height);
      let mut landmark = decode_landmarks(landmark, anchor, variance);
      scale_to_pixels(&mut landmark, width, height);

      trace!("候选框: {:?}, 置信度 {:.4}", bbox, score);
      boxes.push(bbox);
      scores.push(score);
      points.push(landmark);
    }

    let keep = nms(&boxes, &scores, self.config.nms_threshold);
    debug!(
      "置信度过滤后 {} 个候选, NMS 后保留 {} 个",
      boxes.len(),
      keep.len()
    );

    Ok(
      keep
        .into_iter()
        .map(|i| self.format(boxes[i], scores[i], points[i]))
        .collect(),
    )
  }
}

/// 通过 `retinaface:///path/to/model.json` 加载
pub struct RetinafaceBuilder {
  config_path: PathBuf,
}

impl FromUrlWithScheme for RetinafaceBuilder {
  const SCHEME: &'static str = "retinaface";
}

impl FromUrl for RetinafaceBuilder {
  type Error = RetinafaceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RetinafaceError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(RetinafaceBuilder {
      config_path: PathBuf::from(url.path()),
    })
  }
}

impl RetinafaceBuilder {
  pub fn new(config_path: impl Into<PathBuf>) -> Self {
    Self {
      config_path: config_path.into(),
    }
  }

  /// 标签字典的相对路径以配置文件所在目录为基准
  pub fn build(self) -> Result<RetinafaceDecoder, RetinafaceError> {
    info!("加载模型配置: {}", self.config_path.display());
    let model = ModelConfig::from_path(&self.config_path)?;
    RetinafaceDecoder::from_model_config(&model, self.config_path.parent())
  }
}
