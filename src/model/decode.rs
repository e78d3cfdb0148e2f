// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/decode.rs - 网格输出解码
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

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  geometry::BBox,
  letterbox::LetterboxGeometry,
  model::{RawGridOutput, Scored},
};

/// 每行开头的 4 个几何值：cx, cy, w, h
const BOX_VALUES: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
  #[error("输出长度 {len} 不是行宽 {stride} 的整数倍")]
  ShapeMismatch { len: usize, stride: usize },
}

/// 解码后的候选框，坐标已映射回源图像空间
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: BBox,
  pub score: f32,
  pub class_id: usize,
}

impl Scored for Candidate {
  fn bbox(&self) -> &BBox {
    &self.bbox
  }

  fn score(&self) -> f32 {
    self.score
  }
}

/// 解码 `[4 + num_classes, rows]` 排布的输出。
///
/// 中心坐标先减去填充再除以缩放比，直接得到源图像空间的
/// `[left, top, width, height]`。只保留最高类别分数严格大于
/// `min_score` 的行，顺序与行号一致。
pub fn decode(
  output: &RawGridOutput,
  geometry: &LetterboxGeometry,
  min_score: f32,
) -> Result<Vec<Candidate>, DecodeError> {
  let stride = BOX_VALUES + output.num_classes;
  let len = output.data.len();
  if output.num_classes == 0 || len % stride != 0 {
    error!("输出形状不匹配: 长度 {}, 行宽 {}", len, stride);
    return Err(DecodeError::ShapeMismatch { len, stride });
  }

  let rows = len / stride;
  let at = |attr: usize, row: usize| output.data[attr * rows + row];
  let scale = geometry.scale as f32;
  let (pad_left, pad_top) = (geometry.pad_left as f32, geometry.pad_top as f32);

  let mut candidates = Vec::new();
  for row in 0..rows {
    let mut max_score = f32::NEG_INFINITY;
    let mut class_id = 0usize;
    for c in 0..output.num_classes {
      let score = at(BOX_VALUES + c, row);
      if score > max_score {
        max_score = score;
        class_id = c;
      }
    }

    if !(max_score > min_score) {
      continue;
    }

    let cx = at(0, row) - pad_left;
    let cy = at(1, row) - pad_top;
    let w = at(2, row);
    let h = at(3, row);

    candidates.push(Candidate {
      bbox: BBox::new(
        (cx - w / 2.0) / scale,
        (cy - h / 2.0) / scale,
        w / scale,
        h / scale,
      ),
      score: max_score,
      class_id,
    });
  }

  debug!("解码 {} 行输出, 保留 {} 个候选框", rows, candidates.len());
  Ok(candidates)
}
