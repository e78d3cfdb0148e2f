// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/postprocess.rs - 检测结果后处理
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

use crate::{
  geometry::BBox,
  letterbox::LetterboxGeometry,
  model::{BoxUnits, Detection, PreDecodedOutput, decode::Candidate, nms},
};

/// 丢弃越界或退化的检测框。坐标在此处才向下取整。
pub fn bounds_filter(
  detections: Vec<Detection>,
  source_width: u32,
  source_height: u32,
) -> Vec<Detection> {
  let before = detections.len();
  let kept: Vec<Detection> = detections
    .into_iter()
    .map(|d| Detection {
      bbox: d.bbox.floor(),
      ..d
    })
    .filter(|d| {
      d.bbox
        .fits_within(source_width as f32, source_height as f32)
    })
    .collect();

  debug!("越界过滤: {} -> {}", before, kept.len());
  kept
}

/// 为解码后的候选框附上类别名称
pub fn label_candidates<S: AsRef<str>>(candidates: Vec<Candidate>, labels: &[S]) -> Vec<Detection> {
  candidates
    .into_iter()
    .map(|c| Detection {
      bbox: c.bbox,
      class_label: labels
        .get(c.class_id)
        .map(|l| l.as_ref().to_string())
        .unwrap_or_else(|| format!("class_{}", c.class_id)),
      confidence: c.score,
    })
    .collect()
}

/// 将预解码输出从模型输入空间映射回源图像空间
pub fn denormalize(output: PreDecodedOutput, geometry: &LetterboxGeometry) -> Vec<Detection> {
  let units = match output.units {
    BoxUnits::Normalized => geometry.target_size as f64,
    BoxUnits::Absolute => 1.0,
  };

  output
    .items
    .into_iter()
    .map(|item| {
      let [x, y, w, h] = item.bbox.map(|v| v as f64 * units);
      let (left, top) = geometry.to_source(x, y);
      Detection {
        bbox: BBox::new(
          left as f32,
          top as f32,
          (w / geometry.scale) as f32,
          (h / geometry.scale) as f32,
        ),
        class_label: item.class_label,
        confidence: item.score,
      }
    })
    .collect()
}

/// 两类检测器共用的后处理：NMS -> 取整 -> 越界过滤
pub fn finalize(
  candidates: Vec<Detection>,
  geometry: &LetterboxGeometry,
  min_score: f32,
  iou_threshold: f32,
) -> Vec<Detection> {
  let kept = nms::suppress_owned(candidates, min_score, iou_threshold);
  bounds_filter(kept, geometry.source_width, geometry.source_height)
}
