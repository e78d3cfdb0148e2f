// 该文件是 Huakuang （画框） 项目的一部分。
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

//! 贪心的、与类别无关的非极大值抑制。
//!
//! 候选框按输入顺序扫描，不预先按置信度排序；一个候选框只要与任一
//! 已保留的框 IoU 严格大于阈值就被丢弃，无论两者类别是否相同。

use tracing::debug;

use crate::model::Scored;

/// 返回需要保留的候选框下标，按输入顺序排列。
///
/// 分数低于 `min_score` 的候选框直接跳过。
pub fn suppress<T: Scored>(candidates: &[T], min_score: f32, iou_threshold: f32) -> Vec<usize> {
  let mut kept: Vec<usize> = Vec::new();

  for (i, candidate) in candidates.iter().enumerate() {
    if candidate.score() < min_score {
      continue;
    }

    let overlaps = kept
      .iter()
      .any(|&k| candidate.bbox().iou(candidates[k].bbox()) > iou_threshold);

    if !overlaps {
      kept.push(i);
    }
  }

  debug!("NMS: {} 个候选框, 保留 {} 个", candidates.len(), kept.len());
  kept
}

/// 按 [`suppress`] 的结果取出保留的候选框
pub fn suppress_owned<T: Scored>(candidates: Vec<T>, min_score: f32, iou_threshold: f32) -> Vec<T> {
  let keep = suppress(&candidates, min_score, iou_threshold);
  let mut keep = keep.into_iter().peekable();
  candidates
    .into_iter()
    .enumerate()
    .filter_map(|(i, c)| {
      if keep.peek() == Some(&i) {
        keep.next();
        Some(c)
      } else {
        None
      }
    })
    .collect()
}
