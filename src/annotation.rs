// 该文件是 Huakuang （画框） 项目的一部分。
// src/annotation.rs - 标注集合与检测结果合并
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

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{category::CategoryRegistry, geometry::BBox, model::Detection};

pub mod store;

/// 合并时判定冲突的默认 IoU 阈值
pub const DEFAULT_MERGE_IOU: f32 = 0.5;

fn default_score() -> f32 {
  1.0
}

/// 单个标注框
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Annotation {
  pub bbox: BBox,
  pub class: String,
  #[serde(default = "default_score")]
  pub score: f32,
}

impl Annotation {
  /// 手工标注，分数为 1
  pub fn manual<S: Into<String>>(bbox: BBox, class: S) -> Self {
    Self {
      bbox,
      class: class.into(),
      score: default_score(),
    }
  }
}

impl From<Detection> for Annotation {
  fn from(d: Detection) -> Self {
    Self {
      bbox: d.bbox,
      class: d.class_label,
      score: d.confidence,
    }
  }
}

/// 一张图像的全部标注
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationSet {
  pub image_width: u32,
  pub image_height: u32,
  pub bboxes: Vec<Annotation>,
}

impl AnnotationSet {
  pub fn new(image_width: u32, image_height: u32) -> Self {
    Self {
      image_width,
      image_height,
      bboxes: Vec::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.bboxes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.bboxes.is_empty()
  }

  /// 使用某类别的标注数量
  pub fn count_class(&self, class: &str) -> usize {
    self.bboxes.iter().filter(|a| a.class == class).count()
  }

  /// 将某类别的标注全部改为另一类别，返回修改数量
  pub fn rename_class(&mut self, from: &str, to: &str) -> usize {
    let mut renamed = 0;
    for annotation in self.bboxes.iter_mut().filter(|a| a.class == from) {
      annotation.class = to.to_string();
      renamed += 1;
    }
    renamed
  }
}

/// 新框与某个已有标注同类且 IoU 严格大于阈值即视为冲突
pub fn has_conflict(candidate: &Annotation, existing: &[Annotation], iou_threshold: f32) -> bool {
  existing
    .iter()
    .any(|e| candidate.class == e.class && candidate.bbox.iou(&e.bbox) > iou_threshold)
}

/// 返回需要追加的检测结果，保持检测顺序。已有标注不受影响。
///
/// 与 NMS 不同，这里的冲突判定区分类别。
pub fn merge(detections: &[Detection], existing: &[Annotation], iou_threshold: f32) -> Vec<Annotation> {
  detections
    .iter()
    .cloned()
    .map(Annotation::from)
    .filter(|a| !has_conflict(a, existing, iou_threshold))
    .collect()
}

/// 类别注册表中不存在的类别名称，按首次出现顺序去重
pub fn unknown_classes<'a, I>(annotations: I, known: &CategoryRegistry) -> Vec<String>
where
  I: IntoIterator<Item = &'a Annotation>,
{
  let mut unknown: Vec<String> = Vec::new();
  for annotation in annotations {
    let class = annotation.class.as_str();
    if !class.is_empty() && !known.contains(class) && !unknown.iter().any(|u| u == class) {
      unknown.push(class.to_string());
    }
  }
  unknown
}

/// 遇到未登记类别时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UnknownClassPolicy {
  /// 丢弃未登记类别的检测结果
  #[default]
  Ignore,
  /// 以默认颜色登记新类别并保留检测结果
  Add,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergeReport {
  /// 实际追加的标注数量
  pub added: usize,
  /// 因与已有标注冲突而丢弃的数量
  pub conflicts: usize,
  /// 遇到的未登记类别
  pub unknown: Vec<String>,
  /// 因类别未登记而丢弃的数量
  pub dropped_unknown: usize,
}

/// 合并检测结果并按策略处理未登记类别。
///
/// 所有判定完成后才修改 `set` 与 `categories`。
pub fn apply_detections(
  set: &mut AnnotationSet,
  categories: &mut CategoryRegistry,
  detections: &[Detection],
  policy: UnknownClassPolicy,
  iou_threshold: f32,
) -> MergeReport {
  let mut additions = merge(detections, &set.bboxes, iou_threshold);
  let conflicts = detections.len() - additions.len();
  let unknown = unknown_classes(&additions, categories);

  let mut dropped_unknown = 0;
  if !unknown.is_empty() {
    match policy {
      UnknownClassPolicy::Ignore => {
        let before = additions.len();
        additions.retain(|a| categories.contains(&a.class));
        dropped_unknown = before - additions.len();
      }
      UnknownClassPolicy::Add => {
        for class in &unknown {
          categories.ensure(class);
        }
      }
    }
  }

  let report = MergeReport {
    added: additions.len(),
    conflicts,
    unknown,
    dropped_unknown,
  };
  set.bboxes.extend(additions);

  debug!(
    "合并检测结果: 追加 {}, 冲突 {}, 未登记类别 {:?}, 丢弃 {}",
    report.added, report.conflicts, report.unknown, report.dropped_unknown
  );
  report
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detection(bbox: [f32; 4], label: &str, confidence: f32) -> Detection {
    Detection {
      bbox: BBox::from(bbox),
      class_label: label.to_string(),
      confidence,
    }
  }

  fn registry(names: &[&str]) -> CategoryRegistry {
    let mut registry = CategoryRegistry::default();
    for name in names {
      registry.ensure(name);
    }
    registry
  }

  #[test]
  fn same_class_overlap_is_dropped() {
    let existing = [Annotation::manual(BBox::new(5.0, 5.0, 95.0, 95.0), "cat")];
    let new = [detection([0.0, 0.0, 100.0, 100.0], "cat", 0.95)];
    assert!(merge(&new, &existing, DEFAULT_MERGE_IOU).is_empty());
  }

  #[test]
  fn different_class_overlap_is_kept() {
    let existing = [Annotation::manual(BBox::new(5.0, 5.0, 95.0, 95.0), "cat")];
    let new = [detection([0.0, 0.0, 100.0, 100.0], "dog", 0.95)];
    let added = merge(&new, &existing, DEFAULT_MERGE_IOU);
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].class, "dog");
    assert_eq!(added[0].score, 0.95);
  }

  #[test]
  fn merge_into_empty_keeps_everything_in_order() {
    let new = [
      detection([0.0, 0.0, 10.0, 10.0], "cat", 0.9),
      detection([1.0, 1.0, 10.0, 10.0], "cat", 0.8),
      detection([50.0, 50.0, 10.0, 10.0], "dog", 0.7),
    ];
    let added = merge(&new, &[], DEFAULT_MERGE_IOU);
    let expected: Vec<Annotation> = new.iter().cloned().map(Annotation::from).collect();
    assert_eq!(added, expected);
  }

  #[test]
  fn unknown_classes_are_distinct_and_ordered() {
    let annotations = [
      Annotation::manual(BBox::new(0.0, 0.0, 1.0, 1.0), "zebra"),
      Annotation::manual(BBox::new(0.0, 0.0, 1.0, 1.0), "cat"),
      Annotation::manual(BBox::new(0.0, 0.0, 1.0, 1.0), "kite"),
      Annotation::manual(BBox::new(0.0, 0.0, 1.0, 1.0), "zebra"),
    ];
    assert_eq!(
      unknown_classes(&annotations, &registry(&["cat"])),
      vec!["zebra".to_string(), "kite".to_string()]
    );
  }

  #[test]
  fn ignore_policy_drops_unknown_detections() {
    let mut set = AnnotationSet::new(200, 200);
    set.bboxes.push(Annotation::manual(BBox::new(5.0, 5.0, 95.0, 95.0), "cat"));
    let original = set.bboxes.clone();
    let mut categories = registry(&["cat", "dog"]);

    let detections = [
      detection([0.0, 0.0, 100.0, 100.0], "cat", 0.95),
      detection([120.0, 120.0, 40.0, 40.0], "dog", 0.9),
      detection([10.0, 150.0, 30.0, 30.0], "kite", 0.8),
    ];
    let report = apply_detections(
      &mut set,
      &mut categories,
      &detections,
      UnknownClassPolicy::Ignore,
      DEFAULT_MERGE_IOU,
    );

    assert_eq!(report.added, 1);
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.unknown, vec!["kite".to_string()]);
    assert_eq!(report.dropped_unknown, 1);
    assert_eq!(set.bboxes[..1], original[..]);
    assert_eq!(set.bboxes[1].class, "dog");
    assert!(!categories.contains("kite"));
  }

  #[test]
  fn add_policy_registers_new_categories() {
    let mut set = AnnotationSet::new(200, 200);
    let mut categories = registry(&["cat"]);
    let detections = [detection([10.0, 150.0, 30.0, 30.0], "kite", 0.8)];

    let report = apply_detections(
      &mut set,
      &mut categories,
      &detections,
      UnknownClassPolicy::Add,
      DEFAULT_MERGE_IOU,
    );

    assert_eq!(report.added, 1);
    assert_eq!(report.dropped_unknown, 0);
    assert_eq!(set.len(), 1);
    assert_eq!(
      categories.get("kite").map(|c| c.color.as_str()),
      Some(crate::category::DEFAULT_COLOR)
    );
  }

  #[test]
  fn serialises_with_camel_case_keys() {
    let mut set = AnnotationSet::new(640, 480);
    set.bboxes.push(Annotation {
      bbox: BBox::new(1.0, 2.0, 3.0, 4.0),
      class: "cat".to_string(),
      score: 0.5,
    });
    let json = serde_json::to_value(&set).unwrap();
    assert_eq!(
      json,
      serde_json::json!({
        "imageWidth": 640,
        "imageHeight": 480,
        "bboxes": [{ "bbox": [1.0, 2.0, 3.0, 4.0], "class": "cat", "score": 0.5 }]
      })
    );
  }
}
