// 该文件是 Huakuang （画框） 项目的一部分。
// src/annotation/store.rs - 标注文件读写
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

//! 标注保存在图像所在目录的 `.annotations` 子目录下，每张图像一个 JSON 文件。
//!
//! 读取时同时接受带外层对象的格式与早期的裸数组格式，写入时总是输出前者。

use std::{
  fs, io,
  path::{Path, PathBuf},
};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  annotation::{Annotation, AnnotationSet},
  geometry::BBox,
  input::is_image_path,
};

pub const ANNOTATION_DIR: &str = ".annotations";

#[derive(Error, Debug)]
pub enum StoreError {
  #[error("无效的图像路径: {0}")]
  InvalidPath(PathBuf),
  #[error("读写标注文件失败: {0}")]
  IoError(#[from] io::Error),
  #[error("标注文件格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredAnnotations {
  Wrapped {
    #[serde(rename = "imageWidth", default)]
    image_width: Option<u32>,
    #[serde(rename = "imageHeight", default)]
    image_height: Option<u32>,
    bboxes: Vec<Value>,
  },
  Legacy(Vec<Value>),
}

/// `<dir>/.annotations/<stem>.json`，非图像扩展名时保留完整文件名
pub fn annotation_path(image_path: &Path) -> Result<PathBuf, StoreError> {
  let file_name = image_path
    .file_name()
    .ok_or_else(|| StoreError::InvalidPath(image_path.to_path_buf()))?;
  let dir = image_path.parent().unwrap_or_else(|| Path::new(""));

  let base = match image_path.file_stem() {
    Some(stem) if is_image_path(image_path) => stem,
    _ => file_name,
  };
  let mut name = base.to_os_string();
  name.push(".json");

  Ok(dir.join(ANNOTATION_DIR).join(name))
}

/// 只要求 `bbox` 为 4 元素数组且 `class` 非空。
///
/// 非数值坐标读作 NaN，写回时仍为 `null`；缺失、为 `null` 或非数值的置信度视为 1。
fn parse_entry(entry: &Value) -> Option<Annotation> {
  let class = entry.get("class")?.as_str()?;
  if class.is_empty() {
    return None;
  }
  let coords = entry.get("bbox")?.as_array()?;
  if coords.len() != 4 {
    return None;
  }
  let mut bbox = [f32::NAN; 4];
  for (slot, value) in bbox.iter_mut().zip(coords) {
    if let Some(v) = value.as_f64() {
      *slot = v as f32;
    }
  }
  let score = entry
    .get("score")
    .and_then(Value::as_f64)
    .map_or(1.0, |v| v as f32);

  Some(Annotation {
    bbox: BBox::from(bbox),
    class: class.to_string(),
    score,
  })
}

/// 解析标注文件内容，丢弃无法识别的条目
pub fn parse(text: &str, image_width: u32, image_height: u32) -> Result<AnnotationSet, StoreError> {
  let (width, height, entries) = match serde_json::from_str::<StoredAnnotations>(text)? {
    StoredAnnotations::Wrapped {
      image_width: w,
      image_height: h,
      bboxes,
    } => (w.unwrap_or(image_width), h.unwrap_or(image_height), bboxes),
    StoredAnnotations::Legacy(bboxes) => (image_width, image_height, bboxes),
  };

  let total = entries.len();
  let bboxes: Vec<Annotation> = entries
    .iter()
    .filter_map(parse_entry)
    .collect();
  if bboxes.len() != total {
    warn!("忽略 {} 个无效标注", total - bboxes.len());
  }

  Ok(AnnotationSet {
    image_width: width,
    image_height: height,
    bboxes,
  })
}

/// 读取图像对应的标注；文件不存在时返回空集合
pub fn load(image_path: &Path, image_width: u32, image_height: u32) -> Result<AnnotationSet, StoreError> {
  let path = annotation_path(image_path)?;
  let text = match fs::read_to_string(&path) {
    Ok(text) => text,
    Err(e) if e.kind() == io::ErrorKind::NotFound => {
      debug!("标注文件不存在: {}", path.display());
      return Ok(AnnotationSet::new(image_width, image_height));
    }
    Err(e) => return Err(e.into()),
  };

  let set = parse(&text, image_width, image_height)?;
  debug!("读取 {} 个标注: {}", set.len(), path.display());
  Ok(set)
}

/// 写入图像对应的标注，返回标注文件路径
pub fn save(image_path: &Path, set: &AnnotationSet) -> Result<PathBuf, StoreError> {
  let path = annotation_path(image_path)?;
  if let Some(dir) = path.parent() {
    fs::create_dir_all(dir)?;
  }

  let json = serde_json::to_string_pretty(set)?;
  fs::write(&path, json)?;
  info!("保存 {} 个标注: {}", set.len(), path.display());
  Ok(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::geometry::BBox;

  #[test]
  fn path_uses_stem_for_images() {
    assert_eq!(
      annotation_path(Path::new("/data/a/cat.JPG")).unwrap(),
      Path::new("/data/a/.annotations/cat.json")
    );
    assert_eq!(
      annotation_path(Path::new("/data/a/scan.tiff")).unwrap(),
      Path::new("/data/a/.annotations/scan.tiff.json")
    );
    assert!(annotation_path(Path::new("/")).is_err());
  }

  #[test]
  fn reads_wrapped_format() {
    let text = r#"{
      "imageWidth": 640,
      "imageHeight": 480,
      "bboxes": [
        { "bbox": [1, 2, 3, 4], "class": "cat", "score": 0.5 },
        { "bbox": [5, 6, 7, 8], "class": "dog" }
      ]
    }"#;
    let set = parse(text, 0, 0).unwrap();
    assert_eq!((set.image_width, set.image_height), (640, 480));
    assert_eq!(set.bboxes[0].bbox, BBox::new(1.0, 2.0, 3.0, 4.0));
    assert_eq!(set.bboxes[0].score, 0.5);
    assert_eq!(set.bboxes[1].score, 1.0);
  }

  #[test]
  fn reads_legacy_bare_array() {
    let text = r#"[{ "bbox": [1, 2, 3, 4], "class": "cat", "score": 0.9 }]"#;
    let set = parse(text, 100, 50).unwrap();
    assert_eq!((set.image_width, set.image_height), (100, 50));
    assert_eq!(set.bboxes.len(), 1);
    assert_eq!(set.bboxes[0].class, "cat");
  }

  #[test]
  fn drops_malformed_entries() {
    let text = r#"[
      { "bbox": [1, 2, 3], "class": "cat" },
      { "bbox": [1, 2, 3, 4], "class": "" },
      { "bbox": [1, 2, 3, 4] },
      { "bbox": [1, 2, 3, 4], "class": "dog" }
    ]"#;
    let set = parse(text, 10, 10).unwrap();
    assert_eq!(set.bboxes.len(), 1);
    assert_eq!(set.bboxes[0].class, "dog");
  }

  #[test]
  fn rejects_non_annotation_json() {
    assert!(matches!(parse("42", 1, 1), Err(StoreError::JsonError(_))));
  }

  #[test]
  fn missing_file_is_an_empty_set() {
    let dir = tempfile::tempdir().unwrap();
    let set = load(&dir.path().join("cat.png"), 320, 240).unwrap();
    assert_eq!(set, AnnotationSet::new(320, 240));
  }

  #[test]
  fn save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("cat.png");
    let mut set = AnnotationSet::new(320, 240);
    set.bboxes.push(Annotation::manual(BBox::new(10.0, 20.0, 30.0, 40.0), "cat"));

    let path = save(&image, &set).unwrap();
    assert_eq!(path, dir.path().join(".annotations").join("cat.json"));
    assert_eq!(load(&image, 0, 0).unwrap(), set);
  }

  #[test]
  fn keeps_entries_with_null_fields() {
    let text = r#"{
      "imageWidth": 10,
      "imageHeight": 10,
      "bboxes": [
        { "bbox": [1, 2, null, 4], "class": "cat", "score": 0.7 },
        { "bbox": [1, 2, 3, 4], "class": "dog", "score": null },
        { "bbox": [5, 5, 2, 2], "class": "kite", "score": "high" }
      ]
    }"#;
    let set = parse(text, 0, 0).unwrap();
    assert_eq!(set.len(), 3);
    assert!(set.bboxes[0].bbox.width.is_nan());
    assert_eq!(set.bboxes[0].bbox.height, 4.0);
    assert_eq!(set.bboxes[0].score, 0.7);
    assert_eq!(set.bboxes[1].score, 1.0);
    assert_eq!(set.bboxes[2].score, 1.0);
  }

  #[test]
  fn null_coordinates_survive_a_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("cat.png");
    let path = annotation_path(&image).unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, r#"[{ "bbox": [1, 2, null, 4], "class": "cat" }]"#).unwrap();

    let set = load(&image, 10, 10).unwrap();
    save(&image, &set).unwrap();

    let written: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["bboxes"][0]["bbox"], serde_json::json!([1.0, 2.0, null, 4.0]));
    assert_eq!(written["bboxes"][0]["class"], "cat");
  }
}
