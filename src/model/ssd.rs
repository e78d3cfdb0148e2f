// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/ssd.rs - SSD 预解码输出检测器
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

use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{PackOptions, pack},
  input::DecodedImage,
  letterbox::LetterboxGeometry,
  model::{
    Detection, DetectorConfig, InferenceEngine, InferenceError, Model, ModelError, RawOutput,
    coco_labels, labels_from_url,
    postprocess::{denormalize, finalize},
  },
  url_path,
};

pub const SSD_INPUT_SIZE: u32 = 300;

pub struct SsdDetectorBuilder {
  model_path: PathBuf,
  config: DetectorConfig,
  labels: Vec<String>,
}

impl FromUrlWithScheme for SsdDetectorBuilder {
  const SCHEME: &'static str = "ssd";
}

impl FromUrl for SsdDetectorBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    Ok(Self {
      model_path: url_path(url),
      config: DetectorConfig::with_target_size(SSD_INPUT_SIZE).override_from_url(url)?,
      labels: labels_from_url(url)?,
    })
  }
}

impl SsdDetectorBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      config: DetectorConfig::with_target_size(SSD_INPUT_SIZE),
      labels: coco_labels(),
    }
  }

  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
    self.labels = labels.into_iter().map(Into::into).collect();
    self
  }

  pub fn build<E>(self) -> SsdDetector<E> {
    SsdDetector {
      model_path: self.model_path,
      config: self.config,
      labels: self.labels,
      engine: None,
    }
  }
}

/// 模型自身输出 `{box, class, score}` 的检测器，只需反归一化与过滤。
///
/// 类别名称由推理引擎在输出中给出，`labels` 仅供加载引擎时使用。
pub struct SsdDetector<E> {
  model_path: PathBuf,
  config: DetectorConfig,
  labels: Vec<String>,
  engine: Option<E>,
}

impl<E> SsdDetector<E> {
  pub fn with_engine(mut self, engine: E) -> Self {
    self.engine = Some(engine);
    self
  }

  pub fn set_engine(&mut self, engine: E) {
    info!("SSD 模型已就绪: {}", self.model_path.display());
    self.engine = Some(engine);
  }

  pub fn is_initialized(&self) -> bool {
    self.engine.is_some()
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }
}

impl<E: InferenceEngine> Model for SsdDetector<E> {
  type Input = DecodedImage;
  type Output = Vec<Detection>;
  type Error = ModelError;

  fn infer(&self, image: &Self::Input) -> Result<Self::Output, Self::Error> {
    let engine = self
      .engine
      .as_ref()
      .ok_or_else(|| ModelError::Uninitialized(self.model_path.display().to_string()))?;

    let geometry = LetterboxGeometry::compute(
      image.width() as i64,
      image.height() as i64,
      self.config.target_size as i64,
    )?;
    let tensor = pack(image, &geometry, PackOptions::ssd());

    debug!("执行 SSD 推理");
    let output = match engine.run(&tensor)? {
      RawOutput::PreDecoded(output) => output,
      other => {
        error!("SSD 模型返回了 {} 输出", other.kind());
        return Err(ModelError::Inference(InferenceError(format!(
          "期望预解码输出, 实际为 {}",
          other.kind()
        ))));
      }
    };

    let detections = denormalize(output, &geometry);
    let detections = finalize(
      detections,
      &geometry,
      self.config.min_score,
      self.config.iou_threshold,
    );

    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    frame::{PackedTensor, TensorLayout},
    geometry::BBox,
    model::{BoxUnits, PreDecodedItem, PreDecodedOutput},
  };
  use image::{Rgba, RgbaImage};

  type Engine = fn(&PackedTensor) -> Result<RawOutput, InferenceError>;

  fn item(bbox: [f32; 4], label: &str, score: f32) -> PreDecodedItem {
    PreDecodedItem {
      bbox,
      class_label: label.to_string(),
      score,
    }
  }

  fn people(input: &PackedTensor) -> Result<RawOutput, InferenceError> {
    assert_eq!(input.shape(), vec![300, 300, 3]);
    assert_eq!(input.layout(), TensorLayout::Nhwc);
    // 原始像素值，未归一化
    assert_eq!(input.get(150, 150, 0), 90.0);
    // 600x300 -> 300: 缩放 0.5, 上下各填充 75
    Ok(RawOutput::PreDecoded(PreDecodedOutput {
      items: vec![
        item([0.1, 0.3, 0.2, 0.1], "person", 0.8),
        item([0.1, 0.3, 0.2, 0.1], "dog", 0.7),
        item([0.5, 0.0, 0.2, 0.2], "kite", 0.9),
        item([0.7, 0.5, 0.1, 0.1], "cup", 0.1),
      ],
      units: BoxUnits::Normalized,
    }))
  }

  #[test]
  fn maps_pre_decoded_boxes_back_to_source() {
    let image = DecodedImage::from(RgbaImage::from_pixel(600, 300, Rgba([90, 90, 90, 255])));
    let detector: SsdDetector<Engine> = SsdDetectorBuilder::new("ssd.onnx").build().with_engine(people);
    let detections = detector.infer(&image).unwrap();

    // dog 被同位置的 person 压制，kite 位于填充区越界，cup 分数过低
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_label, "person");
    assert_eq!(detections[0].bbox, BBox::new(60.0, 30.0, 120.0, 60.0));
  }

  #[test]
  fn grid_output_is_rejected() {
    fn grid(_: &PackedTensor) -> Result<RawOutput, InferenceError> {
      Ok(RawOutput::Grid(crate::model::RawGridOutput {
        data: Vec::new(),
        num_classes: 1,
      }))
    }
    let image = DecodedImage::from(RgbaImage::new(4, 4));
    let detector: SsdDetector<Engine> = SsdDetectorBuilder::new("ssd.onnx").build().with_engine(grid);
    assert!(matches!(detector.infer(&image), Err(ModelError::Inference(_))));
  }

  #[test]
  fn uninitialized_model_is_reported() {
    let image = DecodedImage::from(RgbaImage::new(4, 4));
    let detector: SsdDetector<Engine> = SsdDetectorBuilder::new("ssd.onnx").build();
    assert!(matches!(
      detector.infer(&image),
      Err(ModelError::Uninitialized(_))
    ));
  }

  #[test]
  fn builder_defaults() {
    let url = Url::parse("ssd:///models/coco-ssd.onnx").unwrap();
    let detector: SsdDetector<Engine> = SsdDetectorBuilder::from_url(&url).unwrap().build();
    assert_eq!(detector.config().target_size, 300);
    assert_eq!(detector.config().min_score, 0.3);
    assert_eq!(detector.config().iou_threshold, 0.5);
  }
}
