// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/yolo.rs - YOLO 网格输出检测器
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
    coco_labels,
    decode::decode,
    labels_from_url,
    postprocess::{finalize, label_candidates},
  },
  url_path,
};

pub const YOLO_INPUT_SIZE: u32 = 640;

pub struct YoloDetectorBuilder {
  model_path: PathBuf,
  config: DetectorConfig,
  labels: Vec<String>,
}

impl FromUrlWithScheme for YoloDetectorBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloDetectorBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let config =
      DetectorConfig::with_target_size(YOLO_INPUT_SIZE).override_from_url(url)?;
    let labels = labels_from_url(url)?;

    Ok(Self {
      model_path: url_path(url),
      config,
      labels,
    })
  }
}

impl YoloDetectorBuilder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      config: DetectorConfig::with_target_size(YOLO_INPUT_SIZE),
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

  /// 构造尚未加载推理引擎的检测器
  pub fn build<E>(self) -> YoloDetector<E> {
    debug!(
      "YOLO 检测器: {}, 输入 {}, 阈值 {}/{}, {} 个类别",
      self.model_path.display(),
      self.config.target_size,
      self.config.min_score,
      self.config.iou_threshold,
      self.labels.len()
    );
    YoloDetector {
      model_path: self.model_path,
      config: self.config,
      labels: self.labels,
      engine: None,
    }
  }
}

/// 输出 `[1, 4 + num_classes, rows]` 网格的检测器
pub struct YoloDetector<E> {
  model_path: PathBuf,
  config: DetectorConfig,
  labels: Vec<String>,
  engine: Option<E>,
}

impl<E> YoloDetector<E> {
  pub fn with_engine(mut self, engine: E) -> Self {
    self.engine = Some(engine);
    self
  }

  pub fn set_engine(&mut self, engine: E) {
    info!("YOLO 模型已就绪: {}", self.model_path.display());
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

impl<E: InferenceEngine> Model for YoloDetector<E> {
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
    let tensor = pack(image, &geometry, PackOptions::yolo());

    debug!("执行 YOLO 推理");
    let output = match engine.run(&tensor)? {
      RawOutput::Grid(grid) => grid,
      other => {
        error!("YOLO 模型返回了 {} 输出", other.kind());
        return Err(ModelError::Inference(InferenceError(format!(
          "期望网格输出, 实际为 {}",
          other.kind()
        ))));
      }
    };

    let candidates = decode(&output, &geometry, self.config.min_score)?;
    let detections = label_candidates(candidates, &self.labels);
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
    model::{BoxUnits, PreDecodedOutput, RawGridOutput},
  };
  use image::{Rgba, RgbaImage};

  type Engine = fn(&PackedTensor) -> Result<RawOutput, InferenceError>;

  fn image(width: u32, height: u32) -> DecodedImage {
    DecodedImage::from(RgbaImage::from_pixel(width, height, Rgba([90, 90, 90, 255])))
  }

  /// 三行两类：两只重叠的狗和一个越界的框
  fn dogs(input: &PackedTensor) -> Result<RawOutput, InferenceError> {
    assert_eq!(input.shape(), vec![1, 3, 640, 640]);
    assert_eq!(input.layout(), TensorLayout::Nchw);
    let rows = [
      // 源图像 (10, 10, 50, 50) -> 模型空间中心 (17.5, 177.5), 尺寸 25x25
      [17.5, 177.5, 25.0, 25.0, 0.1, 0.9],
      [18.0, 178.0, 24.0, 24.0, 0.2, 0.8],
      [2.0, 300.0, 20.0, 20.0, 0.95, 0.0],
    ];
    let mut data = vec![0.0f32; 18];
    for (r, row) in rows.iter().enumerate() {
      for (a, v) in row.iter().enumerate() {
        data[a * 3 + r] = *v;
      }
    }
    Ok(RawOutput::Grid(RawGridOutput {
      data,
      num_classes: 2,
    }))
  }

  fn detector(engine: Engine) -> YoloDetector<Engine> {
    YoloDetectorBuilder::new("models/yolov8n.onnx")
      .labels(["cat", "dog"])
      .build()
      .with_engine(engine)
  }

  #[test]
  fn detects_and_suppresses() {
    let detections = detector(dogs).infer(&image(1280, 640)).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_label, "dog");
    assert_eq!(detections[0].bbox, BBox::new(10.0, 10.0, 50.0, 50.0));
  }

  #[test]
  fn uninitialized_model_is_reported() {
    let detector: YoloDetector<Engine> = YoloDetectorBuilder::new("models/yolov8n.onnx").build();
    assert!(!detector.is_initialized());
    assert!(matches!(
      detector.infer(&image(10, 10)),
      Err(ModelError::Uninitialized(_))
    ));
  }

  #[test]
  fn wrong_output_kind_is_an_inference_failure() {
    fn ssd_like(_: &PackedTensor) -> Result<RawOutput, InferenceError> {
      Ok(RawOutput::PreDecoded(PreDecodedOutput {
        items: Vec::new(),
        units: BoxUnits::Normalized,
      }))
    }
    assert!(matches!(
      detector(ssd_like).infer(&image(10, 10)),
      Err(ModelError::Inference(_))
    ));
  }

  #[test]
  fn engine_errors_propagate() {
    fn broken(_: &PackedTensor) -> Result<RawOutput, InferenceError> {
      Err(InferenceError("设备忙".to_string()))
    }
    assert!(matches!(
      detector(broken).infer(&image(10, 10)),
      Err(ModelError::Inference(InferenceError(msg))) if msg == "设备忙"
    ));
  }

  #[test]
  fn ragged_output_is_a_decode_error() {
    fn ragged(_: &PackedTensor) -> Result<RawOutput, InferenceError> {
      Ok(RawOutput::Grid(RawGridOutput {
        data: vec![0.0; 7],
        num_classes: 2,
      }))
    }
    assert!(matches!(
      detector(ragged).infer(&image(10, 10)),
      Err(ModelError::Decode(_))
    ));
  }

  #[test]
  fn empty_image_is_invalid_geometry() {
    assert!(matches!(
      detector(dogs).infer(&image(0, 0)),
      Err(ModelError::Geometry(_))
    ));
  }

  #[test]
  fn builder_reads_url_parameters() {
    let url = Url::parse("yolo:///models/yolo11n.onnx?size=320&score=0.4&iou=0.6").unwrap();
    let detector: YoloDetector<Engine> = YoloDetectorBuilder::from_url(&url).unwrap().build();
    assert_eq!(detector.model_path(), Path::new("/models/yolo11n.onnx"));
    assert_eq!(detector.config().target_size, 320);
    assert_eq!(detector.config().min_score, 0.4);
    assert_eq!(detector.config().iou_threshold, 0.6);
    assert_eq!(detector.labels().len(), 80);
  }

  #[test]
  fn builder_reads_label_file() {
    let dir = tempfile::tempdir().unwrap();
    let labels = dir.path().join("labels.txt");
    std::fs::write(&labels, "apple\n\n  pear \n").unwrap();
    let mut url = Url::parse("yolo:///m.onnx").unwrap();
    url.query_pairs_mut().append_pair("labels", &labels.to_string_lossy());

    let detector: YoloDetector<Engine> = YoloDetectorBuilder::from_url(&url).unwrap().build();
    assert_eq!(detector.labels(), ["apple", "pear"]);
  }

  #[test]
  fn builder_rejects_other_schemes() {
    let url = Url::parse("ssd:///m.onnx").unwrap();
    assert!(YoloDetectorBuilder::from_url(&url).is_err());
  }
}
