// 该文件是 Huakuang （画框） 项目的一部分。
// src/model.rs - 检测模型
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

use crate::{
  frame::PackedTensor, geometry::BBox, input::DecodedImage, letterbox::LetterboxError,
};

pub mod decode;
pub mod nms;
pub mod postprocess;
pub mod registry;

mod ssd;
mod yolo;
pub use self::ssd::{SsdDetector, SsdDetectorBuilder};
pub use self::yolo::{YoloDetector, YoloDetectorBuilder};

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{DetectorWrapper, OnnxEngine};

/// 默认置信度阈值
pub const DEFAULT_MIN_SCORE: f32 = 0.3;
/// 默认 NMS IoU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// COCO 数据集类别名称
pub const COCO_LABELS: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

/// 可放入模型注册表的检测器
pub type DynDetector =
  Box<dyn Model<Input = DecodedImage, Output = Vec<Detection>, Error = ModelError> + Send>;

/// 检测结果，坐标位于源图像空间
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: BBox,
  pub class_label: String,
  pub confidence: f32,
}

/// 可参与非极大值抑制的候选框
pub trait Scored {
  fn bbox(&self) -> &BBox;
  fn score(&self) -> f32;
}

impl Scored for Detection {
  fn bbox(&self) -> &BBox {
    &self.bbox
  }

  fn score(&self) -> f32 {
    self.confidence
  }
}

/// 预解码输出中框坐标的单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxUnits {
  /// 相对模型输入的 0..1 坐标
  Normalized,
  /// 模型输入空间的像素坐标
  Absolute,
}

/// 固定网格检测器的原始输出，按 `[4 + num_classes, rows]` 存放
#[derive(Debug, Clone, PartialEq)]
pub struct RawGridOutput {
  pub data: Vec<f32>,
  pub num_classes: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreDecodedItem {
  /// 模型输入空间中的 `[left, top, width, height]`
  pub bbox: [f32; 4],
  pub class_label: String,
  pub score: f32,
}

/// 已由模型自身完成解码的输出
#[derive(Debug, Clone, PartialEq)]
pub struct PreDecodedOutput {
  pub items: Vec<PreDecodedItem>,
  pub units: BoxUnits,
}

/// 推理引擎的原始输出
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
  Grid(RawGridOutput),
  PreDecoded(PreDecodedOutput),
}

impl RawOutput {
  pub fn kind(&self) -> &'static str {
    match self {
      RawOutput::Grid(_) => "grid",
      RawOutput::PreDecoded(_) => "pre-decoded",
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct InferenceError(pub String);

/// 不透明的推理引擎：输入打包好的张量，输出原始结果
pub trait InferenceEngine {
  fn run(&self, input: &PackedTensor) -> Result<RawOutput, InferenceError>;
}

impl<F> InferenceEngine for F
where
  F: Fn(&PackedTensor) -> Result<RawOutput, InferenceError>,
{
  fn run(&self, input: &PackedTensor) -> Result<RawOutput, InferenceError> {
    self(input)
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("几何参数错误: {0}")]
  Geometry(#[from] LetterboxError),
  #[error("输出解码错误: {0}")]
  Decode(#[from] decode::DecodeError),
  #[error("模型尚未初始化: {0}")]
  Uninitialized(String),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
}

/// 两类检测器共用的阈值配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub target_size: u32,
  pub min_score: f32,
  pub iou_threshold: f32,
}

impl DetectorConfig {
  pub fn with_target_size(target_size: u32) -> Self {
    Self {
      target_size,
      min_score: DEFAULT_MIN_SCORE,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }

  /// 从 URL 查询参数 `size` / `score` / `iou` 覆盖默认值
  pub(crate) fn override_from_url(mut self, url: &url::Url) -> Result<Self, ModelError> {
    if let Some(size) = crate::url_query(url, "size").map_err(ModelError::ModelPathError)? {
      self.target_size = size;
    }
    if let Some(score) = crate::url_query(url, "score").map_err(ModelError::ModelPathError)? {
      self.min_score = score;
    }
    if let Some(iou) = crate::url_query(url, "iou").map_err(ModelError::ModelPathError)? {
      self.iou_threshold = iou;
    }
    Ok(self)
  }
}

pub(crate) fn coco_labels() -> Vec<String> {
  COCO_LABELS.iter().map(|s| s.to_string()).collect()
}

/// 查询参数 `labels` 为 `coco`（默认）或每行一个类别名称的文件路径
pub(crate) fn labels_from_url(url: &url::Url) -> Result<Vec<String>, ModelError> {
  match crate::url_query::<String>(url, "labels").map_err(ModelError::ModelPathError)? {
    None => Ok(coco_labels()),
    Some(name) if name == "coco" => Ok(coco_labels()),
    Some(path) => read_labels(std::path::Path::new(&path)),
  }
}

/// 忽略空行与首尾空白
fn read_labels(path: &std::path::Path) -> Result<Vec<String>, ModelError> {
  let text = std::fs::read_to_string(path)
    .map_err(|e| ModelError::ModelPathError(format!("无法读取类别文件 {}: {e}", path.display())))?;
  Ok(
    text
      .lines()
      .map(str::trim)
      .filter(|l| !l.is_empty())
      .map(str::to_string)
      .collect(),
  )
}
