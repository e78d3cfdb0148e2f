// 该文件是 Huakuang （画框） 项目的一部分。
// src/model/onnx.rs - 基于 tract 的 ONNX 推理引擎
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

use std::path::Path;

use tracing::{debug, info};
use tract_onnx::prelude::*;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{PackedTensor, TensorLayout},
  input::DecodedImage,
  model::{
    BoxUnits, Detection, InferenceEngine, InferenceError, Model, ModelError, PreDecodedItem,
    PreDecodedOutput, RawGridOutput, RawOutput, SsdDetector, SsdDetectorBuilder, YoloDetector,
    YoloDetectorBuilder,
  },
};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// 模型输出的组织方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFamily {
  /// 单个 `[1, 4 + num_classes, rows]` 输出
  Grid,
  /// 依次为 boxes `[1, N, 4]`、classes `[1, N]`、scores `[1, N]`，
  /// 可选第四个输出为有效数量。框坐标为归一化的 `ymin, xmin, ymax, xmax`。
  PreDecoded,
}

pub struct OnnxEngine {
  plan: Plan,
  family: OutputFamily,
  labels: Vec<String>,
}

impl OnnxEngine {
  pub fn load(
    path: &Path,
    family: OutputFamily,
    input_shape: &[usize],
    labels: Vec<String>,
  ) -> Result<Self, ModelError> {
    if !path.is_file() {
      return Err(ModelError::ModelPathError(format!(
        "模型文件不存在: {}",
        path.display()
      )));
    }

    info!("加载 ONNX 模型: {}, 输入 {:?}", path.display(), input_shape);
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(f32::datum_type(), input_shape.to_vec()),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::ModelLoadError(format!("{}: {e}", path.display())))?;

    Ok(Self {
      plan,
      family,
      labels,
    })
  }

  pub fn family(&self) -> OutputFamily {
    self.family
  }
}

fn engine_error(e: impl std::fmt::Display) -> InferenceError {
  InferenceError(e.to_string())
}

fn collect_f32(value: &TValue) -> Result<(Vec<usize>, Vec<f32>), InferenceError> {
  let view = value.to_array_view::<f32>().map_err(engine_error)?;
  Ok((view.shape().to_vec(), view.iter().copied().collect()))
}

impl InferenceEngine for OnnxEngine {
  fn run(&self, input: &PackedTensor) -> Result<RawOutput, InferenceError> {
    let mut shape = input.shape();
    if input.layout() == TensorLayout::Nhwc {
      shape.insert(0, 1);
    }
    let tensor = Tensor::from_shape(&shape, input.as_slice()).map_err(engine_error)?;

    let outputs = self.plan.run(tvec![tensor.into()]).map_err(engine_error)?;
    debug!("ONNX 推理完成, {} 个输出", outputs.len());

    match self.family {
      OutputFamily::Grid => {
        let first = outputs
          .first()
          .ok_or_else(|| InferenceError("模型没有输出".to_string()))?;
        let (shape, data) = collect_f32(first)?;
        grid_output(&shape, data).map(RawOutput::Grid)
      }
      OutputFamily::PreDecoded => {
        if outputs.len() < 3 {
          return Err(InferenceError(format!(
            "预解码模型需要至少 3 个输出, 实际 {}",
            outputs.len()
          )));
        }
        let (_, boxes) = collect_f32(&outputs[0])?;
        let (_, classes) = collect_f32(&outputs[1])?;
        let (_, scores) = collect_f32(&outputs[2])?;
        let count = match outputs.get(3) {
          Some(num) => collect_f32(num)?.1.first().map(|&n| n.max(0.0) as usize),
          None => None,
        };
        pre_decoded_output(&boxes, &classes, &scores, count, &self.labels)
          .map(RawOutput::PreDecoded)
      }
    }
  }
}

/// `[1, 4 + num_classes, rows]`
fn grid_output(shape: &[usize], data: Vec<f32>) -> Result<RawGridOutput, InferenceError> {
  match shape {
    [1, attrs, _] if *attrs > 4 => Ok(RawGridOutput {
      data,
      num_classes: attrs - 4,
    }),
    _ => Err(InferenceError(format!("无法识别的网格输出形状 {:?}", shape))),
  }
}

fn pre_decoded_output(
  boxes: &[f32],
  classes: &[f32],
  scores: &[f32],
  count: Option<usize>,
  labels: &[String],
) -> Result<PreDecodedOutput, InferenceError> {
  let n = boxes.len() / 4;
  if boxes.len() % 4 != 0 || classes.len() != n || scores.len() != n {
    return Err(InferenceError(format!(
      "预解码输出长度不一致: boxes {}, classes {}, scores {}",
      boxes.len(),
      classes.len(),
      scores.len()
    )));
  }
  let n = count.map_or(n, |c| c.min(n));

  let items = boxes
    .chunks_exact(4)
    .zip(classes.iter().zip(scores))
    .take(n)
    .map(|(b, (&class_id, &score))| {
      let [ymin, xmin, ymax, xmax] = [b[0], b[1], b[2], b[3]];
      let id = class_id.max(0.0) as usize;
      PreDecodedItem {
        bbox: [xmin, ymin, xmax - xmin, ymax - ymin],
        class_label: labels
          .get(id)
          .cloned()
          .unwrap_or_else(|| format!("class_{id}")),
        score,
      }
    })
    .collect();

  Ok(PreDecodedOutput {
    items,
    units: BoxUnits::Normalized,
  })
}

impl YoloDetectorBuilder {
  /// 构造检测器并加载 ONNX 模型
  pub fn load(self) -> Result<YoloDetector<OnnxEngine>, ModelError> {
    let mut detector = self.build::<OnnxEngine>();
    let size = detector.config().target_size as usize;
    let engine = OnnxEngine::load(
      detector.model_path(),
      OutputFamily::Grid,
      &[1, 3, size, size],
      Vec::new(),
    )?;
    detector.set_engine(engine);
    Ok(detector)
  }
}

impl SsdDetectorBuilder {
  /// 构造检测器并加载 ONNX 模型
  pub fn load(self) -> Result<SsdDetector<OnnxEngine>, ModelError> {
    let mut detector = self.build::<OnnxEngine>();
    let size = detector.config().target_size as usize;
    let engine = OnnxEngine::load(
      detector.model_path(),
      OutputFamily::PreDecoded,
      &[1, size, size, 3],
      detector.labels().to_vec(),
    )?;
    detector.set_engine(engine);
    Ok(detector)
  }
}

/// 按 URL 方案选择并加载检测器
pub enum DetectorWrapper {
  Yolo(YoloDetector<OnnxEngine>),
  Ssd(SsdDetector<OnnxEngine>),
}

impl FromUrl for DetectorWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      YoloDetectorBuilder::SCHEME => {
        let detector = YoloDetectorBuilder::from_url(url)?.load()?;
        Ok(DetectorWrapper::Yolo(detector))
      }
      SsdDetectorBuilder::SCHEME => {
        let detector = SsdDetectorBuilder::from_url(url)?.load()?;
        Ok(DetectorWrapper::Ssd(detector))
      }
      other => Err(ModelError::ModelPathError(format!(
        "不支持的模型方案: {other}"
      ))),
    }
  }
}

impl Model for DetectorWrapper {
  type Input = DecodedImage;
  type Output = Vec<Detection>;
  type Error = ModelError;

  fn infer(&self, image: &Self::Input) -> Result<Self::Output, Self::Error> {
    match self {
      DetectorWrapper::Yolo(detector) => detector.infer(image),
      DetectorWrapper::Ssd(detector) => detector.infer(image),
    }
  }
}
