// 该文件是 Huakuang （画框） 项目的一部分。
// src/task.rs - 检测与合并任务
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

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{
  annotation::{
    AnnotationSet, DEFAULT_MERGE_IOU, MergeReport, UnknownClassPolicy, apply_detections, store,
  },
  category::CategoryRegistry,
  input::{DecodedImage, ImageFileInput, list_images},
  model::{Detection, Model},
};

pub trait Task<I, M>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: &M) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotateOptions {
  pub policy: UnknownClassPolicy,
  pub merge_iou: f32,
}

impl Default for AnnotateOptions {
  fn default() -> Self {
    Self {
      policy: UnknownClassPolicy::default(),
      merge_iou: DEFAULT_MERGE_IOU,
    }
  }
}

pub struct Annotated {
  pub image: DecodedImage,
  pub annotations: AnnotationSet,
  pub annotation_path: PathBuf,
  pub report: MergeReport,
}

/// 单张图像：读取已有标注，检测，合并后写回
pub struct AnnotateTask<'a> {
  categories: &'a mut CategoryRegistry,
  options: AnnotateOptions,
}

impl<'a> AnnotateTask<'a> {
  pub fn new(categories: &'a mut CategoryRegistry, options: AnnotateOptions) -> Self {
    Self {
      categories,
      options,
    }
  }
}

impl<'a, 'p, ME, M> Task<&'p Path, M> for AnnotateTask<'a>
where
  ME: std::error::Error + Send + Sync + 'static,
  M: Model<Input = DecodedImage, Output = Vec<Detection>, Error = ME>,
{
  type Output = Annotated;
  type Error = anyhow::Error;

  fn run_task(mut self, image_path: &'p Path, model: &M) -> Result<Self::Output, Self::Error> {
    info!("处理图像: {}", image_path.display());
    let image = ImageFileInput::open(image_path)
      .with_context(|| format!("无法读取图像 {}", image_path.display()))?
      .into_image();
    let (width, height) = (image.width(), image.height());

    let mut annotations = store::load(image_path, width, height)?;
    annotations.image_width = width;
    annotations.image_height = height;

    // 推理失败时不修改标注与类别
    let now = std::time::Instant::now();
    let detections = model
      .infer(&image)
      .with_context(|| format!("检测失败 {}", image_path.display()))?;
    info!("推理完成, {} 个检测结果, 耗时: {:.2?}", detections.len(), now.elapsed());

    // 标注写入成功后才更新类别
    let mut categories = self.categories.clone();
    let report = apply_detections(
      &mut annotations,
      &mut categories,
      &detections,
      self.options.policy,
      self.options.merge_iou,
    );
    let annotation_path = store::save(image_path, &annotations)
      .with_context(|| format!("无法保存标注 {}", image_path.display()))?;
    *self.categories = categories;

    Ok(Annotated {
      image,
      annotations,
      annotation_path,
      report,
    })
  }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FolderSummary {
  pub processed: usize,
  pub failed: Vec<PathBuf>,
  pub added: usize,
  pub interrupted: bool,
}

/// 目录中的每张图像依次执行 [`AnnotateTask`]，单张失败时跳过
pub struct FolderTask<'a> {
  categories: &'a mut CategoryRegistry,
  options: AnnotateOptions,
  stop: Arc<AtomicBool>,
}

impl<'a> FolderTask<'a> {
  pub fn new(categories: &'a mut CategoryRegistry, options: AnnotateOptions) -> Self {
    Self {
      categories,
      options,
      stop: Arc::new(AtomicBool::new(false)),
    }
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = stop;
    self
  }

  /// 收到 Ctrl-C 后处理完当前图像即停止
  pub fn stop_on_ctrlc(self) -> anyhow::Result<Self> {
    let stop = Arc::clone(&self.stop);
    ctrlc::set_handler(move || {
      info!("收到中断信号，处理完当前图像后退出...");
      stop.store(true, Ordering::SeqCst);
    })
    .context("无法设置 Ctrl-C 处理函数")?;
    Ok(self)
  }
}

impl<'a, 'p, ME, M> Task<&'p Path, M> for FolderTask<'a>
where
  ME: std::error::Error + Send + Sync + 'static,
  M: Model<Input = DecodedImage, Output = Vec<Detection>, Error = ME>,
{
  type Output = FolderSummary;
  type Error = anyhow::Error;

  fn run_task(mut self, dir: &'p Path, model: &M) -> Result<Self::Output, Self::Error> {
    let images =
      list_images(dir).with_context(|| format!("无法读取目录 {}", dir.display()))?;
    info!("目录 {} 中共 {} 张图像", dir.display(), images.len());

    let mut summary = FolderSummary::default();
    for (index, path) in images.iter().enumerate() {
      if self.stop.load(Ordering::SeqCst) {
        warn!("任务中断, 已处理 {}/{}", index, images.len());
        summary.interrupted = true;
        break;
      }

      let task = AnnotateTask::new(&mut *self.categories, self.options);
      match task.run_task(path.as_path(), model) {
        Ok(annotated) => {
          summary.processed += 1;
          summary.added += annotated.report.added;
        }
        Err(e) => {
          warn!("跳过 {}: {:#}", path.display(), e);
          summary.failed.push(path.clone());
        }
      }
    }

    info!(
      "目录处理完成: 成功 {}, 失败 {}, 新增标注 {}",
      summary.processed,
      summary.failed.len(),
      summary.added
    );
    Ok(summary)
  }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MissingReport {
  /// 处理后仍未登记的类别，按首次出现顺序
  pub missing: Vec<String>,
  /// 本次登记的类别
  pub added: Vec<String>,
  /// 改为已登记类别的标注数量
  pub reassigned: usize,
  /// 图像或标注无法读取、或改写后无法保存的文件
  pub skipped: Vec<PathBuf>,
}

/// 检查目录中标注使用但未登记的类别，可将其改为已有类别或直接登记
pub struct MissingTask<'a> {
  categories: &'a mut CategoryRegistry,
  assignments: Vec<(String, String)>,
  add: bool,
}

impl<'a> MissingTask<'a> {
  pub fn new(categories: &'a mut CategoryRegistry) -> Self {
    Self {
      categories,
      assignments: Vec::new(),
      add: false,
    }
  }

  /// 将未登记的 `from` 改为已登记的 `to`
  pub fn assign(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
    self.assignments.push((from.into(), to.into()));
    self
  }

  /// 以默认颜色登记剩余的未登记类别
  pub fn add_remaining(mut self, add: bool) -> Self {
    self.add = add;
    self
  }

  fn load_all(dir: &Path, skipped: &mut Vec<PathBuf>) -> anyhow::Result<Vec<(PathBuf, AnnotationSet)>> {
    let images = list_images(dir).with_context(|| format!("无法读取目录 {}", dir.display()))?;
    let mut sets = Vec::with_capacity(images.len());
    for path in images {
      let image = match ImageFileInput::open(&path) {
        Ok(input) => input.into_image(),
        Err(e) => {
          warn!("跳过 {}: {}", path.display(), e);
          skipped.push(path);
          continue;
        }
      };
      match store::load(&path, image.width(), image.height()) {
        Ok(set) => sets.push((path, set)),
        Err(e) => {
          warn!("跳过 {}: {}", path.display(), e);
          skipped.push(path);
        }
      }
    }
    Ok(sets)
  }

  pub fn run(mut self, dir: &Path) -> anyhow::Result<MissingReport> {
    // 参数有误时不改写任何文件
    for (from, to) in &self.assignments {
      if self.categories.contains(from) {
        anyhow::bail!("类别 {from} 已登记，无需改写");
      }
      if !self.categories.contains(to) {
        anyhow::bail!("无法将 {from} 改为未登记的类别 {to}");
      }
    }

    let mut report = MissingReport::default();
    let sets = Self::load_all(dir, &mut report.skipped)?;

    let mut missing: Vec<String> = Vec::new();
    for (path, mut set) in sets {
      let mut renamed = 0;
      for (from, to) in &self.assignments {
        renamed += self.categories.assign_missing(from, to, &mut set)?;
      }
      if renamed > 0 {
        if let Err(e) = store::save(&path, &set) {
          warn!("无法保存 {}: {}", path.display(), e);
          report.skipped.push(path);
          continue;
        }
        report.reassigned += renamed;
      }

      for class in self.categories.missing(&set) {
        if !missing.contains(&class) {
          missing.push(class);
        }
      }
    }

    if self.add {
      for class in missing.drain(..) {
        if self.categories.ensure(&class) {
          report.added.push(class);
        }
      }
    }
    report.missing = missing;

    info!(
      "未登记类别 {} 个, 新登记 {} 个, 改写标注 {} 个",
      report.missing.len(),
      report.added.len(),
      report.reassigned
    );
    Ok(report)
  }
}
