// 该文件是 Huakuang （画框） 项目的一部分。
// src/main.rs - 命令行入口
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

mod args;

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use huakuang::{
  FromUrl,
  category::CategoryRegistry,
  model::registry::ModelRegistry,
  output::{OutputWrapper, Preview, Render},
  task::{AnnotateOptions, AnnotateTask, FolderTask, MissingTask, Task},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use args::{Args, Command, DetectOptions};

fn load_categories(path: &Path) -> Result<CategoryRegistry> {
  if !path.exists() {
    warn!("类别文件不存在, 使用空列表: {}", path.display());
    return Ok(CategoryRegistry::new());
  }
  CategoryRegistry::load(path).with_context(|| format!("无法读取类别文件 {}", path.display()))
}

fn save_categories_if_changed(
  path: &Path,
  before: &CategoryRegistry,
  after: &CategoryRegistry,
) -> Result<()> {
  if before != after {
    after.save(path)?;
    info!("类别文件已更新: {} 个类别", after.len());
  }
  Ok(())
}

fn options(detect: &DetectOptions) -> AnnotateOptions {
  AnnotateOptions {
    policy: detect.policy,
    merge_iou: detect.merge_iou,
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("huakuang=info")),
    )
    .init();

  let args = Args::parse();
  info!("类别文件: {}", args.categories.display());
  let mut categories = load_categories(&args.categories)?;
  let original = categories.clone();
  let registry = ModelRegistry::from_urls();

  match args.command {
    Command::Detect {
      image,
      detect,
      preview,
    } => {
      info!("模型地址: {}", detect.model);
      let detector = registry.get_or_create(detect.model.as_str())?;
      let detector = detector.lock().map_err(|_| anyhow!("模型实例不可用"))?;

      let annotated = AnnotateTask::new(&mut categories, options(&detect))
        .run_task(image.as_path(), &*detector)?;
      info!(
        "新增 {} 个标注, 冲突 {}, 未登记类别 {:?}, 标注文件: {}",
        annotated.report.added,
        annotated.report.conflicts,
        annotated.report.unknown,
        annotated.annotation_path.display()
      );

      if let Some(preview) = preview {
        let output = OutputWrapper::from_url(&preview)?;
        output.render_result(
          &annotated.image,
          &Preview {
            annotations: &annotated.annotations,
            categories: &categories,
          },
        )?;
      }
    }
    Command::Folder { dir, detect } => {
      info!("模型地址: {}", detect.model);
      let detector = registry.get_or_create(detect.model.as_str())?;
      let detector = detector.lock().map_err(|_| anyhow!("模型实例不可用"))?;

      let summary = FolderTask::new(&mut categories, options(&detect))
        .stop_on_ctrlc()?
        .run_task(dir.as_path(), &*detector)?;
      if !summary.failed.is_empty() {
        warn!("{} 张图像处理失败", summary.failed.len());
      }
    }
    Command::Missing { dir, assign, add } => {
      let task = assign
        .into_iter()
        .fold(MissingTask::new(&mut categories), |task, (from, to)| {
          task.assign(from, to)
        })
        .add_remaining(add);
      let report = task.run(&dir)?;

      if !report.skipped.is_empty() {
        warn!("{} 个文件无法处理", report.skipped.len());
      }
      if report.missing.is_empty() {
        info!("所有类别均已登记");
      }
      for class in &report.missing {
        println!("{class}");
      }
    }
  }

  save_categories_if_changed(&args.categories, &original, &categories)
}
