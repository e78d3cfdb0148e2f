// 该文件是 Huakuang （画框） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use huakuang::annotation::{DEFAULT_MERGE_IOU, UnknownClassPolicy};
use url::Url;

/// 画框: 图像目标检测辅助标注工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 类别文件（JSON），不存在时视为空列表
  #[arg(long, global = true, value_name = "FILE", default_value = "categories.json")]
  pub categories: PathBuf,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(ClapArgs, Debug)]
pub struct DetectOptions {
  /// 模型地址
  /// 支持格式:
  /// - yolo:///path/yolov8n.onnx?size=640&score=0.3&iou=0.5&labels=coco
  /// - ssd:///path/ssd_mobilenet.onnx?size=300
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 未登记类别的处理方式
  #[arg(long, value_enum, default_value_t = UnknownClassPolicy::Ignore)]
  pub policy: UnknownClassPolicy,

  /// 与已有标注判定冲突的 IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_MERGE_IOU, value_name = "THRESHOLD")]
  pub merge_iou: f32,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 检测单张图像并合并到其标注文件
  Detect {
    /// 图像文件路径
    #[arg(long, value_name = "IMAGE")]
    image: PathBuf,

    #[command(flatten)]
    detect: DetectOptions,

    /// 标注预览输出，例如 image:///tmp/preview.png?font=/usr/share/fonts/DejaVuSans.ttf
    /// 指定字体时在框上方写出类别名称
    #[arg(long, value_name = "OUTPUT")]
    preview: Option<Url>,
  },
  /// 检测目录下的全部图像，Ctrl-C 在当前图像完成后停止
  Folder {
    /// 图像目录
    #[arg(long, value_name = "DIR")]
    dir: PathBuf,

    #[command(flatten)]
    detect: DetectOptions,
  },
  /// 列出目录标注中使用但未登记的类别
  Missing {
    /// 图像目录
    #[arg(long, value_name = "DIR")]
    dir: PathBuf,

    /// 将未登记类别改为已登记类别，可重复，例如 --assign kitty=cat
    #[arg(long, value_name = "OLD=NEW", value_parser = parse_assignment)]
    assign: Vec<(String, String)>,

    /// 以默认颜色登记剩余的未登记类别
    #[arg(long)]
    add: bool,
  },
}

fn parse_assignment(s: &str) -> Result<(String, String), String> {
  let (from, to) = s
    .split_once('=')
    .ok_or_else(|| format!("格式应为 OLD=NEW: {s}"))?;
  let (from, to) = (from.trim(), to.trim());
  if from.is_empty() || to.is_empty() {
    return Err(format!("类别名称不能为空: {s}"));
  }
  Ok((from.to_string(), to.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_detect_command() {
    let args = Args::parse_from([
      "huakuang",
      "detect",
      "--image",
      "cat.jpg",
      "--model",
      "yolo:///models/yolov8n.onnx",
      "--policy",
      "add",
    ]);
    assert_eq!(args.categories, PathBuf::from("categories.json"));
    match args.command {
      Command::Detect { image, detect, preview } => {
        assert_eq!(image, PathBuf::from("cat.jpg"));
        assert_eq!(detect.policy, UnknownClassPolicy::Add);
        assert_eq!(detect.merge_iou, DEFAULT_MERGE_IOU);
        assert!(preview.is_none());
      }
      other => panic!("unexpected command {other:?}"),
    }
  }

  #[test]
  fn rejects_invalid_model_url() {
    let result = Args::try_parse_from(["huakuang", "folder", "--dir", ".", "--model", "not a url"]);
    assert!(result.is_err());
  }

  #[test]
  fn parses_missing_assignments() {
    let args = Args::parse_from([
      "huakuang",
      "missing",
      "--dir",
      "images",
      "--assign",
      "kitty=cat",
      "--assign",
      " puppy = dog ",
      "--add",
    ]);
    match args.command {
      Command::Missing { dir, assign, add } => {
        assert_eq!(dir, PathBuf::from("images"));
        assert_eq!(
          assign,
          vec![
            ("kitty".to_string(), "cat".to_string()),
            ("puppy".to_string(), "dog".to_string())
          ]
        );
        assert!(add);
      }
      other => panic!("unexpected command {other:?}"),
    }

    let result = Args::try_parse_from(["huakuang", "missing", "--dir", ".", "--assign", "kitty"]);
    assert!(result.is_err());
  }
}
