// 该文件是 Huakuang （画框） 项目的一部分。
// src/letterbox.rs - 等比缩放与填充（letterbox）变换
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

//! 将任意尺寸的源图像等比缩放进 `target x target` 的正方形画布，
//! 并记录从模型输入空间映射回源图像空间所需的缩放与填充参数。

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LetterboxError {
  #[error("无效的图像尺寸: 源图像 {width}x{height}, 目标尺寸 {target}")]
  InvalidGeometry { width: i64, height: i64, target: i64 },
}

/// letterbox 几何参数，每次推理针对每张图像计算一次
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxGeometry {
  pub scale: f64,
  pub pad_left: f64,
  pub pad_top: f64,
  pub pad_right: f64,
  pub pad_bottom: f64,
  pub source_width: u32,
  pub source_height: u32,
  pub target_size: u32,
  pub unpadded_width: u32,
  pub unpadded_height: u32,
}

impl LetterboxGeometry {
  /// 计算 letterbox 参数。任一尺寸非正时返回 [`LetterboxError::InvalidGeometry`]。
  pub fn compute(
    source_width: i64,
    source_height: i64,
    target_size: i64,
  ) -> Result<Self, LetterboxError> {
    if source_width <= 0 || source_height <= 0 || target_size <= 0 {
      return Err(LetterboxError::InvalidGeometry {
        width: source_width,
        height: source_height,
        target: target_size,
      });
    }

    let (w, h, target) = (
      source_width as f64,
      source_height as f64,
      target_size as f64,
    );

    let scale = (target / h).min(target / w);
    // 极细长的图像至少保留 1 个像素
    let unpadded_width = (w * scale).round().clamp(1.0, target);
    let unpadded_height = (h * scale).round().clamp(1.0, target);

    let dw = target - unpadded_width;
    let dh = target - unpadded_height;
    let pad_left = (dw / 2.0).round();
    let pad_top = (dh / 2.0).round();

    let geometry = Self {
      scale,
      pad_left,
      pad_top,
      pad_right: dw - pad_left,
      pad_bottom: dh - pad_top,
      source_width: source_width as u32,
      source_height: source_height as u32,
      target_size: target_size as u32,
      unpadded_width: unpadded_width as u32,
      unpadded_height: unpadded_height as u32,
    };

    debug!(
      "letterbox: {}x{} -> {}, 缩放 {:.4}, 填充 (左 {}, 上 {}, 右 {}, 下 {})",
      source_width,
      source_height,
      target_size,
      scale,
      geometry.pad_left,
      geometry.pad_top,
      geometry.pad_right,
      geometry.pad_bottom
    );

    Ok(geometry)
  }

  /// 源图像空间 -> 模型输入空间
  pub fn to_target(&self, x: f64, y: f64) -> (f64, f64) {
    (x * self.scale + self.pad_left, y * self.scale + self.pad_top)
  }

  /// 模型输入空间 -> 源图像空间
  pub fn to_source(&self, x: f64, y: f64) -> (f64, f64) {
    (
      (x - self.pad_left) / self.scale,
      (y - self.pad_top) / self.scale,
    )
  }
}
