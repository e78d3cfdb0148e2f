// 该文件是 Huakuang （画框） 项目的一部分。
// src/geometry.rs - 边界框几何
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

/// 轴对齐边界框，格式为 `[left, top, width, height]`，单位为像素
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

impl BBox {
  pub const fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
    Self {
      left,
      top,
      width,
      height,
    }
  }

  /// 由中心点与宽高构造
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
  }

  pub fn right(&self) -> f32 {
    self.left + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.top + self.height
  }

  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  /// 宽高均为正时才算有效框
  pub fn is_degenerate(&self) -> bool {
    !(self.width > 0.0 && self.height > 0.0)
  }

  /// 向负无穷取整
  pub fn floor(&self) -> Self {
    Self::new(
      self.left.floor(),
      self.top.floor(),
      self.width.floor(),
      self.height.floor(),
    )
  }

  pub fn intersection_area(&self, other: &BBox) -> f32 {
    let x1 = self.left.max(other.left);
    let y1 = self.top.max(other.top);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
  }

  /// 交并比。并集面积不为正（退化框）时返回 0，不会产生 NaN。
  pub fn iou(&self, other: &BBox) -> f32 {
    let intersection = self.intersection_area(other);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 && union.is_finite() {
      intersection / union
    } else {
      0.0
    }
  }

  /// 框是否完全落在 `width x height` 的图像内
  pub fn fits_within(&self, width: f32, height: f32) -> bool {
    self.width > 0.0
      && self.height > 0.0
      && self.left >= 0.0
      && self.top >= 0.0
      && self.right() <= width
      && self.bottom() <= height
  }

  pub fn to_array(&self) -> [f32; 4] {
    [self.left, self.top, self.width, self.height]
  }
}

impl From<[f32; 4]> for BBox {
  fn from([left, top, width, height]: [f32; 4]) -> Self {
    Self::new(left, top, width, height)
  }
}

impl From<BBox> for [f32; 4] {
  fn from(bbox: BBox) -> Self {
    bbox.to_array()
  }
}
