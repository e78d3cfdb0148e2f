// 该文件是 Huakuang （画框） 项目的一部分。
// src/category.rs - 标注类别注册表
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

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::annotation::{AnnotationSet, unknown_classes};

/// 新类别的默认颜色
pub const DEFAULT_COLOR: &str = "#ff0000";

const HUE_MIN: f32 = 16.0;
const HUE_MAX: f32 = 320.0;
const SATURATION: f32 = 0.7;
const LIGHTNESS: f32 = 0.5;

#[derive(Error, Debug)]
pub enum CategoryError {
  #[error("类别名称不能为空")]
  EmptyName,
  #[error("类别已存在: {0}")]
  Duplicate(String),
  #[error("类别不存在: {0}")]
  NotFound(String),
  #[error("类别 {name} 仍被 {count} 个标注使用")]
  InUse { name: String, count: usize },
  #[error("读写类别文件失败: {0}")]
  IoError(#[from] io::Error),
  #[error("类别文件格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

fn default_color() -> String {
  DEFAULT_COLOR.to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Category {
  pub name: String,
  #[serde(default = "default_color")]
  pub color: String,
}

impl Category {
  /// 解析 `#rrggbb`、`#rgb` 或 `rgb(r, g, b)` 形式的颜色
  pub fn rgb(&self) -> Option<[u8; 3]> {
    parse_color(&self.color)
  }
}

pub fn parse_color(color: &str) -> Option<[u8; 3]> {
  let color = color.trim();
  if let Some(hex) = color.strip_prefix('#') {
    if !hex.is_ascii() {
      return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    return match hex.len() {
      6 => Some([channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?]),
      3 => {
        let mut out = [0u8; 3];
        for (i, c) in hex.chars().enumerate() {
          let v = c.to_digit(16)? as u8;
          out[i] = v * 17;
        }
        Some(out)
      }
      _ => None,
    };
  }

  let inner = color.strip_prefix("rgb(")?.strip_suffix(')')?;
  let mut parts = inner.split(',').map(|p| p.trim().parse::<u8>().ok());
  let rgb = [parts.next()??, parts.next()??, parts.next()??];
  match parts.next() {
    None => Some(rgb),
    Some(_) => None,
  }
}

/// HSL (色相为角度, 饱和度与亮度为 0..1) 转 RGB
pub fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> [u8; 3] {
  let to_byte = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
  if saturation == 0.0 {
    let v = to_byte(lightness);
    return [v, v, v];
  }

  let h = hue / 360.0;
  let q = if lightness < 0.5 {
    lightness * (1.0 + saturation)
  } else {
    lightness + saturation - lightness * saturation
  };
  let p = 2.0 * lightness - q;
  let channel = |mut t: f32| {
    if t < 0.0 {
      t += 1.0;
    }
    if t > 1.0 {
      t -= 1.0;
    }
    if t < 1.0 / 6.0 {
      p + (q - p) * 6.0 * t
    } else if t < 0.5 {
      q
    } else if t < 2.0 / 3.0 {
      p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
      p
    }
  };

  [
    to_byte(channel(h + 1.0 / 3.0)),
    to_byte(channel(h)),
    to_byte(channel(h - 1.0 / 3.0)),
  ]
}

/// 删除类别时如何处理仍在使用它的标注
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveAction {
  /// 仍有标注使用时拒绝删除
  Refuse,
  /// 一并删除这些标注
  DropAnnotations,
  /// 将这些标注改为另一个已有类别
  Reassign(String),
}

#[derive(Serialize, Deserialize)]
struct CategoryFile {
  #[serde(default)]
  categories: Vec<ImportedCategory>,
}

#[derive(Serialize, Deserialize)]
struct ImportedCategory {
  #[serde(default)]
  name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  color: Option<String>,
}

/// 有序的类别列表，名称唯一
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryRegistry {
  categories: Vec<Category>,
}

impl CategoryRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn categories(&self) -> &[Category] {
    &self.categories
  }

  pub fn len(&self) -> usize {
    self.categories.len()
  }

  pub fn is_empty(&self) -> bool {
    self.categories.is_empty()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.get(name).is_some()
  }

  pub fn get(&self, name: &str) -> Option<&Category> {
    self.categories.iter().find(|c| c.name == name)
  }

  fn position(&self, name: &str) -> Result<usize, CategoryError> {
    self
      .categories
      .iter()
      .position(|c| c.name == name)
      .ok_or_else(|| CategoryError::NotFound(name.to_string()))
  }

  pub fn add(&mut self, name: impl Into<String>, color: impl Into<String>) -> Result<(), CategoryError> {
    let name = name.into().trim().to_string();
    if name.is_empty() {
      return Err(CategoryError::EmptyName);
    }
    if self.contains(&name) {
      return Err(CategoryError::Duplicate(name));
    }

    debug!("添加类别: {}", name);
    self.categories.push(Category {
      name,
      color: color.into(),
    });
    Ok(())
  }

  /// 以默认颜色登记类别，已存在时不做修改。返回是否新增。
  pub fn ensure(&mut self, name: &str) -> bool {
    if name.is_empty() || self.contains(name) {
      return false;
    }
    info!("登记新类别: {}", name);
    self.categories.push(Category {
      name: name.to_string(),
      color: default_color(),
    });
    true
  }

  /// 修改名称与颜色，同时更新使用旧名称的标注
  pub fn edit(
    &mut self,
    name: &str,
    new_name: &str,
    new_color: &str,
    annotations: &mut AnnotationSet,
  ) -> Result<(), CategoryError> {
    let new_name = new_name.trim();
    if new_name.is_empty() {
      return Err(CategoryError::EmptyName);
    }
    let index = self.position(name)?;
    if new_name != name && self.contains(new_name) {
      return Err(CategoryError::Duplicate(new_name.to_string()));
    }

    annotations.rename_class(name, new_name);
    let category = &mut self.categories[index];
    category.name = new_name.to_string();
    category.color = new_color.to_string();
    Ok(())
  }

  /// 删除类别，返回受影响的标注数量
  pub fn remove(
    &mut self,
    name: &str,
    action: RemoveAction,
    annotations: &mut AnnotationSet,
  ) -> Result<usize, CategoryError> {
    let index = self.position(name)?;
    let count = annotations.count_class(name);

    match action {
      _ if count == 0 => {}
      RemoveAction::Refuse => {
        return Err(CategoryError::InUse {
          name: name.to_string(),
          count,
        });
      }
      RemoveAction::DropAnnotations => annotations.bboxes.retain(|a| a.class != name),
      RemoveAction::Reassign(target) => {
        if target == name || !self.contains(&target) {
          return Err(CategoryError::NotFound(target));
        }
        annotations.rename_class(name, &target);
      }
    }

    self.categories.remove(index);
    info!("删除类别 {}, 影响 {} 个标注", name, count);
    Ok(count)
  }

  /// 色相在 16° 到 320° 之间均匀分布
  pub fn reassign_colors(&mut self) {
    let steps = self.categories.len().saturating_sub(1).max(1) as f32;
    let step = (HUE_MAX - HUE_MIN) / steps;
    for (i, category) in self.categories.iter_mut().enumerate() {
      let [r, g, b] = hsl_to_rgb(HUE_MIN + step * i as f32, SATURATION, LIGHTNESS);
      category.color = format!("rgb({r}, {g}, {b})");
    }
  }

  /// 标注中使用但未登记的类别
  pub fn missing(&self, annotations: &AnnotationSet) -> Vec<String> {
    unknown_classes(&annotations.bboxes, self)
  }

  /// 将未登记类别的标注改为已登记的 `target`，返回修改数量
  pub fn assign_missing(
    &self,
    name: &str,
    target: &str,
    annotations: &mut AnnotationSet,
  ) -> Result<usize, CategoryError> {
    if self.contains(name) {
      return Err(CategoryError::Duplicate(name.to_string()));
    }
    if !self.contains(target) {
      return Err(CategoryError::NotFound(target.to_string()));
    }
    Ok(annotations.rename_class(name, target))
  }

  pub fn export_json(&self) -> Result<String, CategoryError> {
    let file = CategoryFile {
      categories: self
        .categories
        .iter()
        .map(|c| ImportedCategory {
          name: c.name.clone(),
          color: Some(c.color.clone()),
        })
        .collect(),
    };
    Ok(serde_json::to_string_pretty(&file)?)
  }

  /// 导入的类别按文件顺序排在前面并覆盖同名类别的颜色，
  /// 仅存在于当前列表的类别保留在末尾。
  pub fn import_json(&mut self, text: &str) -> Result<(), CategoryError> {
    let file: CategoryFile = serde_json::from_str(text)?;
    let mut merged: Vec<Category> = Vec::new();
    for imported in file.categories {
      if imported.name.is_empty() || merged.iter().any(|c| c.name == imported.name) {
        continue;
      }
      let color = imported
        .color
        .or_else(|| self.get(&imported.name).map(|c| c.color.clone()))
        .unwrap_or_else(default_color);
      merged.push(Category {
        name: imported.name,
        color,
      });
    }

    for existing in self.categories.drain(..) {
      if !merged.iter().any(|c| c.name == existing.name) {
        merged.push(existing);
      }
    }

    debug!("导入后共 {} 个类别", merged.len());
    self.categories = merged;
    Ok(())
  }

  pub fn load(path: &Path) -> Result<Self, CategoryError> {
    let mut registry = Self::new();
    registry.import_json(&fs::read_to_string(path)?)?;
    Ok(registry)
  }

  pub fn save(&self, path: &Path) -> Result<(), CategoryError> {
    fs::write(path, self.export_json()?)?;
    Ok(())
  }
}
