// 该文件是 Huakuang （画框） 项目的一部分。
// src/input.rs - 图像输入
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

use image::RgbaImage;

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

/// 可标注的图像扩展名
pub const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "gif", "bmp"];

/// 解码后的 RGBA 图像
#[derive(Debug, Clone)]
pub struct DecodedImage {
  pixels: RgbaImage,
}

impl DecodedImage {
  /// 从编码后的字节流（PNG/JPEG/...）解码
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, image::ImageError> {
    let pixels = image::load_from_memory(bytes)?.to_rgba8();
    Ok(Self { pixels })
  }

  /// 包装现有的 RGBA 缓冲区，长度不为 `width * height * 4` 时返回 `None`
  pub fn from_rgba(width: u32, height: u32, buf: Vec<u8>) -> Option<Self> {
    RgbaImage::from_raw(width, height, buf).map(|pixels| Self { pixels })
  }

  pub fn width(&self) -> u32 {
    self.pixels.width()
  }

  pub fn height(&self) -> u32 {
    self.pixels.height()
  }

  pub fn pixels(&self) -> &RgbaImage {
    &self.pixels
  }

  pub fn into_pixels(self) -> RgbaImage {
    self.pixels
  }
}

impl From<RgbaImage> for DecodedImage {
  fn from(pixels: RgbaImage) -> Self {
    Self { pixels }
  }
}

/// 扩展名（不区分大小写）是否为可标注图像
pub fn is_image_path(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| known.eq_ignore_ascii_case(ext))
    })
    .unwrap_or(false)
}

/// 列出目录下的所有图像文件，按文件名排序
pub fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
  let mut images = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let entry = entry?;
    let path = entry.path();
    if entry.file_type()?.is_file() && is_image_path(&path) {
      images.push(path);
    }
  }
  images.sort();
  Ok(images)
}
