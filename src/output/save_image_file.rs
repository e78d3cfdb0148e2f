// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/save_image_file.rs - 保存标注预览图像
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

use ab_glyph::FontArc;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::DecodedImage,
  output::{Preview, Render, draw::Draw},
  url_path, url_query,
};

pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法加载字体 {0}")]
  FontLoadError(PathBuf),
  #[error("参数错误: {0}")]
  InvalidQuery(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let output = Self::new(url_path(uri));
    match url_query::<PathBuf>(uri, "font").map_err(SaveImageFileError::InvalidQuery)? {
      Some(font) => output.with_font_file(font),
      None => Ok(output),
    }
  }
}

impl SaveImageFileOutput {
  pub fn new<P: AsRef<Path>>(path: P) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
      draw: Draw::default(),
    }
  }

  /// 读取 TrueType/OpenType 字体，用于在预览中写出类别名称
  pub fn with_font_file<P: AsRef<Path>>(mut self, font: P) -> Result<Self, SaveImageFileError> {
    let path = font.as_ref();
    let data = std::fs::read(path)?;
    let font =
      FontArc::try_from_vec(data).map_err(|_| SaveImageFileError::FontLoadError(path.to_path_buf()))?;
    info!("预览字体: {}", path.display());
    self.draw = self.draw.with_font(font);
    Ok(self)
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存预览图像: {}", self.path.display());
    Ok(())
  }
}

impl<'a> Render<DecodedImage, Preview<'a>> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &DecodedImage, result: &Preview<'a>) -> Result<(), Self::Error> {
    let image = self.draw.render(frame, result.annotations, result.categories);
    self.save_image(image)
  }
}
