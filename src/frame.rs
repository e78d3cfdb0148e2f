// 该文件是 Huakuang （画框） 项目的一部分。
// src/frame.rs - 模型输入张量打包
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

use image::{
  DynamicImage, Rgb, RgbImage,
  imageops::{self, FilterType},
};
use tracing::debug;

use crate::{input::DecodedImage, letterbox::LetterboxGeometry};

const RGB_CHANNELS: usize = 3;

/// YOLO 系列模型的灰色填充
pub const YOLO_PAD_COLOR: [u8; 3] = [114, 114, 114];
/// SSD 系列模型的黑色填充
pub const SSD_PAD_COLOR: [u8; 3] = [0, 0, 0];

/// 通道排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
  /// 通道在前 `[1, C, H, W]`
  Nchw,
  /// 通道在后 `[H, W, C]`
  Nhwc,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PackOptions {
  pub normalize: bool,
  pub layout: TensorLayout,
  pub pad_color: [u8; 3],
}

impl PackOptions {
  pub const fn yolo() -> Self {
    Self {
      normalize: true,
      layout: TensorLayout::Nchw,
      pad_color: YOLO_PAD_COLOR,
    }
  }

  pub const fn ssd() -> Self {
    Self {
      normalize: false,
      layout: TensorLayout::Nhwc,
      pad_color: SSD_PAD_COLOR,
    }
  }
}

/// 打包好的 RGB 模型输入
#[derive(Debug, Clone, PartialEq)]
pub struct PackedTensor {
  data: Box<[f32]>,
  layout: TensorLayout,
  size: usize,
}

impl PackedTensor {
  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn height(&self) -> usize {
    self.size
  }

  pub fn width(&self) -> usize {
    self.size
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 推理引擎期望的形状
  pub fn shape(&self) -> Vec<usize> {
    match self.layout {
      TensorLayout::Nchw => vec![1, RGB_CHANNELS, self.size, self.size],
      TensorLayout::Nhwc => vec![self.size, self.size, RGB_CHANNELS],
    }
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 读取 `(x, y)` 处第 `c` 个通道的值
  pub fn get(&self, x: usize, y: usize, c: usize) -> f32 {
    let index = match self.layout {
      TensorLayout::Nchw => c * self.size * self.size + y * self.size + x,
      TensorLayout::Nhwc => (y * self.size + x) * RGB_CHANNELS + c,
    };
    self.data[index]
  }
}

/// 按 letterbox 参数缩放、填充源图像，并展开为模型输入。
///
/// 源图像先丢弃 alpha 通道，再以双线性插值缩放到未填充尺寸，
/// 然后不透明地贴到 `pad_color` 填充的画布上。
pub fn pack(image: &DecodedImage, geometry: &LetterboxGeometry, options: PackOptions) -> PackedTensor {
  let size = geometry.target_size as usize;

  let rgb = DynamicImage::ImageRgba8(image.pixels().clone()).to_rgb8();
  let resized = imageops::resize(
    &rgb,
    geometry.unpadded_width,
    geometry.unpadded_height,
    FilterType::Triangle,
  );

  let mut canvas = RgbImage::from_pixel(
    geometry.target_size,
    geometry.target_size,
    Rgb(options.pad_color),
  );
  imageops::replace(
    &mut canvas,
    &resized,
    geometry.pad_left as i64,
    geometry.pad_top as i64,
  );

  let to_value = |v: u8| {
    if options.normalize {
      v as f32 / 255.0
    } else {
      v as f32
    }
  };

  let raw = canvas.as_raw();
  let data: Box<[f32]> = match options.layout {
    TensorLayout::Nhwc => raw.iter().map(|&v| to_value(v)).collect(),
    TensorLayout::Nchw => {
      let plane = size * size;
      let mut data = vec![0.0f32; RGB_CHANNELS * plane];
      for (idx, pixel) in raw.chunks_exact(RGB_CHANNELS).enumerate() {
        for c in 0..RGB_CHANNELS {
          data[c * plane + idx] = to_value(pixel[c]);
        }
      }
      data.into_boxed_slice()
    }
  };

  debug!(
    "打包模型输入: {:?}, 形状 {}x{}x{}, 归一化 {}",
    options.layout, size, size, RGB_CHANNELS, options.normalize
  );

  PackedTensor {
    data,
    layout: options.layout,
    size,
  }
}
