// 该文件是 Huakuang （画框） 项目的一部分。
// src/output/draw.rs - 在图像上绘制标注框
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

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{
  annotation::AnnotationSet, category::CategoryRegistry, geometry::BBox, input::DecodedImage,
};

const BOX_THICKNESS: u32 = 2;
/// 未登记或颜色无法解析的类别使用红色
const FALLBACK_COLOR: [u8; 3] = [255, 0, 0];
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255];

/// 标注框绘制。设置字体后在框的左上方写出类别名称。
pub struct Draw {
  thickness: u32,
  fallback_color: [u8; 3],
  font: Option<FontArc>,
  font_size: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
      fallback_color: FALLBACK_COLOR,
      font: None,
      font_size: LABEL_FONT_SIZE,
    }
  }
}

/// 标签背景的左上角：优先放在框上方，放不下时贴着框的上边缘放在框内
pub fn label_origin(bbox: &BBox, label_height: u32) -> (i32, i32) {
  let x = (bbox.left.floor() as i32).max(0);
  let top = bbox.top.floor() as i32;
  let above = top - label_height as i32;
  (x, if above >= 0 { above } else { top.max(0) })
}

impl Draw {
  pub fn with_thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  pub fn with_font(mut self, font: FontArc) -> Self {
    self.font = Some(font);
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 类别名称写在类别颜色的背景上，未设置字体时不绘制
  pub fn draw_label(&self, image: &mut RgbImage, bbox: &BBox, label: &str, color: [u8; 3]) {
    let Some(font) = &self.font else {
      return;
    };
    let finite = bbox.to_array().iter().all(|v| v.is_finite());
    if label.is_empty() || !finite {
      return;
    }

    let scale = PxScale::from(self.font_size);
    let (text_w, text_h) = text_size(scale, font, label);
    let (bg_w, bg_h) = (text_w + 2 * LABEL_PADDING as u32, text_h + 2 * LABEL_PADDING as u32);
    let (x, y) = label_origin(bbox, bg_h);

    draw_filled_rect_mut(image, Rect::at(x, y).of_size(bg_w, bg_h), Rgb(color));
    draw_text_mut(
      image,
      Rgb(LABEL_TEXT_COLOR),
      x + LABEL_PADDING,
      y + LABEL_PADDING,
      scale,
      font,
      label,
    );
  }

  pub fn color_of(&self, class: &str, categories: &CategoryRegistry) -> [u8; 3] {
    categories
      .get(class)
      .and_then(|c| c.rgb())
      .unwrap_or(self.fallback_color)
  }

  /// 由外向内描边，超出图像的部分被裁剪
  pub fn draw_bbox(&self, image: &mut RgbImage, bbox: &BBox, color: [u8; 3]) {
    let x = bbox.left.floor() as i32;
    let y = bbox.top.floor() as i32;
    let w = bbox.width.round().max(0.0) as u32;
    let h = bbox.height.round().max(0.0) as u32;

    for t in 0..self.thickness {
      let (tw, th) = (w.saturating_sub(2 * t), h.saturating_sub(2 * t));
      if tw == 0 || th == 0 {
        break;
      }
      let rect = Rect::at(x + t as i32, y + t as i32).of_size(tw, th);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }
  }

  pub fn draw_annotations(
    &self,
    image: &mut RgbImage,
    annotations: &AnnotationSet,
    categories: &CategoryRegistry,
  ) {
    for annotation in &annotations.bboxes {
      let color = self.color_of(&annotation.class, categories);
      self.draw_bbox(image, &annotation.bbox, color);
      self.draw_label(image, &annotation.bbox, &annotation.class, color);
    }
  }

  pub fn render(
    &self,
    image: &DecodedImage,
    annotations: &AnnotationSet,
    categories: &CategoryRegistry,
  ) -> RgbImage {
    let mut canvas = DynamicImage::ImageRgba8(image.pixels().clone()).to_rgb8();
    self.draw_annotations(&mut canvas, annotations, categories);
    canvas
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annotation::Annotation;

  #[test]
  fn draws_two_pixel_outline() {
    let mut image = RgbImage::new(20, 20);
    Draw::default().draw_bbox(&mut image, &BBox::new(5.0, 5.0, 10.0, 10.0), [0, 255, 0]);

    let green = Rgb([0, 255, 0]);
    assert_eq!(*image.get_pixel(5, 5), green);
    assert_eq!(*image.get_pixel(6, 6), green);
    assert_eq!(*image.get_pixel(14, 14), green);
    assert_eq!(*image.get_pixel(10, 5), green);
    assert_eq!(*image.get_pixel(7, 7), Rgb([0, 0, 0]));
    assert_eq!(*image.get_pixel(4, 4), Rgb([0, 0, 0]));
  }

  #[test]
  fn clips_boxes_leaving_the_image() {
    let mut image = RgbImage::new(10, 10);
    Draw::default().draw_bbox(&mut image, &BBox::new(-5.0, -5.0, 30.0, 30.0), [0, 0, 255]);
    Draw::default().draw_bbox(&mut image, &BBox::new(3.0, 3.0, 0.0, 0.0), [0, 0, 255]);
    assert_eq!(*image.get_pixel(5, 5), Rgb([0, 0, 0]));
  }

  #[test]
  fn uses_category_color_or_red() {
    let mut categories = CategoryRegistry::new();
    categories.add("cat", "rgb(0, 0, 255)").unwrap();
    let mut annotations = AnnotationSet::new(20, 20);
    annotations
      .bboxes
      .push(Annotation::manual(BBox::new(0.0, 0.0, 5.0, 5.0), "cat"));
    annotations
      .bboxes
      .push(Annotation::manual(BBox::new(10.0, 10.0, 5.0, 5.0), "kite"));

    let image = DecodedImage::from(image::RgbaImage::new(20, 20));
    let canvas = Draw::default().render(&image, &annotations, &categories);
    assert_eq!(*canvas.get_pixel(0, 0), Rgb([0, 0, 255]));
    assert_eq!(*canvas.get_pixel(10, 10), Rgb([255, 0, 0]));
  }

  #[test]
  fn label_sits_above_the_box_when_there_is_room() {
    assert_eq!(label_origin(&BBox::new(10.0, 30.0, 20.0, 20.0), 20), (10, 10));
    assert_eq!(label_origin(&BBox::new(10.0, 5.0, 20.0, 20.0), 20), (10, 5));
    assert_eq!(label_origin(&BBox::new(-3.0, -2.0, 20.0, 20.0), 20), (0, 0));
  }

  #[test]
  fn labels_need_a_font() {
    let draw = Draw::default();
    assert!(!draw.has_font());

    let mut image = RgbImage::new(40, 40);
    draw.draw_label(&mut image, &BBox::new(5.0, 25.0, 10.0, 10.0), "cat", [0, 255, 0]);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }
}
