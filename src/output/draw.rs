// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/output/draw.rs - 绘制指令光栅化
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

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::{info, warn};

use crate::overlay::DrawCommand;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_COLOR: [u8; 3] = [255, 0, 0]; // 红色

// 默认字体 DejaVu Sans，许可见 assets/LICENSE-font
static DEFAULT_FONT: &[u8] = include_bytes!("../../assets/font.ttf");

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  missing_font_warned: AtomicBool,
}

impl Default for Draw {
  /// 使用内嵌字体；`--font` 可以替换它
  fn default() -> Self {
    let font = FontArc::try_from_slice(DEFAULT_FONT)
      .inspect_err(|e| warn!("无法加载内嵌字体: {}", e))
      .ok();
    Self::new(font)
  }
}

impl Draw {
  pub fn new(font: Option<FontArc>) -> Self {
    Self {
      font,
      font_size: LABEL_FONT_SIZE,
      missing_font_warned: AtomicBool::new(false),
    }
  }

  pub fn from_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("已加载字体: {}", path.display());
    Ok(Self::new(Some(font)))
  }

  pub fn draw_commands(&self, image: &mut RgbImage, commands: &[DrawCommand]) {
    for command in commands {
      match command {
        DrawCommand::Rect {
          x_min,
          y_min,
          x_max,
          y_max,
        } => self.draw_rect(image, *x_min, *y_min, *x_max, *y_max),
        DrawCommand::Text { x, y, text } => self.draw_text(image, *x, *y, text),
      }
    }
  }

  // 边框裁剪到图像范围内，退化的框不绘制
  fn draw_rect(&self, image: &mut RgbImage, x_min: f32, y_min: f32, x_max: f32, y_max: f32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x0 = (x_min.floor() as i32).clamp(0, w - 1);
    let y0 = (y_min.floor() as i32).clamp(0, h - 1);
    let x1 = (x_max.ceil() as i32).clamp(0, w - 1);
    let y1 = (y_max.ceil() as i32).clamp(0, h - 1);
    if x0 >= x1 || y0 >= y1 {
      return;
    }

    let rect = Rect::at(x0, y0).of_size((x1 - x0 + 1) as u32, (y1 - y0 + 1) as u32);
    draw_hollow_rect_mut(image, rect, Rgb(LABEL_COLOR));
  }

  fn draw_text(&self, image: &mut RgbImage, x: f32, baseline: f32, text: &str) {
    let Some(font) = self.font.as_ref() else {
      if !self.missing_font_warned.swap(true, Ordering::Relaxed) {
        warn!("未配置字体，跳过文本绘制");
      }
      return;
    };

    // imageproc 以文本左上角定位
    let top = (baseline - self.font_size).max(0.0) as i32;
    draw_text_mut(
      image,
      Rgb(LABEL_COLOR),
      x.max(0.0) as i32,
      top,
      PxScale::from(self.font_size),
      font,
      text,
    );
  }
}
