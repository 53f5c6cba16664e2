// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/frame.rs - 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const FRAME_CHANNELS: usize = 3;

/// 像素排列格式，每通道 8 位，紧密排列 (HWC)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Rgb8,
  Bgr8,
}

#[derive(Error, Debug)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {width}x{height}")]
  EmptyFrame { width: u32, height: u32 },
}

/// 一帧图像，由输入源产生，序号单调递增
#[derive(Debug, Clone)]
pub struct Frame {
  sequence: u64,
  width: u32,
  height: u32,
  format: PixelFormat,
  data: Box<[u8]>,
}

impl Frame {
  pub fn new(
    sequence: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    data: Vec<u8>,
  ) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyFrame { width, height });
    }

    let expected = FRAME_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      sequence,
      width,
      height,
      format,
      data: data.into_boxed_slice(),
    })
  }

  /// 以纯色填充的帧
  pub fn filled(sequence: u64, width: u32, height: u32, pixel: [u8; 3]) -> Result<Self, FrameError> {
    let data = pixel
      .iter()
      .copied()
      .cycle()
      .take(FRAME_CHANNELS * width as usize * height as usize)
      .collect();
    Self::new(sequence, width, height, PixelFormat::Rgb8, data)
  }

  pub fn from_rgb_image(sequence: u64, image: RgbImage) -> Result<Self, FrameError> {
    let (width, height) = image.dimensions();
    Self::new(sequence, width, height, PixelFormat::Rgb8, image.into_raw())
  }

  pub fn sequence(&self) -> u64 {
    self.sequence
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  /// 读取 (x, y) 处像素，始终以 RGB 顺序返回
  pub fn rgb_at(&self, x: u32, y: u32) -> [u8; 3] {
    let idx = (y as usize * self.width as usize + x as usize) * FRAME_CHANNELS;
    let px = &self.data[idx..idx + FRAME_CHANNELS];
    match self.format {
      PixelFormat::Rgb8 => [px[0], px[1], px[2]],
      PixelFormat::Bgr8 => [px[2], px[1], px[0]],
    }
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    match self.format {
      PixelFormat::Rgb8 => RgbImage::from_raw(self.width, self.height, self.data.to_vec())
        .unwrap_or_else(|| RgbImage::new(self.width, self.height)),
      PixelFormat::Bgr8 => {
        ImageBuffer::from_fn(self.width, self.height, |x, y| Rgb(self.rgb_at(x, y)))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_wrong_length() {
    let err = Frame::new(0, 2, 2, PixelFormat::Rgb8, vec![0; 11]).unwrap_err();
    assert!(matches!(
      err,
      FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      }
    ));
  }

  #[test]
  fn rejects_empty_frame() {
    assert!(Frame::new(0, 0, 4, PixelFormat::Rgb8, vec![]).is_err());
  }

  #[test]
  fn bgr_frames_convert_to_rgb() {
    let frame = Frame::new(7, 1, 1, PixelFormat::Bgr8, vec![10, 20, 30]).unwrap();
    assert_eq!(frame.rgb_at(0, 0), [30, 20, 10]);
    assert_eq!(frame.to_rgb_image().get_pixel(0, 0), &Rgb([30, 20, 10]));
    assert_eq!(frame.sequence(), 7);
  }

  #[test]
  fn filled_frame_repeats_pixel() {
    let frame = Frame::filled(1, 3, 2, [1, 2, 3]).unwrap();
    assert_eq!(frame.as_bytes().len(), 18);
    assert_eq!(frame.rgb_at(2, 1), [1, 2, 3]);
  }
}
