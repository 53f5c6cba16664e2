// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/input/v4l_input.rs - V4L2 摄像头输入
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

use std::pin::Pin;

use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelFormat},
  input::{FrameSource, SourceError},
};

const V4L_BUFFER_COUNT: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

/// V4L2 摄像头（YUYV）
///
/// `v4l:///dev/video0?width=640&height=480`
pub struct V4lInput {
  device_path: String,
  width: u32,
  height: u32,
  // stream 必须先于 device 释放
  stream: Option<Stream<'static>>,
  device: Option<Pin<Box<Device>>>,
  sequence: u64,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      "/dev/video0".to_string()
    } else {
      url.path().to_string()
    };

    let parse = |key: &str, default: u32| {
      url
        .query_pairs()
        .find(|(k, _)| k == key)
        .and_then(|(_, v)| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    Ok(V4lInput {
      device_path,
      width: parse("width", 640),
      height: parse("height", 480),
      stream: None,
      device: None,
      sequence: 0,
    })
  }
}

impl V4lInput {
  /// 将 YUYV 格式转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb.truncate((width * height * 3) as usize);
    rgb
  }
}

impl Drop for V4lInput {
  fn drop(&mut self) {
    self.stream.take();
    self.device.take();
  }
}

impl FrameSource for V4lInput {
  fn open(&mut self) -> Result<(u32, u32), SourceError> {
    let device = Box::pin(Device::with_path(&self.device_path).map_err(V4lInputError::from)?);

    let mut format = device.format().map_err(V4lInputError::from)?;
    format.width = self.width;
    format.height = self.height;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device.set_format(&format).map_err(V4lInputError::from)?;
    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()).into());
    }
    self.width = format.width;
    self.height = format.height;

    // SAFETY: device 被 Pin<Box> 固定在堆上且不会移动；
    // stream 与 device 存放在同一结构体中，并在 Drop 中先于 device 释放
    let device_ref: &Device = &device;
    let stream = unsafe {
      let device_static: &'static Device = std::mem::transmute(device_ref);
      Stream::with_buffers(device_static, Type::VideoCapture, V4L_BUFFER_COUNT)
        .map_err(V4lInputError::from)?
    };

    self.device = Some(device);
    self.stream = Some(stream);
    info!(
      "V4L2 摄像头已打开: {} ({}x{})",
      self.device_path, self.width, self.height
    );
    Ok((self.width, self.height))
  }

  fn read(&mut self) -> Result<Frame, SourceError> {
    let stream = self.stream.as_mut().ok_or(SourceError::NotOpened)?;
    let (buffer, _meta) = stream.next().map_err(V4lInputError::from)?;
    let rgb = Self::yuyv_to_rgb(buffer, self.width, self.height);

    let frame = Frame::new(self.sequence, self.width, self.height, PixelFormat::Rgb8, rgb)?;
    self.sequence += 1;
    Ok(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn grey_yuyv_maps_to_grey_rgb() {
    let rgb = V4lInput::yuyv_to_rgb(&[128, 128, 64, 128], 2, 1);
    assert_eq!(rgb, vec![128, 128, 128, 64, 64, 64]);
  }

  #[test]
  fn url_defaults_to_first_device() {
    let input = V4lInput::from_url(&Url::parse("v4l:///?width=320").unwrap()).unwrap();
    assert_eq!(input.device_path, "/dev/video0");
    assert_eq!((input.width, input.height), (320, 480));
  }
}
