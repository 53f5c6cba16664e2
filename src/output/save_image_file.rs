// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{AnnotatedFrame, FrameSink, SinkError, draw::Draw},
};

/// 每帧覆盖写入同一个图像文件
pub struct SaveImageFileOutput {
  path: String,
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

    Ok(SaveImageFileOutput {
      path: uri.path().to_string(),
      draw: Draw::default(),
    })
  }
}

impl SaveImageFileOutput {
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = Path::new(&self.path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    debug!("保存图像到文件: {}", self.path);
    Ok(())
  }
}

impl FrameSink for SaveImageFileOutput {
  fn show(&mut self, frame: &AnnotatedFrame<'_>) -> Result<(), SinkError> {
    let image = frame.render(&self.draw);
    self.save_image(image)?;
    Ok(())
  }

  fn poll_cancel(&mut self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::Frame, overlay::DrawCommand};

  #[test]
  fn writes_annotated_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/latest.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let mut output = SaveImageFileOutput::from_url(&url).unwrap();

    let frame = Frame::filled(0, 16, 16, [0, 0, 0]).unwrap();
    let commands = [DrawCommand::Rect {
      x_min: 1.0,
      y_min: 1.0,
      x_max: 8.0,
      y_max: 8.0,
    }];
    output
      .show(&AnnotatedFrame {
        frame: &frame,
        commands: &commands,
      })
      .unwrap();

    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.dimensions(), (16, 16));
    assert_eq!(saved.get_pixel(1, 1).0, [255, 0, 0]);
    assert!(!output.poll_cancel());
  }
}
