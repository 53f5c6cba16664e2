// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, SourceError},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid repeat count: {0}")]
  InvalidRepeat(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 把一张静态图片当作视频源，重复 `repeat` 次后耗尽
///
/// `image:///path/to/file.png?repeat=100`，不指定 `repeat` 时无限重复。
pub struct ImageFileInput {
  path: String,
  repeat: Option<u64>,
  image: Option<RgbImage>,
  emitted: u64,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let repeat = match url.query_pairs().find(|(k, _)| k == "repeat") {
      Some((_, v)) => Some(
        v.parse::<u64>()
          .map_err(|_| ImageFileInputError::InvalidRepeat(v.to_string()))?,
      ),
      None => None,
    };

    Ok(ImageFileInput {
      path: url.path().to_string(),
      repeat,
      image: None,
      emitted: 0,
    })
  }
}

impl FrameSource for ImageFileInput {
  fn open(&mut self) -> Result<(u32, u32), SourceError> {
    let image = ImageReader::open(&self.path)
      .map_err(ImageFileInputError::from)?
      .decode()
      .map_err(ImageFileInputError::from)?
      .to_rgb8();
    let dims = image.dimensions();
    info!("图像输入已打开: {} ({}x{})", self.path, dims.0, dims.1);
    self.image = Some(image);
    Ok(dims)
  }

  fn read(&mut self) -> Result<Frame, SourceError> {
    let image = self.image.as_ref().ok_or(SourceError::NotOpened)?;
    if self.repeat.is_some_and(|n| self.emitted >= n) {
      return Err(SourceError::Exhausted);
    }

    let frame = Frame::from_rgb_image(self.emitted, image.clone())?;
    self.emitted += 1;
    Ok(frame)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  fn write_png(dir: &tempfile::TempDir) -> String {
    let path = dir.path().join("still.png");
    RgbImage::from_pixel(6, 4, Rgb([9, 8, 7]))
      .save(&path)
      .unwrap();
    path.to_str().unwrap().to_string()
  }

  #[test]
  fn replays_image_then_exhausts() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("image://{}?repeat=2", write_png(&dir))).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    assert!(matches!(input.read(), Err(SourceError::NotOpened)));
    assert_eq!(input.open().unwrap(), (6, 4));

    let first = input.read().unwrap();
    let second = input.read().unwrap();
    assert_eq!((first.sequence(), second.sequence()), (0, 1));
    assert_eq!(second.rgb_at(5, 3), [9, 8, 7]);
    assert!(matches!(input.read(), Err(SourceError::Exhausted)));
  }

  #[test]
  fn missing_file_fails_on_open() {
    let url = Url::parse("image:///definitely/not/here.png").unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();
    assert!(matches!(
      input.open(),
      Err(SourceError::ImageFileInputError(_))
    ));
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("gst://camera/dev/video0").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
