// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::PathBuf;

use chrono::{Datelike, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{AnnotatedFrame, FrameSink, SinkError, draw::Draw},
  overlay::DrawCommand,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 把带标注的帧按日期写入目录
///
/// `folder:///var/record`：只记录含检测框的帧；`folder:///var/record?always` 记录所有帧。
/// 文件路径形如 `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.png`。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  draw: Draw,
  frame_counter: u16,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      draw: Draw::default(),
      frame_counter: 0,
      always,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    let filename = format!("{}-{:04X}.png", now.format("%H-%M-%S"), self.frame_id());
    Ok(directory.join(filename))
  }
}

impl FrameSink for DirectoryRecordOutput {
  fn show(&mut self, frame: &AnnotatedFrame<'_>) -> Result<(), SinkError> {
    let has_detection = frame
      .commands
      .iter()
      .any(|c| matches!(c, DrawCommand::Rect { .. }));
    if !self.always && !has_detection {
      return Ok(());
    }

    let path = self.frame_path()?;
    frame
      .render(&self.draw)
      .save(&path)
      .map_err(DirectoryRecordOutputError::from)?;
    debug!("记录帧 {} 到 {}", frame.frame.sequence(), path.display());
    Ok(())
  }

  fn poll_cancel(&mut self) -> bool {
    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Frame;

  fn count_png(dir: &std::path::Path) -> usize {
    let mut count = 0;
    for entry in std::fs::read_dir(dir).unwrap() {
      let path = entry.unwrap().path();
      if path.is_dir() {
        count += count_png(&path);
      } else if path.extension().is_some_and(|e| e == "png") {
        count += 1;
      }
    }
    count
  }

  #[test]
  fn records_only_frames_with_boxes_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let mut output = DirectoryRecordOutput::from_url(&url).unwrap();

    let frame = Frame::filled(0, 8, 8, [10, 10, 10]).unwrap();
    let boxed = [DrawCommand::Rect {
      x_min: 1.0,
      y_min: 1.0,
      x_max: 4.0,
      y_max: 4.0,
    }];
    let fps_only = [DrawCommand::Text {
      x: 0.0,
      y: 20.0,
      text: String::from("30.00 fps"),
    }];

    output
      .show(&AnnotatedFrame {
        frame: &frame,
        commands: &fps_only,
      })
      .unwrap();
    output
      .show(&AnnotatedFrame {
        frame: &frame,
        commands: &boxed,
      })
      .unwrap();

    assert_eq!(count_png(dir.path()), 1);
  }

  #[test]
  fn always_records_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let url = url::Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let mut output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = Frame::filled(0, 8, 8, [0, 0, 0]).unwrap();

    for _ in 0..3 {
      output
        .show(&AnnotatedFrame {
          frame: &frame,
          commands: &[],
        })
        .unwrap();
    }
    assert_eq!(count_png(dir.path()), 3);
  }
}
