// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频输出
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

//! # GStreamer 视频输出模块
//!
//! 把带标注的帧推入 appsrc，显示到窗口或编码为视频文件。
//!
//! ## URL 格式
//!
//! - `gst://display` - 使用 `autovideosink` 显示
//! - `gst:///output.mp4?fps=30` - 编码为文件
//!
//! ## 支持的文件格式
//!
//! - **MP4** (H.264) - 默认格式
//! - **MKV** (Matroska)
//! - **AVI**
//! - **WebM** (VP8)
//!
//! 画面尺寸取自第一帧，之后的帧必须保持一致。
//! 显示窗口被关闭（管道上出现 EOS 或错误）时，[`FrameSink::poll_cancel`] 返回 `true`。

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{AnnotatedFrame, FrameSink, SinkError, draw::Draw},
};

const DEFAULT_FPS: i32 = 30;
const DISPLAY_HOST: &str = "display";

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  /// URI scheme 不匹配
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  /// GStreamer 库错误
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  /// GStreamer 布尔操作错误
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  /// 无法获取 appsrc 元素
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  /// 无法转换元素为 appsrc
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 管道错误
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  /// 状态改变错误
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  /// 帧尺寸与第一帧不同
  #[error("Frame size changed: expected {expected:?}, got {actual:?}")]
  FrameSizeChanged {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

/// GStreamer 视频输出
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: i32,
  size: Option<(u32, u32)>,
  frame_count: u64,
  draw: Draw,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    gst::init()?;

    let fps: i32 = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse().ok())
      .filter(|fps| *fps > 0)
      .unwrap_or(DEFAULT_FPS);

    let pipeline_desc = pipeline_description(url);
    info!("创建视频输出管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;
    appsrc.set_format(gst::Format::Time);

    Ok(GStreamerVideoOutput {
      pipeline,
      appsrc,
      fps,
      size: None,
      frame_count: 0,
      draw: Draw::default(),
    })
  }
}

fn pipeline_description(url: &Url) -> String {
  if url.host_str() == Some(DISPLAY_HOST) {
    return "appsrc name=src ! videoconvert ! autovideosink sync=false".to_string();
  }

  let file_path = url.path();
  let encoder = if file_path.ends_with(".mkv") {
    "video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! matroskamux"
  } else if file_path.ends_with(".avi") {
    "video/x-raw,format=I420 ! x264enc ! avimux"
  } else if file_path.ends_with(".webm") {
    "vp8enc ! webmmux"
  } else {
    "video/x-raw,format=I420 ! x264enc speed-preset=fast tune=zerolatency ! h264parse ! mp4mux"
  };
  format!(
    "appsrc name=src ! videoconvert ! {} ! filesink location={}",
    encoder, file_path
  )
}

impl GStreamerVideoOutput {
  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  // caps 由第一帧决定
  fn ensure_started(&mut self, width: u32, height: u32) -> Result<(), GStreamerVideoOutputError> {
    match self.size {
      Some(expected) if expected == (width, height) => Ok(()),
      Some(expected) => Err(GStreamerVideoOutputError::FrameSizeChanged {
        expected,
        actual: (width, height),
      }),
      None => {
        let caps = gst::Caps::builder("video/x-raw")
          .field("format", "RGB")
          .field("width", width as i32)
          .field("height", height as i32)
          .field("framerate", gst::Fraction::new(self.fps, 1))
          .build();
        self.appsrc.set_caps(Some(&caps));
        self.pipeline.set_state(gst::State::Playing)?;
        self.size = Some((width, height));
        info!("视频输出已启动: {}x{} @ {} fps", width, height, self.fps);
        Ok(())
      }
    }
  }

  fn push_frame(&mut self, data: Vec<u8>) -> Result<(), GStreamerVideoOutputError> {
    let frame_duration = 1_000_000_000 / self.fps as u64;
    let mut buffer = gst::Buffer::from_mut_slice(data);
    {
      let buffer_ref = buffer.make_mut();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(
        self.frame_count * frame_duration,
      ));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration));
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    Ok(())
  }
}

impl FrameSink for GStreamerVideoOutput {
  fn show(&mut self, frame: &AnnotatedFrame<'_>) -> Result<(), SinkError> {
    self.ensure_started(frame.frame.width(), frame.frame.height())?;
    let image = frame.render(&self.draw);
    self.push_frame(image.into_raw())?;
    Ok(())
  }

  fn poll_cancel(&mut self) -> bool {
    let Some(bus) = self.pipeline.bus() else {
      return false;
    };
    let Some(msg) = bus.pop_filtered(&[gst::MessageType::Eos, gst::MessageType::Error]) else {
      return false;
    };
    match msg.view() {
      gst::MessageView::Eos(..) => info!("视频输出收到 EOS"),
      gst::MessageView::Error(err) => {
        warn!("视频输出管道错误: {} ({:?})", err.error(), err.debug())
      }
      _ => {}
    }
    true
  }
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if self.size.is_some() {
      let _ = self.appsrc.end_of_stream();
      // 等待 EOS 写完文件尾
      if let Some(bus) = self.pipeline.bus() {
        let _ = bus.timed_pop_filtered(
          gst::ClockTime::from_seconds(2),
          &[gst::MessageType::Eos, gst::MessageType::Error],
        );
      }
    }

    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止视频输出管道失败: {}", e);
    }
    info!("视频输出已关闭，共写入 {} 帧", self.frame_count);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_host_uses_autovideosink() {
    let url = Url::parse("gst://display").unwrap();
    assert!(pipeline_description(&url).contains("autovideosink"));
  }

  #[test]
  fn file_extension_selects_muxer() {
    let cases = [
      ("gst:///tmp/out.mp4", "mp4mux"),
      ("gst:///tmp/out.mkv", "matroskamux"),
      ("gst:///tmp/out.avi", "avimux"),
      ("gst:///tmp/out.webm", "webmmux"),
      ("gst:///tmp/out", "mp4mux"),
    ];
    for (url, muxer) in cases {
      let desc = pipeline_description(&Url::parse(url).unwrap());
      assert!(desc.contains(muxer), "{url} -> {desc}");
      assert!(desc.starts_with("appsrc name=src"));
    }
  }
}
