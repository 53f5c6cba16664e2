// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/args.rs - 项目参数配置
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
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::config::{ConfigError, Device, PipelineConfig};

/// Shuanghuan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址，例如 onnx:///models/ssd.onnx
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 推理设备（cpu、cuda、cuda:<id>）
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.5, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 输入来源
  /// 支持格式:
  /// - 图片: image:///path/to/image.png?repeat=100
  /// - GStreamer: gst://camera/dev/video0、gst://file/path/to/video.mp4
  /// - V4L2: v4l:///dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出路径
  /// 支持格式:
  /// - 图片: image:///path/to/latest.png
  /// - 目录记录: folder:///path/to/record
  /// - GStreamer: gst://display、gst:///path/to/output.mp4
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// 最大显示帧数，0 表示无限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: u64,

  /// 单次等待推理结果的超时（毫秒）
  #[arg(long, value_name = "MS")]
  pub wait_timeout_ms: Option<u64>,

  /// 标注文本使用的字体文件，默认使用内嵌字体
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
}

impl Args {
  pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
    let device: Device = self.device.parse()?;
    let frame_limit = (self.frame_number > 0).then_some(self.frame_number);

    PipelineConfig::new(self.model, self.input, self.output)
      .with_device(device)
      .with_confidence_threshold(self.confidence)?
      .with_wait_timeout(self.wait_timeout_ms.map(Duration::from_millis))
      .map(|config| config.with_frame_limit(frame_limit).with_font(self.font))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn parse(extra: &[&str]) -> Args {
    let mut argv = vec![
      "shuanghuan",
      "--model",
      "onnx:///m.onnx",
      "--input",
      "image:///in.png",
      "--output",
      "image:///out.png",
    ];
    argv.extend_from_slice(extra);
    Args::try_parse_from(argv).unwrap()
  }

  #[test]
  fn defaults_resolve_to_cpu_without_limits() {
    let config = parse(&[]).into_config().unwrap();
    assert_eq!(config.device, Device::Cpu);
    assert_eq!(config.confidence_threshold, 0.5);
    assert_eq!(config.frame_limit, None);
    assert_eq!(config.wait_timeout, None);
  }

  #[test]
  fn options_are_carried_into_config() {
    let config = parse(&[
      "--device",
      "cuda:1",
      "--confidence",
      "0.25",
      "--frame-number",
      "10",
      "--wait-timeout-ms",
      "500",
    ])
    .into_config()
    .unwrap();
    assert_eq!(config.device, Device::Cuda(1));
    assert_eq!(config.confidence_threshold, 0.25);
    assert_eq!(config.frame_limit, Some(10));
    assert_eq!(config.wait_timeout, Some(Duration::from_millis(500)));
  }

  #[test]
  fn invalid_values_are_config_errors() {
    assert!(matches!(
      parse(&["--device", "tpu"]).into_config(),
      Err(ConfigError::UnknownDevice(_))
    ));
    assert!(matches!(
      parse(&["--confidence", "2"]).into_config(),
      Err(ConfigError::ThresholdOutOfRange(_))
    ));
    assert!(matches!(
      parse(&["--wait-timeout-ms", "0"]).into_config(),
      Err(ConfigError::ZeroTimeout)
    ));
  }
}
