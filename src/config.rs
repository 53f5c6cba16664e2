// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/config.rs - 流水线配置
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

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
  #[error("置信度阈值必须在 0.0 - 1.0 之间: {0}")]
  ThresholdOutOfRange(f32),
  #[error("无法识别的设备: {0}")]
  UnknownDevice(String),
  #[error("等待超时必须大于 0")]
  ZeroTimeout,
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Device {
  #[default]
  Cpu,
  Cuda(i32),
}

impl FromStr for Device {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let lower = s.trim().to_ascii_lowercase();
    match lower.as_str() {
      "cpu" => Ok(Device::Cpu),
      "cuda" | "gpu" => Ok(Device::Cuda(0)),
      _ => lower
        .strip_prefix("cuda:")
        .and_then(|id| id.parse().ok())
        .map(Device::Cuda)
        .ok_or_else(|| ConfigError::UnknownDevice(s.to_string())),
    }
  }
}

impl fmt::Display for Device {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Device::Cpu => write!(f, "cpu"),
      Device::Cuda(id) => write!(f, "cuda:{}", id),
    }
  }
}

/// 启动时构造一次、此后只读的配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
  pub model: Url,
  pub device: Device,
  pub confidence_threshold: f32,
  pub input: Url,
  pub output: Url,
  pub frame_limit: Option<u64>,
  pub wait_timeout: Option<Duration>,
  pub font: Option<PathBuf>,
}

impl PipelineConfig {
  pub fn new(model: Url, input: Url, output: Url) -> Self {
    Self {
      model,
      device: Device::Cpu,
      confidence_threshold: 0.5,
      input,
      output,
      frame_limit: None,
      wait_timeout: None,
      font: None,
    }
  }

  pub fn with_device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Result<Self, ConfigError> {
    if !(0.0..=1.0).contains(&threshold) {
      return Err(ConfigError::ThresholdOutOfRange(threshold));
    }
    self.confidence_threshold = threshold;
    Ok(self)
  }

  pub fn with_frame_limit(mut self, limit: Option<u64>) -> Self {
    self.frame_limit = limit;
    self
  }

  pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Result<Self, ConfigError> {
    if timeout.is_some_and(|t| t.is_zero()) {
      return Err(ConfigError::ZeroTimeout);
    }
    self.wait_timeout = timeout;
    Ok(self)
  }

  pub fn with_font(mut self, font: Option<PathBuf>) -> Self {
    self.font = font;
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn config() -> PipelineConfig {
    PipelineConfig::new(
      Url::parse("onnx:///m.onnx").unwrap(),
      Url::parse("image:///in.png").unwrap(),
      Url::parse("image:///out.png").unwrap(),
    )
  }

  #[test]
  fn parses_devices() {
    assert_eq!("CPU".parse::<Device>(), Ok(Device::Cpu));
    assert_eq!("cuda".parse::<Device>(), Ok(Device::Cuda(0)));
    assert_eq!("cuda:2".parse::<Device>(), Ok(Device::Cuda(2)));
    assert!("myriad".parse::<Device>().is_err());
    assert_eq!(Device::Cuda(1).to_string(), "cuda:1");
  }

  #[test]
  fn validates_threshold() {
    assert!(config().with_confidence_threshold(1.5).is_err());
    assert!(config().with_confidence_threshold(-0.1).is_err());
    let c = config().with_confidence_threshold(0.7).unwrap();
    assert_eq!(c.confidence_threshold, 0.7);
  }

  #[test]
  fn rejects_zero_timeout() {
    assert_eq!(
      config().with_wait_timeout(Some(Duration::ZERO)).unwrap_err(),
      ConfigError::ZeroTimeout
    );
    assert!(config().with_wait_timeout(None).is_ok());
  }
}
