// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/meter.rs - 帧率计
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
use std::time::{Duration, Instant};

// 零间隔按 1 微秒计
const MIN_INTERVAL: Duration = Duration::from_micros(1);

/// 瞬时帧率，不做平均
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRate(pub f64);

impl fmt::Display for FrameRate {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.2} fps", self.0)
  }
}

pub struct FrameRateMeter {
  last_tick: Instant,
}

impl Default for FrameRateMeter {
  fn default() -> Self {
    Self::new()
  }
}

impl FrameRateMeter {
  /// 以当前时刻为初始时刻
  pub fn new() -> Self {
    Self::starting_at(Instant::now())
  }

  pub fn starting_at(tick: Instant) -> Self {
    Self { last_tick: tick }
  }

  pub fn tick(&mut self) -> FrameRate {
    self.tick_at(Instant::now())
  }

  pub fn tick_at(&mut self, now: Instant) -> FrameRate {
    let elapsed = now.saturating_duration_since(self.last_tick).max(MIN_INTERVAL);
    self.last_tick = now;
    FrameRate(1000.0 / (elapsed.as_secs_f64() * 1000.0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn half_second_is_two_fps() {
    let start = Instant::now();
    let mut meter = FrameRateMeter::starting_at(start);
    let fps = meter.tick_at(start + Duration::from_millis(500));
    assert_eq!(fps.to_string(), "2.00 fps");
  }

  #[test]
  fn only_last_interval_counts() {
    let start = Instant::now();
    let mut meter = FrameRateMeter::starting_at(start);
    meter.tick_at(start + Duration::from_millis(500));
    let fps = meter.tick_at(start + Duration::from_millis(540));
    assert_eq!(fps.to_string(), "25.00 fps");
  }

  #[test]
  fn zero_interval_stays_finite() {
    let start = Instant::now();
    let mut meter = FrameRateMeter::starting_at(start);
    assert!(meter.tick_at(start).0.is_finite());
  }
}
