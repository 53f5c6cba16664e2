// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/task.rs - 双缓冲调度任务
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::{thread, time::Duration, time::Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  config::PipelineConfig,
  engine::{Engine, EngineError, SLOT_COUNT, SlotId},
  frame::Frame,
  input::{FrameSource, SourceError},
  meter::FrameRateMeter,
  output::{AnnotatedFrame, FrameSink, SinkError},
  overlay::{DrawCommand, overlay},
};

const FPS_TEXT_ORIGIN: (f32, f32) = (0.0, 20.0);
const FORCE_EXIT_AFTER: Duration = Duration::from_secs(30);

pub trait Task<I, M, O>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入错误: {0}")]
  Source(#[from] SourceError),
  #[error("推理错误: {0}")]
  Engine(#[from] EngineError),
  #[error("输出错误: {0}")]
  Sink(#[from] SinkError),
  #[error("推理槽 {0} 没有对应的帧")]
  MissingFrame(SlotId),
}

impl PipelineError {
  /// 进程退出码：输入 2，推理 3，输出 4，其他 1
  pub fn exit_code(&self) -> u8 {
    match self {
      PipelineError::Source(_) => 2,
      PipelineError::Engine(_) => 3,
      PipelineError::Sink(_) => 4,
      PipelineError::MissingFrame(_) => 1,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  /// 输出端请求退出
  Cancelled,
  /// 收到 Ctrl-C
  Interrupted,
  FrameLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
  pub rendered: u64,
  pub stop: StopReason,
}

/// 进程级中断标志
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
  flag: Arc<AtomicBool>,
}

impl Interrupt {
  pub fn new() -> Self {
    Self::default()
  }

  /// 注册 Ctrl-C 处理函数；收到信号 30 秒后仍未退出则强制结束进程
  pub fn install() -> Result<Self, ctrlc::Error> {
    let interrupt = Self::new();
    let flag = interrupt.flag.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.store(true, Ordering::SeqCst);
      thread::spawn(|| {
        thread::sleep(FORCE_EXIT_AFTER);
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;
    Ok(interrupt)
  }

  pub fn trigger(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn triggered(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }
}

/// 双缓冲流水线：渲染当前槽的结果时，另一个槽已在推理下一帧
#[derive(Debug, Clone)]
pub struct DoubleBufferedTask {
  threshold: f32,
  frame_limit: Option<u64>,
  interrupt: Option<Interrupt>,
}

impl Default for DoubleBufferedTask {
  fn default() -> Self {
    Self {
      threshold: 0.5,
      frame_limit: None,
      interrupt: None,
    }
  }
}

impl DoubleBufferedTask {
  pub fn from_config(config: &PipelineConfig) -> Self {
    Self::default()
      .with_threshold(config.confidence_threshold)
      .with_frame_limit(config.frame_limit)
  }

  pub fn with_threshold(mut self, threshold: f32) -> Self {
    self.threshold = threshold;
    self
  }

  pub fn with_frame_limit(mut self, frame_limit: Option<u64>) -> Self {
    self.frame_limit = frame_limit;
    self
  }

  pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn interrupted(&self) -> bool {
    self.interrupt.as_ref().is_some_and(Interrupt::triggered)
  }
}

impl<S: FrameSource, E: Engine, K: FrameSink> Task<S, E, K> for DoubleBufferedTask {
  type Output = RunReport;
  type Error = PipelineError;

  fn run_task(self, mut source: S, mut engine: E, mut sink: K) -> Result<RunReport, PipelineError> {
    info!("开始双缓冲任务...");
    let (width, height) = source.open()?;
    info!("输入源已打开: {}x{}", width, height);

    let mut frames: [Option<Frame>; SLOT_COUNT] = [None, None];
    let mut current = SlotId::FIRST;

    let first = source.read()?;
    engine.bind_slot(current, &first)?;
    engine.start_async(current)?;
    frames[current.index()] = Some(first);
    debug!("首帧已提交到推理槽 {}", current);

    let mut meter = FrameRateMeter::new();
    let mut rendered: u64 = 0;

    let stop = loop {
      let next = current.other();

      // 读取失败（包括输入耗尽）时直接返回，不等待在途的推理
      let frame = source.read().inspect_err(|e| {
        warn!("第 {} 帧之后读取输入失败: {}", rendered, e);
      })?;
      engine.bind_slot(next, &frame)?;
      engine.start_async(next)?;
      frames[next.index()] = Some(frame);

      let wait_start = Instant::now();
      engine.wait(current)?;
      let waited = wait_start.elapsed();

      let shown = frames[current.index()]
        .take()
        .ok_or(PipelineError::MissingFrame(current))?;
      let mut commands = overlay(
        shown.width(),
        shown.height(),
        engine.read_results(current)?,
        self.threshold,
      );
      let fps = meter.tick();
      commands.push(DrawCommand::Text {
        x: FPS_TEXT_ORIGIN.0,
        y: FPS_TEXT_ORIGIN.1,
        text: fps.to_string(),
      });

      sink.show(&AnnotatedFrame {
        frame: &shown,
        commands: &commands,
      })?;
      rendered += 1;
      debug!(
        "第 {} 帧已显示（序号 {}，槽 {}），等待 {:.2?}，{}",
        rendered,
        shown.sequence(),
        current,
        waited,
        fps
      );

      if sink.poll_cancel() {
        break StopReason::Cancelled;
      }
      if self.interrupted() {
        warn!("中断信号接收，退出任务循环");
        break StopReason::Interrupted;
      }
      if self.frame_limit.is_some_and(|n| rendered >= n) {
        info!("达到指定帧数 {}, 退出任务循环", rendered);
        break StopReason::FrameLimit;
      }

      current = next;
    };

    info!("任务完成，共显示 {} 帧，退出原因: {:?}", rendered, stop);
    Ok(RunReport { rendered, stop })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn exit_codes_are_distinct() {
    assert_eq!(PipelineError::from(SourceError::Exhausted).exit_code(), 2);
    assert_eq!(
      PipelineError::from(EngineError::WorkerGone(SlotId::FIRST)).exit_code(),
      3
    );
    assert_eq!(
      PipelineError::from(SinkError::SchemeMismatch("x".into())).exit_code(),
      4
    );
  }

  #[test]
  fn interrupt_is_shared_between_clones() {
    let interrupt = Interrupt::new();
    let task = DoubleBufferedTask::default().with_interrupt(interrupt.clone());
    assert!(!task.interrupted());
    interrupt.trigger();
    assert!(task.interrupted());
  }
}
