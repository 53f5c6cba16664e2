// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/engine.rs - 推理引擎与推理槽
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
use std::time::Duration;

use thiserror::Error;

use crate::{
  frame::Frame,
  model::{Detection, ShapeMismatch},
};

pub const SLOT_COUNT: usize = 2;

/// 推理槽编号，只有 0 和 1 两个取值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(usize);

impl SlotId {
  pub const FIRST: SlotId = SlotId(0);
  pub const SECOND: SlotId = SlotId(1);

  pub fn index(self) -> usize {
    self.0
  }

  /// 另一个槽
  pub fn other(self) -> SlotId {
    SlotId(1 - self.0)
  }
}

impl fmt::Display for SlotId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
  Idle,
  Submitted,
  Running,
  Ready,
}

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("输入形状错误: {0}")]
  InputShape(#[from] ShapeMismatch),
  #[error("推理槽 {slot} 正忙 ({state:?})，不能重新绑定")]
  SlotBusy { slot: SlotId, state: SlotState },
  #[error("推理槽 {slot} 状态为 {state:?}，不能执行 {operation}")]
  InvalidState {
    slot: SlotId,
    state: SlotState,
    operation: &'static str,
  },
  #[error("输入布局失败: {0}")]
  Layout(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("推理后端错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("推理槽 {slot} 等待超时 ({timeout:?})")]
  Timeout { slot: SlotId, timeout: Duration },
  #[error("推理槽 {0} 的工作线程已退出")]
  WorkerGone(SlotId),
  #[error("模型地址方案不受支持: {0}")]
  SchemeMismatch(String),
  #[error("设备 {0} 不受支持")]
  UnsupportedDevice(String),
  #[error("模型加载错误: {0}")]
  Load(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// 两个推理槽的异步推理能力
///
/// 调用方保证：只对未在推理中的槽绑定，只等待已启动的槽。
/// 本 trait 的实现会以 `EngineError` 拒绝违反约定的调用。
pub trait Engine {
  /// 把帧写入槽的输入缓冲
  fn bind_slot(&mut self, slot: SlotId, frame: &Frame) -> Result<(), EngineError>;
  /// 非阻塞地启动推理
  fn start_async(&mut self, slot: SlotId) -> Result<(), EngineError>;
  /// 阻塞直到该槽推理完成
  fn wait(&mut self, slot: SlotId) -> Result<(), EngineError>;
  /// 完成后的检测结果，在下一次绑定同一槽之前有效
  fn read_results(&self, slot: SlotId) -> Result<&[Detection], EngineError>;
}

impl<E: Engine + ?Sized> Engine for Box<E> {
  fn bind_slot(&mut self, slot: SlotId, frame: &Frame) -> Result<(), EngineError> {
    (**self).bind_slot(slot, frame)
  }

  fn start_async(&mut self, slot: SlotId) -> Result<(), EngineError> {
    (**self).start_async(slot)
  }

  fn wait(&mut self, slot: SlotId) -> Result<(), EngineError> {
    (**self).wait(slot)
  }

  fn read_results(&self, slot: SlotId) -> Result<&[Detection], EngineError> {
    (**self).read_results(slot)
  }
}

mod threaded;
pub use self::threaded::ThreadedEngine;

/// 根据模型地址和设备描述加载引擎
pub fn load_engine(config: &crate::config::PipelineConfig) -> Result<Box<dyn Engine>, EngineError> {
  #[cfg(feature = "onnx_engine")]
  use crate::{FromUrl, FromUrlWithScheme, model::OnnxModelBuilder};

  match config.model.scheme() {
    #[cfg(feature = "onnx_engine")]
    OnnxModelBuilder::SCHEME => {
      let model = OnnxModelBuilder::from_url(&config.model)
        .map_err(|e| EngineError::Load(Box::new(e)))?
        .device(config.device)
        .build()
        .map_err(|e| EngineError::Load(Box::new(e)))?;
      let engine = ThreadedEngine::new(model)?.with_wait_timeout(config.wait_timeout);
      Ok(Box::new(engine))
    }
    other => Err(EngineError::SchemeMismatch(other.to_string())),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PipelineConfig;
  use url::Url;

  fn config(model: &str) -> PipelineConfig {
    PipelineConfig::new(
      Url::parse(model).unwrap(),
      Url::parse("image:///in.png").unwrap(),
      Url::parse("image:///out.png").unwrap(),
    )
  }

  #[test]
  fn unknown_model_scheme_is_rejected() {
    assert!(matches!(
      load_engine(&config("rknn:///m.rknn")),
      Err(EngineError::SchemeMismatch(scheme)) if scheme == "rknn"
    ));
  }

  #[cfg(feature = "onnx_engine")]
  #[test]
  fn onnx_scheme_reaches_model_loading() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.onnx");
    let url = format!("onnx://{}", missing.display());
    assert!(matches!(
      load_engine(&config(&url)),
      Err(EngineError::Load(_))
    ));
  }

  #[test]
  fn slots_pair_up() {
    assert_eq!(SlotId::FIRST.other(), SlotId::SECOND);
    assert_eq!(SlotId::SECOND.other(), SlotId::FIRST);
    assert_eq!(SlotId::SECOND.to_string(), "#1");
  }
}
