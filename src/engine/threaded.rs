// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/engine/threaded.rs - 基于工作线程的双槽推理引擎
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

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use super::{Engine, EngineError, SLOT_COUNT, SlotId, SlotState};
use crate::{
  frame::Frame,
  model::{DetectResult, Detection, InputShape, Model},
};

type Reply<M> = (<M as Model>::Input, Result<DetectResult, <M as Model>::Error>);

struct Slot<M: Model> {
  id: SlotId,
  state: SlotState,
  // 只在 Idle/Submitted/Ready 时由调用方持有，Running 时在工作线程中
  input: Option<M::Input>,
  results: DetectResult,
  jobs: Option<Sender<M::Input>>,
  replies: Receiver<Reply<M>>,
  worker: Option<JoinHandle<()>>,
}

impl<M: Model> Slot<M> {
  fn spawn(id: SlotId, model: &Arc<M>) -> Result<Self, EngineError> {
    let (job_tx, job_rx) = mpsc::channel::<M::Input>();
    let (reply_tx, reply_rx) = mpsc::channel::<Reply<M>>();
    let worker_model = Arc::clone(model);

    let worker = thread::Builder::new()
      .name(format!("infer-slot-{}", id.index()))
      .spawn(move || {
        for input in job_rx {
          let result = worker_model.infer(&input);
          if reply_tx.send((input, result)).is_err() {
            break;
          }
        }
        debug!("推理槽 {} 工作线程退出", id);
      })
      .map_err(|e| EngineError::Backend(Box::new(e)))?;

    Ok(Self {
      id,
      state: SlotState::Idle,
      input: Some(model.alloc_input()),
      results: DetectResult::default(),
      jobs: Some(job_tx),
      replies: reply_rx,
      worker: Some(worker),
    })
  }

  fn invalid(&self, operation: &'static str) -> EngineError {
    EngineError::InvalidState {
      slot: self.id,
      state: self.state,
      operation,
    }
  }

  fn finish(&mut self, (input, result): Reply<M>) -> Result<(), EngineError> {
    self.input = Some(input);
    match result {
      Ok(results) => {
        debug!("推理槽 {} 完成: {} 个检测结果", self.id, results.len());
        self.results = results;
        self.state = SlotState::Ready;
        Ok(())
      }
      Err(e) => {
        self.state = SlotState::Idle;
        Err(EngineError::Backend(Box::new(e)))
      }
    }
  }
}

/// 把同步 `Model` 包装成两个异步推理槽
///
/// 每个槽对应一个工作线程，模型实例由两个线程共享。
/// 输入缓冲随任务在调用方与工作线程之间来回传递，不会重新分配。
pub struct ThreadedEngine<M: Model> {
  model: Arc<M>,
  shape: InputShape,
  slots: [Slot<M>; SLOT_COUNT],
  wait_timeout: Option<Duration>,
}

impl<M: Model> ThreadedEngine<M> {
  pub fn new(model: M) -> Result<Self, EngineError> {
    let model = Arc::new(model);
    let shape = model.input_shape();
    let slots = [
      Slot::spawn(SlotId::FIRST, &model)?,
      Slot::spawn(SlotId::SECOND, &model)?,
    ];

    debug!(
      "推理引擎就绪: 输入 {}x{} ({:?})",
      shape.width, shape.height, shape.resize
    );

    Ok(Self {
      model,
      shape,
      slots,
      wait_timeout: None,
    })
  }

  /// `wait` 的最长阻塞时间，`None` 表示一直等待
  pub fn with_wait_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.wait_timeout = timeout;
    self
  }

  pub fn state(&self, slot: SlotId) -> SlotState {
    self.slots[slot.index()].state
  }
}

impl<M: Model> Engine for ThreadedEngine<M> {
  fn bind_slot(&mut self, slot: SlotId, frame: &Frame) -> Result<(), EngineError> {
    let s = &mut self.slots[slot.index()];
    match s.state {
      SlotState::Idle | SlotState::Ready => {}
      state => return Err(EngineError::SlotBusy { slot, state }),
    }

    self.shape.check(frame)?;
    let input = s.input.as_mut().ok_or(EngineError::WorkerGone(slot))?;
    self
      .model
      .layout_input(frame, input)
      .map_err(|e| EngineError::Layout(Box::new(e)))?;

    s.results = DetectResult::default();
    s.state = SlotState::Submitted;
    debug!("帧 {} 绑定到推理槽 {}", frame.sequence(), slot);
    Ok(())
  }

  fn start_async(&mut self, slot: SlotId) -> Result<(), EngineError> {
    let s = &mut self.slots[slot.index()];
    if s.state != SlotState::Submitted {
      return Err(s.invalid("start_async"));
    }

    let input = s.input.take().ok_or(EngineError::WorkerGone(slot))?;
    let jobs = s.jobs.as_ref().ok_or(EngineError::WorkerGone(slot))?;
    jobs.send(input).map_err(|_| EngineError::WorkerGone(slot))?;
    s.state = SlotState::Running;
    Ok(())
  }

  fn wait(&mut self, slot: SlotId) -> Result<(), EngineError> {
    let timeout = self.wait_timeout;
    let s = &mut self.slots[slot.index()];
    match s.state {
      SlotState::Running => {}
      SlotState::Ready => return Ok(()),
      _ => return Err(s.invalid("wait")),
    }

    let reply = match timeout {
      None => s.replies.recv().map_err(|_| EngineError::WorkerGone(slot))?,
      Some(timeout) => match s.replies.recv_timeout(timeout) {
        Ok(reply) => reply,
        Err(RecvTimeoutError::Timeout) => return Err(EngineError::Timeout { slot, timeout }),
        Err(RecvTimeoutError::Disconnected) => return Err(EngineError::WorkerGone(slot)),
      },
    };
    s.finish(reply)
  }

  fn read_results(&self, slot: SlotId) -> Result<&[Detection], EngineError> {
    let s = &self.slots[slot.index()];
    if s.state != SlotState::Ready {
      return Err(s.invalid("read_results"));
    }
    Ok(&s.results.items)
  }
}

impl<M: Model> Drop for ThreadedEngine<M> {
  fn drop(&mut self) {
    for slot in self.slots.iter_mut() {
      slot.jobs.take();
      let Some(worker) = slot.worker.take() else {
        continue;
      };
      if slot.state == SlotState::Running {
        // 仍在推理的槽直接丢弃，不等待结果
        warn!("推理槽 {} 仍在推理中，放弃其结果", slot.id);
        continue;
      }
      if worker.join().is_err() {
        warn!("推理槽 {} 工作线程异常退出", slot.id);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::ResizeMode;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("第 {0} 帧推理失败")]
  struct FakeError(u64);

  /// 以帧序号为输入的假模型，序号为 `fail_on` 时报错
  struct SequenceModel {
    delay: Duration,
    fail_on: Option<u64>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
  }

  impl SequenceModel {
    fn new(delay: Duration) -> Self {
      Self {
        delay,
        fail_on: None,
        running: Arc::new(AtomicUsize::new(0)),
        peak: Arc::new(AtomicUsize::new(0)),
      }
    }
  }

  impl Model for SequenceModel {
    type Input = u64;
    type Error = FakeError;

    fn input_shape(&self) -> InputShape {
      InputShape {
        width: 4,
        height: 4,
        resize: ResizeMode::Exact,
      }
    }

    fn alloc_input(&self) -> u64 {
      0
    }

    fn layout_input(&self, frame: &Frame, input: &mut u64) -> Result<(), FakeError> {
      *input = frame.sequence();
      Ok(())
    }

    fn infer(&self, input: &u64) -> Result<DetectResult, FakeError> {
      let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);
      thread::sleep(self.delay);
      self.running.fetch_sub(1, Ordering::SeqCst);

      if self.fail_on == Some(*input) {
        return Err(FakeError(*input));
      }
      Ok(
        vec![Detection {
          confidence: *input as f32 / 100.0,
          bbox: [0.0, 0.0, 0.5, 0.5],
        }]
        .into(),
      )
    }
  }

  fn frame(sequence: u64) -> Frame {
    Frame::filled(sequence, 4, 4, [0, 0, 0]).unwrap()
  }

  #[test]
  fn each_slot_reports_its_own_frame() {
    let mut engine = ThreadedEngine::new(SequenceModel::new(Duration::from_millis(5))).unwrap();
    engine.bind_slot(SlotId::FIRST, &frame(10)).unwrap();
    engine.start_async(SlotId::FIRST).unwrap();
    engine.bind_slot(SlotId::SECOND, &frame(20)).unwrap();
    engine.start_async(SlotId::SECOND).unwrap();

    engine.wait(SlotId::FIRST).unwrap();
    assert_eq!(engine.read_results(SlotId::FIRST).unwrap()[0].confidence, 0.10);
    engine.wait(SlotId::SECOND).unwrap();
    assert_eq!(engine.read_results(SlotId::SECOND).unwrap()[0].confidence, 0.20);

    // Ready 的槽可以重新绑定
    engine.bind_slot(SlotId::FIRST, &frame(30)).unwrap();
    assert_eq!(engine.state(SlotId::FIRST), SlotState::Submitted);
  }

  #[test]
  fn two_slots_run_concurrently() {
    let model = SequenceModel::new(Duration::from_millis(100));
    let peak = Arc::clone(&model.peak);
    let mut engine = ThreadedEngine::new(model).unwrap();

    for (slot, seq) in [(SlotId::FIRST, 1), (SlotId::SECOND, 2)] {
      engine.bind_slot(slot, &frame(seq)).unwrap();
      engine.start_async(slot).unwrap();
    }
    engine.wait(SlotId::FIRST).unwrap();
    engine.wait(SlotId::SECOND).unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn rejects_contract_violations() {
    let mut engine = ThreadedEngine::new(SequenceModel::new(Duration::from_millis(50))).unwrap();

    assert!(matches!(
      engine.wait(SlotId::FIRST),
      Err(EngineError::InvalidState { operation: "wait", .. })
    ));
    assert!(matches!(
      engine.start_async(SlotId::FIRST),
      Err(EngineError::InvalidState { .. })
    ));

    engine.bind_slot(SlotId::FIRST, &frame(1)).unwrap();
    engine.start_async(SlotId::FIRST).unwrap();
    assert!(matches!(
      engine.bind_slot(SlotId::FIRST, &frame(2)),
      Err(EngineError::SlotBusy {
        state: SlotState::Running,
        ..
      })
    ));
    assert!(matches!(
      engine.read_results(SlotId::FIRST),
      Err(EngineError::InvalidState { .. })
    ));
    engine.wait(SlotId::FIRST).unwrap();
  }

  #[test]
  fn rejects_mismatched_frames() {
    let mut engine = ThreadedEngine::new(SequenceModel::new(Duration::ZERO)).unwrap();
    let big = Frame::filled(0, 8, 8, [0, 0, 0]).unwrap();
    assert!(matches!(
      engine.bind_slot(SlotId::FIRST, &big),
      Err(EngineError::InputShape(_))
    ));
    assert_eq!(engine.state(SlotId::FIRST), SlotState::Idle);
  }

  #[test]
  fn backend_errors_return_slot_to_idle() {
    let mut model = SequenceModel::new(Duration::ZERO);
    model.fail_on = Some(3);
    let mut engine = ThreadedEngine::new(model).unwrap();

    engine.bind_slot(SlotId::SECOND, &frame(3)).unwrap();
    engine.start_async(SlotId::SECOND).unwrap();
    assert!(matches!(
      engine.wait(SlotId::SECOND),
      Err(EngineError::Backend(_))
    ));
    assert_eq!(engine.state(SlotId::SECOND), SlotState::Idle);

    engine.bind_slot(SlotId::SECOND, &frame(4)).unwrap();
    engine.start_async(SlotId::SECOND).unwrap();
    engine.wait(SlotId::SECOND).unwrap();
  }

  #[test]
  fn wait_times_out_on_slow_backend() {
    let mut engine = ThreadedEngine::new(SequenceModel::new(Duration::from_millis(300)))
      .unwrap()
      .with_wait_timeout(Some(Duration::from_millis(10)));

    engine.bind_slot(SlotId::FIRST, &frame(1)).unwrap();
    engine.start_async(SlotId::FIRST).unwrap();
    assert!(matches!(
      engine.wait(SlotId::FIRST),
      Err(EngineError::Timeout { .. })
    ));
    assert_eq!(engine.state(SlotId::FIRST), SlotState::Running);
  }
}
