// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use tracing::debug;

use crate::frame::Frame;

/// 同步推理模型
///
/// 模型本身不关心流水线；`engine::ThreadedEngine` 负责把它包装成
/// 两个可异步执行的推理槽。
pub trait Model: Send + Sync + 'static {
  /// 槽位持有的、可复用的输入缓冲
  type Input: Send + 'static;
  type Error: std::error::Error + Send + Sync + 'static;

  fn input_shape(&self) -> InputShape;
  fn alloc_input(&self) -> Self::Input;
  fn layout_input(&self, frame: &Frame, input: &mut Self::Input) -> Result<(), Self::Error>;
  fn infer(&self, input: &Self::Input) -> Result<DetectResult, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  pub confidence: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
  /// 帧尺寸必须与模型输入一致
  Exact,
  /// 拉伸到模型输入尺寸
  Stretch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
  pub width: u32,
  pub height: u32,
  pub resize: ResizeMode,
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("帧尺寸 {frame_width}x{frame_height} 与模型输入 {width}x{height} 不兼容")]
pub struct ShapeMismatch {
  pub frame_width: u32,
  pub frame_height: u32,
  pub width: u32,
  pub height: u32,
}

impl InputShape {
  pub fn check(&self, frame: &Frame) -> Result<(), ShapeMismatch> {
    let same = frame.width() == self.width && frame.height() == self.height;
    if same || self.resize == ResizeMode::Stretch {
      Ok(())
    } else {
      Err(ShapeMismatch {
        frame_width: frame.width(),
        frame_height: frame.height(),
        width: self.width,
        height: self.height,
      })
    }
  }
}

/// 输出记录的字段布局
///
/// 记录数与记录长度从输出张量形状读取，这里只描述记录内各字段的偏移。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLayout {
  /// 该字段为负数时表示后续记录均为填充
  pub image_id: Option<usize>,
  pub confidence: usize,
  /// 连续四个字段 x_min, y_min, x_max, y_max
  pub bbox: usize,
}

impl Default for OutputLayout {
  // SSD DetectionOutput: [image_id, label, conf, x_min, y_min, x_max, y_max]
  fn default() -> Self {
    Self {
      image_id: Some(0),
      confidence: 2,
      bbox: 3,
    }
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出张量形状为空")]
  EmptyShape,
  #[error("记录长度 {record_size} 不足以容纳字段偏移 {required}")]
  RecordTooShort { record_size: usize, required: usize },
  #[error("输出数据长度不匹配: 形状 {shape:?} 需要 {expected}, 实际 {actual}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

impl OutputLayout {
  fn required_record_size(&self) -> usize {
    let bbox_end = self.bbox + 4;
    let conf_end = self.confidence + 1;
    let id_end = self.image_id.map(|i| i + 1).unwrap_or(0);
    bbox_end.max(conf_end).max(id_end)
  }

  /// 按输出张量形状解码检测记录
  pub fn decode(&self, shape: &[usize], data: &[f32]) -> Result<DetectResult, DecodeError> {
    let (&record_size, outer) = shape.split_last().ok_or(DecodeError::EmptyShape)?;
    let count: usize = outer.iter().product();

    let required = self.required_record_size();
    if record_size < required {
      return Err(DecodeError::RecordTooShort {
        record_size,
        required,
      });
    }

    let expected = count * record_size;
    if data.len() != expected {
      return Err(DecodeError::LengthMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }

    let mut items = Vec::new();
    for record in data.chunks_exact(record_size) {
      if let Some(id) = self.image_id
        && record[id] < 0.0
      {
        break;
      }
      let b = &record[self.bbox..self.bbox + 4];
      items.push(Detection {
        confidence: record[self.confidence],
        bbox: [b[0], b[1], b[2], b[3]],
      });
    }

    debug!("解码 {} 条记录, 有效 {} 条", count, items.len());
    Ok(items.into())
  }
}

#[cfg(feature = "onnx_engine")]
pub mod onnx;
#[cfg(feature = "onnx_engine")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder, OnnxModelError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decodes_ssd_records_and_stops_at_padding() {
    let data = [
      0.0, 1.0, 0.9, 0.1, 0.2, 0.3, 0.4, //
      0.0, 1.0, 0.4, 0.5, 0.5, 0.6, 0.6, //
      -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
    ];
    let result = OutputLayout::default().decode(&[1, 1, 3, 7], &data).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[0].confidence, 0.9);
    assert_eq!(result.items[0].bbox, [0.1, 0.2, 0.3, 0.4]);
    assert_eq!(result.items[1].bbox, [0.5, 0.5, 0.6, 0.6]);
  }

  #[test]
  fn record_size_comes_from_shape() {
    let layout = OutputLayout {
      image_id: None,
      confidence: 0,
      bbox: 1,
    };
    let data = [0.7, 0.1, 0.1, 0.2, 0.2, 0.3, 0.0, 0.0, 1.0, 1.0];
    let result = layout.decode(&[2, 5], &data).unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(result.items[1].confidence, 0.3);
  }

  #[test]
  fn rejects_short_records_and_bad_lengths() {
    let layout = OutputLayout::default();
    assert_eq!(
      layout.decode(&[1, 5], &[0.0; 5]),
      Err(DecodeError::RecordTooShort {
        record_size: 5,
        required: 7
      })
    );
    assert!(matches!(
      layout.decode(&[2, 7], &[0.0; 7]),
      Err(DecodeError::LengthMismatch { expected: 14, .. })
    ));
    assert_eq!(layout.decode(&[], &[]), Err(DecodeError::EmptyShape));
  }

  #[test]
  fn exact_shape_rejects_other_sizes() {
    let frame = Frame::filled(0, 4, 4, [0, 0, 0]).unwrap();
    let exact = InputShape {
      width: 8,
      height: 8,
      resize: ResizeMode::Exact,
    };
    assert!(exact.check(&frame).is_err());
    let stretch = InputShape {
      resize: ResizeMode::Stretch,
      ..exact
    };
    assert!(stretch.check(&frame).is_ok());
  }
}
