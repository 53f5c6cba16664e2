// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/overlay.rs - 检测结果叠加层
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

use crate::model::Detection;

/// 置信度文本相对边框上沿的偏移（像素）
const LABEL_OFFSET_Y: f32 = 5.0;

/// 帧像素坐标下的绘制指令
///
/// 文本以左下角（基线）为锚点。
#[derive(Debug, Clone, PartialEq)]
pub enum DrawCommand {
  Rect {
    x_min: f32,
    y_min: f32,
    x_max: f32,
    y_max: f32,
  },
  Text {
    x: f32,
    y: f32,
    text: String,
  },
}

/// 把高于阈值的检测结果转换为绘制指令
pub fn overlay(width: u32, height: u32, detections: &[Detection], threshold: f32) -> Vec<DrawCommand> {
  let (w, h) = (width as f32, height as f32);

  detections
    .iter()
    .filter(|d| d.confidence > threshold)
    .flat_map(|d| {
      let x_min = d.bbox[0] * w;
      let y_min = d.bbox[1] * h;
      let x_max = d.bbox[2] * w;
      let y_max = d.bbox[3] * h;
      [
        DrawCommand::Rect {
          x_min,
          y_min,
          x_max,
          y_max,
        },
        DrawCommand::Text {
          x: x_min,
          y: y_min - LABEL_OFFSET_Y,
          text: format!("{:.3}", d.confidence),
        },
      ]
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn detections() -> Vec<Detection> {
    vec![
      Detection {
        confidence: 0.91234,
        bbox: [0.25, 0.5, 0.75, 1.0],
      },
      Detection {
        confidence: 0.5,
        bbox: [0.0, 0.0, 0.1, 0.1],
      },
      Detection {
        confidence: 0.2,
        bbox: [0.0, 0.0, 1.0, 1.0],
      },
    ]
  }

  #[test]
  fn scales_boxes_and_labels_confidence() {
    let commands = overlay(640, 480, &detections(), 0.5);
    assert_eq!(
      commands,
      vec![
        DrawCommand::Rect {
          x_min: 160.0,
          y_min: 240.0,
          x_max: 480.0,
          y_max: 480.0,
        },
        DrawCommand::Text {
          x: 160.0,
          y: 235.0,
          text: String::from("0.912"),
        },
      ]
    );
  }

  #[test]
  fn threshold_is_exclusive() {
    let commands = overlay(100, 100, &detections(), 0.2);
    assert_eq!(commands.len(), 4);
    assert!(overlay(100, 100, &detections(), 0.95).is_empty());
  }

  #[test]
  fn rerunning_gives_identical_commands() {
    let input = detections();
    let first = overlay(320, 240, &input, 0.1);
    let second = overlay(320, 240, &input, 0.1);
    assert_eq!(first, second);
  }
}
