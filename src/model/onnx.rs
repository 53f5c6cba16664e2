// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 检测模型
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

//! # ONNX 检测模型
//!
//! 模型地址格式：
//!
//! ```text
//! onnx:///models/face-detection-adas-0001.onnx?width=672&height=384&input=data&output=detection_out
//! ```
//!
//! ## 参数说明
//!
//! - `input` / `output`: 输入输出张量名，默认 `data` / `detection_out`
//! - `width` / `height`: 模型输入尺寸，默认 300x300
//! - `order`: 输入通道顺序 `bgr`（默认）或 `rgb`
//! - `resize`: `stretch`（默认）或 `exact`
//! - `confidence` / `bbox`: 记录中置信度与边框的偏移，默认 2 / 3
//! - `image_id`: 填充标记字段偏移，`none` 表示不检查，默认 0
//! - `threads`: ONNX Runtime 线程数，默认 4

use std::collections::HashMap;
use std::sync::Mutex;

use image::imageops::{self, FilterType};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::TensorRef;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::Device,
  frame::{FRAME_CHANNELS, Frame},
  model::{DecodeError, DetectResult, InputShape, Model, OutputLayout, ResizeMode},
};

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("参数 {key} 无效: {value}")]
  InvalidParameter { key: String, value: String },
  #[error("ONNX Runtime 错误: {0}")]
  OrtError(#[from] ort::Error),
  #[error("缺少输出张量: {0}")]
  MissingOutput(String),
  #[error("输出解码错误: {0}")]
  DecodeError(#[from] DecodeError),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelOrder {
  Rgb,
  Bgr,
}

pub struct OnnxModelBuilder {
  model_path: String,
  input_name: String,
  output_name: String,
  shape: InputShape,
  order: ChannelOrder,
  layout: OutputLayout,
  threads: usize,
  device: Device,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

fn parse_param<T: std::str::FromStr>(
  query: &HashMap<String, String>,
  key: &str,
  default: T,
) -> Result<T, OnnxModelError> {
  match query.get(key) {
    None => Ok(default),
    Some(value) => value.parse().map_err(|_| OnnxModelError::InvalidParameter {
      key: key.to_string(),
      value: value.clone(),
    }),
  }
}

impl FromUrl for OnnxModelBuilder {
  type Error = OnnxModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();

    let invalid = |key: &str, value: &str| OnnxModelError::InvalidParameter {
      key: key.to_string(),
      value: value.to_string(),
    };

    let order = match query.get("order").map(String::as_str) {
      None | Some("bgr") => ChannelOrder::Bgr,
      Some("rgb") => ChannelOrder::Rgb,
      Some(other) => return Err(invalid("order", other)),
    };
    let resize = match query.get("resize").map(String::as_str) {
      None | Some("stretch") => ResizeMode::Stretch,
      Some("exact") => ResizeMode::Exact,
      Some(other) => return Err(invalid("resize", other)),
    };

    let defaults = OutputLayout::default();
    let image_id = match query.get("image_id").map(String::as_str) {
      None => defaults.image_id,
      Some("none") => None,
      Some(v) => Some(v.parse().map_err(|_| invalid("image_id", v))?),
    };

    Ok(OnnxModelBuilder {
      model_path: url.path().to_string(),
      input_name: parse_param(&query, "input", String::from("data"))?,
      output_name: parse_param(&query, "output", String::from("detection_out"))?,
      shape: InputShape {
        width: parse_param(&query, "width", 300)?,
        height: parse_param(&query, "height", 300)?,
        resize,
      },
      order,
      layout: OutputLayout {
        image_id,
        confidence: parse_param(&query, "confidence", defaults.confidence)?,
        bbox: parse_param(&query, "bbox", defaults.bbox)?,
      },
      threads: parse_param(&query, "threads", 4)?,
      device: Device::Cpu,
    })
  }
}

impl OnnxModelBuilder {
  pub fn device(mut self, device: Device) -> Self {
    self.device = device;
    self
  }

  pub fn build(self) -> Result<OnnxModel, OnnxModelError> {
    info!("加载模型文件: {}", self.model_path);

    let builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(ort::Error::from)?
      .with_intra_threads(self.threads)
      .map_err(ort::Error::from)?;

    let mut builder = match self.device {
      Device::Cpu => {
        info!("使用 CPU 执行后端");
        builder
      }
      #[cfg(feature = "cuda")]
      Device::Cuda(id) => {
        info!("使用 CUDA 执行后端, 设备 {}", id);
        builder.with_execution_providers([
          ort::execution_providers::CUDA::default()
            .with_device_id(id)
            .build()
            .error_on_failure(),
        ])
        .map_err(ort::Error::from)?
      }
      #[cfg(not(feature = "cuda"))]
      Device::Cuda(id) => {
        return Err(OnnxModelError::InvalidParameter {
          key: String::from("device"),
          value: format!("cuda:{} (未启用 cuda 特性)", id),
        });
      }
    };

    let session = builder.commit_from_file(&self.model_path)?;
    info!(
      "模型加载完成: 输入 {} {}x{}, 输出 {}",
      self.input_name, self.shape.width, self.shape.height, self.output_name
    );

    Ok(OnnxModel {
      session: Mutex::new(session),
      input_name: self.input_name,
      output_name: self.output_name,
      shape: self.shape,
      order: self.order,
      layout: self.layout,
    })
  }
}

/// ONNX Runtime 会话，输入为 NCHW 排列的 f32 像素值（0-255，不做归一化）
pub struct OnnxModel {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  shape: InputShape,
  order: ChannelOrder,
  layout: OutputLayout,
}

impl OnnxModel {
  fn plane_size(&self) -> usize {
    self.shape.width as usize * self.shape.height as usize
  }
}

impl Model for OnnxModel {
  type Input = Vec<f32>;
  type Error = OnnxModelError;

  fn input_shape(&self) -> InputShape {
    self.shape
  }

  fn alloc_input(&self) -> Vec<f32> {
    vec![0.0; FRAME_CHANNELS * self.plane_size()]
  }

  fn layout_input(&self, frame: &Frame, input: &mut Vec<f32>) -> Result<(), OnnxModelError> {
    let (w, h) = (self.shape.width, self.shape.height);
    let image = frame.to_rgb_image();
    let image = if image.dimensions() == (w, h) {
      image
    } else {
      imageops::resize(&image, w, h, FilterType::Triangle)
    };

    let plane = self.plane_size();
    input.resize(FRAME_CHANNELS * plane, 0.0);
    for (idx, pixel) in image.pixels().enumerate() {
      for c in 0..FRAME_CHANNELS {
        let dst = match self.order {
          ChannelOrder::Rgb => c,
          ChannelOrder::Bgr => FRAME_CHANNELS - 1 - c,
        };
        input[dst * plane + idx] = pixel[c] as f32;
      }
    }
    Ok(())
  }

  fn infer(&self, input: &Vec<f32>) -> Result<DetectResult, OnnxModelError> {
    let shape = vec![
      1usize,
      FRAME_CHANNELS,
      self.shape.height as usize,
      self.shape.width as usize,
    ];
    let tensor = TensorRef::from_array_view((shape, input.as_slice()))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxModelError::SessionPoisoned)?;
    let outputs = session.run(ort::inputs![self.input_name.as_str() => tensor])?;

    let output = outputs
      .get(self.output_name.as_str())
      .ok_or_else(|| OnnxModelError::MissingOutput(self.output_name.clone()))?;
    let (dims, data) = output.try_extract_tensor::<f32>()?;
    let dims: Vec<usize> = dims.iter().map(|&d| d.max(0) as usize).collect();
    debug!("模型输出形状: {:?}", dims);

    Ok(self.layout.decode(&dims, data)?)
  }
}
