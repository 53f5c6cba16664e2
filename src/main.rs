// 该文件是 Shuanghuan （双缓） 项目的一部分。
// src/main.rs - 项目主程序
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

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use shuanghuan::{
  FromUrl,
  args::Args,
  engine::{EngineError, load_engine},
  input::{InputWrapper, SourceError},
  output::{OutputWrapper, SinkError, draw::Draw, draw::DrawError},
  task::{DoubleBufferedTask, Interrupt, PipelineError, RunReport, Task},
};

fn main() -> ExitCode {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  match run(args) {
    Ok(report) => {
      info!("处理完成，共显示 {} 帧", report.rendered);
      ExitCode::SUCCESS
    }
    Err(e) => {
      error!("{:#}", e);
      eprintln!("[ ERROR ] {:#}", e);
      ExitCode::from(exit_code(&e))
    }
  }
}

fn exit_code(e: &anyhow::Error) -> u8 {
  if let Some(e) = e.downcast_ref::<PipelineError>() {
    e.exit_code()
  } else if e.is::<SourceError>() {
    2
  } else if e.is::<EngineError>() {
    3
  } else if e.is::<SinkError>() || e.is::<DrawError>() {
    4
  } else {
    1
  }
}

fn run(args: Args) -> Result<RunReport> {
  let config = args.into_config()?;

  info!("模型地址: {}", config.model);
  info!("推理设备: {}", config.device);
  info!("置信度阈值: {}", config.confidence_threshold);
  info!("输入来源: {}", config.input);
  info!("输出路径: {}", config.output);
  if let Some(limit) = config.frame_limit {
    info!("最大显示帧数: {}", limit);
  }
  if let Some(timeout) = config.wait_timeout {
    info!("推理等待超时: {:?}", timeout);
  }

  info!("正在加载模型...");
  let engine = load_engine(&config)?;
  info!("模型加载完成");

  let source = InputWrapper::from_url(&config.input)?;

  let draw = match config.font.as_deref() {
    Some(path) => Draw::from_font_file(path)?,
    None => Draw::default(),
  };
  let sink = OutputWrapper::from_url(&config.output)?.with_draw(draw);

  let interrupt = Interrupt::install()?;
  let report = DoubleBufferedTask::from_config(&config)
    .with_interrupt(interrupt)
    .run_task(source, engine, sink)?;
  Ok(report)
}
