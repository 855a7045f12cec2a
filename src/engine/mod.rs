//! 流引擎
//!
//! 整合 Chunk 队列、driver 回调和 pipeline 接口
//! 核心设计：回调只通过 ChunkQueue 与 pipeline 交互，
//! 除状态信箱和原子状态外不共享其他数据

mod callback;
pub mod context;
pub mod fill;

use thiserror::Error;

use crate::audio::{ConfigError, Direction};
use crate::driver::DriverError;

pub use context::AudioStreamContext;
pub use fill::{fill_buffer, FillMode, FillResult};

/// 流状态
///
/// Idle → Running → {Stopped | Aborted} → Closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
    Aborted = 3,
    Closed = 4,
}

impl StreamState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopped,
            3 => Self::Aborted,
            _ => Self::Closed,
        }
    }
}

/// 停止方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// 已提交的 buffer 播放完毕后停止
    Graceful,
    /// 立即停止
    Abort,
}

/// 引擎错误
#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Driver(#[from] DriverError),
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),
    #[error("{0} direction is not configured")]
    DirectionNotConfigured(Direction),
}
