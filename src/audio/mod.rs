//! 音频核心模块
//!
//! 包含：
//! - Chunk: 带时间戳的不可变字节块
//! - ChunkQueue: 有界阻塞队列，回调与 pipeline 的同步点
//! - Format: 流配置和采样几何
//! - Status: driver 状态位和单槽信箱
//! - Timing: 流时钟和时间戳换算
//! - Stats: 流统计

pub mod chunk;
pub mod chunk_queue;
pub mod format;
pub mod stats;
pub mod status;
pub mod timing;

pub use chunk::Chunk;
pub use chunk_queue::{ChunkQueue, PushOutcome};
pub use format::{ConfigError, Direction, SampleFormat, SampleGeometry, StreamOptions};
pub use stats::{StatsReport, StreamStats};
pub use status::{StatusFlags, StatusMailbox};
pub use timing::StreamClock;
