//! Chunk Bridge Library
//!
//! 实时音频回调与 pipeline 线程之间的 chunk 桥接：
//! 回调按固定帧数读写，pipeline 按任意大小的带时间戳 chunk 读写。

pub mod audio;
pub mod driver;
pub mod engine;
