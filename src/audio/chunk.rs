//! 带时间戳的字节块
//!
//! Chunk 是 pipeline 与回调之间传递的最小单位：
//! - 字节内容不可变，创建后由队列独占
//! - 时间戳对应第 0 个字节的采集时间（输入方向）

use std::sync::Arc;

use super::format::SampleGeometry;

/// 不可变的带时间戳字节块
///
/// 内部使用 `Arc<[u8]>`，clone 只增加引用计数，
/// 队列把 head chunk 交给消费者时不需要复制数据。
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    buffer: Arc<[u8]>,
    timestamp_secs: f64,
}

impl Chunk {
    /// 创建新的 chunk
    pub fn new(buffer: impl Into<Arc<[u8]>>, timestamp_secs: f64) -> Self {
        Self {
            buffer: buffer.into(),
            timestamp_secs,
        }
    }

    /// 从切片复制创建（采集回调使用）
    pub fn copy_from_slice(bytes: &[u8], timestamp_secs: f64) -> Self {
        Self::new(bytes, timestamp_secs)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// 第 0 个字节的时间戳（秒）
    #[inline]
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_secs
    }

    /// 取出字节内容
    pub fn into_vec(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// 按给定采样几何计算时长（秒）
    pub fn duration_secs(&self, geometry: &SampleGeometry) -> f64 {
        geometry.bytes_to_secs(self.len())
    }
}
