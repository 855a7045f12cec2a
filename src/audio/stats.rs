//! 流统计模块
//!
//! 在音频回调中累计计数，所有操作都是 lock-free 的

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 流统计收集器
#[derive(Default)]
pub struct StreamStats {
    callback_count: AtomicU64,
    bytes_captured: AtomicU64,
    bytes_rendered: AtomicU64,
    // 渲染时因队列终止而补零的次数
    zero_filled_callbacks: AtomicU64,
    // 输入队列已满时丢弃的采集 chunk
    dropped_chunks: AtomicU64,
    status_reports: AtomicU64,
}

impl StreamStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn on_callback(&self) {
        self.callback_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_captured(&self, bytes: usize) {
        self.bytes_captured.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_rendered(&self, bytes: usize) {
        self.bytes_rendered.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zero_fill(&self) {
        self.zero_filled_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dropped_chunk(&self) {
        self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_status(&self) {
        self.status_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub fn callback_count(&self) -> u64 {
        self.callback_count.load(Ordering::Relaxed)
    }

    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }

    /// 生成报告
    pub fn report(&self) -> StatsReport {
        StatsReport {
            callback_count: self.callback_count.load(Ordering::Relaxed),
            bytes_captured: self.bytes_captured.load(Ordering::Relaxed),
            bytes_rendered: self.bytes_rendered.load(Ordering::Relaxed),
            zero_filled_callbacks: self.zero_filled_callbacks.load(Ordering::Relaxed),
            dropped_chunks: self.dropped_chunks.load(Ordering::Relaxed),
            status_reports: self.status_reports.load(Ordering::Relaxed),
        }
    }
}

/// 统计快照
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsReport {
    pub callback_count: u64,
    pub bytes_captured: u64,
    pub bytes_rendered: u64,
    pub zero_filled_callbacks: u64,
    pub dropped_chunks: u64,
    pub status_reports: u64,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Stream Statistics ===")?;
        writeln!(f, "Callbacks:        {}", self.callback_count)?;
        writeln!(f, "Bytes captured:   {}", self.bytes_captured)?;
        writeln!(f, "Bytes rendered:   {}", self.bytes_rendered)?;
        writeln!(f, "Zero-filled:      {}", self.zero_filled_callbacks)?;
        writeln!(f, "Dropped chunks:   {}", self.dropped_chunks)?;
        write!(f, "Status reports:   {}", self.status_reports)
    }
}
