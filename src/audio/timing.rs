//! 流时钟与时间戳换算
//!
//! - StreamClock: 单调时钟，从流打开时刻起计秒（软件 driver 用它报告流时间）
//! - capture_timestamp: 采集时间戳的选择规则
//! - offset_timestamp: 按已消费字节数偏移 chunk 时间戳

use std::time::Instant;

use super::format::SampleGeometry;

/// 单调流时钟
#[derive(Clone, Copy, Debug)]
pub struct StreamClock {
    origin: Instant,
}

impl StreamClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// 流打开以来的秒数
    #[inline]
    pub fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

/// 采集时间戳
///
/// driver 报告了有效（正）的 ADC 时间就直接使用；
/// 否则用 流时间 - 输入延迟 近似第一个样本的采集时间
#[inline]
pub fn capture_timestamp(adc_time: f64, stream_time: f64, input_latency: f64) -> f64 {
    if adc_time > 0.0 {
        adc_time
    } else {
        stream_time - input_latency
    }
}

/// 读取从 chunk 内第 offset 个字节开始时的时间戳
///
/// base + offset / (channels * bytes_per_sample * sample_rate)
#[inline]
pub fn offset_timestamp(base_secs: f64, offset: usize, geometry: &SampleGeometry) -> f64 {
    base_secs + geometry.bytes_to_secs(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::format::SampleFormat;

    #[test]
    fn test_capture_timestamp_prefers_adc() {
        assert_eq!(capture_timestamp(12.5, 20.0, 0.01), 12.5);
    }

    #[test]
    fn test_capture_timestamp_fallback() {
        // ADC 时间无效（0 或负）时回退到近似值
        assert!((capture_timestamp(0.0, 2.0, 0.25) - 1.75).abs() < 1e-12);
        assert!((capture_timestamp(-1.0, 2.0, 0.25) - 1.75).abs() < 1e-12);
    }

    #[test]
    fn test_offset_timestamp_linear() {
        let geometry = SampleGeometry::new(48000, 2, SampleFormat::Int16);
        assert!((offset_timestamp(0.0, 96, &geometry) - 0.0005).abs() < 1e-12);
        assert!((offset_timestamp(3.0, 0, &geometry) - 3.0).abs() < 1e-12);

        // 24-bit packed 单声道：每帧 3 字节
        let geometry = SampleGeometry::new(96000, 1, SampleFormat::Int24);
        assert!((offset_timestamp(1.0, 3 * 96000, &geometry) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_clock_advances() {
        let clock = StreamClock::new();
        let t1 = clock.now_secs();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let t2 = clock.now_secs();
        assert!(t2 - t1 >= 0.008, "expected at least 8ms, got {}s", t2 - t1);
    }
}
