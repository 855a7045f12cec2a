//! 流配置与采样几何
//!
//! 内核只搬运字节，不做格式转换。这里的格式信息只用于：
//! - 帧数 → 字节数换算
//! - 字节偏移 → 时间偏移换算
//! - 向 driver 协商流参数

use std::fmt;

use thiserror::Error;

use crate::driver::DriverError;

/// 流方向
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 采集（driver → pipeline）
    Input,
    /// 回放（pipeline → driver）
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "Input"),
            Self::Output => write!(f, "Output"),
        }
    }
}

/// 样本格式
///
/// 数值编码沿用外部配置约定：1 = float32，8/16/24/32 = 对应位宽的有符号整数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    Float32,
    Int8,
    Int16,
    /// 24-bit packed（每样本 3 字节）
    Int24,
    Int32,
}

impl SampleFormat {
    /// 从配置编码解析
    pub fn from_code(code: u32) -> Result<Self, ConfigError> {
        match code {
            1 => Ok(Self::Float32),
            8 => Ok(Self::Int8),
            16 => Ok(Self::Int16),
            24 => Ok(Self::Int24),
            32 => Ok(Self::Int32),
            other => Err(ConfigError::InvalidSampleFormat(other)),
        }
    }

    /// 配置编码
    pub fn code(&self) -> u32 {
        match self {
            Self::Float32 => 1,
            Self::Int8 => 8,
            Self::Int16 => 16,
            Self::Int24 => 24,
            Self::Int32 => 32,
        }
    }

    /// 每样本位数
    #[inline]
    pub fn bits(&self) -> u16 {
        match self {
            Self::Float32 | Self::Int32 => 32,
            Self::Int8 => 8,
            Self::Int16 => 16,
            Self::Int24 => 24,
        }
    }

    /// 每样本字节数
    #[inline]
    pub fn bytes_per_sample(&self) -> usize {
        self.bits() as usize / 8
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float32 => write!(f, "float32"),
            other => write!(f, "int{}", other.bits()),
        }
    }
}

/// 采样几何：时间戳和帧长换算需要的全部信息
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleGeometry {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl SampleGeometry {
    pub fn new(sample_rate: u32, channels: u16, format: SampleFormat) -> Self {
        Self {
            sample_rate,
            channels,
            format,
        }
    }

    /// 每帧的字节数
    #[inline]
    pub fn bytes_per_frame(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// 帧数 → 字节数
    #[inline]
    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    /// 字节数 → 秒
    ///
    /// offset / (channels * bytes_per_sample * sample_rate)
    #[inline]
    pub fn bytes_to_secs(&self, bytes: usize) -> f64 {
        bytes as f64 / self.bytes_per_frame() as f64 / self.sample_rate as f64
    }
}

/// 单方向流配置
#[derive(Clone, Debug)]
pub struct StreamOptions {
    /// 采样率
    pub sample_rate: u32,
    /// 声道数
    pub channel_count: u16,
    /// 样本格式
    pub sample_format: SampleFormat,
    /// 设备编号（负数或越界表示使用默认设备）
    pub device_id: i32,
    /// 队列最大深度（0 表示不限）
    pub max_queue: usize,
    /// 状态异常时是否上报给 pipeline
    pub close_on_error: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channel_count: 2,
            sample_format: SampleFormat::Int16,
            device_id: -1,
            max_queue: 0,
            close_on_error: false,
        }
    }
}

impl StreamOptions {
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channel_count: u16) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn with_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    pub fn with_device(mut self, device_id: i32) -> Self {
        self.device_id = device_id;
        self
    }

    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    pub fn with_close_on_error(mut self, close_on_error: bool) -> Self {
        self.close_on_error = close_on_error;
        self
    }

    /// 本地校验（不涉及设备能力）
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate(self.sample_rate));
        }
        if self.channel_count == 0 {
            return Err(ConfigError::InvalidChannelCount(self.channel_count));
        }
        Ok(())
    }

    /// 对应的采样几何
    pub fn geometry(&self) -> SampleGeometry {
        SampleGeometry::new(self.sample_rate, self.channel_count, self.sample_format)
    }

    /// 请求的设备编号（负数视为未指定）
    pub fn requested_device(&self) -> Option<usize> {
        usize::try_from(self.device_id).ok()
    }
}

impl fmt::Display for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "options: sample rate {}, channels {}, format {}, device {}, max queue {}, close on error {}",
            self.sample_rate,
            self.channel_count,
            self.sample_format,
            self.device_id,
            self.max_queue,
            self.close_on_error
        )
    }
}

/// 配置错误（open 阶段致命）
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Input and/or Output options must be specified")]
    NoDirection,
    #[error("Input and Output sample rates must match ({input}Hz vs {output}Hz)")]
    SampleRateMismatch { input: u32, output: u32 },
    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(u16),
    #[error("Invalid sampleFormat: {0}")]
    InvalidSampleFormat(u32),
    #[error("Channel count {requested} exceeds maximum number of channels for device ({max})")]
    TooManyChannels { requested: u16, max: u16 },
    #[error("No default {0} device")]
    NoDefaultDevice(Direction),
    #[error("Format not supported: {0}")]
    FormatNotSupported(#[source] DriverError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_codes() {
        for code in [1u32, 8, 16, 24, 32] {
            let format = SampleFormat::from_code(code).unwrap();
            assert_eq!(format.code(), code);
        }
        assert_eq!(SampleFormat::Float32.bytes_per_sample(), 4);
        assert_eq!(SampleFormat::Int24.bytes_per_sample(), 3);
        assert_eq!(SampleFormat::Int8.bytes_per_sample(), 1);
    }

    #[test]
    fn test_invalid_sample_format() {
        let err = SampleFormat::from_code(12).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSampleFormat(12)));
    }

    #[test]
    fn test_geometry_timestamp_offset() {
        // 2ch * 2 字节 * 48000Hz：偏移 96 字节 = 0.0005 秒
        let geometry = SampleGeometry::new(48000, 2, SampleFormat::Int16);
        assert_eq!(geometry.bytes_per_frame(), 4);
        assert_eq!(geometry.frames_to_bytes(256), 1024);
        assert!((geometry.bytes_to_secs(96) - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn test_options_validate() {
        assert!(StreamOptions::default().validate().is_ok());
        let zero_rate = StreamOptions::default().with_sample_rate(0);
        assert!(matches!(
            zero_rate.validate(),
            Err(ConfigError::InvalidSampleRate(0))
        ));
        let zero_channels = StreamOptions::default().with_channels(0);
        assert!(matches!(
            zero_channels.validate(),
            Err(ConfigError::InvalidChannelCount(0))
        ));
    }

    #[test]
    fn test_requested_device() {
        assert_eq!(StreamOptions::default().requested_device(), None);
        assert_eq!(StreamOptions::default().with_device(3).requested_device(), Some(3));
    }
}
