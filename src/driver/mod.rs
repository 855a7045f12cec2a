//! Driver 接口
//!
//! 真正的音频 driver 是外部协作者，这里只定义它的边界：
//! - AudioHost: 设备查询、格式协商、打开流
//! - DriverStream: 单个已打开流的启停和时钟
//! - SharedHost / HostLease: 进程级初始化的引用计数
//!
//! 软件实现见 `virtual_host`

pub mod virtual_host;

use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::audio::{SampleFormat, StatusFlags};

pub use virtual_host::{RunMode, VirtualDevice, VirtualHost};

/// 设备编号
pub type DeviceIndex = usize;

/// Driver 错误
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("Could not initialize driver: {0}")]
    Initialize(String),
    #[error("Driver not initialized")]
    NotInitialized,
    #[error("No such device: {0}")]
    NoSuchDevice(DeviceIndex),
    #[error("{0}")]
    FormatNotSupported(String),
    #[error("Could not open stream: {0}")]
    OpenStream(String),
    #[error("Could not start stream: {0}")]
    Start(String),
    #[error("Could not stop stream: {0}")]
    Stop(String),
    #[error("Could not close stream: {0}")]
    Close(String),
}

/// 设备信息
#[derive(Clone, Debug)]
pub struct DeviceInfo {
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: f64,
    pub default_low_input_latency: f64,
    pub default_low_output_latency: f64,
    pub default_high_input_latency: f64,
    pub default_high_output_latency: f64,
}

/// 单方向流参数
#[derive(Clone, Debug, PartialEq)]
pub struct StreamParameters {
    pub device: DeviceIndex,
    pub channel_count: u16,
    pub sample_format: SampleFormat,
    /// 建议延迟（秒）
    pub suggested_latency: f64,
}

impl StreamParameters {
    /// 每帧字节数
    pub fn bytes_per_frame(&self) -> usize {
        self.channel_count as usize * self.sample_format.bytes_per_sample()
    }
}

/// 回调时间信息（秒，流时钟）
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimeInfo {
    /// 输入 buffer 第一个样本的 ADC 时间；不可用时为 0
    pub input_adc_time: f64,
    /// 输出 buffer 第一个样本的 DAC 时间
    pub output_dac_time: f64,
    /// 回调被调用时的流时间
    pub current_time: f64,
}

/// 回调返回值
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackResult {
    /// 继续回调
    Continue,
    /// 数据已结束，driver 应停止回调
    Complete,
}

/// 单次回调的输入输出
pub struct CallbackIo<'a> {
    /// 采集数据（未配置输入时为 None）
    pub input: Option<&'a [u8]>,
    /// 回放缓冲区（未配置输出时为 None）
    pub output: Option<&'a mut [u8]>,
    pub frame_count: usize,
    pub time: TimeInfo,
    pub status: StatusFlags,
}

/// 实时回调
pub type StreamCallback = Box<dyn FnMut(CallbackIo<'_>) -> CallbackResult + Send + 'static>;

/// 音频 host（进程级 driver 入口）
pub trait AudioHost: Send + Sync {
    /// 进程级初始化
    fn initialize(&self) -> Result<(), DriverError>;

    /// 进程级释放
    fn terminate(&self);

    fn version_text(&self) -> String;

    fn device_count(&self) -> usize;

    fn default_input_device(&self) -> Option<DeviceIndex>;

    fn default_output_device(&self) -> Option<DeviceIndex>;

    fn device_info(&self, device: DeviceIndex) -> Option<DeviceInfo>;

    /// 格式协商
    fn is_format_supported(
        &self,
        input: Option<&StreamParameters>,
        output: Option<&StreamParameters>,
        sample_rate: f64,
    ) -> Result<(), DriverError>;

    /// 打开流；frames_per_buffer 为 None 时由 driver 决定
    fn open_stream(
        &self,
        input: Option<&StreamParameters>,
        output: Option<&StreamParameters>,
        sample_rate: f64,
        frames_per_buffer: Option<u32>,
        callback: StreamCallback,
    ) -> Result<Box<dyn DriverStream>, DriverError>;
}

/// 已打开的流
pub trait DriverStream: Send {
    fn start(&mut self) -> Result<(), DriverError>;

    /// 停止，已提交的 buffer 播放完毕后返回
    fn stop(&mut self) -> Result<(), DriverError>;

    /// 立即停止
    fn abort(&mut self) -> Result<(), DriverError>;

    fn close(&mut self) -> Result<(), DriverError>;

    /// 流时间（秒）
    fn time(&self) -> f64;

    /// 输入延迟（秒）
    fn input_latency(&self) -> f64;

    /// 输出延迟（秒）
    fn output_latency(&self) -> f64;

    /// 每次回调的帧数；driver 不固定时为 None
    fn frames_per_buffer(&self) -> Option<usize>;

    fn is_active(&self) -> bool;
}

/// 带引用计数的 host
///
/// 第一个 lease 触发 initialize，最后一个 lease 释放时 terminate，
/// 多个流上下文可以安全共享同一个 driver
pub struct SharedHost {
    host: Arc<dyn AudioHost>,
    leases: Mutex<usize>,
}

impl SharedHost {
    pub fn new(host: Arc<dyn AudioHost>) -> Arc<Self> {
        Arc::new(Self {
            host,
            leases: Mutex::new(0),
        })
    }

    /// 获取 lease，必要时初始化 driver
    pub fn acquire(self: &Arc<Self>) -> Result<HostLease, DriverError> {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if *leases == 0 {
            self.host.initialize()?;
            log::info!("{}", self.host.version_text());
        }
        *leases += 1;

        Ok(HostLease {
            shared: Arc::clone(self),
        })
    }

    pub fn host(&self) -> &dyn AudioHost {
        self.host.as_ref()
    }

    /// 当前存活的 lease 数
    pub fn active_leases(&self) -> usize {
        *self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            self.host.terminate();
            log::debug!("Driver terminated (last lease released)");
        }
    }
}

/// host 使用权
///
/// RAII 风格：Drop 时归还，最后一个归还者负责 terminate
pub struct HostLease {
    shared: Arc<SharedHost>,
}

impl HostLease {
    pub fn host(&self) -> &dyn AudioHost {
        self.shared.host()
    }
}

impl Drop for HostLease {
    fn drop(&mut self) {
        self.shared.release();
    }
}
