//! 软件 driver
//!
//! 不依赖硬件的 AudioHost 实现，两种运行方式：
//! - Clocked: 独立线程按 frames / sample_rate 的周期调用回调（CLI 使用）
//! - Manual: 由调用方逐周期驱动（测试使用，完全确定）
//!
//! 所有可观测状态（初始化次数、生命周期事件、回放输出）都放在 VirtualProbe 里

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{
    AudioHost, CallbackIo, CallbackResult, DeviceIndex, DeviceInfo, DriverError, DriverStream,
    StreamCallback, StreamParameters, TimeInfo,
};
use crate::audio::{StatusFlags, StreamClock};

/// 默认每次回调的帧数
const DEFAULT_FRAMES_PER_BUFFER: u32 = 256;

/// 运行方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunMode {
    Clocked,
    Manual,
}

/// 虚拟设备描述
#[derive(Clone, Debug)]
pub struct VirtualDevice {
    pub name: String,
    pub max_input_channels: u16,
    pub max_output_channels: u16,
    pub default_sample_rate: f64,
    /// 支持的采样率
    pub sample_rates: Vec<u32>,
    pub low_latency: f64,
    pub high_latency: f64,
}

impl VirtualDevice {
    pub fn new(name: &str, max_input_channels: u16, max_output_channels: u16) -> Self {
        Self {
            name: name.to_string(),
            max_input_channels,
            max_output_channels,
            default_sample_rate: 48000.0,
            sample_rates: vec![44100, 48000, 88200, 96000, 176400, 192000],
            low_latency: 0.01,
            high_latency: 0.1,
        }
    }

    pub fn with_sample_rates(mut self, sample_rates: &[u32]) -> Self {
        self.sample_rates = sample_rates.to_vec();
        self
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            max_input_channels: self.max_input_channels,
            max_output_channels: self.max_output_channels,
            default_sample_rate: self.default_sample_rate,
            default_low_input_latency: self.low_latency,
            default_low_output_latency: self.low_latency,
            default_high_input_latency: self.high_latency,
            default_high_output_latency: self.high_latency,
        }
    }
}

/// 流生命周期事件
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Opened,
    Started,
    Stopped,
    Aborted,
    Closed,
}

/// 软件 driver 的可观测状态
#[derive(Default)]
pub struct VirtualProbe {
    initialize_count: AtomicUsize,
    terminate_count: AtomicUsize,
    initialized: AtomicBool,
    events: Mutex<Vec<StreamEvent>>,
    rendered: Mutex<Vec<u8>>,
    current: Mutex<Option<Arc<StreamCore>>>,
}

impl VirtualProbe {
    pub fn initialize_count(&self) -> usize {
        self.initialize_count.load(Ordering::Acquire)
    }

    pub fn terminate_count(&self) -> usize {
        self.terminate_count.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// 生命周期事件记录
    pub fn events(&self) -> Vec<StreamEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 取出迄今为止回放的全部字节
    pub fn take_rendered(&self) -> Vec<u8> {
        std::mem::take(&mut *self.rendered.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// 当前是否有打开的流
    pub fn has_open_stream(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn record(&self, event: StreamEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn current_stream(&self) -> Option<Arc<StreamCore>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// 流的共享部分（driver 线程和 VirtualStream 共用）
struct StreamCore {
    callback: Mutex<StreamCallback>,
    /// 0 表示未配置输入
    input_frame_bytes: usize,
    /// 0 表示未配置输出
    output_frame_bytes: usize,
    frames_per_buffer: usize,
    sample_rate: f64,
    clock: StreamClock,
    input_latency: f64,
    output_latency: f64,
    active: AtomicBool,
    stop_requested: AtomicBool,
    probe: Arc<VirtualProbe>,
}

impl StreamCore {
    fn period(&self) -> Duration {
        Duration::from_secs_f64(self.frames_per_buffer as f64 / self.sample_rate)
    }

    /// 执行一个回调周期
    ///
    /// input 不足一个周期时补零；返回回调结果和本周期的回放字节
    fn run_cycle(
        &self,
        input: &[u8],
        status: StatusFlags,
        adc_time: f64,
    ) -> (CallbackResult, Vec<u8>) {
        let frames = self.frames_per_buffer;

        let mut input_buf = vec![0u8; frames * self.input_frame_bytes];
        let count = input.len().min(input_buf.len());
        input_buf[..count].copy_from_slice(&input[..count]);

        let mut output_buf = vec![0u8; frames * self.output_frame_bytes];

        let now = self.clock.now_secs();
        let time = TimeInfo {
            input_adc_time: adc_time,
            output_dac_time: now + self.output_latency,
            current_time: now,
        };

        let result = {
            let mut guard = self.callback.lock().unwrap_or_else(PoisonError::into_inner);
            let callback: &mut StreamCallback = &mut guard;
            callback(CallbackIo {
                input: (self.input_frame_bytes > 0).then_some(input_buf.as_slice()),
                output: if self.output_frame_bytes > 0 {
                    Some(output_buf.as_mut_slice())
                } else {
                    None
                },
                frame_count: frames,
                time,
                status,
            })
        };

        if self.output_frame_bytes > 0 {
            self.probe
                .rendered
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&output_buf);
        }

        if result == CallbackResult::Complete {
            self.active.store(false, Ordering::Release);
        }

        (result, output_buf)
    }
}

/// Clocked 模式的 driver 线程
///
/// 输入端产生递增字节序列（wrapping），便于端到端校验顺序
fn clocked_loop(core: Arc<StreamCore>) {
    let period = core.period();
    let mut next_byte: u8 = 0;
    let mut input = vec![0u8; core.frames_per_buffer * core.input_frame_bytes];
    let mut deadline = Instant::now();

    log::debug!(
        "Virtual driver thread started: {} frames every {}µs",
        core.frames_per_buffer,
        period.as_micros()
    );

    while !core.stop_requested.load(Ordering::Acquire) {
        for byte in input.iter_mut() {
            *byte = next_byte;
            next_byte = next_byte.wrapping_add(1);
        }

        let (result, _) = core.run_cycle(&input, StatusFlags::empty(), 0.0);
        if result == CallbackResult::Complete {
            log::debug!("Callback reported complete, driver thread exiting");
            break;
        }

        deadline += period;
        let now = Instant::now();
        if deadline > now {
            thread::sleep(deadline - now);
        } else {
            // 落后时不追赶
            deadline = now;
        }
    }

    core.active.store(false, Ordering::Release);
}

/// 软件 driver 打开的流
pub struct VirtualStream {
    core: Arc<StreamCore>,
    mode: RunMode,
    worker: Option<JoinHandle<()>>,
    fail_start: bool,
    closed: bool,
}

impl VirtualStream {
    fn halt(&mut self, event: StreamEvent) -> Result<(), DriverError> {
        self.core.stop_requested.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| DriverError::Stop("driver thread panicked".to_string()))?;
        }
        self.core.active.store(false, Ordering::Release);
        self.core.probe.record(event);
        Ok(())
    }
}

impl DriverStream for VirtualStream {
    fn start(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Start("stream is closed".to_string()));
        }
        if self.fail_start {
            return Err(DriverError::Start("device unavailable".to_string()));
        }
        if self.worker.is_some() || self.core.active.load(Ordering::Acquire) {
            return Ok(());
        }

        self.core.stop_requested.store(false, Ordering::Release);
        self.core.active.store(true, Ordering::Release);

        if self.mode == RunMode::Clocked {
            let core = Arc::clone(&self.core);
            let worker = thread::Builder::new()
                .name("virtual-driver".to_string())
                .spawn(move || clocked_loop(core))
                .map_err(|e| DriverError::Start(e.to_string()))?;
            self.worker = Some(worker);
        }

        self.core.probe.record(StreamEvent::Started);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DriverError> {
        self.halt(StreamEvent::Stopped)
    }

    fn abort(&mut self) -> Result<(), DriverError> {
        self.halt(StreamEvent::Aborted)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        if self.worker.is_some() {
            self.halt(StreamEvent::Aborted)?;
        }
        self.closed = true;

        let mut current = self
            .core
            .probe
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if current
            .as_ref()
            .is_some_and(|core| Arc::ptr_eq(core, &self.core))
        {
            *current = None;
        }
        drop(current);

        self.core.probe.record(StreamEvent::Closed);
        Ok(())
    }

    fn time(&self) -> f64 {
        self.core.clock.now_secs()
    }

    fn input_latency(&self) -> f64 {
        self.core.input_latency
    }

    fn output_latency(&self) -> f64 {
        self.core.output_latency
    }

    fn frames_per_buffer(&self) -> Option<usize> {
        Some(self.core.frames_per_buffer)
    }

    fn is_active(&self) -> bool {
        self.core.active.load(Ordering::Acquire)
    }
}

impl Drop for VirtualStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// 软件 AudioHost
pub struct VirtualHost {
    devices: Vec<VirtualDevice>,
    default_input: Option<DeviceIndex>,
    default_output: Option<DeviceIndex>,
    mode: RunMode,
    frames_per_buffer: u32,
    fail_initialize: bool,
    fail_start: bool,
    probe: Arc<VirtualProbe>,
}

impl VirtualHost {
    /// 单个双工设备（2 入 2 出）
    pub fn new(mode: RunMode) -> Self {
        Self {
            devices: vec![VirtualDevice::new("Virtual Loopback", 2, 2)],
            default_input: Some(0),
            default_output: Some(0),
            mode,
            frames_per_buffer: DEFAULT_FRAMES_PER_BUFFER,
            fail_initialize: false,
            fail_start: false,
            probe: Arc::new(VirtualProbe::default()),
        }
    }

    pub fn with_devices(
        mut self,
        devices: Vec<VirtualDevice>,
        default_input: Option<DeviceIndex>,
        default_output: Option<DeviceIndex>,
    ) -> Self {
        self.devices = devices;
        self.default_input = default_input;
        self.default_output = default_output;
        self
    }

    /// driver 自选的每回调帧数
    pub fn with_frames_per_buffer(mut self, frames: u32) -> Self {
        self.frames_per_buffer = frames.max(1);
        self
    }

    /// initialize 总是失败
    pub fn fail_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    /// 流 start 总是失败
    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn probe(&self) -> &Arc<VirtualProbe> {
        &self.probe
    }

    pub fn devices(&self) -> &[VirtualDevice] {
        &self.devices
    }

    /// Manual 模式：驱动当前流执行一个回调周期
    ///
    /// 没有已启动的流时返回 None
    pub fn drive(
        &self,
        input: &[u8],
        status: StatusFlags,
        adc_time: f64,
    ) -> Option<(CallbackResult, Vec<u8>)> {
        let core = self.probe.current_stream()?;
        if !core.active.load(Ordering::Acquire) {
            return None;
        }
        Some(core.run_cycle(input, status, adc_time))
    }

    fn check_params(
        &self,
        params: &StreamParameters,
        is_input: bool,
        sample_rate: f64,
    ) -> Result<(), DriverError> {
        let device = self
            .devices
            .get(params.device)
            .ok_or(DriverError::NoSuchDevice(params.device))?;

        let max_channels = if is_input {
            device.max_input_channels
        } else {
            device.max_output_channels
        };
        if params.channel_count > max_channels {
            return Err(DriverError::FormatNotSupported(
                "Invalid number of channels".to_string(),
            ));
        }

        if !device
            .sample_rates
            .iter()
            .any(|&rate| rate as f64 == sample_rate)
        {
            return Err(DriverError::FormatNotSupported(
                "Invalid sample rate".to_string(),
            ));
        }
        Ok(())
    }
}

impl AudioHost for VirtualHost {
    fn initialize(&self) -> Result<(), DriverError> {
        if self.fail_initialize {
            return Err(DriverError::Initialize("simulated failure".to_string()));
        }
        self.probe.initialize_count.fetch_add(1, Ordering::AcqRel);
        self.probe.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn terminate(&self) {
        self.probe.terminate_count.fetch_add(1, Ordering::AcqRel);
        self.probe.initialized.store(false, Ordering::Release);
    }

    fn version_text(&self) -> String {
        format!("VirtualHost {} (software driver)", env!("CARGO_PKG_VERSION"))
    }

    fn device_count(&self) -> usize {
        self.devices.len()
    }

    fn default_input_device(&self) -> Option<DeviceIndex> {
        self.default_input
    }

    fn default_output_device(&self) -> Option<DeviceIndex> {
        self.default_output
    }

    fn device_info(&self, device: DeviceIndex) -> Option<DeviceInfo> {
        self.devices.get(device).map(VirtualDevice::info)
    }

    fn is_format_supported(
        &self,
        input: Option<&StreamParameters>,
        output: Option<&StreamParameters>,
        sample_rate: f64,
    ) -> Result<(), DriverError> {
        if let Some(params) = input {
            self.check_params(params, true, sample_rate)?;
        }
        if let Some(params) = output {
            self.check_params(params, false, sample_rate)?;
        }
        Ok(())
    }

    fn open_stream(
        &self,
        input: Option<&StreamParameters>,
        output: Option<&StreamParameters>,
        sample_rate: f64,
        frames_per_buffer: Option<u32>,
        callback: StreamCallback,
    ) -> Result<Box<dyn DriverStream>, DriverError> {
        if !self.probe.is_initialized() {
            return Err(DriverError::NotInitialized);
        }
        self.is_format_supported(input, output, sample_rate)
            .map_err(|e| DriverError::OpenStream(e.to_string()))?;

        let frames = frames_per_buffer.unwrap_or(self.frames_per_buffer).max(1) as usize;
        let core = Arc::new(StreamCore {
            callback: Mutex::new(callback),
            input_frame_bytes: input.map_or(0, StreamParameters::bytes_per_frame),
            output_frame_bytes: output.map_or(0, StreamParameters::bytes_per_frame),
            frames_per_buffer: frames,
            sample_rate,
            clock: StreamClock::new(),
            input_latency: input.map_or(0.0, |p| p.suggested_latency),
            output_latency: output.map_or(0.0, |p| p.suggested_latency),
            active: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            probe: Arc::clone(&self.probe),
        });

        *self
            .probe
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&core));
        self.probe.record(StreamEvent::Opened);

        log::debug!(
            "Virtual stream opened: {}Hz, {} frames per buffer",
            sample_rate,
            frames
        );

        Ok(Box::new(VirtualStream {
            core,
            mode: self.mode,
            worker: None,
            fail_start: self.fail_start,
            closed: false,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SampleFormat;
    use std::sync::atomic::AtomicU64;

    fn params(channels: u16) -> StreamParameters {
        StreamParameters {
            device: 0,
            channel_count: channels,
            sample_format: SampleFormat::Int16,
            suggested_latency: 0.01,
        }
    }

    /// 把输入原样写到输出的回调
    fn passthrough() -> StreamCallback {
        Box::new(|io: CallbackIo<'_>| {
            if let (Some(input), Some(output)) = (io.input, io.output) {
                output.copy_from_slice(input);
            }
            CallbackResult::Continue
        })
    }

    #[test]
    fn test_manual_drive_passthrough() {
        let host = VirtualHost::new(RunMode::Manual).with_frames_per_buffer(4);
        host.initialize().unwrap();

        let p = params(2);
        let mut stream = host
            .open_stream(Some(&p), Some(&p), 48000.0, None, passthrough())
            .unwrap();

        // 未启动时不能驱动
        assert!(host.drive(&[], StatusFlags::empty(), 0.0).is_none());

        stream.start().unwrap();
        let input: Vec<u8> = (0..16).collect();
        let (result, output) = host.drive(&input, StatusFlags::empty(), 0.0).unwrap();
        assert_eq!(result, CallbackResult::Continue);
        assert_eq!(output, input);
        assert_eq!(host.probe().take_rendered(), input);

        stream.stop().unwrap();
        stream.close().unwrap();
        assert!(!host.probe().has_open_stream());
        assert_eq!(
            host.probe().events(),
            vec![
                StreamEvent::Opened,
                StreamEvent::Started,
                StreamEvent::Stopped,
                StreamEvent::Closed
            ]
        );
    }

    #[test]
    fn test_clocked_mode_invokes_callback() {
        let host = VirtualHost::new(RunMode::Clocked).with_frames_per_buffer(48);
        host.initialize().unwrap();

        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let callback: StreamCallback = Box::new(move |io: CallbackIo<'_>| {
            assert_eq!(io.frame_count, 48);
            counter.fetch_add(1, Ordering::Relaxed);
            CallbackResult::Continue
        });

        let p = params(1);
        let mut stream = host
            .open_stream(None, Some(&p), 48000.0, None, callback)
            .unwrap();
        stream.start().unwrap();
        assert!(stream.is_active());
        thread::sleep(Duration::from_millis(30));
        stream.stop().unwrap();

        assert!(!stream.is_active());
        assert!(calls.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn test_complete_ends_clocked_stream() {
        let host = VirtualHost::new(RunMode::Clocked).with_frames_per_buffer(16);
        host.initialize().unwrap();

        let callback: StreamCallback = Box::new(|_io: CallbackIo<'_>| CallbackResult::Complete);
        let p = params(2);
        let mut stream = host
            .open_stream(None, Some(&p), 48000.0, None, callback)
            .unwrap();
        stream.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while stream.is_active() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!stream.is_active());
        stream.close().unwrap();
    }

    #[test]
    fn test_rejects_unsupported_format() {
        let host = VirtualHost::new(RunMode::Manual);
        host.initialize().unwrap();

        let too_many = params(8);
        assert!(matches!(
            host.is_format_supported(None, Some(&too_many), 48000.0),
            Err(DriverError::FormatNotSupported(_))
        ));
        assert!(matches!(
            host.is_format_supported(Some(&params(2)), None, 12345.0),
            Err(DriverError::FormatNotSupported(_))
        ));

        let mut bad_device = params(2);
        bad_device.device = 7;
        assert!(matches!(
            host.is_format_supported(Some(&bad_device), None, 48000.0),
            Err(DriverError::NoSuchDevice(7))
        ));
    }

    #[test]
    fn test_open_requires_initialize() {
        let host = VirtualHost::new(RunMode::Manual);
        let p = params(2);
        let result = host.open_stream(None, Some(&p), 48000.0, None, passthrough());
        assert!(matches!(result, Err(DriverError::NotInitialized)));
    }

    #[test]
    fn test_fail_start() {
        let host = VirtualHost::new(RunMode::Manual).fail_start();
        host.initialize().unwrap();
        let p = params(2);
        let mut stream = host
            .open_stream(None, Some(&p), 48000.0, None, passthrough())
            .unwrap();
        assert!(matches!(stream.start(), Err(DriverError::Start(_))));
    }
}
