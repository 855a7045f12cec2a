//! 流上下文
//!
//! pipeline 面向的入口：打开时完成配置校验和 driver 协商，
//! 之后 pipeline 线程通过 pull_chunk / push_chunk 与回调交换数据。
//! 所有方法都是 &self，上下文可以放进 Arc 被多个线程共享。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam_utils::CachePadded;

use super::callback::{make_callback, StreamShared};
use super::fill::{fill_buffer, FillMode};
use super::{StopMode, StreamError, StreamState};
use crate::audio::timing::capture_timestamp;
use crate::audio::{Chunk, ConfigError, Direction, StatsReport, StreamOptions};
use crate::driver::{
    AudioHost, CallbackResult, DriverStream, HostLease, SharedHost, StreamParameters, TimeInfo,
};

/// 交给 driver 的每 buffer 帧数；None 由 driver 决定
#[cfg(target_arch = "arm")]
const FRAMES_PER_BUFFER: Option<u32> = Some(256);
#[cfg(not(target_arch = "arm"))]
const FRAMES_PER_BUFFER: Option<u32> = None;

/// driver 不报告周期时的 pull 大小
const FALLBACK_PULL_BYTES: usize = 1024;

/// 音频流上下文
pub struct AudioStreamContext {
    shared: Arc<StreamShared>,
    stream: Mutex<Option<Box<dyn DriverStream>>>,
    lease: Mutex<Option<HostLease>>,
    state: CachePadded<AtomicU8>,
    /// 每次回调的帧数（driver 报告）
    period_frames: Option<usize>,
}

impl AudioStreamContext {
    /// 打开流
    ///
    /// 至少配置一个方向；双工时两个方向采样率必须一致。
    /// 失败时不保留任何 driver 资源。
    pub fn open(
        host: &Arc<SharedHost>,
        input: Option<StreamOptions>,
        output: Option<StreamOptions>,
    ) -> Result<Self, StreamError> {
        let sample_rate = match (&input, &output) {
            (None, None) => return Err(ConfigError::NoDirection.into()),
            (Some(i), Some(o)) if i.sample_rate != o.sample_rate => {
                return Err(ConfigError::SampleRateMismatch {
                    input: i.sample_rate,
                    output: o.sample_rate,
                }
                .into())
            }
            (Some(options), _) | (None, Some(options)) => options.sample_rate,
        };
        for options in input.iter().chain(output.iter()) {
            options.validate()?;
        }

        let lease = host.acquire()?;

        if let Some(options) = &input {
            log::info!("Input {}", options);
        }
        if let Some(options) = &output {
            log::info!("Output {}", options);
        }

        let input_params = input
            .as_ref()
            .map(|options| negotiate(lease.host(), Direction::Input, options))
            .transpose()?;
        let output_params = output
            .as_ref()
            .map(|options| negotiate(lease.host(), Direction::Output, options))
            .transpose()?;

        lease
            .host()
            .is_format_supported(
                input_params.as_ref(),
                output_params.as_ref(),
                sample_rate as f64,
            )
            .map_err(ConfigError::FormatNotSupported)?;

        let shared = Arc::new(StreamShared::new(input, output));
        let stream = lease.host().open_stream(
            input_params.as_ref(),
            output_params.as_ref(),
            sample_rate as f64,
            FRAMES_PER_BUFFER,
            make_callback(Arc::downgrade(&shared)),
        )?;
        shared.set_input_latency(stream.input_latency());
        let period_frames = stream.frames_per_buffer();

        log::debug!(
            "Stream opened: {}Hz, {:?} frames/buffer, latency in {:.3}s out {:.3}s",
            sample_rate,
            period_frames,
            stream.input_latency(),
            stream.output_latency()
        );

        Ok(Self {
            shared,
            stream: Mutex::new(Some(stream)),
            lease: Mutex::new(Some(lease)),
            state: CachePadded::new(AtomicU8::new(StreamState::Idle as u8)),
            period_frames,
        })
    }

    fn lock_stream(&self) -> MutexGuard<'_, Option<Box<dyn DriverStream>>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 启动流（只能从 Idle 启动一次）
    pub fn start(&self) -> Result<(), StreamError> {
        let mut guard = self.lock_stream();
        if self.state() != StreamState::Idle {
            return Err(StreamError::InvalidState("start requires an idle stream"));
        }
        let stream = guard
            .as_mut()
            .ok_or(StreamError::InvalidState("stream is closed"))?;

        stream.start()?;
        self.set_state(StreamState::Running);
        log::info!("Stream started");
        Ok(())
    }

    /// 停止并关闭 driver 流，归还 host lease
    ///
    /// Graceful 等待回调结束后再终止队列；若回放回调正阻塞在空队列上，
    /// 需要先 quit()。Abort 先终止队列再停止。重复调用为空操作。
    pub fn stop(&self, mode: StopMode) -> Result<(), StreamError> {
        let mut guard = self.lock_stream();
        if !matches!(self.state(), StreamState::Idle | StreamState::Running) {
            return Ok(());
        }
        let Some(mut stream) = guard.take() else {
            return Ok(());
        };

        if mode == StopMode::Abort {
            self.quit();
        }
        let halted = match mode {
            StopMode::Graceful => stream.stop(),
            StopMode::Abort => stream.abort(),
        };
        let closed = stream.close();
        drop(stream);

        // driver 已停止，不会再有生产者/消费者
        self.quit();
        self.shared.retire();
        self.lease
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        self.set_state(match mode {
            StopMode::Graceful => StreamState::Stopped,
            StopMode::Abort => StreamState::Aborted,
        });
        log::info!("Stream stopped ({:?})", mode);

        halted?;
        closed?;
        Ok(())
    }

    /// 终止两个方向的队列（幂等）
    ///
    /// 唤醒所有阻塞中的 pull / push 和回调
    pub fn quit(&self) {
        if self.shared.quit() {
            log::info!("Stream quit requested");
        }
    }

    /// 关闭上下文（幂等），Drop 时自动调用
    pub fn close(&self) {
        if self.state() == StreamState::Closed {
            return;
        }
        self.quit();
        if let Err(err) = self.stop(StopMode::Abort) {
            log::warn!("Error while closing stream: {}", err);
        }
        self.shared.retire();
        self.set_state(StreamState::Closed);
        log::debug!("Stream context closed");
    }

    /// 读取 num_bytes 字节的采集数据
    ///
    /// 数据不足时阻塞；队列终止后返回截短的 chunk，排空后返回 None。
    /// 同一时刻只能有一个线程调用。
    pub fn pull_chunk(&self, num_bytes: usize) -> Result<Option<Chunk>, StreamError> {
        let lane = self
            .shared
            .input
            .as_ref()
            .ok_or(StreamError::DirectionNotConfigured(Direction::Input))?;

        let mut buffer = vec![0u8; num_bytes];
        let result = fill_buffer(&mut buffer, &lane.queue, FillMode::Capture(&lane.geometry));
        if result.bytes_written == 0 && num_bytes > 0 {
            return Ok(None);
        }

        buffer.truncate(result.bytes_written);
        Ok(Some(Chunk::new(buffer, result.timestamp)))
    }

    /// 提交回放数据；队列满时阻塞
    pub fn push_chunk(&self, chunk: Chunk) -> Result<(), StreamError> {
        let lane = self
            .shared
            .output
            .as_ref()
            .ok_or(StreamError::DirectionNotConfigured(Direction::Output))?;
        lane.queue.push(chunk);
        Ok(())
    }

    /// 取出并清空状态信箱
    ///
    /// 该方向设置了 close_on_error 时返回消息，否则记录日志后返回 None
    pub fn poll_status(&self, direction: Direction) -> Option<String> {
        let message = self.shared.mailbox.take()?;
        let close_on_error = self
            .shared
            .lane(direction)
            .is_some_and(|lane| lane.options.close_on_error);

        if close_on_error {
            Some(message)
        } else {
            log::warn!("AudioIO: {}", message);
            None
        }
    }

    /// 采集一个周期（driver 回调入口之一）
    pub fn capture_frames(
        &self,
        raw: &[u8],
        frame_count: usize,
        time: &TimeInfo,
    ) -> CallbackResult {
        let timestamp = capture_timestamp(
            time.input_adc_time,
            time.current_time,
            self.shared.input_latency(),
        );
        self.shared.capture_frames(raw, frame_count, timestamp)
    }

    /// 回放一个周期（driver 回调入口之一）
    pub fn render_frames(&self, out: &mut [u8], frame_count: usize) -> CallbackResult {
        self.shared.render_frames(out, frame_count)
    }

    pub fn has_direction(&self, direction: Direction) -> bool {
        self.shared.lane(direction).is_some()
    }

    pub fn options(&self, direction: Direction) -> Option<&StreamOptions> {
        self.shared.lane(direction).map(|lane| &lane.options)
    }

    /// 某方向一个回调周期的字节数
    pub fn period_bytes(&self, direction: Direction) -> Option<usize> {
        let frames = self.period_frames?;
        self.shared
            .lane(direction)
            .map(|lane| lane.geometry.frames_to_bytes(frames))
    }

    /// 双工流每次 pull 的字节数
    ///
    /// 双工回调先采集再阻塞等待回放数据，pull 不能超过一个采集周期，
    /// 否则 pipeline 与回调互相等待。requested 为 None 时取一个周期；
    /// 单向流或 driver 不报告周期时按 requested 原样返回。
    pub fn duplex_pull_bytes(&self, requested: Option<usize>) -> usize {
        let period = if self.has_direction(Direction::Output) {
            self.period_bytes(Direction::Input)
        } else {
            None
        };

        match (requested, period) {
            (Some(bytes), Some(period)) => {
                if bytes > period {
                    log::warn!(
                        "Pull size {} exceeds one callback period, using {} bytes",
                        bytes,
                        period
                    );
                }
                bytes.min(period).max(1)
            }
            (None, Some(period)) => period,
            (Some(bytes), None) => bytes.max(1),
            (None, None) => FALLBACK_PULL_BYTES,
        }
    }

    /// 某方向尚未消费的字节数
    pub fn buffered_bytes(&self, direction: Direction) -> usize {
        self.shared
            .lane(direction)
            .map_or(0, |lane| lane.queue.buffered_bytes())
    }

    /// driver 是否仍在调用回调
    pub fn is_active(&self) -> bool {
        self.lock_stream()
            .as_ref()
            .is_some_and(|stream| stream.is_active())
    }

    pub fn stats(&self) -> StatsReport {
        self.shared.stats.report()
    }

    /// 输入延迟（秒）
    pub fn input_latency(&self) -> f64 {
        self.shared.input_latency()
    }

    /// 流时间（秒）；流关闭后为 None
    pub fn stream_time(&self) -> Option<f64> {
        self.lock_stream().as_ref().map(|stream| stream.time())
    }
}

impl Drop for AudioStreamContext {
    fn drop(&mut self) {
        self.close();
    }
}

/// 单方向参数协商
///
/// 设备号越界或未指定时使用默认设备
fn negotiate(
    host: &dyn AudioHost,
    direction: Direction,
    options: &StreamOptions,
) -> Result<StreamParameters, ConfigError> {
    let device = match options
        .requested_device()
        .filter(|&device| device < host.device_count())
    {
        Some(device) => device,
        None => match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }
        .ok_or(ConfigError::NoDefaultDevice(direction))?,
    };
    let info = host
        .device_info(device)
        .ok_or(ConfigError::NoDefaultDevice(direction))?;
    log::info!("{} device name is {}", direction, info.name);

    let (max_channels, low_latency, high_latency) = match direction {
        Direction::Input => (
            info.max_input_channels,
            info.default_low_input_latency,
            info.default_high_input_latency,
        ),
        Direction::Output => (
            info.max_output_channels,
            info.default_low_output_latency,
            info.default_high_output_latency,
        ),
    };
    if options.channel_count > max_channels {
        return Err(ConfigError::TooManyChannels {
            requested: options.channel_count,
            max: max_channels,
        });
    }

    let suggested_latency = if cfg!(target_arch = "arm") {
        high_latency
    } else {
        low_latency
    };
    log::debug!(
        "{} device {}: {} channels, suggested latency {:.3}s",
        direction,
        device,
        options.channel_count,
        suggested_latency
    );

    Ok(StreamParameters {
        device,
        channel_count: options.channel_count,
        sample_format: options.sample_format,
        suggested_latency,
    })
}
