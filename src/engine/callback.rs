//! 实时回调
//!
//! driver 持有的回调只拿到 `Weak<StreamShared>`，
//! 上下文关闭（alive = false）或被释放后回调直接返回 Complete 并输出静音。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Weak;

use crossbeam_utils::CachePadded;

use super::fill::{fill_buffer, FillMode};
use crate::audio::timing::capture_timestamp;
use crate::audio::{
    Chunk, ChunkQueue, Direction, PushOutcome, SampleGeometry, StatusFlags, StatusMailbox,
    StreamOptions, StreamStats,
};
use crate::driver::{CallbackIo, CallbackResult, StreamCallback};

/// 单方向的配置和队列
pub(crate) struct Lane {
    pub options: StreamOptions,
    pub geometry: SampleGeometry,
    pub queue: ChunkQueue,
}

impl Lane {
    fn new(options: StreamOptions) -> Self {
        Self {
            geometry: options.geometry(),
            queue: ChunkQueue::new(options.max_queue),
            options,
        }
    }
}

/// 回调和 pipeline 共享的状态
pub(crate) struct StreamShared {
    pub input: Option<Lane>,
    pub output: Option<Lane>,
    pub mailbox: StatusMailbox,
    pub stats: StreamStats,
    /// 回调入口检查
    alive: CachePadded<AtomicBool>,
    quit_requested: AtomicBool,
    /// 输入延迟（f64 bits），open 之后才知道
    input_latency: CachePadded<AtomicU64>,
}

impl StreamShared {
    pub fn new(input: Option<StreamOptions>, output: Option<StreamOptions>) -> Self {
        Self {
            input: input.map(Lane::new),
            output: output.map(Lane::new),
            mailbox: StatusMailbox::new(),
            stats: StreamStats::new(),
            alive: CachePadded::new(AtomicBool::new(true)),
            quit_requested: AtomicBool::new(false),
            input_latency: CachePadded::new(AtomicU64::new(0f64.to_bits())),
        }
    }

    pub fn lane(&self, direction: Direction) -> Option<&Lane> {
        match direction {
            Direction::Input => self.input.as_ref(),
            Direction::Output => self.output.as_ref(),
        }
    }

    #[inline]
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 之后的回调都返回 Complete
    pub fn retire(&self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn set_input_latency(&self, secs: f64) {
        self.input_latency.store(secs.to_bits(), Ordering::Release);
    }

    #[inline]
    pub fn input_latency(&self) -> f64 {
        f64::from_bits(self.input_latency.load(Ordering::Acquire))
    }

    /// 终止两个方向的队列；第一次调用返回 true
    pub fn quit(&self) -> bool {
        for lane in [&self.input, &self.output].into_iter().flatten() {
            lane.queue.terminate();
        }
        !self.quit_requested.swap(true, Ordering::AcqRel)
    }

    /// 记录 driver 状态位
    pub fn report_driver_status(&self, flags: StatusFlags) {
        if flags.is_empty() {
            return;
        }
        self.stats.record_status();
        self.mailbox.report(flags);
    }

    /// 采集：拷贝一个周期的输入并入队，绝不阻塞
    pub fn capture_frames(&self, raw: &[u8], frame_count: usize, timestamp: f64) -> CallbackResult {
        let Some(lane) = &self.input else {
            return CallbackResult::Continue;
        };

        let bytes = lane.geometry.frames_to_bytes(frame_count).min(raw.len());
        let chunk = Chunk::copy_from_slice(&raw[..bytes], timestamp);
        match lane.queue.try_push(chunk) {
            PushOutcome::Queued => self.stats.add_captured(bytes),
            PushOutcome::Full => {
                self.stats.record_dropped_chunk();
                self.mailbox
                    .post(format!("input queue overflow - dropped {} bytes", bytes));
            }
            PushOutcome::Terminated => {}
        }
        CallbackResult::Continue
    }

    /// 回放：从输出队列填满一个周期
    pub fn render_frames(&self, out: &mut [u8], frame_count: usize) -> CallbackResult {
        let Some(lane) = &self.output else {
            out.fill(0);
            return CallbackResult::Complete;
        };

        let bytes = lane.geometry.frames_to_bytes(frame_count).min(out.len());
        let (period, rest) = out.split_at_mut(bytes);
        rest.fill(0);

        let result = fill_buffer(period, &lane.queue, FillMode::Render);
        self.stats.add_rendered(result.bytes_written);
        if result.finished {
            self.stats.record_zero_fill();
            CallbackResult::Complete
        } else {
            CallbackResult::Continue
        }
    }

    /// 一个完整的回调周期
    ///
    /// 两个方向都完成才返回 Complete；未配置的方向视为完成，采集永不完成
    pub fn process(&self, io: CallbackIo<'_>) -> CallbackResult {
        self.stats.on_callback();
        self.report_driver_status(io.status);

        let input_done = match (&self.input, io.input) {
            (Some(_), Some(raw)) => {
                let timestamp = capture_timestamp(
                    io.time.input_adc_time,
                    io.time.current_time,
                    self.input_latency(),
                );
                self.capture_frames(raw, io.frame_count, timestamp) == CallbackResult::Complete
            }
            (Some(_), None) => false,
            (None, _) => true,
        };

        let output_done = match io.output {
            Some(out) => self.render_frames(out, io.frame_count) == CallbackResult::Complete,
            None => true,
        };

        if input_done && output_done {
            CallbackResult::Complete
        } else {
            CallbackResult::Continue
        }
    }
}

/// 构造交给 driver 的回调
pub(crate) fn make_callback(shared: Weak<StreamShared>) -> StreamCallback {
    Box::new(move |io: CallbackIo<'_>| {
        match shared.upgrade() {
            Some(shared) if shared.is_alive() => shared.process(io),
            _ => {
                if let Some(out) = io.output {
                    out.fill(0);
                }
                CallbackResult::Complete
            }
        }
    })
}
