//! 有界阻塞 Chunk 队列
//!
//! 回调线程与 pipeline 线程之间唯一的同步点：
//! - Mutex + Condvar，生产者和消费者都可能阻塞
//! - head chunk 带消费游标，允许一个 chunk 跨越多次回调被读完
//! - terminate() 之后先排空剩余内容，再永久报告为空
//!
//! 约束：同一时刻只有一个消费者推进游标；生产者从不修改 head

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use super::chunk::Chunk;

/// 非阻塞 push 的结果
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// 已入队
    Queued,
    /// 队列已满，chunk 被丢弃
    Full,
    /// 队列已终止，chunk 被丢弃
    Terminated,
}

struct QueueState {
    /// 到达顺序；head 即 current
    chunks: VecDeque<Chunk>,
    /// head 是否已被 wait_for_next 确认为 current
    has_current: bool,
    /// current 已消费的字节数
    offset: usize,
    terminal: bool,
}

impl QueueState {
    /// current 是否已读完（读完的 head 不再占用队列深度）
    fn current_exhausted(&self) -> bool {
        self.has_current
            && self
                .chunks
                .front()
                .map_or(true, |chunk| self.offset >= chunk.len())
    }

    /// 参与背压计算的深度
    fn pending(&self) -> usize {
        self.chunks.len() - usize::from(self.current_exhausted())
    }
}

/// 有界阻塞 FIFO
pub struct ChunkQueue {
    /// 最大深度，0 表示不限
    max_depth: usize,
    state: Mutex<QueueState>,
    /// 有新 chunk 或已终止
    not_empty: Condvar,
    /// 有空位或已终止
    not_full: Condvar,
}

impl ChunkQueue {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            state: Mutex::new(QueueState {
                chunks: VecDeque::new(),
                has_current: false,
                offset: 0,
                terminal: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    // 持锁方从不在修改中途 panic，中毒后状态仍然一致
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_full(&self, state: &QueueState) -> bool {
        self.max_depth > 0 && state.pending() >= self.max_depth
    }

    /// 入队（pipeline 线程调用）
    ///
    /// 达到 max_depth 时阻塞，直到消费者腾出空间或队列被终止。
    /// 终止后的 push 静默丢弃。
    pub fn push(&self, chunk: Chunk) -> PushOutcome {
        let mut state = self.lock();
        while self.is_full(&state) && !state.terminal {
            state = self
                .not_full
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        if state.terminal {
            log::debug!("Dropping {} byte chunk pushed after terminate", chunk.len());
            return PushOutcome::Terminated;
        }

        state.chunks.push_back(chunk);
        drop(state);
        self.not_empty.notify_one();
        PushOutcome::Queued
    }

    /// 非阻塞入队（回调线程调用）
    ///
    /// 绝不等待背压；满了直接丢弃并返回 Full
    pub fn try_push(&self, chunk: Chunk) -> PushOutcome {
        let mut state = self.lock();
        if state.terminal {
            return PushOutcome::Terminated;
        }
        if self.is_full(&state) {
            return PushOutcome::Full;
        }

        state.chunks.push_back(chunk);
        drop(state);
        self.not_empty.notify_one();
        PushOutcome::Queued
    }

    /// 确保 current 可读
    ///
    /// current 不存在或已读完时：释放旧 head，阻塞等待新 chunk 或终止。
    /// 返回 current 是否存在；终止且为空时返回 false，之后不再阻塞。
    pub fn wait_for_next(&self) -> bool {
        let mut state = self.lock();
        if state.has_current {
            if !state.current_exhausted() {
                return true;
            }
            state.chunks.pop_front();
            state.has_current = false;
            state.offset = 0;
        }

        loop {
            if !state.chunks.is_empty() {
                state.has_current = true;
                state.offset = 0;
                return true;
            }
            if state.terminal {
                return false;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// 当前 head chunk 及其游标
    ///
    /// 返回 chunk 的廉价 clone，调用方可在锁外读取字节
    pub fn current(&self) -> Option<(Chunk, usize)> {
        let state = self.lock();
        if !state.has_current {
            return None;
        }
        state
            .chunks
            .front()
            .map(|chunk| (chunk.clone(), state.offset))
    }

    /// current 的总字节数
    pub fn current_len(&self) -> Option<usize> {
        self.current().map(|(chunk, _)| chunk.len())
    }

    /// current 已消费的字节数
    pub fn current_offset(&self) -> Option<usize> {
        self.current().map(|(_, offset)| offset)
    }

    /// current 的基准时间戳
    pub fn current_timestamp(&self) -> Option<f64> {
        self.current().map(|(chunk, _)| chunk.timestamp_secs())
    }

    /// current 剩余可读字节数
    pub fn current_remaining(&self) -> usize {
        self.current()
            .map(|(chunk, offset)| chunk.len() - offset)
            .unwrap_or(0)
    }

    /// 推进游标
    ///
    /// n 超过剩余字节时截断，保证 offset <= len。
    /// 读完后 head 不再计入深度，等待中的生产者会被唤醒。
    pub fn advance(&self, n: usize) {
        let mut state = self.lock();
        if !state.has_current {
            debug_assert!(false, "advance without a current chunk");
            return;
        }
        let len = state.chunks.front().map_or(0, Chunk::len);
        let step = n.min(len - state.offset);
        debug_assert_eq!(step, n, "advance past end of current chunk");
        state.offset += step;

        if state.offset == len {
            drop(state);
            self.not_full.notify_all();
        }
    }

    /// 终止队列（幂等）
    ///
    /// 唤醒所有阻塞中的 push 和 wait_for_next
    pub fn terminate(&self) {
        let mut state = self.lock();
        if !state.terminal {
            state.terminal = true;
            log::debug!(
                "Chunk queue terminated with {} chunks pending",
                state.pending()
            );
        }
        drop(state);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_terminated(&self) -> bool {
        self.lock().terminal
    }

    /// 队列中的 chunk 数（含 head）
    pub fn depth(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 尚未被消费的字节数
    pub fn buffered_bytes(&self) -> usize {
        let state = self.lock();
        let total: usize = state.chunks.iter().map(Chunk::len).sum();
        if state.has_current {
            total - state.offset
        } else {
            total
        }
    }
}
