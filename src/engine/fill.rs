//! 填充/排空算法
//!
//! 回调（固定帧数）和 pipeline（任意字节数）都通过这里从队列取数据。
//! 采集与回放只在两点不同：采集方向计算时间戳，数据流向相反。

use crate::audio::timing::offset_timestamp;
use crate::audio::{ChunkQueue, SampleGeometry};

/// 填充方式
#[derive(Clone, Copy, Debug)]
pub enum FillMode<'a> {
    /// pipeline 读取采集数据，需要时间戳
    Capture(&'a SampleGeometry),
    /// 回调读取回放数据
    Render,
}

impl FillMode<'_> {
    fn label(&self) -> &'static str {
        match self {
            Self::Capture(_) => "input",
            Self::Render => "output",
        }
    }
}

/// 一次填充的结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FillResult {
    /// 实际写入的字节数；少于请求数只发生在队列终止时
    pub bytes_written: usize,
    /// 写入的第一个字节的时间戳（仅 Capture）
    pub timestamp: f64,
    /// 队列已终止并排空，剩余部分已补零
    pub finished: bool,
}

/// 从队列填满 dst
///
/// 队列为空时阻塞等待；终止且排空后剩余部分补零并返回 finished。
/// 一个 chunk 可以跨越多次填充，时间戳按 chunk 内已消费字节偏移。
pub fn fill_buffer(dst: &mut [u8], queue: &ChunkQueue, mode: FillMode<'_>) -> FillResult {
    let mut written = 0;
    let mut timestamp = 0.0;
    let mut finished = false;

    while written < dst.len() {
        let current = match queue.current() {
            Some((chunk, offset)) if offset < chunk.len() => Some((chunk, offset)),
            _ => {
                if queue.wait_for_next() {
                    queue.current()
                } else {
                    None
                }
            }
        };

        let Some((chunk, offset)) = current else {
            log::debug!(
                "Finishing {} - {} bytes not available to fill the last buffer",
                mode.label(),
                dst.len() - written
            );
            dst[written..].fill(0);
            finished = true;
            break;
        };

        if written == 0 {
            if let FillMode::Capture(geometry) = mode {
                timestamp = offset_timestamp(chunk.timestamp_secs(), offset, geometry);
            }
        }

        let count = (dst.len() - written).min(chunk.len() - offset);
        dst[written..written + count].copy_from_slice(&chunk.as_bytes()[offset..offset + count]);
        written += count;
        queue.advance(count);
    }

    FillResult {
        bytes_written: written,
        timestamp,
        finished,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{Chunk, SampleFormat};
    use rand::Rng;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn geometry() -> SampleGeometry {
        // 2ch * 2 字节：每帧 4 字节
        SampleGeometry::new(48000, 2, SampleFormat::Int16)
    }

    #[test]
    fn test_chunk_spans_multiple_fills() {
        let queue = ChunkQueue::new(0);
        queue.push(Chunk::new((0u8..10).collect::<Vec<_>>(), 0.0));

        let geometry = geometry();
        let mut first = [0u8; 4];
        let result = fill_buffer(&mut first, &queue, FillMode::Capture(&geometry));
        assert_eq!(result.bytes_written, 4);
        assert!(!result.finished);
        assert_eq!(first, [0, 1, 2, 3]);
        assert_eq!(queue.current_offset(), Some(4));

        let mut second = [0u8; 4];
        fill_buffer(&mut second, &queue, FillMode::Capture(&geometry));
        assert_eq!(second, [4, 5, 6, 7]);
    }

    #[test]
    fn test_fill_concatenates_chunks() {
        let queue = ChunkQueue::new(0);
        queue.push(Chunk::new(vec![1u8, 2, 3], 0.0));
        queue.push(Chunk::new(vec![4u8, 5], 0.0));
        queue.push(Chunk::new(vec![6u8, 7, 8, 9], 0.0));

        let mut dst = [0u8; 7];
        let result = fill_buffer(&mut dst, &queue, FillMode::Render);
        assert_eq!(result.bytes_written, 7);
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(queue.current_remaining(), 2);
    }

    #[test]
    fn test_timestamp_offset_within_chunk() {
        let queue = ChunkQueue::new(0);
        queue.push(Chunk::new(vec![0u8; 192], 0.0));

        let geometry = geometry();
        let mut dst = [0u8; 96];
        let first = fill_buffer(&mut dst, &queue, FillMode::Capture(&geometry));
        assert_eq!(first.timestamp, 0.0);

        // 从 chunk 内第 96 字节开始读：96 / (2 * 2 * 48000) = 0.0005
        let second = fill_buffer(&mut dst, &queue, FillMode::Capture(&geometry));
        assert!((second.timestamp - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn test_timestamp_taken_from_first_chunk() {
        let queue = ChunkQueue::new(0);
        queue.push(Chunk::new(vec![0u8; 8], 10.0));
        queue.push(Chunk::new(vec![0u8; 8], 20.0));

        let geometry = geometry();
        let mut dst = [0u8; 4];
        fill_buffer(&mut dst, &queue, FillMode::Capture(&geometry));

        // 跨越两个 chunk 时，时间戳对应第一个字节
        let mut wide = [0u8; 8];
        let result = fill_buffer(&mut wide, &queue, FillMode::Capture(&geometry));
        let expected = 10.0 + 4.0 / (4.0 * 48000.0);
        assert!((result.timestamp - expected).abs() < 1e-12);
    }

    #[test]
    fn test_render_has_no_timestamp() {
        let queue = ChunkQueue::new(0);
        queue.push(Chunk::new(vec![1u8; 4], 42.0));
        let mut dst = [0u8; 4];
        let result = fill_buffer(&mut dst, &queue, FillMode::Render);
        assert_eq!(result.timestamp, 0.0);
    }

    #[test]
    fn test_terminated_queue_zero_fills() {
        let queue = ChunkQueue::new(0);
        queue.push(Chunk::new(vec![7u8; 3], 0.0));
        queue.terminate();

        let mut dst = [0xFFu8; 8];
        let result = fill_buffer(&mut dst, &queue, FillMode::Render);
        assert_eq!(result.bytes_written, 3);
        assert!(result.finished);
        assert_eq!(dst, [7, 7, 7, 0, 0, 0, 0, 0]);

        let again = fill_buffer(&mut dst, &queue, FillMode::Render);
        assert_eq!(again.bytes_written, 0);
        assert!(again.finished);
        assert_eq!(dst, [0u8; 8]);
    }

    #[test]
    fn test_end_to_end_partial_then_terminate() {
        let queue = Arc::new(ChunkQueue::new(0));
        let chunk_a: Vec<u8> = (0u8..100).collect();
        queue.push(Chunk::new(chunk_a.clone(), 0.0));

        let geometry = geometry();
        let mut first = vec![0u8; 60];
        let result = fill_buffer(&mut first, &queue, FillMode::Capture(&geometry));
        assert_eq!(result.bytes_written, 60);
        assert_eq!(result.timestamp, 0.0);
        assert_eq!(first, chunk_a[..60]);

        // 第二次读取 40 字节后阻塞，直到终止
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let geometry = SampleGeometry::new(48000, 2, SampleFormat::Int16);
                let mut second = vec![0u8; 60];
                let result = fill_buffer(&mut second, &queue, FillMode::Capture(&geometry));
                (result, second)
            })
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!reader.is_finished());
        queue.terminate();

        let (result, second) = reader.join().unwrap();
        assert_eq!(result.bytes_written, 40);
        assert!(result.finished);
        assert_eq!(second[..40], chunk_a[60..]);
        assert!((result.timestamp - 60.0 / (4.0 * 48000.0)).abs() < 1e-12);
    }

    #[test]
    fn test_no_loss_no_duplication() {
        let mut rng = rand::thread_rng();
        let queue = Arc::new(ChunkQueue::new(4));

        let mut expected = Vec::new();
        let mut chunks = Vec::new();
        let mut next: u8 = 0;
        for _ in 0..200 {
            let len = rng.gen_range(0..97);
            let bytes: Vec<u8> = (0..len)
                .map(|_| {
                    next = next.wrapping_add(1);
                    next
                })
                .collect();
            expected.extend_from_slice(&bytes);
            chunks.push(bytes);
        }

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for bytes in chunks {
                    queue.push(Chunk::new(bytes, 0.0));
                }
                queue.terminate();
            })
        };

        let mut received = Vec::new();
        loop {
            let mut dst = vec![0u8; rng.gen_range(1..130)];
            let result = fill_buffer(&mut dst, &queue, FillMode::Render);
            received.extend_from_slice(&dst[..result.bytes_written]);
            if result.finished {
                break;
            }
        }

        producer.join().unwrap();
        assert_eq!(received, expected);
    }

    #[test]
    fn test_empty_destination_is_noop() {
        let queue = ChunkQueue::new(0);
        let mut dst: [u8; 0] = [];
        let result = fill_buffer(&mut dst, &queue, FillMode::Render);
        assert_eq!(result.bytes_written, 0);
        assert!(!result.finished);
    }
}
