//! Property-based tests for the coalescing buffer
//!
//! Emitted chunks must reproduce the pushed byte stream exactly and never
//! exceed the configured chunk size, whatever the push sizes and timing.

use std::time::Duration;

use procmux_process::{BufferConfig, CoalescingBuffer};
use proptest::prelude::*;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

/// Push `pushes` with the given pre-push delays, then collect every chunk
fn run(max_chunk_size: usize, pushes: Vec<(u64, Vec<u8>)>) -> (Vec<Vec<u8>>, Vec<u8>) {
    paused_runtime().block_on(async move {
        let buffer = CoalescingBuffer::new(BufferConfig::new(
            max_chunk_size,
            Duration::from_millis(16),
        ));
        let mut rx = buffer.subscribe();

        let mut pushed = Vec::new();
        for (delay_ms, chunk) in pushes {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            pushed.extend_from_slice(&chunk);
            buffer.push(&chunk);
        }

        buffer.idle().await;
        drop(buffer);

        let mut chunks = Vec::new();
        while let Some(chunk) = rx.recv().await {
            chunks.push(chunk);
        }
        (chunks, pushed)
    })
}

fn pushes_strategy() -> impl Strategy<Value = Vec<(u64, Vec<u8>)>> {
    prop::collection::vec(
        (0u64..40, prop::collection::vec(any::<u8>(), 0..64)),
        0..24,
    )
}

#[test]
fn prop_emitted_concatenation_equals_pushed() {
    proptest!(ProptestConfig::with_cases(100), |(
        max_chunk_size in 1usize..32,
        pushes in pushes_strategy(),
    )| {
        let (chunks, pushed) = run(max_chunk_size, pushes);
        let emitted: Vec<u8> = chunks.concat();
        prop_assert_eq!(emitted, pushed);
    });
}

#[test]
fn prop_no_chunk_exceeds_max_size() {
    proptest!(ProptestConfig::with_cases(100), |(
        max_chunk_size in 1usize..32,
        pushes in pushes_strategy(),
    )| {
        let (chunks, _) = run(max_chunk_size, pushes);
        for chunk in &chunks {
            prop_assert!(!chunk.is_empty());
            prop_assert!(chunk.len() <= max_chunk_size);
        }
    });
}

#[test]
fn prop_single_push_splits_into_ceil_chunks() {
    proptest!(ProptestConfig::with_cases(50), |(
        max_chunk_size in 1usize..16,
        len in 1usize..200,
    )| {
        let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
        let (chunks, _) = run(max_chunk_size, vec![(0, data)]);

        let expected = (len + max_chunk_size - 1) / max_chunk_size;
        prop_assert_eq!(chunks.len(), expected);
        for chunk in &chunks[..chunks.len() - 1] {
            prop_assert_eq!(chunk.len(), max_chunk_size);
        }
    });
}

#[test]
fn twenty_bytes_with_max_eight_emit_three_spaced_chunks() {
    paused_runtime().block_on(async {
        let interval = Duration::from_millis(16);
        let buffer = CoalescingBuffer::new(BufferConfig::new(8, interval));
        let mut rx = buffer.subscribe();

        let start = tokio::time::Instant::now();
        buffer.push(vec![b'x'; 20]);

        let mut last = start;
        let mut sizes = Vec::new();
        for _ in 0..3 {
            let chunk = rx.recv().await.unwrap();
            let now = tokio::time::Instant::now();
            assert!(now - last >= interval);
            last = now;
            sizes.push(chunk.len());
        }

        assert_eq!(sizes, vec![8, 8, 4]);
        buffer.idle().await;
        assert!(rx.try_recv().is_err());
    });
}
