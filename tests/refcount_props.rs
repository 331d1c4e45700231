//! Property tests: random edit sequences keep block refcounts, capacities
//! and contents consistent with a plain byte model.

use proptest::prelude::*;
use segbuf::buffer::BufferHandle;
use segbuf::pool::{Pool, PoolConfig};

const BLOCKS: usize = 16;
const DESCRIPTORS: usize = 32;

#[derive(Debug, Clone)]
enum Op {
    Take(usize),
    Duplicate(usize),
    Cut(usize, usize),
    Truncate(usize, usize),
    Append(usize, usize, bool),
    Prepend(usize, usize),
    Part(usize, usize, usize),
    Drop(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..1600).prop_map(Op::Take),
        2 => any::<usize>().prop_map(Op::Duplicate),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(i, n)| Op::Cut(i, n)),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(i, n)| Op::Truncate(i, n)),
        2 => (any::<usize>(), any::<usize>(), any::<bool>()).prop_map(|(a, b, m)| Op::Append(a, b, m)),
        1 => (any::<usize>(), any::<usize>()).prop_map(|(a, b)| Op::Prepend(a, b)),
        2 => (any::<usize>(), any::<usize>(), any::<usize>()).prop_map(|(i, s, n)| Op::Part(i, s, n)),
        2 => any::<usize>().prop_map(Op::Drop),
    ]
}

fn pattern(size: usize, seed: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 + seed * 7) as u8).collect()
}

/// Apply one operation to the live buffers and their byte models.
fn apply(pool: &Pool, live: &mut Vec<(BufferHandle, Vec<u8>)>, op: &Op, step: usize) {
    match *op {
        Op::Take(size) => {
            if let Some(buffer) = pool.take(size, false) {
                let bytes = pattern(size, step);
                buffer.write_at(0, &bytes).unwrap();
                live.push((buffer, bytes));
            }
        }
        _ if live.is_empty() => {}
        Op::Duplicate(i) => {
            let (src, bytes) = &live[i % live.len()];
            let copy = src.duplicate().unwrap();
            let bytes = bytes.clone();
            live.push((copy, bytes));
        }
        Op::Cut(i, n) => {
            let idx = i % live.len();
            let (buffer, bytes) = &mut live[idx];
            let n = n % (bytes.len() + 1);
            buffer.cut_from_begin(n).unwrap();
            bytes.drain(..n);
        }
        Op::Truncate(i, n) => {
            let idx = i % live.len();
            let (buffer, bytes) = &mut live[idx];
            let n = n % (bytes.len() + 1);
            buffer.set_total_size(n).unwrap();
            bytes.truncate(n);
        }
        Op::Append(a, b, move_refs) => {
            let (a, b) = (a % live.len(), b % live.len());
            let appended = live[a].0.append(&live[b].0, move_refs).is_ok();
            if appended {
                let tail = live[b].1.clone();
                live[a].1.extend_from_slice(&tail);
                if move_refs && a != b {
                    live[b].1.clear();
                }
            }
        }
        Op::Prepend(a, b) => {
            let (a, b) = (a % live.len(), b % live.len());
            if live[a].0.prepend(&live[b].0, false).is_ok() {
                let mut bytes = live[b].1.clone();
                bytes.extend_from_slice(&live[a].1);
                live[a].1 = bytes;
            }
        }
        Op::Part(i, start, len) => {
            let (buffer, bytes) = &live[i % live.len()];
            let start = start % (bytes.len() + 1);
            let len = len % (bytes.len() - start + 1);
            let mut cursor = buffer.cursor_at(start).unwrap();
            let part = buffer.get_next_part(&mut cursor, len, true).unwrap();
            assert_eq!(cursor.position(), start + len);
            let expected = bytes[start..start + len].to_vec();
            live.push((part, expected));
        }
        Op::Drop(i) => {
            live.swap_remove(i % live.len());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Every edit sequence leaves the arenas consistent, and releasing
    /// everything returns every block and descriptor.
    #[test]
    fn random_edits_keep_refcounts_consistent(ops in prop::collection::vec(op(), 1..60)) {
        let pool = Pool::configured(
            PoolConfig::new(512, BLOCKS)
                .with_name("segbuf-props")
                .with_max_segments(6),
        )
        .unwrap();
        let mut live: Vec<(BufferHandle, Vec<u8>)> = Vec::new();

        for (step, op) in ops.iter().enumerate() {
            apply(&pool, &mut live, op, step);

            prop_assert!(pool.verify().is_ok(), "after {:?}: {:?}", op, pool.verify());
            for (buffer, bytes) in &live {
                prop_assert_eq!(buffer.total_size(), bytes.len());
                prop_assert_eq!(&buffer.to_vec(), bytes);
                prop_assert!(buffer.segment_count() <= buffer.capacity());
            }
        }

        drop(live);
        prop_assert_eq!(pool.free_blocks(), BLOCKS);
        prop_assert_eq!(pool.free_descriptors(), DESCRIPTORS);
        prop_assert_eq!(pool.used_ratio(), 0.0);
    }

    /// A block's refcount equals the number of live segments on it.
    #[test]
    fn refcount_matches_segment_references(
        size in 1usize..2048,
        copies in 0usize..5,
    ) {
        let pool = Pool::configured(PoolConfig::new(512, BLOCKS).with_name("segbuf-props")).unwrap();
        let buffer = pool.take(size, false).unwrap();
        let duplicates: Vec<_> = (0..copies).map(|_| buffer.duplicate().unwrap()).collect();

        for index in 0..buffer.segment_count() {
            let block = buffer.block_id(index).unwrap();
            prop_assert_eq!(pool.block_refcount(block), Some(1 + copies as u32));
        }
        drop(duplicates);
        for index in 0..buffer.segment_count() {
            let block = buffer.block_id(index).unwrap();
            prop_assert_eq!(pool.block_refcount(block), Some(1));
        }
    }
}
