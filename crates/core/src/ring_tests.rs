// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn empty_buffer() {
    let ring = RingBuffer::new(8);
    assert!(ring.is_empty());
    assert_eq!(ring.read_from(0), Some(vec![]));
    assert_eq!(ring.tail(4), Vec::<u8>::new());
}

#[test]
fn sequential_writes_accumulate() {
    let mut ring = RingBuffer::new(16);
    ring.write(b"hello");
    ring.write(b" world");
    assert_eq!(ring.total_written(), 11);
    assert_eq!(ring.len(), 11);
    assert_eq!(ring.read_from(0), Some(b"hello world".to_vec()));
    assert_eq!(ring.read_from(5), Some(b" world".to_vec()));
}

#[test]
fn overflow_discards_oldest() {
    let mut ring = RingBuffer::new(8);
    ring.write(b"abcdef");
    ring.write(b"ghij");
    // total=10, capacity=8: offsets 0 and 1 are gone.
    assert_eq!(ring.oldest_offset(), 2);
    assert_eq!(ring.read_from(0), None);
    assert_eq!(ring.read_from(2), Some(b"cdefghij".to_vec()));
    assert_eq!(ring.read_from(6), Some(b"ghij".to_vec()));
}

#[test]
fn oversized_chunk_keeps_final_bytes() {
    let mut ring = RingBuffer::new(4);
    ring.write(b"abcdefgh");
    assert_eq!(ring.total_written(), 8);
    assert_eq!(ring.read_from(4), Some(b"efgh".to_vec()));
    assert_eq!(ring.read_from(3), None);
}

#[test]
fn offset_beyond_write_position() {
    let mut ring = RingBuffer::new(16);
    ring.write(b"abc");
    assert_eq!(ring.read_from(4), None);
    assert_eq!(ring.read_from(3), Some(vec![]));
}

#[test]
fn tail_returns_newest_bytes() {
    let mut ring = RingBuffer::new(8);
    ring.write(b"0123456789");
    assert_eq!(ring.tail(4), b"6789".to_vec());
    assert_eq!(ring.tail(100), b"23456789".to_vec());
}

#[test]
fn zero_capacity_is_inert() {
    let mut ring = RingBuffer::new(0);
    ring.write(b"data");
    assert!(ring.is_empty());
    assert_eq!(ring.tail(8), Vec::<u8>::new());
}
