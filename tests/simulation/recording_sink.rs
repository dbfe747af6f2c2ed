//! Downstream sink that records what the filter forwards

#![allow(dead_code)]

use netsim::{Buffer, BufferSink, FlowResult};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// A forwarded buffer and when it arrived downstream
#[derive(Debug, Clone)]
pub struct Delivery {
    pub seq: u32,
    pub at: Instant,
    pub pts: Option<Duration>,
    pub thread: Option<String>,
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.deliveries.lock().len()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    pub fn sequence(&self) -> Vec<u32> {
        self.deliveries.lock().iter().map(|d| d.seq).collect()
    }

    /// Number of adjacent pairs delivered out of arrival order
    pub fn inversions(&self) -> usize {
        self.sequence().windows(2).filter(|w| w[0] > w[1]).count()
    }
}

impl BufferSink for RecordingSink {
    fn push(&self, buffer: Buffer) -> FlowResult {
        self.deliveries.lock().push(Delivery {
            seq: sequence_of(&buffer),
            at: Instant::now(),
            pts: buffer.pts(),
            thread: std::thread::current().name().map(str::to_string),
        });
        Ok(())
    }
}

/// Buffer of `len` bytes (at least 4) carrying `seq` in its first bytes
pub fn tagged_buffer(seq: u32, len: usize) -> Buffer {
    let mut payload = vec![0u8; len.max(4)];
    payload[..4].copy_from_slice(&seq.to_be_bytes());
    Buffer::new(payload)
}

pub fn sequence_of(buffer: &Buffer) -> u32 {
    let mut tag = [0u8; 4];
    tag.copy_from_slice(&buffer.data()[..4]);
    u32::from_be_bytes(tag)
}
