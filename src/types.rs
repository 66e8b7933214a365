use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::source::{DeprecationSignal, FetchedWork};

/// Bytes of a finished block header.
pub const HEADER_LEN: usize = 80;
/// Header plus the 8 target bytes the kernel compares against.
pub const WORK_HEADER_LEN: usize = 88;
/// First byte of the 4 byte nonce field.
pub const NONCE_POS: usize = 76;
/// First byte of the spliced target.
pub const TARGET_POS: usize = 80;
/// Device output: 4 byte found flag, then the 4 byte nonce.
pub const OUTPUT_LEN: usize = 8;

pub type WorkHeader = [u8; WORK_HEADER_LEN];

/// One unit of upstream work. Immutable once built.
#[derive(Debug)]
pub struct WorkTemplate<J> {
    pub id: u64,
    header: Arc<WorkHeader>,
    target: Arc<[u8]>,
    job: Arc<J>,
    deprecation: DeprecationSignal,
}

impl<J> WorkTemplate<J> {
    /// Copies the header and writes the first 8 target bytes, reversed, into
    /// bytes 80..88.
    pub fn new(id: u64, work: FetchedWork<J>) -> Result<Self, SourceError> {
        if work.header.len() < HEADER_LEN {
            return Err(SourceError::Malformed(format!(
                "header is {} bytes, need at least {}",
                work.header.len(),
                HEADER_LEN
            )));
        }
        if work.target.len() < 8 {
            return Err(SourceError::Malformed(format!(
                "target is {} bytes, need at least 8",
                work.target.len()
            )));
        }

        let mut header = [0u8; WORK_HEADER_LEN];
        header[..HEADER_LEN].copy_from_slice(&work.header[..HEADER_LEN]);
        for i in 0..8 {
            header[TARGET_POS + i] = work.target[7 - i];
        }

        Ok(Self {
            id,
            header: Arc::new(header),
            target: work.target.into(),
            job: Arc::new(work.job),
            deprecation: work.deprecation,
        })
    }

    pub fn header(&self) -> &WorkHeader {
        &self.header
    }

    pub fn is_deprecated(&self) -> bool {
        self.deprecation.is_fired()
    }

    pub fn item(&self, offset: u32) -> WorkItem<J> {
        WorkItem {
            template_id: self.id,
            header: self.header.clone(),
            target: self.target.clone(),
            offset,
            job: self.job.clone(),
            deprecation: self.deprecation.clone(),
        }
    }
}

/// A template restricted to one device-sized nonce range.
#[derive(Debug)]
pub struct WorkItem<J> {
    pub template_id: u64,
    pub header: Arc<WorkHeader>,
    pub target: Arc<[u8]>,
    pub offset: u32,
    pub job: Arc<J>,
    deprecation: DeprecationSignal,
}

impl<J> WorkItem<J> {
    pub fn is_stale(&self) -> bool {
        self.deprecation.is_fired()
    }
}

#[derive(Debug)]
pub struct Solution<J> {
    pub device_id: usize,
    pub template_id: u64,
    pub header: [u8; HEADER_LEN],
    pub target: Arc<[u8]>,
    pub job: Arc<J>,
}

impl<J> Solution<J> {
    /// Copies the first 80 header bytes of `item` and writes `nonce` into
    /// bytes 76..80.
    pub fn new(device_id: usize, item: &WorkItem<J>, nonce: [u8; 4]) -> Self {
        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&item.header[..HEADER_LEN]);
        header[NONCE_POS..NONCE_POS + 4].copy_from_slice(&nonce);
        Self {
            device_id,
            template_id: item.template_id,
            header,
            target: item.target.clone(),
            job: item.job.clone(),
        }
    }

    pub fn nonce(&self) -> u32 {
        u32::from_le_bytes([
            self.header[NONCE_POS],
            self.header[NONCE_POS + 1],
            self.header[NONCE_POS + 2],
            self.header[NONCE_POS + 3],
        ])
    }
}

/// Throughput of one completed work item, in MH/s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HashRateReport {
    pub device_id: usize,
    pub hash_rate: f64,
}

impl HashRateReport {
    pub fn measure(device_id: usize, item_size: u64, elapsed: Duration) -> Self {
        let seconds = elapsed.as_secs_f64().max(1e-9);
        Self {
            device_id,
            hash_rate: item_size as f64 / (seconds * 1_000_000.0),
        }
    }
}

/// Interprets the device output buffer. A non-zero flag word means the last
/// 4 bytes hold a nonce, so nonce 0 is a valid result.
pub fn found_nonce(output: &[u8; OUTPUT_LEN]) -> Option<[u8; 4]> {
    if output[..4].iter().all(|b| *b == 0) {
        return None;
    }
    Some([output[4], output[5], output[6], output[7]])
}
