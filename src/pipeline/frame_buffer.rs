//! Tear-free handoff of the latest depth frame between two threads

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::capture::{FrameFormat, FrameMetadata};
use crate::error::FrameError;

struct Latest {
    samples: Box<[f32]>,
    meta: FrameMetadata,
}

/// The authoritative `latest` frame, guarded by a single lock.
///
/// Writers and readers copy the whole frame while holding the lock, so a
/// reader only ever sees one complete frame.
pub struct FrameBuffer {
    format: FrameFormat,
    latest: Mutex<Latest>,
}

impl FrameBuffer {
    /// Allocate zero-filled storage for `format`
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            latest: Mutex::new(Latest {
                samples: vec![0.0; format.sample_count()].into_boxed_slice(),
                meta: FrameMetadata::EMPTY,
            }),
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    fn lock(&self) -> MutexGuard<'_, Latest> {
        // Poisoning cannot leave a partial frame: copies never panic midway.
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrite `latest` with `plane`, returning the new sequence number
    pub fn publish(&self, plane: &[f32]) -> Result<u64, FrameError> {
        let expected = self.format.sample_count();
        if plane.len() != expected {
            return Err(FrameError::SizeMismatch {
                expected,
                actual: plane.len(),
            });
        }
        let mut latest = self.lock();
        latest.samples.copy_from_slice(plane);
        let sequence = latest.meta.sequence + 1;
        latest.meta = FrameMetadata {
            sequence,
            captured_at: Some(Instant::now()),
        };
        Ok(sequence)
    }

    /// Copy `latest` into `dst` if it holds a newer frame.
    ///
    /// Returns true when `dst` changed. Before the first publish `dst` keeps
    /// its current contents.
    pub fn snapshot_into(&self, dst: &mut RenderFrame) -> bool {
        if dst.format != self.format {
            *dst = RenderFrame::new(self.format);
        }
        let latest = self.lock();
        if latest.meta.sequence == dst.meta.sequence {
            return false;
        }
        dst.samples.copy_from_slice(&latest.samples);
        dst.meta = latest.meta;
        true
    }

    /// Sequence number of the newest published frame, 0 if none
    pub fn sequence(&self) -> u64 {
        self.lock().meta.sequence
    }
}

/// Render-thread copy of a frame, safe to read without any lock
#[derive(Debug, Clone)]
pub struct RenderFrame {
    format: FrameFormat,
    samples: Box<[f32]>,
    meta: FrameMetadata,
}

impl RenderFrame {
    pub fn new(format: FrameFormat) -> Self {
        Self {
            format,
            samples: vec![0.0; format.sample_count()].into_boxed_slice(),
            meta: FrameMetadata::EMPTY,
        }
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn meta(&self) -> FrameMetadata {
        self.meta
    }

    pub fn sequence(&self) -> u64 {
        self.meta.sequence
    }

    /// Serialize the samples as little-endian bytes into `out`, reusing its allocation
    pub fn write_le_bytes(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(self.format.byte_size());
        for sample in self.samples.iter() {
            out.extend_from_slice(&sample.to_le_bytes());
        }
    }
}
