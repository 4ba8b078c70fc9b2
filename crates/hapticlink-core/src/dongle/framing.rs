//! Status frame reassembly
//!
//! Status frames arrive interleaved with telemetry and may be split across
//! any number of reads. [`FrameAssembler`] accumulates bytes and yields the
//! payload of every complete frame, left to right.
//!
//! Buffer policy:
//! - bytes before the first start marker are discarded, keeping only a tail
//!   that could be the beginning of a marker
//! - a start marker seen before the expected end marker restarts the frame
//! - the buffer therefore always begins at the last open start marker; a
//!   partial frame longer than the ceiling is cut to a marker-length tail

use crate::config::FrameMarkers;

/// Position of `needle` in `hay` at or after `from`
pub(crate) fn find(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= hay.len() {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Incremental status frame reassembler
#[derive(Debug)]
pub struct FrameAssembler {
    markers: FrameMarkers,
    ceiling: usize,
    buf: Vec<u8>,
}

impl FrameAssembler {
    /// Empty assembler; the buffer is trimmed once it exceeds `ceiling` bytes
    pub fn new(markers: FrameMarkers, ceiling: usize) -> Self {
        Self {
            markers,
            ceiling,
            buf: Vec::new(),
        }
    }

    /// Append a chunk and return the payloads of all frames it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        let start = self.markers.start.as_slice();
        let end = self.markers.end.as_slice();
        let mut frames = Vec::new();
        let mut cursor = 0;

        loop {
            let Some(frame_start) = find(&self.buf, start, cursor) else {
                // Keep only what could be the beginning of a start marker
                let keep = start.len().saturating_sub(1);
                cursor = cursor.max(self.buf.len().saturating_sub(keep));
                break;
            };
            cursor = frame_start;

            let body = frame_start + start.len();
            let frame_end = find(&self.buf, end, body);
            if let Some(restart) = find(&self.buf, start, body) {
                if frame_end.map_or(true, |e| restart <= e) {
                    tracing::debug!(
                        dropped = restart - frame_start,
                        "Status frame truncated by a new start marker"
                    );
                    cursor = restart;
                    continue;
                }
            }

            match frame_end {
                Some(e) => {
                    frames.push(self.buf[body..e].to_vec());
                    cursor = e + end.len();
                }
                None => break,
            }
        }

        self.buf.drain(..cursor.min(self.buf.len()));
        self.enforce_ceiling();
        frames
    }

    fn enforce_ceiling(&mut self) {
        if self.buf.len() <= self.ceiling {
            return;
        }

        let cut = self.buf.len() - self.markers.start.len().min(self.buf.len());
        self.buf.drain(..cut);
        tracing::warn!(
            ceiling = self.ceiling,
            dropped = cut,
            kept = self.buf.len(),
            "Status frame buffer over ceiling, trimmed"
        );
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Discard all buffered bytes
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
