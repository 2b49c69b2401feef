//! Pool of reusable pixel buffers.

use crate::PixelConfig;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

type BufferKey = (u32, u32, PixelConfig);

#[derive(Default)]
struct PoolState {
    buffers: HashMap<BufferKey, Vec<Vec<u8>>>,
    order: VecDeque<BufferKey>,
    size: usize,
    hits: u64,
    misses: u64,
}

/// Size-bounded pool of pixel buffers keyed by dimensions and layout.
///
/// When full, the least recently returned buffers are dropped. Cloning the
/// pool yields another handle to the same buffers.
#[derive(Clone)]
pub struct BitmapPool {
    max_size: usize,
    state: Arc<Mutex<PoolState>>,
}

impl BitmapPool {
    /// Create a pool holding at most `max_size` bytes of buffers.
    pub fn new(max_size: usize) -> Self {
        Self { max_size, state: Arc::new(Mutex::new(PoolState::default())) }
    }

    /// A zeroed buffer for a bitmap of the given shape.
    pub fn get(&self, width: u32, height: u32, config: PixelConfig) -> Vec<u8> {
        let mut buffer = self.get_dirty(width, height, config);
        buffer.fill(0);
        buffer
    }

    /// A buffer for a bitmap of the given shape whose contents are unspecified.
    pub fn get_dirty(&self, width: u32, height: u32, config: PixelConfig) -> Vec<u8> {
        let key = (width, height, config);
        let mut state = self.state.lock();
        let reused = state.buffers.get_mut(&key).and_then(Vec::pop);
        match reused {
            Some(buffer) => {
                state.size -= buffer.len();
                state.hits += 1;
                if let Some(pos) = state.order.iter().rposition(|k| *k == key) {
                    state.order.remove(pos);
                }
                buffer
            }
            None => {
                state.misses += 1;
                vec![0; config.byte_len(width, height)]
            }
        }
    }

    /// Return a buffer to the pool.
    pub fn put(&self, width: u32, height: u32, config: PixelConfig, buffer: Vec<u8>) {
        if buffer.len() != config.byte_len(width, height) || buffer.len() > self.max_size {
            return;
        }
        let key = (width, height, config);
        let mut state = self.state.lock();
        state.size += buffer.len();
        state.buffers.entry(key).or_default().push(buffer);
        state.order.push_back(key);
        while state.size > self.max_size {
            let Some(oldest) = state.order.pop_front() else {
                break;
            };
            if let Some(dropped) = state.buffers.get_mut(&oldest).and_then(|b| {
                if b.is_empty() {
                    None
                } else {
                    Some(b.remove(0))
                }
            }) {
                state.size -= dropped.len();
                trace!("Bitmap pool dropped a {}x{} buffer", oldest.0, oldest.1);
            }
        }
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.buffers.clear();
        state.order.clear();
        state.size = 0;
    }

    /// Bytes currently pooled.
    pub fn size(&self) -> usize {
        self.state.lock().size
    }

    /// `(hits, misses)` of buffer requests.
    pub fn hit_counts(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.hits, state.misses)
    }
}

impl std::fmt::Debug for BitmapPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitmapPool")
            .field("max_size", &self.max_size)
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_returned_buffer_is_reused() {
        let pool = BitmapPool::new(1024);
        let buffer = pool.get(4, 4, PixelConfig::Rgba8888);
        assert_eq!(buffer.len(), 64);
        pool.put(4, 4, PixelConfig::Rgba8888, vec![7; 64]);
        assert_eq!(pool.size(), 64);
        let reused = pool.get(4, 4, PixelConfig::Rgba8888);
        assert!(reused.iter().all(|b| *b == 0));
        assert_eq!(pool.hit_counts(), (1, 1));
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_oldest_buffers_dropped_when_full() {
        let pool = BitmapPool::new(100);
        pool.put(4, 4, PixelConfig::Rgba8888, vec![0; 64]);
        pool.put(5, 5, PixelConfig::Alpha8, vec![0; 25]);
        pool.put(6, 6, PixelConfig::Alpha8, vec![0; 36]);
        assert_eq!(pool.size(), 61);
        let _ = pool.get(4, 4, PixelConfig::Rgba8888);
        assert_eq!(pool.hit_counts(), (0, 1));
    }

    #[test]
    fn test_mismatched_buffer_rejected() {
        let pool = BitmapPool::new(1024);
        pool.put(4, 4, PixelConfig::Rgba8888, vec![0; 10]);
        assert_eq!(pool.size(), 0);
    }
}
