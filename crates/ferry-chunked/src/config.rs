/// Default flush threshold: 10 MiB.
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 10 * 1024 * 1024;

/// Thresholds below this are replaced by [`DEFAULT_MAX_CHUNK_SIZE`].
pub const MIN_MAX_CHUNK_SIZE: usize = 1024;

/// Codec tuning shared by every chunked backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkConfig {
    max_chunk_size: usize,
}

impl ChunkConfig {
    /// Build a config; a threshold under 1 KiB (including 0) falls back to the default.
    pub fn new(max_chunk_size: usize) -> Self {
        let max_chunk_size = if max_chunk_size < MIN_MAX_CHUNK_SIZE {
            DEFAULT_MAX_CHUNK_SIZE
        } else {
            max_chunk_size
        };
        Self { max_chunk_size }
    }

    /// Buffered bytes beyond this size are flushed as one chunk row.
    pub fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_substitutes_default() {
        assert_eq!(ChunkConfig::new(0).max_chunk_size(), DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(ChunkConfig::new(1023).max_chunk_size(), DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(ChunkConfig::new(1024).max_chunk_size(), 1024);
        assert_eq!(ChunkConfig::default().max_chunk_size(), 10 * 1024 * 1024);
    }
}
