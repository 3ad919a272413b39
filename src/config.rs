use crate::error::{Error, Result};
use crate::frame::{FRAME_ALIGNMENT, HEADER_LENGTH};
use crate::log_buffer::{LOG_META_DATA_LENGTH, PARTITION_COUNT};
use crate::position::check_term_length;

/// Smallest page size a log may be laid out with.
pub const PAGE_MIN_SIZE: i32 = 4 * 1024;

/// Largest page size a log may be laid out with.
pub const PAGE_MAX_SIZE: i32 = 1024 * 1024 * 1024;

/// Largest MTU a frame may be sized to (max UDP payload, aligned down).
pub const MAX_MTU_LENGTH: i32 = 65504;

/// Layout parameters of a log buffer.
///
/// The driver picks these when it creates a log; a publication only ever
/// reads them back out of the metadata partition. They live here so that an
/// in-process driver (or a test) can build a log with the same validation the
/// driver applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogBufferConfig {
    /// Length of each of the three term partitions. Power of two.
    pub term_length: i32,
    /// Maximum frame length including header. Multiple of the frame alignment.
    pub mtu_length: i32,
    pub page_size: i32,
    pub initial_term_id: i32,
    pub session_id: i32,
    pub stream_id: i32,
    pub correlation_id: i64,
}

/// Small terms and a single-packet MTU.
pub const LOW_LATENCY_CONFIG: LogBufferConfig = LogBufferConfig {
    term_length: 64 * 1024,
    mtu_length: 1408,
    page_size: PAGE_MIN_SIZE,
    initial_term_id: 0,
    session_id: 0,
    stream_id: 0,
    correlation_id: 0,
};

/// Large terms and jumbo frames.
pub const HIGH_THROUGHPUT_CONFIG: LogBufferConfig = LogBufferConfig {
    term_length: 64 * 1024 * 1024,
    mtu_length: 8192,
    page_size: PAGE_MIN_SIZE,
    initial_term_id: 0,
    session_id: 0,
    stream_id: 0,
    correlation_id: 0,
};

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            term_length: 16 * 1024 * 1024,
            ..LOW_LATENCY_CONFIG
        }
    }
}

impl LogBufferConfig {
    pub fn with_term_length(mut self, term_length: i32) -> Self {
        self.term_length = term_length;
        self
    }

    pub fn with_mtu_length(mut self, mtu_length: i32) -> Self {
        self.mtu_length = mtu_length;
        self
    }

    pub fn with_initial_term_id(mut self, initial_term_id: i32) -> Self {
        self.initial_term_id = initial_term_id;
        self
    }

    pub fn with_session_id(mut self, session_id: i32) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_stream_id(mut self, stream_id: i32) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: i64) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Checks every field against the limits the log layout depends on.
    pub fn validate(&self) -> Result<()> {
        check_term_length(self.term_length as i64)?;
        check_page_size(self.page_size)?;
        check_mtu_length(self.mtu_length, self.term_length)
    }

    /// Total bytes of the log: three terms followed by the metadata partition.
    pub fn log_length(&self) -> usize {
        PARTITION_COUNT * self.term_length as usize + LOG_META_DATA_LENGTH
    }
}

pub fn check_page_size(page_size: i32) -> Result<()> {
    if page_size < PAGE_MIN_SIZE {
        return Err(Error::InvalidPageSize {
            page_size,
            reason: "less than 4 KiB",
        });
    }
    if !(page_size as u32).is_power_of_two() {
        return Err(Error::InvalidPageSize {
            page_size,
            reason: "not a power of two",
        });
    }
    Ok(())
}

pub fn check_mtu_length(mtu_length: i32, term_length: i32) -> Result<()> {
    if mtu_length < HEADER_LENGTH + FRAME_ALIGNMENT {
        return Err(Error::InvalidMtuLength {
            mtu_length,
            reason: "cannot carry a payload",
        });
    }
    if mtu_length % FRAME_ALIGNMENT != 0 {
        return Err(Error::InvalidMtuLength {
            mtu_length,
            reason: "not a multiple of the frame alignment",
        });
    }
    if mtu_length > MAX_MTU_LENGTH || mtu_length > term_length {
        return Err(Error::InvalidMtuLength {
            mtu_length,
            reason: "larger than the max UDP payload or the term",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        LOW_LATENCY_CONFIG.validate().unwrap();
        HIGH_THROUGHPUT_CONFIG.validate().unwrap();
        LogBufferConfig::default().validate().unwrap();
    }

    #[test]
    fn log_length_is_three_terms_plus_metadata() {
        assert_eq!(
            LOW_LATENCY_CONFIG.log_length(),
            3 * 64 * 1024 + LOG_META_DATA_LENGTH
        );
    }

    #[test]
    fn builder_overrides_single_fields() {
        let config = LOW_LATENCY_CONFIG
            .with_session_id(7)
            .with_stream_id(1001)
            .with_initial_term_id(-3);
        assert_eq!(config.session_id, 7);
        assert_eq!(config.stream_id, 1001);
        assert_eq!(config.initial_term_id, -3);
        assert_eq!(config.term_length, LOW_LATENCY_CONFIG.term_length);
    }

    #[test]
    fn rejects_bad_term_length() {
        let config = LOW_LATENCY_CONFIG.with_term_length(100_000);
        assert!(matches!(config.validate(), Err(Error::InvalidTermLength { .. })));
    }

    #[test]
    fn rejects_bad_mtu() {
        for mtu in [32, 1400, 65536] {
            let config = LOW_LATENCY_CONFIG.with_mtu_length(mtu);
            assert!(
                matches!(config.validate(), Err(Error::InvalidMtuLength { .. })),
                "mtu {} should be rejected",
                mtu
            );
        }
    }

    #[test]
    fn rejects_bad_page_size() {
        assert!(check_page_size(1024).is_err());
        assert!(check_page_size(6 * 1024).is_err());
        assert!(check_page_size(8 * 1024).is_ok());
    }
}
