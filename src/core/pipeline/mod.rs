//! File pipeline: the fragment reader on the sending side and the fragment
//! assembler on the receiving side.

pub mod assembly;
pub mod streamer;

pub use assembly::{FileAssembler, ReceivedFile};
pub use streamer::{FileSource, FileStreamer, OutgoingFile};

/// `offset / total * 100`, rounded to two decimals. An empty file is 100%.
pub fn progress_percent(offset: u32, total: u32) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (offset as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_rounding() {
        assert_eq!(progress_percent(1, 3), 33.33);
        assert_eq!(progress_percent(2, 3), 66.67);
        assert_eq!(progress_percent(3, 3), 100.0);
        assert_eq!(progress_percent(0, 0), 100.0);
        assert_eq!(progress_percent(1, 8), 12.5);
    }
}
