//! Record decoders for the supported recording formats
//!
//! Each decoder turns one recording file into a lazy sequence of typed
//! records, consumed in a single pass by the import pipeline. Decoders are
//! per-file and single-threaded; concurrency happens at file granularity
//! above them.

pub mod fit;
pub mod json;
pub mod xml;

use std::path::Path;

use crate::Result;
use crate::error::ImportError;
use crate::types::DecodedRecord;

/// Trait for per-file record sources
///
/// Decoders abstract over the recording formats and handle their own
/// framing, decompression, and unit conversion internally. One decoder
/// instance reads exactly one file, front to back.
pub trait RecordDecoder: Send {
    /// Get the next decoded record
    ///
    /// Returns:
    /// - `Ok(Some(record))` - Next record decoded
    /// - `Ok(None)` - End of file (normal termination)
    /// - `Err(e)` - File is unusable from this point on
    fn next_record(&mut self) -> Result<Option<DecodedRecord>>;
}

/// Recording format, detected from the file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Framed binary message stream
    Fit,
    /// Device XML log, either dialect
    Xml,
    /// Gzip-compressed JSON-lines log
    JsonLog,
}

impl SourceFormat {
    /// Detect the recording format from a file name.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".fit") {
            Some(Self::Fit)
        } else if name.ends_with(".xml") || name.ends_with(".sml") {
            Some(Self::Xml)
        } else if name.ends_with(".gz") {
            Some(Self::JsonLog)
        } else {
            None
        }
    }
}

/// Open the decoder matching a recording's format.
pub fn open_decoder(path: &Path) -> Result<Box<dyn RecordDecoder>> {
    match SourceFormat::detect(path) {
        Some(SourceFormat::Fit) => Ok(Box::new(fit::FitDecoder::open(path)?)),
        Some(SourceFormat::Xml) => Ok(Box::new(xml::XmlDecoder::open(path)?)),
        Some(SourceFormat::JsonLog) => Ok(Box::new(json::JsonLogDecoder::open(path)?)),
        None => {
            Err(ImportError::unsupported(path.to_path_buf(), "unrecognized file extension"))
        }
    }
}
