//! Test utilities shared across the crate.
//!
//! Builders for synthetic recording files and a self-cleaning scratch
//! directory, used by unit tests and the benchmark harness.

#![cfg(any(test, feature = "benchmark"))]

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use flate2::Compression;
use flate2::write::GzEncoder;

use crate::decode::fit::format::{crc16, file_id_field, global, record_field};

const PROFILE_VERSION: u16 = 2140;

/// Builds binary activity files record by record.
///
/// Produces the 14 byte header, the definition and data records appended
/// through the builder methods, and both checksums.
#[derive(Default)]
pub struct FitFileBuilder {
    records: Vec<u8>,
}

impl FitFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a little-endian definition record for `local_id` with the
    /// given `(field_id, size, base_type)` triples.
    pub fn define(mut self, local_id: u8, global_id: u16, fields: &[(u8, u8, u8)]) -> Self {
        self.records.push(0x40 | (local_id & 0x0F));
        self.records.push(0); // reserved
        self.records.push(0); // little-endian
        self.records.extend_from_slice(&global_id.to_le_bytes());
        self.records.push(fields.len() as u8);
        for &(field_id, size, base_type) in fields {
            self.records.push(field_id);
            self.records.push(size);
            self.records.push(base_type);
        }
        self
    }

    /// Append a data record for a previously defined `local_id`.
    pub fn data(mut self, local_id: u8, payload: &[u8]) -> Self {
        self.records.push(local_id & 0x0F);
        self.records.extend_from_slice(payload);
        self
    }

    /// Append a compressed-timestamp data record.
    pub fn compressed(mut self, local_id: u8, time_offset: u8, payload: &[u8]) -> Self {
        self.records.push(0x80 | ((local_id & 0x03) << 5) | (time_offset & 0x1F));
        self.records.extend_from_slice(payload);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut bytes = vec![14u8, 0x20];
        bytes.extend_from_slice(&PROFILE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.records.len() as u32).to_le_bytes());
        bytes.extend_from_slice(b".FIT");
        let header_crc = crc16(&bytes[..12]);
        bytes.extend_from_slice(&header_crc.to_le_bytes());
        bytes.extend_from_slice(&self.records);
        let file_crc = crc16(&bytes);
        bytes.extend_from_slice(&file_crc.to_le_bytes());
        bytes
    }
}

/// Gzip a text document the way log archives ship it.
pub fn gzip_text(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(text.as_bytes()).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

/// A uniquely named directory under the system temp dir, removed on drop.
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(label: &str) -> Self {
        static SEQUENCE: AtomicUsize = AtomicUsize::new(0);
        let unique = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir()
            .join(format!("tracklog-{label}-{}-{unique}", std::process::id()));
        std::fs::create_dir_all(&root).expect("create scratch directory");
        Self { root }
    }

    /// Path for a file inside the scratch directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// A synthetic one-hertz ride with position, distance, speed, heart rate,
/// cadence, altitude and power, sized for throughput measurements.
pub fn synthetic_ride_fit(seconds: u32) -> Vec<u8> {
    const UINT8: u8 = 0x02;
    const SINT32: u8 = 0x85;
    const UINT16: u8 = 0x84;
    const UINT32: u8 = 0x86;
    const UINT32Z: u8 = 0x8C;
    const ENUM: u8 = 0x00;

    let mut builder = FitFileBuilder::new()
        .define(
            0,
            global::FILE_ID,
            &[
                (file_id_field::FILE_TYPE, 1, ENUM),
                (file_id_field::MANUFACTURER, 2, UINT16),
                (file_id_field::SERIAL_NUMBER, 4, UINT32Z),
            ],
        )
        .data(0, &[4, 1, 0, 0x4E, 0x61, 0xBC, 0x00])
        .define(
            1,
            global::RECORD,
            &[
                (record_field::TIMESTAMP, 4, UINT32),
                (record_field::LATITUDE, 4, SINT32),
                (record_field::LONGITUDE, 4, SINT32),
                (record_field::DISTANCE, 4, UINT32),
                (record_field::SPEED, 2, UINT16),
                (record_field::HEART_RATE, 1, UINT8),
                (record_field::CADENCE, 1, UINT8),
                (record_field::ALTITUDE, 2, UINT16),
                (record_field::POWER, 2, UINT16),
            ],
        );

    let base_latitude: i32 = 573_855_000; // ~48.1 degrees north
    let base_longitude: i32 = 137_375_000; // ~11.5 degrees east
    for second in 0..seconds {
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&(10_000 + second).to_le_bytes());
        payload.extend_from_slice(&(base_latitude + second as i32 * 40).to_le_bytes());
        payload.extend_from_slice(&(base_longitude + second as i32 * 25).to_le_bytes());
        payload.extend_from_slice(&(second * 850).to_le_bytes()); // cm
        payload.extend_from_slice(&8_500u16.to_le_bytes()); // mm/s
        payload.push(110 + (second % 40) as u8);
        payload.push(85 + (second % 10) as u8);
        payload.extend_from_slice(&(3_000 + (second % 200) as u16 * 5).to_le_bytes());
        payload.extend_from_slice(&(180 + (second % 120) as u16).to_le_bytes());
        builder = builder.data(1, &payload);
    }
    builder.build()
}
