//! Binary activity file format structures and parsing
//!
//! Defines the framing of the binary recording format and provides parsing
//! functions for headers, field definitions and base-type values.
//!
//! ## File Structure
//!
//! A binary recording contains:
//!
//! 1. **File Header** (12 or 14 bytes) - sizes, protocol version and a
//!    `.FIT` magic tag; the 14-byte form appends a header CRC
//! 2. **Record Stream** - interleaved definition records (describing the
//!    field layout of one local message number) and data records (payloads
//!    decoded against the active definition)
//! 3. **File CRC** (2 bytes) - CRC-16 over everything before it
//!
//! ## Value Semantics
//!
//! Every base type reserves one bit pattern as "invalid" (0xFF bytes for
//! unsigned types, maximum positive for signed, zero for the z-variants).
//! Decoding such a pattern yields `None`, which downstream becomes the
//! field's absent state. Timestamps count seconds from the device epoch and
//! convert to standard epoch milliseconds with a fixed offset.

use std::io::Read;

use tracing::trace;

use crate::error::{ImportError, Result};

// Size constants for the binary framing
const HEADER_SIZE_LEGACY: usize = 12;
const HEADER_SIZE_WITH_CRC: usize = 14;
const HEADER_MAGIC: &[u8; 4] = b".FIT";
const FILE_CRC_SIZE: usize = 2;

/// Milliseconds between the standard epoch and the device epoch
/// (1989-12-31T00:00:00Z).
pub const DEVICE_EPOCH_OFFSET_MS: i64 = 631_065_600_000;

/// Degrees per semicircle: the format stores angles as signed 32-bit
/// fractions of a half turn.
const DEGREES_PER_SEMICIRCLE: f64 = 180.0 / 2_147_483_648.0;

/// Global message numbers this importer understands. Anything else is
/// skipped as forward-compatibility noise.
pub mod global {
    pub const FILE_ID: u16 = 0;
    pub const SESSION: u16 = 18;
    pub const LAP: u16 = 19;
    pub const RECORD: u16 = 20;
    pub const EVENT: u16 = 21;
    pub const DEVICE_INFO: u16 = 23;
}

/// Field numbers within the `file_id` message.
pub mod file_id_field {
    pub const FILE_TYPE: u8 = 0;
    pub const MANUFACTURER: u8 = 1;
    pub const PRODUCT: u8 = 2;
    pub const SERIAL_NUMBER: u8 = 3;

    /// `file_id.type` value marking an activity recording.
    pub const TYPE_ACTIVITY: u64 = 4;
}

/// Field numbers within the `record` message.
pub mod record_field {
    pub const LATITUDE: u8 = 0;
    pub const LONGITUDE: u8 = 1;
    pub const ALTITUDE: u8 = 2;
    pub const HEART_RATE: u8 = 3;
    pub const CADENCE: u8 = 4;
    pub const DISTANCE: u8 = 5;
    pub const SPEED: u8 = 6;
    pub const POWER: u8 = 7;
    pub const TEMPERATURE: u8 = 13;
    pub const VERTICAL_OSCILLATION: u8 = 39;
    pub const STANCE_TIME: u8 = 41;
    pub const FRACTIONAL_CADENCE: u8 = 53;
    pub const ENHANCED_SPEED: u8 = 73;
    pub const ENHANCED_ALTITUDE: u8 = 78;
    pub const TIMESTAMP: u8 = 253;
}

/// Field numbers within the `event` message.
pub mod event_field {
    pub const EVENT: u8 = 0;
    pub const EVENT_TYPE: u8 = 1;
    pub const DATA: u8 = 3;
    pub const TIMESTAMP: u8 = 253;

    /// `event.event` values.
    pub const EVENT_TIMER: u64 = 0;
    pub const EVENT_FRONT_GEAR_CHANGE: u64 = 42;
    pub const EVENT_REAR_GEAR_CHANGE: u64 = 43;

    /// `event.event_type` values.
    pub const TYPE_START: u64 = 0;
    pub const TYPE_STOP: u64 = 1;
    pub const TYPE_STOP_ALL: u64 = 4;

    /// `event.data` values for timer events: what triggered the transition.
    pub const TIMER_TRIGGER_MANUAL: u64 = 0;
    pub const TIMER_TRIGGER_AUTO: u64 = 1;
}

/// Field numbers within the `session` message.
pub mod session_field {
    pub const START_TIME: u8 = 2;
    pub const TOTAL_ELAPSED_TIME: u8 = 7;
    pub const TOTAL_TIMER_TIME: u8 = 8;
    pub const TOTAL_CALORIES: u8 = 11;
    pub const AVG_POWER: u8 = 20;
    pub const TOTAL_TRAINING_EFFECT: u8 = 24;
}

/// Field numbers within the `lap` message.
pub mod lap_field {
    pub const MESSAGE_INDEX: u8 = 254;
    pub const TIMESTAMP: u8 = 253;
}

/// Field numbers within the `device_info` message.
pub mod device_info_field {
    pub const MANUFACTURER: u8 = 2;
    pub const SERIAL_NUMBER: u8 = 3;
    pub const PRODUCT: u8 = 4;
    pub const SOFTWARE_VERSION: u8 = 5;
    pub const PRODUCT_NAME: u8 = 27;
}

/// File header of a binary recording.
#[derive(Debug, Clone)]
pub struct FitHeader {
    pub header_size: u8,
    pub protocol_version: u8,
    pub profile_version: u16,
    /// Byte length of the record stream between header and trailing CRC.
    pub data_size: u32,
    /// CRC over the first 12 header bytes. Zero means the writer skipped it.
    pub header_crc: Option<u16>,
}

impl FitHeader {
    pub fn parse_from_reader<R: Read>(reader: &mut R) -> Result<Self> {
        trace!("Reading recording header");
        let mut fixed = [0u8; HEADER_SIZE_LEGACY];
        reader.read_exact(&mut fixed).map_err(|e| {
            ImportError::format_error(
                "file header",
                format!("failed to read {HEADER_SIZE_LEGACY} header bytes: {e}"),
            )
        })?;

        // Header layout (little-endian):
        //   byte  0     header_size (12 or 14)
        //   byte  1     protocol_version
        //   bytes 2-3   profile_version
        //   bytes 4-7   data_size
        //   bytes 8-11  ".FIT" magic
        //   bytes 12-13 header CRC (only when header_size is 14)
        let header_size = fixed[0];
        let protocol_version = fixed[1];
        let profile_version = parse_u16_le(&fixed, 2)?;
        let data_size = parse_u32_le(&fixed, 4)?;

        if &fixed[8..12] != HEADER_MAGIC {
            return Err(ImportError::format_error(
                "file header",
                format!("magic tag mismatch: {:02x?}", &fixed[8..12]),
            ));
        }

        let header_crc = match usize::from(header_size) {
            HEADER_SIZE_LEGACY => None,
            HEADER_SIZE_WITH_CRC => {
                let mut crc_bytes = [0u8; 2];
                reader.read_exact(&mut crc_bytes).map_err(|e| {
                    ImportError::format_error(
                        "file header",
                        format!("failed to read header crc: {e}"),
                    )
                })?;
                let crc = u16::from_le_bytes(crc_bytes);
                if crc == 0 { None } else { Some(crc) }
            }
            other => {
                return Err(ImportError::format_error(
                    "file header",
                    format!("unsupported header size {other}"),
                ));
            }
        };

        trace!(
            "Parsed recording header: protocol={}, profile={}, data_size={}",
            protocol_version, profile_version, data_size
        );

        Ok(Self { header_size, protocol_version, profile_version, data_size, header_crc })
    }

    /// Verify the optional header CRC against the first 12 header bytes.
    pub fn verify_crc(&self, header_bytes: &[u8]) -> Result<()> {
        let Some(expected) = self.header_crc else {
            return Ok(());
        };
        let actual = crc16(&header_bytes[..HEADER_SIZE_LEGACY.min(header_bytes.len())]);
        if actual != expected {
            return Err(ImportError::format_error(
                "file header",
                format!("header crc mismatch: computed {actual:#06x}, stored {expected:#06x}"),
            ));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        // Sanity limit: a recording head unit does not produce files this
        // large; anything bigger indicates corruption
        if self.data_size > 100_000_000 {
            return Err(ImportError::format_error(
                "file header",
                "data size is unreasonably large".to_string(),
            ));
        }
        Ok(())
    }

    /// Total byte length of the header as stored on disk.
    pub fn len(&self) -> usize {
        usize::from(self.header_size)
    }

    /// Expected total file length including the trailing CRC.
    pub fn expected_file_len(&self) -> usize {
        self.len() + self.data_size as usize + FILE_CRC_SIZE
    }
}

/// Base wire types of the binary format.
///
/// The definition byte carries the type number in its low five bits; the
/// high bit only flags multi-byte capability and is ignored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitBaseType {
    Enum,
    SInt8,
    UInt8,
    SInt16,
    UInt16,
    SInt32,
    UInt32,
    Text,
    Float32,
    Float64,
    UInt8z,
    UInt16z,
    UInt32z,
    Byte,
    SInt64,
    UInt64,
    UInt64z,
}

impl FitBaseType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte & 0x1F {
            0x00 => Some(FitBaseType::Enum),
            0x01 => Some(FitBaseType::SInt8),
            0x02 => Some(FitBaseType::UInt8),
            0x03 => Some(FitBaseType::SInt16),
            0x04 => Some(FitBaseType::UInt16),
            0x05 => Some(FitBaseType::SInt32),
            0x06 => Some(FitBaseType::UInt32),
            0x07 => Some(FitBaseType::Text),
            0x08 => Some(FitBaseType::Float32),
            0x09 => Some(FitBaseType::Float64),
            0x0A => Some(FitBaseType::UInt8z),
            0x0B => Some(FitBaseType::UInt16z),
            0x0C => Some(FitBaseType::UInt32z),
            0x0D => Some(FitBaseType::Byte),
            0x0E => Some(FitBaseType::SInt64),
            0x0F => Some(FitBaseType::UInt64),
            0x10 => Some(FitBaseType::UInt64z),
            _ => None,
        }
    }

    /// Size in bytes of one element of this type.
    pub fn size(&self) -> usize {
        match self {
            FitBaseType::Enum
            | FitBaseType::SInt8
            | FitBaseType::UInt8
            | FitBaseType::UInt8z
            | FitBaseType::Byte
            | FitBaseType::Text => 1,
            FitBaseType::SInt16 | FitBaseType::UInt16 | FitBaseType::UInt16z => 2,
            FitBaseType::SInt32
            | FitBaseType::UInt32
            | FitBaseType::UInt32z
            | FitBaseType::Float32 => 4,
            FitBaseType::SInt64
            | FitBaseType::UInt64
            | FitBaseType::UInt64z
            | FitBaseType::Float64 => 8,
        }
    }

    /// Decode the first element of a field payload.
    ///
    /// Returns `None` when the payload carries the type's invalid sentinel
    /// or is shorter than one element; the caller degrades the field to
    /// absent. Text fields consume the whole payload up to the first NUL.
    pub fn decode(&self, bytes: &[u8], big_endian: bool) -> Option<FieldValue> {
        if bytes.len() < self.size() {
            return None;
        }
        match self {
            FitBaseType::Enum | FitBaseType::UInt8 => {
                let v = bytes[0];
                (v != 0xFF).then_some(FieldValue::UInt(u64::from(v)))
            }
            FitBaseType::UInt8z => {
                let v = bytes[0];
                (v != 0x00).then_some(FieldValue::UInt(u64::from(v)))
            }
            FitBaseType::Byte => {
                let v = bytes[0];
                (v != 0xFF).then_some(FieldValue::UInt(u64::from(v)))
            }
            FitBaseType::SInt8 => {
                let v = bytes[0] as i8;
                (v != 0x7F).then_some(FieldValue::SInt(i64::from(v)))
            }
            FitBaseType::UInt16 => {
                let v = read_u16(bytes, big_endian);
                (v != 0xFFFF).then_some(FieldValue::UInt(u64::from(v)))
            }
            FitBaseType::UInt16z => {
                let v = read_u16(bytes, big_endian);
                (v != 0x0000).then_some(FieldValue::UInt(u64::from(v)))
            }
            FitBaseType::SInt16 => {
                let v = read_u16(bytes, big_endian) as i16;
                (v != 0x7FFF).then_some(FieldValue::SInt(i64::from(v)))
            }
            FitBaseType::UInt32 => {
                let v = read_u32(bytes, big_endian);
                (v != 0xFFFF_FFFF).then_some(FieldValue::UInt(u64::from(v)))
            }
            FitBaseType::UInt32z => {
                let v = read_u32(bytes, big_endian);
                (v != 0).then_some(FieldValue::UInt(u64::from(v)))
            }
            FitBaseType::SInt32 => {
                let v = read_u32(bytes, big_endian) as i32;
                (v != 0x7FFF_FFFF).then_some(FieldValue::SInt(i64::from(v)))
            }
            FitBaseType::Float32 => {
                let bits = read_u32(bytes, big_endian);
                let v = f32::from_bits(bits);
                (bits != 0xFFFF_FFFF && v.is_finite()).then_some(FieldValue::Float(f64::from(v)))
            }
            FitBaseType::Float64 => {
                let bits = read_u64(bytes, big_endian);
                let v = f64::from_bits(bits);
                (bits != u64::MAX && v.is_finite()).then_some(FieldValue::Float(v))
            }
            FitBaseType::SInt64 => {
                let v = read_u64(bytes, big_endian) as i64;
                (v != i64::MAX).then_some(FieldValue::SInt(v))
            }
            FitBaseType::UInt64 => {
                let v = read_u64(bytes, big_endian);
                (v != u64::MAX).then_some(FieldValue::UInt(v))
            }
            FitBaseType::UInt64z => {
                let v = read_u64(bytes, big_endian);
                (v != 0).then_some(FieldValue::UInt(v))
            }
            FitBaseType::Text => {
                let text = extract_null_terminated_string(bytes);
                (!text.is_empty()).then_some(FieldValue::Text(text))
            }
        }
    }
}

/// A decoded field value in its widest natural representation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    UInt(u64),
    SInt(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            FieldValue::SInt(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::UInt(v) => i64::try_from(*v).ok(),
            FieldValue::SInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::UInt(v) => Some(*v as f64),
            FieldValue::SInt(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// One field slot within a message definition.
#[derive(Debug, Clone, Copy)]
pub struct FieldDefinition {
    pub field_id: u8,
    /// Total payload bytes, a multiple of the base size for arrays.
    pub size: u8,
    /// `None` for base types this decoder does not know; the field still
    /// occupies `size` bytes but decodes to absent.
    pub base_type: Option<FitBaseType>,
}

/// Layout of one local message number, installed by a definition record and
/// consulted for every following data record with that number.
#[derive(Debug, Clone)]
pub struct MessageDefinition {
    pub global_id: u16,
    pub big_endian: bool,
    pub fields: Vec<FieldDefinition>,
    /// Trailing developer-field bytes, skipped as a block.
    pub developer_bytes: usize,
}

impl MessageDefinition {
    /// Payload length of one data record using this definition.
    pub fn data_size(&self) -> usize {
        self.fields.iter().map(|f| usize::from(f.size)).sum::<usize>() + self.developer_bytes
    }
}

/// Convert a device timestamp (seconds since the device epoch) to standard
/// epoch milliseconds.
pub fn device_time_to_epoch_ms(device_seconds: u32) -> i64 {
    i64::from(device_seconds) * 1000 + DEVICE_EPOCH_OFFSET_MS
}

/// Convert a semicircle angle to degrees.
pub fn semicircles_to_degrees(semicircles: i32) -> f64 {
    f64::from(semicircles) * DEGREES_PER_SEMICIRCLE
}

/// Manufacturer registry id to display name.
pub fn manufacturer_name(id: u16) -> String {
    match id {
        1 => "garmin".to_string(),
        6 => "srm".to_string(),
        7 => "quarq".to_string(),
        23 => "suunto".to_string(),
        32 => "wahoo fitness".to_string(),
        48 => "pioneer".to_string(),
        89 => "tacx".to_string(),
        260 => "zwift".to_string(),
        other => format!("manufacturer {other}"),
    }
}

// CRC-16 nibble lookup, polynomial 0xA001 reflected
const CRC_TABLE: [u16; 16] = [
    0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
    0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
];

/// File integrity checksum over a byte span. A valid file's CRC over all
/// bytes including the stored checksum is zero.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in bytes {
        let mut tmp = CRC_TABLE[usize::from(crc & 0xF)];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[usize::from(byte & 0xF)];

        tmp = CRC_TABLE[usize::from(crc & 0xF)];
        crc = (crc >> 4) & 0x0FFF;
        crc = crc ^ tmp ^ CRC_TABLE[usize::from((byte >> 4) & 0xF)];
    }
    crc
}

fn read_u16(bytes: &[u8], big_endian: bool) -> u16 {
    let raw = [bytes[0], bytes[1]];
    if big_endian { u16::from_be_bytes(raw) } else { u16::from_le_bytes(raw) }
}

fn read_u32(bytes: &[u8], big_endian: bool) -> u32 {
    let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
    if big_endian { u32::from_be_bytes(raw) } else { u32::from_le_bytes(raw) }
}

fn read_u64(bytes: &[u8], big_endian: bool) -> u64 {
    let raw = [bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]];
    if big_endian { u64::from_be_bytes(raw) } else { u64::from_le_bytes(raw) }
}

/// Safe byte parsing helpers with bounds checking
fn parse_u16_le(data: &[u8], offset: usize) -> Result<u16> {
    if offset + 2 > data.len() {
        return Err(ImportError::format_error(
            "integer parsing",
            format!(
                "insufficient data for u16 at offset {} (need 2 bytes, have {})",
                offset,
                data.len() - offset
            ),
        ));
    }
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

fn parse_u32_le(data: &[u8], offset: usize) -> Result<u32> {
    if offset + 4 > data.len() {
        return Err(ImportError::format_error(
            "integer parsing",
            format!(
                "insufficient data for u32 at offset {} (need 4 bytes, have {})",
                offset,
                data.len() - offset
            ),
        ));
    }
    Ok(u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]]))
}

/// Extract null-terminated string from byte slice
fn extract_null_terminated_string(bytes: &[u8]) -> String {
    let null_pos = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..null_pos]).to_string()
}
