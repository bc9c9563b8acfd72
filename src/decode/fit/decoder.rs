//! Binary recording decoder
//!
//! Pull-based decoder for the framed binary activity format. The whole file
//! is loaded at construction (recordings are small), integrity-checked, and
//! then drained one typed record at a time.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use tracklog::decode::RecordDecoder;
//! use tracklog::decode::fit::FitDecoder;
//!
//! fn read_records() -> tracklog::Result<()> {
//!     let mut decoder = FitDecoder::open("rides/morning.fit")?;
//!     while let Some(record) = decoder.next_record()? {
//!         println!("{record:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Decoding Notes
//!
//! - Definition records install the field layout for a local message
//!   number; data records decode against the active layout
//! - Unknown global message numbers are skipped, not errors
//! - Per-field invalid sentinels degrade that field to absent
//! - A `file_id` message typed anything but activity fails the file

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::format::{
    FitHeader, MessageDefinition, crc16, device_info_field, device_time_to_epoch_ms, event_field,
    file_id_field, global, lap_field, manufacturer_name, record_field, semicircles_to_degrees,
    session_field,
};
use super::format::{FieldDefinition, FieldValue, FitBaseType};
use crate::decode::RecordDecoder;
use crate::error::{ImportError, Result};
use crate::types::{
    DecodedRecord, DeviceMetadata, GearChangeEvent, GearCombination, LapFragment, PauseReason,
    PowerSource, Sample, SessionSummary, TimerAction, TimerEvent,
};

// Record header bits
const HEADER_COMPRESSED: u8 = 0x80;
const HEADER_DEFINITION: u8 = 0x40;
const HEADER_DEVELOPER_DATA: u8 = 0x20;
const COMPRESSED_TIME_MASK: u8 = 0x1F;

/// Pull decoder for binary recordings.
pub struct FitDecoder {
    data: Vec<u8>,
    position: usize,
    /// End of the record stream; the trailing CRC sits beyond it.
    data_end: usize,
    path: PathBuf,
    definitions: HashMap<u8, MessageDefinition>,
    /// Last full timestamp seen, base for compressed-timestamp records.
    last_device_time: Option<u32>,
    seen_file_id: bool,
}

impl FitDecoder {
    /// Open a binary recording for decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(&path)
            .map_err(|e| ImportError::file_error(path.as_ref().to_path_buf(), e))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| ImportError::file_error(path.as_ref().to_path_buf(), e))?;

        Self::from_bytes_with_path(data, path.as_ref().to_path_buf())
    }

    /// Create a decoder from bytes (for testing).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_path(data, PathBuf::from("<memory>"))
    }

    fn from_bytes_with_path(data: Vec<u8>, path: PathBuf) -> Result<Self> {
        let mut cursor = std::io::Cursor::new(&data);

        let header = FitHeader::parse_from_reader(&mut cursor)?;
        header.validate()?;
        header.verify_crc(&data)?;

        let expected_len = header.expected_file_len();
        if data.len() < expected_len {
            return Err(ImportError::format_error(
                "record stream",
                format!("file truncated: {} bytes, header promises {}", data.len(), expected_len),
            ));
        }
        if data.len() > expected_len {
            // Chained streams after the first are not activity content
            warn!(
                "Recording {} carries {} trailing bytes past the first stream; ignoring them",
                path.display(),
                data.len() - expected_len
            );
        }

        // The trailing CRC covers header and record stream
        let crc_offset = expected_len - 2;
        let stored_crc = u16::from_le_bytes([data[crc_offset], data[crc_offset + 1]]);
        let computed_crc = crc16(&data[..crc_offset]);
        if stored_crc != computed_crc {
            return Err(ImportError::format_error(
                "record stream",
                format!(
                    "file crc mismatch: computed {computed_crc:#06x}, stored {stored_crc:#06x}"
                ),
            ));
        }

        debug!(
            "Opened recording {}: protocol {:#04x}, {} record bytes",
            path.display(),
            header.protocol_version,
            header.data_size
        );

        let position = header.len();
        let data_end = crc_offset;
        Ok(Self {
            data,
            position,
            data_end,
            path,
            definitions: HashMap::new(),
            last_device_time: None,
            seen_file_id: false,
        })
    }

    /// File path this decoder was opened from.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    fn next_byte(&mut self) -> u8 {
        let byte = self.data[self.position];
        self.position += 1;
        byte
    }

    fn take_bytes(&mut self, len: usize, context: &str) -> Result<Vec<u8>> {
        let end = self.position.checked_add(len).ok_or_else(|| {
            ImportError::format_error(context, "record length calculation overflowed".to_string())
        })?;
        if end > self.data_end {
            return Err(ImportError::format_error(
                context,
                format!(
                    "record extends beyond stream end ({} > {})",
                    end, self.data_end
                ),
            ));
        }
        let bytes = self.data[self.position..end].to_vec();
        self.position = end;
        Ok(bytes)
    }

    /// Install a message definition for a local message number.
    fn read_definition(&mut self, local_id: u8, has_developer_data: bool) -> Result<()> {
        let fixed = self.take_bytes(5, "message definition")?;
        let big_endian = match fixed[1] {
            0 => false,
            1 => true,
            other => {
                return Err(ImportError::format_error(
                    "message definition",
                    format!("unknown architecture byte {other:#04x}"),
                ));
            }
        };
        let global_id = if big_endian {
            u16::from_be_bytes([fixed[2], fixed[3]])
        } else {
            u16::from_le_bytes([fixed[2], fixed[3]])
        };
        let field_count = usize::from(fixed[4]);

        let field_bytes = self.take_bytes(field_count * 3, "message definition")?;
        let mut fields = Vec::with_capacity(field_count);
        for chunk in field_bytes.chunks_exact(3) {
            // An unknown base type still occupies its declared bytes; the
            // field is kept for offset accounting and decodes to absent
            fields.push(FieldDefinition {
                field_id: chunk[0],
                size: chunk[1],
                base_type: FitBaseType::from_byte(chunk[2]),
            });
        }

        // Developer fields are skipped as an opaque block
        let developer_bytes = if has_developer_data {
            let count = usize::from(self.take_bytes(1, "developer field definition")?[0]);
            let dev_defs = self.take_bytes(count * 3, "developer field definition")?;
            dev_defs.chunks_exact(3).map(|chunk| usize::from(chunk[1])).sum()
        } else {
            0
        };

        trace!(
            "Definition for local {}: global {}, {} fields, {} developer bytes",
            local_id,
            global_id,
            fields.len(),
            developer_bytes
        );

        self.definitions
            .insert(local_id, MessageDefinition { global_id, big_endian, fields, developer_bytes });
        Ok(())
    }

    /// Reconstruct a full device time from a 5-bit compressed offset.
    fn expand_compressed_time(&mut self, offset: u8) -> Result<u32> {
        let last = self.last_device_time.ok_or_else(|| {
            ImportError::format_error(
                "record stream",
                "compressed timestamp before any full timestamp".to_string(),
            )
        })?;
        let mut time = (last & !u32::from(COMPRESSED_TIME_MASK)) | u32::from(offset);
        if u32::from(offset) < (last & u32::from(COMPRESSED_TIME_MASK)) {
            // Offset wrapped within its 32-second window. The device clock
            // itself is a wrapping u32 counter, so times at the top of its
            // range roll over rather than fault.
            time = time.wrapping_add(u32::from(COMPRESSED_TIME_MASK) + 1);
        }
        self.last_device_time = Some(time);
        Ok(time)
    }

    fn decode_data_record(
        &mut self,
        local_id: u8,
        time_override: Option<u32>,
    ) -> Result<Option<DecodedRecord>> {
        let definition = self.definitions.get(&local_id).cloned().ok_or_else(|| {
            ImportError::format_error(
                "record stream",
                format!("data record references undefined local message {local_id}"),
            )
        })?;
        let payload = self.take_bytes(definition.data_size(), "record stream")?;

        let mut fields = FieldMap::default();
        let mut offset = 0usize;
        for field in &definition.fields {
            let end = offset + usize::from(field.size);
            if let Some(base_type) = field.base_type
                && let Some(value) = base_type.decode(&payload[offset..end], definition.big_endian)
            {
                fields.insert(field.field_id, value);
            }
            offset = end;
        }

        // Field 253 is the shared timestamp slot across message kinds
        let device_time = match time_override {
            Some(time) => Some(time),
            None => fields.as_u64(record_field::TIMESTAMP).map(|v| v as u32),
        };
        if let Some(time) = device_time {
            self.last_device_time = Some(time);
        }

        if definition.global_id != global::FILE_ID && !self.seen_file_id {
            return Err(ImportError::unsupported(
                self.path.clone(),
                "missing file type marker before first data record",
            ));
        }

        match definition.global_id {
            global::FILE_ID => self.decode_file_id(&fields),
            global::RECORD => Ok(decode_record(&fields, device_time)),
            global::EVENT => Ok(decode_event(&fields, device_time)),
            global::LAP => Ok(decode_lap(&fields, device_time)),
            global::SESSION => Ok(Some(decode_session(&fields))),
            global::DEVICE_INFO => Ok(decode_device_info(&fields)),
            other => {
                trace!("Skipping message with unknown global number {other}");
                Ok(None)
            }
        }
    }

    fn decode_file_id(&mut self, fields: &FieldMap) -> Result<Option<DecodedRecord>> {
        match fields.as_u64(file_id_field::FILE_TYPE) {
            Some(file_id_field::TYPE_ACTIVITY) => {}
            Some(other) => {
                return Err(ImportError::unsupported(
                    self.path.clone(),
                    format!("file type {other} is not an activity recording"),
                ));
            }
            None => {
                return Err(ImportError::unsupported(
                    self.path.clone(),
                    "file type marker absent",
                ));
            }
        }
        self.seen_file_id = true;

        // Product naming is left to device_info records, which carry the
        // readable product name; file_id only has the numeric id
        let metadata = DeviceMetadata {
            manufacturer: fields
                .as_u64(file_id_field::MANUFACTURER)
                .map(|id| manufacturer_name(id as u16)),
            product: None,
            serial_number: fields.as_u64(file_id_field::SERIAL_NUMBER).map(|v| v as u32),
            firmware_version: None,
        };
        if metadata == DeviceMetadata::default() {
            return Ok(None);
        }
        Ok(Some(DecodedRecord::DeviceInfo(metadata)))
    }
}

impl RecordDecoder for FitDecoder {
    fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        loop {
            if self.position >= self.data_end {
                if !self.seen_file_id {
                    return Err(ImportError::unsupported(
                        self.path.clone(),
                        "recording ended without a file type marker",
                    ));
                }
                return Ok(None);
            }

            let header_byte = self.next_byte();
            let produced = if header_byte & HEADER_COMPRESSED != 0 {
                let local_id = (header_byte >> 5) & 0x03;
                let offset = header_byte & COMPRESSED_TIME_MASK;
                let time = self.expand_compressed_time(offset)?;
                self.decode_data_record(local_id, Some(time))?
            } else if header_byte & HEADER_DEFINITION != 0 {
                let has_developer_data = header_byte & HEADER_DEVELOPER_DATA != 0;
                self.read_definition(header_byte & 0x0F, has_developer_data)?;
                None
            } else {
                self.decode_data_record(header_byte & 0x0F, None)?
            };

            if let Some(record) = produced {
                return Ok(Some(record));
            }
        }
    }
}

/// Decoded field values of one message, keyed by field number.
#[derive(Default)]
struct FieldMap(Vec<(u8, FieldValue)>);

impl FieldMap {
    fn insert(&mut self, field_id: u8, value: FieldValue) {
        self.0.push((field_id, value));
    }

    fn get(&self, field_id: u8) -> Option<&FieldValue> {
        self.0.iter().find(|(id, _)| *id == field_id).map(|(_, value)| value)
    }

    fn as_u64(&self, field_id: u8) -> Option<u64> {
        self.get(field_id).and_then(FieldValue::as_u64)
    }

    fn as_i64(&self, field_id: u8) -> Option<i64> {
        self.get(field_id).and_then(FieldValue::as_i64)
    }

    fn text(&self, field_id: u8) -> Option<String> {
        self.get(field_id).cloned().and_then(FieldValue::into_text)
    }
}

fn decode_record(fields: &FieldMap, device_time: Option<u32>) -> Option<DecodedRecord> {
    let Some(device_time) = device_time else {
        trace!("Skipping sample record without timestamp");
        return None;
    };

    let mut sample = Sample::at(device_time_to_epoch_ms(device_time));
    sample.latitude =
        fields.as_i64(record_field::LATITUDE).map(|v| semicircles_to_degrees(v as i32));
    sample.longitude =
        fields.as_i64(record_field::LONGITUDE).map(|v| semicircles_to_degrees(v as i32));

    // Wider "enhanced" fields supersede their 16-bit forerunners
    sample.altitude = fields
        .as_u64(record_field::ENHANCED_ALTITUDE)
        .or_else(|| fields.as_u64(record_field::ALTITUDE))
        .map(|raw| raw as f32 / 5.0 - 500.0);
    sample.speed = fields
        .as_u64(record_field::ENHANCED_SPEED)
        .or_else(|| fields.as_u64(record_field::SPEED))
        .map(|raw| raw as f32 / 1000.0);

    sample.distance = fields.as_u64(record_field::DISTANCE).map(|raw| raw as f32 / 100.0);
    sample.heart_rate = fields.as_u64(record_field::HEART_RATE).map(|v| v as f32);
    sample.cadence = fields.as_u64(record_field::CADENCE).map(|whole| {
        let fractional = fields
            .as_u64(record_field::FRACTIONAL_CADENCE)
            .map_or(0.0, |raw| raw as f32 / 128.0);
        whole as f32 + fractional
    });
    sample.power = fields.as_u64(record_field::POWER).map(|v| v as f32);
    sample.power_source = sample.power.is_some().then_some(PowerSource::Device);
    sample.temperature = fields.as_i64(record_field::TEMPERATURE).map(|v| v as f32);
    sample.vertical_oscillation =
        fields.as_u64(record_field::VERTICAL_OSCILLATION).map(|raw| raw as f32 / 10.0);
    sample.stance_time = fields.as_u64(record_field::STANCE_TIME).map(|raw| raw as f32 / 10.0);

    Some(DecodedRecord::Sample(sample))
}

fn decode_event(fields: &FieldMap, device_time: Option<u32>) -> Option<DecodedRecord> {
    let time = device_time_to_epoch_ms(device_time?);

    match fields.as_u64(event_field::EVENT)? {
        event_field::EVENT_TIMER => {
            let action = match fields.as_u64(event_field::EVENT_TYPE)? {
                event_field::TYPE_START => TimerAction::Start,
                event_field::TYPE_STOP => TimerAction::Stop,
                event_field::TYPE_STOP_ALL => TimerAction::StopAll,
                other => {
                    trace!("Skipping timer event with type {other}");
                    return None;
                }
            };
            let reason = match fields.as_u64(event_field::DATA) {
                Some(event_field::TIMER_TRIGGER_AUTO) => PauseReason::Automatic,
                _ => PauseReason::Manual,
            };
            Some(DecodedRecord::Timer(TimerEvent { time, action, reason }))
        }
        event_field::EVENT_FRONT_GEAR_CHANGE | event_field::EVENT_REAR_GEAR_CHANGE => {
            let data = fields.as_u64(event_field::DATA)?;
            Some(DecodedRecord::Gear(GearChangeEvent {
                time,
                gear: GearCombination::new(data as u32),
            }))
        }
        other => {
            trace!("Skipping event with kind {other}");
            None
        }
    }
}

fn decode_lap(fields: &FieldMap, device_time: Option<u32>) -> Option<DecodedRecord> {
    let Some(device_time) = device_time else {
        trace!("Skipping lap record without timestamp");
        return None;
    };
    Some(DecodedRecord::Lap(LapFragment {
        device_time: device_time_to_epoch_ms(device_time),
        label: fields.as_u64(lap_field::MESSAGE_INDEX).map(|index| (index + 1).to_string()),
    }))
}

fn decode_session(fields: &FieldMap) -> DecodedRecord {
    DecodedRecord::SessionSummary(SessionSummary {
        start_time: fields
            .as_u64(session_field::START_TIME)
            .map(|v| device_time_to_epoch_ms(v as u32)),
        // Stored at 1/1000 s resolution, so the raw value already is
        // milliseconds
        elapsed_time_ms: fields
            .as_u64(session_field::TOTAL_ELAPSED_TIME)
            .and_then(|v| i64::try_from(v).ok()),
        timer_time_ms: fields
            .as_u64(session_field::TOTAL_TIMER_TIME)
            .and_then(|v| i64::try_from(v).ok()),
        calories_kcal: fields.as_u64(session_field::TOTAL_CALORIES).map(|v| v as u32),
        avg_power: fields.as_u64(session_field::AVG_POWER).map(|v| v as f32),
        training_effect: fields
            .as_u64(session_field::TOTAL_TRAINING_EFFECT)
            .map(|raw| raw as f32 / 10.0),
    })
}

fn decode_device_info(fields: &FieldMap) -> Option<DecodedRecord> {
    let metadata = DeviceMetadata {
        manufacturer: fields
            .as_u64(device_info_field::MANUFACTURER)
            .map(|id| manufacturer_name(id as u16)),
        product: fields
            .text(device_info_field::PRODUCT_NAME)
            .or_else(|| fields.as_u64(device_info_field::PRODUCT).map(|id| format!("product {id}"))),
        serial_number: fields.as_u64(device_info_field::SERIAL_NUMBER).map(|v| v as u32),
        firmware_version: fields
            .as_u64(device_info_field::SOFTWARE_VERSION)
            .map(|raw| format!("{:.2}", raw as f64 / 100.0)),
    };
    if metadata == DeviceMetadata::default() {
        return None;
    }
    Some(DecodedRecord::DeviceInfo(metadata))
}
