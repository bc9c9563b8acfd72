//! Streaming decoder for device XML logs
//!
//! A single pull loop drives both dialects. Tag entry/exit switches section
//! state; character data is buffered only while a recognized leaf tag is
//! open. Samples accumulate in a scratch struct and are emitted when their
//! closing tag is seen.
//!
//! Per-sample time resolution:
//!
//! 1. `UTC` leaf, truncated to the whole second so markers and samples
//!    cannot disagree by milliseconds alone
//! 2. relative `Time` leaf in seconds, anchored on the first sample (or the
//!    header `DateTime` before any sample exists)
//! 3. neither present: the sample cannot be placed and is dropped

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, Event};
use tracing::{debug, trace};

use super::rootless::wrap_rootless;
use super::{
    HZ_TO_PER_MINUTE, JOULES_PER_KCAL, KELVIN_OFFSET, RADIANS_TO_DEGREES, XmlDialect, parse_f32,
    parse_f64, parse_time_utc,
};
use crate::decode::RecordDecoder;
use crate::error::{ImportError, Result};
use crate::types::{
    DecodedRecord, DeviceMetadata, GpsFix, LapFragment, PauseReason, Sample, SessionSummary,
    TimerAction, TimerEvent,
};

/// Streaming decoder over one device XML log.
pub struct XmlDecoder {
    reader: Reader<Cursor<Vec<u8>>>,
    buf: Vec<u8>,
    dialect: XmlDialect,
    path: PathBuf,
    section: Section,
    in_sample: bool,
    in_events: bool,
    in_pause: bool,
    open_leaf: Option<String>,
    /// Character data gathered for the open leaf. Text nodes split by
    /// entity references arrive as several events and concatenate here.
    leaf_text: String,
    scratch: SampleScratch,
    header: HeaderScratch,
    /// Anchor for relative sample times.
    first_sample_time: Option<i64>,
    pending: VecDeque<DecodedRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Header,
    Device,
    Samples,
}

/// One event read from the document, detached from the parse buffer.
enum Step {
    Open(String),
    OpenClose(String),
    Text(String),
    Close(String),
    Eof,
    Nothing,
}

#[derive(Default)]
struct SampleScratch {
    sample_type: Option<String>,
    utc_time: Option<i64>,
    relative_seconds: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f32>,
    distance: Option<f32>,
    cadence: Option<f32>,
    heart_rate: Option<f32>,
    temperature: Option<f32>,
    is_lap: bool,
    pause_toggles: Vec<bool>,
}

#[derive(Default)]
struct HeaderScratch {
    start_time: Option<i64>,
    energy_kcal: Option<u32>,
    training_effect: Option<f32>,
    device_name: Option<String>,
    firmware: Option<String>,
}

impl XmlDecoder {
    /// Open a device XML log for decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(&path)
            .map_err(|e| ImportError::file_error(path.as_ref().to_path_buf(), e))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| ImportError::file_error(path.as_ref().to_path_buf(), e))?;

        Self::from_bytes_with_path(data, path.as_ref().to_path_buf())
    }

    /// Create a decoder from raw document bytes (for testing).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_path(data, PathBuf::from("<memory>"))
    }

    fn from_bytes_with_path(data: Vec<u8>, path: PathBuf) -> Result<Self> {
        let text = String::from_utf8_lossy(&data).into_owned();
        let dialect = XmlDialect::detect(&text);
        let document = match dialect {
            XmlDialect::Legacy => wrap_rootless(&text),
            XmlDialect::DeviceLog => text,
        };

        debug!("Opened xml log {} as {:?} dialect", path.display(), dialect);

        let mut reader = Reader::from_reader(Cursor::new(document.into_bytes()));
        reader.config_mut().trim_text(true);

        Ok(Self {
            reader,
            buf: Vec::new(),
            dialect,
            path,
            section: Section::Preamble,
            in_sample: false,
            in_events: false,
            in_pause: false,
            open_leaf: None,
            leaf_text: String::new(),
            scratch: SampleScratch::default(),
            header: HeaderScratch::default(),
            first_sample_time: None,
            pending: VecDeque::new(),
        })
    }

    /// File path this decoder was opened from.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Unit dialect detected at open.
    pub fn dialect(&self) -> XmlDialect {
        self.dialect
    }

    fn read_step(&mut self) -> Result<Step> {
        let step = match self.reader.read_event_into(&mut self.buf) {
            Ok(Event::Start(start)) => {
                Step::Open(String::from_utf8_lossy(start.local_name().as_ref()).into_owned())
            }
            Ok(Event::Empty(start)) => {
                Step::OpenClose(String::from_utf8_lossy(start.local_name().as_ref()).into_owned())
            }
            Ok(Event::Text(text)) => match text.decode() {
                Ok(value) => Step::Text(value.into_owned()),
                Err(e) => {
                    trace!("Dropping undecodable text node: {e}");
                    Step::Nothing
                }
            },
            Ok(Event::GeneralRef(reference)) => match resolve_reference(&reference) {
                Some(value) => Step::Text(value),
                None => {
                    trace!("Dropping unresolvable entity reference");
                    Step::Nothing
                }
            },
            Ok(Event::CData(data)) => {
                let raw = data.into_inner();
                Step::Text(String::from_utf8_lossy(&raw).into_owned())
            }
            Ok(Event::End(end)) => {
                Step::Close(String::from_utf8_lossy(end.local_name().as_ref()).into_owned())
            }
            Ok(Event::Eof) => Step::Eof,
            Ok(_) => Step::Nothing,
            Err(e) => {
                return Err(ImportError::format_error("device xml log", e.to_string()));
            }
        };
        self.buf.clear();
        Ok(step)
    }

    fn on_start(&mut self, name: &str) {
        match name {
            "Header" if self.section == Section::Preamble => self.section = Section::Header,
            "Device" if self.section == Section::Preamble => self.section = Section::Device,
            "Samples" if self.section == Section::Preamble => self.section = Section::Samples,
            "Sample" if self.section == Section::Samples => {
                self.in_sample = true;
                self.scratch = SampleScratch::default();
            }
            "Events" if self.in_sample => self.in_events = true,
            "Pause" if self.in_events => self.in_pause = true,
            "Lap" if self.in_sample => self.scratch.is_lap = true,
            leaf if self.is_recognized_leaf(leaf) => {
                self.leaf_text.clear();
                self.open_leaf = Some(leaf.to_owned());
            }
            _ => {
                // Forward-compatibility noise, ignored without logging
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        if self.open_leaf.is_some() {
            self.leaf_text.push_str(text);
        }
    }

    fn on_end(&mut self, name: &str) {
        if self.open_leaf.as_deref() == Some(name) {
            let Some(leaf) = self.open_leaf.take() else { return };
            let text = std::mem::take(&mut self.leaf_text);
            if !text.is_empty() {
                match self.section {
                    Section::Header => self.header_text(&leaf, &text),
                    Section::Device => self.device_text(&leaf, &text),
                    Section::Samples if self.in_sample => self.sample_text(&leaf, &text),
                    _ => {}
                }
            }
            return;
        }
        match name {
            "Pause" => self.in_pause = false,
            "Events" => self.in_events = false,
            "Sample" if self.in_sample => {
                self.in_sample = false;
                self.finalize_sample();
            }
            "Header" if self.section == Section::Header => {
                self.section = Section::Preamble;
                self.emit_session_summary();
            }
            "Device" if self.section == Section::Device => {
                self.section = Section::Preamble;
                self.emit_device_metadata();
            }
            "Samples" if self.section == Section::Samples => self.section = Section::Preamble,
            _ => {}
        }
    }

    fn is_recognized_leaf(&self, name: &str) -> bool {
        match self.section {
            Section::Header => matches!(name, "Energy" | "PeakTrainingEffect" | "DateTime"),
            Section::Device => matches!(name, "Name" | "SW"),
            Section::Samples if self.in_sample => matches!(
                name,
                "SampleType"
                    | "UTC"
                    | "Time"
                    | "Latitude"
                    | "Longitude"
                    | "Altitude"
                    | "Distance"
                    | "Cadence"
                    | "HR"
                    | "Temperature"
                    | "State"
            ),
            _ => false,
        }
    }

    fn header_text(&mut self, leaf: &str, text: &str) {
        match leaf {
            "Energy" => {
                self.header.energy_kcal = parse_f32(text).map(|energy| match self.dialect {
                    XmlDialect::DeviceLog => (energy / JOULES_PER_KCAL) as u32,
                    XmlDialect::Legacy => energy as u32,
                });
            }
            "PeakTrainingEffect" => self.header.training_effect = parse_f32(text),
            "DateTime" => self.header.start_time = parse_time_utc(text),
            _ => {}
        }
    }

    fn device_text(&mut self, leaf: &str, text: &str) {
        match leaf {
            "Name" => self.header.device_name = Some(text.to_owned()),
            "SW" => self.header.firmware = Some(text.to_owned()),
            _ => {}
        }
    }

    fn sample_text(&mut self, leaf: &str, text: &str) {
        if self.in_pause {
            if leaf == "State" {
                if text.eq_ignore_ascii_case("true") {
                    self.scratch.pause_toggles.push(true);
                } else if text.eq_ignore_ascii_case("false") {
                    self.scratch.pause_toggles.push(false);
                }
            }
            return;
        }
        if self.in_events {
            // <Distance> also occurs inside <Events> and must not clobber
            // the sample's distance
            return;
        }

        // Convert in f64 before narrowing so fractional Hz readings land on
        // the exact per-minute value
        let rate_scale = match self.dialect {
            XmlDialect::DeviceLog => f64::from(HZ_TO_PER_MINUTE),
            XmlDialect::Legacy => 1.0,
        };

        match leaf {
            "SampleType" => self.scratch.sample_type = Some(text.to_owned()),
            "UTC" => self.scratch.utc_time = parse_time_utc(text),
            "Time" => self.scratch.relative_seconds = parse_f64(text).map(|v| v as i64),
            "Latitude" => self.scratch.latitude = parse_f64(text).map(|v| self.to_degrees(v)),
            "Longitude" => self.scratch.longitude = parse_f64(text).map(|v| self.to_degrees(v)),
            "Altitude" => self.scratch.altitude = parse_f32(text),
            "Distance" => self.scratch.distance = parse_f32(text),
            "Cadence" => self.scratch.cadence = parse_f64(text).map(|v| (v * rate_scale) as f32),
            "HR" => self.scratch.heart_rate = parse_f64(text).map(|v| (v * rate_scale) as f32),
            "Temperature" => {
                self.scratch.temperature = parse_f32(text).map(|v| match self.dialect {
                    XmlDialect::DeviceLog => v - KELVIN_OFFSET,
                    XmlDialect::Legacy => v,
                });
            }
            _ => {}
        }
    }

    fn to_degrees(&self, angle: f64) -> f64 {
        match self.dialect {
            XmlDialect::DeviceLog => angle * RADIANS_TO_DEGREES,
            XmlDialect::Legacy => angle,
        }
    }

    fn finalize_sample(&mut self) {
        let scratch = std::mem::take(&mut self.scratch);

        let sample_time = match (scratch.utc_time, scratch.relative_seconds) {
            (Some(utc), _) => Some(utc / 1000 * 1000),
            (None, Some(relative)) => self
                .first_sample_time
                .or(self.header.start_time)
                .map(|base| (base / 1000 + relative) * 1000),
            (None, None) => None,
        };
        let Some(time) = sample_time else {
            if scratch.sample_type.is_some() || scratch.is_lap {
                trace!("Skipping sample without any usable time");
            }
            return;
        };

        if scratch.is_lap {
            // Lap rows carry no sample type; the row is the marker
            self.pending
                .push_back(DecodedRecord::Lap(LapFragment { device_time: time, label: None }));
        } else {
            let sample_type = match (&scratch.sample_type, self.dialect) {
                (Some(kind), _) => Some(kind.as_str()),
                // Legacy rows are untyped data rows
                (None, XmlDialect::Legacy) => Some("periodic"),
                (None, XmlDialect::DeviceLog) => None,
            };

            match sample_type {
                Some("periodic") => {
                    let mut sample = Sample::at(time);
                    sample.altitude = scratch.altitude;
                    sample.distance = scratch.distance;
                    sample.cadence = scratch.cadence;
                    sample.heart_rate = scratch.heart_rate;
                    sample.temperature = scratch.temperature;
                    if self.dialect == XmlDialect::Legacy {
                        sample.latitude = scratch.latitude;
                        sample.longitude = scratch.longitude;
                    }
                    if self.first_sample_time.is_none() {
                        self.first_sample_time = Some(time);
                    }
                    self.pending.push_back(DecodedRecord::Sample(sample));
                }
                Some("gps-base" | "gps-small" | "gps-tiny") => {
                    if let (Some(latitude), Some(longitude)) = (scratch.latitude, scratch.longitude)
                    {
                        self.pending.push_back(DecodedRecord::GpsFix(GpsFix {
                            time,
                            latitude,
                            longitude,
                        }));
                    } else {
                        trace!("Skipping gps sample without a complete position");
                    }
                }
                Some(other) => trace!("Skipping sample with unrecognized type {other}"),
                None => {}
            }
        }

        for &paused in &scratch.pause_toggles {
            let action = if paused { TimerAction::Stop } else { TimerAction::Start };
            self.pending.push_back(DecodedRecord::Timer(TimerEvent {
                time,
                action,
                reason: PauseReason::Manual,
            }));
        }
    }

    fn emit_session_summary(&mut self) {
        let summary = SessionSummary {
            start_time: self.header.start_time,
            elapsed_time_ms: None,
            timer_time_ms: None,
            calories_kcal: self.header.energy_kcal,
            avg_power: None,
            training_effect: self.header.training_effect,
        };
        if summary != SessionSummary::default() {
            self.pending.push_back(DecodedRecord::SessionSummary(summary));
        }
    }

    fn emit_device_metadata(&mut self) {
        let metadata = DeviceMetadata {
            manufacturer: None,
            product: self.header.device_name.clone(),
            serial_number: None,
            firmware_version: self.header.firmware.clone(),
        };
        if metadata != DeviceMetadata::default() {
            self.pending.push_back(DecodedRecord::DeviceInfo(metadata));
        }
    }
}

/// Resolve a character reference or one of the predefined XML entities.
/// Anything else has no expansion in a device log and is dropped.
fn resolve_reference(reference: &BytesRef<'_>) -> Option<String> {
    match reference.resolve_char_ref() {
        Ok(Some(ch)) => Some(ch.to_string()),
        Ok(None) => {
            let name = reference.decode().ok()?;
            resolve_predefined_entity(&name).map(str::to_owned)
        }
        Err(_) => None,
    }
}

impl RecordDecoder for XmlDecoder {
    fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Ok(Some(record));
            }
            match self.read_step()? {
                Step::Open(name) => self.on_start(&name),
                Step::OpenClose(name) => {
                    self.on_start(&name);
                    self.on_end(&name);
                }
                Step::Text(text) => self.on_text(&text),
                Step::Close(name) => self.on_end(&name),
                Step::Nothing => {}
                Step::Eof => return Ok(None),
            }
        }
    }
}
