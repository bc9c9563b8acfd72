//! Decoder for gzip-compressed JSON-lines recordings
//!
//! Each line of the decompressed stream is one JSON object carrying a
//! `Samples` array; entries are decoded independently. The dialect shares
//! the radians/Hz/Kelvin units of the `DeviceLog` XML dialect.
//!
//! Entry times are rounded to the whole second. Because several entries can
//! land on one second (position and sensor attributes arrive separately), a
//! bounded look-back window merges same-second entries into one sample
//! before it is emitted.
//!
//! `R-R` entries from a paired heart-rate belt pass through as
//! [`BeatIntervals`] records; the joiner derives a pulse from them where
//! the explicit `HR` channel is absent.
//!
//! Multi-part recordings: the first part must open with a lap entry typed
//! `Start`, which fixes the activity start time. Parts numbered `-2` and up
//! continue an earlier part and carry no start entry of their own.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Lines};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde_json::Value;
use tracing::{debug, trace};

use crate::decode::RecordDecoder;
use crate::decode::xml::{HZ_TO_PER_MINUTE, KELVIN_OFFSET, RADIANS_TO_DEGREES};
use crate::error::{ImportError, Result};
use crate::store::part_key;
use crate::types::{
    BeatIntervals, DecodedRecord, LapFragment, PauseReason, PowerSource, Sample, SessionSummary,
    TimerAction, TimerEvent,
};

/// Entries a same-second merge can reach back to.
const LOOKBACK_ENTRIES: usize = 10;

/// Pull decoder over one gzip JSON-lines recording.
pub struct JsonLogDecoder {
    lines: Lines<Box<dyn BufRead + Send>>,
    path: PathBuf,
    /// Entries of the current line not yet processed.
    entries: VecDeque<Value>,
    /// Same-second merge window; samples leave it in arrival order.
    window: VecDeque<Sample>,
    ready: VecDeque<DecodedRecord>,
    /// Raw start time from the opening `Start` lap entry.
    start_time: Option<i64>,
    start_required: bool,
    saw_first_entry: bool,
    paused: bool,
    pause_start: i64,
    lap_count: u32,
    last_sample_time: Option<i64>,
    finished: bool,
}

impl JsonLogDecoder {
    /// Open a gzip JSON-lines recording for decoding.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(&path)
            .map_err(|e| ImportError::file_error(path.as_ref().to_path_buf(), e))?;
        let reader: Box<dyn BufRead + Send> = Box::new(BufReader::new(GzDecoder::new(file)));
        Self::from_reader(reader, path.as_ref().to_path_buf())
    }

    /// Create a decoder from gzip bytes (for testing).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let reader: Box<dyn BufRead + Send> =
            Box::new(BufReader::new(GzDecoder::new(Cursor::new(data))));
        Self::from_reader(reader, PathBuf::from("<memory>"))
    }

    fn from_reader(reader: Box<dyn BufRead + Send>, path: PathBuf) -> Result<Self> {
        // Parts -2 and up extend an earlier file and have no start entry
        let (_, part) = part_key(&path);
        let start_required = part.is_none_or(|n| n <= 1);

        debug!("Opened json log {} (start entry required: {start_required})", path.display());

        Ok(Self {
            lines: reader.lines(),
            path,
            entries: VecDeque::new(),
            window: VecDeque::new(),
            ready: VecDeque::new(),
            start_time: None,
            start_required,
            saw_first_entry: false,
            paused: false,
            pause_start: 0,
            lap_count: 0,
            last_sample_time: None,
            finished: false,
        })
    }

    /// File path this decoder was opened from.
    pub fn file_path(&self) -> &Path {
        &self.path
    }

    /// Pull the next entry, refilling from the line stream as needed.
    fn next_entry(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(entry) = self.entries.pop_front() {
                return Ok(Some(entry));
            }
            let Some(line) = self.lines.next() else {
                return Ok(None);
            };
            let line = line.map_err(|e| {
                ImportError::format_error("compressed json log", e.to_string())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: Value = serde_json::from_str(&line).map_err(|e| {
                ImportError::format_error("compressed json log", e.to_string())
            })?;
            if let Some(samples) = parsed.get("Samples").and_then(Value::as_array) {
                self.entries.extend(samples.iter().cloned());
            }
        }
    }

    fn process_entry(&mut self, entry: &Value) -> Result<()> {
        let Some(time_text) = entry.get("TimeISO8601").and_then(Value::as_str) else {
            // Entries without a time cannot be placed
            return Ok(());
        };
        let Ok(zoned) = chrono::DateTime::parse_from_rfc3339(time_text) else {
            trace!("Skipping entry with unparseable time {time_text}");
            return Ok(());
        };
        let raw_time = zoned.timestamp_millis();
        let rounded_time = round_to_second(raw_time);

        let attributes = entry.get("Attributes");
        let Some(data) = attributes.and_then(|a| a.get("Sample")).or(attributes) else {
            return Ok(());
        };

        if !self.saw_first_entry {
            self.saw_first_entry = true;
            if lap_type(data) == Some("Start") {
                self.start_time = Some(raw_time);
                self.ready.push_back(DecodedRecord::SessionSummary(SessionSummary {
                    start_time: Some(raw_time),
                    ..SessionSummary::default()
                }));
                return Ok(());
            }
            if self.start_required {
                return Err(ImportError::missing_metadata(
                    "activity start entry",
                    self.path.clone(),
                ));
            }
        }

        // Belt recordings deliver beat intervals instead of an HR channel;
        // forwarded as their own stream, they never form samples here
        if let Some(rr) = data.get("R-R") {
            let intervals_ms = beat_intervals(rr);
            if !intervals_ms.is_empty() {
                self.ready.push_back(DecodedRecord::BeatIntervals(BeatIntervals {
                    time: rounded_time,
                    intervals_ms,
                }));
            }
            return Ok(());
        }

        if let Some(start) = self.start_time
            && rounded_time <= start
        {
            return Ok(());
        }

        self.apply_pause_state(data, raw_time);

        // Entries after a pause started are dropped until the pause ends;
        // the entry that opened the pause still counts
        if self.paused && raw_time > self.pause_start {
            return Ok(());
        }

        match lap_type(data) {
            Some("Manual") | Some("Distance") => {
                self.lap_count += 1;
                self.ready.push_back(DecodedRecord::Lap(LapFragment {
                    device_time: rounded_time,
                    label: None,
                }));
            }
            _ => {}
        }

        if let Some(sample) = build_sample(data, rounded_time) {
            self.push_sample(sample);
        }
        Ok(())
    }

    fn apply_pause_state(&mut self, data: &Value, raw_time: i64) {
        let Some(state) = data.get("Pause").and_then(|p| p.get("State")).and_then(bool_value)
        else {
            return;
        };
        if state && !self.paused {
            self.paused = true;
            self.pause_start = raw_time;
            self.ready.push_back(DecodedRecord::Timer(TimerEvent {
                time: raw_time,
                action: TimerAction::Stop,
                reason: PauseReason::Manual,
            }));
        } else if !state && self.paused {
            self.paused = false;
            self.ready.push_back(DecodedRecord::Timer(TimerEvent {
                time: raw_time,
                action: TimerAction::Start,
                reason: PauseReason::Manual,
            }));
        }
    }

    fn push_sample(&mut self, sample: Sample) {
        if let Some(existing) =
            self.window.iter_mut().find(|s| s.absolute_time == sample.absolute_time)
        {
            existing.merge_missing_from(&sample);
            return;
        }

        self.last_sample_time = Some(match self.last_sample_time {
            Some(last) => last.max(sample.absolute_time),
            None => sample.absolute_time,
        });
        self.window.push_back(sample);
        if self.window.len() > LOOKBACK_ENTRIES
            && let Some(settled) = self.window.pop_front()
        {
            self.ready.push_back(DecodedRecord::Sample(settled));
        }
    }

    /// Drain the merge window and close the lap sequence at end of stream.
    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        if self.lap_count > 0
            && let Some(last) = self.last_sample_time
        {
            self.ready.push_back(DecodedRecord::Lap(LapFragment {
                device_time: last,
                label: None,
            }));
        }
        while let Some(sample) = self.window.pop_front() {
            self.ready.push_back(DecodedRecord::Sample(sample));
        }
    }
}

impl RecordDecoder for JsonLogDecoder {
    fn next_record(&mut self) -> Result<Option<DecodedRecord>> {
        loop {
            if let Some(record) = self.ready.pop_front() {
                return Ok(Some(record));
            }
            if self.finished {
                return Ok(None);
            }
            match self.next_entry()? {
                Some(entry) => self.process_entry(&entry)?,
                None => self.finish(),
            }
        }
    }
}

/// Round epoch milliseconds to the nearest whole second, half up.
fn round_to_second(time: i64) -> i64 {
    let within = time.rem_euclid(1000);
    let base = time - within;
    if within >= 500 { base + 1000 } else { base }
}

fn lap_type(data: &Value) -> Option<&str> {
    data.get("Lap").and_then(|lap| lap.get("Type")).and_then(Value::as_str)
}

/// Millisecond beat intervals from an `R-R` entry's `Data` array.
fn beat_intervals(rr: &Value) -> Vec<u32> {
    let Some(values) = rr.get("Data").and_then(Value::as_array) else {
        return Vec::new();
    };
    values
        .iter()
        .filter_map(|value| match value {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .filter_map(|v| u32::try_from(v).ok())
        .collect()
}

/// Accept both JSON booleans and their string spellings.
fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

/// Numbers may arrive as JSON numbers or quoted strings.
fn field_f64(data: &Value, key: &str) -> Option<f64> {
    let value = data.get(key)?;
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn field_f32(data: &Value, key: &str) -> Option<f32> {
    field_f64(data, key).map(|v| v as f32)
}

fn build_sample(data: &Value, time: i64) -> Option<Sample> {
    let mut sample = Sample::at(time);

    if let (Some(latitude), Some(longitude)) =
        (field_f64(data, "Latitude"), field_f64(data, "Longitude"))
    {
        sample.latitude = Some(latitude * RADIANS_TO_DEGREES);
        sample.longitude = Some(longitude * RADIANS_TO_DEGREES);
        sample.altitude = field_f32(data, "GPSAltitude");
    }

    // Barometric altitude fills in when no satellite altitude was delivered
    if sample.altitude.is_none() {
        sample.altitude = field_f32(data, "Altitude");
    }

    // Hz values convert to per-minute in f64; narrowing first would round
    // 2.1 Hz to 125.99999 bpm instead of 126
    sample.heart_rate = field_f64(data, "HR").map(|v| (v * f64::from(HZ_TO_PER_MINUTE)) as f32);
    sample.cadence = field_f64(data, "Cadence").map(|v| (v * f64::from(HZ_TO_PER_MINUTE)) as f32);
    sample.speed = field_f32(data, "Speed");
    sample.power = field_f32(data, "Power");
    sample.power_source = sample.power.is_some().then_some(PowerSource::Sensor);
    sample.temperature = field_f32(data, "Temperature").map(|v| v - KELVIN_OFFSET);
    sample.distance = field_f32(data, "Distance");

    let populated = sample.latitude.is_some()
        || sample.altitude.is_some()
        || sample.heart_rate.is_some()
        || sample.cadence.is_some()
        || sample.speed.is_some()
        || sample.power.is_some()
        || sample.temperature.is_some()
        || sample.distance.is_some();
    populated.then_some(sample)
}
