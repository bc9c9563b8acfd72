//! End-to-end import flows through the public API.
//!
//! Each test writes recording files into a scratch directory and drives
//! them through [`Tracklog`], asserting on the registered activities.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;

use tracklog::{BatchOptions, ImportConfig, ImportError, ImportOutcome, Tracklog};

struct Scratch {
    root: PathBuf,
}

impl Scratch {
    fn new(label: &str) -> Self {
        static SEQUENCE: AtomicUsize = AtomicUsize::new(0);
        let unique = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir()
            .join(format!("tracklog-it-{label}-{}-{unique}", std::process::id()));
        std::fs::create_dir_all(&root).expect("create scratch directory");
        Self { root }
    }

    fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root.join(name);
        std::fs::write(&path, bytes).expect("write recording");
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(text.as_bytes()).expect("gzip write");
    encoder.finish().expect("gzip finish")
}

fn json_entry(time: &str, body: &str) -> String {
    format!("{{\"TimeISO8601\":\"{time}\",\"Attributes\":{{\"Sample\":{{{body}}}}}}}")
}

fn json_log(entries: &[String]) -> Vec<u8> {
    gzip(&format!("{{\"Samples\":[{}]}}\n", entries.join(",")))
}

const DEVICE_LOG_RIDE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
<DeviceLog>\
  <Header>\
    <Energy>836800</Energy>\
    <PeakTrainingEffect>3.1</PeakTrainingEffect>\
    <DateTime>2016-06-04T09:00:00</DateTime>\
  </Header>\
  <Device>\
    <Name>Ambit3 Peak</Name>\
    <SW>2.4.1</SW>\
  </Device>\
  <Samples>\
    <Sample><SampleType>gps-base</SampleType><UTC>2016-06-04T09:00:00Z</UTC>\
      <Latitude>0.5</Latitude><Longitude>0.25</Longitude></Sample>\
    <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:00:00Z</UTC>\
      <HR>2.0</HR><Distance>0</Distance></Sample>\
    <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:00:01Z</UTC>\
      <HR>2.0</HR><Distance>5</Distance></Sample>\
    <Sample><UTC>2016-06-04T09:00:02Z</UTC>\
      <Events><Lap><Type>Manual</Type></Lap></Events></Sample>\
    <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:00:02Z</UTC>\
      <HR>2.5</HR><Distance>10</Distance></Sample>\
    <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:00:03Z</UTC>\
      <HR>2.5</HR><Distance>15</Distance></Sample>\
    <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:00:04Z</UTC>\
      <HR>2.0</HR><Distance>20</Distance></Sample>\
    <Sample><SampleType>gps-base</SampleType><UTC>2016-06-04T09:00:04Z</UTC>\
      <Latitude>0.6</Latitude><Longitude>0.30</Longitude></Sample>\
  </Samples>\
</DeviceLog>";

#[tokio::test]
async fn device_log_ride_imports_end_to_end() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = Scratch::new("devicelog");
    let path = dir.write("morning.sml", DEVICE_LOG_RIDE.as_bytes());

    let importer = Tracklog::new(ImportConfig::default());
    let outcome = importer.import_file(&path).await?;
    assert!(matches!(outcome, ImportOutcome::Imported(_)));

    let tours = importer.new_tours();
    assert_eq!(tours.len(), 1);
    let tour = &tours[0];

    assert_eq!(tour.samples.len(), 5);
    assert_eq!(tour.device.product.as_deref(), Some("Ambit3 Peak"));
    assert_eq!(tour.device.firmware_version.as_deref(), Some("2.4.1"));

    // 836800 J header energy becomes 200 kcal
    assert_eq!(tour.aggregates.calories_kcal, Some(200));
    assert_eq!(tour.aggregates.training_effect, Some(3.1));
    assert_eq!(tour.aggregates.total_distance, Some(20.0));
    assert_eq!(tour.aggregates.elapsed_time_ms, 4_000);
    assert_eq!(tour.aggregates.max_heart_rate, Some(150.0));

    // GPS fixes bracket the ride at :00 and :04; positions land on every
    // sample, the middle one by interpolation
    let first = tour.samples[0].latitude.unwrap();
    let middle = tour.samples[2].latitude.unwrap();
    let last = tour.samples[4].latitude.unwrap();
    assert!((first - 28.647890).abs() < 1e-4, "first latitude {first}");
    assert!((last - 34.377468).abs() < 1e-4, "last latitude {last}");
    assert!((middle - (first + last) / 2.0).abs() < 1e-6, "middle latitude {middle}");

    // The unlabeled manual lap is numbered and resolved onto its second
    assert_eq!(tour.markers.len(), 1);
    assert_eq!(tour.markers[0].label, "1");
    assert_eq!(tour.markers[0].resolved_sample_index, Some(2));
    assert_eq!(tour.markers[0].distance, Some(10.0));
    Ok(())
}

#[tokio::test]
async fn legacy_rootless_log_imports() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let corpus = "<?xml version=\"1.0\"?>\
        <Header><Energy>150</Energy></Header>\
        <Samples>\
          <Sample><UTC>2007-08-11T14:30:00Z</UTC>\
            <HR>140</HR><Latitude>47.25</Latitude><Longitude>8.5</Longitude></Sample>\
          <Sample><UTC>2007-08-11T14:30:05Z</UTC>\
            <HR>142</HR><Latitude>47.26</Latitude><Longitude>8.51</Longitude></Sample>\
        </Samples>";

    let dir = Scratch::new("legacy");
    let path = dir.write("2007-08-11.xml", corpus.as_bytes());

    let importer = Tracklog::new(ImportConfig::default());
    let outcome = importer.import_file(&path).await?;
    assert!(matches!(outcome, ImportOutcome::Imported(_)));

    let tours = importer.new_tours();
    let tour = &tours[0];
    assert_eq!(tour.samples.len(), 2);
    assert_eq!(tour.samples[0].latitude, Some(47.25));
    assert_eq!(tour.samples[1].longitude, Some(8.51));
    assert_eq!(tour.aggregates.calories_kcal, Some(150));
    assert_eq!(tour.aggregates.elapsed_time_ms, 5_000);
    assert_eq!(tour.aggregates.max_heart_rate, Some(142.0));
    Ok(())
}

#[tokio::test]
async fn reimport_of_the_same_recording_is_skipped() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = Scratch::new("idempotent");
    let path = dir.write("morning.sml", DEVICE_LOG_RIDE.as_bytes());

    let importer = Tracklog::new(ImportConfig::default());
    let first = importer.import_file(&path).await?;
    let second = importer.import_file(&path).await?;

    let ImportOutcome::Imported(identity) = first else {
        panic!("expected first import to register, got {first:?}");
    };
    assert_eq!(second, ImportOutcome::SkippedDuplicate(identity));
    assert_eq!(importer.new_tours().len(), 1);
    Ok(())
}

#[tokio::test]
async fn exceeded_slices_collapse_when_configured() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    // A ten minute recording hole between :01 and 09:10:01
    let corpus = "<DeviceLog><Samples>\
        <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:00:00Z</UTC>\
          <HR>2.0</HR></Sample>\
        <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:00:01Z</UTC>\
          <HR>2.0</HR></Sample>\
        <Sample><SampleType>periodic</SampleType><UTC>2016-06-04T09:10:01Z</UTC>\
          <HR>2.0</HR></Sample>\
      </Samples></DeviceLog>";

    let dir = Scratch::new("collapse");
    let path = dir.write("gap.sml", corpus.as_bytes());

    let mut config = ImportConfig::default();
    config.compress_exceeded_slices = true;
    let importer = Tracklog::new(config);
    importer.import_file(&path).await?;

    let tours = importer.new_tours();
    let tour = &tours[0];

    // The hole shrinks to one slice and leaves a marker naming its length
    assert_eq!(tour.aggregates.elapsed_time_ms, 2_000);
    assert_eq!(tour.samples.len(), 3);
    assert_eq!(tour.markers.len(), 1);
    assert_eq!(tour.markers[0].label, "10:00");
    assert_eq!(tour.markers[0].resolved_sample_index, Some(2));
    Ok(())
}

#[tokio::test]
async fn split_json_recording_merges_across_a_batch() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = Scratch::new("jsonparts");
    let part_one = dir.write(
        "tour-1.json.gz",
        &json_log(&[
            json_entry("2018-07-01T08:00:00Z", "\"Lap\":{\"Type\":\"Start\"}"),
            json_entry("2018-07-01T08:00:01Z", "\"HR\":2.0,\"Distance\":10"),
            json_entry("2018-07-01T08:00:02Z", "\"HR\":2.0,\"Distance\":20"),
            json_entry("2018-07-01T08:00:03Z", "\"HR\":2.0,\"Distance\":30"),
        ]),
    );
    let part_two = dir.write(
        "tour-2.json.gz",
        &json_log(&[
            json_entry("2018-07-01T08:00:04Z", "\"HR\":2.2,\"Distance\":40"),
            json_entry("2018-07-01T08:00:05Z", "\"HR\":2.2,\"Distance\":50"),
        ]),
    );

    let importer = Tracklog::new(ImportConfig::default());
    let summary =
        importer.import_batch(vec![part_two, part_one], BatchOptions::default()).await;

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.extended, 1);
    assert_eq!(summary.failed, 0);

    let tours = importer.new_tours();
    assert_eq!(tours.len(), 1);
    assert_eq!(tours[0].samples.len(), 5);
    assert_eq!(tours[0].aggregates.total_distance, Some(40.0));
    assert_eq!(tours[0].aggregates.max_heart_rate, Some(132.0));
    Ok(())
}

#[tokio::test]
async fn split_recording_numbers_laps_in_one_sequence() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = Scratch::new("jsonlaps");
    let part_one = dir.write(
        "tour-1.json.gz",
        &json_log(&[
            json_entry("2018-07-01T08:00:00Z", "\"Lap\":{\"Type\":\"Start\"}"),
            json_entry("2018-07-01T08:00:01Z", "\"HR\":2.0,\"Distance\":10"),
            json_entry(
                "2018-07-01T08:00:02Z",
                "\"HR\":2.0,\"Distance\":20,\"Lap\":{\"Type\":\"Manual\"}",
            ),
            json_entry("2018-07-01T08:00:03Z", "\"HR\":2.0,\"Distance\":30"),
        ]),
    );
    let part_two = dir.write(
        "tour-2.json.gz",
        &json_log(&[
            json_entry("2018-07-01T08:00:04Z", "\"HR\":2.2,\"Distance\":40"),
            json_entry(
                "2018-07-01T08:00:05Z",
                "\"HR\":2.2,\"Distance\":50,\"Lap\":{\"Type\":\"Manual\"}",
            ),
            json_entry("2018-07-01T08:00:06Z", "\"HR\":2.2,\"Distance\":60"),
        ]),
    );

    let importer = Tracklog::new(ImportConfig::default());
    let summary =
        importer.import_batch(vec![part_two, part_one], BatchOptions::default()).await;

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.extended, 1);
    assert_eq!(summary.failed, 0);

    // Each part closes with a terminal lap, so two manual laps across the
    // parts make four markers; the continuation's restart at "1" must pick
    // up after the first part's numbering
    let tours = importer.new_tours();
    assert_eq!(tours.len(), 1);
    let tour = &tours[0];
    assert_eq!(tour.samples.len(), 6);

    let labels: Vec<&str> = tour.markers.iter().map(|m| m.label.as_str()).collect();
    assert_eq!(labels, vec!["1", "2", "3", "4"]);
    assert_eq!(tour.markers[2].resolved_sample_index, Some(4));
    assert_eq!(tour.samples[4].marker.as_deref(), Some("3"));
    Ok(())
}

#[tokio::test]
async fn belt_only_log_derives_heart_rate_from_beats() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = Scratch::new("belt");
    // No HR channel anywhere; the strap delivers beat intervals instead
    let path = dir.write(
        "strap.json.gz",
        &json_log(&[
            json_entry("2018-07-01T08:00:00Z", "\"Lap\":{\"Type\":\"Start\"}"),
            json_entry("2018-07-01T08:00:01Z", "\"R-R\":{\"Data\":[500,500,600,400]}"),
            json_entry("2018-07-01T08:00:01Z", "\"Speed\":3.0,\"Distance\":10"),
            json_entry("2018-07-01T08:00:02Z", "\"Speed\":3.0,\"Distance\":20"),
            json_entry("2018-07-01T08:00:03Z", "\"Speed\":3.0,\"Distance\":30"),
        ]),
    );

    let importer = Tracklog::new(ImportConfig::default());
    let outcome = importer.import_file(&path).await?;
    assert!(matches!(outcome, ImportOutcome::Imported(_)));

    let tours = importer.new_tours();
    let tour = &tours[0];
    assert_eq!(tour.samples.len(), 3);

    // Two 500 ms beats reach :02 and the 600+400 pair reaches :03; nothing
    // precedes the first sample
    let rates: Vec<Option<f32>> = tour.samples.iter().map(|s| s.heart_rate).collect();
    assert_eq!(rates, vec![None, Some(120.0), Some(120.0)]);
    assert_eq!(tour.aggregates.max_heart_rate, Some(120.0));
    Ok(())
}

#[tokio::test]
async fn batch_survives_corrupt_and_unsupported_files() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = Scratch::new("mixed");
    let good = dir.write("morning.sml", DEVICE_LOG_RIDE.as_bytes());
    let corrupt = dir.write("broken.fit", b"definitely not a recording");
    let unsupported = dir.write("notes.txt", b"ride felt great");

    let importer = Tracklog::new(ImportConfig::default());
    let summary = importer
        .import_batch(vec![corrupt, unsupported, good], BatchOptions::default())
        .await;

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.outcomes.len(), 3);
    assert_eq!(importer.new_tours().len(), 1);
    Ok(())
}

#[tokio::test]
async fn unsupported_extension_reports_a_data_error() -> Result<()> {
    let _ = tracing_subscriber::fmt::try_init();
    let dir = Scratch::new("unsupported");
    let path = dir.write("activity.tcx", b"<TrainingCenterDatabase/>");

    let importer = Tracklog::new(ImportConfig::default());
    let error = importer.import_file(&path).await.unwrap_err();

    assert!(matches!(error, ImportError::Unsupported { .. }));
    assert!(error.is_data_error());
    assert!(!error.recovery_suggestions().is_empty());
    Ok(())
}
