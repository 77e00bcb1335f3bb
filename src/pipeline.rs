//! The row pipeline: positional id assignment and normalization of export
//! rows into indexable workout-set documents.
//!
//! Fitbod exports carry no per-set identifier, and similar sets performed on
//! the same day are indistinguishable. The pipeline therefore numbers the
//! rows, the oldest set being number 1, and uses that number as the document
//! id. The assumption is that old workout data is never modified; if the
//! history changes, re-index everything with a day window of 0.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Header written by [`rewrite_csv`]: the export's columns prefixed with `id`.
pub const REWRITTEN_HEADER: [&str; 8] = [
    "id",
    "timestamp",
    "exercise",
    "sets",
    "reps",
    "weight",
    "is_warmup",
    "note",
];

/// Fatal pipeline errors. None of these are retried; any of them aborts the
/// whole ingestion run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("CSV error")]
    Csv(#[from] csv::Error),

    #[error("unparseable timestamp: {value:?}")]
    Timestamp { value: String },

    #[error("field {field:?} is not numeric: {value:?}")]
    NonNumeric { field: &'static str, value: String },

    #[error("row is missing field {0:?}")]
    MissingField(&'static str),
}

/// One data row of the export, field values in file order (oldest row first).
/// Position is its only identity; field names matter only to the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow(pub Vec<String>);

/// A raw row plus its 1-based position among the data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifiedRow {
    pub id: u64,
    pub fields: Vec<String>,
}

/// A field value after numeric coercion. Serialized untagged, so a `Number`
/// lands in the document as a JSON number and a `Text` as a string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    /// Store the float when the string parses as one, keep the text otherwise.
    pub fn coerce(raw: &str) -> Self {
        match raw.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

/// A normalized workout set, ready to index.
///
/// `doc_id` is the document key and never appears in the document body; the
/// `id` field inside the body is the same value after coercion, which makes
/// it a float. Indexing keys off `doc_id`, so the coerced value is left as-is.
#[derive(Debug, Clone, Serialize)]
pub struct WorkoutSet {
    #[serde(skip)]
    pub doc_id: u64,
    pub id: Value,
    pub timestamp: DateTime<Utc>,
    pub exercise: Value,
    pub sets: Value,
    pub reps: Value,
    pub weight: Value,
    pub is_warmup: Value,
    pub note: Value,
    pub volume: f64,
}

/// Assign positional ids: the first row (assumed oldest) gets 1, ids increase
/// monotonically in input order.
pub fn assign_ids(rows: Vec<RawRow>) -> Vec<IdentifiedRow> {
    rows.into_iter()
        .zip(1u64..)
        .map(|(RawRow(fields), id)| IdentifiedRow { id, fields })
        .collect()
}

/// Rewrite the export in place: the header becomes [`REWRITTEN_HEADER`] and
/// every data row is prefixed with its id, all fields quoted.
///
/// Destructive overwrite of `path`, and deliberately not idempotent: running
/// it on its own output prefixes ids a second time. The driver runs it
/// exactly once per downloaded attachment.
pub fn rewrite_csv(path: &Path) -> Result<(), PipelineError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(RawRow(record.iter().map(str::to_string).collect()));
    }
    drop(reader);

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .flexible(true)
        .from_path(path)?;
    writer.write_record(REWRITTEN_HEADER)?;
    for row in assign_ids(rows) {
        let mut out = Vec::with_capacity(row.fields.len() + 1);
        out.push(row.id.to_string());
        out.extend(row.fields);
        writer.write_record(&out)?;
    }
    writer.flush()?;
    Ok(())
}

/// Parse a rewritten export into workout sets, keeping rows strictly newer
/// than `nr_of_days` days ago. A window of 0 means no filtering: the full
/// history is returned.
pub fn normalize_csv(path: &Path, nr_of_days: u32) -> Result<Vec<WorkoutSet>, PipelineError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let headers = reader.headers()?.clone();
    let now = Utc::now();

    let mut sets = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(set) = normalize_record(&headers, &record, now, nr_of_days)? {
            sets.push(set);
        }
    }

    tracing::info!(
        "Found {} sets within the past {} days",
        sets.len(),
        nr_of_days
    );
    Ok(sets)
}

/// Normalize one row against a fixed `now`. Returns `None` when the row falls
/// outside the day window. The window bound is a strict inequality: a row
/// stamped exactly `now - nr_of_days` days is excluded.
pub fn normalize_record(
    headers: &StringRecord,
    record: &StringRecord,
    now: DateTime<Utc>,
    nr_of_days: u32,
) -> Result<Option<WorkoutSet>, PipelineError> {
    let raw_timestamp = field(headers, record, "timestamp")?;
    let timestamp = parse_timestamp(raw_timestamp)?;
    if nr_of_days != 0 {
        // A window too large to represent as a datetime has no cutoff; every
        // row is newer than it.
        let cutoff = Duration::try_days(i64::from(nr_of_days))
            .and_then(|window| now.checked_sub_signed(window));
        if let Some(cutoff) = cutoff {
            if timestamp <= cutoff {
                return Ok(None);
            }
        }
    }

    let raw_id = field(headers, record, "id")?;
    let doc_id: u64 = raw_id
        .trim()
        .parse()
        .map_err(|_| PipelineError::NonNumeric {
            field: "id",
            value: raw_id.to_string(),
        })?;

    let raw_reps = field(headers, record, "reps")?;
    let raw_weight = field(headers, record, "weight")?;
    let reps = Value::coerce(raw_reps);
    let weight = Value::coerce(raw_weight);
    let volume = match (weight.as_number(), reps.as_number()) {
        (Some(w), Some(r)) => w * r,
        (None, _) => {
            return Err(PipelineError::NonNumeric {
                field: "weight",
                value: raw_weight.to_string(),
            })
        }
        (_, None) => {
            return Err(PipelineError::NonNumeric {
                field: "reps",
                value: raw_reps.to_string(),
            })
        }
    };

    Ok(Some(WorkoutSet {
        doc_id,
        id: Value::coerce(raw_id),
        timestamp,
        exercise: Value::coerce(field(headers, record, "exercise")?),
        sets: Value::coerce(field(headers, record, "sets")?),
        reps,
        weight,
        is_warmup: Value::coerce(field(headers, record, "is_warmup")?),
        note: Value::coerce(field(headers, record, "note")?),
        volume,
    }))
}

fn field<'a>(
    headers: &StringRecord,
    record: &'a StringRecord,
    name: &'static str,
) -> Result<&'a str, PipelineError> {
    headers
        .iter()
        .position(|h| h == name)
        .and_then(|idx| record.get(idx))
        .ok_or(PipelineError::MissingField(name))
}

const ZONED_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S %z", "%Y-%m-%d %H:%M:%S%.f %z"];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y"];

/// Permissive timestamp parsing: RFC 3339 and 2822, then the formats seen in
/// Fitbod exports. Naive values carry no zone and are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, PipelineError> {
    let trimmed = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(dt.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            if let Some(dt) = date.and_hms_opt(0, 0, 0) {
                return Ok(dt.and_utc());
            }
        }
    }

    Err(PipelineError::Timestamp {
        value: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn raw(fields: &[&str]) -> RawRow {
        RawRow(fields.iter().map(|f| f.to_string()).collect())
    }

    fn record_of(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    fn rewritten_headers() -> StringRecord {
        StringRecord::from(REWRITTEN_HEADER.to_vec())
    }

    fn export_file(rows: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp csv");
        writeln!(file, "Date,Exercise,Sets,Reps,Weight,isWarmup,Note").expect("write header");
        for row in rows {
            writeln!(file, "{row}").expect("write row");
        }
        file.flush().expect("flush");
        file
    }

    #[test]
    fn ids_are_assigned_oldest_first() {
        let rows = vec![raw(&["a"]), raw(&["b"]), raw(&["c"])];
        let identified = assign_ids(rows);
        assert_eq!(
            identified.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(identified[2].fields, vec!["c".to_string()]);
    }

    #[test]
    fn assign_ids_on_empty_input_is_empty() {
        assert!(assign_ids(Vec::new()).is_empty());
    }

    #[test]
    fn rewrite_prefixes_every_row_and_fixes_the_header() {
        let file = export_file(&[
            "2020-01-01 10:00:00 +0000,Bench Press,1,5,135.0,false,",
            "2020-01-02 10:00:00 +0000,Squat,1,5,225.0,false,pr attempt",
        ]);

        rewrite_csv(file.path()).expect("rewrite");

        let content = std::fs::read_to_string(file.path()).expect("read back");
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("\"id\",\"timestamp\",\"exercise\",\"sets\",\"reps\",\"weight\",\"is_warmup\",\"note\"")
        );
        assert!(lines.next().expect("row 1").starts_with("\"1\","));
        assert!(lines.next().expect("row 2").starts_with("\"2\","));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn rewrite_of_header_only_file_keeps_just_the_header() {
        let file = export_file(&[]);
        rewrite_csv(file.path()).expect("rewrite");

        let content = std::fs::read_to_string(file.path()).expect("read back");
        assert_eq!(content.lines().count(), 1);
    }

    // Rewriting is not idempotent: a second pass prefixes ids again, leaving
    // 9-column rows. The driver must apply the rewrite at most once per file.
    #[test]
    fn rewrite_applied_twice_doubles_the_id_prefix() {
        let file = export_file(&["2020-01-01 10:00:00 +0000,Bench Press,1,5,135.0,false,"]);

        rewrite_csv(file.path()).expect("first rewrite");
        rewrite_csv(file.path()).expect("second rewrite");

        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(file.path())
            .expect("open");
        let record = reader
            .records()
            .next()
            .expect("one row")
            .expect("valid row");
        assert_eq!(record.len(), 9);
        assert_eq!(record.get(0), Some("1"));
        assert_eq!(record.get(1), Some("1"));
    }

    #[test]
    fn coercion_keeps_numbers_and_leaves_text_alone() {
        assert_eq!(Value::coerce("135.5"), Value::Number(135.5));
        assert_eq!(Value::coerce("5"), Value::Number(5.0));
        assert_eq!(Value::coerce("true"), Value::Text("true".to_string()));
        assert_eq!(Value::coerce(""), Value::Text(String::new()));
    }

    #[test]
    fn timestamps_parse_across_formats() {
        for value in [
            "2019-08-09 17:35:34 +0000",
            "2019-08-09T17:35:34Z",
            "2019-08-09 17:35:34",
            "08/09/2019 17:35",
            "2019-08-09",
        ] {
            let parsed = parse_timestamp(value).expect(value);
            assert_eq!(parsed.date_naive().to_string(), "2019-08-09");
        }
    }

    #[test]
    fn garbage_timestamp_is_a_fatal_error() {
        let err = parse_timestamp("yesterday-ish").expect_err("should fail");
        assert!(matches!(err, PipelineError::Timestamp { .. }));
    }

    #[test]
    fn zero_day_window_keeps_ancient_rows() {
        let headers = rewritten_headers();
        let record = record_of(&[
            "1",
            "1999-01-01 00:00:00 +0000",
            "Bench Press",
            "1",
            "5",
            "135.0",
            "false",
            "",
        ]);
        let set = normalize_record(&headers, &record, Utc::now(), 0)
            .expect("normalize")
            .expect("row kept");
        assert_eq!(set.doc_id, 1);
        assert_eq!(set.volume, 675.0);
    }

    #[test]
    fn row_exactly_on_the_window_boundary_is_excluded() {
        let now = Utc::now();
        let boundary = now - Duration::days(7);
        let headers = rewritten_headers();
        let record = record_of(&[
            "1",
            &boundary.to_rfc3339(),
            "Bench Press",
            "1",
            "5",
            "135.0",
            "false",
            "",
        ]);
        let kept = normalize_record(&headers, &record, now, 7).expect("normalize");
        assert!(kept.is_none());

        let just_inside = boundary + Duration::seconds(1);
        let record = record_of(&[
            "1",
            &just_inside.to_rfc3339(),
            "Bench Press",
            "1",
            "5",
            "135.0",
            "false",
            "",
        ]);
        let kept = normalize_record(&headers, &record, now, 7).expect("normalize");
        assert!(kept.is_some());
    }

    #[test]
    fn absurdly_large_window_keeps_every_row_without_panicking() {
        let headers = rewritten_headers();
        let record = record_of(&[
            "1",
            "1999-01-01 00:00:00 +0000",
            "Bench Press",
            "1",
            "5",
            "135.0",
            "false",
            "",
        ]);
        let set = normalize_record(&headers, &record, Utc::now(), u32::MAX)
            .expect("normalize")
            .expect("row kept");
        assert_eq!(set.doc_id, 1);
    }

    #[test]
    fn coerced_id_becomes_a_number_while_doc_id_stays_integral() {
        let headers = rewritten_headers();
        let record = record_of(&[
            "42",
            "2020-01-01 10:00:00 +0000",
            "Squat",
            "3",
            "8",
            "185.0",
            "false",
            "",
        ]);
        let set = normalize_record(&headers, &record, Utc::now(), 0)
            .expect("normalize")
            .expect("row kept");
        assert_eq!(set.doc_id, 42);
        assert_eq!(set.id, Value::Number(42.0));
    }

    #[test]
    fn non_numeric_weight_fails_volume_computation() {
        let headers = rewritten_headers();
        let record = record_of(&[
            "1",
            "2020-01-01 10:00:00 +0000",
            "Plank",
            "1",
            "1",
            "bodyweight",
            "false",
            "",
        ]);
        let err = normalize_record(&headers, &record, Utc::now(), 0).expect_err("should fail");
        match err {
            PipelineError::NonNumeric { field, value } => {
                assert_eq!(field, "weight");
                assert_eq!(value, "bodyweight");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn non_numeric_reps_fails_volume_computation() {
        let headers = rewritten_headers();
        let record = record_of(&[
            "1",
            "2020-01-01 10:00:00 +0000",
            "Plank",
            "1",
            "max",
            "135.0",
            "false",
            "",
        ]);
        let err = normalize_record(&headers, &record, Utc::now(), 0).expect_err("should fail");
        assert!(matches!(
            err,
            PipelineError::NonNumeric { field: "reps", .. }
        ));
    }

    #[test]
    fn normalize_preserves_input_order_and_filters_old_rows() {
        let today = Utc::now();
        let old = today - Duration::days(30);
        let file = export_file(&[
            &format!("{},Bench Press,1,5,135.0,false,", old.to_rfc3339()),
            &format!("{},Squat,1,5,225.0,false,", today.to_rfc3339()),
        ]);

        rewrite_csv(file.path()).expect("rewrite");

        let all = normalize_csv(file.path(), 0).expect("normalize all");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].doc_id, 1);
        assert_eq!(all[1].doc_id, 2);

        let recent = normalize_csv(file.path(), 7).expect("normalize recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].doc_id, 2);
        assert_eq!(recent[0].volume, 225.0 * 5.0);
    }

    #[test]
    fn workout_set_serializes_with_untagged_values() {
        let headers = rewritten_headers();
        let record = record_of(&[
            "3",
            "2020-01-01 10:00:00 +0000",
            "Deadlift",
            "1",
            "5",
            "315.0",
            "false",
            "felt heavy",
        ]);
        let set = normalize_record(&headers, &record, Utc::now(), 0)
            .expect("normalize")
            .expect("row kept");

        let doc = serde_json::to_value(&set).expect("serialize");
        assert!(doc.get("doc_id").is_none());
        assert_eq!(doc["id"], serde_json::json!(3.0));
        assert_eq!(doc["exercise"], serde_json::json!("Deadlift"));
        assert_eq!(doc["weight"], serde_json::json!(315.0));
        assert_eq!(doc["volume"], serde_json::json!(1575.0));
        assert_eq!(doc["note"], serde_json::json!("felt heavy"));
    }
}
