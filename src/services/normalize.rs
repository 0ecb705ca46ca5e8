use chrono::NaiveDateTime;

use crate::models::table::{
    Cell, ColumnLayout, RawTable, SensorRow, SensorTable, DEVICE_ID, HUMIDITY, LATITUDE,
    LONGITUDE, PM10, PM2_5, REQUIRED_COLUMNS, TEMPERATURE, TIMESTAMP,
};

/// Exact timestamp format accepted in uploads.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Decode uploaded bytes as a headed CSV table.
///
/// Any error here means the content is not tabular at all.
pub fn parse_csv(bytes: &[u8]) -> Result<RawTable, ParseError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if headers.iter().all(String::is_empty) {
        return Err(ParseError::Empty);
    }

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        records.push(record.iter().map(str::to_string).collect());
    }

    Ok(RawTable { headers, records })
}

/// Normalize a raw table.
///
/// - parses `timestamp` and replaces it with epoch seconds
/// - turns missing-value sentinels into [`Cell::Absent`] in every column
/// - stable-sorts by `(device_id, unix_timestamp)`, device ids by numeric value
///   where they have one but written back as uploaded
///
/// Fails as a whole on the first bad row.
pub fn normalize(raw: &RawTable) -> Result<SensorTable, NormalizeError> {
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| raw.column(c).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(NormalizeError::MissingColumns(missing.join(", ")));
    }

    let ts_idx = raw.column(TIMESTAMP).unwrap_or_default();
    let kept: Vec<usize> = (0..raw.headers.len()).filter(|&i| i != ts_idx).collect();
    let columns: Vec<String> = kept.iter().map(|&i| raw.headers[i].clone()).collect();

    let position = |name: &str| columns.iter().position(|c| c == name).unwrap_or_default();
    let layout = ColumnLayout {
        device_id: position(DEVICE_ID),
        latitude: position(LATITUDE),
        longitude: position(LONGITUDE),
        humidity: position(HUMIDITY),
        temperature: position(TEMPERATURE),
        pm10: position(PM10),
        pm2_5: position(PM2_5),
    };

    let mut rows = Vec::with_capacity(raw.records.len());
    for (line, record) in raw.records.iter().enumerate() {
        // Header is line 1.
        let line = line + 2;
        let unix_timestamp = parse_timestamp(&record[ts_idx]).ok_or_else(|| {
            NormalizeError::BadTimestamp {
                line,
                value: record[ts_idx].clone(),
            }
        })?;

        let cells: Vec<Cell> = kept
            .iter()
            .enumerate()
            .map(|(idx, &i)| {
                if idx == layout.device_id {
                    Cell::identifier(&record[i])
                } else {
                    Cell::from_raw(&record[i])
                }
            })
            .collect();

        for idx in layout.numeric() {
            if let Cell::Text(value) = &cells[idx] {
                return Err(NormalizeError::NotNumeric {
                    line,
                    column: columns[idx].clone(),
                    value: value.clone(),
                });
            }
        }

        rows.push((
            cells[layout.device_id].id_key(),
            SensorRow {
                cells,
                unix_timestamp,
            },
        ));
    }

    rows.sort_by(|(a_key, a), (b_key, b)| {
        a_key
            .sort_cmp(b_key)
            .then_with(|| a.cells[layout.device_id].sort_cmp(&b.cells[layout.device_id]))
            .then(a.unix_timestamp.cmp(&b.unix_timestamp))
    });
    let rows = rows.into_iter().map(|(_, row)| row).collect();

    Ok(SensorTable {
        columns,
        layout,
        rows,
    })
}

/// Parse `YYYY-MM-DD HH:MM:SS UTC` into non-negative epoch seconds.
fn parse_timestamp(value: &str) -> Option<i64> {
    let parsed = NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT).ok()?;
    let secs = parsed.and_utc().timestamp();
    (secs >= 0).then_some(secs)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("CSV decoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("File has no header row")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Line {line}: timestamp {value:?} does not match YYYY-MM-DD HH:MM:SS UTC")]
    BadTimestamp { line: usize, value: String },

    #[error("Line {line}: column {column} holds non-numeric value {value:?}")]
    NotNumeric {
        line: usize,
        column: String,
        value: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::table::UNIX_TIMESTAMP;

    const HEADER: &str = "device_id,timestamp,latitude,longitude,humidity,temperature,pm10,pm2_5";

    fn table(rows: &[&str]) -> RawTable {
        let mut csv = String::from(HEADER);
        for row in rows {
            csv.push('\n');
            csv.push_str(row);
        }
        parse_csv(csv.as_bytes()).unwrap()
    }

    #[test]
    fn test_timestamp_becomes_epoch_column() {
        let raw = table(&["dev-1,2024-01-01 00:00:00 UTC,1.5,36.8,60,21,40,12"]);
        let normalized = normalize(&raw).unwrap();

        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized.rows[0].unix_timestamp, 1_704_067_200);
        assert!(!normalized.columns.iter().any(|c| c == TIMESTAMP));
        assert!(!normalized.columns.iter().any(|c| c == UNIX_TIMESTAMP));
    }

    #[test]
    fn test_rows_sorted_by_device_then_time() {
        let raw = table(&[
            "dev-b,2024-01-01 00:00:10 UTC,1.5,36.8,60,21,40,12",
            "dev-a,2024-01-01 00:00:30 UTC,1.5,36.8,60,21,40,12",
            "dev-b,2024-01-01 00:00:05 UTC,1.5,36.8,60,21,40,12",
            "dev-a,2024-01-01 00:00:20 UTC,1.5,36.8,60,21,40,12",
        ]);
        let normalized = normalize(&raw).unwrap();

        let order: Vec<(String, i64)> = normalized
            .rows
            .iter()
            .map(|r| match &r.cells[normalized.layout.device_id] {
                Cell::Text(d) => (d.clone(), r.unix_timestamp % 100),
                other => panic!("unexpected device id {other:?}"),
            })
            .collect();

        assert_eq!(
            order,
            vec![
                ("dev-a".to_string(), 20),
                ("dev-a".to_string(), 30),
                ("dev-b".to_string(), 5),
                ("dev-b".to_string(), 10),
            ]
        );
    }

    #[test]
    fn test_numeric_device_ids_written_verbatim() {
        let raw = table(&[
            "12345678901234567891,2024-01-01 00:00:00 UTC,1.5,36.8,60,21,40,12",
            "10,2024-01-01 00:00:00 UTC,1.5,36.8,60,21,40,12",
            "2,2024-01-01 00:00:00 UTC,1.5,36.8,60,21,40,12",
        ]);
        let normalized = normalize(&raw).unwrap();

        let ids: Vec<&Cell> = normalized
            .rows
            .iter()
            .map(|r| &r.cells[normalized.layout.device_id])
            .collect();
        assert_eq!(
            ids,
            vec![
                &Cell::Text("2".into()),
                &Cell::Text("10".into()),
                &Cell::Text("12345678901234567891".into()),
            ]
        );

        let csv = String::from_utf8(normalized.to_csv().unwrap()).unwrap();
        assert!(csv.lines().nth(3).unwrap().starts_with("12345678901234567891,"));
    }

    #[test]
    fn test_sort_is_stable_for_equal_keys() {
        let raw = table(&[
            "dev-a,2024-01-01 00:00:00 UTC,1.5,36.8,61,21,40,12",
            "dev-a,2024-01-01 00:00:00 UTC,1.5,36.8,62,21,40,12",
            "dev-a,2024-01-01 00:00:00 UTC,1.5,36.8,63,21,40,12",
        ]);
        let normalized = normalize(&raw).unwrap();
        let humidity: Vec<f64> = normalized
            .rows
            .iter()
            .filter_map(|r| r.cells[normalized.layout.humidity].as_number())
            .collect();
        assert_eq!(humidity, vec![61.0, 62.0, 63.0]);
    }

    #[test]
    fn test_sentinels_nulled_in_every_column() {
        let raw = table(&["0,2024-01-01 00:00:00 UTC,0,N/A,Null,0,N/A,0"]);
        let normalized = normalize(&raw).unwrap();
        let row = &normalized.rows[0];

        assert!(row.cells.iter().all(Cell::is_absent));
        assert!(row.has_missing_values(&normalized.layout));
    }

    #[test]
    fn test_bad_timestamp_fails_whole_table() {
        let raw = table(&[
            "dev-1,2024-01-01 00:00:00 UTC,1.5,36.8,60,21,40,12",
            "dev-1,2024-01-01T00:00:00Z,1.5,36.8,60,21,40,12",
        ]);
        match normalize(&raw) {
            Err(NormalizeError::BadTimestamp { line, value }) => {
                assert_eq!(line, 3);
                assert_eq!(value, "2024-01-01T00:00:00Z");
            }
            other => panic!("expected BadTimestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_pre_epoch_timestamp_rejected() {
        let raw = table(&["dev-1,1969-12-31 23:59:59 UTC,1.5,36.8,60,21,40,12"]);
        assert!(matches!(normalize(&raw), Err(NormalizeError::BadTimestamp { .. })));
    }

    #[test]
    fn test_missing_column_rejected() {
        let raw = parse_csv(b"device_id,timestamp,latitude\ndev-1,2024-01-01 00:00:00 UTC,1.5").unwrap();
        match normalize(&raw) {
            Err(NormalizeError::MissingColumns(cols)) => {
                assert_eq!(cols, "longitude, humidity, temperature, pm10, pm2_5");
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }
    }

    #[test]
    fn test_text_in_numeric_column_rejected() {
        let raw = table(&["dev-1,2024-01-01 00:00:00 UTC,north,36.8,60,21,40,12"]);
        assert!(matches!(normalize(&raw), Err(NormalizeError::NotNumeric { .. })));
    }

    #[test]
    fn test_extra_columns_carried_through() {
        let raw = parse_csv(
            b"site,device_id,timestamp,latitude,longitude,humidity,temperature,pm10,pm2_5\n\
              kampala,dev-1,2024-01-01 00:00:00 UTC,0.3,32.6,60,21,40,12",
        )
        .unwrap();
        let normalized = normalize(&raw).unwrap();
        assert_eq!(normalized.columns[0], "site");
        assert_eq!(normalized.cell(0, "site"), Some(&Cell::Text("kampala".into())));
    }

    #[test]
    fn test_ragged_csv_is_structural_error() {
        let result = parse_csv(b"a,b,c\n1,2\n");
        assert!(matches!(result, Err(ParseError::Csv(_))));
    }

    #[test]
    fn test_empty_input_is_structural_error() {
        assert!(matches!(parse_csv(b""), Err(ParseError::Empty)));
    }

    #[test]
    fn test_non_utf8_is_structural_error() {
        let bytes = b"device_id,timestamp\n\xff\xfe,2024\n";
        assert!(parse_csv(bytes).is_err());
    }

    #[test]
    fn test_row_count_preserved_and_epochs_non_negative() {
        let rows: Vec<String> = (0..50)
            .map(|i| {
                format!(
                    "dev-{},2024-03-{:02} 12:{:02}:00 UTC,1.5,36.8,{},21,40,12",
                    i % 7,
                    1 + i % 28,
                    i % 60,
                    i % 3
                )
            })
            .collect();
        let refs: Vec<&str> = rows.iter().map(String::as_str).collect();
        let normalized = normalize(&table(&refs)).unwrap();

        assert_eq!(normalized.len(), 50);
        assert!(normalized.rows.iter().all(|r| r.unix_timestamp >= 0));
        for pair in normalized.rows.windows(2) {
            let device = pair[0].cells[0].id_cmp(&pair[1].cells[0]);
            assert!(device.is_lt() || (device.is_eq() && pair[0].unix_timestamp <= pair[1].unix_timestamp));
        }
        // Every third humidity reading was zero.
        let absent = normalized
            .rows
            .iter()
            .filter(|r| r.cells[normalized.layout.humidity].is_absent())
            .count();
        assert_eq!(absent, 17);
    }
}
