//! In-memory tables for sensor readings.
//!
//! A [`RawTable`] is the uploaded CSV exactly as decoded; a [`SensorTable`] is
//! the normalized form produced by `services::normalize` and consumed by the
//! imputer and the CSV writer.

use std::cmp::Ordering;

pub const DEVICE_ID: &str = "device_id";
pub const TIMESTAMP: &str = "timestamp";
pub const LATITUDE: &str = "latitude";
pub const LONGITUDE: &str = "longitude";
pub const HUMIDITY: &str = "humidity";
pub const TEMPERATURE: &str = "temperature";
pub const PM10: &str = "pm10";
pub const PM2_5: &str = "pm2_5";

/// Name of the derived epoch-seconds column, always written last.
pub const UNIX_TIMESTAMP: &str = "unix_timestamp";

/// Columns that must be present in every upload.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    DEVICE_ID,
    TIMESTAMP,
    LATITUDE,
    LONGITUDE,
    HUMIDITY,
    TEMPERATURE,
    PM10,
    PM2_5,
];

/// Literal markers that mean "no reading".
const MISSING_MARKERS: [&str; 2] = ["N/A", "Null"];

/// A single normalized field.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// No reading. Written as an empty CSV field.
    Absent,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Normalize a raw CSV field.
    ///
    /// `"N/A"`, `"Null"`, empty fields and anything that parses to numeric zero
    /// all become [`Cell::Absent`]. A genuine zero reading is therefore lost.
    pub fn from_raw(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || MISSING_MARKERS.contains(&trimmed) {
            return Cell::Absent;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n == 0.0 => Cell::Absent,
            Ok(n) if n.is_nan() => Cell::Absent,
            Ok(n) => Cell::Number(n),
            Err(_) => Cell::Text(trimmed.to_string()),
        }
    }

    /// Normalize an identifier field. Missing markers still become
    /// [`Cell::Absent`]; anything else is kept as trimmed text so it is written
    /// back exactly as uploaded.
    pub fn identifier(raw: &str) -> Self {
        match Cell::from_raw(raw) {
            Cell::Absent => Cell::Absent,
            _ => Cell::Text(raw.trim().to_string()),
        }
    }

    /// Sort key of an identifier cell: its numeric value where it has one.
    pub fn id_key(&self) -> Cell {
        match self {
            Cell::Text(text) => Cell::from_raw(text),
            other => other.clone(),
        }
    }

    /// Identifier order: by [`id_key`](Self::id_key), then by the text itself.
    pub fn id_cmp(&self, other: &Cell) -> Ordering {
        self.id_key()
            .sort_cmp(&other.id_key())
            .then_with(|| self.sort_cmp(other))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Cell::Absent)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Total order used for sorting identifiers: numbers, then text, then absent.
    pub fn sort_cmp(&self, other: &Cell) -> Ordering {
        match (self, other) {
            (Cell::Number(a), Cell::Number(b)) => a.total_cmp(b),
            (Cell::Text(a), Cell::Text(b)) => a.cmp(b),
            (Cell::Absent, Cell::Absent) => Ordering::Equal,
            (Cell::Number(_), _) => Ordering::Less,
            (_, Cell::Number(_)) => Ordering::Greater,
            (Cell::Text(_), Cell::Absent) => Ordering::Less,
            (Cell::Absent, Cell::Text(_)) => Ordering::Greater,
        }
    }

    fn to_field(&self) -> String {
        match self {
            Cell::Absent => String::new(),
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// The uploaded CSV, decoded but not interpreted.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl RawTable {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// Positions of the named columns inside a [`SensorRow`]'s cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub device_id: usize,
    pub latitude: usize,
    pub longitude: usize,
    pub humidity: usize,
    pub temperature: usize,
    pub pm10: usize,
    pub pm2_5: usize,
}

impl ColumnLayout {
    /// Value columns in prediction order: humidity, temperature, pm10, pm2_5.
    pub fn values(&self) -> [usize; 4] {
        [self.humidity, self.temperature, self.pm10, self.pm2_5]
    }

    pub fn numeric(&self) -> [usize; 6] {
        [
            self.latitude,
            self.longitude,
            self.humidity,
            self.temperature,
            self.pm10,
            self.pm2_5,
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorRow {
    pub cells: Vec<Cell>,
    pub unix_timestamp: i64,
}

impl SensorRow {
    pub fn has_missing_values(&self, layout: &ColumnLayout) -> bool {
        layout.values().iter().any(|&i| self.cells[i].is_absent())
    }
}

/// Normalized readings. `columns` excludes the text timestamp; the derived
/// [`UNIX_TIMESTAMP`] column is held separately on each row.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorTable {
    pub columns: Vec<String>,
    pub layout: ColumnLayout,
    pub rows: Vec<SensorRow>,
}

impl SensorTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Look up a cell by column name.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).map(|r| &r.cells[idx])
    }

    /// Serialize as CSV with a header row.
    pub fn to_csv(&self) -> Result<Vec<u8>, csv::Error> {
        let mut writer = csv::Writer::from_writer(Vec::new());

        let mut header: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        header.push(UNIX_TIMESTAMP);
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut fields: Vec<String> = row.cells.iter().map(Cell::to_field).collect();
            fields.push(row.unix_timestamp.to_string());
            writer.write_record(&fields)?;
        }

        writer
            .into_inner()
            .map_err(|e| csv::Error::from(e.into_error()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_become_absent() {
        for raw in ["N/A", "Null", "0", "0.0", "-0", "", "  "] {
            assert_eq!(Cell::from_raw(raw), Cell::Absent, "raw value {raw:?}");
        }
    }

    #[test]
    fn test_regular_values_are_kept() {
        assert_eq!(Cell::from_raw("45.2"), Cell::Number(45.2));
        assert_eq!(Cell::from_raw(" -1 "), Cell::Number(-1.0));
        assert_eq!(Cell::from_raw("sensor-a"), Cell::Text("sensor-a".to_string()));
        // Only the exact markers count as missing.
        assert_eq!(Cell::from_raw("n/a"), Cell::Text("n/a".to_string()));
    }

    #[test]
    fn test_sort_order_numbers_text_absent() {
        let mut cells = vec![
            Cell::Absent,
            Cell::Text("b".into()),
            Cell::Number(10.0),
            Cell::Text("a".into()),
            Cell::Number(2.0),
        ];
        cells.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            cells,
            vec![
                Cell::Number(2.0),
                Cell::Number(10.0),
                Cell::Text("a".into()),
                Cell::Text("b".into()),
                Cell::Absent,
            ]
        );
    }

    #[test]
    fn test_identifiers_keep_their_text() {
        assert_eq!(
            Cell::identifier("12345678901234567890"),
            Cell::Text("12345678901234567890".into())
        );
        assert_eq!(Cell::identifier(" 007 "), Cell::Text("007".into()));
        assert_eq!(Cell::identifier("1e5"), Cell::Text("1e5".into()));
        assert_eq!(Cell::identifier("N/A"), Cell::Absent);
        assert_eq!(Cell::identifier("1e5").id_key(), Cell::Number(100_000.0));
    }

    #[test]
    fn test_identifier_order_is_numeric_first() {
        let mut cells: Vec<Cell> = ["dev-a", "10", "", "2", "1e1", "007"]
            .iter()
            .map(|raw| Cell::identifier(raw))
            .collect();
        cells.sort_by(|a, b| a.id_cmp(b));
        assert_eq!(
            cells,
            vec![
                Cell::Text("2".into()),
                Cell::Text("007".into()),
                Cell::Text("10".into()),
                Cell::Text("1e1".into()),
                Cell::Text("dev-a".into()),
                Cell::Absent,
            ]
        );
    }

    #[test]
    fn test_to_csv_writes_absent_as_empty() {
        let table = SensorTable {
            columns: vec![DEVICE_ID.into(), LATITUDE.into(), LONGITUDE.into(), HUMIDITY.into(), TEMPERATURE.into(), PM10.into(), PM2_5.into()],
            layout: ColumnLayout {
                device_id: 0,
                latitude: 1,
                longitude: 2,
                humidity: 3,
                temperature: 4,
                pm10: 5,
                pm2_5: 6,
            },
            rows: vec![SensorRow {
                cells: vec![
                    Cell::Text("dev-1".into()),
                    Cell::Number(1.5),
                    Cell::Number(36.25),
                    Cell::Absent,
                    Cell::Number(21.0),
                    Cell::Number(40.5),
                    Cell::Number(12.0),
                ],
                unix_timestamp: 1_700_000_000,
            }],
        };

        let csv = String::from_utf8(table.to_csv().unwrap()).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("device_id,latitude,longitude,humidity,temperature,pm10,pm2_5,unix_timestamp")
        );
        assert_eq!(lines.next(), Some("dev-1,1.5,36.25,,21,40.5,12,1700000000"));
        assert_eq!(lines.next(), None);
    }
}
