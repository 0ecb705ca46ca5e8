//! Sensor CSV fixtures shared by the test suites

/// Header row every upload carries.
pub const UPLOAD_HEADER: &str =
    "device_id,timestamp,latitude,longitude,humidity,temperature,pm10,pm2_5";

/// Header row of processed output: text timestamp dropped, epoch column last.
pub const PROCESSED_HEADERS: [&str; 8] = [
    "device_id",
    "latitude",
    "longitude",
    "humidity",
    "temperature",
    "pm10",
    "pm2_5",
    "unix_timestamp",
];

/// Three readings out of order, two with missing values.
///
/// After processing: device 1 at 00:00 (complete), device 1 at 01:00 (pm10
/// missing), device 2 at 00:00 (humidity missing).
pub const SAMPLE_CSV: &str = "\
device_id,timestamp,latitude,longitude,humidity,temperature,pm10,pm2_5
2,2024-01-01 00:00:00 UTC,45.51,-73.57,Null,19.8,14.0,6.5
1,2024-01-01 01:00:00 UTC,45.50,-73.56,52.3,20.4,N/A,7.4
1,2024-01-01 00:00:00 UTC,45.50,-73.56,51.0,20.1,12.5,7.1
";

/// Every reading present.
pub const COMPLETE_CSV: &str = "\
device_id,timestamp,latitude,longitude,humidity,temperature,pm10,pm2_5
1,2024-01-01 00:00:00 UTC,45.50,-73.56,51.0,20.1,12.5,7.1
1,2024-01-01 01:00:00 UTC,45.50,-73.56,52.3,20.4,13.1,7.4
";

/// Second data row uses an ISO timestamp.
pub const BAD_TIMESTAMP_CSV: &str = "\
device_id,timestamp,latitude,longitude,humidity,temperature,pm10,pm2_5
1,2024-01-01 00:00:00 UTC,45.50,-73.56,51.0,20.1,12.5,7.1
1,2024-01-01T01:00:00Z,45.50,-73.56,52.3,20.4,13.1,7.4
";

/// No pm2_5 column.
pub const MISSING_COLUMN_CSV: &str = "\
device_id,timestamp,latitude,longitude,humidity,temperature,pm10
1,2024-01-01 00:00:00 UTC,45.50,-73.56,51.0,20.1,12.5
";

/// Binary content that cannot be decoded as text.
pub const NOT_A_CSV: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0xff, 0xfe, 0x0d, 0x0a, 0x1a, 0x0a];
