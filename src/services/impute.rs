use crate::models::table::{Cell, SensorTable};
use crate::services::model::{FeatureRow, InferenceError, Predictor};

/// Fill missing value columns with model predictions.
///
/// Rows with any of humidity, temperature, pm10 or pm2_5 absent are sent to the
/// predictor in a single batch; their four value columns are overwritten with
/// the returned values. All other cells are left untouched. A table with no
/// missing rows is returned as-is without calling the predictor.
pub async fn impute(
    mut table: SensorTable,
    predictor: &dyn Predictor,
) -> Result<SensorTable, InferenceError> {
    let layout = table.layout;

    let missing: Vec<usize> = table
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.has_missing_values(&layout))
        .map(|(i, _)| i)
        .collect();

    if missing.is_empty() {
        return Ok(table);
    }

    let features: Vec<FeatureRow> = missing
        .iter()
        .map(|&i| {
            let row = &table.rows[i];
            FeatureRow {
                unix_timestamp: row.unix_timestamp as f64,
                latitude: row.cells[layout.latitude].as_number(),
                longitude: row.cells[layout.longitude].as_number(),
            }
        })
        .collect();

    let predictions = predictor.predict(&features).await?;
    if predictions.len() != features.len() {
        return Err(InferenceError::Shape {
            expected: features.len(),
            got: predictions.len(),
        });
    }

    tracing::debug!(rows = missing.len(), "Imputed missing readings");

    for (&i, p) in missing.iter().zip(predictions) {
        let cells = &mut table.rows[i].cells;
        cells[layout.humidity] = Cell::Number(p.humidity);
        cells[layout.temperature] = Cell::Number(p.temperature);
        cells[layout.pm10] = Cell::Number(p.pm10);
        cells[layout.pm2_5] = Cell::Number(p.pm2_5);
    }

    Ok(table)
}
