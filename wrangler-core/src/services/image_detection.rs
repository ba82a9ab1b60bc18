use tracing::debug;

use crate::config::ImageDetectionConfig;
use crate::table::{ColumnDefinition, ColumnType, FieldValue, Row};

/// Detect TEXT columns holding embedded image data (`data:image/...` URIs).
///
/// The first `sample_size` non-null values of each column are inspected. A
/// column qualifies when any value carries the prefix and either one of
/// those values reaches `min_length`, at least two average half of it, or
/// the prefix appears in at least half of the sample. Columns already
/// flagged are skipped.
pub fn detect_image_columns(
    columns: &[ColumnDefinition],
    rows: &[Row],
    config: &ImageDetectionConfig,
) -> Vec<String> {
    let mut detected = Vec::new();

    for column in columns {
        if column.is_image || column.column_type != ColumnType::Text {
            continue;
        }

        let sample: Vec<&str> = rows
            .iter()
            .filter_map(|row| match row.get(&column.name) {
                Some(FieldValue::Text(s)) => Some(s.as_str()),
                _ => None,
            })
            .take(config.sample_size)
            .collect();
        if sample.is_empty() {
            continue;
        }

        let matching: Vec<usize> = sample
            .iter()
            .filter(|value| value.starts_with(config.prefix.as_str()))
            .map(|value| value.len())
            .collect();
        if matching.is_empty() {
            continue;
        }

        let longest = matching.iter().copied().max().unwrap_or(0);
        let mean = matching.iter().sum::<usize>() as f64 / matching.len() as f64;
        let long_enough = longest >= config.min_length
            || (matching.len() >= 2 && mean >= config.min_length as f64 * 0.5);
        let mostly_images = matching.len() * 2 >= sample.len();

        if long_enough || mostly_images {
            debug!("Detected image column: {}", column.name);
            detected.push(column.name.clone());
        }
    }

    detected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(column: &str, values: &[&str]) -> Vec<Row> {
        values
            .iter()
            .map(|v| {
                let mut row = Row::new();
                row.insert(column.to_string(), FieldValue::from(*v));
                row
            })
            .collect()
    }

    #[test]
    fn test_detects_long_image_values() {
        let image = format!("data:image/png;base64,{}", "A".repeat(120));
        let columns = vec![ColumnDefinition::text("photo")];
        let data = rows("photo", &[image.as_str(), "", "n/a", "n/a"]);
        let detected = detect_image_columns(&columns, &data, &ImageDetectionConfig::default());
        assert_eq!(detected, vec!["photo".to_string()]);
    }

    #[test]
    fn test_short_values_need_majority() {
        let columns = vec![ColumnDefinition::text("icon")];
        let config = ImageDetectionConfig::default();

        let majority = rows("icon", &["data:image/png;base64,xx", "data:image/gif;base64,yy", "-"]);
        assert_eq!(detect_image_columns(&columns, &majority, &config).len(), 1);

        let minority = rows("icon", &["data:image/png;base64,xx", "-", "-", "-"]);
        assert!(detect_image_columns(&columns, &minority, &config).is_empty());
    }

    #[test]
    fn test_skips_flagged_and_non_text_columns() {
        let image = format!("data:image/png;base64,{}", "A".repeat(120));
        let columns = vec![
            ColumnDefinition::text("photo").image(),
            ColumnDefinition::integer("count"),
        ];
        let data = rows("photo", &[image.as_str()]);
        assert!(detect_image_columns(&columns, &data, &ImageDetectionConfig::default()).is_empty());
    }
}
