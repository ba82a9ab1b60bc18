//! Value parsers for column and enrichment arguments

use std::str::FromStr;

use wrangler::table::{ColumnDefinition, ColumnType};

/// Parse `name:TYPE`, optionally followed by `:image`
pub fn parse_column(value: &str) -> Result<ColumnDefinition, String> {
    let mut parts = value.split(':');
    let name = parts
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| format!("missing column name in '{}'", value))?;
    let column_type = match parts.next() {
        Some(raw) => ColumnType::from_str(raw.trim())
            .map_err(|_| format!("unknown column type '{}' (TEXT, INTEGER or REAL)", raw))?,
        None => ColumnType::Text,
    };

    let mut column = ColumnDefinition::new(name, column_type);
    for flag in parts {
        match flag.trim().to_lowercase().as_str() {
            "image" => column = column.image(),
            other => return Err(format!("unknown column flag '{}'", other)),
        }
    }
    Ok(column)
}

/// Parse `column=function`
pub fn parse_enrichment(value: &str) -> Result<(String, String), String> {
    let (column, function) = value
        .split_once('=')
        .ok_or_else(|| format!("expected COLUMN=FUNCTION, got '{}'", value))?;
    let (column, function) = (column.trim(), function.trim());
    if column.is_empty() || function.is_empty() {
        return Err(format!("expected COLUMN=FUNCTION, got '{}'", value));
    }
    Ok((column.to_string(), function.to_string()))
}
