//! Field-level enrichment functions.
//!
//! Every function has the same contract: one input value in, a
//! [`FieldOutcome`] out. Functions never fail; unparseable input produces a
//! failed outcome with a diagnostic.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::EnumIter;

use crate::config::EnrichmentConfig;
use crate::table::FieldValue;

static PHONE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // international
        r"\+?\d{1,4}[-.\s]?\(?\d{1,4}\)?[-.\s]?\d{1,4}[-.\s]?\d{1,9}",
        // US
        r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}",
        r"\d{10,15}",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static URL_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"(?i)https?://[-\w.]+(?:[:\d]+)?(?:/[\w/_.]*)?(?:\?[\w&=%.]*)?(?:#[\w.]*)?",
    )
    .ok()
});

static DOMAIN_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"(?i)(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}").ok()
});

static EMAIL_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").ok());

const MIN_PHONE_LEN: usize = 10;

/// Supported enrichment functions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentFunction {
    #[serde(alias = "phone_numbers")]
    PhoneNormalize,
    #[serde(alias = "web_domains")]
    UrlDomain,
    #[serde(alias = "emails")]
    EmailValidate,
    DateOnly,
    Datetime,
}

impl EnrichmentFunction {
    /// Canonical identifier, also used in output column names
    pub fn id(&self) -> &'static str {
        match self {
            EnrichmentFunction::PhoneNormalize => "phone_normalize",
            EnrichmentFunction::UrlDomain => "url_domain",
            EnrichmentFunction::EmailValidate => "email_validate",
            EnrichmentFunction::DateOnly => "date_only",
            EnrichmentFunction::Datetime => "datetime",
        }
    }

    /// Resolve a canonical identifier or one of its legacy aliases
    pub fn from_id(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "phone_normalize" | "phone_numbers" => Some(EnrichmentFunction::PhoneNormalize),
            "url_domain" | "web_domains" => Some(EnrichmentFunction::UrlDomain),
            "email_validate" | "emails" => Some(EnrichmentFunction::EmailValidate),
            "date_only" => Some(EnrichmentFunction::DateOnly),
            "datetime" => Some(EnrichmentFunction::Datetime),
            _ => None,
        }
    }

    pub fn apply(&self, value: &FieldValue, config: &EnrichmentConfig) -> FieldOutcome {
        let input = match value {
            FieldValue::Null => return FieldOutcome::empty(),
            other => other.to_string(),
        };
        let input = input.trim();
        if input.is_empty() {
            return FieldOutcome::empty();
        }

        match self {
            EnrichmentFunction::PhoneNormalize => normalize_phone(input),
            EnrichmentFunction::UrlDomain => extract_domain(input),
            EnrichmentFunction::EmailValidate => validate_email(input),
            EnrichmentFunction::DateOnly => parse_date(input, config),
            EnrichmentFunction::Datetime => parse_datetime(input, config),
        }
    }
}

impl std::fmt::Display for EnrichmentFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Result of applying an enrichment function to one field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldOutcome {
    pub value: Option<String>,
    pub succeeded: bool,
    pub diagnostic: Option<String>,
}

impl FieldOutcome {
    fn ok(value: String) -> Self {
        Self {
            value: Some(value),
            succeeded: true,
            diagnostic: None,
        }
    }

    /// NULL or blank input: failed marker, nothing to report
    fn empty() -> Self {
        Self {
            value: None,
            succeeded: false,
            diagnostic: None,
        }
    }

    fn failed(diagnostic: String) -> Self {
        Self {
            value: None,
            succeeded: false,
            diagnostic: Some(diagnostic),
        }
    }

    /// Input was present but could not be parsed
    pub fn is_malformed(&self) -> bool {
        !self.succeeded && self.diagnostic.is_some()
    }
}

fn normalize_phone(input: &str) -> FieldOutcome {
    let mut phone: Option<String> = None;

    for pattern in PHONE_PATTERNS.iter() {
        if let Some(found) = pattern.find(input) {
            let mut candidate: String = found
                .as_str()
                .chars()
                .filter(|c| c.is_ascii_digit() || *c == '+')
                .collect();
            if !candidate.is_empty()
                && !candidate.starts_with('+')
                && candidate.len() >= MIN_PHONE_LEN
            {
                candidate.insert(0, '+');
            }
            phone = Some(candidate);
            break;
        }
    }

    if phone.as_deref().map_or(true, str::is_empty) {
        let digits: String = input.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.len() >= MIN_PHONE_LEN {
            phone = Some(if digits.len() > MIN_PHONE_LEN {
                format!("+{}", digits)
            } else {
                digits
            });
        }
    }

    match phone {
        Some(p) if p.len() >= MIN_PHONE_LEN => FieldOutcome::ok(p),
        Some(p) if !p.is_empty() => FieldOutcome::failed(format!(
            "phone number '{}' is too short ({} characters)",
            p,
            p.len()
        )),
        _ => FieldOutcome::failed(format!("no phone number found in '{}'", input)),
    }
}

/// Strip scheme, path, query and fragment; keep host and port
fn host_part(candidate: &str) -> String {
    let lowered = candidate.to_lowercase();
    let without_scheme = lowered
        .strip_prefix("https://")
        .or_else(|| lowered.strip_prefix("http://"))
        .unwrap_or(&lowered);
    without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default()
        .to_string()
}

fn extract_domain(input: &str) -> FieldOutcome {
    let found = URL_PATTERN
        .as_ref()
        .and_then(|re| re.find(input))
        .or_else(|| DOMAIN_PATTERN.as_ref().and_then(|re| re.find(input)))
        .map(|m| host_part(m.as_str()));

    let host = found.or_else(|| {
        let looks_dotted = input.contains('.')
            && !input.contains(char::is_whitespace)
            && input.split('.').all(|part| !part.is_empty());
        looks_dotted.then(|| host_part(input))
    });

    match host {
        Some(host) if !host.is_empty() => FieldOutcome::ok(format!("https://{}", host)),
        _ => FieldOutcome::failed(format!("no domain found in '{}'", input)),
    }
}

fn validate_email(input: &str) -> FieldOutcome {
    let Some(found) = EMAIL_PATTERN.as_ref().and_then(|re| re.find(input)) else {
        return FieldOutcome::failed(format!("no email address found in '{}'", input));
    };

    let email = found.as_str().to_lowercase();
    match email.split_once('@') {
        Some((_, domain)) if domain.contains('.') => FieldOutcome::ok(email),
        _ => FieldOutcome::failed(format!("'{}' has no valid domain", email)),
    }
}

fn parse_date(input: &str, config: &EnrichmentConfig) -> FieldOutcome {
    let date = config
        .date_formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .or_else(|| parse_naive_datetime(input, config).map(|dt| dt.date()));

    match date {
        Some(date) => FieldOutcome::ok(date.format("%Y-%m-%d").to_string()),
        None => FieldOutcome::failed(format!("'{}' does not match any date format", input)),
    }
}

fn parse_datetime(input: &str, config: &EnrichmentConfig) -> FieldOutcome {
    let parsed = parse_naive_datetime(input, config).or_else(|| {
        config
            .date_formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
            .and_then(|date| date.and_hms_opt(0, 0, 0))
    });

    match parsed {
        Some(dt) => FieldOutcome::ok(dt.format("%Y-%m-%dT%H:%M:%S").to_string()),
        None => FieldOutcome::failed(format!(
            "'{}' does not match any datetime format",
            input
        )),
    }
}

fn parse_naive_datetime(input: &str, config: &EnrichmentConfig) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.naive_local());
    }
    config
        .datetime_formats
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
}
