//! Typed cell values.
//!
//! A field's type fixes which `CellValue` variant its cells hold. Edited text goes
//! through [`coerce`] (total, mirrors what a grid editor does with raw input) and then
//! [`validate`] (rejects values that do not fit the field) before anything is written.

use crate::core::error::GridError;
use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Select,
    MultiSelect,
    Date,
    Checkbox,
    Url,
    Email,
    Phone,
}

impl FieldType {
    pub const ALL: [FieldType; 9] = [
        FieldType::Text,
        FieldType::Number,
        FieldType::Select,
        FieldType::MultiSelect,
        FieldType::Date,
        FieldType::Checkbox,
        FieldType::Url,
        FieldType::Email,
        FieldType::Phone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Select => "select",
            FieldType::MultiSelect => "multiselect",
            FieldType::Date => "date",
            FieldType::Checkbox => "checkbox",
            FieldType::Url => "url",
            FieldType::Email => "email",
            FieldType::Phone => "phone",
        }
    }

    pub fn has_choices(self) -> bool {
        matches!(self, FieldType::Select | FieldType::MultiSelect)
    }

    /// Value a new record gets for a field of this type.
    pub fn default_value(self) -> CellValue {
        match self {
            FieldType::Text => CellValue::Text(String::new()),
            FieldType::Number => CellValue::Number(0.0),
            FieldType::Select => CellValue::Select(String::new()),
            FieldType::MultiSelect => CellValue::MultiSelect(BTreeSet::new()),
            FieldType::Date => CellValue::Date(None),
            FieldType::Checkbox => CellValue::Checkbox(false),
            FieldType::Url => CellValue::Url(String::new()),
            FieldType::Email => CellValue::Email(String::new()),
            FieldType::Phone => CellValue::Phone(String::new()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        FieldType::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| {
                GridError::validation(format!(
                    "unknown field type '{}' (expected one of: {})",
                    s,
                    FieldType::ALL.map(|t| t.as_str()).join(", ")
                ))
            })
    }
}

/// Per-field settings stored as JSON in `fields.options`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOptions {
    /// Allowed values for select / multiselect. Empty means "any value".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
}

impl FieldOptions {
    pub fn with_choices<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            choices: choices.into_iter().map(|c| c.as_ref().to_string()).collect(),
        }
        .normalized()
    }

    /// Trim choices, drop empties and duplicates, keep first-seen order.
    pub fn normalized(self) -> Self {
        let mut seen = BTreeSet::new();
        let choices = self
            .choices
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
        Self { choices }
    }

    fn allows(&self, value: &str) -> bool {
        self.choices.is_empty() || self.choices.iter().any(|c| c == value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Text(String),
    Number(f64),
    Checkbox(bool),
    Select(String),
    MultiSelect(BTreeSet<String>),
    Date(Option<NaiveDate>),
    Url(String),
    Email(String),
    Phone(String),
}

impl CellValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            CellValue::Text(_) => FieldType::Text,
            CellValue::Number(_) => FieldType::Number,
            CellValue::Checkbox(_) => FieldType::Checkbox,
            CellValue::Select(_) => FieldType::Select,
            CellValue::MultiSelect(_) => FieldType::MultiSelect,
            CellValue::Date(_) => FieldType::Date,
            CellValue::Url(_) => FieldType::Url,
            CellValue::Email(_) => FieldType::Email,
            CellValue::Phone(_) => FieldType::Phone,
        }
    }

    /// True for the "nothing entered" value of each variant.
    ///
    /// Numbers and checkboxes always hold a value, so they are never empty.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Text(s)
            | CellValue::Select(s)
            | CellValue::Url(s)
            | CellValue::Email(s)
            | CellValue::Phone(s) => s.is_empty(),
            CellValue::MultiSelect(set) => set.is_empty(),
            CellValue::Date(d) => d.is_none(),
            CellValue::Number(_) | CellValue::Checkbox(_) => false,
        }
    }

    /// Approximate payload size, used for storage accounting.
    pub fn byte_len(&self) -> usize {
        match self {
            CellValue::Text(s)
            | CellValue::Select(s)
            | CellValue::Url(s)
            | CellValue::Email(s)
            | CellValue::Phone(s) => s.len(),
            CellValue::MultiSelect(set) => set.iter().map(|s| s.len()).sum(),
            CellValue::Date(_) | CellValue::Number(_) => 8,
            CellValue::Checkbox(_) => 1,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s)
            | CellValue::Select(s)
            | CellValue::Url(s)
            | CellValue::Email(s)
            | CellValue::Phone(s) => f.write_str(s),
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Checkbox(b) => write!(f, "{}", b),
            CellValue::MultiSelect(set) => {
                f.write_str(&set.iter().cloned().collect::<Vec<_>>().join(", "))
            }
            CellValue::Date(Some(d)) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::Date(None) => Ok(()),
        }
    }
}

static NUMBER_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?").unwrap());
static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^https?://[^\s/$.?#][^\s]*$").unwrap());
static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());
static PHONE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[0-9 ().\-]+$").unwrap());

const PHONE_MIN_DIGITS: usize = 7;
const PHONE_MAX_DIGITS: usize = 20;

/// Leading-number parse: `"12.5kg"` is 12.5, anything without a numeric prefix is 0.
fn parse_number(input: &str) -> f64 {
    NUMBER_PREFIX
        .find(input.trim())
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|n| n.is_finite())
        .unwrap_or(0.0)
}

fn parse_date(input: &str) -> Result<Option<NaiveDate>, GridError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(Some(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(Some(dt.date_naive()));
    }
    // Date-time without an offset: keep the leading calendar date.
    if let Some((date, rest)) = trimmed.split_at_checked(10) {
        if rest.starts_with(['T', ' ']) {
            if let Ok(date) = NaiveDate::parse_from_str(date, "%Y-%m-%d") {
                return Ok(Some(date));
            }
        }
    }
    Err(GridError::validation(format!("'{}' is not a date (YYYY-MM-DD)", input)))
}

/// Convert raw editor text into a value of `field_type`.
///
/// Only dates can fail; numbers fall back to 0 and checkboxes are `true` for the
/// exact string `"true"` and `false` for everything else.
pub fn coerce(field_type: FieldType, input: &str) -> Result<CellValue, GridError> {
    let value = match field_type {
        FieldType::Number => CellValue::Number(parse_number(input)),
        FieldType::Checkbox => CellValue::Checkbox(input == "true"),
        FieldType::MultiSelect => CellValue::MultiSelect(
            input
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect(),
        ),
        FieldType::Date => CellValue::Date(parse_date(input)?),
        FieldType::Text => CellValue::Text(input.to_string()),
        FieldType::Select => CellValue::Select(input.to_string()),
        FieldType::Url => CellValue::Url(input.to_string()),
        FieldType::Email => CellValue::Email(input.to_string()),
        FieldType::Phone => CellValue::Phone(input.to_string()),
    };
    Ok(value)
}

/// Check that `value` fits a field of `field_type` with `options`.
pub fn validate(
    field_type: FieldType,
    options: &FieldOptions,
    value: &CellValue,
) -> Result<(), GridError> {
    if value.field_type() != field_type {
        return Err(GridError::validation(format!(
            "{} value does not fit a {} field",
            value.field_type(),
            field_type
        )));
    }
    match value {
        CellValue::Number(n) if !n.is_finite() => {
            Err(GridError::validation("number must be finite"))
        }
        CellValue::Select(s) if !s.is_empty() && !options.allows(s) => Err(
            GridError::validation(format!("'{}' is not one of the field's choices", s)),
        ),
        CellValue::MultiSelect(set) => match set.iter().find(|s| !options.allows(s)) {
            Some(s) => Err(GridError::validation(format!(
                "'{}' is not one of the field's choices",
                s
            ))),
            None => Ok(()),
        },
        CellValue::Url(s) if !s.is_empty() && !URL_PATTERN.is_match(s) => {
            Err(GridError::validation(format!("'{}' is not an http(s) URL", s)))
        }
        CellValue::Email(s) if !s.is_empty() && !EMAIL_PATTERN.is_match(s) => {
            Err(GridError::validation(format!("'{}' is not an email address", s)))
        }
        CellValue::Phone(s) if !s.is_empty() && !is_phone(s) => {
            Err(GridError::validation(format!("'{}' is not a phone number", s)))
        }
        _ => Ok(()),
    }
}

fn is_phone(s: &str) -> bool {
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    PHONE_PATTERN.is_match(s) && (PHONE_MIN_DIGITS..=PHONE_MAX_DIGITS).contains(&digits)
}

/// `coerce` followed by `validate`: the full path for text typed into a cell.
pub fn parse_input(
    field_type: FieldType,
    options: &FieldOptions,
    input: &str,
) -> Result<CellValue, GridError> {
    let value = coerce(field_type, input)?;
    validate(field_type, options, &value)?;
    Ok(value)
}
