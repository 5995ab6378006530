use serde::{Deserialize, Serialize};

/// Comparison applied between a record field and the filter value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operator {
    #[serde(alias = "contains")]
    Contains,
    #[serde(alias = "equals")]
    Equals,
    #[serde(alias = "starts_with")]
    StartsWith,
    #[serde(alias = "ends_with")]
    EndsWith,
    #[serde(alias = "regex")]
    Regex,
}

impl std::str::FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "CONTAINS" => Ok(Operator::Contains),
            "EQUALS" => Ok(Operator::Equals),
            "STARTS_WITH" => Ok(Operator::StartsWith),
            "ENDS_WITH" => Ok(Operator::EndsWith),
            "REGEX" => Ok(Operator::Regex),
            other => Err(format!("unknown operator '{}'", other)),
        }
    }
}

/// Which part of a record a structured filter looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterField {
    Url,
    Method,
    /// Request body
    Body,
    /// Request header, matched by name case-insensitively
    Header(String),
    /// Anything else; matches nothing
    Unsupported(String),
}

impl FilterField {
    pub fn parse(field: &str) -> Self {
        match field {
            "url" => FilterField::Url,
            "method" => FilterField::Method,
            "body" => FilterField::Body,
            _ => match field.strip_prefix("header:") {
                Some(name) if !name.is_empty() => FilterField::Header(name.to_string()),
                _ => FilterField::Unsupported(field.to_string()),
            },
        }
    }
}

/// Structured filter selected by the user.
///
/// Persisted and edited by the REST collaborator; the pipeline only holds the
/// currently selected one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_name: Option<String>,

    /// `url`, `method`, `body` or `header:<name>`
    pub field: String,

    pub operator: Operator,

    pub value: String,
}

impl FilterSpec {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            id: None,
            filter_name: None,
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn parsed_field(&self) -> FilterField {
        FilterField::parse(&self.field)
    }
}
