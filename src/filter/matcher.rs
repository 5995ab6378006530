use regex::{Regex, RegexBuilder};

use crate::models::filter::{FilterField, FilterSpec, Operator};
use crate::models::flow::FlowRecord;
use crate::utils::error::PipelineError;

/// How the value side is compared
#[derive(Debug, Clone)]
enum Comparison {
    /// Case-folded literal for the string operators
    Literal { operator: Operator, needle: String },
    /// Case-insensitive compiled pattern
    Pattern(Regex),
    /// The filter cannot match anything (bad regex or unsupported field)
    Nothing,
}

/// A [`FilterSpec`] prepared for repeated evaluation
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    field: FilterField,
    comparison: Comparison,
    error: Option<PipelineError>,
}

impl CompiledFilter {
    /// Prepare a filter. Never fails: a filter that cannot be evaluated
    /// excludes every record and reports why through [`CompiledFilter::error`].
    pub fn compile(spec: &FilterSpec) -> Self {
        let field = spec.parsed_field();
        let mut error = None;

        let comparison = if let FilterField::Unsupported(name) = &field {
            error = Some(PipelineError::FilterEvaluation(format!("unsupported field '{}'", name)));
            Comparison::Nothing
        } else if spec.operator == Operator::Regex {
            match RegexBuilder::new(&spec.value).case_insensitive(true).build() {
                Ok(regex) => Comparison::Pattern(regex),
                Err(e) => {
                    error = Some(PipelineError::FilterEvaluation(format!(
                        "invalid regex '{}': {}",
                        spec.value, e
                    )));
                    Comparison::Nothing
                }
            }
        } else {
            Comparison::Literal {
                operator: spec.operator,
                needle: spec.value.to_lowercase(),
            }
        };

        Self {
            field,
            comparison,
            error,
        }
    }

    /// Why this filter matches nothing, if it cannot be evaluated
    pub fn error(&self) -> Option<&PipelineError> {
        self.error.as_ref()
    }

    /// Extract the filtered field from a record
    fn extract<'a>(&self, record: &'a FlowRecord) -> Option<&'a str> {
        match &self.field {
            FilterField::Url => Some(&record.url),
            FilterField::Method => Some(&record.method),
            FilterField::Body => Some(&record.request_body),
            FilterField::Header(name) => Some(record.request_header(name).unwrap_or("")),
            FilterField::Unsupported(_) => None,
        }
    }

    pub fn matches(&self, record: &FlowRecord) -> bool {
        let Some(target) = self.extract(record) else {
            return false;
        };

        match &self.comparison {
            Comparison::Nothing => false,
            Comparison::Pattern(regex) => regex.is_match(target),
            Comparison::Literal { operator, needle } => {
                let target = target.to_lowercase();
                match operator {
                    Operator::Contains => target.contains(needle.as_str()),
                    Operator::Equals => target == *needle,
                    Operator::StartsWith => target.starts_with(needle.as_str()),
                    Operator::EndsWith => target.ends_with(needle.as_str()),
                    // Regex is compiled into Comparison::Pattern
                    Operator::Regex => false,
                }
            }
        }
    }
}

/// Quick-text predicate: URL, method or status contains the text
pub fn quick_matches(record: &FlowRecord, folded_text: &str) -> bool {
    record.url.to_lowercase().contains(folded_text)
        || record.method.to_lowercase().contains(folded_text)
        || record.status_text().contains(folded_text)
}
