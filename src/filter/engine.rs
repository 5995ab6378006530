use log::{debug, error, info};
use std::sync::Arc;

use crate::filter::matcher::{quick_matches, CompiledFilter};
use crate::models::filter::FilterSpec;
use crate::models::flow::FlowRecord;

/// Filtered records, oldest first. Shared read-only with consumers.
pub type FilteredView = Arc<Vec<Arc<FlowRecord>>>;

/// Narrow `records` by the structured filter, then by quick text.
///
/// Pure: identical inputs give an identical sequence. Never reorders.
pub fn recompute<'a, I>(records: I, active: Option<&FilterSpec>, quick_text: &str) -> Vec<Arc<FlowRecord>>
where
    I: IntoIterator<Item = &'a Arc<FlowRecord>>,
{
    let compiled = active.map(CompiledFilter::compile);
    recompute_compiled(records, compiled.as_ref(), quick_text)
}

/// [`recompute`] with an already compiled filter
pub fn recompute_compiled<'a, I>(
    records: I,
    active: Option<&CompiledFilter>,
    quick_text: &str,
) -> Vec<Arc<FlowRecord>>
where
    I: IntoIterator<Item = &'a Arc<FlowRecord>>,
{
    let folded = quick_text.to_lowercase();

    records
        .into_iter()
        .filter(|record| active.map_or(true, |filter| filter.matches(record)))
        .filter(|record| folded.is_empty() || quick_matches(record, &folded))
        .cloned()
        .collect()
}

/// Same records in the same order, by identity
fn same_records(a: &[Arc<FlowRecord>], b: &[Arc<FlowRecord>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| Arc::ptr_eq(x, y))
}

/// Holds the active filter inputs and the last published view
pub struct FilterEngine {
    active: Option<CompiledFilter>,
    quick_text: String,
    view: FilteredView,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self {
            active: None,
            quick_text: String::new(),
            view: Arc::new(Vec::new()),
        }
    }

    /// Replace (or remove) the structured filter
    pub fn set_filter(&mut self, spec: Option<FilterSpec>) {
        match &spec {
            Some(spec) => info!(
                "Active filter: {} {:?} '{}'",
                spec.field, spec.operator, spec.value
            ),
            None => info!("Active filter cleared"),
        }
        let compiled = spec.as_ref().map(CompiledFilter::compile);
        if let Some(e) = compiled.as_ref().and_then(CompiledFilter::error) {
            error!("{}; filter excludes all records", e);
        }
        self.active = compiled;
    }

    /// Store new quick text. Returns false if it did not change.
    pub fn set_quick_text(&mut self, text: &str) -> bool {
        if self.quick_text == text {
            return false;
        }
        self.quick_text = text.to_string();
        true
    }

    pub fn quick_text(&self) -> &str {
        &self.quick_text
    }

    /// Recompute against `records`. Returns the new view only if it differs
    /// from the current one; otherwise the current view is kept as is.
    pub fn refresh<'a, I>(&mut self, records: I) -> Option<FilteredView>
    where
        I: IntoIterator<Item = &'a Arc<FlowRecord>>,
    {
        let next = recompute_compiled(records, self.active.as_ref(), &self.quick_text);

        if same_records(&next, &self.view) {
            return None;
        }

        debug!("Filtered view: {} -> {} records", self.view.len(), next.len());
        self.view = Arc::new(next);
        Some(self.view.clone())
    }

    pub fn view(&self) -> FilteredView {
        self.view.clone()
    }
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}
