pub mod debounce;
pub mod engine;
pub mod matcher;

pub use debounce::Debouncer;
pub use engine::{recompute, FilterEngine, FilteredView};
pub use matcher::CompiledFilter;
