pub mod icons;
pub mod progress;

pub use progress::{AnalysisUI, UiMode, format_event, summary_footer};
