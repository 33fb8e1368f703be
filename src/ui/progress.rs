use crate::orchestrator::pipeline::{ORCHESTRATOR_AUTHOR, USER_AUTHOR};
use crate::session::{Event, Part};
use crate::ui::icons::{CHECK, CROSS, QUESTION, REVIEW, RUNNING, SPARKLE};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// How streamed events are shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UiMode {
    /// Spinner plus styled lines
    #[default]
    Full,
    /// One JSON object per event on stdout
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Full,
        })
    }
}

/// Terminal rendering of a pipeline's event stream.
///
/// In [`UiMode::Full`] a spinner shows which author is currently talking and
/// every text event is printed above it. The terminal event's report is
/// printed last, after the spinner has been cleared.
pub struct AnalysisUI {
    mode: UiMode,
    spinner: Option<ProgressBar>,
}

impl AnalysisUI {
    pub fn new(mode: UiMode) -> Self {
        let spinner = match mode {
            UiMode::Full => {
                let bar = ProgressBar::new_spinner();
                if let Ok(spinner_style) =
                    ProgressStyle::default_spinner().template("{spinner} {msg}")
                {
                    bar.set_style(spinner_style);
                }
                bar.set_message(format!("{}", style("Classifying request...").dim()));
                bar.enable_steady_tick(Duration::from_millis(100));
                Some(bar)
            }
            UiMode::Json => None,
        };
        Self { mode, spinner }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    /// Render one streamed event.
    pub fn event(&self, event: &Event) {
        match self.mode {
            UiMode::Json => match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!(error = %e, "failed to encode event"),
            },
            UiMode::Full => {
                if event.terminal {
                    self.finish();
                    println!();
                    println!("{}", event.text_content());
                    if let Some(footer) = summary_footer(event) {
                        println!();
                        println!("{}", style(footer).dim());
                    }
                    return;
                }
                let Some(line) = format_event(event) else {
                    return;
                };
                // A hidden bar (no terminal) swallows println.
                if let Some(bar) = self.spinner.as_ref().filter(|b| !b.is_hidden()) {
                    bar.println(line);
                    bar.set_message(format!(
                        "{}",
                        style(format!("waiting on {}...", event.author)).dim()
                    ));
                } else {
                    println!("{}", line);
                }
            }
        }
    }

    /// Clear the spinner.
    pub fn finish(&self) {
        if let Some(bar) = &self.spinner {
            bar.finish_and_clear();
        }
    }

    pub fn error(&self, message: &str) {
        self.finish();
        eprintln!("{}{}", CROSS, style(message).red());
    }
}

impl Drop for AnalysisUI {
    fn drop(&mut self) {
        self.finish();
    }
}

/// One display line for a non-terminal event, or `None` when it has no text.
pub fn format_event(event: &Event) -> Option<String> {
    let text = event.text_content();
    if text.trim().is_empty() {
        return None;
    }
    let line = match event.author.as_str() {
        ORCHESTRATOR_AUTHOR => format!("{}{}", RUNNING, style(text).cyan()),
        USER_AUTHOR => format!("{}{}", QUESTION, text),
        author => format!("{}{} {}", REVIEW, style(format!("[{}]", author)).bold(), text),
    };
    Some(line)
}

/// A one-line summary from the terminal event's data part.
pub fn summary_footer(event: &Event) -> Option<String> {
    let data = event.content.parts.iter().find_map(|p| match p {
        Part::Data { data } => Some(data),
        Part::Text { .. } => None,
    })?;
    let analysis_id = data.get("analysis_id")?.as_str()?;
    let issues = data
        .get("metrics")
        .and_then(|m| m.get("total_issues"))
        .and_then(|n| n.as_u64())
        .unwrap_or(0);
    let cached = data.get("cached").and_then(|c| c.as_bool()).unwrap_or(false);
    let icon = if cached { SPARKLE } else { CHECK };
    Some(format!(
        "{}analysis {} · {} issue(s){}",
        icon,
        analysis_id,
        issues,
        if cached { " · from cache" } else { "" }
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Content, Role};
    use serde_json::json;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!("json".parse::<UiMode>().unwrap(), UiMode::Json);
        assert_eq!("JSON".parse::<UiMode>().unwrap(), UiMode::Json);
        assert_eq!("anything".parse::<UiMode>().unwrap(), UiMode::Full);
    }

    #[test]
    fn test_format_event_skips_state_only() {
        let event = Event::state_only("security_worker", serde_json::Map::new());
        assert!(format_event(&event).is_none());
    }

    #[test]
    fn test_format_event_includes_author_and_text() {
        let event = Event::text("security_worker", Role::Model, "scanning imports");
        let line = format_event(&event).unwrap();
        assert!(line.contains("security_worker"));
        assert!(line.contains("scanning imports"));
    }

    #[test]
    fn test_summary_footer_reads_data_part() {
        let mut content = Content::text(Role::Model, "report");
        content.parts.push(Part::Data {
            data: json!({
                "analysis_id": "a1",
                "metrics": {"total_issues": 3},
                "cached": true
            }),
        });
        let event = Event::new(ORCHESTRATOR_AUTHOR, content).into_terminal();
        let footer = summary_footer(&event).unwrap();
        assert!(footer.contains("a1"));
        assert!(footer.contains("3 issue(s)"));
        assert!(footer.contains("from cache"));
    }

    #[test]
    fn test_summary_footer_absent_without_data() {
        let event = Event::text(ORCHESTRATOR_AUTHOR, Role::Model, "hello").into_terminal();
        assert!(summary_footer(&event).is_none());
    }
}
