//! Check-run summary rendering.

use askama::Template;
use gradebox_core::check::CheckRunOutput;
use gradebox_core::{RunStatus, Stage};

/// GitHub rejects check-run summaries longer than 65535 characters.
const MAX_SUMMARY_BYTES: usize = 60_000;
const TRUNCATED: &str = "\n\n_Output truncated._\n";

struct StageView<'a> {
    icon: &'static str,
    name: &'a str,
    cached: bool,
    output: &'a str,
}

#[derive(Template)]
#[template(path = "check_run.md", escape = "none")]
struct CheckRunTemplate<'a> {
    stages: Vec<StageView<'a>>,
}

fn icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Success => ":heavy_check_mark:",
        RunStatus::Failure => ":x:",
        RunStatus::SystemError => ":warning:",
    }
}

/// `Success`, or `Failed: ` followed by the failing stage names.
pub fn title(stages: &[Stage]) -> String {
    let failures: Vec<&str> = stages
        .iter()
        .filter(|s| !s.is_success())
        .map(|s| s.name.as_str())
        .collect();
    if failures.is_empty() {
        "Success".to_string()
    } else {
        format!("Failed: {}", failures.join(" , "))
    }
}

pub fn render_summary(stages: &[Stage]) -> Result<String, askama::Error> {
    let template = CheckRunTemplate {
        stages: stages
            .iter()
            .map(|s| StageView {
                icon: icon(s.status),
                name: &s.name,
                cached: s.cached,
                output: s.output.trim_end(),
            })
            .collect(),
    };
    let mut summary = template.render()?;
    if summary.len() > MAX_SUMMARY_BYTES {
        let mut cut = MAX_SUMMARY_BYTES;
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        summary.truncate(cut);
        summary.push_str(TRUNCATED);
    }
    Ok(summary)
}

/// Title and rendered summary for a completed check run.
pub fn check_run_output(stages: &[Stage]) -> Result<CheckRunOutput, askama::Error> {
    Ok(CheckRunOutput {
        title: title(stages),
        summary: render_summary(stages)?,
    })
}
