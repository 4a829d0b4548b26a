//! Rendering batch results for the terminal.

use crate::error::Result;
use crate::job::JobResult;
use clap::ValueEnum;
use std::fmt::Write as _;

/// Shape of `relay batch` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// JSON array with every field of every result
    #[default]
    Full,
    /// Prompt followed by its answer (or error)
    Pairs,
    /// Only the text of successful answers
    Answers,
}

/// Render results in the requested format.
pub fn render(results: &[JobResult], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Full => Ok(serde_json::to_string_pretty(results)?),
        OutputFormat::Pairs => Ok(render_pairs(results)),
        OutputFormat::Answers => Ok(render_answers(results)),
    }
}

fn render_pairs(results: &[JobResult]) -> String {
    let mut out = String::new();
    for (i, result) in results.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let _ = writeln!(out, "Prompt: {}", result.prompt());
        match (result.response(), result.error()) {
            (Some(answer), _) => {
                let _ = writeln!(out, "Answer: {}", answer);
            }
            (None, Some(error)) => {
                let _ = writeln!(out, "Error: {}", error);
            }
            (None, None) => {}
        }
    }
    out
}

fn render_answers(results: &[JobResult]) -> String {
    results
        .iter()
        .filter_map(JobResult::response)
        .map(|answer| format!("{}\n", answer))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PromptJob;

    fn sample() -> Vec<JobResult> {
        vec![
            JobResult::succeeded(PromptJob::new(0, "A"), "ok-A".into(), None),
            JobResult::failed(PromptJob::new(1, "B"), "timeout"),
            JobResult::succeeded(PromptJob::new(2, "C"), "ok-C".into(), None),
        ]
    }

    #[test]
    fn test_full_is_json_array() {
        let rendered = render(&sample(), OutputFormat::Full).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert_eq!(parsed.as_array().map(Vec::len), Some(3));
        assert_eq!(parsed[1]["error"], "timeout");
    }

    #[test]
    fn test_pairs() {
        let rendered = render(&sample(), OutputFormat::Pairs).unwrap();
        assert_eq!(
            rendered,
            "Prompt: A\nAnswer: ok-A\n\nPrompt: B\nError: timeout\n\nPrompt: C\nAnswer: ok-C\n"
        );
    }

    #[test]
    fn test_answers_skip_failures() {
        let rendered = render(&sample(), OutputFormat::Answers).unwrap();
        assert_eq!(rendered, "ok-A\n\nok-C\n");
    }
}
