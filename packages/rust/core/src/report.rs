//! Result ordering, duration formatting and the results table.

use std::time::Duration;

use nbci_shared::ExecutionResult;

const SECS_PER_DAY: u64 = 86_400;
const SECS_PER_HOUR: u64 = 3_600;
const SECS_PER_MIN: u64 = 60;

const HEADERS: [&str; 5] = ["file", "status", "duration", "error", "output_uri"];

/// Format as `HH:MM:SS`, prefixed with `N day` / `N days` once a full day has passed.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    let days = secs / SECS_PER_DAY;
    let hours = (secs % SECS_PER_DAY) / SECS_PER_HOUR;
    let minutes = (secs % SECS_PER_HOUR) / SECS_PER_MIN;
    let seconds = secs % SECS_PER_MIN;

    let time = format!("{hours:02}:{minutes:02}:{seconds:02}");
    match days {
        0 => time,
        1 => format!("1 day {time}"),
        n => format!("{n} days {time}"),
    }
}

/// Passed notebooks first; relative order within each group is kept.
pub fn sort_results(results: &mut [ExecutionResult]) {
    results.sort_by_key(|r| !r.is_pass());
}

fn status_label(result: &ExecutionResult) -> &'static str {
    if result.is_pass() { "PASSED" } else { "FAILED" }
}

/// Render results as a column-aligned table with a dashed rule under the header.
pub fn render_table(results: &[ExecutionResult]) -> String {
    let rows: Vec<[String; 5]> = results
        .iter()
        .map(|r| {
            [
                r.file_name(),
                status_label(r).to_string(),
                format_duration(r.duration),
                r.error_message()
                    .map(|m| m.replace(['\r', '\n'], " "))
                    .unwrap_or_else(|| "--".to_string()),
                r.output_uri.clone(),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let header: Vec<String> = HEADERS.iter().map(|h| h.to_string()).collect();
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();

    let mut lines = vec![format_row(&header, &widths), format_row(&rule, &widths)];
    lines.extend(rows.iter().map(|row| format_row(row, &widths)));
    lines.join("\n")
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect::<Vec<_>>()
        .join("  ")
        .trim_end()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_duration_examples() {
        assert_eq!(format_duration(Duration::ZERO), "00:00:00");
        assert_eq!(format_duration(Duration::from_secs(90_000)), "1 day 01:00:00");
        assert_eq!(format_duration(Duration::from_secs(2 * 86_400 + 3)), "2 days 00:00:03");
        assert_eq!(format_duration(Duration::from_millis(3_723_900)), "01:02:03");
        assert_eq!(format_duration(Duration::from_secs(86_399)), "23:59:59");
    }

    #[test]
    fn sort_is_stable_with_passes_first() {
        let mut results = vec![
            ExecutionResult::failed("f1.ipynb", "", Duration::ZERO, "x"),
            ExecutionResult::passed("p1.ipynb", "", Duration::ZERO),
            ExecutionResult::failed("f2.ipynb", "", Duration::ZERO, "y"),
            ExecutionResult::passed("p2.ipynb", "", Duration::ZERO),
        ];
        sort_results(&mut results);

        let names: Vec<String> = results.iter().map(|r| r.file_name()).collect();
        assert_eq!(names, vec!["p1.ipynb", "p2.ipynb", "f1.ipynb", "f2.ipynb"]);
    }

    #[test]
    fn table_has_aligned_columns() {
        let results = vec![
            ExecutionResult::passed(
                "notebooks/official/intro.ipynb",
                "gs://b/executed_notebooks/intro.ipynb",
                Duration::from_secs(65),
            ),
            ExecutionResult::failed(
                "notebooks/x.ipynb",
                "gs://b/executed_notebooks/x.ipynb",
                Duration::from_secs(5),
                "build failed\nexit 1",
            ),
        ];
        let table = render_table(&results);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("file         status  duration  error"));
        assert!(lines[1].starts_with("-----------  ------  --------"));
        assert!(lines[2].starts_with("intro.ipynb"));
        assert!(lines[2].contains("PASSED  00:01:05  --"));
        assert!(lines[3].contains("FAILED  00:00:05  build failed exit 1"));
        assert!(lines[3].ends_with("gs://b/executed_notebooks/x.ipynb"));
    }

    #[test]
    fn empty_table_is_just_headers() {
        let table = render_table(&[]);
        assert_eq!(
            table,
            "file  status  duration  error  output_uri\n----  ------  --------  -----  ----------"
        );
    }
}
