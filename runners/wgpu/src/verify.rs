//! Diffing a GPU result against the CPU reference.

use tabled::settings::{Alignment, Modify, Style, object::Rows};

/// Rows shown before the table is cut off.
const MAX_ROWS: usize = 10;

/// A lane where the two results disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Difference {
    pub index: usize,
    pub expected: i32,
    pub actual: i32,
}

/// Compares two results lane by lane. A length difference shows up as the
/// missing lanes, compared against zero.
pub fn compare(expected: &[i32], actual: &[i32]) -> Vec<Difference> {
    let len = expected.len().max(actual.len());
    (0..len)
        .filter_map(|index| {
            let expected = expected.get(index).copied().unwrap_or_default();
            let actual = actual.get(index).copied().unwrap_or_default();
            (expected != actual).then_some(Difference {
                index,
                expected,
                actual,
            })
        })
        .collect()
}

/// Renders up to ten differences as a table. Empty when there are none.
pub fn format_table(diffs: &[Difference], expected_name: &str, actual_name: &str) -> String {
    if diffs.is_empty() {
        return String::new();
    }

    let mut builder = tabled::builder::Builder::default();
    builder.push_record(["#", expected_name, actual_name, "Δ"]);
    for d in diffs.iter().take(MAX_ROWS) {
        builder.push_record([
            d.index.to_string(),
            d.expected.to_string(),
            d.actual.to_string(),
            (i64::from(d.actual) - i64::from(d.expected)).to_string(),
        ]);
    }

    let mut table = builder.build();
    table
        .with(Style::modern())
        .with(Modify::new(Rows::first()).with(Alignment::center()));

    let mut result = table.to_string();
    if diffs.len() > MAX_ROWS {
        result.push_str(&format!(
            "\n... {} more differences",
            diffs.len() - MAX_ROWS
        ));
    }
    result
}
