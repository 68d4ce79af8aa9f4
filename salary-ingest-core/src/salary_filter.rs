//! Salary Filter: finds compensation columns and keeps only rows whose salary
//! is strictly above the configured threshold.
//!
//! Detection is heuristic. A column counts as a salary column when its name
//! contains a salary keyword, or, failing that, when every value is a number
//! in `[0, max_threshold]` and the name does not look like an identifier or
//! an age.

use crate::contract::SalaryStats;
use crate::table::{Column, Table, Value};
use tracing::{info, warn};

pub const SALARY_KEYWORDS: [&str; 8] = [
    "salary",
    "wage",
    "pay",
    "income",
    "compensation",
    "зарплата",
    "оклад",
    "доход",
];

pub const EXCLUDED_KEYWORDS: [&str; 7] =
    ["id", "code", "number", "age", "возраст", "код", "номер"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// Exclusive lower bound a salary must exceed.
    pub threshold: f64,
    /// Upper bound of a plausible salary, used only for value-based detection.
    pub max_threshold: f64,
}

fn name_matches_salary(name: &str) -> bool {
    let lower = name.to_lowercase();
    SALARY_KEYWORDS.iter().any(|k| lower.contains(k))
}

fn looks_like_salary_values(col: &Column, max_threshold: f64) -> bool {
    let lower = col.name.to_lowercase();
    if EXCLUDED_KEYWORDS.iter().any(|k| lower.contains(k)) {
        return false;
    }
    let mut present = col.values.iter().filter(|v| !v.is_null()).peekable();
    if present.peek().is_none() {
        return false;
    }
    present.all(|v| {
        v.is_numeric()
            && v
                .as_f64()
                .is_some_and(|x| (0.0..=max_threshold).contains(&x))
    })
}

/// Salary columns of `table`, in table order.
pub fn find_salary_columns(table: &Table, max_threshold: f64) -> Vec<String> {
    table
        .columns()
        .iter()
        .filter(|c| name_matches_salary(&c.name) || looks_like_salary_values(c, max_threshold))
        .map(|c| c.name.clone())
        .collect()
}

#[derive(Debug, Default)]
struct Summary {
    min: f64,
    max: f64,
    mean: f64,
    count: usize,
}

fn summarize(col: &Column) -> Summary {
    let nums: Vec<f64> = col.values.iter().filter_map(Value::as_f64).collect();
    if nums.is_empty() {
        return Summary::default();
    }
    let sum: f64 = nums.iter().sum();
    Summary {
        min: nums.iter().copied().fold(f64::INFINITY, f64::min),
        max: nums.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        mean: sum / nums.len() as f64,
        count: nums.len(),
    }
}

fn log_summary(column: &str, stage: &str, col: Option<&Column>) {
    if let Some(s) = col.map(summarize).filter(|s| s.count > 0) {
        info!(
            column,
            stage,
            min = %format!("{:.2}", s.min),
            max = %format!("{:.2}", s.max),
            mean = %format!("{:.2}", s.mean),
            "Salary column statistics"
        );
    }
}

/// Detects salary columns and filters `table` by `settings.threshold`.
///
/// Rows are deduplicated first, every salary column is coerced to numbers
/// (non-numeric cells become null), and a row survives only if every salary
/// column holds a value strictly above the threshold.
pub fn detect_and_filter(table: Table, settings: FilterSettings) -> (Table, SalaryStats) {
    if table.is_empty() {
        return (table, SalaryStats::default());
    }

    let original_count = table.num_rows();
    let salary_columns = find_salary_columns(&table, settings.max_threshold);
    let mut stats = SalaryStats {
        filtered_count: 0,
        salary_columns: salary_columns.clone(),
        original_count,
    };

    if salary_columns.is_empty() {
        warn!("No salary columns found");
        for col in table.columns() {
            info!(column = %col.name, kind = col.type_label(), "Available column");
        }
        return (table, stats);
    }
    info!(columns = ?salary_columns, "Salary columns detected");

    let mut out = table;
    let duplicates = out.drop_duplicates();
    if duplicates > 0 {
        info!(removed = duplicates, "Removed duplicate rows");
    }

    for name in &salary_columns {
        out.map_column(name, Value::to_numeric);
        log_summary(name, "before", out.column(name));

        let mask: Vec<bool> = match out.column(name) {
            Some(col) => col
                .values
                .iter()
                .map(|v| v.as_f64().is_some_and(|x| x > settings.threshold))
                .collect(),
            None => continue,
        };
        let removed = mask.iter().filter(|keep| !**keep).count();
        if removed > 0 {
            info!(column = %name, removed, threshold = settings.threshold, "Filtered rows at or below threshold");
            stats.filtered_count += removed;
            out.retain_rows(&mask);
        } else {
            info!(column = %name, threshold = settings.threshold, "All rows above threshold");
        }

        if !out.is_empty() {
            log_summary(name, "after", out.column(name));
        }
    }

    // Rows with a missing salary in any detected column count as failures.
    let keep: Vec<bool> = (0..out.num_rows())
        .map(|i| {
            salary_columns.iter().all(|name| {
                out.column(name)
                    .map(|c| !c.values[i].is_null())
                    .unwrap_or(true)
            })
        })
        .collect();
    out.retain_rows(&keep);

    info!(
        before = original_count,
        after = out.num_rows(),
        filtered_by_salary = stats.filtered_count,
        "Salary filter finished"
    );
    (out, stats)
}
