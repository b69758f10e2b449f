use std::path::Path;

use vigil_retry::{RetryInfo, RetryPolicy};

use super::load;

fn format_delays(info: &RetryInfo) -> String {
    if info.estimated_delays_ms.is_empty() {
        return "-".to_string();
    }
    info.estimated_delays_ms
        .iter()
        .map(|d| format!("{d}ms"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_row(info: &RetryInfo) -> String {
    format!(
        "{:<14} {:>7}  {:>9}ms  {}",
        info.error_kind.as_str(),
        info.max_retries,
        info.total_estimated_time_ms,
        format_delays(info)
    )
}

pub fn classify(source: Option<&Path>, message: &str, format: &str) -> anyhow::Result<()> {
    let policy = RetryPolicy::new(load(source)?.into());
    let kind = policy.classify(message);
    let info = policy.retry_info(kind);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => {
            println!("{kind}");
            println!(
                "  retries: {}, delays: {} (total {}ms before jitter)",
                info.max_retries,
                format_delays(&info),
                info.total_estimated_time_ms
            );
        }
    }
    Ok(())
}

pub fn strategies(source: Option<&Path>, format: &str) -> anyhow::Result<()> {
    let policy = RetryPolicy::new(load(source)?.into());
    let table = policy.strategy_table();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&table)?),
        _ => {
            println!("{:<14} {:>7}  {:>11}  DELAYS", "KIND", "RETRIES", "TOTAL");
            for info in &table {
                println!("{}", format_row(info));
            }
        }
    }
    Ok(())
}
