//! System status command: database, provider and breaker health.

use anyhow::Result;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use parley_core::resilience::CircuitState;

use crate::state::AppState;

/// Probe the database and every provider backend and print the results.
pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let database = state.pool.health_check().await;
    let backends = state.selector.health_status().await;
    let cache = state.history_cache.stats();

    if json {
        let database = match &database {
            Ok(health) => serde_json::to_value(health)?,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        let status = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": database,
            "providers": backends,
            "history_cache": cache,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!();
    println!("  {} v{}", style("parley").bold(), env!("CARGO_PKG_VERSION"));
    println!();

    println!("  {}", style("── Database ──").dim());
    println!(
        "  Path:     {}",
        style(state.config.database.path.display()).dim()
    );
    match &database {
        Ok(health) => {
            println!(
                "  Health:   {} ({}ms)",
                style("ok").green(),
                health.latency_ms
            );
            println!(
                "  Pool:     {}/{} in use, {} idle",
                health.status.in_use, health.status.size, health.status.idle
            );
            if let Some(bytes) = health.file_size_bytes {
                println!("  Size:     {}", format_bytes(bytes));
            }
        }
        Err(e) => println!("  Health:   {} {}", style("unavailable").red(), style(e).dim()),
    }
    println!();

    println!("  {}", style("── Providers ──").dim());
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Role").fg(Color::White),
        Cell::new("Provider").fg(Color::White),
        Cell::new("Reachable").fg(Color::White),
        Cell::new("Latency").fg(Color::White),
        Cell::new("Circuit").fg(Color::White),
        Cell::new("Failures").fg(Color::White),
        Cell::new("Last Error").fg(Color::White),
    ]);

    for backend in &backends {
        let circuit_cell = match backend.breaker.state {
            CircuitState::Closed => Cell::new("closed").fg(Color::Green),
            CircuitState::Open => Cell::new("OPEN").fg(Color::Red),
            CircuitState::HalfOpen => Cell::new("half_open").fg(Color::Yellow),
        };
        let reachable_cell = if backend.reachable {
            Cell::new("yes").fg(Color::Green)
        } else {
            Cell::new("no").fg(Color::Red)
        };
        let last_error = backend.breaker.last_error.as_deref().unwrap_or("-");

        table.add_row(vec![
            Cell::new(backend.role).fg(Color::Cyan),
            Cell::new(&backend.name).fg(Color::White),
            reachable_cell,
            Cell::new(format!("{}ms", backend.latency_ms)).fg(Color::DarkGrey),
            circuit_cell,
            Cell::new(format!(
                "{}/{}",
                backend.breaker.failure_count, backend.breaker.failure_threshold
            ))
            .fg(Color::White),
            Cell::new(truncate(last_error, 40)).fg(Color::DarkGrey),
        ]);
    }
    println!("{table}");
    if backends.len() == 1 {
        println!(
            "  {}",
            style("No secondary provider: requests will not fall back.").yellow()
        );
    }
    println!();

    println!("  {}", style("── Cache ──").dim());
    println!(
        "  History:  capacity {}, ttl {}s",
        cache.capacity,
        state.history_cache.default_ttl().as_secs()
    );
    println!();

    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max.saturating_sub(3)) {
        Some((idx, _)) if s.chars().count() > max => format!("{}...", &s[..idx]),
        _ => s.to_string(),
    }
}

fn format_bytes(n: u64) -> String {
    if n >= 1 << 20 {
        format!("{:.1} MiB", n as f64 / (1u64 << 20) as f64)
    } else if n >= 1 << 10 {
        format!("{:.1} KiB", n as f64 / (1u64 << 10) as f64)
    } else {
        format!("{n} B")
    }
}
