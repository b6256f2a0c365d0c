//! Continuously refreshed summary

use std::time::Duration;

use anyhow::Result;
use colored::Colorize;
use console_lib::{AlertRules, Console};
use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::commands::cluster;
use crate::output::{print_error, print_warning, OutputFormat};

/// Redraw the summary every `every` until Ctrl-C. The console's refresher
/// keeps the cache warm in the background.
pub async fn watch(
    console: &Console,
    rules: &AlertRules,
    every: Duration,
    format: OutputFormat,
) -> Result<()> {
    console.start().await?;

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let result = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = render(console, rules, format).await {
                    break Err(e);
                }
            }
            signal = tokio::signal::ctrl_c() => {
                debug!("Interrupted");
                break signal.map_err(Into::into);
            }
        }
    };

    console.shutdown().await;
    result
}

async fn render(console: &Console, rules: &AlertRules, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Table {
        // clear screen, cursor home
        print!("\x1B[2J\x1B[H");
    }

    match console.cluster_data().await {
        Ok((snapshot, _)) => cluster::show_summary(&snapshot, rules, format)?,
        Err(e) => {
            print_error(&format!("Refresh failed: {}", e));
            // keep the last good view on screen, marked as stale
            if let Some(stale) = console.latest() {
                print_warning(&format!(
                    "Showing data from {}",
                    stale.fetched_at.format("%H:%M:%S")
                ));
                cluster::show_summary(&stale, rules, format)?;
            }
        }
    }

    if format == OutputFormat::Table {
        let status = console.refresher_status();
        let footer = match (&status.last_error, status.last_update) {
            (Some(err), _) => format!("last refresh failed: {}", err).red().to_string(),
            (None, Some(at)) => format!("updated {}", at.format("%H:%M:%S"))
                .dimmed()
                .to_string(),
            (None, None) => "waiting for first refresh".dimmed().to_string(),
        };
        println!("\n{}  {}", footer, "(Ctrl-C to quit)".dimmed());
    }
    Ok(())
}
