//! Pod log retrieval

use anyhow::Result;
use console_lib::Console;
use serde::Serialize;

use crate::output::{print_json, print_warning, OutputFormat};

#[derive(Serialize)]
struct LogOutput<'a> {
    namespace: &'a str,
    pod: &'a str,
    container: Option<&'a str>,
    lines: Vec<&'a str>,
}

pub async fn show_logs(
    console: &Console,
    namespace: &str,
    pod: &str,
    container: Option<&str>,
    tail: Option<i64>,
    format: OutputFormat,
) -> Result<()> {
    let logs = console.pod_logs(namespace, pod, container, tail).await?;

    match format {
        OutputFormat::Json => print_json(&LogOutput {
            namespace,
            pod,
            container,
            lines: logs.lines().collect(),
        }),
        OutputFormat::Table => {
            if logs.is_empty() {
                print_warning(&format!("No log output for {}/{}", namespace, pod));
            } else {
                print!("{}", logs);
                if !logs.ends_with('\n') {
                    println!();
                }
            }
            Ok(())
        }
    }
}
