//! Snapshot views: summary, nodes, pods, alerts and events

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use console_lib::{
    anomaly::{classify_pod, is_stuck_creating},
    Alert, AlertRules, AlertSeverity, ClusterSnapshot, ClusterSummary, EventRecord, NodeRecord,
    PodRecord,
};
use tabled::Tabled;

use crate::output::{
    color_percent, color_status, format_age, format_bytes, format_cpu, format_rate, print_info,
    print_json, print_table, print_warning, OutputFormat,
};

#[derive(Tabled)]
pub struct NodeRow {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Roles")]
    pub roles: String,
    #[tabled(rename = "CPU")]
    pub cpu: String,
    #[tabled(rename = "Memory")]
    pub memory: String,
    #[tabled(rename = "Pods")]
    pub pods: String,
    #[tabled(rename = "Age")]
    pub age: String,
}

#[derive(Tabled)]
pub struct PodRow {
    #[tabled(rename = "Namespace")]
    pub namespace: String,
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Restarts")]
    pub restarts: u32,
    #[tabled(rename = "CPU")]
    pub cpu: String,
    #[tabled(rename = "Memory")]
    pub memory: String,
    #[tabled(rename = "Node")]
    pub node: String,
    #[tabled(rename = "Age")]
    pub age: String,
}

#[derive(Tabled)]
pub struct AlertRow {
    #[tabled(rename = "Severity")]
    pub severity: String,
    #[tabled(rename = "Kind")]
    pub kind: String,
    #[tabled(rename = "Resource")]
    pub resource: String,
    #[tabled(rename = "Message")]
    pub message: String,
}

#[derive(Tabled)]
pub struct EventRow {
    #[tabled(rename = "Type")]
    pub event_type: String,
    #[tabled(rename = "Reason")]
    pub reason: String,
    #[tabled(rename = "Object")]
    pub object: String,
    #[tabled(rename = "Count")]
    pub count: u32,
    #[tabled(rename = "Last Seen")]
    pub last_seen: String,
    #[tabled(rename = "Message")]
    pub message: String,
}

/// Usage cell: percent when metrics arrived, `-` otherwise
fn usage_cell(has_metrics: bool, used: String, percent: f64, warn: f64, crit: f64) -> String {
    if has_metrics {
        format!("{} ({})", used, color_percent(percent, warn, crit))
    } else {
        "-".to_string()
    }
}

pub fn node_rows(nodes: &[NodeRecord], rules: &AlertRules, now: DateTime<Utc>) -> Vec<NodeRow> {
    nodes
        .iter()
        .map(|n| {
            let mut status = if n.ready { "Ready" } else { "NotReady" }.to_string();
            if n.unschedulable {
                status.push_str(",SchedulingDisabled");
            }
            NodeRow {
                name: n.name.clone(),
                status: color_status(&status),
                roles: if n.roles.is_empty() {
                    "<none>".to_string()
                } else {
                    n.roles.join(",")
                },
                cpu: usage_cell(
                    n.has_metrics,
                    format_cpu(n.cpu_usage_millis),
                    n.cpu_usage_percent,
                    rules.cpu_warning_percent,
                    rules.cpu_critical_percent,
                ),
                memory: usage_cell(
                    n.has_metrics,
                    format_bytes(n.memory_usage_bytes),
                    n.memory_usage_percent,
                    rules.memory_warning_percent,
                    rules.memory_critical_percent,
                ),
                pods: format!("{}/{}", n.pod_count, n.pod_allocatable),
                age: format_age(n.created_at, now),
            }
        })
        .collect()
}

/// Phase, or the anomaly that explains it
pub fn pod_status(pod: &PodRecord) -> String {
    if let Some(anomaly) = classify_pod(pod) {
        return anomaly.to_string();
    }
    if is_stuck_creating(pod) {
        return "ContainerCreating".to_string();
    }
    pod.phase.clone()
}

pub fn pod_rows(pods: &[PodRecord], problems_only: bool, now: DateTime<Utc>) -> Vec<PodRow> {
    pods.iter()
        .filter_map(|p| {
            let status = pod_status(p);
            if problems_only && (status == "Running" || status == "Succeeded") {
                return None;
            }
            Some(PodRow {
                namespace: p.namespace.clone(),
                name: p.name.clone(),
                status: color_status(&status),
                restarts: p.restart_count(),
                cpu: if p.has_metrics {
                    format_cpu(p.cpu_usage_millis)
                } else {
                    "-".to_string()
                },
                memory: if p.has_metrics {
                    format_bytes(p.memory_usage_bytes)
                } else {
                    "-".to_string()
                },
                node: p.node.clone().unwrap_or_else(|| "<none>".to_string()),
                age: format_age(p.created_at, now),
            })
        })
        .collect()
}

pub fn alert_rows(alerts: &[Alert], min_severity: AlertSeverity) -> Vec<AlertRow> {
    alerts
        .iter()
        .filter(|a| a.severity >= min_severity)
        .map(|a| AlertRow {
            severity: color_status(&a.severity.to_string()),
            kind: a.resource_kind.clone(),
            resource: match &a.namespace {
                Some(ns) => format!("{}/{}", ns, a.name),
                None => a.name.clone(),
            },
            message: a.message.clone(),
        })
        .collect()
}

pub fn event_rows(events: &[EventRecord], warnings_only: bool, now: DateTime<Utc>) -> Vec<EventRow> {
    events
        .iter()
        .filter(|e| !warnings_only || e.event_type != "Normal")
        .map(|e| EventRow {
            event_type: color_status(&e.event_type),
            reason: e.reason.clone(),
            object: format!("{}/{}", e.object_kind.to_lowercase(), e.object_name),
            count: e.count,
            last_seen: format_age(e.last_seen, now),
            message: e.message.clone(),
        })
        .collect()
}

pub fn show_summary(snapshot: &ClusterSnapshot, rules: &AlertRules, format: OutputFormat) -> Result<()> {
    let s = &snapshot.summary;
    if format == OutputFormat::Json {
        return print_json(s);
    }

    let scope = if snapshot.namespace.is_empty() {
        "all namespaces".to_string()
    } else {
        format!("namespace {}", snapshot.namespace)
    };
    println!("{}", "Cluster Summary".bold());
    println!("{}", "=".repeat(60));
    println!(
        "Scope: {}    Fetched: {}",
        scope.cyan(),
        snapshot.fetched_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    print_nodes_section(s, rules);
    print_pods_section(s);
    print_workloads_section(s);

    if s.total_volumes > 0 || s.total_claims > 0 {
        println!("{}", "Storage".bold());
        println!(
            "  Volumes: {}  Claims: {} bound / {} pending  Used: {} of {} ({:.1}%)",
            s.total_volumes,
            s.bound_claims,
            s.pending_claims,
            format_bytes(s.claim_used_bytes),
            format_bytes(s.claimed_bytes),
            s.storage_usage_percent
        );
        println!();
    }

    if let Some(acc) = &s.accelerators {
        println!("{}", "Accelerators".bold());
        println!(
            "  {}: {} / {} allocated ({:.1}%) on {} nodes, avg utilization {:.1}%, {} unhealthy",
            acc.resource_name,
            acc.allocated,
            acc.allocatable,
            acc.allocation_percent,
            acc.nodes,
            acc.avg_utilization_percent,
            acc.unhealthy_chips
        );
        println!();
    }

    if let Some(sched) = &s.scheduler {
        println!("{}", "Scheduler".bold());
        println!(
            "  Jobs: {} running, {} pending, {} failed  Queues: {} ({} open)",
            sched.running_jobs, sched.pending_jobs, sched.failed_jobs, sched.queues, sched.open_queues
        );
        println!();
    }

    if let Some(reason) = &s.metrics_error {
        print_warning(&format!("Live metrics unavailable: {}", reason));
    }

    let critical = s
        .alerts
        .iter()
        .filter(|a| a.severity == AlertSeverity::Critical)
        .count();
    if s.alerts.is_empty() {
        print_info("No active alerts");
    } else {
        print_warning(&format!(
            "{} active alerts ({} critical), see `kcon alerts`",
            s.alerts.len(),
            critical
        ));
    }
    Ok(())
}

fn print_nodes_section(s: &ClusterSummary, rules: &AlertRules) {
    println!("{}", "Nodes".bold());
    println!(
        "  Total: {}  Ready: {}  NotReady: {}  Cordoned: {}",
        s.total_nodes,
        s.ready_nodes.to_string().green(),
        if s.not_ready_nodes > 0 {
            s.not_ready_nodes.to_string().red()
        } else {
            s.not_ready_nodes.to_string().normal()
        },
        s.unschedulable_nodes
    );
    if s.nodes_with_metrics > 0 {
        println!(
            "  CPU:    {} of {} used ({}), {} requested",
            format_cpu(s.cpu_usage_millis),
            format_cpu(s.cpu_allocatable_millis),
            color_percent(s.cpu_usage_percent, rules.cpu_warning_percent, rules.cpu_critical_percent),
            format!("{:.1}%", s.cpu_requested_percent)
        );
        println!(
            "  Memory: {} of {} used ({}), {} requested",
            format_bytes(s.memory_usage_bytes),
            format_bytes(s.memory_allocatable_bytes),
            color_percent(
                s.memory_usage_percent,
                rules.memory_warning_percent,
                rules.memory_critical_percent
            ),
            format!("{:.1}%", s.memory_requested_percent)
        );
        println!(
            "  Network: rx {}  tx {}",
            format_rate(s.network_rx_bytes_per_sec),
            format_rate(s.network_tx_bytes_per_sec)
        );
    }
    println!();
}

fn print_pods_section(s: &ClusterSummary) {
    println!("{}", "Pods".bold());
    println!(
        "  Total: {}  Running: {}  Pending: {}  Failed: {}  Succeeded: {}  Unknown: {}",
        s.total_pods,
        s.running_pods.to_string().green(),
        s.pending_pods.to_string().yellow(),
        s.failed_pods.to_string().red(),
        s.succeeded_pods,
        s.unknown_pods
    );
    println!(
        "  OOMKilled: {}  CrashLoop: {}  ImagePull: {}  Creating: {}  Restarts: {}",
        s.oom_killed_pods,
        s.crash_loop_pods,
        s.image_pull_error_pods,
        s.container_creating_pods,
        s.total_restarts
    );
    for pod in &s.top_restart_pods {
        println!(
            "    {}/{} restarts={} {}",
            pod.namespace,
            pod.name,
            pod.restart_count,
            pod.last_reason.as_deref().unwrap_or("")
        );
    }
    println!();
}

fn print_workloads_section(s: &ClusterSummary) {
    println!("{}", "Workloads".bold());
    println!(
        "  Deployments: {}  StatefulSets: {}  DaemonSets: {}  Jobs: {}  CronJobs: {}{}",
        s.deployments,
        s.stateful_sets,
        s.daemon_sets,
        s.jobs,
        s.cron_jobs,
        if s.workloads_inferred {
            let kinds: Vec<String> = s
                .inferred_workload_kinds
                .iter()
                .map(ToString::to_string)
                .collect();
            format!(" (inferred from pods: {})", kinds.join(", "))
                .dimmed()
                .to_string()
        } else {
            String::new()
        }
    );
    println!(
        "  Services: {}  without endpoints: {}  Events: {} ({} warnings)",
        s.total_services, s.services_without_endpoints, s.total_events, s.warning_events
    );
    println!();
}

pub fn show_nodes(snapshot: &ClusterSnapshot, rules: &AlertRules, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&snapshot.nodes),
        OutputFormat::Table => {
            print_table(node_rows(&snapshot.nodes, rules, Utc::now()), "No nodes found");
            Ok(())
        }
    }
}

pub fn show_pods(snapshot: &ClusterSnapshot, problems_only: bool, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&snapshot.pods),
        OutputFormat::Table => {
            print_table(
                pod_rows(&snapshot.pods, problems_only, Utc::now()),
                "No pods found",
            );
            Ok(())
        }
    }
}

pub fn show_alerts(
    snapshot: &ClusterSnapshot,
    min_severity: AlertSeverity,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let alerts: Vec<_> = snapshot
                .summary
                .alerts
                .iter()
                .filter(|a| a.severity >= min_severity)
                .collect();
            print_json(&alerts)
        }
        OutputFormat::Table => {
            print_table(
                alert_rows(&snapshot.summary.alerts, min_severity),
                "No active alerts",
            );
            Ok(())
        }
    }
}

pub fn show_events(snapshot: &ClusterSnapshot, warnings_only: bool, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(&snapshot.events),
        OutputFormat::Table => {
            print_table(
                event_rows(&snapshot.events, warnings_only, Utc::now()),
                "No events found",
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use console_lib::{ContainerRecord, ContainerState};

    fn pod(name: &str, phase: &str, reason: Option<&str>) -> PodRecord {
        PodRecord {
            name: name.to_string(),
            namespace: "default".to_string(),
            phase: phase.to_string(),
            containers: vec![ContainerRecord {
                name: "app".to_string(),
                state: if reason.is_some() {
                    ContainerState::Waiting
                } else {
                    ContainerState::Running
                },
                reason: reason.map(str::to_string),
                restart_count: 2,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_pod_status_prefers_anomaly() {
        assert_eq!(pod_status(&pod("a", "Running", None)), "Running");
        assert_eq!(
            pod_status(&pod("b", "Running", Some("CrashLoopBackOff"))),
            "CrashLoopBackOff"
        );
        assert_eq!(
            pod_status(&pod("c", "Pending", Some("ContainerCreating"))),
            "ContainerCreating"
        );
    }

    #[test]
    fn test_problem_filter() {
        colored::control::set_override(false);
        let pods = vec![
            pod("ok", "Running", None),
            pod("done", "Succeeded", None),
            pod("bad", "Running", Some("ErrImagePull")),
        ];
        let rows = pod_rows(&pods, true, Utc::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "bad");
        assert_eq!(rows[0].status, "ImagePullBackOff");
        assert_eq!(rows[0].restarts, 2);
        assert_eq!(rows[0].cpu, "-");
        assert_eq!(pod_rows(&pods, false, Utc::now()).len(), 3);
    }

    #[test]
    fn test_node_rows_without_metrics() {
        colored::control::set_override(false);
        let node = NodeRecord {
            name: "n1".to_string(),
            ready: false,
            unschedulable: true,
            pod_count: 3,
            pod_allocatable: 110,
            ..Default::default()
        };
        let rows = node_rows(&[node], &AlertRules::default(), Utc::now());
        assert_eq!(rows[0].status, "NotReady,SchedulingDisabled");
        assert_eq!(rows[0].roles, "<none>");
        assert_eq!(rows[0].cpu, "-");
        assert_eq!(rows[0].pods, "3/110");
    }

    #[test]
    fn test_event_warning_filter() {
        let events = vec![
            EventRecord {
                event_type: "Normal".to_string(),
                reason: "Scheduled".to_string(),
                ..Default::default()
            },
            EventRecord {
                event_type: "Warning".to_string(),
                reason: "BackOff".to_string(),
                object_kind: "Pod".to_string(),
                object_name: "web".to_string(),
                ..Default::default()
            },
        ];
        let rows = event_rows(&events, true, Utc::now());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].reason, "BackOff");
        assert_eq!(rows[0].object, "pod/web");
    }
}
