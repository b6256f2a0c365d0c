//! Container anomaly taxonomy
//!
//! Kubernetes reports container trouble as free-form reason strings. This is
//! the one place where those strings are mapped to anomaly kinds.

use serde::{Deserialize, Serialize};

use crate::models::{ContainerRecord, ContainerState, PodRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerAnomaly {
    OomKilled,
    CrashLoopBackOff,
    ImagePull,
    ContainerCreating,
}

/// Reason string -> anomaly
const REASONS: &[(&str, ContainerAnomaly)] = &[
    ("OOMKilled", ContainerAnomaly::OomKilled),
    ("CrashLoopBackOff", ContainerAnomaly::CrashLoopBackOff),
    ("ImagePullBackOff", ContainerAnomaly::ImagePull),
    ("ErrImagePull", ContainerAnomaly::ImagePull),
    ("ContainerCreating", ContainerAnomaly::ContainerCreating),
];

impl ContainerAnomaly {
    pub fn from_reason(reason: &str) -> Option<Self> {
        REASONS
            .iter()
            .find(|(r, _)| *r == reason)
            .map(|(_, anomaly)| *anomaly)
    }

    /// Rank among the mutually exclusive pod anomalies. ContainerCreating is
    /// tracked on its own and does not take part.
    pub fn priority(&self) -> Option<u8> {
        match self {
            ContainerAnomaly::OomKilled => Some(3),
            ContainerAnomaly::CrashLoopBackOff => Some(2),
            ContainerAnomaly::ImagePull => Some(1),
            ContainerAnomaly::ContainerCreating => None,
        }
    }
}

impl std::fmt::Display for ContainerAnomaly {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerAnomaly::OomKilled => write!(f, "OOMKilled"),
            ContainerAnomaly::CrashLoopBackOff => write!(f, "CrashLoopBackOff"),
            ContainerAnomaly::ImagePull => write!(f, "ImagePullBackOff"),
            ContainerAnomaly::ContainerCreating => write!(f, "ContainerCreating"),
        }
    }
}

/// Every anomaly a container currently shows. An OOM kill counts both when
/// the container is terminated by it and when it was the last termination.
pub fn container_anomalies(container: &ContainerRecord) -> Vec<ContainerAnomaly> {
    let mut found = Vec::new();
    if let Some(anomaly) = container.reason.as_deref().and_then(ContainerAnomaly::from_reason) {
        found.push(anomaly);
    }
    if container.state != ContainerState::Running
        || container.last_terminated_reason.as_deref() == Some("OOMKilled")
    {
        if let Some(anomaly) = container
            .last_terminated_reason
            .as_deref()
            .and_then(ContainerAnomaly::from_reason)
        {
            if !found.contains(&anomaly) {
                found.push(anomaly);
            }
        }
    }
    found
}

/// Whether any container of the pod shows `anomaly`
pub fn pod_has(pod: &PodRecord, anomaly: ContainerAnomaly) -> bool {
    pod.containers
        .iter()
        .any(|c| container_anomalies(c).contains(&anomaly))
}

/// Highest-priority exclusive anomaly of a pod, if any
pub fn classify_pod(pod: &PodRecord) -> Option<ContainerAnomaly> {
    pod.containers
        .iter()
        .flat_map(container_anomalies)
        .filter(|a| a.priority().is_some())
        .max_by_key(|a| a.priority())
}

/// Pending pod with at least one container still being created
pub fn is_stuck_creating(pod: &PodRecord) -> bool {
    pod.phase == "Pending" && pod_has(pod, ContainerAnomaly::ContainerCreating)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn waiting(reason: &str) -> ContainerRecord {
        ContainerRecord {
            name: "app".to_string(),
            state: ContainerState::Waiting,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_reason_lookup() {
        assert_eq!(
            ContainerAnomaly::from_reason("ErrImagePull"),
            Some(ContainerAnomaly::ImagePull)
        );
        assert_eq!(
            ContainerAnomaly::from_reason("ImagePullBackOff"),
            Some(ContainerAnomaly::ImagePull)
        );
        assert_eq!(ContainerAnomaly::from_reason("Completed"), None);
    }

    #[test]
    fn test_oom_outranks_crash_loop() {
        let mut oom = waiting("CrashLoopBackOff");
        oom.last_terminated_reason = Some("OOMKilled".to_string());
        let pod = PodRecord {
            containers: vec![waiting("ImagePullBackOff"), oom],
            ..Default::default()
        };
        assert_eq!(classify_pod(&pod), Some(ContainerAnomaly::OomKilled));
    }

    #[test]
    fn test_crash_loop_outranks_image_pull() {
        let pod = PodRecord {
            containers: vec![waiting("ErrImagePull"), waiting("CrashLoopBackOff")],
            ..Default::default()
        };
        assert_eq!(classify_pod(&pod), Some(ContainerAnomaly::CrashLoopBackOff));
    }

    #[test]
    fn test_container_creating_is_not_exclusive() {
        let pod = PodRecord {
            phase: "Pending".to_string(),
            containers: vec![waiting("ContainerCreating")],
            ..Default::default()
        };
        assert_eq!(classify_pod(&pod), None);
        assert!(is_stuck_creating(&pod));
    }

    #[test]
    fn test_recovered_container_keeps_crash_history_out() {
        // a running container whose previous run crashed is not an anomaly
        let container = ContainerRecord {
            state: ContainerState::Running,
            last_terminated_reason: Some("Error".to_string()),
            ..Default::default()
        };
        assert!(container_anomalies(&container).is_empty());
    }
}
