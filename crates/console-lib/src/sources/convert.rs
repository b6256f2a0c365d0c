//! Conversion of API server objects into console records

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    Container, ContainerStatus, Endpoints, Event, Node, PersistentVolume, PersistentVolumeClaim,
    Pod, Service,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use super::quantity;
use crate::models::{
    pod_key, ContainerRecord, ContainerState, EventRecord, NodeAccelerators, NodeRecord,
    PodRecord, ServiceRecord, VolumeClaimRecord, VolumeRecord, WorkloadKind, WorkloadRecord,
};

const ROLE_LABEL_PREFIX: &str = "node-role.kubernetes.io/";

/// Knobs that change how objects are read
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Extended resource name of the accelerator, e.g. `google.com/tpu`
    pub accelerator_resource: String,
    /// Node label carrying the accelerator topology id
    pub topology_label: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            accelerator_resource: "google.com/tpu".to_string(),
            topology_label: "cloud.google.com/gke-tpu-topology".to_string(),
        }
    }
}

fn timestamp(t: Option<&Time>) -> Option<DateTime<Utc>> {
    t.map(|t| t.0)
}

fn labels_of<K: ResourceExt>(obj: &K) -> BTreeMap<String, String> {
    obj.labels().clone()
}

fn non_negative(v: i32) -> u32 {
    v.max(0) as u32
}

pub fn node_record(node: &Node, opts: &ConvertOptions) -> NodeRecord {
    let labels = labels_of(node);
    let mut roles: Vec<String> = labels
        .keys()
        .filter_map(|k| k.strip_prefix(ROLE_LABEL_PREFIX))
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect();
    roles.sort();

    let mut record = NodeRecord {
        name: node.name_any(),
        roles,
        created_at: timestamp(node.metadata.creation_timestamp.as_ref()),
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
        ..Default::default()
    };

    let topology = labels.get(&opts.topology_label).cloned();
    record.labels = labels;

    let Some(status) = node.status.as_ref() else {
        return record;
    };

    for address in status.addresses.iter().flatten() {
        match address.type_.as_str() {
            "InternalIP" if record.internal_ip.is_none() => {
                record.internal_ip = Some(address.address.clone())
            }
            "ExternalIP" if record.external_ip.is_none() => {
                record.external_ip = Some(address.address.clone())
            }
            _ => {}
        }
    }

    if let Some(info) = status.node_info.as_ref() {
        record.kubelet_version = info.kubelet_version.clone();
        record.os_image = info.os_image.clone();
    }

    let empty = BTreeMap::new();
    let capacity = status.capacity.as_ref().unwrap_or(&empty);
    let allocatable = status.allocatable.as_ref().unwrap_or(&empty);
    record.cpu_capacity_millis = quantity::cpu_millis(capacity.get("cpu"));
    record.cpu_allocatable_millis = quantity::cpu_millis(allocatable.get("cpu"));
    record.memory_capacity_bytes = quantity::bytes(capacity.get("memory"));
    record.memory_allocatable_bytes = quantity::bytes(allocatable.get("memory"));
    record.pod_capacity = quantity::count(capacity.get("pods"));
    record.pod_allocatable = quantity::count(allocatable.get("pods"));

    let accel_capacity = quantity::count(capacity.get(&opts.accelerator_resource));
    if accel_capacity > 0 {
        record.accelerator = Some(NodeAccelerators {
            resource_name: opts.accelerator_resource.clone(),
            capacity: accel_capacity,
            allocatable: quantity::count(allocatable.get(&opts.accelerator_resource)),
            topology,
            ..Default::default()
        });
    }

    for condition in status.conditions.iter().flatten() {
        let on = condition.status == "True";
        match condition.type_.as_str() {
            "Ready" => record.ready = on,
            "MemoryPressure" => record.memory_pressure = on,
            "DiskPressure" => record.disk_pressure = on,
            "PIDPressure" => record.pid_pressure = on,
            _ => {}
        }
    }

    record
}

fn resource(map: Option<&BTreeMap<String, Quantity>>, key: &str) -> Option<Quantity> {
    map.and_then(|m| m.get(key)).cloned()
}

fn container_record(container: &Container, status: Option<&ContainerStatus>) -> ContainerRecord {
    let requests = container.resources.as_ref().and_then(|r| r.requests.as_ref());
    let limits = container.resources.as_ref().and_then(|r| r.limits.as_ref());

    let mut record = ContainerRecord {
        name: container.name.clone(),
        image: container.image.clone().unwrap_or_default(),
        cpu_request_millis: quantity::cpu_millis(resource(requests, "cpu").as_ref()),
        cpu_limit_millis: quantity::cpu_millis(resource(limits, "cpu").as_ref()),
        memory_request_bytes: quantity::bytes(resource(requests, "memory").as_ref()),
        memory_limit_bytes: quantity::bytes(resource(limits, "memory").as_ref()),
        ..Default::default()
    };

    if let Some(status) = status {
        record.ready = status.ready;
        record.restart_count = non_negative(status.restart_count);
        if !status.image.is_empty() {
            record.image = status.image.clone();
        }
        if let Some(state) = status.state.as_ref() {
            if state.running.is_some() {
                record.state = ContainerState::Running;
            } else if let Some(waiting) = state.waiting.as_ref() {
                record.state = ContainerState::Waiting;
                record.reason = waiting.reason.clone();
            } else if let Some(terminated) = state.terminated.as_ref() {
                record.state = ContainerState::Terminated;
                record.reason = terminated.reason.clone();
            }
        }
        record.last_terminated_reason = status
            .last_state
            .as_ref()
            .and_then(|s| s.terminated.as_ref())
            .and_then(|t| t.reason.clone());
    }

    record
}

pub fn pod_record(pod: &Pod, opts: &ConvertOptions) -> PodRecord {
    let statuses: HashMap<&str, &ContainerStatus> = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .map(|s| (s.name.as_str(), s))
        .collect();

    let mut record = PodRecord {
        name: pod.name_any(),
        namespace: pod.namespace().unwrap_or_default(),
        labels: labels_of(pod),
        created_at: timestamp(pod.metadata.creation_timestamp.as_ref()),
        phase: pod
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        pod_ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        ..Default::default()
    };

    if let Some(spec) = pod.spec.as_ref() {
        record.node = spec.node_name.clone();
        for container in &spec.containers {
            let c = container_record(container, statuses.get(container.name.as_str()).copied());
            record.cpu_request_millis += c.cpu_request_millis;
            record.cpu_limit_millis += c.cpu_limit_millis;
            record.memory_request_bytes += c.memory_request_bytes;
            record.memory_limit_bytes += c.memory_limit_bytes;
            record.containers.push(c);

            let resources = container.resources.as_ref();
            let requested = resource(
                resources.and_then(|r| r.requests.as_ref()),
                &opts.accelerator_resource,
            )
            .or_else(|| {
                resource(
                    resources.and_then(|r| r.limits.as_ref()),
                    &opts.accelerator_resource,
                )
            });
            record.accelerator_request += quantity::count(requested.as_ref());
        }
    }

    record
}

/// Last observation time: last timestamp, else event time, else creation
fn event_last_seen(event: &Event) -> Option<DateTime<Utc>> {
    event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0))
        .or_else(|| timestamp(event.metadata.creation_timestamp.as_ref()))
}

pub fn event_record(event: &Event) -> EventRecord {
    EventRecord {
        namespace: event.namespace().unwrap_or_default(),
        object_kind: event.involved_object.kind.clone().unwrap_or_default(),
        object_name: event.involved_object.name.clone().unwrap_or_default(),
        event_type: event.type_.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        message: event.message.clone().unwrap_or_default(),
        count: event.count.map(non_negative).unwrap_or(1),
        last_seen: event_last_seen(event),
    }
}

/// Apply the type filter, sort newest first and keep `limit`
pub fn select_events(mut events: Vec<EventRecord>, types: &[String], limit: usize) -> Vec<EventRecord> {
    if !types.is_empty() {
        events.retain(|e| types.iter().any(|t| t.eq_ignore_ascii_case(&e.event_type)));
    }
    events.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
    events.truncate(limit);
    events
}

/// Ready addresses per `namespace/name`
pub fn ready_endpoint_counts(endpoints: &[Endpoints]) -> HashMap<String, u32> {
    endpoints
        .iter()
        .map(|ep| {
            let ready: usize = ep
                .subsets
                .iter()
                .flatten()
                .map(|s| s.addresses.as_ref().map(Vec::len).unwrap_or(0))
                .sum();
            (
                pod_key(&ep.namespace().unwrap_or_default(), &ep.name_any()),
                ready as u32,
            )
        })
        .collect()
}

pub fn service_record(service: &Service, ready: &HashMap<String, u32>) -> ServiceRecord {
    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let spec = service.spec.as_ref();
    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .map(|p| {
            let protocol = p.protocol.as_deref().unwrap_or("TCP");
            match p.node_port {
                Some(node_port) => format!("{}:{}/{}", p.port, node_port, protocol),
                None => format!("{}/{}", p.port, protocol),
            }
        })
        .collect();

    ServiceRecord {
        ready_endpoints: ready.get(&pod_key(&namespace, &name)).copied().unwrap_or(0),
        service_type: spec
            .and_then(|s| s.type_.clone())
            .unwrap_or_else(|| "ClusterIP".to_string()),
        cluster_ip: spec.and_then(|s| s.cluster_ip.clone()),
        ports,
        name,
        namespace,
    }
}

pub fn volume_record(volume: &PersistentVolume) -> VolumeRecord {
    let spec = volume.spec.as_ref();
    VolumeRecord {
        name: volume.name_any(),
        capacity_bytes: quantity::bytes(
            spec.and_then(|s| s.capacity.as_ref())
                .and_then(|c| c.get("storage")),
        ),
        phase: volume
            .status
            .as_ref()
            .and_then(|s| s.phase.clone())
            .unwrap_or_default(),
        storage_class: spec.and_then(|s| s.storage_class_name.clone()),
        claim: spec.and_then(|s| s.claim_ref.as_ref()).map(|r| {
            pod_key(
                r.namespace.as_deref().unwrap_or_default(),
                r.name.as_deref().unwrap_or_default(),
            )
        }),
        reclaim_policy: spec.and_then(|s| s.persistent_volume_reclaim_policy.clone()),
    }
}

pub fn volume_claim_record(claim: &PersistentVolumeClaim) -> VolumeClaimRecord {
    let status = claim.status.as_ref();
    let spec = claim.spec.as_ref();
    VolumeClaimRecord {
        name: claim.name_any(),
        namespace: claim.namespace().unwrap_or_default(),
        phase: status.and_then(|s| s.phase.clone()).unwrap_or_default(),
        capacity_bytes: quantity::bytes(
            status
                .and_then(|s| s.capacity.as_ref())
                .and_then(|c| c.get("storage")),
        ),
        used_bytes: None,
        storage_class: spec.and_then(|s| s.storage_class_name.clone()),
        volume_name: spec.and_then(|s| s.volume_name.clone()),
        created_at: timestamp(claim.metadata.creation_timestamp.as_ref()),
    }
}

pub fn deployment_record(d: &Deployment) -> WorkloadRecord {
    let mut record = WorkloadRecord::new(
        WorkloadKind::Deployment,
        d.namespace().unwrap_or_default(),
        d.name_any(),
    );
    record.desired = d.spec.as_ref().and_then(|s| s.replicas).map(non_negative).unwrap_or(1);
    if let Some(status) = d.status.as_ref() {
        record.ready = status.ready_replicas.map(non_negative).unwrap_or(0);
        record.available = status.available_replicas.map(non_negative).unwrap_or(0);
    }
    record
}

pub fn stateful_set_record(s: &StatefulSet) -> WorkloadRecord {
    let mut record = WorkloadRecord::new(
        WorkloadKind::StatefulSet,
        s.namespace().unwrap_or_default(),
        s.name_any(),
    );
    record.desired = s.spec.as_ref().and_then(|s| s.replicas).map(non_negative).unwrap_or(1);
    if let Some(status) = s.status.as_ref() {
        record.ready = status.ready_replicas.map(non_negative).unwrap_or(0);
        record.available = status.available_replicas.map(non_negative).unwrap_or(0);
    }
    record
}

pub fn daemon_set_record(d: &DaemonSet) -> WorkloadRecord {
    let mut record = WorkloadRecord::new(
        WorkloadKind::DaemonSet,
        d.namespace().unwrap_or_default(),
        d.name_any(),
    );
    if let Some(status) = d.status.as_ref() {
        record.desired = non_negative(status.desired_number_scheduled);
        record.ready = non_negative(status.number_ready);
        record.available = status.number_available.map(non_negative).unwrap_or(0);
    }
    record
}

pub fn job_record(j: &Job) -> WorkloadRecord {
    let mut record = WorkloadRecord::new(WorkloadKind::Job, j.namespace().unwrap_or_default(), j.name_any());
    record.desired = j.spec.as_ref().and_then(|s| s.completions).map(non_negative).unwrap_or(1);
    if let Some(status) = j.status.as_ref() {
        record.active = status.active.map(non_negative).unwrap_or(0);
        record.ready = status.ready.map(non_negative).unwrap_or(0);
        record.succeeded = status.succeeded.map(non_negative).unwrap_or(0);
        record.failed = status.failed.map(non_negative).unwrap_or(0);
    }
    record
}

pub fn cron_job_record(c: &CronJob) -> WorkloadRecord {
    let mut record = WorkloadRecord::new(
        WorkloadKind::CronJob,
        c.namespace().unwrap_or_default(),
        c.name_any(),
    );
    if let Some(spec) = c.spec.as_ref() {
        record.schedule = Some(spec.schedule.clone());
        record.suspended = spec.suspend.unwrap_or(false);
    }
    if let Some(status) = c.status.as_ref() {
        record.active = status.active.as_ref().map(|a| a.len() as u32).unwrap_or(0);
        record.last_schedule = timestamp(status.last_schedule_time.as_ref());
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        ContainerStateTerminated, ContainerStateWaiting, EndpointAddress, EndpointSubset,
        NodeCondition, NodeStatus, PodSpec, PodStatus, ResourceRequirements, ServicePort,
        ServiceSpec,
    };
    use kube::api::ObjectMeta;

    fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    fn condition(type_: &str, status: &str) -> NodeCondition {
        NodeCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_conversion() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("tpu-node".to_string()),
                labels: Some(
                    [
                        ("node-role.kubernetes.io/worker".to_string(), "".to_string()),
                        (
                            "cloud.google.com/gke-tpu-topology".to_string(),
                            "2x2".to_string(),
                        ),
                    ]
                    .into_iter()
                    .collect(),
                ),
                ..Default::default()
            },
            status: Some(NodeStatus {
                capacity: Some(quantities(&[
                    ("cpu", "4"),
                    ("memory", "16Gi"),
                    ("pods", "110"),
                    ("google.com/tpu", "4"),
                ])),
                allocatable: Some(quantities(&[
                    ("cpu", "3800m"),
                    ("memory", "15Gi"),
                    ("pods", "110"),
                    ("google.com/tpu", "4"),
                ])),
                conditions: Some(vec![
                    condition("Ready", "True"),
                    condition("MemoryPressure", "False"),
                    condition("DiskPressure", "True"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = node_record(&node, &ConvertOptions::default());
        assert_eq!(record.name, "tpu-node");
        assert_eq!(record.roles, vec!["worker".to_string()]);
        assert!(record.ready);
        assert!(!record.memory_pressure);
        assert!(record.disk_pressure);
        assert_eq!(record.cpu_capacity_millis, 4000);
        assert_eq!(record.cpu_allocatable_millis, 3800);
        assert_eq!(record.memory_capacity_bytes, 16 * 1024 * 1024 * 1024);
        assert_eq!(record.pod_allocatable, 110);
        let accel = record.accelerator.expect("accelerator capacity");
        assert_eq!(accel.capacity, 4);
        assert_eq!(accel.topology.as_deref(), Some("2x2"));
    }

    #[test]
    fn test_node_without_status_is_not_ready() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let record = node_record(&node, &ConvertOptions::default());
        assert!(!record.ready);
        assert!(record.accelerator.is_none());
    }

    #[test]
    fn test_pod_conversion() {
        let container = |name: &str, cpu: &str, memory: &str| Container {
            name: name.to_string(),
            image: Some("nginx:1.25".to_string()),
            resources: Some(ResourceRequirements {
                requests: Some(quantities(&[("cpu", cpu), ("memory", memory)])),
                limits: Some(quantities(&[("google.com/tpu", "2")])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web-0".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("n1".to_string()),
                containers: vec![container("app", "250m", "128Mi"), container("sidecar", "50m", "64Mi")],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "app".to_string(),
                    image: "nginx:1.25".to_string(),
                    ready: false,
                    restart_count: 7,
                    state: Some(k8s_openapi::api::core::v1::ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("CrashLoopBackOff".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    last_state: Some(k8s_openapi::api::core::v1::ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            reason: Some("OOMKilled".to_string()),
                            exit_code: 137,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
        };

        let record = pod_record(&pod, &ConvertOptions::default());
        assert_eq!(record.key(), "prod/web-0");
        assert_eq!(record.node.as_deref(), Some("n1"));
        assert_eq!(record.cpu_request_millis, 300);
        assert_eq!(record.memory_request_bytes, 192 * 1024 * 1024);
        assert_eq!(record.accelerator_request, 4);
        assert_eq!(record.restart_count(), 7);

        let app = &record.containers[0];
        assert_eq!(app.state, ContainerState::Waiting);
        assert_eq!(app.reason.as_deref(), Some("CrashLoopBackOff"));
        assert_eq!(app.last_terminated_reason.as_deref(), Some("OOMKilled"));
        // no status reported yet
        assert_eq!(record.containers[1].state, ContainerState::Unknown);
    }

    #[test]
    fn test_event_selection() {
        let at = |secs: i64| DateTime::<Utc>::from_timestamp(secs, 0);
        let event = |event_type: &str, secs: i64| EventRecord {
            event_type: event_type.to_string(),
            last_seen: at(secs),
            ..Default::default()
        };
        let events = vec![
            event("Normal", 10),
            event("Warning", 30),
            event("Warning", 20),
            event("Normal", 40),
        ];

        let all = select_events(events.clone(), &[], 3);
        let seen: Vec<_> = all.iter().map(|e| e.last_seen).collect();
        assert_eq!(seen, vec![at(40), at(30), at(20)]);

        let warnings = select_events(events, &["Warning".to_string()], 10);
        assert_eq!(warnings.len(), 2);
        assert_eq!(warnings[0].last_seen, at(30));
    }

    #[test]
    fn test_service_ready_endpoints_join() {
        let endpoints = Endpoints {
            metadata: ObjectMeta {
                name: Some("api".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress::default(), EndpointAddress::default()]),
                ..Default::default()
            }]),
        };
        let ready = ready_endpoint_counts(&[endpoints]);

        let service = Service {
            metadata: ObjectMeta {
                name: Some("api".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: 80,
                    node_port: Some(30080),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = service_record(&service, &ready);
        assert_eq!(record.ready_endpoints, 2);
        assert_eq!(record.ports, vec!["80:30080/TCP".to_string()]);
        assert_eq!(record.service_type, "NodePort");
    }
}
