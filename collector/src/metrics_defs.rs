use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status, handler.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const COLLECT_DURATION: MetricDef = MetricDef {
    name: "usage.collect.duration",
    metric_type: MetricType::Histogram,
    description: "Wall time of one collection run in seconds, from directory lookup to report.",
};

pub const TASK_OUTCOME: MetricDef = MetricDef {
    name: "usage.task.outcome",
    metric_type: MetricType::Counter,
    description: "Upstream usage queries by terminal state. Tagged with status, kind.",
};

pub const PERSIST_FAILURES: MetricDef = MetricDef {
    name: "usage.persist.failures",
    metric_type: MetricType::Counter,
    description: "Task outcomes that could not be written to the usage store",
};

pub const EVENTS_ACCEPTED: MetricDef = MetricDef {
    name: "events.accepted",
    metric_type: MetricType::Counter,
    description: "Client events that passed validation",
};

pub const EVENTS_REJECTED: MetricDef = MetricDef {
    name: "events.rejected",
    metric_type: MetricType::Counter,
    description: "Client events rejected by validation",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    COLLECT_DURATION,
    TASK_OUTCOME,
    PERSIST_FAILURES,
    EVENTS_ACCEPTED,
    EVENTS_REJECTED,
];
