use shared::metrics_defs::{MetricDef, MetricType};

pub const DIRECTORY_QUERY_DURATION: MetricDef = MetricDef {
    name: "directory.query.duration",
    metric_type: MetricType::Histogram,
    description: "Time spent in store queries, in seconds. Tagged with query.",
};

pub const ALL_METRICS: &[MetricDef] = &[DIRECTORY_QUERY_DURATION];
