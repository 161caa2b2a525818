//! Metrics definitions for the gray release rule engine.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "Counter",
            MetricType::Gauge => "Gauge",
            MetricType::Histogram => "Histogram",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDef {
    pub name: &'static str,
    pub metric_type: MetricType,
    pub description: &'static str,
}

macro_rules! counter {
    ($def:expr) => {
        metrics::counter!($def.name)
    };
    ($def:expr, $($label:tt)+) => {
        metrics::counter!($def.name, $($label)+)
    };
}

macro_rules! gauge {
    ($def:expr) => {
        metrics::gauge!($def.name)
    };
}

macro_rules! histogram {
    ($def:expr) => {
        metrics::histogram!($def.name)
    };
}

pub(crate) use counter;
pub(crate) use gauge;
pub(crate) use histogram;

pub const SCAN_DURATION: MetricDef = MetricDef {
    name: "gray_rules.scan.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a full rule scan in seconds",
};

pub const SCAN_ROWS: MetricDef = MetricDef {
    name: "gray_rules.scan.rows",
    metric_type: MetricType::Histogram,
    description: "Number of rule rows read by a full scan",
};

pub const SCAN_FAILURES: MetricDef = MetricDef {
    name: "gray_rules.scan.failures",
    metric_type: MetricType::Counter,
    description: "Number of scan passes aborted by a source error",
};

pub const MERGE_OUTCOME: MetricDef = MetricDef {
    name: "gray_rules.merge.outcome",
    metric_type: MetricType::Counter,
    description: "Rows processed by merge. Tagged with outcome: installed, reconfirmed, purged",
};

pub const NOTIFICATIONS_RECEIVED: MetricDef = MetricDef {
    name: "gray_rules.notifications.received",
    metric_type: MetricType::Counter,
    description: "Release change notifications handled",
};

pub const NOTIFICATIONS_DROPPED: MetricDef = MetricDef {
    name: "gray_rules.notifications.dropped",
    metric_type: MetricType::Counter,
    description: "Release change notifications dropped as malformed or failed to refresh",
};

pub const TARGETS: MetricDef = MetricDef {
    name: "gray_rules.targets",
    metric_type: MetricType::Gauge,
    description: "Number of configuration targets with at least one branch rule",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SCAN_DURATION,
    SCAN_ROWS,
    SCAN_FAILURES,
    MERGE_OUTCOME,
    NOTIFICATIONS_RECEIVED,
    NOTIFICATIONS_DROPPED,
    TARGETS,
];
