pub mod observability;

pub use observability::{
    detailed_health_check,
    normalize_path,
    observability_layer,
    HealthCheckResponse,
    ServiceStatus,
};
