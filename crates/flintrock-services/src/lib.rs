//! Flintrock installable services
//!
//! Every service a cluster can run (Spark, HDFS) implements the [`Service`]
//! capability set: install, configure, start master, start slaves, stop,
//! health check, required ports. Services are independent values; a
//! cluster's installed services are an ordered list, and the order is fixed:
//! HDFS before Spark.

pub mod download;
pub mod error;
pub mod hdfs;
pub mod manifest;
pub mod params;
pub mod service;
pub mod spark;
pub mod template;

// Re-exports
pub use error::{Result, ServiceError};
pub use hdfs::HdfsService;
pub use manifest::{ClusterManifest, ServiceManifest};
pub use params::ClusterParams;
pub use service::{HealthStatus, Service};
pub use spark::{SparkInstallSource, SparkService};

/// Fixed installation and start order for known services.
const SERVICE_ORDER: [&str; 2] = ["hdfs", "spark"];

/// Sort services into their fixed execution order (HDFS before Spark).
pub fn sort_into_order(services: &mut [std::sync::Arc<dyn Service>]) {
    services.sort_by_key(|s| {
        SERVICE_ORDER
            .iter()
            .position(|name| *name == s.name())
            .unwrap_or(SERVICE_ORDER.len())
    });
}
