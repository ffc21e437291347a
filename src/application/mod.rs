pub mod admission;
pub mod lifecycle_monitor;
pub mod runtime;

pub use admission::{AdmissionController, AdmissionRequest};
pub use lifecycle_monitor::{LifecycleMonitor, MonitorHandles, MonitorSettings};
pub use runtime::WardenRuntime;
