pub mod app_config;
pub mod balancer;
pub mod consensus;
pub mod governor;
pub mod logging;
pub mod metrics;
pub mod scheduler;

pub use app_config::*;
pub use balancer::*;
pub use consensus::*;
pub use governor::*;
pub use logging::*;
pub use metrics::*;
pub use scheduler::*;
