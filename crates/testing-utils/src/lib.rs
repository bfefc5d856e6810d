//! # 控制平面测试工具
//!
//! 各组件共享的测试数据构建器、接口替身和辅助函数。
//!
//! ```toml
//! [dev-dependencies]
//! controlplane-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;

pub use controlplane_core::ManualClock;
pub use controlplane_observability::RecordingMetricsSink;
