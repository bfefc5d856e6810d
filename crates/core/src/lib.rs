//! 控制平面核心抽象
//!
//! 各组件共享的时钟、能力接口、环形缓冲区和指标点定义。组件之间只通过
//! 这里的接口互相调用，不持有彼此的具体类型。

pub mod clock;
pub mod history;
pub mod metrics;
pub mod ring_buffer;
pub mod traits;

pub use clock::{to_chrono, Clock, ManualClock, SystemClock};
pub use history::HistoryEntry;
pub use metrics::{MetricPoint, MetricsSink, NoopMetricsSink};
pub use ring_buffer::RingBuffer;
pub use traits::{ActionSink, PressureSource, PressureTarget};

pub use controlplane_errors::{ControlPlaneError, ControlPlaneResult, ErrorKind, ResultExt};
