//! 测试辅助工具

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use controlplane_core::ManualClock;
use tokio::time::sleep;

/// 测试环境辅助
pub struct TestEnv;

impl TestEnv {
    /// 轮询等待条件成立，超时返回 false
    ///
    /// 用于等待后台任务（例如冲突自动解决）推进状态。
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(10)).await;
        }

        condition().await
    }

    /// 固定起点的手动时钟，返回克隆体和可注入组件的 trait 对象
    pub fn manual_clock() -> (ManualClock, Arc<ManualClock>) {
        let clock = ManualClock::new(Self::epoch());
        (clock.clone(), Arc::new(clock))
    }

    /// 测试使用的固定起始时间
    pub fn epoch() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// 断言辅助
pub struct TestAssertions;

impl TestAssertions {
    /// 断言两个浮点数足够接近
    pub fn assert_close(actual: f64, expected: f64, tolerance: f64) {
        assert!(
            (actual - expected).abs() <= tolerance,
            "期望 {expected} ± {tolerance}，实际 {actual}"
        );
    }

    /// 断言集合包含且只包含期望元素（不计顺序）
    pub fn assert_contains_exactly<T: PartialEq + std::fmt::Debug>(actual: &[T], expected: &[T]) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "集合长度不同，实际: {actual:?}，期望: {expected:?}"
        );
        for item in expected {
            assert!(actual.contains(item), "缺少 {item:?}，实际: {actual:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use controlplane_core::Clock;

    #[tokio::test]
    async fn test_wait_for() {
        let mut calls = 0;
        let done = TestEnv::wait_for(
            || {
                calls += 1;
                let ready = calls >= 3;
                async move { ready }
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(done);
    }

    #[test]
    fn test_manual_clock_shared() {
        let (clock, shared) = TestEnv::manual_clock();
        clock.advance(Duration::from_secs(5));
        assert_eq!(shared.now(), TestEnv::epoch() + chrono::Duration::seconds(5));
    }
}
