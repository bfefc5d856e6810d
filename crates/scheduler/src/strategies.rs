use tracing::debug;

use crate::models::Executor;

/// 选择负载率最低且仍有空闲容量的非降级执行器
///
/// 负载率相同时取迭代顺序中的第一个。
pub fn select_least_loaded<'a, I>(executors: I) -> Option<&'a Executor>
where
    I: IntoIterator<Item = &'a Executor>,
{
    let selected = executors
        .into_iter()
        .filter(|executor| executor.is_available())
        .min_by(|a, b| {
            a.load_ratio()
                .partial_cmp(&b.load_ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;

    debug!(
        "负载策略选择执行器: {} (负载: {}/{})",
        selected.id, selected.load, selected.capacity
    );
    Some(selected)
}
