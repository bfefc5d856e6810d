//! 节点状态分级、指标推导与评分

use std::collections::BTreeMap;

use crate::models::{NodeMetrics, NodeStatus, ResourceVector};

/// 按负载对节点分级并给出健康度
///
/// 低于 `target` 为 healthy（健康度 1）；`target` 到 `max` 之间为 busy，
/// 健康度从 1 线性降到 0.5；达到 `max` 后为 overloaded，健康度从 0.5
/// 继续线性降到负载 1.0 时的 0。
pub fn classify(load: f64, target: f64, max: f64) -> (NodeStatus, f64) {
    let load = load.clamp(0.0, 1.0);
    if load < target {
        return (NodeStatus::Healthy, 1.0);
    }
    if load < max {
        let span = (max - target).max(f64::EPSILON);
        let health = 1.0 - 0.5 * (load - target) / span;
        return (NodeStatus::Busy, health.clamp(0.5, 1.0));
    }
    let span = 1.0 - max;
    let health = if span <= f64::EPSILON {
        0.0
    } else {
        0.5 * (1.0 - (load - max) / span)
    };
    (NodeStatus::Overloaded, health.clamp(0.0, 0.5))
}

/// 由负载推导运行指标
///
/// 响应时间按排队模型随负载上升，超过 `max_load` 的部分折算为错误率。
pub fn derive_metrics(
    load: f64,
    capacity: &ResourceVector,
    base_response_time_ms: f64,
    max_load: f64,
) -> NodeMetrics {
    let load = load.clamp(0.0, 1.0);
    let headroom = (1.0 - load).max(0.05);
    let error_rate = if load > max_load && max_load < 1.0 {
        ((load - max_load) / (1.0 - max_load)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    NodeMetrics {
        utilization: load,
        response_time_ms: base_response_time_ms / headroom,
        throughput: capacity.cpu * (1.0 - load) * (1.0 - error_rate),
        error_rate,
    }
}

/// 节点评分：健康度、空闲率、容量倍数三者的算术平均
///
/// 容量倍数取 CPU 与内存中较紧的一项，不做截断。
pub fn score(health: f64, load: f64, capacity: &ResourceVector, requirement: &ResourceVector) -> f64 {
    let cpu_ratio = capacity.cpu / requirement.cpu;
    let memory_ratio = capacity.memory / requirement.memory;
    (health + (1.0 - load) + cpu_ratio.min(memory_ratio)) / 3.0
}

/// 评分归一化为理想分布，总分不为正时返回空
pub fn ideal_distribution(scores: &[(String, f64)]) -> BTreeMap<String, f64> {
    let total: f64 = scores.iter().map(|(_, score)| score.max(0.0)).sum();
    if total <= 0.0 {
        return BTreeMap::new();
    }
    scores
        .iter()
        .filter(|(_, score)| *score > 0.0)
        .map(|(id, score)| (id.clone(), score / total))
        .collect()
}

/// 指数平滑更新分布
///
/// 首次出现的节点直接取当前值；本次缺席的节点向 0 衰减，低于 1e-3 时移除。
pub fn smooth_distribution(
    previous: &BTreeMap<String, f64>,
    current: &BTreeMap<String, f64>,
    alpha: f64,
) -> BTreeMap<String, f64> {
    let mut next = BTreeMap::new();
    for (node_id, value) in current {
        let smoothed = match previous.get(node_id) {
            Some(old) => old * (1.0 - alpha) + value * alpha,
            None => *value,
        };
        next.insert(node_id.clone(), smoothed.clamp(0.0, 1.0));
    }
    for (node_id, old) in previous {
        if current.contains_key(node_id) {
            continue;
        }
        let decayed = (old * (1.0 - alpha)).clamp(0.0, 1.0);
        if decayed >= 1e-3 {
            next.insert(node_id.clone(), decayed);
        }
    }
    next
}

/// 总体方差
pub fn load_variance(loads: &[f64]) -> f64 {
    if loads.is_empty() {
        return 0.0;
    }
    let mean = loads.iter().sum::<f64>() / loads.len() as f64;
    loads.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / loads.len() as f64
}

/// (max − min) / max，为空或 max 为 0 时返回 0
pub fn imbalance(loads: &[f64]) -> f64 {
    let max = loads.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = loads.iter().copied().fold(f64::INFINITY, f64::min);
    if loads.is_empty() || max <= 0.0 {
        return 0.0;
    }
    ((max - min) / max).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_classify_piecewise() {
        assert_eq!(classify(0.3, 0.7, 0.9), (NodeStatus::Healthy, 1.0));

        let (status, health) = classify(0.8, 0.7, 0.9);
        assert_eq!(status, NodeStatus::Busy);
        assert!(approx(health, 0.75));

        let (status, health) = classify(0.9, 0.7, 0.9);
        assert_eq!(status, NodeStatus::Overloaded);
        assert!(approx(health, 0.5));

        let (_, health) = classify(0.95, 0.7, 0.9);
        assert!(approx(health, 0.25));

        let (_, health) = classify(1.0, 0.7, 0.9);
        assert!(approx(health, 0.0));
    }

    #[test]
    fn test_health_is_monotone() {
        let mut previous = f64::INFINITY;
        for step in 0..=100 {
            let (_, health) = classify(step as f64 / 100.0, 0.7, 0.9);
            assert!(health <= previous + 1e-12);
            assert!((0.0..=1.0).contains(&health));
            previous = health;
        }
    }

    #[test]
    fn test_score() {
        let capacity = ResourceVector::new(4.0, 8.0, 0.0, 0.0);
        let requirement = ResourceVector::new(2.0, 2.0, 0.0, 0.0);
        // min(4/2, 8/2) = 2
        assert!(approx(score(1.0, 0.5, &capacity, &requirement), (1.0 + 0.5 + 2.0) / 3.0));
    }

    #[test]
    fn test_ideal_distribution_sums_to_one() {
        let scores = vec![
            ("a".to_string(), 2.0),
            ("b".to_string(), 1.0),
            ("c".to_string(), 1.0),
        ];
        let distribution = ideal_distribution(&scores);
        assert!(approx(distribution.values().sum::<f64>(), 1.0));
        assert!(approx(distribution["a"], 0.5));
        assert!(ideal_distribution(&[]).is_empty());
    }

    #[test]
    fn test_smoothing_fixed_point() {
        let target: BTreeMap<String, f64> =
            [("a".to_string(), 0.6), ("b".to_string(), 0.4)].into_iter().collect();
        let mut observed = target.clone();
        for _ in 0..20 {
            observed = smooth_distribution(&observed, &target, 0.3);
        }
        for (node, value) in &target {
            assert!(approx(observed[node], *value));
        }
    }

    #[test]
    fn test_smoothing_seed_and_decay() {
        let previous: BTreeMap<String, f64> = [("old".to_string(), 0.001)].into_iter().collect();
        let current: BTreeMap<String, f64> = [("new".to_string(), 1.0)].into_iter().collect();
        let next = smooth_distribution(&previous, &current, 0.3);
        assert_eq!(next.get("new"), Some(&1.0));
        assert!(!next.contains_key("old"));

        let previous: BTreeMap<String, f64> = [("a".to_string(), 1.0)].into_iter().collect();
        let current: BTreeMap<String, f64> = [("a".to_string(), 0.0)].into_iter().collect();
        let next = smooth_distribution(&previous, &current, 0.3);
        assert!(approx(next["a"], 0.7));
    }

    #[test]
    fn test_imbalance_bounds() {
        assert_eq!(imbalance(&[]), 0.0);
        assert_eq!(imbalance(&[0.0, 0.0]), 0.0);
        assert_eq!(imbalance(&[0.5, 0.5, 0.5]), 0.0);
        assert!(approx(imbalance(&[0.2, 0.8]), 0.75));
        for loads in [vec![0.0, 1.0], vec![0.1, 0.9, 0.3], vec![1.0]] {
            let value = imbalance(&loads);
            assert!((0.0..=1.0).contains(&value));
        }
    }

    #[test]
    fn test_load_variance() {
        assert_eq!(load_variance(&[]), 0.0);
        assert_eq!(load_variance(&[0.4, 0.4]), 0.0);
        assert!(approx(load_variance(&[0.0, 1.0]), 0.25));
    }

    #[test]
    fn test_derive_metrics() {
        let capacity = ResourceVector::new(4.0, 8.0, 0.0, 0.0);
        let idle = derive_metrics(0.0, &capacity, 10.0, 0.9);
        assert_eq!(idle.response_time_ms, 10.0);
        assert_eq!(idle.error_rate, 0.0);
        assert_eq!(idle.throughput, 4.0);

        let saturated = derive_metrics(0.95, &capacity, 10.0, 0.9);
        assert!(saturated.error_rate > 0.0);
        assert!(saturated.response_time_ms > idle.response_time_ms);
    }
}
