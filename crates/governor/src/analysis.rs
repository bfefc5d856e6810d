//! 样本统计与压力分级

use crate::models::{MonitorStats, Pressure, PressureStatus, Sample, Trend};

const TREND_BAND: f64 = 0.1;
const WARNING_RATIO: f64 = 0.7;

pub fn compute_stats<'a, I>(samples: I) -> MonitorStats
where
    I: IntoIterator<Item = &'a Sample>,
{
    let values: Vec<f64> = samples.into_iter().map(|sample| sample.value).collect();
    let Some(latest) = values.last().copied() else {
        return MonitorStats::default();
    };

    let count = values.len() as f64;
    let average = values.iter().sum::<f64>() / count;
    let peak = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = values.iter().map(|v| (v - average).powi(2)).sum::<f64>() / count;

    MonitorStats {
        samples: values.len(),
        average,
        peak,
        variance,
        trend: latest - average,
    }
}

pub fn classify_trend(trend: f64) -> Trend {
    if trend > TREND_BAND {
        Trend::Rising
    } else if trend < -TREND_BAND {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// 0.5·平均 + 0.3·峰值 + 0.2·正向趋势，截断到 [0, 1]
pub fn pressure_level(stats: &MonitorStats) -> f64 {
    (0.5 * stats.average + 0.3 * stats.peak + 0.2 * stats.trend.max(0.0)).clamp(0.0, 1.0)
}

pub fn classify_status(level: f64, trend: Trend, threshold: f64) -> PressureStatus {
    if level >= threshold {
        if trend == Trend::Rising {
            PressureStatus::Critical
        } else {
            PressureStatus::High
        }
    } else if level >= WARNING_RATIO * threshold {
        PressureStatus::Warning
    } else {
        PressureStatus::Normal
    }
}

pub fn evaluate(stats: &MonitorStats, threshold: f64) -> Pressure {
    let level = pressure_level(stats);
    let trend = classify_trend(stats.trend);
    Pressure {
        level,
        trend,
        status: classify_status(level, trend, threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn samples(values: &[f64]) -> Vec<Sample> {
        let now = Utc::now();
        values
            .iter()
            .map(|value| Sample {
                timestamp: now,
                value: *value,
            })
            .collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_stats() {
        let stats = compute_stats(&samples(&[0.2, 0.4, 0.6]));
        assert_eq!(stats.samples, 3);
        assert!(approx(stats.average, 0.4));
        assert!(approx(stats.peak, 0.6));
        assert!(approx(stats.variance, 0.08 / 3.0));
        assert!(approx(stats.trend, 0.2));

        assert_eq!(compute_stats(&Vec::new()), MonitorStats::default());
    }

    #[test]
    fn test_constant_signal_level() {
        let stats = compute_stats(&samples(&[0.95; 10]));
        let pressure = evaluate(&stats, 0.8);
        assert!(approx(pressure.level, 0.76));
        assert_eq!(pressure.trend, Trend::Stable);
        assert_eq!(pressure.status, PressureStatus::Warning);
    }

    #[test]
    fn test_rising_signal_is_critical() {
        let stats = compute_stats(&samples(&[0.6, 0.8, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0]));
        let stats = MonitorStats {
            trend: 0.3,
            ..stats
        };
        let pressure = evaluate(&stats, 0.8);
        assert_eq!(pressure.trend, Trend::Rising);
        assert_eq!(pressure.status, PressureStatus::Critical);
    }

    #[test]
    fn test_status_is_monotone_in_level() {
        let mut previous = PressureStatus::Normal;
        for step in 0..=100 {
            let status = classify_status(step as f64 / 100.0, Trend::Stable, 0.8);
            assert!(status >= previous);
            previous = status;
        }
        assert_eq!(previous, PressureStatus::High);
    }

    #[test]
    fn test_trend_band() {
        assert_eq!(classify_trend(0.11), Trend::Rising);
        assert_eq!(classify_trend(-0.11), Trend::Falling);
        assert_eq!(classify_trend(0.1), Trend::Stable);
    }
}
