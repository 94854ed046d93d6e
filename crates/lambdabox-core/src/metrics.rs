//! Metrics derived from raw backend telemetry

use crate::types::RawStats;

/// CPU usage of the sandbox relative to the whole host over the sampling window.
///
/// Returns exactly `0.0` when the system counter did not advance. Negative
/// deltas from counter resets are passed through unclamped, and values above
/// 100 are possible on multi-core hosts.
pub fn cpu_percent(raw: &RawStats) -> f64 {
    let cpu_delta = raw.cpu_usage_total as f64 - raw.pre_cpu_usage_total as f64;
    let system_delta = raw.system_cpu_usage as f64 - raw.pre_system_cpu_usage as f64;

    if system_delta > 0.0 {
        round_to(cpu_delta / system_delta * 100.0, 2)
    } else {
        0.0
    }
}

/// Memory in use by the sandbox, 0 when the backend did not report it.
pub fn memory_usage_bytes(raw: &RawStats) -> u64 {
    raw.memory_usage_bytes.unwrap_or(0)
}

/// Round `value` to `places` decimal places.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(cpu: u64, pre_cpu: u64, system: u64, pre_system: u64) -> RawStats {
        RawStats {
            cpu_usage_total: cpu,
            pre_cpu_usage_total: pre_cpu,
            system_cpu_usage: system,
            pre_system_cpu_usage: pre_system,
            memory_usage_bytes: None,
        }
    }

    #[test]
    fn test_cpu_percent_basic_ratio() {
        assert_eq!(cpu_percent(&stats(150, 100, 1_100, 1_000)), 50.0);
        assert_eq!(cpu_percent(&stats(1, 0, 3, 0)), 33.33);
    }

    #[test]
    fn test_zero_system_delta_is_zero() {
        assert_eq!(cpu_percent(&stats(5_000, 0, 42, 42)), 0.0);
        assert_eq!(cpu_percent(&stats(0, 0, 0, 0)), 0.0);
    }

    #[test]
    fn test_system_counter_going_backwards_is_zero() {
        assert_eq!(cpu_percent(&stats(200, 100, 10, 20)), 0.0);
    }

    #[test]
    fn test_negative_cpu_delta_is_not_clamped() {
        assert_eq!(cpu_percent(&stats(100, 200, 1_100, 1_000)), -100.0);
    }

    #[test]
    fn test_multi_core_can_exceed_hundred() {
        assert_eq!(cpu_percent(&stats(400, 0, 100, 0)), 400.0);
    }

    #[test]
    fn test_memory_defaults_to_zero() {
        let mut raw = RawStats::default();
        assert_eq!(memory_usage_bytes(&raw), 0);
        raw.memory_usage_bytes = Some(4096);
        assert_eq!(memory_usage_bytes(&raw), 4096);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(1.23456, 4), 1.2346);
        assert_eq!(round_to(0.005, 0), 0.0);
    }
}
