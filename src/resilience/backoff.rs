//! 指数退避
//!
//! `next = min(current * multiplier, max)`，成功后回到 `base`。
//! 抖动只加在实际休眠上，不写回状态，所以退避序列本身保持单调。

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// 退避策略
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max: Duration,
    pub jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, multiplier: f64, max: Duration) -> Self {
        Self {
            base,
            multiplier,
            max,
            jitter_ratio: 0.0,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self {
            base: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max: Duration::from_millis(config.max_delay_ms),
            jitter_ratio: config.jitter_ratio,
        }
    }

    pub fn with_jitter(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio;
        self
    }

    /// 下一次退避
    pub fn next(&self, current: Duration) -> Duration {
        let grown = current.as_secs_f64() * self.multiplier.max(1.0);
        let capped = grown.min(self.max.as_secs_f64());
        // 浮点误差不能让退避变小
        Duration::from_secs_f64(capped).max(current.min(self.max))
    }

    /// 第 `attempt` 次失败后的重试间隔：从 `base` 起每次乘以倍数，不超过 `max`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let mut delay = self.base.min(self.max);
        for _ in 1..attempt {
            delay = self.next(delay);
            if delay >= self.max {
                break;
            }
        }
        delay
    }

    /// 给一次休眠加上 `[0, jitter_ratio]` 比例的随机抖动
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter_ratio.is_nan() || self.jitter_ratio <= 0.0 {
            return delay;
        }
        let factor = rand::rng().random_range(0.0..=self.jitter_ratio.min(1.0));
        delay + delay.mul_f64(factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_secs(10),
            1.3,
            Duration::from_secs(120),
        )
    }

    #[test]
    fn test_next_grows_by_multiplier() {
        let policy = policy();
        let next = policy.next(Duration::from_secs(10));
        assert_eq!(next.as_millis(), 13_000);
        assert_eq!(policy.next(next).as_millis(), 16_900);
    }

    #[test]
    fn test_next_is_monotonic_and_capped() {
        let policy = policy();
        let mut current = policy.base;
        for _ in 0..30 {
            let next = policy.next(current);
            assert!(next >= current);
            assert!(next <= policy.max);
            current = next;
        }
        assert_eq!(current, policy.max);
    }

    #[test]
    fn test_jitter_stays_within_ratio() {
        let policy = policy().with_jitter(0.1);
        let delay = Duration::from_secs(10);
        for _ in 0..50 {
            let jittered = policy.jittered(delay);
            assert!(jittered >= delay);
            assert!(jittered <= Duration::from_secs(11));
        }
        assert_eq!(policy.with_jitter(0.0).jittered(delay), delay);
    }

    #[test]
    fn test_delay_for_attempt_grows_from_base() {
        let policy = policy();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(2).as_millis(), 13_000);
        assert_eq!(policy.delay_for_attempt(3).as_millis(), 16_900);
        assert_eq!(policy.delay_for_attempt(50), policy.max);
    }

    #[test]
    fn test_invalid_jitter_ratio_does_not_panic() {
        let delay = Duration::from_secs(10);
        assert_eq!(policy().with_jitter(f64::NAN).jittered(delay), delay);
        assert_eq!(policy().with_jitter(-0.5).jittered(delay), delay);
        assert!(policy().with_jitter(5.0).jittered(delay) <= Duration::from_secs(20));
    }
}
