use rand;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter_max: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            jitter_max: Some(Duration::from_millis(50)),
        }
    }
}

impl RetryConfig {
    /// Used for compensating deletes: few attempts, short waits.
    pub fn compensation() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(400),
            jitter_max: Some(Duration::from_millis(25)),
        }
    }
}

/// `base` plus a uniform random extra in `[0, jitter_max]` (millisecond granularity).
pub fn with_jitter(base: Duration, jitter_max: Option<Duration>) -> Duration {
    match jitter_max {
        Some(jitter_max) => {
            let jitter_ms = jitter_max.as_millis() as u64;
            let extra = if jitter_ms == 0 {
                0
            } else {
                rand::random::<u64>() % (jitter_ms + 1)
            };
            base + Duration::from_millis(extra)
        }
        None => base,
    }
}

pub async fn retry_async_with_config<F, Fut, T, E>(config: RetryConfig, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let mut attempts_left = config.max_attempts.max(1);
    let mut backoff = config.base_backoff;

    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                attempts_left = attempts_left.saturating_sub(1);
                if attempts_left == 0 {
                    return Err(e);
                }

                tokio::time::sleep(with_jitter(backoff, config.jitter_max)).await;

                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn retry_succeeds_after_retries() {
        let counter = AtomicUsize::new(0);
        let cfg = RetryConfig {
            max_attempts: 3,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        };

        let res: Result<usize, &'static str> = retry_async_with_config(cfg, || async {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("fail")
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(res, Ok(2));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_fails_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let cfg = RetryConfig {
            max_attempts: 2,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            jitter_max: None,
        };

        let res: Result<(), &'static str> = retry_async_with_config(cfg, || async {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always fail")
        })
        .await;

        assert!(res.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_millis(2000);
        let jitter = Some(Duration::from_millis(500));
        for _ in 0..200 {
            let wait = with_jitter(base, jitter);
            assert!(wait >= base);
            assert!(wait <= base + Duration::from_millis(500));
        }
    }

    #[test]
    fn no_jitter_returns_base() {
        let base = Duration::from_millis(300);
        assert_eq!(with_jitter(base, None), base);
        assert_eq!(with_jitter(base, Some(Duration::ZERO)), base);
    }
}
