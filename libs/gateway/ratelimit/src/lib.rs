// [libs/gateway/ratelimit/src/lib.rs]
/*!
 * =================================================================
 * APARATO: RATE LIMITER (V1.0)
 * CLASIFICACIÓN: DOMAIN LOGIC (ESTRATO L2)
 * RESPONSABILIDAD: CUBOS DE TOKENS RPM/TPM POR PROVEEDOR
 *
 * Refill is continuous-time (§3 `TokenBucket`): every access adds
 * `elapsed_ms / 60_000 × refill_per_minute`, clamped to capacity — there
 * is no background ticking task, the bucket catches up lazily whenever
 * it's touched.
 * =================================================================
 */

use dashmap::DashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RateLimitError {
    #[error("bucket construction rejected: capacity and refill_per_minute must both be positive")]
    InvalidConstruction,
    #[error("RATE_LIMITED: provider '{provider}' has no capacity, retry in {retry_after_ms}ms")]
    RateLimited { provider: String, retry_after_ms: u64 },
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    refill_per_minute: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_minute: f64) -> Result<Self, RateLimitError> {
        if capacity <= 0.0 || refill_per_minute <= 0.0 {
            return Err(RateLimitError::InvalidConstruction);
        }
        Ok(Self {
            capacity,
            refill_per_minute,
            tokens: capacity,
            last_refill: Instant::now(),
        })
    }

    fn refill(&mut self) {
        let elapsed_ms = self.last_refill.elapsed().as_millis() as f64;
        self.last_refill = Instant::now();
        self.tokens = (self.tokens + elapsed_ms / 60_000.0 * self.refill_per_minute).min(self.capacity);
    }

    fn try_consume(&mut self, amount: f64) -> bool {
        self.refill();
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    fn time_until_available(&mut self, amount: f64) -> Duration {
        self.refill();
        if self.tokens >= amount {
            return Duration::ZERO;
        }
        let deficit = amount - self.tokens;
        let ms = (deficit / self.refill_per_minute) * 60_000.0;
        Duration::from_millis(ms.ceil().max(0.0) as u64)
    }

    fn refund(&mut self, amount: f64) {
        if amount > 0.0 {
            self.tokens = (self.tokens + amount).min(self.capacity);
        }
    }
}

struct ProviderBuckets {
    rpm: Mutex<TokenBucket>,
    tpm: Mutex<TokenBucket>,
    queue_timeout_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ProviderLimits {
    pub rpm_capacity: f64,
    pub rpm_refill_per_minute: f64,
    pub tpm_capacity: f64,
    pub tpm_refill_per_minute: f64,
    pub queue_timeout_ms: u64,
}

pub struct RateLimiter {
    providers: DashMap<String, ProviderBuckets>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    pub fn register_provider(&self, provider: &str, limits: ProviderLimits) -> Result<(), RateLimitError> {
        let buckets = ProviderBuckets {
            rpm: Mutex::new(TokenBucket::new(limits.rpm_capacity, limits.rpm_refill_per_minute)?),
            tpm: Mutex::new(TokenBucket::new(limits.tpm_capacity, limits.tpm_refill_per_minute)?),
            queue_timeout_ms: limits.queue_timeout_ms,
        };
        self.providers.insert(provider.to_string(), buckets);
        Ok(())
    }

    /// Consumes 1 RPM token and `estimated_tokens` TPM tokens, waiting up
    /// to `queue_timeout_ms` if capacity is temporarily short (§4.F).
    #[instrument(skip(self), fields(provider))]
    pub async fn acquire(&self, provider: &str, estimated_tokens: u64) -> Result<(), RateLimitError> {
        let started = Instant::now();
        loop {
            let buckets = self
                .providers
                .get(provider)
                .ok_or_else(|| RateLimitError::UnknownProvider(provider.to_string()))?;

            let wait = {
                let mut rpm = buckets.rpm.lock().expect("rpm bucket lock poisoned");
                let mut tpm = buckets.tpm.lock().expect("tpm bucket lock poisoned");

                let rpm_wait = rpm.time_until_available(1.0);
                let tpm_wait = tpm.time_until_available(estimated_tokens as f64);

                if rpm_wait.is_zero() && tpm_wait.is_zero() {
                    let rpm_ok = rpm.try_consume(1.0);
                    let tpm_ok = tpm_ok_or_refund(&mut rpm, &mut tpm, estimated_tokens as f64);
                    if rpm_ok && tpm_ok {
                        return Ok(());
                    }
                    rpm_wait.max(tpm_wait)
                } else {
                    rpm_wait.max(tpm_wait)
                }
            };

            let elapsed = started.elapsed();
            let budget = Duration::from_millis(buckets.queue_timeout_ms);
            if elapsed + wait > budget {
                return Err(RateLimitError::RateLimited {
                    provider: provider.to_string(),
                    retry_after_ms: wait.as_millis() as u64,
                });
            }
            tokio::time::sleep(wait.min(Duration::from_millis(25))).await;
        }
    }

    /// Refunds `estimated - actual` TPM tokens if positive, capped at
    /// capacity (§4.F).
    pub fn release(&self, provider: &str, estimated_tokens: u64, actual_tokens: u64) {
        if let Some(buckets) = self.providers.get(provider) {
            let refund = estimated_tokens.saturating_sub(actual_tokens);
            if refund > 0 {
                let mut tpm = buckets.tpm.lock().expect("tpm bucket lock poisoned");
                tpm.refund(refund as f64);
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn tpm_ok_or_refund(rpm: &mut TokenBucket, tpm: &mut TokenBucket, amount: f64) -> bool {
    if tpm.try_consume(amount) {
        true
    } else {
        rpm.refund(1.0);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generous_limits() -> ProviderLimits {
        ProviderLimits {
            rpm_capacity: 100.0,
            rpm_refill_per_minute: 100.0,
            tpm_capacity: 100_000.0,
            tpm_refill_per_minute: 100_000.0,
            queue_timeout_ms: 200,
        }
    }

    #[tokio::test]
    async fn acquire_succeeds_with_available_capacity() {
        let limiter = RateLimiter::new();
        limiter.register_provider("openai", generous_limits()).unwrap();
        limiter.acquire("openai", 500).await.unwrap();
    }

    #[tokio::test]
    async fn acquire_fails_fast_when_capacity_cannot_recover_in_time() {
        let limiter = RateLimiter::new();
        limiter
            .register_provider(
                "openai",
                ProviderLimits {
                    rpm_capacity: 1.0,
                    rpm_refill_per_minute: 1.0,
                    tpm_capacity: 100.0,
                    tpm_refill_per_minute: 100.0,
                    queue_timeout_ms: 10,
                },
            )
            .unwrap();

        limiter.acquire("openai", 10).await.unwrap();
        let result = limiter.acquire("openai", 10).await;
        assert!(matches!(result, Err(RateLimitError::RateLimited { .. })));
    }

    #[tokio::test]
    async fn release_refunds_unused_tpm_tokens() {
        let limiter = RateLimiter::new();
        limiter
            .register_provider(
                "openai",
                ProviderLimits {
                    rpm_capacity: 10.0,
                    rpm_refill_per_minute: 10.0,
                    tpm_capacity: 1000.0,
                    tpm_refill_per_minute: 1.0,
                    queue_timeout_ms: 50,
                },
            )
            .unwrap();

        limiter.acquire("openai", 900).await.unwrap();
        limiter.release("openai", 900, 100);

        // Only 100 tokens were actually used, so ~900 were refunded and a
        // second similarly-sized request should not have to wait for refill.
        limiter.acquire("openai", 800).await.unwrap();
    }

    #[test]
    fn construction_rejects_non_positive_parameters() {
        let limiter = RateLimiter::new();
        let err = limiter.register_provider(
            "broken",
            ProviderLimits {
                rpm_capacity: 0.0,
                rpm_refill_per_minute: 1.0,
                tpm_capacity: 1.0,
                tpm_refill_per_minute: 1.0,
                queue_timeout_ms: 10,
            },
        );
        assert_eq!(err, Err(RateLimitError::InvalidConstruction));
    }

    #[tokio::test]
    async fn unregistered_provider_is_a_typed_error() {
        let limiter = RateLimiter::new();
        let result = limiter.acquire("ghost", 10).await;
        assert!(matches!(result, Err(RateLimitError::UnknownProvider(_))));
    }
}
