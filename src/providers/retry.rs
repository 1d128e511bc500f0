// Retry and throttling for provider API calls.
//
// Both external providers are metered APIs. This module provides a
// sliding-window rate limiter shared across concurrent tasks via
// Arc<RateLimiter>, plus a retry wrapper that handles transient failures
// (429s, 5xx, network hiccups) with exponential backoff and jitter.
// A call that exhausts its retries returns the original error; the
// pipeline records the affected reviews as unprocessed rather than
// failing the whole batch.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{info, warn};

/// A sliding-window rate limiter for API calls.
///
/// Tracks request timestamps in a sliding window and pauses when
/// approaching the configured limit. Thread-safe via interior mutability
/// so it can be shared across concurrent tasks with `Arc<RateLimiter>`.
pub struct RateLimiter {
    /// Timestamps of recent requests within the current window.
    requests: Mutex<VecDeque<Instant>>,
    /// Maximum number of requests allowed per window.
    max_requests: u32,
    /// Duration of the sliding window.
    window: Duration,
    /// Minimum delay between consecutive requests to avoid bursts.
    min_delay: Duration,
    /// Timestamp of the last request (for enforcing min_delay).
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// - `max_requests_per_window`: how many requests are allowed in the window
    /// - `window_seconds`: the sliding window duration in seconds
    /// - `min_delay_ms`: minimum milliseconds between consecutive requests
    pub fn new(max_requests_per_window: u32, window_seconds: u64, min_delay_ms: u64) -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            max_requests: max_requests_per_window,
            window: Duration::from_secs(window_seconds),
            min_delay: Duration::from_millis(min_delay_ms),
            last_request: Mutex::new(None),
        }
    }

    /// Wait if necessary before making a request.
    ///
    /// This does two things:
    /// 1. Enforces the minimum delay between consecutive requests
    /// 2. If the sliding window is nearly full, sleeps until enough
    ///    old requests expire to make room
    pub async fn acquire(&self) {
        // First, enforce the minimum inter-request delay.
        // Compute the wait duration while holding the lock, then drop
        // the lock before sleeping (to avoid holding a MutexGuard across await).
        let min_delay_wait = {
            let last = self.last_request.lock().unwrap();
            if let Some(last_time) = *last {
                let elapsed = last_time.elapsed();
                if elapsed < self.min_delay {
                    Some(self.min_delay - elapsed)
                } else {
                    None
                }
            } else {
                None
            }
        };

        if let Some(wait) = min_delay_wait {
            tokio::time::sleep(wait).await;
        }

        // Then, check the sliding window
        loop {
            // Compute what to do while holding the lock, then drop it
            // before any await points.
            let action = {
                let now = Instant::now();
                let mut requests = self.requests.lock().unwrap();

                // Evict requests that have fallen outside the window
                while let Some(&oldest) = requests.front() {
                    if now.duration_since(oldest) > self.window {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }

                if (requests.len() as u32) < self.max_requests {
                    // We have room — record this request and proceed
                    requests.push_back(now);
                    let mut last = self.last_request.lock().unwrap();
                    *last = Some(now);
                    None // No wait needed
                } else {
                    // Window is full — wait until the oldest request expires
                    let oldest = *requests.front().unwrap();
                    let wait_until = oldest + self.window;
                    Some(wait_until.duration_since(now))
                }
            }; // Lock is dropped here

            match action {
                None => return, // Acquired successfully
                Some(wait) => {
                    info!(
                        delay_ms = wait.as_millis() as u64,
                        "Rate limit: waiting {}ms before next request",
                        wait.as_millis()
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

/// Maximum number of retry attempts on transient errors.
const MAX_RETRIES: u32 = 4;

/// Base delay for exponential backoff (doubles each retry).
const BASE_BACKOFF: Duration = Duration::from_secs(2);

/// Maximum backoff delay to cap exponential growth.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Check whether an error is worth retrying: rate limiting, server-side
/// errors, or network-level failures. Provider client errors (4xx other
/// than 429) are permanent and returned immediately.
///
/// reqwest and provider errors get wrapped in anyhow context layers, so we
/// check the chain's Debug representation.
fn is_transient_error(err: &anyhow::Error) -> bool {
    let debug_str = format!("{:?}", err).to_lowercase();
    debug_str.contains("429")
        || debug_str.contains("rate limit")
        || debug_str.contains("ratelimit")
        || debug_str.contains("500")
        || debug_str.contains("502")
        || debug_str.contains("503")
        || debug_str.contains("504")
        || debug_str.contains("timed out")
        || debug_str.contains("timeout")
        || debug_str.contains("connection")
}

/// Retry an async operation with bounded exponential backoff on transient
/// errors.
///
/// Permanent errors are returned immediately. The rate limiter's
/// `acquire()` is called before each attempt to respect the sliding window
/// even during retries.
pub async fn with_retry<F, Fut, T>(rate_limiter: &RateLimiter, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        rate_limiter.acquire().await;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_transient_error(&err) || attempt >= MAX_RETRIES {
                    return Err(err);
                }

                attempt += 1;

                // Exponential backoff: base * 2^attempt, capped at MAX_BACKOFF
                let backoff = BASE_BACKOFF
                    .saturating_mul(1u32 << attempt)
                    .min(MAX_BACKOFF);

                // Add jitter (+/- 25%) to avoid thundering herd. The
                // nanosecond component of the current time provides enough
                // variation without pulling in `rand`.
                let nanos = std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .subsec_nanos();
                let jitter_factor = 0.75 + (nanos % 500) as f64 / 1000.0; // 0.75 to 1.25
                let jittered = Duration::from_secs_f64(backoff.as_secs_f64() * jitter_factor);

                warn!(
                    attempt = attempt,
                    max_retries = MAX_RETRIES,
                    backoff_secs = jittered.as_secs_f64(),
                    "Transient provider error, retrying in {:.1}s (attempt {}/{})",
                    jittered.as_secs_f64(),
                    attempt,
                    MAX_RETRIES,
                );

                tokio::time::sleep(jittered).await;
            }
        }
    }
}
