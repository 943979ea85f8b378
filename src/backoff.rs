//! 輪詢 CA 資源時使用的退避策略。
//!
//! 等待本身透過 [`Clock`] 進行，測試可以換成不會真的睡眠的假時鐘。

use std::{
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use log::debug;
use thiserror::Error;

/// 提供目前時間與睡眠功能的時鐘。
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    fn sleep(&self, duration: Duration);
}

/// 使用系統時間與 [`thread::sleep`] 的時鐘。
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// 指數退避設定：初始延遲、倍率、延遲上限與最大輪詢次數。
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 60,
        }
    }
}

impl BackoffPolicy {
    /// 第 `attempt` 次輪詢（從 1 起算）之後要等待的時間。
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay = self.initial_delay.as_secs_f64() * factor;
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay)
        }
    }
}

/// 單次輪詢的結果。
#[derive(Debug)]
pub enum PollStatus<T> {
    Done(T),
    /// 尚未完成；`retry_after` 是 CA 提示的等待時間，優先於預設的退避間隔。
    Pending { retry_after: Option<Duration> },
}

#[derive(Debug, Error)]
pub enum PollError<E> {
    /// 整體期限已到，或下一次等待會超過期限。
    #[error("Polling deadline reached after {attempts} attempt(s)")]
    Timeout { attempts: u32 },
    #[error("Gave up after {attempts} polling attempt(s)")]
    Exhausted { attempts: u32 },
    #[error(transparent)]
    Failed(E),
}

/// 反覆呼叫 `f` 直到它回傳 [`PollStatus::Done`]、失敗、用完次數或超過期限。
///
/// 任何一次等待都不會越過 `deadline`：若下一次等待會超過期限，立即回傳
/// [`PollError::Timeout`]。
pub fn poll<T, E, F>(
    policy: &BackoffPolicy,
    clock: &dyn Clock,
    deadline: Instant,
    mut f: F,
) -> Result<T, PollError<E>>
where
    F: FnMut(u32) -> Result<PollStatus<T>, E>,
{
    let mut attempt = 0;
    loop {
        if clock.now() >= deadline {
            return Err(PollError::Timeout { attempts: attempt });
        }
        attempt += 1;

        let retry_after = match f(attempt).map_err(PollError::Failed)? {
            PollStatus::Done(value) => return Ok(value),
            PollStatus::Pending { retry_after } => retry_after,
        };

        if attempt >= policy.max_attempts {
            return Err(PollError::Exhausted { attempts: attempt });
        }

        let delay = retry_after.unwrap_or_else(|| policy.delay_for(attempt));
        if clock.now().checked_add(delay).map_or(true, |wake| wake > deadline) {
            return Err(PollError::Timeout { attempts: attempt });
        }
        debug!("Poll attempt {} pending, waiting {:?}", attempt, delay);
        clock.sleep(delay);
    }
}

/// 從現在起 `timeout` 之後的期限。過長的 `timeout` 會被截到 [`MAX_TIMEOUT`]。
pub fn deadline_after(clock: &dyn Clock, timeout: Duration) -> Instant {
    let now = clock.now();
    now.checked_add(timeout.min(MAX_TIMEOUT)).unwrap_or(now)
}

/// 單次簽發交易可等待的最長時間。
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// 解析 `Retry-After` 標頭，支援秒數與 HTTP-date 兩種格式。
///
/// 已經過去的日期視為零等待；無法解析時回傳 `None`。
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let date = DateTime::parse_from_rfc2822(value).ok()?;
    Some(
        (date.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
    )
}
