use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Unit of the IdP's relative "expires in" value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TimeUnit {
    Nanos,
    Micros,
    Millis,
    #[default]
    Seconds,
    Minutes,
    Hours,
    HalfDays,
    Days,
    Weeks,
}

impl TimeUnit {
    /// `amount` units as a duration, saturating on overflow.
    #[must_use]
    pub fn duration(self, amount: u64) -> Duration {
        const MINUTE: u64 = 60;
        const HOUR: u64 = 60 * MINUTE;
        const DAY: u64 = 24 * HOUR;
        match self {
            TimeUnit::Nanos => Duration::from_nanos(amount),
            TimeUnit::Micros => Duration::from_micros(amount),
            TimeUnit::Millis => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(MINUTE)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(HOUR)),
            TimeUnit::HalfDays => Duration::from_secs(amount.saturating_mul(DAY / 2)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(DAY)),
            TimeUnit::Weeks => Duration::from_secs(amount.saturating_mul(7 * DAY)),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TimeUnit::Nanos => "nanos",
            TimeUnit::Micros => "micros",
            TimeUnit::Millis => "millis",
            TimeUnit::Seconds => "seconds",
            TimeUnit::Minutes => "minutes",
            TimeUnit::Hours => "hours",
            TimeUnit::HalfDays => "half_days",
            TimeUnit::Days => "days",
            TimeUnit::Weeks => "weeks",
        }
    }
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeUnit {
    type Err = String;

    /// Accepts `SECONDS`, `seconds`, `half-days`, `HALF_DAYS`, ...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "nanos" => Ok(TimeUnit::Nanos),
            "micros" => Ok(TimeUnit::Micros),
            "millis" => Ok(TimeUnit::Millis),
            "seconds" => Ok(TimeUnit::Seconds),
            "minutes" => Ok(TimeUnit::Minutes),
            "hours" => Ok(TimeUnit::Hours),
            "half_days" => Ok(TimeUnit::HalfDays),
            "days" => Ok(TimeUnit::Days),
            "weeks" => Ok(TimeUnit::Weeks),
            other => Err(format!(
                "unknown time unit '{other}', expected one of nanos, micros, millis, seconds, minutes, hours, half_days, days, weeks"
            )),
        }
    }
}

/// What the IdP told us about a token.
///
/// `expires_at` is fixed when the value is built; [`TokenInfo::is_expired`]
/// compares it with the clock at call time, so a cached value must be
/// re-checked on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub user_id: String,
    pub scopes: BTreeSet<String>,
    pub expires_at: SystemTime,
}

impl TokenInfo {
    /// Resolve a relative "expires in" against now. A negative value yields an
    /// already expired token.
    pub fn new<I, S>(user_id: impl Into<String>, expires_in: i64, unit: TimeUnit, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = SystemTime::now();
        let offset = unit.duration(expires_in.unsigned_abs());
        let expires_at = if expires_in >= 0 {
            now.checked_add(offset)
                .unwrap_or_else(|| now + Duration::from_secs(u64::from(u32::MAX)))
        } else {
            now.checked_sub(offset).unwrap_or(SystemTime::UNIX_EPOCH)
        };
        Self::with_expires_at(user_id, expires_at, scopes)
    }

    pub fn with_expires_at<I, S>(user_id: impl Into<String>, expires_at: SystemTime, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            expires_at,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        SystemTime::now() > self.expires_at
    }

    /// Remaining lifetime, zero once expired.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    }
}
