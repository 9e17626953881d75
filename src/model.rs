//! Entities shared by every store implementation: [`CacheElement`], the
//! tick-based timestamp representation, and the typed-key encoding.

use std::time::{SystemTime, UNIX_EPOCH};

/// Separator between a type tag and the logical key in the physical key
/// composition (`TypeNamekey`). `` cannot appear in a validated
/// application key because [`crate::primitives::security`] rejects control
/// characters, so the composition is unambiguous and reversible.
pub const TYPE_KEY_SEPARATOR: char = '\u{0001}';

/// Sentinel used in the `Expiration` column to mean "never expires".
pub const NEVER_TICKS: i64 = i64::MAX;

/// Prefix reserved for internal meta rows (e.g. the encrypted store's KDF
/// salt, SPEC_FULL.md §5.9). Excluded from `get_all_keys`,
/// `invalidate_all`, and bulk enumeration so application data and
/// bookkeeping rows never collide.
pub const RESERVED_KEY_PREFIX: &str = "meta:";

/// Whether `physical_key` names an internal bookkeeping row rather than
/// application data.
pub fn is_reserved_key(physical_key: &str) -> bool {
    physical_key.starts_with(RESERVED_KEY_PREFIX)
}

/// Ticks between the .NET epoch (`0001-01-01T00:00:00Z`) and the Unix epoch
/// (`1970-01-01T00:00:00Z`), in 100-nanosecond units. Matches
/// `DateTime(1970,1,1).Ticks` so databases written by the source library
/// open with correctly-interpreted timestamps.
pub const TICKS_AT_UNIX_EPOCH: i64 = 621_355_968_000_000_000;

const TICKS_PER_SECOND: i64 = 10_000_000;

/// Converts a [`SystemTime`] to 100-nanosecond ticks since the .NET epoch.
///
/// Returns [`NEVER_TICKS`] if `time` is farther in the future than can be
/// represented, which in practice only happens for deliberately
/// `SystemTime`-far-future "never expires" sentinels.
pub fn system_time_to_ticks(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => {
            let secs_ticks = (duration.as_secs() as i64).saturating_mul(TICKS_PER_SECOND);
            let subsec_ticks = (duration.subsec_nanos() / 100) as i64;
            TICKS_AT_UNIX_EPOCH.saturating_add(secs_ticks.saturating_add(subsec_ticks))
        }
        Err(before_epoch) => {
            let duration = before_epoch.duration();
            let secs_ticks = (duration.as_secs() as i64).saturating_mul(TICKS_PER_SECOND);
            let subsec_ticks = (duration.subsec_nanos() / 100) as i64;
            TICKS_AT_UNIX_EPOCH.saturating_sub(secs_ticks.saturating_add(subsec_ticks))
        }
    }
}

/// Converts 100-nanosecond ticks since the .NET epoch back to a
/// [`SystemTime`]. `None` is returned for [`NEVER_TICKS`] — callers treat
/// that as "no expiration" rather than a concrete instant.
pub fn ticks_to_system_time(ticks: i64) -> Option<SystemTime> {
    if ticks == NEVER_TICKS {
        return None;
    }
    let delta = ticks - TICKS_AT_UNIX_EPOCH;
    let secs = delta.div_euclid(TICKS_PER_SECOND);
    let sub_ticks = delta.rem_euclid(TICKS_PER_SECOND);
    let nanos = (sub_ticks * 100) as u32;
    if secs >= 0 {
        Some(UNIX_EPOCH + std::time::Duration::new(secs as u64, nanos))
    } else {
        Some(UNIX_EPOCH - std::time::Duration::new((-secs) as u64, 0) + std::time::Duration::from_nanos(nanos as u64))
    }
}

/// Returns the current time expressed as ticks, as stored in `CreatedAt`.
pub fn now_ticks() -> i64 {
    system_time_to_ticks(SystemTime::now())
}

/// An expiration as seen by callers: either a concrete instant or "never".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiration {
    /// Expires at the given instant.
    At(SystemTime),
    /// Never expires.
    Never,
}

impl Expiration {
    /// Builds an `Expiration` from an optional instant (`None` = never).
    pub fn from_option(instant: Option<SystemTime>) -> Self {
        match instant {
            Some(instant) => Expiration::At(instant),
            None => Expiration::Never,
        }
    }

    /// Builds an `Expiration` a fixed duration from now.
    pub fn from_now(duration: std::time::Duration) -> Self {
        Expiration::At(SystemTime::now() + duration)
    }

    pub(crate) fn to_ticks(self) -> i64 {
        match self {
            Expiration::At(instant) => system_time_to_ticks(instant),
            Expiration::Never => NEVER_TICKS,
        }
    }

    /// Whether this expiration is already in the past relative to `now`.
    pub fn is_expired_at(self, now: SystemTime) -> bool {
        match self {
            Expiration::Never => false,
            Expiration::At(instant) => instant <= now,
        }
    }
}

impl From<Option<SystemTime>> for Expiration {
    fn from(value: Option<SystemTime>) -> Self {
        Expiration::from_option(value)
    }
}

/// A single stored entry: opaque bytes under a logical `(type_tag, key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheElement {
    /// The physical key, as persisted (type-prefixed for typed entries).
    pub physical_key: String,
    /// The type tag this entry was inserted under, if any.
    pub type_name: Option<String>,
    /// The opaque payload.
    pub value: Vec<u8>,
    /// Tick-count the entry was created (or last re-inserted) at.
    pub created_at: i64,
    /// Tick-count the entry expires at, or [`NEVER_TICKS`].
    pub expiration: i64,
}

impl CacheElement {
    /// Whether this element is expired as of `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiration != NEVER_TICKS && self.expiration <= now
    }

    /// The logical (untyped) key: strips the `type_tag` prefix.
    pub fn logical_key(&self) -> &str {
        strip_type_prefix(&self.physical_key)
    }
}

/// Composes the physical key for a (possibly typed) logical key.
///
/// `None` type tags are stored unprefixed so untyped entries retain their
/// original key text and list naturally under `get_all_keys`.
pub fn compose_physical_key(type_tag: Option<&str>, key: &str) -> String {
    match type_tag {
        Some(tag) => format!("{tag}{TYPE_KEY_SEPARATOR}{key}"),
        None => key.to_string(),
    }
}

/// Reverses [`compose_physical_key`], returning the logical key portion.
pub fn strip_type_prefix(physical_key: &str) -> &str {
    match physical_key.split_once(TYPE_KEY_SEPARATOR) {
        Some((_, rest)) => rest,
        None => physical_key,
    }
}
