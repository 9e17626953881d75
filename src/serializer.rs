//! The `Serializer` capability the core depends on but never implements
//! beyond a bundled JSON adapter.
//!
//! The core only ever talks to `Arc<dyn Serializer>`; swapping in a BSON,
//! MessagePack, or other adapter requires no change to any store or
//! extension, per the capability-object redesign note in SPEC_FULL.md §9.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, CacheResult};

/// How a serializer should treat `DateTime`-like values it round-trips.
///
/// Informational: the bundled [`JsonSerializer`] ignores it (JSON has no
/// native date type), but a consumer's own serializer may use it to decide
/// whether to tag timestamps as UTC, local, or leave them unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForcedDateTimeKind {
    Utc,
    Local,
    Unspecified,
    #[default]
    None,
}

/// The capability a cache needs from a serializer: encode a value to bytes,
/// decode bytes back into a value of a statically-known type.
pub trait Serializer: Send + Sync {
    /// Encodes `value` to bytes.
    fn serialize_value(&self, value: &dyn erased_serde::Serialize) -> CacheResult<Vec<u8>>;

    /// Decodes `bytes` into `T`.
    fn deserialize_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T>;

    /// The forced date-time interpretation this serializer was configured
    /// with, if any.
    fn forced_date_time_kind(&self) -> ForcedDateTimeKind {
        ForcedDateTimeKind::None
    }
}

/// Convenience helper mirroring the language-neutral contract's
/// `bytes = encode(value)` — generic over `T: Serialize` directly, so
/// callers do not need to know about `erased_serde`.
pub fn encode<S: Serializer + ?Sized, T: Serialize>(serializer: &S, value: &T) -> CacheResult<Vec<u8>> {
    serializer.serialize_value(&value as &dyn erased_serde::Serialize)
}

/// The one bundled `Serializer` implementation, backed by `serde_json`.
///
/// Exists so the crate is runnable and testable without requiring a
/// consumer to bring their own adapter; the core never special-cases it —
/// it is consumed purely through the `Serializer` trait object.
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer {
    forced_date_time_kind: ForcedDateTimeKind,
}

impl JsonSerializer {
    /// Creates a JSON serializer with no forced date-time kind.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a JSON serializer that reports the given forced date-time
    /// kind to consumers that care (the adapter itself does not use it).
    pub fn with_forced_date_time_kind(kind: ForcedDateTimeKind) -> Self {
        Self { forced_date_time_kind: kind }
    }
}

impl Serializer for JsonSerializer {
    fn serialize_value(&self, value: &dyn erased_serde::Serialize) -> CacheResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::SerializationFailed(e.to_string()))
    }

    fn deserialize_bytes<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::SerializationFailed(e.to_string()))
    }

    fn forced_date_time_kind(&self) -> ForcedDateTimeKind {
        self.forced_date_time_kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Widget {
        name: String,
        count: u32,
    }

    #[test]
    fn json_serializer_round_trips_a_struct() {
        let serializer = JsonSerializer::new();
        let widget = Widget { name: "bolt".into(), count: 4 };
        let bytes = encode(&serializer, &widget).unwrap();
        let back: Widget = serializer.deserialize_bytes(&bytes).unwrap();
        assert_eq!(widget, back);
    }

    #[test]
    fn malformed_bytes_surface_as_serialization_failed() {
        let serializer = JsonSerializer::new();
        let result: CacheResult<Widget> = serializer.deserialize_bytes(b"not json");
        assert!(matches!(result, Err(CacheError::SerializationFailed(_))));
    }
}
