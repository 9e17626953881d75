//! Credential storage: a thin typed-object wrapper keyed by host
//! (SPEC_FULL.md §5.10).

use serde::{Deserialize, Serialize};

use crate::cache_trait::TypedKeyAccess;
use crate::error::CacheResult;
use crate::extensions::object::{get_object, insert_object, invalidate_object};
use crate::serializer::Serializer;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginInfo {
    pub user: String,
    pub pass: String,
}

/// Physical key under which `host`'s credentials are stored, per the
/// documented `login:{host}` on-disk contract.
fn login_key(host: &str) -> String {
    format!("login:{host}")
}

/// Stores credentials for `host`, overwriting any previous entry.
pub async fn save_login<B: TypedKeyAccess>(store: &B, serializer: &dyn Serializer, host: &str, user: &str, pass: &str) -> CacheResult<()> {
    let info = LoginInfo { user: user.to_string(), pass: pass.to_string() };
    insert_object(store, serializer, &login_key(host), &info, None).await
}

/// Retrieves the credentials saved for `host`.
pub async fn get_login<B: TypedKeyAccess>(store: &B, serializer: &dyn Serializer, host: &str) -> CacheResult<LoginInfo> {
    get_object(store, serializer, &login_key(host)).await
}

/// Removes the credentials saved for `host`. Idempotent.
pub async fn erase_login<B: TypedKeyAccess>(store: &B, host: &str) -> CacheResult<()> {
    invalidate_object::<B, LoginInfo>(store, &login_key(host)).await
}
