//! Typed, serializer-aware operations layered generically over any
//! [`BlobCache`] / [`TypedKeyAccess`] store (SPEC_FULL.md §5.10).
//!
//! Everything here is a free function rather than a trait, matching the
//! source library's extension-method shape: call them with the store and
//! (where relevant) a [`Serializer`] as the first arguments.

mod http;
mod image;
mod keys;
mod login;
mod object;

pub use http::download_url;
pub use image::{load_image_bytes, load_image_from_url, ImageFormat};
pub use keys::get_all_keys_safe;
pub use login::{erase_login, get_login, save_login, LoginInfo};
pub use object::{
    bulk_get_objects, bulk_insert_objects, get_all_keys_of, get_object, get_or_fetch_object, insert_object,
    invalidate_object,
};
