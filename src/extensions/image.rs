//! Image byte validation: a minimum-length guard plus magic-number format
//! sniffing, used by `load_image_bytes`/`load_image_from_url` to reject
//! truncated or non-image payloads before they reach a decoder
//! (SPEC_FULL.md §5.10, properties P8/P9).

use std::time::SystemTime;

use crate::cache_trait::TypedKeyAccess;
use crate::error::{CacheError, CacheResult};
use crate::extensions::http::download_url;
use crate::primitives::RequestCache;

/// Minimum byte length a buffer must reach before it is even considered for
/// format sniffing. Below this, no real image format's header fits.
pub const MIN_IMAGE_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Bmp,
    WebP,
    Tiff,
    Ico,
}

fn sniff(bytes: &[u8]) -> Option<ImageFormat> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(ImageFormat::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageFormat::Jpeg);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(ImageFormat::Gif);
    }
    if bytes.starts_with(b"BM") {
        return Some(ImageFormat::Bmp);
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(ImageFormat::WebP);
    }
    if bytes.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || bytes.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        return Some(ImageFormat::Tiff);
    }
    if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        return Some(ImageFormat::Ico);
    }
    None
}

/// Validates `bytes` as a plausible image buffer: long enough to hold a
/// real header, and recognized by magic number. Does not decode pixels.
pub fn load_image_bytes(bytes: &[u8]) -> CacheResult<ImageFormat> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(CacheError::InvalidArgument(format!(
            "image buffer is {} bytes, shorter than the {}-byte minimum",
            bytes.len(),
            MIN_IMAGE_BYTES
        )));
    }
    sniff(bytes).ok_or_else(|| CacheError::InvalidArgument("unrecognized image format".into()))
}

/// Fetches `url` via [`download_url`] and validates the result as an image,
/// returning the format and the raw bytes.
pub async fn load_image_from_url<B: TypedKeyAccess>(
    store: &B,
    request_cache: &RequestCache<Option<String>, Vec<u8>>,
    client: &reqwest::Client,
    key: Option<&str>,
    url: &str,
    fetch_always: bool,
    expiration: Option<SystemTime>,
) -> CacheResult<(ImageFormat, Vec<u8>)> {
    let bytes = download_url(store, request_cache, client, key, url, None, Vec::new(), fetch_always, expiration).await?;
    let format = load_image_bytes(&bytes)?;
    Ok((format, bytes))
}
