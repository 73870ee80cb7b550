//! Utility functions shared by the registries

use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

/// Default page size for list operations
pub const DEFAULT_PAGE_LIMIT: usize = 100;
/// Largest page a caller may request
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Fills a buffer with cryptographically secure random bytes
pub fn fill_random(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Generates a random byte array of the specified size
pub fn get_rand_bytes(size: usize) -> Vec<u8> {
    let mut bytes = vec![0_u8; size];
    fill_random(&mut bytes);
    bytes
}

/// Generates `size` random bytes encoded as lowercase hex
pub fn random_hex(size: usize) -> String {
    hex::encode(get_rand_bytes(size))
}

/// Generates `size` random bytes encoded as URL-safe base64 without padding
pub fn random_token(size: usize) -> String {
    URL_SAFE_NO_PAD.encode(get_rand_bytes(size))
}

/// Compares two secrets without leaking where they differ
pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Pagination parameters of a list request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PageRequest {
    /// Maximum number of entries to return, 1 to 1000
    pub limit: Option<usize>,
    /// Marker returned by the previous page
    pub marker: Option<String>,
}

impl PageRequest {
    /// Requests the first page with the given limit
    pub fn first(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            marker: None,
        }
    }

    /// Requests the page following `marker`
    pub fn after(limit: usize, marker: impl Into<String>) -> Self {
        Self {
            limit: Some(limit),
            marker: Some(marker.into()),
        }
    }
}

/// One page of a list operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Page<T> {
    /// Entries on this page
    pub items: Vec<T>,
    /// Marker for the next page, present iff `truncated`
    pub next_marker: Option<String>,
    /// Whether more entries follow
    pub truncated: bool,
}

/// A sort key that identifies an entry across list calls
///
/// The marker of a page encodes the position of its last entry, so the next page
/// resumes after that entry even if others were added or removed in between.
pub trait PagePosition: Ord + Sized {
    /// Bytes stored in the marker
    fn to_marker_bytes(&self) -> Vec<u8>;

    /// Inverse of `to_marker_bytes`; `None` for bytes no position produces
    fn from_marker_bytes(bytes: Vec<u8>) -> Option<Self>;
}

/// Creation sequence numbers
impl PagePosition for u64 {
    fn to_marker_bytes(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn from_marker_bytes(bytes: Vec<u8>) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }
}

/// Names of name-ordered listings
impl PagePosition for String {
    fn to_marker_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_marker_bytes(bytes: Vec<u8>) -> Option<Self> {
        String::from_utf8(bytes).ok()
    }
}

fn encode_marker<P: PagePosition>(position: &P) -> String {
    URL_SAFE_NO_PAD.encode(position.to_marker_bytes())
}

fn decode_marker<P: PagePosition>(marker: &str) -> Result<P> {
    URL_SAFE_NO_PAD
        .decode(marker)
        .ok()
        .and_then(P::from_marker_bytes)
        .ok_or_else(|| Error::Validation("invalid pagination marker".into()))
}

/// Cuts one page out of `entries`, which must be sorted by their position
pub fn paginate<P: PagePosition, T>(entries: Vec<(P, T)>, request: &PageRequest) -> Result<Page<T>> {
    let limit = request.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit == 0 || limit > MAX_PAGE_LIMIT {
        return Err(Error::Validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_PAGE_LIMIT, limit
        )));
    }
    let resume_after = request
        .marker
        .as_deref()
        .map(decode_marker::<P>)
        .transpose()?;

    let mut remaining = entries
        .into_iter()
        .filter(|(position, _)| resume_after.as_ref().map_or(true, |after| position > after))
        .peekable();

    let mut items = Vec::new();
    let mut last = None;
    while items.len() < limit {
        match remaining.next() {
            Some((position, item)) => {
                last = Some(position);
                items.push(item);
            }
            None => break,
        }
    }

    let truncated = remaining.peek().is_some();
    Ok(Page {
        items,
        next_marker: if truncated { last.as_ref().map(encode_marker::<P>) } else { None },
        truncated,
    })
}
