use serde::{Deserialize, Serialize};
use std::fmt;

/// Decimal places kept when deriving a key (about 11m at the equator)
pub const COORDINATE_PRECISION: u32 = 4;

const SCALE: f64 = 10_000.0;

/// Cache key derived from a coordinate rounded to [`COORDINATE_PRECISION`]
/// decimal places, so near-identical lookups share one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn from_coordinates(latitude: f64, longitude: f64) -> Self {
        Self(format!("{}_{}", fixed(latitude), fixed(longitude)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the payload for this key
    pub(crate) fn file_name(&self) -> String {
        format!("{}.json", self.0)
    }

    /// Recover a key from a payload file name written by [`Self::file_name`]
    pub(crate) fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(".json")?;
        let (lat, lon) = stem.split_once('_')?;
        let lat: f64 = lat.parse().ok()?;
        let lon: f64 = lon.parse().ok()?;
        let key = Self::from_coordinates(lat, lon);
        (key.0 == stem).then_some(key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Render `value` with exactly four decimals using integer arithmetic, so
/// keys never differ by float formatting artifacts or a negative zero.
fn fixed(value: f64) -> String {
    let scaled = (value * SCALE).round() as i64;
    let sign = if scaled < 0 { "-" } else { "" };
    let abs = scaled.unsigned_abs();
    format!("{}{}.{:04}", sign, abs / 10_000, abs % 10_000)
}
