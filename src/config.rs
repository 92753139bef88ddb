//! Defaults and environment knobs shared by the library and the binary.

use crate::error::{PolyglotError, Result};

/// Log filter, `tracing_subscriber::EnvFilter` syntax.
pub const ENV_LOG: &str = "POLYGLOT_LOG";
/// Copy chunk size, e.g. `16M`.
pub const ENV_CHUNK_SIZE: &str = "POLYGLOT_CHUNK_SIZE";
/// Checksum algorithm name.
pub const ENV_HASH: &str = "POLYGLOT_HASH";

pub const DEFAULT_LOG_FILTER: &str = "polyglot=warn";

/// Parse a byte count with an optional binary unit suffix.
///
/// `"123"`, `"64K"`, `"512M"`, `"4G"`, `"1T"`; a trailing `B`/`iB` is
/// accepted (`"4GiB"`, `"10kb"`).  Fractions need a unit (`"1.5G"`); a bare
/// `"1.5"` is rejected, as is zero.
pub fn parse_byte_size(s: &str) -> Result<u64> {
    let invalid = || PolyglotError::InvalidSize(s.to_owned());
    let t = s.trim();
    let split = t.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(t.len());
    let (num, unit) = t.split_at(split);
    if num.is_empty() {
        return Err(invalid());
    }

    let unit = unit.trim().to_ascii_lowercase();
    let unit = unit.strip_suffix("ib").or_else(|| unit.strip_suffix('b')).unwrap_or(&unit);
    let shift = match unit {
        ""  => 0,
        "k" => 10,
        "m" => 20,
        "g" => 30,
        "t" => 40,
        _ => return Err(invalid()),
    };

    let bytes = if num.contains('.') {
        if shift == 0 {
            return Err(invalid());
        }
        let v: f64 = num.parse().map_err(|_| invalid())?;
        let scaled = (v * (1u64 << shift) as f64).floor();
        if !scaled.is_finite() || scaled >= u64::MAX as f64 {
            return Err(invalid());
        }
        scaled as u64
    } else {
        let v: u64 = num.parse().map_err(|_| invalid())?;
        v.checked_mul(1u64 << shift).ok_or_else(invalid)?
    };

    if bytes == 0 {
        return Err(invalid());
    }
    Ok(bytes)
}

/// Chunk sizes are kept to what a single buffer can sensibly hold.
pub fn parse_chunk_size(s: &str) -> Result<usize> {
    let bytes = parse_byte_size(s)?;
    usize::try_from(bytes)
        .ok()
        .filter(|&b| b <= 1 << 30)
        .ok_or_else(|| PolyglotError::InvalidSize(format!("{s}: chunk size must be at most 1G")))
}
