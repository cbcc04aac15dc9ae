//! Small stateless helpers shared across the domain: the djb2 hash used for
//! text-normalization equality, sha256 hex digests used for dedupe keys,
//! and the UTC-day bucket used by the budget guard and alert dedupe window
//! (spec §4.6, §4.8.2, §4.9).

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use sha2::{Digest, Sha256};

/// 32-bit djb2 hash, used to compare normalized text snippets for equality
/// without retaining the full snippet (spec §4.6).
pub fn djb2(input: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in input.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(byte as u32);
    }
    hash
}

/// Lowercase hex-encoded sha256, used to build alert dedupe keys (spec
/// §4.8.2) and schema shape hashes (spec §4.5).
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// The calendar day (`YYYY-MM-DD`) `instant` falls on in `tz`, used both for
/// UTC-day budget rollover and for the alert dedupe day-bucket + timezone
/// overlap window (spec §4.8.2, §4.9).
pub fn day_bucket(instant: DateTime<Utc>, tz: Tz) -> String {
    instant.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

/// Whether `a` and `b` fall in the same or adjacent day bucket under `tz`,
/// the overlap window that absorbs midnight-boundary timezone skew in
/// alert dedupe (spec §4.8.2).
pub fn day_buckets_overlap(a: DateTime<Utc>, b: DateTime<Utc>, tz: Tz) -> bool {
    let da = a.with_timezone(&tz).date_naive();
    let db = b.with_timezone(&tz).date_naive();
    (da - db).num_days().abs() <= 1
}

/// Parse an IANA timezone name, falling back to UTC on an unknown name
/// rather than failing a run outright.
pub fn parse_tz(name: &str) -> Tz {
    name.parse().unwrap_or(Tz::UTC)
}

/// Start-of-day (00:00:00) for `instant`'s calendar day in `tz`, expressed
/// back in UTC. Used by the budget guard to compute the next rollover.
pub fn start_of_day_utc(instant: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let local_date = instant.with_timezone(&tz).date_naive();
    let local_midnight = local_date.and_hms_opt(0, 0, 0).expect("valid midnight");
    tz.from_local_datetime(&local_midnight)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&local_midnight))
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn djb2_is_deterministic() {
        assert_eq!(djb2("in stock"), djb2("in stock"));
        assert_ne!(djb2("in stock"), djb2("out of stock"));
    }

    #[test]
    fn sha256_hex_is_64_lowercase_hex_chars() {
        let digest = sha256_hex("hello");
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn day_buckets_overlap_across_midnight() {
        let tz = Tz::UTC;
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 23, 59, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 2, 0, 1, 0).unwrap();
        assert!(day_buckets_overlap(a, b, tz));
    }

    #[test]
    fn day_buckets_do_not_overlap_two_days_apart() {
        let tz = Tz::UTC;
        let a = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 3, 12, 0, 0).unwrap();
        assert!(!day_buckets_overlap(a, b, tz));
    }
}
