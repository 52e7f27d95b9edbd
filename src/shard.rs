//! Room → server shard resolution
//!
//! Every room lives on one backend server. The server is picked by hashing
//! the room name into `[0, 1)` and walking a fixed weight table. The table
//! and its order are part of the wire contract: a different order or weight
//! sends the client to the wrong server.

use crate::config::DEFAULT_SERVICE_DOMAIN;
use crate::error::ShardError;

/// `(shard id, weight)` in server order. Ties go to the earlier entry.
const SHARD_WEIGHTS: [(u16, u32); 68] = [
    (5, 75), (6, 75), (7, 75), (8, 75), (16, 75), (17, 75), (18, 75),
    (9, 95), (11, 95), (12, 95), (13, 95), (14, 95), (15, 95),
    (19, 110), (23, 110), (24, 110), (25, 110), (26, 110),
    (28, 104), (29, 104), (30, 104), (31, 104), (32, 104), (33, 104),
    (35, 101), (36, 101), (37, 101), (38, 101), (39, 101), (40, 101),
    (41, 101), (42, 101), (43, 101), (44, 101), (45, 101), (46, 101),
    (47, 101), (48, 101), (49, 101), (50, 101),
    (52, 110), (53, 110), (55, 110), (57, 110), (58, 110), (59, 110),
    (60, 110), (61, 110), (62, 110), (63, 110), (64, 110), (65, 110), (66, 110),
    (68, 95),
    (71, 116), (72, 116), (73, 116), (74, 116), (75, 116), (76, 116), (77, 116),
    (78, 116), (79, 116), (80, 116), (81, 116), (82, 116), (83, 116), (84, 116),
];

/// Floor for the divisor taken from the name tail
const MIN_DIVISOR: f64 = 1000.0;

/// Resolve a room name to its server hostname on the default domain
pub fn hostname(room: &str) -> Result<String, ShardError> {
    hostname_in(room, DEFAULT_SERVICE_DOMAIN)
}

/// Resolve a room name to `s{shard}.{domain}`
pub fn hostname_in(room: &str, domain: &str) -> Result<String, ShardError> {
    let id = shard_id(room)?;
    Ok(format!("s{}.{}", id, domain))
}

/// Shard number for a room name
///
/// Fails with `NoMatchingShard` when the name cannot be hashed (empty, or
/// characters outside `[0-9a-z_-]`) or, in theory, when the fraction lands
/// past the last bucket.
pub fn shard_id(room: &str) -> Result<u16, ShardError> {
    let no_match = || ShardError::NoMatchingShard(room.to_string());

    let normalized: Vec<u8> = room
        .to_lowercase()
        .bytes()
        .map(|b| if b == b'_' || b == b'-' { b'q' } else { b })
        .collect();

    if normalized.is_empty() || !normalized.iter().all(u8::is_ascii_alphanumeric) {
        return Err(no_match());
    }

    let head = &normalized[..normalized.len().min(5)];
    let fnv = base36(head).ok_or_else(no_match)? as f64;

    let lnv = match tail_window(&normalized) {
        Some(tail) => (base36(tail).ok_or_else(no_match)? as f64).max(MIN_DIVISOR),
        None => MIN_DIVISOR,
    };

    let fraction = (fnv % lnv) / lnv;
    bucket_for(fraction).ok_or_else(no_match)
}

/// Characters `[6, 6 + min(3, len - 5))`, clipped to the name.
///
/// Index 5 is never read.
fn tail_window(name: &[u8]) -> Option<&[u8]> {
    let len = name.len() as isize;
    let end = (6 + (len - 5).min(3)).min(len);
    if end <= 6 {
        return None;
    }
    Some(&name[6..end as usize])
}

fn base36(digits: &[u8]) -> Option<u64> {
    digits.iter().try_fold(0u64, |acc, &b| {
        let d = (b as char).to_digit(36)?;
        acc.checked_mul(36)?.checked_add(d as u64)
    })
}

/// First shard whose cumulative weight fraction is `>= fraction`
fn bucket_for(fraction: f64) -> Option<u16> {
    let total: u32 = SHARD_WEIGHTS.iter().map(|&(_, w)| w).sum();
    let mut cumulative = 0.0f64;
    for &(id, weight) in SHARD_WEIGHTS.iter() {
        cumulative += weight as f64 / total as f64;
        if fraction <= cumulative {
            return Some(id);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_rooms() {
        assert_eq!(hostname("khouwe").unwrap(), "s62.chatango.com");
        assert_eq!(hostname("pythonrpg").unwrap(), "s58.chatango.com");
        assert_eq!(hostname("examplegroup").unwrap(), "s23.chatango.com");
        assert_eq!(hostname("monstergirlquest").unwrap(), "s63.chatango.com");
    }

    #[test]
    fn test_short_names() {
        assert_eq!(shard_id("a").unwrap(), 5);
        assert_eq!(shard_id("z").unwrap(), 8);
    }

    #[test]
    fn test_separators_normalized() {
        assert_eq!(shard_id("abc_de-f").unwrap(), 77);
        assert_eq!(shard_id("nico-nico").unwrap(), 29);
        assert_eq!(shard_id("nico-nico"), shard_id("nico_nico"));
        assert_eq!(shard_id("nico-nico"), shard_id("nicoqnico"));
    }

    #[test]
    fn test_case_insensitive_and_deterministic() {
        assert_eq!(hostname("PythonRPG"), hostname("pythonrpg"));
        for _ in 0..3 {
            assert_eq!(hostname("examplegroup").unwrap(), "s23.chatango.com");
        }
    }

    #[test]
    fn test_custom_domain() {
        assert_eq!(hostname_in("khouwe", "example.test").unwrap(), "s62.example.test");
    }

    #[test]
    fn test_unhashable_names() {
        assert!(matches!(hostname(""), Err(ShardError::NoMatchingShard(_))));
        assert!(matches!(hostname("bad room!"), Err(ShardError::NoMatchingShard(_))));
    }

    #[test]
    fn test_table_shape() {
        let total: u32 = SHARD_WEIGHTS.iter().map(|&(_, w)| w).sum();
        assert_eq!(SHARD_WEIGHTS.len(), 68);
        assert_eq!(total, 7034);
    }

    #[test]
    fn test_bucket_boundary_goes_to_earlier_entry() {
        assert_eq!(bucket_for(0.0), Some(5));
        assert_eq!(bucket_for(75.0 / 7034.0), Some(5));
        assert_eq!(bucket_for(76.0 / 7034.0), Some(6));
        assert_eq!(bucket_for(0.999_999), Some(84));
    }

    #[test]
    fn test_tail_window_skips_index_five() {
        assert_eq!(tail_window(b"abcdef"), None);
        assert_eq!(tail_window(b"abcdefg"), Some(&b"g"[..]));
        assert_eq!(tail_window(b"abcdefgh"), Some(&b"gh"[..]));
        assert_eq!(tail_window(b"abcdefghijkl"), Some(&b"ghi"[..]));
        assert_eq!(tail_window(b"abc"), None);
    }
}
