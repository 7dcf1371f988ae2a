//! Source table name normalization.
//!
//! Sharded source databases split one logical table into many physical
//! tables (`orders_runtime`, `order_bom_333367878`,
//! `order_bom_0e9b60a4_d6ed_473d_a326_9e8c8f744ec2`, ...). The CDC pipeline
//! writes all of them into a single target table whose name is derived by
//! stripping the shard suffix. [`normalize`] reproduces that mapping so
//! source and target counts can be compared.
//!
//! Rules are applied in strict priority order and the first match wins:
//!
//! 1. no `_` (or blank input): unchanged
//! 2. `_runtime` suffix
//! 3. a final segment of exactly nine digits
//! 4. `_<9 digits>_<4 digit year>`
//! 5. a formatted UUID suffix (`8_4_4_4_12`, `8-4-4-4-12`, `8_4_4_4_12_<year>`)
//! 6. trailing segments that concatenate to 32 hex characters
//! 7. otherwise unchanged

use once_cell::sync::Lazy;
use regex::Regex;

/// Segment separator used by the sharding convention.
pub const SEPARATOR: char = '_';

/// Suffix of runtime/ephemeral table variants.
const RUNTIME_SUFFIX: &str = "_runtime";

/// Digit count of a shard/tenant id segment.
const SHARD_ID_DIGITS: usize = 9;

/// Hex digit count of an unformatted UUID.
const UUID_HEX_LEN: usize = 32;

static SHARD_YEAR_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"_[0-9]{9}_[0-9]{4}$").expect("valid regex"));

static UUID_SUFFIXES: Lazy<[Regex; 3]> = Lazy::new(|| {
    const HEX_GROUPS: [&str; 5] = [
        "[0-9a-fA-F]{8}",
        "[0-9a-fA-F]{4}",
        "[0-9a-fA-F]{4}",
        "[0-9a-fA-F]{4}",
        "[0-9a-fA-F]{12}",
    ];
    let underscored = HEX_GROUPS.join("_");
    let hyphenated = HEX_GROUPS.join("-");
    [
        Regex::new(&format!("_{underscored}$")).expect("valid regex"),
        Regex::new(&format!("_{hyphenated}$")).expect("valid regex"),
        Regex::new(&format!("_{underscored}_[0-9]{{4}}$")).expect("valid regex"),
    ]
});

/// Map a physical source table name to its canonical target table name.
///
/// Total, deterministic and side-effect free.
pub fn normalize(source_name: &str) -> String {
    if source_name.trim().is_empty() || !source_name.contains(SEPARATOR) {
        return source_name.to_string();
    }

    if let Some(base) = source_name.strip_suffix(RUNTIME_SUFFIX) {
        return base.to_string();
    }

    if let Some(base) = strip_shard_id(source_name) {
        return base.to_string();
    }

    if let Some(m) = SHARD_YEAR_SUFFIX.find(source_name) {
        return source_name[..m.start()].to_string();
    }

    for pattern in UUID_SUFFIXES.iter() {
        if let Some(m) = pattern.find(source_name) {
            return source_name[..m.start()].to_string();
        }
    }

    if let Some(base) = strip_unformatted_uuid(source_name) {
        return base;
    }

    source_name.to_string()
}

/// Rule 3: `<base>_<exactly nine digits>`.
fn strip_shard_id(name: &str) -> Option<&str> {
    let idx = name.rfind(SEPARATOR)?;
    if idx == 0 {
        return None;
    }
    let suffix = &name[idx + 1..];
    (suffix.len() == SHARD_ID_DIGITS && suffix.bytes().all(|b| b.is_ascii_digit()))
        .then(|| &name[..idx])
}

/// Rule 6: trailing segments whose concatenation (minus separators and
/// hyphens) is a 32-character hex string. The first segment is never consumed.
fn strip_unformatted_uuid(name: &str) -> Option<String> {
    let parts: Vec<&str> = name.split(SEPARATOR).collect();
    let mut cleaned_len = 0;

    for start in (1..parts.len()).rev() {
        let segment = parts[start];
        if !segment.chars().all(|c| c == '-' || c.is_ascii_hexdigit()) {
            // A non-hex segment can never be part of the UUID, and every longer
            // tail contains it.
            return None;
        }
        cleaned_len += segment.chars().filter(|c| *c != '-').count();

        if cleaned_len == UUID_HEX_LEN {
            return Some(parts[..start].join("_"));
        }
        if cleaned_len > UUID_HEX_LEN {
            return None;
        }
    }

    None
}
