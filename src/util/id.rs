//! Bead ID generation and validation.
//!
//! IDs have the form `<prefix>-<opaque>`: the prefix is `[a-z]+` and names
//! the owning database. Generated opaque parts are base36 hashes whose
//! length adapts to the database size; children of a parent get
//! `<parent>.<n>`.

use crate::error::{OpsError, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static ID_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z]+-[^\s]+$").unwrap_or_else(|_| unreachable!("static pattern"))
});

/// ID generation configuration.
#[derive(Debug, Clone)]
pub struct IdConfig {
    /// Database prefix without the hyphen (e.g., "gt").
    pub prefix: String,
    /// Minimum hash length.
    pub min_hash_length: usize,
    /// Maximum hash length.
    pub max_hash_length: usize,
    /// Maximum collision probability before increasing length.
    pub max_collision_prob: f64,
}

impl IdConfig {
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            min_hash_length: 3,
            max_hash_length: 8,
            max_collision_prob: 0.25,
        }
    }
}

/// ID generator that produces unique bead IDs.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: IdConfig,
}

impl IdGenerator {
    #[must_use]
    pub const fn new(config: IdConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Compute the optimal hash length for a given issue count.
    ///
    /// Uses birthday problem approximation to estimate collision probability.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn optimal_length(&self, issue_count: usize) -> usize {
        let n = issue_count as f64;
        let max_prob = self.config.max_collision_prob;

        for len in self.config.min_hash_length..=self.config.max_hash_length {
            let space = 36_f64.powi(len as i32);
            // P(collision) ≈ 1 - e^(-n²/2d)
            let prob = 1.0 - (-n * n / (2.0 * space)).exp();
            if prob < max_prob {
                return len;
            }
        }
        self.config.max_hash_length
    }

    /// Generate an ID, checking for collisions with the provided checker.
    ///
    /// The checker returns `true` if the ID is already taken.
    pub fn generate<F>(
        &self,
        title: &str,
        creator: Option<&str>,
        created_at: DateTime<Utc>,
        issue_count: usize,
        exists: F,
    ) -> String
    where
        F: Fn(&str) -> bool,
    {
        let mut length = self.optimal_length(issue_count);
        let mut nonce = 0u32;

        loop {
            for _ in 0..10 {
                let seed = generate_id_seed(title, creator, created_at, nonce);
                let id = format!("{}-{}", self.config.prefix, compute_id_hash(&seed, length));
                if !exists(&id) {
                    return id;
                }
                nonce += 1;
            }

            if length < self.config.max_hash_length {
                length += 1;
            } else if nonce > 1000 {
                // Hash space exhausted for these inputs; the nonce keeps it unique.
                let seed = generate_id_seed(title, creator, created_at, nonce);
                return format!(
                    "{}-{}{nonce}",
                    self.config.prefix,
                    compute_id_hash(&seed, length)
                );
            }
        }
    }
}

/// Seed string: `title | creator | created_at (ns) | nonce`.
#[must_use]
pub fn generate_id_seed(
    title: &str,
    creator: Option<&str>,
    created_at: DateTime<Utc>,
    nonce: u32,
) -> String {
    format!(
        "{}|{}|{}|{}",
        title,
        creator.unwrap_or(""),
        created_at.timestamp_nanos_opt().unwrap_or(0),
        nonce
    )
}

/// Compute a base36 hash of the input string with a specific length.
#[must_use]
pub fn compute_id_hash(input: &str, length: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();

    let mut num = 0u64;
    for &byte in result.iter().take(8) {
        num = (num << 8) | u64::from(byte);
    }

    let encoded = base36_encode(num);
    let padded = format!("{encoded:0>length$}");
    padded.chars().take(length).collect()
}

fn base36_encode(mut num: u64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if num == 0 {
        return "0".to_string();
    }
    let mut chars = Vec::new();
    while num > 0 {
        chars.push(ALPHABET[(num % 36) as usize] as char);
        num /= 36;
    }
    chars.into_iter().rev().collect()
}

/// Child ID from parent: `<parent>.<n>`.
#[must_use]
pub fn child_id(parent_id: &str, child_number: u32) -> String {
    format!("{parent_id}.{child_number}")
}

/// Check if a string looks like a bead ID.
#[must_use]
pub fn is_valid_id_format(id: &str) -> bool {
    ID_FORMAT.is_match(id)
}

/// Validate a caller-supplied bead ID.
///
/// # Errors
///
/// Returns `BadArgument` when the ID is not `<prefix>-<opaque>`.
pub fn validate_id(id: &str) -> Result<()> {
    if is_valid_id_format(id) {
        Ok(())
    } else {
        Err(OpsError::bad_argument(
            "id",
            format!("'{id}' is not of the form <prefix>-<suffix>"),
        ))
    }
}

/// Check an ID against an explicit prefix argument.
///
/// The explicit prefix may carry a trailing hyphen.
///
/// # Errors
///
/// Returns `Routing` when the prefixes disagree.
pub fn check_explicit_prefix(id: &str, explicit: Option<&str>) -> Result<()> {
    let Some(explicit) = explicit else {
        return Ok(());
    };
    let expected = explicit.trim_end_matches('-');
    let found = crate::model::id_prefix(id);
    if expected == found {
        Ok(())
    } else {
        Err(OpsError::routing(
            id,
            format!("prefix '{found}' does not match requested prefix '{expected}'"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn generated_ids_carry_prefix() {
        let generator = IdGenerator::new(IdConfig::with_prefix("gt"));
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let id = generator.generate("Fix the thing", Some("mayor"), now, 0, |_| false);
        assert!(id.starts_with("gt-"));
        assert_eq!(id.len(), "gt-".len() + 3);
        assert!(is_valid_id_format(&id));
    }

    #[test]
    fn generation_is_deterministic_and_avoids_collisions() {
        let generator = IdGenerator::new(IdConfig::with_prefix("ap"));
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let first = generator.generate("same", None, now, 0, |_| false);
        assert_eq!(first, generator.generate("same", None, now, 0, |_| false));

        let second = generator.generate("same", None, now, 0, |id| id == first);
        assert_ne!(first, second);
    }

    #[test]
    fn optimal_length_grows_with_database() {
        let generator = IdGenerator::new(IdConfig::with_prefix("gt"));
        assert_eq!(generator.optimal_length(0), 3);
        assert!(generator.optimal_length(100_000) > 3);
    }

    #[test]
    fn id_format() {
        assert!(is_valid_id_format("gt-abc"));
        assert!(is_valid_id_format("hq-merge-slot"));
        assert!(is_valid_id_format("gt-abc.1"));
        assert!(!is_valid_id_format("GT-abc"));
        assert!(!is_valid_id_format("gt-"));
        assert!(!is_valid_id_format("nohyphen"));
        assert!(validate_id("bad id").is_err());
    }

    #[test]
    fn explicit_prefix_mismatch_is_routing_error() {
        assert!(check_explicit_prefix("gt-1", None).is_ok());
        assert!(check_explicit_prefix("gt-1", Some("gt-")).is_ok());
        let err = check_explicit_prefix("gt-1", Some("ap")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Routing);
    }

    #[test]
    fn child_ids() {
        assert_eq!(child_id("gt-abc", 2), "gt-abc.2");
    }
}
