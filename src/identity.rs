//! # Identity
//!
//! Derives the stable, collision-resistant `id` and `base_name` used by
//! every other component to find "this job's VM". Callers recompute the
//! same `id` from the same stable runner/project/concurrent/job
//! identifiers rather than sharing it across process invocations.

use sha1::{Digest, Sha1};

/// One element of the length-prefixed digest input. Length-prefixing
/// prevents collision between e.g. `("ab", "c")` and `("a", "bc")`.
enum Field<'a> {
    Str(&'a str),
    Int(i64),
}

/// Computes SHA-1 over a length-prefixed encoding: a 64-bit big-endian
/// count of elements, then for each element either length-prefixed UTF-8
/// bytes (strings) or an 8-byte big-endian integer.
fn make_id(fields: &[Field<'_>]) -> String {
    let mut hasher = Sha1::new();
    hasher.update((fields.len() as u64).to_be_bytes());
    for field in fields {
        match field {
            Field::Str(s) => {
                let bytes = s.as_bytes();
                hasher.update((bytes.len() as u64).to_be_bytes());
                hasher.update(bytes);
            }
            Field::Int(n) => hasher.update(n.to_be_bytes()),
        }
    }
    hex::encode(hasher.finalize())
}

/// Computes the per-job `id` from runner/project/concurrent/job
/// identifiers plus wall-clock nanoseconds. The timestamp is the caller's
/// responsibility so this function stays pure and testable.
pub fn job_id(
    runner_id: &str,
    project_id: &str,
    concurrent_id: &str,
    job_id: &str,
    timestamp_ns: i64,
) -> String {
    make_id(&[
        Field::Str(runner_id),
        Field::Str(project_id),
        Field::Str(concurrent_id),
        Field::Str(job_id),
        Field::Int(timestamp_ns),
    ])
}

/// `"runner-{runnerID}-project-{projectID}-concurrent-{concurrentID}"`,
/// used as an object-name prefix so the cluster appends a random suffix.
pub fn base_name(runner_id: &str, project_id: &str, concurrent_id: &str) -> String {
    format!("runner-{runner_id}-project-{project_id}-concurrent-{concurrent_id}")
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut out = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            let _ = write!(out, "{b:02x}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_reproducible_for_identical_input() {
        let a = job_id("r1", "p7", "0", "42", 1_700_000_000_000_000_000);
        let b = job_id("r1", "p7", "0", "42", 1_700_000_000_000_000_000);
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
    }

    #[test]
    fn id_changes_with_timestamp() {
        let a = job_id("r1", "p7", "0", "42", 1);
        let b = job_id("r1", "p7", "0", "42", 2);
        assert_ne!(a, b);
    }

    // length-prefixing must distinguish concatenation-ambiguous tuples.
    #[test]
    fn length_prefix_distinguishes_ab_c_from_a_bc() {
        let a = make_id(&[Field::Str("ab"), Field::Str("c")]);
        let b = make_id(&[Field::Str("a"), Field::Str("bc")]);
        let c = make_id(&[Field::Str("abc")]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn base_name_format() {
        assert_eq!(
            base_name("r1", "p7", "0"),
            "runner-r1-project-p7-concurrent-0"
        );
    }
}
