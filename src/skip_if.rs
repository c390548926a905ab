//! # `--skip-if` parsing
//!
//! `--skip-if=Phase` matches a VM whose `status.phase` equals `Phase`;
//! `--skip-if=!Phase` matches any VM whose phase is NOT `Phase`. Pulled
//! into its own module so the negation parsing is independently
//! testable.

/// One parsed `--skip-if` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipIf {
    Is(String),
    IsNot(String),
}

impl SkipIf {
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('!') {
            Some(phase) => SkipIf::IsNot(phase.to_string()),
            None => SkipIf::Is(raw.to_string()),
        }
    }

    pub fn matches(&self, vm_phase: &str) -> bool {
        match self {
            SkipIf::Is(phase) => vm_phase == phase,
            SkipIf::IsNot(phase) => vm_phase != phase,
        }
    }
}

/// Parses a comma-separated `--skip-if` flag value into its entries.
pub fn parse_list(raw: &str) -> Vec<SkipIf> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(SkipIf::parse)
        .collect()
}

/// True if any entry in the list matches the VM's current phase, meaning
/// cleanup should short-circuit to a no-op.
pub fn should_skip(entries: &[SkipIf], vm_phase: &str) -> bool {
    entries.iter().any(|e| e.matches(vm_phase))
}
