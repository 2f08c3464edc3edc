//! Ordered path rules resolved by longest component prefix.

use std::path::{Path, PathBuf};

use super::canonical::{CanonicalPath, PathCanonicalizer};
use super::error::SandboxError;
use super::types::{AccessLevel, AccessMode, Precedence};

/// One `-r`, `-w` or `-b` declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    /// Canonical form used for matching.
    pub path: CanonicalPath,
    /// The path exactly as it was declared.
    pub declared: PathBuf,
    pub access: AccessLevel,
    /// Rule only governs writes; read lookups skip it.
    pub applies_to_write_only: bool,
}

impl PathRule {
    fn depth(&self) -> usize {
        self.path.components().count()
    }

    fn governs(&self, path: &Path) -> bool {
        path.starts_with(self.path.as_path())
    }

    fn governs_beneath(&self, path: &Path) -> bool {
        self.path.starts_with(path)
    }
}

/// The rule set of one invocation. Built before launch and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PermissionTable {
    rules: Vec<PathRule>,
    precedence: Precedence,
}

impl PermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    pub fn precedence(&self) -> Precedence {
        self.precedence
    }

    /// Declares `access` for `path` and everything beneath it.
    pub fn add_rule(
        &mut self,
        path: impl AsRef<Path>,
        access: AccessLevel,
    ) -> Result<(), SandboxError> {
        self.push(path.as_ref(), access, false)
    }

    /// Declares a rule that only write lookups consult.
    pub fn add_write_rule(
        &mut self,
        path: impl AsRef<Path>,
        access: AccessLevel,
    ) -> Result<(), SandboxError> {
        self.push(path.as_ref(), access, true)
    }

    fn push(
        &mut self,
        path: &Path,
        access: AccessLevel,
        applies_to_write_only: bool,
    ) -> Result<(), SandboxError> {
        let canonical = PathCanonicalizer::following().canonicalize(path)?;
        tracing::debug!(
            "rule {:?} for {} (canonical {})",
            access,
            path.display(),
            canonical.display()
        );
        self.rules.push(PathRule {
            path: canonical,
            declared: path.to_path_buf(),
            access,
            applies_to_write_only,
        });
        Ok(())
    }

    /// Appends `other`'s rules after this table's, keeping their order.
    pub fn extend_from(&mut self, other: &PermissionTable) {
        self.rules.extend(other.rules.iter().cloned());
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Effective access over every rule. `Blocked` when nothing matches.
    pub fn resolve(&self, path: &CanonicalPath) -> AccessLevel {
        self.matching_rule(path, true)
            .map_or(AccessLevel::Blocked, |rule| rule.access)
    }

    /// Effective access for one kind of request; write-only rules are invisible
    /// to reads.
    pub fn resolve_for(&self, path: &CanonicalPath, mode: AccessMode) -> AccessLevel {
        self.matching_rule(path, mode != AccessMode::Read)
            .map_or(AccessLevel::Blocked, |rule| rule.access)
    }

    /// The rule that governs `path`, if any.
    pub fn matching_rule(&self, path: &Path, include_write_only: bool) -> Option<&PathRule> {
        let mut best: Option<(&PathRule, usize)> = None;

        for rule in &self.rules {
            if (rule.applies_to_write_only && !include_write_only) || !rule.governs(path) {
                continue;
            }
            let depth = rule.depth();
            let replace = match best {
                None => true,
                Some((_, best_depth)) if depth > best_depth => true,
                Some((current, best_depth)) if depth == best_depth => match self.precedence {
                    Precedence::LastDeclared => true,
                    Precedence::BlockWins => {
                        rule.access == AccessLevel::Blocked || current.access != AccessLevel::Blocked
                    }
                },
                Some(_) => false,
            };
            if replace {
                best = Some((rule, depth));
            }
        }

        best.map(|(rule, _)| rule)
    }

    /// Rules declared strictly beneath `path`.
    pub fn rules_beneath<'a>(&'a self, path: &'a Path) -> impl Iterator<Item = &'a PathRule> + 'a {
        self.rules
            .iter()
            .filter(move |rule| rule.path.as_path() != path && rule.governs_beneath(path))
    }

    /// Declared and canonical forms of every rule path, for the reparse policy.
    pub fn declared_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::with_capacity(self.rules.len() * 2);
        for rule in &self.rules {
            roots.push(rule.declared.clone());
            roots.push(rule.path.as_path().to_path_buf());
        }
        roots
    }
}
