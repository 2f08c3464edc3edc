//! Kernel enforcement of the permission table through Landlock.
//!
//! Landlock can only grant rights beneath a path, never carve a narrower block
//! out of a broader grant. The table is therefore compiled into an
//! [`EnforcementPlan`]: a rule with no narrower rule beneath it becomes a single
//! grant, otherwise its directory is descended and every existing entry is
//! granted on its own, skipping the ones a narrower rule takes away. Every
//! emitted right comes from [`AccessControlEngine::rights`], so the kernel and
//! the engine agree on each path the plan names.
//!
//! What the kernel cannot express is recorded as a [`PlanGap`] and reported at
//! launch: new entries inside a hole-punched directory, and links the engine
//! refuses under `-D` whose targets are granted anyway.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::canonical::CanonicalPath;
use super::engine::AccessControlEngine;
use super::types::Rights;

/// Rights granted beneath one existing path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub path: PathBuf,
    pub rights: Rights,
    pub is_dir: bool,
}

/// A place where the kernel ruleset is looser or stricter than the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanGap {
    /// Writable directory with a narrower rule beneath it; the kernel denies
    /// creating new entries directly inside it.
    NoNewEntries { dir: PathBuf },
    /// Link beneath a declared root whose target is granted; the kernel follows it.
    FollowedLink { link: PathBuf, target: PathBuf },
}

impl fmt::Display for PlanGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoNewEntries { dir } => write!(
                f,
                "kernel enforcement cannot allow new entries directly inside {} \
                 (a narrower rule is declared beneath it)",
                dir.display()
            ),
            Self::FollowedLink { link, target } => write!(
                f,
                "kernel enforcement follows the link {} to the granted path {} \
                 although -D refuses it",
                link.display(),
                target.display()
            ),
        }
    }
}

/// Upper bound on entries visited when looking for links under declared roots.
const LINK_AUDIT_LIMIT: usize = 10_000;

/// The flattened list of grants for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnforcementPlan {
    grants: Vec<Grant>,
    gaps: Vec<PlanGap>,
}

impl EnforcementPlan {
    pub fn compile(engine: &AccessControlEngine) -> Self {
        let rule_paths: BTreeSet<&Path> = engine
            .table()
            .rules()
            .iter()
            .map(|rule| rule.path.as_path())
            .collect();

        let mut plan = Self::default();
        for path in &rule_paths {
            let nested = rule_paths
                .iter()
                .any(|other| other != path && path.starts_with(other));
            if !nested {
                plan.emit(engine, path);
            }
        }
        tracing::debug!("enforcement plan has {} grant(s)", plan.grants.len());
        plan
    }

    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    pub fn gaps(&self) -> &[PlanGap] {
        &self.gaps
    }

    /// Records every link strictly beneath `roots` whose target the plan grants.
    /// Only needed when links are refused, since the kernel always follows them.
    pub fn audit_links(&mut self, roots: &[PathBuf]) {
        let mut visited = 0;
        for root in roots {
            let entries = WalkDir::new(root)
                .min_depth(1)
                .into_iter()
                .filter_map(Result::ok);
            for entry in entries {
                visited += 1;
                if visited > LINK_AUDIT_LIMIT {
                    tracing::warn!(
                        "stopped looking for links after {} entries; later ones are not reported",
                        LINK_AUDIT_LIMIT
                    );
                    return;
                }
                if !entry.path_is_symlink() {
                    continue;
                }
                let Ok(target) = std::fs::canonicalize(entry.path()) else {
                    continue;
                };
                if !self.grants.iter().any(|grant| target.starts_with(&grant.path)) {
                    continue;
                }
                let gap = PlanGap::FollowedLink {
                    link: entry.path().to_path_buf(),
                    target,
                };
                if !self.gaps.contains(&gap) {
                    self.gaps.push(gap);
                }
            }
        }
    }

    /// Rights the plan grants exactly at `path`, if it names it.
    pub fn rights_at(&self, path: &Path) -> Option<Rights> {
        self.grants
            .iter()
            .find(|grant| grant.path == path)
            .map(|grant| grant.rights)
    }

    fn emit(&mut self, engine: &AccessControlEngine, path: &Path) {
        let Ok(metadata) = std::fs::metadata(path) else {
            tracing::debug!("skipping missing rule path {}", path.display());
            return;
        };
        let Ok(canonical) = CanonicalPath::lexical(path) else {
            return;
        };
        let rights = engine.rights(&canonical);
        // Rules beneath that grant the same rights are already covered.
        let has_narrower = engine
            .table()
            .rules_beneath(path)
            .any(|rule| engine.rights(&rule.path) != rights);

        if has_narrower && metadata.is_dir() {
            match std::fs::read_dir(path) {
                Ok(entries) => {
                    if rights.write {
                        self.gaps.push(PlanGap::NoNewEntries {
                            dir: path.to_path_buf(),
                        });
                    }
                    for entry in entries.flatten() {
                        // Links are judged at their target, which the table covers separately.
                        if entry.file_type().is_ok_and(|kind| kind.is_symlink()) {
                            continue;
                        }
                        self.emit(engine, &entry.path());
                    }
                    return;
                }
                Err(e) => tracing::warn!("cannot descend into {}: {}", path.display(), e),
            }
        }

        if !rights.is_none() {
            self.grants.push(Grant {
                path: path.to_path_buf(),
                rights,
                is_dir: metadata.is_dir(),
            });
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux::PreparedRuleset;

#[cfg(target_os = "linux")]
mod linux {
    use std::sync::Mutex;

    use landlock::{
        ABI, Access, AccessFs, BitFlags, PathBeneath, PathFd, Ruleset, RulesetAttr,
        RulesetCreated, RulesetCreatedAttr,
    };

    use super::{EnforcementPlan, Grant};
    use crate::sandbox::error::SandboxError;

    const ABI_VERSION: ABI = ABI::V3;

    /// A ruleset built in the supervisor and applied in the child before `exec`.
    pub struct PreparedRuleset {
        ruleset: Mutex<Option<RulesetCreated>>,
    }

    impl std::fmt::Debug for PreparedRuleset {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("PreparedRuleset").finish_non_exhaustive()
        }
    }

    impl PreparedRuleset {
        pub fn prepare(plan: &EnforcementPlan) -> Result<Self, SandboxError> {
            let mut ruleset = Ruleset::default()
                .handle_access(AccessFs::from_all(ABI_VERSION))
                .map_err(enforcement)?
                .create()
                .map_err(enforcement)?;

            // Enumeration is never blocked.
            let root = PathFd::new("/").map_err(enforcement)?;
            ruleset = ruleset
                .add_rule(PathBeneath::new(root, AccessFs::ReadDir))
                .map_err(enforcement)?;

            for grant in plan.grants() {
                let fd = match PathFd::new(&grant.path) {
                    Ok(fd) => fd,
                    Err(e) => {
                        tracing::warn!("cannot open {} for Landlock: {}", grant.path.display(), e);
                        continue;
                    }
                };
                ruleset = ruleset
                    .add_rule(PathBeneath::new(fd, access_for(grant)))
                    .map_err(enforcement)?;
            }

            Ok(Self {
                ruleset: Mutex::new(Some(ruleset)),
            })
        }

        /// Confines the calling process. Meant for the child between fork and
        /// exec; a second call is a no-op.
        pub fn restrict_self(&self) -> std::io::Result<()> {
            let taken = match self.ruleset.lock() {
                Ok(mut guard) => guard.take(),
                Err(_) => return Err(std::io::Error::other("Landlock ruleset lock poisoned")),
            };
            if let Some(ruleset) = taken {
                ruleset.restrict_self().map_err(std::io::Error::other)?;
            }
            Ok(())
        }
    }

    fn enforcement(e: impl std::fmt::Display) -> SandboxError {
        SandboxError::Enforcement(e.to_string())
    }

    fn access_for(grant: &Grant) -> BitFlags<AccessFs> {
        let mut access = BitFlags::empty();
        if grant.rights.read {
            access.insert(AccessFs::ReadFile | AccessFs::Execute);
            if grant.is_dir {
                access.insert(AccessFs::ReadDir);
            }
        }
        if grant.rights.write {
            if grant.is_dir {
                access.insert(AccessFs::from_write(ABI_VERSION));
            } else {
                access.insert(AccessFs::WriteFile | AccessFs::Truncate);
            }
        }
        access
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::sandbox::types::Rights;
        use std::path::PathBuf;

        #[test]
        fn test_file_grants_carry_no_directory_rights() {
            let grant = Grant {
                path: PathBuf::from("/etc/hostname"),
                rights: Rights {
                    read: true,
                    write: true,
                },
                is_dir: false,
            };
            let access = access_for(&grant);
            assert!(access.contains(AccessFs::WriteFile));
            assert!(!access.contains(AccessFs::ReadDir));
            assert!(!access.contains(AccessFs::MakeReg));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::table::PermissionTable;
    use crate::sandbox::types::AccessLevel;

    #[test]
    fn test_block_inside_grant_is_hole_punched() {
        let temp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(temp.path()).unwrap();
        std::fs::write(root.join("a.txt"), "Sherlock Holmes").unwrap();
        std::fs::write(root.join("b.txt"), "secret").unwrap();
        std::fs::create_dir(root.join("sub")).unwrap();

        let mut table = PermissionTable::new();
        table.add_rule(&root, AccessLevel::ReadWrite).unwrap();
        table.add_rule(root.join("b.txt"), AccessLevel::Blocked).unwrap();
        let plan = EnforcementPlan::compile(&AccessControlEngine::new(table));

        assert_eq!(plan.rights_at(&root), None);
        assert_eq!(
            plan.rights_at(&root.join("a.txt")),
            Some(Rights {
                read: true,
                write: true
            })
        );
        assert_eq!(plan.rights_at(&root.join("b.txt")), None);
        assert!(plan.grants().iter().any(|g| g.path == root.join("sub") && g.is_dir));
    }

    #[test]
    fn test_writable_hole_punched_directory_is_a_gap() {
        let temp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(temp.path()).unwrap();
        std::fs::write(root.join("a.txt"), "Sherlock Holmes").unwrap();
        std::fs::write(root.join("b.txt"), "Moriarty").unwrap();

        let mut table = PermissionTable::new();
        table.add_rule(&root, AccessLevel::ReadWrite).unwrap();
        table.add_rule(root.join("b.txt"), AccessLevel::Blocked).unwrap();
        let engine = AccessControlEngine::new(table);
        let plan = EnforcementPlan::compile(&engine);

        let new_file = CanonicalPath::lexical(root.join("c.txt")).unwrap();
        assert!(engine.rights(&new_file).write);
        assert_eq!(plan.rights_at(&root.join("c.txt")), None);
        assert_eq!(plan.gaps(), [PlanGap::NoNewEntries { dir: root.clone() }]);
    }

    #[test]
    fn test_read_only_hole_punched_directory_has_no_gap() {
        let temp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(temp.path()).unwrap();
        std::fs::write(root.join("b.txt"), "Moriarty").unwrap();

        let mut table = PermissionTable::new();
        table.add_rule(&root, AccessLevel::ReadOnly).unwrap();
        table.add_rule(root.join("b.txt"), AccessLevel::Blocked).unwrap();
        let plan = EnforcementPlan::compile(&AccessControlEngine::new(table));

        assert!(plan.gaps().is_empty());
    }

    #[test]
    fn test_links_to_granted_targets_are_audited() {
        let temp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(temp.path()).unwrap();
        let (work, granted, unlisted) = (root.join("work"), root.join("granted"), root.join("unlisted"));
        for dir in [&work, &granted, &unlisted] {
            std::fs::create_dir(dir).unwrap();
        }
        std::os::unix::fs::symlink(&granted, work.join("to_granted")).unwrap();
        std::os::unix::fs::symlink(&unlisted, work.join("to_unlisted")).unwrap();

        let mut table = PermissionTable::new();
        table.add_rule(&work, AccessLevel::ReadOnly).unwrap();
        table.add_rule(&granted, AccessLevel::ReadOnly).unwrap();
        let mut plan = EnforcementPlan::compile(&AccessControlEngine::new(table));
        plan.audit_links(&[work.clone()]);

        assert_eq!(
            plan.gaps(),
            [PlanGap::FollowedLink {
                link: work.join("to_granted"),
                target: granted,
            }]
        );
    }

    #[test]
    fn test_unnested_rule_is_one_grant() {
        let temp = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(temp.path()).unwrap();

        let mut table = PermissionTable::new();
        table.add_rule(&root, AccessLevel::ReadOnly).unwrap();
        let plan = EnforcementPlan::compile(&AccessControlEngine::new(table));

        assert_eq!(plan.grants().len(), 1);
        assert_eq!(
            plan.rights_at(&root),
            Some(Rights {
                read: true,
                write: false
            })
        );
    }
}
