//! Path canonicalisation shared by every interception path.
//!
//! Both adapter families hand raw paths to the same [`PathCanonicalizer`], so the
//! reparse-point policy is applied once, before the engine ever sees a path.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::ops::Deref;
use std::path::{Component, Path, PathBuf};

use super::error::SandboxError;
use super::types::ReparsePolicy;

/// An absolute, normalised path suitable for rule matching.
///
/// Only [`PathCanonicalizer`] and [`CanonicalPath::lexical`] construct these, so a
/// `CanonicalPath` in hand means the reparse policy has already been honoured.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalPath(PathBuf);

impl CanonicalPath {
    /// Normalise an absolute path without touching the filesystem.
    pub fn lexical(path: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(SandboxError::RelativePath {
                path: path.to_path_buf(),
            });
        }
        Ok(Self(normalize_path_lexically(path)))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

impl Deref for CanonicalPath {
    type Target = Path;

    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for CanonicalPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Resolves paths to their canonical form according to a [`ReparsePolicy`].
#[derive(Debug, Clone, Default)]
pub struct PathCanonicalizer {
    policy: ReparsePolicy,
    roots: Vec<PathBuf>,
}

impl PathCanonicalizer {
    /// `roots` are the declared trees (working directory and rule paths) inside
    /// which [`ReparsePolicy::Refuse`] applies.
    pub fn new(policy: ReparsePolicy, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let mut roots: Vec<PathBuf> = roots
            .into_iter()
            .map(|root| normalize_path_lexically(&root))
            .collect();
        roots.sort();
        roots.dedup();
        Self { policy, roots }
    }

    /// A canonicalizer that always follows links.
    pub fn following() -> Self {
        Self::default()
    }

    pub fn policy(&self) -> ReparsePolicy {
        self.policy
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Resolves `path` one component at a time, the way the kernel walks it: a
    /// link is replaced by its target before any later `..` is applied.
    pub fn canonicalize(&self, path: &Path) -> Result<CanonicalPath, SandboxError> {
        if !path.is_absolute() {
            return Err(SandboxError::RelativePath {
                path: path.to_path_buf(),
            });
        }

        let mut pending: VecDeque<(OsString, bool)> = VecDeque::new();
        queue_components(&mut pending, path, true);
        let mut resolved = PathBuf::from("/");
        let mut declared = PathBuf::from("/");
        let mut links_followed = 0;
        let mut missing = false;

        while let Some((name, from_caller)) = pending.pop_front() {
            if name == ".." {
                resolved.pop();
                if from_caller {
                    declared.pop();
                }
                continue;
            }
            let candidate = resolved.join(&name);
            if from_caller {
                declared.push(&name);
            }
            if missing {
                resolved = candidate;
                continue;
            }

            match std::fs::symlink_metadata(&candidate) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    let inside = self.is_inside_root(&candidate)
                        || (from_caller && self.is_inside_root(&declared));
                    if self.policy == ReparsePolicy::Refuse && inside {
                        return Err(SandboxError::ReparsePointRefused {
                            path: path.to_path_buf(),
                            link: if from_caller { declared } else { candidate },
                        });
                    }
                    links_followed += 1;
                    let target = match std::fs::read_link(&candidate) {
                        Ok(target) if links_followed <= MAX_LINKS => target,
                        _ => {
                            return Err(SandboxError::UnresolvableLink {
                                path: path.to_path_buf(),
                                link: candidate,
                            });
                        }
                    };
                    if target.is_absolute() {
                        resolved = PathBuf::from("/");
                    }
                    let mut spliced = VecDeque::new();
                    queue_components(&mut spliced, &target, false);
                    spliced.append(&mut pending);
                    pending = spliced;
                }
                Ok(_) => resolved = candidate,
                Err(_) => {
                    missing = true;
                    resolved = candidate;
                }
            }
        }

        Ok(CanonicalPath(resolved))
    }

    fn is_inside_root(&self, path: &Path) -> bool {
        self.roots
            .iter()
            .any(|root| path != root.as_path() && path.starts_with(root))
    }
}

/// Same bound as the kernel's `ELOOP` limit on nested links.
const MAX_LINKS: usize = 40;

/// Pushes the normal and `..` components of `path`, dropping root and `.`.
fn queue_components(queue: &mut VecDeque<(OsString, bool)>, path: &Path, from_caller: bool) {
    for component in path.components() {
        match component {
            Component::Normal(name) => queue.push_back((name.to_os_string(), from_caller)),
            Component::ParentDir => queue.push_back((OsString::from(".."), from_caller)),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
}

/// Normalize a path lexically (without filesystem access).
pub fn normalize_path_lexically(path: &Path) -> PathBuf {
    let mut stack = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if stack
                    .last()
                    .is_some_and(|c| !matches!(c, Component::RootDir | Component::Prefix(_)))
                {
                    stack.pop();
                }
            }
            c => stack.push(c),
        }
    }

    stack.iter().collect()
}
