/// Access granted by a path rule.
///
/// Ordered from weakest to strongest so `ReadWrite > ReadOnly > Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessLevel {
    Blocked,
    ReadOnly,
    ReadWrite,
}

impl AccessLevel {
    pub fn allows_read(self) -> bool {
        self >= AccessLevel::ReadOnly
    }

    pub fn allows_write(self) -> bool {
        self == AccessLevel::ReadWrite
    }
}

/// What an intercepted file operation wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    /// Listing or walking a directory. Never blocked.
    Enumerate,
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Decision {
    Allow,
    Deny,
}

impl From<bool> for Decision {
    fn from(allowed: bool) -> Self {
        if allowed {
            Decision::Allow
        } else {
            Decision::Deny
        }
    }
}

/// Effective read/write rights for a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rights {
    pub read: bool,
    pub write: bool,
}

impl Rights {
    pub fn is_none(self) -> bool {
        !self.read && !self.write
    }
}

/// Whether symbolic links met during path resolution are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReparsePolicy {
    #[default]
    Follow,
    /// Links beneath a declared root are refused instead of resolved (`-D`).
    Refuse,
}

/// Equal-length prefix tie-break between rules declared on the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precedence {
    /// The most recently declared rule wins.
    #[default]
    LastDeclared,
    /// A block wins over any grant on the same path, whatever the order.
    BlockWins,
}
