//! Analysis-time scope types.

use std::fmt;

use trompe_foundation::NamePath;

/// Index of an [`AnalysisBlock`] in the analysis arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

/// Index of an [`AnalysisVar`] in the analysis arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub usize);

/// Index of a `for` or `while` loop in the analysis arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub usize);

/// Identifies one shared array.
///
/// Variables bound directly in a block live in the block's array, created
/// once per activation. Variables bound inside a loop body live in an array
/// that the innermost such loop recreates on every iteration, so closures
/// built in different iterations never share them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GroupKey {
    /// Block whose frame holds the array.
    pub owner: BlockId,
    /// Innermost loop around the bindings.
    pub within: Option<LoopId>,
}

impl GroupKey {
    /// The array created once per activation of `owner`.
    #[must_use]
    pub const fn block(owner: BlockId) -> Self {
        Self {
            owner,
            within: None,
        }
    }

    /// The array `lp` recreates on every iteration.
    #[must_use]
    pub const fn iteration(owner: BlockId, lp: LoopId) -> Self {
        Self {
            owner,
            within: Some(lp),
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.within {
            Some(lp) => write!(f, "{}/l{}", self.owner, lp.0),
            None => write!(f, "{}", self.owner),
        }
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// Roles
// =============================================================================

/// One storage role of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Role {
    /// Captured by value into nested closures.
    Copy = 1,
    /// Lives in its home scope's shared array.
    FullyShared = 2,
    /// Stored as an attribute of the unit's module.
    PermanentGlobal = 4,
    /// Bound as a function parameter.
    IsArgument = 8,
}

/// A set of [`Role`]s.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Roles(u8);

impl Roles {
    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns true if `role` is present.
    #[must_use]
    pub const fn contains(self, role: Role) -> bool {
        self.0 & role as u8 != 0
    }

    /// Adds a role.
    pub fn insert(&mut self, role: Role) {
        self.0 |= role as u8;
    }

    /// Removes a role.
    pub fn remove(&mut self, role: Role) {
        self.0 &= !(role as u8);
    }

    /// Returns the set with `role` added.
    #[must_use]
    pub const fn with(self, role: Role) -> Self {
        Self(self.0 | role as u8)
    }
}

impl fmt::Debug for Roles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Role::Copy, "Copy"),
            (Role::FullyShared, "FullyShared"),
            (Role::PermanentGlobal, "PermanentGlobal"),
            (Role::IsArgument, "IsArgument"),
        ]
        .iter()
        .filter(|(role, _)| self.contains(*role))
        .map(|(_, name)| *name)
        .collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

// =============================================================================
// Variables and blocks
// =============================================================================

/// One variable.
#[derive(Clone, Debug)]
pub struct AnalysisVar {
    /// Source name.
    pub name: String,
    /// Block that binds it.
    pub home: BlockId,
    /// Innermost loop of `home` whose body binds it.
    pub within: Option<LoopId>,
    /// Storage roles; final after analysis completes.
    pub roles: Roles,
    /// Bound by `let rec`.
    pub rec: bool,
    /// Target of an assignment somewhere.
    pub assigned: bool,
    /// Referenced from a block other than its home.
    pub captured: bool,
}

impl AnalysisVar {
    /// Returns true for module globals.
    #[must_use]
    pub const fn is_perm(&self) -> bool {
        self.roles.contains(Role::PermanentGlobal)
    }

    /// Returns true for variables kept in a shared array.
    #[must_use]
    pub const fn is_fully_shared(&self) -> bool {
        self.roles.contains(Role::FullyShared)
    }

    /// Returns true for parameters.
    #[must_use]
    pub const fn is_argument(&self) -> bool {
        self.roles.contains(Role::IsArgument)
    }

    /// Returns true for variables in one of `block`'s own shared arrays.
    #[must_use]
    pub fn is_owned_shared(&self, block: BlockId) -> bool {
        self.home == block && self.is_fully_shared() && !self.is_perm()
    }

    /// The array that holds this variable if it is shared.
    #[must_use]
    pub const fn group(&self) -> GroupKey {
        GroupKey {
            owner: self.home,
            within: self.within,
        }
    }
}

/// Whether a block is a unit or a function body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// The compilation unit.
    Program,
    /// A function literal, with its diagnostic name.
    Function(String),
}

/// One lexical scope during analysis.
#[derive(Clone, Debug)]
pub struct AnalysisBlock {
    /// This block's id.
    pub id: BlockId,
    /// Enclosing block.
    pub parent: Option<BlockId>,
    /// Unit or function.
    pub kind: BlockKind,
    /// Set on the unit block.
    pub top: bool,
    /// Variables bound here, parameters first.
    pub temps: Vec<VarId>,
    /// Outer variables used here or passed through to a nested block.
    pub refs: Vec<VarId>,
    /// Variables that some nested block reaches through this block.
    pub shared: Vec<VarId>,
    /// Module globals referenced here.
    pub perms: Vec<VarId>,
    /// Recursive bindings made here.
    pub rec: Vec<VarId>,
    /// Loops in this block's own body, outermost first.
    pub loops: Vec<LoopId>,
    /// Imported or opened module fields referenced here.
    pub bindings: Vec<(String, NamePath)>,
    /// Attributes of the unit's own module referenced by bare name.
    pub globals: Vec<String>,
}

impl AnalysisBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new(id: BlockId, parent: Option<BlockId>, kind: BlockKind) -> Self {
        let top = kind == BlockKind::Program;
        Self {
            id,
            parent,
            kind,
            top,
            temps: Vec::new(),
            refs: Vec::new(),
            shared: Vec::new(),
            perms: Vec::new(),
            rec: Vec::new(),
            loops: Vec::new(),
            bindings: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub fn name(&self) -> &str {
        match &self.kind {
            BlockKind::Program => "<main>",
            BlockKind::Function(name) => name,
        }
    }

    /// Records a reference to an outer variable.
    pub fn add_ref(&mut self, var: VarId) {
        if !self.refs.contains(&var) {
            self.refs.push(var);
        }
    }

    /// Records a module global reference.
    pub fn add_perm(&mut self, var: VarId) {
        if !self.perms.contains(&var) {
            self.perms.push(var);
        }
    }

    /// Records an imported binding.
    pub fn add_binding(&mut self, name: &str, path: NamePath) {
        if !self.bindings.iter().any(|(n, _)| n == name) {
            self.bindings.push((name.to_string(), path));
        }
    }

    /// Records an own-module attribute reference.
    pub fn add_global(&mut self, name: &str) {
        if !self.globals.iter().any(|n| n == name) {
            self.globals.push(name.to_string());
        }
    }
}
