//! Resolved, index-assigned scopes.
//!
//! [`Analysis::finish`] turns one [`AnalysisBlock`](super::AnalysisBlock) into
//! a [`LocalScope`]: it first classifies every variable the block touches and
//! only then assigns slot indices, in the frame layout
//! `[args][copied][context arrays][temps][own array][loop arrays]`.

use std::collections::HashMap;

use tracing::debug;
use trompe_foundation::{ClosureKind, Error, NamePath, Result};

use super::analyzer::Analysis;
use super::types::{BlockId, GroupKey, LoopId, VarId};

/// Where a variable lives at run time, from one scope's point of view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarLocation {
    /// A frame slot.
    Local(u16),
    /// An element of the shared array held in frame slot `array`.
    Shared {
        /// Slot holding the array.
        array: u16,
        /// Element index.
        elt: u16,
    },
    /// An attribute of the unit's module.
    Global(String),
    /// A field of an imported or opened module.
    Binding(NamePath),
}

/// What occupies one frame slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// A parameter.
    Arg(VarId),
    /// A value copied in at closure creation.
    Copied(VarId),
    /// A shared array owned by an enclosing block.
    Context(GroupKey),
    /// A local temporary.
    Temp(VarId),
    /// This scope's own shared array.
    OwnArray,
    /// The array a loop of this scope recreates on every iteration.
    LoopArray(LoopId),
}

/// The variables kept in one shared array.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharedGroup {
    /// Which array this is.
    pub key: GroupKey,
    /// Frame slot holding the array in the owner's frame.
    pub slot: u16,
    /// Members, in element order.
    pub members: Vec<VarId>,
}

impl SharedGroup {
    /// Creates a group.
    ///
    /// # Errors
    ///
    /// Returns an internal error for a group without members.
    pub fn new(key: GroupKey, slot: u16, members: Vec<VarId>) -> Result<Self> {
        if members.is_empty() {
            return Err(Error::internal(format!("shared group {key} has no members")));
        }
        Ok(Self { key, slot, members })
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false; empty groups are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// The resolved scope of one compiled function.
#[derive(Clone, Debug)]
pub struct LocalScope {
    /// Block this scope was built from.
    pub block: BlockId,
    /// Enclosing block.
    pub outer: Option<BlockId>,
    /// Diagnostic name.
    pub name: String,
    /// Frame slots in order.
    pub stack: Vec<SlotKind>,
    /// Values captured by copy, in capture order.
    pub copied: Vec<VarId>,
    /// Enclosing arrays this scope receives, in slot order.
    pub context: Vec<GroupKey>,
    /// This scope's own shared array.
    pub shared: Option<SharedGroup>,
    /// Per-iteration arrays of this scope's loops, in loop order.
    pub loop_groups: Vec<SharedGroup>,
    /// Module attributes referenced by name.
    pub globals: Vec<String>,
    /// Imported bindings referenced.
    pub bindings: Vec<(String, NamePath)>,
    kind: ClosureKind,
    num_args: usize,
    num_temps: usize,
    locations: HashMap<VarId, VarLocation>,
    names: Vec<(String, VarId)>,
    own_names: Vec<(String, VarId)>,
    context_members: Vec<(String, VarId, usize)>,
}

fn slot_index(n: usize) -> Result<u16> {
    u16::try_from(n).map_err(|_| Error::operand_out_of_range("frame slot", i64::MAX))
}

/// Allocates the frame slot of one own array and places its members.
fn place_group(
    key: GroupKey,
    members: Vec<VarId>,
    slot_kind: SlotKind,
    stack: &mut Vec<SlotKind>,
    locations: &mut HashMap<VarId, VarLocation>,
) -> Result<SharedGroup> {
    let slot = slot_index(stack.len())?;
    stack.push(slot_kind);
    for (elt, v) in members.iter().enumerate() {
        let elt = slot_index(elt)?;
        locations.insert(*v, VarLocation::Shared { array: slot, elt });
    }
    SharedGroup::new(key, slot, members)
}

impl Analysis {
    /// Builds the local scope of one block.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unknown block or if a shared
    /// variable's owner does not keep it, or `OperandOutOfRange` for frames
    /// beyond 65536 slots.
    pub fn finish(&self, id: BlockId) -> Result<LocalScope> {
        let block = self.block(id)?;

        // Classify.
        let mut args = Vec::new();
        let mut temps = Vec::new();
        let mut own_names = Vec::new();
        for v in &block.temps {
            let var = self.var(*v)?;
            if var.is_argument() {
                args.push(*v);
            } else if !var.is_fully_shared() && !var.is_perm() {
                temps.push(*v);
            }
            if var.is_owned_shared(id) {
                own_names.push((var.name.clone(), *v));
            }
        }
        let mut copied = Vec::new();
        let mut shared_refs = Vec::new();
        let mut context: Vec<GroupKey> = Vec::new();
        for v in &block.refs {
            let var = self.var(*v)?;
            if var.is_perm() {
                continue;
            }
            if var.is_fully_shared() {
                shared_refs.push(*v);
                if !context.contains(&var.group()) {
                    context.push(var.group());
                }
            } else {
                copied.push(*v);
            }
        }

        // Assign indices.
        let mut stack = Vec::new();
        let mut locations = HashMap::new();
        for v in &args {
            locations.insert(*v, VarLocation::Local(slot_index(stack.len())?));
            stack.push(SlotKind::Arg(*v));
        }
        for v in &copied {
            locations.insert(*v, VarLocation::Local(slot_index(stack.len())?));
            stack.push(SlotKind::Copied(*v));
        }
        let mut context_slots = HashMap::new();
        for key in &context {
            context_slots.insert(*key, slot_index(stack.len())?);
            stack.push(SlotKind::Context(*key));
        }
        for v in &temps {
            locations.insert(*v, VarLocation::Local(slot_index(stack.len())?));
            stack.push(SlotKind::Temp(*v));
        }
        let key = GroupKey::block(id);
        let own_members = self.members(key)?;
        let shared = if own_members.is_empty() {
            None
        } else {
            let slot_kind = SlotKind::OwnArray;
            Some(place_group(key, own_members, slot_kind, &mut stack, &mut locations)?)
        };
        let mut loop_groups = Vec::new();
        for lp in &block.loops {
            let key = GroupKey::iteration(id, *lp);
            let members = self.members(key)?;
            if !members.is_empty() {
                let slot_kind = SlotKind::LoopArray(*lp);
                loop_groups.push(place_group(key, members, slot_kind, &mut stack, &mut locations)?);
            }
        }

        let mut context_members = Vec::new();
        for v in &shared_refs {
            let var = self.var(*v)?;
            let key = var.group();
            let elt = self
                .members(key)?
                .iter()
                .position(|m| m == v)
                .ok_or_else(|| Error::internal(format!("{v} missing from group {key}")))?;
            let array = *context_slots
                .get(&key)
                .ok_or_else(|| Error::internal(format!("no slot for group {key}")))?;
            locations.insert(
                *v,
                VarLocation::Shared {
                    array,
                    elt: slot_index(elt)?,
                },
            );
            context_members.push((var.name.clone(), *v, self.depth(key.owner)?));
        }
        // Nearest owner first.
        context_members.sort_by(|a, b| b.2.cmp(&a.2));

        let mut globals = Vec::new();
        for v in block.temps.iter().chain(block.perms.iter()) {
            let var = self.var(*v)?;
            if var.is_perm() {
                locations.insert(*v, VarLocation::Global(var.name.clone()));
                if !globals.contains(&var.name) {
                    globals.push(var.name.clone());
                }
            }
        }
        for name in &block.globals {
            if !globals.contains(name) {
                globals.push(name.clone());
            }
        }

        let mut names = Vec::new();
        for v in args.iter().chain(copied.iter()).chain(temps.iter()) {
            names.push((self.var(*v)?.name.clone(), *v));
        }

        let owns_arrays = shared.is_some() || !loop_groups.is_empty();
        let kind = ClosureKind::classify(!copied.is_empty(), !context.is_empty() || owns_arrays);
        let num_arrays = usize::from(shared.is_some()) + loop_groups.len();
        let scope = LocalScope {
            block: id,
            outer: block.parent,
            name: block.name().to_string(),
            num_args: args.len(),
            num_temps: temps.len() + num_arrays,
            stack,
            copied,
            context,
            shared,
            loop_groups,
            globals,
            bindings: block.bindings.clone(),
            kind,
            locations,
            names,
            own_names,
            context_members,
        };
        debug!(
            name = %scope.name,
            kind = %scope.kind,
            args = scope.num_args,
            copied = scope.copied.len(),
            context = scope.context.len(),
            temps = scope.num_temps,
            loop_arrays = scope.loop_groups.len(),
            "finished scope"
        );
        Ok(scope)
    }

    /// Builds the local scope of every block, in block order.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Analysis::finish`].
    pub fn finish_all(&self) -> Result<Vec<LocalScope>> {
        (0..self.blocks().len())
            .map(|i| self.finish(BlockId(i)))
            .collect()
    }
}

impl LocalScope {
    /// Closure-construction class.
    #[must_use]
    pub const fn kind(&self) -> ClosureKind {
        self.kind
    }

    /// Number of parameters.
    #[must_use]
    pub const fn num_args(&self) -> usize {
        self.num_args
    }

    /// Number of copied values.
    #[must_use]
    pub fn num_copied(&self) -> usize {
        self.copied.len()
    }

    /// Number of enclosing arrays received.
    #[must_use]
    pub fn num_context(&self) -> usize {
        self.context.len()
    }

    /// Number of temporaries, including the own array slot.
    #[must_use]
    pub const fn num_temps(&self) -> usize {
        self.num_temps
    }

    /// Number of shared-array elements this scope owns.
    #[must_use]
    pub fn num_shared_slots(&self) -> usize {
        self.shared.as_ref().map_or(0, SharedGroup::len)
    }

    /// Location of a variable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the variable is not visible from this scope.
    pub fn location(&self, var: VarId) -> Result<&VarLocation> {
        self.locations
            .get(&var)
            .ok_or_else(|| Error::not_found(format!("{var} in scope {}", self.name)))
    }

    /// Slot holding the shared array `key`, if this scope has it.
    #[must_use]
    pub fn group_slot(&self, key: GroupKey) -> Option<u16> {
        if key.owner == self.block {
            return match key.within {
                None => self.shared.as_ref().map(|g| g.slot),
                Some(lp) => self.loop_group(lp).map(|g| g.slot),
            };
        }
        self.stack
            .iter()
            .position(|s| *s == SlotKind::Context(key))
            .and_then(|i| u16::try_from(i).ok())
    }

    /// The per-iteration array of loop `lp`, if its body binds shared
    /// variables.
    #[must_use]
    pub fn loop_group(&self, lp: LoopId) -> Option<&SharedGroup> {
        self.loop_groups.iter().find(|g| g.key.within == Some(lp))
    }

    /// Parameters that live in the own array: `(arg slot, element)` pairs the
    /// prologue copies.
    #[must_use]
    pub fn shared_args(&self) -> Vec<(u16, u16)> {
        let Some(group) = &self.shared else {
            return Vec::new();
        };
        self.stack
            .iter()
            .enumerate()
            .filter_map(|(slot, kind)| match kind {
                SlotKind::Arg(v) => group
                    .members
                    .iter()
                    .position(|m| m == v)
                    .and_then(|elt| Some((u16::try_from(slot).ok()?, u16::try_from(elt).ok()?))),
                _ => None,
            })
            .collect()
    }

    /// Resolves a name: own array, own slots, enclosing arrays nearest first,
    /// module attributes, then imported bindings.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if nothing matches.
    pub fn find(&self, name: &str) -> Result<VarLocation> {
        if let Some((_, v)) = self.own_names.iter().rev().find(|(n, _)| n == name) {
            return self.location(*v).cloned();
        }
        if let Some((_, v)) = self.names.iter().rev().find(|(n, _)| n == name) {
            return self.location(*v).cloned();
        }
        if let Some((_, v, _)) = self.context_members.iter().find(|(n, _, _)| n == name) {
            return self.location(*v).cloned();
        }
        if self.globals.iter().any(|g| g == name) {
            return Ok(VarLocation::Global(name.to_string()));
        }
        if let Some((_, path)) = self.bindings.iter().find(|(n, _)| n == name) {
            return Ok(VarLocation::Binding(path.clone()));
        }
        Err(Error::not_found(format!("{name} in scope {}", self.name)))
    }
}
