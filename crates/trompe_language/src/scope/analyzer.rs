//! Scope analyzer implementation.
//!
//! Walks the typed tree once, opening an [`AnalysisBlock`] for the unit and
//! for every function literal, and records how each identifier resolves.
//! Loops do not open blocks; they only tag the variables their bodies bind,
//! which gives those variables a per-iteration shared array.
//! Resolutions are keyed by node address, so the tree must not move between
//! analysis and compilation.

use std::collections::HashMap;

use tracing::debug;
use trompe_foundation::{Error, NamePath, Result};

use super::types::{
    AnalysisBlock, AnalysisVar, BlockId, BlockKind, GroupKey, LoopId, Role, Roles, VarId,
};
use crate::module::{Module, ModuleRegistry};
use crate::span::Span;
use crate::typed_tree::{FunDef, LetGroup, NodeKind, Pattern, PatternKind, TypedNode};

/// Address of a tree node, used as a resolution key.
pub(crate) fn site<T>(node: &T) -> usize {
    std::ptr::from_ref(node) as usize
}

/// How an identifier or assignment target resolved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// A variable bound in this unit.
    Var(VarId),
    /// An attribute of the unit's own module.
    Global(String),
    /// A field of an imported or opened module.
    Binding(NamePath),
}

/// The result of analyzing one unit.
#[derive(Debug, Default)]
pub struct Analysis {
    pub(super) blocks: Vec<AnalysisBlock>,
    pub(super) vars: Vec<AnalysisVar>,
    uses: HashMap<usize, Resolution>,
    defs: HashMap<usize, VarId>,
    block_of: HashMap<usize, BlockId>,
    loop_of: HashMap<usize, LoopId>,
}

impl Analysis {
    /// Every block, the unit block first, then functions in pre-order.
    #[must_use]
    pub fn blocks(&self) -> &[AnalysisBlock] {
        &self.blocks
    }

    /// Every variable.
    #[must_use]
    pub fn vars(&self) -> &[AnalysisVar] {
        &self.vars
    }

    /// The unit block.
    #[must_use]
    pub const fn program(&self) -> BlockId {
        BlockId(0)
    }

    /// Looks up a block.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an id from another analysis.
    pub fn block(&self, id: BlockId) -> Result<&AnalysisBlock> {
        self.blocks
            .get(id.0)
            .ok_or_else(|| Error::internal(format!("no block {id}")))
    }

    /// Looks up a variable.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an id from another analysis.
    pub fn var(&self, id: VarId) -> Result<&AnalysisVar> {
        self.vars
            .get(id.0)
            .ok_or_else(|| Error::internal(format!("no variable {id}")))
    }

    /// Members of one shared array, in element order.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unknown owner.
    pub fn members(&self, key: GroupKey) -> Result<Vec<VarId>> {
        let mut members = Vec::new();
        for v in &self.block(key.owner)?.temps {
            let var = self.var(*v)?;
            if var.is_owned_shared(key.owner) && var.group() == key {
                members.push(*v);
            }
        }
        Ok(members)
    }

    /// How an `Ident` or `Assign` node resolved.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a node the analyzer never saw.
    pub fn resolution(&self, node: &TypedNode) -> Result<&Resolution> {
        self.uses
            .get(&site(node))
            .ok_or_else(|| Error::not_found(format!("resolution of node at {}", node.span)))
    }

    /// Variable bound at a binding site: a pattern, a parameter name, or a
    /// `for` node.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown site.
    pub fn def<T>(&self, binding_site: &T) -> Result<VarId> {
        self.defs
            .get(&site(binding_site))
            .copied()
            .ok_or_else(|| Error::not_found("binding site"))
    }

    /// Block opened for a function literal or the unit node.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for any other node.
    pub fn block_of(&self, node: &TypedNode) -> Result<BlockId> {
        self.block_of
            .get(&site(node))
            .copied()
            .ok_or_else(|| Error::not_found(format!("block of node at {}", node.span)))
    }

    /// Loop opened for a `for` or `while` node.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for any other node.
    pub fn loop_of(&self, node: &TypedNode) -> Result<LoopId> {
        self.loop_of
            .get(&site(node))
            .copied()
            .ok_or_else(|| Error::not_found(format!("loop at {}", node.span)))
    }

    /// Most recent variable named `name` bound in `block`.
    #[must_use]
    pub fn find_var(&self, block: BlockId, name: &str) -> Option<VarId> {
        self.blocks
            .get(block.0)?
            .temps
            .iter()
            .rev()
            .copied()
            .find(|v| self.vars.get(v.0).is_some_and(|var| var.name == name))
    }

    /// Number of enclosing blocks.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unknown block.
    pub fn depth(&self, block: BlockId) -> Result<usize> {
        let mut depth = 0;
        let mut cur = self.block(block)?.parent;
        while let Some(parent) = cur {
            depth += 1;
            cur = self.block(parent)?.parent;
        }
        Ok(depth)
    }
}

/// Builds an [`Analysis`] for one unit.
pub struct Analyzer<'a> {
    module: &'a Module,
    registry: &'a ModuleRegistry,
    analysis: Analysis,
    current: BlockId,
    env: Vec<(String, VarId)>,
    loops: Vec<LoopId>,
    next_loop: usize,
}

impl<'a> Analyzer<'a> {
    /// Analyzes a unit compiled into `module`.
    ///
    /// # Errors
    ///
    /// Returns `UnboundIdentifier` for a name that is no variable, attribute of
    /// `module`, or field of an imported or opened module.
    pub fn analyze(
        tree: &TypedNode,
        module: &'a Module,
        registry: &'a ModuleRegistry,
    ) -> Result<Analysis> {
        let mut analyzer = Self {
            module,
            registry,
            analysis: Analysis::default(),
            current: BlockId(0),
            env: Vec::new(),
            loops: Vec::new(),
            next_loop: 0,
        };
        let program = analyzer.open_block(None, BlockKind::Program);
        analyzer.analysis.block_of.insert(site(tree), program);
        analyzer.visit(tree)?;
        analyzer.finalize_roles();

        let analysis = analyzer.analysis;
        for block in &analysis.blocks {
            debug!(
                block = %block.id,
                name = block.name(),
                temps = block.temps.len(),
                refs = block.refs.len(),
                shared = block.shared.len(),
                "analyzed block"
            );
        }
        Ok(analysis)
    }

    // =========================================================================
    // Blocks and bindings
    // =========================================================================

    fn open_block(&mut self, parent: Option<BlockId>, kind: BlockKind) -> BlockId {
        let id = BlockId(self.analysis.blocks.len());
        self.analysis
            .blocks
            .push(AnalysisBlock::new(id, parent, kind));
        id
    }

    fn block_mut(&mut self, id: BlockId) -> &mut AnalysisBlock {
        &mut self.analysis.blocks[id.0]
    }

    fn bind(&mut self, name: &str, binding_site: usize, roles: Roles) -> VarId {
        let id = VarId(self.analysis.vars.len());
        self.analysis.vars.push(AnalysisVar {
            name: name.to_string(),
            home: self.current,
            within: self.loops.last().copied(),
            roles,
            rec: false,
            assigned: false,
            captured: false,
        });
        let current = self.current;
        self.block_mut(current).temps.push(id);
        self.env.push((name.to_string(), id));
        self.analysis.defs.insert(binding_site, id);
        id
    }

    fn bind_pattern(&mut self, pattern: &Pattern, roles: Roles) {
        match &pattern.kind {
            PatternKind::Ident(name) => {
                self.bind(name, site(pattern), roles);
            }
            PatternKind::Tuple(items) => {
                for item in items {
                    self.bind_pattern(item, roles);
                }
            }
            PatternKind::Cons(head, tail) => {
                self.bind_pattern(head, roles);
                self.bind_pattern(tail, roles);
            }
            PatternKind::Wildcard | PatternKind::Literal(_) | PatternKind::Nil => {}
        }
    }

    /// Enters the body of a loop of the current block.
    fn enter_loop(&mut self, node: &TypedNode) {
        let id = LoopId(self.next_loop);
        self.next_loop += 1;
        self.analysis.loop_of.insert(site(node), id);
        let current = self.current;
        self.block_mut(current).loops.push(id);
        self.loops.push(id);
    }

    fn lookup(&self, name: &str) -> Option<VarId> {
        self.env
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn resolve(&mut self, name: &str, span: Span) -> Result<Resolution> {
        if let Some(var) = self.lookup(name) {
            self.note_use(var);
            return Ok(Resolution::Var(var));
        }
        let current = self.current;
        if self.module.has_field(name) {
            self.block_mut(current).add_global(name);
            return Ok(Resolution::Global(name.to_string()));
        }
        if let Some(path) = self.registry.find_binding(self.module, name) {
            self.block_mut(current).add_binding(name, path.clone());
            return Ok(Resolution::Binding(path));
        }
        Err(Error::unbound_identifier(name, span.line, span.column))
    }

    fn resolve_assign(&mut self, name: &str, span: Span) -> Result<Resolution> {
        if let Some(var) = self.lookup(name) {
            self.analysis.vars[var.0].assigned = true;
            self.note_use(var);
            return Ok(Resolution::Var(var));
        }
        if self.module.has_field(name) {
            let current = self.current;
            self.block_mut(current).add_global(name);
            return Ok(Resolution::Global(name.to_string()));
        }
        Err(Error::unbound_identifier(name, span.line, span.column))
    }

    /// Records a use of `var` from the current block.
    fn note_use(&mut self, var: VarId) {
        let current = self.current;
        let (home, perm) = {
            let v = &self.analysis.vars[var.0];
            (v.home, v.is_perm())
        };
        if perm {
            self.block_mut(current).add_perm(var);
            return;
        }
        if home == current {
            return;
        }
        self.analysis.vars[var.0].captured = true;
        self.block_mut(current).add_ref(var);
        if let Some(parent) = self.analysis.blocks[current.0].parent {
            self.add_shared(parent, var);
        }
    }

    /// Marks `var` shared in `block` and every block up to its home.
    ///
    /// Stops at the first block that already lists it.
    fn add_shared(&mut self, start: BlockId, var: VarId) {
        let home = self.analysis.vars[var.0].home;
        let mut block = start;
        loop {
            let b = self.block_mut(block);
            if b.shared.contains(&var) {
                return;
            }
            b.shared.push(var);
            if block == home {
                return;
            }
            b.add_ref(var);
            match b.parent {
                Some(parent) => block = parent,
                None => return,
            }
        }
    }

    fn finalize_roles(&mut self) {
        for var in &mut self.analysis.vars {
            if var.rec || var.is_perm() || (var.captured && var.assigned) {
                var.roles.insert(Role::FullyShared);
            } else if var.captured {
                var.roles.insert(Role::Copy);
            }
        }
    }

    // =========================================================================
    // Tree walk
    // =========================================================================

    fn visit(&mut self, node: &TypedNode) -> Result<()> {
        match &node.kind {
            NodeKind::Literal(_) | NodeKind::ValuePath(_) => Ok(()),
            NodeKind::Ident(name) => {
                let resolution = self.resolve(name, node.span)?;
                self.analysis.uses.insert(site(node), resolution);
                Ok(())
            }
            NodeKind::Tuple(items)
            | NodeKind::List(items)
            | NodeKind::Array(items)
            | NodeKind::Primitive { args: items, .. } => self.visit_all(items),
            NodeKind::Cons(a, b) | NodeKind::Binary(_, a, b) => {
                self.visit(a)?;
                self.visit(b)
            }
            NodeKind::Unary(_, a) => self.visit(a),
            NodeKind::App { callee, args } => {
                self.visit(callee)?;
                self.visit_all(args)
            }
            NodeKind::Fun(def) => self.visit_fun(node, def, None),
            NodeKind::Let(group) => self.visit_let(group),
            NodeKind::If {
                cond,
                then,
                otherwise,
            } => {
                self.visit(cond)?;
                self.visit(then)?;
                match otherwise {
                    Some(otherwise) => self.visit(otherwise),
                    None => Ok(()),
                }
            }
            NodeKind::Case { scrutinee, arms } => {
                self.visit(scrutinee)?;
                for arm in arms {
                    let mark = self.env.len();
                    self.bind_pattern(&arm.pattern, Roles::empty());
                    if let Some(guard) = &arm.guard {
                        self.visit(guard)?;
                    }
                    self.visit(&arm.body)?;
                    self.env.truncate(mark);
                }
                Ok(())
            }
            NodeKind::Seq(items) => {
                let mark = self.env.len();
                self.visit_all(items)?;
                self.env.truncate(mark);
                Ok(())
            }
            NodeKind::Assign { name, value } => {
                self.visit(value)?;
                let resolution = self.resolve_assign(name, node.span)?;
                self.analysis.uses.insert(site(node), resolution);
                Ok(())
            }
            NodeKind::For {
                var,
                start,
                end,
                body,
                ..
            } => {
                self.visit(start)?;
                self.visit(end)?;
                let mark = self.env.len();
                // The counter outlives the iterations.
                self.bind(var, site(node), Roles::empty());
                self.enter_loop(node);
                let result = self.visit(body);
                self.loops.pop();
                self.env.truncate(mark);
                result
            }
            NodeKind::While { cond, body } => {
                self.enter_loop(node);
                let result = self.visit(cond).and_then(|()| self.visit(body));
                self.loops.pop();
                result
            }
            NodeKind::Program(items) => self.visit_all(items),
        }
    }

    fn visit_all(&mut self, items: &[TypedNode]) -> Result<()> {
        for item in items {
            self.visit(item)?;
        }
        Ok(())
    }

    fn visit_fun(&mut self, node: &TypedNode, def: &FunDef, hint: Option<&str>) -> Result<()> {
        let name = def
            .name
            .as_deref()
            .or(hint)
            .map_or_else(|| format!("fun@{}", node.span), str::to_string);
        let id = self.open_block(Some(self.current), BlockKind::Function(name));
        self.analysis.block_of.insert(site(node), id);

        let outer = std::mem::replace(&mut self.current, id);
        let outer_loops = std::mem::take(&mut self.loops);
        let mark = self.env.len();
        for param in &def.params {
            self.bind(param, site(param), Roles::empty().with(Role::IsArgument));
        }
        let result = self.visit(&def.body);
        self.env.truncate(mark);
        self.current = outer;
        self.loops = outer_loops;
        result
    }

    fn visit_value(&mut self, value: &TypedNode, pattern: &Pattern) -> Result<()> {
        match (&value.kind, &pattern.kind) {
            (NodeKind::Fun(def), PatternKind::Ident(name)) => {
                self.visit_fun(value, def, Some(name))
            }
            _ => self.visit(value),
        }
    }

    fn visit_let(&mut self, group: &LetGroup) -> Result<()> {
        // A global holds one value, so bindings repeated by a loop stay local.
        let top = self.analysis.blocks[self.current.0].top && self.loops.is_empty();
        let global = top && (group.body.is_none() || group.rec);
        let roles = if global {
            Roles::empty().with(Role::PermanentGlobal)
        } else {
            Roles::empty()
        };
        let mark = self.env.len();

        if group.rec {
            for binding in &group.bindings {
                let PatternKind::Ident(name) = &binding.pattern.kind else {
                    return Err(Error::internal("let rec may only bind names"));
                };
                let var = self.bind(name, site(&binding.pattern), roles);
                self.analysis.vars[var.0].rec = true;
                let current = self.current;
                self.block_mut(current).rec.push(var);
            }
            for binding in &group.bindings {
                self.visit_value(&binding.value, &binding.pattern)?;
            }
        } else {
            for binding in &group.bindings {
                self.visit_value(&binding.value, &binding.pattern)?;
            }
            for binding in &group.bindings {
                self.bind_pattern(&binding.pattern, roles);
            }
        }

        if let Some(body) = &group.body {
            self.visit(body)?;
            self.env.truncate(mark);
        }
        Ok(())
    }
}
