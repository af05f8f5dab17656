//! The analysis driver.
//!
//! Analysis runs in two phases per function version. Pre-analysis builds
//! the section graph, resolves every identifier to a variable version
//! (minting new versions at assignments and phis at merges) and records the
//! resolution per node. Analysis then walks the same sections in the same
//! order and computes types, which is what allows loop bodies and recursive
//! functions to be walked twice without rebuilding anything.

use std::collections::{HashMap, HashSet};

use sable_ast as ast;
use sable_ast::{ExprKind, NodeId, Span, Stmt};

use crate::control_flow::{Graph, SectionId, SectionState, VarId, VarScope};
use crate::environment::Environment;
use crate::error::{AnalysisError, ErrorKind};
use crate::function::{FunctionId, FunctionTable, VersionId};
use crate::overload::{Callable, CallableVersion, TypeMutator};
use crate::types::{TypeId, TypeKind};

/// Everything the analysis produced: diagnostics, the section graph, and
/// the per-node results keyed by function version.
#[derive(Debug)]
pub struct Analysis {
    pub errors: Vec<AnalysisError>,
    pub graph: Graph,
    pub functions: FunctionTable,
    /// The implicit main function's version.
    pub main: VersionId,
}

impl Analysis {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn node_type(&self, version: VersionId, node: NodeId) -> Option<TypeId> {
        self.functions.version(version).node_types.get(&node).copied()
    }

    pub fn node_var(&self, version: VersionId, node: NodeId) -> Option<VarId> {
        self.functions.version(version).node_vars.get(&node).copied()
    }

    pub fn main_node_type(&self, node: NodeId) -> Option<TypeId> {
        self.node_type(self.main, node)
    }

    pub fn main_node_var(&self, node: NodeId) -> Option<VarId> {
        self.node_var(self.main, node)
    }

    pub fn var_type(&self, var: VarId) -> TypeId {
        self.graph.var(var).ty
    }
}

/// A recorded rebinding inside a loop body.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Mutation {
    pub variable: VarId,
    /// The version the rebinding replaced; for the first mutation of a
    /// name this is the pre-loop version.
    pub prev: VarId,
    pub section: SectionId,
}

pub(crate) struct LoopCtx {
    pub cond_section: SectionId,
    pub end_section: SectionId,
    pub mutations: Vec<Mutation>,
}

pub(crate) struct BlockCtx {
    /// Sections belonging to the current lexical block, for duplicate
    /// declaration checks.
    pub sections: Vec<SectionId>,
}

pub(crate) struct Frame {
    pub version: VersionId,
    pub function: FunctionId,
    pub current_section: SectionId,
    pub blocks: Vec<BlockCtx>,
    pub loops: Vec<LoopCtx>,
    pub returns: Vec<TypeId>,
}

pub struct Analyzer<'e, 'p> {
    pub(crate) env: &'e mut Environment,
    pub(crate) graph: Graph,
    pub(crate) table: FunctionTable,
    pub(crate) errors: Vec<AnalysisError>,
    pub(crate) frames: Vec<Frame>,
    pub(crate) globals: HashMap<String, VarId>,
    pub(crate) fun_nodes: HashMap<NodeId, &'p ast::FunctionExpr>,
    pub(crate) globals_section: SectionId,
}

impl<'e, 'p> Analyzer<'e, 'p> {
    pub fn new(env: &'e mut Environment) -> Self {
        let mut graph = Graph::new();
        let globals_section = graph.new_section("globals");
        Self {
            env,
            graph,
            table: FunctionTable::new(),
            errors: Vec::new(),
            frames: Vec::new(),
            globals: HashMap::new(),
            fun_nodes: HashMap::new(),
            globals_section,
        }
    }

    pub fn analyze_program(mut self, program: &'p ast::Program) -> Analysis {
        self.collect_functions_block(&program.body);
        let any = self.env.any;
        let void = self.env.void;
        let main_fun = self
            .table
            .add_function(program.body.id, Vec::new(), Vec::new(), None, any, void);
        self.table.fun_mut(main_fun).is_main = true;
        let main = self.table.fun(main_fun).default_version;
        self.register_builtin_globals(main);
        self.pre_analyze_version(main, &[], &program.body);
        self.analyze_version(main, &program.body);
        self.degrade_escaping_defaults();
        self.dedup_errors();
        Analysis {
            errors: self.errors,
            graph: self.graph,
            functions: self.table,
            main,
        }
    }

    // ---- setup -----------------------------------------------------------

    fn collect_functions_block(&mut self, b: &'p ast::Block) {
        for stmt in &b.stmts {
            self.collect_functions_stmt(stmt);
        }
    }

    fn collect_functions_stmt(&mut self, s: &'p Stmt) {
        match s {
            Stmt::VarDecl(d) => {
                for (_, value) in &d.decls {
                    if let Some(v) = value {
                        self.collect_functions_expr(v);
                    }
                }
            }
            Stmt::If(s) => {
                self.collect_functions_expr(&s.cond);
                self.collect_functions_block(&s.then_block);
                if let Some(e) = &s.else_block {
                    self.collect_functions_block(e);
                }
            }
            Stmt::While(s) => {
                self.collect_functions_expr(&s.cond);
                self.collect_functions_block(&s.body);
            }
            Stmt::For(s) => {
                if let Some(init) = &s.init {
                    self.collect_functions_stmt(init);
                }
                if let Some(c) = &s.cond {
                    self.collect_functions_expr(c);
                }
                if let Some(st) = &s.step {
                    self.collect_functions_expr(st);
                }
                self.collect_functions_block(&s.body);
            }
            Stmt::Foreach(s) => {
                self.collect_functions_expr(&s.container);
                self.collect_functions_block(&s.body);
            }
            Stmt::Return(s) => {
                if let Some(v) = &s.value {
                    self.collect_functions_expr(v);
                }
            }
            Stmt::Throw(s) => {
                if let Some(v) = &s.value {
                    self.collect_functions_expr(v);
                }
            }
            Stmt::Break(_) | Stmt::Continue(_) => {}
            Stmt::ExprStmt(e) => self.collect_functions_expr(e),
        }
    }

    fn collect_functions_expr(&mut self, e: &'p ast::Expr) {
        match &e.kind {
            ExprKind::Function(f) => {
                self.fun_nodes.insert(e.id, f);
                for p in &f.params {
                    if let Some(d) = &p.default {
                        self.collect_functions_expr(d);
                    }
                }
                self.collect_functions_block(&f.body);
            }
            ExprKind::Array(items) | ExprKind::Set(items) => {
                for i in items {
                    self.collect_functions_expr(i);
                }
            }
            ExprKind::Map(entries) => {
                for (k, v) in entries {
                    self.collect_functions_expr(k);
                    self.collect_functions_expr(v);
                }
            }
            ExprKind::Interval { start, end } => {
                self.collect_functions_expr(start);
                self.collect_functions_expr(end);
            }
            ExprKind::Object(fields) => {
                for (_, v) in fields {
                    self.collect_functions_expr(v);
                }
            }
            ExprKind::Unary { operand, .. } => self.collect_functions_expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.collect_functions_expr(left);
                self.collect_functions_expr(right);
            }
            ExprKind::Member { base, .. } => self.collect_functions_expr(base),
            ExprKind::Index { base, index } => {
                self.collect_functions_expr(base);
                self.collect_functions_expr(index);
            }
            ExprKind::Call { callee, args } => {
                self.collect_functions_expr(callee);
                for a in args {
                    self.collect_functions_expr(a);
                }
            }
            ExprKind::Assign { target, value } => {
                self.collect_functions_expr(target);
                self.collect_functions_expr(value);
            }
            _ => {}
        }
    }

    /// Binds every built-in class as a constant global, so `Number.abs`
    /// resolves like any other member access.
    fn register_builtin_globals(&mut self, main: VersionId) {
        let mut names: Vec<String> = self.env.classes.keys().cloned().collect();
        names.sort();
        for name in names {
            let ty = self.env.class(&name);
            let ty = self.env.add_constant(ty);
            let var = self
                .graph
                .new_variable(&name, VarScope::Internal, ty, main, self.globals_section);
            {
                let v = self.graph.var_mut(var);
                v.injected = true;
                v.global = true;
            }
            self.graph
                .section_mut(self.globals_section)
                .variables
                .insert(name.clone(), var);
            self.globals.insert(name, var);
        }
    }

    // ---- frame and section plumbing ---------------------------------------

    fn frame(&self) -> &Frame {
        self.frames.last().expect("active frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("active frame")
    }

    fn current_section(&self) -> SectionId {
        self.frame().current_section
    }

    fn current_version(&self) -> VersionId {
        self.frame().version
    }

    fn add_error(&mut self, kind: ErrorKind, span: Span) {
        self.errors.push(AnalysisError::new(kind, span));
    }

    /// Repositions the walk without touching section contents; used by the
    /// analysis phase and for sections managed by hand.
    fn move_to(&mut self, id: SectionId) {
        self.frame_mut().current_section = id;
    }

    /// Drops bindings and phis written by an earlier walk of this section,
    /// keeping injected ones (parameters, captures, loop binders).
    fn reset_section(&mut self, id: SectionId) {
        if self.graph.section(id).state == SectionState::Created {
            return;
        }
        let entries: Vec<(String, VarId)> = self
            .graph
            .section(id)
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        for (name, var) in entries {
            if !self.graph.var(var).injected {
                self.graph.section_mut(id).variables.remove(&name);
            }
        }
        self.graph.section_mut(id).phis.clear();
    }

    /// Makes `id` the current section for pre-analysis: resets re-entrant
    /// state and builds phis when the section merges two predecessors.
    fn enter_section(&mut self, id: SectionId) {
        self.move_to(id);
        if let Some(block) = self.frame_mut().blocks.last_mut() {
            if !block.sections.contains(&id) {
                block.sections.push(id);
            }
        }
        self.reset_section(id);
        if self.graph.section(id).predecessors.len() == 2 {
            self.build_phis(id);
        }
        self.graph.section_mut(id).state = SectionState::PreAnalyzed;
    }

    /// Sections allocated for a control-flow node, created once and reused
    /// by every later walk.
    fn node_cfg(&mut self, node: NodeId, names: &[&'static str]) -> Vec<SectionId> {
        let vid = self.current_version();
        if let Some(s) = self.table.version(vid).node_sections.get(&node) {
            return s.clone();
        }
        let secs: Vec<SectionId> = names.iter().map(|n| self.graph.new_section(n)).collect();
        self.table
            .version_mut(vid)
            .node_sections
            .insert(node, secs.clone());
        secs
    }

    // ---- variables ---------------------------------------------------------

    /// Resolution order: globals, operators, then the function stack from
    /// the innermost frame outwards. A hit in an enclosing frame chains a
    /// capture through every frame in between.
    pub(crate) fn get_var(&mut self, name: &str) -> Option<VarId> {
        if let Some(v) = self.globals.get(name) {
            return Some(*v);
        }
        if self.env.operators.contains_key(name) || self.env.unary_operators.contains_key(name) {
            let any = self.env.any;
            let main = self.frames.first().map(|f| f.version)?;
            let var = self
                .graph
                .new_variable(name, VarScope::Internal, any, main, self.globals_section);
            self.graph.var_mut(var).injected = true;
            self.graph
                .section_mut(self.globals_section)
                .variables
                .insert(name.to_string(), var);
            self.globals.insert(name.to_string(), var);
            return Some(var);
        }
        let mut found: Option<(usize, VarId)> = None;
        for fi in (0..self.frames.len()).rev() {
            let frame = &self.frames[fi];
            let version = self.table.version(frame.version);
            if let Some(v) = version.captures_inside.get(name) {
                found = Some((fi, *v));
                break;
            }
            if let Some(v) = version.params.get(name) {
                found = Some((fi, *v));
                break;
            }
            if let Some(v) = self.graph.find_in_chain(frame.current_section, name) {
                found = Some((fi, v));
                break;
            }
        }
        let (fi, mut var) = found?;
        for level in (fi + 1)..self.frames.len() {
            var = self.capture_var(level, var);
        }
        Some(var)
    }

    /// Declares a new variable in the current section. Fails on collision
    /// with a global, a parameter, or a binding of the current block.
    pub(crate) fn add_var(&mut self, name: &str, span: Span) -> Option<VarId> {
        if self.globals.contains_key(name) {
            self.add_error(
                ErrorKind::VariableAlreadyDefined { name: name.to_string() },
                span,
            );
            return None;
        }
        let vid = self.current_version();
        if self.table.version(vid).params.contains_key(name) {
            self.add_error(
                ErrorKind::VariableAlreadyDefined { name: name.to_string() },
                span,
            );
            return None;
        }
        let block_sections: Vec<SectionId> = self
            .frame()
            .blocks
            .last()
            .map(|b| b.sections.clone())
            .unwrap_or_default();
        for sec in block_sections {
            if self.graph.section(sec).variables.contains_key(name) {
                self.add_error(
                    ErrorKind::VariableAlreadyDefined { name: name.to_string() },
                    span,
                );
                return None;
            }
        }
        let any = self.env.any;
        let section = self.current_section();
        let var = self.graph.new_variable(name, VarScope::Local, any, vid, section);
        self.graph.var_mut(var).span = span;
        self.graph
            .section_mut(section)
            .variables
            .insert(name.to_string(), var);
        Some(var)
    }

    /// Mints the next version of a variable and rebinds the name in the
    /// current section (or the parameter map). Inside a loop the rebinding
    /// is recorded so the loop can build its condition phis.
    pub(crate) fn update_var(&mut self, var: VarId, record_mutation: bool) -> VarId {
        let root = self.graph.root_of(var);
        let vnum = self.graph.next_version(root);
        let (name, scope, global, loop_variable) = {
            let v = self.graph.var(var);
            (v.name.clone(), v.scope, v.global, v.loop_variable)
        };
        let any = self.env.any;
        let vid = self.current_version();
        let section = self.current_section();
        let new = self.graph.new_variable(&name, scope, any, vid, section);
        {
            let v = self.graph.var_mut(new);
            v.root = Some(root);
            v.parent = Some(var);
            v.version = vnum;
            v.global = global;
            v.loop_variable = loop_variable;
        }
        if scope == VarScope::Parameter {
            self.table.version_mut(vid).params.insert(name, new);
        } else if global {
            self.globals.insert(name, new);
        } else {
            self.graph
                .section_mut(section)
                .variables
                .insert(name, new);
        }
        if record_mutation && !loop_variable && scope != VarScope::Internal {
            let m = Mutation {
                variable: new,
                prev: var,
                section,
            };
            for lp in self.frame_mut().loops.iter_mut() {
                lp.mutations.push(m);
            }
        }
        new
    }

    /// Phi construction for a two-predecessor merge: every name whose
    /// latest version differs between the branches gets a merged version
    /// here. Only versions of the same root merge; a branch-local
    /// declaration dies at the branch.
    fn build_phis(&mut self, id: SectionId) {
        let preds = self.graph.section(id).predecessors.clone();
        let (p1, p2) = (preds[0], preds[1]);
        for (side, other) in [(p1, p2), (p2, p1)] {
            let mut entries: Vec<(String, VarId)> = self
                .graph
                .section(side)
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect();
            entries.sort_by_key(|(_, v)| *v);
            for (name, v_side) in entries {
                if self.graph.section(id).variables.contains_key(&name) {
                    continue;
                }
                let Some(v_other) = self.graph.find_in_chain_until(other, &name, side) else {
                    continue;
                };
                if v_side == v_other
                    || self.graph.root_of(v_side) != self.graph.root_of(v_other)
                {
                    continue;
                }
                // Sources are stored in predecessor order.
                let (v1, v2) = if side == p1 {
                    (v_side, v_other)
                } else {
                    (v_other, v_side)
                };
                let merged = self.update_var(v1, false);
                let phi = self.graph.new_phi(merged, p1, v1, p2, v2);
                self.graph.section_mut(id).phis.push(phi);
            }
        }
    }

    // ---- pre-analysis -------------------------------------------------------

    fn pre_analyze_version(
        &mut self,
        vid: VersionId,
        params: &'p [ast::Param],
        body: &'p ast::Block,
    ) {
        if self.table.version(vid).pre_analyzed {
            return;
        }
        let fid = self.table.version(vid).function;
        let entry = match self.table.version(vid).entry_section {
            Some(s) => s,
            None => {
                let s = self.graph.new_section("entry");
                self.table.version_mut(vid).entry_section = Some(s);
                s
            }
        };
        let args = self.table.version(vid).args.clone();
        for (i, p) in params.iter().enumerate() {
            let ty = args.get(i).copied().unwrap_or(self.env.any);
            let ty = self.env.not_temporary(ty);
            let var = self
                .graph
                .new_variable(&p.name.node, VarScope::Parameter, ty, vid, entry);
            {
                let v = self.graph.var_mut(var);
                v.injected = true;
                v.span = p.span;
            }
            let version = self.table.version_mut(vid);
            version.params.insert(p.name.node.clone(), var);
            version.initial_params.push(var);
        }
        self.frames.push(Frame {
            version: vid,
            function: fid,
            current_section: entry,
            blocks: Vec::new(),
            loops: Vec::new(),
            returns: Vec::new(),
        });
        self.enter_section(entry);
        self.pre_block(body);
        self.frames.pop();
        self.table.version_mut(vid).pre_analyzed = true;
    }

    fn pre_block(&mut self, b: &'p ast::Block) {
        let current = self.current_section();
        self.frame_mut().blocks.push(BlockCtx {
            sections: vec![current],
        });
        for stmt in &b.stmts {
            self.pre_stmt(stmt);
        }
        self.frame_mut().blocks.pop();
    }

    fn pre_stmt(&mut self, s: &'p Stmt) {
        match s {
            Stmt::VarDecl(d) => self.pre_var_decl(d),
            Stmt::If(s) => self.pre_if(s),
            Stmt::While(s) => self.pre_while(s),
            Stmt::For(s) => self.pre_for(s),
            Stmt::Foreach(s) => self.pre_foreach(s),
            Stmt::Break(s) => self.pre_jump(s, true),
            Stmt::Continue(s) => self.pre_jump(s, false),
            Stmt::Return(s) => {
                if let Some(v) = &s.value {
                    self.pre_expr(v);
                }
                let dead = self.node_cfg(s.id, &["after_return"]);
                self.enter_section(dead[0]);
            }
            Stmt::Throw(s) => {
                if let Some(v) = &s.value {
                    self.pre_expr(v);
                }
                let dead = self.node_cfg(s.id, &["after_throw"]);
                self.enter_section(dead[0]);
            }
            Stmt::ExprStmt(e) => self.pre_expr(e),
        }
    }

    fn pre_var_decl(&mut self, d: &'p ast::VarDecl) {
        for (i, (name, value)) in d.decls.iter().enumerate() {
            // A function value sees its own name, so the binding must exist
            // before the body is walked.
            let binds_function = matches!(value, Some(v) if matches!(v.kind, ExprKind::Function(_)));
            if binds_function {
                self.declare_decl(d, i, name);
            }
            if let Some(v) = value {
                self.pre_expr(v);
            }
            if !binds_function {
                self.declare_decl(d, i, name);
            }
        }
    }

    fn declare_decl(&mut self, d: &'p ast::VarDecl, i: usize, name: &ast::Ident) {
        let vid = self.current_version();
        let var = if d.global {
            if self.globals.contains_key(&name.node) {
                self.add_error(
                    ErrorKind::VariableAlreadyDefined { name: name.node.clone() },
                    name.span,
                );
                None
            } else {
                let any = self.env.any;
                let var = self.graph.new_variable(
                    &name.node,
                    VarScope::Local,
                    any,
                    vid,
                    self.globals_section,
                );
                {
                    let v = self.graph.var_mut(var);
                    v.injected = true;
                    v.global = true;
                    v.span = name.span;
                }
                self.graph
                    .section_mut(self.globals_section)
                    .variables
                    .insert(name.node.clone(), var);
                self.globals.insert(name.node.clone(), var);
                Some(var)
            }
        } else {
            self.add_var(&name.node, name.span)
        };
        if let Some(var) = var {
            self.table
                .version_mut(vid)
                .decl_vars
                .insert((d.id, i as u32), var);
        }
    }

    fn pre_if(&mut self, s: &'p ast::IfStmt) {
        self.pre_expr(&s.cond);
        let before = self.current_section();
        let (then_s, else_s, end_s) = if s.else_block.is_some() {
            let secs = self.node_cfg(s.id, &["then", "else", "end_if"]);
            (secs[0], Some(secs[1]), secs[2])
        } else {
            let secs = self.node_cfg(s.id, &["then", "end_if"]);
            (secs[0], None, secs[1])
        };
        self.graph.add_edge(before, then_s);
        self.enter_section(then_s);
        self.pre_block(&s.then_block);
        let then_exit = self.current_section();
        if let (Some(else_s), Some(else_block)) = (else_s, s.else_block.as_ref()) {
            self.graph.add_edge(before, else_s);
            self.enter_section(else_s);
            self.pre_block(else_block);
            let else_exit = self.current_section();
            self.graph.add_edge(then_exit, end_s);
            self.graph.add_edge(else_exit, end_s);
        } else {
            self.graph.add_edge(then_exit, end_s);
            self.graph.add_edge(before, end_s);
        }
        self.enter_section(end_s);
    }

    /// Positions the walk at a loop's iteration section. The section is
    /// reset and marked by hand rather than through `enter_section`: its
    /// phis come from the mutation summary, not from the two-predecessor
    /// merge rule, and a re-walk must drop the previous walk's merged
    /// bindings and phis before the summary rebuilds them.
    fn enter_loop_cond(&mut self, before: SectionId, cond: SectionId) {
        self.graph.add_edge(before, cond);
        self.reset_section(cond);
        self.move_to(cond);
        self.graph.section_mut(cond).state = SectionState::PreAnalyzed;
    }

    fn pre_while(&mut self, s: &'p ast::WhileStmt) {
        let before = self.current_section();
        let secs = self.node_cfg(s.id, &["while_cond", "while_body", "end_while"]);
        let (cond, body, end) = (secs[0], secs[1], secs[2]);
        self.enter_loop_cond(before, cond);
        self.run_loop_pre(before, cond, body, end, Some(&s.cond), &s.body, None);
    }

    fn pre_for(&mut self, s: &'p ast::ForStmt) {
        if let Some(init) = &s.init {
            self.pre_stmt(init);
        }
        let before = self.current_section();
        let secs = self.node_cfg(s.id, &["for_cond", "for_body", "end_for"]);
        let (cond, body, end) = (secs[0], secs[1], secs[2]);
        self.enter_loop_cond(before, cond);
        self.run_loop_pre(
            before,
            cond,
            body,
            end,
            s.cond.as_ref(),
            &s.body,
            s.step.as_ref(),
        );
    }

    fn pre_foreach(&mut self, s: &'p ast::ForeachStmt) {
        self.pre_expr(&s.container);
        let before = self.current_section();
        let secs = self.node_cfg(s.id, &["foreach_cond", "foreach_body", "end_foreach"]);
        let (cond, body, end) = (secs[0], secs[1], secs[2]);
        self.enter_loop_cond(before, cond);
        // Loop binders live in the iteration section, survive re-walks,
        // and never propagate mutations out of the loop.
        let vid = self.current_version();
        let bind = |this: &mut Self, ident: &ast::Ident, slot: u32| {
            if this.table.version(vid).decl_vars.contains_key(&(s.id, slot)) {
                return;
            }
            let any = this.env.any;
            let var = this
                .graph
                .new_variable(&ident.node, VarScope::Local, any, vid, cond);
            {
                let v = this.graph.var_mut(var);
                v.injected = true;
                v.loop_variable = true;
                v.span = ident.span;
            }
            this.graph
                .section_mut(cond)
                .variables
                .insert(ident.node.clone(), var);
            this.table
                .version_mut(vid)
                .decl_vars
                .insert((s.id, slot), var);
        };
        if let Some(key) = &s.key {
            bind(self, key, 0);
        }
        bind(self, &s.value, 1);
        self.run_loop_pre(before, cond, body, end, None, &s.body, None);
    }

    /// The two-pass loop walk. Pass one discovers which outer variables the
    /// body mutates; each one gets a merged version and a phi in the
    /// iteration section. Pass two re-walks the body against the merged
    /// versions and retargets each phi's back-edge source to the final
    /// version of that pass. Exactly two passes, by construction.
    #[allow(clippy::too_many_arguments)]
    fn run_loop_pre(
        &mut self,
        before: SectionId,
        cond: SectionId,
        body_s: SectionId,
        end: SectionId,
        cond_expr: Option<&'p ast::Expr>,
        body_block: &'p ast::Block,
        step: Option<&'p ast::Expr>,
    ) {
        if let Some(c) = cond_expr {
            self.pre_expr(c);
        }
        self.frame_mut().loops.push(LoopCtx {
            cond_section: cond,
            end_section: end,
            mutations: Vec::new(),
        });
        self.graph.add_edge(cond, body_s);
        self.enter_section(body_s);
        self.pre_block(body_block);
        if let Some(st) = step {
            self.pre_expr(st);
        }
        let exit1 = self.current_section();
        self.graph.add_edge(exit1, cond);
        let lp = self.frame_mut().loops.pop().expect("loop context");
        let (order, first_prev, last) = summarize_mutations(&self.graph, &lp.mutations);

        if !order.is_empty() {
            for root in &order {
                let prev = first_prev[root];
                let m = last[root];
                if prev == m.variable {
                    continue;
                }
                let (name, scope, global) = {
                    let v = self.graph.var(*root);
                    (v.name.clone(), v.scope, v.global)
                };
                let visible = match scope {
                    VarScope::Parameter | VarScope::Capture => true,
                    _ if global => true,
                    _ => self
                        .graph
                        .find_in_chain(before, &name)
                        .map(|v| self.graph.root_of(v) == *root)
                        .unwrap_or(false),
                };
                if !visible {
                    continue;
                }
                self.move_to(cond);
                let merged = self.update_var(prev, false);
                let phi = self.graph.new_phi(merged, before, prev, m.section, m.variable);
                self.graph.section_mut(cond).phis.push(phi);
            }
            // Second pass: the condition re-resolves against the merged
            // versions, then the body.
            self.move_to(cond);
            if let Some(c) = cond_expr {
                self.pre_expr(c);
            }
            self.frame_mut().loops.push(LoopCtx {
                cond_section: cond,
                end_section: end,
                mutations: Vec::new(),
            });
            self.enter_section(body_s);
            self.pre_block(body_block);
            if let Some(st) = step {
                self.pre_expr(st);
            }
            let exit2 = self.current_section();
            self.graph.add_edge(exit2, cond);
            let lp2 = self.frame_mut().loops.pop().expect("loop context");
            let (_, _, last2) = summarize_mutations(&self.graph, &lp2.mutations);
            let phis = self.graph.section(cond).phis.clone();
            for pid in phis {
                let target_root = self.graph.root_of(self.graph.phi(pid).variable);
                if let Some(m2) = last2.get(&target_root) {
                    self.graph.phi_mut(pid).variable2 = m2.variable;
                    self.graph.phi_mut(pid).section2 = m2.section;
                    self.graph.var_mut(m2.variable).phis.push(pid);
                }
            }
        }
        self.graph.add_edge(cond, end);
        self.enter_section(end);
    }

    fn pre_jump(&mut self, s: &'p ast::JumpStmt, is_break: bool) {
        let target = self
            .frame()
            .loops
            .last()
            .map(|lp| if is_break { lp.end_section } else { lp.cond_section });
        match target {
            Some(t) => {
                let current = self.current_section();
                self.graph.add_edge(current, t);
            }
            None => {
                let kind = if is_break {
                    ErrorKind::BreakOutsideLoop
                } else {
                    ErrorKind::ContinueOutsideLoop
                };
                self.add_error(kind, s.span);
            }
        }
        let dead = self.node_cfg(s.id, &["after_jump"]);
        self.enter_section(dead[0]);
    }

    fn pre_expr(&mut self, e: &'p ast::Expr) {
        match &e.kind {
            ExprKind::Null
            | ExprKind::Boolean(_)
            | ExprKind::Integer(_)
            | ExprKind::Long(_)
            | ExprKind::Real(_)
            | ExprKind::BigInt(_)
            | ExprKind::Str(_) => {}
            ExprKind::Ident(name) => {
                let var = match self.get_var(name) {
                    Some(v) => v,
                    None => self.recover_undefined(name, e.span),
                };
                let vid = self.current_version();
                self.table.version_mut(vid).node_vars.insert(e.id, var);
            }
            ExprKind::Array(items) | ExprKind::Set(items) => {
                for i in items {
                    self.pre_expr(i);
                }
            }
            ExprKind::Map(entries) => {
                for (k, v) in entries {
                    self.pre_expr(k);
                    self.pre_expr(v);
                }
            }
            ExprKind::Interval { start, end } => {
                self.pre_expr(start);
                self.pre_expr(end);
            }
            ExprKind::Object(fields) => {
                for (_, v) in fields {
                    self.pre_expr(v);
                }
            }
            ExprKind::Unary { operand, .. } => self.pre_expr(operand),
            ExprKind::Binary { left, right, .. } => {
                self.pre_expr(left);
                self.pre_expr(right);
            }
            ExprKind::Member { base, .. } => self.pre_expr(base),
            ExprKind::Index { base, index } => {
                self.pre_expr(base);
                self.pre_expr(index);
            }
            ExprKind::Call { callee, args } => {
                self.pre_expr(callee);
                for a in args {
                    self.pre_expr(a);
                }
            }
            ExprKind::Assign { target, value } => {
                self.pre_expr(value);
                match &target.kind {
                    ExprKind::Ident(name) => {
                        let var = match self.get_var(name) {
                            Some(v) => v,
                            None => self.recover_undefined(name, target.span),
                        };
                        let vid = self.current_version();
                        self.table.version_mut(vid).node_vars.insert(target.id, var);
                        let new = self.update_var(var, true);
                        let vid = self.current_version();
                        self.table.version_mut(vid).assign_vars.insert(e.id, new);
                    }
                    _ => self.pre_expr(target),
                }
            }
            ExprKind::Function(f) => self.pre_function(e.id, f),
        }
    }

    /// An undefined name gets a diagnostic and an injected `any` binding so
    /// the rest of the analysis can proceed.
    fn recover_undefined(&mut self, name: &str, span: Span) -> VarId {
        self.add_error(ErrorKind::UndefinedVariable { name: name.to_string() }, span);
        let any = self.env.any;
        let vid = self.current_version();
        let section = self.current_section();
        let var = self
            .graph
            .new_variable(name, VarScope::Internal, any, vid, section);
        {
            let v = self.graph.var_mut(var);
            v.injected = true;
            v.span = span;
        }
        self.graph
            .section_mut(section)
            .variables
            .insert(name.to_string(), var);
        var
    }

    fn pre_function(&mut self, node: NodeId, f: &'p ast::FunctionExpr) {
        if self.table.by_node.contains_key(&node) {
            return; // re-walk of a loop body
        }
        for p in &f.params {
            if let Some(d) = &p.default {
                self.pre_expr(d);
            }
        }
        let any = self.env.any;
        let void = self.env.void;
        let params: Vec<String> = f.params.iter().map(|p| p.name.node.clone()).collect();
        let default_nodes: Vec<Option<NodeId>> =
            f.params.iter().map(|p| p.default.as_ref().map(|d| d.id)).collect();
        let parent = self.frame().function;
        let fid = self
            .table
            .add_function(node, params, default_nodes, Some(parent), any, void);
        let dv = self.table.fun(fid).default_version;
        self.pre_analyze_version(dv, &f.params, &f.body);
    }

    // ---- analysis ------------------------------------------------------------

    fn analyze_version(&mut self, vid: VersionId, body: &'p ast::Block) {
        if self.table.version(vid).analyzed {
            return;
        }
        if self.frames.iter().any(|f| f.version == vid) {
            return; // already on the stack (mutual recursion)
        }
        let fid = self.table.version(vid).function;
        let Some(entry) = self.table.version(vid).entry_section else {
            return;
        };
        self.refresh_captures(vid);
        self.frames.push(Frame {
            version: vid,
            function: fid,
            current_section: entry,
            blocks: Vec::new(),
            loops: Vec::new(),
            returns: Vec::new(),
        });

        let body_ty = self.analyze_block(body);
        let mut ret = self.collect_return_type(vid, body_ty);
        self.table.version_mut(vid).return_type = ret;

        if self.table.fun(fid).recursive {
            // Second pass with the now-known return type flowing into the
            // recursive call sites.
            self.frame_mut().returns.clear();
            self.move_to(entry);
            let body_ty = self.analyze_block(body);
            ret = self.collect_return_type(vid, body_ty);
            self.table.version_mut(vid).return_type = ret;
        }

        let args = self.table.version(vid).args.clone();
        let is_closure = !self.table.fun(fid).captures.is_empty();
        let ty = if is_closure {
            self.env.closure(args, ret)
        } else {
            self.env.function(args, ret)
        };
        self.table.version_mut(vid).ty = ty;

        self.frames.pop();
        self.table.version_mut(vid).analyzed = true;
    }

    /// Union of the block value and every return statement, with this
    /// version's recursion placeholder stripped back out.
    fn collect_return_type(&mut self, vid: VersionId, body_ty: TypeId) -> TypeId {
        let returns = self.frame().returns.clone();
        let mut ret = body_ty;
        for r in returns {
            ret = self.env.union(ret, r);
        }
        if let Some(ph) = self.table.version(vid).placeholder_return {
            ret = self.strip_placeholder_member(ret, ph);
        }
        self.env.not_temporary(ret)
    }

    fn strip_placeholder_member(&mut self, ty: TypeId, placeholder: TypeId) -> TypeId {
        if ty == placeholder {
            return self.env.any;
        }
        if let TypeKind::Compound { members, .. } = self.env.kind(ty).clone() {
            if members.contains(&placeholder) {
                let rest: Vec<TypeId> =
                    members.into_iter().filter(|m| *m != placeholder).collect();
                if rest.is_empty() {
                    return self.env.any;
                }
                if rest.len() == 1 {
                    return rest[0];
                }
                return self.env.compound(rest);
            }
        }
        ty
    }

    /// Escaping functions must stay callable with arbitrary arguments, so
    /// their default version's visible return type degrades to `any`.
    fn degrade_escaping_defaults(&mut self) {
        let any = self.env.any;
        for i in 0..self.table.functions.len() {
            let f = &self.table.functions[i];
            if !f.generate_default_version || f.is_main {
                continue;
            }
            let dv = f.default_version;
            let args = self.table.version(dv).args.clone();
            let is_closure = !f.captures.is_empty();
            let ty = if is_closure {
                self.env.closure(args, any)
            } else {
                self.env.function(args, any)
            };
            let v = self.table.version_mut(dv);
            v.return_type = any;
            v.ty = ty;
        }
    }

    fn analyze_block(&mut self, b: &'p ast::Block) -> TypeId {
        let mut last = self.env.void;
        for stmt in &b.stmts {
            last = self.analyze_stmt(stmt);
        }
        last
    }

    fn analyze_stmt(&mut self, s: &'p Stmt) -> TypeId {
        match s {
            Stmt::VarDecl(d) => {
                self.analyze_var_decl(d);
                self.env.void
            }
            Stmt::If(s) => {
                self.analyze_if(s);
                self.env.void
            }
            Stmt::While(s) => {
                let secs = self.node_cfg(s.id, &["while_cond", "while_body", "end_while"]);
                self.analyze_loop(secs[0], secs[1], secs[2], Some(&s.cond), &s.body, None);
                self.env.void
            }
            Stmt::For(s) => {
                if let Some(init) = &s.init {
                    self.analyze_stmt(init);
                }
                let secs = self.node_cfg(s.id, &["for_cond", "for_body", "end_for"]);
                self.analyze_loop(
                    secs[0],
                    secs[1],
                    secs[2],
                    s.cond.as_ref(),
                    &s.body,
                    s.step.as_ref(),
                );
                self.env.void
            }
            Stmt::Foreach(s) => {
                self.analyze_foreach(s);
                self.env.void
            }
            Stmt::Break(s) | Stmt::Continue(s) => {
                let dead = self.node_cfg(s.id, &["after_jump"]);
                self.move_to(dead[0]);
                self.env.void
            }
            Stmt::Return(s) => {
                let ty = match &s.value {
                    Some(v) => self.analyze_expr(v),
                    None => self.env.void,
                };
                self.frame_mut().returns.push(ty);
                let dead = self.node_cfg(s.id, &["after_return"]);
                self.move_to(dead[0]);
                self.env.void
            }
            Stmt::Throw(s) => {
                if let Some(v) = &s.value {
                    self.analyze_expr(v);
                }
                let vid = self.current_version();
                self.table.version_mut(vid).throws = true;
                let dead = self.node_cfg(s.id, &["after_throw"]);
                self.move_to(dead[0]);
                self.env.void
            }
            Stmt::ExprStmt(e) => self.analyze_expr(e),
        }
    }

    fn analyze_var_decl(&mut self, d: &'p ast::VarDecl) {
        let vid = self.current_version();
        for (i, (name, value)) in d.decls.iter().enumerate() {
            let Some(var) = self
                .table
                .version(vid)
                .decl_vars
                .get(&(d.id, i as u32))
                .copied()
            else {
                if let Some(v) = value {
                    self.analyze_expr(v);
                }
                continue;
            };
            let ty = match value {
                Some(v) => {
                    // Link before the body is typed, so recursive calls in
                    // there resolve back to this function.
                    if let ExprKind::Function(_) = v.kind {
                        if let Some(f) = self.table.by_node.get(&v.id).copied() {
                            self.graph.var_mut(var).fun = Some(f);
                            if self.table.fun(f).name.is_none() {
                                self.table.fun_mut(f).name = Some(name.node.clone());
                            }
                        }
                    }
                    let mut ty = self.analyze_expr(v);
                    if self.env.is_void(ty) {
                        self.add_error(
                            ErrorKind::CantAssignVoid { name: name.node.clone() },
                            v.span,
                        );
                        ty = self.env.any;
                    }
                    self.env.not_temporary(ty)
                }
                None => self.env.null,
            };
            self.graph.var_mut(var).ty = ty;
        }
    }

    fn analyze_if(&mut self, s: &'p ast::IfStmt) {
        self.analyze_expr(&s.cond);
        let (then_s, else_s, end_s) = if s.else_block.is_some() {
            let secs = self.node_cfg(s.id, &["then", "else", "end_if"]);
            (secs[0], Some(secs[1]), secs[2])
        } else {
            let secs = self.node_cfg(s.id, &["then", "end_if"]);
            (secs[0], None, secs[1])
        };
        self.move_to(then_s);
        self.analyze_block(&s.then_block);
        if let (Some(else_s), Some(else_block)) = (else_s, s.else_block.as_ref()) {
            self.move_to(else_s);
            self.analyze_block(else_block);
        }
        self.move_to(end_s);
        self.graph.analyze_section(self.env, end_s);
    }

    fn analyze_foreach(&mut self, s: &'p ast::ForeachStmt) {
        let ct = self.analyze_expr(&s.container);
        if !self.env.is_iterable(ct) {
            self.add_error(
                ErrorKind::ValueNotIterable {
                    ty: self.env.display(ct),
                },
                s.container.span,
            );
        }
        let secs = self.node_cfg(s.id, &["foreach_cond", "foreach_body", "end_foreach"]);
        let vid = self.current_version();
        if let Some(var) = self.table.version(vid).decl_vars.get(&(s.id, 0)).copied() {
            let kt = self.env.key(ct);
            self.graph.var_mut(var).ty = kt;
        }
        if let Some(var) = self.table.version(vid).decl_vars.get(&(s.id, 1)).copied() {
            let et = self.env.element(ct);
            let et = self.env.not_temporary(et);
            self.graph.var_mut(var).ty = et;
        }
        self.analyze_loop(secs[0], secs[1], secs[2], None, &s.body, None);
    }

    /// Type-level counterpart of the two-pass loop walk. The first pass
    /// seeds every condition phi with its pre-loop source, so the body is
    /// typed against stable pre-loop types; the second runs only if the
    /// union with the back-edge source changed anything.
    fn analyze_loop(
        &mut self,
        cond: SectionId,
        body_s: SectionId,
        end: SectionId,
        cond_expr: Option<&'p ast::Expr>,
        body_block: &'p ast::Block,
        step: Option<&'p ast::Expr>,
    ) {
        let phis = self.graph.section(cond).phis.clone();
        for pid in &phis {
            let (target, v1) = {
                let p = self.graph.phi(*pid);
                (p.variable, p.variable1)
            };
            let ty = self.graph.var(v1).ty;
            self.graph.var_mut(target).ty = ty;
        }
        self.move_to(cond);
        if let Some(c) = cond_expr {
            self.analyze_expr(c);
        }
        self.move_to(body_s);
        self.analyze_block(body_block);
        if let Some(st) = step {
            self.analyze_expr(st);
        }
        let mut changed = false;
        for pid in &phis {
            let (target, v1, v2) = {
                let p = self.graph.phi(*pid);
                (p.variable, p.variable1, p.variable2)
            };
            let ty = self.env.union(self.graph.var(v1).ty, self.graph.var(v2).ty);
            if ty != self.graph.var(target).ty {
                self.graph.var_mut(target).ty = ty;
                changed = true;
            }
        }
        if changed {
            self.move_to(cond);
            if let Some(c) = cond_expr {
                self.analyze_expr(c);
            }
            self.move_to(body_s);
            self.analyze_block(body_block);
            if let Some(st) = step {
                self.analyze_expr(st);
            }
            for pid in &phis {
                let (target, v1, v2) = {
                    let p = self.graph.phi(*pid);
                    (p.variable, p.variable1, p.variable2)
                };
                let ty = self.env.union(self.graph.var(v1).ty, self.graph.var(v2).ty);
                self.graph.var_mut(target).ty = ty;
            }
        }
        self.graph.analyze_section(self.env, cond);
        self.graph.analyze_section(self.env, body_s);
        self.move_to(end);
        self.graph.analyze_section(self.env, end);
    }

    fn analyze_expr(&mut self, e: &'p ast::Expr) -> TypeId {
        let ty = self.analyze_expr_inner(e);
        let vid = self.current_version();
        self.table.version_mut(vid).node_types.insert(e.id, ty);
        ty
    }

    fn analyze_expr_inner(&mut self, e: &'p ast::Expr) -> TypeId {
        match &e.kind {
            ExprKind::Null => self.env.null,
            ExprKind::Boolean(_) => self.env.boolean,
            ExprKind::Integer(_) => self.env.integer,
            ExprKind::Long(_) => self.env.long,
            ExprKind::Real(_) => self.env.real,
            ExprKind::BigInt(_) => self.env.bigint,
            ExprKind::Str(_) => self.env.string,
            ExprKind::Ident(_) => {
                let vid = self.current_version();
                match self.table.version(vid).node_vars.get(&e.id).copied() {
                    Some(v) => self.graph.var(v).ty,
                    None => self.env.any,
                }
            }
            ExprKind::Array(items) => {
                let mut elem = self.env.never;
                for item in items {
                    let t = self.analyze_expr(item);
                    elem = self.env.union(elem, t);
                }
                self.env.tmp_array(elem)
            }
            ExprKind::Set(items) => {
                let mut elem = self.env.never;
                for item in items {
                    let t = self.analyze_expr(item);
                    elem = self.env.union(elem, t);
                }
                self.env.tmp_set(elem)
            }
            ExprKind::Map(entries) => {
                let mut key = self.env.never;
                let mut elem = self.env.never;
                for (k, v) in entries {
                    let kt = self.analyze_expr(k);
                    let vt = self.analyze_expr(v);
                    key = self.env.union(key, kt);
                    elem = self.env.union(elem, vt);
                }
                self.env.tmp_map(key, elem)
            }
            ExprKind::Interval { start, end } => {
                self.analyze_expr(start);
                self.analyze_expr(end);
                self.env.interval
            }
            ExprKind::Object(fields) => {
                for (_, v) in fields {
                    self.analyze_expr(v);
                }
                self.env.object
            }
            ExprKind::Unary { op, operand } => {
                let ot = self.analyze_expr(operand);
                self.resolve_operator_call(
                    self.env.unary_operators.get(op.symbol()).cloned(),
                    op.symbol(),
                    &[ot],
                    e.span,
                )
            }
            ExprKind::Binary { op, left, right } => {
                let lt = self.analyze_expr(left);
                let rt = self.analyze_expr(right);
                // Arithmetic over a recursion placeholder takes the shape
                // of the other operand; the second pass firms it up.
                let lp = self.env.data(lt).placeholder;
                let rp = self.env.data(rt).placeholder;
                if lp && rp {
                    return self.env.any;
                }
                if lp {
                    return rt;
                }
                if rp {
                    return lt;
                }
                self.resolve_operator_call(
                    self.env.operators.get(op.symbol()).cloned(),
                    op.symbol(),
                    &[lt, rt],
                    e.span,
                )
            }
            ExprKind::Member { base, member } => {
                let bt = self.analyze_expr(base);
                self.analyze_member_access(bt, member, e.span)
            }
            ExprKind::Index { base, index } => {
                let bt = self.analyze_expr(base);
                self.analyze_expr(index);
                self.env.element(bt)
            }
            ExprKind::Call { callee, args } => self.analyze_call(e, callee, args),
            ExprKind::Assign { target, value } => {
                let mut vt = self.analyze_expr(value);
                match &target.kind {
                    ExprKind::Ident(name) => {
                        if self.env.is_void(vt) {
                            self.add_error(
                                ErrorKind::CantAssignVoid { name: name.clone() },
                                value.span,
                            );
                            vt = self.env.any;
                        }
                        let vid = self.current_version();
                        let ty = self.env.not_temporary(vt);
                        if let Some(new) =
                            self.table.version(vid).assign_vars.get(&e.id).copied()
                        {
                            self.graph.var_mut(new).ty = ty;
                            if let ExprKind::Function(_) = value.kind {
                                self.graph.var_mut(new).fun =
                                    self.table.by_node.get(&value.id).copied();
                            }
                        }
                        self.table.version_mut(vid).node_types.insert(target.id, ty);
                        ty
                    }
                    ExprKind::Member { base, .. } => {
                        self.analyze_expr(base);
                        vt
                    }
                    ExprKind::Index { base, index } => {
                        self.analyze_expr(base);
                        self.analyze_expr(index);
                        vt
                    }
                    _ => {
                        self.analyze_expr(target);
                        vt
                    }
                }
            }
            ExprKind::Function(f) => self.analyze_function_expr(e.id, f),
        }
    }

    fn resolve_operator_call(
        &mut self,
        callable: Option<Callable>,
        name: &str,
        args: &[TypeId],
        span: Span,
    ) -> TypeId {
        let Some(callable) = callable else {
            return self.env.any;
        };
        match callable.resolve(self.env, args) {
            Some(v) => self.env.return_type(v.ty),
            None => {
                let shown: Vec<String> = args.iter().map(|a| self.env.display(*a)).collect();
                let candidates = callable.describe_versions(self.env);
                self.add_error(
                    ErrorKind::NoMatchingOverload {
                        name: name.to_string(),
                        args: shown,
                        candidates,
                    },
                    span,
                );
                self.env.any
            }
        }
    }

    /// Member lookup: the value's built-in class first, then the root
    /// `Value` class. A `Class`-typed base looks up statically on the named
    /// class instead.
    fn analyze_member_access(&mut self, base_ty: TypeId, member: &ast::Ident, span: Span) -> TypeId {
        if self.env.is_any(base_ty) {
            return self.env.any;
        }
        let cls_name = match self.env.kind(self.env.fold(base_ty)) {
            TypeKind::Class(n) => n.clone(),
            _ => self.env.class_of(base_ty).to_string(),
        };
        for name in [cls_name.as_str(), "Value"] {
            let Some(class) = self.env.classes.get(name) else {
                continue;
            };
            if let Some(field) = class.fields.get(&member.node) {
                return *field;
            }
            if let Some(method) = class.methods.get(&member.node) {
                if let Some(first) = method.versions.first() {
                    return first.ty;
                }
            }
        }
        self.add_error(
            ErrorKind::NoSuchAttribute {
                class: cls_name,
                attribute: member.node.clone(),
            },
            span,
        );
        self.env.any
    }

    fn analyze_call(
        &mut self,
        e: &'p ast::Expr,
        callee: &'p ast::Expr,
        args: &'p [ast::Expr],
    ) -> TypeId {
        match &callee.kind {
            ExprKind::Ident(_) => {
                let ct = self.analyze_expr(callee);
                let vid = self.current_version();
                let fun = self
                    .table
                    .version(vid)
                    .node_vars
                    .get(&callee.id)
                    .and_then(|v| self.graph.var(*v).fun);
                let arg_types: Vec<TypeId> =
                    args.iter().map(|a| self.analyze_expr(a)).collect();
                if let Some(fid) = fun {
                    if let Some(ty) = self.recursive_call_type(fid) {
                        return ty;
                    }
                    let sig = self.will_take(fid, arg_types, e.span);
                    return self.env.return_type(sig);
                }
                self.mark_escaping_args(args);
                if self.env.is_callable(ct) {
                    self.env.return_type(ct)
                } else {
                    self.add_error(
                        ErrorKind::ValueNotCallable {
                            ty: self.env.display(ct),
                        },
                        callee.span,
                    );
                    self.env.any
                }
            }
            ExprKind::Member { base, member } => {
                let bt = self.analyze_expr(base);
                let mut full_args = vec![bt];
                for a in args {
                    let t = self.analyze_expr(a);
                    full_args.push(t);
                }
                self.mark_escaping_args(args);
                if self.env.is_any(bt) {
                    return self.env.any;
                }
                let cls_name = match self.env.kind(self.env.fold(bt)) {
                    TypeKind::Class(n) => n.clone(),
                    _ => self.env.class_of(bt).to_string(),
                };
                let mut method: Option<Callable> = None;
                for name in [cls_name.as_str(), "Value"] {
                    if let Some(c) = self
                        .env
                        .classes
                        .get(name)
                        .and_then(|cl| cl.methods.get(&member.node))
                    {
                        method = Some(c.clone());
                        break;
                    }
                }
                let Some(method) = method else {
                    self.add_error(
                        ErrorKind::NoSuchAttribute {
                            class: cls_name,
                            attribute: member.node.clone(),
                        },
                        callee.span,
                    );
                    return self.env.any;
                };
                // Static class access (`Number.max(...)`) carries no
                // receiver value.
                if matches!(self.env.kind(self.env.fold(bt)), TypeKind::Class(_)) {
                    full_args.remove(0);
                }
                match method.resolve(self.env, &full_args) {
                    Some(v) => {
                        self.apply_mutators(&v, &full_args, args);
                        self.env.return_type(v.ty)
                    }
                    None => {
                        let shown: Vec<String> =
                            full_args.iter().map(|a| self.env.display(*a)).collect();
                        let candidates = method.describe_versions(self.env);
                        self.add_error(
                            ErrorKind::NoMatchingOverload {
                                name: format!("{}.{}", cls_name, member.node),
                                args: shown,
                                candidates,
                            },
                            e.span,
                        );
                        self.env.any
                    }
                }
            }
            _ => {
                let ct = self.analyze_expr(callee);
                for a in args {
                    self.analyze_expr(a);
                }
                self.mark_escaping_args(args);
                if self.env.is_callable(ct) {
                    self.env.return_type(ct)
                } else {
                    self.add_error(
                        ErrorKind::ValueNotCallable {
                            ty: self.env.display(ct),
                        },
                        callee.span,
                    );
                    self.env.any
                }
            }
        }
    }

    /// A call to a function currently being analyzed: reuse its return
    /// type when the first pass already produced one, otherwise hand out
    /// the recursion placeholder.
    fn recursive_call_type(&mut self, fid: FunctionId) -> Option<TypeId> {
        let frame = self.frames.iter().rev().find(|f| f.function == fid)?;
        let vr = frame.version;
        self.table.fun_mut(fid).recursive = true;
        let known = self.table.version(vr).return_type;
        if !self.env.is_void(known) && !self.env.data(known).placeholder {
            return Some(known);
        }
        if let Some(ph) = self.table.version(vr).placeholder_return {
            return Some(ph);
        }
        let ph = self.env.generate_placeholder();
        self.table.version_mut(vr).placeholder_return = Some(ph);
        Some(ph)
    }

    /// A version that stores an argument into dynamic storage boxes it:
    /// the argument variable's visible type becomes `any`.
    fn apply_mutators(
        &mut self,
        version: &CallableVersion,
        full_args: &[TypeId],
        arg_exprs: &'p [ast::Expr],
    ) {
        let params = self.env.arguments(version.ty);
        for m in &version.mutators {
            let TypeMutator::ConvertArgToAny(i) = *m;
            let Some(param) = params.get(i) else { continue };
            if !self.env.is_any(*param) {
                continue;
            }
            if full_args.get(i).copied().map(|t| self.env.is_any(t)) == Some(true) {
                continue;
            }
            // Position 0 is the receiver.
            let Some(expr) = i.checked_sub(1).and_then(|j| arg_exprs.get(j)) else {
                continue;
            };
            if let ExprKind::Ident(_) = expr.kind {
                let vid = self.current_version();
                if let Some(v) = self.table.version(vid).node_vars.get(&expr.id).copied() {
                    let any = self.env.any;
                    self.graph.var_mut(v).ty = any;
                    self.graph.var_mut(v).boxed = true;
                }
            }
        }
    }

    /// A function value handed to code the analyzer cannot see must keep a
    /// version callable with any arguments.
    fn mark_escaping_args(&mut self, args: &'p [ast::Expr]) {
        let vid = self.current_version();
        for a in args {
            if let ExprKind::Ident(_) = a.kind {
                if let Some(f) = self
                    .table
                    .version(vid)
                    .node_vars
                    .get(&a.id)
                    .and_then(|v| self.graph.var(*v).fun)
                {
                    self.table.fun_mut(f).generate_default_version = true;
                }
            }
        }
    }

    fn analyze_function_expr(&mut self, node: NodeId, f: &'p ast::FunctionExpr) -> TypeId {
        let Some(fid) = self.table.by_node.get(&node).copied() else {
            return self.env.any;
        };
        for (i, p) in f.params.iter().enumerate() {
            if let Some(d) = &p.default {
                let t = self.analyze_expr(d);
                let t = self.env.not_temporary(t);
                self.table.fun_mut(fid).default_types[i] = Some(t);
            }
        }
        let dv = self.table.fun(fid).default_version;
        self.analyze_version(dv, &f.body);
        self.table.version(dv).ty
    }

    /// Specialization entry point: fills omitted arguments from defaults,
    /// reuses the cached version for a known tuple, refuses to specialize
    /// over unresolved placeholders, and otherwise analyzes a fresh
    /// version.
    pub(crate) fn will_take(
        &mut self,
        fid: FunctionId,
        args: Vec<TypeId>,
        span: Span,
    ) -> TypeId {
        let name = self
            .table
            .fun(fid)
            .name
            .clone()
            .unwrap_or_else(|| "<fun>".to_string());
        let nparams = self.table.fun(fid).params.len();
        let mut args: Vec<TypeId> = args
            .iter()
            .map(|a| self.env.not_temporary(*a))
            .collect();
        if args.len() > nparams {
            self.add_error(
                ErrorKind::WrongArgumentCount {
                    name: name.clone(),
                    expected: nparams,
                    got: args.len(),
                },
                span,
            );
            args.truncate(nparams);
        }
        while args.len() < nparams {
            let i = args.len();
            let default = self.table.fun(fid).default_types[i];
            match default {
                Some(t) => args.push(t),
                None => {
                    self.add_error(
                        ErrorKind::WrongArgumentCount {
                            name: name.clone(),
                            expected: nparams,
                            got: args.len(),
                        },
                        span,
                    );
                    args.push(self.env.any);
                }
            }
        }
        let dv = self.table.fun(fid).default_version;
        if args == self.table.version(dv).args {
            if let Some(fexpr) = self.fun_nodes.get(&self.table.fun(fid).node).copied() {
                self.analyze_version(dv, &fexpr.body);
            }
            return self.table.version(dv).ty;
        }
        if let Some(v) = self.table.fun(fid).versions.get(&args).copied() {
            return self.table.version(v).ty;
        }
        if args.iter().any(|a| self.env.data(*a).placeholder) {
            return self.table.version(dv).ty;
        }
        let void = self.env.void;
        let vid = self.table.add_version(fid, args.clone(), void);
        self.table.fun_mut(fid).versions.insert(args, vid);
        let node = self.table.fun(fid).node;
        let Some(fexpr) = self.fun_nodes.get(&node).copied() else {
            return self.table.version(dv).ty;
        };
        self.pre_analyze_version(vid, &fexpr.params, &fexpr.body);
        self.analyze_version(vid, &fexpr.body);
        self.table.version(vid).ty
    }

    fn dedup_errors(&mut self) {
        let mut seen: HashSet<(String, usize, usize)> = HashSet::new();
        self.errors.retain(|e| {
            seen.insert((e.message.clone(), e.span.offset(), e.span.len()))
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_ast::{BinOp, Builder};

    fn analyze(program: &ast::Program) -> (Environment, Analysis) {
        let mut env = Environment::new();
        let analysis = Analyzer::new(&mut env).analyze_program(program);
        (env, analysis)
    }

    #[test]
    fn declarations_take_the_value_type() {
        let mut b = Builder::new();
        let one = b.integer(1);
        let decl = b.var_decl("x", Some(one));
        let x = b.var("x");
        let xid = x.id;
        let last = b.expr_stmt(x);
        let p = b.program(vec![decl, last]);

        let (env, a) = analyze(&p);
        assert!(a.ok(), "unexpected errors: {:?}", a.errors);
        assert_eq!(a.main_node_type(xid), Some(env.integer));
    }

    #[test]
    fn branch_assignment_unions_at_the_merge() {
        let mut b = Builder::new();
        let one = b.integer(1);
        let decl = b.var_decl("x", Some(one));
        let x1 = b.var("x");
        let half = b.real(2.5);
        let assign = b.assign(x1, half);
        let assign = b.expr_stmt(assign);
        let then_block = b.block(vec![assign]);
        let cond = b.boolean(true);
        let branch = b.if_stmt(cond, then_block, None);
        let x2 = b.var("x");
        let xid = x2.id;
        let last = b.expr_stmt(x2);
        let p = b.program(vec![decl, branch, last]);

        let (mut env, a) = analyze(&p);
        assert!(a.ok(), "unexpected errors: {:?}", a.errors);
        let expected = env.union(env.integer, env.real);
        assert_eq!(a.main_node_type(xid), Some(expected));
    }

    #[test]
    fn stable_loop_variable_stays_integer() {
        let mut b = Builder::new();
        let zero = b.integer(0);
        let decl = b.var_decl("x", Some(zero));
        let x1 = b.var("x");
        let one = b.integer(1);
        let sum = b.binary(BinOp::Add, x1, one);
        let x2 = b.var("x");
        let assign = b.assign(x2, sum);
        let assign = b.expr_stmt(assign);
        let body = b.block(vec![assign]);
        let cond = b.boolean(true);
        let w = b.while_stmt(cond, body);
        let x3 = b.var("x");
        let xid = x3.id;
        let last = b.expr_stmt(x3);
        let p = b.program(vec![decl, w, last]);

        let (env, a) = analyze(&p);
        assert!(a.ok(), "unexpected errors: {:?}", a.errors);
        assert_eq!(a.main_node_type(xid), Some(env.integer));
    }

    #[test]
    fn undefined_variable_recovers_as_any() {
        let mut b = Builder::new();
        let y = b.var("y");
        let yid = y.id;
        let last = b.expr_stmt(y);
        let p = b.program(vec![last]);

        let (env, a) = analyze(&p);
        assert_eq!(a.errors.len(), 1);
        assert!(matches!(
            a.errors[0].kind,
            ErrorKind::UndefinedVariable { ref name } if name == "y"
        ));
        assert_eq!(a.main_node_type(yid), Some(env.any));
    }

    #[test]
    fn duplicate_declaration_in_one_block_errors() {
        let mut b = Builder::new();
        let one = b.integer(1);
        let d1 = b.var_decl("x", Some(one));
        let two = b.integer(2);
        let d2 = b.var_decl("x", Some(two));
        let p = b.program(vec![d1, d2]);

        let (_, a) = analyze(&p);
        assert!(a
            .errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::VariableAlreadyDefined { ref name } if name == "x")));
    }

    #[test]
    fn break_outside_a_loop_errors() {
        let mut b = Builder::new();
        let s = b.break_stmt();
        let p = b.program(vec![s]);
        let (_, a) = analyze(&p);
        assert!(a
            .errors
            .iter()
            .any(|e| matches!(e.kind, ErrorKind::BreakOutsideLoop)));
    }

    #[test]
    fn call_sites_specialize_and_cache_versions() {
        let mut b = Builder::new();
        let param = b.var("a");
        let ret = b.return_stmt(Some(param));
        let body = b.block(vec![ret]);
        let f = b.function(&["a"], body);
        let fnode = f.id;
        let decl = b.var_decl("f", Some(f));
        let callee = b.var("f");
        let one = b.integer(1);
        let c1 = b.call(callee, vec![one]);
        let c1id = c1.id;
        let c1 = b.expr_stmt(c1);
        let callee = b.var("f");
        let two = b.integer(2);
        let c2 = b.call(callee, vec![two]);
        let c2 = b.expr_stmt(c2);
        let p = b.program(vec![decl, c1, c2]);

        let (env, a) = analyze(&p);
        assert!(a.ok(), "unexpected errors: {:?}", a.errors);
        assert_eq!(a.main_node_type(c1id), Some(env.integer));
        let fid = a.functions.by_node[&fnode];
        assert_eq!(a.functions.fun(fid).versions.len(), 1);
    }
}

/// Mutation bookkeeping: roots in first-appearance order, the pre-loop
/// version per root, and the final mutation per root.
fn summarize_mutations(
    graph: &Graph,
    mutations: &[Mutation],
) -> (
    Vec<VarId>,
    HashMap<VarId, VarId>,
    HashMap<VarId, Mutation>,
) {
    let mut order: Vec<VarId> = Vec::new();
    let mut first_prev: HashMap<VarId, VarId> = HashMap::new();
    let mut last: HashMap<VarId, Mutation> = HashMap::new();
    for m in mutations {
        let root = graph.root_of(m.variable);
        if !last.contains_key(&root) {
            order.push(root);
            first_prev.insert(root, m.prev);
        }
        last.insert(root, *m);
    }
    (order, first_prev, last)
}
