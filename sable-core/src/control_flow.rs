//! Control-flow sections and versioned variables.
//!
//! A function body is a graph of sections (straight-line regions). Every
//! assignment mints a new version of the variable; merge points carry phi
//! nodes whose type is the union of the incoming versions. Sections,
//! variables and phis live in one arena and reference each other by id, so
//! the graph can be cyclic without ownership cycles.

use std::collections::{HashMap, HashSet};

use sable_ast::{Span, span};

use crate::environment::Environment;
use crate::function::{FunctionId, VersionId};
use crate::types::TypeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PhiId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarScope {
    /// Compiler-introduced binding (built-in classes, operator values).
    Internal,
    Local,
    Parameter,
    /// Alias of a variable captured from an enclosing function.
    Capture,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SectionState {
    Created,
    PreAnalyzed,
    Analyzed,
}

#[derive(Clone, Debug)]
pub struct Section {
    pub id: SectionId,
    pub name: &'static str,
    pub predecessors: Vec<SectionId>,
    pub successors: Vec<SectionId>,
    /// Latest version of each name bound in this section.
    pub variables: HashMap<String, VarId>,
    pub phis: Vec<PhiId>,
    pub state: SectionState,
}

#[derive(Clone, Debug)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub scope: VarScope,
    pub ty: TypeId,
    pub span: Span,
    /// Owning function version.
    pub function: VersionId,
    pub section: SectionId,
    /// First version of this name; `None` on the root itself.
    pub root: Option<VarId>,
    /// Version this one was minted from.
    pub parent: Option<VarId>,
    pub version: u32,
    /// On roots only: last version number handed out.
    pub generator: u32,
    /// Bound by the analyzer rather than by a statement; survives the
    /// re-entrant reset of section bindings.
    pub injected: bool,
    /// Loop binder (foreach key/value); mutations of it are not propagated
    /// out of the loop.
    pub loop_variable: bool,
    pub global: bool,
    /// Captured primitive promoted to a boxed representation.
    pub boxed: bool,
    /// Slot in the owning closure's capture list.
    pub capture_index: Option<usize>,
    /// Slot in the parent closure's capture list, for chained captures.
    pub parent_index: Option<usize>,
    /// Function value bound to this variable, when statically known.
    pub fun: Option<FunctionId>,
    /// Phis this version feeds.
    pub phis: Vec<PhiId>,
}

/// Merge of two versions of one variable at a section with two
/// predecessors.
#[derive(Clone, Debug)]
pub struct Phi {
    pub id: PhiId,
    /// The merged version visible after the section entry.
    pub variable: VarId,
    pub section1: SectionId,
    pub variable1: VarId,
    pub section2: SectionId,
    pub variable2: VarId,
}

#[derive(Debug, Default)]
pub struct Graph {
    pub sections: Vec<Section>,
    pub variables: Vec<Variable>,
    pub phis: Vec<Phi>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_section(&mut self, name: &'static str) -> SectionId {
        let id = SectionId(self.sections.len() as u32);
        self.sections.push(Section {
            id,
            name,
            predecessors: Vec::new(),
            successors: Vec::new(),
            variables: HashMap::new(),
            phis: Vec::new(),
            state: SectionState::Created,
        });
        id
    }

    pub fn section(&self, id: SectionId) -> &Section {
        &self.sections[id.0 as usize]
    }

    pub fn section_mut(&mut self, id: SectionId) -> &mut Section {
        &mut self.sections[id.0 as usize]
    }

    pub fn var(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id.0 as usize]
    }

    pub fn phi(&self, id: PhiId) -> &Phi {
        &self.phis[id.0 as usize]
    }

    pub fn phi_mut(&mut self, id: PhiId) -> &mut Phi {
        &mut self.phis[id.0 as usize]
    }

    /// Adds a control-flow edge; duplicate edges collapse, which keeps
    /// re-entrant walks from inflating predecessor lists.
    pub fn add_edge(&mut self, from: SectionId, to: SectionId) {
        if !self.section(from).successors.contains(&to) {
            self.section_mut(from).successors.push(to);
        }
        if !self.section(to).predecessors.contains(&from) {
            self.section_mut(to).predecessors.push(from);
        }
    }

    pub fn new_variable(
        &mut self,
        name: &str,
        scope: VarScope,
        ty: TypeId,
        function: VersionId,
        section: SectionId,
    ) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables.push(Variable {
            id,
            name: name.to_string(),
            scope,
            ty,
            span: span(0, 0),
            function,
            section,
            root: None,
            parent: None,
            version: 0,
            generator: 0,
            injected: false,
            loop_variable: false,
            global: false,
            boxed: false,
            capture_index: None,
            parent_index: None,
            fun: None,
            phis: Vec::new(),
        });
        id
    }

    pub fn new_phi(
        &mut self,
        variable: VarId,
        section1: SectionId,
        variable1: VarId,
        section2: SectionId,
        variable2: VarId,
    ) -> PhiId {
        let id = PhiId(self.phis.len() as u32);
        self.phis.push(Phi {
            id,
            variable,
            section1,
            variable1,
            section2,
            variable2,
        });
        self.var_mut(variable1).phis.push(id);
        self.var_mut(variable2).phis.push(id);
        id
    }

    pub fn root_of(&self, v: VarId) -> VarId {
        self.var(v).root.unwrap_or(v)
    }

    /// Next version number for the variable family rooted at `v`.
    pub fn next_version(&mut self, v: VarId) -> u32 {
        let root = self.root_of(v);
        let r = self.var_mut(root);
        r.generator += 1;
        r.generator
    }

    /// Looks `name` up in `start` and then along the first-predecessor
    /// chain, which is always the forward (pre-loop) path.
    pub fn find_in_chain(&self, start: SectionId, name: &str) -> Option<VarId> {
        let mut current = Some(start);
        let mut seen = HashSet::new();
        while let Some(id) = current {
            if !seen.insert(id) {
                return None;
            }
            if let Some(v) = self.section(id).variables.get(name) {
                return Some(*v);
            }
            current = self.section(id).predecessors.first().copied();
        }
        None
    }

    /// Chain lookup that stops when it reaches `stop`: a hit there means
    /// both branches see the same binding and no phi is needed.
    pub fn find_in_chain_until(
        &self,
        start: SectionId,
        name: &str,
        stop: SectionId,
    ) -> Option<VarId> {
        let mut current = Some(start);
        let mut seen = HashSet::new();
        while let Some(id) = current {
            if id == stop || !seen.insert(id) {
                return None;
            }
            if let Some(v) = self.section(id).variables.get(name) {
                return Some(*v);
            }
            current = self.section(id).predecessors.first().copied();
        }
        None
    }

    /// Types the phis of a section once both incoming versions are known:
    /// the merged version becomes the union of its sources.
    pub fn analyze_section(&mut self, env: &mut Environment, id: SectionId) {
        let phis = self.section(id).phis.clone();
        for pid in phis {
            let (target, v1, v2) = {
                let p = self.phi(pid);
                (p.variable, p.variable1, p.variable2)
            };
            let ty = env.union(self.var(v1).ty, self.var(v2).ty);
            self.var_mut(target).ty = ty;
        }
        self.section_mut(id).state = SectionState::Analyzed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_deduplicate() {
        let mut g = Graph::new();
        let a = g.new_section("a");
        let b = g.new_section("b");
        g.add_edge(a, b);
        g.add_edge(a, b);
        assert_eq!(g.section(b).predecessors, vec![a]);
        assert_eq!(g.section(a).successors, vec![b]);
    }

    #[test]
    fn chain_lookup_walks_first_predecessors() {
        let mut env = Environment::new();
        let mut g = Graph::new();
        let outer = g.new_section("outer");
        let inner = g.new_section("inner");
        g.add_edge(outer, inner);
        let v = g.new_variable("x", VarScope::Local, env.integer, VersionId(0), outer);
        g.section_mut(outer).variables.insert("x".to_string(), v);

        assert_eq!(g.find_in_chain(inner, "x"), Some(v));
        assert_eq!(g.find_in_chain(inner, "y"), None);
        // Shadowing in the inner section wins.
        let v2 = g.new_variable("x", VarScope::Local, env.real, VersionId(0), inner);
        g.section_mut(inner).variables.insert("x".to_string(), v2);
        assert_eq!(g.find_in_chain(inner, "x"), Some(v2));
        let _ = &mut env;
    }

    #[test]
    fn chain_lookup_survives_back_edges() {
        let env = Environment::new();
        let mut g = Graph::new();
        let cond = g.new_section("cond");
        let body = g.new_section("body");
        g.add_edge(cond, body);
        g.add_edge(body, cond); // loop back-edge
        assert_eq!(g.find_in_chain(body, "missing"), None);
        let _ = env;
    }

    #[test]
    fn phi_typing_unions_sources() {
        let mut env = Environment::new();
        let mut g = Graph::new();
        let s1 = g.new_section("then");
        let s2 = g.new_section("else");
        let end = g.new_section("end");
        g.add_edge(s1, end);
        g.add_edge(s2, end);
        let a = g.new_variable("x", VarScope::Local, env.integer, VersionId(0), s1);
        let b = g.new_variable("x", VarScope::Local, env.real, VersionId(0), s2);
        let merged = g.new_variable("x", VarScope::Local, env.any, VersionId(0), end);
        let phi = g.new_phi(merged, s1, a, s2, b);
        g.section_mut(end).phis.push(phi);
        g.analyze_section(&mut env, end);
        let expected = env.union(env.integer, env.real);
        assert_eq!(g.var(merged).ty, expected);
        assert!(g.var(a).phis.contains(&phi));
        assert!(g.var(b).phis.contains(&phi));
    }
}
