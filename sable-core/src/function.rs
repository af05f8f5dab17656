//! User functions and their specialized versions.
//!
//! A function expression yields one [`FunctionInfo`] plus a default
//! [`FunctionVersion`] analyzed with `any` parameters. Each distinct
//! argument tuple seen at a call site creates (and caches) another version;
//! versions own their control-flow sections, parameter variables and
//! per-node analysis results, so the same body can be analyzed repeatedly
//! without interference.

use std::collections::HashMap;

use sable_ast::NodeId;

use crate::control_flow::{SectionId, VarId};
use crate::types::TypeId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VersionId(pub(crate) u32);

#[derive(Debug)]
pub struct FunctionInfo {
    pub id: FunctionId,
    /// The function expression node, key for re-walking the body.
    pub node: NodeId,
    /// Variable name the function value was first bound to, for
    /// diagnostics.
    pub name: Option<String>,
    pub params: Vec<String>,
    /// Node of each parameter's default value expression.
    pub default_nodes: Vec<Option<NodeId>>,
    /// Type of each default value, filled during pre-analysis.
    pub default_types: Vec<Option<TypeId>>,
    /// Lexically enclosing function.
    pub parent: Option<FunctionId>,
    pub default_version: VersionId,
    /// Specializations keyed by exact argument tuple.
    pub versions: HashMap<Vec<TypeId>, VersionId>,
    /// Captured variables, in the enclosing function's numbering. The slot
    /// of a name never changes once assigned.
    pub captures: Vec<VarId>,
    pub capture_slots: HashMap<String, usize>,
    pub recursive: bool,
    pub is_main: bool,
    /// The function value escapes to dynamically-typed code, so a version
    /// callable with any arguments must exist.
    pub generate_default_version: bool,
}

#[derive(Debug)]
pub struct FunctionVersion {
    pub id: VersionId,
    pub function: FunctionId,
    /// Parameter types of this specialization.
    pub args: Vec<TypeId>,
    /// The signature type; set at the end of analysis.
    pub ty: TypeId,
    pub return_type: TypeId,
    /// Provisional return type handed to recursive call sites before the
    /// body is fully analyzed.
    pub placeholder_return: Option<TypeId>,
    /// Current version of each parameter; rebound by assignments, unlike
    /// section-scoped locals.
    pub params: HashMap<String, VarId>,
    pub initial_params: Vec<VarId>,
    /// Aliases of captured variables as seen inside this version.
    pub captures_inside: HashMap<String, VarId>,
    pub entry_section: Option<SectionId>,
    /// Resolved variable per identifier node.
    pub node_vars: HashMap<NodeId, VarId>,
    /// Freshly minted version per assignment / declaration node.
    pub assign_vars: HashMap<NodeId, VarId>,
    /// Variables per declaration statement, indexed by declarator position
    /// (a `var a = 1, b = 2` declares two).
    pub decl_vars: HashMap<(NodeId, u32), VarId>,
    /// Inferred type per expression node.
    pub node_types: HashMap<NodeId, TypeId>,
    /// Sections allocated for a control-flow node, reused on re-walks.
    pub node_sections: HashMap<NodeId, Vec<SectionId>>,
    pub throws: bool,
    pub pre_analyzed: bool,
    pub analyzed: bool,
}

impl FunctionVersion {
    fn new(id: VersionId, function: FunctionId, args: Vec<TypeId>, initial: TypeId) -> Self {
        Self {
            id,
            function,
            args,
            ty: initial,
            return_type: initial,
            placeholder_return: None,
            params: HashMap::new(),
            initial_params: Vec::new(),
            captures_inside: HashMap::new(),
            entry_section: None,
            node_vars: HashMap::new(),
            assign_vars: HashMap::new(),
            decl_vars: HashMap::new(),
            node_types: HashMap::new(),
            node_sections: HashMap::new(),
            throws: false,
            pre_analyzed: false,
            analyzed: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct FunctionTable {
    pub functions: Vec<FunctionInfo>,
    pub versions: Vec<FunctionVersion>,
    pub by_node: HashMap<NodeId, FunctionId>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function expression and its default version. Parameter
    /// types of the default version are all `any_ty`.
    pub fn add_function(
        &mut self,
        node: NodeId,
        params: Vec<String>,
        default_nodes: Vec<Option<NodeId>>,
        parent: Option<FunctionId>,
        any_ty: TypeId,
        void_ty: TypeId,
    ) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        let default_args = vec![any_ty; params.len()];
        let version = self.add_version(id, default_args, void_ty);
        let n = params.len();
        self.functions.push(FunctionInfo {
            id,
            node,
            name: None,
            params,
            default_nodes,
            default_types: vec![None; n],
            parent,
            default_version: version,
            versions: HashMap::new(),
            captures: Vec::new(),
            capture_slots: HashMap::new(),
            recursive: false,
            is_main: false,
            generate_default_version: false,
        });
        self.by_node.insert(node, id);
        id
    }

    pub fn add_version(
        &mut self,
        function: FunctionId,
        args: Vec<TypeId>,
        void_ty: TypeId,
    ) -> VersionId {
        let id = VersionId(self.versions.len() as u32);
        self.versions
            .push(FunctionVersion::new(id, function, args, void_ty));
        id
    }

    pub fn fun(&self, id: FunctionId) -> &FunctionInfo {
        &self.functions[id.0 as usize]
    }

    pub fn fun_mut(&mut self, id: FunctionId) -> &mut FunctionInfo {
        &mut self.functions[id.0 as usize]
    }

    pub fn version(&self, id: VersionId) -> &FunctionVersion {
        &self.versions[id.0 as usize]
    }

    pub fn version_mut(&mut self, id: VersionId) -> &mut FunctionVersion {
        &mut self.versions[id.0 as usize]
    }

    /// Records a capture slot for `name`, keeping the first slot assigned.
    pub fn capture_slot(&mut self, function: FunctionId, name: &str, source: VarId) -> usize {
        if let Some(slot) = self.fun(function).capture_slots.get(name) {
            return *slot;
        }
        let info = self.fun_mut(function);
        let slot = info.captures.len();
        info.captures.push(source);
        info.capture_slots.insert(name.to_string(), slot);
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use sable_ast::NodeId;

    #[test]
    fn default_version_has_any_parameters() {
        let env = Environment::new();
        let mut table = FunctionTable::new();
        let f = table.add_function(
            NodeId(0),
            vec!["a".into(), "b".into()],
            vec![None, None],
            None,
            env.any,
            env.void,
        );
        let v = table.fun(f).default_version;
        assert_eq!(table.version(v).args, vec![env.any, env.any]);
        assert_eq!(table.by_node.get(&NodeId(0)), Some(&f));
    }

    #[test]
    fn capture_slots_are_stable_per_name() {
        let env = Environment::new();
        let mut table = FunctionTable::new();
        let f = table.add_function(NodeId(0), vec![], vec![], None, env.any, env.void);
        let mut g = crate::control_flow::Graph::new();
        let s = g.new_section("entry");
        let a = g.new_variable("a", crate::control_flow::VarScope::Local, env.integer, VersionId(0), s);
        let b = g.new_variable("b", crate::control_flow::VarScope::Local, env.integer, VersionId(0), s);
        assert_eq!(table.capture_slot(f, "a", a), 0);
        assert_eq!(table.capture_slot(f, "b", b), 1);
        assert_eq!(table.capture_slot(f, "a", a), 0);
        assert_eq!(table.fun(f).captures.len(), 2);
    }
}
