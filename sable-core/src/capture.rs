//! Closure-capture propagation.
//!
//! When a name resolves in an enclosing function, an alias variable is
//! created in every function between the definition and the use, each one
//! pointing at its parent's capture slot. Capturing the same name twice
//! reuses the first alias and slot.

use crate::control_flow::{VarId, VarScope};
use crate::sema::Analyzer;

impl<'e, 'p> Analyzer<'e, 'p> {
    /// Makes `source` (a variable of the frame below `frame_index`)
    /// available inside the function of `frames[frame_index]` and returns
    /// the alias to use there.
    pub(crate) fn capture_var(&mut self, frame_index: usize, source: VarId) -> VarId {
        let version = self.frames[frame_index].version;
        let function = self.frames[frame_index].function;
        let name = self.graph.var(source).name.clone();
        if let Some(alias) = self.table.version(version).captures_inside.get(&name) {
            return *alias;
        }

        // A captured primitive must live past its frame, so the source is
        // promoted to a boxed `any` and the alias observes that.
        let src_ty = self.graph.var(source).ty;
        let boxed = self.env.is_primitive(src_ty);
        if boxed {
            let any = self.env.any;
            self.graph.var_mut(source).boxed = true;
            self.graph.var_mut(source).ty = any;
        }
        let alias_ty = self.graph.var(source).ty;

        let slot = self.table.capture_slot(function, &name, source);
        let parent_index = self.graph.var(source).capture_index;
        let src_fun = self.graph.var(source).fun;
        let section = self
            .table
            .version(version)
            .entry_section
            .unwrap_or(self.frames[frame_index].current_section);
        let alias = self
            .graph
            .new_variable(&name, VarScope::Capture, alias_ty, version, section);
        {
            let v = self.graph.var_mut(alias);
            v.injected = true;
            v.boxed = boxed;
            v.capture_index = Some(slot);
            v.parent_index = parent_index;
            v.fun = src_fun;
        }
        self.graph
            .section_mut(section)
            .variables
            .insert(name.clone(), alias);
        self.table
            .version_mut(version)
            .captures_inside
            .insert(name, alias);
        alias
    }

    /// Re-checks capture sources at analysis time: pre-analysis captured
    /// them before their types were inferred, so boxing decided then may be
    /// stale.
    pub(crate) fn refresh_captures(&mut self, version: crate::function::VersionId) {
        let function = self.table.version(version).function;
        let captures = self.table.fun(function).captures.clone();
        let aliases: Vec<(String, VarId)> = {
            let mut v: Vec<_> = self
                .table
                .version(version)
                .captures_inside
                .iter()
                .map(|(k, a)| (k.clone(), *a))
                .collect();
            v.sort_by_key(|(_, a)| *a);
            v
        };
        for (name, alias) in aliases {
            let Some(slot) = self.graph.var(alias).capture_index else {
                continue;
            };
            let Some(source) = captures.get(slot).copied() else {
                continue;
            };
            debug_assert_eq!(self.graph.var(source).name, name);
            let src_fun = self.graph.var(source).fun;
            self.graph.var_mut(alias).fun = src_fun;
            let src_ty = self.graph.var(source).ty;
            if self.env.is_primitive(src_ty) {
                let any = self.env.any;
                self.graph.var_mut(source).boxed = true;
                self.graph.var_mut(source).ty = any;
                self.graph.var_mut(alias).boxed = true;
                self.graph.var_mut(alias).ty = any;
            } else {
                self.graph.var_mut(alias).ty = src_ty;
            }
        }
    }
}
