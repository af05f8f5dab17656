#![forbid(unsafe_code)]

//! Semantic analysis for dynamically-typed programs: an interned type
//! lattice with a conversion-distance metric, overload resolution over
//! templated signatures, SSA-style control-flow sections, closure-capture
//! propagation and per-call-site function specialization.

mod capture;
mod control_flow;
mod environment;
mod error;
mod function;
mod overload;
mod sema;
mod stdlib;
mod types;

pub use control_flow::{
    Graph, Phi, PhiId, Section, SectionId, SectionState, VarId, VarScope, Variable,
};
pub use environment::{Class, Environment, TEMPLATE_SENTINEL};
pub use error::{AnalysisError, ErrorKind};
pub use function::{FunctionId, FunctionInfo, FunctionTable, FunctionVersion, VersionId};
pub use overload::{Callable, CallableVersion, CallableVersionTemplate, TypeMutator, VersionFlags};
pub use sema::{Analysis, Analyzer};
pub use types::{TypeData, TypeId, TypeKind};
