use miette::Diagnostic;
use sable_ast::Span;
use thiserror::Error;

/// What went wrong, with enough structure for tooling to act on it.
#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    UndefinedVariable {
        name: String,
    },
    VariableAlreadyDefined {
        name: String,
    },
    NoMatchingOverload {
        name: String,
        args: Vec<String>,
        candidates: Vec<String>,
    },
    NoSuchAttribute {
        class: String,
        attribute: String,
    },
    ValueNotIterable {
        ty: String,
    },
    ValueNotCallable {
        ty: String,
    },
    CantAssignVoid {
        name: String,
    },
    WrongArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },
    BreakOutsideLoop,
    ContinueOutsideLoop,
}

impl ErrorKind {
    fn message(&self) -> String {
        match self {
            ErrorKind::UndefinedVariable { name } => {
                format!("undefined variable `{name}`")
            }
            ErrorKind::VariableAlreadyDefined { name } => {
                format!("variable `{name}` is already defined")
            }
            ErrorKind::NoMatchingOverload { name, args, candidates } => {
                let mut msg = format!("no version of `{name}` accepts ({})", args.join(", "));
                if !candidates.is_empty() {
                    msg.push_str("; candidates: ");
                    msg.push_str(&candidates.join(", "));
                }
                msg
            }
            ErrorKind::NoSuchAttribute { class, attribute } => {
                format!("`{class}` has no attribute `{attribute}`")
            }
            ErrorKind::ValueNotIterable { ty } => {
                format!("value of type `{ty}` is not iterable")
            }
            ErrorKind::ValueNotCallable { ty } => {
                format!("value of type `{ty}` is not callable")
            }
            ErrorKind::CantAssignVoid { name } => {
                format!("cannot assign a void expression to `{name}`")
            }
            ErrorKind::WrongArgumentCount { name, expected, got } => {
                format!("`{name}` takes {expected} argument(s), {got} given")
            }
            ErrorKind::BreakOutsideLoop => "break outside of a loop".to_string(),
            ErrorKind::ContinueOutsideLoop => "continue outside of a loop".to_string(),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(sable::sema))]
pub struct AnalysisError {
    pub kind: ErrorKind,
    pub message: String,
    #[label]
    pub span: Span,
}

impl AnalysisError {
    pub fn new(kind: ErrorKind, span: Span) -> Self {
        let message = kind.message();
        Self {
            kind,
            message,
            span,
        }
    }
}
