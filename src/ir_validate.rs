// SPDX-License-Identifier: Apache-2.0

//! Structural validation for parsed modules: symbol uniqueness, block
//! shape (non-empty, terminator last), label resolution, and operand name
//! resolution. Dominance is not checked; the pass only needs well-formed
//! graphs, not verified SSA.

use std::collections::HashSet;

use crate::ir::{Function, Module, Value};

#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    /// Two module-level symbols share a name.
    DuplicateSymbol(String),
    /// A basic block has no instructions.
    EmptyBlock { func: String, block: String },
    /// A basic block does not end in a terminator.
    MissingTerminator { func: String, block: String },
    /// A terminator appears before the end of its block.
    MisplacedTerminator { func: String, block: String },
    /// Two blocks in one function share a label.
    DuplicateBlockLabel { func: String, block: String },
    /// A branch names a label with no matching block.
    UnknownLabel { func: String, label: String },
    /// Two values in one function share a name.
    DuplicateValueName { func: String, name: String },
    /// An operand names a local value that is never defined.
    UndefinedLocal { func: String, name: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::DuplicateSymbol(name) => {
                write!(f, "duplicate module symbol '{}'", name)
            }
            ValidationError::EmptyBlock { func, block } => {
                write!(f, "function '{}' block '{}' is empty", func, block)
            }
            ValidationError::MissingTerminator { func, block } => {
                write!(
                    f,
                    "function '{}' block '{}' does not end in a terminator",
                    func, block
                )
            }
            ValidationError::MisplacedTerminator { func, block } => {
                write!(
                    f,
                    "function '{}' block '{}' has a terminator before its end",
                    func, block
                )
            }
            ValidationError::DuplicateBlockLabel { func, block } => {
                write!(f, "function '{}' repeats block label '{}'", func, block)
            }
            ValidationError::UnknownLabel { func, label } => {
                write!(f, "function '{}' branches to unknown label '{}'", func, label)
            }
            ValidationError::DuplicateValueName { func, name } => {
                write!(f, "function '{}' defines value '%{}' twice", func, name)
            }
            ValidationError::UndefinedLocal { func, name } => {
                write!(f, "function '{}' uses undefined value '%{}'", func, name)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

fn validate_function(func: &Function) -> Result<(), ValidationError> {
    let mut labels: HashSet<&str> = HashSet::new();
    for block in func.blocks.iter() {
        if !labels.insert(block.name.as_str()) {
            return Err(ValidationError::DuplicateBlockLabel {
                func: func.name.clone(),
                block: block.name.clone(),
            });
        }
    }

    let mut defined: HashSet<&str> = HashSet::new();
    for param in func.params.iter() {
        if !param.name.is_empty() && !defined.insert(param.name.as_str()) {
            return Err(ValidationError::DuplicateValueName {
                func: func.name.clone(),
                name: param.name.clone(),
            });
        }
    }
    for instr in func.instrs() {
        if let Some(name) = &instr.name {
            if !defined.insert(name.as_str()) {
                return Err(ValidationError::DuplicateValueName {
                    func: func.name.clone(),
                    name: name.clone(),
                });
            }
        }
    }

    for block in func.blocks.iter() {
        if block.instrs.is_empty() {
            return Err(ValidationError::EmptyBlock {
                func: func.name.clone(),
                block: block.name.clone(),
            });
        }
        let last = block.instrs.len() - 1;
        for (i, instr) in block.instrs.iter().enumerate() {
            let is_term = instr.payload.is_terminator();
            if i == last && !is_term {
                return Err(ValidationError::MissingTerminator {
                    func: func.name.clone(),
                    block: block.name.clone(),
                });
            }
            if i != last && is_term {
                return Err(ValidationError::MisplacedTerminator {
                    func: func.name.clone(),
                    block: block.name.clone(),
                });
            }
            for operand in instr.payload.operands() {
                match operand {
                    Value::Local { name, .. } | Value::Arg { name, .. } => {
                        if !defined.contains(name.as_str()) {
                            return Err(ValidationError::UndefinedLocal {
                                func: func.name.clone(),
                                name,
                            });
                        }
                    }
                    Value::Label { name } => {
                        if !labels.contains(name.as_str()) {
                            return Err(ValidationError::UnknownLabel {
                                func: func.name.clone(),
                                label: name,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

/// Validates every definition in the module; returns the first problem
/// found.
pub fn validate_module(module: &Module) -> Result<(), ValidationError> {
    let mut symbols: HashSet<&str> = HashSet::new();
    for func in module.functions.iter() {
        if !symbols.insert(func.name.as_str()) {
            return Err(ValidationError::DuplicateSymbol(func.name.clone()));
        }
    }
    for alias in module.aliases.iter() {
        if !symbols.insert(alias.name.as_str()) {
            return Err(ValidationError::DuplicateSymbol(alias.name.clone()));
        }
    }
    for func in module.functions.iter() {
        validate_function(func)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser::Parser;

    fn validate(text: &str) -> Result<(), ValidationError> {
        let module = Parser::new(text).parse_module().unwrap();
        validate_module(&module)
    }

    #[test]
    fn accepts_well_formed_module() {
        assert_eq!(
            validate(
                r#"module t

define i32 @f(i32 %x) {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}
"#,
            ),
            Ok(())
        );
    }

    #[test]
    fn rejects_unknown_branch_target() {
        let err = validate(
            r#"module t

define void @f() {
entry:
  br label %nowhere
}
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownLabel {
                func: "f".to_string(),
                label: "nowhere".to_string(),
            }
        );
    }

    #[test]
    fn rejects_missing_terminator() {
        let err = validate(
            r#"module t

define i32 @f(i32 %x) {
entry:
  %s = add i32 %x, 1
}
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingTerminator {
                func: "f".to_string(),
                block: "entry".to_string(),
            }
        );
    }

    #[test]
    fn rejects_undefined_operand() {
        let err = validate(
            r#"module t

define i32 @f(i32 %x) {
entry:
  %s = add i32 %x, %ghost
  ret i32 %s
}
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::UndefinedLocal {
                func: "f".to_string(),
                name: "ghost".to_string(),
            }
        );
    }

    #[test]
    fn rejects_duplicate_symbols_and_names() {
        let err = validate(
            r#"module t

define void @f() {
entry:
  ret void
}

define void @f() {
entry:
  ret void
}
"#,
        )
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateSymbol("f".to_string()));

        let err = validate(
            r#"module t

define i32 @g(i32 %x) {
entry:
  %x = add i32 %x, 1
  ret i32 %x
}
"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ValidationError::DuplicateValueName {
                func: "g".to_string(),
                name: "x".to_string(),
            }
        );
    }
}
