// SPDX-License-Identifier: Apache-2.0

//! Parser for the textual module format.
//!
//! The grammar is assembly-flavored:
//!
//! ```text
//! module m
//! pointersize 64
//! pointersize addrspace(1) 32
//!
//! define internal fastcc i32 @f(i32 %x, i8* %p) nounwind unnamed_addr align 8 {
//! entry:
//!   %s = add nsw i32 %x, 1
//!   br i1 true, label %then, label %done
//!
//! then:
//!   store i32 %s, i32* null, align 4
//!   br label %done
//!
//! done:
//!   ret i32 %s
//! }
//!
//! declare i32 @ext(i32)
//!
//! @g = weak alias i32 (i32)* @f
//! ```
//!
//! `;` starts a line comment. The `pointersize` directives install the layout
//! oracle; omitting them leaves the module without one. Operand types are
//! written at each use, so values do not need their definitions in scope
//! while parsing. A direct callee's pointer type is reconstructed from the
//! callsite's return and argument types.

use std::collections::HashSet;

use crate::ir::{
    aggregate_field_type, gep_result_type, keyword_to_call_conv,
    keyword_to_float_predicate, keyword_to_int_predicate, keyword_to_linkage,
    keyword_to_ordering, keyword_to_rmw_op, keyword_to_visibility, operator_to_binop,
    operator_to_cast, AtomicOrdering, AttrSet, Block, CallConv, Constant, FloatKind, FnTypeData,
    FuncId, Function, GlobalAlias, Instr, InstrPayload, Linkage, Module, Param, PoisonFlags,
    SyncScope, Type, Value, Visibility,
};
use crate::ir_validate::{self, ValidationError};
use crate::layout::DataLayout;

pub fn parse_path_to_module(path: &std::path::Path) -> Result<Module, ParseError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| ParseError::new(format!("failed to read file: {}", e)))?;
    Parser::new(&text).parse_module()
}

/// Parses a module from `text` and validates the resulting IR.
pub fn parse_and_validate_module(text: &str) -> Result<Module, ParseOrValidateError> {
    let module = Parser::new(text).parse_module()?;
    ir_validate::validate_module(&module)?;
    Ok(module)
}

#[derive(Debug)]
pub struct ParseError {
    msg: String,
}

impl ParseError {
    fn new(msg: String) -> Self {
        Self { msg }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseError: {}", self.msg)
    }
}

impl std::error::Error for ParseError {}

/// Unified error for parse-and-validate helpers.
#[derive(Debug)]
pub enum ParseOrValidateError {
    Parse(ParseError),
    Validate(ValidationError),
}

impl std::fmt::Display for ParseOrValidateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseOrValidateError::Parse(e) => write!(f, "{}", e),
            ParseOrValidateError::Validate(e) => write!(f, "ValidationError: {}", e),
        }
    }
}

impl std::error::Error for ParseOrValidateError {}

impl From<ParseError> for ParseOrValidateError {
    fn from(e: ParseError) -> Self {
        ParseOrValidateError::Parse(e)
    }
}

impl From<ValidationError> for ParseOrValidateError {
    fn from(e: ValidationError) -> Self {
        ParseOrValidateError::Validate(e)
    }
}

/// Names in scope while parsing one function body; decides whether `%x` is a
/// formal parameter or an instruction result.
struct FnCtx {
    param_names: HashSet<String>,
}

pub struct Parser {
    chars: Vec<char>,
    offset: usize,
}

impl Parser {
    pub fn new(input: &str) -> Self {
        Self {
            chars: input.chars().collect(),
            offset: 0,
        }
    }

    fn rest_of_line(&self) -> String {
        let rest: String = self.chars[self.offset..].iter().collect();
        match rest.find('\n') {
            Some(pos) => rest[..pos].to_string(),
            None => rest,
        }
    }

    fn at_eof(&mut self) -> bool {
        self.drop_whitespace_and_comments();
        self.offset >= self.chars.len()
    }

    fn peekc(&self) -> Option<char> {
        self.chars.get(self.offset).copied()
    }

    fn popc(&mut self) -> Option<char> {
        let c = self.peekc();
        self.offset += 1;
        c
    }

    fn save(&self) -> usize {
        self.offset
    }

    fn restore(&mut self, offset: usize) {
        self.offset = offset;
    }

    fn drop_comment(&mut self) -> bool {
        if self.peekc() == Some(';') {
            while let Some(c) = self.popc() {
                if c == '\n' {
                    break;
                }
            }
            true
        } else {
            false
        }
    }

    fn drop_whitespace(&mut self) {
        while let Some(c) = self.peekc() {
            if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
                self.offset += 1;
            } else {
                break;
            }
        }
    }

    /// Skips only intra-line whitespace; used where the grammar is
    /// line-sensitive (trailing attribute lists).
    fn drop_inline_whitespace(&mut self) {
        while let Some(c) = self.peekc() {
            if c == ' ' || c == '\t' {
                self.offset += 1;
            } else {
                break;
            }
        }
    }

    fn drop_whitespace_and_comments(&mut self) {
        loop {
            self.drop_whitespace();
            if !self.drop_comment() {
                break;
            }
        }
    }

    fn peek_is(&mut self, s: &str) -> bool {
        self.drop_whitespace_and_comments();
        let end = self.offset + s.chars().count();
        if end > self.chars.len() {
            return false;
        }
        self.chars[self.offset..end].iter().collect::<String>() == s
    }

    fn drop_or_error(&mut self, s: &str) -> Result<(), ParseError> {
        if self.peek_is(s) {
            self.offset += s.chars().count();
            Ok(())
        } else {
            Err(ParseError::new(format!(
                "expected {:?}; rest_of_line: {:?}",
                s,
                self.rest_of_line()
            )))
        }
    }

    fn try_drop(&mut self, s: &str) -> bool {
        if self.peek_is(s) {
            self.offset += s.chars().count();
            true
        } else {
            false
        }
    }

    fn is_ident_start(c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_'
    }

    fn is_ident_rest(c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || c == '.'
    }

    fn pop_identifier_or_error(&mut self, ctx: &str) -> Result<String, ParseError> {
        self.drop_whitespace_and_comments();
        let mut identifier = String::new();
        while let Some(c) = self.peekc() {
            if identifier.is_empty() {
                if !Self::is_ident_start(c) {
                    return Err(ParseError::new(format!(
                        "in {} expected identifier, got {:?}; rest_of_line: {:?}",
                        ctx,
                        c,
                        self.rest_of_line()
                    )));
                }
                self.offset += 1;
                identifier.push(c);
            } else {
                if !Self::is_ident_rest(c) {
                    return Ok(identifier);
                }
                self.offset += 1;
                identifier.push(c);
            }
        }
        if identifier.is_empty() {
            return Err(ParseError::new(format!(
                "in {} expected identifier, got EOF",
                ctx
            )));
        }
        Ok(identifier)
    }

    /// Pops the identifier at the cursor if it equals `word`.
    fn try_pop_word(&mut self, word: &str) -> bool {
        let saved = self.save();
        match self.pop_identifier_or_error("word") {
            Ok(ident) if ident == word => true,
            _ => {
                self.restore(saved);
                false
            }
        }
    }

    /// Peeks the next identifier without consuming it.
    fn peek_word(&mut self) -> Option<String> {
        let saved = self.save();
        let result = self.pop_identifier_or_error("peek").ok();
        self.restore(saved);
        result
    }

    fn pop_string_or_error(&mut self) -> Result<String, ParseError> {
        self.drop_whitespace_and_comments();
        self.drop_or_error("\"")?;
        let mut string = String::new();
        while let Some(c) = self.popc() {
            if c == '"' {
                return Ok(string);
            }
            string.push(c);
        }
        Err(ParseError::new("unterminated string literal".to_string()))
    }

    fn pop_integer_or_error(&mut self, ctx: &str) -> Result<i64, ParseError> {
        self.drop_whitespace_and_comments();
        let mut text = String::new();
        if self.peekc() == Some('-') {
            text.push('-');
            self.offset += 1;
        }
        while let Some(c) = self.peekc() {
            if c.is_ascii_digit() {
                text.push(c);
                self.offset += 1;
            } else {
                break;
            }
        }
        text.parse::<i64>().map_err(|e| {
            ParseError::new(format!(
                "in {} expected integer: {}; rest_of_line: {:?}",
                ctx,
                e,
                self.rest_of_line()
            ))
        })
    }

    fn pop_usize_or_error(&mut self, ctx: &str) -> Result<usize, ParseError> {
        let value = self.pop_integer_or_error(ctx)?;
        usize::try_from(value)
            .map_err(|_| ParseError::new(format!("in {} expected non-negative integer", ctx)))
    }

    // -- Types

    pub fn parse_type(&mut self) -> Result<Type, ParseError> {
        self.drop_whitespace_and_comments();
        let base = if self.try_drop("[") {
            let len = self.pop_usize_or_error("array length")? as u64;
            self.drop_or_error("x")?;
            let elem = self.parse_type()?;
            self.drop_or_error("]")?;
            Type::Array {
                elem: Box::new(elem),
                len,
            }
        } else if self.peek_is("<{") {
            self.drop_or_error("<{")?;
            let fields = self.parse_struct_fields()?;
            self.drop_or_error("}>")?;
            Type::Struct {
                packed: true,
                fields,
            }
        } else if self.try_drop("<") {
            let len = self.pop_usize_or_error("vector length")? as u64;
            self.drop_or_error("x")?;
            let elem = self.parse_type()?;
            self.drop_or_error(">")?;
            Type::Vector {
                elem: Box::new(elem),
                len,
            }
        } else if self.try_drop("{") {
            let fields = self.parse_struct_fields()?;
            self.drop_or_error("}")?;
            Type::Struct {
                packed: false,
                fields,
            }
        } else {
            let word = self.pop_identifier_or_error("type")?;
            match word.as_str() {
                "void" => Type::Void,
                "label" => Type::Label,
                "metadata" => Type::Metadata,
                "float" => Type::Float(FloatKind::Single),
                "double" => Type::Float(FloatKind::Double),
                "x86_fp80" => Type::Float(FloatKind::X86Fp80),
                "fp128" => Type::Float(FloatKind::Fp128),
                "ppc_fp128" => Type::Float(FloatKind::PpcFp128),
                _ => {
                    let width = word
                        .strip_prefix('i')
                        .and_then(|digits| digits.parse::<u32>().ok());
                    match width {
                        Some(w) => Type::Int(w),
                        None => {
                            return Err(ParseError::new(format!(
                                "unknown type {:?}; rest_of_line: {:?}",
                                word,
                                self.rest_of_line()
                            )))
                        }
                    }
                }
            }
        };
        self.parse_type_suffixes(base)
    }

    fn parse_struct_fields(&mut self) -> Result<Vec<Type>, ParseError> {
        let mut fields = Vec::new();
        self.drop_whitespace_and_comments();
        if self.peek_is("}") || self.peek_is("}>") {
            return Ok(fields);
        }
        loop {
            fields.push(self.parse_type()?);
            if !self.try_drop(",") {
                return Ok(fields);
            }
        }
    }

    /// Consumes pointer and function-type suffixes: `*`,
    /// `addrspace(N)*`, and `(params...)`.
    fn parse_type_suffixes(&mut self, base: Type) -> Result<Type, ParseError> {
        let mut ty = base;
        loop {
            self.drop_whitespace_and_comments();
            if self.peek_is("addrspace") {
                self.drop_or_error("addrspace")?;
                self.drop_or_error("(")?;
                let space = self.pop_usize_or_error("address space")? as u32;
                self.drop_or_error(")")?;
                self.drop_or_error("*")?;
                ty = ty.ptr_to(space);
            } else if self.peekc() == Some('*') {
                self.offset += 1;
                ty = ty.ptr_to(0);
            } else if self.peekc() == Some('(') {
                self.offset += 1;
                let mut params = Vec::new();
                let mut varargs = false;
                self.drop_whitespace_and_comments();
                if !self.try_drop(")") {
                    loop {
                        if self.try_drop("...") {
                            varargs = true;
                            break;
                        }
                        params.push(self.parse_type()?);
                        if !self.try_drop(",") {
                            break;
                        }
                    }
                    self.drop_or_error(")")?;
                }
                ty = Type::Fn(FnTypeData {
                    ret: Box::new(ty),
                    params,
                    varargs,
                });
            } else {
                return Ok(ty);
            }
        }
    }

    // -- Values

    fn pop_float_literal(&mut self, ctx: &str) -> Result<f64, ParseError> {
        self.drop_whitespace_and_comments();
        let mut text = String::new();
        while let Some(c) = self.peekc() {
            if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' || c == 'e' || c == 'E' {
                text.push(c);
                self.offset += 1;
            } else {
                break;
            }
        }
        text.parse::<f64>().map_err(|e| {
            ParseError::new(format!(
                "in {} expected float literal: {}; rest_of_line: {:?}",
                ctx,
                e,
                self.rest_of_line()
            ))
        })
    }

    fn parse_value(&mut self, expected: &Type, ctx: &FnCtx) -> Result<Value, ParseError> {
        self.drop_whitespace_and_comments();
        match self.peekc() {
            Some('%') => {
                self.offset += 1;
                let name = self.pop_identifier_or_error("value name")?;
                if ctx.param_names.contains(&name) {
                    Ok(Value::Arg {
                        name,
                        ty: expected.clone(),
                    })
                } else {
                    Ok(Value::Local {
                        name,
                        ty: expected.clone(),
                    })
                }
            }
            Some('@') => {
                self.offset += 1;
                let name = self.pop_identifier_or_error("symbol name")?;
                Ok(Value::Const(Constant::Global {
                    name,
                    ty: expected.clone(),
                }))
            }
            _ => self.parse_constant(expected).map(Value::Const),
        }
    }

    fn parse_constant(&mut self, expected: &Type) -> Result<Constant, ParseError> {
        self.drop_whitespace_and_comments();
        if self.peekc() == Some('@') {
            self.offset += 1;
            let name = self.pop_identifier_or_error("symbol name")?;
            return Ok(Constant::Global {
                name,
                ty: expected.clone(),
            });
        }
        if self.try_pop_word("null") || self.try_pop_word("zeroinitializer") {
            return Ok(Constant::Null(expected.clone()));
        }
        if self.try_pop_word("undef") {
            return Ok(Constant::Undef(expected.clone()));
        }
        if self.try_pop_word("true") {
            return Ok(Constant::Int {
                ty: expected.clone(),
                value: 1,
            });
        }
        if self.try_pop_word("false") {
            return Ok(Constant::Int {
                ty: expected.clone(),
                value: 0,
            });
        }
        if self.try_pop_word("bitcast") {
            self.drop_or_error("(")?;
            let inner_ty = self.parse_type()?;
            let inner = self.parse_constant(&inner_ty)?;
            self.drop_or_error("to")?;
            let to_ty = self.parse_type()?;
            self.drop_or_error(")")?;
            return Ok(Constant::BitCast {
                value: Box::new(inner),
                ty: to_ty,
            });
        }
        match expected {
            Type::Float(kind) => {
                let literal = self.pop_float_literal("float constant")?;
                let bits = match kind {
                    FloatKind::Single => (literal as f32).to_bits() as u64,
                    _ => literal.to_bits(),
                };
                Ok(Constant::Float {
                    ty: expected.clone(),
                    bits,
                })
            }
            _ => {
                let value = self.pop_integer_or_error("integer constant")?;
                let masked = match expected {
                    Type::Int(w) if *w < 64 => (value as u64) & ((1u64 << w) - 1),
                    _ => value as u64,
                };
                Ok(Constant::Int {
                    ty: expected.clone(),
                    value: masked,
                })
            }
        }
    }

    fn parse_typed_value(&mut self, ctx: &FnCtx) -> Result<Value, ParseError> {
        let ty = self.parse_type()?;
        self.parse_value(&ty, ctx)
    }

    fn parse_label_ref(&mut self) -> Result<String, ParseError> {
        self.drop_or_error("label")?;
        self.drop_or_error("%")?;
        self.pop_identifier_or_error("label name")
    }

    /// Trailing attribute words on the current line, stopping before any of
    /// `stop_words`.
    fn parse_line_attrs(&mut self, stop_words: &[&str]) -> AttrSet {
        let mut attrs = AttrSet::new();
        loop {
            self.drop_inline_whitespace();
            match self.peekc() {
                Some(c) if Self::is_ident_start(c) => {
                    let saved = self.save();
                    let word = match self.pop_identifier_or_error("attribute") {
                        Ok(w) => w,
                        Err(_) => {
                            self.restore(saved);
                            return attrs;
                        }
                    };
                    if stop_words.contains(&word.as_str()) {
                        self.restore(saved);
                        return attrs;
                    }
                    attrs.insert(&word);
                }
                _ => return attrs,
            }
        }
    }

    // -- Instructions

    fn parse_atomic_flags(&mut self) -> (bool, bool) {
        let mut atomic = false;
        let mut volatile = false;
        loop {
            if self.try_pop_word("atomic") {
                atomic = true;
            } else if self.try_pop_word("volatile") {
                volatile = true;
            } else {
                return (atomic, volatile);
            }
        }
    }

    fn parse_scope_and_ordering(
        &mut self,
        atomic: bool,
    ) -> Result<(SyncScope, AtomicOrdering), ParseError> {
        let scope = if self.try_pop_word("singlethread") {
            SyncScope::SingleThread
        } else {
            SyncScope::System
        };
        if !atomic {
            return Ok((scope, AtomicOrdering::NotAtomic));
        }
        let word = self.pop_identifier_or_error("atomic ordering")?;
        match keyword_to_ordering(&word) {
            Some(ordering) => Ok((scope, ordering)),
            None => Err(ParseError::new(format!(
                "unknown atomic ordering {:?}",
                word
            ))),
        }
    }

    fn parse_ordering_or_error(&mut self) -> Result<AtomicOrdering, ParseError> {
        let word = self.pop_identifier_or_error("atomic ordering")?;
        keyword_to_ordering(&word)
            .ok_or_else(|| ParseError::new(format!("unknown atomic ordering {:?}", word)))
    }

    fn parse_align_suffix(&mut self) -> Result<u32, ParseError> {
        if self.try_drop(",") {
            self.drop_or_error("align")?;
            Ok(self.pop_usize_or_error("alignment")? as u32)
        } else {
            Ok(0)
        }
    }

    fn parse_call_tail(
        &mut self,
        name: Option<String>,
        tail: bool,
        ctx: &FnCtx,
    ) -> Result<Instr, ParseError> {
        let conv = match self.peek_word() {
            Some(w) => match keyword_to_call_conv(&w) {
                Some(conv) => {
                    self.try_pop_word(&w);
                    conv
                }
                None => CallConv::C,
            },
            None => CallConv::C,
        };
        let parsed_ty = self.parse_type()?;
        // An explicit function-pointer type covers varargs callees; plain
        // callsites give just the return type.
        let (ret_ty, explicit_callee_ty) = match &parsed_ty {
            Type::Pointer(p) => match p.pointee.as_ref() {
                Type::Fn(d) => (d.ret.as_ref().clone(), Some(parsed_ty.clone())),
                _ => (parsed_ty.clone(), None),
            },
            _ => (parsed_ty.clone(), None),
        };

        let asm_callee = if self.peek_is("asm") {
            self.drop_or_error("asm")?;
            let text = self.pop_string_or_error()?;
            self.drop_or_error(",")?;
            let constraints = self.pop_string_or_error()?;
            Some((text, constraints))
        } else {
            None
        };
        let callee_raw = match &asm_callee {
            Some(_) => None,
            None => {
                // Placeholder type; patched once argument types are known.
                Some(self.parse_value(&Type::Void, ctx)?)
            }
        };

        self.drop_or_error("(")?;
        let mut args = Vec::new();
        self.drop_whitespace_and_comments();
        if !self.try_drop(")") {
            loop {
                args.push(self.parse_typed_value(ctx)?);
                if !self.try_drop(",") {
                    break;
                }
            }
            self.drop_or_error(")")?;
        }
        let attrs = self.parse_line_attrs(&["to"]);

        let callee_ty = explicit_callee_ty.unwrap_or_else(|| {
            Type::Fn(FnTypeData {
                ret: Box::new(ret_ty.clone()),
                params: args.iter().map(|a| a.ty()).collect(),
                varargs: false,
            })
            .ptr_to(0)
        });
        let callee = match asm_callee {
            Some((text, constraints)) => Value::Asm {
                text,
                constraints,
                ty: callee_ty,
            },
            None => match callee_raw.expect("callee value must be present") {
                Value::Const(Constant::Global { name, .. }) => Value::Const(Constant::Global {
                    name,
                    ty: callee_ty,
                }),
                Value::Local { name, .. } => Value::Local {
                    name,
                    ty: callee_ty,
                },
                Value::Arg { name, .. } => Value::Arg {
                    name,
                    ty: callee_ty,
                },
                other => other,
            },
        };

        Ok(Instr {
            name,
            ty: ret_ty,
            payload: InstrPayload::Call {
                callee,
                args,
                conv,
                attrs,
                tail,
            },
        })
    }

    fn parse_instr(&mut self, ctx: &FnCtx) -> Result<Instr, ParseError> {
        log::trace!("parse_instr; rest_of_line: {:?}", self.rest_of_line());
        self.drop_whitespace_and_comments();
        let name = if self.peekc() == Some('%') {
            self.offset += 1;
            let name = self.pop_identifier_or_error("result name")?;
            self.drop_or_error("=")?;
            Some(name)
        } else {
            None
        };
        let opcode = self.pop_identifier_or_error("opcode")?;

        if let Some(op) = operator_to_binop(&opcode) {
            let mut flags = PoisonFlags::default();
            loop {
                if self.try_pop_word("nuw") {
                    flags.nuw = true;
                } else if self.try_pop_word("nsw") {
                    flags.nsw = true;
                } else if self.try_pop_word("exact") {
                    flags.exact = true;
                } else if self.try_pop_word("fast") {
                    flags.fast = true;
                } else {
                    break;
                }
            }
            let ty = self.parse_type()?;
            let lhs = self.parse_value(&ty, ctx)?;
            self.drop_or_error(",")?;
            let rhs = self.parse_value(&ty, ctx)?;
            return Ok(Instr {
                name,
                ty,
                payload: InstrPayload::Binop {
                    op,
                    flags,
                    lhs,
                    rhs,
                },
            });
        }
        if let Some(op) = operator_to_cast(&opcode) {
            let value = self.parse_typed_value(ctx)?;
            self.drop_or_error("to")?;
            let to_ty = self.parse_type()?;
            return Ok(Instr {
                name,
                ty: to_ty,
                payload: InstrPayload::Cast { op, value },
            });
        }

        match opcode.as_str() {
            "icmp" => {
                let word = self.pop_identifier_or_error("icmp predicate")?;
                let pred = keyword_to_int_predicate(&word)
                    .ok_or_else(|| ParseError::new(format!("unknown predicate {:?}", word)))?;
                let ty = self.parse_type()?;
                let lhs = self.parse_value(&ty, ctx)?;
                self.drop_or_error(",")?;
                let rhs = self.parse_value(&ty, ctx)?;
                Ok(Instr {
                    name,
                    ty: Type::Int(1),
                    payload: InstrPayload::Icmp { pred, lhs, rhs },
                })
            }
            "fcmp" => {
                let word = self.pop_identifier_or_error("fcmp predicate")?;
                let pred = keyword_to_float_predicate(&word)
                    .ok_or_else(|| ParseError::new(format!("unknown predicate {:?}", word)))?;
                let ty = self.parse_type()?;
                let lhs = self.parse_value(&ty, ctx)?;
                self.drop_or_error(",")?;
                let rhs = self.parse_value(&ty, ctx)?;
                Ok(Instr {
                    name,
                    ty: Type::Int(1),
                    payload: InstrPayload::Fcmp { pred, lhs, rhs },
                })
            }
            "load" => {
                let (atomic, volatile) = self.parse_atomic_flags();
                let ptr_ty = self.parse_type()?;
                let ptr = self.parse_value(&ptr_ty, ctx)?;
                let (scope, ordering) = self.parse_scope_and_ordering(atomic)?;
                let align = self.parse_align_suffix()?;
                let pointee = match &ptr_ty {
                    Type::Pointer(p) => p.pointee.as_ref().clone(),
                    _ => {
                        return Err(ParseError::new(format!(
                            "load requires a pointer operand, got {}",
                            ptr_ty
                        )))
                    }
                };
                Ok(Instr {
                    name,
                    ty: pointee,
                    payload: InstrPayload::Load {
                        ptr,
                        volatile,
                        align,
                        ordering,
                        scope,
                    },
                })
            }
            "store" => {
                let (atomic, volatile) = self.parse_atomic_flags();
                let value = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let ptr = self.parse_typed_value(ctx)?;
                let (scope, ordering) = self.parse_scope_and_ordering(atomic)?;
                let align = self.parse_align_suffix()?;
                Ok(Instr {
                    name,
                    ty: Type::Void,
                    payload: InstrPayload::Store {
                        value,
                        ptr,
                        volatile,
                        align,
                        ordering,
                        scope,
                    },
                })
            }
            "fence" => {
                let scope = if self.try_pop_word("singlethread") {
                    SyncScope::SingleThread
                } else {
                    SyncScope::System
                };
                let ordering = self.parse_ordering_or_error()?;
                Ok(Instr {
                    name,
                    ty: Type::Void,
                    payload: InstrPayload::Fence { ordering, scope },
                })
            }
            "cmpxchg" => {
                let volatile = self.try_pop_word("volatile");
                let ptr = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let expected = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let replacement = self.parse_typed_value(ctx)?;
                let scope = if self.try_pop_word("singlethread") {
                    SyncScope::SingleThread
                } else {
                    SyncScope::System
                };
                let success_ordering = self.parse_ordering_or_error()?;
                let failure_ordering = self.parse_ordering_or_error()?;
                let ty = expected.ty();
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::CmpXchg {
                        ptr,
                        expected,
                        replacement,
                        volatile,
                        success_ordering,
                        failure_ordering,
                        scope,
                    },
                })
            }
            "atomicrmw" => {
                let volatile = self.try_pop_word("volatile");
                let word = self.pop_identifier_or_error("atomicrmw operation")?;
                let op = keyword_to_rmw_op(&word)
                    .ok_or_else(|| ParseError::new(format!("unknown rmw operation {:?}", word)))?;
                let ptr = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let operand = self.parse_typed_value(ctx)?;
                let scope = if self.try_pop_word("singlethread") {
                    SyncScope::SingleThread
                } else {
                    SyncScope::System
                };
                let ordering = self.parse_ordering_or_error()?;
                let ty = operand.ty();
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::AtomicRmw {
                        op,
                        ptr,
                        operand,
                        volatile,
                        ordering,
                        scope,
                    },
                })
            }
            "getelementptr" => {
                let inbounds = self.try_pop_word("inbounds");
                let base = self.parse_typed_value(ctx)?;
                let mut indices = Vec::new();
                while self.try_drop(",") {
                    indices.push(self.parse_typed_value(ctx)?);
                }
                let ty = gep_result_type(&base.ty(), &indices).map_err(ParseError::new)?;
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::Gep {
                        base,
                        indices,
                        inbounds,
                    },
                })
            }
            "select" => {
                let cond = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let on_true = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let on_false = self.parse_typed_value(ctx)?;
                let ty = on_true.ty();
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::Select {
                        cond,
                        on_true,
                        on_false,
                    },
                })
            }
            "phi" => {
                let ty = self.parse_type()?;
                let mut incoming = Vec::new();
                loop {
                    self.drop_or_error("[")?;
                    let value = self.parse_value(&ty, ctx)?;
                    self.drop_or_error(",")?;
                    self.drop_or_error("%")?;
                    let pred = self.pop_identifier_or_error("phi predecessor")?;
                    self.drop_or_error("]")?;
                    incoming.push((value, pred));
                    if !self.try_drop(",") {
                        break;
                    }
                }
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::Phi { incoming },
                })
            }
            "alloca" => {
                let allocated = self.parse_type()?;
                let mut count = None;
                let mut align = 0;
                if self.try_drop(",") {
                    if self.peek_is("align") {
                        self.drop_or_error("align")?;
                        align = self.pop_usize_or_error("alignment")? as u32;
                    } else {
                        count = Some(self.parse_typed_value(ctx)?);
                        if self.try_drop(",") {
                            self.drop_or_error("align")?;
                            align = self.pop_usize_or_error("alignment")? as u32;
                        }
                    }
                }
                let ty = allocated.clone().ptr_to(0);
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::Alloca {
                        allocated,
                        count,
                        align,
                    },
                })
            }
            "extractvalue" => {
                let agg = self.parse_typed_value(ctx)?;
                let mut indices = Vec::new();
                while self.try_drop(",") {
                    indices.push(self.pop_usize_or_error("aggregate index")? as u32);
                }
                let ty = aggregate_field_type(&agg.ty(), &indices).map_err(ParseError::new)?;
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::ExtractValue { agg, indices },
                })
            }
            "insertvalue" => {
                let agg = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let value = self.parse_typed_value(ctx)?;
                let mut indices = Vec::new();
                while self.try_drop(",") {
                    indices.push(self.pop_usize_or_error("aggregate index")? as u32);
                }
                let ty = agg.ty();
                Ok(Instr {
                    name,
                    ty,
                    payload: InstrPayload::InsertValue {
                        agg,
                        value,
                        indices,
                    },
                })
            }
            "tail" => {
                self.drop_or_error("call")?;
                self.parse_call_tail(name, true, ctx)
            }
            "call" => self.parse_call_tail(name, false, ctx),
            "invoke" => {
                let call = self.parse_call_tail(name, false, ctx)?;
                self.drop_or_error("to")?;
                let normal = self.parse_label_ref()?;
                self.drop_or_error("unwind")?;
                let unwind = self.parse_label_ref()?;
                match call.payload {
                    InstrPayload::Call {
                        callee,
                        args,
                        conv,
                        attrs,
                        ..
                    } => Ok(Instr {
                        name: call.name,
                        ty: call.ty,
                        payload: InstrPayload::Invoke {
                            callee,
                            args,
                            conv,
                            attrs,
                            normal,
                            unwind,
                        },
                    }),
                    _ => unreachable!("parse_call_tail must yield a call"),
                }
            }
            "ret" => {
                if self.try_pop_word("void") {
                    Ok(Instr {
                        name,
                        ty: Type::Void,
                        payload: InstrPayload::Ret { value: None },
                    })
                } else {
                    let value = self.parse_typed_value(ctx)?;
                    Ok(Instr {
                        name,
                        ty: Type::Void,
                        payload: InstrPayload::Ret { value: Some(value) },
                    })
                }
            }
            "br" => {
                if self.peek_is("label") {
                    let dest = self.parse_label_ref()?;
                    Ok(Instr {
                        name,
                        ty: Type::Void,
                        payload: InstrPayload::Br { dest },
                    })
                } else {
                    let cond = self.parse_typed_value(ctx)?;
                    self.drop_or_error(",")?;
                    let on_true = self.parse_label_ref()?;
                    self.drop_or_error(",")?;
                    let on_false = self.parse_label_ref()?;
                    Ok(Instr {
                        name,
                        ty: Type::Void,
                        payload: InstrPayload::CondBr {
                            cond,
                            on_true,
                            on_false,
                        },
                    })
                }
            }
            "switch" => {
                let value = self.parse_typed_value(ctx)?;
                self.drop_or_error(",")?;
                let default = self.parse_label_ref()?;
                self.drop_or_error("[")?;
                let mut cases = Vec::new();
                loop {
                    self.drop_whitespace_and_comments();
                    if self.try_drop("]") {
                        break;
                    }
                    let case_ty = self.parse_type()?;
                    let case_value = self.parse_constant(&case_ty)?;
                    self.drop_or_error(",")?;
                    let dest = self.parse_label_ref()?;
                    cases.push((case_value, dest));
                }
                Ok(Instr {
                    name,
                    ty: Type::Void,
                    payload: InstrPayload::Switch {
                        value,
                        default,
                        cases,
                    },
                })
            }
            "unreachable" => Ok(Instr {
                name,
                ty: Type::Void,
                payload: InstrPayload::Unreachable,
            }),
            other => Err(ParseError::new(format!(
                "unknown opcode {:?}; rest_of_line: {:?}",
                other,
                self.rest_of_line()
            ))),
        }
    }

    // -- Functions and module

    /// Peeks for `ident:` at the cursor, consuming it when present.
    fn try_pop_block_label(&mut self) -> Option<String> {
        let saved = self.save();
        let label = match self.pop_identifier_or_error("block label") {
            Ok(label) => label,
            Err(_) => {
                self.restore(saved);
                return None;
            }
        };
        if self.peekc() == Some(':') {
            self.offset += 1;
            Some(label)
        } else {
            self.restore(saved);
            None
        }
    }

    fn parse_function(&mut self, is_define: bool) -> Result<Function, ParseError> {
        log::debug!("parse_function; is_define: {}", is_define);
        let mut linkage = Linkage::External;
        let mut visibility = Visibility::Default;
        let mut conv = CallConv::C;
        if let Some(word) = self.peek_word() {
            if let Some(parsed) = keyword_to_linkage(&word) {
                self.try_pop_word(&word);
                linkage = parsed;
            }
        }
        if let Some(word) = self.peek_word() {
            if let Some(parsed) = keyword_to_visibility(&word) {
                self.try_pop_word(&word);
                visibility = parsed;
            }
        }
        if let Some(word) = self.peek_word() {
            if let Some(parsed) = keyword_to_call_conv(&word) {
                self.try_pop_word(&word);
                conv = parsed;
            }
        }
        let ret_ty = self.parse_type()?;
        self.drop_or_error("@")?;
        let fn_name = self.pop_identifier_or_error("function name")?;
        self.drop_or_error("(")?;
        let mut params = Vec::new();
        let mut varargs = false;
        self.drop_whitespace_and_comments();
        if !self.try_drop(")") {
            loop {
                if self.try_drop("...") {
                    varargs = true;
                    break;
                }
                let ty = self.parse_type()?;
                self.drop_whitespace_and_comments();
                let p_name = if self.peekc() == Some('%') {
                    self.offset += 1;
                    self.pop_identifier_or_error("parameter name")?
                } else {
                    String::new()
                };
                params.push(Param { name: p_name, ty });
                if !self.try_drop(",") {
                    break;
                }
            }
            self.drop_or_error(")")?;
        }

        let mut attrs = AttrSet::new();
        let mut unnamed_addr = false;
        let mut section = None;
        let mut gc = None;
        let mut alignment = 0u32;
        loop {
            self.drop_inline_whitespace();
            match self.peekc() {
                Some(c) if Self::is_ident_start(c) => {
                    let word = self.pop_identifier_or_error("function suffix")?;
                    match word.as_str() {
                        "unnamed_addr" => unnamed_addr = true,
                        "section" => section = Some(self.pop_string_or_error()?),
                        "gc" => gc = Some(self.pop_string_or_error()?),
                        "align" => alignment = self.pop_usize_or_error("alignment")? as u32,
                        _ => attrs.insert(&word),
                    }
                }
                _ => break,
            }
        }

        let mut blocks = Vec::new();
        if is_define {
            self.drop_or_error("{")?;
            let ctx = FnCtx {
                param_names: params.iter().map(|p| p.name.clone()).collect(),
            };
            loop {
                self.drop_whitespace_and_comments();
                if self.try_drop("}") {
                    break;
                }
                let label = self.try_pop_block_label().ok_or_else(|| {
                    ParseError::new(format!(
                        "expected block label; rest_of_line: {:?}",
                        self.rest_of_line()
                    ))
                })?;
                let mut instrs = Vec::new();
                loop {
                    self.drop_whitespace_and_comments();
                    if self.peek_is("}") {
                        break;
                    }
                    let saved = self.save();
                    if self.try_pop_block_label().is_some() {
                        self.restore(saved);
                        break;
                    }
                    instrs.push(self.parse_instr(&ctx)?);
                }
                blocks.push(Block {
                    name: label,
                    instrs,
                });
            }
        }

        Ok(Function {
            id: FuncId(usize::MAX),
            name: fn_name,
            ret_ty,
            params,
            varargs,
            linkage,
            visibility,
            conv,
            attrs,
            gc,
            section,
            alignment,
            unnamed_addr,
            blocks,
        })
    }

    fn parse_alias(&mut self) -> Result<GlobalAlias, ParseError> {
        self.drop_or_error("@")?;
        let name = self.pop_identifier_or_error("alias name")?;
        self.drop_or_error("=")?;
        let mut linkage = Linkage::External;
        let mut visibility = Visibility::Default;
        if let Some(word) = self.peek_word() {
            if let Some(parsed) = keyword_to_linkage(&word) {
                self.try_pop_word(&word);
                linkage = parsed;
            }
        }
        if let Some(word) = self.peek_word() {
            if let Some(parsed) = keyword_to_visibility(&word) {
                self.try_pop_word(&word);
                visibility = parsed;
            }
        }
        self.drop_or_error("alias")?;
        let ty = self.parse_type()?;
        let aliasee = self.parse_constant(&ty)?;
        Ok(GlobalAlias {
            name,
            linkage,
            visibility,
            ty,
            aliasee,
        })
    }

    pub fn parse_module(&mut self) -> Result<Module, ParseError> {
        log::debug!("parse_module");
        let name = if self.try_pop_word("module") {
            self.pop_identifier_or_error("module name")?
        } else {
            "main".to_string()
        };
        let mut module = Module::new(&name);

        while self.try_pop_word("pointersize") {
            let space = if self.peek_is("addrspace") {
                self.drop_or_error("addrspace")?;
                self.drop_or_error("(")?;
                let space = self.pop_usize_or_error("address space")? as u32;
                self.drop_or_error(")")?;
                space
            } else {
                0
            };
            let bits = self.pop_usize_or_error("pointer size")? as u32;
            let layout = module.layout.get_or_insert_with(|| DataLayout {
                pointer_bits: std::collections::BTreeMap::new(),
            });
            layout.set_pointer_size(space, bits);
        }

        while !self.at_eof() {
            if self.try_pop_word("define") {
                let func = self.parse_function(true)?;
                module.add_function(func);
            } else if self.try_pop_word("declare") {
                let func = self.parse_function(false)?;
                module.add_function(func);
            } else if self.peek_is("@") {
                let alias = self.parse_alias()?;
                module.add_alias(alias);
            } else {
                return Err(ParseError::new(format!(
                    "expected define, declare, or alias; rest_of_line: {:?}",
                    self.rest_of_line()
                )));
            }
        }
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_round_trip_module(text: &str) {
        let _ = env_logger::builder().is_test(true).try_init();
        let module = Parser::new(text).parse_module().unwrap();
        assert_eq!(module.to_string(), text);
    }

    #[test]
    fn round_trip_simple_function() {
        assert_round_trip_module(
            r#"module t

define i32 @add3(i32 %x, i32 %y) {
entry:
  %s = add nsw i32 %x, %y
  %t = add i32 %s, 1
  ret i32 %t
}
"#,
        );
    }

    #[test]
    fn round_trip_header_suffixes_and_layout() {
        assert_round_trip_module(
            r#"module t
pointersize 64

define internal fastcc i32 @f(i32 %x) nounwind readnone unnamed_addr section ".text.hot" gc "statepoint" align 16 {
entry:
  ret i32 %x
}

declare i32 @ext(i32)
"#,
        );
    }

    #[test]
    fn round_trip_memory_and_atomics() {
        assert_round_trip_module(
            r#"module t

define i32 @f(i32* %p, i32 %v) {
entry:
  %old = load atomic volatile i32* %p seq_cst, align 4
  store i32 %v, i32* %p, align 4
  fence acquire
  %swapped = cmpxchg volatile i32* %p, i32 %old, i32 %v seq_cst monotonic
  %prev = atomicrmw add i32* %p, i32 1 acq_rel
  ret i32 %prev
}
"#,
        );
    }

    #[test]
    fn round_trip_control_flow() {
        assert_round_trip_module(
            r#"module t

define i32 @f(i1 %c, i32 %x) {
entry:
  br i1 %c, label %then, label %merge

then:
  %t = mul i32 %x, 3
  br label %merge

merge:
  %r = phi i32 [ %t, %then ], [ %x, %entry ]
  switch i32 %r, label %done [ i32 0, label %then i32 1, label %done ]

done:
  ret i32 %r
}
"#,
        );
    }

    #[test]
    fn round_trip_gep_casts_and_aggregates() {
        assert_round_trip_module(
            r#"module t

define i8* @f({ i64, [4 x i8] }* %p, i64 %n) {
entry:
  %slot = getelementptr inbounds { i64, [4 x i8] }* %p, i64 0, i32 1, i64 2
  %asint = ptrtoint i8* %slot to i64
  %sum = add i64 %asint, %n
  %back = inttoptr i64 %sum to i8*
  ret i8* %back
}
"#,
        );
    }

    #[test]
    fn round_trip_calls_and_alias() {
        assert_round_trip_module(
            r#"module t

@add_alias = weak alias i32 (i32)* @add1

define i32 @add1(i32 %x) {
entry:
  %r = tail call fastcc i32 @helper(i32 %x) nounwind
  ret i32 %r
}

declare fastcc i32 @helper(i32)
"#,
        );
    }

    #[test]
    fn round_trip_invoke_and_unreachable() {
        assert_round_trip_module(
            r#"module t

define i32 @f(i32 %x) {
entry:
  %r = invoke i32 @may_throw(i32 %x) to label %ok unwind label %bad

ok:
  ret i32 %r

bad:
  unreachable
}

declare i32 @may_throw(i32)
"#,
        );
    }

    #[test]
    fn round_trip_constant_expression_callee() {
        assert_round_trip_module(
            r#"module t

define i64 @wide(i64 %x) {
entry:
  ret i64 %x
}

define i32 @caller(i32 %x) {
entry:
  %r = call i32 bitcast (i64 (i64)* @wide to i32 (i32)*)(i32 %x)
  ret i32 %r
}
"#,
        );
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let err = Parser::new(
            r#"module t

define void @f() {
entry:
  frobnicate i32 1
}
"#,
        )
        .parse_module()
        .expect_err("expected parse failure");
        let msg = format!("{}", err);
        assert!(msg.contains("unknown opcode"), "unexpected error: {}", msg);
    }

    #[test]
    fn pointersize_directives_install_the_layout() {
        let module = Parser::new(
            "module t\npointersize 32\npointersize addrspace(1) 64\n",
        )
        .parse_module()
        .unwrap();
        let layout = module.layout.as_ref().unwrap();
        assert_eq!(layout.pointer_size_bits(0), 32);
        assert_eq!(layout.pointer_size_bits(1), 64);
    }
}
