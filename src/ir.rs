// SPDX-License-Identifier: Apache-2.0

//! Core IR data model: types, constants, values, instructions, basic blocks,
//! functions, aliases, and the module that owns them.
//!
//! The shape is deliberately close to a classic SSA IR: a module holds
//! functions, a function holds labeled basic blocks, a block is a non-empty
//! instruction sequence ending in a terminator, and operands are typed
//! values. Functions carry a module-unique [`FuncId`] so that handles held
//! across rewrites can report liveness instead of dangling.

use std::collections::BTreeSet;
use std::fmt;

use crate::layout::DataLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatKind {
    Single,
    Double,
    X86Fp80,
    Fp128,
    PpcFp128,
}

impl FloatKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            FloatKind::Single => "float",
            FloatKind::Double => "double",
            FloatKind::X86Fp80 => "x86_fp80",
            FloatKind::Fp128 => "fp128",
            FloatKind::PpcFp128 => "ppc_fp128",
        }
    }

    pub fn bit_width(&self) -> u64 {
        match self {
            FloatKind::Single => 32,
            FloatKind::Double => 64,
            FloatKind::X86Fp80 => 80,
            FloatKind::Fp128 => 128,
            FloatKind::PpcFp128 => 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointerTypeData {
    pub pointee: Box<Type>,
    pub address_space: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FnTypeData {
    pub ret: Box<Type>,
    pub params: Vec<Type>,
    pub varargs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Label,
    Metadata,
    Float(FloatKind),
    Int(u32),
    Pointer(PointerTypeData),
    Vector { elem: Box<Type>, len: u64 },
    Array { elem: Box<Type>, len: u64 },
    Struct { packed: bool, fields: Vec<Type> },
    Fn(FnTypeData),
}

impl Type {
    pub fn ptr_to(self, address_space: u32) -> Type {
        Type::Pointer(PointerTypeData {
            pointee: Box::new(self),
            address_space,
        })
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct { .. } | Type::Array { .. })
    }

    /// Flat bit width for first-class scalar/vector types; `None` for
    /// everything whose bit pattern is not directly reinterpretable.
    pub fn primitive_bit_width(&self) -> Option<u64> {
        match self {
            Type::Int(w) => Some(*w as u64),
            Type::Float(k) => Some(k.bit_width()),
            Type::Vector { elem, len } => elem.primitive_bit_width().map(|w| w * len),
            _ => None,
        }
    }
}

/// Whether a bit-for-bit reinterpret cast between the two types is legal:
/// same type, pointers within one address space, or first-class non-aggregate
/// types of identical bit width. Integer-to-pointer traffic is never a plain
/// bitcast; it goes through the dedicated conversions.
pub fn losslessly_bitcastable(from: &Type, to: &Type) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (Type::Pointer(a), Type::Pointer(b)) => a.address_space == b.address_space,
        (Type::Pointer(_), _) | (_, Type::Pointer(_)) => false,
        _ => match (from.primitive_bit_width(), to.primitive_bit_width()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Label => write!(f, "label"),
            Type::Metadata => write!(f, "metadata"),
            Type::Float(k) => write!(f, "{}", k.keyword()),
            Type::Int(w) => write!(f, "i{}", w),
            Type::Pointer(p) => {
                if p.address_space == 0 {
                    write!(f, "{}*", p.pointee)
                } else {
                    write!(f, "{} addrspace({})*", p.pointee, p.address_space)
                }
            }
            Type::Vector { elem, len } => write!(f, "<{} x {}>", len, elem),
            Type::Array { elem, len } => write!(f, "[{} x {}]", len, elem),
            Type::Struct { packed, fields } => {
                let body = fields
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");
                if *packed {
                    write!(f, "<{{ {} }}>", body)
                } else if fields.is_empty() {
                    write!(f, "{{}}")
                } else {
                    write!(f, "{{ {} }}", body)
                }
            }
            Type::Fn(d) => {
                let params = d
                    .params
                    .iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");
                if d.varargs {
                    if d.params.is_empty() {
                        write!(f, "{} (...)", d.ret)
                    } else {
                        write!(f, "{} ({}, ...)", d.ret, params)
                    }
                } else {
                    write!(f, "{} ({})", d.ret, params)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConv {
    C,
    Fast,
    Cold,
}

impl CallConv {
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            CallConv::C => None,
            CallConv::Fast => Some("fastcc"),
            CallConv::Cold => Some("coldcc"),
        }
    }
}

pub fn keyword_to_call_conv(word: &str) -> Option<CallConv> {
    match word {
        "fastcc" => Some(CallConv::Fast),
        "coldcc" => Some(CallConv::Cold),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Linkage {
    External,
    AvailableExternally,
    LinkOnce,
    Weak,
    Internal,
    Private,
}

impl Linkage {
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            Linkage::External => None,
            Linkage::AvailableExternally => Some("available_externally"),
            Linkage::LinkOnce => Some("linkonce"),
            Linkage::Weak => Some("weak"),
            Linkage::Internal => Some("internal"),
            Linkage::Private => Some("private"),
        }
    }

    /// An overridable definition may be replaced by the linker with a
    /// different implementation, so it can never simply be deleted.
    pub fn is_overridable(&self) -> bool {
        matches!(self, Linkage::Weak | Linkage::LinkOnce)
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Linkage::Internal | Linkage::Private)
    }
}

pub fn keyword_to_linkage(word: &str) -> Option<Linkage> {
    match word {
        "available_externally" => Some(Linkage::AvailableExternally),
        "linkonce" => Some(Linkage::LinkOnce),
        "weak" => Some(Linkage::Weak),
        "internal" => Some(Linkage::Internal),
        "private" => Some(Linkage::Private),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Default,
    Hidden,
    Protected,
}

impl Visibility {
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            Visibility::Default => None,
            Visibility::Hidden => Some("hidden"),
            Visibility::Protected => Some("protected"),
        }
    }
}

pub fn keyword_to_visibility(word: &str) -> Option<Visibility> {
    match word {
        "hidden" => Some(Visibility::Hidden),
        "protected" => Some(Visibility::Protected),
        _ => None,
    }
}

/// A set of function or callsite attributes, kept sorted so that equality
/// and printing are order-independent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AttrSet(pub BTreeSet<String>);

impl AttrSet {
    pub fn new() -> Self {
        AttrSet(BTreeSet::new())
    }

    pub fn insert(&mut self, attr: &str) {
        self.0.insert(attr.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AttrSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words: Vec<&str> = self.0.iter().map(|s| s.as_str()).collect();
        write!(f, "{}", words.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    Int { ty: Type, value: u64 },
    Float { ty: Type, bits: u64 },
    Null(Type),
    Undef(Type),
    /// The address of a module-level symbol (function or alias); `ty` is the
    /// symbol's pointer type.
    Global { name: String, ty: Type },
    /// A constant-expression reinterpret cast.
    BitCast { value: Box<Constant>, ty: Type },
}

impl Constant {
    pub fn ty(&self) -> &Type {
        match self {
            Constant::Int { ty, .. }
            | Constant::Float { ty, .. }
            | Constant::Null(ty)
            | Constant::Undef(ty)
            | Constant::Global { ty, .. }
            | Constant::BitCast { ty, .. } => ty,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Constant::Null(_) => true,
            Constant::Int { value, .. } => *value == 0,
            Constant::Float { bits, .. } => *bits == 0,
            _ => false,
        }
    }

    /// Folds a bit-for-bit reinterpretation of this constant to `to`, when
    /// the cast is lossless and the folded form is known. Returns `None` for
    /// anything that would stay a symbolic expression.
    pub fn bitcast_to(&self, to: &Type) -> Option<Constant> {
        if self.ty() == to {
            return Some(self.clone());
        }
        if !losslessly_bitcastable(self.ty(), to) {
            return None;
        }
        match self {
            Constant::Int { value, .. } if matches!(to, Type::Float(_)) => {
                Some(Constant::Float {
                    ty: to.clone(),
                    bits: *value,
                })
            }
            Constant::Float { bits, .. } if to.is_integer() => Some(Constant::Int {
                ty: to.clone(),
                value: *bits,
            }),
            Constant::Null(_) => Some(Constant::Null(to.clone())),
            Constant::Undef(_) => Some(Constant::Undef(to.clone())),
            _ => None,
        }
    }

    /// Distinguishes the constant's kind; used where two operands must be
    /// the same sort of value, not merely bit-equal.
    pub fn kind_tag(&self) -> u32 {
        match self {
            Constant::Int { .. } => 0,
            Constant::Float { .. } => 1,
            Constant::Null(_) => 2,
            Constant::Undef(_) => 3,
            Constant::Global { .. } => 4,
            Constant::BitCast { .. } => 5,
        }
    }

    /// Whether this constant (looking through constant expressions) refers to
    /// the named module symbol.
    pub fn mentions_symbol(&self, name: &str) -> bool {
        match self {
            Constant::Global { name: n, .. } => n == name,
            Constant::BitCast { value, .. } => value.mentions_symbol(name),
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Int { ty, value } => match ty {
                Type::Int(1) => write!(f, "{}", if *value & 1 == 1 { "true" } else { "false" }),
                Type::Int(w) => {
                    let shift = 64 - (*w).min(64);
                    let signed = ((*value << shift) as i64) >> shift;
                    write!(f, "{}", signed)
                }
                _ => write!(f, "{}", *value as i64),
            },
            Constant::Float { ty, bits } => match ty {
                Type::Float(FloatKind::Single) => write!(f, "{}", f32::from_bits(*bits as u32)),
                _ => write!(f, "{}", f64::from_bits(*bits)),
            },
            Constant::Null(ty) => {
                if ty.is_pointer() {
                    write!(f, "null")
                } else {
                    write!(f, "zeroinitializer")
                }
            }
            Constant::Undef(_) => write!(f, "undef"),
            Constant::Global { name, .. } => write!(f, "@{}", name),
            Constant::BitCast { value, ty } => {
                write!(f, "bitcast ({} {} to {})", value.ty(), value, ty)
            }
        }
    }
}

/// Any IR entity that can appear as an instruction operand.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Const(Constant),
    /// An inline-assembly literal in callee position.
    Asm {
        text: String,
        constraints: String,
        ty: Type,
    },
    /// A formal parameter of the enclosing function.
    Arg { name: String, ty: Type },
    /// The result of an instruction in the enclosing function.
    Local { name: String, ty: Type },
    /// A basic block used as a branch target.
    Label { name: String },
}

impl Value {
    pub fn ty(&self) -> Type {
        match self {
            Value::Const(c) => c.ty().clone(),
            Value::Asm { ty, .. } => ty.clone(),
            Value::Arg { ty, .. } | Value::Local { ty, .. } => ty.clone(),
            Value::Label { .. } => Type::Label,
        }
    }

    /// Kind tag for the "same sort of value" operand check. Constants get
    /// distinct tags per constant kind.
    pub fn kind_tag(&self) -> u32 {
        match self {
            Value::Const(c) => c.kind_tag(),
            Value::Asm { .. } => 16,
            Value::Arg { .. } => 17,
            Value::Local { .. } => 18,
            Value::Label { .. } => 19,
        }
    }

    pub fn mentions_symbol(&self, name: &str) -> bool {
        match self {
            Value::Const(c) => c.mentions_symbol(name),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Const(c) => write!(f, "{}", c),
            Value::Asm {
                text, constraints, ..
            } => write!(f, "asm \"{}\", \"{}\"", text, constraints),
            Value::Arg { name, .. } | Value::Local { name, .. } => write!(f, "%{}", name),
            Value::Label { name } => write!(f, "%{}", name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

pub fn binop_operator(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::UDiv => "udiv",
        BinOp::SDiv => "sdiv",
        BinOp::URem => "urem",
        BinOp::SRem => "srem",
        BinOp::Shl => "shl",
        BinOp::LShr => "lshr",
        BinOp::AShr => "ashr",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::FAdd => "fadd",
        BinOp::FSub => "fsub",
        BinOp::FMul => "fmul",
        BinOp::FDiv => "fdiv",
        BinOp::FRem => "frem",
    }
}

pub fn operator_to_binop(operator: &str) -> Option<BinOp> {
    match operator {
        "add" => Some(BinOp::Add),
        "sub" => Some(BinOp::Sub),
        "mul" => Some(BinOp::Mul),
        "udiv" => Some(BinOp::UDiv),
        "sdiv" => Some(BinOp::SDiv),
        "urem" => Some(BinOp::URem),
        "srem" => Some(BinOp::SRem),
        "shl" => Some(BinOp::Shl),
        "lshr" => Some(BinOp::LShr),
        "ashr" => Some(BinOp::AShr),
        "and" => Some(BinOp::And),
        "or" => Some(BinOp::Or),
        "xor" => Some(BinOp::Xor),
        "fadd" => Some(BinOp::FAdd),
        "fsub" => Some(BinOp::FSub),
        "fmul" => Some(BinOp::FMul),
        "fdiv" => Some(BinOp::FDiv),
        "frem" => Some(BinOp::FRem),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    BitCast,
    IntToPtr,
    PtrToInt,
    Trunc,
    ZExt,
    SExt,
}

pub fn cast_operator(op: CastOp) -> &'static str {
    match op {
        CastOp::BitCast => "bitcast",
        CastOp::IntToPtr => "inttoptr",
        CastOp::PtrToInt => "ptrtoint",
        CastOp::Trunc => "trunc",
        CastOp::ZExt => "zext",
        CastOp::SExt => "sext",
    }
}

pub fn operator_to_cast(operator: &str) -> Option<CastOp> {
    match operator {
        "bitcast" => Some(CastOp::BitCast),
        "inttoptr" => Some(CastOp::IntToPtr),
        "ptrtoint" => Some(CastOp::PtrToInt),
        "trunc" => Some(CastOp::Trunc),
        "zext" => Some(CastOp::ZExt),
        "sext" => Some(CastOp::SExt),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

pub fn int_predicate_keyword(p: IntPredicate) -> &'static str {
    match p {
        IntPredicate::Eq => "eq",
        IntPredicate::Ne => "ne",
        IntPredicate::Ugt => "ugt",
        IntPredicate::Uge => "uge",
        IntPredicate::Ult => "ult",
        IntPredicate::Ule => "ule",
        IntPredicate::Sgt => "sgt",
        IntPredicate::Sge => "sge",
        IntPredicate::Slt => "slt",
        IntPredicate::Sle => "sle",
    }
}

pub fn keyword_to_int_predicate(word: &str) -> Option<IntPredicate> {
    match word {
        "eq" => Some(IntPredicate::Eq),
        "ne" => Some(IntPredicate::Ne),
        "ugt" => Some(IntPredicate::Ugt),
        "uge" => Some(IntPredicate::Uge),
        "ult" => Some(IntPredicate::Ult),
        "ule" => Some(IntPredicate::Ule),
        "sgt" => Some(IntPredicate::Sgt),
        "sge" => Some(IntPredicate::Sge),
        "slt" => Some(IntPredicate::Slt),
        "sle" => Some(IntPredicate::Sle),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Uno,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    True,
}

pub fn float_predicate_keyword(p: FloatPredicate) -> &'static str {
    match p {
        FloatPredicate::False => "false",
        FloatPredicate::Oeq => "oeq",
        FloatPredicate::Ogt => "ogt",
        FloatPredicate::Oge => "oge",
        FloatPredicate::Olt => "olt",
        FloatPredicate::Ole => "ole",
        FloatPredicate::One => "one",
        FloatPredicate::Ord => "ord",
        FloatPredicate::Uno => "uno",
        FloatPredicate::Ueq => "ueq",
        FloatPredicate::Ugt => "ugt",
        FloatPredicate::Uge => "uge",
        FloatPredicate::Ult => "ult",
        FloatPredicate::Ule => "ule",
        FloatPredicate::Une => "une",
        FloatPredicate::True => "true",
    }
}

pub fn keyword_to_float_predicate(word: &str) -> Option<FloatPredicate> {
    match word {
        "false" => Some(FloatPredicate::False),
        "oeq" => Some(FloatPredicate::Oeq),
        "ogt" => Some(FloatPredicate::Ogt),
        "oge" => Some(FloatPredicate::Oge),
        "olt" => Some(FloatPredicate::Olt),
        "ole" => Some(FloatPredicate::Ole),
        "one" => Some(FloatPredicate::One),
        "ord" => Some(FloatPredicate::Ord),
        "uno" => Some(FloatPredicate::Uno),
        "ueq" => Some(FloatPredicate::Ueq),
        "ugt" => Some(FloatPredicate::Ugt),
        "uge" => Some(FloatPredicate::Uge),
        "ult" => Some(FloatPredicate::Ult),
        "ule" => Some(FloatPredicate::Ule),
        "une" => Some(FloatPredicate::Une),
        "true" => Some(FloatPredicate::True),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOrdering {
    NotAtomic,
    Unordered,
    Monotonic,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl AtomicOrdering {
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            AtomicOrdering::NotAtomic => None,
            AtomicOrdering::Unordered => Some("unordered"),
            AtomicOrdering::Monotonic => Some("monotonic"),
            AtomicOrdering::Acquire => Some("acquire"),
            AtomicOrdering::Release => Some("release"),
            AtomicOrdering::AcqRel => Some("acq_rel"),
            AtomicOrdering::SeqCst => Some("seq_cst"),
        }
    }
}

pub fn keyword_to_ordering(word: &str) -> Option<AtomicOrdering> {
    match word {
        "unordered" => Some(AtomicOrdering::Unordered),
        "monotonic" => Some(AtomicOrdering::Monotonic),
        "acquire" => Some(AtomicOrdering::Acquire),
        "release" => Some(AtomicOrdering::Release),
        "acq_rel" => Some(AtomicOrdering::AcqRel),
        "seq_cst" => Some(AtomicOrdering::SeqCst),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncScope {
    SingleThread,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Nand,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

pub fn rmw_operator(op: RmwOp) -> &'static str {
    match op {
        RmwOp::Xchg => "xchg",
        RmwOp::Add => "add",
        RmwOp::Sub => "sub",
        RmwOp::And => "and",
        RmwOp::Nand => "nand",
        RmwOp::Or => "or",
        RmwOp::Xor => "xor",
        RmwOp::Max => "max",
        RmwOp::Min => "min",
        RmwOp::UMax => "umax",
        RmwOp::UMin => "umin",
    }
}

pub fn keyword_to_rmw_op(word: &str) -> Option<RmwOp> {
    match word {
        "xchg" => Some(RmwOp::Xchg),
        "add" => Some(RmwOp::Add),
        "sub" => Some(RmwOp::Sub),
        "and" => Some(RmwOp::And),
        "nand" => Some(RmwOp::Nand),
        "or" => Some(RmwOp::Or),
        "xor" => Some(RmwOp::Xor),
        "max" => Some(RmwOp::Max),
        "min" => Some(RmwOp::Min),
        "umax" => Some(RmwOp::UMax),
        "umin" => Some(RmwOp::UMin),
        _ => None,
    }
}

/// Wrap/exactness/fast-math flags carried uniformly as "optional data".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PoisonFlags {
    pub nuw: bool,
    pub nsw: bool,
    pub exact: bool,
    pub fast: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstrPayload {
    Binop {
        op: BinOp,
        flags: PoisonFlags,
        lhs: Value,
        rhs: Value,
    },
    Icmp {
        pred: IntPredicate,
        lhs: Value,
        rhs: Value,
    },
    Fcmp {
        pred: FloatPredicate,
        lhs: Value,
        rhs: Value,
    },
    Load {
        ptr: Value,
        volatile: bool,
        align: u32,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Store {
        value: Value,
        ptr: Value,
        volatile: bool,
        align: u32,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Fence {
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    CmpXchg {
        ptr: Value,
        expected: Value,
        replacement: Value,
        volatile: bool,
        success_ordering: AtomicOrdering,
        failure_ordering: AtomicOrdering,
        scope: SyncScope,
    },
    AtomicRmw {
        op: RmwOp,
        ptr: Value,
        operand: Value,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Gep {
        base: Value,
        indices: Vec<Value>,
        inbounds: bool,
    },
    Cast {
        op: CastOp,
        value: Value,
    },
    Select {
        cond: Value,
        on_true: Value,
        on_false: Value,
    },
    Phi {
        /// (incoming value, predecessor label) pairs.
        incoming: Vec<(Value, String)>,
    },
    Alloca {
        allocated: Type,
        count: Option<Value>,
        align: u32,
    },
    ExtractValue {
        agg: Value,
        indices: Vec<u32>,
    },
    InsertValue {
        agg: Value,
        value: Value,
        indices: Vec<u32>,
    },
    Call {
        callee: Value,
        args: Vec<Value>,
        conv: CallConv,
        attrs: AttrSet,
        tail: bool,
    },
    Ret {
        value: Option<Value>,
    },
    Br {
        dest: String,
    },
    CondBr {
        cond: Value,
        on_true: String,
        on_false: String,
    },
    Switch {
        value: Value,
        default: String,
        cases: Vec<(Constant, String)>,
    },
    Invoke {
        callee: Value,
        args: Vec<Value>,
        conv: CallConv,
        attrs: AttrSet,
        normal: String,
        unwind: String,
    },
    Unreachable,
}

impl InstrPayload {
    pub fn operator(&self) -> &'static str {
        match self {
            InstrPayload::Binop { op, .. } => binop_operator(*op),
            InstrPayload::Icmp { .. } => "icmp",
            InstrPayload::Fcmp { .. } => "fcmp",
            InstrPayload::Load { .. } => "load",
            InstrPayload::Store { .. } => "store",
            InstrPayload::Fence { .. } => "fence",
            InstrPayload::CmpXchg { .. } => "cmpxchg",
            InstrPayload::AtomicRmw { .. } => "atomicrmw",
            InstrPayload::Gep { .. } => "getelementptr",
            InstrPayload::Cast { op, .. } => cast_operator(*op),
            InstrPayload::Select { .. } => "select",
            InstrPayload::Phi { .. } => "phi",
            InstrPayload::Alloca { .. } => "alloca",
            InstrPayload::ExtractValue { .. } => "extractvalue",
            InstrPayload::InsertValue { .. } => "insertvalue",
            InstrPayload::Call { .. } => "call",
            InstrPayload::Ret { .. } => "ret",
            InstrPayload::Br { .. } | InstrPayload::CondBr { .. } => "br",
            InstrPayload::Switch { .. } => "switch",
            InstrPayload::Invoke { .. } => "invoke",
            InstrPayload::Unreachable => "unreachable",
        }
    }

    /// Returns the full operand list, with branch targets and phi
    /// predecessors materialized as label values so that a pairwise walk
    /// constrains them like any other operand.
    pub fn operands(&self) -> Vec<Value> {
        let label = |name: &str| Value::Label {
            name: name.to_string(),
        };
        match self {
            InstrPayload::Binop { lhs, rhs, .. }
            | InstrPayload::Icmp { lhs, rhs, .. }
            | InstrPayload::Fcmp { lhs, rhs, .. } => vec![lhs.clone(), rhs.clone()],
            InstrPayload::Load { ptr, .. } => vec![ptr.clone()],
            InstrPayload::Store { value, ptr, .. } => vec![value.clone(), ptr.clone()],
            InstrPayload::Fence { .. } => vec![],
            InstrPayload::CmpXchg {
                ptr,
                expected,
                replacement,
                ..
            } => vec![ptr.clone(), expected.clone(), replacement.clone()],
            InstrPayload::AtomicRmw { ptr, operand, .. } => vec![ptr.clone(), operand.clone()],
            InstrPayload::Gep { base, indices, .. } => {
                let mut ops = vec![base.clone()];
                ops.extend(indices.iter().cloned());
                ops
            }
            InstrPayload::Cast { value, .. } => vec![value.clone()],
            InstrPayload::Select {
                cond,
                on_true,
                on_false,
            } => vec![cond.clone(), on_true.clone(), on_false.clone()],
            InstrPayload::Phi { incoming } => {
                let mut ops = Vec::with_capacity(incoming.len() * 2);
                for (v, pred) in incoming.iter() {
                    ops.push(v.clone());
                    ops.push(label(pred));
                }
                ops
            }
            InstrPayload::Alloca { count, .. } => count.iter().cloned().collect(),
            InstrPayload::ExtractValue { agg, .. } => vec![agg.clone()],
            InstrPayload::InsertValue { agg, value, .. } => vec![agg.clone(), value.clone()],
            InstrPayload::Call { callee, args, .. } => {
                let mut ops = vec![callee.clone()];
                ops.extend(args.iter().cloned());
                ops
            }
            InstrPayload::Ret { value } => value.iter().cloned().collect(),
            InstrPayload::Br { dest } => vec![label(dest)],
            InstrPayload::CondBr {
                cond,
                on_true,
                on_false,
            } => vec![cond.clone(), label(on_true), label(on_false)],
            InstrPayload::Switch {
                value,
                default,
                cases,
            } => {
                let mut ops = vec![value.clone(), label(default)];
                for (c, dest) in cases.iter() {
                    ops.push(Value::Const(c.clone()));
                    ops.push(label(dest));
                }
                ops
            }
            InstrPayload::Invoke {
                callee,
                args,
                normal,
                unwind,
                ..
            } => {
                let mut ops = vec![callee.clone()];
                ops.extend(args.iter().cloned());
                ops.push(label(normal));
                ops.push(label(unwind));
                ops
            }
            InstrPayload::Unreachable => vec![],
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrPayload::Ret { .. }
                | InstrPayload::Br { .. }
                | InstrPayload::CondBr { .. }
                | InstrPayload::Switch { .. }
                | InstrPayload::Invoke { .. }
                | InstrPayload::Unreachable
        )
    }

    /// Successor block labels, in operand order.
    pub fn successors(&self) -> Vec<&str> {
        match self {
            InstrPayload::Br { dest } => vec![dest.as_str()],
            InstrPayload::CondBr {
                on_true, on_false, ..
            } => vec![on_true.as_str(), on_false.as_str()],
            InstrPayload::Switch { default, cases, .. } => {
                let mut succs = vec![default.as_str()];
                succs.extend(cases.iter().map(|(_, dest)| dest.as_str()));
                succs
            }
            InstrPayload::Invoke { normal, unwind, .. } => {
                vec![normal.as_str(), unwind.as_str()]
            }
            _ => vec![],
        }
    }

    /// The uniformly-held optional bits (wrap/exactness/fast-math flags, the
    /// tail-call bit, address-computation inbounds), packed for equality
    /// checks.
    pub fn optional_flags(&self) -> u32 {
        match self {
            InstrPayload::Binop { flags, .. } => {
                (flags.nuw as u32)
                    | (flags.nsw as u32) << 1
                    | (flags.exact as u32) << 2
                    | (flags.fast as u32) << 3
            }
            InstrPayload::Call { tail, .. } => (*tail as u32) << 4,
            InstrPayload::Gep { inbounds, .. } => (*inbounds as u32) << 5,
            _ => 0,
        }
    }

    /// Visits every stored operand value (labels are held as plain strings
    /// and are not visited).
    pub fn for_each_value_mut<F: FnMut(&mut Value)>(&mut self, mut f: F) {
        match self {
            InstrPayload::Binop { lhs, rhs, .. }
            | InstrPayload::Icmp { lhs, rhs, .. }
            | InstrPayload::Fcmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstrPayload::Load { ptr, .. } => f(ptr),
            InstrPayload::Store { value, ptr, .. } => {
                f(value);
                f(ptr);
            }
            InstrPayload::Fence { .. } | InstrPayload::Unreachable => {}
            InstrPayload::CmpXchg {
                ptr,
                expected,
                replacement,
                ..
            } => {
                f(ptr);
                f(expected);
                f(replacement);
            }
            InstrPayload::AtomicRmw { ptr, operand, .. } => {
                f(ptr);
                f(operand);
            }
            InstrPayload::Gep { base, indices, .. } => {
                f(base);
                for idx in indices.iter_mut() {
                    f(idx);
                }
            }
            InstrPayload::Cast { value, .. } => f(value),
            InstrPayload::Select {
                cond,
                on_true,
                on_false,
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            InstrPayload::Phi { incoming } => {
                for (v, _) in incoming.iter_mut() {
                    f(v);
                }
            }
            InstrPayload::Alloca { count, .. } => {
                if let Some(c) = count {
                    f(c);
                }
            }
            InstrPayload::ExtractValue { agg, .. } => f(agg),
            InstrPayload::InsertValue { agg, value, .. } => {
                f(agg);
                f(value);
            }
            InstrPayload::Call { callee, args, .. }
            | InstrPayload::Invoke { callee, args, .. } => {
                f(callee);
                for a in args.iter_mut() {
                    f(a);
                }
            }
            InstrPayload::Ret { value } => {
                if let Some(v) = value {
                    f(v);
                }
            }
            InstrPayload::Br { .. } => {}
            InstrPayload::CondBr { cond, .. } => f(cond),
            InstrPayload::Switch { value, .. } => f(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instr {
    /// Result name; `None` when the instruction produces no value.
    pub name: Option<String>,
    /// Result type; `Void` for valueless instructions.
    pub ty: Type,
    pub payload: InstrPayload,
}

impl Instr {
    /// The instruction's result as an operand value, when it has one.
    pub fn result(&self) -> Option<Value> {
        self.name.as_ref().map(|n| Value::Local {
            name: n.clone(),
            ty: self.ty.clone(),
        })
    }
}

fn typed(v: &Value) -> String {
    format!("{} {}", v.ty(), v)
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "%{} = ", name)?;
        }
        match &self.payload {
            InstrPayload::Binop {
                op,
                flags,
                lhs,
                rhs,
            } => {
                write!(f, "{}", binop_operator(*op))?;
                if flags.nuw {
                    write!(f, " nuw")?;
                }
                if flags.nsw {
                    write!(f, " nsw")?;
                }
                if flags.exact {
                    write!(f, " exact")?;
                }
                if flags.fast {
                    write!(f, " fast")?;
                }
                write!(f, " {} {}, {}", lhs.ty(), lhs, rhs)
            }
            InstrPayload::Icmp { pred, lhs, rhs } => write!(
                f,
                "icmp {} {} {}, {}",
                int_predicate_keyword(*pred),
                lhs.ty(),
                lhs,
                rhs
            ),
            InstrPayload::Fcmp { pred, lhs, rhs } => write!(
                f,
                "fcmp {} {} {}, {}",
                float_predicate_keyword(*pred),
                lhs.ty(),
                lhs,
                rhs
            ),
            InstrPayload::Load {
                ptr,
                volatile,
                align,
                ordering,
                scope,
            } => {
                write!(f, "load")?;
                if *ordering != AtomicOrdering::NotAtomic {
                    write!(f, " atomic")?;
                }
                if *volatile {
                    write!(f, " volatile")?;
                }
                write!(f, " {} {}", ptr.ty(), ptr)?;
                if *scope == SyncScope::SingleThread {
                    write!(f, " singlethread")?;
                }
                if let Some(kw) = ordering.keyword() {
                    write!(f, " {}", kw)?;
                }
                if *align != 0 {
                    write!(f, ", align {}", align)?;
                }
                Ok(())
            }
            InstrPayload::Store {
                value,
                ptr,
                volatile,
                align,
                ordering,
                scope,
            } => {
                write!(f, "store")?;
                if *ordering != AtomicOrdering::NotAtomic {
                    write!(f, " atomic")?;
                }
                if *volatile {
                    write!(f, " volatile")?;
                }
                write!(f, " {}, {} {}", typed(value), ptr.ty(), ptr)?;
                if *scope == SyncScope::SingleThread {
                    write!(f, " singlethread")?;
                }
                if let Some(kw) = ordering.keyword() {
                    write!(f, " {}", kw)?;
                }
                if *align != 0 {
                    write!(f, ", align {}", align)?;
                }
                Ok(())
            }
            InstrPayload::Fence { ordering, scope } => {
                write!(f, "fence")?;
                if *scope == SyncScope::SingleThread {
                    write!(f, " singlethread")?;
                }
                write!(f, " {}", ordering.keyword().unwrap_or("seq_cst"))
            }
            InstrPayload::CmpXchg {
                ptr,
                expected,
                replacement,
                volatile,
                success_ordering,
                failure_ordering,
                scope,
            } => {
                write!(f, "cmpxchg")?;
                if *volatile {
                    write!(f, " volatile")?;
                }
                write!(
                    f,
                    " {} {}, {}, {}",
                    ptr.ty(),
                    ptr,
                    typed(expected),
                    typed(replacement)
                )?;
                if *scope == SyncScope::SingleThread {
                    write!(f, " singlethread")?;
                }
                write!(
                    f,
                    " {} {}",
                    success_ordering.keyword().unwrap_or("seq_cst"),
                    failure_ordering.keyword().unwrap_or("seq_cst")
                )
            }
            InstrPayload::AtomicRmw {
                op,
                ptr,
                operand,
                volatile,
                ordering,
                scope,
            } => {
                write!(f, "atomicrmw")?;
                if *volatile {
                    write!(f, " volatile")?;
                }
                write!(f, " {} {} {}, {}", rmw_operator(*op), ptr.ty(), ptr, typed(operand))?;
                if *scope == SyncScope::SingleThread {
                    write!(f, " singlethread")?;
                }
                write!(f, " {}", ordering.keyword().unwrap_or("seq_cst"))
            }
            InstrPayload::Gep {
                base,
                indices,
                inbounds,
            } => {
                write!(f, "getelementptr")?;
                if *inbounds {
                    write!(f, " inbounds")?;
                }
                write!(f, " {} {}", base.ty(), base)?;
                for idx in indices.iter() {
                    write!(f, ", {}", typed(idx))?;
                }
                Ok(())
            }
            InstrPayload::Cast { op, value } => {
                write!(f, "{} {} to {}", cast_operator(*op), typed(value), self.ty)
            }
            InstrPayload::Select {
                cond,
                on_true,
                on_false,
            } => write!(
                f,
                "select {}, {}, {}",
                typed(cond),
                typed(on_true),
                typed(on_false)
            ),
            InstrPayload::Phi { incoming } => {
                write!(f, "phi {} ", self.ty)?;
                for (i, (v, pred)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[ {}, %{} ]", v, pred)?;
                }
                Ok(())
            }
            InstrPayload::Alloca {
                allocated,
                count,
                align,
            } => {
                write!(f, "alloca {}", allocated)?;
                if let Some(c) = count {
                    write!(f, ", {}", typed(c))?;
                }
                if *align != 0 {
                    write!(f, ", align {}", align)?;
                }
                Ok(())
            }
            InstrPayload::ExtractValue { agg, indices } => {
                write!(f, "extractvalue {}", typed(agg))?;
                for idx in indices.iter() {
                    write!(f, ", {}", idx)?;
                }
                Ok(())
            }
            InstrPayload::InsertValue {
                agg,
                value,
                indices,
            } => {
                write!(f, "insertvalue {}, {}", typed(agg), typed(value))?;
                for idx in indices.iter() {
                    write!(f, ", {}", idx)?;
                }
                Ok(())
            }
            InstrPayload::Call {
                callee,
                args,
                conv,
                attrs,
                tail,
            } => {
                if *tail {
                    write!(f, "tail ")?;
                }
                write!(f, "call ")?;
                if let Some(kw) = conv.keyword() {
                    write!(f, "{} ", kw)?;
                }
                let arg_list = args
                    .iter()
                    .map(|a| typed(a))
                    .collect::<Vec<String>>()
                    .join(", ");
                write!(f, "{} {}({})", self.ty, callee, arg_list)?;
                if !attrs.is_empty() {
                    write!(f, " {}", attrs)?;
                }
                Ok(())
            }
            InstrPayload::Ret { value } => match value {
                Some(v) => write!(f, "ret {}", typed(v)),
                None => write!(f, "ret void"),
            },
            InstrPayload::Br { dest } => write!(f, "br label %{}", dest),
            InstrPayload::CondBr {
                cond,
                on_true,
                on_false,
            } => write!(
                f,
                "br {}, label %{}, label %{}",
                typed(cond),
                on_true,
                on_false
            ),
            InstrPayload::Switch {
                value,
                default,
                cases,
            } => {
                write!(f, "switch {}, label %{} [", typed(value), default)?;
                for (c, dest) in cases.iter() {
                    write!(f, " {} {}, label %{}", c.ty(), c, dest)?;
                }
                write!(f, " ]")
            }
            InstrPayload::Invoke {
                callee,
                args,
                conv,
                attrs,
                normal,
                unwind,
            } => {
                write!(f, "invoke ")?;
                if let Some(kw) = conv.keyword() {
                    write!(f, "{} ", kw)?;
                }
                let arg_list = args
                    .iter()
                    .map(|a| typed(a))
                    .collect::<Vec<String>>()
                    .join(", ");
                write!(f, "{} {}({})", self.ty, callee, arg_list)?;
                if !attrs.is_empty() {
                    write!(f, " {}", attrs)?;
                }
                write!(f, " to label %{} unwind label %{}", normal, unwind)
            }
            InstrPayload::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub name: String,
    pub instrs: Vec<Instr>,
}

impl Block {
    pub fn terminator(&self) -> &Instr {
        let last = self
            .instrs
            .last()
            .expect("basic block must not be empty");
        assert!(
            last.payload.is_terminator(),
            "basic block '{}' does not end in a terminator",
            self.name
        );
        last
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        for instr in self.instrs.iter() {
            writeln!(f, "  {}", instr)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

/// Module-unique function identity. Stays unique across erase/create cycles,
/// so stale handles to erased functions never resurrect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub usize);

#[derive(Debug, Clone)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    pub ret_ty: Type,
    pub params: Vec<Param>,
    pub varargs: bool,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub conv: CallConv,
    pub attrs: AttrSet,
    pub gc: Option<String>,
    pub section: Option<String>,
    pub alignment: u32,
    /// Promises no program behavior depends on the code's address, which
    /// permits aliasing the body.
    pub unnamed_addr: bool,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn is_overridable(&self) -> bool {
        self.linkage.is_overridable()
    }

    pub fn signature_ty(&self) -> Type {
        Type::Fn(FnTypeData {
            ret: Box::new(self.ret_ty.clone()),
            params: self.params.iter().map(|p| p.ty.clone()).collect(),
            varargs: self.varargs,
        })
    }

    /// The type of the function's address, i.e. pointer-to-signature.
    pub fn ptr_ty(&self) -> Type {
        self.signature_ty().ptr_to(0)
    }

    pub fn entry_block(&self) -> &Block {
        self.blocks
            .first()
            .expect("function has no entry block")
    }

    pub fn get_block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn instrs(&self) -> impl Iterator<Item = &Instr> {
        self.blocks.iter().flat_map(|b| b.instrs.iter())
    }

    pub fn instrs_mut(&mut self) -> impl Iterator<Item = &mut Instr> {
        self.blocks.iter_mut().flat_map(|b| b.instrs.iter_mut())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            if self.is_declaration() {
                "declare"
            } else {
                "define"
            }
        )?;
        if let Some(kw) = self.linkage.keyword() {
            write!(f, " {}", kw)?;
        }
        if let Some(kw) = self.visibility.keyword() {
            write!(f, " {}", kw)?;
        }
        if let Some(kw) = self.conv.keyword() {
            write!(f, " {}", kw)?;
        }
        let params = self
            .params
            .iter()
            .map(|p| {
                if p.name.is_empty() {
                    p.ty.to_string()
                } else {
                    format!("{} %{}", p.ty, p.name)
                }
            })
            .collect::<Vec<String>>();
        let mut param_list = params.join(", ");
        if self.varargs {
            if param_list.is_empty() {
                param_list = "...".to_string();
            } else {
                param_list.push_str(", ...");
            }
        }
        write!(f, " {} @{}({})", self.ret_ty, self.name, param_list)?;
        if !self.attrs.is_empty() {
            write!(f, " {}", self.attrs)?;
        }
        if self.unnamed_addr {
            write!(f, " unnamed_addr")?;
        }
        if let Some(section) = &self.section {
            write!(f, " section \"{}\"", section)?;
        }
        if let Some(gc) = &self.gc {
            write!(f, " gc \"{}\"", gc)?;
        }
        if self.alignment != 0 {
            write!(f, " align {}", self.alignment)?;
        }
        if self.is_declaration() {
            return Ok(());
        }
        writeln!(f, " {{")?;
        for (i, block) in self.blocks.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", block)?;
        }
        write!(f, "}}")
    }
}

/// A second symbol bound to the address of an existing one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalAlias {
    pub name: String,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub ty: Type,
    pub aliasee: Constant,
}

impl fmt::Display for GlobalAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} =", self.name)?;
        if let Some(kw) = self.linkage.keyword() {
            write!(f, " {}", kw)?;
        }
        if let Some(kw) = self.visibility.keyword() {
            write!(f, " {}", kw)?;
        }
        write!(f, " alias {} {}", self.ty, self.aliasee)
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub layout: Option<DataLayout>,
    pub functions: Vec<Function>,
    pub aliases: Vec<GlobalAlias>,
    next_id: usize,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Module {
            name: name.to_string(),
            layout: None,
            functions: Vec::new(),
            aliases: Vec::new(),
            next_id: 0,
        }
    }

    /// Adds a function, assigning it a fresh module-unique id.
    pub fn add_function(&mut self, mut f: Function) -> FuncId {
        let id = FuncId(self.next_id);
        self.next_id += 1;
        f.id = id;
        self.functions.push(f);
        id
    }

    pub fn get_fn(&self, id: FuncId) -> Option<&Function> {
        self.functions.iter().find(|f| f.id == id)
    }

    pub fn get_fn_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.id == id)
    }

    pub fn get_fn_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Whether the handle still names a function in this module. Handles to
    /// erased functions report dead even if the name was reused.
    pub fn is_live(&self, id: FuncId) -> bool {
        self.get_fn(id).is_some()
    }

    /// Removes the function from the module. Erasing an unknown id is an
    /// internal invariant violation.
    pub fn erase_fn(&mut self, id: FuncId) -> Function {
        let idx = self
            .functions
            .iter()
            .position(|f| f.id == id)
            .expect("erase_fn: function not in module");
        self.functions.remove(idx)
    }

    pub fn add_alias(&mut self, alias: GlobalAlias) {
        self.aliases.push(alias);
    }

    pub fn get_alias(&self, name: &str) -> Option<&GlobalAlias> {
        self.aliases.iter().find(|a| a.name == name)
    }

    /// Function ids in module order.
    pub fn fn_ids(&self) -> Vec<FuncId> {
        self.functions.iter().map(|f| f.id).collect()
    }

    fn symbol_exists(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
            || self.aliases.iter().any(|a| a.name == name)
    }

    /// Returns `base` if free, otherwise `base.1`, `base.2`, ...
    pub fn unique_name(&self, base: &str) -> String {
        if !self.symbol_exists(base) {
            return base.to_string();
        }
        let mut i = 1usize;
        loop {
            let candidate = format!("{}.{}", base, i);
            if !self.symbol_exists(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        if let Some(layout) = &self.layout {
            for (space, bits) in layout.pointer_bits.iter() {
                if *space == 0 {
                    writeln!(f, "pointersize {}", bits)?;
                } else {
                    writeln!(f, "pointersize addrspace({}) {}", space, bits)?;
                }
            }
        }
        for alias in self.aliases.iter() {
            writeln!(f)?;
            writeln!(f, "{}", alias)?;
        }
        for func in self.functions.iter() {
            writeln!(f)?;
            writeln!(f, "{}", func)?;
        }
        Ok(())
    }
}

/// Computes the result type of an address computation over `base` with the
/// given indices: the first index steps over the pointee, later indices walk
/// into aggregates. Struct steps require constant integer indices.
pub fn gep_result_type(base: &Type, indices: &[Value]) -> Result<Type, String> {
    let (pointee, address_space) = match base {
        Type::Pointer(p) => (p.pointee.as_ref(), p.address_space),
        _ => return Err(format!("getelementptr base is not a pointer: {}", base)),
    };
    let mut cur = pointee.clone();
    for idx in indices.iter().skip(1) {
        cur = match cur {
            Type::Struct { fields, .. } => {
                let field = match idx {
                    Value::Const(Constant::Int { value, .. }) => *value as usize,
                    _ => {
                        return Err(
                            "getelementptr struct index must be a constant integer".to_string()
                        )
                    }
                };
                fields
                    .get(field)
                    .cloned()
                    .ok_or_else(|| format!("struct index {} out of range", field))?
            }
            Type::Array { elem, .. } | Type::Vector { elem, .. } => *elem,
            other => {
                return Err(format!(
                    "getelementptr cannot index into type {}",
                    other
                ))
            }
        };
    }
    Ok(cur.ptr_to(address_space))
}

/// Computes the type selected by an aggregate index path, for
/// extractvalue/insertvalue.
pub fn aggregate_field_type(agg: &Type, indices: &[u32]) -> Result<Type, String> {
    let mut cur = agg.clone();
    for idx in indices.iter() {
        cur = match cur {
            Type::Struct { fields, .. } => fields
                .get(*idx as usize)
                .cloned()
                .ok_or_else(|| format!("struct index {} out of range", idx))?,
            Type::Array { elem, len } => {
                if (*idx as u64) >= len {
                    return Err(format!("array index {} out of range", idx));
                }
                *elem
            }
            other => return Err(format!("cannot index into non-aggregate type {}", other)),
        };
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lossless_bitcast_rules() {
        let i64t = Type::Int(64);
        let f64t = Type::Float(FloatKind::Double);
        let p0 = Type::Int(8).ptr_to(0);
        let q0 = Type::Int(32).ptr_to(0);
        let p1 = Type::Int(8).ptr_to(1);
        assert!(losslessly_bitcastable(&i64t, &f64t));
        assert!(losslessly_bitcastable(&p0, &q0));
        assert!(!losslessly_bitcastable(&p0, &p1));
        assert!(!losslessly_bitcastable(&i64t, &p0));
        assert!(!losslessly_bitcastable(&Type::Int(32), &i64t));
    }

    #[test]
    fn constant_bitcast_folds_int_float() {
        let c = Constant::Int {
            ty: Type::Int(64),
            value: 0x3ff0000000000000,
        };
        let folded = c.bitcast_to(&Type::Float(FloatKind::Double)).unwrap();
        match folded {
            Constant::Float { bits, .. } => assert_eq!(bits, 0x3ff0000000000000),
            other => panic!("expected float constant, got {:?}", other),
        }
    }

    #[test]
    fn gep_result_type_walks_structs_and_arrays() {
        let inner = Type::Struct {
            packed: false,
            fields: vec![Type::Int(32), Type::Int(8)],
        };
        let agg = Type::Array {
            elem: Box::new(inner),
            len: 4,
        };
        let base = agg.ptr_to(0);
        let indices = vec![
            Value::Const(Constant::Int {
                ty: Type::Int(64),
                value: 0,
            }),
            Value::Const(Constant::Int {
                ty: Type::Int(64),
                value: 2,
            }),
            Value::Const(Constant::Int {
                ty: Type::Int(32),
                value: 1,
            }),
        ];
        let result = gep_result_type(&base, &indices).unwrap();
        assert_eq!(result, Type::Int(8).ptr_to(0));
    }

    #[test]
    fn display_forms() {
        let ty = Type::Fn(FnTypeData {
            ret: Box::new(Type::Int(32)),
            params: vec![Type::Int(8).ptr_to(0)],
            varargs: true,
        });
        assert_eq!(ty.to_string(), "i32 (i8*, ...)");
        let c = Constant::Int {
            ty: Type::Int(8),
            value: 0xff,
        };
        assert_eq!(c.to_string(), "-1");
    }
}
