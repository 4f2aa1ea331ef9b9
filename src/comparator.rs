// SPDX-License-Identifier: Apache-2.0

//! Deep structural equivalence of two functions: would they generate the
//! same machine code?
//!
//! The comparator errs on the side of "different". It carries a running
//! bijection between the two functions' value spaces: the Nth value defined
//! in one body must consistently correspond to the Nth value defined in the
//! other at every use site. Blocks are walked in paired CFG order starting
//! from the entries, so unreachable blocks never influence the answer.

use std::collections::{HashMap, HashSet};

use crate::ir::{Block, Constant, Function, Instr, InstrPayload, Type, Value};
use crate::layout::DataLayout;
use crate::type_order::types_equivalent;

pub struct FunctionComparator<'a> {
    layout: Option<&'a DataLayout>,
    f1: &'a Function,
    f2: &'a Function,
    /// Forward mapping from values of `f1` to values of `f2`, plus the set
    /// of `f2` values already claimed by some `f1` value. Together they keep
    /// the mapping a partial injection.
    forward: HashMap<Value, Value>,
    claimed: HashSet<Value>,
}

impl<'a> FunctionComparator<'a> {
    pub fn new(layout: Option<&'a DataLayout>, f1: &'a Function, f2: &'a Function) -> Self {
        FunctionComparator {
            layout,
            f1,
            f2,
            forward: HashMap::new(),
            claimed: HashSet::new(),
        }
    }

    fn type_eq(&self, a: &Type, b: &Type) -> bool {
        types_equivalent(a, b, self.layout)
    }

    /// Records or re-checks a value pair. Accepts exactly when the pair is
    /// consistent with every pair seen so far in this comparison.
    fn enumerate(&mut self, v1: &Value, v2: &Value) -> bool {
        // The functions under comparison may refer to themselves or to each
        // other; all four combinations are consistent if the bodies match.
        let names_fn = |v: &Value, f: &Function| {
            matches!(v, Value::Const(Constant::Global { name, .. }) if name == &f.name)
        };
        if names_fn(v1, self.f1) && names_fn(v2, self.f2) {
            return true;
        }
        if names_fn(v1, self.f2) && names_fn(v2, self.f1) {
            return true;
        }

        if let Value::Const(c1) = v1 {
            if v1 == v2 {
                return true;
            }
            let c2 = match v2 {
                Value::Const(c2) => c2,
                _ => return false,
            };
            if c1.is_null() && c2.is_null() && self.type_eq(c1.ty(), c2.ty()) {
                return true;
            }
            // Accept when reinterpreting c2 at c1's type folds to exactly c1.
            // Symbolic constant expressions never fold, so they only match
            // under the identity test above.
            return match c2.bitcast_to(c1.ty()) {
                Some(folded) => &folded == c1,
                None => false,
            };
        }

        if matches!(v1, Value::Asm { .. }) || matches!(v2, Value::Asm { .. }) {
            return v1 == v2;
        }

        if let Some(image) = self.forward.get(v1) {
            return image == v2;
        }
        if !self.claimed.insert(v2.clone()) {
            return false;
        }
        self.forward.insert(v1.clone(), v2.clone());
        true
    }

    /// Per-instruction agreement on everything except operand values:
    /// opcode, operand count, result and operand types, the uniformly-held
    /// optional flag bits, and the opcode-specific subclass data.
    fn same_operation(&self, i1: &Instr, i2: &Instr) -> bool {
        let p1 = &i1.payload;
        let p2 = &i2.payload;
        if p1.operator() != p2.operator() {
            return false;
        }
        let ops1 = p1.operands();
        let ops2 = p2.operands();
        if ops1.len() != ops2.len() {
            return false;
        }
        if !self.type_eq(&i1.ty, &i2.ty) {
            return false;
        }
        if p1.optional_flags() != p2.optional_flags() {
            return false;
        }
        for (o1, o2) in ops1.iter().zip(ops2.iter()) {
            if !self.type_eq(&o1.ty(), &o2.ty()) {
                return false;
            }
        }

        match (p1, p2) {
            (
                InstrPayload::Load {
                    volatile: v1,
                    align: a1,
                    ordering: o1,
                    scope: s1,
                    ..
                },
                InstrPayload::Load {
                    volatile: v2,
                    align: a2,
                    ordering: o2,
                    scope: s2,
                    ..
                },
            ) => v1 == v2 && a1 == a2 && o1 == o2 && s1 == s2,
            (
                InstrPayload::Store {
                    volatile: v1,
                    align: a1,
                    ordering: o1,
                    scope: s1,
                    ..
                },
                InstrPayload::Store {
                    volatile: v2,
                    align: a2,
                    ordering: o2,
                    scope: s2,
                    ..
                },
            ) => v1 == v2 && a1 == a2 && o1 == o2 && s1 == s2,
            (InstrPayload::Icmp { pred: a, .. }, InstrPayload::Icmp { pred: b, .. }) => a == b,
            (InstrPayload::Fcmp { pred: a, .. }, InstrPayload::Fcmp { pred: b, .. }) => a == b,
            (
                InstrPayload::Call {
                    conv: c1, attrs: a1, ..
                },
                InstrPayload::Call {
                    conv: c2, attrs: a2, ..
                },
            ) => c1 == c2 && a1 == a2,
            (
                InstrPayload::Invoke {
                    conv: c1, attrs: a1, ..
                },
                InstrPayload::Invoke {
                    conv: c2, attrs: a2, ..
                },
            ) => c1 == c2 && a1 == a2,
            (
                InstrPayload::ExtractValue { indices: x, .. },
                InstrPayload::ExtractValue { indices: y, .. },
            ) => x == y,
            (
                InstrPayload::InsertValue { indices: x, .. },
                InstrPayload::InsertValue { indices: y, .. },
            ) => x == y,
            (
                InstrPayload::Fence {
                    ordering: o1,
                    scope: s1,
                },
                InstrPayload::Fence {
                    ordering: o2,
                    scope: s2,
                },
            ) => o1 == o2 && s1 == s2,
            (
                InstrPayload::CmpXchg {
                    volatile: v1,
                    success_ordering: so1,
                    failure_ordering: fo1,
                    scope: s1,
                    ..
                },
                InstrPayload::CmpXchg {
                    volatile: v2,
                    success_ordering: so2,
                    failure_ordering: fo2,
                    scope: s2,
                    ..
                },
            ) => v1 == v2 && so1 == so2 && fo1 == fo2 && s1 == s2,
            (
                InstrPayload::AtomicRmw {
                    op: op1,
                    volatile: v1,
                    ordering: o1,
                    scope: s1,
                    ..
                },
                InstrPayload::AtomicRmw {
                    op: op2,
                    volatile: v2,
                    ordering: o2,
                    scope: s2,
                    ..
                },
            ) => op1 == op2 && v1 == v2 && o1 == o2 && s1 == s2,
            _ => true,
        }
    }

    /// Address computations get their own comparison: same address space,
    /// then (with a layout oracle) equal constant byte offsets suffice;
    /// otherwise identical base pointer type and pairwise-consistent
    /// operands.
    fn gep_equivalent(&mut self, i1: &Instr, i2: &Instr) -> bool {
        let (b1, x1) = match &i1.payload {
            InstrPayload::Gep { base, indices, .. } => (base.clone(), indices.clone()),
            _ => unreachable!("gep_equivalent on a non-gep instruction"),
        };
        let (b2, x2) = match &i2.payload {
            InstrPayload::Gep { base, indices, .. } => (base.clone(), indices.clone()),
            _ => unreachable!("gep_equivalent on a non-gep instruction"),
        };
        let t1 = b1.ty();
        let t2 = b2.ty();
        let space = |t: &Type| match t {
            Type::Pointer(p) => Some(p.address_space),
            _ => None,
        };
        match (space(&t1), space(&t2)) {
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }

        if let Some(dl) = self.layout {
            if let (Some(o1), Some(o2)) = (
                dl.gep_constant_offset(&t1, &x1),
                dl.gep_constant_offset(&t2, &x2),
            ) {
                return o1 == o2;
            }
        }

        // No collapsed form: require the same base pointer type (identity,
        // not equivalence) and consistent operands.
        if t1 != t2 {
            return false;
        }
        if x1.len() != x2.len() {
            return false;
        }
        for (o1, o2) in std::iter::once(&b1)
            .chain(x1.iter())
            .zip(std::iter::once(&b2).chain(x2.iter()))
        {
            if !self.enumerate(o1, o2) {
                return false;
            }
        }
        true
    }

    /// Lock-step comparison of one block pair.
    fn blocks_equivalent(&mut self, b1: &Block, b2: &Block) -> bool {
        if b1.instrs.len() != b2.instrs.len() {
            return false;
        }
        for (i1, i2) in b1.instrs.iter().zip(b2.instrs.iter()) {
            // Pair the instruction results themselves before their operands.
            match (i1.result(), i2.result()) {
                (Some(r1), Some(r2)) => {
                    if !self.enumerate(&r1, &r2) {
                        return false;
                    }
                }
                (None, None) => {}
                _ => return false,
            }

            let gep1 = matches!(i1.payload, InstrPayload::Gep { .. });
            let gep2 = matches!(i2.payload, InstrPayload::Gep { .. });
            if gep1 != gep2 {
                return false;
            }
            if gep1 {
                let (base1, base2) = match (&i1.payload, &i2.payload) {
                    (
                        InstrPayload::Gep { base: a, .. },
                        InstrPayload::Gep { base: b, .. },
                    ) => (a.clone(), b.clone()),
                    _ => unreachable!(),
                };
                if !self.enumerate(&base1, &base2) {
                    return false;
                }
                if !self.gep_equivalent(i1, i2) {
                    return false;
                }
            } else {
                if !self.same_operation(i1, i2) {
                    return false;
                }
                let ops1 = i1.payload.operands();
                let ops2 = i2.payload.operands();
                for (o1, o2) in ops1.iter().zip(ops2.iter()) {
                    if !self.enumerate(o1, o2) {
                        return false;
                    }
                    if o1.kind_tag() != o2.kind_tag() || !self.type_eq(&o1.ty(), &o2.ty()) {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Whole-function equivalence: header checks first for fast rejection,
    /// then a paired CFG walk from the entry blocks.
    pub fn functions_equivalent(&mut self) -> bool {
        let f1 = self.f1;
        let f2 = self.f2;

        if f1.attrs != f2.attrs {
            return false;
        }
        if f1.gc.is_some() != f2.gc.is_some() {
            return false;
        }
        if f1.gc.is_some() && f1.gc != f2.gc {
            return false;
        }
        if f1.section.is_some() != f2.section.is_some() {
            return false;
        }
        if f1.section.is_some() && f1.section != f2.section {
            return false;
        }
        if f1.varargs != f2.varargs {
            return false;
        }
        if f1.conv != f2.conv {
            return false;
        }
        if !self.type_eq(&f1.signature_ty(), &f2.signature_ty()) {
            return false;
        }
        assert_eq!(
            f1.params.len(),
            f2.params.len(),
            "equivalently typed functions disagree on parameter count"
        );

        // Seed the bijection with the formal parameters in declaration
        // order.
        for (p1, p2) in f1.params.iter().zip(f2.params.iter()) {
            let a1 = Value::Arg {
                name: p1.name.clone(),
                ty: p1.ty.clone(),
            };
            let a2 = Value::Arg {
                name: p2.name.clone(),
                ty: p2.ty.clone(),
            };
            let fresh = self.enumerate(&a1, &a2);
            assert!(fresh, "parameter enumeration repeated a value");
        }

        // Paired walk from the entries; the visited set is in terms of f1's
        // blocks. Blocks never reached from the entry are never compared.
        let mut stack1: Vec<&Block> = vec![f1.entry_block()];
        let mut stack2: Vec<&Block> = vec![f2.entry_block()];
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(f1.entry_block().name.as_str());

        while let Some(b1) = stack1.pop() {
            let b2 = stack2.pop().expect("paired block stacks out of step");
            let l1 = Value::Label {
                name: b1.name.clone(),
            };
            let l2 = Value::Label {
                name: b2.name.clone(),
            };
            if !self.enumerate(&l1, &l2) || !self.blocks_equivalent(b1, b2) {
                return false;
            }

            let t1 = b1.terminator();
            let t2 = b2.terminator();
            let s1 = t1.payload.successors();
            let s2 = t2.payload.successors();
            assert_eq!(
                s1.len(),
                s2.len(),
                "equivalent terminators disagree on successor count"
            );
            for (d1, d2) in s1.iter().zip(s2.iter()) {
                let dest1 = f1
                    .get_block(d1)
                    .expect("terminator branches to an unknown block");
                if !visited.insert(dest1.name.as_str()) {
                    continue;
                }
                let dest2 = f2
                    .get_block(d2)
                    .expect("terminator branches to an unknown block");
                stack1.push(dest1);
                stack2.push(dest2);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Module;
    use crate::ir_parser::Parser;

    fn parse(text: &str) -> Module {
        Parser::new(text).parse_module().unwrap()
    }

    fn equivalent(m: &Module, a: &str, b: &str) -> bool {
        let fa = m.get_fn_by_name(a).unwrap();
        let fb = m.get_fn_by_name(b).unwrap();
        FunctionComparator::new(m.layout.as_ref(), fa, fb).functions_equivalent()
    }

    #[test]
    fn alpha_equivalent_bodies_match() {
        let m = parse(
            r#"module t

define i32 @a(i32 %x, i32 %y) {
entry:
  %s = add nsw i32 %x, %y
  %t = mul i32 %s, %x
  ret i32 %t
}

define i32 @b(i32 %p, i32 %q) {
entry:
  %u = add nsw i32 %p, %q
  %v = mul i32 %u, %p
  ret i32 %v
}
"#,
        );
        assert!(equivalent(&m, "a", "b"));
    }

    #[test]
    fn operand_order_is_tracked_by_the_bijection() {
        let m = parse(
            r#"module t

define i32 @a(i32 %x, i32 %y) {
entry:
  %s = sub i32 %x, %y
  ret i32 %s
}

define i32 @b(i32 %p, i32 %q) {
entry:
  %s = sub i32 %q, %p
  ret i32 %s
}
"#,
        );
        assert!(!equivalent(&m, "a", "b"));
    }

    #[test]
    fn wrap_flags_must_agree() {
        let m = parse(
            r#"module t

define i32 @a(i32 %x) {
entry:
  %s = add nsw i32 %x, 1
  ret i32 %s
}

define i32 @b(i32 %x) {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}
"#,
        );
        assert!(!equivalent(&m, "a", "b"));
    }

    #[test]
    fn volatile_and_ordering_must_agree() {
        let m = parse(
            r#"module t

define i32 @a(i32* %p) {
entry:
  %v = load i32* %p, align 4
  ret i32 %v
}

define i32 @b(i32* %p) {
entry:
  %v = load volatile i32* %p, align 4
  ret i32 %v
}

define i32 @c(i32* %p) {
entry:
  %v = load atomic i32* %p acquire, align 4
  ret i32 %v
}
"#,
        );
        assert!(!equivalent(&m, "a", "b"));
        assert!(!equivalent(&m, "a", "c"));
    }

    #[test]
    fn self_and_mutual_recursion_are_consistent() {
        let m = parse(
            r#"module t

define i32 @a(i32 %x) {
entry:
  %r = call i32 @a(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}

define i32 @b(i32 %x) {
entry:
  %r = call i32 @b(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}

define i32 @c(i32 %x) {
entry:
  %r = call i32 @d(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}

define i32 @d(i32 %x) {
entry:
  %r = call i32 @c(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}
"#,
        );
        assert!(equivalent(&m, "a", "b"));
        assert!(equivalent(&m, "c", "d"));
    }

    #[test]
    fn calls_to_distinct_third_functions_differ() {
        let m = parse(
            r#"module t

declare i32 @ext1(i32 %x)

declare i32 @ext2(i32 %x)

define i32 @a(i32 %x) {
entry:
  %r = call i32 @ext1(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}

define i32 @b(i32 %x) {
entry:
  %r = call i32 @ext2(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}
"#,
        );
        assert!(!equivalent(&m, "a", "b"));
    }

    #[test]
    fn pointer_and_intptr_bodies_match_only_under_a_layout() {
        let text_with = r#"module t
pointersize 64

define void @a(i8* %v, i8** %slot) {
entry:
  store i8* %v, i8** %slot
  ret void
}

define void @b(i64 %v, i64* %slot) {
entry:
  store i64 %v, i64* %slot
  ret void
}
"#;
        let m = parse(text_with);
        assert!(equivalent(&m, "a", "b"));
        let no_layout = parse(&text_with.replace("pointersize 64\n", ""));
        assert!(!equivalent(&no_layout, "a", "b"));
    }

    #[test]
    fn gep_offsets_collapse_under_a_layout() {
        let m = parse(
            r#"module t
pointersize 64

define i32* @a({ i64, i32 }* %p) {
entry:
  %q = getelementptr { i64, i32 }* %p, i64 0, i32 1
  ret i32* %q
}

define i32* @b([4 x i32]* %p) {
entry:
  %q = getelementptr [4 x i32]* %p, i64 0, i64 2
  ret i32* %q
}
"#,
        );
        // Both address computations collapse to byte offset 8.
        assert!(equivalent(&m, "a", "b"));
    }

    #[test]
    fn branchy_cfgs_walk_in_lock_step() {
        let m = parse(
            r#"module t

define i32 @a(i1 %c, i32 %x) {
entry:
  br i1 %c, label %then, label %else

then:
  %t = add i32 %x, 1
  br label %join

else:
  %e = mul i32 %x, 3
  br label %join

join:
  %r = phi i32 [ %t, %then ], [ %e, %else ]
  ret i32 %r
}

define i32 @b(i1 %k, i32 %v) {
entry:
  br i1 %k, label %yes, label %no

yes:
  %t = add i32 %v, 1
  br label %out

no:
  %e = mul i32 %v, 3
  br label %out

out:
  %r = phi i32 [ %t, %yes ], [ %e, %no ]
  ret i32 %r
}

define i32 @swapped(i1 %k, i32 %v) {
entry:
  br i1 %k, label %yes, label %no

yes:
  %t = mul i32 %v, 3
  br label %out

no:
  %e = add i32 %v, 1
  br label %out

out:
  %r = phi i32 [ %t, %yes ], [ %e, %no ]
  ret i32 %r
}
"#,
        );
        assert!(equivalent(&m, "a", "b"));
        assert!(!equivalent(&m, "a", "swapped"));
    }

    #[test]
    fn unreachable_block_contents_do_not_matter() {
        let m = parse(
            r#"module t

define i32 @a(i32 %x) {
entry:
  %s = add i32 %x, 2
  %t = mul i32 %s, %s
  ret i32 %t

dead:
  %u = sub i32 %x, 7
  ret i32 %u
}

define i32 @b(i32 %x) {
entry:
  %s = add i32 %x, 2
  %t = mul i32 %s, %s
  ret i32 %t

dead:
  %u = udiv i32 %x, 3
  ret i32 %u
}
"#,
        );
        assert!(equivalent(&m, "a", "b"));
    }

    #[test]
    fn header_differences_reject_before_the_walk() {
        let m = parse(
            r#"module t

define i32 @base(i32 %x) {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}

define fastcc i32 @conv(i32 %x) {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}

define i32 @attrs(i32 %x) nounwind {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}

define i32 @sect(i32 %x) section ".text.hot" {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}

define i32 @gcfn(i32 %x) gc "statepoint" {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}
"#,
        );
        assert!(!equivalent(&m, "base", "conv"));
        assert!(!equivalent(&m, "base", "attrs"));
        assert!(!equivalent(&m, "base", "sect"));
        assert!(!equivalent(&m, "base", "gcfn"));
    }
}
