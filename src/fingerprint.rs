// SPDX-License-Identifier: Apache-2.0

//! Cheap structural fingerprint used to bin functions before deep
//! comparison. Two functions that the deep comparator would accept always
//! fingerprint identically; the converse is not required.

use crate::ir::{CallConv, Function, Type};
use crate::type_order::kind_tag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

fn update_hash_u64(hasher: &mut blake3::Hasher, x: u64) {
    hasher.update(&x.to_le_bytes());
}

fn update_hash_bool(hasher: &mut blake3::Hasher, x: bool) {
    update_hash_u64(hasher, if x { 1 } else { 0 });
}

/// Type kind tag with pointers mapped to the integer kind: the deep
/// comparator treats pointers and pointer-sized integers as the same type,
/// so the fingerprint must not tell them apart.
fn hash_kind_tag(ty: &Type) -> u64 {
    let tag = if ty.is_pointer() {
        kind_tag(&Type::Int(0))
    } else {
        kind_tag(ty)
    };
    tag as u64
}

fn conv_tag(conv: CallConv) -> u64 {
    match conv {
        CallConv::C => 0,
        CallConv::Fast => 1,
        CallConv::Cold => 2,
    }
}

/// Hashes the shape of a function without looking at its instructions:
/// block count, calling convention, GC presence, variadicity, and the kind
/// tags of the return and parameter types.
pub fn fingerprint(f: &Function) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    update_hash_u64(&mut hasher, f.blocks.len() as u64);
    update_hash_u64(&mut hasher, conv_tag(f.conv));
    update_hash_bool(&mut hasher, f.gc.is_some());
    update_hash_bool(&mut hasher, f.varargs);
    update_hash_u64(&mut hasher, hash_kind_tag(&f.ret_ty));
    for param in f.params.iter() {
        update_hash_u64(&mut hasher, hash_kind_tag(&param.ty));
    }
    let digest = hasher.finalize();
    let mut first8 = [0u8; 8];
    first8.copy_from_slice(&digest.as_bytes()[..8]);
    Fingerprint(u64::from_le_bytes(first8))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser::Parser;

    fn parse(text: &str) -> crate::ir::Module {
        Parser::new(text).parse_module().unwrap()
    }

    #[test]
    fn pointer_and_integer_params_hash_alike() {
        let m = parse(
            r#"module t

define i64 @a(i8* %p) {
entry:
  %v = ptrtoint i8* %p to i64
  %w = add i64 %v, 1
  ret i64 %w
}

define i64 @b(i64 %p) {
entry:
  %w = add i64 %p, 1
  %x = add i64 %w, 0
  ret i64 %x
}
"#,
        );
        let a = m.get_fn_by_name("a").unwrap();
        let b = m.get_fn_by_name("b").unwrap();
        assert_eq!(fingerprint(a), fingerprint(b));
    }

    #[test]
    fn body_differences_do_not_change_the_fingerprint() {
        let m = parse(
            r#"module t

define i32 @a(i32* %p) {
entry:
  %v = load i32* %p
  ret i32 %v
}

define i32 @b(i32* %p) {
entry:
  %v = load volatile i32* %p
  ret i32 %v
}
"#,
        );
        assert_eq!(
            fingerprint(m.get_fn_by_name("a").unwrap()),
            fingerprint(m.get_fn_by_name("b").unwrap())
        );
    }

    #[test]
    fn block_count_and_conv_change_the_fingerprint() {
        let m = parse(
            r#"module t

define void @a() {
entry:
  ret void
}

define void @b() {
entry:
  br label %next

next:
  ret void
}

define fastcc void @c() {
entry:
  ret void
}
"#,
        );
        let a = fingerprint(m.get_fn_by_name("a").unwrap());
        let b = fingerprint(m.get_fn_by_name("b").unwrap());
        let c = fingerprint(m.get_fn_by_name("c").unwrap());
        assert_ne!(a, b);
        assert_ne!(a, c);
    }
}
