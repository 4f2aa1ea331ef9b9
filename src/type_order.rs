// SPDX-License-Identifier: Apache-2.0

//! Total order on IR types, treating a pointer in address space 0 and the
//! pointer-sized integer as the same type whenever a layout oracle is
//! available. This order is what makes "pointers and integers of equal width
//! generate the same code" usable as an equivalence relation.

use std::cmp::Ordering;

use crate::ir::{FloatKind, Type};
use crate::layout::DataLayout;

/// Numeric tag for each type kind; kinds order by tag before any
/// kind-specific comparison happens.
pub(crate) fn kind_tag(ty: &Type) -> u32 {
    match ty {
        Type::Void => 0,
        Type::Float(FloatKind::Single) => 1,
        Type::Float(FloatKind::Double) => 2,
        Type::Float(FloatKind::X86Fp80) => 3,
        Type::Float(FloatKind::Fp128) => 4,
        Type::Float(FloatKind::PpcFp128) => 5,
        Type::Label => 6,
        Type::Metadata => 7,
        Type::Int(_) => 8,
        Type::Fn(_) => 9,
        Type::Struct { .. } => 10,
        Type::Array { .. } => 11,
        Type::Pointer(_) => 12,
        Type::Vector { .. } => 13,
    }
}

fn coerced(ty: &Type, layout: Option<&DataLayout>) -> Type {
    if let (Type::Pointer(p), Some(dl)) = (ty, layout) {
        if p.address_space == 0 {
            return dl.int_ptr_type(0);
        }
    }
    ty.clone()
}

/// Three-way comparison defining a total order over types.
///
/// Stages, earlier stages deciding first:
///
/// 0. Pointers in address space 0 are replaced by the pointer-sized integer
///    when a layout oracle is present; identical types compare equal.
/// 1. Different kinds order by kind tag.
/// 2. Integers order by width; vectors by length then element type. Two such
///    types are equal exactly when they are the same type.
/// 3. Void, label, metadata, and each floating-point kind are singletons:
///    same kind means equal.
/// 4. Pointers that survived coercion order by address-space index; the
///    pointee is deliberately ignored.
/// 5. Structs, function types, and arrays compare their shape, then their
///    element types recursively.
pub fn cmp_types(a: &Type, b: &Type, layout: Option<&DataLayout>) -> Ordering {
    let a = coerced(a, layout);
    let b = coerced(b, layout);

    if a == b {
        return Ordering::Equal;
    }

    let tag_order = kind_tag(&a).cmp(&kind_tag(&b));
    if tag_order != Ordering::Equal {
        return tag_order;
    }

    match (&a, &b) {
        (Type::Int(wa), Type::Int(wb)) => wa.cmp(wb),
        (Type::Vector { elem: ea, len: la }, Type::Vector { elem: eb, len: lb }) => {
            la.cmp(lb).then_with(|| cmp_types(ea, eb, layout))
        }
        (Type::Void, Type::Void)
        | (Type::Label, Type::Label)
        | (Type::Metadata, Type::Metadata)
        | (Type::Float(_), Type::Float(_)) => Ordering::Equal,
        (Type::Pointer(pa), Type::Pointer(pb)) => pa.address_space.cmp(&pb.address_space),
        (
            Type::Struct {
                packed: ka,
                fields: fa,
            },
            Type::Struct {
                packed: kb,
                fields: fb,
            },
        ) => {
            let shape = fa.len().cmp(&fb.len()).then_with(|| ka.cmp(kb));
            if shape != Ordering::Equal {
                return shape;
            }
            for (ta, tb) in fa.iter().zip(fb.iter()) {
                let field_order = cmp_types(ta, tb, layout);
                if field_order != Ordering::Equal {
                    return field_order;
                }
            }
            Ordering::Equal
        }
        (Type::Fn(da), Type::Fn(db)) => {
            let shape = da
                .params
                .len()
                .cmp(&db.params.len())
                .then_with(|| da.varargs.cmp(&db.varargs))
                .then_with(|| cmp_types(&da.ret, &db.ret, layout));
            if shape != Ordering::Equal {
                return shape;
            }
            for (ta, tb) in da.params.iter().zip(db.params.iter()) {
                let param_order = cmp_types(ta, tb, layout);
                if param_order != Ordering::Equal {
                    return param_order;
                }
            }
            Ordering::Equal
        }
        (Type::Array { elem: ea, len: la }, Type::Array { elem: eb, len: lb }) => {
            la.cmp(lb).then_with(|| cmp_types(ea, eb, layout))
        }
        _ => unreachable!("cmp_types: kinds matched but variants differ"),
    }
}

pub fn types_equivalent(a: &Type, b: &Type, layout: Option<&DataLayout>) -> bool {
    cmp_types(a, b, layout) == Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FnTypeData;

    #[test]
    fn pointer_equals_intptr_only_with_layout() {
        let dl = DataLayout::new(64);
        let ptr = Type::Int(8).ptr_to(0);
        let i64t = Type::Int(64);
        assert!(types_equivalent(&ptr, &i64t, Some(&dl)));
        assert!(!types_equivalent(&ptr, &i64t, None));
        assert!(!types_equivalent(&ptr, &Type::Int(32), Some(&dl)));
    }

    #[test]
    fn nonzero_address_space_pointers_ignore_pointee() {
        let dl = DataLayout::new(64);
        let a = Type::Int(8).ptr_to(1);
        let b = Type::Int(32).ptr_to(1);
        let c = Type::Int(8).ptr_to(2);
        assert!(types_equivalent(&a, &b, Some(&dl)));
        assert_eq!(cmp_types(&a, &c, Some(&dl)), Ordering::Less);
    }

    #[test]
    fn total_order_is_antisymmetric_across_kinds() {
        let types = [
            Type::Void,
            Type::Float(FloatKind::Double),
            Type::Int(1),
            Type::Int(32),
            Type::Int(8).ptr_to(1),
            Type::Struct {
                packed: false,
                fields: vec![Type::Int(32)],
            },
        ];
        for a in types.iter() {
            for b in types.iter() {
                let ab = cmp_types(a, b, None);
                let ba = cmp_types(b, a, None);
                assert_eq!(ab, ba.reverse(), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn function_types_compare_shape_then_elements() {
        let dl = DataLayout::new(64);
        let f1 = Type::Fn(FnTypeData {
            ret: Box::new(Type::Int(32)),
            params: vec![Type::Int(8).ptr_to(0)],
            varargs: false,
        });
        let f2 = Type::Fn(FnTypeData {
            ret: Box::new(Type::Int(32)),
            params: vec![Type::Int(64)],
            varargs: false,
        });
        assert!(types_equivalent(&f1, &f2, Some(&dl)));
        assert!(!types_equivalent(&f1, &f2, None));
        let f3 = Type::Fn(FnTypeData {
            ret: Box::new(Type::Int(32)),
            params: vec![Type::Int(64)],
            varargs: true,
        });
        assert!(!types_equivalent(&f2, &f3, Some(&dl)));
    }

    #[test]
    fn struct_packedness_distinguishes() {
        let a = Type::Struct {
            packed: false,
            fields: vec![Type::Int(8), Type::Int(32)],
        };
        let b = Type::Struct {
            packed: true,
            fields: vec![Type::Int(8), Type::Int(32)],
        };
        assert!(!types_equivalent(&a, &b, None));
    }
}
