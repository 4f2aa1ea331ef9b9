// SPDX-License-Identifier: Apache-2.0

//! Target layout oracle: pointer sizes per address space and constant-offset
//! accumulation for address computations.
//!
//! The size/alignment model is deliberately small: natural power-of-two
//! alignment for scalars, padded field offsets for unpacked structs. It only
//! has to be self-consistent so that two address computations over the same
//! types accumulate to the same byte offset.

use std::collections::BTreeMap;

use crate::ir::{Constant, FloatKind, Type, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    /// Pointer width in bits per address space. Spaces not listed fall back
    /// to address space 0's width.
    pub pointer_bits: BTreeMap<u32, u32>,
}

impl DataLayout {
    pub fn new(bits: u32) -> Self {
        let mut pointer_bits = BTreeMap::new();
        pointer_bits.insert(0, bits);
        DataLayout { pointer_bits }
    }

    pub fn set_pointer_size(&mut self, address_space: u32, bits: u32) {
        self.pointer_bits.insert(address_space, bits);
    }

    pub fn pointer_size_bits(&self, address_space: u32) -> u32 {
        self.pointer_bits
            .get(&address_space)
            .or_else(|| self.pointer_bits.get(&0))
            .copied()
            .unwrap_or(64)
    }

    /// The integer type as wide as a pointer in the given address space.
    pub fn int_ptr_type(&self, address_space: u32) -> Type {
        Type::Int(self.pointer_size_bits(address_space))
    }

    pub fn abi_alignment(&self, ty: &Type) -> u64 {
        match ty {
            Type::Int(w) => byte_ceil(*w as u64).next_power_of_two().min(16),
            Type::Float(FloatKind::Single) => 4,
            Type::Float(FloatKind::Double) => 8,
            Type::Float(_) => 16,
            Type::Pointer(p) => (self.pointer_size_bits(p.address_space) as u64) / 8,
            Type::Vector { elem, len } => {
                (self.alloc_size(elem) * len).next_power_of_two().min(16)
            }
            Type::Array { elem, .. } => self.abi_alignment(elem),
            Type::Struct { packed: true, .. } => 1,
            Type::Struct { fields, .. } => fields
                .iter()
                .map(|f| self.abi_alignment(f))
                .max()
                .unwrap_or(1),
            _ => panic!("type has no layout: {}", ty),
        }
    }

    /// Allocation size in bytes: storage size rounded up to the alignment.
    pub fn alloc_size(&self, ty: &Type) -> u64 {
        match ty {
            Type::Int(w) => round_up(byte_ceil(*w as u64), self.abi_alignment(ty)),
            Type::Float(FloatKind::Single) => 4,
            Type::Float(FloatKind::Double) => 8,
            Type::Float(_) => 16,
            Type::Pointer(p) => (self.pointer_size_bits(p.address_space) as u64) / 8,
            Type::Vector { elem, len } | Type::Array { elem, len } => {
                self.alloc_size(elem) * len
            }
            Type::Struct { packed, fields } => {
                let mut size = 0u64;
                for field in fields.iter() {
                    if !*packed {
                        size = round_up(size, self.abi_alignment(field));
                    }
                    size += self.alloc_size(field);
                }
                if !*packed {
                    size = round_up(size, self.abi_alignment(ty));
                }
                size
            }
            _ => panic!("type has no layout: {}", ty),
        }
    }

    fn struct_field_offset(&self, packed: bool, fields: &[Type], index: usize) -> u64 {
        let mut offset = 0u64;
        for field in fields.iter().take(index) {
            if !packed {
                offset = round_up(offset, self.abi_alignment(field));
            }
            offset += self.alloc_size(field);
        }
        if !packed {
            if let Some(field) = fields.get(index) {
                offset = round_up(offset, self.abi_alignment(field));
            }
        }
        offset
    }

    /// Collapses an address computation to a constant byte offset from its
    /// base pointer, when every index is a constant integer. Returns `None`
    /// as soon as a dynamic index or an unindexable type is seen.
    pub fn gep_constant_offset(&self, base_ty: &Type, indices: &[Value]) -> Option<i64> {
        let pointee: &Type = match base_ty {
            Type::Pointer(p) => p.pointee.as_ref(),
            _ => return None,
        };
        let mut offset: i64 = 0;
        let first = constant_index(indices.first()?)?;
        offset += first * self.alloc_size(pointee) as i64;
        let mut cur: Type = pointee.clone();
        for idx in indices.iter().skip(1) {
            let idx = constant_index(idx)?;
            cur = match cur {
                Type::Struct { packed, fields } => {
                    let field = usize::try_from(idx).ok()?;
                    if field >= fields.len() {
                        return None;
                    }
                    offset += self.struct_field_offset(packed, &fields, field) as i64;
                    fields[field].clone()
                }
                Type::Array { elem, .. } | Type::Vector { elem, .. } => {
                    offset += idx * self.alloc_size(&elem) as i64;
                    *elem
                }
                _ => return None,
            };
        }
        Some(offset)
    }
}

fn byte_ceil(bits: u64) -> u64 {
    (bits + 7) / 8
}

fn round_up(value: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Sign-extends a constant integer operand to a native offset.
fn constant_index(v: &Value) -> Option<i64> {
    match v {
        Value::Const(Constant::Int { ty: Type::Int(w), value }) => {
            let shift = 64 - (*w).min(64);
            Some(((*value << shift) as i64) >> shift)
        }
        _ => None,
    }
}
