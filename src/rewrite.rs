// SPDX-License-Identifier: Apache-2.0

//! Module rewriting for folded functions: direct-callsite redirection,
//! forwarding thunks, and global aliases.
//!
//! Every rewrite reports the ids of functions whose equivalence evidence is
//! now stale, so the driver can drop them from its set and queue them for
//! re-analysis. The lists are collected before the mutation they describe.

use crate::ir::{
    Block, CallConv, CastOp, Constant, FuncId, Function, GlobalAlias, Instr, InstrPayload,
    Module, Param, Type, Value,
};

/// Ids of functions whose bodies mention the symbol, looking through
/// constant expressions.
pub fn users_of_symbol(module: &Module, name: &str) -> Vec<FuncId> {
    let mut users = Vec::new();
    for func in module.functions.iter() {
        let mentions = func.instrs().any(|instr| {
            instr
                .payload
                .operands()
                .iter()
                .any(|op| op.mentions_symbol(name))
        });
        if mentions {
            users.push(func.id);
        }
    }
    users
}

fn alias_uses_symbol(module: &Module, name: &str) -> bool {
    module
        .aliases
        .iter()
        .any(|alias| alias.aliasee.mentions_symbol(name))
}

fn subst_constant(c: &Constant, old: &str, new: &Constant) -> Constant {
    match c {
        Constant::Global { name, .. } if name == old => new.clone(),
        Constant::BitCast { value, ty } => Constant::BitCast {
            value: Box::new(subst_constant(value, old, new)),
            ty: ty.clone(),
        },
        other => other.clone(),
    }
}

/// Replaces every use of the symbol `old` (in instruction operands and
/// alias targets) with the given constant.
pub fn replace_symbol_uses(module: &mut Module, old: &str, new: &Constant) {
    for func in module.functions.iter_mut() {
        for instr in func.instrs_mut() {
            instr.payload.for_each_value_mut(|v| {
                if let Value::Const(c) = v {
                    if c.mentions_symbol(old) {
                        *v = Value::Const(subst_constant(c, old, new));
                    }
                }
            });
        }
    }
    for alias in module.aliases.iter_mut() {
        if alias.aliasee.mentions_symbol(old) {
            alias.aliasee = subst_constant(&alias.aliasee, old, new);
        }
    }
}

/// Rewrites every direct call (or invoke) of `old` to target `new`,
/// bitcasting `new` to `old`'s type when the signatures differ. Uses of
/// `old` anywhere but callee position are left alone. Returns the ids of
/// functions whose bodies changed.
pub fn replace_direct_callers(module: &mut Module, old_id: FuncId, new_id: FuncId) -> Vec<FuncId> {
    let old = module.get_fn(old_id).expect("redirect source not in module");
    let new = module.get_fn(new_id).expect("redirect target not in module");
    let old_name = old.name.clone();
    let old_ptr_ty = old.ptr_ty();
    let target = if new.ptr_ty() == old_ptr_ty {
        Constant::Global {
            name: new.name.clone(),
            ty: old_ptr_ty,
        }
    } else {
        Constant::BitCast {
            value: Box::new(Constant::Global {
                name: new.name.clone(),
                ty: new.ptr_ty(),
            }),
            ty: old_ptr_ty,
        }
    };

    let mut changed = Vec::new();
    for func in module.functions.iter_mut() {
        let mut touched = false;
        for instr in func.instrs_mut() {
            let callee = match &mut instr.payload {
                InstrPayload::Call { callee, .. } | InstrPayload::Invoke { callee, .. } => callee,
                _ => continue,
            };
            if let Value::Const(Constant::Global { name, .. }) = callee {
                if *name == old_name {
                    *callee = Value::Const(target.clone());
                    touched = true;
                }
            }
        }
        if touched {
            log::trace!("redirected calls of @{} inside @{}", old_name, func.name);
            changed.push(func.id);
        }
    }
    changed
}

/// Picks the conversion that carries a value across the pointer/integer
/// seam: the dedicated int<->pointer conversions when exactly one side is a
/// pointer, a plain bitcast otherwise.
fn cast_op_for(from: &Type, to: &Type) -> CastOp {
    if from.is_integer() && to.is_pointer() {
        CastOp::IntToPtr
    } else if from.is_pointer() && to.is_integer() {
        CastOp::PtrToInt
    } else {
        CastOp::BitCast
    }
}

pub struct ThunkOutcome {
    pub invalidated: Vec<FuncId>,
    pub thunk_written: bool,
}

/// Replaces `g` with a forwarding thunk to `f` (or erases `g` outright when
/// it was local and redirection removed its last use). The thunk keeps
/// `g`'s name, signature, linkage, and attributes, and tail-calls `f` with
/// `f`'s calling convention.
pub fn write_thunk(module: &mut Module, f_id: FuncId, g_id: FuncId) -> ThunkOutcome {
    let mut invalidated = Vec::new();

    let g_overridable = module
        .get_fn(g_id)
        .expect("thunk target not in module")
        .is_overridable();
    if !g_overridable {
        invalidated.extend(replace_direct_callers(module, g_id, f_id));
    }

    let g_name = module.get_fn(g_id).unwrap().name.clone();
    let g_local = module.get_fn(g_id).unwrap().linkage.is_local();
    if g_local && users_of_symbol(module, &g_name).is_empty() && !alias_uses_symbol(module, &g_name)
    {
        // All callers already retargeted and nobody takes the address; the
        // body can simply go away.
        log::debug!("erasing @{} without a thunk; no uses remain", g_name);
        module.erase_fn(g_id);
        return ThunkOutcome {
            invalidated,
            thunk_written: false,
        };
    }

    invalidated.extend(users_of_symbol(module, &g_name));
    let g = module.erase_fn(g_id);
    let f = module
        .get_fn(f_id)
        .expect("thunk forwarding target not in module");
    let f_name = f.name.clone();
    let f_conv = f.conv;
    let f_ret_ty = f.ret_ty.clone();
    let f_param_tys: Vec<Type> = f.params.iter().map(|p| p.ty.clone()).collect();
    let f_ptr_ty = f.ptr_ty();

    let mut params = Vec::new();
    let mut instrs = Vec::new();
    let mut args = Vec::new();
    for (i, param) in g.params.iter().enumerate() {
        let p_name = if param.name.is_empty() {
            format!("arg{}", i)
        } else {
            param.name.clone()
        };
        params.push(Param {
            name: p_name.clone(),
            ty: param.ty.clone(),
        });
        let incoming = Value::Arg {
            name: p_name.clone(),
            ty: param.ty.clone(),
        };
        let want = &f_param_tys[i];
        if &param.ty == want {
            args.push(incoming);
        } else {
            let cast_name = format!("{}.cast", p_name);
            instrs.push(Instr {
                name: Some(cast_name.clone()),
                ty: want.clone(),
                payload: InstrPayload::Cast {
                    op: cast_op_for(&param.ty, want),
                    value: incoming,
                },
            });
            args.push(Value::Local {
                name: cast_name,
                ty: want.clone(),
            });
        }
    }

    let callee = Value::Const(Constant::Global {
        name: f_name,
        ty: f_ptr_ty,
    });
    let call_payload = InstrPayload::Call {
        callee,
        args,
        conv: f_conv,
        attrs: Default::default(),
        tail: true,
    };
    if f_ret_ty == Type::Void {
        instrs.push(Instr {
            name: None,
            ty: Type::Void,
            payload: call_payload,
        });
        instrs.push(Instr {
            name: None,
            ty: Type::Void,
            payload: InstrPayload::Ret { value: None },
        });
    } else {
        instrs.push(Instr {
            name: Some("call".to_string()),
            ty: f_ret_ty.clone(),
            payload: call_payload,
        });
        let result = Value::Local {
            name: "call".to_string(),
            ty: f_ret_ty.clone(),
        };
        let ret_value = if f_ret_ty == g.ret_ty {
            result
        } else {
            instrs.push(Instr {
                name: Some("ret.cast".to_string()),
                ty: g.ret_ty.clone(),
                payload: InstrPayload::Cast {
                    op: cast_op_for(&f_ret_ty, &g.ret_ty),
                    value: result,
                },
            });
            Value::Local {
                name: "ret.cast".to_string(),
                ty: g.ret_ty.clone(),
            }
        };
        instrs.push(Instr {
            name: None,
            ty: Type::Void,
            payload: InstrPayload::Ret {
                value: Some(ret_value),
            },
        });
    }

    let thunk = Function {
        id: FuncId(usize::MAX),
        name: g.name.clone(),
        ret_ty: g.ret_ty.clone(),
        params,
        varargs: g.varargs,
        linkage: g.linkage,
        visibility: g.visibility,
        conv: g.conv,
        attrs: g.attrs.clone(),
        gc: g.gc.clone(),
        section: g.section.clone(),
        alignment: g.alignment,
        unnamed_addr: g.unnamed_addr,
        blocks: vec![Block {
            name: "entry".to_string(),
            instrs,
        }],
    };
    log::debug!("wrote thunk @{}", thunk.name);
    module.add_function(thunk);
    ThunkOutcome {
        invalidated,
        thunk_written: true,
    }
}

/// Replaces `g` with an alias bound to `f`'s address. The alias takes
/// `g`'s name, linkage, and visibility; `f` adopts the larger of the two
/// alignments.
pub fn write_alias(module: &mut Module, f_id: FuncId, g_id: FuncId) -> Vec<FuncId> {
    let g = module.get_fn(g_id).expect("alias source not in module");
    let g_name = g.name.clone();
    let g_linkage = g.linkage;
    let g_visibility = g.visibility;
    let g_ptr_ty = g.ptr_ty();
    let g_alignment = g.alignment;

    let f = module
        .get_fn_mut(f_id)
        .expect("alias target not in module");
    f.alignment = f.alignment.max(g_alignment);
    let f_name = f.name.clone();
    let f_ptr_ty = f.ptr_ty();
    let aliasee = if f_ptr_ty == g_ptr_ty {
        Constant::Global {
            name: f_name,
            ty: g_ptr_ty.clone(),
        }
    } else {
        Constant::BitCast {
            value: Box::new(Constant::Global {
                name: f_name,
                ty: f_ptr_ty,
            }),
            ty: g_ptr_ty.clone(),
        }
    };

    let invalidated = users_of_symbol(module, &g_name);
    module.erase_fn(g_id);
    module.add_alias(GlobalAlias {
        name: g_name.clone(),
        linkage: g_linkage,
        visibility: g_visibility,
        ty: g_ptr_ty,
        aliasee,
    });
    log::debug!("wrote alias @{}", g_name);
    invalidated
}

/// The thunk call uses `f`'s calling convention even when it differs from
/// the thunk's own; exposed for tests that pin this down.
pub fn thunk_calls_with_conv(thunk: &Function) -> Option<CallConv> {
    thunk.instrs().find_map(|instr| match &instr.payload {
        InstrPayload::Call { conv, .. } => Some(*conv),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser::Parser;

    fn parse(text: &str) -> Module {
        Parser::new(text).parse_module().unwrap()
    }

    fn id_of(module: &Module, name: &str) -> FuncId {
        module.get_fn_by_name(name).unwrap().id
    }

    #[test]
    fn replace_direct_callers_leaves_address_uses_alone() {
        let mut m = parse(
            r#"module t

define i32 @old(i32 %x) {
entry:
  ret i32 %x
}

define i32 @new(i32 %x) {
entry:
  ret i32 %x
}

define i32 @caller(i32 %x) {
entry:
  %r = call i32 @old(i32 %x)
  ret i32 %r
}

define i8* @taker() {
entry:
  %p = bitcast i32 (i32)* @old to i8*
  ret i8* %p
}
"#,
        );
        let old = id_of(&m, "old");
        let new = id_of(&m, "new");
        let caller = id_of(&m, "caller");
        let changed = replace_direct_callers(&mut m, old, new);
        assert_eq!(changed, vec![caller]);
        let caller_fn = m.get_fn(caller).unwrap();
        let callee_mentions_new = caller_fn
            .instrs()
            .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("new")));
        assert!(callee_mentions_new);
        // The address-taking bitcast still refers to @old.
        let taker_fn = m.get_fn_by_name("taker").unwrap();
        let still_old = taker_fn
            .instrs()
            .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("old")));
        assert!(still_old);
    }

    #[test]
    fn thunk_keeps_name_and_casts_arguments() {
        let mut m = parse(
            r#"module t
pointersize 64

define i32 @impl(i64 %x) {
entry:
  %t = trunc i64 %x to i32
  %s = add i32 %t, 7
  ret i32 %s
}

define weak i32 @shim(i8* %p) {
entry:
  %x = ptrtoint i8* %p to i64
  %t = trunc i64 %x to i32
  %s = add i32 %t, 7
  ret i32 %s
}
"#,
        );
        let f = id_of(&m, "impl");
        let g = id_of(&m, "shim");
        let outcome = write_thunk(&mut m, f, g);
        assert!(outcome.thunk_written);
        let thunk = m.get_fn_by_name("shim").unwrap();
        assert_eq!(thunk.linkage, crate::ir::Linkage::Weak);
        assert_eq!(thunk.blocks.len(), 1);
        // One int-to-pointer seam crossing plus call plus ret.
        let casts: Vec<&Instr> = thunk
            .instrs()
            .filter(|i| matches!(i.payload, InstrPayload::Cast { .. }))
            .collect();
        assert_eq!(casts.len(), 1);
        assert!(matches!(
            casts[0].payload,
            InstrPayload::Cast {
                op: CastOp::PtrToInt,
                ..
            }
        ));
        let tail = thunk.instrs().any(|i| {
            matches!(i.payload, InstrPayload::Call { tail: true, .. })
        });
        assert!(tail, "thunk call must be a tail call");
    }

    #[test]
    fn local_fully_redirected_function_is_erased_without_a_thunk() {
        let mut m = parse(
            r#"module t

define i32 @keep(i32 %x) {
entry:
  %s = mul i32 %x, 2
  ret i32 %s
}

define internal i32 @gone(i32 %x) {
entry:
  %s = mul i32 %x, 2
  ret i32 %s
}

define i32 @caller(i32 %x) {
entry:
  %r = call i32 @gone(i32 %x)
  ret i32 %r
}
"#,
        );
        let f = id_of(&m, "keep");
        let g = id_of(&m, "gone");
        let outcome = write_thunk(&mut m, f, g);
        assert!(!outcome.thunk_written);
        assert!(m.get_fn_by_name("gone").is_none());
        let caller = m.get_fn_by_name("caller").unwrap();
        assert!(caller
            .instrs()
            .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("keep"))));
    }

    #[test]
    fn alias_takes_name_linkage_and_max_alignment() {
        let mut m = parse(
            r#"module t

define i32 @target(i32 %x) align 4 {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}

define weak i32 @doomed(i32 %x) unnamed_addr align 16 {
entry:
  %s = add i32 %x, 1
  ret i32 %s
}
"#,
        );
        let f = id_of(&m, "target");
        let g = id_of(&m, "doomed");
        write_alias(&mut m, f, g);
        assert!(m.get_fn_by_name("doomed").is_none());
        let alias = m.get_alias("doomed").unwrap();
        assert_eq!(alias.linkage, crate::ir::Linkage::Weak);
        assert!(alias.aliasee.mentions_symbol("target"));
        assert_eq!(m.get_fn_by_name("target").unwrap().alignment, 16);
    }
}
