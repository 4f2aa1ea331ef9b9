// SPDX-License-Identifier: Apache-2.0

use codefold::ir::{CastOp, InstrPayload};
use codefold::ir_parser::Parser;
use codefold::ir_validate::validate_module;
use codefold::{fold_module, FoldOptions};

const POINTER_VS_INT: &str = r#"module t
pointersize 64

define void @store_ptr(i8* %v, i8** %slot) {
entry:
  store i8* %v, i8** %slot
  fence seq_cst
  ret void
}

define void @store_int(i64 %v, i64* %slot) {
entry:
  store i64 %v, i64* %slot
  fence seq_cst
  ret void
}
"#;

#[test]
fn pointer_and_intptr_twins_fold_with_conversion_thunk() {
    let mut module = Parser::new(POINTER_VS_INT).parse_module().unwrap();
    let stats = fold_module(&mut module, FoldOptions::default());
    assert_eq!(stats.functions_merged, 1);
    assert_eq!(stats.thunks_written, 1);

    // The survivor keeps its body; the twin forwards its integer argument
    // through the dedicated int-to-pointer conversion and its pointer
    // argument through a plain bitcast.
    let thunk = module.get_fn_by_name("store_int").unwrap();
    let cast_ops: Vec<CastOp> = thunk
        .instrs()
        .filter_map(|i| match &i.payload {
            InstrPayload::Cast { op, .. } => Some(*op),
            _ => None,
        })
        .collect();
    assert_eq!(cast_ops, vec![CastOp::IntToPtr, CastOp::BitCast]);
    validate_module(&module).unwrap();
}

#[test]
fn without_a_layout_oracle_pointer_and_integer_stay_distinct() {
    let text = POINTER_VS_INT.replace("pointersize 64\n", "");
    let mut module = Parser::new(&text).parse_module().unwrap();
    let stats = fold_module(&mut module, FoldOptions::default());
    assert!(!stats.changed());
    assert!(module.get_fn_by_name("store_ptr").is_some());
    assert!(module.get_fn_by_name("store_int").is_some());
}
