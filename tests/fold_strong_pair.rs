// SPDX-License-Identifier: Apache-2.0

use codefold::ir_parser::Parser;
use codefold::ir_validate::validate_module;
use codefold::{fold_module, FoldOptions};

#[test]
fn strong_twins_fold_to_one_implementation() {
    let mut module = Parser::new(
        r#"module t

define i32 @add_i32(i32 %a, i32 %b) {
entry:
  %s = add i32 %a, %b
  %t = add i32 %s, 0
  ret i32 %t
}

define i32 @plus_i32(i32 %a, i32 %b) {
entry:
  %s = add i32 %a, %b
  %t = add i32 %s, 0
  ret i32 %t
}

define i32 @caller(i32 %x) {
entry:
  %r = call i32 @plus_i32(i32 %x, i32 1)
  ret i32 %r
}
"#,
    )
    .parse_module()
    .unwrap();

    let stats = fold_module(&mut module, FoldOptions::default());
    assert_eq!(stats.functions_merged, 1);
    assert_eq!(stats.thunks_written, 1);
    assert_eq!(stats.aliases_written, 0);
    assert!(stats.changed());

    // Both symbols are external, so the folded one survives as a thunk; the
    // direct caller goes straight to the surviving body.
    let caller = module.get_fn_by_name("caller").unwrap();
    assert!(caller
        .instrs()
        .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("add_i32"))));
    let thunk = module.get_fn_by_name("plus_i32").unwrap();
    assert_eq!(thunk.blocks.len(), 1);
    assert!(thunk
        .instrs()
        .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("add_i32"))));

    validate_module(&module).unwrap();
}

#[test]
fn internal_twin_is_erased_outright() {
    let mut module = Parser::new(
        r#"module t

define internal i32 @add_i32(i32 %a, i32 %b) {
entry:
  %s = add i32 %a, %b
  %t = add i32 %s, 0
  ret i32 %t
}

define internal i32 @plus_i32(i32 %a, i32 %b) {
entry:
  %s = add i32 %a, %b
  %t = add i32 %s, 0
  ret i32 %t
}

define i32 @caller(i32 %x) {
entry:
  %r = call i32 @plus_i32(i32 %x, i32 1)
  ret i32 %r
}
"#,
    )
    .parse_module()
    .unwrap();

    let stats = fold_module(&mut module, FoldOptions::default());
    assert_eq!(stats.functions_merged, 1);
    assert_eq!(stats.thunks_written, 0);
    assert!(module.get_fn_by_name("plus_i32").is_none());
    let caller = module.get_fn_by_name("caller").unwrap();
    assert!(caller
        .instrs()
        .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("add_i32"))));
    validate_module(&module).unwrap();
}

#[test]
fn running_the_pass_twice_is_idempotent() {
    let mut module = Parser::new(
        r#"module t

define internal i32 @a(i32 %x) {
entry:
  %s = add i32 %x, 3
  %t = mul i32 %s, %s
  ret i32 %t
}

define internal i32 @b(i32 %x) {
entry:
  %s = add i32 %x, 3
  %t = mul i32 %s, %s
  ret i32 %t
}

define i32 @user(i32 %x) {
entry:
  %r = call i32 @b(i32 %x)
  ret i32 %r
}
"#,
    )
    .parse_module()
    .unwrap();

    assert!(fold_module(&mut module, FoldOptions::default()).changed());
    let after_first = module.to_string();
    let second = fold_module(&mut module, FoldOptions::default());
    assert!(!second.changed());
    assert_eq!(module.to_string(), after_first);
}
