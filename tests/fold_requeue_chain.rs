// SPDX-License-Identifier: Apache-2.0

use codefold::ir_parser::Parser;
use codefold::ir_validate::validate_module;
use codefold::{fold_module, FoldOptions};

/// The callers disagree only on which of two (equivalent) helpers they
/// call. Folding the helpers rewrites one caller, which invalidates its
/// equivalence evidence; on the next round the two callers fold as well.
#[test]
fn rewritten_callers_are_requeued_and_fold_on_the_next_round() {
    let mut module = Parser::new(
        r#"module t

define internal i32 @caller_a(i32 %x) {
entry:
  %r = call i32 @helper_b(i32 %x)
  %s = add i32 %r, 10
  ret i32 %s
}

define internal i32 @caller_b(i32 %x) {
entry:
  %r = call i32 @helper_a(i32 %x)
  %s = add i32 %r, 10
  ret i32 %s
}

define internal i32 @helper_a(i32 %x) {
entry:
  %s = mul i32 %x, 17
  %t = add i32 %s, 4
  ret i32 %t
}

define internal i32 @helper_b(i32 %x) {
entry:
  %s = mul i32 %x, 17
  %t = add i32 %s, 4
  ret i32 %t
}

define i32 @root(i32 %x) {
entry:
  %a = call i32 @caller_a(i32 %x)
  %b = call i32 @caller_b(i32 %a)
  ret i32 %b
}
"#,
    )
    .parse_module()
    .unwrap();

    let stats = fold_module(&mut module, FoldOptions::default());
    // helper_b folds into helper_a; the rewritten caller_a then folds into
    // caller_b on the following round.
    assert_eq!(stats.functions_merged, 2);
    assert_eq!(stats.thunks_written, 0);

    let surviving: Vec<&str> = module
        .functions
        .iter()
        .map(|f| f.name.as_str())
        .collect();
    assert!(surviving.contains(&"helper_a"));
    assert!(surviving.contains(&"root"));
    assert!(
        !surviving.contains(&"helper_b"),
        "helper_b should be folded away, module holds {:?}",
        surviving
    );
    assert_eq!(
        surviving.len(),
        3,
        "exactly one caller should survive, module holds {:?}",
        surviving
    );

    // No stale direct calls to erased functions remain anywhere.
    validate_module(&module).unwrap();
    for func in module.functions.iter() {
        for instr in func.instrs() {
            for op in instr.payload.operands() {
                assert!(!op.mentions_symbol("helper_b"));
            }
        }
    }
}
