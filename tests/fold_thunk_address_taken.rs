// SPDX-License-Identifier: Apache-2.0

use codefold::ir::{CallConv, InstrPayload};
use codefold::ir_parser::Parser;
use codefold::ir_validate::validate_module;
use codefold::rewrite::thunk_calls_with_conv;
use codefold::{fold_module, FoldOptions};

#[test]
fn address_taken_twin_becomes_a_tail_call_thunk() {
    let mut module = Parser::new(
        r#"module t

define fastcc i32 @keep(i32 %a) {
entry:
  %s = mul i32 %a, %a
  %t = add i32 %s, 1
  ret i32 %t
}

define fastcc i32 @addr_taken(i32 %a) {
entry:
  %s = mul i32 %a, %a
  %t = add i32 %s, 1
  ret i32 %t
}

define i8* @observer() {
entry:
  %p = bitcast i32 (i32)* @addr_taken to i8*
  ret i8* %p
}
"#,
    )
    .parse_module()
    .unwrap();

    // Aliases are available, but @addr_taken has address identity (no
    // unnamed_addr), so only a thunk is legal.
    let stats = fold_module(
        &mut module,
        FoldOptions {
            has_global_aliases: true,
        },
    );
    assert_eq!(stats.functions_merged, 1);
    assert_eq!(stats.thunks_written, 1);
    assert_eq!(stats.aliases_written, 0);

    let thunk = module.get_fn_by_name("addr_taken").unwrap();
    assert_eq!(thunk.blocks.len(), 1);
    let is_tail = thunk
        .instrs()
        .any(|i| matches!(i.payload, InstrPayload::Call { tail: true, .. }));
    assert!(is_tail, "the forwarding call must be a tail call");
    // The thunk forwards with the callee's calling convention.
    assert_eq!(thunk_calls_with_conv(thunk), Some(CallConv::Fast));

    // The observer's address-of expression still names the original symbol.
    let observer = module.get_fn_by_name("observer").unwrap();
    assert!(observer
        .instrs()
        .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("addr_taken"))));
    validate_module(&module).unwrap();
}
