// SPDX-License-Identifier: Apache-2.0

use codefold::ir_parser::Parser;
use codefold::{fold_module, FoldOptions, FoldStats};

fn fold_text(text: &str) -> FoldStats {
    let mut module = Parser::new(text).parse_module().unwrap();
    fold_module(&mut module, FoldOptions::default())
}

#[test]
fn volatile_difference_blocks_the_fold() {
    let stats = fold_text(
        r#"module t

define i32 @a(i32* %p) {
entry:
  %v = load i32* %p, align 4
  %w = add i32 %v, 1
  ret i32 %w
}

define i32 @b(i32* %p) {
entry:
  %v = load volatile i32* %p, align 4
  %w = add i32 %v, 1
  ret i32 %w
}
"#,
    );
    assert_eq!(stats, FoldStats::default());
}

#[test]
fn memory_ordering_difference_blocks_the_fold() {
    let stats = fold_text(
        r#"module t

define void @a(i32* %p) {
entry:
  store atomic i32 1, i32* %p release, align 4
  fence seq_cst
  ret void
}

define void @b(i32* %p) {
entry:
  store atomic i32 1, i32* %p seq_cst, align 4
  fence seq_cst
  ret void
}
"#,
    );
    assert_eq!(stats, FoldStats::default());
}

#[test]
fn rmw_operation_kind_blocks_the_fold() {
    let stats = fold_text(
        r#"module t

define i32 @a(i32* %p) {
entry:
  %old = atomicrmw add i32* %p, i32 1 seq_cst
  %r = add i32 %old, 1
  ret i32 %r
}

define i32 @b(i32* %p) {
entry:
  %old = atomicrmw sub i32* %p, i32 1 seq_cst
  %r = add i32 %old, 1
  ret i32 %r
}
"#,
    );
    assert_eq!(stats, FoldStats::default());
}

#[test]
fn variadic_flag_blocks_the_fold() {
    let stats = fold_text(
        r#"module t

define i32 @a(i32 %x) {
entry:
  %s = add i32 %x, 5
  %t = mul i32 %s, 2
  ret i32 %t
}

define i32 @b(i32 %x, ...) {
entry:
  %s = add i32 %x, 5
  %t = mul i32 %s, 2
  ret i32 %t
}
"#,
    );
    assert_eq!(stats, FoldStats::default());
}

#[test]
fn calling_convention_blocks_the_fold() {
    let stats = fold_text(
        r#"module t

define i32 @a(i32 %x) {
entry:
  %s = add i32 %x, 5
  %t = mul i32 %s, 2
  ret i32 %t
}

define coldcc i32 @b(i32 %x) {
entry:
  %s = add i32 %x, 5
  %t = mul i32 %s, 2
  ret i32 %t
}
"#,
    );
    assert_eq!(stats, FoldStats::default());
}

#[test]
fn section_and_gc_block_the_fold() {
    let stats = fold_text(
        r#"module t

define i32 @a(i32 %x) section ".text.cold" {
entry:
  %s = add i32 %x, 5
  %t = mul i32 %s, 2
  ret i32 %t
}

define i32 @b(i32 %x) {
entry:
  %s = add i32 %x, 5
  %t = mul i32 %s, 2
  ret i32 %t
}

define i32 @c(i32 %x) gc "shadow-stack" {
entry:
  %s = add i32 %x, 5
  %t = mul i32 %s, 2
  ret i32 %t
}
"#,
    );
    assert_eq!(stats, FoldStats::default());
}

#[test]
fn call_site_attributes_block_the_fold() {
    let stats = fold_text(
        r#"module t

declare i32 @ext(i32)

define i32 @a(i32 %x) {
entry:
  %r = call i32 @ext(i32 %x) nounwind
  %s = add i32 %r, 1
  ret i32 %s
}

define i32 @b(i32 %x) {
entry:
  %r = call i32 @ext(i32 %x)
  %s = add i32 %r, 1
  ret i32 %s
}
"#,
    );
    assert_eq!(stats, FoldStats::default());
}
