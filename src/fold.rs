// SPDX-License-Identifier: Apache-2.0

//! The whole-module folding driver.
//!
//! Candidate functions are binned by fingerprint; a bucket collision runs
//! the deep comparator, and a confirmed match hands the pair to the
//! rewriter. Because rewriting mutates the module, any function whose body
//! changes (or whose callee disappears) is dropped from the set and queued
//! for another round; the loop runs until the queue stays empty. Strong
//! functions are seated before overridable ones so that weak definitions
//! always attach to a strong representative when one exists.

use std::collections::HashMap;

use crate::comparator::FunctionComparator;
use crate::fingerprint::fingerprint;
use crate::ir::{Constant, FuncId, Function, Linkage, Module};
use crate::rewrite;

#[derive(Debug, Clone, Copy, Default)]
pub struct FoldOptions {
    /// Whether the target object format supports global aliases. Without
    /// them, some merges degrade to callsite redirection and thunks.
    pub has_global_aliases: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldStats {
    pub functions_merged: usize,
    pub thunks_written: usize,
    pub aliases_written: usize,
    /// Pairs of overridable functions promoted onto a shared private body.
    pub double_weak_promotions: usize,
}

impl FoldStats {
    /// The pass changed the module exactly when something merged.
    pub fn changed(&self) -> bool {
        self.functions_merged > 0
    }
}

/// Hash-bucketed set of seated representatives. Equality of members is the
/// deep comparator, run by the driver on bucket collisions; removal is by
/// function identity only and never triggers a comparison.
#[derive(Default)]
struct FnSet {
    buckets: HashMap<u64, Vec<FuncId>>,
    hash_of: HashMap<FuncId, u64>,
}

impl FnSet {
    fn with_capacity(n: usize) -> Self {
        FnSet {
            buckets: HashMap::with_capacity(n),
            hash_of: HashMap::with_capacity(n),
        }
    }

    fn bucket(&self, hash: u64) -> &[FuncId] {
        self.buckets.get(&hash).map(|b| b.as_slice()).unwrap_or(&[])
    }

    fn insert_unique(&mut self, id: FuncId, hash: u64) {
        self.buckets.entry(hash).or_default().push(id);
        self.hash_of.insert(id, hash);
    }

    /// Identity-keyed removal: finds the entry by id, bypassing the deep
    /// comparison entirely.
    fn remove_by_id(&mut self, id: FuncId) -> bool {
        let hash = match self.hash_of.remove(&id) {
            Some(hash) => hash,
            None => return false,
        };
        let bucket = self
            .buckets
            .get_mut(&hash)
            .expect("set entry without a bucket");
        let before = bucket.len();
        bucket.retain(|&member| member != id);
        assert_eq!(before, bucket.len() + 1, "set entry missing from bucket");
        true
    }

    fn clear(&mut self) {
        self.buckets.clear();
        self.hash_of.clear();
    }

    fn len(&self) -> usize {
        self.hash_of.len()
    }
}

struct Folder<'m> {
    module: &'m mut Module,
    set: FnSet,
    /// Functions awaiting (re-)analysis. Entries may refer to functions
    /// erased by earlier merges; liveness is re-checked at drain time.
    deferred: Vec<FuncId>,
    options: FoldOptions,
    stats: FoldStats,
}

fn eligible(func: &Function) -> bool {
    !func.is_declaration() && func.linkage != Linkage::AvailableExternally
}

impl<'m> Folder<'m> {
    fn run(&mut self) {
        self.deferred = self
            .module
            .functions
            .iter()
            .filter(|f| eligible(f))
            .map(|f| f.id)
            .collect();
        self.set = FnSet::with_capacity(self.deferred.len());

        loop {
            let worklist = std::mem::take(&mut self.deferred);
            log::debug!(
                "fold iteration: worklist {} entries, module {} functions",
                worklist.len(),
                self.module.functions.len()
            );

            // Strong functions first: folding two strong functions always
            // deletes one of them.
            for &id in worklist.iter() {
                match self.module.get_fn(id) {
                    Some(f) if eligible(f) && !f.is_overridable() => {
                        self.insert(id);
                    }
                    _ => {}
                }
            }
            // Then the overridable ones, which can now attach to seated
            // strong representatives as thunks or aliases.
            for &id in worklist.iter() {
                match self.module.get_fn(id) {
                    Some(f) if eligible(f) && f.is_overridable() => {
                        self.insert(id);
                    }
                    _ => {}
                }
            }

            log::debug!("fold iteration done: set holds {} entries", self.set.len());
            if self.deferred.is_empty() {
                break;
            }
        }
        self.set.clear();
    }

    /// Seats `id` in the set, or folds it into an equivalent incumbent.
    /// Returns whether a merge happened.
    fn insert(&mut self, id: FuncId) -> bool {
        let hash = fingerprint(self.module.get_fn(id).expect("candidate not in module")).0;
        let bucket: Vec<FuncId> = self.set.bucket(hash).to_vec();
        for incumbent in bucket {
            let equal = {
                let f = self
                    .module
                    .get_fn(incumbent)
                    .expect("seated function left the module");
                let g = self.module.get_fn(id).unwrap();
                FunctionComparator::new(self.module.layout.as_ref(), f, g).functions_equivalent()
            };
            if !equal {
                continue;
            }

            let g = self.module.get_fn(id).unwrap();
            if g.blocks.len() == 1 && g.blocks[0].instrs.len() <= 2 {
                // Folding a function this small cannot shrink the code.
                log::debug!("@{} is too small to bother folding", g.name);
                return false;
            }
            let f = self.module.get_fn(incumbent).unwrap();
            assert!(
                !f.is_overridable() || g.is_overridable(),
                "a strong function may never fold into an overridable incumbent"
            );
            log::debug!("folding @{} into @{}", g.name, f.name);
            self.merge_two(incumbent, id);
            return true;
        }
        log::debug!(
            "seated @{} as unique",
            self.module.get_fn(id).unwrap().name
        );
        self.set.insert_unique(id, hash);
        false
    }

    /// Drops a function from the set (by identity) and queues it for
    /// another look; no-op for functions that were never seated.
    fn remove(&mut self, id: FuncId) {
        if self.set.remove_by_id(id) {
            log::debug!("unseated function #{} for re-analysis", id.0);
            self.deferred.push(id);
        }
    }

    fn remove_all(&mut self, ids: Vec<FuncId>) {
        for id in ids {
            self.remove(id);
        }
    }

    /// Folds `g_id` into the seated representative `f_id`. On return `g`
    /// is erased, aliased, or thunked, and must not be visited again.
    fn merge_two(&mut self, f_id: FuncId, g_id: FuncId) {
        let f_overridable = self.module.get_fn(f_id).unwrap().is_overridable();
        if f_overridable {
            assert!(
                self.module.get_fn(g_id).unwrap().is_overridable(),
                "overridable incumbent paired with a strong newcomer"
            );
            if self.options.has_global_aliases {
                self.promote_double_weak(f_id, g_id);
            } else {
                // Neither symbol may disappear; redirecting g's direct
                // callers at f is the only available win.
                let invalidated = rewrite::replace_direct_callers(self.module, g_id, f_id);
                self.remove_all(invalidated);
            }
            self.stats.double_weak_promotions += 1;
        } else {
            self.write_thunk_or_alias(f_id, g_id);
        }
        self.stats.functions_merged += 1;
    }

    fn write_thunk_or_alias(&mut self, f_id: FuncId, g_id: FuncId) {
        let g = self.module.get_fn(g_id).unwrap();
        let alias_ok = self.options.has_global_aliases
            && g.unnamed_addr
            && (g.linkage == Linkage::External
                || g.linkage.is_local()
                || g.linkage == Linkage::Weak);
        if alias_ok {
            let invalidated = rewrite::write_alias(self.module, f_id, g_id);
            self.remove_all(invalidated);
            self.stats.aliases_written += 1;
        } else {
            let outcome = rewrite::write_thunk(self.module, f_id, g_id);
            self.remove_all(outcome.invalidated);
            if outcome.thunk_written {
                self.stats.thunks_written += 1;
            }
        }
    }

    /// Both functions are overridable, so neither body may be deleted: an
    /// external linker is free to bind either symbol elsewhere. Clone the
    /// representative into a fresh private implementation and turn both
    /// originals into aliases to it.
    fn promote_double_weak(&mut self, f_id: FuncId, g_id: FuncId) {
        let f = self.module.get_fn(f_id).unwrap();
        let g_alignment = self.module.get_fn(g_id).unwrap().alignment;
        let f_name = f.name.clone();

        let mut body = f.clone();
        body.name = self.module.unique_name(&format!("{}.folded", f_name));
        body.linkage = Linkage::Private;
        body.alignment = f.alignment.max(g_alignment);
        let h_name = body.name.clone();
        let h_ptr_ty = body.ptr_ty();
        let h_id = self.module.add_function(body);
        log::debug!("double-weak: new private body @{}", h_name);

        // Redirect f's uses to the new body, invalidating them first.
        let invalidated = rewrite::users_of_symbol(self.module, &f_name);
        self.remove_all(invalidated);
        rewrite::replace_symbol_uses(
            self.module,
            &f_name,
            &Constant::Global {
                name: h_name,
                ty: h_ptr_ty,
            },
        );

        // The seated entry for f is about to become an alias; the private
        // body takes its seat so later candidates can still fold into it.
        let f_hash = fingerprint(self.module.get_fn(f_id).unwrap()).0;
        self.set.remove_by_id(f_id);
        let invalidated = rewrite::write_alias(self.module, h_id, f_id);
        self.remove_all(invalidated);
        self.stats.aliases_written += 1;
        let invalidated = rewrite::write_alias(self.module, h_id, g_id);
        self.remove_all(invalidated);
        self.stats.aliases_written += 1;
        self.set.insert_unique(h_id, f_hash);
    }
}

/// Runs the pass over the module. Check [`FoldStats::changed`] on the
/// result to learn whether anything happened.
pub fn fold_module(module: &mut Module, options: FoldOptions) -> FoldStats {
    let mut folder = Folder {
        module,
        set: FnSet::default(),
        deferred: Vec::new(),
        options,
        stats: FoldStats::default(),
    };
    folder.run();
    folder.stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir_parser::Parser;

    fn parse(text: &str) -> Module {
        Parser::new(text).parse_module().unwrap()
    }

    #[test]
    fn tiny_functions_are_never_folded() {
        let mut m = parse(
            r#"module t

define i32 @a(i32 %x, i32 %y) {
entry:
  %s = add i32 %x, %y
  ret i32 %s
}

define i32 @b(i32 %x, i32 %y) {
entry:
  %s = add i32 %x, %y
  ret i32 %s
}
"#,
        );
        let stats = fold_module(&mut m, FoldOptions::default());
        assert_eq!(stats, FoldStats::default());
        assert!(!stats.changed());
        assert!(m.get_fn_by_name("a").is_some());
        assert!(m.get_fn_by_name("b").is_some());
    }

    #[test]
    fn fingerprint_collision_without_equivalence_seats_both() {
        let mut m = parse(
            r#"module t

define i32 @a(i32 %x) {
entry:
  %s = add i32 %x, 1
  %t = add i32 %s, 2
  ret i32 %t
}

define i32 @b(i32 %x) {
entry:
  %s = mul i32 %x, 3
  %t = mul i32 %s, 4
  ret i32 %t
}
"#,
        );
        let stats = fold_module(&mut m, FoldOptions::default());
        assert!(!stats.changed());
        assert_eq!(m.functions.len(), 2);
    }

    #[test]
    fn strong_pair_folds_and_erases_the_newcomer() {
        let mut m = parse(
            r#"module t

define internal i32 @first(i32 %x, i32 %y) {
entry:
  %s = add nsw i32 %x, %y
  %t = mul i32 %s, %x
  ret i32 %t
}

define internal i32 @second(i32 %x, i32 %y) {
entry:
  %s = add nsw i32 %x, %y
  %t = mul i32 %s, %x
  ret i32 %t
}

define i32 @caller(i32 %x) {
entry:
  %r = call i32 @second(i32 %x, i32 7)
  ret i32 %r
}
"#,
        );
        let stats = fold_module(&mut m, FoldOptions::default());
        assert_eq!(stats.functions_merged, 1);
        assert_eq!(stats.thunks_written, 0);
        assert!(m.get_fn_by_name("second").is_none());
        let caller = m.get_fn_by_name("caller").unwrap();
        assert!(caller
            .instrs()
            .any(|i| i.payload.operands().iter().any(|op| op.mentions_symbol("first"))));
    }

    #[test]
    fn second_run_reports_no_change() {
        let text = r#"module t

define internal i32 @first(i32 %x) {
entry:
  %s = add i32 %x, 1
  %t = mul i32 %s, 2
  ret i32 %t
}

define internal i32 @second(i32 %x) {
entry:
  %s = add i32 %x, 1
  %t = mul i32 %s, 2
  ret i32 %t
}

define i32 @user(i32 %x) {
entry:
  %a = call i32 @first(i32 %x)
  %b = call i32 @second(i32 %a)
  ret i32 %b
}
"#;
        let mut m = parse(text);
        let first = fold_module(&mut m, FoldOptions::default());
        assert!(first.changed());
        let second = fold_module(&mut m, FoldOptions::default());
        assert!(!second.changed());
        assert_eq!(second, FoldStats::default());
    }
}
