//! Property-based tests for the definiteness merge lattice.
//!
//! The emitter's correctness rests on merge being a meet: the result of
//! joining two control-flow edges may never claim more definiteness than
//! either edge had. These properties pin that down over arbitrary small
//! scopes.

use brio_codegen::analysis::{Derivation, FlowScope, VarState};
use proptest::prelude::*;
use std::collections::HashMap;

fn var_state() -> impl Strategy<Value = VarState> {
    prop_oneof![
        (0usize..4).prop_map(|i| VarState::Known(Derivation::Param(i))),
        Just(VarState::Known(Derivation::Caught)),
        Just(VarState::Unknown),
    ]
}

fn scope_vars() -> impl Strategy<Value = HashMap<String, VarState>> {
    prop::collection::hash_map("[a-d]", var_state(), 0..5)
}

fn scope_from(vars: &HashMap<String, VarState>) -> FlowScope {
    let mut scope = FlowScope::new();
    for (name, state) in vars {
        scope.bind(name, *state);
    }
    scope
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Joining two edges gives the same answer in either order.
    #[test]
    fn merge_is_commutative(a in scope_vars(), b in scope_vars()) {
        let sa = scope_from(&a);
        let sb = scope_from(&b);
        let ab = sa.merge(&sb);
        let ba = sb.merge(&sa);
        for name in a.keys().chain(b.keys()) {
            prop_assert_eq!(ab.get(name), ba.get(name), "variable {}", name);
        }
    }

    /// Joining an edge with itself changes nothing.
    #[test]
    fn merge_is_idempotent(a in scope_vars()) {
        let sa = scope_from(&a);
        let merged = sa.merge(&sa);
        for (name, state) in &a {
            prop_assert_eq!(merged.get(name), Some(*state));
        }
    }

    /// The join never claims more definiteness than both inputs had: a
    /// variable is Known afterward only when both sides agreed on the same
    /// derivation.
    #[test]
    fn merge_only_widens(a in scope_vars(), b in scope_vars()) {
        let merged = scope_from(&a).merge(&scope_from(&b));
        for name in a.keys().chain(b.keys()) {
            if let Some(state) = merged.get(name) {
                if state.is_known() {
                    prop_assert_eq!(a.get(name), b.get(name), "variable {}", name);
                    prop_assert_eq!(a.get(name).copied(), Some(state));
                }
            }
        }
    }

    /// A variable absent from either edge is never trusted after the join.
    #[test]
    fn merge_widens_one_sided_variables(a in scope_vars()) {
        let sa = scope_from(&a);
        let empty = FlowScope::new();
        let merged = sa.merge(&empty);
        for name in a.keys() {
            prop_assert_eq!(merged.get(name), Some(VarState::Unknown));
        }
    }

    /// Widening everything then joining can never resurrect definiteness.
    #[test]
    fn set_unknown_is_absorbing(a in scope_vars()) {
        let sa = scope_from(&a);
        let mut widened = sa.fork();
        widened.set_unknown();
        let merged = sa.merge(&widened);
        for (name, _) in &a {
            prop_assert_eq!(merged.get(name), Some(VarState::Unknown));
        }
    }
}
