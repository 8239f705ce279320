//! Property tests for the expression sandbox (SPEC_FULL §8 `[AMBIENT]`):
//! arbitrary arithmetic/boolean expressions never panic, and malformed input
//! fails closed rather than propagating an error.

use dygram_runtime::expr::eval::Env;
use dygram_runtime::expr::evaluate_guard;
use proptest::prelude::*;

fn arb_atom() -> impl Strategy<Value = String> {
    prop_oneof![
        (-1000i64..1000).prop_map(|n| n.to_string()),
        Just("true".to_string()),
        Just("false".to_string()),
        Just("errorCount".to_string()),
        Just("activeState".to_string()),
        Just("unknownIdentifier".to_string()),
    ]
}

fn arb_op() -> impl Strategy<Value = &'static str> {
    prop_oneof![
        Just("+"),
        Just("-"),
        Just("*"),
        Just("/"),
        Just("=="),
        Just("!="),
        Just("<"),
        Just(">"),
        Just("&&"),
        Just("||"),
    ]
}

proptest! {
    /// No combination of atoms and operators the grammar can produce should
    /// ever panic the evaluator; it always resolves to a boolean.
    #[test]
    fn guard_evaluation_never_panics(a in arb_atom(), op in arb_op(), b in arb_atom()) {
        let expr = format!("{a} {op} {b}");
        let env = Env::default();
        let _ = evaluate_guard(&expr, &env);
    }

    /// Arbitrary byte soup that isn't valid expression syntax must fail
    /// closed (`false`), never panic or propagate a parse error outward.
    #[test]
    fn malformed_input_fails_closed(garbage in "\\PC{0,64}") {
        let env = Env::default();
        let _ = evaluate_guard(&garbage, &env);
    }

    /// Oversized input is rejected before evaluation, regardless of content.
    #[test]
    fn oversized_expression_is_always_false(repeat in 600usize..900) {
        let expr = "1 + ".repeat(repeat);
        let env = Env::default();
        assert!(!evaluate_guard(&expr, &env));
    }
}
