//! Integration tests for end-to-end accumulate evaluation.
//!
//! These tests drive the full lifecycle:
//! Plan → Compile → Init → Accumulate/Reverse → Result

use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use tally_core::{
    AccumulateError, Accumulator, Binding, BindingArena, BindingId, BindingPlan, CompileCause, CompileLock,
    ContextError, EngineConfig, Extractor, Fact, FactId, InMemoryWorkingMemory, Scenario, ScriptCompiler, Segment,
    StandardTypes, Value,
};
use tally_script::{EvalError, ScriptError};
use tally_tests::{average, average_with, fact_average, folding, weighted_sum, TestHarness};

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::from).collect()
}

fn demo(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../demos")
        .join(name)
}

/// The three-order average: fold, read, retract the middle order.
#[test]
fn test_average_lifecycle() {
    let mut harness = TestHarness::new();
    let facts: Vec<Fact> = [10, 20, 30].into_iter().map(|n| harness.insert(n)).collect();
    let acc = average(true);
    harness.compile(&acc);

    let mut session = harness.session(&acc);
    assert_eq!(session.variables(), ints(&[0, 0]));
    assert_eq!(session.result(), Value::Integer(0));

    for fact in &facts {
        session.accumulate(fact);
    }
    assert_eq!(session.variables(), ints(&[60, 3]));
    assert_eq!(session.result(), Value::Integer(20));

    session.reverse(&facts[1]);
    assert_eq!(session.variables(), ints(&[40, 2]));
    assert_eq!(session.result(), Value::Integer(20));
    assert_eq!(session.context.snapshot_count(), 2);
}

/// Folding every fact and then reversing every fact restores the state
/// `init` produced, whatever order the retractions come in.
#[test]
fn test_reverse_all_restores_initial_state() {
    let mut harness = TestHarness::new();
    let facts: Vec<Fact> = [3, 9, 4, 12, 7].into_iter().map(|n| harness.insert(n)).collect();
    let acc = average(true);
    harness.compile(&acc);

    let orders: [[usize; 5]; 4] = [[0, 1, 2, 3, 4], [4, 3, 2, 1, 0], [2, 0, 4, 1, 3], [1, 3, 0, 4, 2]];
    for order in orders {
        let mut session = harness.session(&acc);
        let initial = session.variables();
        let fresh = session.result();
        for fact in &facts {
            session.accumulate(fact);
        }
        for index in order {
            session.reverse(&facts[index]);
        }
        assert_eq!(session.variables(), initial, "retraction order {order:?}");
        assert_eq!(session.result(), fresh, "retraction order {order:?}");
        assert_eq!(session.context.snapshot_count(), 0);
    }
}

/// Scripts that read the fact slot itself, with a `null` result for an
/// empty group.
#[test]
fn test_fact_slot_average() {
    let mut harness = TestHarness::new();
    let facts: Vec<Fact> = [10, 20, 30].into_iter().map(|n| harness.insert(n)).collect();
    let acc = fact_average();
    harness.compile(&acc);

    let mut session = harness.session(&acc);
    let fresh = session.result();
    assert_eq!(fresh, Value::Null);

    for fact in &facts {
        session.accumulate(fact);
    }
    assert_eq!(session.result(), Value::Integer(20));

    session.reverse(&facts[1]);
    assert_eq!(session.variables(), ints(&[40, 2]));
    assert_eq!(session.result(), Value::Integer(20));

    session.reverse(&facts[0]);
    session.reverse(&facts[2]);
    assert_eq!(session.variables(), ints(&[0, 0]));
    assert_eq!(session.result(), Value::Null);
    assert_eq!(session.result(), fresh);
}

/// The aggregate does not depend on the order facts are folded in.
#[test]
fn test_fold_order_does_not_matter() {
    let mut harness = TestHarness::new();
    let facts: Vec<Fact> = [3, 9, 4, 12, 7].into_iter().map(|n| harness.insert(n)).collect();
    let acc = average(false);
    harness.compile(&acc);

    let fold = |order: &[usize]| {
        let mut session = harness.session(&acc);
        for &index in order {
            session.accumulate(&facts[index]);
        }
        (session.variables(), session.result())
    };

    let expected = fold(&[0, 1, 2, 3, 4]);
    assert_eq!(expected, (ints(&[35, 5]), Value::Integer(7)));
    assert_eq!(fold(&[4, 3, 2, 1, 0]), expected);
    assert_eq!(fold(&[2, 4, 0, 3, 1]), expected);
}

#[test]
fn test_uncompiled_accumulator_is_rejected() {
    let harness = TestHarness::new();
    let acc = average(true);
    let mut ctx = acc.create_context();

    assert_eq!(
        acc.init(&mut ctx, &harness.tuple, &harness.memory),
        Err(AccumulateError::NotCompiled)
    );
    assert_eq!(
        acc.accumulate(&mut ctx, &harness.tuple, &Fact::new(0u64, 1), &harness.memory),
        Err(AccumulateError::NotCompiled)
    );
}

#[test]
fn test_reverse_requires_reverse_unit() {
    let mut harness = TestHarness::new();
    let fact = harness.insert(4);
    let acc = average(false);
    harness.compile(&acc);
    assert!(!acc.supports_reverse());

    let mut session = harness.session(&acc);
    assert!(!session.context.has_shadow());
    session.accumulate(&fact);
    assert_eq!(
        session.try_reverse(&fact),
        Err(AccumulateError::UnsupportedOperation { operation: "reverse" })
    );
    // State is untouched by the failed reversal.
    assert_eq!(session.variables(), ints(&[4, 1]));
}

#[test]
fn test_reverse_of_unfolded_fact_fails() {
    let mut harness = TestHarness::new();
    let folded = harness.insert(4);
    let unseen = harness.insert(4);
    let acc = average(true);
    harness.compile(&acc);

    let mut session = harness.session(&acc);
    session.accumulate(&folded);
    assert_eq!(
        session.try_reverse(&unseen),
        Err(AccumulateError::MissingSnapshot { fact: unseen.id })
    );

    session.reverse(&folded);
    assert_eq!(
        session.try_reverse(&folded),
        Err(AccumulateError::MissingSnapshot { fact: folded.id })
    );
    assert_eq!(session.variables(), ints(&[0, 0]));
}

/// A fact whose payload changed after it was folded is reversed with the
/// value it was folded with.
#[test]
fn test_reverse_uses_fold_time_fact() {
    let harness = TestHarness::new();
    let acc = average(true);
    harness.compile(&acc);

    let mut session = harness.session(&acc);
    session.accumulate(&Fact::new(1u64, 10));
    session.accumulate(&Fact::new(2u64, 6));

    session.reverse(&Fact::new(1u64, 1000));
    assert_eq!(session.variables(), ints(&[6, 1]));
}

/// Globals are read when a fact is folded; reversal replays that reading.
#[test]
fn test_reverse_uses_fold_time_globals() {
    let harness = TestHarness::new();
    let acc = weighted_sum();
    harness.compile(&acc);

    let before = InMemoryWorkingMemory::new().with_global("weight", 2);
    let mut after = before.clone();
    after.set_global("weight", 5);

    let fact = Fact::new(0u64, 3);
    let mut ctx = acc.create_context();
    acc.init(&mut ctx, &harness.tuple, &before).unwrap();
    acc.accumulate(&mut ctx, &harness.tuple, &fact, &before).unwrap();
    assert_eq!(acc.get_result(&ctx, &harness.tuple, &before).unwrap(), Value::Integer(6));

    acc.reverse(&mut ctx, &harness.tuple, &fact, &after).unwrap();
    assert_eq!(acc.get_result(&ctx, &harness.tuple, &after).unwrap(), Value::Integer(0));
}

/// Previous bindings are read from the match group when a fact is folded;
/// reversal replays that reading even after the group's fact changed.
#[test]
fn test_reverse_uses_fold_time_previous_binding() {
    let harness = TestHarness::new();
    let rate = BindingArena::new().declare("$rate", 0, Extractor::Field("rate".into()));
    let state = |plan: BindingPlan| {
        plan.with_other("total")
            .with_other("count")
            .with_input("total", "Object")
            .with_input("count", "Object")
    };
    let sees_rate = |name: &str, expression: &str| {
        state(
            BindingPlan::new(name, expression)
                .with_previous(rate.clone())
                .with_input("$fact", "Object")
                .with_input("$rate", "int"),
        )
    };
    let acc = Accumulator::new(
        state(BindingPlan::new("rated.init", "total = 0; count = 0;")),
        sees_rate("rated.action", "total += $fact * $rate; count += 1;"),
        Some(sees_rate("rated.reverse", "total -= $fact * $rate; count -= 1;")),
        state(BindingPlan::new("rated.result", "total")),
    );
    harness.compile(&acc);

    let group = |rate: i64| vec![Fact::new(100u64, Value::record([("rate", Value::Integer(rate))]))];
    let before = group(2);
    let after = group(5);

    let first = Fact::new(1u64, 3);
    let second = Fact::new(2u64, 4);
    let mut ctx = acc.create_context();
    acc.init(&mut ctx, &before, &harness.memory).unwrap();
    acc.accumulate(&mut ctx, &before, &first, &harness.memory).unwrap();
    acc.accumulate(&mut ctx, &before, &second, &harness.memory).unwrap();
    assert_eq!(acc.get_result(&ctx, &before, &harness.memory).unwrap(), Value::Integer(14));
    assert_eq!(
        ctx.snapshot(first.id).unwrap().segment(Segment::Previous),
        &[Value::Integer(2)]
    );

    acc.reverse(&mut ctx, &after, &first, &harness.memory).unwrap();
    assert_eq!(ctx.variables(), ints(&[8, 1]).as_slice());
    assert_eq!(acc.get_result(&ctx, &after, &harness.memory).unwrap(), Value::Integer(8));

    // New folds see the current group.
    acc.accumulate(&mut ctx, &after, &first, &harness.memory).unwrap();
    assert_eq!(acc.get_result(&ctx, &after, &harness.memory).unwrap(), Value::Integer(23));
}

/// Engine handles occupy the slots ahead of globals and are readable from
/// scripts.
#[test]
fn test_engine_handle_is_readable() {
    let harness = TestHarness::new();
    let unit = |name: &str, expression: &str, sees_fact: bool| {
        let mut plan = BindingPlan::new(name, expression);
        if sees_fact {
            plan = plan.with_input("$fact", "Object");
        }
        plan.with_engine_identifier("kcontext")
            .with_input("kcontext", "Object")
            .with_global("weight")
            .with_input("weight", "int")
            .with_other("total")
            .with_input("total", "Object")
    };
    let acc = Accumulator::new(
        unit("handle.init", "total = kcontext.base;", false),
        unit("handle.action", "total += $fact * kcontext.scale * weight;", true),
        Some(unit("handle.reverse", "total -= $fact * kcontext.scale * weight;", true)),
        unit("handle.result", "total", false),
    );
    harness.compile(&acc);

    let handle = Value::record([("base", Value::Integer(100)), ("scale", Value::Integer(3))]);
    let memory = InMemoryWorkingMemory::new()
        .with_engine_handle("kcontext", handle.clone())
        .with_global("weight", 2);

    let fact = Fact::new(1u64, 5);
    let mut ctx = acc.create_context();
    acc.init(&mut ctx, &harness.tuple, &memory).unwrap();
    assert_eq!(acc.get_result(&ctx, &harness.tuple, &memory).unwrap(), Value::Integer(100));

    acc.accumulate(&mut ctx, &harness.tuple, &fact, &memory).unwrap();
    assert_eq!(acc.get_result(&ctx, &harness.tuple, &memory).unwrap(), Value::Integer(130));

    let snapshot = ctx.snapshot(fact.id).unwrap();
    assert_eq!(snapshot.segment(Segment::Engine), &[handle]);
    assert_eq!(snapshot.segment(Segment::Globals), &[Value::Integer(2)]);

    acc.reverse(&mut ctx, &harness.tuple, &fact, &memory).unwrap();
    assert_eq!(acc.get_result(&ctx, &harness.tuple, &memory).unwrap(), Value::Integer(100));

    // Without the handle the field read fails.
    let bare = InMemoryWorkingMemory::new().with_global("weight", 2);
    let mut ctx = acc.create_context();
    assert!(acc.init(&mut ctx, &harness.tuple, &bare).is_err());
}

/// Compiling the same plans twice yields identical bytecode and identical
/// initial state.
#[test]
fn test_compilation_is_deterministic() {
    let first = TestHarness::new();
    let second = TestHarness::new();
    let acc = average(true);

    for plan in acc.plans() {
        let a = first.compiler().compile(plan, first.types()).unwrap();
        let b = second.compiler().compile(plan, second.types()).unwrap();
        assert_eq!(a.chunk(), b.chunk(), "unit {}", plan.name);
        assert_eq!(a.layout(), b.layout());
    }

    let one = acc.clone();
    let two = acc.clone();
    first.compile(&one);
    second.compile(&two);
    assert_eq!(first.session(&one).variables(), second.session(&two).variables());
}

/// Distinct contexts over one compiled accumulator evaluate in parallel.
#[test]
fn test_parallel_groups_share_compiled_units() {
    let harness = TestHarness::new();
    let acc = average(true);
    harness.compile(&acc);

    let results: Vec<(i64, Value, usize)> = (1..=32i64)
        .into_par_iter()
        .map(|n| {
            let facts: Vec<Fact> = (0..n).map(|v| Fact::new(v as u64, v)).collect();
            let mut session = harness.session(&acc);
            for fact in &facts {
                session.accumulate(fact);
            }
            for fact in facts.iter().step_by(2) {
                session.reverse(fact);
            }
            (n, session.result(), session.context.snapshot_count())
        })
        .collect();

    for (n, result, snapshots) in results {
        let odd: Vec<i64> = (0..n).filter(|v| v % 2 == 1).collect();
        let count = odd.len() as i64;
        let expected = if count == 0 { 0 } else { odd.iter().sum::<i64>() / count };
        assert_eq!(result, Value::Integer(expected), "group of {n}");
        assert_eq!(snapshots, odd.len());
    }
}

/// Racing first compilations leave one usable set of units.
#[test]
fn test_concurrent_first_compile() {
    let harness = TestHarness::new();
    let acc = average(true);

    (0..8).into_par_iter().for_each(|_| harness.compile(&acc));
    assert!(acc.is_compiled());

    let mut session = harness.session(&acc);
    session.accumulate(&Fact::new(0u64, 9));
    assert_eq!(session.result(), Value::Integer(9));
}

/// Compilers built from one lock serialize against each other.
#[test]
fn test_compilers_share_injected_lock() {
    let lock = CompileLock::new();
    let compilers: Vec<ScriptCompiler> = (0..4)
        .map(|_| ScriptCompiler::new(lock.clone(), EngineConfig::default()))
        .collect();
    assert!(compilers.iter().all(|c| c.lock().same_lock(&lock)));

    let types = StandardTypes::default();
    let acc = average(true);
    let chunks: Vec<_> = compilers
        .par_iter()
        .map(|compiler| compiler.compile(acc.action_plan(), &types).unwrap())
        .collect();
    assert!(chunks.windows(2).all(|pair| pair[0].chunk() == pair[1].chunk()));
}

#[test]
fn test_persisted_accumulator_round_trip() {
    let harness = TestHarness::new();
    let acc = average(true);
    harness.compile(&acc);

    let json = serde_json::to_string(&acc).unwrap();
    let restored: Accumulator = serde_json::from_str(&json).unwrap();
    assert!(!restored.is_compiled());
    assert!(restored.supports_reverse());
    for (a, b) in acc.plans().zip(restored.plans()) {
        assert_eq!(a, b);
    }

    harness.compile(&restored);
    let mut original = harness.session(&acc);
    let mut revived = harness.session(&restored);
    for n in [5, 15, 25] {
        let fact = Fact::new(n as u64, n);
        original.accumulate(&fact);
        revived.accumulate(&fact);
    }
    assert_eq!(original.variables(), revived.variables());
    assert_eq!(revived.result(), Value::Integer(15));
}

#[test]
fn test_clone_shares_plan_arrays() {
    let harness = TestHarness::new();
    let acc = average(true);
    harness.compile(&acc);

    let copy = acc.clone();
    assert!(!copy.is_compiled());
    assert!(Arc::ptr_eq(
        &acc.action_plan().input_identifiers,
        &copy.action_plan().input_identifiers
    ));
    assert!(Arc::ptr_eq(
        &acc.init_plan().other_identifiers,
        &copy.init_plan().other_identifiers
    ));
}

/// Rebinding `$value` to a field of the fact recompiles every unit that
/// uses it.
#[test]
fn test_replace_binding_recompiles() {
    let mut harness = TestHarness::new();
    let orders: Vec<Fact> = [8, 16]
        .into_iter()
        .map(|amount| harness.insert(Value::record([("amount", Value::from(amount))])))
        .collect();

    let mut acc = average_with(true, Extractor::Whole, "Object");
    harness.compile(&acc);

    let old = acc.action_plan().local_bindings[0].clone();
    let resolved = Binding {
        id: BindingId::new(7),
        extractor: Extractor::Field("amount".into()),
        ..old.clone()
    };
    assert_eq!(acc.replace_binding(old.id, resolved.clone()), 2);
    assert!(!acc.is_compiled());
    assert_eq!(acc.action_plan().local_bindings[0], resolved);
    assert_eq!(acc.replace_binding(old.id, resolved), 0);

    harness.compile(&acc);
    let mut session = harness.session(&acc);
    for order in &orders {
        session.accumulate(order);
    }
    assert_eq!(session.result(), Value::Integer(12));
    session.reverse(&orders[0]);
    assert_eq!(session.result(), Value::Integer(16));
}

/// Redeclaring a typed binding is an error; an untyped slot is assigned.
#[test]
fn test_declaration_over_fixed_slot() {
    let harness = TestHarness::new();

    let acc = folding("var $value = 1; total += $value;", None);
    harness.compile(&acc);
    let mut session = harness.session(&acc);
    assert_eq!(
        session.try_accumulate(&Fact::new(0u64, 5)),
        Err(AccumulateError::Eval(EvalError::DuplicateBinding {
            name: "$value".into()
        }))
    );

    let acc = folding("var total = $value * 10; count += 1;", None);
    harness.compile(&acc);
    let mut session = harness.session(&acc);
    session.accumulate(&Fact::new(0u64, 5));
    session.accumulate(&Fact::new(1u64, 2));
    assert_eq!(session.result(), Value::Integer(20));
}

#[test]
fn test_strict_mode() {
    let strict = EngineConfig {
        strict_mode: true,
        ..EngineConfig::default()
    };
    let harness = TestHarness::with_config(strict.clone());

    let plan = strict
        .plan("strict.action", "total = total + missing;")
        .with_other("total")
        .with_input("total", "Object");
    let err = harness.compiler().compile(&plan, harness.types()).unwrap_err();
    assert_eq!(err.unit, "strict.action");
    assert_eq!(err.symbol, "missing");
    assert!(matches!(err.cause, CompileCause::Script(ScriptError::UnknownIdentifier { .. })));

    // Stores into typed slots are checked at run time.
    let count = |expression: &str| {
        strict
            .plan("strict.init", expression)
            .with_other("count")
            .with_input("count", "int")
    };
    let acc = Accumulator::new(count("count = 'none';"), count(""), None, count("count"));
    harness.compile(&acc);
    let mut ctx = acc.create_context();
    let err = acc.init(&mut ctx, &harness.tuple, &harness.memory).unwrap_err();
    assert!(matches!(err, AccumulateError::Eval(EvalError::TypeMismatch { .. })));
}

#[test]
fn test_plan_errors_surface_at_compile() {
    let harness = TestHarness::new();

    let plan = BindingPlan::new("bad", "1").with_input("a", "Object");
    let err = harness.compiler().compile(&plan.with_input("a", "Object"), harness.types()).unwrap_err();
    assert!(matches!(err.cause, CompileCause::InvalidPlan(_)));

    let plan = BindingPlan::new("bad", "1").with_imported_type("java.util.Nope");
    let err = harness.compiler().compile(&plan, harness.types()).unwrap_err();
    assert_eq!(err.cause, CompileCause::UnresolvedImport);
    assert_eq!(err.symbol, "java.util.Nope");
}

/// Previous bindings read the match group; a short group is an error.
#[test]
fn test_previous_binding_needs_tuple_fact() {
    let mut harness = TestHarness::new();
    let customer = BindingArena::new().declare("$customer", 1, Extractor::Field("name".into()));
    let unit = |name: &str, expression: &str| {
        BindingPlan::new(name, expression)
            .with_previous(customer.clone())
            .with_input("$customer", "Object")
            .with_other("seen")
            .with_input("seen", "Object")
    };
    let acc = Accumulator::new(
        unit("init", "seen = $customer;"),
        unit("action", ""),
        None,
        unit("result", "seen"),
    );
    harness.compile(&acc);

    let mut ctx = acc.create_context();
    let err = acc.init(&mut ctx, &harness.tuple, &harness.memory).unwrap_err();
    assert!(matches!(
        err,
        AccumulateError::Context(ContextError::MissingTupleFact { offset: 1, len: 0, .. })
    ));

    let first = harness.insert(Value::Null);
    let second = harness.insert(Value::record([("name", Value::from("ada"))]));
    harness.tuple = vec![first, second];
    let session = harness.session(&acc);
    assert_eq!(session.result(), Value::from("ada"));
}

/// Non-reversible accumulators are recomputed on retraction by the
/// scenario runner.
#[test]
fn test_demo_scenarios() {
    let lock = CompileLock::new();
    let types = StandardTypes::default();

    let reversible = Scenario::load(demo("average_order.yaml")).unwrap();
    let report = reversible.run(&lock, &types).unwrap();
    assert!(report.reversible);
    assert!(report.passed(), "{:?}", report.mismatches().collect::<Vec<_>>());
    assert!(report.steps.iter().all(|step| !step.recomputed));

    let recomputing = Scenario::load(demo("largest_discount.yaml")).unwrap();
    let report = recomputing.run(&lock, &types).unwrap();
    assert!(!report.reversible);
    assert!(report.passed(), "{:?}", report.mismatches().collect::<Vec<_>>());
    assert!(report.steps[4].recomputed);
    assert!(report.steps[6].recomputed);
}

#[test]
fn test_fact_ids_are_stable() {
    let mut harness = TestHarness::new();
    let a = harness.insert(1);
    let b = harness.insert(1);
    assert_ne!(a.id, b.id);
    assert_eq!(b.id, FactId::new(a.id.get() + 1));
}
