//! Tests for the scenario system.

use super::*;
use crate::compile::{CompileLock, StandardTypes};
use tally_foundation::Value;

const AVERAGE: &str = r#"
apiVersion: tally/v1
kind: Accumulate

metadata:
  name: average_order
  title: "Average order amount"

config:
  strictMode: true

accumulate:
  variables:
    total: Object
    count: Object
  locals:
    - identifier: $amount
      field: amount
      type: int
  init: "total = 0; count = 0;"
  action: "total += $amount; count += 1;"
  reverse: "total -= $amount; count -= 1;"
  result: "count == 0 ? 0 : total / count"

steps:
  - insert: { key: a, value: { amount: 10 } }
  - insert: { key: b, value: { amount: 20 } }
  - insert: { key: c, value: { amount: 30 } }
  - result: { expect: 20 }
  - retract: b
  - result: { expect: 20 }
  - update: { key: c, value: { amount: 50 } }
  - result: { expect: 30 }
"#;

fn run(scenario: &Scenario) -> ScenarioReport {
    scenario.run(&CompileLock::new(), &StandardTypes::default()).unwrap()
}

#[test]
fn test_scenario_from_yaml() {
    let scenario = Scenario::from_yaml(AVERAGE).unwrap();
    assert_eq!(scenario.metadata.name, "average_order");
    assert_eq!(scenario.metadata.title, Some("Average order amount".to_string()));
    assert!(scenario.config.strict_mode);
    assert_eq!(scenario.accumulate.fact_identifier, "$fact");
    assert_eq!(scenario.accumulate.locals[0].ty, "int");
    assert_eq!(scenario.steps.len(), 8);
}

#[test]
fn test_build_lays_out_units() {
    let scenario = Scenario::from_yaml(AVERAGE).unwrap();
    let acc = scenario.accumulator();
    assert_eq!(acc.action_plan().name, "average_order.action");
    assert_eq!(
        acc.action_plan().input_identifiers.to_vec(),
        vec!["$fact", "$amount", "total", "count"]
    );
    assert_eq!(acc.init_plan().input_identifiers.to_vec(), vec!["total", "count"]);
    assert!(acc.init_plan().local_bindings.is_empty());
    assert!(acc.action_plan().strict_mode);
    assert_eq!(
        acc.reverse_plan().unwrap().local_bindings,
        acc.action_plan().local_bindings
    );
}

#[test]
fn test_reversible_run() {
    let report = run(&Scenario::from_yaml(AVERAGE).unwrap());
    assert!(report.reversible);
    assert!(report.passed(), "mismatches: {:?}", report.mismatches().collect::<Vec<_>>());
    assert!(report.steps.iter().all(|step| !step.recomputed));

    let last = report.steps.last().unwrap();
    assert_eq!(last.variables.get("total"), Some(&Value::Integer(60)));
    assert_eq!(last.variables.get("count"), Some(&Value::Integer(2)));
}

#[test]
fn test_non_reversible_run_recomputes() {
    let mut scenario = Scenario::from_yaml(AVERAGE).unwrap();
    scenario.accumulate.reverse = None;
    let report = run(&scenario);
    assert!(!report.reversible);
    assert!(report.passed());
    assert!(report.steps[4].recomputed);
    assert!(report.steps[6].recomputed);
}

#[test]
fn test_mismatch_is_reported() {
    let scenario = Scenario::from_yaml(AVERAGE)
        .unwrap()
        .with_step(Step::result(Some(Value::Integer(99))));
    let report = run(&scenario);
    assert!(!report.passed());
    assert_eq!(report.mismatches().count(), 1);
}

#[test]
fn test_globals_previous_and_package_scope() {
    let yaml = r#"
apiVersion: tally/v1
kind: Accumulate
metadata:
  name: discounted
globals:
  minimum: 5
package:
  name: shop
  values:
    rate: 2
tuple:
  - { name: ada, tier: 3 }
accumulate:
  variables:
    total: Object
  globals:
    minimum: int
  previous:
    - identifier: $tier
      offset: 0
      field: tier
      type: int
  imports:
    types: [Math]
  init: "total = 0;"
  action: "if ($fact >= minimum) { total += Math.max($fact * rate, $tier); }"
  result: "total"
steps:
  - insert: { key: a, value: 1 }
  - insert: { key: b, value: 6 }
  - result: { expect: 12 }
"#;
    let report = run(&Scenario::from_yaml(yaml).unwrap());
    assert!(report.passed(), "{report:?}");
}

#[test]
fn test_schema_validation() {
    let wrong_version = AVERAGE.replace("tally/v1", "tally/v2");
    assert!(matches!(
        Scenario::from_yaml(&wrong_version),
        Err(ScenarioError::InvalidApiVersion(_))
    ));

    let wrong_kind = AVERAGE.replace("kind: Accumulate", "kind: Collect");
    assert!(matches!(Scenario::from_yaml(&wrong_kind), Err(ScenarioError::InvalidKind(_))));

    let no_result = AVERAGE.replace("result: \"count == 0 ? 0 : total / count\"", "");
    assert!(matches!(
        Scenario::from_yaml(&no_result),
        Err(ScenarioError::MissingField(ref field)) if field == "accumulate.result"
    ));

    let empty_step = format!("{AVERAGE}  - {{}}\n");
    assert!(matches!(
        Scenario::from_yaml(&empty_step),
        Err(ScenarioError::InvalidStep { index: 8, .. })
    ));
}

#[test]
fn test_step_errors() {
    let base = Scenario::from_yaml(AVERAGE).unwrap();

    let mut scenario = base.clone();
    scenario.steps = vec![Step::retract("zzz")];
    let err = scenario.run(&CompileLock::new(), &StandardTypes::default()).unwrap_err();
    assert!(matches!(err, ScenarioError::UnknownFact { index: 0, .. }));

    let mut scenario = base;
    let order = |amount: i64| Value::record([("amount", Value::from(amount))]);
    scenario.steps = vec![Step::insert("a", order(1)), Step::insert("a", order(2))];
    let err = scenario.run(&CompileLock::new(), &StandardTypes::default()).unwrap_err();
    assert!(matches!(err, ScenarioError::DuplicateFact { index: 1, .. }));
}

#[test]
fn test_compile_errors_surface() {
    let mut scenario = Scenario::from_yaml(AVERAGE).unwrap();
    scenario.accumulate.action = "total += missing;".to_string();
    let err = scenario.run(&CompileLock::new(), &StandardTypes::default()).unwrap_err();
    match err {
        ScenarioError::Compile(err) => {
            assert_eq!(err.unit, "average_order.action");
            assert_eq!(err.symbol, "missing");
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[test]
fn test_scenario_builder() {
    let accumulate = AccumulateDefinition {
        variables: [("n".to_string(), "Object".to_string())].into_iter().collect(),
        init: "n = 0;".to_string(),
        action: "n += 1;".to_string(),
        result: "n".to_string(),
        ..AccumulateDefinition::default()
    };
    let scenario = Scenario::new("count", accumulate)
        .with_title("Counter")
        .with_step(Step::insert("x", 1))
        .with_step(Step::insert("y", 1))
        .with_step(Step::retract("x"))
        .with_step(Step::result(Some(Value::Integer(1))));

    let report = run(&scenario);
    assert!(report.passed());
    assert!(report.steps[2].recomputed);
}

#[test]
fn test_values_match_widens_numbers() {
    assert!(values_match(&Value::Integer(20), &Value::Float(20.0)));
    assert!(values_match(&Value::from("a"), &Value::from("a")));
    assert!(!values_match(&Value::Integer(1), &Value::from("1")));
}
