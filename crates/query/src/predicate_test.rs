//! Tests for event predicates

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Value, json};

use crate::predicate::{
    Operator, Predicate, PropertyCondition, PropertyLookup, PropertyScope, value_as_f64,
    value_to_string,
};

struct TestEvent {
    name: &'static str,
    person: Option<&'static str>,
    props: HashMap<String, Value>,
}

impl PropertyLookup for TestEvent {
    fn event_name(&self) -> &str {
        self.name
    }

    fn property(&self, scope: &PropertyScope, key: &str) -> Option<Value> {
        match scope {
            PropertyScope::Event => self.props.get(key).cloned(),
            _ => None,
        }
    }

    fn person_id(&self) -> Option<&str> {
        self.person
    }
}

fn event(props: Value) -> TestEvent {
    let props = props
        .as_object()
        .unwrap()
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    TestEvent {
        name: "$pageview",
        person: Some("p1"),
        props,
    }
}

fn cond(key: &str, operator: Operator, value: Value) -> Predicate {
    Predicate::property(PropertyCondition::new(key, PropertyScope::Event, operator, value))
}

#[test]
fn test_operator_parse() {
    assert_eq!(Operator::parse("exact"), Some(Operator::Exact));
    assert_eq!(Operator::parse("IS_NOT"), Some(Operator::IsNot));
    assert_eq!(Operator::parse("not_icontains"), Some(Operator::NotIContains));
    assert_eq!(Operator::parse("is_date_before"), None);
    assert_eq!(Operator::IContains.as_str(), "icontains");
}

#[test]
fn test_exact_compares_text_forms() {
    let e = event(json!({"plan": "pro", "seats": 3}));
    assert!(cond("plan", Operator::Exact, json!("pro")).evaluate(&e));
    assert!(cond("plan", Operator::Exact, json!(["free", "pro"])).evaluate(&e));
    assert!(cond("seats", Operator::Exact, json!("3")).evaluate(&e));
    assert!(!cond("missing", Operator::Exact, json!("pro")).evaluate(&e));
}

#[test]
fn test_negative_operators_match_missing() {
    let e = event(json!({"plan": "pro"}));
    assert!(cond("missing", Operator::IsNot, json!("pro")).evaluate(&e));
    assert!(cond("missing", Operator::NotIContains, json!("x")).evaluate(&e));
    assert!(cond("missing", Operator::NotRegex, json!("x")).evaluate(&e));
    assert!(!cond("plan", Operator::IsNot, json!("pro")).evaluate(&e));
}

#[test]
fn test_icontains_and_regex() {
    let e = event(json!({"$current_url": "https://Example.com/pricing"}));
    assert!(cond("$current_url", Operator::IContains, json!("example")).evaluate(&e));
    assert!(cond("$current_url", Operator::Regex, json!(r"/pric\w+$")).evaluate(&e));
    assert!(!cond("$current_url", Operator::Regex, json!("(unclosed")).evaluate(&e));
}

#[test]
fn test_regex_compiled_once() {
    let condition =
        PropertyCondition::new("$current_url", PropertyScope::Event, Operator::Regex, json!("^/a"));
    let first = condition.compiled_pattern().unwrap() as *const regex::Regex;

    assert!(condition.matches(Some(&json!("/about"))));
    assert!(!condition.matches(Some(&json!("/pricing"))));
    assert!(std::ptr::eq(first, condition.compiled_pattern().unwrap()));

    // clones carry the compiled pattern and still compare by value
    let clone = condition.clone();
    assert!(clone.matches(Some(&json!("/account"))));
    assert_eq!(clone, condition);

    let invalid =
        PropertyCondition::new("$current_url", PropertyScope::Event, Operator::NotRegex, json!("("));
    assert!(invalid.compiled_pattern().is_none());
    assert!(invalid.matches(Some(&json!("/about"))));
}

#[test]
fn test_numeric_comparisons() {
    let e = event(json!({"price": "12.5", "name": "abc"}));
    assert!(cond("price", Operator::Gt, json!(10)).evaluate(&e));
    assert!(cond("price", Operator::Lte, json!(12.5)).evaluate(&e));
    assert!(!cond("price", Operator::Lt, json!(12)).evaluate(&e));
    assert!(!cond("name", Operator::Gt, json!(0)).evaluate(&e));
}

#[test]
fn test_is_set_treats_null_as_unset() {
    let e = event(json!({"a": null, "b": 0}));
    assert!(cond("a", Operator::IsNotSet, Value::Null).evaluate(&e));
    assert!(cond("b", Operator::IsSet, Value::Null).evaluate(&e));
    assert!(cond("c", Operator::IsNotSet, Value::Null).evaluate(&e));
}

#[test]
fn test_composition() {
    let e = event(json!({"plan": "pro"}));
    let members: HashSet<String> = ["p1".to_string()].into_iter().collect();

    let p = Predicate::and([
        Predicate::event("$pageview"),
        Predicate::PersonIn(Arc::new(members)),
        cond("plan", Operator::Exact, json!("pro")),
    ]);
    assert!(p.evaluate(&e));
    assert!(!p.clone().negate().evaluate(&e));
    assert!(!Predicate::none().evaluate(&e));
    assert!(Predicate::or([Predicate::event("other"), Predicate::All]).evaluate(&e));
}

#[test]
fn test_and_flattens() {
    let p = Predicate::and([
        Predicate::All,
        Predicate::and([Predicate::event("a"), Predicate::event("b")]),
    ]);
    assert_eq!(p, Predicate::And(vec![Predicate::event("a"), Predicate::event("b")]));
    assert_eq!(Predicate::and([Predicate::All]), Predicate::All);
}

#[test]
fn test_value_helpers() {
    assert_eq!(value_to_string(&json!(3)), "3");
    assert_eq!(value_to_string(&json!(3.0)), "3");
    assert_eq!(value_to_string(&json!(2.5)), "2.5");
    assert_eq!(value_to_string(&json!(true)), "true");
    assert_eq!(value_to_string(&Value::Null), "");
    assert_eq!(value_as_f64(&json!(" 7.5 ")), Some(7.5));
    assert_eq!(value_as_f64(&json!("abc")), None);
    assert_eq!(value_as_f64(&json!(false)), None);
}
