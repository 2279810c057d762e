use flagcore::filter::{Filter, GroupOp};
use flagcore::operator::ContextOp;
use flagcore::{engine::evaluate_flag, Rule};
use serde_json::json;

#[test]
fn simple_match_on_plan() {
    let rules = vec![Rule {
        value: json!(true),
        filter: Filter::Context { field: "company.plan".into(), operator: ContextOp::Is, values: vec!["pro".into()] },
    }];
    let result = evaluate_flag("new-onboarding", &rules, &json!({"company": {"plan": "pro"}}));
    assert_eq!(result.value, Some(json!(true)));
}

#[test]
fn no_match_records_missing_field_and_degrades_to_off() {
    let rules = vec![Rule {
        value: json!(true),
        filter: Filter::Context { field: "user.email".into(), operator: ContextOp::Contains, values: vec!["@acme.com".into()] },
    }];
    let result = evaluate_flag("employee-flag", &rules, &json!({}));
    assert_eq!(result.value, None);
    assert_eq!(result.missing_context_fields, vec!["user.email".to_string()]);
}

#[test]
fn rollout_below_threshold_gates_on_hash_bucket() {
    // "EEuoT8KShb" hashes to bucket 38026.
    let rules = vec![
        Rule {
            value: json!("in-rollout"),
            filter: Filter::Rollout {
                key: "checkout-v2".into(),
                partial_rollout_attribute: "user.id".into(),
                partial_rollout_threshold: 40_000,
            },
        },
        Rule { value: json!("control"), filter: Filter::Constant { value: true } },
    ];
    let in_rollout = evaluate_flag("checkout-v2", &rules, &json!({"user": {"id": "EEuoT8KShb"}}));
    assert_eq!(in_rollout.value, Some(json!("in-rollout")));

    let rules_low_threshold = vec![
        Rule {
            value: json!("in-rollout"),
            filter: Filter::Rollout {
                key: "checkout-v2".into(),
                partial_rollout_attribute: "user.id".into(),
                partial_rollout_threshold: 10_000,
            },
        },
        Rule { value: json!("control"), filter: Filter::Constant { value: true } },
    ];
    let out_of_rollout = evaluate_flag("checkout-v2", &rules_low_threshold, &json!({"user": {"id": "EEuoT8KShb"}}));
    assert_eq!(out_of_rollout.value, Some(json!("control")));
}

#[test]
fn group_and_with_negation_excludes_trial_accounts() {
    let rules = vec![Rule {
        value: json!("pro-feature"),
        filter: Filter::Group {
            operator: GroupOp::And,
            filters: vec![
                Filter::Context { field: "company.plan".into(), operator: ContextOp::Is, values: vec!["pro".into()] },
                Filter::Negation {
                    filter: Box::new(Filter::Context { field: "company.trial".into(), operator: ContextOp::IsTrue, values: vec![] }),
                },
            ],
        },
    }];
    let matches = evaluate_flag("pro-feature", &rules, &json!({"company": {"plan": "pro", "trial": "false"}}));
    assert_eq!(matches.value, Some(json!("pro-feature")));

    let excluded = evaluate_flag("pro-feature", &rules, &json!({"company": {"plan": "pro", "trial": "true"}}));
    assert_eq!(excluded.value, None);
}

#[test]
fn date_after_is_inclusive_on_the_cutoff_day() {
    let rules = vec![Rule {
        value: json!(true),
        filter: Filter::Context {
            field: "company.created_at".into(),
            operator: ContextOp::DateAfter,
            values: vec!["2024-01-10".into()],
        },
    }];
    let result = evaluate_flag("new-accounts", &rules, &json!({"company": {"created_at": "2024-01-10T00:00:00Z"}}));
    assert_eq!(result.value, Some(json!(true)));
}

#[test]
fn contains_is_case_insensitive() {
    let rules = vec![Rule {
        value: json!(true),
        filter: Filter::Context { field: "user.role".into(), operator: ContextOp::Contains, values: vec!["value".into()] },
    }];
    let matches = evaluate_flag("flag", &rules, &json!({"user": {"role": "start VALUE end"}}));
    assert_eq!(matches.value, Some(json!(true)));

    let no_match = evaluate_flag("flag", &rules, &json!({"user": {"role": "alue"}}));
    assert_eq!(no_match.value, None);
}
