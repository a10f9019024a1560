use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::error::{QueryError, Result};
use elkwatch_common::types::QueryCondition;

/// Builds the search request body for one evaluation window.
///
/// The time range is always the first `must` clause, querying
/// `@timestamp ∈ [from, to)` in UTC. Conditions with `logic=and` are
/// appended directly to `must`; `or` conditions (the default) are pooled
/// into a single inner `bool.should` with `minimum_should_match: 1`.
/// Results sort ascending by `@timestamp`.
pub fn build_search_body(
    conditions: &[QueryCondition],
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Value> {
    let mut must = vec![json!({
        "range": {
            "@timestamp": {
                "gte": from.to_rfc3339_opts(SecondsFormat::Secs, true),
                "lt": to.to_rfc3339_opts(SecondsFormat::Secs, true),
                "format": "strict_date_optional_time",
            }
        }
    })];
    must.extend(build_condition_clauses(conditions)?);

    Ok(json!({
        "query": { "bool": { "must": must } },
        "sort": [ { "@timestamp": { "order": "asc" } } ],
    }))
}

fn build_condition_clauses(conditions: &[QueryCondition]) -> Result<Vec<Value>> {
    let mut and_clauses = Vec::new();
    let mut or_clauses = Vec::new();

    for condition in conditions {
        let clause = build_single_clause(condition)?;
        match condition.effective_logic() {
            "and" => and_clauses.push(clause),
            _ => or_clauses.push(clause),
        }
    }

    let mut result = and_clauses;
    if !or_clauses.is_empty() {
        result.push(json!({
            "bool": {
                "should": or_clauses,
                "minimum_should_match": 1,
            }
        }));
    }
    Ok(result)
}

fn build_single_clause(condition: &QueryCondition) -> Result<Value> {
    if let Some(operator) = condition.effective_operator() {
        return build_operator_clause(condition, operator);
    }
    build_legacy_clause(condition)
}

fn build_operator_clause(condition: &QueryCondition, operator: &str) -> Result<Value> {
    let field = &condition.field;
    let value = &condition.value;

    let clause = match operator {
        "=" | "==" | "equals" => json!({ "term": { field: value } }),
        "!=" | "not_equals" => json!({
            "bool": { "must_not": [ { "term": { field: value } } ] }
        }),
        ">" | "gt" => json!({ "range": { field: { "gt": value } } }),
        ">=" | "gte" => json!({ "range": { field: { "gte": value } } }),
        "<" | "lt" => json!({ "range": { field: { "lt": value } } }),
        "<=" | "lte" => json!({ "range": { field: { "lte": value } } }),
        "contains" => match value.as_str() {
            // 通配符元字符转义成字面量，contains 才是真正的子串匹配
            Some(s) => json!({
                "wildcard": {
                    field: {
                        "value": format!("*{}*", escape_wildcard_literal(s)),
                        "case_insensitive": true,
                    }
                }
            }),
            None => json!({ "match": { field: value } }),
        },
        "not_contains" => match value.as_str() {
            Some(s) => json!({
                "bool": {
                    "must_not": [ {
                        "wildcard": {
                            field: {
                                "value": format!("*{}*", escape_wildcard_literal(s)),
                                "case_insensitive": true,
                            }
                        }
                    } ]
                }
            }),
            None => json!({
                "bool": { "must_not": [ { "match": { field: value } } ] }
            }),
        },
        "exists" => json!({ "exists": { "field": field } }),
        other => return Err(QueryError::UnsupportedOperator(other.to_string())),
    };
    Ok(clause)
}

/// Legacy conditions carry a raw query `type` instead of an operator.
fn build_legacy_clause(condition: &QueryCondition) -> Result<Value> {
    let field = &condition.field;
    let value = &condition.value;
    let query_type = condition.query_type.as_deref().unwrap_or("match_phrase");

    let clause = match query_type {
        "match" | "match_phrase" | "regexp" | "wildcard" => {
            json!({ query_type: { field: value } })
        }
        "term" => json!({ "term": { field: value } }),
        "terms" => json!({ "terms": { field: value } }),
        "range" => {
            if !value.is_object() {
                return Err(QueryError::InvalidValue {
                    field: field.clone(),
                    detail: "range condition requires an object value".to_string(),
                });
            }
            json!({ "range": { field: value } })
        }
        "exists" => json!({ "exists": { "field": field } }),
        other => return Err(QueryError::UnsupportedOperator(other.to_string())),
    };
    Ok(clause)
}

/// Escapes characters with special meaning in ES wildcard queries so the
/// pattern matches them literally.
fn escape_wildcard_literal(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('*', "\\*")
        .replace('?', "\\?")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn condition(field: &str, operator: &str, value: Value) -> QueryCondition {
        QueryCondition {
            field: field.to_string(),
            query_type: None,
            value,
            operator: Some(operator.to_string()),
            op: None,
            logic: None,
        }
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 11, 28, 11, 55, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn time_range_is_first_must_clause() {
        let (from, to) = window();
        let body = build_search_body(&[], from, to).unwrap();

        let must = &body["query"]["bool"]["must"];
        assert_eq!(must.as_array().unwrap().len(), 1);
        let range = &must[0]["range"]["@timestamp"];
        assert_eq!(range["gte"], "2025-11-28T11:55:00Z");
        assert_eq!(range["lt"], "2025-11-28T12:00:00Z");
        assert_eq!(range["format"], "strict_date_optional_time");
        assert_eq!(body["sort"][0]["@timestamp"]["order"], "asc");
    }

    #[test]
    fn equality_builds_term() {
        let clause =
            build_single_clause(&condition("level", "=", json!("error"))).unwrap();
        assert_eq!(clause, json!({ "term": { "level": "error" } }));

        let clause =
            build_single_clause(&condition("level", "equals", json!("error"))).unwrap();
        assert_eq!(clause, json!({ "term": { "level": "error" } }));
    }

    #[test]
    fn inequality_builds_negated_term() {
        let clause =
            build_single_clause(&condition("level", "!=", json!("debug"))).unwrap();
        assert_eq!(
            clause,
            json!({ "bool": { "must_not": [ { "term": { "level": "debug" } } ] } })
        );
    }

    #[test]
    fn comparative_operators_build_range() {
        for (op, key) in [(">", "gt"), (">=", "gte"), ("<", "lt"), ("<=", "lte")] {
            let clause =
                build_single_clause(&condition("response_code", op, json!(500))).unwrap();
            assert_eq!(clause, json!({ "range": { "response_code": { key: 500 } } }));
        }
        for (op, key) in [("gt", "gt"), ("gte", "gte"), ("lt", "lt"), ("lte", "lte")] {
            let clause =
                build_single_clause(&condition("response_code", op, json!(500))).unwrap();
            assert_eq!(clause, json!({ "range": { "response_code": { key: 500 } } }));
        }
    }

    #[test]
    fn contains_builds_case_insensitive_wildcard() {
        let clause =
            build_single_clause(&condition("message", "contains", json!("timeout"))).unwrap();
        assert_eq!(
            clause,
            json!({
                "wildcard": {
                    "message": { "value": "*timeout*", "case_insensitive": true }
                }
            })
        );
    }

    #[test]
    fn contains_escapes_wildcard_metacharacters() {
        let clause =
            build_single_clause(&condition("message", "contains", json!("*?a\\b"))).unwrap();
        assert_eq!(
            clause["wildcard"]["message"]["value"],
            "*\\*\\?a\\\\b*"
        );
    }

    #[test]
    fn contains_falls_back_to_match_for_non_strings() {
        let clause =
            build_single_clause(&condition("response_code", "contains", json!(500))).unwrap();
        assert_eq!(clause, json!({ "match": { "response_code": 500 } }));
    }

    #[test]
    fn not_contains_builds_negated_wildcard() {
        let clause =
            build_single_clause(&condition("message", "not_contains", json!("ok"))).unwrap();
        assert_eq!(
            clause,
            json!({
                "bool": {
                    "must_not": [ {
                        "wildcard": {
                            "message": { "value": "*ok*", "case_insensitive": true }
                        }
                    } ]
                }
            })
        );
    }

    #[test]
    fn exists_builds_field_existence() {
        let clause =
            build_single_clause(&condition("cf_ray", "exists", Value::Null)).unwrap();
        assert_eq!(clause, json!({ "exists": { "field": "cf_ray" } }));
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let err = build_single_clause(&condition("a", "~=", json!(1))).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator(op) if op == "~="));
    }

    #[test]
    fn and_conditions_join_must_or_conditions_pool_into_should() {
        let (from, to) = window();
        let conditions = vec![
            QueryCondition {
                logic: Some("and".to_string()),
                ..condition("domain", "=", json!("api.example.com"))
            },
            condition("response_code", ">=", json!(500)),
            condition("response_code", "=", json!(499)),
        ];

        let body = build_search_body(&conditions, from, to).unwrap();
        let must = body["query"]["bool"]["must"].as_array().unwrap();

        // 时间范围 + and 条件 + 合并后的 should 块
        assert_eq!(must.len(), 3);
        assert_eq!(must[1], json!({ "term": { "domain": "api.example.com" } }));
        let should = &must[2]["bool"];
        assert_eq!(should["minimum_should_match"], 1);
        assert_eq!(should["should"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn legacy_type_hints_still_build() {
        let cond = QueryCondition {
            field: "message".to_string(),
            query_type: None,
            value: json!("connection reset"),
            operator: None,
            op: None,
            logic: None,
        };
        // 无 operator 无 type：默认 match_phrase
        assert_eq!(
            build_single_clause(&cond).unwrap(),
            json!({ "match_phrase": { "message": "connection reset" } })
        );

        let cond = QueryCondition {
            query_type: Some("terms".to_string()),
            ..condition("level", "", json!(["error", "fatal"]))
        };
        let cond = QueryCondition { operator: None, ..cond };
        assert_eq!(
            build_single_clause(&cond).unwrap(),
            json!({ "terms": { "level": ["error", "fatal"] } })
        );

        let cond = QueryCondition {
            query_type: Some("range".to_string()),
            operator: None,
            ..condition("took_ms", "", json!("not-an-object"))
        };
        assert!(matches!(
            build_single_clause(&cond).unwrap_err(),
            QueryError::InvalidValue { .. }
        ));
    }

    #[test]
    fn rebuild_is_structurally_stable() {
        let (from, to) = window();
        let conditions = vec![
            condition("response_code", ">=", json!(500)),
            QueryCondition {
                logic: Some("and".to_string()),
                ..condition("message", "contains", json!("upstream"))
            },
        ];

        let first = build_search_body(&conditions, from, to).unwrap();
        let second = build_search_body(&conditions, from, to).unwrap();
        assert_eq!(first, second);
    }
}
