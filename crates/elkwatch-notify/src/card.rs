use chrono::{DateTime, Local, Utc};
use serde_json::{json, Value};

use elkwatch_common::types::LogDocument;

/// Samples rendered into the card body.
const MAX_DISPLAY_LOGS: usize = 3;

/// Rule-name keywords that mark application-style logs.
const APP_LOG_KEYWORDS: &[&str] = &[
    "java",
    "go",
    "c++",
    "cpp",
    "python",
    "nodejs",
    "node",
    "app",
    "application",
    "service",
    "api",
    "web",
];

/// Builds the interactive-card payload for one alert.
///
/// Shows rule name, time range, the pre-truncation match count, the index
/// pattern, and up to 3 structured log samples. Sample field extraction is
/// log-type aware, keyed off the rule name.
pub fn build_card(
    rule_name: &str,
    index_name: &str,
    logs: &[LogDocument],
    log_count: usize,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Value {
    let mut elements = vec![
        json!({
            "tag": "div",
            "text": {
                "tag": "lark_md",
                "content": format!("**📋 规则名称**\n{rule_name}"),
            }
        }),
        json!({
            "tag": "div",
            "fields": [
                {
                    "is_short": true,
                    "text": {
                        "tag": "lark_md",
                        "content": format!(
                            "**⏰ 时间范围**\n{}\n{}",
                            format_time(from),
                            format_time(to)
                        ),
                    }
                },
                {
                    "is_short": true,
                    "text": {
                        "tag": "lark_md",
                        "content": format!("**🔔 告警数量**\n{log_count} 条"),
                    }
                }
            ]
        }),
        json!({
            "tag": "div",
            "text": {
                "tag": "lark_md",
                "content": format!("**📊 索引名称**\n`{index_name}`"),
            }
        }),
        json!({ "tag": "hr" }),
    ];

    if !logs.is_empty() && log_count > 0 {
        elements.push(json!({
            "tag": "div",
            "text": {
                "tag": "lark_md",
                "content": format!("**📝 日志摘要**（共 {log_count} 条，展示前 3 条）"),
            }
        }));

        for (i, log) in logs.iter().take(MAX_DISPLAY_LOGS).enumerate() {
            if i > 0 {
                elements.push(json!({ "tag": "hr" }));
            }
            elements.push(json!({
                "tag": "div",
                "fields": extract_log_fields(i + 1, log, rule_name),
            }));
        }

        if log_count > MAX_DISPLAY_LOGS {
            elements.push(json!({ "tag": "hr" }));
            elements.push(json!({
                "tag": "div",
                "text": {
                    "tag": "lark_md",
                    "content": format!(
                        "**➕ 还有 {} 条日志未显示**\n💡 查看完整日志请登录系统",
                        log_count - MAX_DISPLAY_LOGS
                    ),
                }
            }));
        }
    }

    elements.push(json!({ "tag": "hr" }));
    elements.push(json!({
        "tag": "note",
        "elements": [
            {
                "tag": "plain_text",
                "content": "💡 完整日志详情请登录 ElkWatch 系统查看",
            }
        ]
    }));
    elements.push(json!({
        "tag": "div",
        "text": { "tag": "lark_md", "content": "<at id=all></at>" }
    }));

    json!({
        "msg_type": "interactive",
        "card": {
            "config": { "wide_screen_mode": true },
            "header": {
                "title": { "tag": "plain_text", "content": "🚨 ELK 告警" },
                "template": "red",
            },
            "elements": elements,
        }
    })
}

/// Picks the field layout for one log sample based on the rule name:
/// nginx-style access logs, application logs, or a field-presence guess.
fn extract_log_fields(row_num: usize, log: &LogDocument, rule_name: &str) -> Vec<Value> {
    let rule_name_lower = rule_name.to_lowercase();

    if rule_name_lower.contains("nginx") {
        return extract_nginx_log_fields(row_num, log);
    }
    if APP_LOG_KEYWORDS.iter().any(|kw| rule_name_lower.contains(kw)) {
        return extract_app_log_fields(row_num, log);
    }

    // 规则名没给出线索时按字段特征识别
    if log.contains_key("response_code") {
        return extract_nginx_log_fields(row_num, log);
    }
    if log.contains_key("module") && log.contains_key("message") {
        return extract_app_log_fields(row_num, log);
    }

    extract_app_log_fields(row_num, log)
}

/// nginx 访问日志：状态码、时间、URL、CF Ray、域名。
fn extract_nginx_log_fields(row_num: usize, log: &LogDocument) -> Vec<Value> {
    let response_code = field_or_dash(log, &["response_code", "status_code", "status"]);
    let timestamp = format_log_timestamp(log);

    let request_url = ["request", "path"]
        .iter()
        .find_map(|key| non_empty_str(log, key))
        .map(|raw| {
            // 去掉 query string，截断长 URL
            let path = raw.split('?').next().unwrap_or(&raw);
            truncate_chars(path, 50)
        })
        .unwrap_or_else(|| "-".to_string());

    let cf_ray = field_or_dash(log, &["cf_ray"]);
    let domain = field_or_dash(log, &["domain"]);

    vec![
        lark_field(format!(
            "**#{row_num} | 状态码:** <font color='red'>{response_code}</font>"
        )),
        lark_field(format!("**⏰ 时间:** {timestamp}")),
        lark_field(format!("**🔗 URL:** `{request_url}`")),
        lark_field(format!("**☁️ CF Ray:** `{cf_ray}`")),
        lark_field(format!("**🌐 Domain:** `{domain}`")),
    ]
}

/// 应用日志：模块、节点、消息、时间。
fn extract_app_log_fields(row_num: usize, log: &LogDocument) -> Vec<Value> {
    let module = field_or_dash(log, &["module"]);
    let node_ip = field_or_dash(log, &["node_ip"]);
    let timestamp = format_log_timestamp(log);

    let message = non_empty_str(log, "message")
        .map(|raw| {
            let truncated = truncate_chars(&raw, 200);
            truncated.replace('\n', " ").replace('\r', "")
        })
        .unwrap_or_else(|| "-".to_string());

    vec![
        lark_field(format!("**#{row_num} | 📦 模块:** `{module}`")),
        lark_field(format!("**🖥️ 节点:** `{node_ip}`")),
        lark_field(format!("**⏰ 时间:** {timestamp}")),
        json!({
            "is_short": false,
            "text": {
                "tag": "lark_md",
                "content": format!("**💬 消息:**\n```\n{message}\n```"),
            }
        }),
    ]
}

fn lark_field(content: String) -> Value {
    json!({
        "is_short": true,
        "text": { "tag": "lark_md", "content": content }
    })
}

/// First non-empty candidate field rendered for display, `-` otherwise.
fn field_or_dash(log: &LogDocument, keys: &[&str]) -> String {
    keys.iter()
        .find_map(|key| {
            log.get(*key).and_then(|v| match v {
                Value::Null => None,
                Value::String(s) if s.is_empty() => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        })
        .unwrap_or_else(|| "-".to_string())
}

fn non_empty_str(log: &LogDocument, key: &str) -> Option<String> {
    match log.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Null) | Some(Value::String(_)) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

/// Renders `@timestamp` in a compact form: ISO `T`/`Z` markers stripped,
/// sub-second precision dropped.
fn format_log_timestamp(log: &LogDocument) -> String {
    let Some(raw) = log.get("@timestamp").filter(|v| !v.is_null()) else {
        return "-".to_string();
    };
    let mut s = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if s.contains('T') {
        s = s.replacen('T', " ", 1).replacen('Z', "", 1);
        if let Some(idx) = s.find('.') {
            s.truncate(idx);
        }
    }
    s
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max).collect();
        format!("{head}...")
    } else {
        s.to_string()
    }
}

fn format_time(t: DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(pairs: &[(&str, Value)]) -> LogDocument {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2025, 11, 28, 11, 55, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn card_envelope_shape() {
        let (from, to) = window();
        let card = build_card("nginx-5xx", "prod-nginx-*", &[], 0, from, to);

        assert_eq!(card["msg_type"], "interactive");
        assert_eq!(card["card"]["header"]["template"], "red");
        assert_eq!(card["card"]["header"]["title"]["content"], "🚨 ELK 告警");
        assert_eq!(card["card"]["config"]["wide_screen_mode"], true);
    }

    #[test]
    fn card_renders_at_most_three_samples() {
        let (from, to) = window();
        let logs: Vec<LogDocument> = (0..10)
            .map(|i| doc(&[("message", json!(format!("log {i}")))]))
            .collect();

        let card = build_card("api-errors", "prod-app-*", &logs, 42, from, to);
        let elements = card["card"]["elements"].as_array().unwrap();

        let sample_blocks = elements
            .iter()
            .filter(|e| e["tag"] == "div" && e.get("fields").is_some())
            .count();
        // 摘要字段块 1 个 + 日志样本块 3 个
        assert_eq!(sample_blocks, 4);

        // 超出部分有 "+N 条" 提示
        let more = elements.iter().any(|e| {
            e["text"]["content"]
                .as_str()
                .is_some_and(|c| c.contains("还有 39 条日志未显示"))
        });
        assert!(more);
    }

    #[test]
    fn nginx_fields_by_rule_name() {
        let log = doc(&[
            ("response_code", json!(502)),
            ("@timestamp", json!("2025-11-28T11:58:03.123Z")),
            ("request", json!("/api/v1/users?page=2&size=50")),
            ("domain", json!("api.example.com")),
        ]);

        let fields = extract_log_fields(1, &log, "Nginx 5xx 告警");
        assert_eq!(fields.len(), 5);

        let contents: Vec<&str> = fields
            .iter()
            .filter_map(|f| f["text"]["content"].as_str())
            .collect();
        assert!(contents[0].contains("502"));
        assert!(contents[1].contains("2025-11-28 11:58:03"));
        // query string 被剥掉
        assert!(contents[2].contains("`/api/v1/users`"));
        // cf_ray 缺失显示 -
        assert!(contents[3].contains("`-`"));
        assert!(contents[4].contains("api.example.com"));
    }

    #[test]
    fn nginx_request_url_is_truncated() {
        let long_path = format!("/{}", "a".repeat(80));
        let log = doc(&[("request", json!(long_path))]);

        let fields = extract_nginx_log_fields(1, &log);
        let url = fields[2]["text"]["content"].as_str().unwrap();
        assert!(url.contains("..."));
        assert!(url.len() < 80);
    }

    #[test]
    fn app_fields_by_rule_name() {
        let log = doc(&[
            ("module", json!("payment-service")),
            ("node_ip", json!("10.0.3.7")),
            ("message", json!("line one\nline two\r\nline three")),
            ("@timestamp", json!("2025-11-28T11:58:03Z")),
        ]);

        let fields = extract_log_fields(1, &log, "Java 支付服务错误");
        assert_eq!(fields.len(), 4);

        let message = fields[3]["text"]["content"].as_str().unwrap();
        assert!(message.contains("line one line two line three"));
        assert_eq!(fields[3]["is_short"], false);
    }

    #[test]
    fn app_message_is_truncated_to_200_chars() {
        let log = doc(&[("message", json!("x".repeat(500)))]);
        let fields = extract_app_log_fields(1, &log);
        let message = fields[3]["text"]["content"].as_str().unwrap();
        assert!(message.contains(&format!("{}...", "x".repeat(200))));
    }

    #[test]
    fn log_type_is_sniffed_from_fields_when_rule_name_is_neutral() {
        let nginx_log = doc(&[("response_code", json!(404))]);
        let fields = extract_log_fields(1, &nginx_log, "某个规则");
        assert!(fields[0]["text"]["content"].as_str().unwrap().contains("状态码"));

        let app_log = doc(&[
            ("module", json!("m")),
            ("message", json!("boom")),
        ]);
        let fields = extract_log_fields(1, &app_log, "某个规则");
        assert!(fields[0]["text"]["content"].as_str().unwrap().contains("模块"));

        // 无法识别时默认应用日志格式
        let unknown = doc(&[("foo", json!("bar"))]);
        let fields = extract_log_fields(1, &unknown, "某个规则");
        assert!(fields[0]["text"]["content"].as_str().unwrap().contains("模块"));
    }

    #[test]
    fn timestamp_formatting_strips_iso_markers() {
        let log = doc(&[("@timestamp", json!("2025-11-28T11:58:03.123456Z"))]);
        assert_eq!(format_log_timestamp(&log), "2025-11-28 11:58:03");

        let log = doc(&[("@timestamp", json!("2025-11-28 11:58:03"))]);
        assert_eq!(format_log_timestamp(&log), "2025-11-28 11:58:03");

        let log = doc(&[]);
        assert_eq!(format_log_timestamp(&log), "-");
    }
}
