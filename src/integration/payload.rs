//! 松散 JSON 响应的统一归一化
//!
//! 协作服务与分析后端返回的内容只接受以下封闭集合：
//! 1. JSON 对象
//! 2. 内容为 JSON 对象的字符串（可带 ```json 代码围栏，或前后夹杂说明文字）
//! 3. JSON 字符串值，其内容满足第 2 条（只展开一层）
//!
//! 其余一律返回 PayloadError，由调用方转入回退分支。

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

/// 原始载荷
#[derive(Debug, Clone)]
pub enum Payload {
    Text(String),
    Json(Value),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("payload is empty")]
    Empty,

    #[error("payload is not valid JSON: {0}")]
    NotJson(String),

    #[error("expected a JSON object, got {0}")]
    NotObject(&'static str),

    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{field}' has unexpected shape: {reason}")]
    InvalidField { field: String, reason: String },
}

/// 将载荷归一化为 JSON 对象
pub fn normalize(payload: Payload) -> Result<Map<String, Value>, PayloadError> {
    match payload {
        Payload::Json(Value::Object(map)) => Ok(map),
        Payload::Json(Value::String(s)) => normalize_text(&s),
        Payload::Json(other) => Err(PayloadError::NotObject(kind_of(&other))),
        Payload::Text(s) => normalize_text(&s),
    }
}

fn normalize_text(raw: &str) -> Result<Map<String, Value>, PayloadError> {
    let trimmed = strip_code_fence(raw.trim().trim_start_matches('\u{FEFF}'));
    if trimmed.is_empty() {
        return Err(PayloadError::Empty);
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(other) => return Err(PayloadError::NotObject(kind_of(&other))),
        Err(_) => {}
    }

    // 说明文字包裹的对象：取第一个 '{' 到最后一个 '}'
    let (start, end) = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(s), Some(e)) if s < e => (s, e),
        _ => return Err(PayloadError::NotJson(preview(trimmed))),
    };
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(PayloadError::NotObject(kind_of(&other))),
        Err(e) => Err(PayloadError::NotJson(e.to_string())),
    }
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn kind_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > 80 {
        format!("{}...", s.chars().take(80).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 取字符串字段
pub fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Result<&'a str, PayloadError> {
    match map.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(PayloadError::InvalidField {
            field: key.to_string(),
            reason: format!("expected string, got {}", kind_of(other)),
        }),
        None => Err(PayloadError::MissingField(key.to_string())),
    }
}

/// 取数组字段并逐项反序列化；字段缺失视为空数组
pub fn array_field<T: DeserializeOwned>(
    map: &Map<String, Value>,
    key: &str,
) -> Result<Vec<T>, PayloadError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                serde_json::from_value(item.clone()).map_err(|e| PayloadError::InvalidField {
                    field: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect(),
        Some(other) => Err(PayloadError::InvalidField {
            field: key.to_string(),
            reason: format!("expected array, got {}", kind_of(other)),
        }),
    }
}
