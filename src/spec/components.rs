//! UI 组件检测：基于正则的轻量扫描，不构建 DOM
//!
//! 识别四类组件：表单（action / method / input 数）、导航（链接数）、
//! 按钮（`<button>` 文本或 submit/button 类型 input 的 value）、表格（行数 / 表头列数）。

use std::sync::OnceLock;

use regex::Regex;

use crate::model::UiComponent;

struct Patterns {
    form: Regex,
    nav: Regex,
    button: Regex,
    input_button: Regex,
    table: Regex,
    input: Regex,
    anchor: Regex,
    row: Regex,
    header_cell: Regex,
    tag: Regex,
}

static PATTERNS: OnceLock<Patterns> = OnceLock::new();

fn patterns() -> &'static Patterns {
    PATTERNS.get_or_init(|| Patterns {
        form: Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form\s*>").unwrap(),
        nav: Regex::new(r"(?is)<nav\b[^>]*>(.*?)</nav\s*>").unwrap(),
        button: Regex::new(r"(?is)<button\b[^>]*>(.*?)</button\s*>").unwrap(),
        input_button: Regex::new(r#"(?is)<input\b[^>]*\btype\s*=\s*["']?(?:submit|button)\b[^>]*>"#).unwrap(),
        table: Regex::new(r"(?is)<table\b[^>]*>(.*?)</table\s*>").unwrap(),
        input: Regex::new(r"(?i)<input\b").unwrap(),
        anchor: Regex::new(r"(?i)<a\b").unwrap(),
        row: Regex::new(r"(?i)<tr\b").unwrap(),
        header_cell: Regex::new(r"(?i)<th\b").unwrap(),
        tag: Regex::new(r"(?s)<[^>]*>").unwrap(),
    })
}

/// 取标签属性值（支持单双引号与无引号）
fn attribute(attrs: &str, name: &str) -> Option<String> {
    let re = Regex::new(&format!(
        r#"(?i)\b{}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#,
        regex::escape(name)
    ))
    .ok()?;
    let caps = re.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().trim().to_string())
}

fn inner_text(fragment: &str) -> String {
    let stripped = patterns().tag.replace_all(fragment, " ");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 扫描 HTML，按组件类型分组输出（表单、导航、按钮、表格）
pub fn detect_components(html: &str) -> Vec<UiComponent> {
    let p = patterns();
    let mut components = Vec::new();

    for caps in p.form.captures_iter(html) {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        components.push(UiComponent::Form {
            action: attribute(attrs, "action").unwrap_or_default(),
            method: attribute(attrs, "method")
                .map(|m| m.to_lowercase())
                .unwrap_or_else(|| "get".to_string()),
            inputs: p.input.find_iter(body).count(),
        });
    }

    for caps in p.nav.captures_iter(html) {
        let body = caps.get(1).map_or("", |m| m.as_str());
        components.push(UiComponent::Navigation {
            links: p.anchor.find_iter(body).count(),
        });
    }

    for caps in p.button.captures_iter(html) {
        let body = caps.get(1).map_or("", |m| m.as_str());
        components.push(UiComponent::Button { text: inner_text(body) });
    }
    for m in p.input_button.find_iter(html) {
        components.push(UiComponent::Button {
            text: attribute(m.as_str(), "value").unwrap_or_default(),
        });
    }

    for caps in p.table.captures_iter(html) {
        let body = caps.get(1).map_or("", |m| m.as_str());
        components.push(UiComponent::Table {
            rows: p.row.find_iter(body).count(),
            columns: p.header_cell.find_iter(body).count(),
        });
    }

    components
}
