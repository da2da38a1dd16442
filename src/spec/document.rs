//! 六段式规格文档（Markdown）
//!
//! 固定章节：概览、主要功能、用户场景、UI/UX 要求、技术要求、质量要求。
//! 内容为空的章节写入默认条目，保证六个章节始终存在。

use std::fmt::Write as _;

use chrono::{DateTime, Local};

use crate::model::{Feature, UiComponent, UserScenario};

pub const SECTION_TITLES: [&str; 6] = [
    "System Overview",
    "Main Features",
    "User Scenarios",
    "UI/UX Requirements",
    "Technical Requirements",
    "Quality Requirements",
];

pub struct DocumentContext<'a> {
    pub target_url: &'a str,
    pub extracted_at: DateTime<Local>,
    /// 页面可读文本摘录（抓取失败时为 None）
    pub excerpt: Option<&'a str>,
    pub components: &'a [UiComponent],
    pub features: &'a [Feature],
    pub scenarios: &'a [UserScenario],
}

pub fn render(ctx: &DocumentContext<'_>) -> String {
    let mut doc = String::from("# Functional Specification\n");

    section(&mut doc, 0);
    let _ = writeln!(doc, "Target URL: {}", ctx.target_url);
    let _ = writeln!(doc, "Extracted at: {}", ctx.extracted_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(excerpt) = ctx.excerpt.map(str::trim).filter(|e| !e.is_empty()) {
        let _ = writeln!(doc, "\n```text\n{}\n```", excerpt);
    }

    section(&mut doc, 1);
    if ctx.features.is_empty() {
        doc.push_str("- Basic web application functionality\n");
    }
    for f in ctx.features {
        let _ = writeln!(
            doc,
            "- **{}** ({} priority, {}): {}",
            f.name, f.priority, f.category, f.description
        );
        if !f.evidence.is_empty() {
            let _ = writeln!(doc, "  - Evidence: {}", f.evidence);
        }
    }

    section(&mut doc, 2);
    if ctx.scenarios.is_empty() {
        doc.push_str("- The user accesses the site\n- The user performs basic operations\n");
    }
    for s in ctx.scenarios {
        let _ = writeln!(doc, "### {}", s.scenario);
        for (i, step) in s.steps.iter().enumerate() {
            let _ = writeln!(doc, "{}. {}", i + 1, step);
        }
        if !s.expected_outcome.is_empty() {
            let _ = writeln!(doc, "\nExpected outcome: {}", s.expected_outcome);
        }
        doc.push('\n');
    }

    section(&mut doc, 3);
    doc.push_str("- Standard web user interface\n");
    for line in component_summary(ctx.components) {
        let _ = writeln!(doc, "- {}", line);
    }

    section(&mut doc, 4);
    doc.push_str("- Web browser support\n");
    let methods: Vec<&str> = ctx
        .components
        .iter()
        .filter_map(|c| match c {
            UiComponent::Form { method, .. } => Some(method.as_str()),
            _ => None,
        })
        .collect();
    if !methods.is_empty() {
        let mut unique = methods.clone();
        unique.sort_unstable();
        unique.dedup();
        let _ = writeln!(doc, "- Form submission over HTTP ({})", unique.join(", ").to_uppercase());
    }

    section(&mut doc, 5);
    doc.push_str("- Stable operation\n- Appropriate response time\n");

    doc
}

fn section(doc: &mut String, index: usize) {
    let _ = write!(doc, "\n## {}. {}\n", index + 1, SECTION_TITLES[index]);
}

fn component_summary(components: &[UiComponent]) -> Vec<String> {
    let mut lines = Vec::new();
    for c in components {
        let line = match c {
            UiComponent::Form { action, inputs, .. } if action.is_empty() => {
                format!("Form with {} input(s)", inputs)
            }
            UiComponent::Form { action, inputs, .. } => {
                format!("Form posting to `{}` with {} input(s)", action, inputs)
            }
            UiComponent::Navigation { links } => format!("Navigation with {} link(s)", links),
            UiComponent::Button { text } if text.is_empty() => "Unlabelled button".to_string(),
            UiComponent::Button { text } => format!("Button \"{}\"", text),
            UiComponent::Table { rows, columns } => {
                format!("Table with {} row(s) and {} column(s)", rows, columns)
            }
        };
        lines.push(line);
    }
    lines
}

/// 检查文档是否包含全部六个章节（按顺序）
pub fn has_all_sections(doc: &str) -> bool {
    let mut rest = doc;
    for (i, title) in SECTION_TITLES.iter().enumerate() {
        let heading = format!("## {}. {}", i + 1, title);
        match rest.find(&heading) {
            Some(pos) => rest = &rest[pos + heading.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;

    #[test]
    fn test_empty_context_still_has_six_sections() {
        let doc = render(&DocumentContext {
            target_url: "https://example.com",
            extracted_at: Local::now(),
            excerpt: None,
            components: &[],
            features: &[],
            scenarios: &[],
        });
        assert!(has_all_sections(&doc));
        assert!(doc.contains("Target URL: https://example.com"));
        assert!(doc.contains("Basic web application functionality"));
    }

    #[test]
    fn test_renders_features_and_components() {
        let features = vec![Feature {
            name: "Login".to_string(),
            description: "Sign in with credentials".to_string(),
            category: "Authentication".to_string(),
            priority: Priority::High,
            evidence: "form posting to /login".to_string(),
        }];
        let components = vec![
            UiComponent::Form {
                action: "/login".to_string(),
                method: "post".to_string(),
                inputs: 2,
            },
            UiComponent::Table { rows: 4, columns: 3 },
        ];
        let doc = render(&DocumentContext {
            target_url: "https://example.com",
            extracted_at: Local::now(),
            excerpt: Some("Welcome back"),
            components: &components,
            features: &features,
            scenarios: &[],
        });
        assert!(has_all_sections(&doc));
        assert!(doc.contains("**Login** (high priority, Authentication)"));
        assert!(doc.contains("Form posting to `/login` with 2 input(s)"));
        assert!(doc.contains("Table with 4 row(s) and 3 column(s)"));
        assert!(doc.contains("(POST)"));
        assert!(doc.contains("Welcome back"));
    }

    #[test]
    fn test_section_check_requires_order() {
        assert!(!has_all_sections("## 2. Main Features\n## 1. System Overview"));
    }
}
