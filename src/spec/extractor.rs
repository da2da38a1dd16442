//! 规格提取
//!
//! 抓取目标页面 → 检测 UI 组件 → 推定功能与用户场景 → 生成六段式文档。
//! `extract` 从不返回错误：页面不可达等内部失败一律产出确定性的回退产物
//! （一条默认功能 + 完整六段文档，`fallback_used = true`）。

use std::sync::Arc;

use chrono::Local;
use serde::Deserialize;
use thiserror::Error;

use crate::integration::payload::{array_field, normalize, Payload};
use crate::integration::BoundedClient;
use crate::llm::LlmClient;
use crate::model::{Feature, Priority, SpecificationArtifact, UiComponent, UserScenario};
use crate::spec::components::detect_components;
use crate::spec::document::{render, DocumentContext};

const EXCERPT_CHARS: usize = 1000;
const EXCERPT_WIDTH: usize = 100;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Target returned HTTP {0}")]
    Status(u16),
}

/// LLM 返回的功能条目：字段宽松，优先级接受「高/中/低」
#[derive(Debug, Deserialize)]
struct LooseFeature {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    category: String,
    #[serde(default)]
    priority: String,
    #[serde(default)]
    evidence: String,
}

#[derive(Debug, Deserialize)]
struct LooseScenario {
    scenario: String,
    #[serde(default)]
    steps: Vec<String>,
    #[serde(default)]
    expected_outcome: String,
}

pub struct SpecExtractor {
    client: BoundedClient,
    llm: Option<Arc<dyn LlmClient>>,
}

impl SpecExtractor {
    pub fn new(fetch_timeout_secs: u64, llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self {
            client: BoundedClient::new(fetch_timeout_secs, Some(concat!("testloop/", env!("CARGO_PKG_VERSION")))),
            llm,
        }
    }

    pub async fn extract(&self, target_url: &str) -> SpecificationArtifact {
        match self.try_extract(target_url).await {
            Ok(artifact) => artifact,
            Err(e) => {
                tracing::warn!(url = %target_url, error = %e, "specification extraction failed, using fallback");
                fallback_specification(target_url, Some(e.to_string()))
            }
        }
    }

    async fn try_extract(&self, target_url: &str) -> Result<SpecificationArtifact, ExtractError> {
        let html = self.fetch(target_url).await?;
        let components = detect_components(&html);
        let excerpt = readable_excerpt(&html);

        let (mut features, mut scenarios) = derive_features(&components);
        if let Some(llm) = &self.llm {
            match self.refine_with_llm(llm.as_ref(), target_url, &components, &excerpt).await {
                Some((f, s)) => {
                    features = f;
                    if !s.is_empty() {
                        scenarios = s;
                    }
                }
                None => tracing::debug!("analysis backend gave no usable features, keeping derived ones"),
            }
        }

        let extracted_at = Local::now();
        let document = render(&DocumentContext {
            target_url,
            extracted_at,
            excerpt: Some(&excerpt),
            components: &components,
            features: &features,
            scenarios: &scenarios,
        });

        tracing::info!(
            url = %target_url,
            components = components.len(),
            features = features.len(),
            "specification extracted"
        );

        Ok(SpecificationArtifact {
            target_url: target_url.to_string(),
            ui_components: components,
            estimated_features: features,
            user_scenarios: scenarios,
            specification_document: document,
            extraction_timestamp: extracted_at,
            fallback_used: false,
            error: None,
        })
    }

    async fn fetch(&self, url: &str) -> Result<String, ExtractError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ExtractError::Fetch(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Status(status.as_u16()));
        }
        resp.text().await.map_err(|e| ExtractError::Fetch(e.to_string()))
    }

    /// 借助分析后端推定功能；任何失败返回 None
    async fn refine_with_llm(
        &self,
        llm: &dyn LlmClient,
        target_url: &str,
        components: &[UiComponent],
        excerpt: &str,
    ) -> Option<(Vec<Feature>, Vec<UserScenario>)> {
        let components_json = serde_json::to_string_pretty(components).unwrap_or_default();
        let prompt = format!(
            "Estimate the main features of the following web application.\n\n\
             URL: {}\n\nUI components:\n{}\n\nPage text (excerpt):\n{}\n\n\
             Answer with JSON only:\n\
             {{\"main_features\": [{{\"name\": \"\", \"description\": \"\", \"category\": \"\", \
             \"priority\": \"high|medium|low\", \"evidence\": \"\"}}],\n \
             \"user_scenarios\": [{{\"scenario\": \"\", \"steps\": [\"\"], \"expected_outcome\": \"\"}}]}}",
            target_url, components_json, excerpt
        );

        let raw = match llm.complete(&prompt).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(backend = llm.name(), error = %e, "feature estimation failed");
                return None;
            }
        };
        let map = match normalize(Payload::Text(raw)) {
            Ok(map) => map,
            Err(e) => {
                tracing::warn!(error = %e, "feature estimation returned malformed payload");
                return None;
            }
        };

        let features: Vec<Feature> = array_field::<LooseFeature>(&map, "main_features")
            .ok()?
            .into_iter()
            .filter(|f| !f.name.trim().is_empty())
            .map(|f| Feature {
                name: f.name,
                description: f.description,
                category: if f.category.is_empty() { "Other".to_string() } else { f.category },
                priority: Priority::parse_lenient(&f.priority).unwrap_or(Priority::Medium),
                evidence: f.evidence,
            })
            .collect();
        if features.is_empty() {
            return None;
        }
        let scenarios = array_field::<LooseScenario>(&map, "user_scenarios")
            .unwrap_or_default()
            .into_iter()
            .map(|s| UserScenario {
                scenario: s.scenario,
                steps: s.steps,
                expected_outcome: s.expected_outcome,
            })
            .collect();
        Some((features, scenarios))
    }
}

/// 页面可读文本摘录
fn readable_excerpt(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), EXCERPT_WIDTH).unwrap_or_else(|_| html.to_string());
    let trimmed = text.trim();
    if trimmed.chars().count() > EXCERPT_CHARS {
        format!("{}...", trimmed.chars().take(EXCERPT_CHARS).collect::<String>())
    } else {
        trimmed.to_string()
    }
}

/// 由组件规则推定功能与场景；没有可识别组件时给出一条默认功能
pub fn derive_features(components: &[UiComponent]) -> (Vec<Feature>, Vec<UserScenario>) {
    let mut features = Vec::new();
    let mut scenarios = Vec::new();

    for c in components {
        match c {
            UiComponent::Form { action, method, inputs } => {
                let auth = ["login", "signin", "sign-in", "auth", "session"]
                    .iter()
                    .any(|k| action.to_lowercase().contains(k));
                let (name, category) = if auth {
                    ("User authentication", "Authentication")
                } else {
                    ("Data entry form", "Data management")
                };
                features.push(Feature {
                    name: name.to_string(),
                    description: format!("Form with {} input(s) submitted via {}", inputs, method.to_uppercase()),
                    category: category.to_string(),
                    priority: Priority::High,
                    evidence: format!("form action '{}'", action),
                });
                scenarios.push(UserScenario {
                    scenario: format!("Submit the {}", name.to_lowercase()),
                    steps: vec![
                        "Open the page".to_string(),
                        format!("Fill in the {} input field(s)", inputs),
                        "Submit the form".to_string(),
                    ],
                    expected_outcome: "The submission is accepted and feedback is shown".to_string(),
                });
            }
            UiComponent::Navigation { links } => {
                features.push(Feature {
                    name: "Site navigation".to_string(),
                    description: format!("Navigation menu with {} link(s)", links),
                    category: "UI operation".to_string(),
                    priority: Priority::Medium,
                    evidence: "nav element".to_string(),
                });
                scenarios.push(UserScenario {
                    scenario: "Navigate between pages".to_string(),
                    steps: vec!["Open the page".to_string(), "Follow a navigation link".to_string()],
                    expected_outcome: "The linked page is displayed".to_string(),
                });
            }
            UiComponent::Table { rows, columns } => features.push(Feature {
                name: "Tabular data display".to_string(),
                description: format!("Table with {} row(s) and {} column(s)", rows, columns),
                category: "Data management".to_string(),
                priority: Priority::Medium,
                evidence: "table element".to_string(),
            }),
            UiComponent::Button { .. } => {}
        }
    }

    let buttons: Vec<&str> = components
        .iter()
        .filter_map(|c| match c {
            UiComponent::Button { text } if !text.is_empty() => Some(text.as_str()),
            _ => None,
        })
        .collect();
    if !buttons.is_empty() {
        features.push(Feature {
            name: "Interactive actions".to_string(),
            description: format!("Buttons: {}", buttons.join(", ")),
            category: "UI operation".to_string(),
            priority: Priority::Low,
            evidence: format!("{} button(s)", buttons.len()),
        });
    }

    if features.is_empty() {
        let (f, s) = default_feature();
        features.push(f);
        scenarios.push(s);
    }
    (features, scenarios)
}

fn default_feature() -> (Feature, UserScenario) {
    (
        Feature {
            name: "Basic functionality".to_string(),
            description: "Basic behaviour of the web application".to_string(),
            category: "Other".to_string(),
            priority: Priority::High,
            evidence: "default feature".to_string(),
        },
        UserScenario {
            scenario: "Basic operation".to_string(),
            steps: vec!["Access the site".to_string(), "Perform basic operations".to_string()],
            expected_outcome: "The site works normally".to_string(),
        },
    )
}

/// 确定性回退产物
pub fn fallback_specification(target_url: &str, error: Option<String>) -> SpecificationArtifact {
    let (feature, scenario) = default_feature();
    let features = vec![feature];
    let scenarios = vec![scenario];
    let extracted_at = Local::now();
    let document = render(&DocumentContext {
        target_url,
        extracted_at,
        excerpt: None,
        components: &[],
        features: &features,
        scenarios: &scenarios,
    });
    SpecificationArtifact {
        target_url: target_url.to_string(),
        ui_components: Vec::new(),
        estimated_features: features,
        user_scenarios: scenarios,
        specification_document: document,
        extraction_timestamp: extracted_at,
        fallback_used: true,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::spec::document::has_all_sections;

    const PAGE: &str = r#"<html><head><title>Shop</title></head><body>
        <nav><a href="/">Home</a><a href="/cart">Cart</a></nav>
        <h1>Welcome to the shop</h1>
        <form action="/login" method="post"><input name="u"><input name="p"></form>
        <button>Buy now</button>
    </body></html>"#;

    #[tokio::test]
    async fn test_unreachable_target_uses_fallback() {
        let extractor = SpecExtractor::new(1, None);
        let spec = extractor.extract("http://127.0.0.1:9/").await;
        assert!(spec.fallback_used);
        assert!(spec.error.is_some());
        assert_eq!(spec.estimated_features.len(), 1);
        assert!(has_all_sections(&spec.specification_document));
    }

    #[tokio::test]
    async fn test_http_error_uses_fallback() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/").with_status(500).create_async().await;
        let spec = SpecExtractor::new(5, None).extract(&server.url()).await;
        assert!(spec.fallback_used);
        assert!(spec.error.unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_extract_from_page() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_header("content-type", "text/html")
            .with_body(PAGE)
            .create_async()
            .await;

        let spec = SpecExtractor::new(5, None).extract(&server.url()).await;
        assert!(!spec.fallback_used);
        assert_eq!(spec.ui_components.len(), 3);
        let names: Vec<&str> = spec.estimated_features.iter().map(|f| f.name.as_str()).collect();
        assert!(names.contains(&"User authentication"));
        assert!(names.contains(&"Site navigation"));
        assert!(names.contains(&"Interactive actions"));
        assert!(has_all_sections(&spec.specification_document));
        assert!(spec.specification_document.contains("Welcome to the shop"));
    }

    #[tokio::test]
    async fn test_llm_refines_features() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/").with_body(PAGE).create_async().await;
        let llm = Arc::new(MockLlmClient::with_responses([r#"Sure:
```json
{"main_features": [{"name": "Checkout", "description": "Buy items", "category": "Commerce", "priority": "高"}],
 "user_scenarios": [{"scenario": "Buy", "steps": ["add", "pay"], "expected_outcome": "order placed"}]}
```"#]));

        let backend: Arc<dyn LlmClient> = llm.clone();
        let spec = SpecExtractor::new(5, Some(backend)).extract(&server.url()).await;
        assert_eq!(spec.estimated_features.len(), 1);
        assert_eq!(spec.estimated_features[0].name, "Checkout");
        assert_eq!(spec.estimated_features[0].priority, Priority::High);
        assert_eq!(spec.user_scenarios[0].steps, vec!["add", "pay"]);
        assert!(llm.prompts()[0].contains(&server.url()));
    }

    #[tokio::test]
    async fn test_llm_garbage_keeps_derived_features() {
        let mut server = mockito::Server::new_async().await;
        let _m = server.mock("GET", "/").with_body(PAGE).create_async().await;
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_responses(["I cannot help with that"]));
        let spec = SpecExtractor::new(5, Some(llm)).extract(&server.url()).await;
        assert!(!spec.fallback_used);
        assert!(spec.estimated_features.iter().any(|f| f.name == "User authentication"));
    }

    #[test]
    fn test_no_components_gives_default_feature() {
        let (features, scenarios) = derive_features(&[]);
        assert_eq!(features.len(), 1);
        assert_eq!(features[0].name, "Basic functionality");
        assert_eq!(scenarios.len(), 1);
    }
}
