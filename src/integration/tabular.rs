//! 测试用例的扁平表格形式
//!
//! 列：用例 ID、需求 ID、名称、目的、前置条件、步骤、期望结果、测试数据、环境。
//! 列表型字段（前置条件 / 步骤 / 期望结果）以逗号拼接；导入时按逗号切分、去空白并丢弃空项，
//! 因此单个步骤描述中不能包含逗号。

use serde::{Deserialize, Serialize};

use crate::model::TestCase;

pub const TEST_CASE_HEADERS: [&str; 9] = [
    "Test Case ID",
    "Requirement ID",
    "Test Name",
    "Test Objective",
    "Preconditions",
    "Test Steps",
    "Expected Results",
    "Test Data",
    "Test Environment",
];

#[derive(Debug, Serialize, Deserialize)]
struct TestCaseRow {
    #[serde(rename = "Test Case ID")]
    id: String,
    #[serde(rename = "Requirement ID", default)]
    requirement_id: String,
    #[serde(rename = "Test Name", default)]
    name: String,
    #[serde(rename = "Test Objective", default)]
    objective: String,
    #[serde(rename = "Preconditions", default)]
    preconditions: String,
    #[serde(rename = "Test Steps", default)]
    steps: String,
    #[serde(rename = "Expected Results", default)]
    expected_results: String,
    #[serde(rename = "Test Data", default)]
    test_data: String,
    #[serde(rename = "Test Environment", default)]
    environment: String,
}

/// 导出为 CSV 文本（含表头）
pub fn export_test_cases(cases: &[TestCase]) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if cases.is_empty() {
        writer.write_record(TEST_CASE_HEADERS)?;
    }
    for tc in cases {
        writer.serialize(TestCaseRow {
            id: tc.id.clone(),
            requirement_id: tc.requirement_id.clone(),
            name: tc.name.clone(),
            objective: tc.objective.clone(),
            preconditions: tc.preconditions.join(","),
            steps: tc.steps.join(","),
            expected_results: tc.expected_results.join(","),
            test_data: tc.test_data.clone(),
            environment: tc.environment.clone(),
        })?;
    }
    into_string(writer)
}

/// 从 CSV 文本导入；缺失的可选列取默认值，ID 为空的行被跳过
pub fn ingest_test_cases(raw: &str) -> Result<Vec<TestCase>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw.trim_start_matches('\u{FEFF}').as_bytes());

    let mut cases = Vec::new();
    for row in reader.deserialize::<TestCaseRow>() {
        let row = row?;
        if row.id.is_empty() {
            continue;
        }
        cases.push(TestCase {
            id: row.id,
            requirement_id: row.requirement_id,
            name: row.name,
            objective: row.objective,
            preconditions: split_list(&row.preconditions),
            steps: split_list(&row.steps),
            expected_results: split_list(&row.expected_results),
            test_data: row.test_data,
            environment: row.environment,
        });
    }
    Ok(cases)
}

pub fn split_list(cell: &str) -> Vec<String> {
    cell.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

pub(crate) fn into_string(writer: csv::Writer<Vec<u8>>) -> Result<String, csv::Error> {
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(id: &str, name: &str, steps: &[&str], expected: &[&str]) -> TestCase {
        TestCase::new(
            id,
            name,
            steps.iter().map(|s| s.to_string()).collect(),
            expected.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn test_export_then_ingest_recovers_cases() {
        let mut login = case("TC-001", "Login, happy path", &["Open page", " Enter credentials "], &["Dashboard shown"]);
        login.preconditions = vec!["User exists".to_string()];
        login.environment = "staging".to_string();
        let cases = vec![login, case("TC-002", "Search", &["Type query", "Press enter"], &["Results", "No errors"])];

        let csv_text = export_test_cases(&cases).unwrap();
        assert!(csv_text.starts_with("Test Case ID,Requirement ID,Test Name"));

        let back = ingest_test_cases(&csv_text).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].id, "TC-001");
        assert_eq!(back[0].name, "Login, happy path");
        assert_eq!(back[0].steps, vec!["Open page", "Enter credentials"]);
        assert_eq!(back[0].preconditions, vec!["User exists"]);
        assert_eq!(back[0].environment, "staging");
        assert_eq!(back[1].expected_results, vec!["Results", "No errors"]);
    }

    #[test]
    fn test_ingest_tolerates_missing_columns_and_blank_ids() {
        let raw = "Test Case ID,Test Name,Test Steps,Expected Results\n\
                   \"TC-9\",\"Minimal\",\"a, b,,c\",\"done\"\n\
                   \"\",\"Ignored\",\"x\",\"y\"\n";
        let cases = ingest_test_cases(raw).unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].steps, vec!["a", "b", "c"]);
        assert!(cases[0].requirement_id.is_empty());
    }

    #[test]
    fn test_export_empty_has_header_only() {
        let csv_text = export_test_cases(&[]).unwrap();
        assert_eq!(csv_text.lines().count(), 1);
        assert!(ingest_test_cases(&csv_text).unwrap().is_empty());
    }
}
