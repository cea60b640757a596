//! Query Planner - fans a research query out into focused sub-queries
//!
//! One planning call per attempt. When a CaseContext is present its fields
//! are folded into that single prompt; the output contract (exactly `n`
//! distinct, non-blank sub-queries) does not change. Output that does not
//! parse is retried once, then the session fails with a PlanningError.

use caseforge_common::errors::{AppError, Result};
use caseforge_common::llm::{CompletionRequest, LlmClient};
use caseforge_common::model::{CaseContext, SubQuery};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument, warn};

const SYSTEM_PROMPT: &str = "You are a research planner. You turn one research question into \
focused, self-contained search queries. Reply with a JSON array of strings and nothing else.";

/// Planning attempts before giving up (initial call plus one retry)
pub const MAX_PLANNING_ATTEMPTS: u32 = 2;

pub struct QueryPlanner {
    llm: Arc<dyn LlmClient>,
}

impl QueryPlanner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Generate exactly `n` distinct, non-blank sub-queries
    #[instrument(skip(self, case_context), fields(model = self.llm.model_name(), enriched = case_context.is_some()))]
    pub async fn generate(
        &self,
        query: &str,
        case_context: Option<&CaseContext>,
        n: usize,
    ) -> Result<Vec<SubQuery>> {
        let request = build_request(query, case_context, n);
        let mut last_failure = String::new();

        for attempt in 1..=MAX_PLANNING_ATTEMPTS {
            let output = match self.llm.complete(&request).await {
                Ok(output) => output,
                Err(e) => {
                    warn!(attempt, error = %e, "Planner call failed");
                    last_failure = e.to_string();
                    continue;
                }
            };

            match parse_sub_queries(&output, n) {
                Ok(texts) => {
                    info!(attempt, count = texts.len(), "Sub-queries planned");
                    return Ok(texts
                        .into_iter()
                        .enumerate()
                        .map(|(idx, text)| SubQuery::new(idx as u32 + 1, text))
                        .collect());
                }
                Err(reason) => {
                    warn!(attempt, reason = %reason, "Planner output rejected");
                    last_failure = reason;
                }
            }
        }

        Err(AppError::Planning {
            message: format!(
                "no valid plan after {} attempts: {}",
                MAX_PLANNING_ATTEMPTS, last_failure
            ),
        })
    }
}

/// Single planning prompt, enriched with case facts when present
pub fn build_request(query: &str, case_context: Option<&CaseContext>, n: usize) -> CompletionRequest {
    let mut prompt = format!(
        "Write exactly {} distinct search queries that together cover the research question below. \
         Each query must be a single line, non-empty, and useful on its own.\n\n\
         Research question: {}\n",
        n,
        query.trim()
    );

    if let Some(ctx) = case_context.filter(|c| !c.is_empty()) {
        prompt.push_str("\nCase context:\n");
        for (role, name) in &ctx.parties {
            if !name.trim().is_empty() {
                prompt.push_str(&format!("- Party ({}): {}\n", role, name.trim()));
            }
        }
        push_field(&mut prompt, "Jurisdiction", ctx.jurisdiction.as_deref());
        push_list(&mut prompt, "Claims", &ctx.claims);
        push_field(&mut prompt, "Opposing argument", ctx.opposing_argument.as_deref());
        push_list(&mut prompt, "Key statutes", &ctx.key_statutes);
        push_field(&mut prompt, "Our position", ctx.our_position.as_deref());
        push_field(&mut prompt, "Key facts", ctx.key_facts.as_deref());

        prompt.push_str(
            "\nTarget the specific legal issue in the opposing argument. \
             Keep every query aware of the jurisdiction, the parties and the claims above, \
             and prefer controlling statutes and case law.\n",
        );
    }

    prompt.push_str(&format!(
        "\nReturn a JSON array of exactly {} strings, for example [\"query one\", \"query two\"].",
        n
    ));

    CompletionRequest::new(SYSTEM_PROMPT, prompt)
        .with_temperature(0.4)
        .with_max_tokens(100 * n.max(1) + 200)
}

fn push_field(prompt: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        prompt.push_str(&format!("- {}: {}\n", label, value));
    }
}

fn push_list(prompt: &mut String, label: &str, values: &[String]) {
    let values: Vec<&str> = values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .collect();
    if !values.is_empty() {
        prompt.push_str(&format!("- {}: {}\n", label, values.join("; ")));
    }
}

/// Parse planner output into exactly `n` distinct, non-blank strings.
///
/// Accepts a JSON array of strings (optionally inside a code fence) or one
/// query per line with numbering or bullets. Lines ending in `:` are
/// treated as headings and ignored.
pub fn parse_sub_queries(output: &str, n: usize) -> std::result::Result<Vec<String>, String> {
    let body = strip_code_fence(output.trim());

    let candidates: Vec<String> = match (body.find('['), body.rfind(']')) {
        (Some(start), Some(end)) if end > start => {
            match serde_json::from_str::<Vec<String>>(&body[start..=end]) {
                Ok(items) => items,
                Err(_) => parse_lines(body),
            }
        }
        _ => parse_lines(body),
    };

    let mut seen = HashSet::new();
    let mut queries = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let text = candidate.trim().to_string();
        if text.is_empty() {
            return Err("blank sub-query".to_string());
        }
        if !seen.insert(text.to_lowercase()) {
            return Err(format!("duplicate sub-query: {}", text));
        }
        queries.push(text);
    }

    if queries.len() != n {
        return Err(format!("expected {} sub-queries, got {}", n, queries.len()));
    }
    Ok(queries)
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn parse_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .map(|line| {
            let line = line.trim_start_matches(['-', '*', '•']).trim_start();
            let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
            let line = if digits > 0 {
                line[digits..].trim_start_matches(['.', ')', ':']).trim_start()
            } else {
                line
            };
            line.trim_matches(|c| c == '"' || c == '\'').trim().to_string()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tokio_test::assert_err;

    /// Replays canned outputs and records prompts
    struct ScriptedLlm {
        outputs: Mutex<Vec<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(outputs: &[&str]) -> Self {
            Self {
                outputs: Mutex::new(outputs.iter().rev().map(|s| s.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: &CompletionRequest) -> Result<String> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            self.outputs.lock().unwrap().pop().ok_or_else(|| AppError::Llm {
                message: "script exhausted".into(),
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn case_context() -> CaseContext {
        let mut parties = BTreeMap::new();
        parties.insert("plaintiff".to_string(), "Ian Bruce".to_string());
        parties.insert("defendant".to_string(), "CPS Recovery Services".to_string());
        CaseContext {
            parties,
            jurisdiction: Some("Georgia (N.D. Ga.)".into()),
            claims: vec!["FDCPA violation".into()],
            opposing_argument: Some("Plaintiff lacks standing; the debt was not for household purposes.".into()),
            key_statutes: vec!["15 U.S.C. § 1692".into()],
            our_position: Some("The debt is consumer in nature.".into()),
            key_facts: None,
        }
    }

    #[test]
    fn test_parse_json_and_lines() {
        let json = "```json\n[\"a one\", \"b two\", \"c three\"]\n```";
        assert_eq!(parse_sub_queries(json, 3).unwrap(), vec!["a one", "b two", "c three"]);

        let lines = "Here are the queries:\n1. FDCPA standing\n2) Spokeo concrete injury\n- consumer debt definition";
        assert_eq!(
            parse_sub_queries(lines, 3).unwrap(),
            vec!["FDCPA standing", "Spokeo concrete injury", "consumer debt definition"]
        );
    }

    #[test]
    fn test_parse_rejects_wrong_count_and_duplicates() {
        assert_err!(parse_sub_queries("[\"a\", \"b\"]", 3));
        assert_err!(parse_sub_queries("[\"Standing\", \"standing \", \"c\"]", 3));
        assert_err!(parse_sub_queries("[\"a\", \"  \", \"c\"]", 3));
    }

    #[test]
    fn test_prompt_folds_case_context() {
        let ctx = case_context();
        let request = build_request("Research defenses against standing argument", Some(&ctx), 3);
        assert!(request.prompt.contains("Ian Bruce"));
        assert!(request.prompt.contains("CPS Recovery Services"));
        assert!(request.prompt.contains("Georgia (N.D. Ga.)"));
        assert!(request
            .prompt
            .to_lowercase()
            .contains("target the specific legal issue in the opposing argument"));

        let plain = build_request("Research defenses against standing argument", None, 3);
        assert!(!plain.prompt.contains("Case context"));
        let empty = build_request("q", Some(&CaseContext::default()), 3);
        assert!(!empty.prompt.contains("Case context"));
    }

    #[tokio::test]
    async fn test_generate_same_shape_with_and_without_context() {
        let output = "[\"FDCPA standing defenses\", \"consumer debt household purpose\", \"assignee standing\"]";
        let ctx = case_context();
        for context in [None, Some(&ctx)] {
            let planner = QueryPlanner::new(Arc::new(ScriptedLlm::new(&[output])));
            let subs = planner
                .generate("Research FDCPA standing defenses", context, 3)
                .await
                .unwrap();
            assert_eq!(subs.len(), 3);
            assert!(subs.iter().all(|s| !s.text.trim().is_empty()));
            assert_eq!(subs[0].id.to_string(), "sq-1");
        }
    }

    #[tokio::test]
    async fn test_generate_retries_once_then_fails() {
        let llm = Arc::new(ScriptedLlm::new(&["not a list", "[\"a\", \"b\", \"c\"]"]));
        let planner = QueryPlanner::new(llm.clone());
        let subs = planner.generate("q", None, 3).await.unwrap();
        assert_eq!(subs.len(), 3);
        assert_eq!(llm.prompts.lock().unwrap().len(), 2);

        let llm = Arc::new(ScriptedLlm::new(&["one", "two", "[\"a\", \"b\", \"c\"]"]));
        let planner = QueryPlanner::new(llm.clone());
        let err = planner.generate("q", None, 3).await.unwrap_err();
        assert!(matches!(err, AppError::Planning { .. }));
        assert!(err.is_session_fatal());
        assert_eq!(llm.prompts.lock().unwrap().len(), 2);
    }
}
