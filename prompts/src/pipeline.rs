//! Template -> description -> enhanced prompt

use chrono::Local;
use rand::Rng;
use serde_json::Value;
use std::fmt::Write;
use std::time::Duration;
use zimage_core::template::{create_description, generate_variations, Template, FORMAT_KEY};
use zimage_core::{InterruptFlag, PromptRecord};
use zimage_runtime_llm::PromptEnhancer;

/// Variations generated when the user accepts without a count
pub const DEFAULT_VARIATIONS: usize = 3;

/// Variations shown before generation starts
const PREVIEW_LIMIT: usize = 3;

/// How many templates to process, decided from flags or by asking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariationPlan {
    /// Only the template as written
    Single,
    /// The template plus randomized variants, `n` in total
    Variations(usize),
    /// Neither flag given; ask the user
    Ask,
}

impl VariationPlan {
    pub fn from_flags(num_variations: usize, yes: bool) -> Self {
        if num_variations > 0 {
            VariationPlan::Variations(num_variations)
        } else if yes {
            VariationPlan::Single
        } else {
            VariationPlan::Ask
        }
    }
}

/// Templates to run for a resolved plan
pub fn plan_templates<R: Rng + ?Sized>(template: &Template, plan: VariationPlan, rng: &mut R) -> Vec<Template> {
    match plan {
        VariationPlan::Variations(n) => generate_variations(template, n, rng),
        VariationPlan::Single | VariationPlan::Ask => vec![template.clone()],
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human readable dump of one variation: nested groups first-class,
/// everything else listed as other attributes
pub fn format_variation(index: usize, template: &Template) -> String {
    let mut out = format!("Variation {}:\n", index + 1);
    let mut others = Vec::new();

    for (key, value) in template {
        match value {
            Value::Object(group) => {
                let _ = writeln!(out, "  {}:", key);
                for (field, value) in group {
                    let _ = writeln!(out, "    {}: {}", field, display_value(value));
                }
            }
            _ if key == FORMAT_KEY => {}
            other => others.push((key, other)),
        }
    }

    if !others.is_empty() {
        out.push_str("  Other attributes:\n");
        for (key, value) in others {
            let _ = writeln!(out, "    {}: {}", key, display_value(value));
        }
    }
    out
}

/// Print up to three variations and one sample description
pub fn print_preview<R: Rng + ?Sized>(templates: &[Template], rng: &mut R) {
    println!("\nSample of template variations:");
    for (i, template) in templates.iter().take(PREVIEW_LIMIT).enumerate() {
        println!("\n{}", format_variation(i, template).trim_end());
        if i == 0 {
            println!("\nSample description: {}", create_description(template, rng));
            println!("(Options may resolve differently when prompts are generated)");
        }
    }
}

#[derive(Debug, Default)]
pub struct RunOutcome {
    pub records: Vec<PromptRecord>,
    pub fallbacks: usize,
    pub interrupted: bool,
}

/// Describe and enhance each template in order, pausing between LLM
/// requests. Stops before the next template once `interrupt` is set.
pub async fn generate_records<R: Rng + ?Sized>(
    enhancer: &PromptEnhancer,
    templates: &[Template],
    pause: Duration,
    interrupt: &InterruptFlag,
    rng: &mut R,
) -> RunOutcome {
    let mut outcome = RunOutcome::default();

    for (i, template) in templates.iter().enumerate() {
        if interrupt.is_set() {
            outcome.interrupted = true;
            break;
        }

        println!("\nProcessing template {}/{}...", i + 1, templates.len());
        let description = create_description(template, rng);
        println!("Base description: {}", description);

        let enhancement = enhancer.enhance(&description).await;
        if enhancement.is_fallback() {
            outcome.fallbacks += 1;
        } else {
            println!("Generated detailed prompt");
        }
        outcome
            .records
            .push(PromptRecord::new(enhancement.into_text(), Local::now()));

        if i + 1 < templates.len() && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }

    outcome
}

/// Existing file entries followed by the new records
pub fn append_records(existing: Vec<Value>, records: &[PromptRecord]) -> Vec<Value> {
    let mut all = existing;
    all.extend(records.iter().map(PromptRecord::to_value));
    all
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use zimage_runtime_api::{ChatBackend, ChatRequest, ChatResponse};
    use zimage_runtime_llm::RetryPolicy;

    /// Echoes the instruction back; fails when `fail` is set
    struct EchoBackend {
        fail: bool,
        interrupt_after_first: Option<InterruptFlag>,
    }

    #[async_trait]
    impl ChatBackend for EchoBackend {
        fn name(&self) -> &str {
            "Echo"
        }

        fn model(&self) -> &str {
            "echo"
        }

        async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
            if let Some(flag) = &self.interrupt_after_first {
                flag.trigger();
            }
            if self.fail {
                anyhow::bail!("offline");
            }
            Ok(ChatResponse {
                content: format!("detailed: {}", request.messages[0].content),
                tokens_used: 0,
                finish_reason: "stop".to_string(),
            })
        }
    }

    fn enhancer(fail: bool, interrupt: Option<InterruptFlag>) -> PromptEnhancer {
        PromptEnhancer::new(
            Box::new(EchoBackend {
                fail,
                interrupt_after_first: interrupt,
            }),
            "{template_description}",
            RetryPolicy {
                attempts: 2,
                backoff: Duration::ZERO,
            },
        )
    }

    fn template() -> Template {
        match json!({
            "subject": {"type": "cat | dog", "color": "black"},
            "style": "oil | watercolor",
            "_format": "A {subject.color} {subject.type}, {style}"
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_plan_from_flags() {
        assert_eq!(VariationPlan::from_flags(5, false), VariationPlan::Variations(5));
        assert_eq!(VariationPlan::from_flags(5, true), VariationPlan::Variations(5));
        assert_eq!(VariationPlan::from_flags(0, true), VariationPlan::Single);
        assert_eq!(VariationPlan::from_flags(0, false), VariationPlan::Ask);
    }

    #[test]
    fn test_plan_templates() {
        let mut rng = StdRng::seed_from_u64(1);
        let t = template();
        assert_eq!(plan_templates(&t, VariationPlan::Single, &mut rng), vec![t.clone()]);

        let templates = plan_templates(&t, VariationPlan::Variations(4), &mut rng);
        assert_eq!(templates.len(), 4);
        assert_eq!(templates[0], t);
    }

    #[test]
    fn test_format_variation() {
        let text = format_variation(0, &template());
        assert!(text.starts_with("Variation 1:\n"));
        assert!(text.contains("  subject:\n    type: cat | dog\n    color: black\n"));
        assert!(text.contains("  Other attributes:\n    style: oil | watercolor\n"));
        assert!(!text.contains("_format"));
    }

    #[test]
    fn test_append_records_keeps_existing_entries() {
        let existing = vec![json!({"description": "hand written prompt"})];
        let records = vec![PromptRecord {
            id: "2025-01-02_03-04-05".to_string(),
            description: "new".to_string(),
        }];

        let all = append_records(existing, &records);
        assert_eq!(
            all,
            vec![
                json!({"description": "hand written prompt"}),
                json!({"id": "2025-01-02_03-04-05", "description": "new"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_generate_records() {
        let mut rng = StdRng::seed_from_u64(3);
        let templates = vec![template(), template()];
        let outcome = generate_records(
            &enhancer(false, None),
            &templates,
            Duration::ZERO,
            &InterruptFlag::new(),
            &mut rng,
        )
        .await;

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.fallbacks, 0);
        assert!(!outcome.interrupted);
        for record in &outcome.records {
            assert!(record.description.starts_with("detailed: A black "));
            assert_eq!(record.id.len(), "2025-01-01_00-00-00".len());
        }
    }

    #[tokio::test]
    async fn test_failures_fall_back() {
        let mut rng = StdRng::seed_from_u64(3);
        let outcome = generate_records(
            &enhancer(true, None),
            &[template()],
            Duration::ZERO,
            &InterruptFlag::new(),
            &mut rng,
        )
        .await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.fallbacks, 1);
        assert!(outcome.records[0].description.contains("8k quality"));
    }

    #[tokio::test]
    async fn test_interrupt_keeps_finished_records() {
        let mut rng = StdRng::seed_from_u64(3);
        let interrupt = InterruptFlag::new();
        let templates = vec![template(), template(), template()];
        let outcome = generate_records(
            &enhancer(false, Some(interrupt.clone())),
            &templates,
            Duration::ZERO,
            &interrupt,
            &mut rng,
        )
        .await;

        assert!(outcome.interrupted);
        assert_eq!(outcome.records.len(), 1);
    }
}
