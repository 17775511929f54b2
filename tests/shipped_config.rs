use std::path::Path;
use std::sync::Arc;

use docsage::config::Settings;
use docsage::pipeline::{ANALYSIS_SECTION, COMPARISON_SECTION, QA_CHAT_SECTION};
use docsage::prompts::{PromptCatalog, PromptRegistry};
use docsage::service::{DocumentService, PipelineApi};
use docsage::session::SessionBackend;

fn shipped_settings() -> Settings {
    Settings::load(Path::new("config/settings.toml"), "test", |_| None)
        .expect("shipped settings load without environment")
}

#[test]
fn shipped_settings_merge_the_test_layer() {
    let settings = shipped_settings();
    assert_eq!(settings.environment(), "test");
    assert_eq!(settings.defaults.embedding, "offline");
    assert_eq!(settings.defaults.llm, "llama3");
    assert_eq!(settings.sessions.backend, SessionBackend::Memory);
    assert_eq!(settings.get_pipeline_chunking_strategy(ANALYSIS_SECTION), "token");
    assert_eq!(settings.get_or("retrieval.top_k", 0_i64), 5);
}

#[test]
fn shipped_prompts_cover_every_pipeline_step() {
    let catalog = PromptCatalog::from_path(Path::new("config/prompts.toml")).expect("catalog");
    for (section, step) in [
        (ANALYSIS_SECTION, "summary_map"),
        (ANALYSIS_SECTION, "summary_reduce"),
        (ANALYSIS_SECTION, "keywords"),
        (COMPARISON_SECTION, "holistic_compare"),
        (COMPARISON_SECTION, "compare_docs"),
        (COMPARISON_SECTION, "chunk_reduce"),
        (QA_CHAT_SECTION, "rewrite_question"),
        (QA_CHAT_SECTION, "answer_using_context"),
    ] {
        let template = catalog
            .get(section, step)
            .unwrap_or_else(|| panic!("missing prompt {section}.{step}"));
        for variable in &template.input_variables {
            assert!(
                template.references(variable),
                "{section}.{step} declares {variable} but never uses it"
            );
        }
    }
}

#[tokio::test]
async fn service_builds_from_shipped_files() {
    let prompts = PromptRegistry::load("config/prompts.toml").expect("registry");
    let service = DocumentService::new(Arc::new(shipped_settings()), Arc::new(prompts))
        .expect("service");
    assert_eq!(service.reload_prompts().await.expect("reload"), 8);
    assert_eq!(service.metrics_snapshot().analyses, 0);
}
