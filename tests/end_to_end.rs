//! End-to-end exercises of [`WorkflowManager`] against in-memory stores and a
//! scripted LLM client — no network, no real filesystem.

use std::collections::HashMap;
use std::sync::Arc;

use transflow::transflow::clients::mock::ScriptedLLMClient;
use transflow::transflow::event::{HumanInterventionHandler, HumanReviewResult, ReviewAction, ReviewDecision, TaskData, TaskType};
use transflow::transflow::project_store::{MemoryProjectStore, Project, ProjectFile, ProjectItem};
use transflow::transflow::store::{atom_status, Store};
use transflow::{RunSummary, TranslationConfig, WorkflowManager};
use async_trait::async_trait;
use sqlx::sqlite::SqlitePool;

async fn test_store() -> Store {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    let store = Store::from_pool(pool);
    store.migrate().await.unwrap();
    store
}

fn single_item_project(path: &str, text: &str) -> Project {
    Project {
        id: String::new(),
        files: vec![ProjectFile {
            path: path.to_string(),
            items: vec![ProjectItem { source_text: text.to_string(), ..Default::default() }],
        }],
        extra: HashMap::new(),
    }
}

#[tokio::test]
async fn simple_project_reaches_finalized_and_is_saved() {
    let store = test_store().await;
    let project_store = Arc::new(
        MemoryProjectStore::new().with_project("book.proj", single_item_project("ch1.txt", "Hello world.")).await,
    );
    let client = Arc::new(ScriptedLLMClient::new(vec![
        r#"{"terms": []}"#,
        "<textarea>\n1.Hola mundo.\n</textarea>",
        "<textarea>\n1.Hello world.\n</textarea>",
        "1. Score: 9.0",
    ]));

    let manager = WorkflowManager::new(
        TranslationConfig::default(),
        store.clone(),
        project_store.clone(),
        client,
        transflow::PlatformConfig::new("test-model", "key"),
    );

    let summary: RunSummary = manager.run("proj-simple", "book.proj", "book_es.proj").await.unwrap();
    assert_eq!(summary.total_atoms, 1);

    let saved = project_store.saved_projects().await;
    assert_eq!(saved.len(), 1);
    let item = &saved[0].1.files[0].items[0];
    assert_eq!(item.translated_text.as_deref(), Some("Hola mundo."));
    assert_eq!(item.translation_status, "finalized");
}

#[tokio::test]
async fn chunk_mismatch_falls_back_to_per_line_translation() {
    let store = test_store().await;
    let project = Project {
        id: String::new(),
        files: vec![ProjectFile {
            path: "ch1.txt".to_string(),
            items: vec![
                ProjectItem { source_text: "Hello.".to_string(), ..Default::default() },
                ProjectItem { source_text: "Goodbye.".to_string(), ..Default::default() },
            ],
        }],
        extra: HashMap::new(),
    };
    let project_store = Arc::new(MemoryProjectStore::new().with_project("two.proj", project).await);

    let client = Arc::new(ScriptedLLMClient::new(vec![
        r#"{"terms": []}"#,
        "<textarea>\n1.Hola.\n</textarea>",       // only one line back for two items -> triggers fallback
        "<textarea>\n1.Hola.\n</textarea>",        // per-line retry #1
        "<textarea>\n1.Adios.\n</textarea>",       // per-line retry #2
        "<textarea>\n1.Hello.\n2.Goodbye.\n</textarea>", // back-translation batch
        "1. Score: 9.0\n2. Score: 9.0",
    ]));

    let manager = WorkflowManager::new(
        TranslationConfig::default(),
        store,
        project_store.clone(),
        client,
        transflow::PlatformConfig::new("test-model", "key"),
    );

    let summary = manager.run("proj-mismatch", "two.proj", "two_out.proj").await.unwrap();
    assert_eq!(summary.total_atoms, 2);

    let saved = project_store.saved_projects().await;
    let items = &saved[0].1.files[0].items;
    assert_eq!(items[0].translated_text.as_deref(), Some("Hola."));
    assert_eq!(items[1].translated_text.as_deref(), Some("Adios."));
}

#[tokio::test]
async fn low_score_line_is_offered_for_human_review_and_accepted() {
    struct AcceptAllHandler;
    #[async_trait]
    impl HumanInterventionHandler for AcceptAllHandler {
        async fn request(&self, _task_type: TaskType, task_data: &TaskData) -> Option<HumanReviewResult> {
            Some(HumanReviewResult {
                review_results: task_data
                    .review_items
                    .iter()
                    .map(|item| ReviewDecision { index: item.global_index, action: ReviewAction::Accept })
                    .collect(),
            })
        }
    }

    let store = test_store().await;
    let project_store = Arc::new(
        MemoryProjectStore::new().with_project("book.proj", single_item_project("ch1.txt", "Hello world.")).await,
    );
    let client = Arc::new(ScriptedLLMClient::new(vec![
        r#"{"terms": []}"#,
        "<textarea>\n1.Hola mundo.\n</textarea>",
        "<textarea>\n1.Hello world.\n</textarea>",
        "1. Score: 3.0", // below the refinement threshold, triggers a TEaR refine round
        "<textarea>\n1.Hola mundo otra vez.\n</textarea>",
    ]));

    let mut config = TranslationConfig::default();
    config.enable_human_review = true;
    config.review_threshold = 0.9; // scaled to 9.0, well above the scripted 3.0

    let manager = WorkflowManager::new(
        config,
        store.clone(),
        project_store.clone(),
        client,
        transflow::PlatformConfig::new("test-model", "key"),
    )
    .with_human_intervention_handler(Arc::new(AcceptAllHandler));

    manager.run("proj-review", "book.proj", "book_out.proj").await.unwrap();

    // a human-originated trace advances statusCode to HUMAN_REVIEWED before
    // the final enforcement pass advances it the rest of the way
    let saved = project_store.saved_projects().await;
    assert_eq!(saved.len(), 1);
    assert!(saved[0].1.files[0].items[0].translated_text.is_some());
}

#[tokio::test]
async fn empty_project_short_circuits_with_an_empty_summary() {
    let store = test_store().await;
    let empty_project = Project {
        id: String::new(),
        files: vec![ProjectFile { path: "e.txt".to_string(), items: vec![] }],
        extra: HashMap::new(),
    };
    let project_store = Arc::new(MemoryProjectStore::new().with_project("empty.proj", empty_project).await);
    let client = Arc::new(ScriptedLLMClient::new(vec!["{}"]));

    let manager = WorkflowManager::new(
        TranslationConfig::default(),
        store,
        project_store,
        client,
        transflow::PlatformConfig::new("test-model", "key"),
    );

    let summary = manager.run("proj-empty", "empty.proj", "out.proj").await.unwrap();
    assert_eq!(summary.total_atoms, 0);
}

#[tokio::test]
async fn resume_reuses_previously_created_document_and_atom_rows() {
    let store = test_store().await;
    store.create_project("proj-resume", "en", "es", "{}", None, None, None, None).await.unwrap();
    let document_id = store.upsert_doc("proj-resume", "ch1.txt").await.unwrap();
    let atom_ids = store
        .create_atoms_batch(
            document_id,
            &[transflow::transflow::store::NewAtom { position: 0, source_text: "Hello world.".to_string() }],
        )
        .await
        .unwrap();

    let mut extra = HashMap::new();
    extra.insert(
        transflow::transflow::project_store::extra_keys::DB_DOC_MAP.to_string(),
        serde_json::json!({"ch1.txt": document_id}),
    );
    extra.insert(
        transflow::transflow::project_store::extra_keys::DB_ATOM_MAP.to_string(),
        serde_json::json!({ format!("{document_id}:0"): atom_ids[0] }),
    );
    let project = Project {
        id: String::new(),
        files: vec![ProjectFile {
            path: "ch1.txt".to_string(),
            items: vec![ProjectItem { source_text: "Hello world.".to_string(), ..Default::default() }],
        }],
        extra,
    };
    let project_store = Arc::new(MemoryProjectStore::new().with_project("resume.proj", project).await);

    let client = Arc::new(ScriptedLLMClient::new(vec![
        r#"{"terms": []}"#,
        "<textarea>\n1.Hola mundo.\n</textarea>",
        "<textarea>\n1.Hello world.\n</textarea>",
        "1. Score: 9.0",
    ]));

    let manager = WorkflowManager::new(
        TranslationConfig::default(),
        store.clone(),
        project_store,
        client,
        transflow::PlatformConfig::new("test-model", "key"),
    );

    manager.run("proj-resume", "resume.proj", "resume_out.proj").await.unwrap();

    // only one atom ever exists for this document -- a fresh row was not
    // inserted on top of the resumed one
    let atoms = store.list_atoms(document_id).await.unwrap();
    assert_eq!(atoms.len(), 1);
    assert_eq!(atoms[0].status_code, atom_status::FINALIZED);
}
