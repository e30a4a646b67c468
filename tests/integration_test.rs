/// End-to-end tests through `ArchiveService`: listing, hydration and search across
/// sources of different vendors.
mod common;

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use chat_archive::models::SourceKind;
use chat_archive::{ArchiveService, IndexState, Role, SearchScope, Source};
use common::{
    ChatgptExportBuilder, ClaudeExportBuilder, GeminiExportBuilder, conversation_document, gemini_capture_document,
    test_uuid,
};
use serde_json::json;
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(20);

fn claude_export() -> ClaudeExportBuilder {
    ClaudeExportBuilder::new()
        .with_conversation(
            &test_uuid(1),
            "Greetings",
            &[("human", "hello there"), ("assistant", "Hi! How can I help?")],
        )
        .with_raw_record(json!({"uuid": "not-a-uuid", "name": "Broken", "chat_messages": []}))
        .with_conversation(
            &test_uuid(2),
            "Lifetimes",
            &[("human", "explain lifetimes"), ("assistant", "A lifetime names a borrow region.")],
        )
}

fn chatgpt_export() -> ChatgptExportBuilder {
    ChatgptExportBuilder::new()
        .with_conversation(
            None,
            "c1",
            "Trip planning",
            &[("user", "Plan a trip to Kyoto"), ("assistant", "Day one: hello Fushimi Inari.")],
        )
        .with_conversation(
            Some("Work"),
            "c2",
            "Hello world in Rust",
            &[("user", "print hello world"), ("assistant", "println!(\"hello world\");")],
        )
}

fn open_service(config_dir: &TempDir, sources: Vec<Source>) -> ArchiveService {
    let service = ArchiveService::open(config_dir.path().join("sources.json")).unwrap();
    service.set_sources(sources).unwrap();
    service
}

#[test]
fn test_two_sources_listing_and_search() {
    let claude = claude_export().build();
    let chatgpt = chatgpt_export().build();
    let config = TempDir::new().unwrap();
    let service = open_service(
        &config,
        vec![
            Source::new("claude", SourceKind::Auto, claude.path()),
            Source::new("gpt", SourceKind::Auto, chatgpt.path()),
        ],
    );

    let listing = service.list_all_conversations().unwrap();
    assert_eq!(listing.len(), 4);
    assert_eq!(listing.skipped, 1);

    let first = service.search("hello", &SearchScope::AllSources);
    assert!(!first.ready);

    assert!(service.wait_until_ready(WAIT));
    let response = service.search("hello", &SearchScope::AllSources);
    assert!(response.ready);
    assert_eq!(response.stats.doc_count, 4);

    let found: HashSet<(&str, &str)> =
        response.results.iter().map(|h| (h.source.as_str(), h.id.as_str())).collect();
    let uuid = test_uuid(1);
    let expected: HashSet<(&str, &str)> =
        [("claude", uuid.as_str()), ("gpt", "c1"), ("gpt", "c2")].into_iter().collect();
    assert_eq!(found, expected);

    // Title match ranks first
    assert_eq!(response.results[0].id, "c2");
    for hit in &response.results {
        assert!(!hit.snippet.is_empty());
        assert!(hit.snippet.to_lowercase().contains("hello"));
        assert!(!hit.highlights.is_empty());
    }
}

#[test]
fn test_search_scope_one_source() {
    let claude = claude_export().build();
    let chatgpt = chatgpt_export().build();
    let config = TempDir::new().unwrap();
    let service = open_service(
        &config,
        vec![
            Source::new("claude", SourceKind::Claude, claude.path()),
            Source::new("gpt", SourceKind::Chatgpt, chatgpt.path()),
        ],
    );
    assert!(service.wait_until_ready(WAIT));

    let scope = SearchScope::OneSource("claude".to_string());
    let response = service.search("hello", &scope);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].source, "claude");
    assert_eq!(response.stats.doc_count, 2);
}

#[test]
fn test_hydrate_is_idempotent_for_every_vendor() {
    let claude = claude_export().build();
    let chatgpt = chatgpt_export().build();
    let gemini = GeminiExportBuilder::new()
        .with_entry("Say hello", "<p>Hello!</p>", "Jan 31, 2026, 6:15:01 AM PST", "")
        .build();
    let config = TempDir::new().unwrap();
    let service = open_service(
        &config,
        vec![
            Source::new("claude", SourceKind::Auto, claude.path()),
            Source::new("gpt", SourceKind::Auto, chatgpt.path()),
            Source::new("gem", SourceKind::Auto, gemini.path()),
        ],
    );

    for source in ["claude", "gpt", "gem"] {
        let listing = service.list_conversations(source).unwrap();
        for summary in listing.summaries() {
            let a = service.get_conversation(source, &summary.category, &summary.id).unwrap();
            let b = service.get_conversation(source, &summary.category, &summary.id).unwrap();
            assert_eq!(a, b);
            assert_eq!(serde_json::to_vec(&*a).unwrap(), serde_json::to_vec(&*b).unwrap());
        }
    }
}

#[test]
fn test_conversation_shapes() {
    let claude = claude_export().build();
    let chatgpt = chatgpt_export().build();
    let config = TempDir::new().unwrap();
    let service = open_service(
        &config,
        vec![
            Source::new("claude", SourceKind::Auto, claude.path()),
            Source::new("gpt", SourceKind::Auto, chatgpt.path()),
        ],
    );

    let gpt = service.list_conversations("gpt").unwrap();
    assert!(gpt.categories.contains_key("All"));
    assert!(gpt.categories.contains_key("Work"));

    let conversation = service.get_conversation("gpt", "Work", "c2").unwrap();
    assert_eq!(conversation.title, "Hello world in Rust");
    let roles: Vec<Role> = conversation.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);

    let claude_conv = service.get_conversation("claude", "All", &test_uuid(2)).unwrap();
    assert_eq!(claude_conv.messages[1].content, "A lifetime names a borrow region.");
    assert_eq!(claude_conv.meta.model_slug.as_deref(), Some("Claude"));
}

#[test]
fn test_gemini_entries_are_two_message_conversations() {
    let gemini = GeminiExportBuilder::new()
        .with_entry(
            "What is this? Attached 1 file.",
            "<p>A <b>cat</b>.</p>",
            "Jan 1, 2026, 1:00:00 AM UTC",
            "<a href=\"cat.png\">cat.png</a><br>",
        )
        .with_attachment("cat.png", b"\x89PNG")
        .build();
    let config = TempDir::new().unwrap();
    let service = open_service(&config, vec![Source::new("gem", SourceKind::Auto, gemini.path())]);

    let listing = service.list_conversations("gem").unwrap();
    assert_eq!(listing.len(), 1);
    let summary = listing.summaries().next().unwrap();
    let conversation = service.get_conversation("gem", &summary.category, &summary.id).unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, Role::User);
    assert!(conversation.messages[0].content.contains(
        "![cat.png](/api/file?source=gem&path=Takeout/My%20Activity/Gemini%20Apps/cat.png)"
    ));
    assert_eq!(conversation.messages[1].content, "A **cat**.");

    let bytes = service.get_file("gem", "Takeout/My Activity/Gemini Apps/cat.png").unwrap();
    assert_eq!(bytes, b"\x89PNG");
}

#[test]
fn test_removed_source_root_leaves_healthy_source_indexed() {
    let chatgpt = chatgpt_export().build();
    let claude = claude_export().build();
    let config = TempDir::new().unwrap();
    let service = open_service(
        &config,
        vec![
            Source::new("gpt", SourceKind::Chatgpt, chatgpt.path()),
            Source::new("claude", SourceKind::Claude, claude.path()),
        ],
    );
    fs::remove_dir_all(claude.path()).unwrap();

    let merged = service.list_all_conversations().unwrap();
    assert_eq!(merged.len(), 2);
    assert_eq!(merged.skipped, 1);
    assert!(merged.summaries().all(|summary| summary.source_id == "gpt"));

    assert!(service.wait_until_ready(WAIT));
    let response = service.search("hello", &SearchScope::AllSources);
    assert!(response.ready);
    assert_eq!(response.stats.doc_count, 2);
    let sources: HashSet<&str> = response.results.iter().map(|hit| hit.source.as_str()).collect();
    assert_eq!(sources, HashSet::from(["gpt"]));
    assert_eq!(response.results.len(), 2);
}

#[test]
fn test_gemini_captures_and_project_memories_are_indexed() {
    let capture = gemini_capture_document(
        "Sharing state",
        &[
            ("How do threads share data?", "Wrap it in an Arc and guard writes with a Mutex.", 1_769_940_000),
            ("And for reads only?", "An Arc alone is enough for immutable data.", 1_769_940_300),
        ],
    );
    let chatgpt = ChatgptExportBuilder::new()
        .with_raw_file(Some("Gemini"), "Sharing_state_c_0000000001.json", &capture.to_string())
        .build();
    let project = test_uuid(50);
    let claude = ClaudeExportBuilder::new()
        .with_conversation(&test_uuid(1), "Greetings", &[("human", "hello there")])
        .with_projects(json!([{"uuid": project, "name": "Release notes", "description": "Weekly summaries"}]))
        .with_memories(json!([{"project_memories": {project.as_str(): "Always mention the zeppelin rollout."}}]))
        .build();
    let config = TempDir::new().unwrap();
    let service = open_service(
        &config,
        vec![
            Source::new("gpt", SourceKind::Chatgpt, chatgpt.path()),
            Source::new("claude", SourceKind::Auto, claude.path()),
        ],
    );

    let gpt = service.list_conversations("gpt").unwrap();
    let summary = gpt.find("Gemini", "0000000001").unwrap();
    assert_eq!(summary.title, "Sharing state");
    let conversation = service.get_conversation("gpt", "Gemini", "0000000001").unwrap();
    let contents: Vec<&str> = conversation.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "How do threads share data?",
            "Wrap it in an Arc and guard writes with a Mutex.",
            "And for reads only?",
            "An Arc alone is enough for immutable data.",
        ]
    );

    let notes = service.get_conversation("claude", "Projects", &project).unwrap();
    assert!(notes.messages[0].content.ends_with("**Project Memory**\n\nAlways mention the zeppelin rollout."));

    assert!(service.wait_until_ready(WAIT));
    let response = service.search("zeppelin", &SearchScope::AllSources);
    assert_eq!(response.results.len(), 1);
    assert_eq!((response.results[0].source.as_str(), response.results[0].category.as_str()), ("claude", "Projects"));

    let response = service.search("mutex", &SearchScope::AllSources);
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].id, "0000000001");
}

#[test]
fn test_source_set_change_supersedes_build() {
    let claude = claude_export().build();
    let chatgpt = chatgpt_export().build();
    let config = TempDir::new().unwrap();
    let claude_source = Source::new("claude", SourceKind::Auto, claude.path());
    let gpt_source = Source::new("gpt", SourceKind::Auto, chatgpt.path());
    let service = open_service(&config, vec![claude_source, gpt_source.clone()]);

    service.refresh();
    service.set_sources(vec![gpt_source]).unwrap();
    assert!(service.wait_until_ready(WAIT));

    let response = service.search("hello", &SearchScope::AllSources);
    assert!(response.ready);
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|h| h.source == "gpt"));
    assert_eq!(response.stats.doc_count, 2);
}

#[test]
fn test_disabling_a_source_removes_it_from_search() {
    let claude = claude_export().build();
    let chatgpt = chatgpt_export().build();
    let config = TempDir::new().unwrap();
    let mut claude_source = Source::new("claude", SourceKind::Auto, claude.path());
    let gpt_source = Source::new("gpt", SourceKind::Auto, chatgpt.path());
    let service = open_service(&config, vec![claude_source.clone(), gpt_source.clone()]);
    assert!(service.wait_until_ready(WAIT));
    assert_eq!(service.search("lifetimes", &SearchScope::AllSources).results.len(), 1);

    claude_source.enabled = false;
    service.set_sources(vec![claude_source, gpt_source]).unwrap();
    assert!(service.wait_until_ready(WAIT));
    assert!(service.search("lifetimes", &SearchScope::AllSources).results.is_empty());
    assert!(service.list_conversations("claude").unwrap().is_empty());
}

#[test]
fn test_changed_files_trigger_reindex() {
    let chatgpt = chatgpt_export().build();
    let config = TempDir::new().unwrap();
    let service = open_service(&config, vec![Source::new("gpt", SourceKind::Auto, chatgpt.path())]);
    assert!(service.wait_until_ready(WAIT));
    assert!(service.search("zeppelin", &SearchScope::AllSources).results.is_empty());

    let doc = conversation_document("Airships", 1_700_000_500.0, &[("user", "tell me about the zeppelin")]);
    fs::write(chatgpt.path().join("Airships_c3.json"), doc.to_string()).unwrap();

    let listing = service.list_conversations("gpt").unwrap();
    assert_eq!(listing.len(), 3);
    assert_ne!(service.index_state(), IndexState::Empty);
    assert!(service.wait_until_ready(WAIT));
    let hits = service.search("zeppelin", &SearchScope::AllSources).results;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "c3");
}

#[test]
fn test_narrowing_query_never_adds_results() {
    let chatgpt = chatgpt_export().build();
    let config = TempDir::new().unwrap();
    let service = open_service(&config, vec![Source::new("gpt", SourceKind::Auto, chatgpt.path())]);
    assert!(service.wait_until_ready(WAIT));

    let ids = |q: &str| -> HashSet<String> {
        service.search(q, &SearchScope::AllSources).results.into_iter().map(|h| h.id).collect()
    };
    let wide = ids("hello");
    let narrow = ids("hello rust");
    let narrower = ids("hello rust kyoto");
    assert_eq!(wide.len(), 2);
    assert!(narrow.is_subset(&wide));
    assert!(narrower.is_subset(&narrow));
    assert!(narrower.is_empty());
}

#[test]
fn test_cjk_search_end_to_end() {
    let chatgpt = ChatgptExportBuilder::new()
        .with_conversation(None, "z1", "学习笔记", &[("user", "介绍一下搜索引擎的原理")])
        .with_conversation(None, "z2", "天气", &[("user", "今天天气怎么样")])
        .build();
    let config = TempDir::new().unwrap();
    let service = open_service(&config, vec![Source::new("gpt", SourceKind::Auto, chatgpt.path())]);
    assert!(service.wait_until_ready(WAIT));

    let hits = service.search("搜索", &SearchScope::AllSources).results;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "z1");

    let title_hits = service.search("笔记", &SearchScope::AllSources).results;
    assert_eq!(title_hits[0].id, "z1");

    assert_eq!(service.search("天", &SearchScope::AllSources).results.len(), 1);
}

#[test]
fn test_import_root_registers_exports() {
    let parent = TempDir::new().unwrap();
    let claude_dir = parent.path().join("claude-2024");
    fs::create_dir_all(&claude_dir).unwrap();
    fs::write(claude_dir.join("conversations.json"), "[]").unwrap();
    let gpt_dir = parent.path().join("gpt");
    fs::create_dir_all(&gpt_dir).unwrap();
    fs::write(gpt_dir.join("Chat_1.json"), "{}").unwrap();

    let config = TempDir::new().unwrap();
    let service = ArchiveService::open(config.path().join("sources.json")).unwrap();
    let added = service.import_root(parent.path()).unwrap();
    let ids: Vec<&str> = added.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["claude-2024", "gpt"]);
    assert_eq!(service.list_sources().len(), 2);
    assert!(service.import_root(parent.path()).unwrap().is_empty());

    let reopened = ArchiveService::open(config.path().join("sources.json")).unwrap();
    assert_eq!(reopened.list_sources().len(), 2);
}
