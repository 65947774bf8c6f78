use std::collections::HashSet;
use std::thread;

use relay_orchestrator::{Orchestrator, NEW_CONVERSATION_REPLY};
use relay_provider::{CloudBackend, ErrorClass, ProviderConfig, ProviderSelection};
use relay_session::{ProviderKind, TurnRole};

fn rules_orchestrator() -> Orchestrator {
    Orchestrator::new(&ProviderConfig::default())
}

fn keyless_cloud_orchestrator() -> Orchestrator {
    Orchestrator::new(&ProviderConfig {
        selection: ProviderSelection::DirectCloud {
            backend: CloudBackend::OpenAi,
            api_base: "http://127.0.0.1:9/v1".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
        },
        ..ProviderConfig::default()
    })
}

#[test]
fn integration_sessions_are_isolated_per_chat() {
    let orchestrator = rules_orchestrator();
    let chats = ["alpha", "beta", "gamma", "delta"];

    thread::scope(|scope| {
        for chat in chats {
            let orchestrator = &orchestrator;
            scope.spawn(move || {
                for round in 0..5 {
                    orchestrator.handle(chat, &format!("{round} + {round}"), None);
                }
            });
        }
    });

    assert_eq!(orchestrator.active_sessions(), chats.len());
    for chat in chats {
        let history = orchestrator.history(chat);
        assert_eq!(history.len(), 10, "{chat}");
        let prompts: Vec<&str> = history
            .iter()
            .filter(|turn| turn.role == TurnRole::User)
            .map(|turn| turn.text.as_str())
            .collect();
        assert_eq!(prompts, ["0 + 0", "1 + 1", "2 + 2", "3 + 3", "4 + 4"]);
    }

    assert!(orchestrator.clear_session("alpha"));
    assert!(orchestrator.history("alpha").is_empty());
    assert_eq!(orchestrator.history("beta").len(), 10);
}

#[test]
fn integration_fallback_answers_are_deterministic() {
    let orchestrator = keyless_cloud_orchestrator();
    assert_eq!(orchestrator.provider_kind(), ProviderKind::DirectCloud);

    let sqrt = orchestrator.handle_detailed("chat", "sqrt(16)", None);
    assert!(sqrt.text.contains('4'), "{}", sqrt.text);
    assert_eq!(sqrt.answered_by, ProviderKind::RuleBased);
    assert_eq!(sqrt.failure, Some(ErrorClass::ProviderUnavailable));

    let miles = orchestrator.handle_detailed("chat", "10 km to miles", None);
    assert!(miles.text.contains("6.21"), "{}", miles.text);

    let rules = rules_orchestrator();
    let answers: HashSet<String> = (0..3)
        .map(|attempt| rules.handle(&format!("chat-{attempt}"), "sqrt(16)", None))
        .collect();
    assert_eq!(answers.len(), 1);
    assert!(answers.contains(&sqrt.text));

    // Fallback exchanges count as successful turns.
    assert_eq!(orchestrator.history("chat").len(), 4);
}

#[test]
fn integration_clear_reports_whether_a_session_existed() {
    let orchestrator = rules_orchestrator();
    assert!(!orchestrator.clear_session("nobody"));

    orchestrator.handle("chat", "hello", None);
    assert!(orchestrator.clear_session("chat"));
    assert!(!orchestrator.clear_session("chat"));

    orchestrator.handle("chat", "hello again", None);
    assert_eq!(orchestrator.history("chat").len(), 2);
}

#[test]
fn integration_new_command_starts_a_fresh_conversation() {
    let orchestrator = rules_orchestrator();
    orchestrator.handle("chat", "2 * 21", None);
    assert_eq!(orchestrator.handle("chat", "/new", None), NEW_CONVERSATION_REPLY);
    assert!(orchestrator.history("chat").is_empty());
    assert_eq!(orchestrator.active_sessions(), 0);
}

#[test]
fn integration_shutdown_releases_every_session() {
    let orchestrator = rules_orchestrator();
    for chat in ["a", "b", "c"] {
        orchestrator.handle(chat, "help", None);
    }
    orchestrator.shutdown();
    assert_eq!(orchestrator.active_sessions(), 0);
    assert!(!orchestrator.clear_session("a"));
}
