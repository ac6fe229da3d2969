use std::sync::atomic::Ordering;
use std::sync::Arc;

use english_tutor::db::operations::{goals, messages, stats, vocabulary};
use english_tutor::tutor::events::TutorEvent;
use english_tutor::{GatewayError, Level, Role, TurnOutcome, TutorSession};

mod common;

use common::{record_json, GatedGateway, ScriptedGateway};

fn clean_turn(reply: &str, new_words: &[&str]) -> String {
    record_json(reply, None, new_words, &[], "beginner")
}

#[tokio::test]
async fn test_four_clean_turns_give_full_accuracy() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying((0..4).map(|i| clean_turn(&format!("Reply {i}"), &[])));
    let session = TutorSession::start(ledger.clone(), gateway.clone(), Level::Beginner)
        .await
        .unwrap();

    for i in 0..4 {
        let outcome = session.submit(&format!("Message {i}")).await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Replied(_)));
    }

    assert_eq!(gateway.calls(), 4);
    assert_eq!(session.user_message_count(), 4);
    assert_eq!(session.accuracy(), 100.0);

    let row = stats::get_stats(&ledger, session.session_id()).await.unwrap().unwrap();
    assert_eq!(row.accuracy_pct, 100.0);
    assert_eq!(row.corrections_count, 0);
}

#[tokio::test]
async fn test_one_correction_in_four_turns_gives_75() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying([
        clean_turn("Nice.", &[]),
        record_json("Almost!", Some("I went, not I goed"), &[], &[], "beginner"),
        clean_turn("Good.", &[]),
        clean_turn("Great.", &[]),
    ]);
    let session = TutorSession::start(ledger.clone(), gateway, Level::Beginner).await.unwrap();

    for text in ["Hello", "Yesterday I goed home", "I like tea", "Bye"] {
        session.submit(text).await.unwrap();
    }

    assert_eq!(session.corrections_count(), 1);
    assert_eq!(session.accuracy(), 75.0);

    let row = stats::get_stats(&ledger, session.session_id()).await.unwrap().unwrap();
    assert_eq!(row.accuracy_pct, 75.0);
    assert_eq!(row.corrections_count, 1);

    let stored = messages::get_messages(&ledger, session.session_id()).await.unwrap();
    let feedback = messages::get_feedback(&ledger, stored[3].id).await.unwrap().unwrap();
    assert_eq!(feedback.correction.as_deref(), Some("I went, not I goed"));
}

#[tokio::test]
async fn test_blank_input_is_ignored() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying(Vec::<String>::new());
    let session = TutorSession::start(ledger.clone(), gateway.clone(), Level::Beginner)
        .await
        .unwrap();

    let outcome = session.submit("   \n\t ").await.unwrap();

    assert_eq!(outcome, TurnOutcome::Ignored);
    assert_eq!(gateway.calls(), 0);
    assert!(session.transcript().is_empty());
    assert!(messages::get_messages(session.ledger(), session.session_id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_word_set_deduplicates_while_ledger_appends() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying([
        clean_turn("One.", &["run", "ran"]),
        clean_turn("Two.", &["ran", "jump"]),
    ]);
    let session = TutorSession::start(ledger.clone(), gateway, Level::Beginner).await.unwrap();

    session.submit("first").await.unwrap();
    session.submit("second").await.unwrap();

    assert_eq!(session.words_learned(), 3);
    assert_eq!(session.distinct_words(), vec!["jump", "ran", "run"]);
    assert_eq!(vocabulary::get_vocabulary(&ledger, session.session_id()).await.unwrap().len(), 4);

    let row = stats::get_stats(&ledger, session.session_id()).await.unwrap().unwrap();
    assert_eq!(row.words_learned, 3);
}

#[tokio::test]
async fn test_unconfigured_gateway_keeps_user_message_only() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::new(vec![Err(GatewayError::NotConfigured("ANTHROPIC_API_KEY"))]);
    let session = TutorSession::start(ledger.clone(), gateway, Level::Beginner).await.unwrap();
    let mut events = session.subscribe();

    let outcome = session.submit("Hello there").await.unwrap();

    match outcome {
        TurnOutcome::Failed(message) => assert!(message.starts_with("No API key")),
        other => panic!("expected failed turn, got {other:?}"),
    }

    let stored = messages::get_messages(&ledger, session.session_id()).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].role, Role::User);
    assert_eq!(stored[0].content, "Hello there");
    assert!(messages::get_feedback(&ledger, stored[0].id).await.unwrap().is_none());
    assert_eq!(session.corrections_count(), 0);
    assert!(!session.is_awaiting_response());

    let envelope = events.try_recv().expect("error event should be published");
    match envelope.event {
        TutorEvent::Error { session_id, message } => {
            assert_eq!(session_id, session.session_id());
            assert!(message.contains("ANTHROPIC_API_KEY"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_api_failure_uses_api_error_prefix() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::new(vec![Err(GatewayError::EmptyContent)]);
    let session = TutorSession::start(ledger, gateway, Level::Beginner).await.unwrap();

    let outcome = session.submit("Hi").await.unwrap();

    assert!(matches!(outcome, TurnOutcome::Failed(ref m) if m.starts_with("API error")));
}

#[tokio::test]
async fn test_resume_restores_conversation_state() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying([
        record_json("Hi!", Some("Say 'Hello'"), &["greet"], &["Greetings"], "elementary"),
        clean_turn("Sure.", &["tea", "greet"]),
    ]);
    let session = TutorSession::start(ledger.clone(), gateway.clone(), Level::Beginner)
        .await
        .unwrap();
    session.submit("Helo").await.unwrap();
    session.submit("I want tea").await.unwrap();
    let session_id = session.session_id();
    let transcript_before = session.transcript();

    let resumed = TutorSession::resume(ledger.clone(), gateway, session_id).await.unwrap();

    assert_eq!(resumed.session_id(), session_id);
    assert_eq!(resumed.transcript(), transcript_before);
    assert_eq!(resumed.transcript().len(), 4);
    assert_eq!(resumed.words_learned(), 2);
    assert_eq!(resumed.corrections_count(), 1);
    assert_eq!(resumed.accuracy(), 50.0);
    assert_eq!(resumed.goals(), vec!["Greetings"]);
}

#[tokio::test]
async fn test_resume_unknown_session_fails() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying(Vec::<String>::new());

    let result = TutorSession::resume(ledger, gateway, 42).await;

    assert!(result.is_err());
}

#[tokio::test]
async fn test_goals_replaced_only_when_present() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying([
        record_json("One.", None, &[], &["Past simple", "Articles"], "beginner"),
        clean_turn("Two.", &[]),
        record_json("Three.", None, &[], &["Prepositions"], "beginner"),
    ]);
    let session = TutorSession::start(ledger.clone(), gateway, Level::Beginner).await.unwrap();
    let session_id = session.session_id();

    session.submit("a").await.unwrap();
    assert_eq!(goals::get_goals(&ledger, session_id).await.unwrap(), vec!["Past simple", "Articles"]);

    session.submit("b").await.unwrap();
    assert_eq!(goals::get_goals(&ledger, session_id).await.unwrap(), vec!["Past simple", "Articles"]);

    session.submit("c").await.unwrap();
    assert_eq!(goals::get_goals(&ledger, session_id).await.unwrap(), vec!["Prepositions"]);
    assert_eq!(session.goals(), vec!["Prepositions"]);
}

#[tokio::test]
async fn test_prose_reply_falls_back_and_completes() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying(["  Sorry, I can only chat today.  ".to_string()]);
    let session = TutorSession::start(ledger.clone(), gateway, Level::Intermediate)
        .await
        .unwrap();

    let outcome = session.submit("Hello").await.unwrap();

    let TurnOutcome::Replied(reply) = outcome else {
        panic!("expected a reply");
    };
    assert_eq!(reply.reply, "Sorry, I can only chat today.");
    assert!(reply.new_words.is_empty());
    assert_eq!(session.level(), Level::Beginner);
    assert_eq!(session.accuracy(), 100.0);

    let stored = messages::get_messages(&ledger, session.session_id()).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content, "Sorry, I can only chat today.");
}

#[tokio::test]
async fn test_level_update_follows_provider() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying([
        clean_turn("Good.", &[]),
        record_json("Very good.", None, &[], &[], "intermediate"),
        record_json("Hmm.", None, &[], &[], "expert"),
    ]);
    let session = TutorSession::start(ledger.clone(), gateway, Level::Beginner).await.unwrap();

    session.submit("one").await.unwrap();
    assert_eq!(session.level(), Level::Beginner);

    session.submit("two").await.unwrap();
    assert_eq!(session.level(), Level::Intermediate);

    session.submit("three").await.unwrap();
    assert_eq!(session.level(), Level::Intermediate, "unknown levels keep the current one");

    let stored = english_tutor::db::operations::sessions::get_session(&ledger, session.session_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.level, Level::Intermediate);
}

#[tokio::test]
async fn test_second_submit_while_awaiting_is_busy() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = GatedGateway::new(clean_turn("Finally.", &[]));
    let session = Arc::new(
        TutorSession::start(ledger.clone(), gateway.clone(), Level::Beginner)
            .await
            .unwrap(),
    );

    let first = session.spawn_submit("first");
    while gateway.calls.load(Ordering::SeqCst) == 0 {
        tokio::task::yield_now().await;
    }
    assert!(session.is_awaiting_response());

    let second = session.submit("second").await.unwrap();
    assert_eq!(second, TurnOutcome::Busy);

    gateway.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert!(matches!(first, TurnOutcome::Replied(_)));
    assert!(!session.is_awaiting_response());
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 1);

    let stored = messages::get_messages(&ledger, session.session_id()).await.unwrap();
    assert_eq!(
        stored.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
        vec!["first", "Finally."]
    );
}

#[tokio::test]
async fn test_manual_goal_edits_publish_events() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying(Vec::<String>::new());
    let session = TutorSession::start(ledger.clone(), gateway, Level::Beginner).await.unwrap();
    let mut events = session.subscribe();

    assert!(session.add_goal("  Phrasal verbs ").await.unwrap());
    assert!(!session.add_goal("   ").await.unwrap());
    assert!(session.add_goal("Articles").await.unwrap());
    assert!(session.delete_goal("Phrasal verbs").await.unwrap());
    assert!(!session.delete_goal("Missing").await.unwrap());

    assert_eq!(session.goals(), vec!["Articles"]);
    assert_eq!(goals::get_goals(&ledger, session.session_id()).await.unwrap(), vec!["Articles"]);

    let mut published = Vec::new();
    while let Ok(envelope) = events.try_recv() {
        if let TutorEvent::GoalsChanged { goals, .. } = envelope.event {
            published.push(goals);
        }
    }
    assert_eq!(
        published,
        vec![
            vec!["Phrasal verbs".to_string()],
            vec!["Phrasal verbs".to_string(), "Articles".to_string()],
            vec!["Articles".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_reply_ready_event_carries_record() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying([record_json("Hi!", None, &["hello"], &[], "beginner")]);
    let session = TutorSession::start(ledger, gateway, Level::Beginner).await.unwrap();
    let mut events = session.subscribe();

    session.submit("Hello").await.unwrap();

    let envelope = events.try_recv().unwrap();
    assert_eq!(envelope.event.event_type(), "REPLY_READY");
    match envelope.event {
        TutorEvent::ReplyReady { reply, .. } => {
            assert_eq!(reply.reply, "Hi!");
            assert_eq!(reply.new_words, vec!["hello"]);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_gateway_receives_full_history() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let gateway = ScriptedGateway::replying([clean_turn("First reply", &[]), clean_turn("Second reply", &[])]);
    let session = TutorSession::start(ledger, gateway.clone(), Level::Beginner).await.unwrap();

    session.submit("first").await.unwrap();
    session.submit("second").await.unwrap();

    let history = gateway.last_history().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].role, Role::User);
    assert_eq!(history[0].content, "first");
    assert_eq!(history[1].role, Role::Assistant);
    assert_eq!(history[1].content, "First reply");
    assert_eq!(history[2].content, "second");
}

#[tokio::test]
async fn test_shutdown_flushes_stats() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tutor.db");
    let ledger = english_tutor::Ledger::open(&db_path).await.unwrap();
    let gateway = ScriptedGateway::new(vec![Err(GatewayError::EmptyContent)]);
    let session = TutorSession::start(ledger, gateway, Level::Beginner).await.unwrap();
    let session_id = session.session_id();

    session.submit("a failed turn still counts").await.unwrap();
    session.shutdown().await.unwrap();

    let ledger = english_tutor::Ledger::open(&db_path).await.unwrap();
    let row = stats::get_stats(&ledger, session_id).await.unwrap().unwrap();
    assert_eq!(row.accuracy_pct, 100.0);
    assert_eq!(row.corrections_count, 0);
}

#[tokio::test]
async fn test_cumulative_reports_all_sessions() {
    let (_dir, ledger) = common::open_test_ledger().await;
    let first = TutorSession::start(
        ledger.clone(),
        ScriptedGateway::replying([record_json("Hm.", Some("fix"), &["a"], &[], "beginner")]),
        Level::Beginner,
    )
    .await
    .unwrap();
    first.submit("x").await.unwrap();

    let second = TutorSession::start(
        ledger.clone(),
        ScriptedGateway::replying([clean_turn("Ok.", &["b", "c"])]),
        Level::Beginner,
    )
    .await
    .unwrap();
    second.submit("y").await.unwrap();

    let totals = second.cumulative().await.unwrap();
    assert_eq!(totals.total_sessions, 2);
    assert_eq!(totals.total_words, 3);
    assert_eq!(totals.total_corrections, 1);
    assert_eq!(totals.avg_accuracy, 50.0);
}
