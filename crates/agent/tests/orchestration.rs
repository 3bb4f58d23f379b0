//! End-to-end tests of the orchestrator: bootstrap, the tool loop, dispatch,
//! side channels, the event queue and persistence.

mod common;

use common::*;
use companion_agent::{SideChannelError, SubAgentSpec};
use companion_core::{
    ChatMessage, Error, KeyValueStore, MessagePart, ProviderError, ProviderResponse, ToolSet,
    WireMessage,
};
use companion_store::InMemoryStore;
use serde_json::json;
use std::sync::Arc;

// --- Bootstrap ---

#[tokio::test]
async fn first_start_plans_and_installs_the_plan() {
    let provider = ScriptedProvider::new(vec![ProviderResponse::text("Focus on sleep")]);
    let store = empty_store();
    let orchestrator = builder(store.clone()).build();

    orchestrator.init(provider.clone()).await.unwrap();

    assert!(orchestrator.is_initialized());
    assert_eq!(orchestrator.current_plan().as_deref(), Some("Focus on sleep"));
    assert_eq!(
        store.get("main_plan").await.unwrap().as_deref(),
        Some("Focus on sleep")
    );

    let system = orchestrator.root().context().system();
    assert_eq!(system.len(), 1);
    let system = system[0].text();
    assert!(system.starts_with(ROOT_PROMPT));
    assert!(system.contains("Focus on sleep"));

    // the planner's turn is discarded but traced
    assert_eq!(orchestrator.planner().context().conversation_len(), 0);
    assert_eq!(orchestrator.workflow_log().by_name("planner").len(), 1);

    // idempotent
    orchestrator.init(provider.clone()).await.unwrap();
    assert_eq!(provider.call_count(), 1);
}

#[tokio::test]
async fn stored_plan_with_no_conversation_skips_planning() {
    let provider = ScriptedProvider::new(vec![]);
    let orchestrator = builder(planned_store("Yesterday's plan")).build();

    orchestrator.init(provider.clone()).await.unwrap();

    assert_eq!(provider.call_count(), 0);
    assert!(orchestrator.root().context().system()[0]
        .text()
        .contains("Yesterday's plan"));
}

#[tokio::test]
async fn resumed_conversation_is_kept_and_replanned() {
    let previous = vec![ChatMessage::user("hi"), ChatMessage::assistant_text("hello")];
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::with_slots([
        ("main_plan".to_string(), "old plan".to_string()),
        (
            "main_conversation".to_string(),
            serde_json::to_string(&previous).unwrap(),
        ),
        ("phase".to_string(), "foundation".to_string()),
    ]));
    let provider = ScriptedProvider::new(vec![ProviderResponse::text("new plan")]);
    let orchestrator = builder(store.clone()).build();

    orchestrator.init(provider.clone()).await.unwrap();

    assert_eq!(orchestrator.current_plan().as_deref(), Some("new plan"));
    assert_eq!(orchestrator.root().context().conversation_len(), 2);

    let planning = provider.requests()[0].messages[1].content().unwrap().to_string();
    assert!(planning.contains("## Current phase\nfoundation"));
    assert!(planning.contains("## Last plan\nold plan"));
    assert!(planning.contains("user: hi"));
    assert!(planning.contains("assistant: hello"));
}

#[tokio::test]
async fn failed_bootstrap_can_be_retried() {
    let provider = ScriptedProvider::new(vec![]);
    provider.push_error(ProviderError::AuthenticationFailed("bad key".into()));
    let orchestrator = builder(empty_store()).build();

    let err = orchestrator.init(provider.clone()).await.unwrap_err();
    assert!(matches!(err, Error::Provider(_)));
    assert!(!orchestrator.is_initialized());
    assert!(matches!(
        orchestrator.act(ChatMessage::user("hi")).await,
        Err(Error::NotInitialized)
    ));

    provider.push(ProviderResponse::text("plan"));
    orchestrator.init(provider.clone()).await.unwrap();
    assert!(orchestrator.is_initialized());
}

// --- Tool loop ---

#[tokio::test]
async fn tool_loop_collects_every_part_in_order() {
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::tool_calls(vec![tool_call("c1", "echo", json!({"text": "ping"}))])
            .with_reasoning("I should echo")
            .with_usage(10, 5),
        ProviderResponse::text("All done").with_usage(20, 7),
    ]);
    let orchestrator = builder(planned_store("plan"))
        .with_domain_tools(ToolSet::empty().with(Arc::new(Echo)))
        .build();
    orchestrator.init(provider.clone()).await.unwrap();

    let reply = orchestrator.act(ChatMessage::user("go")).await.unwrap();

    let content = reply.content();
    assert_eq!(content.len(), 3);
    assert_eq!(content[0], MessagePart::thinking("I should echo"));
    let call = content[1].as_tool().unwrap();
    assert_eq!(call.tool, "echo");
    assert_eq!(call.tool_output.as_deref(), Some("ping"));
    assert_eq!(content[2], MessagePart::text("All done"));

    let usage = reply.usage().unwrap();
    assert_eq!(usage.input_tokens, 30);
    assert_eq!(usage.output_tokens, 12);

    assert!(orchestrator.root().context().in_progress().is_none());
    assert_eq!(orchestrator.root().context().conversation_len(), 2);
}

#[tokio::test]
async fn unknown_tool_is_reported_and_the_loop_continues() {
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::tool_calls(vec![tool_call("c1", "teleport", json!({}))]),
        ProviderResponse::text("Sorry, I can't do that"),
    ]);
    let orchestrator = builder(planned_store("plan")).build();
    orchestrator.init(provider.clone()).await.unwrap();

    let reply = orchestrator.act(ChatMessage::user("beam me up")).await.unwrap();

    let call = reply.tool_parts().next().unwrap();
    assert!(call.tool_output.as_deref().unwrap().contains("not found"));
    assert_eq!(reply.text(), "Sorry, I can't do that");
    assert_eq!(provider.call_count(), 2);
}

#[tokio::test]
async fn throwing_tool_becomes_its_output() {
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::tool_calls(vec![tool_call("c1", "search", json!({"query": "x"}))]),
        ProviderResponse::text("Search is broken"),
    ]);
    let orchestrator = builder(planned_store("plan"))
        .with_domain_tools(ToolSet::empty().with(Arc::new(BrokenSearch)))
        .build();
    orchestrator.init(provider.clone()).await.unwrap();

    let reply = orchestrator.act(ChatMessage::user("find x")).await.unwrap();

    let call = reply.tool_parts().next().unwrap();
    assert_eq!(call.tool_input, r#"{"query":"x"}"#);
    assert_eq!(call.tool_output.as_deref(), Some("Tool search error: boom"));

    let second = &provider.requests()[1].messages;
    let tool_results: Vec<_> = second
        .iter()
        .filter(|m| matches!(m, WireMessage::Tool { .. }))
        .collect();
    assert_eq!(tool_results.len(), 1);
    assert_eq!(tool_results[0].content(), Some("Tool search error: boom"));
}

#[tokio::test]
async fn in_progress_is_cleared_when_the_model_fails() {
    let provider = ScriptedProvider::new(vec![]);
    let orchestrator = builder(planned_store("plan")).build();
    orchestrator.init(provider.clone()).await.unwrap();

    provider.push_error(ProviderError::Network("connection reset".into()));
    let err = orchestrator.act(ChatMessage::user("hello")).await.unwrap_err();

    assert!(matches!(err, Error::Provider(ProviderError::Network(_))));
    let context = orchestrator.root().context();
    assert!(context.in_progress().is_none());
    // the input survives the failed turn
    assert_eq!(context.conversation_len(), 1);
}

// --- Sub-agent dispatch ---

#[tokio::test]
async fn sub_agent_never_sees_a_previous_dispatch() {
    let store: Arc<dyn KeyValueStore> = Arc::new(InMemoryStore::with_slots([
        ("main_plan", "plan"),
        ("coach_memory", "Prefers mornings"),
    ]));
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::tool_calls(vec![tool_call(
            "c1",
            "call_sub_agent",
            json!({"name": "coach", "prompt": "one"}),
        )]),
        ProviderResponse::text("first answer"),
        ProviderResponse::tool_calls(vec![tool_call(
            "c2",
            "call_sub_agent",
            json!({"name": "coach", "prompt": "two"}),
        )]),
        ProviderResponse::text("second answer"),
        ProviderResponse::text("Both done"),
    ]);
    let orchestrator = builder(store)
        .with_sub_agent(
            SubAgentSpec::new("coach", "Habit coaching", "You are a coach.")
                .with_memory_key("coach_memory"),
        )
        .build();
    orchestrator.init(provider.clone()).await.unwrap();

    let reply = orchestrator.act(ChatMessage::user("coach me")).await.unwrap();

    let outputs: Vec<_> = reply
        .tool_parts()
        .map(|p| p.tool_output.clone().unwrap())
        .collect();
    assert_eq!(outputs, vec!["first answer", "second answer"]);

    let requests = provider.requests();
    let second_dispatch = &requests[3].messages;
    assert_eq!(second_dispatch.len(), 2);
    assert_eq!(second_dispatch[1].content(), Some("two"));
    let coach_system = second_dispatch[0].content().unwrap();
    assert!(coach_system.starts_with("You are a coach."));
    assert!(coach_system.ends_with("Prefers mornings"));

    let coach = orchestrator.sub_agent("coach").unwrap();
    assert_eq!(coach.context().conversation_len(), 2);
}

#[tokio::test]
async fn dispatch_tool_is_only_offered_with_sub_agents() {
    let provider = ScriptedProvider::new(vec![ProviderResponse::text("hi")]);
    let orchestrator = builder(planned_store("plan")).build();
    orchestrator.init(provider.clone()).await.unwrap();
    orchestrator.act(ChatMessage::user("hi")).await.unwrap();

    let names: Vec<_> = provider.requests()[0]
        .tools
        .iter()
        .map(|t| t.name.clone())
        .collect();
    assert_eq!(names, vec!["set_mood", "ask_user", "interview_user"]);
}

// --- Side channels ---

#[tokio::test]
async fn second_prompt_supersedes_the_first() {
    let orchestrator = builder(empty_store()).build();
    let prompt = orchestrator.prompt();

    let first = prompt.start("first?");
    let second = prompt.start("second?");

    assert_eq!(first.await, Err(SideChannelError::Superseded));
    assert!(prompt.is_open());
    assert!(prompt.submit("answer"));
    assert_eq!(second.await, Ok("answer".to_string()));
    assert!(!prompt.is_open());
}

#[tokio::test]
async fn ask_user_blocks_until_the_human_answers() {
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::tool_calls(vec![tool_call(
            "c1",
            "ask_user",
            json!({"question": "How did you sleep?"}),
        )]),
        ProviderResponse::text("Glad to hear it"),
    ]);
    let orchestrator = Arc::new(builder(planned_store("plan")).build());
    orchestrator.init(provider.clone()).await.unwrap();

    let turn = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.act(ChatMessage::user("morning")).await }
    });

    let mut state = orchestrator.prompt().subscribe();
    state.wait_for(|s| s.is_open).await.unwrap();
    assert_eq!(
        state.borrow().message.as_deref(),
        Some("How did you sleep?")
    );
    orchestrator.prompt().submit("Really well");

    let reply = turn.await.unwrap().unwrap();
    let call = reply.tool_parts().next().unwrap();
    assert_eq!(call.tool_output.as_deref(), Some("Really well"));
    assert_eq!(reply.text(), "Glad to hear it");
}

#[tokio::test]
async fn cancelled_prompt_is_a_failed_tool_call_not_a_failed_turn() {
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::tool_calls(vec![tool_call("c1", "ask_user", json!({"question": "?"}))]),
        ProviderResponse::text("Okay, never mind"),
    ]);
    let orchestrator = Arc::new(builder(planned_store("plan")).build());
    orchestrator.init(provider.clone()).await.unwrap();

    let turn = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.act(ChatMessage::user("hey")).await }
    });

    orchestrator
        .prompt()
        .subscribe()
        .wait_for(|s| s.is_open)
        .await
        .unwrap();
    orchestrator.prompt().cancel();

    let reply = turn.await.unwrap().unwrap();
    let call = reply.tool_parts().next().unwrap();
    assert_eq!(
        call.tool_output.as_deref(),
        Some("Tool ask_user error: cancelled by user")
    );
}

#[tokio::test]
async fn interview_runs_a_nested_conversation() {
    let provider = RoutedProvider::new();
    provider.route(
        ROOT_PROMPT,
        vec![
            ProviderResponse::tool_calls(vec![tool_call(
                "r1",
                "interview_user",
                json!({"prompt": "What are your goals?"}),
            )]),
            ProviderResponse::text("Noted your goal"),
        ],
    );
    provider.route(
        INTERVIEW_PROMPT,
        vec![
            ProviderResponse::text("What is one goal for this month?"),
            ProviderResponse::tool_calls(vec![tool_call(
                "i1",
                "done",
                json!({"summary": "Wants to run 5k"}),
            )]),
            ProviderResponse::text("Thanks, that's all."),
        ],
    );

    let orchestrator = Arc::new(builder(planned_store("plan")).build());
    orchestrator.init(provider.clone()).await.unwrap();

    let turn = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move { orchestrator.act(ChatMessage::user("let's set goals")).await }
    });

    let interview = orchestrator.interview().clone();
    interview
        .subscribe_replies()
        .wait_for(|r| r.is_some())
        .await
        .unwrap();
    assert!(interview.channel().is_open());
    interview.respond("Run a 5k").await.unwrap();

    let reply = turn.await.unwrap().unwrap();
    let call = reply.tool_parts().next().unwrap();
    assert_eq!(call.tool, "interview_user");
    assert_eq!(call.tool_output.as_deref(), Some("Wants to run 5k"));
    assert_eq!(reply.text(), "Noted your goal");

    // the nested agent was seeded with the prompt and never touched the root
    let nested = provider.requests_for(INTERVIEW_PROMPT);
    assert_eq!(nested[0].messages[1].content(), Some("What are your goals?"));
    assert_eq!(orchestrator.root().context().conversation_len(), 2);
    assert!(interview.session().is_none());
}

// --- Event queue ---

#[tokio::test]
async fn events_are_drained_exactly_once() {
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::text("ack 1"),
        ProviderResponse::text("ack 2"),
    ]);
    let orchestrator = builder(planned_store("plan")).build();
    orchestrator.init(provider.clone()).await.unwrap();

    orchestrator.push_event("Ritual missed: meditation");
    orchestrator.push_event("Challenge completed: cold shower");
    let first = orchestrator.act_events().await.unwrap();
    assert!(first.is_some());
    assert!(orchestrator.pending_events().is_empty());

    orchestrator.push_event("Rule broken: no phone in bed");
    orchestrator.act_events().await.unwrap();

    assert_eq!(orchestrator.act_events().await.unwrap().map(|m| m.text()), None);
    assert_eq!(provider.call_count(), 2);

    let requests = provider.requests();
    assert_eq!(
        requests[0].messages.last().unwrap().content(),
        Some("Ritual missed: meditation\nChallenge completed: cold shower")
    );
    let second = &requests[1].messages;
    assert_eq!(
        second.last().unwrap().content(),
        Some("Rule broken: no phone in bed")
    );
    // events reach the model as user input but stay distinct in the context
    assert_eq!(second.last().unwrap().role(), "user");
    let conversation = orchestrator.root().context().conversation();
    assert_eq!(conversation[0].kind(), "event");
    assert_eq!(conversation[2].kind(), "event");
}

#[tokio::test]
async fn events_wait_for_initialization() {
    let orchestrator = builder(empty_store()).build();
    orchestrator.push_event("early");

    assert!(matches!(
        orchestrator.act_events().await,
        Err(Error::NotInitialized)
    ));
    assert_eq!(orchestrator.pending_events(), vec!["early"]);
}

// --- Persistence ---

#[tokio::test]
async fn root_conversation_is_persisted_and_restored() {
    let store: Arc<dyn KeyValueStore> =
        Arc::new(InMemoryStore::with_slots([("main_plan", "plan")]));

    let provider = ScriptedProvider::new(vec![ProviderResponse::text("Hello again")]);
    let first = builder(store.clone()).build();
    first.init(provider.clone()).await.unwrap();
    first.act(ChatMessage::user("Hi")).await.unwrap();
    first.shutdown().await;

    // a non-empty conversation makes the next start re-plan
    let provider = ScriptedProvider::new(vec![ProviderResponse::text("Follow up on hello")]);
    let second = builder(store.clone()).build();
    second.init(provider.clone()).await.unwrap();

    let conversation = second.root().context().conversation();
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation[0].text(), "Hi");
    assert_eq!(conversation[1].text(), "Hello again");
    assert_eq!(second.current_plan().as_deref(), Some("Follow up on hello"));
}

#[tokio::test]
async fn set_mood_feeds_the_next_plan() {
    let store = empty_store();
    let provider = ScriptedProvider::new(vec![
        ProviderResponse::text("plan one"),
        ProviderResponse::tool_calls(vec![tool_call("c1", "set_mood", json!({"mood": "anxious"}))]),
        ProviderResponse::text("I hear you"),
    ]);
    let orchestrator = builder(store.clone()).build();
    orchestrator.init(provider.clone()).await.unwrap();
    orchestrator.act(ChatMessage::user("I'm anxious")).await.unwrap();

    assert_eq!(store.get("mood").await.unwrap().as_deref(), Some("anxious"));

    provider.push(ProviderResponse::text("plan two"));
    orchestrator.run_planner(None, &[]).await.unwrap();
    let planning = provider.last_request().messages[1].content().unwrap().to_string();
    assert!(planning.contains("## Current mood\nanxious"));
}
