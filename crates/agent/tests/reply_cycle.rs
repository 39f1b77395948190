mod support;

use std::sync::Arc;

use serde_json::json;

use parley_agent::llm::TranscriptEntry;
use parley_agent::runtime::{APOLOGY_REPLY, GENERIC_FALLBACK_REPLY};
use parley_agent::{ProviderRegistry, RuntimeError};
use parley_core::config::ProviderFamily;
use parley_core::domain::agent::AgentId;
use parley_core::domain::conversation::{ConversationStatus, Message, MessageRole};
use parley_db::fixtures::{sample_agent, sample_conversation, sample_workspace};
use parley_db::repositories::{AgentRepository, ContactRepository, ConversationRepository};

use support::{tool_call, Harness, ScriptedProvider};

fn gemini_only(provider: &Arc<ScriptedProvider>) -> ProviderRegistry {
    ProviderRegistry::default().with_chat(ProviderFamily::Gemini, provider.clone())
}

#[tokio::test]
async fn reply_is_stored_with_metadata_and_billed_once() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_text("¡Hola! ¿En qué te puedo ayudar?", 250);
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;
    harness.receive(&conversation, "Hola").await;

    let outcome = harness
        .runtime
        .generate_reply(&sample_agent().id, &conversation.id, "Hola")
        .await
        .expect("reply");

    assert_eq!(outcome.reply, "¡Hola! ¿En qué te puedo ayudar?");
    assert_eq!(outcome.tokens_used, 250);
    assert_eq!(outcome.credits_used, 3);
    assert_eq!(harness.usage.balance(&sample_workspace().id).await, Some(997));
    assert_eq!(harness.usage.records().await.len(), 1);

    let requests = gemini.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].model, "gemini-1.5-flash");
    assert!(requests[0].system.contains("You are Lia"));
    assert_eq!(requests[0].tools, vec!["update_contact", "escalate_to_human"]);
    assert_eq!(requests[0].transcript, vec![TranscriptEntry::User("Hola".into())]);

    let messages = harness.messages(&conversation).await;
    let last = messages.last().expect("agent message");
    assert_eq!(last.role, MessageRole::Agent);
    assert_eq!(last.metadata.as_ref().map(|metadata| metadata.tokens), Some(250));
}

#[tokio::test]
async fn visitor_name_is_captured_through_update_contact() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_tools(None, vec![tool_call("call-1", "update_contact", json!({ "name": "Omar" }))], 120);
    gemini.push_text("Mucho gusto, Omar.", 80);
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;
    harness
        .conversations
        .append_message(Message::new(conversation.id.clone(), MessageRole::Agent, "¿Cómo te llamas?", None))
        .await
        .expect("agent question");
    harness.receive(&conversation, "Soy Omar").await;

    let outcome = harness
        .runtime
        .generate_reply(&sample_agent().id, &conversation.id, "Soy Omar")
        .await
        .expect("reply");

    assert_eq!(outcome.reply, "Mucho gusto, Omar.");
    assert_eq!(outcome.tokens_used, 200);
    assert_eq!(outcome.credits_used, 2);

    let stored = harness
        .conversations
        .find_conversation(&conversation.id)
        .await
        .expect("find")
        .expect("exists");
    let contact_id = stored.contact_id.expect("contact linked");
    let contact = harness.contacts.find_contact(&contact_id).await.expect("find").expect("saved");
    assert_eq!(contact.name.as_deref(), Some("Omar"));

    let requests = gemini.requests();
    assert_eq!(requests.len(), 2);
    match requests[1].transcript.last() {
        Some(TranscriptEntry::Tool { call_id, result_json, .. }) => {
            assert_eq!(call_id, "call-1");
            assert!(result_json.contains("\"success\":true"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }
}

#[tokio::test]
async fn disabled_transfer_hides_and_refuses_escalation() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_tools(
        None,
        vec![tool_call("call-1", "escalate_to_human", json!({ "reason": "wants a person" }))],
        50,
    );
    gemini.push_text("Puedo ayudarte yo mismo.", 50);
    let mut agent = sample_agent();
    agent.flags.transfer_to_human = false;
    let conversation = sample_conversation();
    let harness = Harness::start(agent.clone(), conversation.clone(), gemini_only(&gemini)).await;
    harness.receive(&conversation, "Quiero hablar con alguien").await;

    let outcome = harness
        .runtime
        .generate_reply(&agent.id, &conversation.id, "Quiero hablar con alguien")
        .await
        .expect("reply");

    assert_eq!(outcome.reply, "Puedo ayudarte yo mismo.");
    let requests = gemini.requests();
    assert_eq!(requests[0].tools, vec!["update_contact"]);
    match requests[1].transcript.last() {
        Some(TranscriptEntry::Tool { result_json, .. }) => {
            assert!(result_json.contains("\"success\":false"));
        }
        other => panic!("expected tool result, got {other:?}"),
    }
    let stored = harness.conversations.find_conversation(&conversation.id).await.expect("find");
    assert_eq!(stored.map(|conversation| conversation.status), Some(ConversationStatus::Active));
}

#[tokio::test]
async fn tool_loop_stops_after_three_round_trips_with_last_content() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    for index in 0..4 {
        gemini.push_tools(
            Some("Déjame revisarlo."),
            vec![tool_call(&format!("call-{index}"), "lookup_inventory", json!({}))],
            10,
        );
    }
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;

    let outcome = harness
        .runtime
        .generate_reply(&sample_agent().id, &conversation.id, "¿Tienen cepillos?")
        .await
        .expect("reply");

    assert_eq!(gemini.requests().len(), 3);
    assert_eq!(outcome.reply, "Déjame revisarlo.");
    assert_eq!(outcome.tokens_used, 30);
    assert_eq!(outcome.credits_used, 1);
}

#[tokio::test]
async fn tool_loop_cap_without_text_uses_generic_reply() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    for index in 0..3 {
        gemini.push_tools(
            None,
            vec![tool_call(&format!("call-{index}"), "update_contact", json!({ "shoeSize": 42 }))],
            0,
        );
    }
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;

    let outcome = harness
        .runtime
        .generate_reply(&sample_agent().id, &conversation.id, "hola")
        .await
        .expect("reply");

    assert_eq!(outcome.reply, GENERIC_FALLBACK_REPLY);
    assert_eq!(outcome.credits_used, 0);
}

#[tokio::test]
async fn exhausted_fallback_chain_answers_with_apology() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    let openai = ScriptedProvider::new(ProviderFamily::OpenAi);
    let registry = gemini_only(&gemini).with_chat(ProviderFamily::OpenAi, openai.clone());
    let mut agent = sample_agent();
    agent.flags.smart_retrieval = false;
    let conversation = sample_conversation();
    let harness = Harness::start(agent.clone(), conversation.clone(), registry).await;

    let outcome = harness
        .runtime
        .generate_reply(&agent.id, &conversation.id, "hola")
        .await
        .expect("degraded reply, not an error");

    assert_eq!(outcome.reply, APOLOGY_REPLY);
    assert_eq!(outcome.tokens_used, 0);
    assert_eq!(outcome.credits_used, 0);
    assert_eq!(
        gemini.models(),
        vec!["gemini-1.5-flash", "gemini-1.5-flash-001", "gemini-1.5-flash-latest"]
    );
    assert_eq!(openai.models(), vec!["gpt-4o-mini"]);
    assert_eq!(harness.usage.records().await.len(), 1);
}

#[tokio::test]
async fn bound_model_failing_mid_loop_is_not_retried_elsewhere() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_tools(None, vec![tool_call("call-1", "update_contact", json!({ "name": "Ana" }))], 90);
    let openai = ScriptedProvider::new(ProviderFamily::OpenAi);
    openai.push_text("should never be used", 10);
    let registry = gemini_only(&gemini).with_chat(ProviderFamily::OpenAi, openai.clone());
    let mut agent = sample_agent();
    agent.flags.smart_retrieval = false;
    let conversation = sample_conversation();
    let harness = Harness::start(agent.clone(), conversation.clone(), registry).await;

    let outcome = harness
        .runtime
        .generate_reply(&agent.id, &conversation.id, "Soy Ana")
        .await
        .expect("reply");

    assert_eq!(outcome.reply, APOLOGY_REPLY);
    assert_eq!(outcome.tokens_used, 90);
    assert_eq!(outcome.credits_used, 1);
    assert_eq!(gemini.models(), vec!["gemini-1.5-flash", "gemini-1.5-flash"]);
    assert!(openai.requests().is_empty());
}

#[tokio::test]
async fn pending_conversation_gets_no_automated_reply() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_text("should never be used", 10);
    let mut conversation = sample_conversation();
    conversation.status = ConversationStatus::Pending;
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;
    harness.receive(&conversation, "¿Sigue ahí alguien?").await;

    let outcome = harness
        .runtime
        .generate_reply(&sample_agent().id, &conversation.id, "¿Sigue ahí alguien?")
        .await
        .expect("reply");

    assert_eq!(outcome.reply, "");
    assert_eq!(outcome.tokens_used, 0);
    assert!(gemini.requests().is_empty());
    assert!(harness.usage.records().await.is_empty());
    assert_eq!(harness.messages(&conversation).await.len(), 1);
}

#[tokio::test]
async fn missing_primary_credentials_name_the_setting() {
    let openai = ScriptedProvider::new(ProviderFamily::OpenAi);
    let registry = ProviderRegistry::default().with_chat(ProviderFamily::OpenAi, openai.clone());
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), registry).await;

    let outcome = harness
        .runtime
        .generate_reply(&sample_agent().id, &conversation.id, "hola")
        .await
        .expect("reply");

    assert!(outcome.reply.contains("llm.gemini_api_key"), "{}", outcome.reply);
    assert_eq!(outcome.credits_used, 0);
    assert!(openai.requests().is_empty());
}

#[tokio::test]
async fn closed_conversation_reopens_on_new_message() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_text("¡Bienvenido de nuevo!", 40);
    let mut conversation = sample_conversation();
    conversation.status = ConversationStatus::Closed;
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;

    let outcome = harness
        .runtime
        .generate_reply(&sample_agent().id, &conversation.id, "Hola otra vez")
        .await
        .expect("reply");

    assert_eq!(outcome.reply, "¡Bienvenido de nuevo!");
    let stored = harness.conversations.find_conversation(&conversation.id).await.expect("find");
    assert_eq!(stored.map(|conversation| conversation.status), Some(ConversationStatus::Active));
}

#[tokio::test]
async fn long_replies_are_split_with_metadata_on_the_last_chunk() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_text("Abrimos de lunes a viernes.\n\nEl sábado atendemos hasta las 14:00.", 60);
    let mut agent = sample_agent();
    agent.flags.split_long_messages = true;
    let conversation = sample_conversation();
    let harness = Harness::start(agent.clone(), conversation.clone(), gemini_only(&gemini)).await;

    let outcome = harness
        .runtime
        .generate_reply(&agent.id, &conversation.id, "¿Qué horario tienen?")
        .await
        .expect("reply");

    assert!(outcome.reply.contains("\n\n"));
    let agent_messages: Vec<Message> = harness
        .messages(&conversation)
        .await
        .into_iter()
        .filter(|message| message.role == MessageRole::Agent)
        .collect();
    assert_eq!(agent_messages.len(), 2);
    assert!(agent_messages[0].metadata.is_none());
    assert_eq!(agent_messages[1].metadata.as_ref().map(|metadata| metadata.tokens), Some(60));
}

#[tokio::test]
async fn concurrent_messages_are_stored_and_answered_in_turn() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_text("primera", 100);
    gemini.push_text("segunda", 100);
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;
    let agent_id = sample_agent().id;

    let (uno, dos) = tokio::join!(
        harness.runtime.receive_and_reply(&agent_id, &conversation.id, "uno"),
        harness.runtime.receive_and_reply(&agent_id, &conversation.id, "dos"),
    );
    let (uno, dos) = (uno.expect("uno").reply, dos.expect("dos").reply);

    let requests = gemini.requests();
    assert_eq!(requests.len(), 2);
    let first = match requests[0].transcript.as_slice() {
        [TranscriptEntry::User(text)] => text.clone(),
        other => panic!("first cycle should only see its own message, got {other:?}"),
    };
    let second = if first == "uno" { "dos" } else { "uno" };
    assert_eq!(
        requests[1].transcript,
        vec![
            TranscriptEntry::User(first.clone()),
            TranscriptEntry::assistant_text("primera"),
            TranscriptEntry::User(second.to_string()),
        ]
    );
    let (first_reply, second_reply) = if first == "uno" { (uno, dos) } else { (dos, uno) };
    assert_eq!(first_reply, "primera");
    assert_eq!(second_reply, "segunda");

    let stored: Vec<(MessageRole, String)> = harness
        .messages(&conversation)
        .await
        .into_iter()
        .map(|message| (message.role, message.content))
        .collect();
    assert_eq!(
        stored,
        vec![
            (MessageRole::User, first),
            (MessageRole::Agent, "primera".to_string()),
            (MessageRole::User, second.to_string()),
            (MessageRole::Agent, "segunda".to_string()),
        ]
    );
    assert_eq!(harness.usage.balance(&sample_workspace().id).await, Some(998));
}

#[tokio::test]
async fn message_for_another_agents_conversation_is_not_stored() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    gemini.push_text("no debería responder", 100);
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;
    let mut other = sample_agent();
    other.id = AgentId("agent-other".into());
    harness.agents.save_agent(other.clone()).await.expect("other agent");

    let error = harness
        .runtime
        .receive_and_reply(&other.id, &conversation.id, "hola")
        .await
        .expect_err("conversation belongs to another agent");

    assert!(matches!(error, RuntimeError::ConversationNotFound(id) if id == conversation.id.0));
    assert!(harness.messages(&conversation).await.is_empty());
    assert!(gemini.requests().is_empty());
}

#[tokio::test]
async fn unknown_agent_is_an_error() {
    let gemini = ScriptedProvider::new(ProviderFamily::Gemini);
    let conversation = sample_conversation();
    let harness = Harness::start(sample_agent(), conversation.clone(), gemini_only(&gemini)).await;

    let error = harness
        .runtime
        .generate_reply(&AgentId("agent-missing".into()), &conversation.id, "hola")
        .await
        .expect_err("unknown agent");

    assert!(matches!(error, RuntimeError::AgentNotFound(id) if id == "agent-missing"));
}
