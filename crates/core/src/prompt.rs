//! Deterministic system-prompt assembly.
//!
//! The composer never reads the clock or the network: the caller passes the instant to render
//! and the already-ranked passages, so identical inputs always yield identical bytes.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::domain::agent::{AgentConfig, CustomFieldDefinition};

pub const UPDATE_CONTACT_TOOL: &str = "update_contact";
pub const ESCALATE_TOOL: &str = "escalate_to_human";

#[derive(Clone, Copy, Debug)]
pub struct PromptInput<'a> {
    pub agent: &'a AgentConfig,
    pub passages: &'a [String],
    pub now: DateTime<Utc>,
}

pub fn compose_system_prompt(input: &PromptInput<'_>) -> String {
    let mut prompt = String::with_capacity(4096);
    identity_block(&mut prompt, input);
    persona_block(&mut prompt, input.agent);
    behavior_block(&mut prompt, input.agent);
    knowledge_block(&mut prompt, input.passages);
    data_capture_block(&mut prompt, &input.agent.custom_fields);
    contact_capture_block(&mut prompt);
    if input.agent.flags.transfer_to_human {
        escalation_block(&mut prompt, input.agent);
    }
    prompt
}

/// Renders `now` in the agent's timezone, falling back to UTC for unknown zone names.
pub fn local_time_label(timezone: &str, now: DateTime<Utc>) -> String {
    match timezone.trim().parse::<Tz>() {
        Ok(zone) => {
            format!("{} ({})", now.with_timezone(&zone).format("%A %Y-%m-%d %H:%M"), zone.name())
        }
        Err(_) => format!("{} (UTC)", now.format("%A %Y-%m-%d %H:%M")),
    }
}

fn identity_block(out: &mut String, input: &PromptInput<'_>) {
    let agent = input.agent;
    let _ = writeln!(out, "## IDENTITY");
    let _ = writeln!(out, "You are {}, the assistant for {}.", agent.name, agent.company_name);
    let _ = writeln!(out, "Communication style: {}", agent.style.description());
    let _ = writeln!(out, "Current local time: {}", local_time_label(&agent.timezone, input.now));
    out.push('\n');
}

fn persona_block(out: &mut String, agent: &AgentConfig) {
    let _ = writeln!(out, "## PERSONA AND INSTRUCTIONS (HIGHEST PRIORITY)");
    let _ = writeln!(
        out,
        "Follow these instructions above every other section when they conflict:"
    );
    let _ = writeln!(out, "{}", agent.persona_prompt);
    out.push('\n');
}

fn behavior_block(out: &mut String, agent: &AgentConfig) {
    let flags = &agent.flags;
    let _ = writeln!(out, "## BEHAVIOR RULES");
    if flags.allow_emojis {
        let _ = writeln!(out, "- You may use emojis sparingly when they fit the tone.");
    } else {
        let _ = writeln!(out, "- Do not use emojis.");
    }
    if flags.sign_messages {
        let _ = writeln!(out, "- End every reply with the signature \"- {}\".", agent.name);
    } else {
        let _ = writeln!(out, "- Do not sign your replies.");
    }
    if flags.restrict_topics {
        let _ = writeln!(
            out,
            "- Only discuss topics related to {} and its offering. Politely decline anything else.",
            agent.company_name
        );
    } else {
        let _ = writeln!(
            out,
            "- Prefer topics related to {}, but you may answer brief general questions.",
            agent.company_name
        );
    }
    if flags.split_long_messages {
        let _ = writeln!(
            out,
            "- Separate distinct ideas with a blank line; each paragraph may be sent as its own message."
        );
    }
    if flags.transfer_to_human {
        let _ = writeln!(
            out,
            "- A human team is available. Offer a transfer when the visitor asks for a person or you cannot help."
        );
    } else {
        let _ = writeln!(
            out,
            "- No human transfer is available. Never promise to connect the visitor with a person."
        );
    }
    if let Some(calendar) = agent.calendar() {
        let _ = writeln!(
            out,
            "- You can check calendar availability and book meetings of {} minutes by default. Confirm date, time and attendee email before booking.",
            calendar.default_event_minutes
        );
    } else {
        let _ = writeln!(out, "- You cannot book meetings or check availability.");
    }
    out.push('\n');
}

fn knowledge_block(out: &mut String, passages: &[String]) {
    let _ = writeln!(out, "## KNOWLEDGE");
    if passages.is_empty() {
        let _ = writeln!(
            out,
            "No retrieved knowledge is available for this message. Rely only on the identity and instruction sections above, and say so when you do not know."
        );
        out.push('\n');
        return;
    }

    let _ = writeln!(
        out,
        "Answer factual questions using only the blocks below. Do not invent facts, prices, or policies beyond them; if the answer is not there, say you do not know."
    );
    for (index, passage) in passages.iter().enumerate() {
        let _ = writeln!(out, "[BLOCK {}]", index + 1);
        let _ = writeln!(out, "{}", passage.trim());
        let _ = writeln!(out, "[/BLOCK {}]", index + 1);
    }
    out.push('\n');
}

fn data_capture_block(out: &mut String, fields: &[CustomFieldDefinition]) {
    if fields.is_empty() {
        return;
    }
    let _ = writeln!(out, "## DATA TO CAPTURE");
    let _ = writeln!(
        out,
        "Collect the following fields naturally during the conversation and save each one with `{UPDATE_CONTACT_TOOL}` using the exact key shown."
    );
    for field in fields {
        let _ = write!(out, "- key `{}` ({}, {})", field.key, field.label, field.field_type.as_str());
        if let Some(description) = field.description.as_deref().filter(|d| !d.trim().is_empty()) {
            let _ = write!(out, ": {}", description.trim());
        }
        out.push('\n');
        if !field.options.is_empty() {
            let _ = writeln!(
                out,
                "  Allowed values: {}. Map free-text answers to the closest allowed value before saving.",
                field.options.join(" | ")
            );
        }
    }
    out.push('\n');
}

fn contact_capture_block(out: &mut String) {
    let _ = writeln!(out, "## CONTACT DETAILS");
    let _ = writeln!(
        out,
        "Whenever the visitor reveals their name, email or phone, call `{UPDATE_CONTACT_TOOL}` immediately with the keys `name`, `email` or `phone`. Do not wait for the end of the conversation."
    );
    let _ = writeln!(
        out,
        "Short replies count: if you asked for their name and they answer \"I'm Omar\" or \"Soy Omar\", save `name` = \"Omar\"."
    );
    out.push('\n');
}

fn escalation_block(out: &mut String, agent: &AgentConfig) {
    let _ = writeln!(out, "## HUMAN HANDOFF PROTOCOL");
    let _ = writeln!(
        out,
        "Before calling `{ESCALATE_TOOL}` you must know the visitor's name and at least one of email or phone. Ask for whatever is missing and save it with `{UPDATE_CONTACT_TOOL}` first."
    );
    let _ = writeln!(
        out,
        "Include a one-paragraph summary of the conversation in the `summary` argument."
    );
    if !agent.handoff_targets.is_empty() {
        let _ = writeln!(
            out,
            "Pick the best department and pass its id as `department_id`:"
        );
        for target in &agent.handoff_targets {
            let _ = write!(out, "- id `{}`: {}", target.id, target.name);
            if let Some(description) = target.description.as_deref().filter(|d| !d.trim().is_empty()) {
                let _ = write!(out, " ({})", description.trim());
            }
            out.push('\n');
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use crate::domain::agent::{
        AgentConfig, AgentId, BehaviorFlags, CalendarIntegration, CommunicationStyle,
        CustomFieldDefinition, FieldType, HandoffTarget, Integration, WorkspaceId,
    };

    use super::{compose_system_prompt, local_time_label, PromptInput};

    fn agent() -> AgentConfig {
        AgentConfig {
            id: AgentId("agent-1".to_owned()),
            workspace_id: WorkspaceId("ws-1".to_owned()),
            name: "Lia".to_owned(),
            company_name: "Acme Dental".to_owned(),
            persona_prompt: "Always greet patients warmly.".to_owned(),
            style: CommunicationStyle::Casual,
            model: "gemini-1.5-flash".to_owned(),
            temperature: 0.4,
            timezone: "America/Mexico_City".to_owned(),
            flags: BehaviorFlags {
                allow_emojis: false,
                sign_messages: true,
                restrict_topics: true,
                split_long_messages: false,
                transfer_to_human: true,
                smart_retrieval: true,
            },
            custom_fields: vec![CustomFieldDefinition {
                key: "insurance".to_owned(),
                label: "Insurance provider".to_owned(),
                description: Some("Who covers the treatment".to_owned()),
                field_type: FieldType::Select,
                options: vec!["None".to_owned(), "MetLife".to_owned(), "AXA".to_owned()],
            }],
            handoff_targets: vec![HandoffTarget {
                id: "front-desk".to_owned(),
                name: "Front desk".to_owned(),
                email: "desk@acme.test".to_owned(),
                description: Some("appointments and billing".to_owned()),
            }],
            legacy_handoff_email: None,
            integrations: Vec::new(),
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 18, 30, 0).single().unwrap_or_default()
    }

    #[test]
    fn identical_inputs_produce_identical_prompts() {
        let agent = agent();
        let passages = vec!["Cleanings cost $80.".to_owned(), "Open Mon-Fri.".to_owned()];
        let input = PromptInput { agent: &agent, passages: &passages, now: now() };

        assert_eq!(compose_system_prompt(&input), compose_system_prompt(&input));
    }

    #[test]
    fn passages_are_labeled_with_no_fabrication_directive() {
        let agent = agent();
        let passages = vec!["Cleanings cost $80.".to_owned()];
        let prompt =
            compose_system_prompt(&PromptInput { agent: &agent, passages: &passages, now: now() });

        assert!(prompt.contains("[BLOCK 1]\nCleanings cost $80.\n[/BLOCK 1]"));
        assert!(prompt.contains("Do not invent facts"));
    }

    #[test]
    fn empty_passages_state_there_is_no_retrieval_context() {
        let agent = agent();
        let prompt = compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(prompt.contains("No retrieved knowledge is available"));
        assert!(!prompt.contains("[BLOCK 1]"));
    }

    #[test]
    fn persona_is_verbatim_and_style_is_described() {
        let agent = agent();
        let prompt = compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(prompt.contains("Always greet patients warmly."));
        assert!(prompt.contains(CommunicationStyle::Casual.description()));
        assert!(prompt.contains("Monday 2026-03-02 12:30 (America/Mexico_City)"));
    }

    #[test]
    fn custom_fields_list_allowed_options() {
        let agent = agent();
        let prompt = compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(prompt.contains("key `insurance` (Insurance provider, select): Who covers the treatment"));
        assert!(prompt.contains("Allowed values: None | MetLife | AXA."));
    }

    #[test]
    fn contact_capture_is_always_present() {
        let mut agent = agent();
        agent.custom_fields.clear();
        agent.flags.transfer_to_human = false;
        let prompt = compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(prompt.contains("## CONTACT DETAILS"));
        assert!(prompt.contains("\"Omar\""));
        assert!(!prompt.contains("## DATA TO CAPTURE"));
    }

    #[test]
    fn escalation_protocol_depends_on_transfer_flag() {
        let mut agent = agent();
        let with_transfer =
            compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(with_transfer.contains("## HUMAN HANDOFF PROTOCOL"));
        assert!(with_transfer.contains("- id `front-desk`: Front desk (appointments and billing)"));

        agent.flags.transfer_to_human = false;
        let without =
            compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(!without.contains("## HUMAN HANDOFF PROTOCOL"));
        assert!(without.contains("No human transfer is available"));
    }

    #[test]
    fn calendar_directive_follows_integration() {
        let mut agent = agent();
        let prompt = compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(prompt.contains("You cannot book meetings"));

        agent.integrations.push(Integration::GoogleCalendar(CalendarIntegration {
            calendar_id: "primary".to_owned(),
            access_token: "token".to_owned(),
            default_event_minutes: 45,
        }));
        let prompt = compose_system_prompt(&PromptInput { agent: &agent, passages: &[], now: now() });
        assert!(prompt.contains("book meetings of 45 minutes"));
    }

    #[test]
    fn unknown_timezone_renders_utc() {
        assert_eq!(local_time_label("Mars/Olympus", now()), "Monday 2026-03-02 18:30 (UTC)");
    }
}
