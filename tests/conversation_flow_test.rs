use restitch::conversation::ConversationReconstructor;
use restitch::envelope::{parse_conversation_record, ConversationEvent, OutputItemKind};
use restitch::types::Sender;

fn apply_all(recon: &mut ConversationReconstructor, records: &[&str]) {
    for record in records {
        let event = match parse_conversation_record(record) {
            Some(e) => e,
            None => panic!("record should parse: {}", record),
        };
        if recon.apply(event) {
            return;
        }
    }
}

#[test]
fn test_scenario_plain_text_turn() {
    let mut recon = ConversationReconstructor::new();
    apply_all(
        &mut recon,
        &[
            r#"{"event_type":"response.output_item.added","item_type":"message"}"#,
            r#"{"event_type":"response.output_text.delta","delta":"H"}"#,
            r#"{"event_type":"response.output_text.delta","delta":"i"}"#,
        ],
    );
    recon.finish();

    let messages = recon.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender, Sender::Assistant);
    assert_eq!(messages[0].content, "Hi");
    assert!(!messages[0].is_streaming);
}

#[test]
fn test_scenario_reasoning_then_tool_call() {
    let mut recon = ConversationReconstructor::new();
    apply_all(
        &mut recon,
        &[
            r#"{"event_type":"response.output_item.added","item_type":"reasoning"}"#,
            r#"{"event_type":"response.reasoning_summary_text.delta","delta":"Thinking"}"#,
            r#"{"event_type":"response.output_item.added","item_type":"function_call","function_name":"write_file"}"#,
            r#"{"event_type":"response.function_call_arguments.delta","delta":"{\"absolute_file_path\":\"/a.py\",\"content\":\"x"}"#,
            r#"{"event_type":"response.function_call_arguments.done"}"#,
        ],
    );

    assert!(!recon.has_reasoning_placeholder());
    assert!(recon.active_tool_call().is_none());

    let messages = recon.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].function_name.as_deref(), Some("write_file"));
    assert_eq!(messages[0].reasoning_summary.as_deref(), Some("Thinking"));
    assert!(!messages[0].is_streaming);
}

#[test]
fn test_reasoning_transplanted_onto_message() {
    let mut recon = ConversationReconstructor::new();
    apply_all(
        &mut recon,
        &[
            r#"{"event_type":"response.output_item.added","item_type":"reasoning"}"#,
            r#"{"event_type":"response.reasoning_summary_text.delta","delta":"First I will "}"#,
            r#"{"event_type":"response.reasoning_summary_text.delta","delta":"check the file"}"#,
            r#"{"event_type":"response.output_item.added","item_type":"message"}"#,
            r#"{"event_type":"response.output_text.delta","delta":"Done."}"#,
        ],
    );
    recon.finish();

    // Placeholder retired, its accumulated reasoning carried over intact
    // onto the opened message and nowhere else.
    let messages = recon.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].reasoning_summary.as_deref(),
        Some("First I will check the file")
    );
    assert_eq!(messages[0].content, "Done.");
}

#[test]
fn test_progressive_thought_extraction() {
    let mut recon = ConversationReconstructor::new();
    apply_all(
        &mut recon,
        &[
            r#"{"event_type":"response.output_item.added","item_type":"function_call","function_name":"run_code"}"#,
            r#"{"event_type":"response.function_call_arguments.delta","delta":"{\"thought\":\"Plot the "}"#,
        ],
    );
    assert_eq!(recon.messages()[0].content, "Plot the ");

    apply_all(
        &mut recon,
        &[
            r#"{"event_type":"response.function_call_arguments.delta","delta":"results\",\"code\":\"plt.show()\"}"}"#,
            r#"{"event_type":"response.function_call_arguments.done"}"#,
        ],
    );
    assert_eq!(recon.messages()[0].content, "Plot the results");
    assert!(!recon.messages()[0].is_streaming);
}

#[test]
fn test_error_envelope_cleans_up_placeholder() {
    let mut recon = ConversationReconstructor::new();
    apply_all(
        &mut recon,
        &[
            r#"{"event_type":"response.output_item.added","item_type":"reasoning"}"#,
            r#"{"event_type":"error","error":"model overloaded"}"#,
        ],
    );
    assert!(!recon.has_reasoning_placeholder());
    assert_eq!(recon.error(), Some("model overloaded"));
    // The discarded placeholder leaves no message behind.
    assert!(recon.messages().is_empty());
}

#[test]
fn test_malformed_record_does_not_corrupt_turn() {
    let mut recon = ConversationReconstructor::new();
    let records = [
        r#"{"event_type":"response.output_item.added","item_type":"message"}"#,
        r#"{"event_type":"response.output_text.delta""#, // split JSON, discarded
        r#"{"event_type":"response.output_text.delta","delta":"ok"}"#,
    ];
    for record in records {
        if let Some(event) = parse_conversation_record(record) {
            recon.apply(event);
        }
    }
    recon.finish();
    assert_eq!(recon.messages().len(), 1);
    assert_eq!(recon.messages()[0].content, "ok");
}

#[test]
fn test_tool_call_then_reply_in_one_turn() {
    let mut recon = ConversationReconstructor::new();
    apply_all(
        &mut recon,
        &[
            r#"{"event_type":"response.output_item.added","item_type":"reasoning"}"#,
            r#"{"event_type":"response.reasoning_summary_text.delta","delta":"Check"}"#,
            r#"{"event_type":"response.output_item.added","item_type":"function_call","function_name":"read_file"}"#,
            r#"{"event_type":"response.function_call_arguments.delta","delta":"{\"thought\":\"Read it\",\"path\":\"/a\"}"}"#,
            r#"{"event_type":"response.function_call_arguments.done"}"#,
            r#"{"event_type":"response.output_item.added","item_type":"message"}"#,
            r#"{"event_type":"response.output_text.delta","delta":"The file is empty."}"#,
        ],
    );
    recon.finish();

    let messages = recon.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].function_name.as_deref(), Some("read_file"));
    assert_eq!(messages[0].reasoning_summary.as_deref(), Some("Check"));
    assert_eq!(messages[0].content, "Read it");
    assert!(messages[1].function_name.is_none());
    assert_eq!(messages[1].content, "The file is empty.");
    // Reasoning buffered before the tool call must not leak onto the reply.
    assert!(messages[1].reasoning_summary.is_none());
}

#[test]
fn test_at_most_one_open_item_throughout() {
    let mut recon = ConversationReconstructor::new();
    let records = [
        r#"{"event_type":"response.output_item.added","item_type":"reasoning"}"#,
        r#"{"event_type":"response.output_item.added","item_type":"reasoning"}"#,
        r#"{"event_type":"response.output_item.added","item_type":"function_call","function_name":"grep"}"#,
        r#"{"event_type":"response.function_call_arguments.delta","delta":"{}"}"#,
        r#"{"event_type":"response.function_call_arguments.done"}"#,
        r#"{"event_type":"response.output_item.added","item_type":"message"}"#,
    ];
    for record in records {
        let event = match parse_conversation_record(record) {
            Some(e) => e,
            None => panic!("record should parse"),
        };
        recon.apply(event);
        let open_placeholder = recon.has_reasoning_placeholder() as u8;
        let open_call = recon.active_tool_call().is_some() as u8;
        assert!(open_placeholder + open_call <= 1);
    }
}

#[test]
fn test_heartbeat_events_change_nothing() {
    let mut recon = ConversationReconstructor::new();
    recon.apply(ConversationEvent::Heartbeat);
    recon.apply(ConversationEvent::OutputItemAdded {
        item_type: OutputItemKind::Message,
        function_name: None,
    });
    let before = recon.messages().to_vec();
    recon.apply(ConversationEvent::Heartbeat);
    assert_eq!(recon.messages(), &before[..]);
}
