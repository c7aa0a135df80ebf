//! Property-based tests for the ingestion pipeline
//!
//! - Frame decoding does not depend on how the input is chunked
//! - Text deltas concatenate in arrival order
//! - Reasoning deltas without an open reasoning block never create blocks

use super::{BlockAssembler, Frame, FrameDecoder, StreamEvent};
use crate::conversation::{Message, MessageBlock, Role};
use chrono::Utc;
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

/// Payload text, including multi-byte characters
fn arb_payload() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 {}\":,éü€🙂]{1,40}"
}

/// A full wire stream: records, optional comments, then an optional `[DONE]`
fn arb_wire() -> impl Strategy<Value = (Vec<String>, Vec<u8>)> {
    (
        proptest::collection::vec((arb_payload(), any::<bool>()), 0..10),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(records, crlf, done)| {
            let nl = if crlf { "\r\n" } else { "\n" };
            let mut wire = String::new();
            let mut payloads = Vec::new();
            for (payload, comment) in records {
                if comment {
                    wire.push_str(&format!(": ping{nl}{nl}"));
                }
                wire.push_str(&format!("data: {payload}{nl}{nl}"));
                if !payload.trim().is_empty() {
                    payloads.push(payload);
                }
            }
            if done {
                wire.push_str(&format!("data: [DONE]{nl}{nl}"));
            }
            (payloads, wire.into_bytes())
        })
}

fn decode_chunked(bytes: &[u8], cuts: &[usize]) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut start = 0;
    let mut points: Vec<usize> = cuts.iter().map(|c| c % (bytes.len() + 1)).collect();
    points.sort_unstable();
    points.push(bytes.len());
    for end in points {
        if end < start {
            continue;
        }
        decoder.feed(&bytes[start..end]);
        frames.extend(decoder.frames());
        start = end;
    }
    frames.extend(decoder.finish());
    frames.extend(decoder.frames());
    frames
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_fragmentation_independent(
        (payloads, wire) in arb_wire(),
        cuts in proptest::collection::vec(any::<usize>(), 0..12),
    ) {
        let whole = decode_chunked(&wire, &[]);
        let split = decode_chunked(&wire, &cuts);
        prop_assert_eq!(&whole, &split);

        let data: Vec<String> = whole
            .iter()
            .filter_map(|f| match f {
                Frame::Data(d) => Some(d.clone()),
                Frame::Done => None,
            })
            .collect();
        prop_assert_eq!(data, payloads);
    }

    #[test]
    fn prop_text_deltas_concatenate(deltas in proptest::collection::vec("[a-zA-Z0-9 éü]{0,10}", 0..20)) {
        let mut messages = vec![Message::user(vec![MessageBlock::text("u", "hi")])];
        let mut assembler = BlockAssembler::new();
        let now = Utc::now();
        assembler.apply(&mut messages, StreamEvent::TextStart { id: "t".into() }, now);
        for text in &deltas {
            assembler.apply(&mut messages, StreamEvent::TextDelta { text: text.clone() }, now);
        }

        prop_assert_eq!(messages.len(), 2);
        prop_assert_eq!(messages[1].content.len(), 1);
        prop_assert_eq!(messages[1].text(), deltas.concat());
    }

    #[test]
    fn prop_orphan_reasoning_deltas_are_noops(
        deltas in proptest::collection::vec("[a-z]{1,8}", 1..10),
        open_text in any::<bool>(),
    ) {
        let mut messages = vec![Message::user(vec![MessageBlock::text("u", "hi")])];
        let mut assembler = BlockAssembler::new();
        let now = Utc::now();
        if open_text {
            assembler.apply(&mut messages, StreamEvent::TextStart { id: "t".into() }, now);
        }
        let before = messages.clone();
        for text in deltas {
            assembler.apply(&mut messages, StreamEvent::ReasoningDelta { text }, now);
        }

        prop_assert_eq!(&messages, &before);
        prop_assert!(messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .flat_map(|m| &m.content)
            .all(|b| !b.is_thinking()));
    }
}
