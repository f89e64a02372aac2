//! Property-based tests for stream decoding
//!
//! However the transport slices the body, the decoded text must match what a
//! single contiguous read produces.

use super::sse::SseDecoder;
use super::testing::data_line;
use proptest::prelude::*;

fn decode_all(chunks: &[&[u8]]) -> String {
    let mut decoder = SseDecoder::new();
    let mut text = String::new();
    for chunk in chunks {
        for fragment in decoder.push(chunk) {
            text.push_str(&fragment);
        }
    }
    for fragment in decoder.finish() {
        text.push_str(&fragment);
    }
    text
}

fn arb_fragments() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-zA-Z0-9 éü✓\"\\\\\n.,]{1,12}", 1..12)
}

proptest! {
    #[test]
    fn prop_chunking_does_not_change_text(
        fragments in arb_fragments(),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..16),
    ) {
        let body: Vec<u8> = fragments.iter().flat_map(|f| data_line(f)).collect();
        let expected: String = fragments.concat();

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(body.len() + 1)).collect();
        offsets.sort_unstable();
        offsets.dedup();

        let mut chunks: Vec<&[u8]> = Vec::new();
        let mut start = 0;
        for offset in offsets {
            chunks.push(&body[start..offset]);
            start = offset;
        }
        chunks.push(&body[start..]);

        prop_assert_eq!(decode_all(&chunks), expected.clone());
        prop_assert_eq!(decode_all(&[&body]), expected);
    }

    #[test]
    fn prop_garbage_lines_preserve_text(
        fragments in arb_fragments(),
        garbage in prop::collection::vec("[a-z{}:\\[\\] ]{0,20}", 0..6),
    ) {
        let mut body = Vec::new();
        for (i, fragment) in fragments.iter().enumerate() {
            if let Some(junk) = garbage.get(i) {
                body.extend_from_slice(format!("data: {{{junk}\n").as_bytes());
            }
            body.extend_from_slice(&data_line(fragment));
        }

        prop_assert_eq!(decode_all(&[&body]), fragments.concat());
    }
}
