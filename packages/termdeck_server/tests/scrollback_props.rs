use proptest::prelude::*;

use termdeck_protocol::CLEAR_AND_HOME;
use termdeck_server::ScrollbackBuffer;

fn arb_chunks() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[ab\u{e9}\n]{0,12}", 0..24)
}

fn ingest_all(capacity: usize, chunks: &[String]) -> ScrollbackBuffer {
    let mut buffer = ScrollbackBuffer::new(capacity);
    for chunk in chunks {
        buffer.ingest(chunk);
    }
    buffer
}

// --- Ingest ---

proptest! {
    #[test]
    fn retained_lines_bounded_by_capacity(capacity in 1usize..16, chunks in arb_chunks()) {
        let buffer = ingest_all(capacity, &chunks);
        let newlines: usize = chunks.iter().map(|c| c.matches('\n').count()).sum();

        prop_assert!(buffer.len() <= capacity);
        prop_assert_eq!(buffer.len() as u64 + buffer.evicted(), newlines as u64);
    }

    #[test]
    fn chunking_does_not_matter(chunks in arb_chunks()) {
        let piecewise = ingest_all(1000, &chunks);
        let whole = ingest_all(1000, &[chunks.concat()]);

        prop_assert_eq!(piecewise.lines().collect::<Vec<_>>(), whole.lines().collect::<Vec<_>>());
        prop_assert_eq!(piecewise.fragment(), whole.fragment());
    }

    #[test]
    fn lines_and_fragment_reconstruct_output(chunks in arb_chunks()) {
        let buffer = ingest_all(100_000, &chunks);
        let mut rebuilt = String::new();
        for line in buffer.lines() {
            rebuilt.push_str(line);
            rebuilt.push('\n');
        }
        rebuilt.push_str(buffer.fragment());

        prop_assert_eq!(rebuilt, chunks.concat());
    }

    #[test]
    fn eviction_keeps_the_newest_lines(capacity in 1usize..8, count in 0usize..40) {
        let mut buffer = ScrollbackBuffer::new(capacity);
        for i in 0..count {
            buffer.ingest(&format!("{i}\n"));
        }
        let expected: Vec<String> = (count.saturating_sub(capacity)..count).map(|i| i.to_string()).collect();
        prop_assert_eq!(buffer.lines().map(str::to_string).collect::<Vec<_>>(), expected);
    }
}

// --- Slice ---

proptest! {
    #[test]
    fn slice_is_pure(chunks in arb_chunks(), lines_back in 0usize..40, rows in 0usize..30) {
        let buffer = ingest_all(20, &chunks);
        let before: Vec<String> = buffer.lines().map(str::to_string).collect();

        let first = buffer.slice(lines_back, rows);
        let second = buffer.slice(lines_back, rows);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(buffer.lines().map(str::to_string).collect::<Vec<_>>(), before);
    }

    #[test]
    fn confirmed_offset_clamps_to_length(chunks in arb_chunks(), lines_back in 0usize..60) {
        let buffer = ingest_all(20, &chunks);
        let slice = buffer.slice(lines_back, 24);
        prop_assert_eq!(slice.confirmed_offset, lines_back.min(buffer.len()));
    }

    #[test]
    fn slice_never_exceeds_viewport(chunks in arb_chunks(), lines_back in 0usize..40, rows in 1usize..30) {
        let buffer = ingest_all(50, &chunks);
        let slice = buffer.slice(lines_back, rows);

        prop_assert!(slice.data.starts_with(CLEAR_AND_HOME));
        let body = &slice.data[CLEAR_AND_HOME.len()..];
        let shown = buffer.len().saturating_sub(lines_back).min(rows);
        if shown > 0 {
            prop_assert_eq!(body.split('\n').count(), shown);
        } else {
            prop_assert!(body.is_empty());
        }
    }
}
