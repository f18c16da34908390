#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use loggest_chew::matrix::{StepSpan, slice_column};
use loggest_chew::{Args, EntryKind, LogEntry, Stamp};

#[derive(Debug, Arbitrary)]
struct SliceInput {
    stamps: Vec<(u16, i8)>,
    cuts: Vec<(u16, i8)>,
    open_last: bool,
}

fuzz_target!(|input: SliceInput| {
    if input.stamps.len() > 512 || input.cuts.len() > 64 {
        return;
    }

    let mut stamps = input.stamps;
    stamps.sort_unstable();
    let entries: Vec<LogEntry> = stamps
        .iter()
        .map(|&(ts, seq)| LogEntry {
            layer: None,
            timestamp: f64::from(ts),
            relstamp: f64::from(ts),
            sequence: i64::from(seq),
            kind: EntryKind::Error {
                name: "e".to_string(),
                args: Args::default(),
            },
        })
        .collect();

    let mut cuts = input.cuts;
    cuts.sort_unstable();
    let stamp = |(ts, seq): (u16, i8)| Stamp::new(f64::from(ts), i64::from(seq));
    let mut spans: Vec<StepSpan> = cuts
        .chunks(2)
        .map(|chunk| match *chunk {
            [begin, end] => StepSpan::Closed {
                start: stamp(begin),
                end: stamp(end),
            },
            [begin] => StepSpan::Open { start: stamp(begin) },
            _ => StepSpan::Empty,
        })
        .collect();
    if input.open_last {
        if let Some(StepSpan::Closed { start, .. }) = spans.last().copied() {
            spans.pop();
            spans.push(StepSpan::Open { start });
        }
    }

    let cells = slice_column(&entries, &spans);
    assert_eq!(cells.len(), 2 * spans.len() + 1);

    let mut cursor = 0;
    for range in cells.iter().flatten() {
        assert_eq!(range.start, cursor);
        assert!(range.end > range.start, "empty cells must be None");
        cursor = range.end;
    }
    assert_eq!(cursor, entries.len());
});
