#![no_main]

use libfuzzer_sys::fuzz_target;
use loggest_chew::{ChewConfig, chew_json};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if text.len() > 64 * 1024 {
        return;
    }

    // Malformed input must surface as an error, never a panic.
    let Ok(bundle) = chew_json(text, &ChewConfig::default()) else {
        return;
    };

    for perm in &bundle.permutations {
        assert_eq!(perm.matrix.row_count(), 2 * perm.steps.len() + 1);
        assert_eq!(perm.matrix.column_count(), perm.loggers.len());

        for (column, logger) in perm.loggers.iter().enumerate() {
            // Entries are in stamp order.
            for pair in logger.entries.windows(2) {
                assert!(pair[0].stamp() <= pair[1].stamp());
            }

            // Cells partition the column.
            let mut cursor = 0;
            for row in 0..perm.matrix.row_count() {
                if let Some(range) = perm.matrix.cell(row, column) {
                    assert_eq!(range.start, cursor, "gap or overlap in column {column}");
                    cursor = range.end;
                }
            }
            assert_eq!(cursor, logger.entries.len());
        }
    }
});
