//! Codec for the per-chunk record id carried through the batch JSONL files.
//!
//! The format is `{document_id}:{chunk_index}:{start}:{end}`. Document ids may
//! themselves contain `:`; only the last three colon-separated fields are
//! reserved, so parsing splits from the right.

/// A chunk identity recovered from a batch output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecordId {
    pub document_id: String,
    pub chunk_index: u32,
    pub start: u64,
    pub end: u64,
}

pub fn format_record_id(document_id: &str, chunk_index: u32, start: u64, end: u64) -> String {
    format!("{document_id}:{chunk_index}:{start}:{end}")
}

/// Parse a record id, splitting on `:` from the right. Returns `None` for
/// anything that does not carry exactly three trailing numeric fields.
pub fn parse_record_id(record_id: &str) -> Option<ChunkRecordId> {
    let mut parts = record_id.rsplitn(4, ':');

    let end: u64 = parts.next()?.parse().ok()?;
    let start: u64 = parts.next()?.parse().ok()?;
    let chunk_index: u32 = parts.next()?.parse().ok()?;
    let document_id = parts.next()?;

    if document_id.is_empty() {
        return None;
    }

    Some(ChunkRecordId {
        document_id: document_id.to_string(),
        chunk_index,
        start,
        end,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_plain_ids() {
        let formatted = format_record_id("doc-123", 2, 10, 450);
        let parsed = parse_record_id(&formatted).expect("parse");
        assert_eq!(parsed.document_id, "doc-123");
        assert_eq!(parsed.chunk_index, 2);
        assert_eq!(parsed.start, 10);
        assert_eq!(parsed.end, 450);
    }

    #[test]
    fn document_ids_may_contain_colons() {
        // External ids use the "{source}:{type}:{id}" shape, so colons in the
        // document id are the norm, not the exception.
        let doc_id = "hubspot:contact:101";
        let formatted = format_record_id(doc_id, 0, 0, 64);
        let parsed = parse_record_id(&formatted).expect("parse");
        assert_eq!(parsed.document_id, doc_id);
        assert_eq!(parsed.chunk_index, 0);
        assert_eq!(parsed.start, 0);
        assert_eq!(parsed.end, 64);
    }

    #[test]
    fn round_trip_property_over_generated_inputs() {
        let doc_ids = ["a", "a:b", "a:b:c:d:e", "source:type:id-with-dash"];
        for doc_id in doc_ids {
            for chunk_index in [0u32, 1, 17, u32::MAX] {
                for (start, end) in [(0u64, 1u64), (10, 450), (u64::MAX - 1, u64::MAX)] {
                    let formatted = format_record_id(doc_id, chunk_index, start, end);
                    let parsed = parse_record_id(&formatted).expect("parse");
                    assert_eq!(
                        (
                            parsed.document_id.as_str(),
                            parsed.chunk_index,
                            parsed.start,
                            parsed.end
                        ),
                        (doc_id, chunk_index, start, end)
                    );
                }
            }
        }
    }

    #[test]
    fn malformed_record_ids_are_rejected() {
        for bad in [
            "",
            "no-fields",
            "doc:1:2",
            "doc:one:2:3",
            "doc:1:two:3",
            "doc:1:2:three",
            ":1:2:3",
            "doc:1:2:",
        ] {
            assert!(parse_record_id(bad).is_none(), "should reject {bad:?}");
        }
    }
}
