//! Offset-shifting marker insertion.

use super::{CitationGroup, Reference};
use crate::error::{ChatError, Result};

/// Render the inline marker for reference `id`.
#[must_use]
pub fn marker(id: usize) -> String {
    format!(r##"<a href="#ref-{id}" target="_self">[{id}]</a>"##)
}

/// Insert reference markers into `full_text` and number the references.
///
/// Groups are visited in ascending `end` order (stable, so groups closing at
/// the same offset keep their input order). Every insertion pushes later
/// positions to the right, so each group's unshifted offset is shifted by the
/// total length of the markers already inserted.
///
/// # Panics
///
/// Panics if a group's `end` lies beyond the text. Spans come from the
/// upstream event stream and an out-of-range one is a bug there; use
/// [`try_splice`] to get an error instead.
#[must_use]
pub fn splice(full_text: &str, groups: &[CitationGroup]) -> (String, Vec<Reference>) {
    let mut ordered: Vec<&CitationGroup> = groups.iter().collect();
    ordered.sort_by_key(|g| g.end);

    let mut output = String::with_capacity(full_text.len() + groups.len() * 48);
    output.push_str(full_text);

    let mut offset = 0;
    let mut counter = 1;
    let mut references = Vec::new();

    for group in ordered {
        let Some(end) = byte_offset(full_text, group.end) else {
            panic!(
                "citation end {} is beyond text of {} chars",
                group.end,
                full_text.chars().count()
            );
        };

        let count = group.references.len();
        let markers: String = (counter..counter + count).map(marker).collect();
        output.insert_str(end + offset, &markers);

        references.extend(group.references.iter().enumerate().map(|(k, chunk)| Reference {
            id: counter + k,
            text: chunk.content.clone(),
            source: chunk.location.clone(),
            metadata: chunk.metadata.clone(),
        }));

        offset += markers.len();
        counter += count;
    }

    (output, references)
}

/// Like [`splice`], but reports an out-of-range span as
/// [`ChatError::InvalidSpan`] instead of panicking.
pub fn try_splice(full_text: &str, groups: &[CitationGroup]) -> Result<(String, Vec<Reference>)> {
    if let Some(bad) = groups
        .iter()
        .find(|g| byte_offset(full_text, g.end).is_none())
    {
        return Err(ChatError::InvalidSpan {
            end: bad.end,
            len: full_text.chars().count(),
        });
    }
    Ok(splice(full_text, groups))
}

/// Byte index of the `chars`-th character, or the text length when `chars`
/// is exactly the character count.
fn byte_offset(text: &str, chars: usize) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(chars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::ReferencedChunk;

    fn chunk(name: &str) -> ReferencedChunk {
        ReferencedChunk::new(format!("text {name}"), format!("s3://bucket/{name}.pdf"))
    }

    fn group(end: usize, names: &[&str]) -> CitationGroup {
        CitationGroup {
            start: 0,
            end,
            references: names.iter().map(|n| chunk(n)).collect(),
        }
    }

    #[test]
    fn test_no_citations_passthrough() {
        let (text, refs) = splice("plain answer", &[]);
        assert_eq!(text, "plain answer");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_sky_and_water_example() {
        let full = "The sky is blue. Water is wet.";
        let groups = vec![group(16, &["A"]), group(30, &["B", "C"])];

        let (text, refs) = splice(full, &groups);

        let expected = format!(
            "The sky is blue.{} Water is wet.{}{}",
            marker(1),
            marker(2),
            marker(3)
        );
        assert_eq!(text, expected);
        let ids: Vec<usize> = refs.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(refs[0].text, "text A");
        assert_eq!(refs[1].source, "s3://bucket/B.pdf");
        assert_eq!(refs[2].text, "text C");
    }

    #[test]
    fn test_groups_are_sorted_by_end() {
        let full = "First. Second.";
        let groups = vec![group(14, &["late"]), group(6, &["early"])];

        let (text, refs) = splice(full, &groups);

        assert_eq!(text, format!("First.{} Second.{}", marker(1), marker(2)));
        assert_eq!(refs[0].text, "text early");
        assert_eq!(refs[1].text, "text late");
    }

    #[test]
    fn test_equal_ends_keep_input_order() {
        let full = "Same spot.";
        let groups = vec![group(10, &["x"]), group(10, &["y", "z"])];

        let (text, refs) = splice(full, &groups);

        assert_eq!(
            text,
            format!("Same spot.{}{}{}", marker(1), marker(2), marker(3))
        );
        let texts: Vec<&str> = refs.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, vec!["text x", "text y", "text z"]);
    }

    #[test]
    fn test_zero_chunk_group_consumes_no_ids() {
        let full = "One. Two. Three.";
        let groups = vec![group(4, &["a"]), group(9, &[]), group(16, &["b"])];

        let (text, refs) = splice(full, &groups);

        assert_eq!(text, format!("One.{} Two. Three.{}", marker(1), marker(2)));
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[1].id, 2);
        assert_eq!(refs[1].text, "text b");
    }

    #[test]
    fn test_ids_are_contiguous_and_length_adds_up() {
        let full = "alpha beta gamma delta epsilon";
        let groups = vec![
            group(5, &["1", "2"]),
            group(30, &["3"]),
            group(16, &["4", "5", "6"]),
            group(0, &["7"]),
        ];

        let (text, refs) = splice(full, &groups);

        let ids: Vec<usize> = refs.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=7).collect::<Vec<_>>());

        let marker_len: usize = ids.iter().map(|id| marker(*id).len()).sum();
        assert_eq!(text.len(), full.len() + marker_len);
    }

    #[test]
    fn test_marker_ids_follow_reference_order() {
        let full = "abc";
        let groups = vec![group(3, &["p", "q"])];

        let (text, refs) = splice(full, &groups);

        let first = text.find("[1]").unwrap();
        let second = text.find("[2]").unwrap();
        assert!(first < second);
        assert_eq!(refs[0].text, "text p");
        assert_eq!(refs[1].text, "text q");
    }

    #[test]
    fn test_offsets_count_characters() {
        let full = "Café ok. Ünïcode.";
        let groups = vec![group(8, &["a"]), group(17, &["b"])];

        let (text, _) = splice(full, &groups);

        assert_eq!(text, format!("Café ok.{} Ünïcode.{}", marker(1), marker(2)));
    }

    #[test]
    #[should_panic(expected = "beyond text")]
    fn test_out_of_range_span_panics() {
        let _ = splice("short", &[group(99, &["a"])]);
    }

    #[test]
    fn test_try_splice_reports_out_of_range_span() {
        let err = try_splice("short", &[group(6, &["a"])]).unwrap_err();
        assert!(matches!(err, ChatError::InvalidSpan { end: 6, len: 5 }));

        let (text, _) = try_splice("short", &[group(5, &["a"])]).unwrap();
        assert_eq!(text, format!("short{}", marker(1)));
    }
}
