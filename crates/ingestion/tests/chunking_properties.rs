use caseforge_common::model::{Document, SourceId};
use caseforge_ingestion::chunker::{chunk_document, reconstruct_text, ChunkingConfig};
use proptest::prelude::*;

fn document(text: &str) -> Document {
    Document::new(SourceId::from_origin("/prop/doc.txt"), "Prop", text)
}

proptest! {
    #[test]
    fn chunks_cover_the_whole_document(
        text in "\\PC{0,600}",
        size in 1usize..120,
        overlap_seed in 0usize..120,
    ) {
        let overlap = overlap_seed % size;
        let config = ChunkingConfig::new(size, overlap).unwrap();
        let doc = document(&text);
        let chunks = chunk_document(&doc, &config);
        let char_len = text.chars().count();

        if char_len == 0 {
            prop_assert!(chunks.is_empty());
        } else {
            prop_assert_eq!(chunks[0].offset.start, 0);
            prop_assert_eq!(chunks.last().unwrap().offset.end, char_len);
            for pair in chunks.windows(2) {
                // No gaps between neighbours
                prop_assert!(pair[1].offset.start <= pair[0].offset.end);
                prop_assert_eq!(pair[1].offset.start - pair[0].offset.start, size - overlap);
            }
        }

        for (idx, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.sequence_index as usize, idx);
            prop_assert!(chunk.text.chars().count() <= size);
            prop_assert_eq!(chunk.text.chars().count(), chunk.offset.len());
            prop_assert_eq!(chunk.document_id, doc.id);
        }

        prop_assert_eq!(reconstruct_text(&chunks), text);
    }
}
