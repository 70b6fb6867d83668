//! Context assembly for the answer generator

use crate::types::Hit;

/// Turns ranked hits into an attributed context block
pub struct ContextAssembler;

impl ContextAssembler {
    /// Format hits in rank order.
    ///
    /// Each hit becomes
    /// `--- Source: {source} | Chunk {rank} | Score: {score:.4} ---\n{text}\n`
    /// and blocks are joined with a newline, leaving a blank line between
    /// them. No hits gives an empty string.
    pub fn assemble(hits: &[Hit]) -> String {
        hits.iter()
            .enumerate()
            .map(|(i, hit)| Self::format_block(hit, i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_block(hit: &Hit, rank: usize) -> String {
        format!(
            "--- Source: {} | Chunk {} | Score: {:.4} ---\n{}\n",
            hit.metadata.source, rank, hit.score, hit.text
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkMetadata;

    fn hit(source: &str, text: &str, score: f32) -> Hit {
        Hit {
            text: text.to_string(),
            metadata: ChunkMetadata::new(source, 1, 1, 0),
            score,
        }
    }

    #[test]
    fn test_empty_hits_give_empty_context() {
        assert_eq!(ContextAssembler::assemble(&[]), "");
    }

    #[test]
    fn test_block_format() {
        let hits = vec![
            hit("france.pdf", "The capital of France is Paris.", 0.123456),
            hit("other.pdf", "Unrelated.", 1.5),
        ];

        assert_eq!(
            ContextAssembler::assemble(&hits),
            "--- Source: france.pdf | Chunk 1 | Score: 0.1235 ---\nThe capital of France is Paris.\n\
             \n--- Source: other.pdf | Chunk 2 | Score: 1.5000 ---\nUnrelated.\n"
        );
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let hits = vec![hit("a.pdf", "alpha", 0.5), hit("b.pdf", "beta", 0.75)];
        assert_eq!(ContextAssembler::assemble(&hits), ContextAssembler::assemble(&hits));
    }
}
