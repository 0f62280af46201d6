//! Incremental sentence segmentation over answer-engine text deltas.
//!
//! Splitting is purely character based: a sentence closes at the first `.`,
//! `!`, or `?` in the accumulated buffer and the remainder carries forward,
//! so one delta can close several sentences. This is terminator splitting,
//! not linguistic segmentation — abbreviations and decimal points close a
//! sentence early. Acceptable for feeding a speech synthesizer; callers
//! wanting exact prosody boundaries need a smarter collaborator upstream.

/// A closed sentence ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    /// Dense, zero-based close-order sequence number.
    pub sequence: u64,
    /// Trimmed sentence text, terminator included when one was present.
    pub text: String,
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Incremental segmenter state for one answer turn.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
    next_sequence: u64,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one delta and return every sentence it closed, in order.
    pub fn push_delta(&mut self, delta: &str) -> Vec<Sentence> {
        self.buffer.push_str(delta);

        let mut closed = Vec::new();
        while let Some(pos) = self.buffer.find(is_terminal) {
            // Terminators are ASCII, so pos + 1 is a char boundary.
            let remainder = self.buffer.split_off(pos + 1);
            let text = std::mem::replace(&mut self.buffer, remainder);
            if let Some(sentence) = self.close(&text) {
                closed.push(sentence);
            }
        }
        closed
    }

    /// Close the remainder as a final sentence, terminator or not.
    /// Call once when the answer engine signals generation-complete.
    pub fn finish(&mut self) -> Option<Sentence> {
        let text = std::mem::take(&mut self.buffer);
        self.close(&text)
    }

    /// Sequence number the next closed sentence will get.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    fn close(&mut self, text: &str) -> Option<Sentence> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Some(Sentence {
            sequence,
            text: trimmed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(sentences: &[Sentence]) -> Vec<&str> {
        sentences.iter().map(|s| s.text.as_str()).collect::<Vec<_>>()
    }

    #[test]
    fn closes_on_first_terminator_and_carries_remainder() {
        let mut seg = SentenceSegmenter::new();
        let closed = seg.push_delta("Hello there. How are");
        assert_eq!(texts(&closed), vec!["Hello there."]);

        let closed = seg.push_delta(" you today?");
        assert_eq!(texts(&closed), vec!["How are you today?"]);
    }

    #[test]
    fn one_delta_can_close_multiple_sentences() {
        let mut seg = SentenceSegmenter::new();
        let closed = seg.push_delta("One. Two! Three? Four");
        assert_eq!(texts(&closed), vec!["One.", "Two!", "Three?"]);
        assert_eq!(closed[0].sequence, 0);
        assert_eq!(closed[1].sequence, 1);
        assert_eq!(closed[2].sequence, 2);

        let last = seg.finish().expect("remainder should close");
        assert_eq!(last.text, "Four");
        assert_eq!(last.sequence, 3);
    }

    #[test]
    fn sequence_numbers_are_dense_across_deltas() {
        let mut seg = SentenceSegmenter::new();
        let mut all = Vec::new();
        for delta in ["Hi", ".", " Second", " part.", " Tail"] {
            all.extend(seg.push_delta(delta));
        }
        all.extend(seg.finish());

        let sequences: Vec<u64> = all.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
        assert_eq!(texts(&all), vec!["Hi.", "Second part.", "Tail"]);
    }

    #[test]
    fn bare_terminators_close_as_punctuation_only_sentences() {
        // Any terminator closes; trimming only strips surrounding whitespace.
        let mut seg = SentenceSegmenter::new();
        let closed = seg.push_delta("   .");
        assert_eq!(texts(&closed), vec!["."]);
        let closed = seg.push_delta(" ! ? ");
        assert_eq!(texts(&closed), vec!["!", "?"]);
        assert_eq!(seg.next_sequence(), 3);
        assert!(seg.finish().is_none());
    }

    #[test]
    fn whitespace_only_remainder_does_not_close() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.push_delta("   ").is_empty());
        assert!(seg.finish().is_none());
        assert_eq!(seg.next_sequence(), 0);
    }

    #[test]
    fn finish_without_terminator_closes_the_buffer() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.push_delta("no punctuation here").is_empty());
        let last = seg.finish().expect("buffer should close on finish");
        assert_eq!(last.text, "no punctuation here");
        assert_eq!(last.sequence, 0);
    }

    #[test]
    fn finish_on_empty_buffer_is_none() {
        let mut seg = SentenceSegmenter::new();
        assert!(seg.finish().is_none());
    }

    #[test]
    fn known_limitation_abbreviations_split_early() {
        // Terminator splitting, documented behavior.
        let mut seg = SentenceSegmenter::new();
        let closed = seg.push_delta("Meet Dr. Smith.");
        assert_eq!(texts(&closed), vec!["Meet Dr.", "Smith."]);
    }

    #[test]
    fn multibyte_text_around_terminators() {
        let mut seg = SentenceSegmenter::new();
        let closed = seg.push_delta("héllo wörld. ça va");
        assert_eq!(texts(&closed), vec!["héllo wörld."]);
        let last = seg.finish().unwrap();
        assert_eq!(last.text, "ça va");
    }
}
