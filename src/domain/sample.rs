// ============================================================
// Layer 3 — Reading-Comprehension Sample
// ============================================================
// One question/context pair, already mapped to vocabulary ids by
// the upstream data pipeline. Every word carries its subword and
// character ids as an inner list, so the three granularities stay
// aligned by construction:
//
//   context_word    = [ 17, 903, 4 ]
//   context_subword = [ [17], [88, 12], [4] ]
//   context_char    = [ [3, 9], [5, 5, 2, 7], [1] ]
//
// Id 0 is reserved for padding; masks are derived from it by the
// batcher, never stored here.

use serde::{Deserialize, Serialize};

use crate::domain::error::SampleError;

/// Vocabulary sizes of the three id granularities; every id must
/// be strictly below its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VocabSizes {
    pub word:    usize,
    pub subword: usize,
    pub char:    usize,
}

/// A labelled (or unlabelled) reading-comprehension example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcSample {
    /// Identifier kept for traceability in prediction output
    pub id: String,

    pub question_word:    Vec<u32>,
    pub question_subword: Vec<Vec<u32>>,
    pub question_char:    Vec<Vec<u32>>,

    pub context_word:    Vec<u32>,
    pub context_subword: Vec<Vec<u32>>,
    pub context_char:    Vec<Vec<u32>>,

    /// Inclusive `[start, end]` word indices into the context.
    /// Absent at inference time.
    #[serde(default)]
    pub answer: Option<[usize; 2]>,
}

impl RcSample {
    pub fn context_len(&self) -> usize {
        self.context_word.len()
    }

    /// Check that the three granularities line up and the answer
    /// (if any) lies inside the context.
    pub fn validate(&self) -> Result<(), SampleError> {
        if self.question_word.is_empty() {
            return Err(SampleError::Empty { id: self.id.clone(), side: "question" });
        }
        if self.context_word.is_empty() {
            return Err(SampleError::Empty { id: self.id.clone(), side: "context" });
        }

        let groups = [
            ("question", "subword", self.question_word.len(), self.question_subword.len()),
            ("question", "char",    self.question_word.len(), self.question_char.len()),
            ("context",  "subword", self.context_word.len(),  self.context_subword.len()),
            ("context",  "char",    self.context_word.len(),  self.context_char.len()),
        ];
        for (side, granularity, words, subtokens) in groups {
            if words != subtokens {
                return Err(SampleError::Misaligned {
                    id: self.id.clone(),
                    side,
                    granularity,
                    words,
                    subtokens,
                });
            }
        }

        if let Some([start, end]) = self.answer {
            let len = self.context_len();
            if start > end || end >= len {
                return Err(SampleError::AnswerOutOfRange { id: self.id.clone(), start, end, len });
            }
            for (boundary, position) in [("start", start), ("end", end)] {
                if self.context_word[position] == 0 {
                    return Err(SampleError::AnswerOnPadding { id: self.id.clone(), boundary, position });
                }
            }
        }
        Ok(())
    }

    /// Check that no id reaches past its vocabulary.
    pub fn check_vocab(&self, vocab: &VocabSizes) -> Result<(), SampleError> {
        let words = [("question", &self.question_word), ("context", &self.context_word)];
        for (side, ids) in words {
            self.check_ids(side, "word", ids.iter(), vocab.word)?;
        }

        let groups = [
            ("question", "subword", &self.question_subword, vocab.subword),
            ("question", "char",    &self.question_char,    vocab.char),
            ("context",  "subword", &self.context_subword,  vocab.subword),
            ("context",  "char",    &self.context_char,     vocab.char),
        ];
        for (side, granularity, ids, vocab_size) in groups {
            self.check_ids(side, granularity, ids.iter().flatten(), vocab_size)?;
        }
        Ok(())
    }

    fn check_ids<'a>(
        &self,
        side:        &'static str,
        granularity: &'static str,
        mut ids:     impl Iterator<Item = &'a u32>,
        vocab_size:  usize,
    ) -> Result<(), SampleError> {
        match ids.find(|&&token| token as usize >= vocab_size) {
            Some(&token) => Err(SampleError::OutOfVocabulary {
                id: self.id.clone(),
                side,
                granularity,
                token,
                vocab_size,
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_fixture(id: &str, question_len: usize, context_len: usize) -> RcSample {
    let words = |n: usize, base: u32| (0..n as u32).map(|i| base + i).collect::<Vec<_>>();
    let groups = |n: usize, base: u32| {
        (0..n as u32).map(|i| vec![base + i, base + i + 1]).collect::<Vec<_>>()
    };
    RcSample {
        id:               id.to_string(),
        question_word:    words(question_len, 1),
        question_subword: groups(question_len, 1),
        question_char:    groups(question_len, 1),
        context_word:     words(context_len, 1),
        context_subword:  groups(context_len, 1),
        context_char:     groups(context_len, 1),
        answer:           Some([0, context_len.saturating_sub(1).min(1)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_sample_passes() {
        assert!(sample_fixture("a", 3, 5).validate().is_ok());
    }

    #[test]
    fn test_misaligned_char_groups_are_reported() {
        let mut s = sample_fixture("b", 3, 5);
        s.context_char.pop();
        assert_eq!(
            s.validate(),
            Err(SampleError::Misaligned {
                id: "b".into(),
                side: "context",
                granularity: "char",
                words: 5,
                subtokens: 4,
            })
        );
    }

    #[test]
    fn test_answer_outside_context_is_rejected() {
        let mut s = sample_fixture("c", 2, 4);
        s.answer = Some([2, 4]);
        assert!(matches!(s.validate(), Err(SampleError::AnswerOutOfRange { .. })));
        s.answer = Some([3, 2]);
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_answer_on_padding_id_is_rejected() {
        let mut s = sample_fixture("d", 2, 4);
        s.answer = Some([1, 2]);
        s.context_word[2] = 0;
        assert_eq!(
            s.validate(),
            Err(SampleError::AnswerOnPadding { id: "d".into(), boundary: "end", position: 2 })
        );

        // Padding elsewhere in the context is fine.
        s.answer = Some([0, 1]);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_ids_past_the_vocabulary_are_rejected() {
        let s = sample_fixture("e", 2, 4);
        let vocab = VocabSizes { word: 16, subword: 16, char: 16 };
        assert!(s.check_vocab(&vocab).is_ok());

        // The fixture's largest char id is context_len + 1.
        let small = VocabSizes { char: 5, ..vocab };
        assert_eq!(
            s.check_vocab(&small),
            Err(SampleError::OutOfVocabulary {
                id: "e".into(),
                side: "context",
                granularity: "char",
                token: 5,
                vocab_size: 5,
            })
        );
    }

    #[test]
    fn test_unlabelled_sample_deserialises() {
        let json = r#"{"id":"q1","question_word":[5],"question_subword":[[5]],"question_char":[[1,2]],
                       "context_word":[7,8],"context_subword":[[7],[8]],"context_char":[[3],[4]]}"#;
        let s: RcSample = serde_json::from_str(json).unwrap();
        assert_eq!(s.answer, None);
        assert!(s.validate().is_ok());
    }
}
