//! Text reduction applied before a post is sent to the annotator.

use std::collections::HashSet;

use regex::Regex;

use crate::error::Result;

const STOP_WORDS: &[&str] = &[
    "내용", "이번", "경우", "통해", "대한", "위해", "관련", "정도", "이후", "사실", "생각", "사용",
    "진행", "확인", "작업", "부분", "기존", "기능", "방식", "설정", "방법", "하나", "단어", "단락",
    "문장", "블로그", "포스팅", "주소", "댓글", "감사합니다", "참고", "링크", "아래", "다음",
    "그리고", "하지만", "또한", "매우", "그냥", "어떤", "지금", "오늘", "매일", "진짜", "역시",
    "항상", "종종", "한번",
];

/// Fraction of sentences kept, shortest first.
const KEEP_RATIO: f64 = 0.5;

pub struct Preprocessor {
    sentence_end: Regex,
    url: Regex,
    disallowed: Regex,
    stop_words: HashSet<&'static str>,
}

impl Preprocessor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            sentence_end: Regex::new(r"[.?!]\s+").map_err(anyhow::Error::from)?,
            url: Regex::new(r"https?://\S+|www\.\S+").map_err(anyhow::Error::from)?,
            disallowed: Regex::new(r"[^가-힣a-zA-Z0-9\s.?!]").map_err(anyhow::Error::from)?,
            stop_words: STOP_WORDS.iter().copied().collect(),
        })
    }

    /// Split at sentence punctuation followed by whitespace. The punctuation
    /// stays with its sentence.
    pub fn split_sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let mut sentences = Vec::new();
        let mut start = 0;
        for m in self.sentence_end.find_iter(text) {
            sentences.push(text[start..m.start() + 1].trim());
            start = m.end();
        }
        sentences.push(text[start..].trim());
        sentences.retain(|s| !s.is_empty());
        sentences
    }

    pub fn clean_sentence(&self, sentence: &str) -> String {
        let without_urls = self.url.replace_all(sentence, " ");
        let allowed = self.disallowed.replace_all(&without_urls, " ");
        allowed
            .split_whitespace()
            .filter(|token| token.chars().count() >= 2 && !self.stop_words.contains(token))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Keep the shortest half of the sentences (at least one), clean each
    /// and join the non-empty results.
    pub fn prepare(&self, raw: &str) -> String {
        let mut sentences = self.split_sentences(raw);
        if sentences.is_empty() {
            return String::new();
        }

        sentences.sort_by_key(|s| s.chars().count());
        let keep = ((sentences.len() as f64 * KEEP_RATIO) as usize).max(1);

        sentences
            .into_iter()
            .take(keep)
            .map(|s| self.clean_sentence(s))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
