use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use anyhow::bail;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Classification, LanguageClassifier};
use crate::{core::error::LoadError, language::Language, orchestrator::Loadable};

const STOP_WORDS: &[(Language, &[&str])] = &[
    (
        Language::English,
        &["the", "and", "is", "of", "to", "in", "that", "it", "with", "for", "this", "you", "are", "was", "have"],
    ),
    (
        Language::French,
        &["le", "la", "les", "et", "est", "des", "une", "un", "dans", "que", "pour", "pas", "qui", "sur", "avec"],
    ),
    (
        Language::German,
        &["der", "die", "das", "und", "ist", "nicht", "ein", "eine", "mit", "ich", "sie", "zu", "auf", "auch", "sich"],
    ),
    (
        Language::Spanish,
        &["el", "los", "las", "es", "del", "una", "por", "con", "para", "que", "pero", "como", "muy", "está", "y"],
    ),
    (
        Language::Portuguese,
        &["o", "os", "uma", "não", "com", "para", "que", "do", "da", "em", "são", "mas", "você", "isso", "está"],
    ),
    (
        Language::Italian,
        &["il", "gli", "della", "che", "non", "è", "per", "una", "sono", "con", "ma", "questo", "anche", "di", "lo"],
    ),
    (
        Language::Dutch,
        &["de", "het", "een", "en", "van", "niet", "ik", "dat", "zijn", "met", "voor", "op", "ook", "maar", "wij"],
    ),
    (
        Language::Swedish,
        &["och", "att", "det", "är", "som", "inte", "jag", "en", "på", "för", "med", "har", "av", "till", "om"],
    ),
    (
        Language::Norwegian,
        &["og", "ikke", "det", "er", "jeg", "som", "på", "en", "til", "med", "har", "av", "for", "å", "hun"],
    ),
    (
        Language::Danish,
        &["og", "ikke", "det", "er", "jeg", "som", "på", "en", "til", "med", "har", "af", "for", "at", "hun"],
    ),
];

const LETTER_HINTS: &[(char, Language)] = &[
    ('ß', Language::German),
    ('ñ', Language::Spanish),
    ('¿', Language::Spanish),
    ('ã', Language::Portuguese),
    ('õ', Language::Portuguese),
    ('ç', Language::French),
    ('œ', Language::French),
    ('ø', Language::Danish),
    ('ø', Language::Norwegian),
    ('æ', Language::Danish),
    ('æ', Language::Norwegian),
    ('å', Language::Swedish),
    ('ä', Language::Swedish),
    ('ö', Language::Swedish),
    ('ä', Language::German),
    ('ö', Language::German),
    ('ü', Language::German),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Script {
    Latin,
    Cyrillic,
    Han,
    Kana,
    Hangul,
}

fn script_of(ch: char) -> Option<Script> {
    match ch as u32 {
        0x3040..=0x30FF | 0x31F0..=0x31FF | 0xFF66..=0xFF9D => Some(Script::Kana),
        0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF => Some(Script::Han),
        0x1100..=0x11FF | 0x3130..=0x318F | 0xAC00..=0xD7AF => Some(Script::Hangul),
        0x0400..=0x04FF => Some(Script::Cyrillic),
        _ if ch.is_ascii_alphabetic() => Some(Script::Latin),
        0x00C0..=0x024F if ch.is_alphabetic() => Some(Script::Latin),
        _ => None,
    }
}

#[derive(Default)]
pub struct ScriptClassifier {
    loaded: AtomicBool,
}

impl ScriptClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(text: &str) -> Option<Classification> {
        let mut scripts: HashMap<Script, usize> = HashMap::new();
        for script in text.chars().filter_map(script_of) {
            *scripts.entry(script).or_default() += 1;
        }
        let count = |script: Script| scripts.get(&script).copied().unwrap_or(0) as f32;

        // kana only shows up in Japanese, which also borrows Han characters
        let japanese = if count(Script::Kana) > 0.0 {
            count(Script::Kana) + count(Script::Han)
        } else {
            0.0
        };
        let chinese = if japanese > 0.0 { 0.0 } else { count(Script::Han) };

        let mut scores = vec![
            (Language::Japanese, japanese),
            (Language::Chinese, chinese),
            (Language::Korean, count(Script::Hangul)),
            (Language::Russian, count(Script::Cyrillic)),
        ];

        let latin = count(Script::Latin);
        if latin > 0.0 {
            let lowered = text.to_lowercase();
            let words: Vec<&str> = lowered
                .split(|ch: char| !ch.is_alphabetic())
                .filter(|word| !word.is_empty())
                .collect();
            let mut latin_scores: HashMap<Language, f32> = HashMap::new();
            for (language, stop_words) in STOP_WORDS {
                let hits = words.iter().filter(|word| stop_words.contains(*word)).count();
                if hits > 0 {
                    *latin_scores.entry(*language).or_default() += hits as f32;
                }
            }
            for (letter, language) in LETTER_HINTS {
                let hits = lowered.matches(*letter).count();
                if hits > 0 {
                    *latin_scores.entry(*language).or_default() += 0.5 * hits as f32;
                }
            }
            let total: f32 = latin_scores.values().sum();
            if total > 0.0 {
                // the Latin share of the text is split by stop-word evidence
                scores.extend(
                    latin_scores
                        .into_iter()
                        .map(|(language, score)| (language, latin * score / total)),
                );
            }
        }

        Classification::from_scores(scores)
    }
}

#[async_trait]
impl Loadable for ScriptClassifier {
    async fn load_required(
        &self,
        _model: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<(), LoadError> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        self.loaded.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl LanguageClassifier for ScriptClassifier {
    async fn classify(
        &self,
        text: &str,
        _cancel: &CancellationToken,
    ) -> anyhow::Result<Classification> {
        if text.trim().is_empty() {
            bail!("no text to classify");
        }
        match Self::score(text) {
            Some(classification) => Ok(classification),
            None => bail!("could not determine the language of the text"),
        }
    }
}
