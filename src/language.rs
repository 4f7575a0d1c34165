use std::{fmt, str::FromStr};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    English,
    French,
    German,
    Spanish,
    Chinese,
    Japanese,
    Korean,
    Portuguese,
    Italian,
    Dutch,
    Russian,
    Swedish,
    Norwegian,
    Danish,
}

impl Language {
    pub const ALL: [Language; 14] = [
        Language::English,
        Language::French,
        Language::German,
        Language::Spanish,
        Language::Chinese,
        Language::Japanese,
        Language::Korean,
        Language::Portuguese,
        Language::Italian,
        Language::Dutch,
        Language::Russian,
        Language::Swedish,
        Language::Norwegian,
        Language::Danish,
    ];

    /// ISO 639-1 code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::French => "fr",
            Language::German => "de",
            Language::Spanish => "es",
            Language::Chinese => "zh",
            Language::Japanese => "ja",
            Language::Korean => "ko",
            Language::Portuguese => "pt",
            Language::Italian => "it",
            Language::Dutch => "nl",
            Language::Russian => "ru",
            Language::Swedish => "sv",
            Language::Norwegian => "no",
            Language::Danish => "da",
        }
    }

    #[must_use]
    pub fn tesseract_code(&self) -> &'static str {
        match self {
            Language::English => "eng",
            Language::French => "fra",
            Language::German => "deu",
            Language::Spanish => "spa",
            Language::Chinese => "chi_sim",
            Language::Japanese => "jpn",
            Language::Korean => "kor",
            Language::Portuguese => "por",
            Language::Italian => "ita",
            Language::Dutch => "nld",
            Language::Russian => "rus",
            Language::Swedish => "swe",
            Language::Norwegian => "nor",
            Language::Danish => "dan",
        }
    }

    /// FLORES-200 code used by NLLB models.
    #[must_use]
    pub fn nllb_code(&self) -> &'static str {
        match self {
            Language::English => "eng_Latn",
            Language::French => "fra_Latn",
            Language::German => "deu_Latn",
            Language::Spanish => "spa_Latn",
            Language::Chinese => "zho_Hans",
            Language::Japanese => "jpn_Jpan",
            Language::Korean => "kor_Hang",
            Language::Portuguese => "por_Latn",
            Language::Italian => "ita_Latn",
            Language::Dutch => "nld_Latn",
            Language::Russian => "rus_Cyrl",
            Language::Swedish => "swe_Latn",
            Language::Norwegian => "nob_Latn",
            Language::Danish => "dan_Latn",
        }
    }

    #[must_use]
    pub fn kokoro_voice(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Language::English => Some(("en-us", "af_heart")),
            Language::French => Some(("fr-fr", "ff_siwis")),
            Language::Spanish => Some(("es", "ef_dora")),
            Language::Italian => Some(("it", "if_sara")),
            Language::Portuguese => Some(("pt-br", "pf_dora")),
            Language::Japanese => Some(("ja", "jf_alpha")),
            Language::Chinese => Some(("cmn", "zf_xiaobei")),
            _ => None,
        }
    }

    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|language| {
            language.code() == code
                || language.tesseract_code() == code
                || language.nllb_code().eq_ignore_ascii_case(&code)
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::French => "French",
            Language::German => "German",
            Language::Spanish => "Spanish",
            Language::Chinese => "Chinese",
            Language::Japanese => "Japanese",
            Language::Korean => "Korean",
            Language::Portuguese => "Portuguese",
            Language::Italian => "Italian",
            Language::Dutch => "Dutch",
            Language::Russian => "Russian",
            Language::Swedish => "Swedish",
            Language::Norwegian => "Norwegian",
            Language::Danish => "Danish",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_code(value)
            .or_else(|| {
                Self::ALL
                    .into_iter()
                    .find(|language| language.name().eq_ignore_ascii_case(value.trim()))
            })
            .ok_or_else(|| anyhow!("unsupported language `{value}`"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes_and_names() {
        assert_eq!("fr".parse::<Language>().unwrap(), Language::French);
        assert_eq!("deu".parse::<Language>().unwrap(), Language::German);
        assert_eq!("zho_Hans".parse::<Language>().unwrap(), Language::Chinese);
        assert_eq!("Norwegian".parse::<Language>().unwrap(), Language::Norwegian);
        assert!("klingon".parse::<Language>().is_err());
    }

    #[test]
    fn every_language_has_translation_and_ocr_codes() {
        for language in Language::ALL {
            assert!(language.nllb_code().contains('_'));
            assert!(language.tesseract_code().len() >= 3);
            assert_eq!(Language::from_code(language.code()), Some(language));
        }
    }
}
