//! Text normalization shared by the index write path and query parsing.
//! Deterministic and stateless: the same input always yields the same
//! `(term, position)` sequence, which is what makes a query term find the
//! string stored in the postings.

use crate::config::Language;
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref TOKEN_RE: Regex = Regex::new(r"(?u)\p{L}[\p{L}\p{N}_']*").expect("valid regex");
    static ref STOP_EN: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","her","here","hers","herself","him","himself","his","how",
            "i","if","in","into","is","isn't","it","its","itself",
            "me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","should","shouldn't","so","some","such",
            "than","that","the","their","theirs","them","themselves","then","there","these","they","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","were","weren't","what","when","where","which","while","who","whom","why","with","won't","would","wouldn't",
            "you","your","yours","yourself","yourselves",
        ];
        words.iter().copied().collect()
    };
    static ref STOP_SV: HashSet<&'static str> = {
        let words: &[&str] = &[
            "alla","att","av","blev","bli","blir","de","dem","den","denna","deras","dess","det","detta","du","där","då",
            "efter","ej","eller","en","er","era","ett","från","för","ha","hade","han","hans","har","henne","hennes","hon",
            "hur","här","i","icke","ingen","inom","inte","jag","ju","kan","kunde","man","med","mellan","men","mig","min",
            "mina","mitt","mot","mycket","ni","nu","när","någon","något","några","och","om","oss","på","samma","sedan",
            "sig","sin","sina","sitta","skulle","som","så","sådan","till","under","upp","ut","utan","vad","var","vara",
            "varför","varje","vars","vem","vi","vid","vilken","än","är","åt","över",
        ];
        words.iter().copied().collect()
    };
}

/// Locale-aware tokenizer: NFKC fold, lowercase, stop-word removal, Snowball
/// stemming. Positions index the emitted term sequence and are strictly
/// increasing.
pub struct Normalizer {
    stemmer: Stemmer,
    stopwords: &'static HashSet<&'static str>,
    language: Language,
}

impl Normalizer {
    pub fn new(language: Language) -> Self {
        let (algorithm, stopwords): (Algorithm, &'static HashSet<&'static str>) = match language {
            Language::English => (Algorithm::English, &STOP_EN),
            Language::Swedish => (Algorithm::Swedish, &STOP_SV),
        };
        Self {
            stemmer: Stemmer::create(algorithm),
            stopwords,
            language,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn normalize(&self, text: &str) -> Vec<(String, u32)> {
        let folded = text.nfkc().collect::<String>().to_lowercase();
        let mut terms = Vec::new();
        let mut pos: u32 = 0;
        for mat in TOKEN_RE.find_iter(&folded) {
            let token = mat.as_str();
            // "runner's" -> "runner"; stray apostrophes around the token go too.
            let token = token.strip_suffix("'s").unwrap_or(token).trim_matches('\'');
            if token.is_empty() || self.stopwords.contains(token) {
                continue;
            }
            let stem = self.stemmer.stem(token).to_string();
            terms.push((stem, pos));
            pos += 1;
        }
        terms
    }

    /// Token count before stop-word filtering, recorded on documents as
    /// `raw_term_count`.
    pub fn raw_token_count(&self, text: &str) -> u32 {
        let folded = text.nfkc().collect::<String>().to_lowercase();
        TOKEN_RE.find_iter(&folded).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stems_and_lowercases() {
        let n = Normalizer::new(Language::English);
        let terms = n.normalize("Running, runner's RUN!");
        assert!(terms.iter().all(|(w, _)| w == "run" || w == "runner"));
        assert!(terms.iter().any(|(w, _)| w == "run"));
    }

    #[test]
    fn folds_unicode() {
        let n = Normalizer::new(Language::English);
        let terms = n.normalize("the café menu");
        assert!(terms.iter().any(|(w, _)| w == "cafe" || w == "café"));
    }

    #[test]
    fn filters_stopwords_and_keeps_positions_increasing() {
        let n = Normalizer::new(Language::English);
        let terms = n.normalize("the quick brown fox and the lazy dog");
        let words: Vec<&str> = terms.iter().map(|(w, _)| w.as_str()).collect();
        assert!(!words.contains(&"the"));
        assert!(!words.contains(&"and"));
        let positions: Vec<u32> = terms.iter().map(|(_, p)| *p).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn swedish_stopwords_and_stemmer() {
        let n = Normalizer::new(Language::Swedish);
        let terms = n.normalize("universiteten i Stockholm och Uppsala");
        let words: Vec<&str> = terms.iter().map(|(w, _)| w.as_str()).collect();
        assert!(!words.contains(&"och"));
        assert!(!words.contains(&"i"));
        // "universiteten" (definite plural) stems to the same base as "universitet".
        let base = n.normalize("universitet");
        assert_eq!(words[0], base[0].0);
    }

    #[test]
    fn deterministic_across_calls() {
        let n = Normalizer::new(Language::English);
        let text = "Determinism is the correctness backbone of retrieval.";
        assert_eq!(n.normalize(text), n.normalize(text));
    }

    #[test]
    fn splits_hyphenated_compounds() {
        let n = Normalizer::new(Language::Swedish);
        let terms = n.normalize("e-post");
        assert_eq!(terms.len(), 2);
    }
}
