// Copyright 2019 Guillaume Becquin
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Toy corpus and whitespace vocabulary
//! Sentences are lower-cased, stripped from `. , ! ? -` and split on whitespace. The four special
//! tokens occupy the first ids, followed by the corpus words in order of first appearance.

use crate::MiniBertError;
use std::collections::HashMap;

/// Six-line dialogue used for the pre-training demonstration
pub const TOY_CORPUS: &str = "Hello, how are you? I am Romeo.\n\
Hello, Romeo My name is Juliet. Nice to meet you.\n\
Nice meet you too. How are you today?\n\
Great. My baseball team won the competition.\n\
Oh Congratulations, Juliet\n\
Thanks you Romeo";

pub const PAD_TOKEN: &str = "[PAD]";
pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const MASK_TOKEN: &str = "[MASK]";

pub const PAD_ID: i64 = 0;
pub const CLS_ID: i64 = 1;
pub const SEP_ID: i64 = 2;
pub const MASK_ID: i64 = 3;

/// Number of special tokens placed before the corpus words
pub const NUM_SPECIAL_TOKENS: i64 = 4;

fn clean_sentence(line: &str) -> String {
    line.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '.' | ',' | '!' | '?' | '-'))
        .collect()
}

#[derive(Debug, Clone)]
/// # Whitespace vocabulary built from a corpus
pub struct Vocabulary {
    token_to_id: HashMap<String, i64>,
    id_to_token: Vec<String>,
    sentences: Vec<String>,
}

impl Vocabulary {
    /// Builds the vocabulary from a newline-separated corpus.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use mini_bert::pretraining::{Vocabulary, TOY_CORPUS};
    ///
    /// let vocab = Vocabulary::from_text(TOY_CORPUS);
    /// assert_eq!(vocab.len(), 29);
    /// ```
    pub fn from_text(text: &str) -> Vocabulary {
        let sentences: Vec<String> = text
            .lines()
            .map(clean_sentence)
            .filter(|sentence| !sentence.trim().is_empty())
            .collect();

        let mut id_to_token: Vec<String> = [PAD_TOKEN, CLS_TOKEN, SEP_TOKEN, MASK_TOKEN]
            .iter()
            .map(|token| token.to_string())
            .collect();
        let mut token_to_id: HashMap<String, i64> = id_to_token
            .iter()
            .enumerate()
            .map(|(id, token)| (token.clone(), id as i64))
            .collect();

        for word in sentences.iter().flat_map(|s| s.split_whitespace()) {
            if !token_to_id.contains_key(word) {
                token_to_id.insert(word.to_string(), id_to_token.len() as i64);
                id_to_token.push(word.to_string());
            }
        }

        Vocabulary {
            token_to_id,
            id_to_token,
            sentences,
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_token.is_empty()
    }

    pub fn token_to_id(&self, token: &str) -> Option<i64> {
        self.token_to_id.get(token).copied()
    }

    pub fn id_to_token(&self, id: i64) -> Option<&str> {
        if id < 0 {
            return None;
        }
        self.id_to_token.get(id as usize).map(String::as_str)
    }

    /// Cleaned corpus sentences
    pub fn sentences(&self) -> &[String] {
        &self.sentences
    }

    /// Encodes a sentence after applying the corpus cleaning rules.
    pub fn encode(&self, sentence: &str) -> Result<Vec<i64>, MiniBertError> {
        clean_sentence(sentence)
            .split_whitespace()
            .map(|word| {
                self.token_to_id(word).ok_or_else(|| {
                    MiniBertError::ValueError(format!("Word `{}` is not in the vocabulary", word))
                })
            })
            .collect()
    }

    /// Decodes ids into tokens, skipping padding.
    pub fn decode(&self, ids: &[i64]) -> Result<Vec<String>, MiniBertError> {
        ids.iter()
            .filter(|&&id| id != PAD_ID)
            .map(|&id| {
                self.id_to_token(id)
                    .map(str::to_string)
                    .ok_or_else(|| MiniBertError::ValueError(format!("Unknown token id {}", id)))
            })
            .collect()
    }

    /// Every corpus sentence as a sequence of token ids.
    pub fn encoded_sentences(&self) -> Vec<Vec<i64>> {
        self.sentences
            .iter()
            .map(|sentence| {
                sentence
                    .split_whitespace()
                    .filter_map(|word| self.token_to_id(word))
                    .collect()
            })
            .collect()
    }
}
