//! Vocabulary construction: token-to-id mapping, subsampling table, and
//! subword-ngram hashing.
//!
//! Grounded on `original_source/src/dictionary.cc`.

use rand::Rng;

use tempovec_core::{TempovecError, HASH_OFFSET_BASIS, HASH_PRIME, MAX_VOCAB_SIZE};

use crate::args::{Args, ModelKind};
use crate::corpus::{self, ByteCursor, FlagTime};

pub const EOS: &str = "</s>";
pub const BOW: &str = "<";
pub const EOW: &str = ">";
pub const EMPTY: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Word,
    Label,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub word: String,
    pub count: i64,
    pub kind: EntryKind,
    pub subwords: Vec<i32>,
}

/// One merged time-stamp group within a record: all tokens whose
/// timestamps rounded to the same time-unit index.
#[derive(Debug, Clone)]
pub struct TimeGroup {
    pub time: i64,
    pub words_id: Vec<i32>,
}

/// FNV-1a-style hash with the constants the source uses.
pub fn hash(s: &str) -> u32 {
    let mut h: u32 = HASH_OFFSET_BASIS;
    for b in s.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(HASH_PRIME);
    }
    h
}

pub struct Dictionary {
    word2int: Vec<i32>,
    words: Vec<Entry>,
    pdiscard: Vec<f32>,
    size: usize,
    nwords: usize,
    nlabels: usize,
    ntokens: i64,
    label: String,
    t: f64,
    bucket: usize,
    minn: usize,
    maxn: usize,
    model: ModelKind,
}

impl Dictionary {
    pub fn new(args: &Args) -> Self {
        Self {
            word2int: vec![EMPTY; MAX_VOCAB_SIZE],
            words: Vec::new(),
            pdiscard: Vec::new(),
            size: 0,
            nwords: 0,
            nlabels: 0,
            ntokens: 0,
            label: args.label.clone(),
            t: args.t,
            bucket: args.bucket,
            minn: args.minn,
            maxn: args.maxn,
            model: args.model,
        }
    }

    pub fn nwords(&self) -> usize {
        self.nwords
    }

    pub fn nlabels(&self) -> usize {
        self.nlabels
    }

    pub fn ntokens(&self) -> i64 {
        self.ntokens
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn find(&self, w: &str) -> usize {
        let mut h = (hash(w) as usize) % MAX_VOCAB_SIZE;
        while self.word2int[h] != EMPTY && self.words[self.word2int[h] as usize].word != w {
            h = (h + 1) % MAX_VOCAB_SIZE;
        }
        h
    }

    pub fn add(&mut self, w: &str) {
        let h = self.find(w);
        self.ntokens += 1;
        if self.word2int[h] == EMPTY {
            let kind = if w.starts_with(self.label.as_str()) {
                EntryKind::Label
            } else {
                EntryKind::Word
            };
            self.words.push(Entry {
                word: w.to_string(),
                count: 1,
                kind,
                subwords: Vec::new(),
            });
            self.word2int[h] = self.size as i32;
            self.size += 1;
        } else {
            self.words[self.word2int[h] as usize].count += 1;
        }
    }

    pub fn get_id(&self, w: &str) -> i32 {
        self.word2int[self.find(w)]
    }

    pub fn get_type(&self, id: i32) -> EntryKind {
        self.words[id as usize].kind
    }

    pub fn get_word(&self, id: i32) -> &str {
        &self.words[id as usize].word
    }

    pub fn get_label(&self, lid: i32) -> &str {
        &self.words[lid as usize + self.nwords].word
    }

    pub fn get_ngrams(&self, id: i32) -> &[i32] {
        &self.words[id as usize].subwords
    }

    pub fn get_ngrams_for_word(&self, word: &str) -> Vec<i32> {
        let id = self.get_id(word);
        if id >= 0 {
            return self.get_ngrams(id).to_vec();
        }
        let mut ngrams = Vec::new();
        self.compute_ngrams(&format!("{BOW}{word}{EOW}"), &mut ngrams);
        ngrams
    }

    pub fn get_counts(&self, kind: EntryKind) -> Vec<i64> {
        self.words.iter().filter(|w| w.kind == kind).map(|w| w.count).collect()
    }

    /// `discard(id, u)`: true iff `u > pdiscard[id]`. Always false in
    /// supervised mode (subsampling is disabled there).
    pub fn discard(&self, id: i32, u: f64) -> bool {
        if self.model == ModelKind::Sup {
            return false;
        }
        u > self.pdiscard[id as usize] as f64
    }

    /// Every UTF-8-safe contiguous byte substring of length `n` in
    /// `[minn, maxn]` starting at a non-continuation byte, excluding
    /// length-1 substrings that touch either boundary of `word`.
    pub fn compute_ngrams(&self, word: &str, ngrams: &mut Vec<i32>) {
        let bytes = word.as_bytes();
        let len = bytes.len();
        for i in 0..len {
            if (bytes[i] & 0xC0) == 0x80 {
                continue;
            }
            let mut j = i;
            let mut n = 1usize;
            let mut ngram: Vec<u8> = Vec::new();
            while j < len && n <= self.maxn {
                ngram.push(bytes[j]);
                j += 1;
                while j < len && (bytes[j] & 0xC0) == 0x80 {
                    ngram.push(bytes[j]);
                    j += 1;
                }
                if n >= self.minn && !(n == 1 && (i == 0 || j == len)) {
                    let ngram_str = String::from_utf8_lossy(&ngram);
                    let h = (hash(&ngram_str) as usize) % self.bucket;
                    ngrams.push(self.nwords as i32 + h as i32);
                }
                n += 1;
            }
        }
    }

    fn init_ngrams(&mut self) {
        for i in 0..self.size {
            let framed = format!("{BOW}{}{EOW}", self.words[i].word);
            let mut subwords = vec![i as i32];
            self.compute_ngrams(&framed, &mut subwords);
            self.words[i].subwords = subwords;
        }
    }

    fn init_table_discard(&mut self) {
        self.pdiscard = vec![0.0; self.size];
        for i in 0..self.size {
            let f = self.words[i].count as f64 / self.ntokens as f64;
            self.pdiscard[i] = (self.t / f).sqrt() as f32 + (self.t / f) as f32;
        }
    }

    /// Sorts by (kind asc, count desc), drops entries below the threshold
    /// for their kind, and rebuilds the hash table from scratch.
    pub fn threshold(&mut self, min_count: i64, min_count_label: i64) {
        self.words.sort_by(|a, b| {
            let kind_a = a.kind == EntryKind::Label;
            let kind_b = b.kind == EntryKind::Label;
            kind_a.cmp(&kind_b).then(b.count.cmp(&a.count))
        });
        self.words.retain(|e| match e.kind {
            EntryKind::Word => e.count >= min_count,
            EntryKind::Label => e.count >= min_count_label,
        });
        self.word2int.iter_mut().for_each(|x| *x = EMPTY);
        self.size = 0;
        self.nwords = 0;
        self.nlabels = 0;
        for i in 0..self.words.len() {
            let h = self.find(&self.words[i].word.clone());
            self.word2int[h] = self.size as i32;
            self.size += 1;
            match self.words[i].kind {
                EntryKind::Word => self.nwords += 1,
                EntryKind::Label => self.nlabels += 1,
            }
        }
    }

    /// Streams the whole corpus once, building the vocabulary. Applies a
    /// rising re-threshold at 75% load, then the final `(minCount,
    /// minCountLabel)` threshold, then builds the discard table and ngrams.
    pub fn read_from_file(
        &mut self,
        reader: impl std::io::Read,
        min_count: i64,
        min_count_label: i64,
        verbose: i32,
    ) -> Result<(), TempovecError> {
        let mut cursor = ByteCursor::new(reader);
        let mut brackets = 0i32;
        let mut min_threshold = 1i64;
        while let Some(word) = corpus::read_word(&mut cursor, &mut brackets)
            .map_err(|e| TempovecError::io("corpus", e.to_string()))?
        {
            self.add(&word);
            if self.size as f64 > 0.75 * MAX_VOCAB_SIZE as f64 {
                min_threshold += 1;
                self.threshold(min_threshold, min_threshold);
            }
        }
        self.threshold(min_count, min_count_label);
        self.init_table_discard();
        self.init_ngrams();
        if verbose > 0 {
            eprintln!(
                "read {}M tokens, {} words, {} labels",
                self.ntokens / 1_000_000,
                self.nwords,
                self.nlabels
            );
        }
        if self.size == 0 {
            return Err(TempovecError::data(
                "empty vocabulary; try a smaller -minCount value",
            ));
        }
        Ok(())
    }

    /// Classical (non-temporal) line reader, shared by the retained
    /// skipgram/cbow/supervised loss toolkit.
    pub fn get_line(
        &self,
        cursor: &mut ByteCursor<impl std::io::Read>,
        rng: &mut impl Rng,
    ) -> std::io::Result<(i32, Vec<i32>, Vec<i32>)> {
        let mut words = Vec::new();
        let mut labels = Vec::new();
        let mut ntokens = 0i32;
        let mut brackets = 0i32;
        while let Some(token) = corpus::read_word(cursor, &mut brackets)? {
            let wid = self.get_id(&token);
            if wid < 0 {
                if token == EOS {
                    break;
                }
                continue;
            }
            let kind = self.get_type(wid);
            ntokens += 1;
            let u: f64 = rng.random_range(0.0..1.0);
            if kind == EntryKind::Word && !self.discard(wid, u) {
                words.push(wid);
            }
            if kind == EntryKind::Label {
                labels.push(wid - self.nwords as i32);
            }
            if words.len() > tempovec_core::MAX_LINE_SIZE && self.model != ModelKind::Sup {
                break;
            }
            if token == EOS {
                break;
            }
        }
        Ok((ntokens, words, labels))
    }

    /// `seconds_per_unit` conversion of two Unix-second timestamp strings
    /// to a rounded time-unit distance.
    pub fn time_convert(begin: &str, current: &str, seconds_per_unit: i64) -> i64 {
        let b: f64 = begin.parse().unwrap_or(0.0);
        let c: f64 = current.parse().unwrap_or(0.0);
        (((c - b) / seconds_per_unit as f64) + 0.5).floor() as i64
    }

    /// Time-aware line reader: produces an ordered list of merged
    /// `TimeGroup`s for one record.
    pub fn get_line_context(
        &self,
        cursor: &mut ByteCursor<impl std::io::Read>,
        rng: &mut impl Rng,
        seconds_per_unit: i64,
    ) -> std::io::Result<(i32, Vec<TimeGroup>, Vec<i32>)> {
        let mut words_time: Vec<TimeGroup> = Vec::new();
        let mut labels = Vec::new();
        let mut ntokens = 0i32;
        let mut brackets = 0i32;
        let mut current = TimeGroup {
            time: -1,
            words_id: Vec::new(),
        };
        let mut begin_time = String::new();

        while let Some((token, flag)) = corpus::read_word_time(cursor, &mut brackets)? {
            if flag == FlagTime::Time {
                if current.time == -1 {
                    begin_time = token;
                    current.time = 0;
                } else {
                    let token_time = Self::time_convert(&begin_time, &token, seconds_per_unit);
                    if current.time == token_time {
                        continue;
                    }
                    words_time.push(TimeGroup {
                        time: current.time,
                        words_id: std::mem::take(&mut current.words_id),
                    });
                    current.time = token_time;
                }
                continue;
            }

            let wid = self.get_id(&token);
            if wid < 0 {
                if token == EOS {
                    words_time.push(TimeGroup {
                        time: current.time,
                        words_id: std::mem::take(&mut current.words_id),
                    });
                    break;
                }
                continue;
            }
            let kind = self.get_type(wid);
            ntokens += 1;
            let u: f64 = rng.random_range(0.0..1.0);
            if kind == EntryKind::Word && !self.discard(wid, u) {
                current.words_id.push(wid);
            }
            if kind == EntryKind::Label {
                labels.push(wid - self.nwords as i32);
            }
            if words_time.len() > tempovec_core::MAX_LINE_SIZE && self.model != ModelKind::Sup {
                break;
            }
            if token == EOS {
                words_time.push(TimeGroup {
                    time: current.time,
                    words_id: std::mem::take(&mut current.words_id),
                });
                break;
            }
        }
        Ok((ntokens, words_time, labels))
    }

    pub fn save<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_all(&(self.size as i32).to_le_bytes())?;
        out.write_all(&(self.nwords as i32).to_le_bytes())?;
        out.write_all(&(self.nlabels as i32).to_le_bytes())?;
        out.write_all(&self.ntokens.to_le_bytes())?;
        for e in &self.words {
            out.write_all(e.word.as_bytes())?;
            out.write_all(&[0u8])?;
            out.write_all(&e.count.to_le_bytes())?;
            let kind_byte: u8 = match e.kind {
                EntryKind::Word => 0,
                EntryKind::Label => 1,
            };
            out.write_all(&[kind_byte])?;
        }
        Ok(())
    }

    pub fn load<R: std::io::Read>(args: &Args, input: &mut R) -> std::io::Result<Self> {
        let mut dict = Self::new(args);
        let mut buf4 = [0u8; 4];
        input.read_exact(&mut buf4)?;
        let size = i32::from_le_bytes(buf4) as usize;
        input.read_exact(&mut buf4)?;
        let nwords = i32::from_le_bytes(buf4) as usize;
        input.read_exact(&mut buf4)?;
        let nlabels = i32::from_le_bytes(buf4) as usize;
        let mut buf8 = [0u8; 8];
        input.read_exact(&mut buf8)?;
        let ntokens = i64::from_le_bytes(buf8);

        for i in 0..size {
            let mut word_bytes = Vec::new();
            let mut byte = [0u8; 1];
            loop {
                input.read_exact(&mut byte)?;
                if byte[0] == 0 {
                    break;
                }
                word_bytes.push(byte[0]);
            }
            let word = String::from_utf8_lossy(&word_bytes).into_owned();
            input.read_exact(&mut buf8)?;
            let count = i64::from_le_bytes(buf8);
            input.read_exact(&mut byte)?;
            let kind = if byte[0] == 1 {
                EntryKind::Label
            } else {
                EntryKind::Word
            };
            dict.words.push(Entry {
                word: word.clone(),
                count,
                kind,
                subwords: Vec::new(),
            });
            let h = dict.find(&word);
            dict.word2int[h] = i as i32;
        }
        dict.size = size;
        dict.nwords = nwords;
        dict.nlabels = nlabels;
        dict.ntokens = ntokens;
        dict.init_table_discard();
        dict.init_ngrams();
        Ok(dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha8Rng;
    use rand::SeedableRng;

    fn build_dict(corpus: &str, min_count: i64, min_count_label: i64, label: &str) -> Dictionary {
        let mut args = Args::default();
        args.label = label.to_string();
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(corpus.as_bytes(), min_count, min_count_label, 0)
            .unwrap();
        dict
    }

    #[test]
    fn dictionary_identity_round_trips() {
        let corpus = "[[100,[a,b,c]]]\n".repeat(10);
        let dict = build_dict(&corpus, 1, 0, "__label__");
        let id = dict.get_id("a");
        assert_ne!(id, EMPTY);
        assert_eq!(dict.get_word(id), "a");
        assert_eq!(dict.get_id("__nonexistent__"), EMPTY);
    }

    #[test]
    fn scenario_s3_vocabulary_thresholding() {
        let mut corpus = String::new();
        corpus.push_str(&"[[100,[a]]]\n".repeat(6));
        corpus.push_str(&"[[100,[b]]]\n".repeat(6));
        corpus.push_str(&"[[100,[c]]]\n".repeat(3));
        corpus.push_str(&"[[100,[d]]]\n".repeat(3));
        corpus.push_str(&"[[100,[__label__p]]]\n".repeat(2));
        corpus.push_str("[[100,[__label__q]]]\n");
        let dict = build_dict(&corpus, 4, 2, "__label__");
        assert_eq!(dict.nwords(), 2);
        assert_eq!(dict.nlabels(), 1);
        assert_eq!(dict.get_id("a"), {
            let h = dict.find("a");
            dict.word2int[h]
        });
        assert_eq!(dict.words[0].word, "a");
        assert_eq!(dict.words[1].word, "b");
        assert_eq!(dict.words[2].word, "__label__p");
    }

    #[test]
    fn subsampling_is_monotone_in_count() {
        let corpus = format!(
            "{}{}",
            "[[100,[a]]]\n".repeat(20),
            "[[100,[b]]]\n".repeat(5)
        );
        let dict = build_dict(&corpus, 1, 0, "__label__");
        let id_a = dict.get_id("a");
        let id_b = dict.get_id("b");
        assert!(dict.pdiscard[id_a as usize] >= dict.pdiscard[id_b as usize]);
    }

    #[test]
    fn ngrams_are_idempotent_by_word_or_id() {
        let mut args = Args::default();
        args.minn = 1;
        args.maxn = 2;
        args.bucket = 1000;
        let corpus = "[[100,[hello]]]\n".repeat(5);
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(corpus.as_bytes(), 1, 0, 0).unwrap();
        let id = dict.get_id("hello");
        let by_id = dict.get_ngrams(id).to_vec();
        let by_word = dict.get_ngrams_for_word("hello");
        assert_eq!(by_id, by_word);
    }

    #[test]
    fn get_line_context_merges_consecutive_identical_times() {
        let mut args = Args::default();
        args.time_unit = crate::args::TimeUnit::Week;
        let corpus = "[[1000000,[a,b,c]],[1604800,[b,d]]]\n";
        let mut dict = Dictionary::new(&args);
        dict.read_from_file(corpus.as_bytes(), 1, 0, 0).unwrap();
        let mut cursor = ByteCursor::new(corpus.as_bytes());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (_ntokens, groups, _labels) = dict
            .get_line_context(&mut cursor, &mut rng, args.time_unit.seconds())
            .unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].time, 0);
        assert_eq!(groups[1].time, 1);
    }
}
