//! Training configuration.
//!
//! `Args` is the typed analogue of the source's `Args` class. Populating
//! one from `argv` is the job of `src/bin/tempovec.rs`, not this module —
//! per the out-of-core-scope boundary around the CLI parser itself.

use tempovec_core::{Result, TempovecError};

/// Which training objective to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Cbow,
    Sg,
    Sup,
    Attn1,
    Attn2,
}

impl ModelKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "cbow" => Ok(Self::Cbow),
            "skipgram" => Ok(Self::Sg),
            "supervised" => Ok(Self::Sup),
            "attn1" => Ok(Self::Attn1),
            "attn2" => Ok(Self::Attn2),
            other => Err(TempovecError::usage(format!("unknown command '{other}'"))),
        }
    }

    /// Whether this model trains through the time-aware engine at all.
    pub fn is_temporal(self) -> bool {
        matches!(self, Self::Sg | Self::Attn1 | Self::Attn2)
    }

    pub fn is_attention(self) -> bool {
        matches!(self, Self::Attn1 | Self::Attn2)
    }
}

/// Which output-layer loss to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    Hs,
    Ns,
    Softmax,
}

impl LossKind {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hs" => Ok(Self::Hs),
            "ns" => Ok(Self::Ns),
            "softmax" => Ok(Self::Softmax),
            other => Err(TempovecError::usage(format!("unknown loss '{other}'"))),
        }
    }
}

/// Coarse-graining unit for event timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Hour,
    Day,
    Week,
    Month,
    Season,
    Year,
}

impl TimeUnit {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hour" => Ok(Self::Hour),
            "day" => Ok(Self::Day),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "season" => Ok(Self::Season),
            "year" => Ok(Self::Year),
            other => Err(TempovecError::usage(format!("unknown time unit '{other}'"))),
        }
    }

    /// Seconds per unit. `day`/`week`/`month` match the original source;
    /// `hour`/`season`/`year` are this implementation's own choices where
    /// the original left the conversion incomplete (see SPEC_FULL.md).
    pub fn seconds(self) -> i64 {
        match self {
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
            Self::Month => 2_592_000,
            Self::Season => 7_889_400,
            Self::Year => 31_536_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Args {
    pub input: String,
    pub output: String,
    pub test: Option<String>,
    pub lr: f64,
    pub lr_update_rate: i64,
    pub dim: usize,
    pub ws: i64,
    pub attnws: i64,
    pub epoch: i64,
    pub min_count: i64,
    pub min_count_label: i64,
    pub neg: usize,
    pub word_ngrams: i32,
    pub loss: LossKind,
    pub model: ModelKind,
    pub time_unit: TimeUnit,
    pub bucket: usize,
    pub minn: usize,
    pub maxn: usize,
    pub thread: usize,
    pub t: f64,
    pub label: String,
    pub verbose: i32,
    pub pretrained_vectors: Option<String>,
    pub beta_base: f32,
    pub delta: f32,
    pub nrand: usize,
}

impl Args {
    pub fn new(model: ModelKind) -> Self {
        let mut args = Self::default();
        args.model = model;
        if model == ModelKind::Sup {
            args.lr = 0.1;
        }
        args
    }

    pub fn validate(&self) -> Result<()> {
        if self.input.is_empty() {
            return Err(TempovecError::usage("-input is mandatory"));
        }
        if self.output.is_empty() {
            return Err(TempovecError::usage("-output is mandatory"));
        }
        Ok(())
    }

    /// `if (wordNgrams <= 1 && maxn == 0) bucket = 0;` — reproduced exactly
    /// from `args.cc::parseArgs`. Run this before relying on `self.bucket`
    /// for sizing (e.g. `nwords + bucket`).
    pub fn normalize(&mut self) {
        if self.word_ngrams <= 1 && self.maxn == 0 {
            self.bucket = 0;
        }
    }
}

impl Default for Args {
    fn default() -> Self {
        Self {
            input: String::new(),
            output: String::new(),
            test: None,
            lr: 0.05,
            lr_update_rate: 100,
            dim: 100,
            ws: 5,
            attnws: 5,
            epoch: 5,
            min_count: 5,
            min_count_label: 0,
            neg: 5,
            word_ngrams: 1,
            loss: LossKind::Ns,
            model: ModelKind::Sg,
            time_unit: TimeUnit::Week,
            bucket: 2_000_000,
            minn: 3,
            maxn: 6,
            thread: 12,
            t: 1e-4,
            label: "__label__".to_string(),
            verbose: 2,
            pretrained_vectors: None,
            beta_base: 10.0,
            delta: 0.2,
            nrand: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let args = Args::default();
        assert_eq!(args.lr, 0.05);
        assert_eq!(args.dim, 100);
        assert_eq!(args.ws, 5);
        assert_eq!(args.epoch, 5);
        assert_eq!(args.min_count, 5);
        assert_eq!(args.neg, 5);
        assert_eq!(args.bucket, 2_000_000);
        assert_eq!(args.thread, 12);
        assert_eq!(args.label, "__label__");
    }

    #[test]
    fn supervised_default_lr_is_higher() {
        let args = Args::new(ModelKind::Sup);
        assert_eq!(args.lr, 0.1);
    }

    #[test]
    fn bucket_is_zeroed_without_ngrams() {
        let mut args = Args::default();
        args.word_ngrams = 1;
        args.maxn = 0;
        args.normalize();
        assert_eq!(args.bucket, 0);
    }

    #[test]
    fn rejects_missing_input() {
        let args = Args {
            input: String::new(),
            output: "out".to_string(),
            ..Args::default()
        };
        assert!(args.validate().is_err());
    }
}
