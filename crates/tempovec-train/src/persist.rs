//! Model persistence: the binary model file (args block, dictionary,
//! parameter matrices) and the text vector/theta/attention dumps.
//!
//! Grounded on `original_source/src/args.cc::save`/`load` for the args
//! block's exact field order, and `original_source/src/med2vec.cc`'s
//! `saveModel`/`loadModel`/`saveVectors`/`saveAttention`/`loadVectors`.

use std::io::{self, BufRead, BufReader, Read, Write};

use tempovec_core::TempovecError;

use crate::args::{Args, LossKind, ModelKind, TimeUnit};
use crate::dictionary::Dictionary;
use crate::numeric::Matrix;

fn write_i32<W: Write>(out: &mut W, v: i32) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn write_f64<W: Write>(out: &mut W, v: f64) -> io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

fn read_i32<R: Read>(input: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

fn read_f64<R: Read>(input: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

fn loss_code(l: LossKind) -> i32 {
    match l {
        LossKind::Hs => 0,
        LossKind::Ns => 1,
        LossKind::Softmax => 2,
    }
}

fn loss_from_code(c: i32) -> Result<LossKind, TempovecError> {
    match c {
        0 => Ok(LossKind::Hs),
        1 => Ok(LossKind::Ns),
        2 => Ok(LossKind::Softmax),
        other => Err(TempovecError::persistence(format!("unknown loss code {other}"))),
    }
}

fn model_code(m: ModelKind) -> i32 {
    match m {
        ModelKind::Cbow => 0,
        ModelKind::Sg => 1,
        ModelKind::Sup => 2,
        ModelKind::Attn1 => 3,
        ModelKind::Attn2 => 4,
    }
}

fn model_from_code(c: i32) -> Result<ModelKind, TempovecError> {
    match c {
        0 => Ok(ModelKind::Cbow),
        1 => Ok(ModelKind::Sg),
        2 => Ok(ModelKind::Sup),
        3 => Ok(ModelKind::Attn1),
        4 => Ok(ModelKind::Attn2),
        other => Err(TempovecError::persistence(format!("unknown model code {other}"))),
    }
}

fn time_unit_code(u: TimeUnit) -> i32 {
    match u {
        TimeUnit::Hour => 0,
        TimeUnit::Day => 1,
        TimeUnit::Week => 2,
        TimeUnit::Month => 3,
        TimeUnit::Season => 4,
        TimeUnit::Year => 5,
    }
}

fn time_unit_from_code(c: i32) -> Result<TimeUnit, TempovecError> {
    match c {
        0 => Ok(TimeUnit::Hour),
        1 => Ok(TimeUnit::Day),
        2 => Ok(TimeUnit::Week),
        3 => Ok(TimeUnit::Month),
        4 => Ok(TimeUnit::Season),
        5 => Ok(TimeUnit::Year),
        other => Err(TempovecError::persistence(format!("unknown time unit code {other}"))),
    }
}

/// Writes the 17 fixed-width fields `args.cc::Args::save` writes, in its
/// exact order. Note what is *not* here: `input`/`output`/`test`/`label`/
/// `pretrainedVectors` are never part of the binary args block.
pub fn save_args<W: Write>(args: &Args, out: &mut W) -> io::Result<()> {
    write_i32(out, args.dim as i32)?;
    write_i32(out, args.ws as i32)?;
    write_i32(out, args.epoch as i32)?;
    write_i32(out, args.min_count as i32)?;
    write_i32(out, args.neg as i32)?;
    write_i32(out, args.word_ngrams)?;
    write_i32(out, loss_code(args.loss))?;
    write_i32(out, model_code(args.model))?;
    write_i32(out, args.bucket as i32)?;
    write_i32(out, args.minn as i32)?;
    write_i32(out, args.maxn as i32)?;
    write_i32(out, args.lr_update_rate as i32)?;
    write_f64(out, args.t)?;
    write_f64(out, args.beta_base as f64)?;
    write_f64(out, args.delta as f64)?;
    write_i32(out, time_unit_code(args.time_unit))?;
    write_i32(out, args.nrand as i32)?;
    Ok(())
}

/// Loads the args block into a fresh `Args` seeded from `Args::default()`
/// (so the string fields the block never carries fall back to their
/// defaults rather than being left uninitialized).
pub fn load_args<R: Read>(input: &mut R) -> Result<Args, TempovecError> {
    let io_err = |e: io::Error| TempovecError::persistence(e.to_string());
    let mut args = Args::default();
    args.dim = read_i32(input).map_err(io_err)? as usize;
    args.ws = read_i32(input).map_err(io_err)? as i64;
    args.epoch = read_i32(input).map_err(io_err)? as i64;
    args.min_count = read_i32(input).map_err(io_err)? as i64;
    args.neg = read_i32(input).map_err(io_err)? as usize;
    args.word_ngrams = read_i32(input).map_err(io_err)?;
    args.loss = loss_from_code(read_i32(input).map_err(io_err)?)?;
    args.model = model_from_code(read_i32(input).map_err(io_err)?)?;
    args.bucket = read_i32(input).map_err(io_err)? as usize;
    args.minn = read_i32(input).map_err(io_err)? as usize;
    args.maxn = read_i32(input).map_err(io_err)? as usize;
    args.lr_update_rate = read_i32(input).map_err(io_err)? as i64;
    args.t = read_f64(input).map_err(io_err)?;
    args.beta_base = read_f64(input).map_err(io_err)? as f32;
    args.delta = read_f64(input).map_err(io_err)? as f32;
    args.time_unit = time_unit_from_code(read_i32(input).map_err(io_err)?)?;
    args.nrand = read_i32(input).map_err(io_err)? as usize;
    Ok(args)
}

/// The model-specific parameter matrices, shaped differently per
/// `args.model`: `Sg` carries `theta`, the two attention variants carry
/// `attn`+`bias`, and neither is present for the out-of-scope kinds.
pub struct ModelParams {
    pub w_in: Matrix,
    pub w_out: Matrix,
    pub theta: Option<Matrix>,
    pub attn: Option<Matrix>,
    pub bias: Option<Matrix>,
}

/// `med2vec.cc::saveModel`: args block, dictionary, `W_in`, `W_out`, then
/// the model-specific tail.
pub fn save_model<W: Write>(out: &mut W, args: &Args, dict: &Dictionary, params: &ModelParams) -> io::Result<()> {
    save_args(args, out)?;
    dict.save(out)?;
    params.w_in.save(out)?;
    params.w_out.save(out)?;
    match args.model {
        ModelKind::Sg => {
            params
                .theta
                .as_ref()
                .expect("sg model must carry a Θ matrix at save time")
                .save(out)?;
        }
        ModelKind::Attn1 | ModelKind::Attn2 => {
            params
                .attn
                .as_ref()
                .expect("attention models must carry an attn matrix at save time")
                .save(out)?;
            params
                .bias
                .as_ref()
                .expect("attention models must carry a bias vector at save time")
                .save(out)?;
        }
        ModelKind::Cbow | ModelKind::Sup => {}
    }
    Ok(())
}

pub struct LoadedModel {
    pub args: Args,
    pub dict: Dictionary,
    pub params: ModelParams,
}

/// `med2vec.cc::loadModel`: the mirror of [`save_model`].
pub fn load_model<R: Read>(input: &mut R) -> Result<LoadedModel, TempovecError> {
    let io_err = |e: io::Error| TempovecError::persistence(e.to_string());
    let args = load_args(input)?;
    let dict = Dictionary::load(&args, input).map_err(io_err)?;
    let w_in = Matrix::load(input).map_err(io_err)?;
    let w_out = Matrix::load(input).map_err(io_err)?;
    let (theta, attn, bias) = match args.model {
        ModelKind::Sg => (Some(Matrix::load(input).map_err(io_err)?), None, None),
        ModelKind::Attn1 | ModelKind::Attn2 => {
            let attn = Matrix::load(input).map_err(io_err)?;
            let bias = Matrix::load(input).map_err(io_err)?;
            (None, Some(attn), Some(bias))
        }
        ModelKind::Cbow | ModelKind::Sup => (None, None, None),
    };
    Ok(LoadedModel {
        args,
        dict,
        params: ModelParams { w_in, w_out, theta, attn, bias },
    })
}

fn write_row<W: Write>(out: &mut W, label: &str, row: &[f32]) -> io::Result<()> {
    write!(out, "{label}")?;
    for v in row {
        write!(out, " {v}")?;
    }
    writeln!(out)
}

/// `saveVectors`: header `nwords dim`, then one `word f_1 ... f_dim` line
/// per word taken directly from its `W_in` row (no ngram averaging — that
/// overload of `getVector` is only used for out-of-vocabulary lookups).
pub fn save_vectors<W: Write>(out: &mut W, dict: &Dictionary, w_in: &Matrix) -> io::Result<()> {
    let (_, dim) = w_in.shape();
    writeln!(out, "{} {}", dict.nwords(), dim)?;
    for i in 0..dict.nwords() as i32 {
        write_row(out, dict.get_word(i), w_in.row(i as usize))?;
    }
    Ok(())
}

/// `saveTheta`-equivalent: header `nwords (2*ws+1)`, then one `word θ_0 ...
/// θ_{2ws}` row per word.
pub fn save_theta<W: Write>(out: &mut W, dict: &Dictionary, theta: &Matrix) -> io::Result<()> {
    let (_, n) = theta.shape();
    writeln!(out, "{} {}", dict.nwords(), n)?;
    for i in 0..dict.nwords() as i32 {
        write_row(out, dict.get_word(i), theta.row(i as usize))?;
    }
    Ok(())
}

/// `saveAttention`: per word, the row of `attn[i,:] + bias` (the two are
/// always read back together, so the file carries their sum rather than
/// `attn` alone).
pub fn save_attn<W: Write>(out: &mut W, dict: &Dictionary, attn: &Matrix, bias: &Matrix) -> io::Result<()> {
    let (_, n) = attn.shape();
    writeln!(out, "{} {}", dict.nwords(), n)?;
    for i in 0..dict.nwords() as i32 {
        let row: Vec<f32> = attn
            .row(i as usize)
            .iter()
            .zip(bias.row(0))
            .map(|(a, b)| a + b)
            .collect();
        write_row(out, dict.get_word(i), &row)?;
    }
    Ok(())
}

/// `saveAttention`'s bias half: the bias vector alone, one line, no header.
pub fn save_bias<W: Write>(out: &mut W, bias: &Matrix) -> io::Result<()> {
    let mut line = String::new();
    for v in bias.row(0).iter() {
        if !line.is_empty() {
            line.push(' ');
        }
        line.push_str(&v.to_string());
    }
    writeln!(out, "{line}")
}

/// The result of a pretrained-vector warm start: every word line that
/// appeared in the file, in order, paired with its embedding row.
pub struct PretrainedVectors {
    pub words: Vec<String>,
    pub dim: usize,
    pub vectors: Vec<Vec<f32>>,
}

/// `fasttext.cc::loadVectors`'s parse half: reads the `n dim` header plus
/// `n` `word f_1 ... f_dim` lines. A dimension mismatch against `expected_dim`
/// is a hard error, mirroring the original's `std::cerr`+`exit(1)`.
pub fn load_pretrained_vectors<R: Read>(input: R, expected_dim: usize) -> Result<PretrainedVectors, TempovecError> {
    let mut reader = BufReader::new(input);
    let io_err = |e: io::Error| TempovecError::persistence(e.to_string());

    let mut header = String::new();
    reader.read_line(&mut header).map_err(io_err)?;
    let mut parts = header.split_whitespace();
    let n: usize = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TempovecError::persistence("pretrained-vectors file missing header"))?;
    let dim: usize = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| TempovecError::persistence("pretrained-vectors file missing header"))?;
    if dim != expected_dim {
        return Err(TempovecError::usage(format!(
            "pretrained-vectors dimension {dim} does not match -dim {expected_dim}"
        )));
    }

    let mut words = Vec::with_capacity(n);
    let mut vectors = Vec::with_capacity(n);
    for _ in 0..n {
        let mut line = String::new();
        if reader.read_line(&mut line).map_err(io_err)? == 0 {
            break;
        }
        let mut fields = line.split_whitespace();
        let word = fields
            .next()
            .ok_or_else(|| TempovecError::persistence("pretrained-vectors row missing word"))?
            .to_string();
        let row: Vec<f32> = fields.filter_map(|s| s.parse().ok()).collect();
        if row.len() != dim {
            return Err(TempovecError::persistence(format!(
                "pretrained-vectors row for '{word}' has {} values, expected {dim}",
                row.len()
            )));
        }
        words.push(word);
        vectors.push(row);
    }
    Ok(PretrainedVectors { words, dim, vectors })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn args_block_round_trips_every_field() {
        let mut args = Args::default();
        args.dim = 50;
        args.ws = 3;
        args.epoch = 7;
        args.min_count = 2;
        args.neg = 8;
        args.word_ngrams = 2;
        args.loss = LossKind::Ns;
        args.model = ModelKind::Attn2;
        args.bucket = 123;
        args.minn = 2;
        args.maxn = 5;
        args.lr_update_rate = 50;
        args.t = 2e-4;
        args.beta_base = 7.5;
        args.delta = 0.3;
        args.time_unit = TimeUnit::Month;
        args.nrand = 4;

        let mut buf = Vec::new();
        save_args(&args, &mut buf).unwrap();
        let loaded = load_args(&mut Cursor::new(buf)).unwrap();

        assert_eq!(loaded.dim, 50);
        assert_eq!(loaded.ws, 3);
        assert_eq!(loaded.epoch, 7);
        assert_eq!(loaded.min_count, 2);
        assert_eq!(loaded.neg, 8);
        assert_eq!(loaded.word_ngrams, 2);
        assert_eq!(loaded.loss, LossKind::Ns);
        assert_eq!(loaded.model, ModelKind::Attn2);
        assert_eq!(loaded.bucket, 123);
        assert_eq!(loaded.minn, 2);
        assert_eq!(loaded.maxn, 5);
        assert_eq!(loaded.lr_update_rate, 50);
        assert!((loaded.t - 2e-4).abs() < 1e-12);
        assert!((loaded.beta_base - 7.5).abs() < 1e-6);
        assert!((loaded.delta - 0.3).abs() < 1e-6);
        assert_eq!(loaded.time_unit, TimeUnit::Month);
        assert_eq!(loaded.nrand, 4);
        // Strings are not part of the block; they stay at their defaults.
        assert_eq!(loaded.input, "");
        assert_eq!(loaded.label, "__label__");
    }

    #[test]
    fn pretrained_vectors_rejects_dimension_mismatch() {
        let text = "1 3\nhello 0.1 0.2 0.3\n";
        let err = load_pretrained_vectors(Cursor::new(text), 5).unwrap_err();
        assert!(matches!(err, TempovecError::Usage { .. }));
    }

    #[test]
    fn pretrained_vectors_parses_matching_rows() {
        let text = "2 2\nalpha 0.1 0.2\nbeta 0.3 0.4\n";
        let parsed = load_pretrained_vectors(Cursor::new(text), 2).unwrap();
        assert_eq!(parsed.words, vec!["alpha", "beta"]);
        assert_eq!(parsed.vectors[0], vec![0.1, 0.2]);
        assert_eq!(parsed.vectors[1], vec![0.3, 0.4]);
    }
}
