//! Training orchestration: dictionary construction, parameter
//! initialization, worker dispatch, and the final save.
//!
//! Grounded on `original_source/src/fasttext.cc::train` (the θ-gated
//! skip-gram path) and `original_source/src/med2vec.cc::train` (the
//! attention path, which additionally calls `saveAttention`).

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use tempovec_core::{Result, TempovecError};

use crate::args::{Args, ModelKind};
use crate::dictionary::Dictionary;
use crate::numeric::{Matrix, SharedMatrix};
use crate::persist::{self, ModelParams};
use crate::scheduler::{self, SharedParams};

/// Validates that `args.model` is one of the temporal objectives this
/// engine actually trains. Classical cbow/supervised are out of scope —
/// the parameter matrices and loss kernels they'd use are retained only
/// because the temporal paths share them.
fn require_temporal_model(args: &Args) -> Result<()> {
    if !args.model.is_temporal() {
        return Err(TempovecError::usage(
            "classical cbow/supervised training is out of scope; use skipgram, attn1, or attn2",
        ));
    }
    if args.model == ModelKind::Sg && args.loss != crate::args::LossKind::Ns {
        return Err(TempovecError::usage(
            "skipgram (theta-gated) training requires -loss ns",
        ));
    }
    Ok(())
}

/// Uniform `Theta-Gate` initialization weights for a `2*ws+1`-column
/// matrix: `a_j` rises `1..=ws+1` across the first half and mirrors back
/// down across the second, with the middle column fixed at `ws+1`. The
/// `b` parameter is `beta_base` for every column.
fn theta_beta_weights(ws: i64, beta_base: f32) -> (Vec<f32>, Vec<f32>) {
    let n = (2 * ws + 1) as usize;
    let mut a = Vec::with_capacity(n);
    for dst in 0..n as i64 {
        let w = if dst <= ws { dst + 1 } else { 2 * ws + 1 - dst };
        a.push(w as f32);
    }
    let b = vec![beta_base; n];
    (a, b)
}

/// `fasttext.cc::train`/`med2vec.cc::train`: builds the dictionary, warm
/// starts or randomly initializes every parameter matrix, runs the worker
/// pool, then saves the binary model and its text companions.
pub fn train(args: &Args) -> Result<()> {
    require_temporal_model(args)?;

    if args.verbose > 0 {
        eprintln!("reading corpus...");
    }
    let corpus_file = File::open(&args.input).map_err(|e| TempovecError::io(&args.input, e.to_string()))?;
    let mut dict = Dictionary::new(args);
    dict.read_from_file(corpus_file, args.min_count, args.min_count_label, args.verbose)?;

    let pretrained = match &args.pretrained_vectors {
        Some(path) => {
            let file = File::open(path).map_err(|e| TempovecError::io(path, e.to_string()))?;
            let parsed = persist::load_pretrained_vectors(file, args.dim)?;
            // Every pretrained word gets a vocabulary slot, regardless of
            // `-minCount`: `loadVectors` re-adds each word then re-thresholds
            // at (1, 0) so nothing pretrained is dropped.
            for word in &parsed.words {
                dict.add(word);
            }
            dict.threshold(1, 0);
            Some(parsed)
        }
        None => None,
    };
    let dict = Arc::new(dict);

    let nrows = dict.nwords() + args.bucket;

    let w_in = {
        let mut rng = ChaCha8Rng::seed_from_u64(args.nrand as u64);
        let mut m = Matrix::new(nrows, args.dim);
        // Theta-gated skipgram seeds from a standard gaussian when there's
        // no warm start, matching `mulVarNormal()` in the original's
        // non-pretrained path; the attention models keep the uniform fill.
        if pretrained.is_none() && args.model == ModelKind::Sg {
            m.mul_var_normal(&mut rng);
        } else {
            m.uniform(1.0 / args.dim as f32, &mut rng);
        }
        if let Some(parsed) = &pretrained {
            for (word, row) in parsed.words.iter().zip(parsed.vectors.iter()) {
                let id = dict.get_id(word);
                if id < 0 || id as usize >= dict.nwords() {
                    continue;
                }
                for (j, v) in row.iter().enumerate() {
                    m.update_cell(id as usize, j, *v);
                }
            }
        }
        m
    };
    let w_out = Matrix::new(nrows, args.dim);

    let (theta, attn, bias) = match args.model {
        ModelKind::Sg => {
            let mut rng = ChaCha8Rng::seed_from_u64(args.nrand as u64 + 1);
            let (a, b) = theta_beta_weights(args.ws, args.beta_base);
            let mut theta = Matrix::new(nrows, (2 * args.ws + 1) as usize);
            theta.beta_columns(&a, &b, &mut rng);
            (Some(theta), None, None)
        }
        ModelKind::Attn1 | ModelKind::Attn2 => {
            let attn = Matrix::new(nrows, (2 * args.attnws + 1) as usize);
            let bias = Matrix::new(1, (2 * args.attnws + 1) as usize);
            (None, Some(attn), Some(bias))
        }
        ModelKind::Cbow | ModelKind::Sup => unreachable!("rejected by require_temporal_model"),
    };

    let shared = SharedParams {
        w_in: SharedMatrix::from_matrix(w_in),
        w_out: SharedMatrix::from_matrix(w_out),
        theta: theta.map(SharedMatrix::from_matrix),
        attn: attn.map(SharedMatrix::from_matrix),
        bias: bias.map(SharedMatrix::from_matrix),
    };

    if args.verbose > 0 {
        eprintln!(
            "training {} ({} epochs over {} threads, {} words, {} tokens)...",
            model_label(args.model),
            args.epoch,
            args.thread,
            dict.nwords(),
            dict.ntokens()
        );
    }
    let stats = scheduler::run(args, &dict, &shared, Path::new(&args.input))
        .map_err(|e| TempovecError::io(&args.input, e.to_string()))?;
    if args.verbose > 0 {
        eprintln!("done; mean loss {:.6}", stats.mean());
        eprintln!("writing model...");
    }

    save_outputs(args, &dict, &shared)?;
    Ok(())
}

fn model_label(model: ModelKind) -> &'static str {
    match model {
        ModelKind::Sg => "skipgram",
        ModelKind::Attn1 => "attn1",
        ModelKind::Attn2 => "attn2",
        ModelKind::Cbow => "cbow",
        ModelKind::Sup => "supervised",
    }
}

fn save_outputs(args: &Args, dict: &Dictionary, shared: &SharedParams) -> Result<()> {
    let io_err = |e: std::io::Error| TempovecError::io(&args.output, e.to_string());

    let model_path = format!("{}.bin", args.output);
    let model_file = File::create(&model_path).map_err(io_err)?;
    let mut out = BufWriter::new(model_file);
    let params = ModelParams {
        w_in: shared.w_in.snapshot(),
        w_out: shared.w_out.snapshot(),
        theta: shared.theta.as_ref().map(|m| m.snapshot()),
        attn: shared.attn.as_ref().map(|m| m.snapshot()),
        bias: shared.bias.as_ref().map(|m| m.snapshot()),
    };
    persist::save_model(&mut out, args, dict, &params).map_err(io_err)?;

    let vec_path = format!("{}.vec", args.output);
    let vec_file = File::create(&vec_path).map_err(io_err)?;
    let mut out = BufWriter::new(vec_file);
    persist::save_vectors(&mut out, dict, &params.w_in).map_err(io_err)?;

    match args.model {
        ModelKind::Sg => {
            let theta_path = format!("{}.theta", args.output);
            let theta_file = File::create(&theta_path).map_err(io_err)?;
            let mut out = BufWriter::new(theta_file);
            persist::save_theta(&mut out, dict, params.theta.as_ref().unwrap()).map_err(io_err)?;
        }
        ModelKind::Attn1 | ModelKind::Attn2 => {
            let attn_path = format!("{}.attn", args.output);
            let attn_file = File::create(&attn_path).map_err(io_err)?;
            let mut out = BufWriter::new(attn_file);
            persist::save_attn(&mut out, dict, params.attn.as_ref().unwrap(), params.bias.as_ref().unwrap())
                .map_err(io_err)?;

            let bias_path = format!("{}.bias", args.output);
            let bias_file = File::create(&bias_path).map_err(io_err)?;
            let mut out = BufWriter::new(bias_file);
            persist::save_bias(&mut out, params.bias.as_ref().unwrap()).map_err(io_err)?;
        }
        ModelKind::Cbow | ModelKind::Sup => {}
    }
    Ok(())
}

/// `printVectors`: dumps the trained word embeddings (`wordVectors`) to
/// stdout from a saved model file. The `supervised`-only `textVectors`
/// branch of the original is not reachable here since supervised training
/// is out of scope.
pub fn print_vectors(model_path: &Path) -> Result<()> {
    let file = File::open(model_path).map_err(|e| TempovecError::io(model_path.to_string_lossy(), e.to_string()))?;
    let mut reader = std::io::BufReader::new(file);
    let loaded = persist::load_model(&mut reader)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    persist::save_vectors(&mut out, &loaded.dict, &loaded.params.w_in)
        .map_err(|e| TempovecError::io(model_path.to_string_lossy(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cbow_and_supervised() {
        let mut args = Args::default();
        args.model = ModelKind::Cbow;
        assert!(require_temporal_model(&args).is_err());
        args.model = ModelKind::Sup;
        assert!(require_temporal_model(&args).is_err());
    }

    #[test]
    fn skipgram_requires_ns_loss() {
        let mut args = Args::default();
        args.model = ModelKind::Sg;
        args.loss = crate::args::LossKind::Hs;
        assert!(require_temporal_model(&args).is_err());
        args.loss = crate::args::LossKind::Ns;
        assert!(require_temporal_model(&args).is_ok());
    }

    #[test]
    fn attention_models_pass_validation() {
        let mut args = Args::default();
        args.model = ModelKind::Attn1;
        assert!(require_temporal_model(&args).is_ok());
        args.model = ModelKind::Attn2;
        assert!(require_temporal_model(&args).is_ok());
    }

    #[test]
    fn theta_beta_weights_rise_then_mirror() {
        let (a, _b) = theta_beta_weights(2, 10.0);
        assert_eq!(a, vec![1.0, 2.0, 3.0, 2.0, 1.0]);
    }
}
