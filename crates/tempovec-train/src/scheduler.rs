//! Training scheduler: per-worker thread loop, file partitioning, learning
//! rate decay, and the two time-aware context dispatchers `sg_context`/
//! `attn_context`.
//!
//! Grounded on `original_source/src/fasttext.cc`'s `trainThread`/`train`
//! (thread spawn, `seekToBOS` partitioning, the `tokenCount`/`lrUpdateRate`
//! loop, `printInfo`) for the scheduler shape, and its `sgContext`/
//! `countContext`/`attnContext` for the two context dispatchers themselves.

use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::args::{Args, ModelKind};
use crate::corpus::{self, ByteCursor};
use crate::dictionary::{Dictionary, EntryKind, TimeGroup};
use crate::loss::{self, LossScratch};
use crate::numeric::{self, SharedMatrix};

/// Parameter matrices shared across workers for the duration of training.
/// Constructed once by the orchestrator before any worker spawns.
#[derive(Clone)]
pub struct SharedParams {
    pub w_in: SharedMatrix,
    pub w_out: SharedMatrix,
    pub theta: Option<SharedMatrix>,
    pub attn: Option<SharedMatrix>,
    pub bias: Option<SharedMatrix>,
}

/// Running totals reported back by a finished worker; only worker 0's are
/// used for the final progress line, but every worker returns its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerStats {
    loss_sum: f64,
    loss_count: i64,
}

impl WorkerStats {
    fn add(&mut self, loss: f32) {
        self.loss_sum += loss as f64;
        self.loss_count += 1;
    }

    pub fn mean(&self) -> f64 {
        if self.loss_count == 0 {
            0.0
        } else {
            self.loss_sum / self.loss_count as f64
        }
    }
}

/// Spawns `args.thread` workers, each on a named thread with an 8 MiB
/// stack (`hidden`/`grad` plus the per-worker negative table make the
/// default 1 MiB stack tight on some platforms), and joins them all.
/// Returns worker 0's stats, which drive the final progress line.
pub fn run(args: &Args, dict: &Arc<Dictionary>, params: &SharedParams, input_path: &Path) -> io::Result<WorkerStats> {
    let target_tokens = args.epoch * dict.ntokens();
    let token_count = Arc::new(AtomicI64::new(0));
    let start = Instant::now();

    let mut handles = Vec::with_capacity(args.thread);
    for thread_id in 0..args.thread {
        let args = args.clone();
        let dict = Arc::clone(dict);
        let params = params.clone();
        let token_count = Arc::clone(&token_count);
        let input_path = input_path.to_path_buf();
        let handle = std::thread::Builder::new()
            .name(format!("tempovec-worker-{thread_id}"))
            .stack_size(8 * 1024 * 1024)
            .spawn(move || {
                train_worker(thread_id, &args, &dict, &params, &token_count, target_tokens, start, &input_path)
            })
            .expect("failed to spawn training worker");
        handles.push(handle);
    }

    let mut worker0 = WorkerStats::default();
    for (i, handle) in handles.into_iter().enumerate() {
        let stats = handle.join().expect("training worker panicked")?;
        if i == 0 {
            worker0 = stats;
        }
    }
    Ok(worker0)
}

#[allow(clippy::too_many_arguments)]
fn train_worker(
    thread_id: usize,
    args: &Args,
    dict: &Dictionary,
    params: &SharedParams,
    token_count: &AtomicI64,
    target_tokens: i64,
    start: Instant,
    input_path: &Path,
) -> io::Result<WorkerStats> {
    let mut file = File::open(input_path)?;
    let size = corpus::file_size(&mut file)?;
    let start_pos = (thread_id as u64) * size / (args.thread as u64);
    corpus::seek_to_bos(&mut file, start_pos)?;
    let mut cursor = ByteCursor::new(file);

    let mut rng = ChaCha8Rng::seed_from_u64(thread_id as u64);
    let mut scratch = LossScratch::new(args.dim);
    let counts = dict.get_counts(EntryKind::Word);
    scratch.init_negatives(&counts, &mut rng);

    let seconds_per_unit = args.time_unit.seconds();
    let mut stats = WorkerStats::default();
    let mut local_token_count: i64 = 0;

    while target_tokens > 0 && token_count.load(Ordering::Relaxed) < target_tokens {
        let progress = token_count.load(Ordering::Relaxed) as f64 / target_tokens as f64;
        let lr = (args.lr * (1.0 - progress)) as f32;

        let (ntokens_read, groups, _labels) = dict.get_line_context(&mut cursor, &mut rng, seconds_per_unit)?;
        if groups.is_empty() {
            // EOF: rewind and start another pass over the corpus.
            cursor.inner_mut().seek(SeekFrom::Start(0))?;
            continue;
        }
        local_token_count += ntokens_read as i64;

        let loss = match args.model {
            ModelKind::Sg => sg_context(args, &mut scratch, params, &groups, lr),
            ModelKind::Attn1 | ModelKind::Attn2 => attn_context(args, &mut scratch, params, &groups, &mut rng, lr),
            ModelKind::Cbow | ModelKind::Sup => {
                unreachable!("non-temporal models are rejected before workers spawn")
            }
        };
        stats.add(loss);

        if local_token_count > args.lr_update_rate {
            token_count.fetch_add(local_token_count, Ordering::Relaxed);
            local_token_count = 0;
            if thread_id == 0 && args.verbose > 1 {
                let wst = token_count.load(Ordering::Relaxed) as f64 / start.elapsed().as_secs_f64().max(1e-9);
                eprint!(
                    "\rprogress: {:>5.1}%  words/sec/thread: {:.0}  lr: {:.6}  loss: {:.6}",
                    100.0 * progress,
                    wst / args.thread as f64,
                    lr,
                    stats.mean()
                );
            }
        }
    }
    if thread_id == 0 && args.verbose > 0 {
        eprintln!();
    }
    Ok(stats)
}

/// `sgContext`: the time-weighted skip-gram loop over one record's merged
/// time groups. `original_source/src/fasttext.cc::sgContext`/`countContext`.
fn sg_context(args: &Args, scratch: &mut LossScratch, params: &SharedParams, line: &[TimeGroup], lr: f32) -> f32 {
    let theta = params.theta.as_ref().expect("sg_context requires a Θ matrix");
    let ws = args.ws;
    let mut loss = 0.0f32;

    for v in 0..line.len() {
        let ntotal: i64 = line
            .iter()
            .filter(|g| (g.time - line[v].time).abs() <= ws)
            .map(|g| g.words_id.len() as i64)
            .sum::<i64>()
            - 1;
        if ntotal <= 0 {
            continue;
        }

        for &x in &line[v].words_id {
            scratch.hidden = params.w_in.row_copy(x as usize);
            loss += -(numeric::mvn_pdf(&scratch.hidden).ln() as f32);

            for c in 0..line.len() {
                let dt = line[c].time - line[v].time;
                if dt.abs() > ws {
                    continue;
                }
                let mut nc = line[c].words_id.len() as i64;
                if c == v {
                    nc -= 1;
                }
                if nc == 0 {
                    continue;
                }
                let dst = dt + ws;
                let a = if dst <= ws { (dst + 1) as f32 } else { (2 * ws + 1 - dst) as f32 };
                let theta_val = theta.get_cell(x as usize, dst as usize);
                loss += -(numeric::beta_pdf(theta_val as f64, a as f64, args.beta_base as f64).ln() as f32);

                let mut p_context = 0.0f32;
                for &y in &line[c].words_id {
                    if y == x {
                        continue;
                    }
                    let (l, p) = loss::ns_context(scratch, &params.w_out, y, lr, theta_val, args.delta, args.neg);
                    loss += l;
                    p_context += p;
                    params.w_in.add_row(&scratch.grad, x as usize, 1.0);
                }
                theta.update_cell(x as usize, dst as usize, p_context / nc as f32);
            }
        }
    }
    loss
}

/// `attnContext`: flattens the record into a positional `(token, time)`
/// sequence and dispatches each focus position to attention-v1/v2.
/// `original_source/src/med2vec.cc::attnContext`.
fn attn_context(
    args: &Args,
    scratch: &mut LossScratch,
    params: &SharedParams,
    line: &[TimeGroup],
    rng: &mut impl Rng,
    lr: f32,
) -> f32 {
    let attn = params.attn.as_ref().expect("attn_context requires an attn matrix");
    let bias = params.bias.as_ref().expect("attn_context requires a bias vector");
    let seq: Vec<(i32, i64)> = line
        .iter()
        .flat_map(|g| g.words_id.iter().map(move |&tok| (tok, g.time)))
        .collect();
    let ws = args.ws;
    let attnws = args.attnws as i64;
    let mut loss = 0.0f32;

    for f in 0..seq.len() {
        let boundary = rng.random_range(1..=ws);
        let mut pairs: Vec<(i32, usize)> = Vec::new();
        for c in -boundary..=boundary {
            if c == 0 {
                continue;
            }
            let idx = f as i64 + c;
            if idx < 0 || idx as usize >= seq.len() {
                continue;
            }
            let idx = idx as usize;
            let distance = seq[idx].1 - seq[f].1 + attnws;
            if distance < 0 || distance > 2 * attnws {
                continue;
            }
            pairs.push((seq[idx].0, distance as usize));
        }
        if pairs.is_empty() {
            continue;
        }
        let target = seq[f].0;
        let l = match args.model {
            ModelKind::Attn1 => {
                loss::update_attn1(scratch, &params.w_in, &params.w_out, attn, bias, &pairs, target, args.neg, lr)
            }
            ModelKind::Attn2 => {
                loss::update_attn2(scratch, &params.w_in, &params.w_out, attn, bias, &pairs, target, args.neg, lr)
            }
            _ => unreachable!("attn_context is only dispatched for attn1/attn2"),
        };
        loss += l;
    }
    loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Matrix;

    fn shared(m: usize, n: usize) -> SharedMatrix {
        SharedMatrix::from_matrix(Matrix::new(m, n))
    }

    fn params(nwords: usize, dim: usize, ws: i64) -> SharedParams {
        SharedParams {
            w_in: shared(nwords, dim),
            w_out: shared(nwords, dim),
            theta: Some(shared(nwords, (2 * ws + 1) as usize)),
            attn: None,
            bias: None,
        }
    }

    #[test]
    fn sg_context_writes_theta_in_zero_one_range() {
        let mut args = Args::default();
        args.ws = 1;
        args.dim = 4;
        args.neg = 1;
        let p = params(4, args.dim, args.ws);
        let mut scratch = LossScratch::new(args.dim);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        scratch.init_negatives(&[1, 1, 1, 1], &mut rng);

        let line = vec![
            TimeGroup { time: 0, words_id: vec![0, 1] },
            TimeGroup { time: 1, words_id: vec![2, 3] },
        ];
        sg_context(&args, &mut scratch, &p, &line, 0.1);

        let theta = p.theta.as_ref().unwrap();
        for x in 0..4usize {
            for dst in 0..=2 * args.ws as usize {
                let v = theta.get_cell(x, dst);
                assert!((0.0..=1.0).contains(&v) || v == 0.0);
            }
        }
    }

    #[test]
    fn attn_context_runs_without_panicking_on_a_short_sequence() {
        let mut args = Args::default();
        args.model = ModelKind::Attn1;
        args.ws = 2;
        args.attnws = 2;
        args.dim = 3;
        args.neg = 1;
        let mut p = params(3, args.dim, args.ws);
        p.attn = Some(shared(3, (2 * args.attnws + 1) as usize));
        p.bias = Some(shared(1, (2 * args.attnws + 1) as usize));
        let mut scratch = LossScratch::new(args.dim);
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        scratch.init_negatives(&[1, 1, 1], &mut rng);

        let line = vec![
            TimeGroup { time: 0, words_id: vec![0, 1] },
            TimeGroup { time: 1, words_id: vec![2] },
        ];
        let loss = attn_context(&args, &mut scratch, &p, &line, &mut rng, 0.1);
        assert!(loss.is_finite());
    }
}
