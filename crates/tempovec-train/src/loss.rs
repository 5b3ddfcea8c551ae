//! Loss kernels: classical binary-logistic/NS/HS/softmax, the theta-gated
//! NS kernel used by `sgContext`, and the attention hidden/update kernels.
//!
//! Grounded on `original_source/src/model.cc` (`binaryLogistic`,
//! `negativeSampling`, `nsContext`/`blContext`, `hierarchicalSoftmax`,
//! `softmax`, `initTableNegatives`/`getNegative`, `buildTree`) for
//! everything but attention, whose `computeAttnHidden`/`updateAttn`/
//! `updateAttn2` bodies are absent from that source (declared in
//! `model.h`, never defined in `model.cc`) and are implemented here
//! directly from the forward/backward equations in SPEC_FULL.md.

use rand::Rng;

use tempovec_core::NEGATIVE_TABLE_SIZE;

use crate::numeric::{SharedMatrix, Tables, Vector};

/// Per-worker scratch shared by every loss kernel: the hidden/grad
/// accumulators, the worker's own negative-sampling table and cursor, and
/// the lookup tables for sigmoid/log.
pub struct LossScratch {
    pub hidden: Vector,
    pub grad: Vector,
    tables: Tables,
    negatives: Vec<i32>,
    negpos: usize,
}

impl LossScratch {
    pub fn new(dim: usize) -> Self {
        Self {
            hidden: Vector::new(dim),
            grad: Vector::new(dim),
            tables: Tables::new(),
            negatives: Vec::new(),
            negpos: 0,
        }
    }

    /// Builds this worker's negative-sampling table proportional to
    /// `count.sqrt()`, then shuffles it with the worker's own RNG.
    /// `original_source/src/model.cc::initTableNegatives`.
    pub fn init_negatives(&mut self, counts: &[i64], rng: &mut impl Rng) {
        let z: f64 = counts.iter().map(|&c| (c as f64).sqrt()).sum();
        let mut table = Vec::with_capacity(NEGATIVE_TABLE_SIZE);
        for (i, &c) in counts.iter().enumerate() {
            let share = (c as f64).sqrt() * NEGATIVE_TABLE_SIZE as f64 / z;
            for _ in 0..(share as usize) {
                table.push(i as i32);
            }
        }
        for i in (1..table.len()).rev() {
            let j = rng.random_range(0..=i);
            table.swap(i, j);
        }
        self.negatives = table;
        self.negpos = 0;
    }

    /// Draws the next negative, skipping (and re-advancing past) `target`.
    fn get_negative(&mut self, target: i32) -> i32 {
        loop {
            let n = self.negatives[self.negpos];
            self.negpos = (self.negpos + 1) % self.negatives.len();
            if n != target {
                return n;
            }
        }
    }

    pub fn sigmoid(&self, x: f32) -> f32 {
        self.tables.sigmoid(x)
    }

    pub fn log(&self, x: f32) -> f32 {
        self.tables.log(x)
    }
}

/// 4.D.i Binary logistic: `grad += alpha * W_out[t,:]`, `W_out[t,:] +=
/// alpha * hidden`, returns `-ln(score)` or `-ln(1-score)`.
pub fn binary_logistic(
    scratch: &mut LossScratch,
    w_out: &SharedMatrix,
    target: i32,
    label: bool,
    lr: f32,
) -> f32 {
    let t = target as usize;
    let score = scratch.sigmoid(w_out.dot_row(&scratch.hidden, t));
    let y = if label { 1.0 } else { 0.0 };
    let alpha = lr * (y - score);
    w_out.add_row_to(&mut scratch.grad, t, alpha);
    w_out.add_row(&scratch.hidden, t, alpha);
    if label {
        -scratch.log(score)
    } else {
        -scratch.log(1.0 - score)
    }
}

/// 4.D.ii Classical negative sampling: one positive update, `neg`
/// negative updates.
pub fn negative_sampling(
    scratch: &mut LossScratch,
    w_out: &SharedMatrix,
    target: i32,
    neg: usize,
    lr: f32,
) -> f32 {
    scratch.grad.zero();
    let mut loss = binary_logistic(scratch, w_out, target, true, lr);
    for _ in 0..neg {
        let n = scratch.get_negative(target);
        loss += binary_logistic(scratch, w_out, n, false, lr);
    }
    loss
}

/// 4.D.iii theta-gated positive update (`blContext`, label branch).
/// Returns `(loss, score)`; the caller accumulates `score` into
/// `pContext`.
fn bl_context_positive(
    scratch: &mut LossScratch,
    w_out: &SharedMatrix,
    target: i32,
    lr: f32,
    theta: f32,
    delta: f32,
) -> (f32, f32) {
    let t = target as usize;
    let score = scratch.sigmoid(w_out.dot_row(&scratch.hidden, t));
    let gp = theta * score + (1.0 - theta) * delta;
    let alpha = if gp.abs() < 1e-4 {
        lr * (1.0 - score)
    } else {
        lr * theta * (1.0 - score) * score / gp
    };
    w_out.add_row_to(&mut scratch.grad, t, alpha);
    w_out.add_row(&scratch.hidden, t, alpha);
    (-scratch.log(gp), score)
}

/// 4.D.iii theta-gated negative update (`blContext`, non-label branch):
/// identical to `binary_logistic`'s negative case.
fn bl_context_negative(scratch: &mut LossScratch, w_out: &SharedMatrix, target: i32, lr: f32) -> f32 {
    binary_logistic(scratch, w_out, target, false, lr)
}

/// 4.D.iii `nsContext`: one theta-gated positive plus `neg` negatives.
/// Returns `(loss, p_context)` where `p_context` is the accumulated
/// positive score the caller divides by `nc` and writes back into `Θ`.
pub fn ns_context(
    scratch: &mut LossScratch,
    w_out: &SharedMatrix,
    target: i32,
    lr: f32,
    theta: f32,
    delta: f32,
    neg: usize,
) -> (f32, f32) {
    scratch.grad.zero();
    let (mut loss, score) = bl_context_positive(scratch, w_out, target, lr, theta, delta);
    let p_context = score;
    for _ in 0..neg {
        let n = scratch.get_negative(target);
        loss += bl_context_negative(scratch, w_out, n, lr);
    }
    (loss, p_context)
}

/// Huffman tree node for hierarchical softmax.
/// `original_source/src/model.cc::buildTree`.
#[derive(Debug, Clone, Copy)]
struct Node {
    parent: i32,
    left: i32,
    right: i32,
    count: i64,
    binary: bool,
}

pub struct HuffmanTree {
    tree: Vec<Node>,
    paths: Vec<Vec<i32>>,
    codes: Vec<Vec<bool>>,
}

impl HuffmanTree {
    /// Builds the Huffman tree over `osz` leaves (one per output-layer
    /// row) from their counts. `2*osz - 1` nodes total.
    pub fn build(counts: &[i64]) -> Self {
        let osz = counts.len();
        let mut tree = vec![
            Node {
                parent: -1,
                left: -1,
                right: -1,
                count: i64::MAX / 2,
                binary: false,
            };
            2 * osz - 1
        ];
        for i in 0..osz {
            tree[i].count = counts[i];
        }
        let mut leaf = osz as i32 - 1;
        let mut node = osz as i32;
        for i in osz..2 * osz - 1 {
            let mut mini = [0i32; 2];
            for slot in mini.iter_mut() {
                if leaf >= 0 && tree[leaf as usize].count < tree[node as usize].count {
                    *slot = leaf;
                    leaf -= 1;
                } else {
                    *slot = node;
                    node += 1;
                }
            }
            tree[i].left = mini[0];
            tree[i].right = mini[1];
            tree[i].count = tree[mini[0] as usize].count + tree[mini[1] as usize].count;
            tree[mini[0] as usize].parent = i as i32;
            tree[mini[1] as usize].parent = i as i32;
            tree[mini[1] as usize].binary = true;
        }
        let mut paths = Vec::with_capacity(osz);
        let mut codes = Vec::with_capacity(osz);
        for i in 0..osz {
            let mut path = Vec::new();
            let mut code = Vec::new();
            let mut j = i as i32;
            while tree[j as usize].parent != -1 {
                path.push(tree[j as usize].parent - osz as i32);
                code.push(tree[j as usize].binary);
                j = tree[j as usize].parent;
            }
            paths.push(path);
            codes.push(code);
        }
        Self { tree, paths, codes }
    }

    pub fn path(&self, target: i32) -> &[i32] {
        &self.paths[target as usize]
    }

    pub fn code(&self, target: i32) -> &[bool] {
        &self.codes[target as usize]
    }

    pub fn node_count(&self) -> usize {
        self.tree.len()
    }
}

/// 4.D.v Hierarchical softmax: walks the target's root-to-leaf path,
/// running a binary-logistic update per internal node against the path's
/// bit-code.
pub fn hierarchical_softmax(
    scratch: &mut LossScratch,
    w_out: &SharedMatrix,
    tree: &HuffmanTree,
    target: i32,
    lr: f32,
) -> f32 {
    scratch.grad.zero();
    let path = tree.path(target).to_vec();
    let code = tree.code(target).to_vec();
    let mut loss = 0.0;
    for i in 0..path.len() {
        loss += binary_logistic(scratch, w_out, path[i], code[i], lr);
    }
    loss
}

/// Full softmax of `W_out * hidden` with max-subtraction for stability.
pub fn compute_output_softmax(w_out: &SharedMatrix, hidden: &Vector) -> Vector {
    let (osz, _) = w_out.shape();
    let mut output = Vector::new(osz);
    for i in 0..osz {
        output.as_mut_slice()[i] = w_out.dot_row(hidden, i);
    }
    let max = output.as_slice().iter().cloned().fold(f32::MIN, f32::max);
    let mut z = 0.0f32;
    for v in output.as_mut_slice().iter_mut() {
        *v = (*v - max).exp();
        z += *v;
    }
    for v in output.as_mut_slice().iter_mut() {
        *v /= z;
    }
    output
}

/// 4.D.vi Softmax loss: accumulates cross-entropy gradient in one pass.
pub fn softmax_loss(scratch: &mut LossScratch, w_out: &SharedMatrix, target: i32, lr: f32) -> f32 {
    scratch.grad.zero();
    let output = compute_output_softmax(w_out, &scratch.hidden);
    let (osz, _) = w_out.shape();
    for i in 0..osz {
        let label = if i as i32 == target { 1.0 } else { 0.0 };
        let alpha = lr * (label - output.as_slice()[i]);
        w_out.add_row_to(&mut scratch.grad, i, alpha);
        w_out.add_row(&scratch.hidden, i, alpha);
    }
    -scratch.log(output.as_slice()[target as usize])
}

/// Result of 4.D.iv: the attended hidden vector plus the attention
/// weights, kept around for the backward pass.
pub struct AttnForward {
    pub hidden: Vector,
    pub alpha: Vec<f32>,
}

/// 4.D.iv `computeAttnHidden`. `pairs` are `(context_token, offset_index)`
/// with `offset_index in [0, 2*attnws]`. Uses the simplified scoring form
/// `z_k = attn[tok_k, off_k] + bias[off_k]`.
pub fn compute_attn_hidden(
    w_in: &SharedMatrix,
    attn: &SharedMatrix,
    bias: &SharedMatrix,
    pairs: &[(i32, usize)],
) -> AttnForward {
    let (_, dim) = w_in.shape();
    let z: Vec<f32> = pairs
        .iter()
        .map(|&(tok, off)| attn.get_cell(tok as usize, off) + bias.get_cell(0, off))
        .collect();
    let alpha = softmax_weights(&z);

    let mut hidden = Vector::new(dim);
    for (k, &(tok, _)) in pairs.iter().enumerate() {
        w_in.add_row_to(&mut hidden, tok as usize, alpha[k]);
    }
    AttnForward { hidden, alpha }
}

fn softmax_weights(z: &[f32]) -> Vec<f32> {
    let max = z.iter().cloned().fold(f32::MIN, f32::max);
    let exp: Vec<f32> = z.iter().map(|v| (*v - max).exp()).collect();
    let denom: f32 = exp.iter().sum();
    exp.iter().map(|v| v / denom).collect()
}

/// Backpropagates the NS gradient on `hidden` through the attention
/// softmax into `attn` and `bias`, and accumulates the `W_in` update for
/// every context token weighted by its `alpha`.
/// `∂L/∂z_k = ⟨grad_hidden, W_in[tok_k,:]⟩·α_k − α_k·Σ_j α_j·⟨grad_hidden, W_in[tok_j,:]⟩`.
fn backprop_attn(
    scratch: &LossScratch,
    w_in: &SharedMatrix,
    attn: &SharedMatrix,
    bias: &SharedMatrix,
    pairs: &[(i32, usize)],
    alpha: &[f32],
    lr: f32,
) {
    let dots: Vec<f32> = pairs
        .iter()
        .map(|&(tok, _)| w_in.dot_row(&scratch.grad, tok as usize))
        .collect();
    let weighted: f32 = dots.iter().zip(alpha).map(|(d, a)| d * a).sum();
    for (k, &(tok, off)) in pairs.iter().enumerate() {
        let dz = dots[k] * alpha[k] - alpha[k] * weighted;
        let cell = attn.get_cell(tok as usize, off);
        attn.update_cell(tok as usize, off, cell + lr * dz);
        let bias_cell = bias.get_cell(0, off);
        bias.update_cell(0, off, bias_cell + lr * dz);
        w_in.add_row(&scratch.grad, tok as usize, alpha[k]);
    }
}

/// Attention-v1 (`updateAttn`): classical NS against `target` using the
/// attended `hidden` from 4.D.iv, then [`backprop_attn`] into `attn`/`bias`
/// and `W_in`.
pub fn update_attn1(
    scratch: &mut LossScratch,
    w_in: &SharedMatrix,
    w_out: &SharedMatrix,
    attn: &SharedMatrix,
    bias: &SharedMatrix,
    pairs: &[(i32, usize)],
    target: i32,
    neg: usize,
    lr: f32,
) -> f32 {
    let fwd = compute_attn_hidden(w_in, attn, bias, pairs);
    scratch.hidden = fwd.hidden;
    let loss = negative_sampling(scratch, w_out, target, neg, lr);
    backprop_attn(scratch, w_in, attn, bias, pairs, &fwd.alpha, lr);
    loss
}

/// Attention-v2 (`updateAttn2`): v1 plus an additive bilinear term
/// `⟨W_in[target,:], W_in[tok_k,:]⟩` inside `z_k` (the resolved form of
/// the open question in SPEC_FULL.md, since the original `updateAttn2`
/// body is absent from the source).
pub fn update_attn2(
    scratch: &mut LossScratch,
    w_in: &SharedMatrix,
    w_out: &SharedMatrix,
    attn: &SharedMatrix,
    bias: &SharedMatrix,
    pairs: &[(i32, usize)],
    target: i32,
    neg: usize,
    lr: f32,
) -> f32 {
    let (_, dim) = w_in.shape();
    let target_row = w_in.row_copy(target as usize);
    let z: Vec<f32> = pairs
        .iter()
        .map(|&(tok, off)| {
            let base = attn.get_cell(tok as usize, off) + bias.get_cell(0, off);
            let tok_row = w_in.row_copy(tok as usize);
            let bilinear: f32 = (0..dim)
                .map(|d| target_row.as_slice()[d] * tok_row.as_slice()[d])
                .sum();
            base + bilinear
        })
        .collect();
    let alpha = softmax_weights(&z);

    let mut hidden = Vector::new(dim);
    for (k, &(tok, _)) in pairs.iter().enumerate() {
        w_in.add_row_to(&mut hidden, tok as usize, alpha[k]);
    }
    scratch.hidden = hidden;
    let loss = negative_sampling(scratch, w_out, target, neg, lr);
    backprop_attn(scratch, w_in, attn, bias, pairs, &alpha, lr);
    loss
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Matrix;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn shared(m: usize, n: usize) -> SharedMatrix {
        SharedMatrix::from_matrix(Matrix::new(m, n))
    }

    #[test]
    fn binary_logistic_moves_score_toward_label() {
        let w_out = shared(4, 3);
        let mut scratch = LossScratch::new(3);
        scratch.hidden.as_mut_slice().copy_from_slice(&[0.1, 0.2, 0.3]);
        let before = scratch.sigmoid(w_out.dot_row(&scratch.hidden, 0));
        binary_logistic(&mut scratch, &w_out, 0, true, 0.5);
        let after = scratch.sigmoid(w_out.dot_row(&scratch.hidden, 0));
        assert!(after >= before);
    }

    #[test]
    fn negative_sampling_rejects_target_as_negative() {
        let w_out = shared(2, 2);
        let mut scratch = LossScratch::new(2);
        scratch.hidden.as_mut_slice().copy_from_slice(&[0.5, 0.5]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        scratch.init_negatives(&[1, 1], &mut rng);
        for _ in 0..10 {
            assert_ne!(scratch.get_negative(0), 0);
        }
    }

    #[test]
    fn ns_context_positive_falls_back_when_gp_tiny() {
        let w_out = shared(2, 2);
        let mut scratch = LossScratch::new(2);
        scratch.hidden.as_mut_slice().copy_from_slice(&[0.0, 0.0]);
        // score(0) = sigmoid(0) = 0.5; theta=0, delta=0 -> gp = 0.
        let (loss, p) = bl_context_positive(&mut scratch, &w_out, 0, 0.1, 0.0, 0.0);
        assert!(loss.is_finite());
        assert!((p - 0.5).abs() < 1e-3);
    }

    #[test]
    fn huffman_tree_paths_cover_every_leaf() {
        let counts = vec![5, 3, 1, 1];
        let tree = HuffmanTree::build(&counts);
        assert_eq!(tree.node_count(), 2 * counts.len() - 1);
        for i in 0..counts.len() {
            assert_eq!(tree.path(i as i32).len(), tree.code(i as i32).len());
            assert!(!tree.path(i as i32).is_empty());
        }
    }

    #[test]
    fn softmax_output_sums_to_one() {
        let w_out = shared(3, 2);
        let hidden = Vector::new(2);
        let output = compute_output_softmax(&w_out, &hidden);
        let sum: f32 = output.as_slice().iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn scenario_s6_attention_is_uniform_when_weights_are_zero() {
        let w_in = shared(4, 2);
        let attn = shared(4, 3);
        let bias = shared(1, 3);
        let pairs = vec![(0, 0usize), (1, 1usize), (2, 2usize)];
        let fwd = compute_attn_hidden(&w_in, &attn, &bias, &pairs);
        for a in &fwd.alpha {
            assert!((a - 1.0 / 3.0).abs() < 1e-5);
        }
        let sum: f32 = fwd.alpha.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }
}
