//! End-to-end coverage: train a tiny corpus through `tempovec_train::train`
//! and check the written model round-trips through `persist::load_model`.

use std::fs;
use std::io::BufReader;

use tempovec_train::args::{LossKind, ModelKind};
use tempovec_train::{persist, Args};

fn tiny_corpus() -> String {
    let mut corpus = String::new();
    corpus.push_str(&"[[100,[a,b,c]],[200,[b,c,d]]]\n".repeat(30));
    corpus.push_str(&"[[300,[c,d,e]],[400,[d,e,a]]]\n".repeat(30));
    corpus
}

fn base_args(input: &str, output: &str) -> Args {
    let mut args = Args::new(ModelKind::Sg);
    args.input = input.to_string();
    args.output = output.to_string();
    args.loss = LossKind::Ns;
    args.dim = 8;
    args.ws = 2;
    args.epoch = 1;
    args.min_count = 1;
    args.neg = 2;
    args.thread = 2;
    args.bucket = 0;
    args.maxn = 0;
    args.word_ngrams = 1;
    args.verbose = 0;
    args.normalize();
    args
}

#[test]
fn skipgram_model_round_trips_through_persist() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("corpus.txt");
    fs::write(&input_path, tiny_corpus()).unwrap();
    let output_stem = dir.path().join("model");

    let args = base_args(input_path.to_str().unwrap(), output_stem.to_str().unwrap());
    tempovec_train::train(&args).unwrap();

    let bin_path = output_stem.with_extension("bin");
    assert!(bin_path.exists());
    assert!(output_stem.with_extension("vec").exists());
    assert!(output_stem.with_extension("theta").exists());

    let file = fs::File::open(&bin_path).unwrap();
    let mut reader = BufReader::new(file);
    let loaded = persist::load_model(&mut reader).unwrap();

    assert_eq!(loaded.args.dim, args.dim);
    assert_eq!(loaded.args.model, ModelKind::Sg);
    assert!(loaded.dict.nwords() >= 5);
    let (rows, cols) = loaded.params.w_in.shape();
    assert_eq!(rows, loaded.dict.nwords() + args.bucket);
    assert_eq!(cols, args.dim);
    assert!(loaded.params.theta.is_some());
    assert!(loaded.params.attn.is_none());
}

#[test]
fn attn1_model_round_trips_through_persist() {
    let dir = tempfile::tempdir().unwrap();
    let input_path = dir.path().join("corpus.txt");
    fs::write(&input_path, tiny_corpus()).unwrap();
    let output_stem = dir.path().join("model");

    let mut args = base_args(input_path.to_str().unwrap(), output_stem.to_str().unwrap());
    args.model = ModelKind::Attn1;
    args.attnws = 2;

    tempovec_train::train(&args).unwrap();

    let bin_path = output_stem.with_extension("bin");
    let file = fs::File::open(&bin_path).unwrap();
    let mut reader = BufReader::new(file);
    let loaded = persist::load_model(&mut reader).unwrap();

    assert_eq!(loaded.args.model, ModelKind::Attn1);
    assert!(loaded.params.attn.is_some());
    assert!(loaded.params.theta.is_none());
    assert!(output_stem.with_extension("attn").exists());
    assert!(output_stem.with_extension("bias").exists());
}
