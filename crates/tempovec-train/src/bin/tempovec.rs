//! Command-line entry point.
//!
//! Grounded on `original_source/src/args.cc::parseArgs`/`printHelp` for the
//! flag set and dispatch, and on the teacher's `codebook_init.rs` for the
//! manual-argv-loop-plus-dedicated-thread idiom: heavy work runs on a named
//! thread with an oversized stack rather than the default `main` stack.

use std::path::Path;
use std::process::exit;

use tempovec_train::args::{Args, LossKind, ModelKind, TimeUnit};
use tempovec_train::{print_vectors, train};

const HELP: &str = "\
usage: tempovec <command> <args>

The commands supported by tempovec are:

  skipgram        train a time-weighted skip-gram model
  attn1           train an attention-v1 model
  attn2           train an attention-v2 model
  print-vectors   print word vectors given a trained model

The following arguments are mandatory for skipgram/attn1/attn2:
  -input              training file path
  -output             output file path

The following arguments are optional:
  -lr                 learning rate [0.05]
  -lrUpdateRate       rate of updates for the learning rate [100]
  -dim                size of word vectors [100]
  -ws                 size of the context window [5]
  -attnws             size of the attention window [5]
  -epoch              number of epochs [5]
  -minCount           minimal number of word occurrences [5]
  -minCountLabel      minimal number of label occurrences [0]
  -neg                number of negatives sampled [5]
  -wordNgrams         max length of word ngram [1]
  -loss               loss function {ns, hs, softmax} [ns]
  -bucket             number of buckets [2000000]
  -minn               min length of char ngram [3]
  -maxn               max length of char ngram [6]
  -thread             number of threads [12]
  -t                   sampling threshold [0.0001]
  -label              labels prefix [__label__]
  -verbose            verbosity level [2]
  -pretrainedVectors  pretrained word vectors for the input layer
  -beta               base shape parameter for the theta gate [10]
  -delta              fallback value for the theta-gated update [0.2]
  -timeUnit           time-unit for event coarsening {hour,day,week,month,season,year} [week]
  -nrand              RNG seed [16]
";

fn print_help_and_exit() -> ! {
    eprint!("{HELP}");
    exit(1);
}

fn run() -> Result<(), String> {
    let argv: Vec<String> = std::env::args().collect();
    if argv.len() < 2 {
        print_help_and_exit();
    }
    let command = argv[1].as_str();
    if command == "--help" || command == "-h" {
        print!("{HELP}");
        return Ok(());
    }
    if command == "print-vectors" {
        if argv.len() < 3 {
            return Err("print-vectors requires a model path".to_string());
        }
        return print_vectors(Path::new(&argv[2])).map_err(|e| e.to_string());
    }

    let model = ModelKind::parse(command).map_err(|e| e.to_string())?;
    let mut args = Args::new(model);

    let mut i = 2;
    while i < argv.len() {
        let flag = argv[i].as_str();
        if flag == "--help" || flag == "-h" {
            print_help_and_exit();
        }
        let value = argv.get(i + 1).ok_or_else(|| format!("missing value for {flag}"))?;
        match flag {
            "-input" => args.input = value.clone(),
            "-output" => args.output = value.clone(),
            "-test" => args.test = Some(value.clone()),
            "-lr" => args.lr = value.parse().map_err(|_| format!("invalid -lr value '{value}'"))?,
            "-lrUpdateRate" => {
                args.lr_update_rate = value
                    .parse()
                    .map_err(|_| format!("invalid -lrUpdateRate value '{value}'"))?
            }
            "-dim" => args.dim = value.parse().map_err(|_| format!("invalid -dim value '{value}'"))?,
            "-ws" => args.ws = value.parse().map_err(|_| format!("invalid -ws value '{value}'"))?,
            "-attnws" => args.attnws = value.parse().map_err(|_| format!("invalid -attnws value '{value}'"))?,
            "-epoch" => args.epoch = value.parse().map_err(|_| format!("invalid -epoch value '{value}'"))?,
            "-minCount" => {
                args.min_count = value.parse().map_err(|_| format!("invalid -minCount value '{value}'"))?
            }
            "-minCountLabel" => {
                args.min_count_label = value
                    .parse()
                    .map_err(|_| format!("invalid -minCountLabel value '{value}'"))?
            }
            "-neg" => args.neg = value.parse().map_err(|_| format!("invalid -neg value '{value}'"))?,
            "-wordNgrams" => {
                args.word_ngrams = value
                    .parse()
                    .map_err(|_| format!("invalid -wordNgrams value '{value}'"))?
            }
            "-loss" => args.loss = LossKind::parse(value).map_err(|e| e.to_string())?,
            "-bucket" => args.bucket = value.parse().map_err(|_| format!("invalid -bucket value '{value}'"))?,
            "-minn" => args.minn = value.parse().map_err(|_| format!("invalid -minn value '{value}'"))?,
            "-maxn" => args.maxn = value.parse().map_err(|_| format!("invalid -maxn value '{value}'"))?,
            "-thread" => args.thread = value.parse().map_err(|_| format!("invalid -thread value '{value}'"))?,
            "-t" => args.t = value.parse().map_err(|_| format!("invalid -t value '{value}'"))?,
            "-label" => args.label = value.clone(),
            "-verbose" => args.verbose = value.parse().map_err(|_| format!("invalid -verbose value '{value}'"))?,
            "-pretrainedVectors" => args.pretrained_vectors = Some(value.clone()),
            "-beta" => args.beta_base = value.parse().map_err(|_| format!("invalid -beta value '{value}'"))?,
            "-delta" => args.delta = value.parse().map_err(|_| format!("invalid -delta value '{value}'"))?,
            "-timeUnit" => args.time_unit = TimeUnit::parse(value).map_err(|e| e.to_string())?,
            "-nrand" => args.nrand = value.parse().map_err(|_| format!("invalid -nrand value '{value}'"))?,
            other => return Err(format!("unknown argument '{other}'")),
        }
        i += 2;
    }

    args.normalize();
    args.validate().map_err(|e| e.to_string())?;
    train(&args).map_err(|e| e.to_string())
}

fn main() {
    // Training holds the per-worker negative-sampling tables and scratch
    // vectors on the stack of whichever thread calls `scheduler::run`; give
    // that thread the same oversized stack the workers themselves get.
    let handle = std::thread::Builder::new()
        .name("tempovec-main".to_string())
        .stack_size(8 * 1024 * 1024)
        .spawn(run)
        .expect("failed to spawn main worker thread");

    match handle.join().expect("main worker thread panicked") {
        Ok(()) => {}
        Err(message) => {
            eprintln!("tempovec: {message}");
            exit(1);
        }
    }
}
