#[macro_use]
extern crate criterion;

use criterion::{black_box, Criterion};
use mini_bert::bert::{BertConfig, BertForPreTraining};
use mini_bert::pretraining::{sample_batch, PreTrainingBatch, Vocabulary, TOY_CORPUS};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::{Duration, Instant};
use tch::{nn, no_grad, Device};

fn pretraining_forward_pass(
    iters: u64,
    model: &BertForPreTraining,
    batch: &PreTrainingBatch,
) -> Duration {
    let mut duration = Duration::new(0, 0);
    for _i in 0..iters {
        let start = Instant::now();
        let _ = no_grad(|| {
            model.forward_t(
                &batch.input_ids,
                Some(&batch.token_type_ids),
                &batch.masked_positions,
                false,
            )
        })
        .unwrap();
        duration = duration.checked_add(start.elapsed()).unwrap();
    }
    duration
}

fn bench_pretraining(c: &mut Criterion) {
    //    Set-up model and toy batch
    let device = Device::cuda_if_available();
    let vocab = Vocabulary::from_text(TOY_CORPUS);
    let config = BertConfig {
        vocab_size: vocab.len() as i64,
        ..Default::default()
    };
    let vs = nn::VarStore::new(device);
    let model = BertForPreTraining::new(&vs.root(), &config).unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let examples = sample_batch(&vocab.encoded_sentences(), &config, &mut rng).unwrap();
    let batch = PreTrainingBatch::from_examples(&examples, device).unwrap();

    c.bench_function("Pre-training forward pass", |b| {
        b.iter_custom(|iters| black_box(pretraining_forward_pass(iters, &model, &batch)))
    });
}

criterion_group! {
name = benches;
config = Criterion::default().sample_size(10);
targets = bench_pretraining
}

criterion_main!(benches);
