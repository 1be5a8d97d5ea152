extern crate anyhow;

use mini_bert::bert::{BertConfig, BertForPreTraining, BertForPreTrainingOutput};
use mini_bert::pretraining::{
    predict, pretraining_loss, sample_batch, train, PreTrainingBatch, TrainingConfig, Vocabulary,
    CLS_ID, PAD_ID, SEP_ID, TOY_CORPUS,
};
use mini_bert::Config;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tch::{nn, no_grad, Device, Kind, Tensor};

fn toy_config(vocab: &Vocabulary) -> BertConfig {
    BertConfig {
        vocab_size: vocab.len() as i64,
        n_layers: 1,
        n_heads: 2,
        d_model: 32,
        d_ff: 64,
        d_k: 16,
        d_v: 16,
        ..Default::default()
    }
}

#[test]
fn toy_batch_is_balanced() -> anyhow::Result<()> {
    let vocab = Vocabulary::from_text(TOY_CORPUS);
    let config = toy_config(&vocab);
    let mut rng = StdRng::seed_from_u64(42);
    let examples = sample_batch(&vocab.encoded_sentences(), &config, &mut rng)?;

    assert_eq!(examples.len(), 6);
    assert_eq!(examples.iter().filter(|example| example.is_next).count(), 3);

    for example in &examples {
        assert_eq!(example.input_ids.len(), 30);
        assert_eq!(example.token_type_ids.len(), 30);
        assert_eq!(example.masked_lm_labels.len(), 5);
        assert_eq!(example.masked_positions.len(), 5);
        assert!(example.num_predictions >= 1 && example.num_predictions <= 5);
        assert_eq!(example.input_ids[0], CLS_ID);
        assert_eq!(
            example.input_ids.iter().filter(|&&id| id == SEP_ID).count(),
            2
        );

        for slot in 0..example.num_predictions {
            let position = example.masked_positions[slot];
            let label = example.masked_lm_labels[slot];
            assert!(position > 0 && position < 30);
            assert!(label >= 4 && label < vocab.len() as i64);
        }
        for slot in example.num_predictions..5 {
            assert_eq!(example.masked_positions[slot], 0);
            assert_eq!(example.masked_lm_labels[slot], PAD_ID);
        }
    }
    Ok(())
}

#[test]
fn batch_sampling_is_reproducible() -> anyhow::Result<()> {
    let vocab = Vocabulary::from_text(TOY_CORPUS);
    let config = toy_config(&vocab);
    let sentences = vocab.encoded_sentences();

    let first = sample_batch(&sentences, &config, &mut StdRng::seed_from_u64(3))?;
    let second = sample_batch(&sentences, &config, &mut StdRng::seed_from_u64(3))?;
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn sentences_without_candidates_yield_zero_padded_targets() -> anyhow::Result<()> {
    tch::manual_seed(0);
    let config = BertConfig {
        vocab_size: 8,
        batch_size: 2,
        n_layers: 1,
        n_heads: 2,
        d_model: 32,
        d_ff: 64,
        d_k: 16,
        d_v: 16,
        ..Default::default()
    };
    let sentences: Vec<Vec<i64>> = vec![vec![], vec![]];
    let examples = sample_batch(&sentences, &config, &mut StdRng::seed_from_u64(0))?;

    for example in &examples {
        assert_eq!(example.num_predictions, 0);
        assert_eq!(example.masked_positions, vec![0; 5]);
        assert_eq!(example.masked_lm_labels, vec![0; 5]);
        assert_eq!(&example.input_ids[..3], &[CLS_ID, SEP_ID, SEP_ID]);
    }

    let vs = nn::VarStore::new(Device::Cpu);
    let model = BertForPreTraining::new(&vs.root(), &config)?;
    let batch = PreTrainingBatch::from_examples(&examples, Device::Cpu)?;
    let output = no_grad(|| {
        model.forward_t(
            &batch.input_ids,
            Some(&batch.token_type_ids),
            &batch.masked_positions,
            false,
        )
    })?;
    assert_eq!(output.prediction_scores.size(), vec![2, 5, 8]);
    assert_eq!(output.seq_relationship_scores.size(), vec![2, 2]);
    let non_finite = output.prediction_scores.isnan().sum(Kind::Int64)
        + output.prediction_scores.isinf().sum(Kind::Int64);
    assert_eq!(non_finite.int64_value(&[]), 0);

    let loss = pretraining_loss(&output, &batch)?.double_value(&[]);
    assert!(loss.is_finite());
    Ok(())
}

#[test]
fn batch_tensors_have_fixed_geometry() -> anyhow::Result<()> {
    let vocab = Vocabulary::from_text(TOY_CORPUS);
    let config = toy_config(&vocab);
    let examples = sample_batch(
        &vocab.encoded_sentences(),
        &config,
        &mut StdRng::seed_from_u64(42),
    )?;
    let batch = PreTrainingBatch::from_examples(&examples, Device::Cpu)?;

    assert_eq!(batch.input_ids.size(), vec![6, 30]);
    assert_eq!(batch.token_type_ids.size(), vec![6, 30]);
    assert_eq!(batch.masked_lm_labels.size(), vec![6, 5]);
    assert_eq!(batch.masked_positions.size(), vec![6, 5]);
    assert_eq!(batch.masked_lm_weights.size(), vec![6, 5]);
    assert_eq!(batch.next_sentence_labels.size(), vec![6]);
    assert_eq!(batch.input_ids.kind(), Kind::Int64);

    let real_predictions: usize = examples.iter().map(|e| e.num_predictions).sum();
    assert_eq!(
        batch.masked_lm_weights.sum(Kind::Int64).int64_value(&[]),
        real_predictions as i64
    );
    assert_eq!(batch.next_sentence_labels.sum(Kind::Int64).int64_value(&[]), 3);
    assert!(PreTrainingBatch::from_examples(&[], Device::Cpu).is_err());
    Ok(())
}

#[test]
fn loss_ignores_padded_prediction_slots() -> anyhow::Result<()> {
    let vocab_size = 6i64;
    let mut scores = vec![0f32; 2 * vocab_size as usize];
    scores[5] = 50.0;
    scores[vocab_size as usize + 2] = 50.0;
    let output = BertForPreTrainingOutput {
        prediction_scores: Tensor::of_slice(&scores).view((1, 2, vocab_size)),
        seq_relationship_scores: Tensor::of_slice(&[50f32, 0.0]).view((1, 2)),
        all_hidden_states: None,
        all_attentions: None,
    };
    let batch = PreTrainingBatch {
        input_ids: Tensor::zeros(&[1, 4], (Kind::Int64, Device::Cpu)),
        token_type_ids: Tensor::zeros(&[1, 4], (Kind::Int64, Device::Cpu)),
        masked_lm_labels: Tensor::of_slice(&[5i64, 0]).view((1, 2)),
        masked_positions: Tensor::of_slice(&[1i64, 0]).view((1, 2)),
        masked_lm_weights: Tensor::of_slice(&[1i64, 0]).view((1, 2)),
        next_sentence_labels: Tensor::of_slice(&[0i64]),
    };

    let loss = pretraining_loss(&output, &batch)?.double_value(&[]);
    assert!(loss.is_finite());
    assert!(loss < 1e-6);

    let no_predictions = PreTrainingBatch {
        masked_lm_weights: Tensor::zeros(&[1, 2], (Kind::Int64, Device::Cpu)),
        ..batch
    };
    let loss = pretraining_loss(&output, &no_predictions)?.double_value(&[]);
    assert!(loss.is_finite());
    Ok(())
}

#[test]
fn training_reduces_the_loss() -> anyhow::Result<()> {
    tch::manual_seed(42);
    let vocab = Vocabulary::from_text(TOY_CORPUS);
    let config = toy_config(&vocab);
    let vs = nn::VarStore::new(Device::Cpu);
    let model = BertForPreTraining::new(&vs.root(), &config)?;

    let examples = sample_batch(
        &vocab.encoded_sentences(),
        &config,
        &mut StdRng::seed_from_u64(42),
    )?;
    let batch = PreTrainingBatch::from_examples(&examples, Device::Cpu)?;
    let training_config = TrainingConfig {
        epochs: 40,
        learning_rate: 0.005,
        log_every: 10,
        seed: 42,
    };
    let losses = train(&model, &vs, &batch, &training_config)?;

    assert_eq!(losses.len(), 40);
    assert!(losses.iter().all(|loss| loss.is_finite()));
    assert!(losses[39] < losses[0]);

    let predictions = predict(&model, &batch)?;
    assert_eq!(predictions.masked_token_ids.len(), 6);
    assert_eq!(predictions.is_next.len(), 6);
    for row in &predictions.masked_token_ids {
        assert_eq!(row.len(), 5);
        assert!(row.iter().all(|&id| id >= 0 && id < vocab.len() as i64));
    }
    Ok(())
}

#[test]
fn training_config_file_round_trip() -> anyhow::Result<()> {
    let training_config = TrainingConfig {
        epochs: 5,
        ..Default::default()
    };
    let config_file = tempfile::NamedTempFile::new()?;
    training_config.to_file(config_file.path())?;
    assert_eq!(TrainingConfig::from_file(config_file.path())?, training_config);
    Ok(())
}
