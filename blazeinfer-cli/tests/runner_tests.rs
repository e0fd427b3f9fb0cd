use blazeinfer::checkpoint;
use blazeinfer::config::{Precision, Settings};
use blazeinfer::error::ProvisioningResult;
use blazeinfer::model::{ModelArgs, ParamSource, ParamSpec, SeededInit, Transformer};
use blazeinfer::{GenerateError, ModelExecutionError, StopReason};
use blazeinfer_cli::{Journal, Runner};
use ndarray::Array2;
use tempfile::tempdir;

fn small_settings() -> Settings {
    let mut settings = Settings::default();
    settings.model = ModelArgs {
        max_seq_len: 64,
        dim: 16,
        n_layers: 1,
        n_heads: 2,
        hidden_dim: 32,
        ..ModelArgs::default()
    };
    settings.generation.max_new_tokens = 4;
    settings
}

#[test]
fn test_respond_stays_within_budget() {
    let runner = Runner::from_settings(&small_settings()).unwrap();
    let generation = runner.respond("hello", None).unwrap();

    assert!(generation.tokens.len() <= 4);
    match generation.stop_reason {
        StopReason::MaxNewTokens => assert_eq!(generation.tokens.len(), 4),
        StopReason::EndOfSequence => assert!(generation.tokens.len() < 4),
    }
    let eos = runner.provisioned().eos_token_id;
    assert!(!generation.tokens.contains(&eos));
}

#[test]
fn test_streamed_output_matches_text() {
    let runner = Runner::from_settings(&small_settings()).unwrap();
    let mut out = Vec::new();
    let generation = runner.respond("hello world", Some(&mut out)).unwrap();

    assert_eq!(String::from_utf8(out).unwrap(), generation.text);
}

#[test]
fn test_repeated_prompts_are_independent() {
    let runner = Runner::from_settings(&small_settings()).unwrap();
    let first = runner.respond("what is rust", None).unwrap();
    runner.respond("something else entirely", None).unwrap();
    let again = runner.respond("what is rust", None).unwrap();

    assert_eq!(first.tokens, again.tokens);
    assert_eq!(first.model_calls, again.model_calls);
}

#[test]
fn test_journal_records_each_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("journal.db");
    let mut settings = small_settings();
    settings.journal.path = Some(path.clone());

    let runner = Runner::from_settings(&settings).unwrap();
    let a = runner.respond("hello", None).unwrap();
    let b = runner.respond("good morning", None).unwrap();

    let journal = runner.journal().unwrap();
    assert_eq!(journal.count().unwrap(), 2);
    let entries = journal.recent(10).unwrap();
    assert_eq!(entries[0].prompt, "hello");
    assert_eq!(entries[0].completion, a.text);
    assert_eq!(entries[1].prompt, "good morning");
    assert_eq!(entries[1].generated_tokens as usize, b.tokens.len());
    assert_eq!(entries[1].stop_reason, b.stop_reason.as_str());

    let stats = journal.stats().unwrap();
    assert_eq!(stats.total_runs, 2);
    assert_eq!(stats.total_tokens as usize, a.tokens.len() + b.tokens.len());

    drop(runner);
    let reopened = Journal::open(&path).unwrap();
    assert_eq!(reopened.count().unwrap(), 2);
}

/// Seeded weights with an all-zero output head, so every score ties and the
/// lowest id (`<pad>`) is picked at every step.
struct ZeroHead(SeededInit);

impl ParamSource for ZeroHead {
    fn next_param(&mut self, spec: &ParamSpec) -> ProvisioningResult<Array2<f32>> {
        if spec.name == "head" {
            return Ok(Array2::zeros(spec.shape));
        }
        self.0.next_param(spec)
    }
}

#[test]
fn test_context_overflow_reports_partial_output() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.blz");
    let mut settings = small_settings();
    // six prompt tokens leave room for exactly two new ones
    settings.model.max_seq_len = 7;
    settings.generation.max_new_tokens = 8;

    let model = Transformer::build(
        settings.model.clone(),
        Precision::F16,
        &mut ZeroHead(SeededInit::new(1)),
    )
    .unwrap();
    checkpoint::save(&model, &path).unwrap();
    settings.provision.checkpoint = Some(path);

    let runner = Runner::from_settings(&settings).unwrap();
    let err = runner.respond("hello", None).unwrap_err();
    assert!(format!("{err:#}").contains("after 2 tokens; partial output: <pad> <pad>"));

    let source = err.downcast_ref::<GenerateError>().unwrap();
    assert_eq!(source.partial_tokens(), &[0, 0]);
    assert_eq!(
        source.execution_error(),
        Some(&ModelExecutionError::ContextOverflow { len: 8, max: 7 })
    );
}

#[test]
fn test_runner_from_converted_checkpoint() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("model.blz");
    let settings = small_settings();

    let model = Transformer::seeded(settings.model.clone(), Precision::F16, 9).unwrap();
    checkpoint::save(&model, &path).unwrap();

    let mut from_file = settings.clone();
    from_file.provision.checkpoint = Some(path);
    let mut seeded = settings;
    seeded.provision.seed = 9;

    let a = Runner::from_settings(&from_file)
        .unwrap()
        .respond("hello", None)
        .unwrap();
    let b = Runner::from_settings(&seeded)
        .unwrap()
        .respond("hello", None)
        .unwrap();
    assert_eq!(a.tokens, b.tokens);
}

#[test]
fn test_accelerator_device_fails_at_first_step() {
    let mut settings = small_settings();
    settings.execution.device = "accelerator:0".parse().unwrap();

    let runner = Runner::from_settings(&settings).unwrap();
    let err = runner.respond("hello", None).unwrap_err();
    assert!(format!("{err:#}").contains("generation failed"));
}
