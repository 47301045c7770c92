//! End-to-end engine tests over real WAV files and the sqlite index.

use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use waveprint_core::audio::SymphoniaLoader;
use waveprint_core::{
    ChromaParams, Engine, ExtractorConfig, HashAlgorithm, MatchOutcome, MaximaPairingParams,
    RegisterOutcome, SpectralPatchParams, SqliteIndex, TimeWindow,
};

const SR: u32 = 22050;
const HOP: usize = 512;

/// A deterministic "melody": a sequence of equal-length tones.
fn tone_sequence(freqs: &[f32], seconds_each: f32) -> Vec<f32> {
    let mut samples = Vec::new();
    for &freq in freqs {
        samples.extend(
            (0..(SR as f32 * seconds_each) as usize)
                .map(|n| 0.5 * (2.0 * PI * freq * n as f32 / SR as f32).sin()),
        );
    }
    samples
}

fn write_wav(path: &Path, samples: &[f32]) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: SR,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

fn maxima_config() -> ExtractorConfig {
    ExtractorConfig::MaximaPairing(MaximaPairingParams {
        sample_rate: SR,
        n_fft: 1024,
        hop_length: HOP,
        neighborhood_size: 20,
        min_amplitude: 1.0,
        target_t_min: 1,
        target_t_max: 40,
        target_f_max_delta: 200,
        hash_algorithm: HashAlgorithm::Sha1,
    })
}

struct Fixture {
    _dir: tempfile::TempDir,
    engine: Engine,
    index: SqliteIndex,
    root: PathBuf,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let index = SqliteIndex::open(&root.join("index.db")).await.unwrap();
    let engine = Engine::new(Arc::new(index.clone()), Arc::new(SymphoniaLoader::new()));
    Fixture {
        _dir: dir,
        engine,
        index,
        root,
    }
}

/// Main melody fixture: eight tones, six seconds.
fn melody() -> Vec<f32> {
    tone_sequence(
        &[392.0, 523.0, 659.0, 784.0, 440.0, 587.0, 698.0, 880.0],
        0.75,
    )
}

fn other_melody() -> Vec<f32> {
    tone_sequence(&[330.0, 415.0, 494.0, 622.0], 1.0)
}

async fn fingerprint_rows(index: &SqliteIndex) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM fingerprints")
        .fetch_one(index.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn self_identification_tops_the_ranking() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    let config = maxima_config();

    let melody_path = fx.root.join("melody.wav");
    let other_path = fx.root.join("other.wav");
    write_wav(&melody_path, &melody());
    write_wav(&other_path, &other_melody());

    let outcome = fx
        .engine
        .register_file(&melody_path, &config, &cancel)
        .await
        .unwrap();
    let RegisterOutcome::Registered { reference_id, fingerprints } = outcome else {
        panic!("expected a fresh registration");
    };
    assert!(fingerprints > 0, "the tone fixture must produce fingerprints");

    fx.engine
        .register_file(&other_path, &config, &cancel)
        .await
        .unwrap();

    let matched = fx
        .engine
        .identify(&melody_path, &config, None, &cancel)
        .await
        .unwrap();
    let MatchOutcome::Match(report) = matched else {
        panic!("expected a match");
    };

    assert_eq!(report.best.reference_id, reference_id);
    assert_eq!(report.best.offset_frames, 0);
    // Every query fingerprint votes for offset zero against its own record.
    assert!(
        report.best.score >= report.query_fingerprints as u64,
        "score {} below query count {}",
        report.best.score,
        report.query_fingerprints
    );
    assert_eq!(report.reference.filename, "melody.wav");
}

#[tokio::test]
async fn subclip_recovers_the_time_offset() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    let config = maxima_config();

    let melody_path = fx.root.join("melody.wav");
    write_wav(&melody_path, &melody());
    fx.engine
        .register_file(&melody_path, &config, &cancel)
        .await
        .unwrap();

    // A window starting 86 hops into the file, so the query's frame grid
    // coincides with the registered one and the histogram peaks at 86.
    let expected_offset = 86i64;
    let start_s = (expected_offset as f64 * HOP as f64 + 0.5) / f64::from(SR);
    let outcome = fx
        .engine
        .identify(
            &melody_path,
            &config,
            Some(TimeWindow {
                start_s,
                end_s: 4.0,
            }),
            &cancel,
        )
        .await
        .unwrap();

    let MatchOutcome::Match(report) = outcome else {
        panic!("expected a match");
    };
    assert!(
        (report.best.offset_frames - expected_offset).abs() <= 1,
        "expected offset ~{expected_offset} frames, got {}",
        report.best.offset_frames
    );
}

#[tokio::test]
async fn wrong_algorithm_query_finds_nothing() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();

    let melody_path = fx.root.join("melody.wav");
    write_wav(&melody_path, &melody());
    fx.engine
        .register_file(&melody_path, &maxima_config(), &cancel)
        .await
        .unwrap();

    let chroma = ExtractorConfig::Chroma(ChromaParams {
        sample_rate: SR,
        n_fft: 1024,
        hop_length: HOP,
        threshold: 0.5,
        hash_algorithm: HashAlgorithm::Sha1,
    });
    let outcome = fx
        .engine
        .identify(&melody_path, &chroma, None, &cancel)
        .await
        .unwrap();
    assert!(
        !outcome.is_match(),
        "maxima-pairing fingerprints must be invisible to chroma lookups"
    );
}

#[tokio::test]
async fn duplicate_path_registration_adds_no_rows() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    let config = maxima_config();

    let melody_path = fx.root.join("melody.wav");
    write_wav(&melody_path, &melody());

    let first = fx
        .engine
        .register_file(&melody_path, &config, &cancel)
        .await
        .unwrap();
    let RegisterOutcome::Registered { reference_id, .. } = first else {
        panic!("expected a fresh registration");
    };
    let rows_before = fingerprint_rows(&fx.index).await;

    let second = fx
        .engine
        .register_file(&melody_path, &config, &cancel)
        .await
        .unwrap();
    let RegisterOutcome::AlreadyRegistered { reference_id: again } = second else {
        panic!("expected the short circuit");
    };

    assert_eq!(again, reference_id);
    assert_eq!(fingerprint_rows(&fx.index).await, rows_before);
}

#[tokio::test]
async fn clear_then_reregister_yields_unique_session_ids() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    let config = maxima_config();

    let mut paths = Vec::new();
    for (i, freqs) in [
        [392.0f32, 523.0, 659.0, 784.0],
        [330.0, 415.0, 494.0, 622.0],
        [349.0, 466.0, 554.0, 740.0],
    ]
    .iter()
    .enumerate()
    {
        let path = fx.root.join(format!("ref{i}.wav"));
        write_wav(&path, &tone_sequence(freqs, 0.75));
        paths.push(path);
    }

    let summary = fx
        .engine
        .register_all(&paths, &config, &cancel)
        .await
        .unwrap();
    assert_eq!(summary.registered, 3);
    assert!(summary.failures.is_empty());

    fx.engine.clear().await.unwrap();

    let mut ids = std::collections::HashSet::new();
    for path in &paths {
        let outcome = fx
            .engine
            .register_file(path, &config, &cancel)
            .await
            .unwrap();
        let RegisterOutcome::Registered { reference_id, .. } = outcome else {
            panic!("expected fresh registrations after clear");
        };
        ids.insert(reference_id);
    }
    assert_eq!(ids.len(), 3, "ids must stay unique within a session");
}

#[tokio::test]
async fn registration_is_deterministic_across_stores() {
    let config = maxima_config();
    let cancel = CancellationToken::new();

    let dir = tempfile::tempdir().unwrap();
    let melody_path = dir.path().join("melody.wav");
    write_wav(&melody_path, &melody());

    let mut row_sets = Vec::new();
    for name in ["first.db", "second.db"] {
        let index = SqliteIndex::open(&dir.path().join(name)).await.unwrap();
        let engine = Engine::new(Arc::new(index.clone()), Arc::new(SymphoniaLoader::new()));
        engine
            .register_file(&melody_path, &config, &cancel)
            .await
            .unwrap();

        let mut rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT hash_hex, local_time FROM fingerprints")
                .fetch_all(index.pool())
                .await
                .unwrap();
        rows.sort();
        row_sets.push(rows);
    }

    assert_eq!(row_sets[0], row_sets[1]);
    assert!(!row_sets[0].is_empty());
}

#[tokio::test]
async fn spectral_patch_round_trips() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    let config = ExtractorConfig::SpectralPatch(SpectralPatchParams {
        sample_rate: SR,
        n_fft: 1024,
        hop_length: HOP,
        patch_size: 16,
        min_patch_energy: 0.5,
        hash_algorithm: HashAlgorithm::Sha256,
    });

    let melody_path = fx.root.join("melody.wav");
    write_wav(&melody_path, &melody());

    let outcome = fx
        .engine
        .register_file(&melody_path, &config, &cancel)
        .await
        .unwrap();
    assert!(matches!(outcome, RegisterOutcome::Registered { .. }));

    let matched = fx
        .engine
        .identify(&melody_path, &config, None, &cancel)
        .await
        .unwrap();
    let MatchOutcome::Match(report) = matched else {
        panic!("expected a match");
    };
    assert_eq!(report.best.offset_frames, 0);
}

#[tokio::test]
async fn chroma_round_trips() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    let config = ExtractorConfig::Chroma(ChromaParams {
        sample_rate: SR,
        n_fft: 1024,
        hop_length: HOP,
        threshold: 0.5,
        hash_algorithm: HashAlgorithm::Sha1,
    });

    let melody_path = fx.root.join("melody.wav");
    write_wav(&melody_path, &melody());

    fx.engine
        .register_file(&melody_path, &config, &cancel)
        .await
        .unwrap();

    let matched = fx
        .engine
        .identify(&melody_path, &config, None, &cancel)
        .await
        .unwrap();
    let MatchOutcome::Match(report) = matched else {
        panic!("expected a match");
    };
    assert_eq!(report.best.reference_id, report.reference.id);
    assert_eq!(report.best.offset_frames, 0);
}

#[tokio::test]
async fn unregistered_query_is_a_no_match() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    let config = maxima_config();

    let melody_path = fx.root.join("melody.wav");
    let stranger_path = fx.root.join("stranger.wav");
    write_wav(&melody_path, &melody());
    write_wav(&stranger_path, &tone_sequence(&[1047.0, 1319.0, 1568.0], 1.0));

    fx.engine
        .register_file(&melody_path, &config, &cancel)
        .await
        .unwrap();

    let outcome = fx
        .engine
        .identify(&stranger_path, &config, None, &cancel)
        .await
        .unwrap();
    assert!(!outcome.is_match());
}
