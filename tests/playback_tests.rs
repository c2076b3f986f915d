mod common;

use common::*;
use jumaudio::{AudioError, DeviceKind, EngineConfig, Lifecycle};
use std::time::Duration;

#[test]
fn missing_song_keeps_engine_audio_ready() {
    let (mut engine, _backend) = offline_engine(EngineConfig::new(4096 * 10, 5, 4096));

    let result = engine.play_song("missing.flac");

    assert!(matches!(result, Err(AudioError::NotFound(_))));
    assert_eq!(engine.lifecycle(), Lifecycle::AudioReady);
    assert!(engine.is_finished().unwrap());
}

#[test]
fn song_plays_to_the_end() {
    let dir = tempfile::tempdir().unwrap();
    let song = fixture(dir.path(), "song.wav", &vec![0.25; 4_000]);
    let (mut engine, backend) = offline_engine(small_config());

    engine.play_song(&song).unwrap();
    assert!(engine.engine_ready());
    assert!((engine.length_seconds().unwrap() - 0.5).abs() < 1e-9);

    for _ in 0..4 {
        assert!(!engine.is_finished().unwrap());
        wait_buffered(&engine, 1_000);
        backend.render(1_000);
    }

    assert!((engine.cursor_seconds().unwrap() - 0.5).abs() < 1e-9);
    assert!(wait_for(Duration::from_secs(5), || engine
        .is_finished()
        .unwrap_or(false)));
}

#[test]
fn pause_is_idempotent_and_resume_continues() {
    let dir = tempfile::tempdir().unwrap();
    let song = fixture(dir.path(), "song.wav", &vec![0.25; 4_000]);
    let (mut engine, backend) = offline_engine(small_config());
    engine.play_song(&song).unwrap();
    wait_buffered(&engine, 800);

    engine.pause().unwrap();
    engine.pause().unwrap();
    assert!(backend.render(400).iter().all(|&s| s == 0.0));

    engine.resume().unwrap();
    engine.resume().unwrap();
    let out = backend.render(400);
    assert!((out[0] - 0.25).abs() < 1e-3);
    assert!((engine.cursor_seconds().unwrap() - 0.05).abs() < 1e-9);
}

#[test]
fn volumes_are_clamped() {
    let (mut engine, _backend) = offline_engine(small_config());

    engine.set_music_volume(2.0).unwrap();
    engine.set_other_volume(-1.0).unwrap();
    let ctx = engine.context().unwrap();
    assert_eq!(ctx.music_volume(), 1.0);
    assert_eq!(ctx.other_volume(), 0.0);

    engine.set_music_volume(f32::NAN).unwrap();
    assert_eq!(engine.context().unwrap().music_volume(), 0.0);
}

#[test]
fn enumeration_is_idempotent() {
    let (mut engine, _backend) = offline_engine(small_config());

    let first = engine.enumerate_devices().unwrap();
    let second = engine.enumerate_devices().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.playback.len(), 1);
    assert!(first.default_device(DeviceKind::Capture).is_some());
}

#[test]
fn replacing_a_song_restarts_the_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let first = fixture(dir.path(), "first.wav", &vec![0.25; 4_000]);
    let second = fixture(dir.path(), "second.wav", &vec![-0.25; 2_000]);
    let (mut engine, backend) = offline_engine(small_config());

    engine.play_song(&first).unwrap();
    wait_buffered(&engine, 500);
    backend.render(500);
    assert!(engine.cursor_seconds().unwrap() > 0.0);

    engine.play_song(&second).unwrap();
    assert_eq!(engine.cursor_seconds().unwrap(), 0.0);
    assert!((engine.length_seconds().unwrap() - 0.25).abs() < 1e-9);

    wait_buffered(&engine, 100);
    let out = backend.render(100);
    assert!((out[0] + 0.25).abs() < 1e-3);
}

#[test]
fn operations_after_dispose_report_not_initialized() {
    let (mut engine, backend) = offline_engine(small_config());
    engine.open_playback_device(None).unwrap();

    engine.dispose();

    assert!(!backend.has_playback_stream());
    assert!(matches!(
        engine.set_music_volume(0.5),
        Err(AudioError::NotInitialized)
    ));
    assert!(matches!(
        engine.cursor_seconds(),
        Err(AudioError::NotInitialized)
    ));
}

#[test]
fn starved_callback_fills_silence_and_counts_an_underrun() {
    let dir = tempfile::tempdir().unwrap();
    let song = fixture(dir.path(), "long.wav", &vec![0.25; 40_000]);
    let (mut engine, backend) = offline_engine(small_config());
    engine.play_song(&song).unwrap();

    // Decoder stops at the predecode depth
    let queued = small_config().predecode_frames();
    wait_buffered(&engine, queued);

    let out = backend.render(20_000);

    assert!(out[..queued * 2].iter().all(|&s| (s - 0.25).abs() < 1e-3));
    assert!(out[queued * 2..].iter().all(|&s| s == 0.0));
    assert_eq!(engine.status().underruns, 1);
    assert!(!engine.is_finished().unwrap());
}
