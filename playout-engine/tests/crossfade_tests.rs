//! Crossfade timing and end-of-track behavior
//!
//! Runs on the paused tokio clock; positions come from the clock output, so
//! every timing below is exact to one engine tick (50ms).

mod helpers;

use helpers::*;
use playout_common::events::{ChannelLabel, PlayoutEvent, PlayoutMode};

#[tokio::test(start_paused = true)]
async fn test_natural_crossfade_at_lead_time() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 30.0);
    let t2 = t.track("t2", 30.0);
    t.engine.enqueue(t1.clone());
    t.engine.enqueue(t2);

    t.engine.play(t1).await.unwrap();
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("t1"));
    assert_eq!(t.queue_ids(), vec!["t2"]);
    assert_eq!(t.engine.transport().active(), ChannelLabel::B);

    t.step_secs(25.9).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert!(t.engine.transport().channel(ChannelLabel::A).bound_track_id().is_none());

    // 26s: four seconds left
    t.step_secs(0.2).await;
    assert_eq!(t.mode(), PlayoutMode::Crossfading);
    assert_eq!(
        t.engine.transport().channel(ChannelLabel::A).bound_track_id(),
        Some("t2")
    );
    // Head stays queued until the handover completes
    assert_eq!(t.queue_ids(), vec!["t2"]);
    assert_eq!(t.current_id().as_deref(), Some("t1"));

    // 27s: one second of crossfade done
    t.step_secs(1.2).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("t2"));
    assert!(t.queue_ids().is_empty());
    assert_eq!(t.engine.transport().active(), ChannelLabel::A);
    assert!(t.engine.transport().channel(ChannelLabel::B).bound_track_id().is_none());
    assert!((t.output_volume(ChannelLabel::A) - 0.8).abs() < 1e-6);

    assert_eq!(
        event_names(&t.telemetry.events()),
        vec!["PlayStarted(t1)", "PlayStarted(t2)", "TrackEnded(t1)"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_crossfade_volumes_move_in_opposite_directions() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 30.0);
    let t2 = t.track("t2", 30.0);
    t.engine.enqueue(t2);
    t.engine.play(t1).await.unwrap();

    t.step_secs(26.5).await;
    assert_eq!(t.mode(), PlayoutMode::Crossfading);
    let incoming = t.engine.transport().volume(ChannelLabel::A);
    let outgoing = t.engine.transport().volume(ChannelLabel::B);
    assert!(incoming > 0.2 && incoming < 0.6, "incoming at {}", incoming);
    assert!(outgoing > 0.2 && outgoing < 0.6, "outgoing at {}", outgoing);
    assert!(incoming + outgoing <= 0.8 + 1e-4);
}

#[tokio::test(start_paused = true)]
async fn test_skip_next_during_crossfade_is_ignored() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 30.0);
    let t2 = t.track("t2", 30.0);
    let t3 = t.track("t3", 30.0);
    t.engine.enqueue(t2);
    t.engine.enqueue(t3);
    t.engine.play(t1).await.unwrap();

    t.step_secs(26.1).await;
    assert_eq!(t.mode(), PlayoutMode::Crossfading);

    t.engine.skip_next().await.unwrap();
    assert_eq!(t.mode(), PlayoutMode::Crossfading);
    assert_eq!(t.queue_ids(), vec!["t2", "t3"]);
    assert_eq!(t.current_id().as_deref(), Some("t1"));

    t.step_secs(1.2).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("t2"));
    assert_eq!(t.queue_ids(), vec!["t3"]);
}

#[tokio::test(start_paused = true)]
async fn test_short_track_plays_to_natural_end_without_crossfade() {
    let mut t = TestEngine::standard();
    // Exactly lead + 1s: too short to crossfade out of
    let t1 = t.track("t1", 5.0);
    let t2 = t.track("t2", 30.0);
    t.engine.enqueue(t2);
    t.engine.play(t1).await.unwrap();

    t.step_secs(4.5).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("t1"));
    assert_eq!(t.opened_uris(), vec![stream_uri("t1")]);

    t.step_secs(0.6).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("t2"));
    assert!(t.queue_ids().is_empty());
    assert_eq!(
        event_names(&t.telemetry.events()),
        vec!["PlayStarted(t1)", "TrackEnded(t1)", "PlayStarted(t2)"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_duration_never_crossfades() {
    let mut t = TestEngine::standard();
    let live = playout_common::Track::new("live", "Live Feed");
    t.resolver.add(live.clone());
    let t2 = t.track("t2", 30.0);
    t.engine.enqueue(t2);
    t.engine.play(live).await.unwrap();

    t.step_secs(120.0).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("live"));
    assert_eq!(t.queue_ids(), vec!["t2"]);
}

#[tokio::test(start_paused = true)]
async fn test_solo_fade_out_then_idle_when_queue_empty() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 10.0);
    t.engine.play(t1).await.unwrap();

    t.step_secs(5.0).await;
    assert!((t.engine.transport().volume(ChannelLabel::B) - 0.8).abs() < 1e-6);

    // Fade-out starts at 6s and lasts 3s
    t.step_secs(3.0).await;
    let level = t.engine.transport().volume(ChannelLabel::B);
    assert!(level > 0.05 && level < 0.75, "fade-out level {}", level);
    assert_eq!(t.mode(), PlayoutMode::Playing);

    t.step_secs(2.1).await;
    assert_eq!(t.mode(), PlayoutMode::Idle);
    assert!(t.current_id().is_none());
    assert_eq!(
        event_names(&t.telemetry.events()),
        vec!["PlayStarted(t1)", "TrackEnded(t1)"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_short_track_still_fades_out_when_queue_empty() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 5.0);
    t.engine.play(t1).await.unwrap();

    // Fade-out replaces the fade-in at 1s and is silent by 4s
    t.step_secs(4.5).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert!(t.engine.transport().volume(ChannelLabel::B) < 0.01);

    t.step_secs(0.6).await;
    assert_eq!(t.mode(), PlayoutMode::Idle);
    assert_eq!(
        event_names(&t.telemetry.events()),
        vec!["PlayStarted(t1)", "TrackEnded(t1)"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_failed_play_now_does_not_replay_interrupted_track() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 60.0);
    let t2 = t.track("t2", 60.0);
    let missing = t.track("missing", 60.0);
    t.resolver.set_unavailable("missing", true);
    t.engine.enqueue(t2);
    t.engine.play(t1).await.unwrap();
    t.step_secs(5.0).await;

    t.engine.play_now(missing, true).await.unwrap();
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("t1"));
    assert_eq!(t.queue_ids(), vec!["t2"]);
    assert_eq!(t.engine.consecutive_error_count(), 1);

    // t1 runs out and hands over to t2, once
    t.step_secs(56.0).await;
    assert_eq!(t.current_id().as_deref(), Some("t2"));
    assert!(t.queue_ids().is_empty());
    assert_eq!(
        event_names(&t.telemetry.events()),
        vec![
            "PlayStarted(t1)",
            "Error(resource_unavailable)",
            "TrackEnded(t1)",
            "PlayStarted(t2)"
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_play_now_requeues_and_quick_crossfades() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 60.0);
    let t2 = t.track("t2", 60.0);
    let t3 = t.track("t3", 60.0);
    t.engine.enqueue(t2);
    t.engine.play(t1).await.unwrap();
    t.step_secs(10.0).await;

    t.engine.play_now(t3, true).await.unwrap();
    assert_eq!(t.mode(), PlayoutMode::Crossfading);
    // Requeued only once the interruption has taken over
    assert_eq!(t.queue_ids(), vec!["t2"]);

    // Quick crossfade is 500ms
    t.step_secs(0.6).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert_eq!(t.current_id().as_deref(), Some("t3"));
    assert_eq!(t.queue_ids(), vec!["t1", "t2"]);
    // Requeued, so not history
    assert_eq!(t.engine.history().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_volume_change_during_crossfade_applies_after() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 30.0);
    let t2 = t.track("t2", 30.0);
    t.engine.enqueue(t2);
    t.engine.play(t1).await.unwrap();
    let mut events = t.shared.subscribe_events();

    t.step_secs(26.2).await;
    assert_eq!(t.mode(), PlayoutMode::Crossfading);
    t.engine.set_volume(50);
    assert_eq!(t.engine.volume_target(), 50);

    t.step_secs(1.2).await;
    assert_eq!(t.mode(), PlayoutMode::Playing);
    assert!((t.output_volume(ChannelLabel::A) - 0.5).abs() < 1e-6);

    let mut volume_events = 0;
    while let Ok(event) = events.try_recv() {
        if let PlayoutEvent::VolumeChanged { volume, .. } = event {
            assert_eq!(volume, 50);
            volume_events += 1;
        }
    }
    assert_eq!(volume_events, 1);
}

#[tokio::test(start_paused = true)]
async fn test_seek_into_lead_window_starts_crossfade() {
    let mut t = TestEngine::standard();
    let t1 = t.track("t1", 30.0);
    let t2 = t.track("t2", 30.0);
    t.engine.enqueue(t2);
    t.engine.play(t1).await.unwrap();
    t.step_secs(3.0).await;

    assert_eq!(t.engine.seek(27.0).unwrap(), 27.0);
    t.step_secs(0.1).await;
    assert_eq!(t.mode(), PlayoutMode::Crossfading);
}
