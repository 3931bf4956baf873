//! Two full nodes talking over a simulated link: gossip, merging,
//! neighbor bookkeeping, light control, and diagnostics.

use lumen_core::config::GOSSIP_INTERVAL_MS;
use lumen_core::hal::{PWM_CHANNEL_COOL, PWM_CHANNEL_WARM};
use lumen_sim::{deliver_frames, run_slices, SimPlatform};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

#[test]
fn gossip_round_trip_merges_and_tracks_neighbors() {
    init_tracing();
    let a = SimPlatform::new();
    let mut node_a = a.build_node(0x000A);
    let b = SimPlatform::new();
    let mut node_b = b.build_node(0x000B);

    // Node A trains a little, then gossips.
    run_slices(&a, &mut node_a, 50, 5000);
    a.clock.advance_ms(GOSSIP_INTERVAL_MS + 1);
    a.clock.open_window_us(5000);
    node_a.radio_idle();

    assert_eq!(deliver_frames(&a, &mut node_b, 0x000A, -42), 17);

    // B merged A's shard 0 and learned about A.
    assert_eq!(node_b.engine().resident(0).unwrap().contributors, 2);
    let diag = node_b.diagnostics();
    assert_eq!(diag.neighbor_count, 1);

    // B's next sync reaches A symmetrically.
    b.clock.advance_ms(GOSSIP_INTERVAL_MS + 1);
    b.clock.open_window_us(5000);
    node_b.radio_idle();
    assert_eq!(deliver_frames(&b, &mut node_a, 0x000B, -42), 17);
    assert_eq!(node_a.mesh().neighbor_count(), 1);
    // B's shard 0 now carries both contributions; merging it back into A
    // pushes A's contributor count higher still.
    assert_eq!(node_a.engine().resident(0).unwrap().contributors, 3);

    a.check().unwrap();
    b.check().unwrap();
}

#[test]
fn light_commands_reach_the_pwm_immediately() {
    let platform = SimPlatform::new();
    let mut node = platform.build_node(0x0001);

    node.on_light_command(255, 100, 0);
    assert_eq!(platform.pwm.last_duty(PWM_CHANNEL_WARM), Some(65535));
    assert_eq!(platform.pwm.last_duty(PWM_CHANNEL_COOL), Some(0));

    // A transition eases over 50 Hz ticks instead of jumping.
    node.on_light_command(0, 100, 400);
    assert!(node.light().is_transitioning());
    for _ in 0..20 {
        node.light_tick();
    }
    assert!(!node.light().is_transitioning());
    assert_eq!(node.light().brightness(), 0);
    assert_eq!(platform.pwm.last_duty(PWM_CHANNEL_WARM), Some(0));
}

#[test]
fn diagnostics_reflect_training_progress() {
    let platform = SimPlatform::new();
    let mut node = platform.build_node(0x0001);

    let diag = node.diagnostics();
    assert_eq!(diag.local_epoch, 0);
    assert_eq!(diag.throttle_level, 0);
    assert_eq!(diag.neighbor_count, 0);

    // The sync task owns every slice (Normal beats Low), so training only
    // advances when driven directly; the diagnostics still expose the
    // scheduler and engine state coherently.
    run_slices(&platform, &mut node, 150, 5000);
    let diag = node.diagnostics();
    assert_eq!(diag.local_epoch, 0);
    assert_eq!(diag.temp_c, 25);
}
