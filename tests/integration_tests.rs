//! Integration tests for the tunnel control surface.
//!
//! Drives the [`Backend`] string boundary the way the platform layer does and
//! checks lifecycle, device, settings and diagnostics behavior end to end.

use std::sync::{Arc, Barrier};
use std::thread;

use pangolin_core::settings::Ipv4Route;
use pangolin_core::{
    Backend, NetworkUpdate, PowerMode, SettingsPoller, TunnelError, TunnelState, codec,
};
use pangolin_integration_tests::{
    INIT_CONFIG, TUNNEL_CONFIG, TUNNEL_CONFIG_WITH_DNS, error_code, ready_backend,
};

// ============================================================================
// Lifecycle
// ============================================================================

/// The sequence the Android client runs on connect and disconnect.
#[test]
fn test_platform_connect_sequence() {
    let backend = Backend::new();

    assert_eq!(backend.init_session(INIT_CONFIG), None);
    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);
    assert_eq!(backend.network_settings_version(), 1);

    assert_eq!(backend.add_device(3), None);
    assert!(backend.network_settings_version() >= 1);

    assert_eq!(backend.stop_tunnel(), None);
    let err = backend.add_device(3).unwrap();
    assert_eq!(error_code(&err), Some("NotRunning"));
}

#[test]
fn test_stop_from_idle_twice() {
    let backend = Backend::new();
    assert_eq!(backend.stop_tunnel(), None);
    assert_eq!(backend.stop_tunnel(), None);
    assert_eq!(backend.controller().state(), TunnelState::Idle);
    assert_eq!(backend.network_settings_version(), 0);
}

#[test]
fn test_start_without_session_acquires_nothing() {
    let backend = Backend::new();

    let err = backend.start_tunnel(3, TUNNEL_CONFIG).unwrap();
    assert_eq!(error_code(&err), Some("SessionNotReady"));

    let status = backend.controller().status();
    assert_eq!(status.state, TunnelState::Idle);
    assert_eq!(status.fd, None);
    assert_eq!(status.device_count, 0);
    assert_eq!(backend.network_settings(), None);
}

#[test]
fn test_failed_start_is_all_or_nothing() {
    let backend = ready_backend();

    for (fd, config) in [
        (3, "{"),
        (3, r#"{"endpoint":"e","id":"i"}"#),
        (3, r#"{"endpoint":"e","id":"i","secret":"s","mtu":-5}"#),
        (-1, TUNNEL_CONFIG),
    ] {
        assert!(backend.start_tunnel(fd, config).is_some());
        let status = backend.controller().status();
        assert_eq!(status.state, TunnelState::Idle);
        assert_eq!(status.fd, None);
        assert_eq!(backend.network_settings_version(), 0);
    }

    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);
}

#[test]
fn test_session_survives_restart() {
    let backend = ready_backend();
    let session = backend.controller().session().unwrap();

    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);
    assert_eq!(backend.stop_tunnel(), None);
    assert_eq!(backend.start_tunnel(5, TUNNEL_CONFIG), None);

    assert_eq!(backend.controller().session().unwrap(), session);
    assert_eq!(backend.controller().status().fd, Some(5));
    assert_eq!(backend.network_settings_version(), 2);
}

#[test]
fn test_concurrent_starts_exactly_one_wins() {
    let backend = Arc::new(ready_backend());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|fd| {
            let backend = Arc::clone(&backend);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                backend.start_tunnel(fd, TUNNEL_CONFIG)
            })
        })
        .collect();

    let results: Vec<Option<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_none()).count();
    assert_eq!(successes, 1);
    for err in results.iter().flatten() {
        assert_eq!(error_code(err), Some("InvalidState"));
    }
    assert_eq!(backend.controller().state(), TunnelState::Running);
    assert_eq!(backend.network_settings_version(), 1);
}

#[test]
fn test_concurrent_start_stop_paths_are_valid() {
    let backend = Arc::new(ready_backend());
    let transitions = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let transitions = Arc::clone(&transitions);
        backend
            .controller()
            .on_state_change(Box::new(move |from, to| {
                transitions.lock().unwrap().push((from, to));
            }));
    }

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let backend = Arc::clone(&backend);
            thread::spawn(move || {
                for round in 0..50 {
                    if (i + round) % 2 == 0 {
                        let _ = backend.start_tunnel(3, TUNNEL_CONFIG);
                    } else {
                        let _ = backend.stop_tunnel();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let transitions = transitions.lock().unwrap();
    let mut state = TunnelState::Idle;
    for (from, to) in transitions.iter() {
        assert_eq!(*from, state);
        assert!(from.can_transition_to(*to), "{from} -> {to}");
        state = *to;
    }
    assert_eq!(state, backend.controller().state());
}

// ============================================================================
// Devices
// ============================================================================

#[test]
fn test_duplicate_device_rejected() {
    let backend = ready_backend();
    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);

    assert_eq!(backend.add_device(7), None);
    let err = backend.add_device(7).unwrap();
    assert_eq!(error_code(&err), Some("DuplicateDevice"));
    assert_eq!(backend.controller().status().device_count, 1);
}

#[test]
fn test_devices_cleared_by_stop() {
    let backend = ready_backend();
    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);
    for fd in 10..15 {
        assert_eq!(backend.add_device(fd), None);
    }
    assert_eq!(backend.controller().devices().len(), 5);

    assert_eq!(backend.stop_tunnel(), None);
    assert!(backend.controller().devices().is_empty());

    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);
    assert_eq!(backend.add_device(10), None);
}

// ============================================================================
// Network settings
// ============================================================================

#[test]
fn test_settings_payload_after_start() {
    let backend = ready_backend();
    assert_eq!(backend.network_settings(), None);
    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG_WITH_DNS), None);

    let settings = codec::decode_settings(&backend.network_settings().unwrap()).unwrap();
    assert_eq!(
        settings.tunnel_remote_address.as_deref(),
        Some("https://pangolin.example.com")
    );
    assert_eq!(settings.mtu, Some(1380));
    assert_eq!(settings.dns_servers, vec!["100.96.128.1"]);
}

#[test]
fn test_settings_retained_after_stop() {
    let backend = ready_backend();
    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);
    let before = backend.network_settings();

    assert_eq!(backend.stop_tunnel(), None);
    assert_eq!(backend.network_settings(), before);
    assert_eq!(backend.network_settings_version(), 1);
}

#[test]
fn test_poller_sees_control_plane_updates() {
    let backend = ready_backend();
    let controller = backend.controller();
    let mut poller = SettingsPoller::new();

    assert!(poller.poll(controller.settings()).is_none());
    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);
    assert_eq!(poller.poll(controller.settings()).unwrap().version, 1);

    let update = NetworkUpdate {
        ipv4_addresses: vec![("100.90.128.4".into(), "255.255.255.0".into())],
        ipv4_included_routes: vec![Ipv4Route {
            destination_address: "10.0.0.0".into(),
            subnet_mask: Some("255.0.0.0".into()),
            gateway_address: None,
            is_default: false,
        }],
        ..NetworkUpdate::default()
    };
    assert_eq!(controller.apply_network_update(update.clone()).unwrap(), 2);
    assert_eq!(controller.apply_network_update(update).unwrap(), 3);

    let snapshot = poller.poll(controller.settings()).unwrap();
    assert_eq!(snapshot.version, 3);
    assert_eq!(
        snapshot.settings.ipv4_interface_addresses(),
        vec![("100.90.128.4".to_string(), 24)]
    );
    assert_eq!(snapshot.settings.ipv4_included_routes.len(), 1);
    assert!(!snapshot.settings.has_default_route());
    assert!(poller.poll(controller.settings()).is_none());
}

#[test]
fn test_network_update_rejected_when_idle() {
    let backend = ready_backend();
    let err = backend
        .controller()
        .apply_network_update(NetworkUpdate::default())
        .unwrap_err();
    assert_eq!(
        err,
        TunnelError::invalid_state("apply network update", TunnelState::Idle)
    );
}

#[test]
fn test_readers_never_block_on_writers() {
    let backend = Arc::new(ready_backend());
    assert_eq!(backend.start_tunnel(3, TUNNEL_CONFIG), None);

    let writer = {
        let backend = Arc::clone(&backend);
        thread::spawn(move || {
            for mtu in 1300..1400u16 {
                let update = NetworkUpdate {
                    mtu: Some(mtu),
                    ..NetworkUpdate::default()
                };
                backend.controller().apply_network_update(update).unwrap();
            }
        })
    };

    let mut last = 0;
    while !writer.is_finished() {
        let version = backend.network_settings_version();
        assert!(version >= last);
        last = version;
        if let Some(json) = backend.network_settings() {
            assert!(codec::decode_settings(&json).is_ok());
        }
    }
    writer.join().unwrap();
    assert_eq!(backend.network_settings_version(), 101);
}

// ============================================================================
// Diagnostics
// ============================================================================

#[test]
fn test_log_file_records_backend_and_platform_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pangolin.log");
    let backend = Backend::new();

    assert_eq!(backend.enable_file_logging(path.to_str().unwrap()), None);
    backend.log_from_android("VpnService prepared");
    assert_eq!(backend.disable_file_logging(), None);
    backend.log_from_android("after close");

    let contents = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert!(lines[0].contains("Log Session Started"));
    assert!(lines[1].ends_with("[INFO] Android: VpnService prepared"));
    assert!(lines.last().unwrap().contains("Log Session Ended"));
    assert!(!contents.contains("after close"));
}

#[test]
fn test_power_mode_round_trip() {
    let backend = Backend::new();
    assert_eq!(backend.set_power_mode("low"), None);
    assert_eq!(backend.diagnostics().power_mode(), PowerMode::Low);

    let err = backend.set_power_mode("eco").unwrap();
    assert_eq!(error_code(&err), Some("UnknownMode"));
    assert_eq!(backend.diagnostics().power_mode(), PowerMode::Low);

    assert_eq!(backend.set_power_mode("Normal"), None);
    assert_eq!(backend.diagnostics().power_mode(), PowerMode::Normal);
}

#[test]
fn test_independent_backends() {
    let a = ready_backend();
    let b = Backend::new();

    assert_eq!(a.start_tunnel(3, TUNNEL_CONFIG), None);
    assert_eq!(error_code(&b.start_tunnel(3, TUNNEL_CONFIG).unwrap()), Some("SessionNotReady"));
    assert_eq!(b.network_settings_version(), 0);
}
