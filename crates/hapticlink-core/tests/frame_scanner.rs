//! Tests for status frame reassembly

mod common;

#[cfg(test)]
mod tests {
    use super::common::{self, ScriptedDevice};
    use hapticlink_core::config::{HapticLinkConfig, StatusSettings};
    use hapticlink_core::dongle::{DeviceStatus, FrameScanner, Link};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    const STATUS_JSON: &str = r#"{"device":"HG-DONGLE","version":"1.4.2","uptime_ms":81234,"usb_present":true,"usb_serial_connected":true,"bt_connected":true,"nus_subscribed":true,"bt_mtu":247,"max_payload":244,"usb_rx_bps":1200,"ble_rx_bps":9600,"led_mode":"solid"}"#;

    fn offline_scanner() -> FrameScanner {
        FrameScanner::new(
            Link::new(&HapticLinkConfig::default()),
            StatusSettings::default(),
        )
    }

    fn collect(scanner: &FrameScanner) -> Arc<Mutex<Vec<DeviceStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        // Dropping the handle keeps the callback registered
        let _ = scanner.subscribe_status(move |status: &DeviceStatus| s.lock().push(status.clone()));
        seen
    }

    /// Comparable part of a status; capture times differ between runs
    fn fields(status: &DeviceStatus) -> serde_json::Value {
        let mut value = serde_json::to_value(status).unwrap();
        value.as_object_mut().unwrap().remove("captured_at");
        value
    }

    #[test]
    fn test_split_at_any_offsets_matches_single_chunk() {
        let frame = common::status_frame(STATUS_JSON);

        let whole = offline_scanner();
        let whole_seen = collect(&whole);
        whole.on_data(&frame);
        assert_eq!(whole.process_pending(), 1);
        let reference = fields(&whole_seen.lock()[0]);
        assert_eq!(reference["bluetooth_connected"], true);
        assert_eq!(reference["firmware_version"], "1.4.2");

        let split_sets: Vec<Vec<usize>> = vec![
            vec![1],
            vec![2, 3],
            vec![frame.len() - 1],
            vec![5, 17, 18, 40, 100],
            (1..frame.len()).collect(),
            (1..frame.len()).step_by(7).collect(),
        ];

        for splits in split_sets {
            let scanner = offline_scanner();
            let seen = collect(&scanner);
            let mut start = 0;
            for &offset in splits.iter().chain(std::iter::once(&frame.len())) {
                scanner.on_data(&frame[start..offset]);
                start = offset;
            }
            assert_eq!(scanner.process_pending(), 1, "splits {splits:?}");
            assert_eq!(fields(&seen.lock()[0]), reference, "splits {splits:?}");
            assert_eq!(scanner.buffer_len(), 0);
        }
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let scanner = offline_scanner();
        let seen = collect(&scanner);

        let mut chunk = common::status_frame(r#"{"uptime_ms":10,"bt_connected":false}"#);
        chunk.extend(common::status_frame(r#"{"uptime_ms":20,"bt_connected":true}"#));
        scanner.on_data(&chunk);
        assert_eq!(scanner.process_pending(), 2);

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!((seen[0].uptime_ms, seen[0].bluetooth_connected), (10, false));
        assert_eq!((seen[1].uptime_ms, seen[1].bluetooth_connected), (20, true));
    }

    #[test]
    fn test_invalid_json_leaves_no_residue() {
        let scanner = offline_scanner();
        let seen = collect(&scanner);

        scanner.on_data(&common::status_frame(r#"{"uptime_ms": 5,"#));
        assert_eq!(scanner.process_pending(), 0);
        assert!(seen.lock().is_empty());
        assert_eq!(scanner.buffer_len(), 0);

        scanner.on_data(&common::status_frame(r#"{"uptime_ms":6}"#));
        assert_eq!(scanner.process_pending(), 1);
        assert_eq!(seen.lock()[0].uptime_ms, 6);
    }

    #[test]
    fn test_truncated_frame_then_complete_frame() {
        let scanner = offline_scanner();
        let seen = collect(&scanner);

        let mut truncated = common::status_frame(r#"{"uptime_ms":1}"#);
        truncated.truncate(truncated.len() - 6);
        scanner.on_data(&truncated);
        scanner.on_data(b"telemetry noise\n");
        scanner.on_data(&common::status_frame(r#"{"uptime_ms":2}"#));
        scanner.process_pending();

        let uptimes: Vec<u64> = seen.lock().iter().map(|s| s.uptime_ms).collect();
        assert_eq!(uptimes.last(), Some(&2));
        assert_eq!(scanner.latest_status().map(|s| s.uptime_ms), Some(2));
    }

    #[test]
    fn test_noise_between_frames() {
        let scanner = offline_scanner();
        let seen = collect(&scanner);

        let mut chunk = b"STREAM 0.1,0.2,0.3,0.4,0.5\n".to_vec();
        chunk.extend(common::status_frame(r#"{"uptime_ms":3}"#));
        chunk.extend(b"STRIMU 1,2,3\n");
        scanner.on_data(&chunk);

        assert_eq!(scanner.process_pending(), 1);
        assert_eq!(seen.lock()[0].uptime_ms, 3);
    }

    #[test]
    fn test_monitor_polls_and_parses_live_frames() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let (finder, opener) = device.backends();
        let config = common::test_config();
        let link = Link::with_backends(&config, finder, opener);
        let scanner = FrameScanner::new(link.clone(), config.status.clone());
        let mut watch = scanner.watch_status();

        assert!(link.connect());
        scanner.start(config.status.poll_interval()).unwrap();
        assert!(scanner.is_running());

        assert!(common::wait_until(Duration::from_secs(2), || {
            device.writes().iter().any(|w| w.bytes == b"@@@[STATUS]@@@")
        }));

        device.feed(&common::status_frame(STATUS_JSON));
        assert!(common::wait_until(Duration::from_secs(2), || {
            scanner.latest_status().is_some()
        }));
        assert!(watch.has_changed().unwrap());
        let status = watch.borrow_and_update().clone().unwrap();
        assert!(status.glove_reachable());
        assert_eq!(status.led_mode.as_deref(), Some("solid"));

        scanner.stop();
        assert!(!scanner.is_running());
        link.disconnect();
    }
}
