//! Tests for the serial transport

mod common;

#[cfg(test)]
mod tests {
    use super::common::{self, ScriptedDevice};
    use hapticlink_core::config::HapticLinkConfig;
    use hapticlink_core::dongle::Dongle;
    use hapticlink_core::model::{Finger, GloveState};
    use hapticlink_core::protocol::{AsciiProtocol, CalibrationAction, Command};
    use hapticlink_core::transport::{SerialTransport, Transport, TransportError};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(3);

    fn transport(device: &Arc<ScriptedDevice>, config: HapticLinkConfig) -> SerialTransport {
        let (finder, opener) = device.backends();
        let dongle = Dongle::with_backends(config, finder, opener);
        SerialTransport::with_dongle(dongle, Box::new(AsciiProtocol))
    }

    /// No status polling, so the device only sees commands
    fn quiet_config() -> HapticLinkConfig {
        let mut config = common::test_config();
        config.transport.monitor_status = false;
        config.transport.autoreconnect = false;
        config.transport.min_send_interval_ms = 20;
        config
    }

    #[test]
    fn test_send_before_connect() {
        let device = ScriptedDevice::new();
        let transport = transport(&device, quiet_config());
        assert!(matches!(
            transport.send_command(Command::Restart),
            Err(TransportError::NotConnected)
        ));
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_connect_fails_without_device() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        device.set_available(false);
        let transport = transport(&device, common::test_config());

        assert!(!transport.connect());
        assert!(!transport.is_connected());
        assert!(!transport.dongle().link().autoreconnect());
        assert!(!transport.dongle().scanner().is_running());
        assert!(transport.send_command(Command::Restart).is_err());
    }

    #[test]
    fn test_commands_written_in_order_and_spaced() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let transport = transport(&device, quiet_config());
        assert!(transport.connect());
        assert!(transport.connect());

        let commands = vec![
            Command::enable_all(true),
            Command::setpoint([(Finger::Index, 0.5)]),
            Command::finger_stream(true, false),
            Command::imu_stream(true),
            Command::Restart,
        ];
        let expected: Vec<String> = commands
            .iter()
            .map(|c| format!("{}\n", hapticlink_core::protocol::serialize_command(c)))
            .collect();
        for command in commands {
            transport.send_command(command).unwrap();
        }

        assert!(common::wait_until(WAIT, || device.writes().len() == 5));
        assert_eq!(device.written_lines(), expected);

        let writes = device.writes();
        for pair in writes.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(20));
        }

        transport.disconnect();
    }

    #[test]
    fn test_sent_commands_update_state() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let transport = transport(&device, quiet_config());
        assert!(transport.connect());

        transport.send_command(Command::enable_all(true)).unwrap();
        transport
            .send_command(Command::setpoint([(Finger::Thumb, 0.25), (Finger::Pinky, 2.0)]))
            .unwrap();
        transport
            .send_command(Command::Calibration(CalibrationAction::Start))
            .unwrap();

        assert!(common::wait_until(WAIT, || transport.snapshot().calibrating));
        let state = transport.snapshot();
        assert!(state.streaming);
        assert!(state.fingers.iter().all(|f| f.enabled));
        assert_eq!(state.finger(Finger::Thumb).setpoint, 0.25);
        assert_eq!(state.finger(Finger::Pinky).setpoint, 1.0);
        assert_eq!(state.finger(Finger::Index).setpoint, 0.0);

        transport.disconnect();
    }

    #[test]
    fn test_queued_commands_drain_on_disconnect() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let transport = transport(&device, quiet_config());
        assert!(transport.connect());

        for _ in 0..4 {
            transport.send_command(Command::Restart).unwrap();
        }
        transport.disconnect();

        assert_eq!(device.written_lines().len(), 4);
        assert!(!transport.is_connected());
        assert!(transport.send_command(Command::Restart).is_err());
    }

    #[test]
    fn test_backlog_not_written_after_reconnect() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let mut config = quiet_config();
        config.transport.min_send_interval_ms = 100;
        config.serial.join_timeout_ms = 150;
        let transport = transport(&device, config);
        assert!(transport.connect());

        for _ in 0..10 {
            transport.send_command(Command::Restart).unwrap();
        }
        transport.disconnect();
        let sent_before = device.written_lines().len();
        assert!(sent_before < 10);

        assert!(transport.connect());
        thread::sleep(Duration::from_millis(600));
        assert_eq!(device.written_lines().len(), sent_before);

        transport
            .send_command(Command::setpoint([(Finger::Ring, 0.5)]))
            .unwrap();
        assert!(common::wait_until(WAIT, || {
            device.written_lines().len() == sent_before + 1
        }));
        assert!(device
            .written_lines()
            .last()
            .is_some_and(|line| line.starts_with("!setSetpointAll")));

        transport.disconnect();
    }

    #[test]
    fn test_telemetry_reaches_subscribers() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let transport = transport(&device, quiet_config());

        let seen: Arc<Mutex<Vec<GloveState>>> = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let sub = transport.subscribe_state(move |state: &GloveState| s.lock().push(state.clone()));
        assert_eq!(seen.lock().len(), 1);
        assert!(!seen.lock()[0].connected);

        assert!(transport.connect());
        device.feed(b"STREAM 0.1,0.2,0.3,0.4,0.5\nSTRIMU 1.5,-2,90\ngarbage\n");

        assert!(common::wait_until(WAIT, || transport.snapshot().imu.yaw == 90.0));
        let state = transport.snapshot();
        assert_eq!(state.positions(), [0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!((state.imu.roll, state.imu.pitch), (1.5, -2.0));

        assert!(common::wait_until(WAIT, || {
            seen.lock().iter().any(|s| s.imu.yaw == 90.0)
        }));
        assert!(seen
            .lock()
            .iter()
            .any(|s| s.positions() == [0.1, 0.2, 0.3, 0.4, 0.5]));
        assert_eq!(transport.watch_state().borrow().imu.yaw, 90.0);

        sub.unsubscribe();
        transport.disconnect();
    }

    #[test]
    fn test_subscribe_delivers_current_state_first() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let transport = transport(&device, quiet_config());
        assert!(transport.connect());
        device.feed(b"STREAM 0.6,0.6,0.6,0.6,0.6\n");
        assert!(common::wait_until(WAIT, || transport.snapshot().positions()[0] == 0.6));

        let seen: Arc<Mutex<Vec<GloveState>>> = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let callback: Box<dyn Fn(&GloveState) + Send + Sync> =
            Box::new(move |state: &GloveState| s.lock().push(state.clone()));
        let sub = Transport::subscribe_state(&transport, callback);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(seen.lock()[0].positions(), [0.6; 5]);

        sub.unsubscribe();
        transport.disconnect();
    }

    #[test]
    fn test_connection_follows_glove_status() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let mut config = common::test_config();
        config.transport.autoreconnect = false;
        let transport = transport(&device, config);
        assert!(transport.connect());

        // No status yet: the glove is not known to be reachable
        assert!(common::wait_until(WAIT, || !transport.snapshot().connected));

        let mut frame = common::status_frame(r#"{"usb_present":true,"bt_connected":true}"#);
        frame.push(b'\n');
        device.feed(&frame);
        assert!(common::wait_until(WAIT, || transport.snapshot().connected));
        assert!(transport.status().glove_reachable());

        let mut frame = common::status_frame(r#"{"usb_present":true,"bt_connected":false}"#);
        frame.push(b'\n');
        device.feed(&frame);
        assert!(common::wait_until(WAIT, || !transport.snapshot().connected));

        transport.disconnect();
        assert!(!transport.snapshot().connected);
    }

    #[test]
    fn test_unplug_marks_disconnected() {
        common::init_tracing();
        let device = ScriptedDevice::new();
        let transport = transport(&device, common::test_config());
        assert!(transport.connect());

        let mut frame = common::status_frame(r#"{"usb_present":true,"bt_connected":true}"#);
        frame.push(b'\n');
        device.feed(&frame);
        assert!(common::wait_until(WAIT, || transport.snapshot().connected));

        device.unplug();
        assert!(common::wait_until(WAIT, || !transport.is_connected()));
        assert!(common::wait_until(WAIT, || !transport.snapshot().connected));

        device.plug();
        assert!(common::wait_until(WAIT, || transport.is_connected()));

        transport.disconnect();
    }
}
