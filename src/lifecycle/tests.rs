// src/lifecycle/tests.rs

use super::*;
use crate::channel::{ChannelTransport, CommandSink, Link, MemoryLink};
use crate::config::{ChannelConfig, LifecycleConfig};
use crate::error::BridgeError;
use crate::protocol::{
    ControlCommand, Destination, Envelope, Frame, Payload, RoutingId, WidgetState, WidgetType,
    WindowHandle,
};
use anyhow::Result;
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Scripted {
    peers: Vec<(u64, Receiver<Frame>)>,
    discarded: Vec<u64>,
    terminated: bool,
    fail: bool,
}

impl Scripted {
    fn frames(&self, epoch: u64) -> Vec<Frame> {
        self.peers
            .iter()
            .find(|(e, _)| *e == epoch)
            .map(|(_, rx)| rx.try_iter().collect())
            .unwrap_or_default()
    }
}

impl DeviceLauncher for Scripted {
    fn launch(&mut self, epoch: u64) -> Result<Box<dyn Link>, BridgeError> {
        if self.fail {
            return Err(BridgeError::PeerLost("spawn failed".to_string()));
        }
        let (link, rx) = MemoryLink::new();
        self.peers.push((epoch, rx));
        Ok(Box::new(link))
    }

    fn discard(&mut self, epoch: u64) {
        self.discarded.push(epoch);
    }

    fn terminate(&mut self) {
        self.terminated = true;
    }
}

fn observer(config: LifecycleConfig) -> (ProcessLifecycleObserver<Scripted>, ChannelTransport) {
    (
        ProcessLifecycleObserver::new(Scripted::default(), &config),
        ChannelTransport::new("control", &ChannelConfig::default()),
    )
}

fn create(handle: u32) -> ControlCommand {
    ControlCommand::CreateWidget {
        handle: WindowHandle(handle),
        parent: None,
        x: 0,
        y: 0,
        kind: WidgetType::Toplevel,
    }
}

fn set_state(handle: u32, state: WidgetState) -> ControlCommand {
    ControlCommand::SetWidgetState {
        handle: WindowHandle(handle),
        state,
        width: 0,
        height: 0,
    }
}

fn routed(routing_id: u64, command: ControlCommand) -> Frame {
    Frame::Message(Envelope {
        destination: Destination::Route(RoutingId(routing_id)),
        payload: Payload::Command(command),
    })
}

#[test_log::test]
fn it_should_establish_on_handshake_and_drain_early_commands() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig::default());
    transport.send_command(create(1))?;

    lifecycle.start(&mut transport)?;
    assert_eq!(lifecycle.state(), LifecycleState::Starting);
    assert_eq!(lifecycle.epoch(), 1);

    lifecycle.on_handshake(RoutingId(1), &mut transport);
    assert_eq!(lifecycle.state(), LifecycleState::Connected);
    assert_eq!(
        lifecycle.take_notices(),
        vec![LifecycleNotice::Connected {
            epoch: 1,
            routing_id: RoutingId(1)
        }]
    );
    assert_eq!(
        lifecycle.launcher().frames(1),
        vec![
            Frame::Establish {
                routing_id: RoutingId(1)
            },
            routed(1, create(1)),
        ]
    );
    Ok(())
}

#[test_log::test]
fn it_should_respawn_and_deliver_only_post_crash_commands_on_the_new_route() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig::default());
    lifecycle.start(&mut transport)?;
    lifecycle.on_handshake(RoutingId(1), &mut transport);
    transport.send_command(create(1))?;

    lifecycle.on_device_lost(1, "crashed", &mut transport)?;
    assert_eq!(lifecycle.state(), LifecycleState::Starting);
    assert_eq!(lifecycle.epoch(), 2);
    assert_eq!(lifecycle.launcher().discarded, vec![1]);

    transport.send_command(set_state(1, WidgetState::Maximized))?;
    transport.send_command(set_state(1, WidgetState::Restore))?;
    lifecycle.on_handshake(RoutingId(2), &mut transport);

    assert_eq!(
        lifecycle.launcher().frames(1),
        vec![
            Frame::Establish {
                routing_id: RoutingId(1)
            },
            routed(1, create(1)),
        ]
    );
    assert_eq!(
        lifecycle.launcher().frames(2),
        vec![
            Frame::Establish {
                routing_id: RoutingId(2)
            },
            routed(2, set_state(1, WidgetState::Maximized)),
            routed(2, set_state(1, WidgetState::Restore)),
        ]
    );
    assert_eq!(
        lifecycle.take_notices(),
        vec![
            LifecycleNotice::Connected {
                epoch: 1,
                routing_id: RoutingId(1)
            },
            LifecycleNotice::ChannelReset { epoch: 1 },
            LifecycleNotice::Connected {
                epoch: 2,
                routing_id: RoutingId(2)
            },
        ]
    );
    Ok(())
}

#[test_log::test]
fn it_should_ignore_duplicate_and_stale_loss_reports() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig::default());
    lifecycle.start(&mut transport)?;
    lifecycle.on_handshake(RoutingId(1), &mut transport);

    lifecycle.on_device_lost(1, "socket closed", &mut transport)?;
    lifecycle.on_device_lost(1, "process exited", &mut transport)?;
    lifecycle.on_device_lost(7, "never existed", &mut transport)?;

    assert_eq!(lifecycle.epoch(), 2);
    assert_eq!(lifecycle.respawns(), 1);
    assert_eq!(lifecycle.launcher().discarded, vec![1]);
    Ok(())
}

#[test_log::test]
fn it_should_give_up_after_max_respawns() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig {
        max_respawns: Some(1),
        ..LifecycleConfig::default()
    });
    lifecycle.start(&mut transport)?;
    lifecycle.on_device_lost(1, "crashed", &mut transport)?;
    lifecycle.on_device_lost(2, "crashed again", &mut transport)?;

    assert_eq!(lifecycle.state(), LifecycleState::Disconnected);
    assert_eq!(lifecycle.epoch(), 2);
    assert_eq!(
        lifecycle.take_notices().last(),
        Some(&LifecycleNotice::GaveUp { attempts: 1 })
    );
    Ok(())
}

#[test_log::test]
fn it_should_stay_disconnected_when_respawn_is_disabled() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig {
        respawn: false,
        ..LifecycleConfig::default()
    });
    lifecycle.start(&mut transport)?;
    lifecycle.on_handshake(RoutingId(1), &mut transport);
    lifecycle.on_device_lost(1, "crashed", &mut transport)?;

    assert_eq!(lifecycle.state(), LifecycleState::Disconnected);
    assert!(!transport.is_connected());
    transport.send_command(create(3))?;
    assert_eq!(transport.deferred().len(), 1, "windows keep queueing");
    Ok(())
}

#[test_log::test]
fn it_should_treat_a_missed_handshake_deadline_as_a_loss() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig {
        handshake_timeout_ms: 1000,
        ..LifecycleConfig::default()
    });
    lifecycle.start(&mut transport)?;
    assert!(lifecycle.handshake_deadline().is_some());

    lifecycle.poll_deadline(Instant::now(), &mut transport)?;
    assert_eq!(lifecycle.epoch(), 1, "deadline not reached yet");

    lifecycle.poll_deadline(Instant::now() + Duration::from_secs(5), &mut transport)?;
    assert_eq!(lifecycle.epoch(), 2);
    assert_eq!(lifecycle.state(), LifecycleState::Starting);
    Ok(())
}

#[test_log::test]
fn it_should_ignore_a_handshake_for_the_wrong_route() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig {
        first_routing_id: 40,
        ..LifecycleConfig::default()
    });
    lifecycle.start(&mut transport)?;
    lifecycle.on_handshake(RoutingId(1), &mut transport);
    assert_eq!(lifecycle.state(), LifecycleState::Starting);

    lifecycle.on_handshake(RoutingId(40), &mut transport);
    assert_eq!(transport.routing_id(), Some(RoutingId(40)));
    Ok(())
}

#[test_log::test]
fn it_should_report_a_device_that_cannot_be_launched() {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig::default());
    lifecycle.launcher_mut().fail = true;

    assert!(lifecycle.start(&mut transport).is_err());
    assert_eq!(lifecycle.state(), LifecycleState::Disconnected);
    assert_eq!(
        lifecycle.take_notices(),
        vec![LifecycleNotice::GaveUp { attempts: 0 }]
    );
}

#[test_log::test]
fn it_should_terminate_the_device_and_ignore_later_losses_on_shutdown() -> Result<()> {
    let (mut lifecycle, mut transport) = observer(LifecycleConfig::default());
    lifecycle.start(&mut transport)?;
    lifecycle.on_handshake(RoutingId(1), &mut transport);

    lifecycle.shutdown(&mut transport);
    lifecycle.on_device_lost(1, "exited after SIGTERM", &mut transport)?;

    assert!(lifecycle.launcher().terminated);
    assert_eq!(lifecycle.epoch(), 1);
    assert!(!transport.is_connected());
    Ok(())
}

#[test_log::test]
fn it_should_name_sockets_per_process_and_epoch() {
    let (tx, _rx) = mpsc::channel::<DeviceSignal>();
    let launcher = ChildProcessLauncher::new(
        "window-bridge".into(),
        "/run/user/1000".into(),
        Duration::from_secs(1),
        tx,
    );
    assert_eq!(
        launcher.socket_path(3),
        std::path::PathBuf::from(format!(
            "/run/user/1000/window-bridge-{}-3.sock",
            std::process::id()
        ))
    );
}

#[test_log::test]
fn it_should_clean_up_the_socket_when_the_device_cannot_be_spawned() {
    let (tx, _rx) = mpsc::channel::<DeviceSignal>();
    let mut launcher = ChildProcessLauncher::new(
        "/nonexistent/window-bridge-device".into(),
        std::env::temp_dir(),
        Duration::from_secs(1),
        tx,
    );
    let path = launcher.socket_path(1);

    let result = launcher.launch(1);
    assert!(matches!(result, Err(BridgeError::Io(_))));
    assert!(!path.exists());
}
