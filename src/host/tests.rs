// src/host/tests.rs

use super::*;
use crate::channel::{Link, MemoryLink};
use crate::config::Config;
use crate::control::{NullDelegate, WindowDelegate};
use crate::lifecycle::LifecycleState;
use crate::protocol::{
    ControlCommand, Destination, Envelope, InputEvent, Payload, RoutingId, WidgetState,
    WidgetType,
};
use anyhow::Result;
use std::cell::Cell;
use std::rc::Rc;
use std::sync::mpsc::{self, Sender};
use std::thread;

#[derive(Default)]
struct Scripted {
    peers: Vec<(u64, Receiver<Frame>)>,
    terminated: Rc<Cell<bool>>,
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
        let (link, rx) = MemoryLink::new();
        self.peers.push((epoch, rx));
        Ok(Box::new(link))
    }

    fn discard(&mut self, _epoch: u64) {}

    fn terminate(&mut self) {
        self.terminated.set(true);
    }
}

/// Accepts every close request by posting `CloseWindow`.
struct CloseOnRequest {
    handle: WindowHandle,
    tasks: Sender<UiTask>,
}

impl WindowDelegate for CloseOnRequest {
    fn on_close_requested(&mut self) {
        let _ = self.tasks.send(UiTask::CloseWindow(self.handle));
    }
}

fn established(epoch: u64, routing_id: u64) -> UiTask {
    UiTask::Device(DeviceSignal::Frame {
        epoch,
        frame: Frame::Established {
            routing_id: RoutingId(routing_id),
        },
    })
}

fn event(epoch: u64, routing_id: u64, event: InputEvent) -> UiTask {
    UiTask::Device(DeviceSignal::Frame {
        epoch,
        frame: Frame::Message(Envelope {
            destination: Destination::Route(RoutingId(routing_id)),
            payload: Payload::Event(event),
        }),
    })
}

fn routed(routing_id: u64, command: ControlCommand) -> Frame {
    Frame::Message(Envelope {
        destination: Destination::Route(RoutingId(routing_id)),
        payload: Payload::Command(command),
    })
}

fn toplevel(handle: u32) -> ControlCommand {
    ControlCommand::CreateWidget {
        handle: WindowHandle(handle),
        parent: None,
        x: 10,
        y: 20,
        kind: WidgetType::Toplevel,
    }
}

fn started(config: Config) -> Result<ControlContext<Scripted>> {
    let mut context = ControlContext::new(Scripted::default(), &config);
    context.start()?;
    Ok(context)
}

#[test_log::test]
fn it_should_unblock_startup_once_the_output_size_arrives() -> Result<()> {
    let mut context = started(Config::default())?;
    let (tx, rx) = mpsc::channel();
    tx.send(established(1, 1))?;
    tx.send(event(1, 1, InputEvent::OutputSizeChanged { width: 800, height: 600 }))?;

    let size = context.wait_for_output_size(&rx, Duration::from_secs(1))?;
    assert_eq!(size, (800, 600));
    assert_eq!(context.lifecycle().state(), LifecycleState::Connected);
    Ok(())
}

#[test_log::test]
fn it_should_time_out_waiting_for_an_output_size() -> Result<()> {
    let mut context = started(Config::default())?;
    let (_tx, rx) = mpsc::channel();
    assert!(context
        .wait_for_output_size(&rx, Duration::from_millis(20))
        .is_err());
    Ok(())
}

#[test_log::test]
fn it_should_drop_frames_from_other_epochs() -> Result<()> {
    let mut context = started(Config::default())?;
    context.handle_task(established(1, 1))?;
    context.handle_task(event(2, 1, InputEvent::OutputSizeChanged { width: 1, height: 1 }))?;
    assert_eq!(context.windows().output_size(), None);
    Ok(())
}

#[test_log::test]
fn it_should_close_a_window_when_its_delegate_accepts_the_request() -> Result<()> {
    let mut context = started(Config::default())?;
    let (tx, rx) = mpsc::channel();
    context.handle_task(established(1, 1))?;
    let handle = WindowHandle(1);
    context.windows_mut().create_window(
        handle,
        None,
        10,
        20,
        WidgetType::Toplevel,
        Box::new(CloseOnRequest {
            handle,
            tasks: tx.clone(),
        }),
    )?;

    context.handle_task(event(1, 1, InputEvent::WindowClosed { handle }))?;
    let follow_up = rx.try_recv()?;
    context.handle_task(follow_up)?;

    assert!(context.windows().is_empty());
    assert!(context.windows().is_retired(handle));
    let frames = context.lifecycle().launcher().frames(1);
    assert_eq!(
        frames.last(),
        Some(&routed(
            1,
            ControlCommand::SetWidgetState {
                handle,
                state: WidgetState::Destroyed,
                width: 0,
                height: 0,
            }
        ))
    );

    context.handle_task(event(1, 1, InputEvent::WindowClosed { handle }))?;
    assert!(!context.windows().is_retired(handle));
    Ok(())
}

#[test_log::test]
fn it_should_not_replay_windows_after_a_reset_by_default() -> Result<()> {
    let mut context = started(Config::default())?;
    context.handle_task(established(1, 1))?;
    context
        .windows_mut()
        .create_window(WindowHandle(1), None, 10, 20, WidgetType::Toplevel, Box::new(NullDelegate))?;

    context.handle_task(UiTask::Device(DeviceSignal::Lost {
        epoch: 1,
        reason: "crashed".to_string(),
    }))?;
    context.handle_task(established(2, 2))?;

    assert_eq!(
        context.lifecycle().launcher().frames(2),
        vec![Frame::Establish {
            routing_id: RoutingId(2)
        }]
    );
    Ok(())
}

#[test_log::test]
fn it_should_replay_open_windows_when_configured() -> Result<()> {
    let mut config = Config::default();
    config.lifecycle.replay_on_reset = true;
    let mut context = started(config)?;
    context.handle_task(established(1, 1))?;
    context
        .windows_mut()
        .create_window(WindowHandle(1), None, 10, 20, WidgetType::Toplevel, Box::new(NullDelegate))?;
    context.windows_mut().set_title(WindowHandle(1), "demo")?;

    context.handle_task(UiTask::Device(DeviceSignal::Lost {
        epoch: 1,
        reason: "crashed".to_string(),
    }))?;
    context.handle_task(established(2, 2))?;

    assert_eq!(
        context.lifecycle().launcher().frames(2),
        vec![
            Frame::Establish {
                routing_id: RoutingId(2)
            },
            routed(2, toplevel(1)),
            routed(
                2,
                ControlCommand::SetWidgetTitle {
                    handle: WindowHandle(1),
                    title: "demo".to_string(),
                }
            ),
        ]
    );
    Ok(())
}

#[test_log::test]
fn it_should_respawn_on_missed_handshakes_until_giving_up() -> Result<()> {
    let mut config = Config::default();
    config.lifecycle.handshake_timeout_ms = 1;
    config.lifecycle.max_respawns = Some(2);
    let mut context = started(config)?;

    let (tx, rx) = mpsc::channel();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        let _ = tx.send(UiTask::Shutdown);
    });
    context.run(&rx)?;
    stopper.join().map_err(|_| anyhow!("stopper thread panicked"))?;

    assert_eq!(context.lifecycle().epoch(), 3);
    assert!(context.gave_up());
    Ok(())
}

#[test_log::test]
fn it_should_leave_the_loop_when_all_senders_are_gone() -> Result<()> {
    let mut context = started(Config::default())?;
    let (tx, rx) = mpsc::channel::<UiTask>();
    drop(tx);
    context.handle_task(established(1, 1))?;
    context.run(&rx)?;
    assert_eq!(context.lifecycle().state(), LifecycleState::Connected);
    Ok(())
}

#[test_log::test]
fn it_should_terminate_the_device_on_shutdown() -> Result<()> {
    let terminated = Rc::new(Cell::new(false));
    let launcher = Scripted {
        terminated: terminated.clone(),
        ..Scripted::default()
    };
    let mut context = ControlContext::new(launcher, &Config::default());
    context.start()?;
    context.handle_task(established(1, 1))?;
    assert_eq!(context.handle_task(UiTask::Shutdown)?, HostStatus::Shutdown);

    context.shutdown();
    assert!(terminated.get());
    Ok(())
}

fn lost(epoch: u64) -> UiTask {
    UiTask::Device(DeviceSignal::Lost {
        epoch,
        reason: "crashed".to_string(),
    })
}

#[test_log::test]
fn it_should_let_a_closed_handle_be_reused_once_its_device_is_gone() -> Result<()> {
    let mut context = started(Config::default())?;
    context.handle_task(established(1, 1))?;
    let handle = WindowHandle(1);
    context
        .windows_mut()
        .create_window(handle, None, 10, 20, WidgetType::Toplevel, Box::new(NullDelegate))?;
    context.handle_task(UiTask::CloseWindow(handle))?;
    assert!(context.windows().is_retired(handle));

    context.handle_task(lost(1))?;
    context.handle_task(established(2, 2))?;

    assert!(!context.windows().is_retired(handle));
    context
        .windows_mut()
        .create_window(handle, None, 10, 20, WidgetType::Toplevel, Box::new(NullDelegate))?;
    assert_eq!(
        context.lifecycle().launcher().frames(2),
        vec![
            Frame::Establish {
                routing_id: RoutingId(2)
            },
            routed(2, toplevel(1)),
        ]
    );
    Ok(())
}

#[test_log::test]
fn it_should_keep_a_handle_retired_while_its_destroy_waits_for_the_next_device() -> Result<()> {
    let mut context = started(Config::default())?;
    context.handle_task(established(1, 1))?;
    let handle = WindowHandle(1);
    context
        .windows_mut()
        .create_window(handle, None, 10, 20, WidgetType::Toplevel, Box::new(NullDelegate))?;

    context.handle_task(lost(1))?;
    context.handle_task(UiTask::CloseWindow(handle))?;
    assert!(context.windows().is_retired(handle));

    context.handle_task(established(2, 2))?;
    assert!(context.windows().is_retired(handle));
    assert_eq!(
        context.lifecycle().launcher().frames(2).last(),
        Some(&routed(
            2,
            ControlCommand::SetWidgetState {
                handle,
                state: WidgetState::Destroyed,
                width: 0,
                height: 0,
            }
        ))
    );

    context.handle_task(event(2, 2, InputEvent::WindowClosed { handle }))?;
    assert!(!context.windows().is_retired(handle));
    Ok(())
}
