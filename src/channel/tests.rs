// src/channel/tests.rs

use super::*;
use crate::config::{ChannelConfig, OverflowPolicy};
use crate::error::BridgeError;
use crate::protocol::{
    ControlCommand, Destination, Envelope, Frame, InputEvent, Payload, RoutingId, WidgetState,
    WidgetType, WindowHandle,
};
use anyhow::Result;
use std::os::unix::net::UnixStream;
use std::sync::mpsc::Receiver;

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

fn control_transport() -> ChannelTransport {
    ChannelTransport::new("control", &ChannelConfig::default())
}

/// Every envelope the peer has observed so far.
fn observed(rx: &Receiver<Frame>) -> Vec<Envelope> {
    rx.try_iter()
        .filter_map(|frame| match frame {
            Frame::Message(envelope) => Some(envelope),
            _ => None,
        })
        .collect()
}

fn routed(routing_id: u64, command: ControlCommand) -> Envelope {
    Envelope {
        destination: Destination::Route(RoutingId(routing_id)),
        payload: Payload::Command(command),
    }
}

#[test_log::test]
fn it_should_deliver_deferred_messages_in_order_with_the_new_routing_id() -> Result<()> {
    let mut transport = control_transport();
    let (link, peer) = MemoryLink::new();

    transport.send_command(create(1))?;
    transport.send_command(set_state(1, WidgetState::Show))?;
    assert_eq!(transport.deferred().len(), 2);
    assert!(transport
        .deferred()
        .iter()
        .all(|m| m.destination == Destination::Unresolved));

    transport.attach(Box::new(link));
    assert!(observed(&peer).is_empty(), "nothing may flow before Connected");

    transport.establish_channel(RoutingId(42))?;

    assert_eq!(
        observed(&peer),
        vec![
            routed(42, create(1)),
            routed(42, set_state(1, WidgetState::Show)),
        ]
    );
    assert!(transport.deferred().is_empty());
    Ok(())
}

#[test_log::test]
fn it_should_send_deferred_messages_before_new_ones() -> Result<()> {
    let mut transport = control_transport();
    let (link, peer) = MemoryLink::new();
    transport.attach(Box::new(link));

    for handle in 1..=3 {
        transport.send_command(create(handle))?;
    }
    transport.establish_channel(RoutingId(7))?;
    transport.send_command(create(4))?;

    let handles: Vec<u32> = observed(&peer)
        .into_iter()
        .filter_map(|envelope| match envelope.payload {
            Payload::Command(command) => command.handle().map(|h| h.0),
            Payload::Event(_) => None,
        })
        .collect();
    assert_eq!(handles, vec![1, 2, 3, 4]);
    Ok(())
}

#[test_log::test]
fn it_should_ignore_a_second_establish_while_connected() -> Result<()> {
    let mut transport = control_transport();
    let (link, peer) = MemoryLink::new();
    transport.attach(Box::new(link));

    transport.establish_channel(RoutingId(1))?;
    transport.establish_channel(RoutingId(2))?;
    transport.send_command(create(9))?;

    assert_eq!(transport.state(), ChannelState::Connected(RoutingId(1)));
    assert_eq!(observed(&peer), vec![routed(1, create(9))]);
    Ok(())
}

#[test_log::test]
fn it_should_refuse_to_establish_without_a_link() {
    let mut transport = control_transport();
    let result = transport.establish_channel(RoutingId(1));
    assert!(matches!(result, Err(BridgeError::NotAttached)));
    assert_eq!(transport.state(), ChannelState::Unconnected);
}

#[test_log::test]
fn it_should_not_replay_messages_from_a_previous_epoch() -> Result<()> {
    let mut transport = control_transport();

    let (first_link, first_peer) = MemoryLink::new();
    transport.attach(Box::new(first_link));
    transport.establish_channel(RoutingId(1))?;
    transport.send_command(create(1))?;
    assert_eq!(observed(&first_peer), vec![routed(1, create(1))]);

    // Simulated crash.
    transport.on_channel_closed();
    assert_eq!(transport.state(), ChannelState::Unconnected);
    transport.send_command(set_state(1, WidgetState::Maximized))?;
    transport.send_command(set_state(1, WidgetState::Restore))?;
    assert_eq!(transport.deferred().len(), 2);

    let (second_link, second_peer) = MemoryLink::new();
    transport.attach(Box::new(second_link));
    transport.establish_channel(RoutingId(2))?;

    assert_eq!(
        observed(&second_peer),
        vec![
            routed(2, set_state(1, WidgetState::Maximized)),
            routed(2, set_state(1, WidgetState::Restore)),
        ]
    );
    assert!(observed(&first_peer).is_empty());
    Ok(())
}

#[test_log::test]
fn it_should_requeue_a_message_whose_transmission_failed() -> Result<()> {
    let mut transport = control_transport();
    let (link, peer) = MemoryLink::new();
    transport.attach(Box::new(link));
    transport.establish_channel(RoutingId(3))?;

    drop(peer);
    transport.send_command(create(5))?;

    assert_eq!(transport.state(), ChannelState::Unconnected);
    assert!(!transport.has_link());
    let queued: Vec<_> = transport.deferred().iter().cloned().collect();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].destination, Destination::Unresolved);
    assert_eq!(queued[0].payload, Payload::Command(create(5)));
    Ok(())
}

#[test_log::test]
fn it_should_keep_undrained_messages_when_the_link_dies_mid_drain() -> Result<()> {
    let mut transport = control_transport();
    transport.send_command(create(1))?;
    transport.send_command(create(2))?;

    let (link, peer) = MemoryLink::new();
    drop(peer);
    transport.attach(Box::new(link));
    let result = transport.establish_channel(RoutingId(4));

    assert!(matches!(result, Err(BridgeError::PeerLost(_))));
    assert_eq!(transport.state(), ChannelState::Unconnected);
    let payloads: Vec<_> = transport
        .deferred()
        .iter()
        .map(|m| m.payload.clone())
        .collect();
    assert_eq!(
        payloads,
        vec![Payload::Command(create(1)), Payload::Command(create(2))]
    );
    Ok(())
}

#[test_log::test]
fn it_should_demultiplex_inbound_messages_by_category() -> Result<()> {
    let mut transport = ChannelTransport::new("device", &ChannelConfig::default());
    let (link, _peer) = MemoryLink::new();
    transport.attach(Box::new(link));

    assert_eq!(
        transport.on_message_received(Frame::Establish {
            routing_id: RoutingId(8)
        }),
        Delivery::EstablishRequested(RoutingId(8))
    );

    // Nothing is accepted before the epoch is bound.
    assert_eq!(
        transport.on_message_received(Frame::Message(routed(8, create(1)))),
        Delivery::Dropped
    );

    transport.confirm_establish(RoutingId(8))?;
    assert_eq!(
        transport.on_message_received(Frame::Message(routed(8, create(1)))),
        Delivery::Command(create(1))
    );

    let event = InputEvent::WindowClosed {
        handle: WindowHandle(1),
    };
    assert_eq!(
        transport.on_message_received(Frame::Message(Envelope {
            destination: Destination::Route(RoutingId(8)),
            payload: Payload::Event(event.clone()),
        })),
        Delivery::Event(event)
    );
    Ok(())
}

#[test_log::test]
fn it_should_drop_messages_routed_to_another_epoch() -> Result<()> {
    let mut transport = control_transport();
    let (link, _peer) = MemoryLink::new();
    transport.attach(Box::new(link));
    transport.establish_channel(RoutingId(10))?;

    let stale = Frame::Message(Envelope {
        destination: Destination::Route(RoutingId(9)),
        payload: Payload::Event(InputEvent::OutputSizeChanged {
            width: 1,
            height: 1,
        }),
    });
    assert_eq!(transport.on_message_received(stale), Delivery::Dropped);
    Ok(())
}

#[test_log::test]
fn it_should_confirm_establishment_to_the_peer() -> Result<()> {
    let mut transport = ChannelTransport::new("device", &ChannelConfig::default());
    let (link, peer) = MemoryLink::new();
    transport.attach(Box::new(link));

    transport.post_event(InputEvent::OutputSizeChanged {
        width: 800,
        height: 600,
    })?;
    transport.confirm_establish(RoutingId(5))?;

    let frames: Vec<Frame> = peer.try_iter().collect();
    assert_eq!(
        frames[0],
        Frame::Established {
            routing_id: RoutingId(5)
        }
    );
    assert!(matches!(
        &frames[1],
        Frame::Message(Envelope {
            destination: Destination::Route(RoutingId(5)),
            payload: Payload::Event(InputEvent::OutputSizeChanged { .. }),
        })
    ));
    Ok(())
}

#[test_log::test]
fn it_should_evict_the_oldest_message_when_capped_with_drop_oldest() -> Result<()> {
    let config = ChannelConfig {
        deferred_limit: Some(2),
        overflow: OverflowPolicy::DropOldest,
    };
    let mut transport = ChannelTransport::new("control", &config);
    for handle in 1..=3 {
        transport.send_command(create(handle))?;
    }

    assert_eq!(transport.deferred().len(), 2);
    assert_eq!(transport.deferred().evicted(), 1);
    let handles: Vec<_> = transport
        .deferred()
        .iter()
        .filter_map(|m| match &m.payload {
            Payload::Command(command) => command.handle(),
            Payload::Event(_) => None,
        })
        .collect();
    assert_eq!(handles, vec![WindowHandle(2), WindowHandle(3)]);
    Ok(())
}

#[test_log::test]
fn it_should_report_queue_full_when_capped_with_reject_new() -> Result<()> {
    let config = ChannelConfig {
        deferred_limit: Some(1),
        overflow: OverflowPolicy::RejectNew,
    };
    let mut transport = ChannelTransport::new("control", &config);
    transport.send_command(create(1))?;

    let result = transport.send_command(create(2));
    assert!(matches!(result, Err(BridgeError::QueueFull { limit: 1 })));
    assert_eq!(transport.deferred().len(), 1);
    Ok(())
}

#[test_log::test]
fn it_should_carry_frames_over_a_unix_socket() -> Result<()> {
    let (near, far) = UnixStream::pair()?;
    let (link, _near_reader) = SocketLink::from_stream(near)?;
    let (_far_link, mut far_reader) = SocketLink::from_stream(far)?;

    let mut transport = control_transport();
    transport.send_command(create(1))?;
    transport.attach(Box::new(link));
    transport.request_establish(RoutingId(11))?;
    transport.establish_channel(RoutingId(11))?;
    transport.on_channel_closed();

    assert_eq!(
        far_reader.read_frame()?,
        Some(Frame::Establish {
            routing_id: RoutingId(11)
        })
    );
    assert_eq!(
        far_reader.read_frame()?,
        Some(Frame::Message(routed(11, create(1))))
    );
    assert_eq!(far_reader.read_frame()?, None);
    Ok(())
}
