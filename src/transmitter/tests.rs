use bytes::Bytes;
use rstest::rstest;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{OutboundMessage, run, write_message};
use crate::transport::mock::{self, SentFrame, SinkEvent};
use crate::transport::{ControlFrame, ControlKind};

fn frame(payload: &[u8], end_of_message: bool) -> SentFrame {
    SentFrame {
        payload: payload.to_vec(),
        end_of_message,
    }
}

#[rstest]
#[case::short_tail(b"0123456789" as &[u8], 4, vec![frame(b"0123", false), frame(b"4567", false), frame(b"89", true)])]
#[case::exact_multiple(b"01234567" as &[u8], 4, vec![frame(b"0123", false), frame(b"4567", false), frame(b"", true)])]
#[case::single_short(b"ab" as &[u8], 4, vec![frame(b"ab", true)])]
#[case::empty(b"" as &[u8], 4, vec![frame(b"", true)])]
#[case::block_of_one(b"xyz" as &[u8], 1, vec![frame(b"x", false), frame(b"y", false), frame(b"z", false), frame(b"", true)])]
#[tokio::test]
async fn payloads_are_framed_with_exactly_one_terminator(
    #[case] payload: &[u8],
    #[case] block_size: usize,
    #[case] expected: Vec<SentFrame>,
) {
    let (mut connection, mut remote) = mock::pair(4);
    write_message(&mut connection.sink, payload, block_size)
        .await
        .expect("framing succeeds");

    let mut sent = Vec::new();
    while let Some(f) = remote.try_next_frame() {
        sent.push(f);
    }
    assert_eq!(sent, expected);
    assert_eq!(sent.iter().filter(|f| f.end_of_message).count(), 1);
}

#[tokio::test]
async fn control_replies_go_out_before_queued_data() {
    let (connection, mut remote) = mock::pair(4);
    let (outbound_tx, outbound_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();

    outbound_tx
        .send(OutboundMessage {
            payload: Bytes::from_static(b"data"),
        })
        .await
        .expect("queue message");
    remote
        .push_control(ControlFrame {
            kind: ControlKind::Pong,
            payload: Bytes::from_static(b"ping-payload"),
        })
        .await;

    let task = tokio::spawn(run(
        connection.sink,
        outbound_rx,
        connection.control,
        16,
        cancel.clone(),
    ));

    let first = remote.next_event().await.expect("an event");
    assert_eq!(
        first,
        SinkEvent::Control(ControlFrame {
            kind: ControlKind::Pong,
            payload: Bytes::from_static(b"ping-payload"),
        })
    );
    assert_eq!(remote.next_message().await, Some(b"data".to_vec()));

    cancel.cancel();
    task.await.expect("pipeline ends");
}

#[tokio::test]
async fn cancellation_sends_a_close_frame() {
    let (connection, mut remote) = mock::pair(4);
    let (_outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(4);
    let cancel = CancellationToken::new();

    let task = tokio::spawn(run(
        connection.sink,
        outbound_rx,
        connection.control,
        16,
        cancel.clone(),
    ));
    cancel.cancel();
    task.await.expect("pipeline ends");

    assert_eq!(remote.next_event().await, Some(SinkEvent::Close));
}

#[tokio::test]
async fn close_obligation_ends_the_pipeline() {
    let (connection, mut remote) = mock::pair(4);
    let (_outbound_tx, outbound_rx) = mpsc::channel::<OutboundMessage>(4);
    let cancel = CancellationToken::new();

    remote
        .push_control(ControlFrame {
            kind: ControlKind::Close,
            payload: Bytes::new(),
        })
        .await;

    let task = tokio::spawn(run(
        connection.sink,
        outbound_rx,
        connection.control,
        16,
        cancel.clone(),
    ));
    task.await.expect("pipeline ends on close obligation");
    assert!(cancel.is_cancelled(), "teardown propagates to siblings");

    let echoed = remote.next_event().await;
    assert_eq!(
        echoed,
        Some(SinkEvent::Control(ControlFrame {
            kind: ControlKind::Close,
            payload: Bytes::new(),
        }))
    );
}
