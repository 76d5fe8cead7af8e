//! End-to-end scenarios over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::time;

use framelink::transport::mock::{self, MockRemote};
use framelink::{Client, ClientOptions, DriverError, Request};

fn open_client(options: ClientOptions) -> (Arc<Client>, MockRemote) {
    let (connection, remote) = mock::pair(8);
    let client = Client::new(options).expect("valid options");
    client.open_with(connection).expect("client opens");
    (Arc::new(client), remote)
}

fn default_options() -> ClientOptions {
    ClientOptions::default()
}

async fn next_request(remote: &mut MockRemote) -> Value {
    let payload = remote.next_message().await.expect("client sent a message");
    serde_json::from_slice(&payload).expect("outbound payload is JSON")
}

fn request_id(request: &Value) -> String {
    request["id"]
        .as_str()
        .expect("request carries a string id")
        .to_owned()
}

#[tokio::test]
async fn ping_pong_with_a_fragmented_response() {
    let (client, mut remote) = open_client(default_options());

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("ping")).await }
    });

    let request = next_request(&mut remote).await;
    assert_eq!(request["method"], "ping");
    assert_eq!(request["params"], json!([]));
    let id = request_id(&request);

    // response arrives in three frames; dispatch starts on the first
    let body = format!(r#"{{"id":"{id}","result":"pong"}}"#);
    remote.push_message_in_frames(body.as_bytes(), 10).await;

    let response = send.await.expect("task").expect("response");
    assert_eq!(response.id, id);
    assert_eq!(response.error, None);
    assert_eq!(response.result, Some(json!("pong")));

    client.close().await.expect("clean close");
}

#[tokio::test]
async fn responses_correlate_out_of_order() {
    let (client, mut remote) = open_client(default_options());

    let first = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("one").with_id("req-1")).await }
    });
    let second = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("two").with_id("req-2")).await }
    });

    // consume both requests in whatever order they were queued
    let mut seen = Vec::new();
    for _ in 0..2 {
        seen.push(request_id(&next_request(&mut remote).await));
    }
    seen.sort();
    assert_eq!(seen, ["req-1", "req-2"]);

    // answer in reverse order
    remote
        .push_message(br#"{"id":"req-2","result":2}"#)
        .await;
    remote
        .push_message(br#"{"id":"req-1","result":1}"#)
        .await;

    let first = first.await.expect("task").expect("response one");
    let second = second.await.expect("task").expect("response two");
    assert_eq!(first.result, Some(json!(1)));
    assert_eq!(second.result, Some(json!(2)));
}

#[tokio::test]
async fn server_error_surfaces_on_the_response() {
    let (client, mut remote) = open_client(default_options());

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("boom").with_id("e1")).await }
    });
    let _ = next_request(&mut remote).await;
    remote
        .push_message(br#"{"id":"e1","error":{"code":-32000,"message":"bad"}}"#)
        .await;

    let response = send.await.expect("task").expect("an error response is still a response");
    let error = response.error.expect("error payload");
    assert_eq!(error.code, -32000);
    assert_eq!(error.message.as_deref(), Some("bad"));
    assert_eq!(response.result, None);
}

#[tokio::test]
async fn null_and_absent_results_stay_distinct() {
    let (client, mut remote) = open_client(default_options());

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("m").with_id("null-r")).await }
    });
    let _ = next_request(&mut remote).await;
    remote.push_message(br#"{"id":"null-r","result":null}"#).await;
    let response = send.await.expect("task").expect("response");
    assert_eq!(response.result, Some(Value::Null));

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("m").with_id("absent-r")).await }
    });
    let _ = next_request(&mut remote).await;
    // a null error still terminates the header; the body carries no result
    remote.push_message(br#"{"id":"absent-r","error":null}"#).await;
    let response = send.await.expect("task").expect("response");
    assert_eq!(response.error, None);
    assert_eq!(response.result, None);
}

#[tokio::test]
async fn unknown_id_messages_are_dropped_silently() {
    let (client, mut remote) = open_client(default_options());

    remote.push_message(br#"{"id":"nobody","result":1}"#).await;
    remote.push_message(br#"{"result":"not even an id"}"#).await;

    // the connection keeps working afterwards
    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("ping").with_id("alive")).await }
    });
    let _ = next_request(&mut remote).await;
    remote.push_message(br#"{"id":"alive","result":"ok"}"#).await;
    let response = send.await.expect("task").expect("response");
    assert_eq!(response.result, Some(json!("ok")));
}

#[tokio::test]
async fn duplicate_response_is_delivered_at_most_once() {
    let (client, mut remote) = open_client(default_options());

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("m").with_id("dup")).await }
    });
    let _ = next_request(&mut remote).await;
    remote.push_message(br#"{"id":"dup","result":"first"}"#).await;
    remote.push_message(br#"{"id":"dup","result":"second"}"#).await;

    let response = send.await.expect("task").expect("response");
    assert_eq!(response.result, Some(json!("first")));

    // a fresh request on the same id works once the first completed
    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("m").with_id("dup")).await }
    });
    let _ = next_request(&mut remote).await;
    remote.push_message(br#"{"id":"dup","result":"third"}"#).await;
    let response = send.await.expect("task").expect("response");
    assert_eq!(response.result, Some(json!("third")));
}

#[tokio::test]
async fn colliding_pending_ids_are_rejected() {
    let (client, _remote) = open_client(default_options());

    let subscription = client.subscribe("taken").expect("subscribe");
    let result = client.send(Request::new("m").with_id("taken")).await;
    assert!(matches!(result, Err(DriverError::IdPending(id)) if id == "taken"));
    drop(subscription);
}

#[tokio::test]
async fn notification_shaped_reply_to_a_request_is_an_error() {
    let (client, mut remote) = open_client(default_options());

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("m").with_id("n1")).await }
    });
    let _ = next_request(&mut remote).await;
    remote
        .push_message(br#"{"id":"n1","method":"update","params":[]}"#)
        .await;

    let result = send.await.expect("task");
    assert!(matches!(result, Err(DriverError::ExpectedResponse)));
}

#[tokio::test]
async fn notify_sets_the_fire_and_forget_flag() {
    let (client, mut remote) = open_client(default_options());

    client.notify(Request::new("let_it_go")).await.expect("notify");
    let request = next_request(&mut remote).await;
    assert_eq!(request["async"], json!(true));
    assert_eq!(request["method"], "let_it_go");
    assert_eq!(request["params"], json!([]));
    assert!(request["id"].is_string());
}

#[tokio::test]
async fn absent_params_can_stay_absent() {
    let (client, mut remote) =
        open_client(default_options().with_send_empty_params(false));

    client.notify(Request::new("bare")).await.expect("notify");
    let request = next_request(&mut remote).await;
    assert!(request.get("params").is_none());
}

#[tokio::test]
async fn wrong_state_calls_fail_immediately() {
    let (connection, _remote) = mock::pair(8);
    let client = Client::new(default_options()).expect("valid options");

    assert!(matches!(
        client.send(Request::new("m")).await,
        Err(DriverError::NotOpen)
    ));
    assert!(matches!(client.close().await, Err(DriverError::NotOpen)));

    client.open_with(connection).expect("opens");
    assert!(client.is_open());

    let (second, _second_remote) = mock::pair(8);
    assert!(matches!(
        client.open_with(second),
        Err(DriverError::AlreadyOpen)
    ));

    client.close().await.expect("closes");
    assert!(!client.is_open());
    assert!(matches!(
        client.send(Request::new("m")).await,
        Err(DriverError::NotOpen)
    ));
}

#[tokio::test]
async fn close_cancels_in_flight_requests() {
    let (client, mut remote) = open_client(default_options());

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("m").with_id("inflight")).await }
    });
    let _ = next_request(&mut remote).await;

    client.close().await.expect("close");
    let result = send.await.expect("task");
    assert!(matches!(result, Err(DriverError::Cancelled { id }) if id == "inflight"));
}

#[tokio::test]
async fn severed_link_fails_subsequent_sends_fast() {
    let (client, mut remote) = open_client(default_options());

    remote.sever();
    time::sleep(Duration::from_millis(50)).await;

    assert!(!client.is_open());
    let result = client.send(Request::new("m")).await;
    assert!(matches!(result, Err(DriverError::ConnectionClosed)));
}

#[tokio::test(start_paused = true)]
async fn oversized_header_drops_and_the_request_times_out_by_ttl() {
    let options = default_options()
        .with_header_bytes_max(32)
        .with_pending_ttl(Duration::from_secs(2))
        .with_sweep_interval(Duration::from_secs(1));
    let (client, mut remote) = open_client(options);

    let send = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.send(Request::new("m").with_id("slow")).await }
    });
    let _ = next_request(&mut remote).await;

    // id alone exceeds the peek window, so the header never classifies
    let long_id = "x".repeat(64);
    let reply = format!(r#"{{"id":"{long_id}","result":1}}"#);
    remote.push_message(reply.as_bytes()).await;

    time::advance(Duration::from_secs(4)).await;
    // the next inbound message triggers the opportunistic sweep
    remote.push_message(br#"{"id":"other","result":1}"#).await;

    let result = send.await.expect("task");
    assert!(matches!(result, Err(DriverError::Cancelled { id }) if id == "slow"));
}

#[tokio::test(start_paused = true)]
async fn slow_subscriber_backpressure_reaches_the_socket() {
    let options = default_options()
        .with_inbound_messages_max(1)
        .with_subscription_buffer(1);
    let (connection, mut remote) = mock::pair(1);
    let client = Client::new(options).expect("valid options");
    client.open_with(connection).expect("opens");

    let mut subscription = client.subscribe("sub").expect("subscribe");

    // an unread subscription stalls the chain: subscription buffer, then the
    // dispatcher, then the inbound channel, then the socket buffer fill up
    let mut accepted = 0;
    let mut stalled = false;
    for n in 0..10 {
        let event = format!(r#"{{"id":"sub","method":"update","params":[{n}]}}"#);
        if remote.try_push_frame(event.as_bytes(), true).is_err() {
            stalled = true;
            break;
        }
        accepted += 1;
        time::sleep(Duration::from_millis(20)).await;
    }
    assert!(stalled, "pushes must eventually hit a full transport buffer");

    // draining the subscription releases the whole chain in order
    let mut received = Vec::new();
    while let Ok(Some(event)) =
        time::timeout(Duration::from_millis(100), subscription.next()).await
    {
        received.push(event.expect("decodes"));
    }
    assert_eq!(received.len(), accepted);
    for (n, event) in received.iter().enumerate() {
        assert_eq!(event.params, Some(json!([n])));
    }
}

#[tokio::test]
async fn subscription_streams_notifications_and_unregisters_on_drop() {
    let (client, mut remote) = open_client(default_options());

    let mut subscription = client.subscribe("live1").expect("subscribe");
    assert_eq!(subscription.id(), "live1");

    remote
        .push_message(br#"{"id":"live1","method":"create","params":[{"n":1}]}"#)
        .await;
    remote
        .push_message(br#"{"id":"live1","method":"delete","params":null}"#)
        .await;

    let first = subscription.next().await.expect("event").expect("decodes");
    assert_eq!(first.method, "create");
    assert_eq!(first.params, Some(json!([{"n": 1}])));

    let second = subscription.next().await.expect("event").expect("decodes");
    assert_eq!(second.method, "delete");
    assert_eq!(second.params, Some(Value::Null));

    drop(subscription);
    // the id is free again immediately
    let again = client.subscribe("live1").expect("re-subscribe after drop");
    drop(again);
}
