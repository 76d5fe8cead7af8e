use proptest::prelude::*;
use rstest::rstest;

use super::{Header, parse, random_id};
use crate::proto::ErrorPayload;

fn expect_response(bytes: &[u8]) -> super::ResponseHeader {
    match parse(bytes) {
        Some(Header::Response(header)) => header,
        other => panic!("expected a response header, got {other:?}"),
    }
}

fn expect_notification(bytes: &[u8]) -> super::NotificationHeader {
    match parse(bytes) {
        Some(Header::Notification(header)) => header,
        other => panic!("expected a notification header, got {other:?}"),
    }
}

#[test]
fn response_with_result_extracts_id() {
    let header = expect_response(br#"{"id":"abc123","result":{"rows":[1,2,3]}}"#);
    assert_eq!(header.id, "abc123");
    assert_eq!(header.error, None);
}

#[test]
fn response_error_is_decoded_eagerly() {
    let header = expect_response(br#"{"id":"x","error":{"code":-32000,"message":"boom"}}"#);
    assert_eq!(
        header.error,
        Some(ErrorPayload {
            code: -32000,
            message: Some("boom".to_owned()),
        })
    );
}

#[test]
fn null_error_means_no_error() {
    let header = expect_response(br#"{"id":"x","error":null,"result":1}"#);
    assert_eq!(header.error, None);
}

#[test]
fn truncated_result_value_does_not_block_classification() {
    // only the property name matters; its value may still be in flight
    let header = expect_response(br#"{"id":"x","result":{"rows":[{"a":1},{"b"#);
    assert_eq!(header.id, "x");
}

#[test]
fn notification_shape_is_recognized() {
    let header = expect_notification(br#"{"id":"sub1","method":"update","params":[{"k":1}]}"#);
    assert_eq!(header.id, "sub1");
    assert_eq!(header.method, "update");
    assert_eq!(header.error, None);
}

#[test]
fn notification_error_is_decoded_eagerly() {
    let header = expect_notification(br#"{"id":"sub1","method":"update","error":{"code":7}}"#);
    assert_eq!(
        header.error,
        Some(ErrorPayload {
            code: 7,
            message: None,
        })
    );
}

#[test]
fn property_names_match_case_insensitively() {
    let header = expect_response(br#"{"ID":"x","Result":true}"#);
    assert_eq!(header.id, "x");
    let header = expect_notification(br#"{"Id":"s","METHOD":"m","Params":null}"#);
    assert_eq!(header.method, "m");
}

#[test]
fn whitespace_between_tokens_is_tolerated() {
    let header = expect_response(b"{ \"id\" :\t\"x\" ,\n\"result\" : [] }");
    assert_eq!(header.id, "x");
}

#[test]
fn string_escapes_are_unescaped() {
    let header = expect_response(br#"{"id":"aA\n\"b","result":1}"#);
    assert_eq!(header.id, "aA\n\"b");
}

#[rstest]
#[case::empty(b"" as &[u8])]
#[case::not_an_object(b"[1,2,3]")]
#[case::missing_id(br#"{"result":1}"#)]
#[case::empty_id(br#"{"id":"","result":1}"#)]
#[case::numeric_id(br#"{"id":42,"result":1}"#)]
#[case::null_id(br#"{"id":null,"result":1}"#)]
#[case::unknown_property(br#"{"jsonrpc":"2.0","id":"x","result":1}"#)]
#[case::method_without_id(br#"{"method":"update","params":[]}"#)]
#[case::id_without_payload_property(br#"{"id":"X"}"#)]
#[case::id_and_method_without_payload_property(br#"{"id":"x","method":"m"}"#)]
#[case::empty_method(br#"{"id":"s","method":"","params":[]}"#)]
#[case::truncated_mid_id(br#"{"id":"ab"#)]
#[case::truncated_before_value(br#"{"id":"#)]
#[case::malformed_error(br#"{"id":"x","error":"nope"}"#)]
fn undispatchable_headers_yield_none(#[case] bytes: &[u8]) {
    assert_eq!(parse(bytes), None);
}

#[test]
fn parsing_is_idempotent() {
    let bytes = br#"{"id":"x","error":{"code":1},"result":0}"#;
    assert_eq!(parse(bytes), parse(bytes));
}

#[rstest]
#[case(1, 4)]
#[case(6, 8)]
#[case(9, 12)]
fn random_id_has_base64_length(#[case] n_bytes: usize, #[case] expected_len: usize) {
    let id = random_id(n_bytes);
    assert_eq!(id.len(), expected_len);
    assert!(
        id.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
    );
}

#[test]
fn generated_ids_are_distinct() {
    let ids: std::collections::HashSet<String> = (0..64).map(|_| random_id(6)).collect();
    assert_eq!(ids.len(), 64);
}

proptest! {
    #[test]
    fn never_panics_on_arbitrary_input(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
        let _ = parse(&bytes);
    }

    #[test]
    fn classification_survives_result_truncation(cut in 0usize..27) {
        // any prefix that still contains `"result":` classifies identically
        let full = br#"{"id":"abc","result":{"rows":[1,2,3,4,5,6,7,8]}}"#;
        let header = parse(&full[..full.len() - cut]);
        prop_assert_eq!(header.map(|h| h.id().to_owned()), Some("abc".to_owned()));
    }
}
