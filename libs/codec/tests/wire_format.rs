//! Frame layout and message round trips through the standard registry

use codec::{
    ClientId, CodecError, Message, MessageKind, MessageTag, ObjectChanged, ObjectDelete,
    ObjectInfo, RequestOption, Response, SyncRequest, TypeRegistry, WireReader, WireWriter,
    FRAME_HEADER_LEN, MAX_NESTING_DEPTH, TAG_LEN,
};
use hex_literal::hex;

fn frame_len(frame: &[u8]) -> usize {
    u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize
}

fn round_trip(message: Message) -> Message {
    let registry = TypeRegistry::standard();
    let frame = registry.encode_frame(&message).unwrap();
    assert_eq!(frame_len(&frame), frame.len() - FRAME_HEADER_LEN);
    registry.decode_payload(&frame[FRAME_HEADER_LEN..]).unwrap()
}

fn sample_request() -> SyncRequest {
    let mut request = SyncRequest::with_key(17, "Fire on target?");
    request.add_option(RequestOption::new("Fire", 1, true)).unwrap();
    request.add_option(RequestOption::new("Hold", 2, false)).unwrap();
    request.add_separator();
    request
        .add_option(RequestOption::new("Cancel", RequestOption::CANCEL_ID, true))
        .unwrap();
    request.set_default_option(1);
    request
}

#[test]
fn client_id_frame_bytes() {
    let registry = TypeRegistry::standard();
    let frame = registry.encode_frame(&ClientId::new(7).into()).unwrap();
    assert_eq!(&frame[..], &hex!("0000000a 436c696e4944 00000007")[..]);
}

#[test]
fn frame_length_counts_tag_and_body() {
    let registry = TypeRegistry::standard();
    let frame = registry
        .encode_frame(&Response::new(3, 1, "").into())
        .unwrap();
    // tag + sync_key + answer_id + empty string
    assert_eq!(frame_len(&frame), TAG_LEN + 4 + 4 + 2);
    assert_eq!(&frame[4..10], b"Respns");
}

#[test]
fn tag_only_payload_has_length_six() {
    let registry = TypeRegistry::standard();
    let mut w = WireWriter::new(&registry);
    w.put_i32(0);
    w.put_tag(MessageTag::CLIENT_ID);
    let mut frame = w.into_inner();
    let len = (frame.len() - FRAME_HEADER_LEN) as u32;
    frame[..FRAME_HEADER_LEN].copy_from_slice(&len.to_be_bytes());

    assert_eq!(&frame[..], &hex!("00000006 436c696e4944")[..]);
    // ClientId needs a body, so decoding the bare tag is a truncation
    let err = registry.decode_payload(&frame[FRAME_HEADER_LEN..]).unwrap_err();
    assert!(matches!(err, CodecError::Truncated { .. }));
    assert!(!err.is_fatal());
}

#[test]
fn every_standard_message_round_trips() {
    let messages: Vec<Message> = vec![
        ClientId::new(-1).into(),
        ClientId::new(i32::MAX).into(),
        Response::new(9, 2, "Hold").into(),
        Response::default().into(),
        RequestOption::new("Fire", 1, true).into(),
        RequestOption::separator().into(),
        ObjectDelete::new(ClientId::new(4)).into(),
        ObjectInfo::new(Response::new(1, 1, "ok")).into(),
        sample_request().into(),
    ];
    for message in messages {
        assert_eq!(round_trip(message.clone()), message);
    }
}

#[test]
fn answered_request_round_trips() {
    let mut request = sample_request();
    request.set_answer_by_id(1).unwrap();
    let decoded = round_trip(request.clone().into());
    let Message::SyncRequest(decoded) = decoded else {
        panic!("expected a SyncRequest");
    };
    assert_eq!(decoded, request);
    assert_eq!(decoded.answer_id(), 1);
    assert_eq!(decoded.default_id(), 1);
    assert_eq!(decoded.options().len(), 4);
}

#[test]
fn nested_object_changed_round_trips() {
    let inner = ObjectChanged::new(ClientId::new(1), ClientId::new(2));
    let outer = ObjectChanged::new(inner, ObjectInfo::new(sample_request()));
    assert_eq!(round_trip(outer.clone().into()), Message::from(outer));
}

#[test]
fn aliased_kind_decodes_as_target() {
    let mut registry = TypeRegistry::empty();
    registry
        .register(MessageTag::OBJECT_DELETE, MessageKind::ObjectDelete)
        .unwrap();
    registry
        .register(MessageTag::CLIENT_ID, MessageKind::ClientId)
        .unwrap();
    registry
        .register_alias(MessageKind::ObjectInfo, MessageKind::ObjectDelete)
        .unwrap();

    let info: Message = ObjectInfo::new(ClientId::new(5)).into();
    let frame = registry.encode_frame(&info).unwrap();
    assert_eq!(&frame[4..10], b"ObjDel");
    assert_eq!(
        registry.decode_payload(&frame[FRAME_HEADER_LEN..]).unwrap(),
        Message::from(ObjectDelete::new(ClientId::new(5)))
    );
}

#[test]
fn unknown_tag_is_fatal() {
    let registry = TypeRegistry::standard();
    let payload = hex!("58585858 5858 00000001");
    let err = registry.decode_payload(&payload).unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(err.category(), "unknown_tag");
}

#[test]
fn runaway_nesting_is_refused() {
    let registry = TypeRegistry::standard();
    let payload = b"ObjInf".repeat(200_000);
    let err = registry.decode_payload(&payload).unwrap_err();
    assert_eq!(
        err,
        CodecError::NestingTooDeep {
            limit: MAX_NESTING_DEPTH
        }
    );
    assert!(err.is_fatal());
}

#[test]
fn nesting_up_to_the_limit_decodes() {
    let mut message: Message = ClientId::new(3).into();
    for _ in 0..MAX_NESTING_DEPTH - 1 {
        message = ObjectInfo::new(message).into();
    }
    assert_eq!(round_trip(message.clone()), message);

    let too_deep: Message = ObjectInfo::new(message).into();
    let registry = TypeRegistry::standard();
    let frame = registry.encode_frame(&too_deep).unwrap();
    let err = registry.decode_payload(&frame[FRAME_HEADER_LEN..]).unwrap_err();
    assert_eq!(err.category(), "nesting");
}

#[test]
fn non_option_in_option_list_is_dropped() {
    let registry = TypeRegistry::standard();
    let mut w = WireWriter::new(&registry);
    w.put_i32(5);
    w.put_str("Pick").unwrap();
    w.put_list(&[
        Message::from(RequestOption::new("A", 1, true)),
        Message::from(ClientId::new(3)),
    ])
    .unwrap();
    w.put_i32(-1);
    w.put_bool(false);
    let body = w.into_inner();

    let mut r = WireReader::new(&body, &registry);
    let Message::SyncRequest(request) = Message::decode_body(MessageKind::SyncRequest, &mut r)
        .unwrap()
    else {
        panic!("expected a SyncRequest");
    };
    assert_eq!(request.options(), &[RequestOption::new("A", 1, true)]);
    assert_eq!(r.remaining(), 0);
}

#[test]
fn message_display_shapes() {
    assert_eq!(ClientId::new(7).to_string(), "ClientID: 7");
    assert_eq!(
        Response::new(3, 1, "Yes").to_string(),
        "Response: SynchKey=3, answerID=1, answerStr=Yes"
    );
    assert_eq!(
        RequestOption::new("Hold", 2, false).to_string(),
        "2: Hold (disabled)"
    );
}
