//! Framing tests across the public API: bodies of every size survive a trip
//! through the encoder and a byte-at-a-time decoder, and a stream holding
//! several frames drains completely.

use tether_protocol::{
    encode_frame, Encoding, FrameDecoder, HeaderFields, MessageBody, PLUGIN_VERSION_FIELD,
};

fn frame(body: &[u8], first: bool) -> Vec<u8> {
    encode_frame(&HeaderFields::for_body(body.len(), first), body)
}

#[test]
fn test_frames_of_any_length_decode_from_single_bytes() {
    for len in [0usize, 1, 2, 17, 255, 4096] {
        let body: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let bytes = frame(&body, len % 2 == 0);

        let mut decoder = FrameDecoder::new();
        let mut decoded = None;
        for byte in &bytes {
            decoder.extend(std::slice::from_ref(byte));
            if let Some(f) = decoder.decode().unwrap() {
                assert!(decoded.is_none(), "decoded twice for len {len}");
                decoded = Some(f);
            }
        }

        let decoded = decoded.unwrap_or_else(|| panic!("no frame for len {len}"));
        assert_eq!(decoded.body.as_ref(), body.as_slice());
        assert_eq!(decoded.header.contains(PLUGIN_VERSION_FIELD), len % 2 == 0);
        assert_eq!(decoder.buffered(), 0);
    }
}

#[test]
fn test_decoder_drains_every_buffered_frame() {
    let mut bytes = frame(br#"{"_msgtype":"a"}"#, true);
    bytes.extend(frame(b"", false));
    bytes.extend(frame(br#"{"_msgtype":"b"}"#, false));

    let mut decoder = FrameDecoder::new();
    decoder.extend(&bytes);

    let mut types = Vec::new();
    while let Some(f) = decoder.decode().unwrap() {
        if f.body.is_empty() {
            types.push(String::from("<handshake>"));
            continue;
        }
        let body = MessageBody::decode(Encoding::Json, &f.body).unwrap();
        types.push(body.msg_type().unwrap_or_default().to_owned());
    }

    assert_eq!(types, vec!["a", "<handshake>", "b"]);
}

#[test]
fn test_echo_message_wire_bytes() {
    let mut body = MessageBody::from_json_str(r#"{"message":"hello world"}"#).unwrap();
    body.set_msg_type("echo");
    let payload = body.to_bytes().unwrap();
    let bytes = frame(&payload, true);

    let expected_prefix = format!("VER:1\nPVER:110\nLEN:{}\n\n", payload.len());
    assert!(bytes.starts_with(expected_prefix.as_bytes()));

    let json: serde_json::Value = serde_json::from_slice(&bytes[expected_prefix.len()..]).unwrap();
    assert_eq!(json["_msgtype"], "echo");
    assert_eq!(json["message"], "hello world");
}

#[test]
fn test_reset_discards_partial_frame() {
    let mut decoder = FrameDecoder::new();
    decoder.extend(b"VER:1\nLEN:10\n\npartial");
    assert!(decoder.decode().unwrap().is_none());

    decoder.reset();
    decoder.extend(&frame(b"ok", false));
    let f = decoder.decode().unwrap().unwrap();
    assert_eq!(f.body.as_ref(), b"ok");
}
