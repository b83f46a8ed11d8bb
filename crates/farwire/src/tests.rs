use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::buffer::WireBuffer;
use crate::decode::decode;
use crate::encode::encode;
use crate::types::Error;
use crate::types::Message;
use crate::types::Opcode;
use crate::types::BOOTSTRAP;

const ALL_OPCODES: [Opcode; 8] = [
    Opcode::Eval,
    Opcode::Store,
    Opcode::StorePkg,
    Opcode::Call,
    Opcode::Quit,
    Opcode::Returned,
    Opcode::Ok,
    Opcode::Died,
];

fn round_trip(msg: &Message) {
    let bytes = encode(msg);
    let (decoded, consumed) = decode(&bytes).expect("complete frame must decode");
    assert_eq!(&decoded, msg);
    assert_eq!(consumed, bytes.len());
}

// --- Round trips ---

#[test]
fn round_trip_every_opcode_no_args() {
    for op in ALL_OPCODES {
        round_trip(&Message::new(op, vec![]));
    }
}

#[test]
fn round_trip_empty_string_args() {
    round_trip(&Message::new(Opcode::Store, vec![vec![], vec![], vec![]]));
}

#[test]
fn round_trip_binary_args() {
    let args = vec![
        b"plain".to_vec(),
        vec![0x00, 0xFF, 0x0A, 0x0D, 0x00],
        b"trailing newline\n".to_vec(),
        // Payload that itself looks like a frame must not confuse framing.
        b"QUIT\n0\n".to_vec(),
    ];
    round_trip(&Message::new(Opcode::Eval, args));
}

#[test]
fn round_trip_unknown_opcode_token() {
    let msg = Message::raw(&b"BLORT"[..], vec![b"x".to_vec()]);
    round_trip(&msg);
    let (decoded, _) = decode(&encode(&msg)).unwrap();
    assert_eq!(decoded.opcode(), None);
}

#[test]
fn round_trip_randomized_payloads() {
    let mut rng = StdRng::seed_from_u64(0x6661727775697265);
    for _ in 0..50 {
        let op = ALL_OPCODES[rng.gen_range(0..ALL_OPCODES.len())];
        let count = rng.gen_range(0..6);
        let args = (0..count)
            .map(|_| {
                let mut bytes = vec![0u8; rng.gen_range(0..200)];
                rng.fill(&mut bytes[..]);
                bytes
            })
            .collect();
        round_trip(&Message::new(op, args));
    }
}

// --- Partial delivery ---

#[test]
fn every_strict_prefix_is_incomplete() {
    let msg = Message::new(
        Opcode::StorePkg,
        vec![b"ns".to_vec(), vec![], b"f".to_vec(), b"\n\n\n".to_vec()],
    );
    let bytes = encode(&msg);

    for split in 0..bytes.len() {
        assert_eq!(
            decode(&bytes[..split]),
            Err(Error::Incomplete),
            "prefix of {} bytes must be incomplete",
            split
        );
    }
    let (decoded, consumed) = decode(&bytes).unwrap();
    assert_eq!(decoded, msg);
    assert_eq!(consumed, bytes.len());
}

#[test]
fn byte_at_a_time_delivery_yields_exactly_one_message() {
    let msg = Message::new(Opcode::Returned, vec![b"42".to_vec(), vec![0, 10, 13]]);
    let bytes = encode(&msg);

    let mut buffer = WireBuffer::new();
    let mut seen = Vec::new();
    for &b in &bytes {
        buffer.extend(&[b]);
        if let Some(m) = buffer.next_message().unwrap() {
            seen.push(m);
        }
    }
    assert_eq!(seen, vec![msg]);
    assert!(buffer.is_empty());
}

#[test]
fn trailing_bytes_are_left_untouched() {
    let first = Message::new(Opcode::Ok, vec![]);
    let second = Message::new(Opcode::Died, vec![b"while running: boom".to_vec()]);

    let mut bytes = encode(&first);
    let second_bytes = encode(&second);
    bytes.extend_from_slice(&second_bytes);

    let (decoded, consumed) = decode(&bytes).unwrap();
    assert_eq!(decoded, first);
    assert_eq!(&bytes[consumed..], &second_bytes[..]);

    let (decoded, consumed) = decode(&bytes[consumed..]).unwrap();
    assert_eq!(decoded, second);
    assert_eq!(consumed, second_bytes.len());
}

#[test]
fn multiple_messages_drain_in_order() {
    let messages: Vec<Message> = (0..5)
        .map(|i| Message::new(Opcode::Call, vec![format!("fn{}", i).into_bytes()]))
        .collect();

    let mut buffer = WireBuffer::new();
    for msg in &messages {
        buffer.extend(&encode(msg));
    }
    for msg in &messages {
        assert_eq!(buffer.next_message().unwrap().as_ref(), Some(msg));
    }
    assert_eq!(buffer.next_message().unwrap(), None);
}

// --- Malformed frames ---

#[test]
fn non_decimal_count_is_fatal() {
    assert_eq!(decode(b"EVAL\nxx\n"), Err(Error::BadCount(b"xx".to_vec())));
    assert_eq!(decode(b"EVAL\n-1\n"), Err(Error::BadCount(b"-1".to_vec())));
    assert_eq!(decode(b"EVAL\n\n"), Err(Error::BadCount(vec![])));
}

#[test]
fn non_decimal_length_is_fatal() {
    assert_eq!(decode(b"EVAL\n1\n4x\ncode"), Err(Error::BadLength(b"4x".to_vec())));
}

#[test]
fn oversized_count_is_fatal_not_incomplete() {
    let line = b"99999999999999999999999999";
    let mut frame = b"EVAL\n".to_vec();
    frame.extend_from_slice(line);
    frame.push(b'\n');
    assert_eq!(decode(&frame), Err(Error::BadCount(line.to_vec())));
}

#[test]
fn empty_opcode_line_is_fatal() {
    assert_eq!(decode(b"\n0\n"), Err(Error::EmptyOpcode));
}

#[test]
fn malformed_field_is_only_judged_once_complete() {
    // The bad count line has not terminated yet, so this could still be a
    // prefix of a valid frame as far as the decoder can tell.
    assert_eq!(decode(b"EVAL\nx"), Err(Error::Incomplete));
    assert_eq!(decode(b"EVAL\nx\n"), Err(Error::BadCount(b"x".to_vec())));
}

// --- Protocol constants ---

#[test]
fn bootstrap_is_line_terminated() {
    // The executor scans for it byte-for-byte before the first frame.
    assert_eq!(BOOTSTRAP.last(), Some(&b'\n'));
    assert!(!BOOTSTRAP[..BOOTSTRAP.len() - 1].contains(&b'\n'));
}
