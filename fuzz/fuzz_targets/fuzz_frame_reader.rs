//! Fuzz target for the length-prefixed frame reader
//!
//! Feeds an arbitrary byte stream split at arbitrary points. The reader must
//! produce the same frames (or the same error) however the input is split.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sftpmount_client::FrameReader;

const MAX_FRAME: usize = 64 * 1024;

#[derive(Debug, Arbitrary)]
struct Input {
    stream: Vec<u8>,
    splits: Vec<u16>,
}

fuzz_target!(|input: Input| {
    let mut whole = FrameReader::new(MAX_FRAME);
    let mut expected = Vec::new();
    let whole_result = whole.feed(&input.stream, &mut expected);

    let mut pieces = FrameReader::new(MAX_FRAME);
    let mut got = Vec::new();
    let mut rest: &[u8] = &input.stream;
    let mut pieces_result = Ok(());
    for split in input.splits {
        if rest.is_empty() || pieces_result.is_err() {
            break;
        }
        let at = usize::from(split) % (rest.len() + 1);
        let (head, tail) = rest.split_at(at);
        pieces_result = pieces.feed(head, &mut got);
        rest = tail;
    }
    if pieces_result.is_ok() {
        pieces_result = pieces.feed(rest, &mut got);
    }

    assert_eq!(whole_result.is_ok(), pieces_result.is_ok());
    if whole_result.is_ok() {
        assert_eq!(expected, got);
    }
});
