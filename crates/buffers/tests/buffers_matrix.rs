//! Cursor, source and modified UTF-8 behavior of the buffers crate.

use std::io;

use objstream_buffers::{
    mutf8, BufferError, ByteSource, IoSource, PeekReader, Reader, StreamingReader, Writer,
};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Writer/Reader matrix
// ---------------------------------------------------------------------------

#[test]
fn integers_matrix() {
    let mut w = Writer::new();
    w.u8(0xff);
    w.i8(i8::MIN);
    w.u16(0xaced);
    w.i16(-2);
    w.u32(0x7e00_0000);
    w.i32(i32::MIN);
    w.i64(-0x0102_0304_0506_0708);
    let data = w.flush();
    assert_eq!(&data[..5], &[0xff, 0x80, 0xac, 0xed, 0xff]);

    let mut r = Reader::new(&data);
    assert_eq!(r.u8().unwrap(), 0xff);
    assert_eq!(r.i8().unwrap(), i8::MIN);
    assert_eq!(r.u16().unwrap(), 0xaced);
    assert_eq!(r.i16().unwrap(), -2);
    assert_eq!(r.u32().unwrap(), 0x7e00_0000);
    assert_eq!(r.i32().unwrap(), i32::MIN);
    assert_eq!(r.i64().unwrap(), -0x0102_0304_0506_0708);
    assert_eq!(r.size(), 0);
}

#[test]
fn floats_matrix() {
    let mut w = Writer::new();
    w.f32(-0.0);
    w.f32(f32::NAN);
    w.f64(f64::INFINITY);
    w.f64(f64::MIN_POSITIVE);
    let data = w.flush();
    let mut r = Reader::new(&data);
    assert!(r.f32().unwrap().is_sign_negative());
    assert!(r.f32().unwrap().is_nan());
    assert_eq!(r.f64().unwrap(), f64::INFINITY);
    assert_eq!(r.f64().unwrap(), f64::MIN_POSITIVE);
}

#[test]
fn reads_past_end_fail_matrix() {
    let data = [0x01, 0x02, 0x03];
    let mut r = Reader::new(&data);
    assert!(matches!(r.i32(), Err(BufferError::EndOfBuffer)));
    assert_eq!(r.size(), 3);
    assert_eq!(r.u16().unwrap(), 0x0102);
    assert!(r.buf(2).is_err());
    assert_eq!(r.rest(), &[0x03]);
    assert!(r.u8().is_err());
    assert_eq!(r.peek(), None);
}

#[test]
fn sliced_reader_matrix() {
    let data = [0, 1, 2, 3, 4, 5];
    let mut r = Reader::from_slice(&data, 2, 4);
    assert_eq!(r.size(), 2);
    assert_eq!(r.u16().unwrap(), 0x0203);
    assert!(r.u8().is_err());
    let r = Reader::from_slice(&data, 9, 100);
    assert_eq!(r.size(), 0);
}

#[test]
fn utf_prefix_matrix() {
    let mut w = Writer::new();
    w.utf("caf\u{e9}").unwrap();
    let data = w.flush();
    assert_eq!(&data[..2], &[0, 5]);
    assert_eq!(Reader::new(&data).utf().unwrap(), "caf\u{e9}");

    let mut w = Writer::new();
    let long = "x".repeat(70_000);
    assert!(matches!(w.utf(&long), Err(BufferError::TextTooLong(70_000))));
    assert!(w.is_empty());
}

// ---------------------------------------------------------------------------
// Modified UTF-8
// ---------------------------------------------------------------------------

#[test]
fn mutf8_encoding_matrix() {
    let cases: [(&str, &[u8]); 5] = [
        ("A", &[0x41]),
        ("\u{0}", &[0xc0, 0x80]),
        ("\u{7ff}", &[0xdf, 0xbf]),
        ("\u{ffff}", &[0xef, 0xbf, 0xbf]),
        ("\u{10000}", &[0xed, 0xa0, 0x80, 0xed, 0xb0, 0x80]),
    ];
    for (text, bytes) in cases {
        assert_eq!(mutf8::encode(text), bytes, "{text:?}");
        assert_eq!(mutf8::encoded_len(text), bytes.len());
        assert_eq!(mutf8::decode(bytes).unwrap(), text);
    }
}

#[test]
fn mutf8_rejects_malformed_matrix() {
    let cases: [(&[u8], usize); 6] = [
        (&[0x80], 0),
        (&[0x41, 0xc3], 2),
        (&[0xe2, 0x82], 2),
        (&[0xf0, 0x9f, 0x98, 0x80], 0),
        (&[0x41, 0xed, 0xb0, 0x80], 1),
        (&[0xed, 0xa0, 0x80, 0x41], 0),
    ];
    for (bytes, at) in cases {
        match mutf8::decode(bytes) {
            Err(BufferError::InvalidUtf(got)) => assert_eq!(got, at, "{bytes:02x?}"),
            other => panic!("{bytes:02x?}: {other:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[test]
fn streaming_reader_matrix() {
    let mut s = StreamingReader::new();
    s.push(&[0, 0]);
    assert!(s.i32().is_err());
    s.push(&[0, 7, 9]);
    assert_eq!(s.i32().unwrap(), 7);
    assert_eq!(s.peek(), Some(9));
    let mark = s.x();
    assert_eq!(s.u8().unwrap(), 9);
    s.set_x(mark).unwrap();
    assert_eq!(s.buf(1).unwrap(), vec![9]);
    s.consume();
    assert_eq!(s.size(), 0);
    assert!(s.set_x(1).is_err());
    s.reset(&[1, 2]);
    assert_eq!(s.slice().u16().unwrap(), 0x0102);
}

#[test]
fn byte_source_matrix() {
    let data = [1u8, 2, 3, 4, 5];
    let mut slice: &[u8] = &data;
    let mut buf = [0u8; 3];
    assert_eq!(slice.available(), 5);
    assert_eq!(ByteSource::read(&mut slice, &mut buf).unwrap(), 3);
    assert_eq!(slice.available(), 2);

    let mut cursor = io::Cursor::new(data.to_vec());
    assert_eq!(ByteSource::read(&mut cursor, &mut buf).unwrap(), 3);
    assert_eq!(ByteSource::available(&cursor), 2);

    let mut stream = StreamingReader::new();
    stream.push(&data);
    assert_eq!(ByteSource::read(&mut stream, &mut buf).unwrap(), 3);
    assert_eq!(ByteSource::available(&stream), 2);

    let mut io_source = IoSource::new(&data[..]);
    assert_eq!(io_source.available(), 0);
    assert_eq!(io_source.read(&mut buf).unwrap(), 3);
}

/// Hands out one byte per call and is interrupted every other call.
struct Trickle {
    data: Vec<u8>,
    interrupt: bool,
}

impl io::Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.interrupt = !self.interrupt;
        if self.interrupt {
            return Err(io::ErrorKind::Interrupted.into());
        }
        if self.data.is_empty() || buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.data.remove(0);
        Ok(1)
    }
}

#[test]
fn peek_reader_matrix() {
    let trickle = Trickle {
        data: vec![0xac, 0xed, 0, 5, 0x70],
        interrupt: false,
    };
    let mut p = PeekReader::new(IoSource::new(trickle));
    assert_eq!(p.peek().unwrap(), Some(0xac));
    assert_eq!(p.position(), 0);
    let mut header = [0u8; 4];
    p.read_fully(&mut header).unwrap();
    assert_eq!(header, [0xac, 0xed, 0, 5]);
    assert_eq!(p.position(), 4);
    assert_eq!(p.skip(10).unwrap(), 1);
    assert_eq!(p.peek().unwrap(), None);
    assert!(matches!(p.read_u8(), Err(BufferError::EndOfBuffer)));

    let mut p = PeekReader::new(&[1u8, 2][..]);
    p.peek().unwrap();
    assert_eq!(p.available(), 2);
}

proptest! {
    #[test]
    fn mutf8_round_trips_any_text(text in any::<String>()) {
        let bytes = mutf8::encode(&text);
        prop_assert!(!bytes.contains(&0));
        prop_assert_eq!(bytes.len(), mutf8::encoded_len(&text));
        prop_assert_eq!(mutf8::decode(&bytes).unwrap(), text);
    }

    #[test]
    fn streaming_chunks_read_in_order(data in prop::collection::vec(any::<u8>(), 0..512), split in 1usize..32) {
        let mut s = StreamingReader::with_alloc_size(8);
        let mut out = Vec::new();
        for chunk in data.chunks(split) {
            s.push(chunk);
            let mut buf = [0u8; 7];
            loop {
                let n = ByteSource::read(&mut s, &mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
        }
        prop_assert_eq!(out, data);
    }
}
