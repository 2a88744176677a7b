// Frame reader and writer driven by in-memory sockets that block between
// every few bytes, the way a non-blocking TCP stream does under load.

use dmxp_transport::Core::alloc::{PoolLayout, SlabPool};
use dmxp_transport::Queue::SlabQueue;
use dmxp_transport::Transport::conn::{
    Connection, Dest, FrameReader, FrameWriter, Outbound, ReadError, ReadPhase, ReadStep, Slot, WriteStep,
};
use dmxp_transport::Transport::frame::write_local_frame;
use dmxp_transport::Transport::{
    FrameError, FrameFlag, FrameHeader, SystemType, HEADER_LEN, MAGIC,
};
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Hands out `chunk` bytes per read, with a WouldBlock after each chunk.
struct Trickle {
    data: Vec<u8>,
    pos: usize,
    chunk: usize,
    blocked: bool,
    eof: bool,
}

impl Trickle {
    fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data,
            pos: 0,
            chunk,
            blocked: false,
            eof: false,
        }
    }

    fn closing(mut self) -> Self {
        self.eof = true;
        self
    }

    fn done(&self) -> bool {
        self.pos == self.data.len()
    }
}

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done() {
            return if self.eof {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        if self.blocked {
            self.blocked = false;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.blocked = true;
        let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Accepts at most `chunk` bytes per write, blocking every other call.
struct Choke {
    out: Vec<u8>,
    chunk: usize,
    blocked: bool,
}

impl Write for Choke {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.blocked {
            self.blocked = false;
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.blocked = true;
        let n = self.chunk.min(buf.len());
        self.out.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn wire_frame(header: &FrameHeader, body: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN + body.len()];
    header.encode_wire(&mut buf).unwrap();
    buf[HEADER_LEN..].copy_from_slice(body);
    buf
}

fn slot_from(queue: &Arc<SlabQueue>) -> Option<Slot> {
    queue.alloc().ok().map(|block| Slot {
        queue_idx: 0,
        queue: queue.clone(),
        block,
    })
}

#[test]
fn test_reader_byte_at_a_time() {
    let queue = Arc::new(SlabQueue::in_process(4, 256).unwrap());
    let body = b"hello, reactor";
    let header = FrameHeader::application(5, body.len() as u32);
    let mut src = Trickle::new(wire_frame(&header, body), 1);
    let mut reader = FrameReader::new(256 - HEADER_LEN);

    let mut wakeups = 0;
    let frame = loop {
        match reader.advance(&mut src, || slot_from(&queue)) {
            ReadStep::Again => wakeups += 1,
            ReadStep::Complete(frame) => break frame,
            ReadStep::Closed => panic!("unexpected close"),
            ReadStep::Failed(e) => panic!("unexpected failure: {}", e),
        }
        assert!(wakeups < 1000);
    };

    assert!(wakeups >= HEADER_LEN);
    assert_eq!(frame.header, header);
    assert_eq!(reader.body(&frame), body);
    assert_eq!(reader.phase(), ReadPhase::Init);

    // Bytes landed in the queue block with the header in host order
    let Dest::Slot(slot) = frame.dest else {
        panic!("frame should be in a queue block");
    };
    let bytes = queue.bytes(&slot.block);
    assert_eq!(FrameHeader::decode_local(bytes).unwrap(), header);
    assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + body.len()], body);
    slot.release();
    assert_eq!(queue.pool().used_blocks(), 0);
}

#[test]
fn test_reader_several_frames_one_read() {
    let queue = Arc::new(SlabQueue::in_process(4, 128).unwrap());
    let mut data = Vec::new();
    let frames: [(u32, &[u8]); 3] = [(1, &b"one"[..]), (2, &b""[..]), (3, &b"three"[..])];
    for (ty, body) in frames {
        data.extend(wire_frame(&FrameHeader::application(ty, body.len() as u32), body));
    }
    let mut src = Trickle::new(data, 4096);
    let mut reader = FrameReader::new(128 - HEADER_LEN);

    let mut seen = Vec::new();
    for _ in 0..10 {
        match reader.advance(&mut src, || slot_from(&queue)) {
            ReadStep::Complete(frame) => {
                seen.push((frame.header.msg_type, reader.body(&frame).to_vec()));
                if let Dest::Slot(slot) = frame.dest {
                    slot.release();
                }
            }
            ReadStep::Again if src.done() => break,
            ReadStep::Again => {}
            _ => panic!("unexpected step"),
        }
    }

    assert_eq!(
        seen,
        vec![(1, b"one".to_vec()), (2, Vec::new()), (3, b"three".to_vec())]
    );
    // An idle reader keeps no queue block
    assert_eq!(queue.pool().used_blocks(), 0);
}

#[test]
fn test_reader_scratch_when_no_block() {
    let body = [7u8; 40];
    let header = FrameHeader::application(9, body.len() as u32);
    let mut src = Trickle::new(wire_frame(&header, &body), 8);
    let mut reader = FrameReader::new(64);

    let frame = loop {
        match reader.advance(&mut src, || None) {
            ReadStep::Again => continue,
            ReadStep::Complete(frame) => break frame,
            _ => panic!("unexpected step"),
        }
    };
    assert!(frame.dest.is_scratch());
    assert_eq!(reader.body(&frame), &body[..]);
}

#[test]
fn test_reader_partial_header_keeps_block() {
    let queue = Arc::new(SlabQueue::in_process(2, 64).unwrap());
    let header = FrameHeader::application(1, 4);
    let wire = wire_frame(&header, b"data");
    let mut reader = FrameReader::new(48);

    let mut first = Trickle::new(wire[..6].to_vec(), 6);
    assert!(matches!(
        reader.advance(&mut first, || slot_from(&queue)),
        ReadStep::Again
    ));
    assert!(matches!(
        reader.advance(&mut first, || slot_from(&queue)),
        ReadStep::Again
    ));
    assert_eq!(reader.phase(), ReadPhase::ReadHeader);
    assert_eq!(reader.received(), 6);
    assert_eq!(queue.pool().used_blocks(), 1);

    let mut rest = Trickle::new(wire[6..].to_vec(), 64);
    let frame = loop {
        match reader.advance(&mut rest, || panic!("block already held")) {
            ReadStep::Again => continue,
            ReadStep::Complete(frame) => break frame,
            _ => panic!("unexpected step"),
        }
    };
    assert_eq!(reader.body(&frame), b"data");
}

#[test]
fn test_reader_peer_close_releases_block() {
    let queue = Arc::new(SlabQueue::in_process(2, 64).unwrap());
    let header = FrameHeader::application(1, 20);
    let wire = wire_frame(&header, &[1u8; 20]);
    // Connection drops mid-body
    let mut src = Trickle::new(wire[..HEADER_LEN + 5].to_vec(), 64).closing();
    let mut reader = FrameReader::new(48);

    let step = loop {
        match reader.advance(&mut src, || slot_from(&queue)) {
            ReadStep::Again => continue,
            other => break other,
        }
    };
    assert!(matches!(step, ReadStep::Closed));
    assert_eq!(reader.phase(), ReadPhase::Init);
    assert_eq!(queue.pool().used_blocks(), 0);
}

#[test]
fn test_reader_rejects_bad_header() {
    let queue = Arc::new(SlabQueue::in_process(2, 64).unwrap());
    let mut reader = FrameReader::new(48);

    let mut bad = FrameHeader::application(1, 0);
    bad.checksum = 0xDEAD_BEEF;
    let mut src = Trickle::new(wire_frame(&bad, &[]), 64);
    let step = loop {
        match reader.advance(&mut src, || slot_from(&queue)) {
            ReadStep::Again => continue,
            other => break other,
        }
    };
    assert!(matches!(
        step,
        ReadStep::Failed(ReadError::Frame(FrameError::BadChecksum { found: 0xDEAD_BEEF }))
    ));
    assert_eq!(queue.pool().used_blocks(), 0);

    // Body larger than the reader accepts
    let big = FrameHeader::application(1, 49);
    let mut src = Trickle::new(wire_frame(&big, &[0u8; 49]), 64);
    let step = loop {
        match reader.advance(&mut src, || None) {
            ReadStep::Again => continue,
            other => break other,
        }
    };
    assert!(matches!(
        step,
        ReadStep::Failed(ReadError::Frame(FrameError::BodyTooLarge { len: 49, max: 48 }))
    ));
}

// Room for several slot classes: headers alone and headers with bodies
// land in different classes
fn writer_pool() -> SlabPool {
    SlabPool::heap(PoolLayout::for_pages(4)).unwrap()
}

fn outbound(pool: &SlabPool, header: FrameHeader, body: &[u8]) -> Outbound {
    let mut block = pool.alloc(header.frame_len()).unwrap();
    write_local_frame(pool.bytes_mut(&mut block), &header, body).unwrap();
    Outbound::new(pool.clone(), block)
}

#[test]
fn test_writer_partial_writes() {
    let pool = writer_pool();
    let mut writer = FrameWriter::new();
    let app = FrameHeader::application(4, 10);
    let ping = FrameHeader::system(SystemType::KeepaliveRequest, 0);
    writer.enqueue(outbound(&pool, ping, &[]));
    writer.enqueue(outbound(&pool, app, b"0123456789"));
    assert_eq!(writer.len(), 2);

    let mut dst = Choke {
        out: Vec::new(),
        chunk: 3,
        blocked: false,
    };
    let (mut frames, mut app_frames) = (0, 0);
    for _ in 0..100 {
        let flushed = writer.flush(&mut dst, || None);
        frames += flushed.frames;
        app_frames += flushed.app_frames;
        match flushed.step {
            WriteStep::Drained => break,
            WriteStep::Again => assert!(flushed.progressed || writer.inflight_offset().is_some()),
            WriteStep::Failed(e) => panic!("write failed: {}", e),
        }
    }

    assert!(writer.is_empty());
    assert_eq!((frames, app_frames), (2, 1));
    let mut expected = wire_frame(&ping, &[]);
    expected.extend(wire_frame(&app, b"0123456789"));
    assert_eq!(dst.out, expected);
    assert_eq!(pool.used_blocks(), 0);
}

#[test]
fn test_writer_refill_after_local_frames() {
    let pool = writer_pool();
    let mut writer = FrameWriter::new();
    writer.enqueue(outbound(&pool, FrameHeader::system(SystemType::KeepaliveReply, 0), &[]));

    let mut extra = vec![outbound(&pool, FrameHeader::application(2, 1), b"x")];
    let mut dst = Choke {
        out: Vec::new(),
        chunk: 1 << 20,
        blocked: false,
    };
    let mut order = Vec::new();
    loop {
        let flushed = writer.flush(&mut dst, || extra.pop());
        if let WriteStep::Drained = flushed.step {
            break;
        }
    }
    let mut at = 0;
    while at < dst.out.len() {
        let header = FrameHeader::decode_wire(&dst.out[at..]).unwrap();
        order.push(header.flag);
        at += header.frame_len();
    }
    // Locally queued frames go before refilled ones
    assert_eq!(order.len(), 2);
    assert_eq!(order[0], FrameFlag::System);
    assert_eq!(&dst.out[dst.out.len() - 1..], b"x");
    assert_eq!(u32::from_be_bytes(dst.out[12..16].try_into().unwrap()), MAGIC);
    assert!(writer.is_empty());
    assert_eq!(pool.used_blocks(), 0);
}

#[test]
fn test_writer_clear_releases() {
    let pool = writer_pool();
    let mut writer = FrameWriter::new();
    for _ in 0..3 {
        writer.enqueue(outbound(&pool, FrameHeader::application(1, 4), b"abcd"));
    }
    let mut dst = Choke {
        out: Vec::new(),
        chunk: 5,
        blocked: false,
    };
    let flushed = writer.flush(&mut dst, || None);
    assert!(matches!(flushed.step, WriteStep::Again));
    assert_eq!(writer.inflight_offset(), Some(5));

    assert_eq!(writer.clear(), 3);
    assert!(writer.is_empty());
    assert_eq!(pool.used_blocks(), 0);
}

#[test]
fn test_connection_stale_only_when_silent_both_ways() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    client.set_nonblocking(true).unwrap();
    let poll = mio::Poll::new().unwrap();
    let mut conn = Connection::register(
        poll.registry(),
        mio::net::TcpStream::from_std(client),
        mio::Token(1),
        "test".to_string(),
        64,
    )
    .unwrap();

    let idle = Duration::from_secs(1);
    let base = Instant::now();
    conn.last_read = base;
    conn.last_write = base;
    assert!(!conn.is_stale(base + idle, idle));
    assert!(conn.is_stale(base + idle * 2, idle));

    // Writes alone keep a connection whose peer went quiet
    conn.last_write = base + idle * 2;
    assert!(!conn.is_stale(base + idle * 2, idle));
    // And reads alone keep it too
    conn.last_write = base;
    conn.last_read = base + idle * 2;
    assert!(!conn.is_stale(base + idle * 2, idle));

    assert_eq!(conn.close(poll.registry()), 0);
}
