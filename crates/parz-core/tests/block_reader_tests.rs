use std::io::{self, Cursor, Read};

use parz_core::BlockReader;

/// Hands out at most `chunk` bytes per read call, like a pipe.
struct Trickle<R> {
    inner: R,
    chunk: usize,
}

impl<R: Read> Read for Trickle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = buf.len().min(self.chunk);
        self.inner.read(&mut buf[..limit])
    }
}

/// Fails the test if read again after returning end of input.
struct ReadOnceAfterEof {
    data: Cursor<Vec<u8>>,
    hit_eof: bool,
}

impl Read for ReadOnceAfterEof {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        assert!(!self.hit_eof, "source read again after end of input");
        let read = self.data.read(buf)?;
        if read == 0 {
            self.hit_eof = true;
        }
        Ok(read)
    }
}

#[test]
fn splits_into_fixed_blocks_with_short_tail() -> Result<(), Box<dyn std::error::Error>> {
    let data: Vec<u8> = (0..250u32).map(|value| value as u8).collect();
    let mut reader = BlockReader::new(Cursor::new(data.clone()), 100);

    let mut blocks = Vec::new();
    while let Some(block) = reader.next_block()? {
        blocks.push(block);
    }

    assert_eq!(blocks.len(), 3);
    assert_eq!(
        blocks.iter().map(|block| block.index).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert_eq!(
        blocks.iter().map(|block| block.len()).collect::<Vec<_>>(),
        vec![100, 100, 50]
    );
    let joined: Vec<u8> = blocks.iter().flat_map(|block| block.payload().to_vec()).collect();
    assert_eq!(joined, data);

    assert!(reader.eof_reached());
    assert_eq!(reader.next_index(), 3);
    assert_eq!(reader.bytes_read(), 250);
    Ok(())
}

#[test]
fn eof_is_sticky() -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BlockReader::new(Cursor::new(vec![1u8; 10]), 10);
    assert!(reader.next_block()?.is_some());
    assert!(!reader.eof_reached());

    assert!(reader.next_block()?.is_none());
    assert!(reader.eof_reached());
    assert!(reader.next_block()?.is_none());
    assert_eq!(reader.next_index(), 1);
    Ok(())
}

#[test]
fn empty_source_yields_no_blocks() -> Result<(), Box<dyn std::error::Error>> {
    let mut reader = BlockReader::new(io::empty(), 4096);
    assert!(reader.next_block()?.is_none());
    assert!(reader.eof_reached());
    assert_eq!(reader.next_index(), 0);
    Ok(())
}

#[test]
fn partial_reads_still_fill_whole_blocks() -> Result<(), Box<dyn std::error::Error>> {
    let source = Trickle {
        inner: Cursor::new(vec![7u8; 1000]),
        chunk: 13,
    };
    let mut reader = BlockReader::new(source, 256);

    let mut sizes = Vec::new();
    while let Some(block) = reader.next_block()? {
        sizes.push(block.len());
    }
    assert_eq!(sizes, vec![256, 256, 256, 232]);
    Ok(())
}

#[test]
fn short_tail_does_not_read_source_again() -> Result<(), Box<dyn std::error::Error>> {
    let source = ReadOnceAfterEof {
        data: Cursor::new(vec![3u8; 150]),
        hit_eof: false,
    };
    let mut reader = BlockReader::new(source, 100);

    assert_eq!(reader.next_block()?.map(|block| block.len()), Some(100));
    assert_eq!(reader.next_block()?.map(|block| block.len()), Some(50));
    assert!(reader.next_block()?.is_none());
    assert!(reader.eof_reached());
    Ok(())
}

#[test]
fn zero_block_size_is_clamped() {
    let reader = BlockReader::new(io::empty(), 0);
    assert_eq!(reader.block_size(), 1);
}
