use std::{
    io::Write,
    time::{SystemTime, UNIX_EPOCH},
};

use snafu::ResultExt;
use timber_resources::Entry;

use crate::{
    encoder::{
        ChunkEncoder, ChunkError, Compression, EncoderConfig, EntryOutOfOrderSnafu, IoSnafu,
        Result,
    },
    varint,
};

pub(crate) const CHUNK_MAGIC: u32 = 0x544d_4243;
pub(crate) const CHUNK_FORMAT_V1: u8 = 1;

/// Block-framed chunk codec.
///
/// Entries are framed as `varint(timestamp delta ms) varint(line len) line`
/// into an uncompressed head block. When the head reaches the configured
/// block size it is sealed, optionally LZ4-compressed, and appended to the
/// list of finished blocks. The encoded payload is the sequence of finished
/// blocks behind a fixed header, terminated by a CRC32 of everything
/// preceding it.
pub struct BlockChunk {
    compression: Compression,
    block_size: usize,
    target_chunk_size: usize,
    head: Vec<u8>,
    head_entries: usize,
    blocks: Vec<Block>,
    entries: usize,
    uncompressed: usize,
    first: Option<SystemTime>,
    last: Option<SystemTime>,
    last_ms: u64,
    closed: bool,
}

struct Block {
    data: Vec<u8>,
    uncompressed_len: usize,
    entries: usize,
}

impl BlockChunk {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            compression: config.compression,
            block_size: config.block_size,
            target_chunk_size: config.target_chunk_size,
            head: Vec::with_capacity(config.block_size.min(16 * 1024)),
            head_entries: 0,
            blocks: Vec::new(),
            entries: 0,
            uncompressed: 0,
            first: None,
            last: None,
            last_ms: 0,
            closed: false,
        }
    }

    fn cut_head(&mut self) {
        if self.head.is_empty() {
            return;
        }

        let uncompressed_len = self.head.len();
        let data = match self.compression {
            Compression::None => std::mem::take(&mut self.head),
            Compression::Lz4 => {
                let compressed = lz4_flex::compress_prepend_size(&self.head);
                self.head.clear();
                compressed
            }
        };

        self.blocks.push(Block {
            data,
            uncompressed_len,
            entries: self.head_entries,
        });
        self.head_entries = 0;
    }
}

impl ChunkEncoder for BlockChunk {
    fn append(&mut self, entry: &Entry) -> Result<()> {
        if self.closed {
            return Err(ChunkError::Closed);
        }

        let entry_ms = millis_since_epoch(entry.timestamp);
        if entry_ms < self.last_ms {
            return EntryOutOfOrderSnafu {
                entry_ms,
                last_ms: self.last_ms,
            }
            .fail();
        }

        let frame_start = self.head.len();
        varint::put_u64(&mut self.head, entry_ms - self.last_ms);
        varint::put_u64(&mut self.head, entry.line.len() as u64);
        self.head.extend_from_slice(entry.line.as_bytes());

        self.uncompressed += self.head.len() - frame_start;
        self.head_entries += 1;
        self.entries += 1;
        self.last_ms = entry_ms;
        self.first.get_or_insert(entry.timestamp);
        self.last = Some(entry.timestamp);

        if self.head.len() >= self.block_size {
            self.cut_head();
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }

        self.cut_head();
        self.closed = true;
        Ok(())
    }

    fn bounds(&self) -> Option<(SystemTime, SystemTime)> {
        Some((self.first?, self.last?))
    }

    fn entries(&self) -> usize {
        self.entries
    }

    fn uncompressed_size(&self) -> usize {
        self.uncompressed
    }

    fn bytes_size(&self) -> usize {
        let blocks: usize = self.blocks.iter().map(|b| b.data.len()).sum();
        blocks + self.head.len()
    }

    fn utilization(&self) -> f64 {
        self.uncompressed as f64 / self.target_chunk_size as f64
    }

    fn encode_to(&self, sink: &mut dyn Write) -> Result<()> {
        let mut writer = ChecksummedWriter::new(sink);

        writer.put(&CHUNK_MAGIC.to_be_bytes())?;
        writer.put(&[CHUNK_FORMAT_V1, self.compression as u8])?;
        writer.put(&(self.entries as u32).to_be_bytes())?;
        writer.put(&(self.uncompressed as u64).to_be_bytes())?;
        writer.put(&(self.blocks.len() as u32).to_be_bytes())?;

        for block in &self.blocks {
            writer.put(&(block.entries as u32).to_be_bytes())?;
            writer.put(&(block.uncompressed_len as u32).to_be_bytes())?;
            writer.put(&(block.data.len() as u32).to_be_bytes())?;
            writer.put(&block.data)?;
        }

        // Head entries are only included once cut; callers close before
        // encoding.
        let checksum = writer.finish();
        sink.write_all(&checksum.to_be_bytes()).context(IoSnafu)?;

        Ok(())
    }
}

struct ChecksummedWriter<'a> {
    sink: &'a mut dyn Write,
    hasher: crc32fast::Hasher,
}

impl<'a> ChecksummedWriter<'a> {
    fn new(sink: &'a mut dyn Write) -> Self {
        Self {
            sink,
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn put(&mut self, buf: &[u8]) -> Result<()> {
        self.sink.write_all(buf).context(IoSnafu)?;
        self.hasher.update(buf);
        Ok(())
    }

    fn finish(self) -> u32 {
        self.hasher.finalize()
    }
}

fn millis_since_epoch(ts: SystemTime) -> u64 {
    ts.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
