//! Bit-granularity reader over a seekable byte source.
//!
//! The reader keeps a buffered window of the source plus an 8-byte "sled" of
//! trailing bytes that is always resident, so any single read of up to 32 bits
//! is served from one 64-bit load and never refills mid-read. Sub-messages are
//! bounded with a nestable chunk stack; ending a chunk seeks or discard-reads
//! to its target position.

use std::io::{Read, Seek, SeekFrom};

pub const SMALL_BUFFER: usize = 512;
pub const LARGE_BUFFER: usize = 1024 * 128;

const SLED: usize = 8;
const SLED_BITS: usize = SLED << 3;

const VALVE_MAX_STRING_LENGTH: usize = 4096;
const MIN_STRING_BUFFER_LENGTH: usize = 256;

pub const COORD_INTEGER_BITS: usize = 14;
pub const COORD_FRACTIONAL_BITS: usize = 5;
pub const COORD_RESOLUTION: f32 = 1.0 / (1 << COORD_FRACTIONAL_BITS) as f32;

const COORD_INTEGER_BITS_MP: usize = 11;
pub const COORD_FRACTIONAL_BITS_LOW_PRECISION: usize = 3;
pub const COORD_RESOLUTION_LOW_PRECISION: f32 =
    1.0 / (1 << COORD_FRACTIONAL_BITS_LOW_PRECISION) as f32;

pub const NORMAL_FRACTIONAL_BITS: usize = 11;
pub const NORMAL_RESOLUTION: f32 = 1.0 / ((1 << NORMAL_FRACTIONAL_BITS) - 1) as f32;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("unexpected end of source at bit {position}")]
    UnexpectedEndOfSource { position: usize },
    #[error("cursor at bit {position} already past chunk target bit {target}")]
    ChunkOverrun { target: usize, position: usize },
    #[error("varint does not terminate within {max_groups} groups")]
    VarIntOverflow { max_groups: usize },
    #[error("end_chunk called with no open chunk")]
    NoOpenChunk,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct BitReader<R>
where
    R: Read + Seek,
{
    underlying: R,
    buffer: Vec<u8>,
    cap: usize,
    /// Bit offset of the cursor within the current window.
    offset: usize,
    /// Consumable bits in the current window; everything past it up to the
    /// sled boundary is guard data for the next refill.
    bits_in_buffer: usize,
    /// Bits consumed in windows that have already been retired.
    lazy_position: usize,
    chunk_targets: Vec<usize>,
    end_reached: bool,
}

/// Reads until `buf` is full or the source is exhausted.
fn fill<R: Read>(src: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

impl<R> BitReader<R>
where
    R: Read + Seek,
{
    pub fn new_small(underlying: R) -> Result<Self> {
        Self::with_capacity(underlying, SMALL_BUFFER)
    }

    pub fn new_large(underlying: R) -> Result<Self> {
        Self::with_capacity(underlying, LARGE_BUFFER)
    }

    pub fn with_capacity(mut underlying: R, cap: usize) -> Result<Self> {
        debug_assert!(cap >= 2 * SLED && cap % SLED == 0);
        // SLED bytes of zero slack keep the 64-bit word loads in bounds near
        // the end of a short final window.
        let mut buffer = vec![0u8; cap + SLED];
        let filled = fill(&mut underlying, &mut buffer[..cap])?;
        let (bits_in_buffer, end_reached) = if filled < cap {
            (filled << 3, true)
        } else {
            ((filled << 3) - SLED_BITS, false)
        };
        Ok(Self {
            underlying,
            buffer,
            cap,
            offset: 0,
            bits_in_buffer,
            lazy_position: 0,
            chunk_targets: Vec::with_capacity(2),
            end_reached,
        })
    }

    /// Absolute bit position of the cursor from the start of the source.
    #[inline]
    pub fn actual_position(&self) -> usize {
        self.lazy_position + self.offset
    }

    #[inline]
    fn ensure(&self, bits: usize) -> Result<()> {
        if self.end_reached && self.offset + bits > self.bits_in_buffer {
            return Err(Error::UnexpectedEndOfSource {
                position: self.actual_position(),
            });
        }
        Ok(())
    }

    fn advance(&mut self, bits: usize) -> Result<()> {
        self.offset += bits;
        while self.offset > self.bits_in_buffer {
            self.refill_buffer()?;
        }
        Ok(())
    }

    fn refill_buffer(&mut self) -> Result<()> {
        if self.end_reached {
            return Err(Error::UnexpectedEndOfSource {
                position: self.lazy_position + self.bits_in_buffer,
            });
        }
        let sled_start = self.bits_in_buffer >> 3;
        self.buffer.copy_within(sled_start..sled_start + SLED, 0);
        self.offset -= self.bits_in_buffer;
        self.lazy_position += self.bits_in_buffer;

        let read = fill(&mut self.underlying, {
            let cap = self.cap;
            &mut self.buffer[SLED..cap]
        })?;
        self.bits_in_buffer = read << 3;
        if read < self.cap - SLED {
            // Source exhausted: the sled itself becomes consumable.
            self.bits_in_buffer += SLED_BITS;
            self.buffer[SLED + read..].fill(0);
            self.end_reached = true;
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        self.ensure(1)?;
        let res = (self.buffer[self.offset >> 3] & (1 << (self.offset & 7))) != 0;
        self.advance(1)?;
        Ok(res)
    }

    /// Reads `n <= 32` bits, LSB first. `n == 0` yields 0.
    pub fn read_int(&mut self, n: usize) -> Result<u32> {
        debug_assert!(n <= 32);
        if n == 0 {
            return Ok(0);
        }
        self.ensure(n)?;
        let base = (self.offset >> 3) & !3;
        let word = u64::from_le_bytes(
            self.buffer[base..base + 8]
                .try_into()
                .unwrap_or([0u8; SLED]),
        );
        let res = (word << (64 - (self.offset & 31) - n)) >> (64 - n);
        self.advance(n)?;
        Ok(res as u32)
    }

    /// Reads `n <= 32` bits as a two's-complement signed value.
    pub fn read_signed_int(&mut self, n: usize) -> Result<i32> {
        debug_assert!(n <= 32);
        if n == 0 {
            return Ok(0);
        }
        self.ensure(n)?;
        let base = (self.offset >> 3) & !3;
        let word = i64::from_le_bytes(
            self.buffer[base..base + 8]
                .try_into()
                .unwrap_or([0u8; SLED]),
        );
        let res = (word << (64 - (self.offset & 31) - n)) >> (64 - n);
        self.advance(n)?;
        Ok(res as i32)
    }

    pub fn read_single_byte(&mut self) -> Result<u8> {
        if self.offset & 7 == 0 {
            self.ensure(8)?;
            let res = self.buffer[self.offset >> 3];
            self.advance(8)?;
            return Ok(res);
        }
        Ok(self.read_int(8)? as u8)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut res = vec![0u8; n];
        self.read_bytes_into(&mut res)?;
        Ok(res)
    }

    /// Fills `out` from the stream. Byte-aligned runs inside the window are a
    /// single slice copy; misaligned runs go through 32-bit loads, not
    /// bit-by-bit.
    pub fn read_bytes_into(&mut self, out: &mut [u8]) -> Result<()> {
        let n = out.len();
        if self.offset & 7 == 0 && self.offset + (n << 3) <= self.bits_in_buffer {
            let start = self.offset >> 3;
            out.copy_from_slice(&self.buffer[start..start + n]);
            return self.advance(n << 3);
        }
        let mut chunks = out.chunks_exact_mut(4);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.read_int(32)?.to_le_bytes());
        }
        for slot in chunks.into_remainder() {
            *slot = self.read_single_byte()?;
        }
        Ok(())
    }

    /// Fixed-width byte field decoded up to the first NUL.
    pub fn read_cstring(&mut self, n: usize) -> Result<String> {
        let b = self.read_bytes(n)?;
        let end = b.iter().position(|v| *v == 0).unwrap_or(n);
        Ok(latin1(&b[..end]))
    }

    /// NUL-terminated net string in the engine's native 8-bit encoding.
    pub fn read_string(&mut self) -> Result<String> {
        let mut result = Vec::with_capacity(MIN_STRING_BUFFER_LENGTH);
        for _ in 0..VALVE_MAX_STRING_LENGTH {
            let b = self.read_single_byte()?;
            if b == 0 {
                break;
            }
            result.push(b);
        }
        Ok(latin1(&result))
    }

    /// Raw IEEE-754 bit pass-through.
    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_int(32)?))
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        let buffered = self.bits_in_buffer.saturating_sub(self.offset);
        if self.end_reached || n <= buffered + SLED_BITS {
            return self.advance(n);
        }
        // Long skip: reposition the source and rebuild the window at the
        // target byte.
        let target = self.actual_position() + n;
        let byte_pos = target >> 3;
        self.underlying.seek(SeekFrom::Start(byte_pos as u64))?;
        let filled = fill(&mut self.underlying, {
            let cap = self.cap;
            &mut self.buffer[..cap]
        })?;
        self.lazy_position = byte_pos << 3;
        self.offset = target & 7;
        if filled < self.cap {
            self.buffer[filled..].fill(0);
            self.bits_in_buffer = filled << 3;
            self.end_reached = true;
            if self.offset > self.bits_in_buffer {
                return Err(Error::UnexpectedEndOfSource { position: target });
            }
        } else {
            self.bits_in_buffer = (filled << 3) - SLED_BITS;
            self.end_reached = false;
        }
        Ok(())
    }

    pub fn begin_chunk(&mut self, bits: usize) {
        self.chunk_targets.push(self.actual_position() + bits);
    }

    pub fn end_chunk(&mut self) -> Result<()> {
        let target = self.chunk_targets.pop().ok_or(Error::NoOpenChunk)?;
        let position = self.actual_position();
        if position > target {
            return Err(Error::ChunkOverrun { target, position });
        }
        if position < target {
            self.skip(target - position)?;
        }
        Ok(())
    }

    pub fn chunk_finished(&self) -> bool {
        self.chunk_targets
            .last()
            .map_or(true, |&t| t <= self.actual_position())
    }

    /// Protobuf base-128 varint, at most 5 groups (32 bits). A set
    /// continuation bit on the 5th group is an overflow.
    pub fn read_varint32(&mut self) -> Result<u32> {
        let mut result = 0u32;
        for i in 0..5 {
            let b = self.read_single_byte()? as u32;
            result |= (b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(Error::VarIntOverflow { max_groups: 5 })
    }

    /// Zig-zag signed varint.
    pub fn read_signed_varint32(&mut self) -> Result<i32> {
        let res = self.read_varint32()?;
        Ok((res >> 1) as i32 ^ -((res & 1) as i32))
    }

    /// Tolerant varint fallback: accepts up to 10 groups so that 32-bit
    /// values encoded as sign-extended (or zero-padded) 64-bit varints still
    /// decode. Groups past the 5th must carry no new information.
    pub fn read_varint32_slow(&mut self) -> Result<u32> {
        let mut result = 0u32;
        for i in 0..10 {
            let b = self.read_single_byte()? as u32;
            if i < 4 {
                result |= (b & 0x7f) << (7 * i);
            } else if i == 4 {
                // Last group carrying payload: 4 value bits, the rest must be
                // a sign extension pattern or empty.
                if b & 0x70 != 0 && b & 0x70 != 0x70 {
                    return Err(Error::VarIntOverflow { max_groups: 5 });
                }
                result |= (b & 0x0f) << 28;
            } else if i == 9 {
                if b != 1 && b != 0 {
                    return Err(Error::VarIntOverflow { max_groups: 10 });
                }
            } else if b & 0x7f != 0 && b & 0x7f != 0x7f {
                return Err(Error::VarIntOverflow { max_groups: 10 });
            }
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(Error::VarIntOverflow { max_groups: 10 })
    }

    pub fn read_signed_varint32_slow(&mut self) -> Result<i32> {
        let res = self.read_varint32_slow()?;
        Ok((res >> 1) as i32 ^ -((res & 1) as i32))
    }

    /// Protobuf base-128 varint, at most 10 groups (64 bits).
    pub fn read_varint64(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for i in 0..10 {
            let b = self.read_single_byte()? as u64;
            result |= (b & 0x7f) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(Error::VarIntOverflow { max_groups: 10 })
    }

    pub fn read_signed_varint64(&mut self) -> Result<i64> {
        let res = self.read_varint64()?;
        Ok((res >> 1) as i64 ^ -((res & 1) as i64))
    }

    /// Varint length prefix followed by UTF-8 bytes.
    pub fn read_length_prefixed_string(&mut self) -> Result<String> {
        let len = self.read_varint32()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Variable-width unsigned int used for entity-id jumps: 4 value bits
    /// plus a 2-bit width selector.
    pub fn read_ubitint(&mut self) -> Result<u32> {
        let res = self.read_int(6)?;
        Ok(match res & (16 | 32) {
            16 => (res & 15) | (self.read_int(4)? << 4),
            32 => (res & 15) | (self.read_int(8)? << 4),
            48 => (res & 15) | (self.read_int(28)? << 4),
            _ => res,
        })
    }

    /// Delta-encoded flattened-property index; -1 terminates the run.
    pub fn read_field_index(&mut self, last_index: i32, new_way: bool) -> Result<i32> {
        if new_way && self.read_bit()? {
            return Ok(last_index + 1);
        }

        let mut ret;
        if new_way && self.read_bit()? {
            ret = self.read_int(3)?;
        } else {
            ret = self.read_int(7)?;
            match ret & (32 | 64) {
                32 => ret = (ret & !96) | (self.read_int(2)? << 5),
                64 => ret = (ret & !96) | (self.read_int(4)? << 5),
                96 => ret = (ret & !96) | (self.read_int(7)? << 5),
                _ => {}
            }
        }

        if ret == 0xfff {
            return Ok(-1);
        }

        Ok(last_index + 1 + ret as i32)
    }

    /// Integer + fractional + sign triad with 14/5-bit precision.
    pub fn read_bitcoord(&mut self) -> Result<f32> {
        let mut is_neg = false;
        let mut res = 0.0f32;

        let mut int_val = self.read_int(1)?;
        let mut fract_val = self.read_int(1)?;

        if int_val | fract_val != 0 {
            is_neg = self.read_bit()?;

            if int_val == 1 {
                int_val = self.read_int(COORD_INTEGER_BITS)? + 1;
            }
            if fract_val == 1 {
                fract_val = self.read_int(COORD_FRACTIONAL_BITS)?;
            }

            res = int_val as f32 + fract_val as f32 * COORD_RESOLUTION;
        }

        Ok(if is_neg { -res } else { res })
    }

    /// Multiplayer coord variant: an in-bounds flag selects an 11- or 14-bit
    /// integer part; optionally integral-only or low-precision fractional.
    pub fn read_bitcoordmp(&mut self, is_integral: bool, is_low_precision: bool) -> Result<f32> {
        let mut res = 0.0f32;
        let mut is_neg = false;

        let in_bounds = self.read_bit()?;

        if is_integral {
            if self.read_bit()? {
                is_neg = self.read_bit()?;
                res = match in_bounds {
                    true => (self.read_int(COORD_INTEGER_BITS_MP)? + 1) as f32,
                    false => (self.read_int(COORD_INTEGER_BITS)? + 1) as f32,
                };
            }
        } else {
            let has_int_val = self.read_bit()?;
            is_neg = self.read_bit()?;

            let mut int_val = 0u32;
            if has_int_val {
                int_val = match in_bounds {
                    true => self.read_int(COORD_INTEGER_BITS_MP)? + 1,
                    false => self.read_int(COORD_INTEGER_BITS)? + 1,
                };
            }

            res = int_val as f32
                + match is_low_precision {
                    true => {
                        self.read_int(COORD_FRACTIONAL_BITS_LOW_PRECISION)? as f32
                            * COORD_RESOLUTION_LOW_PRECISION
                    }
                    false => self.read_int(COORD_FRACTIONAL_BITS)? as f32 * COORD_RESOLUTION,
                };
        }

        Ok(if is_neg { -res } else { res })
    }

    /// Sign bit plus an 11-bit fraction over [-1, 1].
    pub fn read_bitnormal(&mut self) -> Result<f32> {
        let is_neg = self.read_bit()?;
        let fract_val = self.read_int(NORMAL_FRACTIONAL_BITS)?;
        let res = fract_val as f32 * NORMAL_RESOLUTION;
        Ok(if is_neg { -res } else { res })
    }

    /// Unsigned cell coordinate: integral, normal-, or low-precision
    /// fractional form.
    pub fn read_bitcellcoord(
        &mut self,
        bits: usize,
        is_integral: bool,
        is_low_precision: bool,
    ) -> Result<f32> {
        Ok(match is_integral {
            true => self.read_int(bits)? as f32,
            false => match is_low_precision {
                true => {
                    self.read_int(bits)? as f32
                        + self.read_int(COORD_FRACTIONAL_BITS_LOW_PRECISION)? as f32
                            * COORD_RESOLUTION_LOW_PRECISION
                }
                false => {
                    self.read_int(bits)? as f32
                        + self.read_int(COORD_FRACTIONAL_BITS)? as f32 * COORD_RESOLUTION
                }
            },
        })
    }
}
