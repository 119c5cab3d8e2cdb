//! Network string tables with the entry-history compression scheme.

use std::io::Cursor;

use csdemo_bitreader::BitReader;

use crate::error::{Error, Result};
use crate::netmessages::CsvcMsgCreateStringTable;

const HISTORY_WINDOW: usize = 31;
const USER_DATA_LENGTH_BITS: usize = 14;

#[derive(Debug, Clone, Default)]
pub struct StringTableEntry {
    pub name: String,
    pub user_data: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct StringTable {
    pub name: String,
    pub max_entries: i32,
    pub user_data_fixed_size: bool,
    pub user_data_size_bits: i32,
    pub entries: Vec<StringTableEntry>,
}

impl StringTable {
    pub fn create(msg: &CsvcMsgCreateStringTable) -> Result<(Self, Vec<usize>)> {
        let mut table = Self {
            name: msg.name().to_owned(),
            max_entries: msg.max_entries(),
            user_data_fixed_size: msg.user_data_fixed_size(),
            user_data_size_bits: msg.user_data_size_bits(),
            entries: Vec::new(),
        };
        let changed = table.apply_update(msg.string_data(), msg.num_entries())?;
        Ok((table, changed))
    }

    /// Applies one create/update payload; returns the indices that changed.
    pub fn apply_update(&mut self, data: &[u8], num_entries: i32) -> Result<Vec<usize>> {
        if data.is_empty() || num_entries <= 0 {
            return Ok(Vec::new());
        }
        let mut reader = BitReader::new_small(Cursor::new(data.to_vec()))?;
        let entry_bits = log2_floor(self.max_entries.max(1) as u32);

        if reader.read_bit()? {
            // Dictionary-compressed tables never occur in demo recordings.
            return Err(Error::StringTableDictionary(self.name.clone()));
        }

        let mut history: Vec<String> = Vec::with_capacity(HISTORY_WINDOW + 1);
        let mut changed = Vec::with_capacity(num_entries as usize);
        let mut last_entry: i32 = -1;

        for _ in 0..num_entries {
            let mut entry_index = last_entry + 1;
            if !reader.read_bit()? {
                entry_index = reader.read_int(entry_bits)? as i32;
            }
            last_entry = entry_index;

            let index = entry_index as usize;
            if self.entries.len() <= index {
                self.entries.resize_with(index + 1, Default::default);
            }

            if reader.read_bit()? {
                let name = if reader.read_bit()? {
                    // Shared prefix copied out of the sliding history.
                    let history_index = reader.read_int(5)? as usize;
                    let prefix_len = reader.read_int(5)? as usize;
                    let prefix = history
                        .get(history_index)
                        .map(|h| {
                            let take = prefix_len.min(h.len());
                            h[..take].to_owned()
                        })
                        .unwrap_or_default();
                    prefix + &reader.read_string()?
                } else {
                    reader.read_string()?
                };
                self.entries[index].name = name;
            }

            if reader.read_bit()? {
                let user_data = if self.user_data_fixed_size {
                    read_bits_to_bytes(&mut reader, self.user_data_size_bits as usize)?
                } else {
                    let len = reader.read_int(USER_DATA_LENGTH_BITS)? as usize;
                    reader.read_bytes(len)?
                };
                self.entries[index].user_data = Some(user_data);
            }

            if history.len() > HISTORY_WINDOW {
                history.remove(0);
            }
            history.push(self.entries[index].name.clone());
            changed.push(index);
        }
        Ok(changed)
    }
}

fn log2_floor(v: u32) -> usize {
    31 - v.leading_zeros() as usize
}

fn read_bits_to_bytes<R: std::io::Read + std::io::Seek>(
    reader: &mut BitReader<R>,
    bits: usize,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity((bits + 7) / 8);
    let mut remaining = bits;
    while remaining >= 8 {
        out.push(reader.read_single_byte()?);
        remaining -= 8;
    }
    if remaining > 0 {
        out.push(reader.read_int(remaining)? as u8);
    }
    Ok(out)
}
