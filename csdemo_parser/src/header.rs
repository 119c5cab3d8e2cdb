use std::io::{Read, Seek};

use csdemo_bitreader::BitReader;

use crate::error::{Error, Result};

const DEMO_FILESTAMP: &[u8; 8] = b"HL2DEMO\0";
const MAX_OS_PATH: usize = 260;

/// Fixed-layout header at the start of every demo file.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoHeader {
    pub demo_protocol: i32,
    pub network_protocol: i32,
    pub server_name: String,
    pub client_name: String,
    pub map_name: String,
    pub game_directory: String,
    pub playback_time: f32,
    pub playback_ticks: i32,
    pub playback_frames: i32,
    pub signon_length: i32,
}

impl DemoHeader {
    pub fn parse<R: Read + Seek>(reader: &mut BitReader<R>) -> Result<Self> {
        let stamp = reader.read_bytes(DEMO_FILESTAMP.len())?;
        if stamp != DEMO_FILESTAMP {
            return Err(Error::MalformedHeader {
                reason: format!("filestamp {:?} is not HL2DEMO", stamp),
            });
        }

        let header = Self {
            demo_protocol: reader.read_int(32)? as i32,
            network_protocol: reader.read_int(32)? as i32,
            server_name: reader.read_cstring(MAX_OS_PATH)?,
            client_name: reader.read_cstring(MAX_OS_PATH)?,
            map_name: reader.read_cstring(MAX_OS_PATH)?,
            game_directory: reader.read_cstring(MAX_OS_PATH)?,
            playback_time: reader.read_float()?,
            playback_ticks: reader.read_int(32)? as i32,
            playback_frames: reader.read_int(32)? as i32,
            signon_length: reader.read_int(32)? as i32,
        };

        if header.demo_protocol != 4 {
            log::warn!(
                "demo protocol {} (expected 4), continuing anyway",
                header.demo_protocol
            );
        }
        log::debug!(
            "header: map {:?} on {:?}, {} ticks / {} frames",
            header.map_name,
            header.server_name,
            header.playback_ticks,
            header.playback_frames
        );

        Ok(header)
    }

    /// Nominal tick rate derived from the header; the server-info message
    /// supersedes this when present.
    pub fn tick_rate(&self) -> Option<f32> {
        if self.playback_time > 0.0 {
            Some(self.playback_ticks as f32 / self.playback_time)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cstr(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.resize(MAX_OS_PATH, 0);
        v
    }

    fn valid_header_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"HL2DEMO\0");
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&13769i32.to_le_bytes());
        bytes.extend_from_slice(&cstr("local server"));
        bytes.extend_from_slice(&cstr("GOTV Demo"));
        bytes.extend_from_slice(&cstr("de_inferno"));
        bytes.extend_from_slice(&cstr("csgo"));
        bytes.extend_from_slice(&300.5f32.to_le_bytes());
        bytes.extend_from_slice(&38464i32.to_le_bytes());
        bytes.extend_from_slice(&19232i32.to_le_bytes());
        bytes.extend_from_slice(&441536i32.to_le_bytes());
        bytes
    }

    #[test]
    fn parses_valid_header() {
        let mut r = BitReader::new_small(Cursor::new(valid_header_bytes())).unwrap();
        let h = DemoHeader::parse(&mut r).unwrap();
        assert_eq!(h.demo_protocol, 4);
        assert_eq!(h.map_name, "de_inferno");
        assert_eq!(h.server_name, "local server");
        assert_eq!(h.playback_ticks, 38464);
        assert_eq!(h.signon_length, 441536);
        assert!((h.tick_rate().unwrap() - 128.0).abs() < 0.1);
    }

    #[test]
    fn rejects_bad_filestamp() {
        let mut bytes = valid_header_bytes();
        bytes[0] = b'X';
        let mut r = BitReader::new_small(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            DemoHeader::parse(&mut r),
            Err(Error::MalformedHeader { .. })
        ));
    }
}
