//! Player identity records from the `userinfo` string table.

/// Fixed-layout `player_info_t` blob. Multi-byte integers are big-endian in
/// the dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerInfo {
    pub version: u64,
    pub xuid: u64,
    pub name: String,
    pub user_id: i32,
    pub guid: String,
    pub friends_id: u32,
    pub friends_name: String,
    pub is_fake_player: bool,
    pub is_hltv: bool,
    /// Engine entity index occupied by this player: string-table entry
    /// index + 1.
    pub entity_index: i32,
}

const NAME_LEN: usize = 128;
const GUID_LEN: usize = 33;
const BLOB_MIN_LEN: usize = 8 + 8 + NAME_LEN + 4 + GUID_LEN + 4 + NAME_LEN + 2;

fn cstr(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    data[..end].iter().map(|&b| b as char).collect()
}

impl PlayerInfo {
    pub fn parse(data: &[u8], entity_index: i32) -> Option<Self> {
        if data.len() < BLOB_MIN_LEN {
            return None;
        }
        fn take<'a>(data: &'a [u8], off: &mut usize, n: usize) -> &'a [u8] {
            let slice = &data[*off..*off + n];
            *off += n;
            slice
        }
        let mut off = 0;
        Some(Self {
            version: u64::from_be_bytes(take(data, &mut off, 8).try_into().ok()?),
            xuid: u64::from_be_bytes(take(data, &mut off, 8).try_into().ok()?),
            name: cstr(take(data, &mut off, NAME_LEN)),
            user_id: i32::from_be_bytes(take(data, &mut off, 4).try_into().ok()?),
            guid: cstr(take(data, &mut off, GUID_LEN)),
            friends_id: u32::from_be_bytes(take(data, &mut off, 4).try_into().ok()?),
            friends_name: cstr(take(data, &mut off, NAME_LEN)),
            is_fake_player: take(data, &mut off, 1)[0] != 0,
            is_hltv: take(data, &mut off, 1)[0] != 0,
            entity_index,
        })
    }

    pub fn steam_id(&self) -> String {
        if self.is_fake_player {
            "BOT".to_owned()
        } else if self.is_hltv {
            "HLTV".to_owned()
        } else {
            self.guid.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(name: &str, user_id: i32, xuid: u64, fake: bool) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&1u64.to_be_bytes());
        data.extend_from_slice(&xuid.to_be_bytes());
        let mut n = name.as_bytes().to_vec();
        n.resize(NAME_LEN, 0);
        data.extend_from_slice(&n);
        data.extend_from_slice(&user_id.to_be_bytes());
        let mut guid = b"STEAM_1:0:12345".to_vec();
        guid.resize(GUID_LEN, 0);
        data.extend_from_slice(&guid);
        data.extend_from_slice(&7u32.to_be_bytes());
        data.extend_from_slice(&[0u8; NAME_LEN]);
        data.push(fake as u8);
        data.push(0);
        data
    }

    #[test]
    fn parses_userinfo_blob() {
        let info = PlayerInfo::parse(&blob("player one", 12, 76561198000000001, false), 3).unwrap();
        assert_eq!(info.name, "player one");
        assert_eq!(info.user_id, 12);
        assert_eq!(info.xuid, 76561198000000001);
        assert_eq!(info.entity_index, 3);
        assert!(!info.is_fake_player);
        assert_eq!(info.steam_id(), "STEAM_1:0:12345");
    }

    #[test]
    fn bot_steam_id() {
        let info = PlayerInfo::parse(&blob("Cliffe", 9, 0, true), 5).unwrap();
        assert_eq!(info.steam_id(), "BOT");
    }

    #[test]
    fn short_blob_is_none() {
        assert!(PlayerInfo::parse(&[0u8; 32], 1).is_none());
    }
}
