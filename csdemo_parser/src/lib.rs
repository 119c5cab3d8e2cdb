//! Decoder for CS:GO demo recordings.
//!
//! [`DemoParser`] drives the whole pipeline: it reads the container header,
//! walks the top-level command stream, resolves the sendtable schema,
//! applies entity deltas, and pushes typed domain events into the caller's
//! [`EventSink`]. Every parse owns all of its state; parsing many demos in
//! parallel just means constructing many parsers.

pub mod commands;
pub mod dispatcher;
pub mod entity;
pub mod error;
pub mod gameevent;
pub mod header;
pub mod netmessages;
pub mod player;
pub mod propdecoder;
pub mod sendtable;
pub mod serverclass;
pub mod stringtable;

use std::io::{Read, Seek};

use ahash::AHashMap;
use csdemo_bitreader::BitReader;
use csdemo_events::{EventSink, PlayerRef, Team, Vector};
use prost::Message;

use crate::commands::{net_msg, DemoCommand};
use crate::dispatcher::GameEventDispatcher;
use crate::entity::Entity;
use crate::gameevent::EventRegistry;
use crate::netmessages::{
    CnetMsgSetConVar, CsvcMsgCreateStringTable, CsvcMsgGameEvent, CsvcMsgGameEventList,
    CsvcMsgPacketEntities, CsvcMsgServerInfo, CsvcMsgUpdateStringTable,
};
use crate::player::PlayerInfo;
use crate::propdecoder::PropValue;
use crate::serverclass::Schema;
use crate::stringtable::StringTable;

pub use crate::error::{Error, Result};
pub use crate::header::DemoHeader;

/// democmdinfo_t plus the two sequence numbers preceding a packet payload.
const COMMAND_INFO_BITS: usize = (152 + 4 + 4) << 3;

const DEFAULT_TICK_RATE: f32 = 128.0;

const USER_INFO_TABLE: &str = "userinfo";
const INSTANCE_BASELINE_TABLE: &str = "instancebaseline";
const CHICKEN_CLASS: &str = "CChicken";

#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub map_name: String,
    pub game_dir: String,
    pub tick_interval: f32,
    pub max_clients: i32,
}

/// Everything one parse pass accumulates; readable during the parse through
/// the dispatcher and returned whole when it finishes.
#[derive(Debug, Default)]
pub struct SessionState {
    pub tick: i32,
    pub schema: Option<Schema>,
    pub entities: AHashMap<i32, Entity>,
    /// Roster keyed by userid, fed from the `userinfo` string table.
    pub players: AHashMap<i32, PlayerInfo>,
    pub string_tables: Vec<StringTable>,
    /// Raw instance baselines keyed by class id.
    pub baselines: AHashMap<u16, Vec<u8>>,
    pub convars: AHashMap<String, String>,
    pub server_info: Option<ServerInfo>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_rate(&self) -> f32 {
        match &self.server_info {
            Some(info) if info.tick_interval > 0.0 => 1.0 / info.tick_interval,
            _ => DEFAULT_TICK_RATE,
        }
    }

    /// Identity snapshot for a player, with team and position pulled from
    /// the live entity when available.
    pub fn player_ref(&self, user_id: i32) -> Option<PlayerRef> {
        let info = self.players.get(&user_id)?;
        let mut player = PlayerRef {
            user_id,
            name: info.name.clone(),
            steam_id: info.steam_id(),
            team: Team::Unassigned,
            position: Vector::default(),
            is_bot: info.is_fake_player,
        };
        if let (Some(schema), Some(entity)) =
            (&self.schema, self.entities.get(&info.entity_index))
        {
            if let Some(class) = schema.class_by_id(entity.class_id) {
                if let Some(team) = entity.prop(class, "m_iTeamNum").and_then(PropValue::as_int) {
                    player.team = Team::from(team);
                }
                if let Some(xy) = entity
                    .prop(class, "m_vecOrigin")
                    .and_then(PropValue::as_vector)
                {
                    player.position.x = xy.x;
                    player.position.y = xy.y;
                }
                if let Some(z) = entity
                    .prop(class, "m_vecOrigin[2]")
                    .and_then(PropValue::as_float)
                {
                    player.position.z = z;
                }
            }
        }
        Some(player)
    }

    /// Like [`player_ref`](Self::player_ref), but degrades to a placeholder
    /// instead of dropping the event when the roster lags.
    pub fn player_ref_or_unknown(&self, user_id: i32) -> PlayerRef {
        self.player_ref(user_id).unwrap_or(PlayerRef {
            user_id,
            name: String::from("unknown"),
            steam_id: String::new(),
            team: Team::Unassigned,
            position: Vector::default(),
            is_bot: false,
        })
    }

    pub fn chicken_count(&self) -> usize {
        let Some(schema) = &self.schema else {
            return 0;
        };
        let Some(class) = schema.class_by_name(CHICKEN_CLASS) else {
            return 0;
        };
        self.entities
            .values()
            .filter(|e| e.class_id == class.id)
            .count()
    }
}

/// Parse results: the final session snapshot plus the caller's sink.
#[derive(Debug)]
pub struct ParseOutcome<S> {
    pub state: SessionState,
    pub sink: S,
}

pub struct DemoParser<R, S>
where
    R: Read + Seek,
    S: EventSink,
{
    reader: BitReader<R>,
    header: DemoHeader,
    state: SessionState,
    dispatcher: GameEventDispatcher,
    sink: S,
}

impl<R, S> DemoParser<R, S>
where
    R: Read + Seek,
    S: EventSink,
{
    /// Opens a demo source, parsing the header eagerly so obviously broken
    /// files fail before the caller commits to a full pass.
    pub fn new(source: R, sink: S) -> Result<Self> {
        let mut reader = BitReader::new_large(source)?;
        let header = DemoHeader::parse(&mut reader)?;
        Ok(Self {
            reader,
            header,
            state: SessionState::new(),
            dispatcher: GameEventDispatcher::new(),
            sink,
        })
    }

    pub fn header(&self) -> &DemoHeader {
        &self.header
    }

    /// Runs the command loop until the stop command or an error.
    pub fn parse_to_end(mut self) -> Result<ParseOutcome<S>> {
        loop {
            let command = DemoCommand::from(self.reader.read_single_byte()?);
            let tick = self.reader.read_int(32)? as i32;
            let _player_slot = self.reader.read_single_byte()?;
            self.state.tick = tick;

            match command {
                DemoCommand::Signon | DemoCommand::Packet => self.handle_packet()?,
                DemoCommand::SyncTick => {}
                DemoCommand::ConsoleCmd | DemoCommand::StringTables => {
                    // String-table dumps duplicate state already maintained
                    // from the create/update net messages.
                    self.skip_sized_block()?;
                }
                DemoCommand::UserCmd | DemoCommand::CustomData => {
                    self.reader.skip(32)?;
                    self.skip_sized_block()?;
                }
                DemoCommand::DataTables => {
                    let size = self.reader.read_int(32)? as usize;
                    self.reader.begin_chunk(size << 3);
                    self.state.schema = Some(Schema::parse(&mut self.reader)?);
                    self.reader.end_chunk()?;
                }
                DemoCommand::Stop => break,
                DemoCommand::Unknown(raw) => {
                    return Err(Error::UnknownCommand { command: raw, tick });
                }
            }
        }
        log::info!(
            "parse finished at tick {}: {} entities, {} players",
            self.state.tick,
            self.state.entities.len(),
            self.state.players.len()
        );
        Ok(ParseOutcome {
            state: self.state,
            sink: self.sink,
        })
    }

    fn skip_sized_block(&mut self) -> Result<()> {
        let size = self.reader.read_int(32)? as usize;
        self.reader.skip(size << 3)?;
        Ok(())
    }

    fn handle_packet(&mut self) -> Result<()> {
        self.reader.skip(COMMAND_INFO_BITS)?;
        let size = self.reader.read_int(32)? as usize;
        self.reader.begin_chunk(size << 3);
        while !self.reader.chunk_finished() {
            let msg_type = self.reader.read_varint32()?;
            let msg_size = self.reader.read_varint32()? as usize;
            let buf = self.reader.read_bytes(msg_size)?;
            self.handle_net_message(msg_type, &buf)?;
        }
        self.reader.end_chunk()?;
        self.dispatcher
            .reconcile_chickens(&self.state, &mut self.sink);
        Ok(())
    }

    fn handle_net_message(&mut self, msg_type: u32, buf: &[u8]) -> Result<()> {
        match msg_type {
            net_msg::NET_SET_CON_VAR => {
                let msg = CnetMsgSetConVar::decode(buf)?;
                for cvar in msg.convars.unwrap_or_default().cvars {
                    self.state
                        .convars
                        .insert(cvar.name().to_owned(), cvar.value().to_owned());
                }
            }
            net_msg::SVC_SERVER_INFO => {
                let msg = CsvcMsgServerInfo::decode(buf)?;
                log::info!(
                    "server info: map {:?}, tick interval {}",
                    msg.map_name(),
                    msg.tick_interval()
                );
                self.state.server_info = Some(ServerInfo {
                    map_name: msg.map_name().to_owned(),
                    game_dir: msg.game_dir().to_owned(),
                    tick_interval: msg.tick_interval(),
                    max_clients: msg.max_clients(),
                });
            }
            net_msg::SVC_CREATE_STRING_TABLE => {
                let msg = CsvcMsgCreateStringTable::decode(buf)?;
                let (table, changed) = StringTable::create(&msg)?;
                self.state.string_tables.push(table);
                self.consume_table_entries(self.state.string_tables.len() - 1, &changed)?;
            }
            net_msg::SVC_UPDATE_STRING_TABLE => {
                let msg = CsvcMsgUpdateStringTable::decode(buf)?;
                let index = msg.table_id() as usize;
                let table = self
                    .state
                    .string_tables
                    .get_mut(index)
                    .ok_or(Error::UnknownStringTable(msg.table_id()))?;
                let changed =
                    table.apply_update(msg.string_data(), msg.num_changed_entries())?;
                self.consume_table_entries(index, &changed)?;
            }
            net_msg::SVC_GAME_EVENT => {
                let msg = CsvcMsgGameEvent::decode(buf)?;
                self.dispatcher.apply(&msg, &self.state, &mut self.sink)?;
            }
            net_msg::SVC_PACKET_ENTITIES => {
                let msg = CsvcMsgPacketEntities::decode(buf)?;
                match self.state.schema.as_ref() {
                    Some(schema) => entity::process_packet_entities(
                        &msg,
                        schema,
                        &self.state.baselines,
                        &mut self.state.entities,
                    )?,
                    None => log::warn!("packet entities before data tables, skipping"),
                }
            }
            net_msg::SVC_GAME_EVENT_LIST => {
                let msg = CsvcMsgGameEventList::decode(buf)?;
                self.dispatcher.set_registry(EventRegistry::from_proto(&msg));
            }
            net_msg::SVC_SEND_TABLE => {
                // Tables always arrive through the data-tables command in
                // recorded demos.
            }
            _ => {}
        }
        Ok(())
    }

    /// Reacts to string-table rows the pipeline consumes: player identity
    /// and entity baselines.
    fn consume_table_entries(&mut self, table_index: usize, changed: &[usize]) -> Result<()> {
        let table = &self.state.string_tables[table_index];
        match table.name.as_str() {
            USER_INFO_TABLE => {
                for &i in changed {
                    let Some(data) = table.entries[i].user_data.as_deref() else {
                        continue;
                    };
                    // Entity indices are string-table slots shifted by one.
                    if let Some(info) = PlayerInfo::parse(data, i as i32 + 1) {
                        self.state.players.insert(info.user_id, info);
                    }
                }
            }
            INSTANCE_BASELINE_TABLE => {
                for &i in changed {
                    let entry = &table.entries[i];
                    if let (Ok(class_id), Some(data)) =
                        (entry.name.parse::<u16>(), entry.user_data.clone())
                    {
                        self.state.baselines.insert(class_id, data);
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmessages::{GameEventDescriptor, GameEventDescriptorKey, GameEventKey};
    use crate::sendtable::{test_prop, PropType, SendTable};
    use crate::serverclass::ServerClass;
    use csdemo_events::{DemoEvent, EventCollector};
    use std::io::Cursor;

    const MAX_OS_PATH: usize = 260;

    fn cstr(s: &str) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.resize(MAX_OS_PATH, 0);
        v
    }

    fn header_bytes() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"HL2DEMO\0");
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&13769i32.to_le_bytes());
        bytes.extend_from_slice(&cstr("test server"));
        bytes.extend_from_slice(&cstr("GOTV Demo"));
        bytes.extend_from_slice(&cstr("de_dust2"));
        bytes.extend_from_slice(&cstr("csgo"));
        bytes.extend_from_slice(&10.0f32.to_le_bytes());
        bytes.extend_from_slice(&1280i32.to_le_bytes());
        bytes.extend_from_slice(&640i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        bytes
    }

    fn frame_header(out: &mut Vec<u8>, command: u8, tick: i32) {
        out.push(command);
        out.extend_from_slice(&tick.to_le_bytes());
        out.push(0); // player slot
    }

    fn push_varint(out: &mut Vec<u8>, mut v: u32) {
        loop {
            let mut b = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                b |= 0x80;
            }
            out.push(b);
            if v == 0 {
                break;
            }
        }
    }

    fn packet_frame(out: &mut Vec<u8>, tick: i32, messages: &[(u32, Vec<u8>)]) {
        frame_header(out, 2, tick);
        out.extend_from_slice(&[0u8; 160]); // command info + sequences
        let mut payload = Vec::new();
        for (msg_type, body) in messages {
            push_varint(&mut payload, *msg_type);
            push_varint(&mut payload, body.len() as u32);
            payload.extend_from_slice(body);
        }
        out.extend_from_slice(&(payload.len() as i32).to_le_bytes());
        out.extend_from_slice(&payload);
    }

    fn event_list() -> Vec<u8> {
        CsvcMsgGameEventList {
            descriptors: vec![
                GameEventDescriptor {
                    eventid: Some(40),
                    name: Some("round_start".into()),
                    keys: vec![],
                },
                GameEventDescriptor {
                    eventid: Some(42),
                    name: Some("bomb_planted".into()),
                    keys: vec![
                        GameEventDescriptorKey {
                            r#type: Some(4),
                            name: Some("userid".into()),
                        },
                        GameEventDescriptorKey {
                            r#type: Some(4),
                            name: Some("site".into()),
                        },
                    ],
                },
            ],
        }
        .encode_to_vec()
    }

    fn game_event(id: i32, keys: Vec<GameEventKey>) -> Vec<u8> {
        CsvcMsgGameEvent {
            event_name: None,
            eventid: Some(id),
            keys,
        }
        .encode_to_vec()
    }

    fn short(v: i32) -> GameEventKey {
        GameEventKey {
            r#type: Some(4),
            val_short: Some(v),
            ..Default::default()
        }
    }

    #[test]
    fn synthetic_demo_end_to_end() {
        let mut demo = header_bytes();
        packet_frame(&mut demo, 100, &[(net_msg::SVC_GAME_EVENT_LIST, event_list())]);
        packet_frame(
            &mut demo,
            200,
            &[
                (net_msg::SVC_GAME_EVENT, game_event(40, vec![])),
                (
                    net_msg::SVC_GAME_EVENT,
                    game_event(42, vec![short(3), short(81)]),
                ),
            ],
        );
        frame_header(&mut demo, 7, 300); // stop

        let parser =
            DemoParser::new(Cursor::new(demo), EventCollector::new()).unwrap();
        assert_eq!(parser.header().map_name, "de_dust2");
        let outcome = parser.parse_to_end().unwrap();

        let events = &outcome.sink.events;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].event, DemoEvent::RoundStarted(_)));
        assert_eq!(events[0].tick, 200);
        assert_eq!(events[0].round, 1);
        match &events[1].event {
            DemoEvent::BombPlanted(b) => assert_eq!(b.site, 'A'),
            other => panic!("expected BombPlanted, got {other:?}"),
        }
        assert_eq!(outcome.state.tick, 300);
    }

    #[test]
    fn unknown_event_occurrence_aborts_the_parse() {
        let mut demo = header_bytes();
        packet_frame(&mut demo, 100, &[(net_msg::SVC_GAME_EVENT_LIST, event_list())]);
        packet_frame(
            &mut demo,
            150,
            &[(net_msg::SVC_GAME_EVENT, game_event(999, vec![]))],
        );
        frame_header(&mut demo, 7, 200);

        let parser = DemoParser::new(Cursor::new(demo), EventCollector::new()).unwrap();
        assert!(matches!(
            parser.parse_to_end(),
            Err(Error::UnknownEventDescriptor { id: 999 })
        ));
    }

    #[test]
    fn unknown_command_is_fatal() {
        let mut demo = header_bytes();
        frame_header(&mut demo, 42, 100);

        let parser = DemoParser::new(Cursor::new(demo), EventCollector::new()).unwrap();
        assert!(matches!(
            parser.parse_to_end(),
            Err(Error::UnknownCommand {
                command: 42,
                tick: 100
            })
        ));
    }

    fn chicken_schema() -> Schema {
        Schema::for_tests(
            vec![SendTable {
                name: "DT_Chicken".into(),
                props: vec![test_prop("m_dummy", PropType::Int, 0)],
                needs_decoder: true,
            }],
            vec![ServerClass {
                id: 0,
                name: CHICKEN_CLASS.into(),
                dt_name: "DT_Chicken".into(),
                table_index: 0,
                base_class_tables: Vec::new(),
                flattened_props: Vec::new(),
            }],
            1,
        )
    }

    #[test]
    fn chicken_deaths_synthesized_from_count_drop() {
        let mut state = SessionState::new();
        state.schema = Some(chicken_schema());
        for id in [50, 51] {
            state.entities.insert(
                id,
                Entity {
                    id,
                    class_id: 0,
                    props: Default::default(),
                },
            );
        }

        let mut dispatcher = GameEventDispatcher::new();
        let mut sink = EventCollector::new();
        // First pass snapshots the population without synthesizing.
        dispatcher.reconcile_chickens(&state, &mut sink);
        assert!(sink.events.is_empty());

        state.entities.remove(&51);
        dispatcher.reconcile_chickens(&state, &mut sink);
        assert_eq!(sink.events.len(), 1);
        assert!(matches!(sink.events[0].event, DemoEvent::ChickenDeath(_)));

        // No double counting once reconciled.
        dispatcher.reconcile_chickens(&state, &mut sink);
        assert_eq!(sink.events.len(), 1);
    }

    #[test]
    fn tick_rate_prefers_server_info() {
        let mut state = SessionState::new();
        assert_eq!(state.tick_rate(), DEFAULT_TICK_RATE);
        state.server_info = Some(ServerInfo {
            map_name: "de_nuke".into(),
            game_dir: "csgo".into(),
            tick_interval: 1.0 / 64.0,
            max_clients: 12,
        });
        assert!((state.tick_rate() - 64.0).abs() < 1e-3);
    }
}
