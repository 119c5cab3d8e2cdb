/// Top-level commands of the demo container, one per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoCommand {
    Signon,
    Packet,
    SyncTick,
    ConsoleCmd,
    UserCmd,
    DataTables,
    Stop,
    CustomData,
    StringTables,
    Unknown(u8),
}

impl From<u8> for DemoCommand {
    fn from(raw: u8) -> Self {
        match raw {
            1 => DemoCommand::Signon,
            2 => DemoCommand::Packet,
            3 => DemoCommand::SyncTick,
            4 => DemoCommand::ConsoleCmd,
            5 => DemoCommand::UserCmd,
            6 => DemoCommand::DataTables,
            7 => DemoCommand::Stop,
            8 => DemoCommand::CustomData,
            9 => DemoCommand::StringTables,
            other => DemoCommand::Unknown(other),
        }
    }
}

/// Inner net-message type tags carried inside signon/packet payloads. Only
/// the ones the pipeline consumes are named; everything else is skipped by
/// its length prefix.
pub mod net_msg {
    pub const NET_SET_CON_VAR: u32 = 6;
    pub const SVC_SERVER_INFO: u32 = 8;
    pub const SVC_SEND_TABLE: u32 = 9;
    pub const SVC_CREATE_STRING_TABLE: u32 = 12;
    pub const SVC_UPDATE_STRING_TABLE: u32 = 13;
    pub const SVC_GAME_EVENT: u32 = 25;
    pub const SVC_PACKET_ENTITIES: u32 = 26;
    pub const SVC_GAME_EVENT_LIST: u32 = 30;
}
