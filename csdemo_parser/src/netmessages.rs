//! Hand-written prost mirrors of the engine's protobuf net messages,
//! restricted to the fields this pipeline reads. Unknown fields are skipped
//! by prost during decode, so omitting the rest is safe.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CsvcMsgSendTable {
    #[prost(bool, optional, tag = "1")]
    pub is_end: Option<bool>,
    #[prost(string, optional, tag = "2")]
    pub net_table_name: Option<String>,
    #[prost(bool, optional, tag = "3")]
    pub needs_decoder: Option<bool>,
    #[prost(message, repeated, tag = "4")]
    pub props: Vec<SendTableProp>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SendTableProp {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub var_name: Option<String>,
    #[prost(int32, optional, tag = "3")]
    pub flags: Option<i32>,
    #[prost(int32, optional, tag = "4")]
    pub priority: Option<i32>,
    #[prost(string, optional, tag = "5")]
    pub dt_name: Option<String>,
    #[prost(int32, optional, tag = "6")]
    pub num_elements: Option<i32>,
    #[prost(float, optional, tag = "7")]
    pub low_value: Option<f32>,
    #[prost(float, optional, tag = "8")]
    pub high_value: Option<f32>,
    #[prost(int32, optional, tag = "9")]
    pub num_bits: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CsvcMsgServerInfo {
    #[prost(int32, optional, tag = "1")]
    pub protocol: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub server_count: Option<i32>,
    #[prost(int32, optional, tag = "11")]
    pub max_clients: Option<i32>,
    #[prost(int32, optional, tag = "12")]
    pub max_classes: Option<i32>,
    #[prost(int32, optional, tag = "13")]
    pub player_slot: Option<i32>,
    #[prost(float, optional, tag = "14")]
    pub tick_interval: Option<f32>,
    #[prost(string, optional, tag = "15")]
    pub game_dir: Option<String>,
    #[prost(string, optional, tag = "16")]
    pub map_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CnetMsgSetConVar {
    #[prost(message, optional, tag = "1")]
    pub convars: Option<CMsgCVars>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CMsgCVars {
    #[prost(message, repeated, tag = "1")]
    pub cvars: Vec<CVar>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CVar {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CsvcMsgCreateStringTable {
    #[prost(string, optional, tag = "1")]
    pub name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub max_entries: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub num_entries: Option<i32>,
    #[prost(bool, optional, tag = "4")]
    pub user_data_fixed_size: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub user_data_size: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub user_data_size_bits: Option<i32>,
    #[prost(int32, optional, tag = "7")]
    pub flags: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "8")]
    pub string_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CsvcMsgUpdateStringTable {
    #[prost(int32, optional, tag = "1")]
    pub table_id: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub num_changed_entries: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub string_data: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CsvcMsgGameEvent {
    #[prost(string, optional, tag = "1")]
    pub event_name: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub eventid: Option<i32>,
    #[prost(message, repeated, tag = "3")]
    pub keys: Vec<GameEventKey>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GameEventKey {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub val_string: Option<String>,
    #[prost(float, optional, tag = "3")]
    pub val_float: Option<f32>,
    #[prost(int32, optional, tag = "4")]
    pub val_long: Option<i32>,
    #[prost(int32, optional, tag = "5")]
    pub val_short: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub val_byte: Option<i32>,
    #[prost(bool, optional, tag = "7")]
    pub val_bool: Option<bool>,
    #[prost(uint64, optional, tag = "8")]
    pub val_uint64: Option<u64>,
    #[prost(bytes = "vec", optional, tag = "9")]
    pub val_wstring: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CsvcMsgGameEventList {
    #[prost(message, repeated, tag = "1")]
    pub descriptors: Vec<GameEventDescriptor>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GameEventDescriptor {
    #[prost(int32, optional, tag = "1")]
    pub eventid: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    #[prost(message, repeated, tag = "3")]
    pub keys: Vec<GameEventDescriptorKey>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GameEventDescriptorKey {
    #[prost(int32, optional, tag = "1")]
    pub r#type: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CsvcMsgPacketEntities {
    #[prost(int32, optional, tag = "1")]
    pub max_entries: Option<i32>,
    #[prost(int32, optional, tag = "2")]
    pub updated_entries: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub is_delta: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub update_baseline: Option<bool>,
    #[prost(int32, optional, tag = "5")]
    pub baseline: Option<i32>,
    #[prost(int32, optional, tag = "6")]
    pub delta_from: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "7")]
    pub entity_data: Option<Vec<u8>>,
}
