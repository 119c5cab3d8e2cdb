/// Fatal parse errors. All of these abort the current file; the caller
/// decides whether to move on to the next demo.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed demo header: {reason}")]
    MalformedHeader { reason: String },
    #[error("send table {name:?} referenced but never defined")]
    UnknownTableReference { name: String },
    #[error("server class id {id} out of range (declared count {count})")]
    ClassIndexOutOfRange { id: u16, count: u16 },
    #[error("unsupported wire type {wire_type} on property {prop:?}")]
    UnsupportedWireType { wire_type: i32, prop: String },
    #[error("field index {index} out of range for class {class:?} ({len} flattened props)")]
    PropIndexOutOfRange {
        class: String,
        index: usize,
        len: usize,
    },
    #[error("game event id {id} has no registered descriptor")]
    UnknownEventDescriptor { id: i32 },
    #[error("game event {event:?} payload does not match its descriptor: {source}")]
    EventShape {
        event: String,
        source: serde_json::Error,
    },
    #[error("delta update for entity {id} that was never created")]
    UnknownEntity { id: i32 },
    #[error("unknown demo command {command} at tick {tick}")]
    UnknownCommand { command: u8, tick: i32 },
    #[error("string table {0:?} uses dictionary encoding, which never appears in demos")]
    StringTableDictionary(String),
    #[error("string table id {0} referenced before creation")]
    UnknownStringTable(i32),
    #[error(transparent)]
    Bits(#[from] csdemo_bitreader::Error),
    #[error("protobuf decode: {0}")]
    Proto(#[from] prost::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
