//! Per-tick entity state: creation from baselines, delta application,
//! removal.

use std::io::Cursor;

use ahash::AHashMap;
use csdemo_bitreader::BitReader;

use crate::error::{Error, Result};
use crate::netmessages::CsvcMsgPacketEntities;
use crate::propdecoder::{decode_prop, PropValue};
use crate::serverclass::{Schema, ServerClass};

const ENTITY_SERIAL_BITS: usize = 10;

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: i32,
    pub class_id: u16,
    /// Flattened-property index → last decoded value.
    pub props: AHashMap<usize, PropValue>,
}

impl Entity {
    fn new(id: i32, class_id: u16) -> Self {
        Self {
            id,
            class_id,
            props: AHashMap::new(),
        }
    }

    /// Looks a property up by its flattened name; a name ending in
    /// `.suffix` also matches, so callers can ignore sub-table prefixes.
    pub fn prop<'a>(&'a self, class: &ServerClass, name: &str) -> Option<&'a PropValue> {
        let idx = class.flattened_props.iter().position(|f| {
            f.name == name || (f.name.ends_with(name) && {
                let head = &f.name[..f.name.len() - name.len()];
                head.ends_with('.')
            })
        })?;
        self.props.get(&idx)
    }
}

/// Applies one `CSVCMsg_PacketEntities` to the live entity set.
pub fn process_packet_entities(
    msg: &CsvcMsgPacketEntities,
    schema: &Schema,
    baselines: &AHashMap<u16, Vec<u8>>,
    entities: &mut AHashMap<i32, Entity>,
) -> Result<()> {
    let data = msg.entity_data();
    if data.is_empty() {
        return Ok(());
    }
    let mut reader = BitReader::new_small(Cursor::new(data.to_vec()))?;
    let mut entity_id: i32 = -1;

    for _ in 0..msg.updated_entries() {
        entity_id += 1 + reader.read_ubitint()? as i32;

        if !reader.read_bit()? {
            if reader.read_bit()? {
                // Enter PVS: class id, serial (skipped), baseline, then the
                // creation delta itself.
                let class_id = reader.read_int(schema.class_bits)? as u16;
                reader.skip(ENTITY_SERIAL_BITS)?;
                let class = schema
                    .class_by_id(class_id)
                    .ok_or(Error::ClassIndexOutOfRange {
                        id: class_id,
                        count: schema.classes.len() as u16,
                    })?;
                let mut entity = Entity::new(entity_id, class_id);
                if let Some(raw) = baselines.get(&class_id) {
                    let mut baseline_reader = BitReader::new_small(Cursor::new(raw.clone()))?;
                    apply_update(&mut entity, class, &mut baseline_reader)?;
                }
                apply_update(&mut entity, class, &mut reader)?;
                entities.insert(entity_id, entity);
            } else {
                // Delta against the existing state. An update for an entity
                // never seen means the stream and our bookkeeping diverged.
                let entity = entities
                    .get_mut(&entity_id)
                    .ok_or(Error::UnknownEntity { id: entity_id })?;
                let class = schema.class_by_id(entity.class_id).ok_or(
                    Error::ClassIndexOutOfRange {
                        id: entity.class_id,
                        count: schema.classes.len() as u16,
                    },
                )?;
                apply_update(entity, class, &mut reader)?;
            }
        } else {
            // Leave PVS; the second bit requests full deletion. Treat both
            // the same: stale state must not satisfy later lookups.
            reader.read_bit()?;
            entities.remove(&entity_id);
        }
    }
    Ok(())
}

/// Decodes one field-index run and overwrites the referenced properties.
pub fn apply_update<R: std::io::Read + std::io::Seek>(
    entity: &mut Entity,
    class: &ServerClass,
    reader: &mut BitReader<R>,
) -> Result<()> {
    let new_way = reader.read_bit()?;
    let mut indices = Vec::new();
    let mut index = -1;
    loop {
        index = reader.read_field_index(index, new_way)?;
        if index == -1 {
            break;
        }
        indices.push(index as usize);
    }

    for idx in indices {
        let entry = class.flattened_props.get(idx).ok_or_else(|| {
            Error::PropIndexOutOfRange {
                class: class.name.clone(),
                index: idx,
                len: class.flattened_props.len(),
            }
        })?;
        let value = decode_prop(entry, reader)?;
        entity.props.insert(idx, value);
    }
    Ok(())
}
