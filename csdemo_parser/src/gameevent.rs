//! Game-event descriptors and raw occurrence resolution.
//!
//! `CSVCMsg_GameEventList` arrives once and names every event's keys; each
//! later `CSVCMsg_GameEvent` carries only positional values. Resolution zips
//! the two into a name→value map that the dispatcher deserializes into one
//! typed struct per event kind.

use ahash::AHashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::netmessages::{CsvcMsgGameEvent, CsvcMsgGameEventList, GameEventKey};

#[derive(Debug, Clone)]
pub struct EventDescriptor {
    pub id: i32,
    pub name: String,
    pub keys: Vec<String>,
}

#[derive(Debug, Default)]
pub struct EventRegistry {
    by_id: AHashMap<i32, EventDescriptor>,
}

impl EventRegistry {
    pub fn from_proto(msg: &CsvcMsgGameEventList) -> Self {
        let by_id = msg
            .descriptors
            .iter()
            .map(|d| {
                (
                    d.eventid(),
                    EventDescriptor {
                        id: d.eventid(),
                        name: d.name().to_owned(),
                        keys: d.keys.iter().map(|k| k.name().to_owned()).collect(),
                    },
                )
            })
            .collect::<AHashMap<_, _>>();
        log::debug!("game event list: {} descriptors", by_id.len());
        Self { by_id }
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Maps an occurrence's positional values onto its descriptor's key
    /// names. An id with no descriptor is fatal.
    pub fn resolve(&self, msg: &CsvcMsgGameEvent) -> Result<RawGameEvent> {
        let descriptor = self
            .by_id
            .get(&msg.eventid())
            .ok_or(Error::UnknownEventDescriptor { id: msg.eventid() })?;
        let mut fields = Map::with_capacity(descriptor.keys.len());
        for (name, key) in descriptor.keys.iter().zip(&msg.keys) {
            fields.insert(name.clone(), key_value(key));
        }
        Ok(RawGameEvent {
            name: descriptor.name.clone(),
            fields,
        })
    }
}

fn key_value(key: &GameEventKey) -> Value {
    match key.r#type() {
        1 => Value::from(key.val_string()),
        2 => serde_json::Number::from_f64(key.val_float() as f64)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        3 => Value::from(key.val_long()),
        4 => Value::from(key.val_short()),
        5 => Value::from(key.val_byte()),
        6 => Value::from(key.val_bool()),
        7 => Value::from(key.val_uint64()),
        8 => Value::from(String::from_utf8_lossy(key.val_wstring()).into_owned()),
        _ => Value::Null,
    }
}

/// One occurrence with its values bound to descriptor key names.
#[derive(Debug, Clone)]
pub struct RawGameEvent {
    pub name: String,
    pub fields: Map<String, Value>,
}

impl RawGameEvent {
    /// Deserializes the name→value map into the event kind's typed struct.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.fields.clone())).map_err(|source| {
            Error::EventShape {
                event: self.name.clone(),
                source,
            }
        })
    }

    pub fn int(&self, key: &str) -> i32 {
        self.fields
            .get(key)
            .and_then(Value::as_i64)
            .unwrap_or_default() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmessages::{GameEventDescriptor, GameEventDescriptorKey};
    use serde::Deserialize;

    pub(super) fn registry_with(descriptors: Vec<(i32, &str, Vec<(&str, i32)>)>) -> EventRegistry {
        let msg = CsvcMsgGameEventList {
            descriptors: descriptors
                .into_iter()
                .map(|(id, name, keys)| GameEventDescriptor {
                    eventid: Some(id),
                    name: Some(name.to_owned()),
                    keys: keys
                        .into_iter()
                        .map(|(k, t)| GameEventDescriptorKey {
                            r#type: Some(t),
                            name: Some(k.to_owned()),
                        })
                        .collect(),
                })
                .collect(),
        };
        EventRegistry::from_proto(&msg)
    }

    fn occurrence(id: i32, keys: Vec<GameEventKey>) -> CsvcMsgGameEvent {
        CsvcMsgGameEvent {
            event_name: None,
            eventid: Some(id),
            keys,
        }
    }

    fn short_key(v: i32) -> GameEventKey {
        GameEventKey {
            r#type: Some(4),
            val_short: Some(v),
            ..Default::default()
        }
    }

    fn string_key(v: &str) -> GameEventKey {
        GameEventKey {
            r#type: Some(1),
            val_string: Some(v.to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn resolves_positional_values_onto_names() {
        let registry = registry_with(vec![(
            12,
            "weapon_fire",
            vec![("userid", 4), ("weapon", 1)],
        )]);
        let raw = registry
            .resolve(&occurrence(12, vec![short_key(7), string_key("ak47")]))
            .unwrap();
        assert_eq!(raw.name, "weapon_fire");
        assert_eq!(raw.int("userid"), 7);
        assert_eq!(raw.fields["weapon"], "ak47");
    }

    #[test]
    fn unknown_event_id_is_fatal() {
        let registry = registry_with(vec![(1, "round_start", vec![])]);
        assert!(matches!(
            registry.resolve(&occurrence(99, vec![])),
            Err(Error::UnknownEventDescriptor { id: 99 })
        ));
    }

    #[test]
    fn deserializes_into_typed_struct() {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct Fire {
            userid: i32,
            weapon: String,
        }
        let registry = registry_with(vec![(
            12,
            "weapon_fire",
            vec![("userid", 4), ("weapon", 1)],
        )]);
        let raw = registry
            .resolve(&occurrence(12, vec![short_key(3), string_key("deagle")]))
            .unwrap();
        let fire: Fire = raw.deserialize().unwrap();
        assert_eq!(fire.userid, 3);
        assert_eq!(fire.weapon, "deagle");
    }
}
