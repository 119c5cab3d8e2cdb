//! Server-class declarations and property-list flattening.
//!
//! Flattening must reproduce the engine's algorithm exactly, swap loop
//! included, because delta streams address properties purely by position in
//! the flattened order.

use std::io::{Read, Seek};

use ahash::{AHashMap, AHashSet};
use csdemo_bitreader::BitReader;
use prost::Message;

use crate::error::{Error, Result};
use crate::netmessages::CsvcMsgSendTable;
use crate::sendtable::{
    PropType, SendProp, SendTable, SPROP_CHANGES_OFTEN, SPROP_COLLAPSIBLE, SPROP_INSIDEARRAY,
};

/// One leaf property in a class's flattened layout. Array properties carry
/// their element descriptor (the preceding sibling in the declaring table).
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedProp {
    pub name: String,
    pub prop: SendProp,
    pub array_element: Option<SendProp>,
}

#[derive(Debug, Clone)]
pub struct ServerClass {
    pub id: u16,
    pub name: String,
    pub dt_name: String,
    pub table_index: usize,
    pub base_class_tables: Vec<usize>,
    pub flattened_props: Vec<FlattenedProp>,
}

/// The fully resolved schema for one demo: tables, classes with flattened
/// layouts, and the bit width of class ids in entity streams.
#[derive(Debug, Clone)]
pub struct Schema {
    pub tables: Vec<SendTable>,
    table_index: AHashMap<String, usize>,
    pub classes: Vec<ServerClass>,
    pub class_bits: usize,
}

type ExcludeSet = AHashSet<(String, String)>;

impl Schema {
    /// Parses the data-tables block: send tables until the `is_end`
    /// sentinel, then the class list, then flattens every class.
    pub fn parse<R: Read + Seek>(reader: &mut BitReader<R>) -> Result<Self> {
        let mut tables = Vec::new();
        let mut table_index = AHashMap::new();
        loop {
            let _msg_type = reader.read_varint32()?;
            let size = reader.read_varint32()? as usize;
            let buf = reader.read_bytes(size)?;
            let msg = CsvcMsgSendTable::decode(buf.as_slice())?;
            if msg.is_end() {
                break;
            }
            let table = SendTable::from_proto(&msg)?;
            table_index.insert(table.name.clone(), tables.len());
            tables.push(table);
        }

        let class_count = reader.read_int(16)? as u16;
        let mut classes = Vec::with_capacity(class_count as usize);
        for _ in 0..class_count {
            let id = reader.read_int(16)? as u16;
            if id > class_count {
                return Err(Error::ClassIndexOutOfRange {
                    id,
                    count: class_count,
                });
            }
            let name = reader.read_string()?;
            let dt_name = reader.read_string()?;
            let table_index = *table_index
                .get(&dt_name)
                .ok_or_else(|| Error::UnknownTableReference {
                    name: dt_name.clone(),
                })?;
            classes.push(ServerClass {
                id,
                name,
                dt_name,
                table_index,
                base_class_tables: Vec::new(),
                flattened_props: Vec::new(),
            });
        }

        let mut schema = Self {
            tables,
            table_index,
            classes,
            class_bits: class_bit_width(class_count),
        };
        for i in 0..schema.classes.len() {
            schema.flatten_class(i)?;
        }
        log::debug!(
            "schema: {} tables, {} classes ({} class bits)",
            schema.tables.len(),
            schema.classes.len(),
            schema.class_bits
        );
        Ok(schema)
    }

    pub fn table_by_name(&self, name: &str) -> Result<&SendTable> {
        self.table_index
            .get(name)
            .map(|&i| &self.tables[i])
            .ok_or_else(|| Error::UnknownTableReference {
                name: name.to_owned(),
            })
    }

    pub fn class_by_id(&self, id: u16) -> Option<&ServerClass> {
        // Ids are assigned densely in declaration order; fall back to a
        // scan for the odd demo where they are not.
        match self.classes.get(id as usize) {
            Some(c) if c.id == id => Some(c),
            _ => self.classes.iter().find(|c| c.id == id),
        }
    }

    pub fn class_by_name(&self, name: &str) -> Option<&ServerClass> {
        self.classes.iter().find(|c| c.name == name)
    }

    fn flatten_class(&mut self, class_idx: usize) -> Result<()> {
        let table_index = self.classes[class_idx].table_index;
        let mut excludes = ExcludeSet::new();
        let mut base_tables = Vec::new();
        self.gather_excludes_and_bases(table_index, true, &mut excludes, &mut base_tables)?;

        let mut flattened = Vec::new();
        self.gather_props(table_index, "", &excludes, &mut flattened)?;
        sort_by_priority(&mut flattened);

        let class = &mut self.classes[class_idx];
        class.base_class_tables = base_tables;
        class.flattened_props = flattened;
        Ok(())
    }

    /// First walk: every Exclude property across the whole sub-table DAG,
    /// and base tables reached through properties literally named
    /// "baseclass" (only along the base chain itself).
    fn gather_excludes_and_bases(
        &self,
        table_index: usize,
        collect_bases: bool,
        excludes: &mut ExcludeSet,
        base_tables: &mut Vec<usize>,
    ) -> Result<()> {
        // Indices instead of references: the walk revisits self.tables.
        let prop_count = self.tables[table_index].props.len();
        for i in 0..prop_count {
            let (is_exclude, is_sub_table, var_name, dt_name) = {
                let prop = &self.tables[table_index].props[i];
                (
                    prop.is_exclude(),
                    prop.prop_type == PropType::DataTable,
                    prop.var_name.clone(),
                    prop.dt_name.clone(),
                )
            };
            if is_exclude {
                excludes.insert((dt_name, var_name));
                continue;
            }
            if is_sub_table {
                let sub = *self.table_index.get(&dt_name).ok_or_else(|| {
                    Error::UnknownTableReference {
                        name: dt_name.clone(),
                    }
                })?;
                if collect_bases && var_name == "baseclass" {
                    self.gather_excludes_and_bases(sub, true, excludes, base_tables)?;
                    base_tables.push(sub);
                } else {
                    self.gather_excludes_and_bases(sub, false, excludes, base_tables)?;
                }
            }
        }
        Ok(())
    }

    /// Second walk: leaves in declaration order. Non-collapsed sub-tables
    /// flush their own group to `out` before the current level's leaves,
    /// which is why the temporary is appended last.
    fn gather_props(
        &self,
        table_index: usize,
        prefix: &str,
        excludes: &ExcludeSet,
        out: &mut Vec<FlattenedProp>,
    ) -> Result<()> {
        let mut tmp = Vec::new();
        self.gather_props_iterate(table_index, prefix, excludes, &mut tmp, out)?;
        out.append(&mut tmp);
        Ok(())
    }

    fn gather_props_iterate(
        &self,
        table_index: usize,
        prefix: &str,
        excludes: &ExcludeSet,
        tmp: &mut Vec<FlattenedProp>,
        out: &mut Vec<FlattenedProp>,
    ) -> Result<()> {
        let table = &self.tables[table_index];
        for (i, prop) in table.props.iter().enumerate() {
            if prop.is_exclude() || prop.has_flag(SPROP_INSIDEARRAY) {
                continue;
            }
            if excludes.contains(&(table.name.clone(), prop.var_name.clone())) {
                continue;
            }

            if prop.prop_type == PropType::DataTable {
                let sub = *self.table_index.get(&prop.dt_name).ok_or_else(|| {
                    Error::UnknownTableReference {
                        name: prop.dt_name.clone(),
                    }
                })?;
                if prop.has_flag(SPROP_COLLAPSIBLE) {
                    self.gather_props_iterate(sub, prefix, excludes, tmp, out)?;
                } else {
                    let nfix = if prop.var_name.is_empty() {
                        prefix.to_owned()
                    } else {
                        format!("{}{}.", prefix, prop.var_name)
                    };
                    self.gather_props(sub, &nfix, excludes, out)?;
                }
                continue;
            }

            let array_element = if prop.prop_type == PropType::Array {
                Some(table.props[i - 1].clone())
            } else {
                None
            };
            tmp.push(FlattenedProp {
                name: format!("{}{}", prefix, prop.var_name),
                prop: prop.clone(),
                array_element,
            });
        }
        Ok(())
    }
}

impl Schema {
    #[cfg(test)]
    pub(crate) fn for_tests(
        tables: Vec<SendTable>,
        classes: Vec<ServerClass>,
        class_bits: usize,
    ) -> Self {
        let table_index = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();
        Self {
            tables,
            table_index,
            classes,
            class_bits,
        }
    }
}

fn class_bit_width(count: u16) -> usize {
    let mut bits = 0;
    while (1usize << bits) < count as usize {
        bits += 1;
    }
    bits
}

/// The priority pass: ascending distinct priorities with 64 always present
/// (it additionally catches ChangesOften), each bucket moved stably to the
/// front of the unprocessed suffix. Delta streams address properties by
/// position in this order, so it must match the encoder exactly.
fn sort_by_priority(flattened: &mut Vec<FlattenedProp>) {
    let mut priorities = vec![64];
    for entry in flattened.iter() {
        if !priorities.contains(&entry.prop.priority) {
            priorities.push(entry.prop.priority);
        }
    }
    priorities.sort_unstable();

    let mut start = 0;
    for priority in priorities {
        let mut idx = start;
        while idx < flattened.len() {
            let prop = &flattened[idx].prop;
            if prop.priority == priority
                || (priority == 64 && prop.has_flag(SPROP_CHANGES_OFTEN))
            {
                let entry = flattened.remove(idx);
                flattened.insert(start, entry);
                start += 1;
            }
            idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netmessages::SendTableProp;
    use crate::sendtable::{test_prop, SPROP_EXCLUDE};
    use std::io::Cursor;

    fn dt_prop(name: &str, dt: &str, flags: i32) -> SendProp {
        let mut p = test_prop(name, PropType::DataTable, flags);
        p.dt_name = dt.to_owned();
        p
    }

    fn exclude_prop(name: &str, dt: &str) -> SendProp {
        let mut p = test_prop(name, PropType::Int, SPROP_EXCLUDE);
        p.dt_name = dt.to_owned();
        p
    }

    fn table(name: &str, props: Vec<SendProp>) -> SendTable {
        SendTable {
            name: name.to_owned(),
            props,
            needs_decoder: false,
        }
    }

    fn schema_with(tables: Vec<SendTable>, classes: Vec<(&str, &str)>) -> Schema {
        let table_index = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect::<AHashMap<_, _>>();
        let classes = classes
            .iter()
            .enumerate()
            .map(|(i, (name, dt))| ServerClass {
                id: i as u16,
                name: (*name).to_owned(),
                dt_name: (*dt).to_owned(),
                table_index: table_index[*dt],
                base_class_tables: Vec::new(),
                flattened_props: Vec::new(),
            })
            .collect();
        let mut schema = Schema {
            class_bits: class_bit_width(tables.len() as u16),
            tables,
            table_index,
            classes,
        };
        for i in 0..schema.classes.len() {
            schema.flatten_class(i).unwrap();
        }
        schema
    }

    fn names(class: &ServerClass) -> Vec<&str> {
        class
            .flattened_props
            .iter()
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Base + derived class with one excluded and one array property.
    fn two_class_schema() -> Schema {
        let base = table(
            "DT_Base",
            vec![
                test_prop("m_iHealth", PropType::Int, 0),
                test_prop("m_flStamina", PropType::Float, 0),
            ],
        );
        let derived = table(
            "DT_Derived",
            vec![
                exclude_prop("m_flStamina", "DT_Base"),
                dt_prop("baseclass", "DT_Base", 0),
                {
                    let mut p = test_prop("m_MyArray", PropType::Int, SPROP_INSIDEARRAY);
                    p.var_name = "m_MyArray".into();
                    p
                },
                {
                    let mut p = test_prop("m_MyArray", PropType::Array, 0);
                    p.num_elements = 4;
                    p
                },
                test_prop("m_iAmmo", PropType::Int, 0),
            ],
        );
        schema_with(
            vec![base, derived],
            vec![("CBase", "DT_Base"), ("CDerived", "DT_Derived")],
        )
    }

    #[test]
    fn flatten_base_and_derived_ordering() {
        let schema = two_class_schema();
        let derived = schema.class_by_name("CDerived").unwrap();
        assert_eq!(
            names(derived),
            vec!["baseclass.m_iHealth", "m_MyArray", "m_iAmmo"]
        );
        assert_eq!(derived.base_class_tables, vec![0]);
        // The array picked up its element descriptor from the preceding
        // sibling.
        let array = &derived.flattened_props[1];
        assert_eq!(array.prop.prop_type, PropType::Array);
        assert_eq!(
            array.array_element.as_ref().unwrap().prop_type,
            PropType::Int
        );
    }

    #[test]
    fn flattening_is_deterministic() {
        let a = two_class_schema();
        let b = two_class_schema();
        for (ca, cb) in a.classes.iter().zip(&b.classes) {
            assert_eq!(names(ca), names(cb));
        }
    }

    #[test]
    fn excluded_base_prop_never_appears_via_any_path() {
        let shared = table("DT_Shared", vec![test_prop("m_shared", PropType::Int, 0)]);
        let mid = table(
            "DT_Mid",
            vec![
                exclude_prop("m_shared", "DT_Shared"),
                dt_prop("m_embedded", "DT_Shared", 0),
            ],
        );
        let top = table(
            "DT_Top",
            vec![
                dt_prop("baseclass", "DT_Mid", 0),
                dt_prop("m_other", "DT_Shared", 0),
                test_prop("m_own", PropType::Int, 0),
            ],
        );
        let schema = schema_with(vec![shared, mid, top], vec![("CTop", "DT_Top")]);
        let top = schema.class_by_name("CTop").unwrap();
        assert!(names(top).iter().all(|n| !n.ends_with("m_shared")));
        assert_eq!(names(top), vec!["m_own"]);
    }

    #[test]
    fn collapsible_subtable_inlines_without_prefix() {
        let inner = table("DT_Inner", vec![test_prop("m_inner", PropType::Int, 0)]);
        let outer = table(
            "DT_Outer",
            vec![
                dt_prop("m_local", "DT_Inner", SPROP_COLLAPSIBLE),
                test_prop("m_outer", PropType::Int, 0),
            ],
        );
        let schema = schema_with(vec![inner, outer], vec![("COuter", "DT_Outer")]);
        assert_eq!(
            names(schema.class_by_name("COuter").unwrap()),
            vec!["m_inner", "m_outer"]
        );
    }

    fn flatten_list(props: Vec<SendProp>) -> Vec<FlattenedProp> {
        props
            .into_iter()
            .map(|prop| FlattenedProp {
                name: prop.var_name.clone(),
                prop,
                array_element: None,
            })
            .collect()
    }

    #[test]
    fn priority_buckets_ascend_with_changes_often_in_64() {
        let mut props = vec![
            test_prop("p1", PropType::Int, 0),
            test_prop("p2", PropType::Int, 0),
            test_prop("p3", PropType::Int, SPROP_CHANGES_OFTEN),
            test_prop("p4", PropType::Int, 0),
        ];
        props[0].priority = 128;
        props[1].priority = 64;
        props[2].priority = 128;
        props[3].priority = 32;
        let mut flattened = flatten_list(props);
        sort_by_priority(&mut flattened);
        let order: Vec<&str> = flattened.iter().map(|f| f.name.as_str()).collect();
        // p3 lands in the 64 bucket via ChangesOften despite its 128.
        assert_eq!(order, vec!["p4", "p2", "p3", "p1"]);
    }

    #[test]
    fn priority_pass_is_stable_within_a_bucket() {
        let mut props = vec![
            test_prop("b", PropType::Int, 0),
            test_prop("c", PropType::Int, 0),
            test_prop("x", PropType::Int, 0),
        ];
        props[0].priority = 128;
        props[1].priority = 128;
        props[2].priority = 32;
        let mut flattened = flatten_list(props);
        sort_by_priority(&mut flattened);
        let order: Vec<&str> = flattened.iter().map(|f| f.name.as_str()).collect();
        // Pulling x forward must not reorder b relative to c.
        assert_eq!(order, vec!["x", "b", "c"]);
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

    fn push_table_msg(out: &mut Vec<u8>, msg: &CsvcMsgSendTable) {
        let bytes = msg.encode_to_vec();
        push_varint(out, 9);
        push_varint(out, bytes.len() as u32);
        out.extend_from_slice(&bytes);
    }

    #[test]
    fn class_id_past_count_aborts_with_no_partial_schema() {
        let mut stream = Vec::new();
        push_table_msg(
            &mut stream,
            &CsvcMsgSendTable {
                is_end: Some(false),
                net_table_name: Some("DT_Base".into()),
                needs_decoder: Some(false),
                props: vec![SendTableProp {
                    r#type: Some(0),
                    var_name: Some("m_iValue".into()),
                    flags: Some(0),
                    priority: Some(128),
                    dt_name: None,
                    num_elements: None,
                    low_value: None,
                    high_value: None,
                    num_bits: Some(8),
                }],
            },
        );
        push_table_msg(
            &mut stream,
            &CsvcMsgSendTable {
                is_end: Some(true),
                ..Default::default()
            },
        );
        stream.extend_from_slice(&1u16.to_le_bytes()); // class count
        stream.extend_from_slice(&5u16.to_le_bytes()); // id way past count
        stream.extend_from_slice(b"CTest\0");
        stream.extend_from_slice(b"DT_Base\0");

        let mut reader = BitReader::new_small(Cursor::new(stream)).unwrap();
        assert!(matches!(
            Schema::parse(&mut reader),
            Err(Error::ClassIndexOutOfRange { id: 5, count: 1 })
        ));
    }

    #[test]
    fn unknown_owning_table_is_fatal() {
        let mut stream = Vec::new();
        push_table_msg(
            &mut stream,
            &CsvcMsgSendTable {
                is_end: Some(true),
                ..Default::default()
            },
        );
        stream.extend_from_slice(&1u16.to_le_bytes());
        stream.extend_from_slice(&0u16.to_le_bytes());
        stream.extend_from_slice(b"CTest\0");
        stream.extend_from_slice(b"DT_Missing\0");

        let mut reader = BitReader::new_small(Cursor::new(stream)).unwrap();
        assert!(matches!(
            Schema::parse(&mut reader),
            Err(Error::UnknownTableReference { name }) if name == "DT_Missing"
        ));
    }

    #[test]
    fn full_data_tables_block_parses_and_flattens() {
        let mut stream = Vec::new();
        push_table_msg(
            &mut stream,
            &CsvcMsgSendTable {
                is_end: Some(false),
                net_table_name: Some("DT_Thing".into()),
                needs_decoder: Some(true),
                props: vec![
                    SendTableProp {
                        r#type: Some(0),
                        var_name: Some("m_iMode".into()),
                        flags: Some(1),
                        priority: Some(128),
                        num_bits: Some(5),
                        ..Default::default()
                    },
                    SendTableProp {
                        r#type: Some(1),
                        var_name: Some("m_flValue".into()),
                        flags: Some(4),
                        priority: Some(128),
                        num_bits: Some(32),
                        ..Default::default()
                    },
                ],
            },
        );
        push_table_msg(
            &mut stream,
            &CsvcMsgSendTable {
                is_end: Some(true),
                ..Default::default()
            },
        );
        stream.extend_from_slice(&1u16.to_le_bytes());
        stream.extend_from_slice(&0u16.to_le_bytes());
        stream.extend_from_slice(b"CThing\0");
        stream.extend_from_slice(b"DT_Thing\0");

        let mut reader = BitReader::new_small(Cursor::new(stream)).unwrap();
        let schema = Schema::parse(&mut reader).unwrap();
        assert_eq!(schema.classes.len(), 1);
        assert_eq!(schema.class_bits, 0);
        let class = schema.class_by_id(0).unwrap();
        assert_eq!(class.name, "CThing");
        assert_eq!(names(class), vec!["m_iMode", "m_flValue"]);
    }
}
