//! Network data-table schema types as they arrive off the wire.

use crate::error::{Error, Result};
use crate::netmessages;

pub const SPROP_UNSIGNED: i32 = 1 << 0;
pub const SPROP_COORD: i32 = 1 << 1;
pub const SPROP_NOSCALE: i32 = 1 << 2;
pub const SPROP_NORMAL: i32 = 1 << 5;
pub const SPROP_EXCLUDE: i32 = 1 << 6;
pub const SPROP_INSIDEARRAY: i32 = 1 << 8;
pub const SPROP_COLLAPSIBLE: i32 = 1 << 11;
pub const SPROP_COORD_MP: i32 = 1 << 12;
pub const SPROP_COORD_MP_LOWPRECISION: i32 = 1 << 13;
pub const SPROP_COORD_MP_INTEGRAL: i32 = 1 << 14;
pub const SPROP_CELL_COORD: i32 = 1 << 15;
pub const SPROP_CELL_COORD_LOWPRECISION: i32 = 1 << 16;
pub const SPROP_CELL_COORD_INTEGRAL: i32 = 1 << 17;
pub const SPROP_CHANGES_OFTEN: i32 = 1 << 18;
pub const SPROP_VARINT: i32 = 1 << 19;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropType {
    Int,
    Float,
    Vector,
    VectorXY,
    String,
    Array,
    DataTable,
    Int64,
}

impl PropType {
    pub fn from_wire(raw: i32, prop: &str) -> Result<Self> {
        Ok(match raw {
            0 => PropType::Int,
            1 => PropType::Float,
            2 => PropType::Vector,
            3 => PropType::VectorXY,
            4 => PropType::String,
            5 => PropType::Array,
            6 => PropType::DataTable,
            7 => PropType::Int64,
            other => {
                return Err(Error::UnsupportedWireType {
                    wire_type: other,
                    prop: prop.to_owned(),
                })
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendProp {
    pub var_name: String,
    pub prop_type: PropType,
    pub flags: i32,
    pub priority: i32,
    pub dt_name: String,
    pub num_elements: i32,
    pub low_value: f32,
    pub high_value: f32,
    pub num_bits: i32,
}

impl SendProp {
    pub fn from_proto(raw: &netmessages::SendTableProp) -> Result<Self> {
        let var_name = raw.var_name().to_owned();
        Ok(Self {
            prop_type: PropType::from_wire(raw.r#type(), &var_name)?,
            var_name,
            flags: raw.flags(),
            priority: raw.priority(),
            dt_name: raw.dt_name().to_owned(),
            num_elements: raw.num_elements(),
            low_value: raw.low_value(),
            high_value: raw.high_value(),
            num_bits: raw.num_bits(),
        })
    }

    #[inline]
    pub fn has_flag(&self, flag: i32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_exclude(&self) -> bool {
        self.has_flag(SPROP_EXCLUDE)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendTable {
    pub name: String,
    pub props: Vec<SendProp>,
    pub needs_decoder: bool,
}

impl SendTable {
    pub fn from_proto(msg: &netmessages::CsvcMsgSendTable) -> Result<Self> {
        Ok(Self {
            name: msg.net_table_name().to_owned(),
            props: msg
                .props
                .iter()
                .map(SendProp::from_proto)
                .collect::<Result<_>>()?,
            needs_decoder: msg.needs_decoder(),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_prop(name: &str, prop_type: PropType, flags: i32) -> SendProp {
    SendProp {
        var_name: name.to_owned(),
        prop_type,
        flags,
        priority: 128,
        dt_name: String::new(),
        num_elements: 0,
        low_value: 0.0,
        high_value: 0.0,
        num_bits: 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_type_nine_is_rejected() {
        let err = PropType::from_wire(9, "m_bogus").unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedWireType { wire_type: 9, .. }
        ));
    }
}
