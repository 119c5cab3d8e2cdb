//! Decodes single property values off the bit stream according to a
//! flattened schema entry.

use std::io::{Read, Seek};

use csdemo_bitreader::BitReader;
use csdemo_events::Vector;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::sendtable::{
    PropType, SendProp, SPROP_CELL_COORD, SPROP_CELL_COORD_INTEGRAL,
    SPROP_CELL_COORD_LOWPRECISION, SPROP_COORD, SPROP_COORD_MP, SPROP_COORD_MP_INTEGRAL,
    SPROP_COORD_MP_LOWPRECISION, SPROP_NORMAL, SPROP_NOSCALE, SPROP_UNSIGNED, SPROP_VARINT,
};
use crate::serverclass::FlattenedProp;

const DATA_TABLE_MAX_STRING_LENGTH: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PropValue {
    Int(i32),
    Int64(i64),
    Float(f32),
    Vector(Vector),
    String(String),
    Array(Vec<PropValue>),
}

impl PropValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            PropValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            PropValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Vector> {
        match self {
            PropValue::Vector(v) => Some(*v),
            _ => None,
        }
    }
}

pub fn decode_prop<R: Read + Seek>(
    entry: &FlattenedProp,
    reader: &mut BitReader<R>,
) -> Result<PropValue> {
    decode_value(&entry.prop, entry.array_element.as_ref(), &entry.name, reader)
}

fn decode_value<R: Read + Seek>(
    prop: &SendProp,
    array_element: Option<&SendProp>,
    name: &str,
    reader: &mut BitReader<R>,
) -> Result<PropValue> {
    Ok(match prop.prop_type {
        PropType::Int => PropValue::Int(decode_int(prop, reader)?),
        PropType::Int64 => PropValue::Int64(decode_int64(prop, reader)?),
        PropType::Float => PropValue::Float(decode_float(prop, reader)?),
        PropType::Vector => PropValue::Vector(decode_vector(prop, reader)?),
        PropType::VectorXY => PropValue::Vector(decode_vector_xy(prop, reader)?),
        PropType::String => PropValue::String(decode_string(reader)?),
        PropType::Array => PropValue::Array(decode_array(prop, array_element, name, reader)?),
        // Data-table leaves never survive flattening; hitting one here
        // means the schema and stream disagree.
        PropType::DataTable => {
            return Err(Error::UnsupportedWireType {
                wire_type: 6,
                prop: name.to_owned(),
            })
        }
    })
}

fn decode_int<R: Read + Seek>(prop: &SendProp, reader: &mut BitReader<R>) -> Result<i32> {
    if prop.has_flag(SPROP_VARINT) {
        // Varint-flagged ints may arrive as 64-bit-encoded small negatives;
        // the tolerant path accepts those.
        if prop.has_flag(SPROP_UNSIGNED) {
            Ok(reader.read_varint32_slow()? as i32)
        } else {
            Ok(reader.read_signed_varint32_slow()?)
        }
    } else if prop.has_flag(SPROP_UNSIGNED) {
        Ok(reader.read_int(prop.num_bits as usize)? as i32)
    } else {
        Ok(reader.read_signed_int(prop.num_bits as usize)?)
    }
}

fn decode_int64<R: Read + Seek>(prop: &SendProp, reader: &mut BitReader<R>) -> Result<i64> {
    if prop.has_flag(SPROP_VARINT) {
        return if prop.has_flag(SPROP_UNSIGNED) {
            Ok(reader.read_varint64()? as i64)
        } else {
            Ok(reader.read_signed_varint64()?)
        };
    }

    let (negate, high_bits) = if prop.has_flag(SPROP_UNSIGNED) {
        (false, (prop.num_bits as usize).saturating_sub(32))
    } else {
        (reader.read_bit()?, (prop.num_bits as usize).saturating_sub(33))
    };
    let low = reader.read_int(32)? as u64;
    let high = reader.read_int(high_bits)? as u64;
    let val = ((high << 32) | low) as i64;
    Ok(if negate { -val } else { val })
}

fn decode_float<R: Read + Seek>(prop: &SendProp, reader: &mut BitReader<R>) -> Result<f32> {
    if prop.has_flag(SPROP_NOSCALE) {
        Ok(reader.read_float()?)
    } else if prop.has_flag(SPROP_COORD) {
        Ok(reader.read_bitcoord()?)
    } else if prop.has_flag(SPROP_COORD_MP) {
        Ok(reader.read_bitcoordmp(false, false)?)
    } else if prop.has_flag(SPROP_COORD_MP_LOWPRECISION) {
        Ok(reader.read_bitcoordmp(false, true)?)
    } else if prop.has_flag(SPROP_COORD_MP_INTEGRAL) {
        Ok(reader.read_bitcoordmp(true, false)?)
    } else if prop.has_flag(SPROP_NORMAL) {
        Ok(reader.read_bitnormal()?)
    } else if prop.has_flag(SPROP_CELL_COORD) {
        Ok(reader.read_bitcellcoord(prop.num_bits as usize, false, false)?)
    } else if prop.has_flag(SPROP_CELL_COORD_LOWPRECISION) {
        Ok(reader.read_bitcellcoord(prop.num_bits as usize, false, true)?)
    } else if prop.has_flag(SPROP_CELL_COORD_INTEGRAL) {
        Ok(reader.read_bitcellcoord(prop.num_bits as usize, true, false)?)
    } else {
        // Default quantized form: a raw fraction scaled into [low, high].
        let raw = reader.read_int(prop.num_bits as usize)?;
        let fract = raw as f32 / ((1u64 << prop.num_bits) - 1) as f32;
        Ok(prop.low_value + (prop.high_value - prop.low_value) * fract)
    }
}

fn decode_vector<R: Read + Seek>(prop: &SendProp, reader: &mut BitReader<R>) -> Result<Vector> {
    let x = decode_float(prop, reader)?;
    let y = decode_float(prop, reader)?;
    if !prop.has_flag(SPROP_NORMAL) {
        return Ok(Vector {
            x,
            y,
            z: decode_float(prop, reader)?,
        });
    }
    // Unit vectors transmit only two components; the third is derived up
    // to its sign.
    let sum = x * x + y * y;
    let z_abs = if sum < 1.0 { (1.0 - sum).sqrt() } else { 0.0 };
    let z = if reader.read_bit()? { -z_abs } else { z_abs };
    Ok(Vector { x, y, z })
}

fn decode_vector_xy<R: Read + Seek>(prop: &SendProp, reader: &mut BitReader<R>) -> Result<Vector> {
    Ok(Vector {
        x: decode_float(prop, reader)?,
        y: decode_float(prop, reader)?,
        z: 0.0,
    })
}

fn decode_string<R: Read + Seek>(reader: &mut BitReader<R>) -> Result<String> {
    let len = (reader.read_int(9)? as usize).min(DATA_TABLE_MAX_STRING_LENGTH);
    Ok(reader.read_cstring(len)?)
}

fn decode_array<R: Read + Seek>(
    prop: &SendProp,
    array_element: Option<&SendProp>,
    name: &str,
    reader: &mut BitReader<R>,
) -> Result<Vec<PropValue>> {
    let element = array_element.ok_or_else(|| Error::UnsupportedWireType {
        wire_type: 5,
        prop: name.to_owned(),
    })?;
    let max = prop.num_elements.max(1) as u32;
    let count_bits = 32 - max.leading_zeros() as usize; // 1 + floor(log2(max))
    let count = reader.read_int(count_bits)? as usize;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(decode_value(element, None, name, reader)?);
    }
    Ok(out)
}
