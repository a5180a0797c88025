//! The JSON document representation shared by the disk and in-memory
//! drivers.
//!
//! ```text
//! group := {
//!   "attributes": { <name>: <attribute>, … },
//!   "subgroups":  { <name>: <group>, … },
//!   "datasets":   { <name>: <dataset>, … },
//! }
//! dataset := {
//!   "datatype": "FLOAT64",
//!   "extent": [4, 4],
//!   "data": [ …row-major, null where unwritten… ],   // absent in template mode
//!   "attributes": { … },
//! }
//! ```

use num_complex::{Complex32, Complex64};
use serde_json::{json, Map, Value as Json};

use opmd_io::{BufferRef, BufferTarget, DatasetElement};
use opmd_types::{
    bounds_check, volume, AffectedObject, Datatype, Error, Extent, Offset, Reason,
    Result, Value,
};

pub const BACKEND_NAME: &str = "json";

/// Sibling attribute marking a short-mode unsigned byte as a boolean.
pub fn boolean_marker(name: &str) -> String {
    format!("{name}/__is_boolean__")
}

// --- tree navigation ---

pub fn empty_group() -> Json {
    json!({ "attributes": {}, "subgroups": {}, "datasets": {} })
}

fn read_err(affected: AffectedObject, reason: Reason, description: impl Into<String>) -> Error {
    Error::read_in(BACKEND_NAME, affected, reason, description)
}

/// Walk (and create) the group chain for `segments`.
pub fn ensure_group<'a>(root: &'a mut Json, segments: &[String]) -> &'a mut Json {
    let mut cursor = root;
    for segment in segments {
        if !cursor.is_object() {
            *cursor = empty_group();
        }
        let subgroups = cursor
            .as_object_mut()
            .expect("just ensured an object")
            .entry("subgroups")
            .or_insert_with(|| Json::Object(Map::new()));
        cursor = subgroups
            .as_object_mut()
            .expect("subgroups is an object")
            .entry(segment.clone())
            .or_insert_with(empty_group);
    }
    cursor
}

pub fn find_group<'a>(root: &'a Json, segments: &[String]) -> Option<&'a Json> {
    let mut cursor = root;
    for segment in segments {
        cursor = cursor.get("subgroups")?.get(segment)?;
    }
    Some(cursor)
}

pub fn find_group_mut<'a>(root: &'a mut Json, segments: &[String]) -> Option<&'a mut Json> {
    let mut cursor = root;
    for segment in segments {
        cursor = cursor.get_mut("subgroups")?.get_mut(segment)?;
    }
    Some(cursor)
}

/// A dataset lives in its parent group's `datasets` map.
pub fn find_dataset<'a>(root: &'a Json, segments: &[String]) -> Option<&'a Json> {
    let (name, parents) = segments.split_last()?;
    find_group(root, parents)?.get("datasets")?.get(name)
}

pub fn find_dataset_mut<'a>(root: &'a mut Json, segments: &[String]) -> Option<&'a mut Json> {
    let (name, parents) = segments.split_last()?;
    find_group_mut(root, parents)?
        .get_mut("datasets")?
        .get_mut(name)
}

/// Attributes may sit on a group or on a dataset; resolve either.
pub fn find_attributable<'a>(root: &'a Json, segments: &[String]) -> Option<&'a Json> {
    find_group(root, segments).or_else(|| find_dataset(root, segments))
}

pub fn find_attributable_mut<'a>(root: &'a mut Json, segments: &[String]) -> Option<&'a mut Json> {
    if find_group(root, segments).is_some() {
        find_group_mut(root, segments)
    } else {
        find_dataset_mut(root, segments)
    }
}

pub fn attributes_mut(node: &mut Json) -> &mut Map<String, Json> {
    node.as_object_mut()
        .expect("groups and datasets are objects")
        .entry("attributes")
        .or_insert_with(|| Json::Object(Map::new()))
        .as_object_mut()
        .expect("attributes is an object")
}

// --- scalar encoding ---

fn f64_to_json(v: f64) -> Json {
    // JSON numbers cannot carry non-finite values; fall back to the
    // conventional string spellings
    serde_json::Number::from_f64(v).map_or_else(
        || {
            Json::String(
                if v.is_nan() {
                    "NaN"
                } else if v > 0.0 {
                    "Infinity"
                } else {
                    "-Infinity"
                }
                .to_owned(),
            )
        },
        Json::Number,
    )
}

fn json_to_f64(json: &Json) -> Option<f64> {
    if let Some(v) = json.as_f64() {
        return Some(v);
    }
    match json.as_str()? {
        "NaN" => Some(f64::NAN),
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        _ => None,
    }
}

/// Element-wise JSON encoding for dataset payloads.
pub trait ElementJson: DatasetElement {
    fn to_json(self) -> Json;
    fn from_json(json: &Json) -> Option<Self>;
}

macro_rules! impl_element_json_int {
    ($($ty:ty),*) => {
        $(
            impl ElementJson for $ty {
                fn to_json(self) -> Json {
                    json!(self)
                }

                fn from_json(json: &Json) -> Option<Self> {
                    json.as_i64().and_then(|v| Self::try_from(v).ok()).or_else(|| {
                        json.as_u64().and_then(|v| Self::try_from(v).ok())
                    })
                }
            }
        )*
    };
}

impl_element_json_int!(i8, i16, i32, i64, u8, u16, u32, u64);

impl ElementJson for f32 {
    fn to_json(self) -> Json {
        f64_to_json(self.into())
    }

    fn from_json(json: &Json) -> Option<Self> {
        json_to_f64(json).map(|v| v as f32)
    }
}

impl ElementJson for f64 {
    fn to_json(self) -> Json {
        f64_to_json(self)
    }

    fn from_json(json: &Json) -> Option<Self> {
        json_to_f64(json)
    }
}

impl ElementJson for Complex32 {
    fn to_json(self) -> Json {
        Json::Array(vec![f64_to_json(self.re.into()), f64_to_json(self.im.into())])
    }

    fn from_json(json: &Json) -> Option<Self> {
        let parts = json.as_array()?;
        if parts.len() != 2 {
            return None;
        }
        Some(Self::new(
            json_to_f64(&parts[0])? as f32,
            json_to_f64(&parts[1])? as f32,
        ))
    }
}

impl ElementJson for Complex64 {
    fn to_json(self) -> Json {
        Json::Array(vec![f64_to_json(self.re), f64_to_json(self.im)])
    }

    fn from_json(json: &Json) -> Option<Self> {
        let parts = json.as_array()?;
        if parts.len() != 2 {
            return None;
        }
        Some(Self::new(json_to_f64(&parts[0])?, json_to_f64(&parts[1])?))
    }
}

impl ElementJson for bool {
    fn to_json(self) -> Json {
        Json::Bool(self)
    }

    fn from_json(json: &Json) -> Option<Self> {
        json.as_bool()
    }
}

// --- attribute encoding ---

fn vec_to_json<T: Copy, F: Fn(T) -> Json>(values: &[T], f: F) -> Json {
    Json::Array(values.iter().map(|&v| f(v)).collect())
}

/// The bare value part of an attribute (no datatype tag).
pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::I8(v) => json!(v),
        Value::I16(v) => json!(v),
        Value::I32(v) => json!(v),
        Value::I64(v) => json!(v),
        Value::U8(v) => json!(v),
        Value::U16(v) => json!(v),
        Value::U32(v) => json!(v),
        Value::U64(v) => json!(v),
        Value::F32(v) => f64_to_json((*v).into()),
        Value::F64(v) => f64_to_json(*v),
        Value::CF32(v) => ElementJson::to_json(*v),
        Value::CF64(v) => ElementJson::to_json(*v),
        Value::Bool(v) => Json::Bool(*v),
        Value::String(v) => Json::String(v.clone()),
        Value::ArrF64x7(v) => vec_to_json(v, f64_to_json),
        Value::VecI8(v) => json!(v),
        Value::VecI16(v) => json!(v),
        Value::VecI32(v) => json!(v),
        Value::VecI64(v) => json!(v),
        Value::VecU8(v) => json!(v),
        Value::VecU16(v) => json!(v),
        Value::VecU32(v) => json!(v),
        Value::VecU64(v) => json!(v),
        Value::VecF32(v) => vec_to_json(v, |x| f64_to_json(x.into())),
        Value::VecF64(v) => vec_to_json(v, f64_to_json),
        Value::VecCF32(v) => vec_to_json(v, ElementJson::to_json),
        Value::VecCF64(v) => vec_to_json(v, ElementJson::to_json),
        Value::VecString(v) => json!(v),
    }
}

fn vec_from_json<T, F: Fn(&Json) -> Option<T>>(json: &Json, f: F) -> Option<Vec<T>> {
    json.as_array()?.iter().map(f).collect()
}

/// Decode a bare value against a known datatype tag.
pub fn value_from_json(json: &Json, dtype: Datatype) -> Result<Value> {
    fn scalar<T: ElementJson>(json: &Json) -> Option<Value>
    where
        Value: From<T>,
    {
        T::from_json(json).map(Value::from)
    }

    fn vector<T: ElementJson>(json: &Json) -> Option<Value>
    where
        Value: From<Vec<T>>,
    {
        vec_from_json(json, T::from_json).map(Value::from)
    }

    let decoded = match dtype {
        Datatype::I8 => scalar::<i8>(json),
        Datatype::I16 => scalar::<i16>(json),
        Datatype::I32 => scalar::<i32>(json),
        Datatype::I64 => scalar::<i64>(json),
        Datatype::U8 => scalar::<u8>(json),
        Datatype::U16 => scalar::<u16>(json),
        Datatype::U32 => scalar::<u32>(json),
        Datatype::U64 => scalar::<u64>(json),
        Datatype::F32 => scalar::<f32>(json),
        Datatype::F64 => scalar::<f64>(json),
        Datatype::CF32 => scalar::<Complex32>(json),
        Datatype::CF64 => scalar::<Complex64>(json),
        Datatype::Bool => json.as_bool().map(Value::Bool),
        Datatype::String => json.as_str().map(|s| Value::String(s.to_owned())),
        Datatype::ArrF64x7 => vec_from_json(json, f64::from_json).and_then(|v| {
            let arr: [f64; 7] = v.try_into().ok()?;
            Some(Value::ArrF64x7(arr))
        }),
        Datatype::VecI8 => vector::<i8>(json),
        Datatype::VecI16 => vector::<i16>(json),
        Datatype::VecI32 => vector::<i32>(json),
        Datatype::VecI64 => vector::<i64>(json),
        Datatype::VecU8 => vector::<u8>(json),
        Datatype::VecU16 => vector::<u16>(json),
        Datatype::VecU32 => vector::<u32>(json),
        Datatype::VecU64 => vector::<u64>(json),
        Datatype::VecF32 => vector::<f32>(json),
        Datatype::VecF64 => vector::<f64>(json),
        Datatype::VecCF32 => vector::<Complex32>(json),
        Datatype::VecCF64 => vector::<Complex64>(json),
        Datatype::VecString => vec_from_json(json, |j| j.as_str().map(str::to_owned))
            .map(Value::VecString),
        Datatype::F80 | Datatype::CF80 | Datatype::VecF80 | Datatype::VecCF80 => {
            return Err(Error::unsupported(
                BACKEND_NAME,
                format!("cannot represent datatype {dtype}"),
            ));
        }
    };
    decoded.ok_or_else(|| {
        read_err(
            AffectedObject::Attribute,
            Reason::UnexpectedContent,
            format!("value {json} does not decode as {dtype}"),
        )
    })
}

/// Best-effort datatype inference for short-mode attributes.
pub fn infer_dtype(json: &Json) -> Datatype {
    match json {
        Json::Bool(_) => Datatype::Bool,
        Json::Number(n) if n.is_i64() => Datatype::I64,
        Json::Number(_) => Datatype::F64,
        Json::String(_) => Datatype::String,
        Json::Array(items) => match items.first() {
            Some(Json::Bool(_)) => Datatype::VecU8,
            Some(Json::Number(n)) if n.is_i64() => Datatype::VecI64,
            Some(Json::Number(_)) => Datatype::VecF64,
            _ => Datatype::VecString,
        },
        _ => Datatype::String,
    }
}

// --- dataset payloads ---

/// Build the JSON node for a fresh dataset.
pub fn new_dataset_node(dtype: Datatype, extent: &Extent, with_payload: bool) -> Json {
    let mut node = json!({
        "datatype": dtype.as_str(),
        "extent": extent.as_slice(),
        "attributes": {},
    });
    if with_payload {
        let len = volume(extent) as usize;
        node["data"] = Json::Array(vec![Json::Null; len]);
    }
    node
}

pub fn dataset_dtype(node: &Json) -> Result<Datatype> {
    node.get("datatype")
        .and_then(Json::as_str)
        .ok_or_else(|| {
            read_err(
                AffectedObject::Dataset,
                Reason::UnexpectedContent,
                "dataset node without a datatype tag",
            )
        })?
        .parse()
}

pub fn dataset_extent(node: &Json) -> Result<Extent> {
    node.get("extent")
        .and_then(Json::as_array)
        .and_then(|arr| arr.iter().map(Json::as_u64).collect::<Option<Extent>>())
        .ok_or_else(|| {
            read_err(
                AffectedObject::Dataset,
                Reason::UnexpectedContent,
                "dataset node without a well-formed extent",
            )
        })
}

/// Row-major odometer over a chunk: calls `f(k, flat)` with the k-th
/// chunk element's flat index inside the full dataset.
fn for_each_flat(
    offset: &[u64],
    extent: &[u64],
    total: &[u64],
    mut f: impl FnMut(usize, usize) -> Result<()>,
) -> Result<()> {
    let count = volume(extent);
    if count == 0 {
        return Ok(());
    }
    let rank = total.len();
    let mut strides = vec![1_u64; rank];
    for d in (0..rank.saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * total[d + 1];
    }
    let mut index = vec![0_u64; rank];
    for k in 0..count as usize {
        let flat: u64 = (0..rank).map(|d| (offset[d] + index[d]) * strides[d]).sum();
        f(k, flat as usize)?;
        for d in (0..rank).rev() {
            index[d] += 1;
            if index[d] < extent[d] {
                break;
            }
            index[d] = 0;
        }
    }
    Ok(())
}

fn payload_mut<'a>(node: &'a mut Json, position_name: &str) -> Result<Option<&'a mut Vec<Json>>> {
    match node.get_mut("data") {
        None => Ok(None), // template mode
        Some(Json::Array(data)) => Ok(Some(data)),
        Some(_) => Err(read_err(
            AffectedObject::Dataset,
            Reason::UnexpectedContent,
            format!("dataset '{position_name}' has a malformed payload"),
        )),
    }
}

/// Write one typed chunk into a dataset node.
pub fn write_chunk(
    node: &mut Json,
    position_name: &str,
    offset: &Offset,
    extent: &Extent,
    data: &BufferRef,
) -> Result<()> {
    let dtype = dataset_dtype(node)?;
    if dtype != data.dtype() {
        return Err(Error::usage(format!(
            "dataset '{position_name}' stores {dtype}, cannot write {}",
            data.dtype()
        )));
    }
    let total = dataset_extent(node)?;
    bounds_check(offset, extent, &total)?;

    fn write_typed<T: ElementJson>(
        payload: &mut [Json],
        data: &[T],
        offset: &Offset,
        extent: &Extent,
        total: &Extent,
    ) -> Result<()> {
        for_each_flat(offset, extent, total, |k, flat| {
            payload[flat] = data[k].to_json();
            Ok(())
        })
    }

    let expected_len = volume(&total) as usize;
    let Some(payload) = payload_mut(node, position_name)? else {
        return Ok(()); // template mode swallows payloads
    };
    if payload.len() != expected_len {
        return Err(read_err(
            AffectedObject::Dataset,
            Reason::UnexpectedContent,
            format!("dataset '{position_name}' payload length does not match its extent"),
        ));
    }
    match data {
        BufferRef::I8(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::I16(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::I32(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::I64(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::U8(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::U16(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::U32(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::U64(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::F32(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::F64(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::CF32(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::CF64(d) => write_typed(payload, d, offset, extent, &total),
        BufferRef::Bool(d) => write_typed(payload, d, offset, extent, &total),
    }
}

/// Read one typed chunk out of a dataset node into the target cell.
pub fn read_chunk(
    node: &Json,
    position_name: &str,
    offset: &Offset,
    extent: &Extent,
    target: &BufferTarget,
) -> Result<()> {
    let dtype = dataset_dtype(node)?;
    if dtype != target.dtype() {
        return Err(Error::usage(format!(
            "dataset '{position_name}' stores {dtype}, cannot read as {}",
            target.dtype()
        )));
    }
    let total = dataset_extent(node)?;
    bounds_check(offset, extent, &total)?;

    let payload = match node.get("data") {
        Some(Json::Array(data)) => {
            if data.len() != volume(&total) as usize {
                return Err(read_err(
                    AffectedObject::Dataset,
                    Reason::UnexpectedContent,
                    format!("dataset '{position_name}' payload length does not match its extent"),
                ));
            }
            Some(data)
        }
        None => {
            log::warn!("dataset '{position_name}' is a template, reads produce default values");
            None
        }
        Some(_) => {
            return Err(read_err(
                AffectedObject::Dataset,
                Reason::UnexpectedContent,
                format!("dataset '{position_name}' has a malformed payload"),
            ));
        }
    };

    fn read_typed<T: ElementJson>(
        payload: Option<&Vec<Json>>,
        cell: &opmd_io::TargetCell<T>,
        position_name: &str,
        offset: &Offset,
        extent: &Extent,
        total: &Extent,
    ) -> Result<()> {
        let mut out = vec![T::default(); volume(extent) as usize];
        if let Some(payload) = payload {
            for_each_flat(offset, extent, total, |k, flat| {
                let json = &payload[flat];
                if json.is_null() {
                    return Ok(()); // unwritten region
                }
                out[k] = T::from_json(json).ok_or_else(|| {
                    read_err(
                        AffectedObject::Dataset,
                        Reason::UnexpectedContent,
                        format!("dataset '{position_name}' holds a malformed element"),
                    )
                })?;
                Ok(())
            })?;
        }
        *cell.lock() = Some(out);
        Ok(())
    }

    match target {
        BufferTarget::I8(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::I16(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::I32(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::I64(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::U8(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::U16(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::U32(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::U64(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::F32(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::F64(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::CF32(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::CF64(c) => read_typed(payload, c, position_name, offset, extent, &total),
        BufferTarget::Bool(c) => read_typed(payload, c, position_name, offset, extent, &total),
    }
}

/// Grow a dataset in place; the new extent must dominate the old one.
pub fn extend_dataset_node(node: &mut Json, position_name: &str, new_extent: &Extent) -> Result<()> {
    let old_extent = dataset_extent(node)?;
    if new_extent.len() != old_extent.len() {
        return Err(Error::usage(format!(
            "cannot change the rank of dataset '{position_name}' from {} to {}",
            old_extent.len(),
            new_extent.len()
        )));
    }
    if old_extent.iter().zip(new_extent).any(|(old, new)| new < old) {
        return Err(Error::usage(format!(
            "cannot shrink dataset '{position_name}' from {old_extent:?} to {new_extent:?}"
        )));
    }

    if let Some(Json::Array(old_payload)) = node.get("data") {
        // remap the old row-major payload into the grown shape
        let mut new_payload = vec![Json::Null; volume(new_extent) as usize];
        let old_payload = old_payload.clone();
        let zero_offset = Offset::from_elem(0, old_extent.len());
        for_each_flat(&zero_offset, &old_extent, new_extent, |k, flat| {
            new_payload[flat] = old_payload[k].clone();
            Ok(())
        })?;
        node["data"] = Json::Array(new_payload);
    }
    node["extent"] = Json::Array(new_extent.iter().map(|&e| json!(e)).collect());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn group_navigation() {
        let mut root = empty_group();
        let segments: Vec<String> = vec!["data".into(), "100".into()];
        ensure_group(&mut root, &segments);
        assert!(find_group(&root, &segments).is_some());
        assert!(find_group(&root, &["data".to_owned(), "200".to_owned()]).is_none());
    }

    #[test]
    fn attribute_values_round_trip() {
        let cases = vec![
            Value::from(-3_i8),
            Value::from(u64::MAX),
            Value::from(1.5_f32),
            Value::from(f64::INFINITY),
            Value::from(f64::NEG_INFINITY),
            Value::from(true),
            Value::from("text"),
            Value::from(String::new()),
            Value::from([0.0_f64; 7]),
            Value::from(Vec::<f64>::new()),
            Value::from(vec![1_u32, 2, 3]),
            Value::from(vec!["a".to_owned(), String::new()]),
            Value::from(num_complex::Complex64::new(1.0, -2.0)),
            Value::from(vec![num_complex::Complex32::new(0.5, 0.25)]),
        ];
        for value in cases {
            let encoded = value_to_json(&value);
            let decoded = value_from_json(&encoded, value.dtype()).unwrap();
            similar_asserts::assert_eq!(decoded, value, "via {encoded}");
        }
    }

    #[test]
    fn nan_round_trips_as_nan() {
        let encoded = value_to_json(&Value::from(f64::NAN));
        let Value::F64(decoded) = value_from_json(&encoded, Datatype::F64).unwrap() else {
            panic!("wrong tag");
        };
        assert!(decoded.is_nan());
    }

    #[test]
    fn long_double_is_refused() {
        let err = value_from_json(&Json::Null, Datatype::F80).unwrap_err();
        assert!(matches!(err, Error::UnsupportedInBackend { .. }));
    }

    #[test]
    fn chunk_round_trip_2d() {
        let extent = Extent::from_slice(&[3, 4]);
        let mut node = new_dataset_node(Datatype::I32, &extent, true);

        // write rows 1..3, cols 1..3
        let data: Arc<[i32]> = vec![1, 2, 3, 4].into();
        write_chunk(
            &mut node,
            "x",
            &Offset::from_slice(&[1, 1]),
            &Extent::from_slice(&[2, 2]),
            &i32::make_buffer(data),
        )
        .unwrap();

        let cell: opmd_io::TargetCell<i32> = Arc::new(parking_lot::Mutex::new(None));
        read_chunk(
            &node,
            "x",
            &Offset::from_slice(&[1, 1]),
            &Extent::from_slice(&[2, 2]),
            &i32::make_target(Arc::clone(&cell)),
        )
        .unwrap();
        assert_eq!(cell.lock().take().unwrap(), vec![1, 2, 3, 4]);

        // unwritten cells read as default
        let full: opmd_io::TargetCell<i32> = Arc::new(parking_lot::Mutex::new(None));
        read_chunk(
            &node,
            "x",
            &Offset::from_slice(&[0, 0]),
            &Extent::from_slice(&[3, 4]),
            &i32::make_target(Arc::clone(&full)),
        )
        .unwrap();
        let full = full.lock().take().unwrap();
        assert_eq!(full[5], 1);
        assert_eq!(full[6], 2);
        assert_eq!(full[0], 0);
    }

    #[test]
    fn dtype_mismatch_is_refused() {
        let mut node = new_dataset_node(Datatype::F64, &Extent::from_slice(&[2]), true);
        let data: Arc<[i32]> = vec![1, 2].into();
        let err = write_chunk(
            &mut node,
            "x",
            &Offset::from_slice(&[0]),
            &Extent::from_slice(&[2]),
            &i32::make_buffer(data),
        )
        .unwrap_err();
        assert!(matches!(err, Error::WrongApiUsage(_)));
    }

    #[test]
    fn extension_preserves_content() {
        let mut node = new_dataset_node(Datatype::U64, &Extent::from_slice(&[2, 2]), true);
        let data: Arc<[u64]> = vec![1, 2, 3, 4].into();
        write_chunk(
            &mut node,
            "x",
            &Offset::from_slice(&[0, 0]),
            &Extent::from_slice(&[2, 2]),
            &u64::make_buffer(data),
        )
        .unwrap();

        extend_dataset_node(&mut node, "x", &Extent::from_slice(&[2, 3])).unwrap();
        assert!(extend_dataset_node(&mut node, "x", &Extent::from_slice(&[1, 3])).is_err());

        let cell: opmd_io::TargetCell<u64> = Arc::new(parking_lot::Mutex::new(None));
        read_chunk(
            &node,
            "x",
            &Offset::from_slice(&[0, 0]),
            &Extent::from_slice(&[2, 2]),
            &u64::make_target(Arc::clone(&cell)),
        )
        .unwrap();
        assert_eq!(cell.lock().take().unwrap(), vec![1, 2, 3, 4]);
    }
}
