//! Fixed-layout binary encoding for the wire formats §4.2 and §6 pin down
//! exactly: shapes, and dataset metadata. Everything else on the fabric
//! (queries, query results, batches as a whole) travels as `serde_json`,
//! which is the wire format the rest of this workspace already uses for
//! structured payloads.

use crate::shape::{Geometry, Mbr, PartitionAssignment, RecId, Shape, TwoLayerClass};
use crate::{ErrorKind, Result};

fn push_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn read_f64(buf: &[u8], pos: &mut usize) -> Result<f64> {
    let bytes = buf
        .get(*pos..*pos + 8)
        .ok_or_else(too_short)?
        .try_into()
        .unwrap();
    *pos += 8;
    Ok(f64::from_le_bytes(bytes))
}

fn push_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn read_i64(buf: &[u8], pos: &mut usize) -> Result<i64> {
    let bytes = buf
        .get(*pos..*pos + 8)
        .ok_or_else(too_short)?
        .try_into()
        .unwrap();
    *pos += 8;
    Ok(i64::from_le_bytes(bytes))
}

fn push_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn read_u32(buf: &[u8], pos: &mut usize) -> Result<u32> {
    let bytes = buf
        .get(*pos..*pos + 4)
        .ok_or_else(too_short)?
        .try_into()
        .unwrap();
    *pos += 4;
    Ok(u32::from_le_bytes(bytes))
}

fn too_short() -> crate::Error {
    ErrorKind::Serialization.with_message("buffer too short while deserializing wire message")
}

fn class_tag(class: TwoLayerClass) -> u8 {
    match class {
        TwoLayerClass::A => 0,
        TwoLayerClass::B => 1,
        TwoLayerClass::C => 2,
        TwoLayerClass::D => 3,
    }
}

fn class_from_tag(tag: u8) -> Result<TwoLayerClass> {
    match tag {
        0 => Ok(TwoLayerClass::A),
        1 => Ok(TwoLayerClass::B),
        2 => Ok(TwoLayerClass::C),
        3 => Ok(TwoLayerClass::D),
        _ => Err(ErrorKind::Serialization.with_message("unknown two-layer class tag")),
    }
}

fn geometry_tag(geometry: &Geometry) -> u8 {
    match geometry {
        Geometry::Point { .. } => 0,
        Geometry::LineString { .. } => 1,
        Geometry::Polygon { .. } => 2,
        Geometry::Box { .. } => 3,
    }
}

/// Packs a [`Shape`] as `(recID, partitionCount, partitions[2*partitionCount],
/// vertexCount, coords[2*vertexCount])`, per §4.2, prefixed with a one-byte
/// geometry tag so `Box`/`Point` round-trip without ambiguity.
pub fn pack_shape(shape: &Shape) -> Vec<u8> {
    let mut buf = Vec::new();
    push_i64(&mut buf, shape.rec_id);
    push_u32(&mut buf, shape.partitions.len() as u32);
    for p in &shape.partitions {
        push_i64(&mut buf, p.partition_id);
        buf.push(class_tag(p.class));
    }
    buf.push(geometry_tag(&shape.geometry));
    let coords = geometry_coords(&shape.geometry);
    push_u32(&mut buf, coords.len() as u32);
    for (x, y) in coords {
        push_f64(&mut buf, x);
        push_f64(&mut buf, y);
    }
    buf
}

fn geometry_coords(geometry: &Geometry) -> Vec<(f64, f64)> {
    match geometry {
        Geometry::Point { x, y } => vec![(*x, *y)],
        Geometry::LineString { coords } | Geometry::Polygon { coords } => coords.clone(),
        Geometry::Box { min, max } => vec![*min, *max],
    }
}

fn geometry_from_tag(tag: u8, coords: Vec<(f64, f64)>) -> Result<Geometry> {
    match tag {
        0 => {
            let (x, y) = *coords
                .first()
                .ok_or_else(|| ErrorKind::Serialization.with_message("point with no coords"))?;
            Ok(Geometry::Point { x, y })
        }
        1 => Ok(Geometry::LineString { coords }),
        2 => Ok(Geometry::Polygon { coords }),
        3 => {
            if coords.len() != 2 {
                return Err(ErrorKind::Serialization.with_message("box must have exactly 2 coords"));
            }
            Ok(Geometry::Box {
                min: coords[0],
                max: coords[1],
            })
        }
        _ => Err(ErrorKind::Serialization.with_message("unknown geometry tag")),
    }
}

/// Inverse of [`pack_shape`]. `deserialize(serialize(x)) == x` structurally (§8.4).
pub fn unpack_shape(buf: &[u8]) -> Result<Shape> {
    let mut pos = 0usize;
    let rec_id: RecId = read_i64(buf, &mut pos)?;
    let partition_count = read_u32(buf, &mut pos)? as usize;
    let mut partitions = Vec::with_capacity(partition_count);
    for _ in 0..partition_count {
        let partition_id = read_i64(buf, &mut pos)?;
        let class_byte = *buf.get(pos).ok_or_else(too_short)?;
        pos += 1;
        partitions.push(PartitionAssignment {
            partition_id,
            class: class_from_tag(class_byte)?,
        });
    }
    let geom_tag = *buf.get(pos).ok_or_else(too_short)?;
    pos += 1;
    let vertex_count = read_u32(buf, &mut pos)? as usize;
    let mut coords = Vec::with_capacity(vertex_count);
    for _ in 0..vertex_count {
        let x = read_f64(buf, &mut pos)?;
        let y = read_f64(buf, &mut pos)?;
        coords.push((x, y));
    }
    let geometry = geometry_from_tag(geom_tag, coords)?;
    let mut shape = Shape::new(rec_id, geometry);
    shape.partitions = partitions;
    Ok(shape)
}

/// Packs a list of shapes as a count header followed by each shape's own
/// length-prefixed [`pack_shape`] encoding — the wire form of a [`Batch`]
/// (§3), including the empty list for an end-of-stream sentinel batch.
///
/// [`Batch`]: crate::partitioning::router::Batch
pub fn pack_shapes(shapes: &[Shape]) -> Vec<u8> {
    let mut buf = Vec::new();
    push_u32(&mut buf, shapes.len() as u32);
    for shape in shapes {
        let packed = pack_shape(shape);
        push_u32(&mut buf, packed.len() as u32);
        buf.extend_from_slice(&packed);
    }
    buf
}

pub fn unpack_shapes(buf: &[u8]) -> Result<Vec<Shape>> {
    let mut pos = 0usize;
    let count = read_u32(buf, &mut pos)? as usize;
    let mut shapes = Vec::with_capacity(count);
    for _ in 0..count {
        let len = read_u32(buf, &mut pos)? as usize;
        let slice = buf.get(pos..pos + len).ok_or_else(too_short)?;
        shapes.push(unpack_shape(slice)?);
        pos += len;
    }
    Ok(shapes)
}

/// Packs a bare MBR as four little-endian doubles, used for the
/// `GlobalDataspace` broadcast (§4.2), which carries nothing else.
pub fn pack_mbr(mbr: &Mbr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    push_f64(&mut buf, mbr.x_min);
    push_f64(&mut buf, mbr.y_min);
    push_f64(&mut buf, mbr.x_max);
    push_f64(&mut buf, mbr.y_max);
    buf
}

pub fn unpack_mbr(buf: &[u8]) -> Result<Mbr> {
    let mut pos = 0usize;
    Ok(Mbr::new(
        read_f64(buf, &mut pos)?,
        read_f64(buf, &mut pos)?,
        read_f64(buf, &mut pos)?,
        read_f64(buf, &mut pos)?,
    ))
}

/// Dataset metadata, as broadcast/gathered alongside partitioned data.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetMetadata {
    pub persist: bool,
    pub internal_id: i64,
    pub data_type: u32,
    pub file_type: u32,
    pub path: String,
    pub dataspace: Option<Mbr>,
}

/// Packs dataset metadata as `(persist, internalId, dataType, fileType,
/// pathLen, path, hasDataspace, [dataspace MBR])`, per §6.
pub fn pack_dataset_metadata(meta: &DatasetMetadata) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(meta.persist as u8);
    push_i64(&mut buf, meta.internal_id);
    push_u32(&mut buf, meta.data_type);
    push_u32(&mut buf, meta.file_type);
    let path_bytes = meta.path.as_bytes();
    push_u32(&mut buf, path_bytes.len() as u32);
    buf.extend_from_slice(path_bytes);
    buf.push(meta.dataspace.is_some() as u8);
    if let Some(mbr) = meta.dataspace {
        push_f64(&mut buf, mbr.x_min);
        push_f64(&mut buf, mbr.y_min);
        push_f64(&mut buf, mbr.x_max);
        push_f64(&mut buf, mbr.y_max);
    }
    buf
}

pub fn unpack_dataset_metadata(buf: &[u8]) -> Result<DatasetMetadata> {
    let mut pos = 0usize;
    let persist = *buf.get(pos).ok_or_else(too_short)? != 0;
    pos += 1;
    let internal_id = read_i64(buf, &mut pos)?;
    let data_type = read_u32(buf, &mut pos)?;
    let file_type = read_u32(buf, &mut pos)?;
    let path_len = read_u32(buf, &mut pos)? as usize;
    let path_bytes = buf.get(pos..pos + path_len).ok_or_else(too_short)?;
    let path = String::from_utf8(path_bytes.to_vec())
        .map_err(|e| ErrorKind::Serialization.with_source(e))?;
    pos += path_len;
    let has_dataspace = *buf.get(pos).ok_or_else(too_short)? != 0;
    pos += 1;
    let dataspace = if has_dataspace {
        Some(Mbr::new(
            read_f64(buf, &mut pos)?,
            read_f64(buf, &mut pos)?,
            read_f64(buf, &mut pos)?,
            read_f64(buf, &mut pos)?,
        ))
    } else {
        None
    };
    Ok(DatasetMetadata {
        persist,
        internal_id,
        data_type,
        file_type,
        path,
        dataspace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::Geometry;

    #[test]
    fn shape_round_trips_through_the_wire_format() {
        let mut shape = Shape::new(
            42,
            Geometry::Polygon {
                coords: vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            },
        );
        shape.assign_partition(3, TwoLayerClass::A);
        shape.assign_partition(7, TwoLayerClass::D);

        let packed = pack_shape(&shape);
        let unpacked = unpack_shape(&packed).unwrap();
        assert_eq!(shape, unpacked);
    }

    #[test]
    fn shape_list_round_trips_including_the_empty_sentinel() {
        let shapes = vec![
            Shape::new(1, Geometry::Point { x: 1.0, y: 1.0 }),
            Shape::new(2, Geometry::Point { x: 2.0, y: 2.0 }),
        ];
        assert_eq!(unpack_shapes(&pack_shapes(&shapes)).unwrap(), shapes);
        assert_eq!(unpack_shapes(&pack_shapes(&[])).unwrap(), Vec::<Shape>::new());
    }

    #[test]
    fn mbr_round_trips_through_the_wire_format() {
        let mbr = Mbr::new(1.5, -2.5, 10.0, 20.0);
        assert_eq!(unpack_mbr(&pack_mbr(&mbr)).unwrap(), mbr);
    }

    #[test]
    fn dataset_metadata_round_trips_with_and_without_dataspace() {
        let meta = DatasetMetadata {
            persist: true,
            internal_id: 7,
            data_type: 2,
            file_type: 1,
            path: "/tmp/dataset.bin".to_string(),
            dataspace: Some(Mbr::new(0.0, 0.0, 100.0, 100.0)),
        };
        let packed = pack_dataset_metadata(&meta);
        assert_eq!(unpack_dataset_metadata(&packed).unwrap(), meta);

        let meta_no_bounds = DatasetMetadata {
            dataspace: None,
            ..meta
        };
        let packed = pack_dataset_metadata(&meta_no_bounds);
        assert_eq!(unpack_dataset_metadata(&packed).unwrap(), meta_no_bounds);
    }
}
