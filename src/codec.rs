//! Binary codec for request log records.
//!
//! This module handles serialization and deserialization of typed records. It
//! is pure data transformation -- no file I/O, no locking, no index management.
//!
//! The wire format is a sequence of MessagePack atoms, one per field, in
//! declaration order: first the three common fields (`inc_id`, kind tag,
//! `json_body`), then the kind-specific fields. There is no outer framing;
//! record boundaries live in the head index. Integers use the narrowest
//! MessagePack form, which is why re-stamping a record with a new id must go
//! through [`replace_common`] and its length check.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};

use bytes::Bytes;

use crate::error::CodecError;
use crate::types::{CommonReqData, ReqLog, ReqLogKind};

impl From<rmp::decode::ValueReadError> for CodecError {
    fn from(err: rmp::decode::ValueReadError) -> CodecError {
        match err {
            rmp::decode::ValueReadError::TypeMismatch(marker) => {
                CodecError::TypeMismatch(format!("unexpected marker {marker:?}"))
            }
            _ => CodecError::Truncated,
        }
    }
}

impl From<rmp::decode::NumValueReadError> for CodecError {
    fn from(err: rmp::decode::NumValueReadError) -> CodecError {
        match err {
            rmp::decode::NumValueReadError::TypeMismatch(marker) => {
                CodecError::TypeMismatch(format!("unexpected marker {marker:?}"))
            }
            rmp::decode::NumValueReadError::OutOfRange => {
                CodecError::TypeMismatch("integer out of range for field".to_string())
            }
            _ => CodecError::Truncated,
        }
    }
}

/// Pack a typed record into its wire form.
///
/// Emits the common prefix followed by the kind-specific fields of the
/// variant. The kind tag written is the variant's own tag
/// ([`ReqLog::kind`]), so a record built through the `ReqLog` constructors
/// always round-trips.
///
/// # Arguments
///
/// * `record` - The record to serialize.
///
/// # Returns
///
/// A `Vec<u8>` containing the packed record body, ready for the segment
/// store.
pub fn pack(record: &ReqLog) -> Vec<u8> {
    let mut buf = Vec::new();
    write_common(&mut buf, record.common().inc_id, record.kind(), &record.common().json_body);

    match record {
        ReqLog::NoAddition { .. }
        | ReqLog::NoAdditionNeedBackup { .. }
        | ReqLog::NoAdditionNoRollback { .. }
        | ReqLog::BuildPurchaseSimCallback { .. } => {}
        ReqLog::CronJob { cron_time, .. } => {
            write_i64(&mut buf, *cron_time);
        }
        ReqLog::RebuildCron {
            cron_time,
            replayed_ids,
            ..
        } => {
            write_i64(&mut buf, *cron_time);
            write_u32_list(&mut buf, replayed_ids);
        }
        ReqLog::UpdateRecCallback {
            old_items,
            new_items,
            ..
        } => {
            write_u32_list(&mut buf, old_items);
            write_u32_list(&mut buf, new_items);
        }
        ReqLog::WithTimestamp { timestamp, .. } => {
            write_i64(&mut buf, *timestamp);
        }
        ReqLog::Index {
            scd_list,
            timestamp,
            ..
        } => {
            write_str_list(&mut buf, scd_list);
            write_i64(&mut buf, *timestamp);
        }
        ReqLog::CreateOrUpdateDoc { timestamp, .. } => {
            write_i64(&mut buf, *timestamp);
        }
        ReqLog::Product { uuid_list, .. } => {
            write_str_list(&mut buf, uuid_list);
        }
        ReqLog::UpdateConfig { config_files, .. } => {
            write_bin_map(&mut buf, config_files);
        }
        ReqLog::RecommendIndex {
            user_scd_list,
            order_scd_list,
            timestamp,
            ..
        } => {
            write_str_list(&mut buf, user_scd_list);
            write_str_list(&mut buf, order_scd_list);
            write_i64(&mut buf, *timestamp);
        }
        ReqLog::RebuildFromScd {
            scd_list,
            timestamp,
            replayed_ids,
            ..
        } => {
            write_str_list(&mut buf, scd_list);
            write_i64(&mut buf, *timestamp);
            write_u32_list(&mut buf, replayed_ids);
        }
    }

    buf
}

/// Unpack a full record from its wire form.
///
/// Dispatch is by the kind tag read from the common prefix. For the two tags
/// shared by multiple record shapes (`Callback`, `CronJob`) the shorter shape
/// is chosen when no atoms remain after its fields, the longer one otherwise.
///
/// # Arguments
///
/// * `bytes` - The packed record body, exactly as written by [`pack`].
///
/// # Errors
///
/// Returns [`CodecError::Truncated`] if the buffer ends early,
/// [`CodecError::TypeMismatch`] on a wrong field marker,
/// [`CodecError::UnknownKind`] for a tag outside the closed set, and
/// [`CodecError::TrailingGarbage`] if bytes remain after the last field.
pub fn unpack(bytes: &[u8]) -> Result<ReqLog, CodecError> {
    let mut cur = Cursor::new(bytes);
    let common = read_common(&mut cur)?;

    let record = match common.kind {
        ReqLogKind::NoAddition => ReqLog::NoAddition { common },
        ReqLogKind::NoAdditionNeedBackup => ReqLog::NoAdditionNeedBackup { common },
        ReqLogKind::NoAdditionNoRollback => ReqLog::NoAdditionNoRollback { common },
        ReqLogKind::CronJob => {
            let cron_time = read_i64(&mut cur)?;
            if has_remaining(&cur) {
                let replayed_ids = read_u32_list(&mut cur)?;
                ReqLog::RebuildCron {
                    common,
                    cron_time,
                    replayed_ids,
                }
            } else {
                ReqLog::CronJob { common, cron_time }
            }
        }
        ReqLogKind::Callback => {
            if has_remaining(&cur) {
                let old_items = read_u32_list(&mut cur)?;
                let new_items = read_u32_list(&mut cur)?;
                ReqLog::UpdateRecCallback {
                    common,
                    old_items,
                    new_items,
                }
            } else {
                ReqLog::BuildPurchaseSimCallback { common }
            }
        }
        ReqLogKind::WithTimestamp => {
            let timestamp = read_i64(&mut cur)?;
            ReqLog::WithTimestamp { common, timestamp }
        }
        ReqLogKind::Index => {
            let scd_list = read_str_list(&mut cur)?;
            let timestamp = read_i64(&mut cur)?;
            ReqLog::Index {
                common,
                scd_list,
                timestamp,
            }
        }
        ReqLogKind::CreateOrUpdateDoc => {
            let timestamp = read_i64(&mut cur)?;
            ReqLog::CreateOrUpdateDoc { common, timestamp }
        }
        ReqLogKind::Product => {
            let uuid_list = read_str_list(&mut cur)?;
            ReqLog::Product { common, uuid_list }
        }
        ReqLogKind::UpdateConfig => {
            let config_files = read_bin_map(&mut cur)?;
            ReqLog::UpdateConfig {
                common,
                config_files,
            }
        }
        ReqLogKind::RecommendIndex => {
            let user_scd_list = read_str_list(&mut cur)?;
            let order_scd_list = read_str_list(&mut cur)?;
            let timestamp = read_i64(&mut cur)?;
            ReqLog::RecommendIndex {
                common,
                user_scd_list,
                order_scd_list,
                timestamp,
            }
        }
        ReqLogKind::RebuildFromScd => {
            let scd_list = read_str_list(&mut cur)?;
            let timestamp = read_i64(&mut cur)?;
            let replayed_ids = read_u32_list(&mut cur)?;
            ReqLog::RebuildFromScd {
                common,
                scd_list,
                timestamp,
                replayed_ids,
            }
        }
    };

    if has_remaining(&cur) {
        return Err(CodecError::TrailingGarbage);
    }
    Ok(record)
}

/// Decode only the common prefix of a packed record.
///
/// Reads exactly the three common atoms and reports how many bytes they
/// occupy. Used on the append path (the log needs `{id, kind}` without
/// decoding kind-specific fields) and by [`replace_common`].
///
/// # Arguments
///
/// * `bytes` - A packed record body, or at least its common prefix.
///
/// # Returns
///
/// The decoded [`CommonReqData`] and the byte length of the packed prefix.
///
/// # Errors
///
/// Same failure modes as [`unpack`], except trailing bytes are expected and
/// never an error here.
pub fn unpack_common(bytes: &[u8]) -> Result<(CommonReqData, usize), CodecError> {
    let mut cur = Cursor::new(bytes);
    let common = read_common(&mut cur)?;
    Ok((common, cur.position() as usize))
}

/// Splice a new common prefix over an existing packed record, preserving the
/// kind-specific tail.
///
/// The replacement is byte-level: the new prefix is fully re-packed and must
/// occupy exactly as many bytes as the one it replaces, which holds when only
/// `inc_id` changes within the same MessagePack integer width. The kind must
/// not change, since the tail is only meaningful under its original tag.
///
/// # Arguments
///
/// * `packed` - A packed record body.
/// * `new_common` - The common payload to stamp over the prefix.
///
/// # Errors
///
/// Returns [`CodecError::TypeMismatch`] if `new_common.kind` differs from the
/// packed record's kind, and [`CodecError::PrefixLengthMismatch`] if the
/// re-packed prefix length differs from the original's.
pub fn replace_common(packed: &[u8], new_common: &CommonReqData) -> Result<Vec<u8>, CodecError> {
    let (old_common, old_prefix_len) = unpack_common(packed)?;
    if new_common.kind != old_common.kind {
        return Err(CodecError::TypeMismatch(format!(
            "cannot replace kind {:?} with {:?}",
            old_common.kind, new_common.kind
        )));
    }

    let mut new_prefix = Vec::new();
    write_common(
        &mut new_prefix,
        new_common.inc_id,
        new_common.kind,
        &new_common.json_body,
    );
    if new_prefix.len() != old_prefix_len {
        return Err(CodecError::PrefixLengthMismatch);
    }

    new_prefix.extend_from_slice(&packed[old_prefix_len..]);
    Ok(new_prefix)
}

fn write_common(buf: &mut Vec<u8>, inc_id: u32, kind: ReqLogKind, json_body: &str) {
    write_u32(buf, inc_id);
    write_u32(buf, kind.as_u32());
    write_str(buf, json_body);
}

fn read_common(cur: &mut Cursor<&[u8]>) -> Result<CommonReqData, CodecError> {
    let inc_id = read_u32(cur)?;
    let raw_kind = read_u32(cur)?;
    let kind = ReqLogKind::from_u32(raw_kind).ok_or(CodecError::UnknownKind(raw_kind))?;
    let json_body = read_string(cur)?;
    Ok(CommonReqData {
        inc_id,
        kind,
        json_body,
    })
}

fn has_remaining(cur: &Cursor<&[u8]>) -> bool {
    (cur.position() as usize) < cur.get_ref().len()
}

// Writes below go to a Vec and cannot fail; the expect messages document that.

fn write_u32(buf: &mut Vec<u8>, value: u32) {
    rmp::encode::write_uint(buf, u64::from(value)).expect("writing to a Vec cannot fail");
}

fn write_i64(buf: &mut Vec<u8>, value: i64) {
    rmp::encode::write_sint(buf, value).expect("writing to a Vec cannot fail");
}

fn write_str(buf: &mut Vec<u8>, value: &str) {
    rmp::encode::write_str(buf, value).expect("writing to a Vec cannot fail");
}

fn write_u32_list(buf: &mut Vec<u8>, values: &[u32]) {
    rmp::encode::write_array_len(buf, values.len() as u32).expect("writing to a Vec cannot fail");
    for value in values {
        write_u32(buf, *value);
    }
}

fn write_str_list(buf: &mut Vec<u8>, values: &[String]) {
    rmp::encode::write_array_len(buf, values.len() as u32).expect("writing to a Vec cannot fail");
    for value in values {
        write_str(buf, value);
    }
}

fn write_bin_map(buf: &mut Vec<u8>, map: &BTreeMap<String, Bytes>) {
    rmp::encode::write_map_len(buf, map.len() as u32).expect("writing to a Vec cannot fail");
    for (name, contents) in map {
        write_str(buf, name);
        rmp::encode::write_bin(buf, contents).expect("writing to a Vec cannot fail");
    }
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32, CodecError> {
    Ok(rmp::decode::read_int(cur)?)
}

fn read_i64(cur: &mut Cursor<&[u8]>) -> Result<i64, CodecError> {
    Ok(rmp::decode::read_int(cur)?)
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String, CodecError> {
    let len = rmp::decode::read_str_len(cur)? as usize;
    let mut raw = vec![0u8; len];
    cur.read_exact(&mut raw).map_err(|_| CodecError::Truncated)?;
    String::from_utf8(raw)
        .map_err(|_| CodecError::TypeMismatch("invalid UTF-8 in string field".to_string()))
}

fn read_u32_list(cur: &mut Cursor<&[u8]>) -> Result<Vec<u32>, CodecError> {
    let len = rmp::decode::read_array_len(cur)?;
    let mut values = Vec::new();
    for _ in 0..len {
        values.push(read_u32(cur)?);
    }
    Ok(values)
}

fn read_str_list(cur: &mut Cursor<&[u8]>) -> Result<Vec<String>, CodecError> {
    let len = rmp::decode::read_array_len(cur)?;
    let mut values = Vec::new();
    for _ in 0..len {
        values.push(read_string(cur)?);
    }
    Ok(values)
}

fn read_bin_map(cur: &mut Cursor<&[u8]>) -> Result<BTreeMap<String, Bytes>, CodecError> {
    let len = rmp::decode::read_map_len(cur)?;
    let mut map = BTreeMap::new();
    for _ in 0..len {
        let name = read_string(cur)?;
        let bin_len = rmp::decode::read_bin_len(cur)? as usize;
        let mut raw = vec![0u8; bin_len];
        cur.read_exact(&mut raw).map_err(|_| CodecError::Truncated)?;
        map.insert(name, Bytes::from(raw));
    }
    Ok(map)
}
