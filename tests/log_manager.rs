//! End-to-end tests for the request log: on-disk layout, the prepare/append
//! protocol, corruption detection, and crash recovery.

use shardlog::{
    Error, HEAD_ENTRY_SIZE, ReqLog, ReqLogConfig, ReqLogMgr, SEGMENT_RECORD_CAPACITY, codec,
};

fn open_mgr(dir: &std::path::Path) -> ReqLogMgr {
    ReqLogMgr::open(ReqLogConfig::new(dir)).expect("open should succeed")
}

fn append_no_addition(mgr: &ReqLogMgr, json: &str) -> u32 {
    let mut req = ReqLog::no_addition(json);
    let id = mgr.prepare(&mut req, true).expect("prepare should succeed");
    mgr.append_typed(&req).expect("append should succeed");
    id
}

fn file_len(path: &std::path::Path) -> u64 {
    std::fs::metadata(path).expect("metadata").len()
}

#[test]
fn single_append_round_trips_with_expected_layout() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mgr = open_mgr(dir.path());

    let mut req = ReqLog::no_addition("{\"x\":1}");
    let id = mgr.prepare(&mut req, true).expect("prepare");
    assert_eq!(id, 1);
    mgr.append_typed(&req).expect("append");

    assert_eq!(mgr.last_success_id(), 1);

    // The stored body is exactly the packed record with its stamped id.
    let expected_body = codec::pack(&req);
    let (head, body) = mgr.get_req(1).expect("lookup").expect("record exists");
    assert_eq!(body, expected_body);
    assert_eq!(head.inc_id, 1);
    assert_eq!(head.req_data_offset, 0);
    assert_eq!(head.req_data_len, expected_body.len() as u32);

    // One 20-byte header, one body's worth of segment bytes.
    assert_eq!(
        file_len(&dir.path().join("head.req.log")),
        HEAD_ENTRY_SIZE as u64
    );
    assert_eq!(
        file_len(&dir.path().join("0.req.log")),
        expected_body.len() as u64
    );
}

#[test]
fn segment_rolls_after_one_thousand_records() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mgr = open_mgr(dir.path());

    let count = SEGMENT_RECORD_CAPACITY + 1;
    for _ in 0..count {
        append_no_addition(&mgr, "{}");
    }

    assert_eq!(mgr.last_success_id(), 1001);
    assert_eq!(
        file_len(&dir.path().join("head.req.log")),
        u64::from(count) * HEAD_ENTRY_SIZE as u64
    );

    // Record 1000 is the last body in segment 0.
    let (head_1000, body_1000) = mgr.get_req(1000).expect("lookup").expect("exists");
    assert_eq!(
        file_len(&dir.path().join("0.req.log")),
        u64::from(head_1000.req_data_offset) + body_1000.len() as u64
    );

    // Record 1001 opens segment 1 at offset 0.
    let (head_1001, body_1001) = mgr.get_req(1001).expect("lookup").expect("exists");
    assert_eq!(head_1001.req_data_offset, 0);
    assert_eq!(
        file_len(&dir.path().join("1.req.log")),
        body_1001.len() as u64
    );

    let decoded = codec::unpack(&body_1001).expect("decode");
    assert_eq!(decoded.common().inc_id, 1001);
}

#[test]
fn abandoned_prepare_leaves_a_permanent_gap() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mgr = open_mgr(dir.path());

    for n in 1..=4u32 {
        assert_eq!(append_no_addition(&mgr, "{}"), n);
    }

    // Prepare id 5, abandon it, then commit id 6.
    let mut doomed = ReqLog::no_addition("{\"doomed\":true}");
    assert_eq!(mgr.prepare(&mut doomed, true).expect("prepare"), 5);
    mgr.del_prepared();
    assert_eq!(append_no_addition(&mgr, "{\"n\":6}"), 6);

    // No header exists for id 5; the lookup falls through to id 6.
    assert_eq!(mgr.head_count(), 5);
    let (head, body) = mgr.get_req(5).expect("lookup").expect("fallback record");
    assert_eq!(head.inc_id, 6);
    let decoded = codec::unpack(&body).expect("decode");
    assert_eq!(decoded.common().json_body, "{\"n\":6}");

    // Listings from the gap start at the next committed id.
    let ids: Vec<u32> = mgr
        .get_req_ids(5, 10, false)
        .expect("list")
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    assert_eq!(ids, vec![6]);
}

#[test]
fn flipped_segment_byte_is_reported_as_corrupt() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mgr = open_mgr(dir.path());
    append_no_addition(&mgr, "{\"x\":1}");

    let head_len_before = file_len(&dir.path().join("head.req.log"));

    let segment_path = dir.path().join("0.req.log");
    let mut data = std::fs::read(&segment_path).expect("read segment");
    data[2] ^= 0x01;
    std::fs::write(&segment_path, &data).expect("write corrupted segment");

    match mgr.get_req(1) {
        Err(Error::CorruptRecord { inc_id, .. }) => assert_eq!(inc_id, 1),
        other => panic!("expected CorruptRecord, got: {other:?}"),
    }

    // Detection is read-side only; the head index is untouched.
    assert_eq!(file_len(&dir.path().join("head.req.log")), head_len_before);
}

#[test]
fn recovery_truncates_a_torn_head_entry() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    {
        let mgr = open_mgr(dir.path());
        for _ in 0..3 {
            append_no_addition(&mgr, "{\"k\":\"v\"}");
        }
    }

    // Keep two full headers plus 10 bytes of a third, as a crash mid-write
    // would.
    let head_path = dir.path().join("head.req.log");
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&head_path)
        .expect("open head index");
    file.set_len(50).expect("truncate");
    file.sync_all().expect("sync");
    drop(file);

    let mgr = open_mgr(dir.path());
    assert_eq!(mgr.last_success_id(), 2);
    assert_eq!(mgr.head_count(), 2);
    assert_eq!(file_len(&head_path), 2 * HEAD_ENTRY_SIZE as u64);

    // The third record's orphan body bytes are gone too: the segment ends
    // exactly where record 2 ends.
    let (head_2, body_2) = mgr.get_req(2).expect("lookup").expect("exists");
    assert_eq!(
        file_len(&dir.path().join("0.req.log")),
        u64::from(head_2.req_data_offset) + body_2.len() as u64
    );

    // The reclaimed id is issued again.
    let mut req = ReqLog::no_addition("{}");
    assert_eq!(mgr.prepare(&mut req, true).expect("prepare"), 3);
    mgr.append_typed(&req).expect("append");
    assert_eq!(mgr.last_success_id(), 3);
}

#[test]
fn recovery_drops_headers_whose_bodies_are_torn() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    {
        let mgr = open_mgr(dir.path());
        append_no_addition(&mgr, "{\"n\":1}");
        append_no_addition(&mgr, "{\"n\":2}");
    }

    // Chop the tail off the second body while its header survives.
    let segment_path = dir.path().join("0.req.log");
    let shortened = file_len(&segment_path) - 3;
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&segment_path)
        .expect("open segment");
    file.set_len(shortened).expect("truncate");
    file.sync_all().expect("sync");
    drop(file);

    let mgr = open_mgr(dir.path());
    assert_eq!(mgr.last_success_id(), 1);
    assert_eq!(mgr.head_count(), 1);

    let (head_1, body_1) = mgr.get_req(1).expect("lookup").expect("exists");
    assert_eq!(head_1.inc_id, 1);
    assert_eq!(
        file_len(&segment_path),
        u64::from(head_1.req_data_offset) + body_1.len() as u64
    );
}

#[test]
fn reopening_a_recovered_directory_is_a_fixed_point() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    {
        let mgr = open_mgr(dir.path());
        for _ in 0..3 {
            append_no_addition(&mgr, "{}");
        }
    }

    // Crash-truncate the head index, then open twice more.
    let head_path = dir.path().join("head.req.log");
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(&head_path)
        .expect("open head index");
    file.set_len(50).expect("truncate");
    file.sync_all().expect("sync");
    drop(file);

    let (last_after_first, head_len_first, seg_len_first) = {
        let mgr = open_mgr(dir.path());
        (
            mgr.last_success_id(),
            file_len(&head_path),
            file_len(&dir.path().join("0.req.log")),
        )
    };

    let mgr = open_mgr(dir.path());
    assert_eq!(mgr.last_success_id(), last_after_first);
    assert_eq!(file_len(&head_path), head_len_first);
    assert_eq!(file_len(&dir.path().join("0.req.log")), seg_len_first);
}

#[test]
fn replica_prepare_rejects_ids_ahead_of_the_sequence() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let mgr = open_mgr(dir.path());

    let mut ahead = ReqLog::no_addition("{}");
    ahead.common_mut().inc_id = 2;
    assert!(matches!(
        mgr.prepare(&mut ahead, false),
        Err(Error::OutOfOrder {
            expected: 1,
            got: 2
        })
    ));

    let mut in_order = ReqLog::no_addition("{}");
    in_order.common_mut().inc_id = 1;
    assert_eq!(mgr.prepare(&mut in_order, false).expect("prepare"), 1);
}

#[test]
fn typed_records_survive_a_full_restart() {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let original = ReqLog::rebuild_from_scd(
        "{\"collection\":\"docs\"}",
        vec!["B-00-1.scd".into(), "B-00-2.scd".into()],
        1_700_000_000,
        vec![1, 2, 3],
    );
    {
        let mgr = open_mgr(dir.path());
        let mut req = original.clone();
        mgr.prepare(&mut req, true).expect("prepare");
        mgr.append_typed(&req).expect("append");
    }

    let mgr = open_mgr(dir.path());
    let (_, body) = mgr.get_req(1).expect("lookup").expect("exists");
    let decoded = codec::unpack(&body).expect("decode");
    assert_eq!(decoded.common().inc_id, 1);
    match decoded {
        ReqLog::RebuildFromScd {
            scd_list,
            timestamp,
            replayed_ids,
            ..
        } => {
            assert_eq!(scd_list, vec!["B-00-1.scd".to_string(), "B-00-2.scd".to_string()]);
            assert_eq!(timestamp, 1_700_000_000);
            assert_eq!(replayed_ids, vec![1, 2, 3]);
        }
        other => panic!("expected RebuildFromScd, got: {other:?}"),
    }
}
