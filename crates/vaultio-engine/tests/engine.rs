//! End-to-end engine scenarios.

use bytes::Bytes;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;
use vaultio_core::{
    Address, Attribute, Checksum, ContainerId, Deadline, Error, LockList, Object, ObjectHeader,
    ObjectId, ObjectType, OwnerId, ShardOptions, SplitHeader, Tombstone,
};
use vaultio_engine::Engine;
use vaultio_shard::Shard;

fn sample_object_in(container: ContainerId, object_type: ObjectType, payload: &[u8]) -> Object {
    let header = ObjectHeader {
        id: ObjectId::new(rand::random()),
        container,
        owner: OwnerId::new(rand::random()),
        object_type,
        payload_size: payload.len() as u64,
        payload_checksum: Checksum::compute(payload),
        homomorphic_hash: None,
        creation_epoch: 1,
        attributes: Vec::new(),
        split: None,
        signature: None,
    };
    Object::new(header, Bytes::copy_from_slice(payload))
}

fn sample_object(object_type: ObjectType, payload: &[u8]) -> Object {
    sample_object_in(ContainerId::new(rand::random()), object_type, payload)
}

fn tombstone_object(container: ContainerId, members: &[ObjectId], expiration: u64) -> Object {
    let mut tomb = sample_object_in(container, ObjectType::Tombstone, b"");
    let payload = Tombstone {
        expiration_epoch: expiration,
        members: members.to_vec(),
    }
    .to_payload()
    .unwrap();
    tomb.header.payload_size = payload.len() as u64;
    tomb.header.payload_checksum = Checksum::compute(&payload);
    tomb.payload = payload;
    tomb
}

fn new_engine(dir: &TempDir, shards: usize) -> Engine {
    let engine = Engine::new();
    for i in 0..shards {
        let mut opts = ShardOptions::new(dir.path().join(format!("shard-{i}")));
        opts.small_size_limit = 1024;
        opts.gc_remove_interval = Duration::from_secs(3600);
        opts.gc_expired_interval = Duration::from_secs(3600);

        let shard = Shard::open(opts).unwrap();
        shard.init().unwrap();
        engine.add_shard(shard, 1.0);
    }
    engine
}

fn none() -> Deadline {
    Deadline::none()
}

#[test]
fn test_basic_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 2);

    let obj = sample_object(ObjectType::Regular, &[0x01; 32]);
    let addr = obj.address();

    engine.put(&obj, none()).unwrap();
    assert!(engine.exists(&addr, none()).unwrap());
    assert_eq!(engine.get(&addr, false, none()).unwrap(), obj);

    engine.delete(&[addr], none()).unwrap();
    assert!(!engine.exists(&addr, none()).unwrap());

    engine.close().unwrap();
}

#[test]
fn test_tombstone_inhume() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 2);

    let obj = sample_object(ObjectType::Regular, b"victim");
    let tomb = tombstone_object(obj.header.container, &[obj.header.id], 100);

    engine.put(&obj, none()).unwrap();
    engine.put(&tomb, none()).unwrap();
    engine
        .inhume(Some(&tomb.address()), &[obj.address()], none())
        .unwrap();

    assert!(matches!(
        engine.exists(&obj.address(), none()),
        Err(Error::AlreadyRemoved)
    ));
    assert_eq!(
        engine.head(&tomb.address(), false, none()).unwrap(),
        tomb.header
    );

    engine.close().unwrap();
}

#[test]
fn test_virtual_parent_head() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 2);

    let cid = ContainerId::new(rand::random());
    let split_id = Uuid::new_v4();

    let parent = sample_object_in(cid, ObjectType::Regular, b"");
    let mut child = sample_object_in(cid, ObjectType::Regular, b"part one");
    child.header.split = Some(SplitHeader {
        parent_id: Some(parent.header.id),
        parent: Some(Box::new(parent.header.clone())),
        split_id: Some(split_id),
        previous: None,
        children: Vec::new(),
    });

    engine.put(&child, none()).unwrap();

    match engine.head(&parent.address(), true, none()) {
        Err(Error::Split(info)) => {
            assert_eq!(info.split_id, Some(split_id));
            assert_eq!(info.link, None);
            assert_eq!(info.last_part, Some(child.header.id));
        }
        other => panic!("expected split info, got {other:?}"),
    }

    let head = engine.head(&parent.address(), false, none()).unwrap();
    assert_eq!(head, parent.header);

    engine.close().unwrap();
}

#[test]
fn test_refill_rebuilds_every_shard() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 1);

    let cid = ContainerId::new(rand::random());
    let objects: Vec<Object> = (0..5)
        .map(|i| sample_object_in(cid, ObjectType::Regular, &[i as u8; 16]))
        .collect();
    for obj in &objects {
        engine.put(obj, none()).unwrap();
    }

    let inhumed: Vec<ObjectId> = objects[..3].iter().map(|o| o.header.id).collect();
    let tomb = tombstone_object(cid, &inhumed, 100);
    engine.put(&tomb, none()).unwrap();

    let members: Vec<Address> = objects[..3].iter().map(|o| o.address()).collect();
    engine
        .inhume(Some(&tomb.address()), &members, none())
        .unwrap();

    // rebuild the metabase from blob contents
    let shard = engine.shard(engine.shard_ids()[0]).unwrap();
    shard.refill_metabase().unwrap();

    for obj in &objects[..3] {
        assert!(matches!(
            engine.head(&obj.address(), false, none()),
            Err(Error::AlreadyRemoved)
        ));
    }
    for obj in &objects[3..] {
        assert_eq!(engine.get(&obj.address(), false, none()).unwrap(), *obj);
    }
    assert_eq!(
        engine.head(&tomb.address(), false, none()).unwrap(),
        tomb.header
    );

    engine.close().unwrap();
}

#[test]
fn test_lock_blocks_inhume() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 2);

    let obj = sample_object(ObjectType::Regular, b"keep me");
    let cid = obj.header.container;
    let lock_payload = LockList {
        members: vec![obj.header.id],
    }
    .to_payload()
    .unwrap();
    let locker = sample_object_in(cid, ObjectType::Lock, &lock_payload);
    let tomb = tombstone_object(cid, &[obj.header.id], 100);

    engine.put(&obj, none()).unwrap();
    engine.put(&locker, none()).unwrap();

    // apply the lock the way the request layer does: parse the payload,
    // then lock its members
    let parsed = LockList::from_payload(&locker.payload).unwrap();
    engine
        .lock(&cid, locker.header.id, &parsed.members, none())
        .unwrap();

    assert!(matches!(
        engine.inhume(Some(&tomb.address()), &[obj.address()], none()),
        Err(Error::ObjectLocked)
    ));
    assert!(engine.exists(&obj.address(), none()).unwrap());

    engine.close().unwrap();
}

#[test]
fn test_exists_short_circuits_on_any_shard_graveyard() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 2);

    let obj = sample_object(ObjectType::Regular, b"somewhere");
    engine.put(&obj, none()).unwrap();
    assert!(engine.exists(&obj.address(), none()).unwrap());

    // find the shard that did NOT take the object and bury the address
    // there directly
    let other = engine
        .shard_ids()
        .into_iter()
        .map(|id| engine.shard(id).unwrap())
        .find(|s| !matches!(s.exists(&obj.address()), Ok(true)))
        .expect("one shard must not hold the object");

    let tomb = tombstone_object(obj.header.container, &[obj.header.id], 100);
    other
        .inhume(Some(&tomb.address()), &[obj.address()])
        .unwrap();

    // the graveyard mark wins regardless of shard ordering
    assert!(matches!(
        engine.exists(&obj.address(), none()),
        Err(Error::AlreadyRemoved)
    ));

    engine.close().unwrap();
}

#[test]
fn test_select_unions_across_shards() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 3);

    let cid = ContainerId::new(rand::random());
    let mut addrs = Vec::new();
    for i in 0..12 {
        let mut obj = sample_object_in(cid, ObjectType::Regular, &[i as u8; 8]);
        obj.header.attributes.push(Attribute::new("kind", "doc"));
        engine.put(&obj, none()).unwrap();
        addrs.push(obj.address());
    }

    let filters = vaultio_metabase::SelectFilters::new().with_attr(
        "kind",
        vaultio_metabase::MatchOp::Eq,
        "doc",
    );
    let mut found = engine.select(&cid, &filters, none()).unwrap();
    found.sort();
    addrs.sort();
    assert_eq!(found, addrs);

    engine.close().unwrap();
}

#[test]
fn test_list_pages_across_shards() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 3);

    let mut addrs = Vec::new();
    for i in 0..20 {
        let obj = sample_object(ObjectType::Regular, &[i as u8; 8]);
        engine.put(&obj, none()).unwrap();
        addrs.push(obj.address());
    }

    let mut listed = Vec::new();
    let mut token = None;
    loop {
        let (page, next) = engine.list(7, token.as_ref()).unwrap();
        assert!(page.len() <= 7);
        listed.extend(page);
        match next {
            Some(t) => token = Some(t),
            None => break,
        }
    }

    listed.sort();
    listed.dedup();
    addrs.sort();
    assert_eq!(listed, addrs);

    engine.close().unwrap();
}

#[test]
fn test_expired_deadline_cancels() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 1);

    let obj = sample_object(ObjectType::Regular, b"data");
    engine.put(&obj, none()).unwrap();

    let expired = Deadline::within(Duration::ZERO);
    assert!(matches!(
        engine.get(&obj.address(), false, expired),
        Err(Error::Cancelled)
    ));

    engine.close().unwrap();
}

#[test]
fn test_epoch_broadcast_collects_expired_objects() {
    let dir = tempfile::tempdir().unwrap();
    let engine = new_engine(&dir, 2);

    let mut obj = sample_object(ObjectType::Regular, b"short-lived");
    obj.header.attributes.push(Attribute::new(
        vaultio_core::ATTR_EXPIRATION_EPOCH,
        "5",
    ));
    engine.put(&obj, none()).unwrap();

    engine.notify_new_epoch(6);

    // the epoch sweep runs on the shard GC thread; wait for the burial
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match engine.exists(&obj.address(), none()) {
            Err(Error::AlreadyRemoved) => break,
            Ok(false) => break, // already physically removed
            _ if std::time::Instant::now() > deadline => {
                panic!("expired object was not collected")
            }
            _ => std::thread::sleep(Duration::from_millis(20)),
        }
    }

    engine.close().unwrap();
}
