//! Overflowing the pending buffer must be visible in the local log.

use femtoship::{
    log_record::{ShipRecord, ShipperIdentity},
    pending::{OverflowPolicy, PendingBuffer},
};
use logtest::Logger;

#[test]
fn overflow_emits_rate_limited_warning() {
    let mut logger = Logger::start();
    let identity = ShipperIdentity::new("mrbyte", "app", 1);
    let buffer = PendingBuffer::new(1, OverflowPolicy::DropOldest);

    buffer.append(ShipRecord::capture(&identity, "kept"));
    assert!(logger.pop().is_none());

    buffer.append(ShipRecord::capture(&identity, "evicts kept"));
    let log = logger.pop().expect("overflow should warn");
    assert_eq!(log.level(), log::Level::Warn);
    assert!(log.args().contains("dropped 1 undelivered"), "{}", log.args());

    // Within the interval further drops are only counted.
    buffer.append(ShipRecord::capture(&identity, "evicts again"));
    assert!(logger.pop().is_none());

    buffer.drain_all();
    let summary = logger.pop().expect("drain reports outstanding drops");
    assert!(summary.args().contains("1 undelivered"), "{}", summary.args());
}
