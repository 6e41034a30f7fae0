//! Send/Sync guarantees for types shared across threads.

use femtoship::{
    ShipperBuilder, ShipperConfig,
    delivery::{DeliveryStats, ShutdownHandle},
    pending::PendingBuffer,
    rate_limited_warner::RateLimitedWarner,
    tail::LineSource,
    transport::{Session, StreamHandle},
};
use rstest::rstest;
use static_assertions::assert_impl_all;

#[rstest]
fn configuration_is_send_sync() {
    assert_impl_all!(ShipperBuilder: Send, Sync);
    assert_impl_all!(ShipperConfig: Send, Sync);
}

#[rstest]
fn shared_state_is_send_sync() {
    assert_impl_all!(PendingBuffer: Send, Sync);
    assert_impl_all!(RateLimitedWarner: Send, Sync);
    assert_impl_all!(ShutdownHandle: Send, Sync);
    assert_impl_all!(DeliveryStats: Send, Sync);
}

#[rstest]
fn connection_parts_can_move_between_threads() {
    assert_impl_all!(Session: Send);
    assert_impl_all!(StreamHandle: Send);
    assert_impl_all!(LineSource: Send);
}
