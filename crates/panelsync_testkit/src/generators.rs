//! Property-based test generators using proptest.
//!
//! Provides strategies for parent listings and local user sets that keep
//! the invariants the engine relies on (unique uuids, finite allowances).

use crate::fixtures::parent_fields;
use chrono::{NaiveDate, NaiveDateTime};
use panelsync_protocol::{ParentUser, UserMode, UserRecord};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for generating uuids.
pub fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for generating user names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex")
}

/// Strategy for generating reset modes.
pub fn mode_strategy() -> impl Strategy<Value = UserMode> {
    prop_oneof![
        Just(UserMode::NoReset),
        Just(UserMode::Monthly),
        Just(UserMode::Weekly),
        Just(UserMode::Daily),
    ]
}

/// Strategy for generating calendar dates.
pub fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2020i32..2030, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| {
        NaiveDate::from_ymd_opt(y, m, d).expect("Day 1-28 exists in every month")
    })
}

/// Strategy for generating last-online timestamps.
pub fn last_online_strategy() -> impl Strategy<Value = Option<NaiveDateTime>> {
    prop::option::of((date_strategy(), 0u32..86_400).prop_map(|(date, secs)| {
        date.and_hms_opt(secs / 3600, (secs / 60) % 60, secs % 60)
            .expect("Seconds of day are in range")
    }))
}

/// Strategy for generating a single parent user.
pub fn parent_user_strategy() -> impl Strategy<Value = ParentUser> {
    (
        uuid_strategy(),
        name_strategy(),
        0.0f64..2048.0,
        0u32..3650,
        mode_strategy(),
        any::<bool>(),
        prop::option::of("[ -~]{0,32}"),
        prop::option::of(date_strategy()),
        prop::option::of(any::<i64>()),
        prop::option::of("[A-Za-z0-9+/]{43}="),
    )
        .prop_map(
            |(uuid, name, limit, days, mode, enable, comment, start, telegram, key)| ParentUser {
                uuid,
                name,
                usage_limit_gb: limit,
                package_days: days,
                mode,
                enable,
                comment,
                start_date: start,
                last_reset_time: start,
                telegram_id: telegram,
                ed25519_private_key: key.clone(),
                ed25519_public_key: key.clone(),
                wg_pk: key.clone(),
                wg_psk: None,
                wg_pub: key,
            },
        )
}

/// Strategy for generating a parent listing with unique uuids.
pub fn parent_listing_strategy(max_len: usize) -> impl Strategy<Value = Vec<ParentUser>> {
    prop::collection::btree_map(uuid_strategy(), parent_user_strategy(), 0..=max_len).prop_map(
        |users| {
            users
                .into_iter()
                .map(|(uuid, mut user)| {
                    user.uuid = uuid;
                    user
                })
                .collect()
        },
    )
}

/// Strategy for generating a local user with child-owned state.
pub fn local_user_strategy() -> impl Strategy<Value = UserRecord> {
    (
        uuid_strategy(),
        name_strategy(),
        any::<bool>(),
        0u64..10_000_000_000,
        last_online_strategy(),
        1u32..5000,
    )
        .prop_map(|(uuid, name, enable, usage, last_online, max_ips)| {
            let mut fields = parent_fields(&name);
            fields.enable = enable;
            let mut record = UserRecord::from_parent(uuid, fields);
            record.current_usage = usage;
            record.last_online = last_online;
            record.max_ips = max_ips;
            record
        })
}

/// Strategy for generating a local user set with unique uuids.
pub fn local_users_strategy(max_len: usize) -> impl Strategy<Value = Vec<UserRecord>> {
    prop::collection::btree_map(uuid_strategy(), local_user_strategy(), 0..=max_len).prop_map(
        |users| {
            users
                .into_iter()
                .map(|(uuid, mut record)| {
                    record.uuid = uuid;
                    record
                })
                .collect()
        },
    )
}

/// Strategy for a local set and a parent listing that overlap.
///
/// Parent users selected by the mask take the identity of a local user, so
/// creates, overwrites and soft-blocks all occur in the same case.
pub fn reconcile_case_strategy(
    max_len: usize,
) -> impl Strategy<Value = (Vec<UserRecord>, Vec<ParentUser>)> {
    (
        local_users_strategy(max_len),
        parent_listing_strategy(max_len),
        any::<u64>(),
    )
        .prop_map(|(locals, mut parents, mask)| {
            for (i, (parent, local)) in parents.iter_mut().zip(&locals).enumerate() {
                if (mask >> (i % 64)) & 1 == 1 {
                    parent.uuid = local.uuid;
                }
            }
            (locals, parents)
        })
}
