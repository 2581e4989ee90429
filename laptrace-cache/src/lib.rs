// Copyright 2025 Laptrace (https://github.com/laptrace)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Laptrace Cache
//!
//! Cache store client and orchestration. A record is one hash per
//! (run, data type) holding a serialized payload per variable plus a
//! `<variable>_timestamp` sibling. Records live under a sliding TTL:
//! writes arm a short window, read hits renew a longer one.
//!
//! [`CacheThrough`] wraps any fetch routine with the
//! partition/delegate/write-back/merge cycle; [`RedisStore`] speaks the
//! wire protocol to a remote store and [`MemoryStore`] mirrors the
//! semantics in process.

pub mod live;
pub mod memory;
mod resp;
pub mod redis;
pub mod store;
pub mod through;

pub use live::{LiveLap, LiveLapWriter};
pub use memory::MemoryStore;
pub use redis::RedisStore;
pub use store::{
    now_epoch_secs, timestamp_field, CacheKey, CachePartition, CacheStore, PutEntry, TtlPolicy,
};
pub use through::{CacheThrough, FreshnessCheck, RunPayloads};
