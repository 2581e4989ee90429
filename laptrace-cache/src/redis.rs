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

//! Remote cache store
//!
//! [`CacheStore`] over a Redis-wire-compatible server. Connecting
//! selects the program's database, pings it, and keeps one blocking
//! connection serialized behind a mutex.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use laptrace_core::{CacheSettings, LaptraceError, Program, Result};

use crate::resp::RespConnection;
use crate::store::{
    now_epoch_secs, timestamp_field, CacheKey, CachePartition, CacheStore, PutEntry, TtlPolicy,
};

/// SCAN batch size hint.
const SCAN_COUNT: &str = "200";

pub struct RedisStore {
    conn: Mutex<RespConnection>,
    ttl: TtlPolicy,
}

impl RedisStore {
    /// Connects, selects the program's database and verifies the
    /// round-trip. Fails with `Configuration` when the program has no
    /// database mapping and `CacheUnavailable` when the server cannot
    /// be reached.
    pub fn connect(settings: &CacheSettings, program: &Program) -> Result<Self> {
        let db = settings.db_index(program)?;
        let timeout = Duration::from_secs(settings.connect_timeout_secs);
        let mut conn = RespConnection::connect(&settings.addr(), timeout)?;
        conn.command(&[b"SELECT", db.to_string().as_bytes()])?.expect_ok()?;
        conn.command(&[b"PING"])?.expect_ok()?;
        debug!(addr = %settings.addr(), db, %program, "cache store connected");
        Ok(Self {
            conn: Mutex::new(conn),
            ttl: TtlPolicy::default(),
        })
    }

    pub fn with_ttl_policy(mut self, ttl: TtlPolicy) -> Self {
        self.ttl = ttl;
        self
    }

    fn expire(conn: &mut RespConnection, key: &CacheKey, ttl: Duration) -> Result<()> {
        conn.command(&[b"EXPIRE", key.as_str().as_bytes(), ttl.as_secs().to_string().as_bytes()])?
            .into_int()?;
        Ok(())
    }
}

impl CacheStore for RedisStore {
    fn partition(
        &self,
        key: &CacheKey,
        variables: &[String],
        refresh: bool,
    ) -> Result<CachePartition> {
        let mut part = CachePartition::default();
        if variables.is_empty() {
            return Ok(part);
        }

        let mut conn = self.conn.lock();
        let exists = !refresh
            && conn
                .command(&[b"EXISTS", key.as_str().as_bytes()])?
                .into_int()?
                > 0;
        if !exists {
            part.missing = variables.to_vec();
            return Ok(part);
        }

        // read hit: the whole record gets the longer window
        Self::expire(&mut conn, key, self.ttl.read_ttl)?;

        let mut cmd: Vec<&[u8]> = Vec::with_capacity(variables.len() + 2);
        cmd.push(b"HMGET");
        cmd.push(key.as_str().as_bytes());
        for var in variables {
            cmd.push(var.as_bytes());
        }
        let fields = conn.command(&cmd)?.into_array()?;
        if fields.len() != variables.len() {
            return Err(LaptraceError::CacheUnavailable(format!(
                "field read returned {} values for {} variables",
                fields.len(),
                variables.len()
            )));
        }
        for (var, reply) in variables.iter().zip(fields) {
            match reply.into_string()? {
                Some(payload) => part.cached.push((var.clone(), payload)),
                None => part.missing.push(var.clone()),
            }
        }
        Ok(part)
    }

    fn put(&self, entries: &[PutEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let now = now_epoch_secs().to_string();
        let mut conn = self.conn.lock();
        let mut touched: HashSet<&CacheKey> = HashSet::new();
        for entry in entries {
            let ts_field = timestamp_field(&entry.variable);
            conn.command(&[
                b"HSET",
                entry.key.as_str().as_bytes(),
                entry.variable.as_bytes(),
                entry.payload.as_bytes(),
                ts_field.as_bytes(),
                now.as_bytes(),
            ])?
            .into_int()?;
            touched.insert(&entry.key);
        }
        for key in touched {
            Self::expire(&mut conn, key, self.ttl.write_ttl)?;
        }
        Ok(())
    }

    fn timestamps(&self, key: &CacheKey, variables: &[String]) -> Result<Vec<Option<u64>>> {
        if variables.is_empty() {
            return Ok(Vec::new());
        }
        let fields: Vec<String> = variables.iter().map(|v| timestamp_field(v)).collect();
        let mut cmd: Vec<&[u8]> = Vec::with_capacity(fields.len() + 2);
        cmd.push(b"HMGET");
        cmd.push(key.as_str().as_bytes());
        for field in &fields {
            cmd.push(field.as_bytes());
        }
        let mut conn = self.conn.lock();
        let replies = conn.command(&cmd)?.into_array()?;
        replies
            .into_iter()
            .map(|r| Ok(r.into_string()?.and_then(|s| s.trim().parse().ok())))
            .collect()
    }

    fn has_fields(&self, key: &CacheKey, variables: &[String]) -> Result<Vec<bool>> {
        let mut conn = self.conn.lock();
        variables
            .iter()
            .map(|var| {
                Ok(conn
                    .command(&[b"HEXISTS", key.as_str().as_bytes(), var.as_bytes()])?
                    .into_int()?
                    > 0)
            })
            .collect()
    }

    fn delete(&self, keys: &[CacheKey]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut cmd: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        cmd.push(b"DEL");
        for key in keys {
            cmd.push(key.as_str().as_bytes());
        }
        let mut conn = self.conn.lock();
        Ok(conn.command(&cmd)?.into_int()? as u64)
    }

    fn delete_matching(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.lock();
        let mut cursor = "0".to_string();
        let mut victims: Vec<String> = Vec::new();
        loop {
            let reply = conn.command(&[
                b"SCAN",
                cursor.as_bytes(),
                b"MATCH",
                pattern.as_bytes(),
                b"COUNT",
                SCAN_COUNT.as_bytes(),
            ])?;
            let mut parts = reply.into_array()?.into_iter();
            cursor = parts
                .next()
                .ok_or_else(|| {
                    LaptraceError::CacheUnavailable("scan reply missing cursor".to_string())
                })?
                .into_string()?
                .unwrap_or_default();
            if let Some(batch) = parts.next() {
                for item in batch.into_array()? {
                    if let Some(key) = item.into_string()? {
                        victims.push(key);
                    }
                }
            }
            if cursor == "0" {
                break;
            }
        }

        let mut dropped = 0u64;
        for chunk in victims.chunks(128) {
            let mut cmd: Vec<&[u8]> = Vec::with_capacity(chunk.len() + 1);
            cmd.push(b"DEL");
            for key in chunk {
                cmd.push(key.as_bytes());
            }
            dropped += conn.command(&cmd)?.into_int()? as u64;
        }
        debug!(pattern, dropped, "cache keys dropped");
        Ok(dropped)
    }

    fn ping(&self) -> Result<()> {
        self.conn.lock().command(&[b"PING"])?.expect_ok()
    }
}
