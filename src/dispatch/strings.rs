//! String operations.

use super::{reply, require_items, require_key, require_keys, require_positive, Pipeline, Remote};
use crate::connector::{check_reply, CommandClass, Op};
use crate::core::error::{TrellisError, TrellisResult};
use crate::protocol::{Command, RedisValue};
use bytes::Bytes;

impl Remote {
    pub fn get(&self, key: &str) -> TrellisResult<Option<Bytes>> {
        require_key(key)?;
        self.call(
            Op::keyed("GET", key),
            Command::new("GET").arg(key),
            reply::optional_bytes,
        )
    }

    /// Values for several keys, positionally; missing keys and non-string
    /// values come back as `None`.
    pub fn mget(&self, keys: &[&str]) -> TrellisResult<Vec<Option<Bytes>>> {
        require_keys(keys)?;
        if !self.is_partitioned() {
            return self.call(
                Op::new("MGET", CommandClass::MultiKey, keys.to_vec()),
                Command::new("MGET").args(keys),
                reply::optional_bytes_list,
            );
        }
        let mut batch = Pipeline::new();
        for key in keys {
            batch.keyed(key, Command::new("GET").arg(key));
        }
        self.pipeline(&batch)?
            .into_iter()
            .map(|value| match value {
                RedisValue::Error(ref e) if e.kind == "WRONGTYPE" => Ok(None),
                other => check_reply(other).and_then(reply::optional_bytes),
            })
            .collect::<Result<_, _>>()
            .map_err(|e| TrellisError::dispatch("MGET", e))
    }

    pub fn set(&self, key: &str, value: impl AsRef<[u8]>) -> TrellisResult<()> {
        require_key(key)?;
        self.call(
            Op::keyed("SET", key),
            Command::new("SET").arg(key).arg(value),
            reply::ok,
        )
    }

    /// Set with a time to live in milliseconds.
    pub fn set_px(&self, key: &str, value: impl AsRef<[u8]>, ttl_ms: u64) -> TrellisResult<()> {
        require_key(key)?;
        require_positive("ttl", ttl_ms)?;
        self.call(
            Op::keyed("SET", key),
            Command::new("SET").arg(key).arg(value).arg("PX").arg_num(ttl_ms),
            reply::ok,
        )
    }

    /// Set with a time to live in seconds.
    pub fn set_ex(&self, key: &str, value: impl AsRef<[u8]>, ttl_secs: u64) -> TrellisResult<()> {
        require_key(key)?;
        require_positive("ttl", ttl_secs)?;
        self.call(
            Op::keyed("SET", key),
            Command::new("SET").arg(key).arg(value).arg("EX").arg_num(ttl_secs),
            reply::ok,
        )
    }

    /// Set only if the key does not exist; true when written.
    pub fn set_nx(&self, key: &str, value: impl AsRef<[u8]>) -> TrellisResult<bool> {
        require_key(key)?;
        self.call(
            Op::keyed("SET", key),
            Command::new("SET").arg(key).arg(value).arg("NX"),
            reply::written,
        )
    }

    /// `SET key value NX PX ttl` as one atomic command; true when written.
    pub fn set_nx_px(
        &self,
        key: &str,
        value: impl AsRef<[u8]>,
        ttl_ms: u64,
    ) -> TrellisResult<bool> {
        require_key(key)?;
        require_positive("ttl", ttl_ms)?;
        self.call(
            Op::keyed("SET", key),
            Command::new("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg_num(ttl_ms),
            reply::written,
        )
    }

    /// Set several keys. Atomic on unpartitioned topologies only.
    pub fn mset<V: AsRef<[u8]>>(&self, pairs: &[(&str, V)]) -> TrellisResult<()> {
        require_items("key/value pair", pairs)?;
        let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
        require_keys(&keys)?;
        if !self.is_partitioned() {
            let mut command = Command::new("MSET");
            for (key, value) in pairs {
                command = command.arg(key).arg(value);
            }
            return self.call(
                Op::new("MSET", CommandClass::MultiKey, keys),
                command,
                reply::ok,
            );
        }
        let mut batch = Pipeline::new();
        for (key, value) in pairs {
            batch.keyed(key, Command::new("SET").arg(key).arg(value));
        }
        self.pipeline(&batch)?
            .into_iter()
            .try_for_each(|value| check_reply(value).and_then(reply::ok))
            .map_err(|e| TrellisError::dispatch("MSET", e))
    }

    pub fn incr_by(&self, key: &str, delta: i64) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("INCRBY", key),
            Command::new("INCRBY").arg(key).arg_num(delta),
            reply::integer,
        )
    }

    pub fn decr_by(&self, key: &str, delta: i64) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("DECRBY", key),
            Command::new("DECRBY").arg(key).arg_num(delta),
            reply::integer,
        )
    }

    pub fn incr_by_float(&self, key: &str, delta: f64) -> TrellisResult<f64> {
        require_key(key)?;
        if !delta.is_finite() {
            return Err(TrellisError::precondition("increment must be finite"));
        }
        self.call(
            Op::keyed("INCRBYFLOAT", key),
            Command::new("INCRBYFLOAT").arg(key).arg_num(delta),
            reply::float,
        )
    }

    /// Append to a string value, returning the new length.
    pub fn append(&self, key: &str, value: impl AsRef<[u8]>) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("APPEND", key),
            Command::new("APPEND").arg(key).arg(value),
            reply::integer,
        )
    }

    pub fn strlen(&self, key: &str) -> TrellisResult<i64> {
        require_key(key)?;
        self.call(
            Op::keyed("STRLEN", key),
            Command::new("STRLEN").arg(key),
            reply::integer,
        )
    }
}
