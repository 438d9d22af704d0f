//! In-process backend.
//!
//! [`MemoryDialer`] hands out links to [`MemoryStore`]s keyed by endpoint, so
//! every connector variant can run without a server. Besides the data
//! commands the crate issues, it plays the deployment roles connectors depend
//! on:
//! - discovery endpoints answering `SENTINEL get-master-addr-by-name`, with
//!   [`MemoryDialer::fail_over`] to move the primary (the old one answers
//!   `READONLY` afterwards);
//! - cluster nodes answering `CLUSTER SLOTS` and redirecting keys they do not
//!   own with `MOVED`, with [`MemoryDialer::assign_slots`] to move slots and
//!   [`MemoryDialer::migrate_slot`] to leave one mid-migration (`ASK`);
//! - unreachable nodes via [`MemoryDialer::set_down`].
//!
//! Scripting is limited to the lock release script.

use super::link::{handshake, Dialer, Endpoint, Link, LinkError, LinkResult, LinkSettings};
use super::routing::{key_slot, SLOT_COUNT};
use crate::lock::RELEASE_SCRIPT;
use crate::protocol::{Command, RedisError, RedisValue};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Largest bitmap GET will materialize.
const MAX_MATERIALIZED_BYTES: u64 = 64 * 1024 * 1024;

type Reply = Result<RedisValue, RedisError>;

/// Reply construction for the emulated server side.
impl RedisValue {
    pub(crate) fn ok() -> Self {
        Self::SimpleString("OK".to_string())
    }

    pub(crate) fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    pub(crate) fn bulk(data: impl Into<Bytes>) -> Self {
        Self::BulkString(data.into())
    }

    pub(crate) fn bulk_string(s: impl AsRef<str>) -> Self {
        Self::BulkString(Bytes::copy_from_slice(s.as_ref().as_bytes()))
    }

    pub(crate) fn array(items: Vec<RedisValue>) -> Self {
        Self::Array(items)
    }
}

impl RedisError {
    pub(crate) fn generic(message: impl Into<String>) -> Self {
        Self::new("ERR", message)
    }

    pub(crate) fn syntax() -> Self {
        Self::generic("syntax error")
    }

    pub(crate) fn wrong_arity(command: &str) -> Self {
        Self::generic(format!(
            "wrong number of arguments for '{}' command",
            command.to_lowercase()
        ))
    }

    pub(crate) fn wrong_type() -> Self {
        Self::new(
            "WRONGTYPE",
            "Operation against a key holding the wrong kind of value",
        )
    }

    pub(crate) fn not_integer() -> Self {
        Self::generic("value is not an integer or out of range")
    }

    pub(crate) fn readonly() -> Self {
        Self::new("READONLY", "You can't write against a read only replica.")
    }
}

impl Command {
    fn arg_int(&self, index: usize) -> Option<i64> {
        self.arg_str(index).and_then(|s| s.parse().ok())
    }

    fn require_argc(&self, n: usize) -> Result<(), RedisError> {
        if self.argc() != n {
            return Err(RedisError::wrong_arity(&self.name));
        }
        Ok(())
    }

    fn require_min_argc(&self, n: usize) -> Result<(), RedisError> {
        if self.argc() < n {
            return Err(RedisError::wrong_arity(&self.name));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Shared {
    stores: Mutex<HashMap<Endpoint, Arc<MemoryStore>>>,
    down: Mutex<HashSet<Endpoint>>,
    sentinel: Mutex<Option<SentinelState>>,
    slots: RwLock<Option<Vec<Option<Endpoint>>>>,
    migrating: Mutex<HashMap<u16, Endpoint>>,
    dials: AtomicUsize,
    commands: AtomicUsize,
}

struct SentinelState {
    sentinels: HashSet<Endpoint>,
    master_name: String,
    primary: Endpoint,
    demoted: HashSet<Endpoint>,
}

/// Dialer for in-process stores.
#[derive(Clone, Default)]
pub struct MemoryDialer {
    shared: Arc<Shared>,
}

impl MemoryDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The store behind `endpoint`, created on first use. Writing to it
    /// directly bypasses every client-side layer.
    pub fn store(&self, endpoint: &Endpoint) -> Arc<MemoryStore> {
        let mut stores = self.shared.stores.lock();
        Arc::clone(stores.entry(endpoint.clone()).or_default())
    }

    /// Make `sentinels` answer discovery queries for `master_name` with
    /// `primary`.
    pub fn with_sentinels(
        self,
        sentinels: impl IntoIterator<Item = Endpoint>,
        master_name: impl Into<String>,
        primary: Endpoint,
    ) -> Self {
        *self.shared.sentinel.lock() = Some(SentinelState {
            sentinels: sentinels.into_iter().collect(),
            master_name: master_name.into(),
            primary,
            demoted: HashSet::new(),
        });
        self
    }

    /// Promote `primary`; the previous primary refuses commands with
    /// `READONLY` from now on.
    pub fn fail_over(&self, primary: Endpoint) {
        if let Some(state) = self.shared.sentinel.lock().as_mut() {
            let old = std::mem::replace(&mut state.primary, primary.clone());
            state.demoted.remove(&primary);
            if old != primary {
                state.demoted.insert(old);
            }
        }
    }

    /// Run as a cluster with the given slot ownership.
    pub fn with_cluster(
        self,
        layout: impl IntoIterator<Item = (RangeInclusive<u16>, Endpoint)>,
    ) -> Self {
        *self.shared.slots.write() = Some(vec![None; SLOT_COUNT as usize]);
        for (range, owner) in layout {
            self.assign_slots(range, owner);
        }
        self
    }

    /// Move a slot range to `owner`, ending any migration of those slots.
    /// Data is not migrated.
    pub fn assign_slots(&self, range: RangeInclusive<u16>, owner: Endpoint) {
        let mut slots = self.shared.slots.write();
        let mut migrating = self.shared.migrating.lock();
        if let Some(slots) = slots.as_mut() {
            for slot in range {
                if let Some(entry) = slots.get_mut(slot as usize) {
                    *entry = Some(owner.clone());
                }
                migrating.remove(&slot);
            }
        }
    }

    /// Start migrating `slot` to `target`. The owner keeps serving keys it
    /// still holds and answers `ASK` for the rest; `target` serves the slot
    /// only to links that sent `ASKING` first.
    pub fn migrate_slot(&self, slot: u16, target: Endpoint) {
        self.shared.migrating.lock().insert(slot, target);
    }

    /// Make `endpoint` refuse dials and break existing links.
    pub fn set_down(&self, endpoint: &Endpoint, down: bool) {
        let mut set = self.shared.down.lock();
        if down {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    /// Number of links dialed so far.
    pub fn dial_count(&self) -> usize {
        self.shared.dials.load(Ordering::SeqCst)
    }

    /// Number of commands answered so far.
    pub fn command_count(&self) -> usize {
        self.shared.commands.load(Ordering::SeqCst)
    }
}

impl Dialer for MemoryDialer {
    fn dial(&self, endpoint: &Endpoint, settings: &LinkSettings) -> LinkResult<Box<dyn Link>> {
        if self.shared.is_down(endpoint) {
            return Err(LinkError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("{} is down", endpoint),
            )));
        }
        self.shared.dials.fetch_add(1, Ordering::SeqCst);
        let mut link = MemoryLink {
            endpoint: endpoint.clone(),
            shared: Arc::clone(&self.shared),
            asking: false,
        };
        handshake(&mut link, settings)?;
        Ok(Box::new(link))
    }
}

impl std::fmt::Debug for MemoryDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDialer")
            .field("stores", &self.shared.stores.lock().len())
            .field("dials", &self.dial_count())
            .finish()
    }
}

struct MemoryLink {
    endpoint: Endpoint,
    shared: Arc<Shared>,
    /// Set by ASKING, cleared by the next command.
    asking: bool,
}

impl Link for MemoryLink {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn exchange(&mut self, commands: &[Command]) -> LinkResult<Vec<RedisValue>> {
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            if self.shared.is_down(&self.endpoint) {
                return Err(LinkError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    format!("{} went away", self.endpoint),
                )));
            }
            self.shared.commands.fetch_add(1, Ordering::SeqCst);
            if command.name == "ASKING" {
                self.asking = true;
                replies.push(RedisValue::ok());
                continue;
            }
            let asking = std::mem::take(&mut self.asking);
            replies.push(self.shared.answer(&self.endpoint, command, asking));
        }
        Ok(replies)
    }
}

impl Shared {
    fn is_down(&self, endpoint: &Endpoint) -> bool {
        self.down.lock().contains(endpoint)
    }

    fn store(&self, endpoint: &Endpoint) -> Arc<MemoryStore> {
        let mut stores = self.stores.lock();
        Arc::clone(stores.entry(endpoint.clone()).or_default())
    }

    fn answer(&self, endpoint: &Endpoint, command: &Command, asking: bool) -> RedisValue {
        let reply = match command.name.as_str() {
            "AUTH" | "SELECT" => Ok(RedisValue::ok()),
            "SENTINEL" => self.answer_sentinel(endpoint, command),
            "CLUSTER" => self.answer_cluster(command),
            _ => match self.refusal(endpoint, command, asking) {
                Some(refusal) => Err(refusal),
                None => return self.store(endpoint).execute(command),
            },
        };
        reply.unwrap_or_else(RedisValue::Error)
    }

    fn answer_sentinel(&self, endpoint: &Endpoint, command: &Command) -> Reply {
        if !command
            .arg_str(0)
            .is_some_and(|sub| sub.eq_ignore_ascii_case("get-master-addr-by-name"))
        {
            return Err(RedisError::generic("unknown SENTINEL subcommand"));
        }
        let name = command.arg_str(1).ok_or_else(|| RedisError::wrong_arity("sentinel"))?;
        let state = self.sentinel.lock();
        match state.as_ref() {
            Some(state) if state.sentinels.contains(endpoint) && state.master_name == name => {
                Ok(RedisValue::array(vec![
                    RedisValue::bulk_string(&state.primary.host),
                    RedisValue::bulk_string(state.primary.port.to_string()),
                ]))
            }
            Some(state) if state.sentinels.contains(endpoint) => Ok(RedisValue::Null),
            _ => Err(RedisError::generic("unknown command 'SENTINEL'")),
        }
    }

    fn answer_cluster(&self, command: &Command) -> Reply {
        if !command
            .arg_str(0)
            .is_some_and(|sub| sub.eq_ignore_ascii_case("SLOTS"))
        {
            return Err(RedisError::generic("unknown CLUSTER subcommand"));
        }
        let slots = self.slots.read();
        let slots = slots
            .as_ref()
            .ok_or_else(|| RedisError::generic("This instance has cluster support disabled"))?;

        let mut ranges = Vec::new();
        let mut start = 0usize;
        while start < slots.len() {
            let owner = &slots[start];
            let mut end = start;
            while end + 1 < slots.len() && &slots[end + 1] == owner {
                end += 1;
            }
            if let Some(owner) = owner {
                ranges.push(RedisValue::array(vec![
                    RedisValue::integer(start as i64),
                    RedisValue::integer(end as i64),
                    RedisValue::array(vec![
                        RedisValue::bulk_string(&owner.host),
                        RedisValue::integer(i64::from(owner.port)),
                    ]),
                ]));
            }
            start = end + 1;
        }
        Ok(RedisValue::array(ranges))
    }

    /// Error a node gives instead of running the command: a redirect when it
    /// does not serve the key's slot, READONLY when it was demoted.
    fn refusal(&self, endpoint: &Endpoint, command: &Command, asking: bool) -> Option<RedisError> {
        if let Some(state) = self.sentinel.lock().as_ref() {
            if state.demoted.contains(endpoint) && command.name != "PING" {
                return Some(RedisError::readonly());
            }
        }
        let slots = self.slots.read();
        let slots = slots.as_ref()?;
        let key = std::str::from_utf8(first_key(command)?).ok()?;
        let slot = key_slot(key);
        let migration = self.migrating.lock().get(&slot).cloned();
        match (&slots[slot as usize], migration) {
            (None, _) => Some(RedisError::new("CLUSTERDOWN", "Hash slot not served")),
            (Some(owner), Some(target)) if owner == endpoint => {
                if self.store(endpoint).contains(key) {
                    None
                } else {
                    Some(RedisError::new("ASK", format!("{} {}", slot, target)))
                }
            }
            (Some(_), Some(target)) if &target == endpoint && asking => None,
            (Some(owner), _) if owner != endpoint => {
                Some(RedisError::new("MOVED", format!("{} {}", slot, owner)))
            }
            (Some(_), _) => None,
        }
    }
}

fn first_key(command: &Command) -> Option<&Bytes> {
    match command.name.as_str() {
        "PING" | "KEYS" | "SCAN" | "FLUSHDB" | "FLUSHALL" | "DBSIZE" => None,
        "EVAL" => match command.arg_int(1) {
            Some(n) if n > 0 => command.arg_bytes(2),
            _ => None,
        },
        "BITOP" => command.arg_bytes(1),
        _ => command.arg_bytes(0),
    }
}

#[derive(Debug, Clone)]
enum Value {
    Str(Bytes),
    Hash(BTreeMap<Bytes, Bytes>),
    List(VecDeque<Bytes>),
    Set(BTreeSet<Bytes>),
    ZSet(HashMap<Bytes, f64>),
    Bits(BTreeSet<u64>),
    Hll(BTreeSet<Bytes>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) | Self::Bits(_) | Self::Hll(_) => "string",
            Self::Hash(_) => "hash",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::ZSet(_) => "zset",
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Hash(h) => h.is_empty(),
            Self::List(l) => l.is_empty(),
            Self::Set(s) => s.is_empty(),
            Self::ZSet(z) => z.is_empty(),
            Self::Str(_) | Self::Bits(_) | Self::Hll(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Data = HashMap<Bytes, Entry>;

/// One node's keyspace.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Data>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a string value directly.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        match self.execute(&Command::new("GET").arg(key)) {
            RedisValue::BulkString(b) => Some(b),
            _ => None,
        }
    }

    /// Write a string value directly.
    pub fn set(&self, key: &str, value: impl AsRef<[u8]>) {
        self.execute(&Command::new("SET").arg(key).arg(value));
    }

    /// Check if a live key exists.
    pub fn contains(&self, key: &str) -> bool {
        let mut data = self.data.lock();
        live(&mut data, key.as_bytes()).is_some()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.lock().values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run one command against the keyspace.
    pub fn execute(&self, command: &Command) -> RedisValue {
        let mut data = self.data.lock();
        dispatch(&mut data, command).unwrap_or_else(RedisValue::Error)
    }
}

fn dispatch(data: &mut Data, cmd: &Command) -> Reply {
    match cmd.name.as_str() {
        "PING" => Ok(match cmd.arg_bytes(0) {
            Some(msg) => RedisValue::bulk(msg.clone()),
            None => RedisValue::SimpleString("PONG".into()),
        }),
        "FLUSHDB" | "FLUSHALL" => {
            data.clear();
            Ok(RedisValue::ok())
        }
        "DBSIZE" => {
            let now = Instant::now();
            Ok(int(data.values().filter(|e| !e.is_expired(now)).count()))
        }

        // keys
        "DEL" | "UNLINK" => {
            cmd.require_min_argc(1)?;
            let removed = cmd
                .args
                .iter()
                .filter(|k| live(data, k).is_some() && data.remove(*k).is_some())
                .count();
            Ok(int(removed))
        }
        "EXISTS" => {
            cmd.require_min_argc(1)?;
            Ok(int(cmd.args.iter().filter(|k| live(data, k).is_some()).count()))
        }
        "EXPIRE" | "PEXPIRE" => {
            cmd.require_argc(2)?;
            let amount = int_arg(cmd, 1)?;
            let millis = if cmd.name == "EXPIRE" { amount.saturating_mul(1000) } else { amount };
            let key = arg(cmd, 0)?;
            match live(data, key) {
                None => Ok(int(0)),
                Some(_) if millis <= 0 => {
                    data.remove(key);
                    Ok(int(1))
                }
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + Duration::from_millis(millis as u64));
                    Ok(int(1))
                }
            }
        }
        "PERSIST" => {
            cmd.require_argc(1)?;
            match live(data, arg(cmd, 0)?) {
                Some(entry) if entry.expires_at.is_some() => {
                    entry.expires_at = None;
                    Ok(int(1))
                }
                _ => Ok(int(0)),
            }
        }
        "TTL" | "PTTL" => {
            cmd.require_argc(1)?;
            let remaining = match live(data, arg(cmd, 0)?) {
                None => return Ok(RedisValue::integer(-2)),
                Some(Entry { expires_at: None, .. }) => return Ok(RedisValue::integer(-1)),
                Some(Entry { expires_at: Some(at), .. }) => {
                    at.saturating_duration_since(Instant::now()).as_millis() as i64
                }
            };
            Ok(RedisValue::integer(if cmd.name == "TTL" {
                (remaining + 500) / 1000
            } else {
                remaining
            }))
        }
        "TYPE" => {
            cmd.require_argc(1)?;
            let name = live(data, arg(cmd, 0)?).map_or("none", |e| e.value.type_name());
            Ok(RedisValue::SimpleString(name.to_string()))
        }
        "RENAME" | "RENAMENX" => {
            cmd.require_argc(2)?;
            let (src, dst) = (arg(cmd, 0)?.clone(), arg(cmd, 1)?.clone());
            if live(data, &src).is_none() {
                return Err(RedisError::generic("no such key"));
            }
            if cmd.name == "RENAMENX" && live(data, &dst).is_some() {
                return Ok(int(0));
            }
            if let Some(entry) = data.remove(&src) {
                data.insert(dst, entry);
            }
            Ok(if cmd.name == "RENAMENX" { int(1) } else { RedisValue::ok() })
        }
        "KEYS" => {
            cmd.require_argc(1)?;
            let pattern = arg(cmd, 0)?.clone();
            Ok(bulk_array(matching_keys(data, &pattern)))
        }
        "SCAN" => scan(data, cmd),

        // strings
        "GET" => {
            cmd.require_argc(1)?;
            match live(data, arg(cmd, 0)?).map(|e| &e.value) {
                None => Ok(RedisValue::Null),
                Some(Value::Str(s)) => Ok(RedisValue::bulk(s.clone())),
                Some(Value::Bits(bits)) => materialize(bits).map(RedisValue::bulk),
                Some(_) => Err(RedisError::wrong_type()),
            }
        }
        "MGET" => {
            cmd.require_min_argc(1)?;
            let values = cmd
                .args
                .iter()
                .map(|k| match live(data, k).map(|e| &e.value) {
                    Some(Value::Str(s)) => RedisValue::bulk(s.clone()),
                    _ => RedisValue::Null,
                })
                .collect();
            Ok(RedisValue::array(values))
        }
        "SET" => set(data, cmd),
        "SETNX" => {
            cmd.require_argc(2)?;
            let key = arg(cmd, 0)?;
            if live(data, key).is_some() {
                return Ok(int(0));
            }
            data.insert(key.clone(), Entry::new(Value::Str(arg(cmd, 1)?.clone())));
            Ok(int(1))
        }
        "SETEX" | "PSETEX" => {
            cmd.require_argc(3)?;
            let amount = int_arg(cmd, 1)?;
            if amount <= 0 {
                return Err(RedisError::generic(format!(
                    "invalid expire time in '{}' command",
                    cmd.name.to_lowercase()
                )));
            }
            let millis = if cmd.name == "SETEX" { amount.saturating_mul(1000) } else { amount };
            let mut entry = Entry::new(Value::Str(arg(cmd, 2)?.clone()));
            entry.expires_at = Some(Instant::now() + Duration::from_millis(millis as u64));
            data.insert(arg(cmd, 0)?.clone(), entry);
            Ok(RedisValue::ok())
        }
        "MSET" => {
            if cmd.argc() == 0 || cmd.argc() % 2 != 0 {
                return Err(RedisError::wrong_arity(&cmd.name));
            }
            for pair in cmd.args.chunks(2) {
                data.insert(pair[0].clone(), Entry::new(Value::Str(pair[1].clone())));
            }
            Ok(RedisValue::ok())
        }
        "INCR" | "DECR" | "INCRBY" | "DECRBY" => {
            let delta = match cmd.name.as_str() {
                "INCR" => 1,
                "DECR" => -1,
                "INCRBY" => int_arg(cmd, 1)?,
                _ => int_arg(cmd, 1)?.checked_neg().ok_or_else(RedisError::not_integer)?,
            };
            let key = arg(cmd, 0)?;
            let current = match live(data, key).map(|e| &e.value) {
                None => 0,
                Some(Value::Str(s)) => parse_i64(s)?,
                Some(_) => return Err(RedisError::wrong_type()),
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| RedisError::generic("increment or decrement would overflow"))?;
            put_string(data, key, Bytes::from(next.to_string()));
            Ok(RedisValue::integer(next))
        }
        "INCRBYFLOAT" => {
            cmd.require_argc(2)?;
            let delta = float_arg(cmd, 1)?;
            let key = arg(cmd, 0)?;
            let current = match live(data, key).map(|e| &e.value) {
                None => 0.0,
                Some(Value::Str(s)) => parse_f64(s)?,
                Some(_) => return Err(RedisError::wrong_type()),
            };
            let next = current + delta;
            if !next.is_finite() {
                return Err(RedisError::generic("increment would produce NaN or Infinity"));
            }
            let text = format_score(next);
            put_string(data, key, Bytes::from(text.clone()));
            Ok(RedisValue::bulk_string(text))
        }
        "APPEND" => {
            cmd.require_argc(2)?;
            let key = arg(cmd, 0)?;
            let mut buf = match live(data, key).map(|e| &e.value) {
                None => Vec::new(),
                Some(Value::Str(s)) => s.to_vec(),
                Some(_) => return Err(RedisError::wrong_type()),
            };
            buf.extend_from_slice(arg(cmd, 1)?);
            let len = buf.len();
            put_string(data, key, Bytes::from(buf));
            Ok(int(len))
        }
        "STRLEN" => {
            cmd.require_argc(1)?;
            match live(data, arg(cmd, 0)?).map(|e| &e.value) {
                None => Ok(int(0)),
                Some(Value::Str(s)) => Ok(int(s.len())),
                Some(_) => Err(RedisError::wrong_type()),
            }
        }

        // hashes
        "HSET" | "HMSET" => {
            if cmd.argc() < 3 || cmd.argc() % 2 != 1 {
                return Err(RedisError::wrong_arity(&cmd.name));
            }
            let hash = typed_or_insert(data, arg(cmd, 0)?, || Value::Hash(BTreeMap::new()), as_hash)?;
            let added = cmd.args[1..]
                .chunks(2)
                .filter(|pair| hash.insert(pair[0].clone(), pair[1].clone()).is_none())
                .count();
            Ok(if cmd.name == "HSET" { int(added) } else { RedisValue::ok() })
        }
        "HSETNX" => {
            cmd.require_argc(3)?;
            let hash = typed_or_insert(data, arg(cmd, 0)?, || Value::Hash(BTreeMap::new()), as_hash)?;
            let field = arg(cmd, 1)?;
            if hash.contains_key(field) {
                return Ok(int(0));
            }
            hash.insert(field.clone(), arg(cmd, 2)?.clone());
            Ok(int(1))
        }
        "HGET" => {
            cmd.require_argc(2)?;
            let hash = typed(data, arg(cmd, 0)?, as_hash)?;
            Ok(hash
                .and_then(|h| h.get(arg(cmd, 1).ok()?).cloned())
                .map_or(RedisValue::Null, RedisValue::bulk))
        }
        "HMGET" => {
            cmd.require_min_argc(2)?;
            let hash = typed(data, arg(cmd, 0)?, as_hash)?;
            let values = cmd.args[1..]
                .iter()
                .map(|f| {
                    hash.as_ref()
                        .and_then(|h| h.get(f).cloned())
                        .map_or(RedisValue::Null, RedisValue::bulk)
                })
                .collect();
            Ok(RedisValue::array(values))
        }
        "HGETALL" | "HKEYS" | "HVALS" => {
            cmd.require_argc(1)?;
            let hash = typed(data, arg(cmd, 0)?, as_hash)?;
            let mut out = Vec::new();
            for (field, value) in hash.into_iter().flatten() {
                if cmd.name != "HVALS" {
                    out.push(RedisValue::bulk(field.clone()));
                }
                if cmd.name != "HKEYS" {
                    out.push(RedisValue::bulk(value.clone()));
                }
            }
            Ok(RedisValue::array(out))
        }
        "HDEL" => {
            cmd.require_min_argc(2)?;
            let key = arg(cmd, 0)?;
            let removed = match typed(data, key, as_hash)? {
                Some(hash) => cmd.args[1..].iter().filter(|f| hash.remove(*f).is_some()).count(),
                None => 0,
            };
            drop_if_empty(data, key);
            Ok(int(removed))
        }
        "HEXISTS" => {
            cmd.require_argc(2)?;
            let field = arg(cmd, 1)?;
            let found = typed(data, arg(cmd, 0)?, as_hash)?.is_some_and(|h| h.contains_key(field));
            Ok(int(usize::from(found)))
        }
        "HLEN" => {
            cmd.require_argc(1)?;
            Ok(int(typed(data, arg(cmd, 0)?, as_hash)?.map_or(0, |h| h.len())))
        }
        "HINCRBY" => {
            cmd.require_argc(3)?;
            let delta = int_arg(cmd, 2)?;
            let field = arg(cmd, 1)?.clone();
            let hash = typed_or_insert(data, arg(cmd, 0)?, || Value::Hash(BTreeMap::new()), as_hash)?;
            let current = hash.get(&field).map(|v| parse_i64(v)).transpose()?.unwrap_or(0);
            let next = current
                .checked_add(delta)
                .ok_or_else(|| RedisError::generic("increment or decrement would overflow"))?;
            hash.insert(field, Bytes::from(next.to_string()));
            Ok(RedisValue::integer(next))
        }

        // lists
        "LPUSH" | "RPUSH" => {
            cmd.require_min_argc(2)?;
            let list = typed_or_insert(data, arg(cmd, 0)?, || Value::List(VecDeque::new()), as_list)?;
            for value in &cmd.args[1..] {
                if cmd.name == "LPUSH" {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            Ok(int(list.len()))
        }
        "LPOP" | "RPOP" => {
            cmd.require_argc(1)?;
            let key = arg(cmd, 0)?;
            let popped = typed(data, key, as_list)?.and_then(|list| {
                if cmd.name == "LPOP" {
                    list.pop_front()
                } else {
                    list.pop_back()
                }
            });
            drop_if_empty(data, key);
            Ok(popped.map_or(RedisValue::Null, RedisValue::bulk))
        }
        "LRANGE" => {
            cmd.require_argc(3)?;
            let (start, stop) = (int_arg(cmd, 1)?, int_arg(cmd, 2)?);
            let list = typed(data, arg(cmd, 0)?, as_list)?;
            let items = match list {
                Some(list) => match range_bounds(list.len(), start, stop) {
                    Some((from, to)) => list.range(from..=to).cloned().collect(),
                    None => Vec::new(),
                },
                None => Vec::new(),
            };
            Ok(RedisValue::array(items.into_iter().map(RedisValue::bulk).collect()))
        }
        "LINDEX" => {
            cmd.require_argc(2)?;
            let index = int_arg(cmd, 1)?;
            let list = typed(data, arg(cmd, 0)?, as_list)?;
            Ok(list
                .and_then(|list| {
                    let len = list.len() as i64;
                    let index = if index < 0 { len + index } else { index };
                    (0..len).contains(&index).then(|| list[index as usize].clone())
                })
                .map_or(RedisValue::Null, RedisValue::bulk))
        }
        "LLEN" => {
            cmd.require_argc(1)?;
            Ok(int(typed(data, arg(cmd, 0)?, as_list)?.map_or(0, |l| l.len())))
        }
        "LREM" => {
            cmd.require_argc(3)?;
            let count = int_arg(cmd, 1)?;
            let key = arg(cmd, 0)?;
            let target = arg(cmd, 2)?;
            let removed = match typed(data, key, as_list)? {
                Some(list) => remove_from_list(list, count, target),
                None => 0,
            };
            drop_if_empty(data, key);
            Ok(int(removed))
        }
        "LTRIM" => {
            cmd.require_argc(3)?;
            let (start, stop) = (int_arg(cmd, 1)?, int_arg(cmd, 2)?);
            let key = arg(cmd, 0)?;
            if let Some(list) = typed(data, key, as_list)? {
                match range_bounds(list.len(), start, stop) {
                    Some((from, to)) => {
                        list.truncate(to + 1);
                        list.drain(..from);
                    }
                    None => list.clear(),
                }
            }
            drop_if_empty(data, key);
            Ok(RedisValue::ok())
        }
        "LSET" => {
            cmd.require_argc(3)?;
            let index = int_arg(cmd, 1)?;
            let value = arg(cmd, 2)?.clone();
            let list = typed(data, arg(cmd, 0)?, as_list)?
                .ok_or_else(|| RedisError::generic("no such key"))?;
            let len = list.len() as i64;
            let index = if index < 0 { len + index } else { index };
            if !(0..len).contains(&index) {
                return Err(RedisError::generic("index out of range"));
            }
            list[index as usize] = value;
            Ok(RedisValue::ok())
        }
        "RPOPLPUSH" => {
            cmd.require_argc(2)?;
            let (src, dst) = (arg(cmd, 0)?, arg(cmd, 1)?);
            if typed(data, dst, as_list)?.is_none() && live(data, dst).is_some() {
                return Err(RedisError::wrong_type());
            }
            let popped = typed(data, src, as_list)?.and_then(|list| list.pop_back());
            drop_if_empty(data, src);
            match popped {
                Some(value) => {
                    typed_or_insert(data, dst, || Value::List(VecDeque::new()), as_list)?
                        .push_front(value.clone());
                    Ok(RedisValue::bulk(value))
                }
                None => Ok(RedisValue::Null),
            }
        }

        // sets
        "SADD" => {
            cmd.require_min_argc(2)?;
            let set = typed_or_insert(data, arg(cmd, 0)?, || Value::Set(BTreeSet::new()), as_set)?;
            Ok(int(cmd.args[1..].iter().filter(|m| set.insert((*m).clone())).count()))
        }
        "SREM" => {
            cmd.require_min_argc(2)?;
            let key = arg(cmd, 0)?;
            let removed = match typed(data, key, as_set)? {
                Some(set) => cmd.args[1..].iter().filter(|m| set.remove(*m)).count(),
                None => 0,
            };
            drop_if_empty(data, key);
            Ok(int(removed))
        }
        "SMEMBERS" => {
            cmd.require_argc(1)?;
            let set = typed(data, arg(cmd, 0)?, as_set)?;
            Ok(bulk_array(set.map(|s| s.iter().cloned().collect()).unwrap_or_default()))
        }
        "SISMEMBER" => {
            cmd.require_argc(2)?;
            let member = arg(cmd, 1)?;
            let found = typed(data, arg(cmd, 0)?, as_set)?.is_some_and(|s| s.contains(member));
            Ok(int(usize::from(found)))
        }
        "SCARD" => {
            cmd.require_argc(1)?;
            Ok(int(typed(data, arg(cmd, 0)?, as_set)?.map_or(0, |s| s.len())))
        }
        "SPOP" => {
            cmd.require_argc(1)?;
            let key = arg(cmd, 0)?;
            let popped = typed(data, key, as_set)?.and_then(|set| set.pop_first());
            drop_if_empty(data, key);
            Ok(popped.map_or(RedisValue::Null, RedisValue::bulk))
        }
        "SMOVE" => {
            cmd.require_argc(3)?;
            let (src, dst, member) = (arg(cmd, 0)?, arg(cmd, 1)?, arg(cmd, 2)?);
            if typed(data, dst, as_set)?.is_none() && live(data, dst).is_some() {
                return Err(RedisError::wrong_type());
            }
            let moved = typed(data, src, as_set)?.is_some_and(|set| set.remove(member));
            drop_if_empty(data, src);
            if moved {
                typed_or_insert(data, dst, || Value::Set(BTreeSet::new()), as_set)?
                    .insert(member.clone());
            }
            Ok(int(usize::from(moved)))
        }

        // sorted sets
        "ZADD" => {
            if cmd.argc() < 3 || cmd.argc() % 2 != 1 {
                return Err(RedisError::wrong_arity(&cmd.name));
            }
            let pairs = cmd.args[1..]
                .chunks(2)
                .map(|pair| Ok((parse_f64(&pair[0])?, pair[1].clone())))
                .collect::<Result<Vec<_>, RedisError>>()?;
            let zset = typed_or_insert(data, arg(cmd, 0)?, || Value::ZSet(HashMap::new()), as_zset)?;
            Ok(int(pairs
                .into_iter()
                .filter(|(score, member)| zset.insert(member.clone(), *score).is_none())
                .count()))
        }
        "ZREM" => {
            cmd.require_min_argc(2)?;
            let key = arg(cmd, 0)?;
            let removed = match typed(data, key, as_zset)? {
                Some(zset) => cmd.args[1..].iter().filter(|m| zset.remove(*m).is_some()).count(),
                None => 0,
            };
            drop_if_empty(data, key);
            Ok(int(removed))
        }
        "ZSCORE" => {
            cmd.require_argc(2)?;
            let member = arg(cmd, 1)?;
            let score = typed(data, arg(cmd, 0)?, as_zset)?.and_then(|z| z.get(member).copied());
            Ok(score.map_or(RedisValue::Null, |s| RedisValue::bulk_string(format_score(s))))
        }
        "ZINCRBY" => {
            cmd.require_argc(3)?;
            let delta = float_arg(cmd, 1)?;
            let member = arg(cmd, 2)?.clone();
            let zset = typed_or_insert(data, arg(cmd, 0)?, || Value::ZSet(HashMap::new()), as_zset)?;
            let score = zset.entry(member).or_insert(0.0);
            *score += delta;
            Ok(RedisValue::bulk_string(format_score(*score)))
        }
        "ZCARD" => {
            cmd.require_argc(1)?;
            Ok(int(typed(data, arg(cmd, 0)?, as_zset)?.map_or(0, |z| z.len())))
        }
        "ZRANGE" => {
            cmd.require_min_argc(3)?;
            let (start, stop) = (int_arg(cmd, 1)?, int_arg(cmd, 2)?);
            let with_scores = cmd.arg_str(3).is_some_and(|s| s.eq_ignore_ascii_case("WITHSCORES"));
            let ordered = sorted_members(typed(data, arg(cmd, 0)?, as_zset)?);
            let slice = match range_bounds(ordered.len(), start, stop) {
                Some((from, to)) => &ordered[from..=to],
                None => &[][..],
            };
            Ok(scored_array(slice, with_scores))
        }
        "ZRANGEBYSCORE" => {
            cmd.require_min_argc(3)?;
            let min = parse_score_bound(arg(cmd, 1)?)?;
            let max = parse_score_bound(arg(cmd, 2)?)?;
            let with_scores = cmd.arg_str(3).is_some_and(|s| s.eq_ignore_ascii_case("WITHSCORES"));
            let ordered: Vec<(Bytes, f64)> = sorted_members(typed(data, arg(cmd, 0)?, as_zset)?)
                .into_iter()
                .filter(|(_, score)| min.admits_above(*score) && max.admits_below(*score))
                .collect();
            Ok(scored_array(&ordered, with_scores))
        }

        // bitmaps and hyperloglog
        "SETBIT" => {
            cmd.require_argc(3)?;
            let offset = u64::try_from(int_arg(cmd, 1)?)
                .map_err(|_| RedisError::generic("bit offset is not an integer or out of range"))?;
            let on = match &arg(cmd, 2)?[..] {
                b"1" => true,
                b"0" => false,
                _ => return Err(RedisError::generic("bit is not an integer or out of range")),
            };
            let key = arg(cmd, 0)?;
            let bits = bits_mut(data, key)?;
            let previous = if on { !bits.insert(offset) } else { bits.remove(&offset) };
            Ok(int(usize::from(previous)))
        }
        "GETBIT" => {
            cmd.require_argc(2)?;
            let offset = u64::try_from(int_arg(cmd, 1)?)
                .map_err(|_| RedisError::generic("bit offset is not an integer or out of range"))?;
            let set = match live(data, arg(cmd, 0)?).map(|e| &e.value) {
                None => false,
                Some(Value::Bits(bits)) => bits.contains(&offset),
                Some(Value::Str(s)) => bits_of(s).contains(&offset),
                Some(_) => return Err(RedisError::wrong_type()),
            };
            Ok(int(usize::from(set)))
        }
        "BITCOUNT" => {
            cmd.require_argc(1)?;
            match live(data, arg(cmd, 0)?).map(|e| &e.value) {
                None => Ok(int(0)),
                Some(Value::Bits(bits)) => Ok(int(bits.len())),
                Some(Value::Str(s)) => Ok(int(bits_of(s).len())),
                Some(_) => Err(RedisError::wrong_type()),
            }
        }
        "BITOP" => bitop(data, cmd),
        "PFADD" => {
            cmd.require_min_argc(1)?;
            let key = arg(cmd, 0)?;
            let created = live(data, key).is_none();
            let hll = typed_or_insert(data, key, || Value::Hll(BTreeSet::new()), as_hll)?;
            let changed = cmd.args[1..].iter().filter(|e| hll.insert((*e).clone())).count();
            Ok(int(usize::from(created || changed > 0)))
        }
        "PFCOUNT" => {
            cmd.require_min_argc(1)?;
            let mut union = BTreeSet::new();
            for key in &cmd.args {
                if let Some(hll) = typed(data, key, as_hll)? {
                    union.extend(hll.iter().cloned());
                }
            }
            Ok(int(union.len()))
        }

        "EVAL" => eval(data, cmd),
        other => Err(RedisError::generic(format!(
            "unknown command '{}'",
            other.to_lowercase()
        ))),
    }
}

fn set(data: &mut Data, cmd: &Command) -> Reply {
    cmd.require_min_argc(2)?;
    let (key, value) = (arg(cmd, 0)?, arg(cmd, 1)?);
    let (mut nx, mut xx, mut keep_ttl) = (false, false, false);
    let mut expiry: Option<Duration> = None;
    let mut i = 2;
    while i < cmd.argc() {
        let option = cmd.arg_str(i).unwrap_or("").to_uppercase();
        match option.as_str() {
            "NX" => nx = true,
            "XX" => xx = true,
            "KEEPTTL" => keep_ttl = true,
            "EX" | "PX" => {
                i += 1;
                let amount = int_arg(cmd, i)?;
                if amount <= 0 || expiry.is_some() {
                    return Err(RedisError::generic("invalid expire time in 'set' command"));
                }
                let millis = if option == "EX" { amount.saturating_mul(1000) } else { amount };
                expiry = Some(Duration::from_millis(millis as u64));
            }
            _ => return Err(RedisError::syntax()),
        }
        i += 1;
    }
    if nx && xx {
        return Err(RedisError::syntax());
    }

    let existing = live(data, key).map(|e| e.expires_at);
    if (nx && existing.is_some()) || (xx && existing.is_none()) {
        return Ok(RedisValue::Null);
    }
    let mut entry = Entry::new(Value::Str(value.clone()));
    entry.expires_at = match expiry {
        Some(ttl) => Some(Instant::now() + ttl),
        None if keep_ttl => existing.flatten(),
        None => None,
    };
    data.insert(key.clone(), entry);
    Ok(RedisValue::ok())
}

fn scan(data: &mut Data, cmd: &Command) -> Reply {
    cmd.require_min_argc(1)?;
    let cursor = usize::try_from(int_arg(cmd, 0)?)
        .map_err(|_| RedisError::generic("invalid cursor"))?;
    let mut pattern = Bytes::from_static(b"*");
    let mut count = 10usize;
    let mut i = 1;
    while i < cmd.argc() {
        match cmd.arg_str(i).unwrap_or("").to_uppercase().as_str() {
            "MATCH" => pattern = arg(cmd, i + 1)?.clone(),
            "COUNT" => {
                count = usize::try_from(int_arg(cmd, i + 1)?)
                    .ok()
                    .filter(|c| *c > 0)
                    .ok_or_else(RedisError::syntax)?
            }
            _ => return Err(RedisError::syntax()),
        }
        i += 2;
    }

    let mut keys: Vec<Bytes> = data.keys().cloned().collect();
    keys.sort();
    let end = (cursor + count).min(keys.len());
    let page: Vec<Bytes> = keys
        .get(cursor..end)
        .unwrap_or(&[])
        .iter()
        .filter(|k| live(data, k).is_some() && glob_match(&pattern, k))
        .cloned()
        .collect();
    let next = if end >= keys.len() { 0 } else { end };
    Ok(RedisValue::array(vec![
        RedisValue::bulk_string(next.to_string()),
        bulk_array(page),
    ]))
}

fn bitop(data: &mut Data, cmd: &Command) -> Reply {
    cmd.require_min_argc(3)?;
    let op = cmd.arg_str(0).unwrap_or("").to_uppercase();
    let dest = arg(cmd, 1)?.clone();
    let mut sources = Vec::new();
    for key in &cmd.args[2..] {
        sources.push(match live(data, key).map(|e| &e.value) {
            None => BTreeSet::new(),
            Some(Value::Bits(bits)) => bits.clone(),
            Some(Value::Str(s)) => bits_of(s),
            Some(_) => return Err(RedisError::wrong_type()),
        });
    }
    let width = sources
        .iter()
        .filter_map(|bits| bits.last())
        .max()
        .map_or(0, |max| max / 8 + 1);
    let result: BTreeSet<u64> = match op.as_str() {
        "AND" => {
            let mut iter = sources.iter();
            let first = iter.next().cloned().unwrap_or_default();
            iter.fold(first, |acc, bits| acc.intersection(bits).copied().collect())
        }
        "OR" => sources.iter().flatten().copied().collect(),
        "XOR" => sources.iter().fold(BTreeSet::new(), |acc, bits| {
            acc.symmetric_difference(bits).copied().collect()
        }),
        "NOT" => {
            if sources.len() != 1 {
                return Err(RedisError::generic(
                    "BITOP NOT must be called with a single source key.",
                ));
            }
            (0..width * 8).filter(|bit| !sources[0].contains(bit)).collect()
        }
        _ => return Err(RedisError::syntax()),
    };
    if width == 0 {
        data.remove(&dest);
    } else {
        data.insert(dest, Entry::new(Value::Bits(result)));
    }
    Ok(RedisValue::integer(width as i64))
}

fn eval(data: &mut Data, cmd: &Command) -> Reply {
    cmd.require_min_argc(2)?;
    let numkeys = usize::try_from(int_arg(cmd, 1)?)
        .map_err(|_| RedisError::generic("Number of keys can't be negative"))?;
    if cmd.argc() < 2 + numkeys {
        return Err(RedisError::generic(
            "Number of keys can't be greater than number of args",
        ));
    }
    if cmd.arg_bytes(0).map(|s| &s[..]) != Some(RELEASE_SCRIPT.as_bytes()) || numkeys != 1 {
        return Err(RedisError::generic(
            "the in-memory backend only evaluates the lock release script",
        ));
    }
    let key = arg(cmd, 2)?;
    let token = arg(cmd, 3)?;
    let holds = matches!(live(data, key).map(|e| &e.value), Some(Value::Str(v)) if v == token);
    if holds {
        data.remove(key);
        Ok(RedisValue::integer(1))
    } else {
        Ok(RedisValue::integer(0))
    }
}

// Helpers

fn live<'a>(data: &'a mut Data, key: &[u8]) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if data.get(key).is_some_and(|e| e.is_expired(now)) {
        data.remove(key);
    }
    data.get_mut(key)
}

fn typed<'a, T>(
    data: &'a mut Data,
    key: &[u8],
    pick: fn(&mut Value) -> Option<&mut T>,
) -> Result<Option<&'a mut T>, RedisError> {
    match live(data, key) {
        None => Ok(None),
        Some(entry) => pick(&mut entry.value)
            .map(Some)
            .ok_or_else(RedisError::wrong_type),
    }
}

fn typed_or_insert<'a, T>(
    data: &'a mut Data,
    key: &Bytes,
    make: fn() -> Value,
    pick: fn(&mut Value) -> Option<&mut T>,
) -> Result<&'a mut T, RedisError> {
    if live(data, key).is_none() {
        data.insert(key.clone(), Entry::new(make()));
    }
    match data.get_mut(key) {
        Some(entry) => pick(&mut entry.value).ok_or_else(RedisError::wrong_type),
        None => Err(RedisError::generic("key vanished")),
    }
}

fn bits_mut<'a>(data: &'a mut Data, key: &Bytes) -> Result<&'a mut BTreeSet<u64>, RedisError> {
    if let Some(entry) = live(data, key) {
        if let Value::Str(s) = &entry.value {
            entry.value = Value::Bits(bits_of(s));
        }
    }
    typed_or_insert(data, key, || Value::Bits(BTreeSet::new()), as_bits)
}

fn as_hash(v: &mut Value) -> Option<&mut BTreeMap<Bytes, Bytes>> {
    match v {
        Value::Hash(h) => Some(h),
        _ => None,
    }
}

fn as_list(v: &mut Value) -> Option<&mut VecDeque<Bytes>> {
    match v {
        Value::List(l) => Some(l),
        _ => None,
    }
}

fn as_set(v: &mut Value) -> Option<&mut BTreeSet<Bytes>> {
    match v {
        Value::Set(s) => Some(s),
        _ => None,
    }
}

fn as_zset(v: &mut Value) -> Option<&mut HashMap<Bytes, f64>> {
    match v {
        Value::ZSet(z) => Some(z),
        _ => None,
    }
}

fn as_bits(v: &mut Value) -> Option<&mut BTreeSet<u64>> {
    match v {
        Value::Bits(b) => Some(b),
        _ => None,
    }
}

fn as_hll(v: &mut Value) -> Option<&mut BTreeSet<Bytes>> {
    match v {
        Value::Hll(h) => Some(h),
        _ => None,
    }
}

fn drop_if_empty(data: &mut Data, key: &[u8]) {
    if data.get(key).is_some_and(|e| e.value.is_empty_collection()) {
        data.remove(key);
    }
}

/// Replace a string value, keeping its TTL.
fn put_string(data: &mut Data, key: &Bytes, value: Bytes) {
    let expires_at = live(data, key).and_then(|e| e.expires_at);
    data.insert(
        key.clone(),
        Entry {
            value: Value::Str(value),
            expires_at,
        },
    );
}

fn arg(cmd: &Command, index: usize) -> Result<&Bytes, RedisError> {
    cmd.arg_bytes(index)
        .ok_or_else(|| RedisError::wrong_arity(&cmd.name))
}

fn int_arg(cmd: &Command, index: usize) -> Result<i64, RedisError> {
    parse_i64(arg(cmd, index)?)
}

fn float_arg(cmd: &Command, index: usize) -> Result<f64, RedisError> {
    parse_f64(arg(cmd, index)?)
}

fn parse_i64(raw: &[u8]) -> Result<i64, RedisError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(RedisError::not_integer)
}

fn parse_f64(raw: &[u8]) -> Result<f64, RedisError> {
    let text = std::str::from_utf8(raw).map_err(|_| RedisError::generic("value is not a valid float"))?;
    let value = match text.to_ascii_lowercase().as_str() {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        other => other
            .parse::<f64>()
            .map_err(|_| RedisError::generic("value is not a valid float"))?,
    };
    if value.is_nan() {
        return Err(RedisError::generic("value is not a valid float"));
    }
    Ok(value)
}

fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

#[derive(Debug, Clone, Copy)]
struct ScoreBound {
    value: f64,
    exclusive: bool,
}

impl ScoreBound {
    fn admits_above(&self, score: f64) -> bool {
        if self.exclusive {
            score > self.value
        } else {
            score >= self.value
        }
    }

    fn admits_below(&self, score: f64) -> bool {
        if self.exclusive {
            score < self.value
        } else {
            score <= self.value
        }
    }
}

fn parse_score_bound(raw: &[u8]) -> Result<ScoreBound, RedisError> {
    match raw.split_first() {
        Some((b'(', rest)) => Ok(ScoreBound {
            value: parse_f64(rest)?,
            exclusive: true,
        }),
        _ => Ok(ScoreBound {
            value: parse_f64(raw)?,
            exclusive: false,
        }),
    }
}

fn sorted_members(zset: Option<&mut HashMap<Bytes, f64>>) -> Vec<(Bytes, f64)> {
    let mut members: Vec<(Bytes, f64)> = zset
        .map(|z| z.iter().map(|(m, s)| (m.clone(), *s)).collect())
        .unwrap_or_default();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    members
}

fn scored_array(members: &[(Bytes, f64)], with_scores: bool) -> RedisValue {
    let mut out = Vec::with_capacity(members.len() * if with_scores { 2 } else { 1 });
    for (member, score) in members {
        out.push(RedisValue::bulk(member.clone()));
        if with_scores {
            out.push(RedisValue::bulk_string(format_score(*score)));
        }
    }
    RedisValue::array(out)
}

/// Inclusive index range for LRANGE-style arguments, or None when empty.
fn range_bounds(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if start > stop || start >= len || stop < 0 {
        None
    } else {
        Some((start as usize, stop as usize))
    }
}

fn remove_from_list(list: &mut VecDeque<Bytes>, count: i64, target: &[u8]) -> usize {
    let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
    let mut removed = 0;
    if count >= 0 {
        let mut i = 0;
        while i < list.len() && removed < limit {
            if list[i] == target {
                list.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
    } else {
        let mut i = list.len();
        while i > 0 && removed < limit {
            i -= 1;
            if list[i] == target {
                list.remove(i);
                removed += 1;
            }
        }
    }
    removed
}

fn bits_of(bytes: &[u8]) -> BTreeSet<u64> {
    let mut bits = BTreeSet::new();
    for (index, byte) in bytes.iter().enumerate() {
        for bit in 0..8 {
            if byte & (0x80 >> bit) != 0 {
                bits.insert(index as u64 * 8 + bit);
            }
        }
    }
    bits
}

fn materialize(bits: &BTreeSet<u64>) -> Result<Bytes, RedisError> {
    let len = bits.last().map_or(0, |max| max / 8 + 1);
    if len > MAX_MATERIALIZED_BYTES {
        return Err(RedisError::generic("bitmap too large to read as a string"));
    }
    let mut out = vec![0u8; len as usize];
    for bit in bits {
        out[(bit / 8) as usize] |= 0x80 >> (bit % 8);
    }
    Ok(Bytes::from(out))
}

fn matching_keys(data: &mut Data, pattern: &[u8]) -> Vec<Bytes> {
    let now = Instant::now();
    data.retain(|_, e| !e.is_expired(now));
    let mut keys: Vec<Bytes> = data
        .keys()
        .filter(|k| glob_match(pattern, k))
        .cloned()
        .collect();
    keys.sort();
    keys
}

/// Glob matching with `*`, `?`, `[...]` classes and `\` escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                b'*' => {
                    star = Some((p, t));
                    p += 1;
                    continue;
                }
                b'?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                b'[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t]) {
                        if matched {
                            p = next;
                            t += 1;
                            continue;
                        }
                    }
                }
                b'\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c if c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((sp, st)) => {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

/// Match one byte against the class starting at `pattern[start] == '['`.
/// Returns (matched, index after the class).
fn match_class(pattern: &[u8], start: usize, byte: u8) -> Option<(bool, usize)> {
    let mut i = start + 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }
    let mut matched = false;
    while i < pattern.len() && pattern[i] != b']' {
        if pattern[i] == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == byte;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = (pattern[i].min(pattern[i + 2]), pattern[i].max(pattern[i + 2]));
            matched |= (lo..=hi).contains(&byte);
            i += 3;
        } else {
            matched |= pattern[i] == byte;
            i += 1;
        }
    }
    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}

fn int(n: usize) -> RedisValue {
    RedisValue::integer(n as i64)
}

fn bulk_array(items: Vec<Bytes>) -> RedisValue {
    RedisValue::array(items.into_iter().map(RedisValue::bulk).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::link::RedirectKind;

    fn run(store: &MemoryStore, parts: &[&str]) -> RedisValue {
        let mut cmd = Command::new(parts[0]);
        for part in &parts[1..] {
            cmd = cmd.arg(part);
        }
        store.execute(&cmd)
    }

    #[test]
    fn test_set_options() {
        let store = MemoryStore::new();
        assert!(run(&store, &["SET", "k", "v", "NX", "PX", "1000"]).is_ok_status());
        assert!(run(&store, &["SET", "k", "w", "NX"]).is_null());
        assert_eq!(store.get("k"), Some(Bytes::from("v")));
        assert!(run(&store, &["SET", "missing", "v", "XX"]).is_null());
        assert!(run(&store, &["SET", "k", "v", "NX", "XX"]).is_error());
        let pttl = run(&store, &["PTTL", "k"]).as_int().unwrap();
        assert!(pttl > 0 && pttl <= 1000);
    }

    #[test]
    fn test_expiry_is_lazy_but_observed() {
        let store = MemoryStore::new();
        run(&store, &["SET", "k", "v", "PX", "10"]);
        std::thread::sleep(Duration::from_millis(30));
        assert!(run(&store, &["GET", "k"]).is_null());
        assert_eq!(run(&store, &["TTL", "k"]), RedisValue::integer(-2));
    }

    #[test]
    fn test_wrong_type() {
        let store = MemoryStore::new();
        run(&store, &["LPUSH", "l", "a"]);
        let reply = run(&store, &["GET", "l"]);
        assert!(matches!(reply, RedisValue::Error(e) if e.kind == "WRONGTYPE"));
    }

    #[test]
    fn test_list_ops() {
        let store = MemoryStore::new();
        run(&store, &["RPUSH", "l", "a", "b", "c", "b"]);
        let range = run(&store, &["LRANGE", "l", "0", "-1"]).into_array().unwrap();
        assert_eq!(range.len(), 4);
        assert_eq!(run(&store, &["LREM", "l", "0", "b"]), RedisValue::integer(2));
        assert_eq!(run(&store, &["LINDEX", "l", "-1"]), RedisValue::bulk_string("c"));
        run(&store, &["LTRIM", "l", "1", "1"]);
        assert_eq!(run(&store, &["LLEN", "l"]), RedisValue::integer(1));
        run(&store, &["RPOP", "l"]);
        assert!(!store.contains("l"));
    }

    #[test]
    fn test_bitmap_and_string_views() {
        let store = MemoryStore::new();
        assert_eq!(run(&store, &["SETBIT", "b", "1", "1"]), RedisValue::integer(0));
        assert_eq!(run(&store, &["SETBIT", "b", "1", "1"]), RedisValue::integer(1));
        assert_eq!(run(&store, &["GETBIT", "b", "1"]), RedisValue::integer(1));
        assert_eq!(run(&store, &["GET", "b"]), RedisValue::bulk(Bytes::from_static(&[0x40])));
        run(&store, &["SETBIT", "huge", "4294967295", "1"]);
        assert_eq!(run(&store, &["BITCOUNT", "huge"]), RedisValue::integer(1));
    }

    #[test]
    fn test_release_script() {
        let store = MemoryStore::new();
        store.set("lock", "owner-a");
        let release = |token: &str| {
            store.execute(
                &Command::new("EVAL")
                    .arg(RELEASE_SCRIPT)
                    .arg("1")
                    .arg("lock")
                    .arg(token),
            )
        };
        assert_eq!(release("owner-b"), RedisValue::integer(0));
        assert!(store.contains("lock"));
        assert_eq!(release("owner-a"), RedisValue::integer(1));
        assert!(!store.contains("lock"));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"h[a-c]llo", b"hbllo"));
        assert!(glob_match(b"*", b""));
        assert!(!glob_match(b"user:*", b"session:1"));
    }

    #[test]
    fn test_scan_pages_through_keys() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store.set(&format!("k{:02}", i), "v");
        }
        let mut cursor = "0".to_string();
        let mut seen = 0;
        loop {
            let reply = run(&store, &["SCAN", &cursor, "COUNT", "10"]).into_array().unwrap();
            cursor = reply[0].as_str().unwrap().to_string();
            seen += reply[1].as_array().unwrap().len();
            if cursor == "0" {
                break;
            }
        }
        assert_eq!(seen, 25);
    }

    #[test]
    fn test_cluster_node_redirects_foreign_slots() {
        let a = Endpoint::new("10.0.0.1", 7000);
        let b = Endpoint::new("10.0.0.2", 7000);
        let dialer = MemoryDialer::new().with_cluster([(0..=8191, a.clone()), (8192..=16383, b.clone())]);
        let mut link = dialer.dial(&a, &LinkSettings::default()).unwrap();
        // "foo" hashes to slot 12182, owned by b.
        let err = link.request(&Command::new("GET").arg("foo")).unwrap_err();
        assert!(matches!(err, LinkError::Redirect(r) if r.endpoint == b && r.slot == 12182));
    }

    #[test]
    fn test_migrating_slot_asks_for_missing_keys() {
        let a = Endpoint::new("10.0.0.1", 7000);
        let b = Endpoint::new("10.0.0.2", 7000);
        let dialer = MemoryDialer::new().with_cluster([(0..=16383, a.clone())]);
        dialer.store(&a).set("foo", "kept");
        dialer.migrate_slot(12182, b.clone());

        let mut owner = dialer.dial(&a, &LinkSettings::default()).unwrap();
        let kept = owner.request(&Command::new("GET").arg("foo")).unwrap();
        assert_eq!(kept.as_bytes(), Some(&b"kept"[..]));
        // "{foo}:new" hashes to the same slot as "foo".
        let err = owner.request(&Command::new("GET").arg("{foo}:new")).unwrap_err();
        assert!(matches!(err, LinkError::Redirect(r) if r.kind == RedirectKind::Ask && r.endpoint == b));

        let mut target = dialer.dial(&b, &LinkSettings::default()).unwrap();
        let err = target.request(&Command::new("GET").arg("{foo}:new")).unwrap_err();
        assert!(matches!(err, LinkError::Redirect(r) if r.kind == RedirectKind::Moved && r.endpoint == a));
        let replies = target
            .pipeline(&[Command::new("ASKING"), Command::new("GET").arg("{foo}:new")])
            .unwrap();
        assert!(replies[1].is_null());
    }
}
