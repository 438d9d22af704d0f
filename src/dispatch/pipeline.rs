//! Command batching.
//!
//! A [`Pipeline`] collects commands and sends them with as few round trips as
//! the topology allows: one for standalone and replicated deployments, one
//! per node otherwise. Replies come back in submission order and error
//! replies stay inline, one per failed command.

use super::{Remote, MAX_ATTEMPTS};
use crate::connector::{check_reply, CommandClass, Connector, LinkError, Op, Redirect, Route};
use crate::core::error::{TrellisError, TrellisResult};
use crate::protocol::{Command, RedisValue};

/// An ordered batch of commands.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    entries: Vec<(Option<String>, Command)>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a command routed by `key`.
    pub fn keyed(&mut self, key: &str, command: Command) -> &mut Self {
        self.entries.push((Some(key.to_string()), command));
        self
    }

    /// Queue a command any node may answer.
    pub fn keyless(&mut self, command: Command) -> &mut Self {
        self.entries.push((None, command));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Remote {
    /// Send a batch, returning one reply per command in submission order.
    ///
    /// Transport failures abort the whole batch. Error replies are returned
    /// in place. On a cluster, commands answered with `MOVED` or `ASK` are
    /// sent again to the node named in the redirect, up to
    /// [`MAX_ATTEMPTS`] rounds; a redirect still pending after that is
    /// returned in place like any other error reply.
    pub fn pipeline(&self, batch: &Pipeline) -> TrellisResult<Vec<RedisValue>> {
        self.admit(&Op::new("PIPELINE", CommandClass::Pipeline, Vec::new()))?;
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let clustered = matches!(self.connector(), Connector::Clustered(_));

        let mut pending: Vec<(Route<'static>, Vec<usize>)> = Vec::new();
        for (index, (key, _)) in batch.entries.iter().enumerate() {
            let route = self
                .connector()
                .group_of(key.as_deref())
                .map_err(|e| TrellisError::dispatch("PIPELINE", e))?;
            add_to_group(&mut pending, route, index);
        }

        let mut replies = vec![RedisValue::Null; batch.len()];
        let mut attempt = 1;
        while !pending.is_empty() {
            let mut redirected = Vec::new();
            for (route, members) in pending {
                let results = self.send_group(batch, route, &members)?;
                for (index, reply) in members.into_iter().zip(results) {
                    let redirect = match &reply {
                        RedisValue::Error(error) => Redirect::from_reply(error),
                        _ => None,
                    };
                    match redirect {
                        Some(redirect) if clustered && attempt < MAX_ATTEMPTS => {
                            add_to_group(&mut redirected, self.follow(&redirect), index);
                        }
                        Some(redirect) => {
                            self.connector().on_redirect(&redirect);
                            replies[index] = reply;
                        }
                        None => replies[index] = reply,
                    }
                }
            }
            for (route, members) in &mut redirected {
                members.sort_unstable();
                tracing::debug!(route = ?route, commands = members.len(), attempt, "resending redirected commands");
            }
            pending = redirected;
            attempt += 1;
        }
        Ok(replies)
    }

    /// One round trip to the node behind `route`. A migrating-slot route
    /// prefixes every command with `ASKING`, which only covers the command
    /// right after it.
    fn send_group(
        &self,
        batch: &Pipeline,
        route: Route<'static>,
        members: &[usize],
    ) -> TrellisResult<Vec<RedisValue>> {
        let (route, asking) = match route {
            Route::Asking(endpoint) => (Route::Node(endpoint), true),
            other => (other, false),
        };
        let mut commands = Vec::with_capacity(members.len() * if asking { 2 } else { 1 });
        for &index in members {
            if asking {
                commands.push(Command::new("ASKING"));
            }
            commands.push(batch.entries[index].1.clone());
        }

        self.execute_routed("PIPELINE", route, |link| {
            let mut results = link.pipeline(&commands)?;
            if results.len() != commands.len() {
                return Err(LinkError::Protocol(format!(
                    "sent {} commands, got {} replies",
                    commands.len(),
                    results.len()
                )));
            }
            if asking {
                results = results.into_iter().skip(1).step_by(2).collect();
            }
            Ok(results)
        })
    }

    /// Send a batch and fail on the first error reply.
    pub fn pipeline_checked(&self, batch: &Pipeline) -> TrellisResult<Vec<RedisValue>> {
        self.pipeline(batch)?
            .into_iter()
            .map(|reply| check_reply(reply).map_err(|e| TrellisError::dispatch("PIPELINE", e)))
            .collect()
    }
}

fn add_to_group(groups: &mut Vec<(Route<'static>, Vec<usize>)>, route: Route<'static>, index: usize) {
    match groups.iter_mut().find(|(r, _)| *r == route) {
        Some((_, members)) => members.push(index),
        None => groups.push((route, vec![index])),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{Connector, Endpoint, MemoryDialer, Topology};
    use crate::core::config::TopologyConfig;
    use std::sync::Arc;

    #[test]
    fn test_replies_keep_submission_order_across_nodes() {
        let a = Endpoint::new("10.0.0.1", 7000);
        let b = Endpoint::new("10.0.0.2", 7000);
        let dialer = MemoryDialer::new().with_cluster([(0..=8191, a), (8192..=16383, b)]);
        let config = TopologyConfig::new(Topology::Clustered, ["10.0.0.1:7000"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));

        let mut batch = Pipeline::new();
        for key in ["foo", "bar", "baz", "qux"] {
            batch.keyed(key, Command::new("SET").arg(key).arg(key.to_uppercase()));
        }
        for key in ["qux", "foo", "bar", "baz"] {
            batch.keyed(key, Command::new("GET").arg(key));
        }
        let replies = remote.pipeline_checked(&batch).unwrap();
        assert_eq!(replies.len(), 8);
        assert_eq!(replies[4], RedisValue::bulk_string("QUX"));
        assert_eq!(replies[5], RedisValue::bulk_string("FOO"));
        assert_eq!(replies[7], RedisValue::bulk_string("BAZ"));
    }

    #[test]
    fn test_ask_resends_with_asking_and_keeps_slot_owner() {
        let a = Endpoint::new("10.0.0.1", 7000);
        let b = Endpoint::new("10.0.0.2", 7000);
        let dialer = MemoryDialer::new().with_cluster([(0..=16383, a.clone())]);
        let config = TopologyConfig::new(Topology::Clustered, ["10.0.0.1:7000"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(dialer.clone())));

        dialer.store(&a).set("foo", "still-on-a");
        dialer.store(&b).set("{foo}:moved", "on-b");
        dialer.migrate_slot(12182, b.clone());

        let mut batch = Pipeline::new();
        for key in ["foo", "{foo}:moved", "bar"] {
            batch.keyed(key, Command::new("GET").arg(key));
        }
        let replies = remote.pipeline_checked(&batch).unwrap();
        assert_eq!(replies[0].as_bytes(), Some(&b"still-on-a"[..]));
        assert_eq!(replies[1].as_bytes(), Some(&b"on-b"[..]));
        assert!(replies[2].is_null());

        // ASK is one-off: the next read of a key still on a goes straight there.
        let before = dialer.command_count();
        assert_eq!(remote.get("foo").unwrap().as_deref(), Some(&b"still-on-a"[..]));
        assert_eq!(dialer.command_count() - before, 1);
    }

    #[test]
    fn test_error_replies_stay_inline() {
        let config = TopologyConfig::new(Topology::Standalone, ["127.0.0.1"]);
        let remote = Remote::new(Connector::new(&config, Arc::new(MemoryDialer::new())));
        let mut batch = Pipeline::new();
        batch
            .keyed("l", Command::new("LPUSH").arg("l").arg("x"))
            .keyed("l", Command::new("GET").arg("l"))
            .keyless(Command::new("PING"));
        let replies = remote.pipeline(&batch).unwrap();
        assert_eq!(replies[0], RedisValue::integer(1));
        assert!(replies[1].is_error());
        assert!(remote.pipeline_checked(&batch).is_err());
    }
}
