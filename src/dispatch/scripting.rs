//! Server-side scripting.

use super::{require_keys, Remote};
use crate::connector::{check_reply, CommandClass, Op};
use crate::core::error::{TrellisError, TrellisResult};
use crate::protocol::{Command, RedisValue};

/// Build an EVAL command.
pub(crate) fn eval_command<A: AsRef<[u8]>>(script: &str, keys: &[&str], args: &[A]) -> Command {
    Command::new("EVAL")
        .arg(script)
        .arg_num(keys.len())
        .args(keys)
        .args(args)
}

impl Remote {
    /// Evaluate a script. Rejected on the sharded topology.
    pub fn eval<A: AsRef<[u8]>>(
        &self,
        script: &str,
        keys: &[&str],
        args: &[A],
    ) -> TrellisResult<RedisValue> {
        if script.trim().is_empty() {
            return Err(TrellisError::precondition("script must not be empty"));
        }
        if !keys.is_empty() {
            require_keys(keys)?;
        }
        let command = eval_command(script, keys, args);
        self.call(
            Op::new("EVAL", CommandClass::Scripting, keys.to_vec()),
            command,
            check_reply,
        )
    }
}
