//! Builtin script commands.
//!
//! | Command               | Effect                                          |
//! |-----------------------|-------------------------------------------------|
//! | `!echo(str)`          | Print the string                                |
//! | `!printf(str, int)`   | Print `"<str>, <int>"` and add the int to total |
//! | `!assert(bool, str)`  | Fail the run with the message when false        |
//! | `!sleep(float)`       | Wait the given number of seconds                |

use async_trait::async_trait;
use lln_command_api::{AsyncCommandHandler, CommandArgs, CommandResult, RegistryBuilder};
use lln_runtime::{ArgType, CallbackError, RegistrationError};
use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Where builtin commands print.
pub type Output = Arc<Mutex<dyn Write + Send>>;

/// Shared state of the builtin commands.
#[derive(Clone)]
pub struct Builtins {
    output: Output,
    total: Arc<AtomicI64>,
}

impl Builtins {
    pub fn stdout() -> Self {
        Self::with_output(Arc::new(Mutex::new(std::io::stdout())))
    }

    pub fn with_output(output: Output) -> Self {
        Self {
            output,
            total: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Sum of every integer passed to `!printf` so far.
    pub fn total(&self) -> i64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Declare all builtins on `builder`.
    pub fn register(&self, builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
        let output = self.output.clone();
        builder.register("!echo", [ArgType::Str], move |args: &CommandArgs| -> CommandResult {
            let text = args.str(0)?.unwrap_or("");
            print_line(&output, text)
        })?;

        let output = self.output.clone();
        let total = Arc::clone(&self.total);
        builder.register(
            "!printf",
            [ArgType::Str, ArgType::Int],
            move |args: &CommandArgs| -> CommandResult {
                let label = args.str(0)?.unwrap_or("");
                let value = args.int(1)?;
                print_line(&output, &format!("{}, {}", label, value))?;
                total.fetch_add(i64::from(value), Ordering::SeqCst);
                Ok(())
            },
        )?;

        builder.register(
            "!assert",
            [ArgType::Bool, ArgType::Str],
            |args: &CommandArgs| -> CommandResult {
                if args.bool(0)? {
                    return Ok(());
                }
                let message = args.str(1)?.unwrap_or("no message");
                Err(CallbackError::new(format!("assertion failed: {}", message)))
            },
        )?;

        builder.register_async("!sleep", [ArgType::Float], SleepCommand)?;
        Ok(())
    }
}

fn print_line(output: &Output, text: &str) -> CommandResult {
    let mut out = output
        .lock()
        .map_err(|_| CallbackError::new("output lock poisoned"))?;
    writeln!(out, "{}", text)
        .and_then(|_| out.flush())
        .map_err(|e| CallbackError::with_source("failed to write output", e))
}

/// `!sleep(seconds)` on the tokio timer.
struct SleepCommand;

#[async_trait]
impl AsyncCommandHandler for SleepCommand {
    async fn call(&self, args: &CommandArgs) -> CommandResult {
        let seconds = args.float(0)?;
        let duration = Duration::try_from_secs_f32(seconds).map_err(|e| {
            CallbackError::with_source(format!("cannot sleep for {} seconds", seconds), e)
        })?;
        debug!("Sleeping for {:?}", duration);
        tokio::time::sleep(duration).await;
        Ok(())
    }
}
