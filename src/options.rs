use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;

use crate::clock::{self, Clock};
use crate::handler::{NoHandler, RequestHandler};
use crate::rng::{self, Random};

/// Default per-outbound-request timeout applied by [`crate::connection::Connection::request`]
/// when the caller does not specify one.
pub const DEFAULT_OUTGOING_REQ_TIMEOUT: Duration = Duration::from_millis(2000);

/// The handler `Options::default()` installs. `Channel::new` compares an
/// incoming `Options::handler` against this singleton by pointer identity
/// to decide whether the caller left the handler unset (and so gets the
/// channel's own endpoint router wired up for `Channel::register`) or
/// supplied a custom one (which `register` must then refuse to touch).
pub(crate) static DEFAULT_HANDLER: Lazy<Arc<dyn RequestHandler>> =
    Lazy::new(|| Arc::new(NoHandler));

/// Channel-wide configuration. Constructed with [`Options::default`] and
/// overridden field-by-field; the `clock`/`random` seams exist so tests can
/// run the timeout sweep deterministically.
#[derive(Clone)]
pub struct Options {
    /// Per-outbound-request timeout used by the sweep when a request carries
    /// no `ttl` of its own.
    pub req_timeout_default: Duration,
    /// Per-inbound-request timeout used by the sweep.
    pub server_timeout_default: Duration,
    /// Base period of the timeout sweep.
    pub timeout_check_interval: Duration,
    /// +/- jitter window applied around `timeout_check_interval`.
    pub timeout_fuzz: Duration,
    /// Advertised in the init handshake.
    pub process_name: String,
    /// Explicit bound on live outbound call ids per connection, enforced by
    /// `Connection::allocate_call_id`'s wraparound-collision retry loop.
    pub max_outstanding_outbound: u32,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn Random>,
    pub handler: Arc<dyn RequestHandler>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            req_timeout_default: Duration::from_millis(5000),
            server_timeout_default: Duration::from_millis(5000),
            timeout_check_interval: Duration::from_millis(1000),
            timeout_fuzz: Duration::from_millis(100),
            process_name: std::env::current_exe()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .unwrap_or_else(|| "tchannel-rs".to_string()),
            max_outstanding_outbound: 4 * 1024 * 1024,
            clock: clock::system(),
            random: rng::system(),
            handler: DEFAULT_HANDLER.clone(),
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("req_timeout_default", &self.req_timeout_default)
            .field("server_timeout_default", &self.server_timeout_default)
            .field("timeout_check_interval", &self.timeout_check_interval)
            .field("timeout_fuzz", &self.timeout_fuzz)
            .field("process_name", &self.process_name)
            .field("max_outstanding_outbound", &self.max_outstanding_outbound)
            .finish()
    }
}
