//! The client conductor as seen from a publication.
//!
//! A publication owns no control-plane state. Closing it, changing its
//! destinations and querying its channel all go through the conductor that
//! registered it, which speaks to the driver.

use crate::error::Result;
use std::fmt::Debug;

/// Status of a channel endpoint as reported by its status counter.
pub mod channel_endpoint_status {
    pub const INITIALIZING: i64 = 0;
    pub const ERRORED: i64 = -1;
    pub const ACTIVE: i64 = 1;
    pub const CLOSING: i64 = 2;

    /// Channel status id of a publication that has no status counter, and the
    /// status reported for one that is closed.
    pub const NO_ID_ALLOCATED: i64 = -1;
}

/// Commands a publication forwards to its conductor.
///
/// Synchronous destination methods return once the driver has acknowledged
/// the command; the `async_*` variants return the correlation id of the
/// command without waiting.
pub trait Conductor: Send + Sync + Debug {
    /// Releases a publication. Returning `Ok` means the driver acknowledged
    /// the removal and the log may be unmapped once the last handle is gone.
    fn remove_publication(&self, registration_id: i64) -> Result<()>;

    fn add_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<()>;

    fn remove_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<()>;

    fn remove_destination_by_id(&self, registration_id: i64, destination_registration_id: i64) -> Result<()>;

    fn async_add_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<i64>;

    fn async_remove_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<i64>;

    fn async_remove_destination_by_id(
        &self,
        registration_id: i64,
        destination_registration_id: i64,
    ) -> Result<i64>;

    /// Current value of the channel status counter `channel_status_id`.
    fn channel_status(&self, channel_status_id: i32) -> i64;

    /// Bound local socket addresses of the channel, if it is active.
    fn local_socket_addresses(&self, channel_status: i64, channel_status_id: i32) -> Vec<String>;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Command {
        RemovePublication(i64),
        AddDestination(i64, String),
        RemoveDestination(i64, String),
        RemoveDestinationById(i64, i64),
    }

    /// Conductor that records commands and acknowledges them immediately.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingConductor {
        commands: Mutex<Vec<Command>>,
        reject_removal: bool,
        next_correlation_id: AtomicI64,
    }

    impl RecordingConductor {
        pub(crate) fn rejecting_removal() -> Self {
            Self {
                reject_removal: true,
                ..Self::default()
            }
        }

        fn record(&self, command: Command) {
            self.commands.lock().unwrap().push(command);
        }

        fn correlation_id(&self) -> i64 {
            self.next_correlation_id.fetch_add(1, Ordering::Relaxed) + 100
        }

        pub(crate) fn commands(&self) -> Vec<Command> {
            self.commands.lock().unwrap().clone()
        }
    }

    impl Conductor for RecordingConductor {
        fn remove_publication(&self, registration_id: i64) -> Result<()> {
            if self.reject_removal {
                return Err(Error::Conductor("driver timeout".into()));
            }
            self.record(Command::RemovePublication(registration_id));
            Ok(())
        }

        fn add_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<()> {
            self.record(Command::AddDestination(registration_id, endpoint_channel.into()));
            Ok(())
        }

        fn remove_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<()> {
            self.record(Command::RemoveDestination(registration_id, endpoint_channel.into()));
            Ok(())
        }

        fn remove_destination_by_id(&self, registration_id: i64, destination_registration_id: i64) -> Result<()> {
            self.record(Command::RemoveDestinationById(registration_id, destination_registration_id));
            Ok(())
        }

        fn async_add_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<i64> {
            self.record(Command::AddDestination(registration_id, endpoint_channel.into()));
            Ok(self.correlation_id())
        }

        fn async_remove_destination(&self, registration_id: i64, endpoint_channel: &str) -> Result<i64> {
            self.record(Command::RemoveDestination(registration_id, endpoint_channel.into()));
            Ok(self.correlation_id())
        }

        fn async_remove_destination_by_id(
            &self,
            registration_id: i64,
            destination_registration_id: i64,
        ) -> Result<i64> {
            self.record(Command::RemoveDestinationById(registration_id, destination_registration_id));
            Ok(self.correlation_id())
        }

        fn channel_status(&self, _channel_status_id: i32) -> i64 {
            channel_endpoint_status::ACTIVE
        }

        fn local_socket_addresses(&self, channel_status: i64, _channel_status_id: i32) -> Vec<String> {
            if channel_status == channel_endpoint_status::ACTIVE {
                vec!["127.0.0.1:40123".to_string()]
            } else {
                Vec::new()
            }
        }
    }
}
