use crate::client::{Client, Reply};
use crate::error::TesError;

/// Command execution bound to one 1-based channel slot.
///
/// Handles are stateless beyond their index; the mutable link state lives
/// in the shared [`Client`].
#[derive(Clone)]
pub struct ChannelHandle {
    index: usize,
    client: Client,
}

impl ChannelHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Issue one fresh exchange for this channel. Nothing is cached.
    pub fn execute(&self, command: &str) -> Result<Reply, TesError> {
        self.client.exchange(command)
    }
}

/// Fixed-size, 1-indexed set of per-channel handles for one instrument
/// kind. The size never changes after construction; the bias and amplifier
/// registries are independent and never share index space.
pub struct ChannelRegistry {
    handles: Vec<ChannelHandle>,
}

impl ChannelRegistry {
    /// Build `count` handles eagerly, all bound to the same client.
    pub fn new(client: &Client, count: usize) -> Self {
        let handles = (1..=count)
            .map(|index| ChannelHandle {
                index,
                client: client.clone(),
            })
            .collect();
        ChannelRegistry { handles }
    }

    pub fn count(&self) -> usize {
        self.handles.len()
    }

    /// Look up a handle, failing for any index outside `[1, count]`.
    pub fn for_channel(&self, index: usize) -> Result<&ChannelHandle, TesError> {
        if index == 0 || index > self.handles.len() {
            return Err(TesError::OutOfRange {
                index,
                count: self.handles.len(),
            });
        }
        Ok(&self.handles[index - 1])
    }
}
