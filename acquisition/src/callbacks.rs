/*!
Driver-facing callback table.

At arm time the controller hands the driver a [`CallbackTable`]: for every
armed channel a `describe`, a `lock` and an `unlock` hook, plus one `finish`
hook for the terminal "scan finished" signal. Hooks close over their channel
id and never panic or return errors to the driver; failures are parked on
the composition engine and surfaced by the next poll of the controller.
*/

use shared::{AcqError, AcquisitionMode, ChannelDescriptor, ChannelId, ChannelSet};
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

/// How the driver finished with a lent buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Write complete; counts towards the cycle
    Filled,
    /// Valid data, but the cycle is still being written (line-by-line updates)
    InProgress,
    /// The write failed; the buffer is simply handed back
    NoData,
}

impl Commit {
    /// Map the native `(success, partial)` flag pair
    pub fn from_flags(success: bool, partial: bool) -> Self {
        match (success, partial) {
            (false, _) => Self::NoData,
            (true, true) => Self::InProgress,
            (true, false) => Self::Filled,
        }
    }

    pub fn has_data(self) -> bool {
        self != Self::NoData
    }
}

/// A buffer lent to the driver between `lock` and `unlock`.
///
/// The address stays valid until the registry is reallocated, which only
/// happens while no mode is armed.
#[derive(Debug)]
pub struct Lease {
    pub channel: ChannelId,
    pub descriptor: ChannelDescriptor,
    ptr: NonNull<u8>,
}

// The pointee is owned by the registry, which keeps it alive and unmoved for
// the whole activation; the lease only carries the address to the writer.
unsafe impl Send for Lease {}

impl Lease {
    pub(crate) fn new(channel: ChannelId, descriptor: ChannelDescriptor, ptr: NonNull<u8>) -> Self {
        Self { channel, descriptor, ptr }
    }

    /// Raw address handed to native code
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn byte_len(&self) -> usize {
        self.descriptor.byte_len()
    }

    /// Element type code the driver reads back with the address
    pub fn type_code(&self) -> u8 {
        self.descriptor.element_type.code()
    }

    /// Mutable view of the lent buffer.
    ///
    /// # Safety
    ///
    /// The caller must hold the lease for the duration of the borrow and must
    /// not use it after the matching `unlock`, nor after the owning mode has
    /// been disarmed and the registry reallocated.
    pub unsafe fn bytes_mut(&mut self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.byte_len())
    }
}

pub type DescribeHook = Arc<dyn Fn() -> Option<ChannelDescriptor> + Send + Sync>;
pub type LockHook = Arc<dyn Fn() -> Option<Lease> + Send + Sync>;
pub type UnlockHook = Arc<dyn Fn(u64, Commit) + Send + Sync>;
pub type FinishHook = Arc<dyn Fn(u64) + Send + Sync>;
pub type ViolationHook = Arc<dyn Fn(AcqError) + Send + Sync>;

/// Hooks of one armed channel
#[derive(Clone)]
pub struct ChannelHooks {
    pub describe: DescribeHook,
    pub lock: LockHook,
    pub unlock: UnlockHook,
}

/// Capability table registered on the driver for one mode activation
#[derive(Clone)]
pub struct CallbackTable {
    mode: AcquisitionMode,
    epoch: u64,
    hooks: BTreeMap<ChannelId, ChannelHooks>,
    finish: FinishHook,
    violation: ViolationHook,
}

impl CallbackTable {
    pub fn new(mode: AcquisitionMode, epoch: u64, finish: FinishHook, violation: ViolationHook) -> Self {
        Self {
            mode,
            epoch,
            hooks: BTreeMap::new(),
            finish,
            violation,
        }
    }

    pub fn with_channel(mut self, channel: ChannelId, hooks: ChannelHooks) -> Self {
        self.hooks.insert(channel, hooks);
        self
    }

    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    /// Activation this table belongs to
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn channels(&self) -> ChannelSet {
        self.hooks.keys().copied().collect()
    }

    pub fn describe(&self, channel: ChannelId) -> Option<ChannelDescriptor> {
        match self.hooks.get(&channel) {
            Some(hooks) => (hooks.describe)(),
            None => {
                self.unknown(channel, "describe");
                None
            }
        }
    }

    /// Claim the channel buffer; `None` means the claim was refused and the
    /// driver must skip this write
    pub fn lock(&self, channel: ChannelId) -> Option<Lease> {
        match self.hooks.get(&channel) {
            Some(hooks) => (hooks.lock)(),
            None => {
                self.unknown(channel, "lock");
                None
            }
        }
    }

    pub fn unlock(&self, channel: ChannelId, cycle: u64, commit: Commit) {
        match self.hooks.get(&channel) {
            Some(hooks) => (hooks.unlock)(cycle, commit),
            None => self.unknown(channel, "unlock"),
        }
    }

    /// Terminal "scan finished" signal for `cycle`
    pub fn finish(&self, cycle: u64) {
        (self.finish)(cycle)
    }

    fn unknown(&self, channel: ChannelId, call: &str) {
        (self.violation)(AcqError::violation(
            channel,
            format!("{} called for a channel not armed in {}", call, self.mode),
        ));
    }
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackTable")
            .field("mode", &self.mode)
            .field("epoch", &self.epoch)
            .field("channels", &self.channels())
            .finish()
    }
}
