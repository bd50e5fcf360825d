//! Channel Table

use crate::decoder::ChannelUpdate;
use crate::frame::ChannelIndex;
use crate::wire::CHANNEL_COUNT;
use serde::Serialize;

/// Current value of every channel, last value wins
///
/// Entries start at 0 and are only written through [`ChannelTable::apply`],
/// which takes a [`ChannelUpdate`] that only the decoder can produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelTable {
    values: [i16; CHANNEL_COUNT],
}

impl ChannelTable {
    /// Create a table with every channel at 0
    pub const fn new() -> Self {
        Self {
            values: [0; CHANNEL_COUNT],
        }
    }

    /// Most recent value for a channel
    pub fn get(&self, index: ChannelIndex) -> i16 {
        self.values[index.as_usize()]
    }

    /// Value for a raw index, `None` outside the table
    pub fn get_checked(&self, index: u8) -> Option<i16> {
        ChannelIndex::new(index).map(|index| self.get(index))
    }

    /// Copy of all channel values
    pub fn values(&self) -> [i16; CHANNEL_COUNT] {
        self.values
    }

    /// Iterate channels in index order
    pub fn iter(&self) -> impl Iterator<Item = (ChannelIndex, i16)> + '_ {
        ChannelIndex::all().map(move |index| (index, self.get(index)))
    }

    /// Store a decoded update
    pub fn apply(&mut self, update: ChannelUpdate) {
        self.values[update.index().as_usize()] = update.value();
    }
}
