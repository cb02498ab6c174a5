//! Register map of the Tracer-AN/BN firmware and the transport seam used to
//! read it.
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Modbus table a register lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    Coil,
    Holding,
    Input,
}

/// A block the poller reads every tick, and the shortest response the
/// decoders accept for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub kind: RegisterKind,
    pub address: u16,
    pub count: u16,
    pub min_len: usize,
}

/// 0x3100..0x3111: PV, battery and load real-time values. The last word
/// (temperature inside the controller case) is never decoded.
pub const PV_BATTERY: BlockLayout = BlockLayout {
    kind: RegisterKind::Input,
    address: 0x3100,
    count: 18,
    min_len: 17,
};

/// 0x3200 battery status, 0x3201 charging equipment status, 0x3202
/// discharging equipment status.
pub const STATUS: BlockLayout = BlockLayout {
    kind: RegisterKind::Input,
    address: 0x3200,
    count: 3,
    min_len: 3,
};

/// 0x3300..0x3313: statistical parameters, up to total generated energy.
pub const ENERGY: BlockLayout = BlockLayout {
    kind: RegisterKind::Input,
    address: 0x3300,
    count: 20,
    min_len: 20,
};

/// 0x9007 boost charging voltage, 0x9008 float charging voltage.
pub const CHARGE_SETPOINTS: BlockLayout = BlockLayout {
    kind: RegisterKind::Holding,
    address: 0x9007,
    count: 2,
    min_len: 2,
};

/// 0x9013..0x9015: real time clock, two bytes per register.
pub const REAL_TIME_CLOCK: BlockLayout = BlockLayout {
    kind: RegisterKind::Holding,
    address: 0x9013,
    count: 3,
    min_len: 3,
};

/// Coil switching the load output when the load is in manual mode.
pub const LOAD_MANUAL_CONTROL: u16 = 0x0002;

/// Words read from the controller, tagged with where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterBlock {
    address: u16,
    requested: u16,
    words: Vec<u16>,
}

impl RegisterBlock {
    pub fn new(address: u16, requested: u16, words: Vec<u16>) -> RegisterBlock {
        RegisterBlock {
            address,
            requested,
            words,
        }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    pub fn requested(&self) -> u16 {
        self.requested
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// The words, provided there are at least `min_len` of them.
    pub fn require(&self, min_len: usize) -> Result<&[u16]> {
        if self.words.len() < min_len {
            return Err(Error::IncompleteData {
                address: self.address,
                expected: min_len,
                actual: self.words.len(),
            });
        }
        Ok(&self.words)
    }
}

/// Combine two adjacent registers into one 32 bit value, low word first.
/// `None` if `words` ends before `low + 1`.
pub fn double_word(words: &[u16], low: usize) -> Option<u32> {
    match words.get(low..low.checked_add(2)?)? {
        [lo, hi] => Some(u32::from(*lo) | u32::from(*hi) << 16),
        _ => None,
    }
}

/// Access to the controller's registers. Implementations bound every request
/// by a short timeout.
#[async_trait]
pub trait RegisterClient: Send {
    async fn read_block(&mut self, kind: RegisterKind, address: u16, count: u16)
        -> Result<Vec<u16>>;

    async fn write_single(&mut self, kind: RegisterKind, address: u16, value: u16) -> Result<()>;
}

/// Read `layout` and check it is long enough for its decoder.
pub async fn read_layout<C>(client: &mut C, layout: BlockLayout) -> Result<RegisterBlock>
where
    C: RegisterClient + ?Sized,
{
    let words = client.read_block(layout.kind, layout.address, layout.count).await?;
    let block = RegisterBlock::new(layout.address, layout.count, words);
    block.require(layout.min_len)?;
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_block_is_incomplete() {
        let block = RegisterBlock::new(0x3200, 3, vec![0, 0]);
        match block.require(STATUS.min_len) {
            Err(Error::IncompleteData {
                address,
                expected,
                actual,
            }) => {
                assert_eq!(address, 0x3200);
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn double_word_is_low_word_first() {
        assert_eq!(double_word(&[0x5678, 0x1234], 0), Some(0x1234_5678));
        assert_eq!(double_word(&[0, 0x0010, 0x0001], 1), Some(0x0001_0010));
    }

    #[test]
    fn double_word_past_the_end_is_none() {
        assert_eq!(double_word(&[], 0), None);
        assert_eq!(double_word(&[1], 0), None);
        assert_eq!(double_word(&[1, 2, 3], 2), None);
        assert_eq!(double_word(&[1, 2], usize::MAX), None);
    }
}
