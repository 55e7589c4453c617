use std::fmt;

/// Hashing speed in hashes per second.
///
/// Miners report gigahashes; the write endpoint stores hashes per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct HashRate(f64);

impl HashRate {
    const GIGA: f64 = 1e9;

    pub fn from_hashes(hashes_per_sec: f64) -> Self {
        Self(hashes_per_sec)
    }

    pub fn from_gigahashes(ghs: f64) -> Self {
        Self(ghs * Self::GIGA)
    }

    pub fn as_hashes(self) -> f64 {
        self.0
    }

    pub fn as_gigahashes(self) -> f64 {
        self.0 / Self::GIGA
    }
}

/// Formats in GH/s with one decimal, the unit operators read off the miner.
impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} GH/s", self.as_gigahashes())
    }
}
