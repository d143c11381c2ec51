//! Non-Windows ducking: satisfies the contract without touching audio.

use crate::duck::Ducker;
use crate::error::Result;

pub struct NoopDucker {
    ducked: bool,
}

impl NoopDucker {
    pub fn new() -> Result<Self> {
        Ok(Self { ducked: false })
    }
}

impl Ducker for NoopDucker {
    fn duck(&mut self) {
        self.ducked = true;
    }

    fn unduck(&mut self) {
        self.ducked = false;
    }

    fn is_ducked(&self) -> bool {
        self.ducked
    }
}
